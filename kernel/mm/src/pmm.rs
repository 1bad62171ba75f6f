//! Bitmap-based physical page frame allocator.
//!
//! One bit per 4 KiB frame; bit set = allocated. The bitmap itself is
//! placed at the base of the managed region and its own frames are marked
//! allocated up front. Word-level scanning with `trailing_zeros()` finds
//! the first free frame without touching every bit.

use core::ptr;

use sys7_core::sync::IrqSpinLock;

use crate::{PAGE_SIZE, PmmError, page_align};

const BITS_PER_WORD: usize = 64;

/// Bitmap allocator over one contiguous physical region.
pub struct BitmapPmm {
    /// Bitmap words; lives at the start of the managed region.
    bitmap: *mut u64,
    /// Number of frames tracked.
    total_frames: usize,
    /// Number of `u64` words in the bitmap.
    bitmap_words: usize,
    /// Frames currently free.
    free_frames: usize,
    /// Physical base of the managed region.
    base: usize,
}

// SAFETY: The bitmap pointer is only dereferenced through &mut self, and
// the global instance is guarded by a lock.
unsafe impl Send for BitmapPmm {}

impl BitmapPmm {
    /// Creates an allocator managing `mem_size_bytes` of memory starting at
    /// `phys_base`, placing the bitmap at `phys_base`.
    ///
    /// # Errors
    ///
    /// Returns [`PmmError::RegionTooSmall`] if the region cannot hold its
    /// own bitmap plus at least one allocatable frame.
    ///
    /// # Safety
    ///
    /// `phys_base` must point to `mem_size_bytes` of writable, page-aligned
    /// memory owned exclusively by this allocator.
    pub unsafe fn new(mem_size_bytes: usize, phys_base: usize) -> Result<Self, PmmError> {
        let total_frames = mem_size_bytes / PAGE_SIZE;
        let bitmap_bytes = total_frames.div_ceil(8);
        let bitmap_words = bitmap_bytes.div_ceil(8);
        let bitmap_frames = page_align(bitmap_bytes) / PAGE_SIZE;

        if total_frames == 0 || bitmap_frames >= total_frames {
            return Err(PmmError::RegionTooSmall);
        }

        let bitmap = phys_base as *mut u64;
        // SAFETY: Caller guarantees the region is writable and large enough.
        unsafe {
            ptr::write_bytes(bitmap, 0, bitmap_words);
        }

        let mut pmm = Self {
            bitmap,
            total_frames,
            bitmap_words,
            free_frames: total_frames,
            base: phys_base,
        };

        // The bitmap occupies the first frames of the region.
        for frame in 0..bitmap_frames {
            pmm.set_bit(frame);
        }
        pmm.free_frames -= bitmap_frames;

        Ok(pmm)
    }

    fn set_bit(&mut self, frame: usize) {
        // SAFETY: `frame < total_frames`, so the word index is in bounds.
        unsafe {
            *self.bitmap.add(frame / BITS_PER_WORD) |= 1u64 << (frame % BITS_PER_WORD);
        }
    }

    fn clear_bit(&mut self, frame: usize) {
        // SAFETY: `frame < total_frames`, so the word index is in bounds.
        unsafe {
            *self.bitmap.add(frame / BITS_PER_WORD) &= !(1u64 << (frame % BITS_PER_WORD));
        }
    }

    fn test_bit(&self, frame: usize) -> bool {
        // SAFETY: `frame < total_frames`, so the word index is in bounds.
        unsafe { *self.bitmap.add(frame / BITS_PER_WORD) & (1u64 << (frame % BITS_PER_WORD)) != 0 }
    }

    /// Allocates one 4 KiB frame, first-fit from the lowest address.
    pub fn alloc_page(&mut self) -> Option<usize> {
        if self.free_frames == 0 {
            return None;
        }

        for word_idx in 0..self.bitmap_words {
            // SAFETY: word_idx < bitmap_words.
            let word = unsafe { *self.bitmap.add(word_idx) };
            if word == u64::MAX {
                continue;
            }

            let bit = (!word).trailing_zeros() as usize;
            let frame = word_idx * BITS_PER_WORD + bit;
            if frame >= self.total_frames {
                break;
            }

            self.set_bit(frame);
            self.free_frames -= 1;
            return Some(self.base + frame * PAGE_SIZE);
        }

        None
    }

    /// Allocates `count` physically contiguous frames, returning the base
    /// address of the run.
    pub fn alloc_contiguous(&mut self, count: usize) -> Option<usize> {
        if count == 0 || self.free_frames < count {
            return None;
        }
        if count == 1 {
            return self.alloc_page();
        }

        let mut run_start = 0usize;
        let mut run_len = 0usize;

        for frame in 0..self.total_frames {
            if self.test_bit(frame) {
                run_len = 0;
                run_start = frame + 1;
            } else {
                run_len += 1;
                if run_len == count {
                    for f in run_start..run_start + count {
                        self.set_bit(f);
                    }
                    self.free_frames -= count;
                    return Some(self.base + run_start * PAGE_SIZE);
                }
            }
        }

        None
    }

    /// Frees the frame containing `addr`.
    ///
    /// Out-of-range addresses and frames that are already free are silent
    /// no-ops; higher layers that consider a double free fatal detect it
    /// themselves.
    pub fn free_page(&mut self, addr: usize) {
        if addr < self.base {
            return;
        }
        let frame = (addr - self.base) / PAGE_SIZE;
        if frame < self.total_frames && self.test_bit(frame) {
            self.clear_bit(frame);
            self.free_frames += 1;
        }
    }

    /// Total frames tracked (bitmap frames included).
    #[must_use]
    pub fn total_pages(&self) -> usize {
        self.total_frames
    }

    /// Frames currently free.
    #[must_use]
    pub fn free_pages(&self) -> usize {
        self.free_frames
    }

    /// Frames currently allocated.
    #[must_use]
    pub fn allocated_pages(&self) -> usize {
        self.total_frames - self.free_frames
    }
}

// ── Global instance ─────────────────────────────────────────────────────

// Reachable from allocation paths that may run with interrupts
// disabled; keep the discipline uniform.
static PMM: IrqSpinLock<Option<BitmapPmm>> = IrqSpinLock::new(None);

/// Initializes the global physical memory manager.
///
/// # Panics
///
/// Panics if called twice or if the region is too small.
///
/// # Safety
///
/// Same contract as [`BitmapPmm::new`].
pub unsafe fn init(mem_size_bytes: usize, phys_base: usize) {
    let mut pmm = PMM.lock();
    assert!(pmm.is_none(), "PMM already initialized");
    // SAFETY: Forwarded caller contract.
    let instance = unsafe { BitmapPmm::new(mem_size_bytes, phys_base) }
        .expect("PMM region too small for bitmap");
    sys7_core::kinfo!(
        "pmm: {} pages at {:#x} ({} free)",
        instance.total_pages(),
        phys_base,
        instance.free_pages()
    );
    *pmm = Some(instance);
}

/// Runs a closure against the global PMM.
///
/// # Panics
///
/// Panics if the PMM has not been initialized.
pub fn with_pmm<R>(f: impl FnOnce(&mut BitmapPmm) -> R) -> R {
    let mut pmm = PMM.lock();
    f(pmm.as_mut().expect("PMM not initialized"))
}

/// Returns `true` once [`init`] has run.
#[must_use]
pub fn is_initialized() -> bool {
    PMM.lock().is_some()
}
