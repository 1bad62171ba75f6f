//! Architecture-specific code. Only x86 protected mode is wired today.

pub mod x86;
