//! # ELF file handling

pub mod loader;
pub mod parser;

const PT_LOAD: u32 = 1;
const ELFCLASS64: u8 = 2;
