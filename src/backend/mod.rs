//! The backend turns the linked IR into URCL text. Control markers become
//! labels and jumps, stack operations become `psh`/`pop` sequences over two
//! scratch registers, and the result is tightened by a peephole pass over the
//! assembly text.
//!
//! Generation is split in two parts:
//! 1. The setup header and the data section, holding every string literal and
//!    every live global variable.
//! 2. The runtime entry point followed by the body of every live function,
//!    which is what the peephole optimizer sees.

pub mod assembler;
pub mod codegen;
pub mod peephole;

/// Values written into the setup header of the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodegenOptions {
    pub bits: u32,
    pub min_stack: u32,
    pub min_heap: u32,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            bits: 16,
            min_stack: 8192,
            min_heap: 8192,
        }
    }
}
