//! A compiler from a small untyped B dialect to URCL.
//!
//! The pipeline is lexer -> parser (straight to a linear IR) -> linker ->
//! code generator -> peephole optimizer, driven by [`driver::compile`].

pub mod backend;
pub mod diagnostics;
pub mod driver;
pub mod frontend;
mod index;
pub mod middle;
