//! The linear IR produced by the parser and the linker that decides which of
//! its globals survive into code generation.

pub mod ir;
pub mod link;
pub mod pretty_print;
