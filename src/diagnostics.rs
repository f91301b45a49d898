//! Errors reported by the compiler.
//!
//! Syntax and linker errors are collected exhaustively and reported together;
//! any of them aborts the compilation before output is written.

use std::{io, path::PathBuf};

use colored::Colorize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "[SYNTAX ERROR]: {file}:{line}: {}: {message}",
    .global.as_deref().unwrap_or("?")
)]
pub struct SyntaxError {
    pub file: String,
    pub line: usize,
    /// The global being defined when the error occurred
    pub global: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Error)]
pub enum LinkError {
    #[error("[LINKER ERROR]: multiple definitions of symbol '{0}'")]
    MultipleDefinitions(String),
    #[error("[LINKER ERROR]: undefined symbol '{0}'")]
    UndefinedSymbol(String),
    #[error("[LINKER ERROR]: cannot assign to function '{0}'")]
    AssignToFunction(String),
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("[FATAL ERROR]: could not read '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("[FATAL ERROR]: could not list library files: {0}")]
    LibraryDiscovery(#[from] walkdir::Error),
    #[error("[FATAL ERROR]: could not write '{}': {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("compilation terminated after {} syntax error(s)", .0.len())]
    Syntax(Vec<SyntaxError>),
    #[error("compilation terminated after {} linker error(s)", .0.len())]
    Link(Vec<LinkError>),
    #[error("[INTERNAL ERROR]: {0}")]
    Internal(String),
}

impl CompileError {
    /// Every diagnostic line this error stands for, in reporting order.
    pub fn diagnostics(&self) -> Vec<String> {
        match self {
            CompileError::Syntax(errors) => errors.iter().map(ToString::to_string).collect(),
            CompileError::Link(errors) => errors.iter().map(ToString::to_string).collect(),
            other => vec![other.to_string()],
        }
    }

    /// Prints the diagnostics to stderr with their `[...]` tag highlighted.
    pub fn report(&self) {
        for line in self.diagnostics() {
            match line.split_once("]: ") {
                Some((tag, rest)) if tag.starts_with('[') => {
                    eprintln!("{}: {rest}", format!("{tag}]").red().bold());
                }
                _ => eprintln!("{line}"),
            }
        }

        if matches!(self, CompileError::Syntax(_) | CompileError::Link(_)) {
            eprintln!("{}", self.to_string().bold());
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn syntax_error_format() {
        let error = SyntaxError {
            file: "main.b".to_owned(),
            line: 3,
            global: Some("main".to_owned()),
            message: "expected ';' after statement, got '}'".to_owned(),
        };

        assert_eq!(
            error.to_string(),
            "[SYNTAX ERROR]: main.b:3: main: expected ';' after statement, got '}'"
        );

        let at_file_scope = SyntaxError {
            global: None,
            ..error
        };

        assert!(at_file_scope.to_string().starts_with("[SYNTAX ERROR]: main.b:3: ?: "));
    }

    #[test]
    fn linker_error_format() {
        assert_eq!(
            LinkError::MultipleDefinitions("x".to_owned()).to_string(),
            "[LINKER ERROR]: multiple definitions of symbol 'x'"
        );
        assert_eq!(
            LinkError::UndefinedSymbol("foo".to_owned()).to_string(),
            "[LINKER ERROR]: undefined symbol 'foo'"
        );
    }

    #[test]
    fn grouped_errors_expand_into_one_line_each() {
        let error = CompileError::Link(vec![
            LinkError::UndefinedSymbol("a".to_owned()),
            LinkError::UndefinedSymbol("b".to_owned()),
        ]);

        assert_eq!(
            error.diagnostics(),
            vec![
                "[LINKER ERROR]: undefined symbol 'a'",
                "[LINKER ERROR]: undefined symbol 'b'",
            ]
        );
    }
}
