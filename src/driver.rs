//! Runs the whole pipeline over a set of input files.
//!
//! Library files are parsed before the user's files. Every unit is parsed
//! even after one of them failed, so all syntax errors get reported in one
//! run. Nothing is written unless every stage succeeded.

use std::{
    fs,
    path::{Path, PathBuf},
};

use itertools::Itertools;
use walkdir::WalkDir;

use crate::{
    backend::{CodegenOptions, codegen, peephole},
    diagnostics::CompileError,
    frontend::{SourceFile, SourceFileOrigin, lexer::Lexer, parser::Parser},
    middle::{
        ir::TranslationUnit,
        link::{self, DceStrategy},
        pretty_print::pretty_print_unit,
    },
};

/// What gets written to the output path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Emit {
    /// The compiled program
    #[default]
    Urcl,
    /// A listing of the IR of every unit
    Ir,
    /// The token stream of every unit
    Tokens,
}

#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub sources: Vec<PathBuf>,
    pub output: PathBuf,
    /// Skip the library directory entirely
    pub nostdlib: bool,
    pub lib_dir: PathBuf,
    /// Run the peephole optimizer over the generated code
    pub optimize: bool,
    pub dce: DceStrategy,
    pub emit: Emit,
    pub codegen: CodegenOptions,
}

impl CompileOptions {
    pub fn new(sources: Vec<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            sources,
            output: output.into(),
            nostdlib: false,
            lib_dir: PathBuf::from("lib"),
            optimize: true,
            dce: DceStrategy::default(),
            emit: Emit::default(),
            codegen: CodegenOptions::default(),
        }
    }
}

pub fn read_file(path: &Path) -> Result<SourceFile, CompileError> {
    let contents = fs::read_to_string(path).map_err(|source| CompileError::Read {
        path: path.to_owned(),
        source,
    })?;

    Ok(SourceFile {
        contents,
        origin: SourceFileOrigin::File(path.to_owned()),
    })
}

/// Every `*.b` file below `dir`, in sorted traversal order. A missing
/// directory holds no library.
pub fn list_library_files(dir: &Path) -> Result<Vec<PathBuf>, CompileError> {
    if !dir.exists() {
        tracing::warn!(dir = %dir.display(), "library directory does not exist");
        return Ok(Vec::new());
    }

    let mut files = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;

        if entry.file_type().is_file() && entry.path().extension().is_some_and(|ext| ext == "b") {
            files.push(entry.into_path());
        }
    }

    tracing::debug!(dir = %dir.display(), count = files.len(), "found library files");

    Ok(files)
}

/// The path actually written for `--emit urcl`
pub fn output_path(options: &CompileOptions) -> PathBuf {
    if options.emit == Emit::Urcl && options.output.extension().is_none() {
        options.output.with_extension("urcl")
    } else {
        options.output.clone()
    }
}

/// Compiles the program and writes it to the output, returning the path
/// written.
pub fn compile(options: &CompileOptions) -> Result<PathBuf, CompileError> {
    let text = compile_to_string(options)?;
    let path = output_path(options);

    fs::write(&path, text).map_err(|source| CompileError::Write {
        path: path.clone(),
        source,
    })?;

    tracing::info!(path = %path.display(), emit = %options.emit, "wrote output");

    Ok(path)
}

/// Everything [`compile`] does except writing the result.
pub fn compile_to_string(options: &CompileOptions) -> Result<String, CompileError> {
    let mut paths = Vec::new();

    if !options.nostdlib {
        paths.extend(list_library_files(&options.lib_dir)?);
    }

    paths.extend(options.sources.iter().cloned());

    let sources = paths
        .iter()
        .map(|path| read_file(path))
        .collect::<Result<Vec<_>, _>>()?;

    if options.emit == Emit::Tokens {
        return Ok(dump_tokens(&sources));
    }

    let units = parse_all(&sources)?;

    if options.emit == Emit::Ir {
        return Ok(units
            .iter()
            .map(|unit| strip_ansi_escapes::strip_str(pretty_print_unit(unit)))
            .join("\n"));
    }

    let program = link::link(units, options.dce).map_err(CompileError::Link)?;
    let generated = codegen::generate(&program, &options.codegen)?;

    if !options.optimize {
        return Ok(generated.into_text());
    }

    let code = peephole::optimize(&generated.code);

    Ok(generated.header + &code)
}

fn parse_all(sources: &[SourceFile]) -> Result<Vec<TranslationUnit>, CompileError> {
    let mut units = Vec::with_capacity(sources.len());
    let mut errors = Vec::new();

    for source in sources {
        match Parser::parse_unit(source) {
            Ok(unit) => units.push(unit),
            Err(unit_errors) => errors.extend(unit_errors),
        }
    }

    if !errors.is_empty() {
        return Err(CompileError::Syntax(errors));
    }

    Ok(units)
}

fn dump_tokens(sources: &[SourceFile]) -> String {
    sources
        .iter()
        .map(|source| {
            let tokens = Lexer::tokenize(source)
                .into_iter()
                .map(|token| format!("{}: {:?} {:?}\n", token.line, token.kind, token.literal))
                .join("");

            format!("// {}\n{tokens}", source.name())
        })
        .join("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urcl_output_gets_an_extension() {
        let options = CompileOptions::new(vec![], "out");
        assert_eq!(output_path(&options), PathBuf::from("out.urcl"));

        let options = CompileOptions::new(vec![], "out.txt");
        assert_eq!(output_path(&options), PathBuf::from("out.txt"));

        let mut options = CompileOptions::new(vec![], "out");
        options.emit = Emit::Ir;
        assert_eq!(output_path(&options), PathBuf::from("out"));
    }

    #[test]
    fn missing_library_directory_is_empty() {
        let files = list_library_files(Path::new("this/directory/does/not/exist")).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn token_dump_lists_every_token_of_every_file() {
        let sources = [
            SourceFile::from_memory("x;"),
            SourceFile::from_memory("\n42"),
        ];

        assert_eq!(
            dump_tokens(&sources),
            concat!(
                "// <memory>\n",
                "1: Identifier \"x\"\n",
                "1: Semicolon \";\"\n",
                "1: EndOfFile \"end of file\"\n",
                "// <memory>\n",
                "2: NumberLiteral \"42\"\n",
                "2: EndOfFile \"end of file\"\n",
            )
        );
    }

    #[test]
    fn unreadable_source_is_fatal() {
        let mut options = CompileOptions::new(vec![PathBuf::from("missing.b")], "out");
        options.nostdlib = true;

        let error = compile_to_string(&options).unwrap_err();
        assert!(matches!(error, CompileError::Read { .. }));
        assert!(error.to_string().starts_with("[FATAL ERROR]: could not read 'missing.b'"));
    }
}
