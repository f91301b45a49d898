use colored::Colorize;
use itertools::Itertools;

use crate::middle::ir::{GlobalEntry, GlobalKind, Instruction, TranslationUnit};

/// Renders every global of a unit as a colored listing.
pub fn pretty_print_unit(unit: &TranslationUnit) -> String {
    unit.to_string()
}

impl core::fmt::Display for TranslationUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} {}", "unit".magenta(), self.source_name.as_str().blue())?;

        if !self.references.is_empty() {
            writeln!(
                f,
                "{} {}",
                "references".magenta(),
                self.references.iter().join(", ").white()
            )?;
        }

        for (id, string) in self.strings.iter().enumerate() {
            writeln!(
                f,
                "{} {}",
                format!("str_{id}").yellow(),
                format!("{string:?}").green()
            )?;
        }

        for (name, entry) in self.iter_globals() {
            write!(f, "\n{}", GlobalListing { name, entry })?;
        }

        Ok(())
    }
}

struct GlobalListing<'a> {
    name: &'a str,
    entry: &'a GlobalEntry,
}

impl core::fmt::Display for GlobalListing<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keyword = match self.entry.kind {
            GlobalKind::Function => "fn",
            GlobalKind::AsmFunction => "asm",
            GlobalKind::Variable => "var",
        };

        write!(f, "{} {}", keyword.magenta(), self.name.blue())?;

        if !self.entry.references.is_empty() {
            write!(
                f,
                " {} {}",
                "uses".white(),
                self.entry.references.iter().join(", ").white()
            )?;
        }

        writeln!(f, "{}", " {".white())?;

        for instruction in &self.entry.body {
            writeln!(f, "    {instruction}")?;
        }

        writeln!(f, "{}", "}".white())
    }
}

impl core::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instruction::LoadNumber(value) => {
                write!(f, "{} {}", "load_number".cyan(), value.purple())
            }
            Instruction::LoadString(value) => {
                write!(f, "{} {}", "load_string".cyan(), format!("{value:?}").green())
            }
            Instruction::LoadFromBase(offset) => {
                write!(f, "{} {}", "load_from_base".cyan(), offset.to_string().yellow())
            }
            Instruction::LoadGlobal(name) => write!(f, "{} {}", "load_global".cyan(), name.blue()),
            Instruction::AssignFromBase(offset) => {
                write!(f, "{} {}", "assign_from_base".cyan(), offset.to_string().yellow())
            }
            Instruction::AssignGlobal(name) => {
                write!(f, "{} {}", "assign_global".cyan(), name.blue())
            }
            Instruction::AssignMemory => write!(f, "{}", "assign_memory".cyan()),
            Instruction::Deref => write!(f, "{}", "deref".cyan()),
            Instruction::RefFromBase(offset) => {
                write!(f, "{} {}", "ref_from_base".cyan(), offset.to_string().yellow())
            }
            Instruction::RefGlobal(name) => write!(f, "{} {}", "ref_global".cyan(), name.blue()),
            Instruction::Call { arguments } => {
                write!(f, "{} {}", "call".cyan(), arguments.to_string().purple())
            }
            Instruction::CallFunction { name, arguments } => write!(
                f,
                "{} {} {}",
                "call_function".cyan(),
                name.blue(),
                arguments.to_string().purple()
            ),
            Instruction::LoadReturned => write!(f, "{}", "load_returned".cyan()),
            Instruction::ReserveStack { depth } => {
                write!(f, "{} {}", "reserve_stack".cyan(), depth.to_string().purple())
            }
            Instruction::PutLabel(label) => write!(f, "{}", format!("{label}:").bright_red()),
            Instruction::GotoLabel(label) => write!(f, "{} {}", "goto".cyan(), label.bright_red()),
            Instruction::Return => write!(f, "{}", "return".cyan()),
            Instruction::ReturnValue => write!(f, "{}", "return_value".cyan()),
            Instruction::BeginWhile => write!(f, "{}", "begin_while".bright_green()),
            Instruction::EndWhileCondition => {
                write!(f, "{}", "end_while_condition".bright_green())
            }
            Instruction::EndWhile => write!(f, "{}", "end_while".bright_green()),
            Instruction::BeginIf => write!(f, "{}", "begin_if".bright_green()),
            Instruction::AddElse => write!(f, "{}", "add_else".bright_green()),
            Instruction::EndIf => write!(f, "{}", "end_if".bright_green()),
            Instruction::BeginTernary => write!(f, "{}", "begin_ternary".bright_green()),
            Instruction::GotoTernaryEnd => write!(f, "{}", "goto_ternary_end".bright_green()),
            Instruction::TernaryFalse => write!(f, "{}", "ternary_false".bright_green()),
            Instruction::EndTernary => write!(f, "{}", "end_ternary".bright_green()),
            Instruction::Binary(operator) => write!(f, "{}", operator.to_string().white()),
            Instruction::Not => write!(f, "{}", "not".white()),
            Instruction::InlineAsm(lines) => {
                write!(f, "{}", "inline_asm".cyan())?;

                for line in lines {
                    write!(f, "\n        {}", line.green())?;
                }

                Ok(())
            }
        }
    }
}
