//! Lowers the live globals of a linked program to URCL.
//!
//! Every IR instruction maps onto a fixed sequence over the hardware stack
//! with `r1` and `r2` as scratch registers. Control markers are paired up
//! through label stacks, so the IR must be balanced; anything else is a bug
//! in an earlier stage and is reported as an internal error.

use std::fmt::Display;

use hashbrown::HashMap;
use itertools::Itertools;

use crate::{
    backend::{
        CodegenOptions,
        assembler::{
            Assembler,
            Register::{Bp, R1, R2, R25, Sp},
        },
    },
    diagnostics::CompileError,
    middle::{
        ir::{GlobalEntry, GlobalKind, Instruction},
        link::LinkedProgram,
    },
};

/// Generated URCL before peephole optimization
#[derive(Debug)]
pub struct GeneratedProgram {
    /// Setup header and data section
    pub header: String,
    /// Runtime entry point followed by every live function
    pub code: String,
}

impl GeneratedProgram {
    pub fn into_text(self) -> String {
        self.header + &self.code
    }
}

pub fn generate(
    program: &LinkedProgram,
    options: &CodegenOptions,
) -> Result<GeneratedProgram, CompileError> {
    let mut generator = CodeGenerator::new(program);

    let header = generator.generate_header(options)?;
    let code = generator.generate_code()?;

    tracing::debug!(
        strings = generator.strings.len(),
        variables = generator.variables.len(),
        labels = generator.next_label,
        "generated code"
    );

    Ok(GeneratedProgram { header, code })
}

fn internal(message: impl Into<String>) -> CompileError {
    CompileError::Internal(message.into())
}

/// How a global is named in an operand
enum GlobalOperand {
    Label(String),
    Address(usize),
}

impl Display for GlobalOperand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GlobalOperand::Label(label) => f.write_str(label),
            GlobalOperand::Address(address) => write!(f, "{address}"),
        }
    }
}

struct CodeGenerator<'a> {
    program: &'a LinkedProgram,
    /// Data section address of each string literal
    strings: HashMap<&'a str, usize>,
    /// Data section address of each live global variable
    variables: HashMap<&'a str, usize>,
    next_label: usize,
    if_labels: Vec<String>,
    while_labels: Vec<String>,
    ternary_labels: Vec<String>,
    /// Name of the function being lowered
    function: &'a str,
    leave_used: bool,
}

impl<'a> CodeGenerator<'a> {
    fn new(program: &'a LinkedProgram) -> Self {
        Self {
            program,
            strings: HashMap::new(),
            variables: HashMap::new(),
            next_label: 0,
            if_labels: Vec::new(),
            while_labels: Vec::new(),
            ternary_labels: Vec::new(),
            function: "",
            leave_used: false,
        }
    }

    fn make_label(&mut self) -> String {
        let label = format!(".L{}_", self.next_label);
        self.next_label += 1;
        label
    }

    fn leave_label(&self) -> String {
        format!(".LEAVE{}_", self.function)
    }

    fn generate_header(&mut self, options: &CodegenOptions) -> Result<String, CompileError> {
        let program = self.program;
        let mut asm = Assembler::new();

        asm.section("setup");
        asm.emit(format!("BITS == {}", options.bits));
        asm.emit(format!("MINSTACK {}", options.min_stack));
        asm.emit(format!("MINHEAP {}", options.min_heap));
        asm.emit(format!("@define {Bp} r20"));

        asm.section("data");

        let mut address = 0;

        for string in program.units.iter().flat_map(|unit| &unit.strings) {
            if self.strings.contains_key(string.as_str()) {
                continue;
            }

            let words = string
                .chars()
                .map(|c| (c as u32).to_string())
                .chain(["0".to_owned()])
                .join(",");

            asm.emit(format!("dw [{words}]"));
            self.strings.insert(string, address);
            address += string.chars().count() + 1;
        }

        let variables = program
            .live_globals()
            .filter(|(_, entry)| entry.kind == GlobalKind::Variable);

        for (name, entry) in variables {
            let value = match entry.body.as_slice() {
                [Instruction::LoadNumber(value)] => value.clone(),
                [Instruction::LoadString(string)] => self.string_address(string)?.to_string(),
                _ => {
                    return Err(internal(format!(
                        "global variable '{name}' has no constant initializer"
                    )));
                }
            };

            asm.emit(format!("dw [{value}]"));
            self.variables.insert(name, address);
            address += 1;
        }

        asm.emit(format!("imm {R25} {address} // heap base"));
        asm.section("runtime");

        Ok(asm.into_output())
    }

    fn generate_code(&mut self) -> Result<String, CompileError> {
        let program = self.program;
        let mut asm = Assembler::new();

        asm.emit("cal .main");
        asm.emit("hlt");

        for (name, entry) in program.live_globals() {
            match entry.kind {
                GlobalKind::Function => self.generate_function(&mut asm, name, entry)?,
                GlobalKind::AsmFunction => generate_asm_function(&mut asm, name, entry)?,
                GlobalKind::Variable => {}
            }
        }

        Ok(asm.into_output())
    }

    fn generate_function(
        &mut self,
        asm: &mut Assembler,
        name: &'a str,
        entry: &'a GlobalEntry,
    ) -> Result<(), CompileError> {
        self.function = name;
        self.leave_used = false;

        asm.label(format!(".{name}"));
        asm.function_prologue();

        let last = entry.body.len().saturating_sub(1);

        for (index, instruction) in entry.body.iter().enumerate() {
            self.lower(asm, instruction, index == last)?;
        }

        if !(self.if_labels.is_empty()
            && self.while_labels.is_empty()
            && self.ternary_labels.is_empty())
        {
            return Err(internal(format!(
                "unterminated control structure in '{name}'"
            )));
        }

        // A final return falls through to the epilogue
        if self.leave_used {
            asm.label(self.leave_label());
        }

        asm.function_epilogue();

        Ok(())
    }

    fn string_address(&self, string: &str) -> Result<usize, CompileError> {
        self.strings
            .get(string)
            .copied()
            .ok_or_else(|| internal(format!("string {string:?} is not in the data section")))
    }

    fn variable_address(&self, name: &str) -> Result<usize, CompileError> {
        self.variables
            .get(name)
            .copied()
            .ok_or_else(|| internal(format!("'{name}' is not a live global variable")))
    }

    fn global_operand(&self, name: &str) -> Result<GlobalOperand, CompileError> {
        if !self.program.is_live(name) {
            return Err(internal(format!(
                "reference to symbol '{name}' that is not live"
            )));
        }

        let entry = self
            .program
            .lookup(name)
            .ok_or_else(|| internal(format!("symbol '{name}' has no definition")))?;

        if entry.kind.is_callable() {
            Ok(GlobalOperand::Label(format!(".{name}")))
        } else {
            self.variable_address(name).map(GlobalOperand::Address)
        }
    }

    fn pop_label(stack: &mut Vec<String>, marker: &str) -> Result<String, CompileError> {
        stack
            .pop()
            .ok_or_else(|| internal(format!("{marker} without a matching opener")))
    }

    fn lower(
        &mut self,
        asm: &mut Assembler,
        instruction: &Instruction,
        is_final: bool,
    ) -> Result<(), CompileError> {
        match instruction {
            Instruction::LoadNumber(value) => asm.push(value),
            Instruction::LoadString(string) => asm.push(self.string_address(string)?),
            Instruction::LoadFromBase(offset) => {
                asm.emit(format!("llod {R1} {Bp} {offset}"));
                asm.push(R1);
            }
            Instruction::LoadGlobal(name) => match self.global_operand(name)? {
                GlobalOperand::Address(address) => {
                    asm.emit(format!("lod {R1} {address}"));
                    asm.push(R1);
                }
                label => asm.push(label),
            },
            Instruction::AssignFromBase(offset) => {
                asm.pop(R1);
                asm.emit(format!("lstr {Bp} {offset} {R1}"));
            }
            Instruction::AssignGlobal(name) => {
                let address = self.variable_address(name)?;
                asm.pop(R1);
                asm.emit(format!("str {address} {R1}"));
            }
            Instruction::AssignMemory => {
                asm.pop(R1);
                asm.pop(R2);
                asm.emit(format!("str {R2} {R1}"));
            }
            Instruction::Deref => {
                asm.emit(format!("lod {R1} {Sp}"));
                asm.emit(format!("lod {R1} {R1}"));
                asm.emit(format!("str {Sp} {R1}"));
            }
            Instruction::RefFromBase(offset) => {
                asm.emit(format!("add {R1} {Bp} {offset}"));
                asm.push(R1);
            }
            Instruction::RefGlobal(name) => asm.push(self.global_operand(name)?),
            Instruction::Call { arguments } => {
                // The function pointer sits right below the arguments
                asm.emit(format!("llod {R1} {Sp} {arguments}"));
                asm.emit(format!("cal {R1}"));
                asm.emit(format!("add {Sp} {Sp} {}", arguments + 1));
            }
            Instruction::CallFunction { name, arguments } => {
                match self.global_operand(name)? {
                    // Calling a variable calls the function it points to
                    GlobalOperand::Address(address) => {
                        asm.emit(format!("lod {R1} {address}"));
                        asm.emit(format!("cal {R1}"));
                    }
                    label => asm.emit(format!("cal {label}")),
                }

                if *arguments > 0 {
                    asm.emit(format!("add {Sp} {Sp} {arguments}"));
                }
            }
            Instruction::LoadReturned => asm.push(R1),
            Instruction::ReserveStack { depth } => asm.emit(format!("sub {Sp} {Bp} {depth}")),
            Instruction::PutLabel(label) => asm.label(format!(".{}_L_{label}", self.function)),
            Instruction::GotoLabel(label) => {
                asm.emit(format!("jmp .{}_L_{label}", self.function))
            }
            Instruction::Return | Instruction::ReturnValue => {
                if *instruction == Instruction::ReturnValue {
                    asm.pop(R1);
                }

                if !is_final {
                    asm.emit(format!("jmp {}", self.leave_label()));
                    self.leave_used = true;
                }
            }
            Instruction::BeginWhile => {
                let begin = self.make_label();
                asm.label(&begin);
                self.while_labels.push(begin);
            }
            Instruction::EndWhileCondition => {
                let end = self.make_label();
                asm.pop(R1);
                asm.emit(format!("brz {end} {R1}"));
                self.while_labels.push(end);
            }
            Instruction::EndWhile => {
                let end = Self::pop_label(&mut self.while_labels, "end of while")?;
                let begin = Self::pop_label(&mut self.while_labels, "end of while")?;
                asm.emit(format!("jmp {begin}"));
                asm.label(end);
            }
            Instruction::BeginIf => {
                let next = self.make_label();
                asm.pop(R1);
                asm.emit(format!("brz {next} {R1}"));
                self.if_labels.push(next);
            }
            Instruction::AddElse => {
                let next = Self::pop_label(&mut self.if_labels, "else")?;
                let end = self.make_label();
                asm.emit(format!("jmp {end}"));
                asm.label(next);
                self.if_labels.push(end);
            }
            Instruction::EndIf => {
                let end = Self::pop_label(&mut self.if_labels, "end of if")?;
                asm.label(end);
            }
            Instruction::BeginTernary => {
                let false_label = self.make_label();
                let end = self.make_label();
                asm.pop(R1);
                asm.emit(format!("brz {false_label} {R1}"));
                self.ternary_labels.push(end);
                self.ternary_labels.push(false_label);
            }
            Instruction::GotoTernaryEnd => {
                let end = self
                    .ternary_labels
                    .iter()
                    .rev()
                    .nth(1)
                    .ok_or_else(|| internal("ternary branch without a matching opener"))?;
                asm.emit(format!("jmp {end}"));
            }
            Instruction::TernaryFalse => {
                let false_label = Self::pop_label(&mut self.ternary_labels, "ternary branch")?;
                asm.label(false_label);
            }
            Instruction::EndTernary => {
                let end = Self::pop_label(&mut self.ternary_labels, "end of ternary")?;
                asm.label(end);
            }
            Instruction::Binary(operator) => {
                asm.pop(R1);
                asm.pop(R2);
                asm.emit(format!("{} {R1} {R2} {R1}", operator.mnemonic()));
                asm.push(R1);
            }
            Instruction::Not => {
                asm.pop(R1);
                asm.emit(format!("sete {R1} {R1} 0"));
                asm.push(R1);
            }
            Instruction::InlineAsm(lines) => {
                for line in lines {
                    asm.emit(line);
                }
            }
        }

        Ok(())
    }
}

fn generate_asm_function(
    asm: &mut Assembler,
    name: &str,
    entry: &GlobalEntry,
) -> Result<(), CompileError> {
    asm.label(format!(".{name}"));

    for instruction in &entry.body {
        let Instruction::InlineAsm(lines) = instruction else {
            return Err(internal(format!(
                "assembly function '{name}' contains '{instruction:?}'"
            )));
        };

        for line in lines {
            asm.emit(line);
        }
    }

    asm.emit("ret");

    Ok(())
}
