//! The linear IR produced directly by the parser. Expressions are flattened
//! into postfix stack operations and control structures into paired markers
//! that the code generator turns into labels and jumps.

use std::collections::BTreeSet;

use hashbrown::HashMap;
use strum::Display;

/// A signed displacement from the frame base
pub type Offset = i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Push a number given as decimal text
    LoadNumber(String),
    /// Push the data section address of a decoded string literal
    LoadString(String),
    LoadFromBase(Offset),
    LoadGlobal(String),
    /// Pop a value into a frame slot
    AssignFromBase(Offset),
    /// Pop a value into a global variable
    AssignGlobal(String),
    /// Pop a value, then an address, and store the value at the address
    AssignMemory,
    /// Replace the top of the stack with the word it points to
    Deref,
    RefFromBase(Offset),
    RefGlobal(String),
    /// Call the function pointer sitting below `arguments` pushed arguments
    Call { arguments: usize },
    CallFunction { name: String, arguments: usize },
    /// Push the value returned by the last call
    LoadReturned,
    /// Grow the frame so that it holds `depth` local slots
    ReserveStack { depth: usize },
    PutLabel(String),
    GotoLabel(String),
    Return,
    ReturnValue,
    BeginWhile,
    EndWhileCondition,
    EndWhile,
    BeginIf,
    AddElse,
    EndIf,
    BeginTernary,
    GotoTernaryEnd,
    TernaryFalse,
    EndTernary,
    Binary(BinaryOperator),
    Not,
    InlineAsm(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
    Equal,
    NotEqual,
    Greater,
    Less,
    GreaterOrEqual,
    LessOrEqual,
}

impl BinaryOperator {
    /// The URCL instruction computing `r1 = r2 <op> r1`
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Subtract => "sub",
            Self::Multiply => "mlt",
            Self::Divide => "div",
            Self::Modulus => "mod",
            Self::Equal => "sete",
            Self::NotEqual => "setne",
            Self::Greater => "setg",
            Self::Less => "setl",
            Self::GreaterOrEqual => "setge",
            Self::LessOrEqual => "setle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum GlobalKind {
    Function,
    AsmFunction,
    Variable,
}

impl GlobalKind {
    pub fn is_callable(self) -> bool {
        matches!(self, Self::Function | Self::AsmFunction)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalEntry {
    pub kind: GlobalKind,
    pub body: Vec<Instruction>,
    /// Globals of the same unit this entry used after they were defined
    pub references: BTreeSet<String>,
    /// Every non-local name the body mentions, defined yet or not
    pub mentions: BTreeSet<String>,
}

impl GlobalEntry {
    pub fn new(kind: GlobalKind) -> Self {
        Self {
            kind,
            body: Vec::new(),
            references: BTreeSet::new(),
            mentions: BTreeSet::new(),
        }
    }
}

/// Everything the parser learned about one source file
#[derive(Debug, Clone, Default)]
pub struct TranslationUnit {
    pub source_name: String,
    /// Declared globals, in declaration order
    pub global_names: Vec<String>,
    pub globals: HashMap<String, GlobalEntry>,
    /// Names used anywhere in the unit that did not resolve to a local
    pub references: BTreeSet<String>,
    /// Names referenced outside of any global, i.e. a top level `extrn`
    pub root_references: BTreeSet<String>,
    /// Distinct decoded string literals, in order of first appearance
    pub strings: Vec<String>,
}

impl TranslationUnit {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            ..Self::default()
        }
    }

    pub fn is_global(&self, name: &str) -> bool {
        self.globals.contains_key(name)
    }

    pub fn global(&self, name: &str) -> Option<&GlobalEntry> {
        self.globals.get(name)
    }

    /// Globals in declaration order
    pub fn iter_globals(&self) -> impl Iterator<Item = (&str, &GlobalEntry)> {
        self.global_names
            .iter()
            .filter_map(|name| self.globals.get(name).map(|entry| (name.as_str(), entry)))
    }

    pub fn intern_string(&mut self, string: &str) {
        if !self.strings.iter().any(|s| s == string) {
            self.strings.push(string.to_owned());
        }
    }
}
