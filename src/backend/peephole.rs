//! Peephole optimization over URCL text.
//!
//! The text is split into one [`Line`] per instruction and scanned left to
//! right. At every position the rules are tried in priority order on the
//! window starting there; the first match replaces the instructions it
//! consumed. Passes repeat until one makes no rewrite. Every rule strictly
//! shrinks the instruction count, so the loop always terminates.

use std::fmt::Display;

use itertools::Itertools;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Line {
    /// Never empty
    words: Vec<String>,
}

impl Line {
    fn parse(text: &str) -> Option<Self> {
        let words = text.split_whitespace().map(str::to_owned).collect_vec();
        (!words.is_empty()).then_some(Self { words })
    }

    fn new<const N: usize>(words: [&str; N]) -> Self {
        Self {
            words: words.into_iter().map(str::to_owned).collect(),
        }
    }

    fn is_label(&self) -> bool {
        self.words[0].starts_with('.')
    }

    fn opcode(&self) -> &str {
        &self.words[0]
    }

    fn operand(&self, index: usize) -> &str {
        self.words.get(index + 1).map_or("", String::as_str)
    }

    /// An instruction with this opcode and exactly this many operands
    fn is(&self, opcode: &str, operands: usize) -> bool {
        !self.is_label() && self.opcode() == opcode && self.words.len() == operands + 1
    }

    fn names(&self, operand: &str) -> bool {
        self.words[1..].iter().any(|word| word == operand)
    }
}

impl Display for Line {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.is_label() {
            f.write_str("    ")?;
        }

        f.write_str(&self.words.join(" "))
    }
}

fn is_register(operand: &str) -> bool {
    match operand {
        "bp" | "sp" => true,
        _ => operand
            .strip_prefix('r')
            .is_some_and(|number| !number.is_empty() && number.bytes().all(|b| b.is_ascii_digit())),
    }
}

/// A register that can be the destination of a `pop`
fn is_general_register(operand: &str) -> bool {
    operand != "sp" && is_register(operand)
}

/// `mov` when the source is a register, `imm` for immediates and labels
fn move_into(destination: &str, source: &str) -> Line {
    if is_register(source) {
        Line::new(["mov", destination, source])
    } else {
        Line::new(["imm", destination, source])
    }
}

const BINARY_OPCODES: &[&str] = &[
    "add", "sub", "mlt", "div", "mod", "and", "or", "xor", "sete", "setne", "setg", "setl",
    "setge", "setle",
];

const STACK_OR_CONTROL_OPCODES: &[&str] = &[
    "psh", "pop", "cal", "ret", "hlt", "jmp", "brz", "bnz", "bre", "bne", "brl", "brg", "ble",
    "bge", "brn", "brp", "bev", "bod", "brc", "bnc",
];

#[derive(Debug)]
struct Rewrite {
    consumed: usize,
    replacement: Vec<Line>,
}

impl Rewrite {
    fn new(consumed: usize, replacement: impl IntoIterator<Item = Line>) -> Self {
        Self {
            consumed,
            replacement: replacement.into_iter().collect(),
        }
    }
}

struct PeepholeRule {
    name: &'static str,
    apply: fn(&[Line]) -> Option<Rewrite>,
}

/// In priority order
static RULES: &[PeepholeRule] = &[
    PeepholeRule {
        name: "push-pop-same-register",
        apply: push_pop_same_register,
    },
    PeepholeRule {
        name: "push-pop",
        apply: push_pop,
    },
    PeepholeRule {
        name: "push-imm-pop",
        apply: push_imm_pop,
    },
    PeepholeRule {
        name: "binary-op-move",
        apply: binary_op_move,
    },
    PeepholeRule {
        name: "zero-branch",
        apply: zero_branch,
    },
    PeepholeRule {
        name: "load-move",
        apply: load_move,
    },
    PeepholeRule {
        name: "store-load",
        apply: store_load,
    },
    PeepholeRule {
        name: "push-instruction-pop",
        apply: push_instruction_pop,
    },
];

// psh R / pop R
fn push_pop_same_register(window: &[Line]) -> Option<Rewrite> {
    let [push, pop, ..] = window else {
        return None;
    };

    (push.is("psh", 1)
        && pop.is("pop", 1)
        && push.operand(0) == pop.operand(0)
        && is_register(push.operand(0)))
    .then(|| Rewrite::new(2, []))
}

// psh X / pop R -> imm R X
fn push_pop(window: &[Line]) -> Option<Rewrite> {
    let [push, pop, ..] = window else {
        return None;
    };

    let (source, destination) = (push.operand(0), pop.operand(0));

    (push.is("psh", 1) && pop.is("pop", 1) && is_general_register(destination))
        .then(|| Rewrite::new(2, [move_into(destination, source)]))
}

// psh X / imm Q Y / pop R -> imm R X / imm Q Y
fn push_imm_pop(window: &[Line]) -> Option<Rewrite> {
    let [push, imm, pop, ..] = window else {
        return None;
    };

    let (source, destination) = (push.operand(0), pop.operand(0));

    let matches = push.is("psh", 1)
        && imm.is("imm", 2)
        && pop.is("pop", 1)
        && is_general_register(destination)
        && is_general_register(imm.operand(0))
        && imm.operand(0) != destination;

    if !matches {
        return None;
    }

    if source == destination {
        return Some(Rewrite::new(3, [imm.clone()]));
    }

    Some(Rewrite::new(3, [move_into(destination, source), imm.clone()]))
}

// add D A B / mov M D -> add M A B
fn binary_op_move(window: &[Line]) -> Option<Rewrite> {
    let [operation, mov, ..] = window else {
        return None;
    };

    let matches = !operation.is_label()
        && BINARY_OPCODES.contains(&operation.opcode())
        && operation.words.len() == 4
        && mov.is("mov", 2)
        && mov.operand(1) == operation.operand(0);

    matches.then(|| {
        Rewrite::new(
            2,
            [Line::new([
                operation.opcode(),
                mov.operand(0),
                operation.operand(1),
                operation.operand(2),
            ])],
        )
    })
}

// imm R 0 / brz L R -> jmp L
fn zero_branch(window: &[Line]) -> Option<Rewrite> {
    let [imm, branch, ..] = window else {
        return None;
    };

    (imm.is("imm", 2)
        && imm.operand(1) == "0"
        && branch.is("brz", 2)
        && branch.operand(1) == imm.operand(0))
    .then(|| Rewrite::new(2, [Line::new(["jmp", branch.operand(0)])]))
}

// lod R A / mov M R -> lod M A
fn load_move(window: &[Line]) -> Option<Rewrite> {
    let [load, mov, ..] = window else {
        return None;
    };

    let matches = (load.is("lod", 2) || load.is("llod", 3))
        && mov.is("mov", 2)
        && mov.operand(1) == load.operand(0);

    matches.then(|| {
        let mut fused = load.clone();
        fused.words[1] = mov.operand(0).to_owned();
        Rewrite::new(2, [fused])
    })
}

// str A R / lod R A -> str A R
fn store_load(window: &[Line]) -> Option<Rewrite> {
    let [store, load, ..] = window else {
        return None;
    };

    let direct = store.is("str", 2)
        && load.is("lod", 2)
        && load.operand(0) == store.operand(1)
        && load.operand(1) == store.operand(0);

    let offset = store.is("lstr", 3)
        && load.is("llod", 3)
        && load.operand(0) == store.operand(2)
        && load.operand(1) == store.operand(0)
        && load.operand(2) == store.operand(1);

    (direct || offset).then(|| Rewrite::new(2, [store.clone()]))
}

// psh X / M / pop R -> imm R X / M
fn push_instruction_pop(window: &[Line]) -> Option<Rewrite> {
    let [push, middle, pop, ..] = window else {
        return None;
    };

    let (source, destination) = (push.operand(0), pop.operand(0));

    let matches = push.is("psh", 1)
        && pop.is("pop", 1)
        && is_general_register(destination)
        && !middle.is_label()
        && !STACK_OR_CONTROL_OPCODES.contains(&middle.opcode())
        && !middle.names(destination)
        && !middle.names("sp");

    if !matches {
        return None;
    }

    if source == destination {
        return Some(Rewrite::new(3, [middle.clone()]));
    }

    Some(Rewrite::new(
        3,
        [move_into(destination, source), middle.clone()],
    ))
}

/// Runs one left to right pass, returning the rewritten lines and the number
/// of rewrites made.
fn run_pass(lines: &[Line]) -> (Vec<Line>, usize) {
    let mut output = Vec::with_capacity(lines.len());
    let mut rewrites = 0;
    let mut index = 0;

    while index < lines.len() {
        let window = &lines[index..];

        let matched = RULES
            .iter()
            .find_map(|rule| (rule.apply)(window).map(|rewrite| (rule.name, rewrite)));

        match matched {
            Some((rule, rewrite)) => {
                tracing::trace!(rule, at = index, "peephole rewrite");

                output.extend(rewrite.replacement);
                index += rewrite.consumed;
                rewrites += 1;
            }
            None => {
                output.push(lines[index].clone());
                index += 1;
            }
        }
    }

    (output, rewrites)
}

/// Rewrites URCL text until no rule applies anymore.
pub fn optimize(assembly: &str) -> String {
    let mut lines = assembly.lines().filter_map(Line::parse).collect_vec();
    let before = lines.len();
    let mut passes = 0;

    loop {
        let (rewritten, rewrites) = run_pass(&lines);
        lines = rewritten;
        passes += 1;

        tracing::trace!(pass = passes, rewrites, "peephole pass");

        if rewrites == 0 {
            break;
        }
    }

    tracing::debug!(
        passes,
        before,
        after = lines.len(),
        "peephole optimization reached a fixpoint"
    );

    lines.iter().map(|line| format!("{line}\n")).collect()
}
