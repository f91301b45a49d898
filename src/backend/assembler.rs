use std::fmt::Display;

/// Text buffer for URCL output. Labels are written flush-left, everything
/// else is indented by four spaces.
#[derive(Debug, Default)]
pub struct Assembler {
    output: String,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_output(self) -> String {
        self.output
    }

    fn push_line(&mut self, string: impl AsRef<str>) {
        self.output.push_str(string.as_ref());
        self.output.push('\n');
    }

    pub fn emit(&mut self, string: impl AsRef<str>) {
        self.output.push_str("    ");
        self.push_line(string);
    }

    pub fn label(&mut self, name: impl AsRef<str>) {
        self.push_line(name);
    }

    /// Starts a new commented section of the file
    pub fn section(&mut self, name: impl AsRef<str>) {
        self.push_line("");
        self.push_line(format!("//{}:", name.as_ref()));
    }

    pub fn push(&mut self, operand: impl Display) {
        self.emit(format!("psh {operand}"));
    }

    pub fn pop(&mut self, register: Register) {
        self.emit(format!("pop {register}"));
    }

    pub fn function_prologue(&mut self) {
        self.push(Register::Bp);
        self.emit(format!("mov {} {}", Register::Bp, Register::Sp));
    }

    pub fn function_epilogue(&mut self) {
        self.emit(format!("mov {} {}", Register::Sp, Register::Bp));
        self.pop(Register::Bp);
        self.emit("ret");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Register {
    /// Scratch register, also carries return values
    R1,
    /// Scratch register
    R2,
    /// Frame base, aliased onto `r20` by the setup header
    Bp,
    Sp,
    /// Start of the heap, past the data section
    R25,
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn labels_are_flush_left() {
        let mut asm = Assembler::new();

        asm.label(".main");
        asm.function_prologue();
        asm.push(42);
        asm.pop(Register::R1);
        asm.function_epilogue();

        assert_eq!(
            asm.into_output(),
            indoc! {"
                .main
                    psh bp
                    mov bp sp
                    psh 42
                    pop r1
                    mov sp bp
                    pop bp
                    ret
            "}
        );
    }
}
