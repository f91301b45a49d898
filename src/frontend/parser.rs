//! Single-pass recursive descent parser. No syntax tree is built: every
//! production emits IR into the global currently being defined, so parsing a
//! unit and generating its IR are the same walk over the token stream.

use hashbrown::HashSet;
use itertools::Itertools;

use crate::{
    diagnostics::SyntaxError,
    frontend::{
        SourceFile, escape,
        frame::FrameLayout,
        lexer::{Keyword, Lexer, Token, TokenKind},
    },
    middle::ir::{BinaryOperator, GlobalEntry, GlobalKind, Instruction, TranslationUnit},
};

/// State that only exists while a function body is being parsed
#[derive(Debug)]
struct FunctionContext {
    frame: FrameLayout,
    labels: HashSet<String>,
    /// Every `goto` target along with the line it was used on
    gotos: Vec<(String, usize)>,
}

impl FunctionContext {
    fn new(frame: FrameLayout) -> Self {
        Self {
            frame,
            labels: HashSet::new(),
            gotos: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct Parser {
    file: String,
    tokens: Vec<Token>,
    position: usize,
    /// The first invalid token of the stream and the position it occupied.
    /// Everything from that position on has been replaced by end of file.
    invalid: Option<(usize, Token)>,
    halted: bool,
    unit: TranslationUnit,
    /// `None` between top level declarations, emission is then a no-op
    current_global: Option<String>,
    function: Option<FunctionContext>,
    errors: Vec<SyntaxError>,
}

impl Parser {
    pub fn parse_unit(source: &SourceFile) -> Result<TranslationUnit, Vec<SyntaxError>> {
        Self::parse_tokens(source.name(), Lexer::tokenize(source))
    }

    pub fn parse_tokens(
        file: String,
        mut tokens: Vec<Token>,
    ) -> Result<TranslationUnit, Vec<SyntaxError>> {
        let first_invalid = tokens
            .iter()
            .position(|token| token.kind == TokenKind::Invalid);

        let invalid = first_invalid.map(|index| {
            let token = tokens[index].clone();
            tokens.truncate(index);
            (index, token)
        });

        if tokens
            .last()
            .is_none_or(|token| token.kind != TokenKind::EndOfFile)
        {
            let line = invalid
                .as_ref()
                .map(|(_, token)| token.line)
                .or_else(|| tokens.last().map(|token| token.line))
                .unwrap_or(1);

            tokens.push(Token {
                kind: TokenKind::EndOfFile,
                literal: "end of file".to_owned(),
                line,
            });
        }

        let mut parser = Self {
            unit: TranslationUnit::new(file.clone()),
            file,
            tokens,
            position: 0,
            invalid,
            halted: false,
            current_global: None,
            function: None,
            errors: Vec::new(),
        };

        parser.check_invalid();

        while parser.kind() != TokenKind::EndOfFile {
            parser.parse_statement();
        }

        tracing::debug!(
            unit = %parser.file,
            globals = parser.unit.global_names.len(),
            references = parser.unit.references.len(),
            errors = parser.errors.len(),
            "parsed unit"
        );

        if parser.errors.is_empty() {
            Ok(parser.unit)
        } else {
            Err(parser.errors)
        }
    }

    /* Token stream */

    fn peek(&self) -> &Token {
        &self.tokens[self.position]
    }

    fn peek_nth(&self, n: usize) -> &Token {
        let index = (self.position + n).min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    fn kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn advance(&mut self) {
        if self.kind() == TokenKind::EndOfFile {
            return;
        }

        self.position += 1;
        self.check_invalid();
    }

    /// Reports the invalid token once the parser reaches it. The unit stops
    /// producing diagnostics from then on.
    fn check_invalid(&mut self) {
        let position = self.position;

        if let Some((_, token)) = self.invalid.take_if(|(index, _)| *index == position) {
            self.error_at(token.line, token.literal);
            self.halted = true;
        }
    }

    fn next_token(&mut self) -> Token {
        let token = self.peek().clone();
        self.advance();
        token
    }

    /// Consumes the next token whatever it is, reporting an error when it is
    /// not of the expected kind.
    fn expect(&mut self, kind: TokenKind, message: &str) -> Option<Token> {
        let token = self.next_token();

        if token.kind == kind {
            return Some(token);
        }

        self.error(format!("{message}, got '{}'", token.literal));
        None
    }

    fn expect_semicolon(&mut self) {
        self.expect(TokenKind::Semicolon, "expected ';' after declaration");
    }

    fn skip_semicolons(&mut self) {
        while self.kind() == TokenKind::Semicolon {
            self.advance();
        }
    }

    /* Diagnostics */

    /// Line of the most recently consumed token
    fn previous_line(&self) -> usize {
        self.tokens[self.position.saturating_sub(1)].line
    }

    fn error(&mut self, message: impl Into<String>) {
        let line = self.previous_line();
        self.error_at(line, message);
    }

    fn error_at(&mut self, line: usize, message: impl Into<String>) {
        if self.halted {
            return;
        }

        self.errors.push(SyntaxError {
            file: self.file.clone(),
            line,
            global: self.current_global.clone(),
            message: message.into(),
        });
    }

    /* Emission */

    fn current_entry_mut(&mut self) -> Option<&mut GlobalEntry> {
        let name = self.current_global.as_ref()?;
        self.unit.globals.get_mut(name)
    }

    fn emit(&mut self, instruction: Instruction) {
        if let Some(entry) = self.current_entry_mut() {
            entry.body.push(instruction);
        }
    }

    fn emit_string(&mut self, string: String) {
        if self.current_global.is_none() {
            return;
        }

        self.unit.intern_string(&string);
        self.emit(Instruction::LoadString(string));
    }

    fn define_global(&mut self, name: &str, kind: GlobalKind) {
        if self.unit.is_global(name) {
            self.error(format!("global '{name}' already exists"));
        } else {
            self.unit.global_names.push(name.to_owned());
        }

        self.unit
            .globals
            .insert(name.to_owned(), GlobalEntry::new(kind));
        self.current_global = Some(name.to_owned());
    }

    /// Records a use of a name that did not resolve to a local.
    fn reference_global(&mut self, name: &str) {
        let Some(current) = &self.current_global else {
            return;
        };

        self.unit.references.insert(name.to_owned());

        let known = self.unit.globals.contains_key(name);

        if let Some(entry) = self.unit.globals.get_mut(current) {
            entry.mentions.insert(name.to_owned());

            if known {
                entry.references.insert(name.to_owned());
            }
        }
    }

    fn resolve_local(&self, name: &str) -> Option<i64> {
        self.function
            .as_ref()?
            .frame
            .resolve(name)
            .map(|slot| slot.offset)
    }

    fn push_scope(&mut self) {
        if let Some(function) = self.function.as_mut() {
            function.frame.push_scope();
        }
    }

    fn pop_scope(&mut self) {
        if let Some(function) = self.function.as_mut() {
            function.frame.pop_scope();
        }
    }

    /* Statements */

    fn parse_statement(&mut self) {
        match self.kind() {
            TokenKind::Identifier => self.parse_declaration(),
            TokenKind::Asterisk => self.parse_memory_assignment(),
            TokenKind::OpenBrace => self.parse_block(),
            TokenKind::Keyword(Keyword::Extrn) => self.parse_extrn(),
            TokenKind::Keyword(Keyword::Auto) => self.parse_auto(),
            TokenKind::Keyword(Keyword::Asm) => self.parse_inline_asm(),
            TokenKind::Keyword(Keyword::Return) => self.parse_return(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::Goto) => self.parse_goto(),
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Semicolon => {}
            _ => {
                let token = self.next_token();
                self.error(format!("expected declaration, got '{}'", token.literal));
            }
        }

        self.skip_semicolons();
    }

    /// A statement starting with an identifier, decided by the token after it
    fn parse_declaration(&mut self) {
        match self.peek_nth(1).kind {
            TokenKind::OpenParen if self.function.is_some() => self.parse_call_statement(),
            TokenKind::OpenParen => self.parse_function_definition(),
            TokenKind::Equals => {
                self.parse_assignment();
                self.expect_semicolon();
            }
            TokenKind::Keyword(Keyword::Asm) => self.parse_asm_function(),
            TokenKind::Colon => self.parse_label(),
            _ => {
                self.advance();
                self.error("expected declaration");
            }
        }
    }

    // f(a, b);
    fn parse_call_statement(&mut self) {
        self.parse_function_call_expression();

        // The returned value is discarded
        if let Some(entry) = self.current_entry_mut() {
            if entry.body.last() == Some(&Instruction::LoadReturned) {
                entry.body.pop();
            }
        }

        self.expect_semicolon();
    }

    // name(a, b) statement
    fn parse_function_definition(&mut self) {
        let name = self.next_token().literal;
        self.define_global(&name, GlobalKind::Function);

        let parameters = self.parse_parameters();

        let frame = match FrameLayout::new(&parameters) {
            Ok(frame) => frame,
            Err(duplicate) => {
                self.error(format!("duplicate parameter '{duplicate}'"));

                let unique = parameters.iter().unique().cloned().collect_vec();
                FrameLayout::new(&unique).unwrap_or_default()
            }
        };

        self.function = Some(FunctionContext::new(frame));
        self.parse_statement();
        self.finish_function();
        self.current_global = None;
    }

    fn parse_parameters(&mut self) -> Vec<String> {
        let mut parameters = Vec::new();

        // Consume the opening paren
        self.advance();

        if self.kind() == TokenKind::CloseParen {
            self.advance();
            return parameters;
        }

        for position in 1.. {
            let message = format!("invalid parameter #{position}");

            if let Some(token) = self.expect(TokenKind::Identifier, &message) {
                parameters.push(token.literal);
            }

            if self.kind() != TokenKind::Comma {
                break;
            }

            self.advance();
        }

        self.expect(
            TokenKind::CloseParen,
            "expected ')' when closing parameters",
        );

        parameters
    }

    fn finish_function(&mut self) {
        let Some(function) = self.function.take() else {
            return;
        };

        for (label, line) in function.gotos {
            if !function.labels.contains(&label) {
                self.error_at(line, format!("undefined label '{label}'"));
            }
        }
    }

    // name __asm__ { "..." }
    fn parse_asm_function(&mut self) {
        let name = self.next_token().literal;

        // Consume `__asm__`
        self.advance();

        if self.function.is_some() {
            self.error("cannot define assembly function here");
            self.parse_assembly_block();
            return;
        }

        self.define_global(&name, GlobalKind::AsmFunction);

        let lines = self.parse_assembly_block();
        self.emit(Instruction::InlineAsm(lines));

        self.current_global = None;
    }

    // name = expression
    fn parse_assignment(&mut self) {
        let name = self.next_token().literal;

        // Consume `=`
        self.advance();

        if self.function.is_none() {
            self.parse_global_variable(&name);
            return;
        }

        if let Some(offset) = self.resolve_local(&name) {
            self.parse_expression();
            self.emit(Instruction::AssignFromBase(offset));
            return;
        }

        let kind = self.unit.global(&name).map(|entry| entry.kind);

        if kind.is_some_and(|kind| kind != GlobalKind::Variable) {
            self.error(format!("cannot assign to non-variable global '{name}'"));
            self.parse_expression();
            return;
        }

        if kind.is_some() || self.unit.references.contains(&name) {
            self.parse_expression();
            self.reference_global(&name);
            self.emit(Instruction::AssignGlobal(name));
            return;
        }

        self.parse_local_declaration(&name);
    }

    /// The first assignment to an unknown name declares a local. The name only
    /// becomes visible after its initializer.
    fn parse_local_declaration(&mut self, name: &str) {
        let Some(function) = self.function.as_mut() else {
            return;
        };

        let slot = function.frame.allocate_local(name);
        let offset = function.frame.slot(slot).offset;
        let depth = function.frame.depth();

        self.emit(Instruction::ReserveStack { depth });
        self.parse_expression();
        self.emit(Instruction::AssignFromBase(offset));

        if let Some(function) = self.function.as_mut() {
            function.frame.bind(slot);
        }
    }

    // name = 42; at file scope
    fn parse_global_variable(&mut self, name: &str) {
        self.define_global(name, GlobalKind::Variable);

        match self.kind() {
            TokenKind::NumberLiteral | TokenKind::StringLiteral | TokenKind::CharLiteral => {
                self.parse_atomic_expression()
            }
            _ => {
                let got = self.peek().literal.clone();
                self.error(format!(
                    "expected constant initializer for global '{name}', got '{got}'"
                ));
            }
        }

        self.current_global = None;
    }

    // label:
    fn parse_label(&mut self) {
        let name = self.next_token().literal;

        // Consume `:`
        self.advance();

        let Some(function) = self.function.as_mut() else {
            self.error(format!("label '{name}' cannot be here"));
            return;
        };

        if !function.labels.insert(name.clone()) {
            self.error(format!("label '{name}' already defined"));
            return;
        }

        self.emit(Instruction::PutLabel(name));
    }

    // *address = value;
    fn parse_memory_assignment(&mut self) {
        self.advance();

        if self.function.is_none() {
            self.error("cannot assign through a pointer here");
        }

        self.parse_expression();
        self.expect(TokenKind::Equals, "expected '=' as assignment");
        self.parse_expression();
        self.emit(Instruction::AssignMemory);
        self.expect_semicolon();
    }

    fn parse_block(&mut self) {
        if self.function.is_none() {
            self.error("expected declaration next to block");
        }

        self.advance();
        self.push_scope();

        while !matches!(self.kind(), TokenKind::CloseBrace | TokenKind::EndOfFile) {
            self.parse_statement();
        }

        self.pop_scope();
        self.expect(TokenKind::CloseBrace, "expected '}' when closing scope");
    }

    // extrn a, b;
    fn parse_extrn(&mut self) {
        self.advance();

        loop {
            if let Some(token) =
                self.expect(TokenKind::Identifier, "expected identifier when externing")
            {
                if self.function.is_none() {
                    self.unit.root_references.insert(token.literal.clone());
                } else if let Some(entry) = self.current_entry_mut() {
                    entry.mentions.insert(token.literal.clone());
                }

                self.unit.references.insert(token.literal);
            }

            if self.kind() != TokenKind::Comma {
                break;
            }

            self.advance();
        }

        self.expect_semicolon();
    }

    // auto a, b;
    fn parse_auto(&mut self) {
        self.advance();

        if self.function.is_none() {
            self.error("cannot declare auto variable here");
        }

        loop {
            if let Some(token) = self.expect(
                TokenKind::Identifier,
                "expected identifier when declaring auto",
            ) {
                if let Some(function) = self.function.as_mut() {
                    function.frame.declare_local(&token.literal);
                }
            }

            if self.kind() != TokenKind::Comma {
                break;
            }

            self.advance();
        }

        if let Some(depth) = self.function.as_ref().map(|function| function.frame.depth()) {
            self.emit(Instruction::ReserveStack { depth });
        }

        self.expect_semicolon();
    }

    // __asm__ { "..." }
    fn parse_inline_asm(&mut self) {
        self.advance();

        if self.function.is_none() {
            self.error("inline assembly cannot be here");
        }

        let lines = self.parse_assembly_block();
        self.emit(Instruction::InlineAsm(lines));
    }

    fn parse_assembly_block(&mut self) -> Vec<String> {
        let mut lines = Vec::new();

        self.expect(
            TokenKind::OpenBrace,
            "expected '{' when starting assembly block",
        );

        while !matches!(self.kind(), TokenKind::CloseBrace | TokenKind::EndOfFile) {
            if let Some(token) = self.expect(
                TokenKind::StringLiteral,
                "expected string literal in assembly block",
            ) {
                lines.push(token.literal);
            }
        }

        self.expect(
            TokenKind::CloseBrace,
            "expected '}' when closing assembly block",
        );

        lines
    }

    fn parse_return(&mut self) {
        self.advance();

        if self.function.is_none() {
            self.error("return statement cannot be here");
        }

        if self.kind() == TokenKind::Semicolon {
            self.emit(Instruction::Return);
        } else {
            self.parse_expression();
            self.emit(Instruction::ReturnValue);
        }

        self.expect_semicolon();
    }

    fn parse_while(&mut self) {
        self.advance();

        if self.function.is_none() {
            self.error("cannot declare while loop here");
        }

        self.emit(Instruction::BeginWhile);
        self.parse_parenthesized_expression();
        self.emit(Instruction::EndWhileCondition);
        self.parse_statement();
        self.emit(Instruction::EndWhile);
    }

    fn parse_goto(&mut self) {
        self.advance();

        if self.function.is_none() {
            self.error("goto statement cannot be here");
        }

        if let Some(token) = self.expect(TokenKind::Identifier, "expected label after goto") {
            if let Some(function) = self.function.as_mut() {
                function.gotos.push((token.literal.clone(), token.line));
            }

            self.emit(Instruction::GotoLabel(token.literal));
        }

        self.expect_semicolon();
    }

    fn parse_if(&mut self) {
        self.advance();

        if self.function.is_none() {
            self.error("if statement cannot be here");
        }

        self.parse_parenthesized_expression();
        self.emit(Instruction::BeginIf);
        self.parse_statement();

        if self.kind() == TokenKind::Keyword(Keyword::Else) {
            self.advance();
            self.emit(Instruction::AddElse);
            self.parse_statement();
        }

        self.emit(Instruction::EndIf);
    }

    /* Expressions */

    fn parse_expression(&mut self) {
        self.parse_ternary_expression();
    }

    fn parse_parenthesized_expression(&mut self) {
        self.expect(TokenKind::OpenParen, "expected '(' when opening expression");
        self.parse_expression();
        self.expect(TokenKind::CloseParen, "expected ')' when closing expression");
    }

    // c ? a : b, nesting to the right
    fn parse_ternary_expression(&mut self) {
        self.parse_equality_expression();

        if self.kind() != TokenKind::Question {
            return;
        }

        self.advance();
        self.emit(Instruction::BeginTernary);
        self.parse_expression();
        self.emit(Instruction::GotoTernaryEnd);
        self.expect(
            TokenKind::Colon,
            "expected ':' when separating ternary expression",
        );
        self.emit(Instruction::TernaryFalse);
        self.parse_ternary_expression();
        self.emit(Instruction::EndTernary);
    }

    fn parse_equality_expression(&mut self) {
        self.parse_relational_expression();

        while self.kind().is_equality_operator() {
            let operator = self.parse_binary_operator();
            self.parse_relational_expression();
            self.emit(Instruction::Binary(operator));
        }
    }

    fn parse_relational_expression(&mut self) {
        self.parse_term_expression();

        while self.kind().is_relational_operator() {
            let operator = self.parse_binary_operator();
            self.parse_term_expression();
            self.emit(Instruction::Binary(operator));
        }
    }

    fn parse_term_expression(&mut self) {
        self.parse_factor_expression();

        while self.kind().is_term_operator() {
            let operator = self.parse_binary_operator();
            self.parse_factor_expression();
            self.emit(Instruction::Binary(operator));
        }
    }

    fn parse_factor_expression(&mut self) {
        self.parse_unary_expression();

        while self.kind().is_factor_operator() {
            let operator = self.parse_binary_operator();
            self.parse_unary_expression();
            self.emit(Instruction::Binary(operator));
        }
    }

    fn parse_binary_operator(&mut self) -> BinaryOperator {
        let operator = self.next_token();

        match operator.kind {
            TokenKind::Plus => BinaryOperator::Add,
            TokenKind::Minus => BinaryOperator::Subtract,
            TokenKind::Asterisk => BinaryOperator::Multiply,
            TokenKind::Divide => BinaryOperator::Divide,
            TokenKind::Modulus => BinaryOperator::Modulus,
            TokenKind::DoubleEquals => BinaryOperator::Equal,
            TokenKind::NotEquals => BinaryOperator::NotEqual,
            TokenKind::GreaterThan => BinaryOperator::Greater,
            TokenKind::LessThan => BinaryOperator::Less,
            TokenKind::GreaterThanOrEqualTo => BinaryOperator::GreaterOrEqual,
            TokenKind::LessThanOrEqualTo => BinaryOperator::LessOrEqual,
            _ => unreachable!("Unexpected binary operator"),
        }
    }

    fn parse_unary_expression(&mut self) {
        match self.kind() {
            TokenKind::Asterisk => {
                self.advance();
                self.parse_unary_expression();
                self.emit(Instruction::Deref);
            }
            TokenKind::Ampersand => {
                self.advance();
                self.parse_address_of();
            }
            TokenKind::Bang => {
                self.advance();
                self.parse_unary_expression();
                self.emit(Instruction::Not);
            }
            _ => self.parse_function_call_expression(),
        }
    }

    // &name
    fn parse_address_of(&mut self) {
        let Some(token) = self.expect(
            TokenKind::Identifier,
            "expected lvalue next to address-of operator",
        ) else {
            return;
        };

        if let Some(offset) = self.resolve_local(&token.literal) {
            self.emit(Instruction::RefFromBase(offset));
            return;
        }

        self.reference_global(&token.literal);
        self.emit(Instruction::RefGlobal(token.literal));
    }

    fn parse_function_call_expression(&mut self) {
        let is_static_call = self.kind() == TokenKind::Identifier
            && self.peek_nth(1).kind == TokenKind::OpenParen
            && self.resolve_local(&self.peek().literal).is_none();

        if is_static_call {
            let name = self.next_token().literal;
            let arguments = self.parse_function_call_arguments();

            self.reference_global(&name);
            self.emit(Instruction::CallFunction { name, arguments });
            self.emit(Instruction::LoadReturned);
        } else {
            self.parse_atomic_expression();
        }

        // Anything else followed by an argument list is a function pointer
        while self.kind() == TokenKind::OpenParen {
            let arguments = self.parse_function_call_arguments();

            self.emit(Instruction::Call { arguments });
            self.emit(Instruction::LoadReturned);
        }
    }

    /// Parses `(a, b, ...)` leaving every argument on the stack, returns the
    /// argument count.
    fn parse_function_call_arguments(&mut self) -> usize {
        let mut count = 0;

        // Consume the opening paren
        self.advance();

        if self.kind() != TokenKind::CloseParen {
            self.parse_expression();
            count += 1;

            while !matches!(self.kind(), TokenKind::CloseParen | TokenKind::EndOfFile) {
                let message = format!("expected ',' when separating argument #{}", count + 1);
                self.expect(TokenKind::Comma, &message);
                self.parse_expression();
                count += 1;
            }
        }

        self.expect(
            TokenKind::CloseParen,
            "expected ')' when closing argument list",
        );

        count
    }

    fn parse_atomic_expression(&mut self) {
        let token = self.next_token();

        match token.kind {
            TokenKind::NumberLiteral => self.emit(Instruction::LoadNumber(token.literal)),
            TokenKind::StringLiteral => match escape::unescape(&token.literal) {
                Ok(string) => self.emit_string(string),
                Err(error) => self.error(error.to_string()),
            },
            TokenKind::CharLiteral => match escape::char_value(&token.literal) {
                Ok(value) => self.emit(Instruction::LoadNumber(value.to_string())),
                Err(error) => self.error(error.to_string()),
            },
            TokenKind::Identifier => match self.resolve_local(&token.literal) {
                Some(offset) => self.emit(Instruction::LoadFromBase(offset)),
                None => {
                    self.reference_global(&token.literal);
                    self.emit(Instruction::LoadGlobal(token.literal));
                }
            },
            TokenKind::OpenParen => {
                self.parse_expression();
                self.expect(TokenKind::CloseParen, "expected ')' when closing expression");
            }
            _ => self.error(format!("unexpected symbol '{}'", token.literal)),
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::middle::ir::Instruction::*;

    fn parse(source: &str) -> TranslationUnit {
        match Parser::parse_unit(&SourceFile::from_memory(source)) {
            Ok(unit) => unit,
            Err(errors) => panic!("unexpected syntax errors: {errors:#?}"),
        }
    }

    fn parse_errors(source: &str) -> Vec<SyntaxError> {
        match Parser::parse_unit(&SourceFile::from_memory(source)) {
            Ok(unit) => panic!("expected syntax errors, got {unit:#?}"),
            Err(errors) => errors,
        }
    }

    fn body<'a>(unit: &'a TranslationUnit, name: &str) -> &'a [Instruction] {
        &unit.global(name).unwrap().body
    }

    fn number(value: &str) -> Instruction {
        LoadNumber(value.to_owned())
    }

    #[test]
    fn minimal_main() {
        let unit = parse("main() { return 0; }");

        assert_eq!(unit.global_names, vec!["main"]);
        assert_eq!(unit.global("main").unwrap().kind, GlobalKind::Function);
        assert_eq!(body(&unit, "main"), &[number("0"), ReturnValue]);
    }

    #[test]
    fn parameters_and_calls() {
        let unit = parse(indoc! {"
            f(a, b) { return a + b; }
            main() {
                auto x;
                x = f(1, 2);
                return x;
            }
        "});

        assert_eq!(
            body(&unit, "f"),
            &[
                LoadFromBase(3),
                LoadFromBase(2),
                Binary(BinaryOperator::Add),
                ReturnValue
            ]
        );

        assert_eq!(
            body(&unit, "main"),
            &[
                ReserveStack { depth: 1 },
                number("1"),
                number("2"),
                CallFunction {
                    name: "f".to_owned(),
                    arguments: 2
                },
                LoadReturned,
                AssignFromBase(-1),
                LoadFromBase(-1),
                ReturnValue,
            ]
        );

        let main = unit.global("main").unwrap();
        assert!(main.references.contains("f"));
        assert!(unit.references.contains("f"));
    }

    #[test]
    fn forward_references_are_only_mentioned() {
        let unit = parse("main() { return f(); } f() { return 1; }");
        let main = unit.global("main").unwrap();

        assert!(main.references.is_empty());
        assert!(main.mentions.contains("f"));
        assert!(unit.references.contains("f"));
    }

    #[test]
    fn locals_declared_on_first_assignment_keep_their_slots() {
        let unit = parse("main() { x = 1; { y = x; } z = 2; }");

        assert_eq!(
            body(&unit, "main"),
            &[
                ReserveStack { depth: 1 },
                number("1"),
                AssignFromBase(-1),
                ReserveStack { depth: 2 },
                LoadFromBase(-1),
                AssignFromBase(-2),
                ReserveStack { depth: 3 },
                number("2"),
                AssignFromBase(-3),
            ]
        );
    }

    #[test]
    fn declared_name_is_not_visible_in_its_own_initializer() {
        let unit = parse("main() { x = x; }");

        assert_eq!(
            body(&unit, "main"),
            &[
                ReserveStack { depth: 1 },
                LoadGlobal("x".to_owned()),
                AssignFromBase(-1),
            ]
        );
        assert!(unit.references.contains("x"));
    }

    #[test]
    fn ternary_nests_to_the_right() {
        let unit = parse("main() { return 1 ? 2 : 3 ? 4 : 5; }");

        assert_eq!(
            body(&unit, "main"),
            &[
                number("1"),
                BeginTernary,
                number("2"),
                GotoTernaryEnd,
                TernaryFalse,
                number("3"),
                BeginTernary,
                number("4"),
                GotoTernaryEnd,
                TernaryFalse,
                number("5"),
                EndTernary,
                EndTernary,
                ReturnValue,
            ]
        );
    }

    #[test]
    fn operator_precedence() {
        let unit = parse("main() { return 1 + 2 * 3 == 7; }");

        assert_eq!(
            body(&unit, "main"),
            &[
                number("1"),
                number("2"),
                number("3"),
                Binary(BinaryOperator::Multiply),
                Binary(BinaryOperator::Add),
                number("7"),
                Binary(BinaryOperator::Equal),
                ReturnValue,
            ]
        );
    }

    #[test]
    fn unary_operators_chain() {
        let unit = parse("main(p) { return !**p; }");

        assert_eq!(
            body(&unit, "main"),
            &[LoadFromBase(2), Deref, Deref, Not, ReturnValue]
        );
    }

    #[test]
    fn address_of_locals_and_globals() {
        let unit = parse("g = 1; main() { auto x; *&x = &g; }");

        assert_eq!(
            body(&unit, "main"),
            &[
                ReserveStack { depth: 1 },
                RefFromBase(-1),
                RefGlobal("g".to_owned()),
                AssignMemory,
            ]
        );
        assert!(unit.global("main").unwrap().references.contains("g"));
    }

    #[test]
    fn call_statements_discard_their_result() {
        let unit = parse("main() { auto f; f = g; f(1); g(); }");

        assert_eq!(
            body(&unit, "main"),
            &[
                ReserveStack { depth: 1 },
                LoadGlobal("g".to_owned()),
                AssignFromBase(-1),
                LoadFromBase(-1),
                number("1"),
                Call { arguments: 1 },
                CallFunction {
                    name: "g".to_owned(),
                    arguments: 0
                },
            ]
        );
    }

    #[test]
    fn global_variables_and_strings() {
        let unit = parse(indoc! {r#"
            x = 5;
            s = "hi\n";
            c = 'A';
            main() { x = x + 1; return "hi\n"; }
        "#});

        assert_eq!(body(&unit, "x"), &[number("5")]);
        assert_eq!(body(&unit, "s"), &[LoadString("hi\n".to_owned())]);
        assert_eq!(body(&unit, "c"), &[number("65")]);
        assert_eq!(unit.strings, vec!["hi\n"]);
        assert_eq!(
            body(&unit, "main"),
            &[
                LoadGlobal("x".to_owned()),
                number("1"),
                Binary(BinaryOperator::Add),
                AssignGlobal("x".to_owned()),
                LoadString("hi\n".to_owned()),
                ReturnValue,
            ]
        );
    }

    #[test]
    fn assigning_to_an_extrn_writes_the_global() {
        let unit = parse("extrn counter; main() { counter = 1; }");

        assert_eq!(
            body(&unit, "main"),
            &[number("1"), AssignGlobal("counter".to_owned())]
        );
        assert!(unit.root_references.contains("counter"));
    }

    #[test]
    fn control_flow_markers() {
        let unit = parse(indoc! {"
            main() {
                while (1) if (0) return; else goto out;
                out:
            }
        "});

        assert_eq!(
            body(&unit, "main"),
            &[
                BeginWhile,
                number("1"),
                EndWhileCondition,
                number("0"),
                BeginIf,
                Return,
                AddElse,
                GotoLabel("out".to_owned()),
                EndIf,
                EndWhile,
                PutLabel("out".to_owned()),
            ]
        );
    }

    #[test]
    fn assembly_functions_and_inline_assembly() {
        let unit = parse(indoc! {r#"
            putc __asm__ { "llod r1 sp 1" "out %TEXT r1" }
            main() { __asm__ { "nop" } }
        "#});

        assert_eq!(unit.global("putc").unwrap().kind, GlobalKind::AsmFunction);
        assert_eq!(
            body(&unit, "putc"),
            &[InlineAsm(vec![
                "llod r1 sp 1".to_owned(),
                "out %TEXT r1".to_owned()
            ])]
        );
        assert_eq!(body(&unit, "main"), &[InlineAsm(vec!["nop".to_owned()])]);
    }

    #[test]
    fn assignment_to_functions_is_rejected() {
        let errors = parse_errors("f() {} main() { f = 1; }");

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].global.as_deref(), Some("main"));
        assert_eq!(errors[0].message, "cannot assign to non-variable global 'f'");
    }

    #[test]
    fn duplicate_definitions_are_rejected() {
        let errors = parse_errors("main() {} main() {}");

        assert_eq!(errors[0].message, "global 'main' already exists");
    }

    #[test]
    fn errors_report_the_line_of_the_last_consumed_token() {
        let errors = parse_errors("main() {\n    x = 1\n}\n");

        assert_eq!(errors[0].line, 3);
        assert_eq!(errors[0].message, "expected ';' after declaration, got '}'");
        assert_eq!(
            errors[0].to_string(),
            "[SYNTAX ERROR]: <memory>:3: main: expected ';' after declaration, got '}'"
        );
    }

    #[test]
    fn invalid_tokens_are_reported_once() {
        let errors = parse_errors("main() {\n x = @; y = 1; }");

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 2);
        assert_eq!(errors[0].message, "unexpected character '@'");
    }

    #[test]
    fn statements_outside_functions_are_rejected() {
        let errors = parse_errors("return 1;");

        assert_eq!(errors[0].message, "return statement cannot be here");
        assert_eq!(errors[0].global, None);
    }

    #[test]
    fn global_initializers_must_be_constant() {
        let errors = parse_errors("x = y;");

        assert_eq!(
            errors[0].message,
            "expected constant initializer for global 'x', got 'y'"
        );
    }

    #[test]
    fn goto_targets_must_exist() {
        let errors = parse_errors("main() { goto nowhere; }");

        assert_eq!(errors[0].message, "undefined label 'nowhere'");
    }

    #[test]
    fn malformed_escapes_are_syntax_errors() {
        let errors = parse_errors(r#"main() { return "\q"; }"#);

        assert_eq!(errors[0].message, "unknown escape sequence: \\q");
    }

    #[test]
    fn duplicate_parameters_are_rejected() {
        let errors = parse_errors("f(a, a) { return a; }");

        assert_eq!(errors[0].message, "duplicate parameter 'a'");
    }
}
