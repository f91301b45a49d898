use std::{collections::BTreeMap, str::Chars};

use itertools::{PeekNth, peek_nth};
use once_cell::sync::Lazy;
use strum::{Display, EnumString};

use crate::frontend::SourceFile;

#[derive(Debug)]
pub struct Lexer<'source> {
    chars: PeekNth<Chars<'source>>,
    line_number: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw text of the token. Number literals are normalized to decimal,
    /// string and char literals hold the text between the quotes, and invalid
    /// tokens hold a description of the failure.
    pub literal: String,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /* Literals */
    NumberLiteral, // 42
    StringLiteral, // "hello, world"
    CharLiteral,   // 'A'
    Identifier,    // main

    /* Words */
    Keyword(Keyword), // return

    /* Delimiters */
    OpenParen,  // (
    CloseParen, // )
    OpenBrace,  // {
    CloseBrace, // }
    Semicolon,  // ;
    Comma,      // ,
    Colon,      // :
    Question,   // ?

    /* Operators */
    Plus,                 // +
    Minus,                // -
    Asterisk,             // *
    Divide,               // /
    Modulus,              // %
    Equals,               // =
    Ampersand,            // &
    Bang,                 // !
    DoubleEquals,         // ==
    NotEquals,            // !=
    LessThan,             // <
    LessThanOrEqualTo,    // <=
    GreaterThan,          // >
    GreaterThanOrEqualTo, // >=

    /* Other */
    EndOfFile,
    Invalid,
}

impl TokenKind {
    pub fn is_equality_operator(&self) -> bool {
        matches!(self, Self::DoubleEquals | Self::NotEquals)
    }

    pub fn is_relational_operator(&self) -> bool {
        matches!(
            self,
            Self::LessThan
                | Self::LessThanOrEqualTo
                | Self::GreaterThan
                | Self::GreaterThanOrEqualTo
        )
    }

    pub fn is_term_operator(&self) -> bool {
        matches!(self, Self::Plus | Self::Minus)
    }

    pub fn is_factor_operator(&self) -> bool {
        matches!(self, Self::Asterisk | Self::Divide | Self::Modulus)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Keyword {
    Return,
    Auto,
    Extrn,
    If,
    Else,
    While,
    Goto,
    #[strum(serialize = "__asm__")]
    Asm,
}

/// Table of single char tokens (matched after longer sequences are checked for)
static SINGLE_TOKENS: Lazy<BTreeMap<char, TokenKind>> = Lazy::new(|| {
    BTreeMap::from([
        ('(', TokenKind::OpenParen),
        (')', TokenKind::CloseParen),
        ('{', TokenKind::OpenBrace),
        ('}', TokenKind::CloseBrace),
        (';', TokenKind::Semicolon),
        (',', TokenKind::Comma),
        (':', TokenKind::Colon),
        ('?', TokenKind::Question),
        ('+', TokenKind::Plus),
        ('-', TokenKind::Minus),
        ('*', TokenKind::Asterisk),
        ('/', TokenKind::Divide),
        ('%', TokenKind::Modulus),
        ('=', TokenKind::Equals),
        ('&', TokenKind::Ampersand),
        ('!', TokenKind::Bang),
        ('<', TokenKind::LessThan),
        ('>', TokenKind::GreaterThan),
    ])
});

impl<'source> Lexer<'source> {
    pub fn new(source: &'source SourceFile) -> Self {
        Self {
            chars: peek_nth(source.contents.chars()),
            line_number: 1,
        }
    }

    /// Scans the whole source. The returned stream always ends with exactly
    /// one [`TokenKind::EndOfFile`] token.
    pub fn tokenize(source: &SourceFile) -> Vec<Token> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();

        while let Some(token) = lexer.next_token() {
            tokens.push(token);
        }

        tokens.push(Token {
            kind: TokenKind::EndOfFile,
            literal: "end of file".to_owned(),
            line: lexer.line_number,
        });

        tracing::trace!(count = tokens.len(), "tokenized {}", source.origin);

        tokens
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;

        if c == '\n' {
            self.line_number += 1;
        }

        Some(c)
    }

    fn peek_is(&mut self, n: usize, expected: char) -> bool {
        self.chars.peek_nth(n).is_some_and(|c| *c == expected)
    }

    fn token(&self, kind: TokenKind, literal: impl Into<String>) -> Token {
        Token {
            kind,
            literal: literal.into(),
            line: self.line_number,
        }
    }

    fn invalid(&self, message: impl Into<String>) -> Token {
        self.token(TokenKind::Invalid, message)
    }

    fn ignore_whitespace(&mut self) {
        while let Some(c) = self.chars.peek().copied() {
            if !matches!(c, ' ' | '\t' | '\r' | '\n') {
                break;
            }

            self.advance();
        }
    }

    /// Skips a `/* ... */` comment. Returns false if the input ended first.
    fn ignore_comment(&mut self) -> bool {
        // Consume the opening `/*`
        self.advance();
        self.advance();

        while self.chars.peek().is_some() {
            if self.peek_is(0, '*') && self.peek_is(1, '/') {
                self.advance();
                self.advance();
                return true;
            }

            self.advance();
        }

        false
    }

    fn read_wrapped(&mut self, wrapper: char, kind: TokenKind) -> Token {
        let line = self.line_number;

        // Consume first wrapper
        self.advance();

        let mut literal = String::new();

        while let Some(c) = self.advance() {
            if c == wrapper {
                return Token {
                    kind,
                    literal,
                    line,
                };
            }

            literal.push(c);

            // Keep escaped characters (including the wrapper) in the literal
            if c == '\\' {
                if let Some(escaped) = self.advance() {
                    literal.push(escaped);
                }
            }
        }

        match kind {
            TokenKind::CharLiteral => self.invalid("unterminated char literal"),
            _ => self.invalid("unterminated string literal"),
        }
    }

    fn read_number(&mut self) -> Token {
        if self.peek_is(0, '0') && (self.peek_is(1, 'x') || self.peek_is(1, 'X')) {
            self.advance();
            self.advance();

            let mut digits = String::new();

            while let Some(c) = self.chars.peek().copied() {
                if !c.is_ascii_hexdigit() {
                    break;
                }

                digits.push(c);
                self.advance();
            }

            if digits.is_empty() {
                return self.token(TokenKind::NumberLiteral, "0");
            }

            return match u64::from_str_radix(&digits, 16) {
                Ok(value) => self.token(TokenKind::NumberLiteral, value.to_string()),
                Err(_) => self.invalid(format!("hex literal '0x{digits}' is out of range")),
            };
        }

        let mut digits = String::new();

        while let Some(c) = self.chars.peek().copied() {
            if !c.is_ascii_digit() {
                break;
            }

            digits.push(c);
            self.advance();
        }

        self.token(TokenKind::NumberLiteral, digits)
    }

    // Keyword or identifier
    fn read_word(&mut self) -> Token {
        let mut word = String::new();

        while let Some(c) = self.chars.peek().copied() {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }

            word.push(c);
            self.advance();
        }

        let kind = match word.parse() {
            Ok(keyword) => TokenKind::Keyword(keyword),
            Err(_) => TokenKind::Identifier,
        };

        self.token(kind, word)
    }

    fn read_single(&mut self, c: char, kind: TokenKind) -> Token {
        self.advance();
        self.token(kind, c)
    }

    fn read_double(&mut self, literal: &str, kind: TokenKind) -> Token {
        self.advance();
        self.advance();
        self.token(kind, literal)
    }

    pub fn next_token(&mut self) -> Option<Token> {
        while let Some(c) = self.chars.peek().copied() {
            let token = match c {
                // Ignore whitespace
                ' ' | '\t' | '\r' | '\n' => {
                    self.ignore_whitespace();
                    continue;
                }
                // Ignore comments
                '/' if self.peek_is(1, '*') => {
                    if self.ignore_comment() {
                        continue;
                    }

                    self.invalid("unterminated comment")
                }

                // String literals
                '"' => self.read_wrapped('"', TokenKind::StringLiteral),
                // Char literals
                '\'' => self.read_wrapped('\'', TokenKind::CharLiteral),

                // Number literals
                n if n.is_ascii_digit() => self.read_number(),

                // Identifiers and keywords
                a if a.is_ascii_alphabetic() || a == '_' => self.read_word(),

                // Double Equals (==)
                '=' if self.peek_is(1, '=') => self.read_double("==", TokenKind::DoubleEquals),
                // Not Equals (!=)
                '!' if self.peek_is(1, '=') => self.read_double("!=", TokenKind::NotEquals),
                // Less than or equal (<=)
                '<' if self.peek_is(1, '=') => {
                    self.read_double("<=", TokenKind::LessThanOrEqualTo)
                }
                // Greater than or equal (>=)
                '>' if self.peek_is(1, '=') => {
                    self.read_double(">=", TokenKind::GreaterThanOrEqualTo)
                }

                s => match SINGLE_TOKENS.get(&s) {
                    Some(kind) => self.read_single(s, *kind),
                    None => {
                        self.advance();
                        self.invalid(format!("unexpected character '{s}'"))
                    }
                },
            };

            return Some(token);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::tokenize(&SourceFile::from_memory(source))
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn literals(source: &str) -> Vec<String> {
        Lexer::tokenize(&SourceFile::from_memory(source))
            .into_iter()
            .map(|t| t.literal)
            .collect()
    }

    #[test]
    fn empty_source_is_just_end_of_file() {
        assert_eq!(kinds(""), vec![TokenKind::EndOfFile]);
        assert_eq!(kinds(" \r\n\t "), vec![TokenKind::EndOfFile]);
    }

    #[test]
    fn keywords_are_reclassified() {
        assert_eq!(
            kinds("return auto extrn if else while goto __asm__ returned"),
            vec![
                TokenKind::Keyword(Keyword::Return),
                TokenKind::Keyword(Keyword::Auto),
                TokenKind::Keyword(Keyword::Extrn),
                TokenKind::Keyword(Keyword::If),
                TokenKind::Keyword(Keyword::Else),
                TokenKind::Keyword(Keyword::While),
                TokenKind::Keyword(Keyword::Goto),
                TokenKind::Keyword(Keyword::Asm),
                TokenKind::Identifier,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn two_character_operators_take_priority() {
        assert_eq!(
            kinds("== = != ! <= < >= >"),
            vec![
                TokenKind::DoubleEquals,
                TokenKind::Equals,
                TokenKind::NotEquals,
                TokenKind::Bang,
                TokenKind::LessThanOrEqualTo,
                TokenKind::LessThan,
                TokenKind::GreaterThanOrEqualTo,
                TokenKind::GreaterThan,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn hex_numbers_are_normalized_to_decimal() {
        assert_eq!(literals("0x1F 0XfF 42 0x"), vec!["31", "255", "42", "0", "end of file"]);
    }

    #[test]
    fn oversized_hex_literal_is_invalid() {
        assert_eq!(
            kinds("0x10000000000000000")[0],
            TokenKind::Invalid,
        );
    }

    #[test]
    fn string_literals_keep_raw_escapes() {
        let tokens = Lexer::tokenize(&SourceFile::from_memory(r#""a\"b\n" 'c'"#));

        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].literal, r#"a\"b\n"#);
        assert_eq!(tokens[1].kind, TokenKind::CharLiteral);
        assert_eq!(tokens[1].literal, "c");
    }

    #[test]
    fn unterminated_literals_and_comments_are_invalid() {
        assert_eq!(kinds("\"abc"), vec![TokenKind::Invalid, TokenKind::EndOfFile]);
        assert_eq!(kinds("'a"), vec![TokenKind::Invalid, TokenKind::EndOfFile]);
        assert_eq!(kinds("x /* never closed"), vec![
            TokenKind::Identifier,
            TokenKind::Invalid,
            TokenKind::EndOfFile
        ]);
    }

    #[test]
    fn comments_are_discarded_and_lines_are_counted() {
        let tokens = Lexer::tokenize(&SourceFile::from_memory("a /* one\ntwo */\nb\n\nc"));
        let lines = tokens.iter().map(|t| t.line).collect::<Vec<_>>();

        assert_eq!(lines, vec![1, 3, 5, 5]);
    }

    #[test]
    fn unknown_characters_are_invalid() {
        let tokens = Lexer::tokenize(&SourceFile::from_memory("a @ b"));

        assert_eq!(tokens[1].kind, TokenKind::Invalid);
        assert_eq!(tokens[1].literal, "unexpected character '@'");
        assert_eq!(tokens[2].kind, TokenKind::Identifier);
    }
}
