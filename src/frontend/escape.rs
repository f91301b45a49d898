//! Escape sequence decoding for string and char literals.
//!
//! The lexer keeps literals exactly as written; decoding happens while the
//! parser emits IR so that malformed escapes become syntax errors with the
//! usual location information.

use std::str::Chars;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EscapeError {
    #[error("incomplete escape sequence")]
    Incomplete,
    #[error("incomplete hex escape")]
    IncompleteHex,
    #[error("incomplete unicode escape")]
    IncompleteUnicode,
    #[error("invalid digits in escape '\\{0}'")]
    InvalidDigits(String),
    #[error("unknown escape sequence: \\{0}")]
    Unknown(char),
    #[error("empty char literal")]
    EmptyChar,
    #[error("char literal must contain exactly one character")]
    MultipleChars,
}

/// Decodes every escape sequence in a string literal body. Every char of the
/// result stands for one byte: escapes give a single byte and any other
/// character is split into its UTF-8 encoding.
pub fn unescape(raw: &str) -> Result<String, EscapeError> {
    let mut chars = raw.chars();
    let mut output = String::with_capacity(raw.len());
    let mut buffer = [0; 4];

    while let Some(c) = chars.next() {
        if c == '\\' {
            output.push(decode_escape(&mut chars)?);
        } else {
            output.extend(c.encode_utf8(&mut buffer).bytes().map(char::from));
        }
    }

    Ok(output)
}

/// Decodes a char literal body into its numeric value.
pub fn char_value(raw: &str) -> Result<u32, EscapeError> {
    let mut chars = raw.chars();

    let value = match chars.next() {
        None => return Err(EscapeError::EmptyChar),
        Some('\\') => u32::from(decode_escape(&mut chars)?),
        Some(c) => u32::from(c),
    };

    if chars.next().is_some() {
        return Err(EscapeError::MultipleChars);
    }

    Ok(value)
}

/// Decodes the escape following a backslash that has already been consumed.
/// Numeric escapes are truncated to a single byte.
fn decode_escape(chars: &mut Chars<'_>) -> Result<char, EscapeError> {
    let Some(c) = chars.next() else {
        return Err(EscapeError::Incomplete);
    };

    let byte = match c {
        'n' => b'\n',
        't' => b'\t',
        'r' => b'\r',
        '0' => 0,
        '\\' => b'\\',
        '\'' => b'\'',
        '"' => b'"',
        'b' => 0x08,
        'f' => 0x0C,
        'v' => 0x0B,
        'a' => 0x07,
        'x' => read_hex(chars, 2, EscapeError::IncompleteHex, c)?,
        'u' => read_hex(chars, 4, EscapeError::IncompleteUnicode, c)?,
        other => return Err(EscapeError::Unknown(other)),
    };

    Ok(char::from(byte))
}

fn read_hex(
    chars: &mut Chars<'_>,
    width: usize,
    incomplete: EscapeError,
    prefix: char,
) -> Result<u8, EscapeError> {
    let digits = chars.by_ref().take(width).collect::<String>();

    if digits.chars().count() < width {
        return Err(incomplete);
    }

    let value = u32::from_str_radix(&digits, 16)
        .map_err(|_| EscapeError::InvalidDigits(format!("{prefix}{digits}")))?;

    Ok((value & 0xFF) as u8)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn simple_escapes() {
        assert_eq!(
            unescape(r#"a\n\t\r\\\'\"\0"#).unwrap(),
            "a\n\t\r\\'\"\0"
        );
        assert_eq!(unescape(r"\b\f\v\a").unwrap(), "\u{8}\u{c}\u{b}\u{7}");
    }

    #[test]
    fn numeric_escapes() {
        assert_eq!(unescape(r"\x41\x7a").unwrap(), "Az");
        assert_eq!(unescape("\\u0042").unwrap(), "B");
        // Only the low byte survives
        assert_eq!(unescape("\\u0141").unwrap(), "A");
    }

    #[test]
    fn non_ascii_characters_become_utf8_bytes() {
        assert_eq!(unescape("é").unwrap(), "\u{c3}\u{a9}");
        assert_eq!(unescape(r"é\xe9").unwrap(), "\u{c3}\u{a9}\u{e9}");
    }

    #[test]
    fn malformed_escapes_are_rejected() {
        assert_eq!(unescape("abc\\"), Err(EscapeError::Incomplete));
        assert_eq!(unescape(r"\x4"), Err(EscapeError::IncompleteHex));
        assert_eq!(unescape(r"\u12"), Err(EscapeError::IncompleteUnicode));
        assert_eq!(unescape(r"\q"), Err(EscapeError::Unknown('q')));
        assert_eq!(
            unescape(r"\xZZ"),
            Err(EscapeError::InvalidDigits("xZZ".to_owned()))
        );
    }

    #[test]
    fn char_values() {
        assert_eq!(char_value("A"), Ok(65));
        assert_eq!(char_value(r"\n"), Ok(10));
        assert_eq!(char_value(r"\x00"), Ok(0));
        assert_eq!(char_value(""), Err(EscapeError::EmptyChar));
        assert_eq!(char_value("ab"), Err(EscapeError::MultipleChars));
        assert_eq!(char_value(r"\n\n"), Err(EscapeError::MultipleChars));
        assert_eq!(char_value("é"), Ok(233));
    }
}
