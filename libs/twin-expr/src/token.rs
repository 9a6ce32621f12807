//! Tokenizer for rule expression text
//!
//! Splits textual expressions like `[zone-temp] - [zone-stpt] > 2` into a
//! flat token stream. Bracketed references lex as a single token because twin
//! identifiers may contain spaces, dots, dashes, colons and semicolons.

use crate::error::{ParseError, ParseResult};

/// A single lexical token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Numeric literal
    Number(f64),
    /// Bare identifier (variable, function name, AND/OR word operator)
    Ident(String),
    /// Bracketed reference `[...]`, brackets stripped
    Reference(String),
    /// Quoted string literal, quotes stripped
    Text(String),
    LParen,
    RParen,
    LCurly,
    RCurly,
    Comma,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Percent,
    /// `=` or `==`
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    /// `&&`
    And,
    /// `||`
    Or,
    /// `!`
    Not,
}

/// Scan the full input into tokens.
///
/// Each character is consumed exactly once; malformed input fails fast with a
/// `ParseError` rather than looping.
pub fn scan(input: &str) -> ParseResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '{' => {
                tokens.push(Token::LCurly);
                i += 1;
            }
            '}' => {
                tokens.push(Token::RCurly);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '.' => {
                // Dot is an operator except when it starts a decimal literal
                if chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()) {
                    let (value, next) = scan_number(&chars, i)?;
                    tokens.push(Token::Number(value));
                    i = next;
                } else {
                    tokens.push(Token::Dot);
                    i += 1;
                }
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '^' => {
                tokens.push(Token::Caret);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    i += 2;
                } else {
                    i += 1;
                }
                tokens.push(Token::Equal);
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::NotEqual);
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::LessEqual);
                    i += 2;
                } else {
                    tokens.push(Token::Less);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::GreaterEqual);
                    i += 2;
                } else {
                    tokens.push(Token::Greater);
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err(ParseError::UnexpectedChar('&', i));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    return Err(ParseError::UnexpectedChar('|', i));
                }
            }
            '[' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != ']' {
                    end += 1;
                }
                if end == chars.len() {
                    return Err(ParseError::Unterminated('[', i));
                }
                let name: String = chars[start..end].iter().collect();
                tokens.push(Token::Reference(name.trim().to_string()));
                i = end + 1;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end == chars.len() {
                    return Err(ParseError::Unterminated(quote, i));
                }
                tokens.push(Token::Text(chars[start..end].iter().collect()));
                i = end + 1;
            }
            _ if c.is_ascii_digit() => {
                let (value, next) = scan_number(&chars, i)?;
                tokens.push(Token::Number(value));
                i = next;
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                let mut end = i;
                while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                tokens.push(Token::Ident(chars[start..end].iter().collect()));
                i = end;
            }
            _ => return Err(ParseError::UnexpectedChar(c, i)),
        }
    }

    Ok(tokens)
}

fn scan_number(chars: &[char], start: usize) -> ParseResult<(f64, usize)> {
    let mut end = start;
    let mut seen_dot = false;
    while end < chars.len() {
        let c = chars[end];
        if c.is_ascii_digit() {
            end += 1;
        } else if c == '.' && !seen_dot && chars.get(end + 1).is_some_and(|n| n.is_ascii_digit()) {
            seen_dot = true;
            end += 1;
        } else {
            break;
        }
    }
    let text: String = chars[start..end].iter().collect();
    let value = text
        .parse::<f64>()
        .map_err(|_| ParseError::UnexpectedChar(chars[start], start))?;
    Ok((value, end))
}
