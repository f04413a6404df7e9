//! Literal decoding: radix-prefixed integers, character and string escapes,
//! and float literals including the hexadecimal `0x1.8p3` form.

use crate::{err_at, Result};
use pest::Span;

/// Parses an unsigned integer literal, detecting the radix from its prefix
/// (`0x` hex, `0b` binary, leading `0` octal, decimal otherwise).
pub fn parse_u64(span: Span) -> Result<u64> {
    let text = span.as_str();
    let parsed = if text.len() > 2 && (text.starts_with("0x") || text.starts_with("0X")) {
        u64::from_str_radix(&text[2..], 16)
    } else if text.len() > 2 && (text.starts_with("0b") || text.starts_with("0B")) {
        u64::from_str_radix(&text[2..], 2)
    } else if text.len() > 1 && text.starts_with('0') {
        u64::from_str_radix(&text[1..], 8)
    } else {
        text.parse()
    };

    parsed.map_err(|err| err_at(format!("malformed integer literal: {}", err), span))
}

/// Parses a float literal; decimal floats go through the standard parser and
/// hexadecimal floats (`0x1.8p3`) are decoded by hand.
pub fn parse_f64(span: Span) -> Result<f64> {
    let text = span.as_str();
    if text.starts_with("0x") || text.starts_with("0X") {
        parse_hex_f64(&text[2..])
            .ok_or_else(|| err_at("malformed hexadecimal float", span))
    } else {
        text.parse()
            .map_err(|err| err_at(format!("malformed float literal: {}", err), span))
    }
}

fn parse_hex_f64(text: &str) -> Option<f64> {
    let p = text.find(|c| c == 'p' || c == 'P')?;
    let exponent: i32 = text[p + 1..].parse().ok()?;

    let mantissa_text = &text[..p];
    let mut mantissa = 0f64;
    let mut frac_scale = 1f64;
    let mut seen_dot = false;

    for c in mantissa_text.chars() {
        if c == '.' {
            if seen_dot {
                return None;
            }
            seen_dot = true;
            continue;
        }
        let digit = c.to_digit(16)? as f64;
        if seen_dot {
            frac_scale /= 16.0;
            mantissa += digit * frac_scale;
        } else {
            mantissa = mantissa * 16.0 + digit;
        }
    }

    Some(mantissa * 2f64.powi(exponent))
}

/// Decodes the single escape sequence in `text` (which starts after the
/// backslash), returning the code point.
fn decode_escape(span: &Span, text: &str) -> Result<u32> {
    let mut chars = text.chars();
    let kind = chars.next().unwrap();

    let value = match kind {
        'n' => u32::from('\n'),
        't' => u32::from('\t'),
        'r' => u32::from('\r'),
        'b' => 0x08,
        'f' => 0x0C,
        'a' => 0x07,
        'v' => 0x0B,
        'e' => 0x1B,
        '\\' => u32::from('\\'),
        '\'' => u32::from('\''),
        '"' => u32::from('"'),
        'x' => u32::from_str_radix(&text[1..], 16)
            .map_err(|_| err_at("malformed hex escape", span.clone()))?,
        'u' | 'U' => u32::from_str_radix(&text[1..], 16)
            .map_err(|_| err_at("malformed unicode escape", span.clone()))?,
        '0'..='7' => u32::from_str_radix(text, 8)
            .map_err(|_| err_at("malformed octal escape", span.clone()))?,
        other => {
            return Err(err_at(format!("unknown escape sequence '\\{}'", other), span.clone()))
        }
    };
    Ok(value)
}

/// Decodes a character literal body (the part between the quotes) into its
/// code point. Source characters >= 0x80 are read as UTF-8.
pub fn parse_char(span: Span) -> Result<u32> {
    let text = span.as_str();
    if let Some(escape) = text.strip_prefix('\\') {
        decode_escape(&span, escape)
    } else {
        Ok(u32::from(text.chars().next().ok_or_else(|| {
            err_at("empty character literal", span.clone())
        })?))
    }
}

/// Decodes a string literal body into raw bytes. `\x` escapes produce single
/// bytes; unicode escapes are encoded as UTF-8.
pub fn unescape_string(span: Span) -> Result<Vec<u8>> {
    let text = span.as_str();
    let mut bytes = Vec::with_capacity(text.len());
    let mut rest = text;

    while let Some(at) = rest.find('\\') {
        bytes.extend_from_slice(rest[..at].as_bytes());
        let tail = &rest[at + 1..];

        // Length of the escape body: the prefixed forms take their digits,
        // everything else is a single character.
        let body_len = match tail.chars().next() {
            Some('x') => 1 + tail[1..].chars().take_while(|c| c.is_ascii_hexdigit()).count().min(2),
            Some('u') => 5,
            Some('U') => 9,
            Some(c) if ('0'..='7').contains(&c) => {
                tail.chars().take_while(|c| ('0'..='7').contains(c)).count().min(3)
            }
            Some(c) => c.len_utf8(),
            None => {
                return Err(err_at("unterminated escape sequence", span.clone()))
            }
        };

        let body = tail.get(..body_len).ok_or_else(|| {
            err_at("truncated escape sequence", span.clone())
        })?;
        let value = decode_escape(&span, body)?;
        match tail.chars().next() {
            // Hex and octal escapes emit a raw byte.
            Some('x') | Some('0'..='7') => bytes.push(value as u8),
            _ => {
                let c = std::char::from_u32(value).ok_or_else(|| {
                    err_at("escape is not a valid character", span.clone())
                })?;
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
        rest = &tail[body_len..];
    }

    bytes.extend_from_slice(rest.as_bytes());
    Ok(bytes)
}
