//! Backslash escape sequences used in message separator strings.
//!
//! Separators such as `"\r\n"` or `"\x02"` are written in configuration files as
//! plain text; this module converts between that form and raw bytes.

use crate::error::DaqError;

/// Convert backslash escapes into raw bytes.
///
/// Recognized: `\n \r \t \\ \0`, `\xHH` (one or two hex digits) and `\NNN` (one to
/// three octal digits). Any other escaped character stands for itself.
pub fn parse_backslash_sequences(text: &str) -> Result<Vec<u8>, DaqError> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        i += 1;
        if c != b'\\' {
            out.push(c);
            continue;
        }
        let Some(&esc) = bytes.get(i) else {
            return Err(DaqError::Parse(format!(
                "trailing backslash in \"{}\"",
                text
            )));
        };
        i += 1;
        match esc {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'\\' => out.push(b'\\'),
            b'x' => {
                let digits = take_digits(&bytes[i..], 2, 16);
                if digits == 0 {
                    return Err(DaqError::Parse(format!(
                        "\\x without hex digits in \"{}\"",
                        text
                    )));
                }
                out.push(radix_value(&bytes[i..i + digits], 16)?);
                i += digits;
            }
            b'0'..=b'7' => {
                let digits = 1 + take_digits(&bytes[i..], 2, 8);
                out.push(radix_value(&bytes[i - 1..i - 1 + digits], 8)?);
                i += digits - 1;
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn take_digits(bytes: &[u8], max: usize, radix: u32) -> usize {
    bytes
        .iter()
        .take(max)
        .take_while(|b| (**b as char).is_digit(radix))
        .count()
}

fn radix_value(digits: &[u8], radix: u32) -> Result<u8, DaqError> {
    let text = std::str::from_utf8(digits).map_err(|e| DaqError::Parse(e.to_string()))?;
    u8::from_str_radix(text, radix).map_err(|e| DaqError::Parse(format!("{}: {}", text, e)))
}

/// Render bytes with non-printable characters as backslash escapes.
pub fn add_backslash_sequences(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out
}
