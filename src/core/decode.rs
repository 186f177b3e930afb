//! Normalization of raw wsl.exe / netsh.exe output.
//!
//! wsl.exe writes UTF-16LE without a byte-order mark, netsh writes the active
//! code page (ASCII for everything we parse), and some host versions prefix a
//! BOM. Everything is funnelled into `\n`-delimited Rust strings here.

use crate::config;

/// Decode `raw` into normalized text. Never fails.
pub fn normalize_output(raw: &[u8]) -> String {
    let decoded = if let Some(rest) = raw.strip_prefix(&[0xFF, 0xFE]) {
        decode_utf16(rest, u16::from_le_bytes)
    } else if let Some(rest) = raw.strip_prefix(&[0xFE, 0xFF]) {
        decode_utf16(rest, u16::from_be_bytes)
    } else if looks_like_utf16le(raw) {
        decode_utf16(raw, u16::from_le_bytes)
    } else {
        String::from_utf8_lossy(raw).into_owned()
    };

    let text = decoded.strip_prefix('\u{FEFF}').unwrap_or(&decoded);
    text.replace('\0', "").replace("\r\n", "\n").replace('\r', "\n")
}

/// Trimmed, non-empty lines of normalized text.
pub fn output_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|line| !line.is_empty())
}

/// Even length with a zero high byte somewhere in the first few code units.
fn looks_like_utf16le(raw: &[u8]) -> bool {
    if raw.is_empty() || raw.len() % 2 != 0 {
        return false;
    }
    raw.iter()
        .take(config::UTF16_SNIFF_BYTES)
        .skip(1)
        .step_by(2)
        .any(|b| *b == 0)
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    // A trailing odd byte cannot form a code unit and is dropped.
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}
