//! Byte and address rendering helpers

use crate::error::ParseError;
use crate::types::RecordType;
use std::net::Ipv4Addr;

pub fn ipv4_text(bytes: &[u8]) -> Result<String, ParseError> {
    let octets: [u8; 4] = bytes
        .try_into()
        .map_err(|_| ParseError::InvalidRdata { rtype: RecordType::A, len: bytes.len() })?;
    Ok(Ipv4Addr::from(octets).to_string())
}

/// Renders 16 bytes as eight colon-separated groups of four upper-case hex
/// digits, without zero compression: `2001:0DB8:0000:...`.
pub fn ipv6_text(bytes: &[u8]) -> Result<String, ParseError> {
    if bytes.len() != 16 {
        return Err(ParseError::InvalidRdata { rtype: RecordType::AAAA, len: bytes.len() });
    }
    let groups: Vec<String> = bytes.chunks(2).map(hex::encode_upper).collect();
    Ok(groups.join(":"))
}

/// Space separated upper-case hex, cut after `max` bytes with a trailing `...`.
pub fn hex_bytes(bytes: &[u8], max: Option<usize>) -> String {
    let (shown, cut) = match max {
        Some(max) if bytes.len() > max => (&bytes[..max], true),
        _ => (bytes, false),
    };
    let mut out = shown.iter().map(|b| hex::encode_upper([*b])).collect::<Vec<_>>().join(" ");
    if cut {
        out.push_str("...");
    }
    out
}

/// Multi-line hex dump with `row` bytes per line.
pub fn hex_dump(bytes: &[u8], row: usize) -> String {
    let mut dump = String::new();
    for chunk in bytes.chunks(row.max(1)) {
        dump.push_str(&hex_bytes(chunk, None));
        dump.push('\n');
    }
    dump
}
