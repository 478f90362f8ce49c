//! DNS wire format: message decoding and encoding
//!
//! Decoding follows compression pointers; encoding always writes names as
//! plain length-prefixed labels and never emits pointers.

use crate::error::ParseError;
use crate::format::{ipv4_text, ipv6_text};
use crate::types::{Flags, Message, Query, RecordClass, RecordType, ResourceRecord};
use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};

pub const HEADER_LEN: usize = 12;
const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;

/// Bounds-checked cursor over a whole message buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        let end = self.pos + len;
        if end > self.buf.len() {
            return Err(ParseError::UnexpectedEof { offset: self.buf.len() });
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, ParseError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ParseError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a possibly compressed name starting at the cursor. The cursor ends
    /// up after the terminating zero byte, or after the first pointer.
    fn name(&mut self) -> Result<String, ParseError> {
        let mut labels: Vec<String> = Vec::new();
        let mut wire_len = 1;
        let mut pos = self.pos;
        let mut resume = None;
        let mut visited = HashSet::new();

        loop {
            let len = *self.buf.get(pos).ok_or(ParseError::UnexpectedEof { offset: pos })?;

            if len & 0xC0 == 0xC0 {
                let low = *self.buf.get(pos + 1).ok_or(ParseError::UnexpectedEof { offset: pos + 1 })?;
                let target = (((len & 0x3F) as usize) << 8) | low as usize;
                if target >= pos || !visited.insert(target) {
                    return Err(ParseError::InvalidPointer { offset: pos, target });
                }
                resume.get_or_insert(pos + 2);
                pos = target;
                continue;
            }
            if len & 0xC0 != 0 {
                return Err(ParseError::InvalidLabelType { offset: pos, byte: len });
            }
            if len == 0 {
                pos += 1;
                break;
            }

            let start = pos + 1;
            let end = start + len as usize;
            let raw = self.buf.get(start..end).ok_or(ParseError::UnexpectedEof { offset: self.buf.len() })?;
            wire_len += 1 + raw.len();
            if wire_len > MAX_NAME_LEN {
                return Err(ParseError::NameTooLong(wire_len));
            }
            // names are dot-joined text, so a dot inside a label cannot round-trip
            if raw.contains(&b'.') {
                return Err(ParseError::InvalidLabel { offset: start });
            }
            let label = std::str::from_utf8(raw).map_err(|_| ParseError::InvalidLabel { offset: start })?;
            labels.push(label.to_string());
            pos = end;
        }

        self.pos = resume.unwrap_or(pos);
        Ok(labels.join("."))
    }
}

pub fn decode(buf: &[u8]) -> Result<Message, ParseError> {
    if buf.len() < HEADER_LEN {
        return Err(ParseError::HeaderTooShort { len: buf.len() });
    }
    let mut r = Reader::new(buf);
    let id = r.u16()?;
    let flags = Flags::from_u16(r.u16()?);
    let qdcount = r.u16()?;
    let ancount = r.u16()?;
    let nscount = r.u16()?;
    let arcount = r.u16()?;

    let queries = (0..qdcount).map(|_| read_query(&mut r)).collect::<Result<Vec<_>, _>>()?;
    let answers = read_records(&mut r, ancount)?;
    let authorities = read_records(&mut r, nscount)?;
    let additional = read_records(&mut r, arcount)?;

    Ok(Message { id, flags, queries, answers, authorities, additional })
}

fn read_query(r: &mut Reader<'_>) -> Result<Query, ParseError> {
    let name = r.name()?;
    let rtype = RecordType::from_code(r.u16()?)?;
    let class = RecordClass::from_code(r.u16()?)?;
    Ok(Query { rtype, class, name })
}

fn read_records(r: &mut Reader<'_>, count: u16) -> Result<Vec<ResourceRecord>, ParseError> {
    (0..count).map(|_| read_record(r)).collect()
}

fn read_record(r: &mut Reader<'_>) -> Result<ResourceRecord, ParseError> {
    let name = r.name()?;
    let rtype = RecordType::from_code(r.u16()?)?;
    let class = RecordClass::from_code(r.u16()?)?;
    let ttl = r.u32()?;
    let rdlength = r.u16()? as usize;
    let rdata_end = r.pos + rdlength;
    if rdata_end > r.buf.len() {
        return Err(ParseError::UnexpectedEof { offset: r.buf.len() });
    }

    let data = match rtype {
        RecordType::A => ipv4_text(r.bytes(rdlength)?)?,
        RecordType::AAAA => ipv6_text(r.bytes(rdlength)?)?,
        RecordType::NS | RecordType::PTR => {
            let target = r.name()?;
            if r.pos > rdata_end {
                return Err(ParseError::InvalidRdata { rtype, len: rdlength });
            }
            r.pos = rdata_end;
            target
        }
    };

    Ok(ResourceRecord { rtype, class, name, ttl, data })
}

pub fn encode(msg: &Message) -> Result<Vec<u8>, ParseError> {
    let mut out = Vec::with_capacity(512);
    out.extend_from_slice(&msg.id.to_be_bytes());
    out.extend_from_slice(&msg.flags.to_u16().to_be_bytes());
    for len in [msg.queries.len(), msg.answers.len(), msg.authorities.len(), msg.additional.len()] {
        let count = u16::try_from(len).map_err(|_| ParseError::SectionTooLarge(len))?;
        out.extend_from_slice(&count.to_be_bytes());
    }

    for q in &msg.queries {
        write_name(&mut out, &q.name)?;
        out.extend_from_slice(&q.rtype.code().to_be_bytes());
        out.extend_from_slice(&q.class.code().to_be_bytes());
    }
    for rr in msg.records() {
        write_record(&mut out, rr)?;
    }
    Ok(out)
}

fn write_record(out: &mut Vec<u8>, rr: &ResourceRecord) -> Result<(), ParseError> {
    write_name(out, &rr.name)?;
    out.extend_from_slice(&rr.rtype.code().to_be_bytes());
    out.extend_from_slice(&rr.class.code().to_be_bytes());
    out.extend_from_slice(&rr.ttl.to_be_bytes());

    let mut rdata = Vec::new();
    match rr.rtype {
        RecordType::A => {
            let addr: Ipv4Addr = rr.data.parse().map_err(|_| invalid_address(rr))?;
            rdata.extend_from_slice(&addr.octets());
        }
        RecordType::AAAA => {
            let addr: Ipv6Addr = rr.data.parse().map_err(|_| invalid_address(rr))?;
            rdata.extend_from_slice(&addr.octets());
        }
        RecordType::NS | RecordType::PTR => write_name(&mut rdata, &rr.data)?,
    }
    out.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
    out.extend_from_slice(&rdata);
    Ok(())
}

fn invalid_address(rr: &ResourceRecord) -> ParseError {
    ParseError::InvalidAddress { rtype: rr.rtype, text: rr.data.clone() }
}

/// Writes `name` as length-prefixed labels and a closing zero byte. A trailing
/// dot is ignored; the empty name is the root.
fn write_name(out: &mut Vec<u8>, name: &str) -> Result<(), ParseError> {
    let start = out.len();
    for label in name.split('.').filter(|l| !l.is_empty()) {
        if label.len() > MAX_LABEL_LEN {
            return Err(ParseError::LabelTooLong(label.len()));
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    let written = out.len() - start;
    if written > MAX_NAME_LEN {
        return Err(ParseError::NameTooLong(written));
    }
    Ok(())
}
