//! Basic types for DNS messages

use crate::error::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType { A, NS, PTR, AAAA }

impl RecordType {
    pub const ALL: [RecordType; 4] = [RecordType::A, RecordType::NS, RecordType::PTR, RecordType::AAAA];

    pub fn code(self) -> u16 {
        match self { RecordType::A => 1, RecordType::NS => 2, RecordType::PTR => 12, RecordType::AAAA => 28 }
    }

    pub fn from_code(code: u16) -> Result<Self, ParseError> {
        match code {
            1 => Ok(RecordType::A),
            2 => Ok(RecordType::NS),
            12 => Ok(RecordType::PTR),
            28 => Ok(RecordType::AAAA),
            _ => Err(ParseError::UnsupportedType(code)),
        }
    }

    pub fn is_address(self) -> bool {
        matches!(self, RecordType::A | RecordType::AAAA)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self { RecordType::A => "A", RecordType::NS => "NS", RecordType::PTR => "PTR", RecordType::AAAA => "AAAA" };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RecordClass { #[default] IN }

impl RecordClass {
    pub fn code(self) -> u16 {
        match self { RecordClass::IN => 1 }
    }

    pub fn from_code(code: u16) -> Result<Self, ParseError> {
        match code {
            1 => Ok(RecordClass::IN),
            _ => Err(ParseError::UnsupportedClass(code)),
        }
    }
}

/// Header flags, packed MSB to LSB as
/// `QR | OPCODE(4) | AA | TC | RD | RA | Z | AD | CD | RCODE(4)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    pub response: bool,
    pub opcode: u8,
    pub authoritative: bool,
    pub truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub z: bool,
    pub answer_authenticated: bool,
    pub non_authenticated: bool,
    pub rcode: u8,
}

impl Flags {
    pub fn from_u16(bits: u16) -> Self {
        Self {
            response: bits & 0x8000 != 0,
            opcode: ((bits >> 11) & 0x0F) as u8,
            authoritative: bits & 0x0400 != 0,
            truncated: bits & 0x0200 != 0,
            recursion_desired: bits & 0x0100 != 0,
            recursion_available: bits & 0x0080 != 0,
            z: bits & 0x0040 != 0,
            answer_authenticated: bits & 0x0020 != 0,
            non_authenticated: bits & 0x0010 != 0,
            rcode: (bits & 0x000F) as u8,
        }
    }

    pub fn to_u16(self) -> u16 {
        (self.response as u16) << 15
            | ((self.opcode & 0x0F) as u16) << 11
            | (self.authoritative as u16) << 10
            | (self.truncated as u16) << 9
            | (self.recursion_desired as u16) << 8
            | (self.recursion_available as u16) << 7
            | (self.z as u16) << 6
            | (self.answer_authenticated as u16) << 5
            | (self.non_authenticated as u16) << 4
            | (self.rcode & 0x0F) as u16
    }

    /// Flags for an outbound query.
    pub fn query() -> Self {
        Self { recursion_desired: true, ..Self::default() }
    }

    /// Flags for a successful reply: QR, RD and RA set.
    pub fn answer() -> Self {
        Self { response: true, recursion_desired: true, recursion_available: true, ..Self::default() }
    }

    /// Flags for the minimal failure reply: QR and RD only.
    pub fn negative() -> Self {
        Self { response: true, recursion_desired: true, ..Self::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub rtype: RecordType,
    pub class: RecordClass,
    pub name: String,
}

impl Query {
    pub fn new(rtype: RecordType, name: impl Into<String>) -> Self {
        Self { rtype, class: RecordClass::IN, name: name.into() }
    }
}

/// A resource record. `data` is dotted-decimal for A, colon-grouped hex for
/// AAAA and a domain name for NS and PTR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub rtype: RecordType,
    pub class: RecordClass,
    pub name: String,
    pub ttl: u32,
    pub data: String,
}

impl ResourceRecord {
    pub fn new(rtype: RecordType, name: impl Into<String>, ttl: u32, data: impl Into<String>) -> Self {
        Self { rtype, class: RecordClass::IN, name: name.into(), ttl, data: data.into() }
    }

    pub fn name_server(&self) -> Option<&str> {
        match self.rtype {
            RecordType::NS => Some(&self.data),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} IN {} {}", self.name, self.ttl, self.rtype, self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub id: u16,
    pub flags: Flags,
    pub queries: Vec<Query>,
    pub answers: Vec<ResourceRecord>,
    pub authorities: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

impl Message {
    /// All records of the answer, authority and additional sections in order.
    pub fn records(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.answers.iter().chain(&self.authorities).chain(&self.additional)
    }
}
