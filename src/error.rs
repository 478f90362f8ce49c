//! Error types for the codec, the record cache and the resolver

use crate::types::RecordType;
use thiserror::Error;

/// Malformed or unsupported wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("message too short: {len} bytes, header needs 12")]
    HeaderTooShort { len: usize },

    #[error("unexpected end of message at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[error("unsupported record type {0}")]
    UnsupportedType(u16),

    #[error("unsupported record class {0}")]
    UnsupportedClass(u16),

    /// Compression pointer that does not point strictly backwards.
    #[error("invalid compression pointer at offset {offset} -> {target}")]
    InvalidPointer { offset: usize, target: usize },

    #[error("invalid label type {byte:#04x} at offset {offset}")]
    InvalidLabelType { offset: usize, byte: u8 },

    #[error("label too long: {0} bytes exceeds 63")]
    LabelTooLong(usize),

    #[error("name too long: {0} bytes exceeds 255")]
    NameTooLong(usize),

    #[error("label at offset {offset} is not valid utf-8")]
    InvalidLabel { offset: usize },

    #[error("invalid {rtype} rdata of {len} bytes")]
    InvalidRdata { rtype: RecordType, len: usize },

    #[error("invalid {rtype} address '{text}'")]
    InvalidAddress { rtype: RecordType, text: String },

    #[error("section holds {0} entries, more than 65535")]
    SectionTooLarge(usize),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("unsupported type ({0}) to use in cache")]
    InvalidArgument(RecordType),

    #[error("cache store i/o failed: {0}")]
    Store(#[from] std::io::Error),

    #[error("cache store is corrupt: {0}")]
    Format(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    /// Upstream timed out or the network is unreachable.
    #[error("network unreachable or unresponsive")]
    Unreachable,

    #[error(transparent)]
    Io(std::io::Error),

    #[error("upstream reply rejected: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("no name server address found for '{0}'")]
    NoNameServer(String),
}

impl From<std::io::Error> for ResolveError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::NetworkUnreachable => ResolveError::Unreachable,
            _ => ResolveError::Io(e),
        }
    }
}
