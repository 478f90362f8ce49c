//! cachedns - a caching DNS resolver
//!
//! Inbound UDP queries are answered from a TTL-bounded record cache when
//! possible, otherwise resolved against a root resolver, following one
//! name-server delegation for address queries.

pub mod cache;
pub mod config;
pub mod dns_server;
pub mod error;
pub mod format;
pub mod metrics;
pub mod resolver;
pub mod types;
pub mod wire;

pub use cache::{CacheRecord, CacheStore, JsonFileStore, RecordCache, SweepGuard};
pub use config::ServerConfig;
pub use dns_server::DnsServer;
pub use error::{CacheError, ParseError, ResolveError};
pub use resolver::{Exchange, Resolver, UdpExchange};
pub use types::{Flags, Message, Query, RecordClass, RecordType, ResourceRecord};
