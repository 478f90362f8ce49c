use crate::cache::{CacheRecord, RecordCache};
use crate::config::UPSTREAM_TIMEOUT;
use crate::error::{CacheError, ResolveError};
use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, UPSTREAM_REQUEST_DURATION};
use crate::types::{Flags, Message, Query, ResourceRecord};
use crate::wire;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::timeout;

const UPSTREAM_BUFFER: usize = 4096;

/// One request/response round trip with an upstream server.
#[async_trait::async_trait]
pub trait Exchange: Send + Sync {
    async fn exchange(&self, request: &[u8], upstream: SocketAddr) -> Result<Vec<u8>, ResolveError>;
}

/// Single UDP attempt with a receive timeout. No retries.
pub struct UdpExchange {
    timeout: Duration,
}

impl UdpExchange {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for UdpExchange {
    fn default() -> Self {
        Self::new(UPSTREAM_TIMEOUT)
    }
}

#[async_trait::async_trait]
impl Exchange for UdpExchange {
    async fn exchange(&self, request: &[u8], upstream: SocketAddr) -> Result<Vec<u8>, ResolveError> {
        let local = if upstream.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(upstream).await?;
        socket.send(request).await?;

        let mut buf = vec![0u8; UPSTREAM_BUFFER];
        let len = timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| ResolveError::Unreachable)??;
        buf.truncate(len);
        Ok(buf)
    }
}

/// Answers queries from the cache, asking an upstream server on a miss and
/// caching everything it returns.
pub struct Resolver {
    cache: Arc<RecordCache>,
    exchange: Arc<dyn Exchange>,
}

impl Resolver {
    pub fn new(cache: Arc<RecordCache>, exchange: Arc<dyn Exchange>) -> Self {
        Self { cache, exchange }
    }

    pub fn udp(cache: Arc<RecordCache>, upstream_timeout: Duration) -> Self {
        Self::new(cache, Arc::new(UdpExchange::new(upstream_timeout)))
    }

    /// Cached answers for `query`, or `None` on a miss. Counts towards the
    /// cache hit/miss metrics.
    pub fn cached(&self, query: &Query) -> Result<Option<Vec<ResourceRecord>>, CacheError> {
        let records = self.cache.get(query.rtype, &query.name)?;
        let label = query.rtype.to_string();
        if records.is_empty() {
            CACHE_MISSES_TOTAL.with_label_values(&[label.as_str()]).inc();
            return Ok(None);
        }
        CACHE_HITS_TOTAL.with_label_values(&[label.as_str()]).inc();
        Ok(Some(to_answers(query, records)))
    }

    /// Resolves `query`, from the cache when possible, otherwise with one
    /// exchange against `upstream`. Every record of the reply is cached under
    /// its own type and name; the result is then read back for `query` only.
    pub async fn resolve_query(&self, query: &Query, upstream: SocketAddr) -> Result<Vec<ResourceRecord>, ResolveError> {
        if let Some(answers) = self.cached(query)? {
            tracing::debug!("[resolver] {} {} served from cache", query.rtype, query.name);
            return Ok(answers);
        }

        tracing::info!("There are no records for {} {}. Resolving at {}...", query.rtype, query.name, upstream);

        let request = Message {
            id: rand::thread_rng().gen_range(1..=u16::MAX),
            flags: Flags::query(),
            queries: vec![query.clone()],
            ..Message::default()
        };
        let bytes = wire::encode(&request)?;

        let start = Instant::now();
        let result = self.exchange.exchange(&bytes, upstream).await;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        UPSTREAM_REQUEST_DURATION.with_label_values(&[outcome]).observe(start.elapsed().as_secs_f64());

        let reply = wire::decode(&result?)?;
        self.cache.put_records(reply.records())?;
        for rr in reply.records() {
            tracing::debug!("[resolver] Learned {}", rr);
        }

        let records = self.cache.get(query.rtype, &query.name)?;
        tracing::info!("Resolved {} {} at {} with {} answer(s)", query.rtype, query.name, upstream, records.len());
        Ok(to_answers(query, records))
    }
}

fn to_answers(query: &Query, records: Vec<CacheRecord>) -> Vec<ResourceRecord> {
    records
        .into_iter()
        .map(|r| ResourceRecord::new(query.rtype, query.name.clone(), r.ttl, r.value))
        .collect()
}
