use crate::config::ServerConfig;
use crate::error::ResolveError;
use crate::format::hex_dump;
use crate::metrics::{DNS_MALFORMED_TOTAL, DNS_REQUESTS_TOTAL, DNS_RESPONSES_TOTAL};
use crate::resolver::Resolver;
use crate::types::{Flags, Message, Query, RecordType, ResourceRecord};
use crate::wire;
use anyhow::Result;
use std::net::{IpAddr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::watch;

pub struct DnsServer {
    socket: UdpSocket,
    resolver: Resolver,
    config: ServerConfig,
}

impl DnsServer {
    pub async fn bind(config: ServerConfig, resolver: Resolver) -> Result<Self> {
        let socket = UdpSocket::bind(config.listen).await?;
        tracing::info!("🚀 Server bound to UDP {} (root resolver {})", socket.local_addr()?, config.root);
        Ok(Self { socket, resolver, config })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receives, resolves and answers one datagram at a time until `shutdown`
    /// changes. A slow upstream delays every request queued behind it.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut buf = vec![0u8; self.config.recv_buffer];
        tracing::info!("Server started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = self.socket.recv_from(&mut buf) => {
                    let (len, src) = match received {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!("Receive failed: {}", e);
                            continue;
                        }
                    };
                    if let Some(reply) = self.handle_datagram(&buf[..len], src).await {
                        if let Err(e) = self.socket.send_to(&reply, src).await {
                            tracing::warn!("Failed to reply to {}: {}", src, e);
                        }
                    }
                }
            }
        }

        tracing::info!("Server stopped");
        Ok(())
    }

    /// Builds the reply for one inbound datagram, or `None` when it cannot be
    /// decoded and is dropped.
    pub async fn handle_datagram(&self, datagram: &[u8], src: SocketAddr) -> Option<Vec<u8>> {
        tracing::debug!("<= {} bytes from {}\n{}", datagram.len(), src, hex_dump(datagram, 16));

        let request = match wire::decode(datagram) {
            Ok(msg) => msg,
            Err(e) => {
                DNS_MALFORMED_TOTAL.inc();
                tracing::warn!("The datagram from {} will be ignored: {}", src, e);
                return None;
            }
        };
        let Some(query) = request.queries.first() else {
            DNS_MALFORMED_TOTAL.inc();
            tracing::warn!("The datagram from {} carries no query, ignoring", src);
            return None;
        };

        tracing::info!("=> [Incoming Query] TxID: {:#06x} {} {} from {}", request.id, query.rtype, query.name, src);
        DNS_REQUESTS_TOTAL.with_label_values(&[query.rtype.to_string().as_str()]).inc();

        let (response, outcome) = match self.resolve(query).await {
            Ok(answers) => {
                let reply = Message {
                    id: request.id,
                    flags: Flags::answer(),
                    queries: request.queries.clone(),
                    answers,
                    ..Message::default()
                };
                (reply, "answer")
            }
            Err(e) => {
                match &e {
                    ResolveError::Cache(_) => tracing::error!("Cannot resolve {} {}: {}", query.rtype, query.name, e),
                    _ => tracing::warn!("Cannot resolve {} {}: {}", query.rtype, query.name, e),
                }
                (negative_reply(request.id), "negative")
            }
        };

        let bytes = match wire::encode(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Failed to encode reply for TxID {:#06x}: {}", request.id, e);
                wire::encode(&negative_reply(request.id)).ok()?
            }
        };
        DNS_RESPONSES_TOTAL.with_label_values(&[outcome]).inc();
        Some(bytes)
    }

    /// Cache first; A/AAAA go through one delegation hop via the name server
    /// found at the root resolver; NS/PTR go straight to the root resolver.
    async fn resolve(&self, query: &Query) -> Result<Vec<ResourceRecord>, ResolveError> {
        if !query.rtype.is_address() {
            return self.resolver.resolve_query(query, self.config.root).await;
        }

        if let Some(answers) = self.resolver.cached(query)? {
            tracing::info!("     |-- [cache] HIT {} {} ({} answers)", query.rtype, query.name, answers.len());
            return Ok(answers);
        }

        let ns_query = Query::new(RecordType::NS, query.name.clone());
        let name_servers = self.resolver.resolve_query(&ns_query, self.config.root).await?;
        let ns_name = name_servers
            .iter()
            .find_map(ResourceRecord::name_server)
            .ok_or_else(|| ResolveError::NoNameServer(query.name.clone()))?;
        let ns_addr = self.name_server_addr(ns_name).await?;

        tracing::info!("     |-- [delegation] {} {} via {} ({})", query.rtype, query.name, ns_name, ns_addr);
        self.resolver.resolve_query(query, ns_addr).await
    }

    /// Address of a name server, preferring glue already cached from the NS
    /// reply over a fresh A lookup at the root resolver.
    async fn name_server_addr(&self, ns_name: &str) -> Result<SocketAddr, ResolveError> {
        let glue = self.resolver.resolve_query(&Query::new(RecordType::A, ns_name), self.config.root).await?;
        glue.iter()
            .find_map(|rr| rr.data.parse::<IpAddr>().ok())
            .map(|ip| SocketAddr::new(ip, self.config.nameserver_port))
            .ok_or_else(|| ResolveError::NoNameServer(ns_name.to_string()))
    }
}

/// Reply with the request id, QR and RD set, and every section empty.
pub fn negative_reply(id: u16) -> Message {
    Message { id, flags: Flags::negative(), ..Message::default() }
}
