#![allow(dead_code)]

use cachedns::{wire, Flags, JsonFileStore, Message, Query, RecordCache, RecordType, ResourceRecord};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

pub fn temp_cache() -> (TempDir, Arc<RecordCache>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::new(dir.path().join("cache.json")));
    let cache = Arc::new(RecordCache::open(store).unwrap());
    (dir, cache)
}

#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub answers: Vec<ResourceRecord>,
    pub authorities: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

impl Reply {
    pub fn answers(answers: Vec<ResourceRecord>) -> Self {
        Self { answers, ..Self::default() }
    }
}

/// Loopback UDP server standing in for the root resolver and name servers.
pub struct MockUpstream {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Message>>>,
    handle: JoinHandle<()>,
}

impl MockUpstream {
    /// Answers from `zone`; unknown questions get an empty answer.
    pub async fn start(zone: HashMap<(RecordType, String), Reply>) -> Self {
        Self::start_with(move |request: &Message| {
            let reply = request
                .queries
                .first()
                .and_then(|q| zone.get(&(q.rtype, q.name.clone())))
                .cloned()
                .unwrap_or_default();
            let response = Message {
                id: request.id,
                flags: Flags::answer(),
                queries: request.queries.clone(),
                answers: reply.answers,
                authorities: reply.authorities,
                additional: reply.additional,
            };
            Some(wire::encode(&response).unwrap())
        })
        .await
    }

    pub async fn start_with<F>(respond: F) -> Self
    where
        F: Fn(&Message) -> Option<Vec<u8>> + Send + 'static,
    {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            while let Ok((len, src)) = socket.recv_from(&mut buf).await {
                let Ok(request) = wire::decode(&buf[..len]) else { continue };
                seen.lock().unwrap().push(request.clone());
                if let Some(reply) = respond(&request) {
                    let _ = socket.send_to(&reply, src).await;
                }
            }
        });

        Self { addr, requests, handle }
    }

    pub fn requests(&self) -> Vec<Message> {
        self.requests.lock().unwrap().clone()
    }

    pub fn queries(&self) -> Vec<Query> {
        self.requests().into_iter().flat_map(|m| m.queries).collect()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A bound socket that never answers.
pub async fn silent_upstream() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

pub fn zone(entries: Vec<(RecordType, &str, Reply)>) -> HashMap<(RecordType, String), Reply> {
    entries.into_iter().map(|(t, n, r)| ((t, n.to_string()), r)).collect()
}
