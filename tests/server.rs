use cachedns::{wire, DnsServer, Flags, Message, Query, RecordCache, RecordType, Resolver, ResourceRecord, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

mod helpers;
use helpers::{silent_upstream, temp_cache, zone, MockUpstream, Reply};

struct RunningServer {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<anyhow::Result<()>>,
}

async fn start_server(root: SocketAddr, cache: Arc<RecordCache>) -> RunningServer {
    let config = ServerConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        root,
        nameserver_port: root.port(),
        ..ServerConfig::default()
    };
    let resolver = Resolver::udp(cache, config.upstream_timeout);
    let server = Arc::new(DnsServer::bind(config, resolver).await.unwrap());
    let addr = server.local_addr().unwrap();

    let (shutdown, rx) = watch::channel(false);
    let running = server.clone();
    let handle = tokio::spawn(async move { running.run(rx).await });
    RunningServer { addr, shutdown, handle }
}

fn query_bytes(id: u16, rtype: RecordType, name: &str) -> Vec<u8> {
    let msg = Message {
        id,
        flags: Flags::query(),
        queries: vec![Query::new(rtype, name)],
        ..Message::default()
    };
    wire::encode(&msg).unwrap()
}

async fn ask(server: SocketAddr, datagram: &[u8], wait: Duration) -> Option<Vec<u8>> {
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(datagram, server).await.unwrap();
    let mut buf = [0u8; 2048];
    match timeout(wait, client.recv_from(&mut buf)).await {
        Ok(Ok((len, _))) => Some(buf[..len].to_vec()),
        _ => None,
    }
}

#[tokio::test]
async fn test_address_query_follows_one_delegation() {
    let upstream = MockUpstream::start(zone(vec![
        (
            RecordType::NS,
            "example.com",
            Reply {
                answers: vec![ResourceRecord::new(RecordType::NS, "example.com", 86400, "ns1.example.com")],
                additional: vec![ResourceRecord::new(RecordType::A, "ns1.example.com", 86400, "127.0.0.1")],
                ..Reply::default()
            },
        ),
        (
            RecordType::A,
            "example.com",
            Reply::answers(vec![ResourceRecord::new(RecordType::A, "example.com", 3600, "93.184.216.34")]),
        ),
    ]))
    .await;

    let (_dir, cache) = temp_cache();
    let server = start_server(upstream.addr, cache).await;

    let reply = ask(server.addr, &query_bytes(0x4242, RecordType::A, "example.com"), Duration::from_secs(3))
        .await
        .expect("server should answer");
    let reply = wire::decode(&reply).unwrap();

    assert_eq!(reply.id, 0x4242);
    assert!(reply.flags.response);
    assert!(reply.flags.recursion_desired);
    assert!(reply.flags.recursion_available);
    assert_eq!(reply.queries, vec![Query::new(RecordType::A, "example.com")]);
    assert_eq!(reply.answers, vec![ResourceRecord::new(RecordType::A, "example.com", 3600, "93.184.216.34")]);
    assert!(reply.authorities.is_empty() && reply.additional.is_empty());

    // NS at the root first, then A at the delegated name server; glue came from the cache
    assert_eq!(
        upstream.queries(),
        vec![Query::new(RecordType::NS, "example.com"), Query::new(RecordType::A, "example.com")]
    );
}

#[tokio::test]
async fn test_non_address_query_goes_to_root() {
    let upstream = MockUpstream::start(zone(vec![(
        RecordType::PTR,
        "34.216.184.93.in-addr.arpa",
        Reply::answers(vec![ResourceRecord::new(RecordType::PTR, "34.216.184.93.in-addr.arpa", 600, "example.com")]),
    )]))
    .await;

    let (_dir, cache) = temp_cache();
    let server = start_server(upstream.addr, cache).await;

    let reply = ask(server.addr, &query_bytes(7, RecordType::PTR, "34.216.184.93.in-addr.arpa"), Duration::from_secs(3))
        .await
        .expect("server should answer");
    let reply = wire::decode(&reply).unwrap();

    assert_eq!(reply.answers[0].data, "example.com");
    assert_eq!(upstream.queries(), vec![Query::new(RecordType::PTR, "34.216.184.93.in-addr.arpa")]);
}

#[tokio::test]
async fn test_cached_query_is_answered_without_upstream() {
    let silent = silent_upstream().await;
    let (_dir, cache) = temp_cache();
    cache.put(RecordType::AAAA, "cached.test", 120, ["2001:0DB8:0000:0000:0000:0000:0000:0001"]).unwrap();
    let server = start_server(silent.local_addr().unwrap(), cache).await;

    let reply = ask(server.addr, &query_bytes(9, RecordType::AAAA, "cached.test"), Duration::from_millis(500))
        .await
        .expect("cache hit should answer before any upstream timeout");
    let reply = wire::decode(&reply).unwrap();

    assert_eq!(reply.id, 9);
    assert_eq!(
        reply.answers,
        vec![ResourceRecord::new(RecordType::AAAA, "cached.test", 120, "2001:0DB8:0000:0000:0000:0000:0000:0001")]
    );
}

#[tokio::test]
async fn test_malformed_datagram_is_dropped_and_loop_survives() {
    let silent = silent_upstream().await;
    let (_dir, cache) = temp_cache();
    cache.put(RecordType::A, "cached.test", 300, ["10.1.2.3"]).unwrap();
    let server = start_server(silent.local_addr().unwrap(), cache).await;

    assert!(ask(server.addr, &[0x12, 0x34, 0x01, 0x00, 0x00], Duration::from_millis(500)).await.is_none());

    let reply = ask(server.addr, &query_bytes(11, RecordType::A, "cached.test"), Duration::from_secs(2))
        .await
        .expect("server should still answer after a malformed datagram");
    assert_eq!(wire::decode(&reply).unwrap().answers[0].data, "10.1.2.3");
    assert!(!server.handle.is_finished());
}

#[tokio::test]
async fn test_upstream_failure_yields_negative_reply() {
    let silent = silent_upstream().await;
    let (_dir, cache) = temp_cache();
    let server = start_server(silent.local_addr().unwrap(), cache).await;

    let reply = ask(server.addr, &query_bytes(0x0BAD, RecordType::A, "example.com"), Duration::from_secs(3))
        .await
        .expect("requester must not be left hanging");

    assert_eq!(reply, vec![0x0B, 0xAD, 0x81, 0x00, 0, 0, 0, 0, 0, 0, 0, 0]);
    let msg = wire::decode(&reply).unwrap();
    assert!(msg.flags.response && msg.flags.recursion_desired && !msg.flags.recursion_available);
    assert!(msg.queries.is_empty() && msg.answers.is_empty());
}

#[tokio::test]
async fn test_missing_name_server_yields_negative_reply() {
    // root knows nothing about the zone, so there is no NS to delegate to
    let upstream = MockUpstream::start(zone(vec![])).await;
    let (_dir, cache) = temp_cache();
    let server = start_server(upstream.addr, cache).await;

    let reply = ask(server.addr, &query_bytes(5, RecordType::A, "nowhere.test"), Duration::from_secs(3))
        .await
        .expect("server should answer");

    assert_eq!(wire::decode(&reply).unwrap(), Message { id: 5, flags: Flags::negative(), ..Message::default() });
}

#[tokio::test]
async fn test_shutdown_stops_accept_loop() {
    let (_dir, cache) = temp_cache();
    let silent = silent_upstream().await;
    let server = start_server(silent.local_addr().unwrap(), cache).await;

    server.shutdown.send(true).unwrap();
    let result = timeout(Duration::from_secs(2), server.handle).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_handle_datagram_without_socket_round_trip() {
    let (_dir, cache) = temp_cache();
    cache.put(RecordType::NS, "example.com", 60, ["a.iana-servers.net", "b.iana-servers.net"]).unwrap();
    let config = ServerConfig { listen: "127.0.0.1:0".parse().unwrap(), ..ServerConfig::default() };
    let server = DnsServer::bind(config.clone(), Resolver::udp(cache, config.upstream_timeout)).await.unwrap();
    let src: SocketAddr = "127.0.0.1:9".parse().unwrap();

    assert!(server.handle_datagram(&[0u8; 11], src).await.is_none());

    let empty = wire::encode(&Message { id: 1, flags: Flags::query(), ..Message::default() }).unwrap();
    assert!(server.handle_datagram(&empty, src).await.is_none());

    let reply = server.handle_datagram(&query_bytes(2, RecordType::NS, "example.com"), src).await.unwrap();
    let names: Vec<_> = wire::decode(&reply).unwrap().answers.into_iter().map(|rr| rr.data).collect();
    assert_eq!(names, ["a.iana-servers.net", "b.iana-servers.net"]);
}
