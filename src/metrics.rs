use anyhow::Result;
use lazy_static::lazy_static;
use prometheus::{
    Encoder, GaugeVec, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
    register_gauge_vec, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;

lazy_static! {
    pub static ref DNS_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cachedns_dns_requests_total",
        "Counter of decoded DNS requests per query type.",
        &["type"]
    ).unwrap();

    pub static ref DNS_RESPONSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cachedns_dns_responses_total",
        "Counter of responses sent, by outcome (answer or negative).",
        &["outcome"]
    ).unwrap();

    pub static ref DNS_MALFORMED_TOTAL: IntCounter = register_int_counter!(
        "cachedns_dns_malformed_total",
        "Counter of inbound datagrams dropped because they could not be decoded."
    ).unwrap();

    pub static ref CACHE_HITS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cachedns_cache_hits_total",
        "The count of cache hits.",
        &["type"]
    ).unwrap();

    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cachedns_cache_misses_total",
        "The count of cache misses.",
        &["type"]
    ).unwrap();

    pub static ref CACHE_RECORDS: IntGauge = register_int_gauge!(
        "cachedns_cache_records",
        "The number of records in the cache after the last sweep."
    ).unwrap();

    pub static ref CACHE_EVICTIONS_TOTAL: IntCounter = register_int_counter!(
        "cachedns_cache_evictions_total",
        "Counter of records removed by the expiry sweep."
    ).unwrap();

    pub static ref UPSTREAM_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "cachedns_upstream_request_duration_seconds",
        "Histogram of the time each upstream exchange took.",
        &["outcome"],
        vec![0.001, 0.002, 0.004, 0.008, 0.016, 0.032, 0.064, 0.128, 0.256, 0.512, 1.024, 2.048]
    ).unwrap();

    pub static ref BUILD_INFO: GaugeVec = register_gauge_vec!(
        "cachedns_build_info",
        "A metric with a constant '1' value labeled by version.",
        &["version"]
    ).unwrap();
}

/// Serves the text exposition format on `addr` until `shutdown` flips.
pub async fn serve(addr: SocketAddr, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    BUILD_INFO.with_label_values(&[env!("CARGO_PKG_VERSION")]).set(1.0);
    tracing::info!("[metrics] Listening on {}", addr);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                let (mut stream, _) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!("[metrics] accept failed: {}", e);
                        continue;
                    }
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 8192];
                    if let Ok(Ok(n)) = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf)).await {
                        if n == 0 || !buf.starts_with(b"GET ") {
                            return;
                        }
                        let body = render();
                        let header = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            body.len()
                        );
                        let mut response = header.into_bytes();
                        response.extend_from_slice(&body);
                        let _ = tokio::time::timeout(Duration::from_secs(2), stream.write_all(&response)).await;
                        let _ = stream.shutdown().await;
                    }
                });
            }
        }
    }
    Ok(())
}

/// Current state of the default registry in text format.
pub fn render() -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!("[metrics] encoding failed: {}", e);
    }
    buffer
}
