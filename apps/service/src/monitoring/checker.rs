use async_trait::async_trait;
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use url::Url;

use crate::models::{Monitor, MonitorKind, ProbeErrorKind};

/// Outcome of one successful attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub latency_ms: u64,
    pub status_code: Option<u16>,
}

/// Classified failure of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeFailure {
    pub kind: ProbeErrorKind,
    pub message: String,
    pub latency_ms: u64,
    pub status_code: Option<u16>,
}

impl ProbeFailure {
    pub fn new(kind: ProbeErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), latency_ms: 0, status_code: None }
    }

    fn after(mut self, started: Instant) -> Self {
        self.latency_ms = elapsed_ms(started);
        self
    }
}

/// Checker trait for different types of monitoring checks
#[async_trait]
pub trait Checker: Send + Sync {
    /// Perform a single attempt against the monitor target
    async fn check(&self, monitor: &Monitor, limit: Duration) -> Result<Attempt, ProbeFailure>;
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Lowercased text of an error and all of its sources
fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text.to_ascii_lowercase()
}

fn classify_chain(chain: &str) -> ProbeErrorKind {
    const TLS_MARKERS: [&str; 4] = ["certificate", "tls", "ssl", "handshake"];
    const DNS_MARKERS: [&str; 3] = ["dns", "lookup", "resolve"];

    if TLS_MARKERS.iter().any(|m| chain.contains(m)) {
        ProbeErrorKind::TlsHandshake
    } else if DNS_MARKERS.iter().any(|m| chain.contains(m)) {
        ProbeErrorKind::Dns
    } else {
        ProbeErrorKind::Connection
    }
}

/// Map a reqwest failure onto a probe error kind
pub fn classify_http_error(error: &reqwest::Error) -> ProbeErrorKind {
    if error.is_timeout() {
        return ProbeErrorKind::Timeout;
    }
    let chain = error_chain(error);
    if error.is_connect() || error.is_request() {
        return classify_chain(&chain);
    }
    if chain.contains("certificate") || chain.contains("handshake") {
        return ProbeErrorKind::TlsHandshake;
    }
    ProbeErrorKind::Other
}

/// HTTP/HTTPS checker, also used for keyword monitors
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("uppe-engine/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Checker for HttpChecker {
    async fn check(&self, monitor: &Monitor, limit: Duration) -> Result<Attempt, ProbeFailure> {
        let start = Instant::now();

        let response = self.client.get(&monitor.target).timeout(limit).send().await.map_err(|e| {
            ProbeFailure::new(classify_http_error(&e), format!("HTTP request failed: {}", e))
                .after(start)
        })?;

        let status_code = response.status().as_u16();
        if !monitor.accepts_status(status_code) {
            let mut failure = ProbeFailure::new(
                ProbeErrorKind::UnexpectedStatus,
                format!("HTTP check failed with status code: {}", status_code),
            )
            .after(start);
            failure.status_code = Some(status_code);
            return Err(failure);
        }

        if monitor.kind == MonitorKind::Keyword {
            let keyword = monitor.keyword.as_deref().unwrap_or_default();
            let body = response.text().await.map_err(|e| {
                let mut failure = ProbeFailure::new(
                    classify_http_error(&e),
                    format!("Failed to read response body: {}", e),
                )
                .after(start);
                failure.status_code = Some(status_code);
                failure
            })?;
            if !body.contains(keyword) {
                let mut failure = ProbeFailure::new(
                    ProbeErrorKind::KeywordMissing,
                    format!("Keyword '{}' not found in response", keyword),
                )
                .after(start);
                failure.status_code = Some(status_code);
                return Err(failure);
            }
        }

        Ok(Attempt { latency_ms: elapsed_ms(start), status_code: Some(status_code) })
    }
}

/// Split a monitor target into host and port
///
/// Accepts `host:port` or any `scheme://host[:port]` form, falling back to the
/// scheme's well known port and then to `default_port`.
pub fn host_and_port(target: &str, default_port: u16) -> Option<(String, u16)> {
    let target = target.trim();
    if target.contains("://") {
        let url = Url::parse(target).ok()?;
        let host = url.host_str()?.trim_matches(|c| c == '[' || c == ']').to_string();
        let port = url.port().unwrap_or_else(|| match url.scheme() {
            "https" | "grpcs" | "tls" => 443,
            "http" | "grpc" => 80,
            _ => default_port,
        });
        return Some((host, port));
    }
    if let Ok(addr) = target.parse::<SocketAddr>() {
        return Some((addr.ip().to_string(), addr.port()));
    }
    match target.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => Some((host.to_string(), port.parse().ok()?)),
        _ if target.is_empty() => None,
        _ => Some((target.to_string(), default_port)),
    }
}

async fn resolve(host: &str, port: u16, limit: Duration) -> Result<Vec<SocketAddr>, ProbeFailure> {
    let lookup = tokio::net::lookup_host((host, port));
    let addrs: Vec<SocketAddr> = timeout(limit, lookup)
        .await
        .map_err(|_| ProbeFailure::new(ProbeErrorKind::Timeout, "DNS lookup timeout"))?
        .map_err(|e| ProbeFailure::new(ProbeErrorKind::Dns, format!("DNS lookup failed: {}", e)))?
        .collect();
    if addrs.is_empty() {
        return Err(ProbeFailure::new(ProbeErrorKind::Dns, format!("No addresses found for {}", host)));
    }
    Ok(addrs)
}

/// TCP reachability checker, used for tcp, tls and grpc monitors
pub struct TcpChecker;

#[async_trait]
impl Checker for TcpChecker {
    async fn check(&self, monitor: &Monitor, limit: Duration) -> Result<Attempt, ProbeFailure> {
        let start = Instant::now();
        let default_port = if monitor.kind == MonitorKind::Tls { 443 } else { 80 };
        let (host, port) = host_and_port(&monitor.target, default_port).ok_or_else(|| {
            ProbeFailure::new(ProbeErrorKind::Other, format!("Invalid target: {}", monitor.target))
        })?;

        let addrs = resolve(&host, port, limit).await.map_err(|f| f.after(start))?;
        let remaining = limit.saturating_sub(start.elapsed());

        timeout(remaining, tokio::net::TcpStream::connect(addrs.as_slice()))
            .await
            .map_err(|_| ProbeFailure::new(ProbeErrorKind::Timeout, "TCP connection timeout").after(start))?
            .map_err(|e| {
                ProbeFailure::new(ProbeErrorKind::Connection, format!("TCP connection failed: {}", e))
                    .after(start)
            })?;

        Ok(Attempt { latency_ms: elapsed_ms(start), status_code: None })
    }
}

/// DNS resolution checker
pub struct DnsChecker;

#[async_trait]
impl Checker for DnsChecker {
    async fn check(&self, monitor: &Monitor, limit: Duration) -> Result<Attempt, ProbeFailure> {
        let start = Instant::now();
        let (host, _) = host_and_port(&monitor.target, 0).ok_or_else(|| {
            ProbeFailure::new(ProbeErrorKind::Other, format!("Invalid target: {}", monitor.target))
        })?;

        resolve(&host, 0, limit).await.map_err(|f| f.after(start))?;
        Ok(Attempt { latency_ms: elapsed_ms(start), status_code: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_parsing() {
        assert_eq!(host_and_port("example.com:5432", 80), Some(("example.com".into(), 5432)));
        assert_eq!(host_and_port("https://example.com/health", 80), Some(("example.com".into(), 443)));
        assert_eq!(host_and_port("grpc://svc.local:9000", 80), Some(("svc.local".into(), 9000)));
        assert_eq!(host_and_port("example.com", 443), Some(("example.com".into(), 443)));
        assert_eq!(host_and_port("127.0.0.1:22", 80), Some(("127.0.0.1".into(), 22)));
        assert_eq!(host_and_port("", 80), None);
    }

    #[test]
    fn chain_classification() {
        assert_eq!(classify_chain("invalid peer certificate: expired"), ProbeErrorKind::TlsHandshake);
        assert_eq!(classify_chain("dns error: failed to lookup address"), ProbeErrorKind::Dns);
        assert_eq!(classify_chain("connection refused"), ProbeErrorKind::Connection);
    }

    #[tokio::test]
    async fn tcp_check_against_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let monitor = Monitor::new("db", MonitorKind::Tcp, addr.to_string());

        let attempt = TcpChecker.check(&monitor, Duration::from_secs(2)).await.unwrap();
        assert_eq!(attempt.status_code, None);
    }

    #[tokio::test]
    async fn tcp_check_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let monitor = Monitor::new("db", MonitorKind::Tcp, addr.to_string());

        let failure = TcpChecker.check(&monitor, Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(failure.kind, ProbeErrorKind::Connection);
    }

    #[tokio::test]
    async fn dns_check_resolves_localhost() {
        let monitor = Monitor::new("resolver", MonitorKind::Dns, "localhost");
        assert!(DnsChecker.check(&monitor, Duration::from_secs(2)).await.is_ok());
    }
}
