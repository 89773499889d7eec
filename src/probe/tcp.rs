//! TCP connect probe implementation.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use super::ProbeOutcome;

/// Run a TCP probe: up iff a connection is established within `timeout_ms`.
/// No payload is sent; the socket is dropped as soon as it connects.
pub async fn run_tcp_probe(addr: SocketAddr, timeout_ms: u64) -> ProbeOutcome {
    let timeout = Duration::from_millis(timeout_ms);
    let start = Instant::now();

    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            let latency_ms = start.elapsed().as_millis() as u64;
            drop(stream);
            ProbeOutcome::Up { latency_ms }
        }
        Ok(Err(e)) => ProbeOutcome::Down {
            latency_ms: None,
            error: classify_io_error(&e),
        },
        Err(_) => ProbeOutcome::Down {
            latency_ms: None,
            error: "timeout".to_string(),
        },
    }
}

fn classify_io_error(e: &std::io::Error) -> String {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => "connect_refused".to_string(),
        std::io::ErrorKind::TimedOut => "timeout".to_string(),
        std::io::ErrorKind::ConnectionReset => "connect_reset".to_string(),
        std::io::ErrorKind::HostUnreachable | std::io::ErrorKind::NetworkUnreachable => {
            "unreachable".to_string()
        }
        _ => {
            let mut msg = e.to_string();
            if msg.len() > 200 {
                msg.truncate(200);
            }
            msg
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_probe_up() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let outcome = run_tcp_probe(addr, 1000).await;
        assert!(outcome.is_up(), "expected up, got {:?}", outcome);
    }

    #[tokio::test]
    async fn test_tcp_probe_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let outcome = run_tcp_probe(addr, 1000).await;
        assert!(!outcome.is_up());
        assert_eq!(outcome.error(), Some("connect_refused"));
    }
}
