//! HTTP probe implementation.

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL, PRAGMA};
use reqwest::redirect::Policy;
use reqwest::Method;

use super::ProbeOutcome;
use crate::db::HttpProbeConfig;

/// Run an HTTP probe.
///
/// The request bypasses caches, enforces `timeout_ms` as a hard deadline over
/// the whole exchange, and measures latency from just before send to headers
/// received (or body read, when a keyword assertion needs the body).
pub async fn run_http_probe(cfg: &HttpProbeConfig, timeout_ms: u64) -> ProbeOutcome {
    let timeout = Duration::from_millis(timeout_ms);
    let redirect = if cfg.follow_redirects {
        Policy::limited(10)
    } else {
        Policy::none()
    };

    let client = match reqwest::Client::builder()
        .timeout(timeout)
        .redirect(redirect)
        .build()
    {
        Ok(c) => c,
        Err(e) => return ProbeOutcome::down(short_message(&e.to_string())),
    };

    let method = Method::from_bytes(cfg.method.as_bytes()).unwrap_or(Method::GET);
    let mut request = client
        .request(method, &cfg.url)
        .headers(cache_bypass_headers());
    for (name, value) in &cfg.headers {
        let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) else {
            return ProbeOutcome::down(format!("bad_header: {}", name));
        };
        request = request.header(name, value);
    }
    if let Some(body) = &cfg.body {
        request = request.body(body.clone());
    }

    let start = Instant::now();
    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            return ProbeOutcome::Down {
                latency_ms: None,
                error: classify_send_error(&e),
            }
        }
    };
    let mut latency_ms = start.elapsed().as_millis() as u64;

    let status = response.status();
    let expected = if cfg.expected_status.is_empty() {
        status.is_success()
    } else {
        cfg.expected_status.contains(&status.as_u16())
    };
    if !expected {
        return ProbeOutcome::Down {
            latency_ms: Some(latency_ms),
            error: format!("http_{}", status.as_u16()),
        };
    }

    if let Some(keyword) = &cfg.keyword {
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                return ProbeOutcome::Down {
                    latency_ms: Some(latency_ms),
                    error: classify_send_error(&e),
                }
            }
        };
        latency_ms = start.elapsed().as_millis() as u64;
        if !body.contains(keyword.as_str()) {
            return ProbeOutcome::Down {
                latency_ms: Some(latency_ms),
                error: "assertion_failed".to_string(),
            };
        }
    }

    ProbeOutcome::Up { latency_ms }
}

fn cache_bypass_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers
}

/// Map a reqwest error to a short, stable reason string.
fn classify_send_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        return "timeout".to_string();
    }
    let chain = error_chain(e).to_lowercase();
    if e.is_connect() {
        if chain.contains("refused") {
            return "connect_refused".to_string();
        }
        if chain.contains("dns") || chain.contains("resolve") || chain.contains("lookup") {
            return "dns_error".to_string();
        }
        return "connect_error".to_string();
    }
    if chain.contains("certificate") || chain.contains("tls") || chain.contains("ssl") {
        return "tls_error".to_string();
    }
    short_message(&chain)
}

fn error_chain(e: &reqwest::Error) -> String {
    let mut parts = vec![e.to_string()];
    let mut source = std::error::Error::source(e);
    while let Some(s) = source {
        parts.push(s.to_string());
        source = s.source();
    }
    parts.join(": ")
}

fn short_message(msg: &str) -> String {
    let mut s = msg.trim().to_string();
    if s.len() > 200 {
        s.truncate(200);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: String) -> HttpProbeConfig {
        serde_json::from_str::<HttpProbeConfig>(&format!(r#"{{"url":"{}"}}"#, url)).unwrap()
    }

    #[tokio::test]
    async fn test_http_probe_up_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .and(header("cache-control", "no-cache, no-store"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let outcome = run_http_probe(&config(format!("{}/health", server.uri())), 5000).await;
        assert!(outcome.is_up(), "expected up, got {:?}", outcome);
    }

    #[tokio::test]
    async fn test_http_probe_down_on_unexpected_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let outcome = run_http_probe(&config(server.uri()), 5000).await;
        assert_eq!(outcome.error(), Some("http_503"));
        assert!(outcome.latency_ms().is_some());
    }

    #[tokio::test]
    async fn test_http_probe_custom_expected_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut cfg = config(server.uri());
        cfg.expected_status = vec![404];
        let outcome = run_http_probe(&cfg, 5000).await;
        assert!(outcome.is_up());
    }

    #[tokio::test]
    async fn test_http_probe_keyword_assertion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("status: healthy"))
            .mount(&server)
            .await;

        let mut cfg = config(server.uri());
        cfg.keyword = Some("healthy".to_string());
        assert!(run_http_probe(&cfg, 5000).await.is_up());

        cfg.keyword = Some("degraded".to_string());
        let outcome = run_http_probe(&cfg, 5000).await;
        assert_eq!(outcome.error(), Some("assertion_failed"));
    }

    #[tokio::test]
    async fn test_http_probe_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let outcome = run_http_probe(&config(server.uri()), 100).await;
        assert_eq!(outcome.error(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_http_probe_connect_refused() {
        // Bind then drop to get a port with nothing listening
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let outcome = run_http_probe(&config(format!("http://127.0.0.1:{}/", port)), 2000).await;
        let err = outcome.error().unwrap();
        assert!(
            err == "connect_refused" || err == "connect_error",
            "unexpected reason: {}",
            err
        );
    }
}
