//! Notification dispatcher.
//!
//! Delivers transition events to webhook channels with at-most-once
//! semantics per (event_key, channel): the unique delivery row is the claim,
//! and there are no automatic retries.

mod sign;
mod template;

pub use sign::*;
pub use template::*;

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::Semaphore;
use url::Url;

use crate::db::{DeliveryStatus, Event, EventType, NotificationChannel, PayloadType, Store};

/// Webhook fan-out with bounded concurrency and a per-(event, channel)
/// idempotency ledger.
pub struct Notifier {
    store: Store,
    client: reqwest::Client,
    concurrency: usize,
}

impl Notifier {
    pub fn new(store: Store, concurrency: usize) -> Self {
        Self {
            store,
            client: reqwest::Client::new(),
            concurrency: concurrency.max(1),
        }
    }

    /// Fan one event out to every subscribed channel. Returns once all
    /// deliveries are finalized; one channel's failure never affects another.
    pub async fn dispatch(&self, event: &Event, now: i64) {
        let channels = match self.store.list_channels() {
            Ok(channels) => channels,
            Err(e) => {
                tracing::error!("Notifier: failed to list channels: {}", e);
                return;
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::new();
        for channel in channels {
            if !channel_wants(&channel, event.event_type) {
                continue;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let store = self.store.clone();
            let client = self.client.clone();
            let event = event.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                deliver(&store, &client, &event, &channel, now).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Notifier: delivery task failed: {}", e);
            }
        }
    }

    pub async fn dispatch_all(&self, events: &[Event], now: i64) {
        for event in events {
            self.dispatch(event, now).await;
        }
    }

    /// Deliver one event to a single channel, ignoring its event filter.
    /// Used by the admin test-ping endpoint.
    pub async fn dispatch_to(&self, event: &Event, channel_id: i64, now: i64) -> bool {
        match self.store.get_channel(channel_id) {
            Ok(channel) => {
                deliver(&self.store, &self.client, event, &channel, now).await;
                true
            }
            Err(e) => {
                tracing::error!("Notifier: channel {} unavailable: {}", channel_id, e);
                false
            }
        }
    }
}

fn channel_wants(channel: &NotificationChannel, event_type: EventType) -> bool {
    if event_type == EventType::TestPing {
        return true;
    }
    let enabled = &channel.config.enabled_events;
    enabled.is_empty() || enabled.iter().any(|e| e == event_type.as_str())
}

async fn deliver(
    store: &Store,
    client: &reqwest::Client,
    event: &Event,
    channel: &NotificationChannel,
    now: i64,
) {
    match store.claim_delivery(&event.event_key, channel.id, now) {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!(
                "Notifier: {} already delivered to channel {}",
                event.event_key,
                channel.id
            );
            return;
        }
        Err(e) => {
            tracing::error!("Notifier: claim failed for {}: {}", event.event_key, e);
            return;
        }
    }

    let (status, http_status, error) =
        match send_webhook(client, event, channel, now).await {
            Ok(code) => (DeliveryStatus::Success, Some(code), None),
            Err(failure) => {
                tracing::warn!(
                    "Notifier: delivery of {} to channel {} failed: {}",
                    event.event_key,
                    channel.id,
                    failure.message
                );
                (DeliveryStatus::Failed, failure.http_status, Some(failure.message))
            }
        };

    if let Err(e) = store.finalize_delivery(
        &event.event_key,
        channel.id,
        status,
        http_status,
        error.as_deref(),
        now,
    ) {
        tracing::error!("Notifier: finalize failed for {}: {}", event.event_key, e);
    }
}

struct DeliveryFailure {
    http_status: Option<u16>,
    message: String,
}

impl DeliveryFailure {
    fn new(message: impl Into<String>) -> Self {
        Self {
            http_status: None,
            message: message.into(),
        }
    }
}

async fn send_webhook(
    client: &reqwest::Client,
    event: &Event,
    channel: &NotificationChannel,
    now: i64,
) -> Result<u16, DeliveryFailure> {
    let cfg = &channel.config;
    let mut url =
        Url::parse(&cfg.url).map_err(|e| DeliveryFailure::new(format!("invalid url: {}", e)))?;
    let method = Method::from_bytes(cfg.method.as_bytes()).unwrap_or(Method::POST);

    // Message renders first so payload templates can reference {message}.
    let mut vars = vars_from_payload(&event.payload);
    vars.insert("channel".to_string(), channel.name.clone());
    vars.insert("event".to_string(), event.event_type.as_str().to_string());
    vars.insert("event_id".to_string(), event.event_key.clone());
    vars.insert("timestamp".to_string(), now.to_string());

    let message = match &cfg.message_template {
        Some(template) => render_string(template, &vars),
        None => render_string(default_message_template(event.event_type), &vars),
    };
    vars.insert("message".to_string(), message.clone());

    let body_value = match &cfg.payload_template {
        Some(template) => render_value(template, &vars),
        None => default_body(event, &message, now),
    };

    // Methods that cannot carry a body fall back to query params.
    let payload_type = if method == Method::GET || method == Method::HEAD {
        PayloadType::Param
    } else {
        cfg.payload_type
    };

    let (raw_body, content_type) = match payload_type {
        PayloadType::Json => {
            let body = serde_json::to_string(&body_value)
                .map_err(|e| DeliveryFailure::new(format!("encode failed: {}", e)))?;
            (body, Some("application/json"))
        }
        PayloadType::Form => {
            let mut encoder = url::form_urlencoded::Serializer::new(String::new());
            for (key, value) in vars_from_payload(&body_value) {
                encoder.append_pair(&key, &value);
            }
            (encoder.finish(), Some("application/x-www-form-urlencoded"))
        }
        PayloadType::Param => {
            for (key, value) in vars_from_payload(&body_value) {
                url.query_pairs_mut().append_pair(&key, &value);
            }
            (String::new(), None)
        }
    };

    let mut request = client
        .request(method, url)
        .timeout(Duration::from_millis(cfg.timeout_ms));
    for (name, value) in &cfg.headers {
        request = request.header(name.as_str(), value.as_str());
    }

    // Secrets resolve from the environment per delivery, never from the db.
    if let Some(signing) = &cfg.signing {
        if signing.enabled {
            let secret = std::env::var(&signing.secret_ref).map_err(|_| {
                DeliveryFailure::new(format!("missing signing secret: {}", signing.secret_ref))
            })?;
            request = request
                .header(TIMESTAMP_HEADER, now.to_string())
                .header(
                    SIGNATURE_HEADER,
                    signature_header_value(secret.as_bytes(), now, &raw_body),
                );
        }
    }

    if let Some(ct) = content_type {
        request = request.header(CONTENT_TYPE, ct).body(raw_body);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            DeliveryFailure::new(format!("timeout after {}ms", cfg.timeout_ms))
        } else {
            let mut msg = e.to_string();
            if msg.len() > 200 {
                msg.truncate(200);
            }
            DeliveryFailure::new(msg)
        }
    })?;

    let code = response.status().as_u16();
    if response.status().is_success() {
        Ok(code)
    } else {
        Err(DeliveryFailure {
            http_status: Some(code),
            message: format!("HTTP {}", code),
        })
    }
}

fn default_message_template(event_type: EventType) -> &'static str {
    match event_type {
        EventType::MonitorDown => "Monitor {monitor_name} is DOWN: {error}",
        EventType::MonitorUp => "Monitor {monitor_name} is UP",
        EventType::IncidentCreated => "Incident opened: {title}",
        EventType::IncidentUpdated => "Incident update ({status}): {title}",
        EventType::IncidentResolved => "Incident resolved: {title}",
        EventType::MaintenanceStarted => "Maintenance started: {title}",
        EventType::MaintenanceEnded => "Maintenance ended: {title}",
        EventType::TestPing => "Test notification from channel {channel}",
    }
}

fn default_body(event: &Event, message: &str, now: i64) -> Value {
    let mut body = match &event.payload {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = serde_json::Map::new();
            if !other.is_null() {
                map.insert("payload".to_string(), other.clone());
            }
            map
        }
    };
    body.insert("event".to_string(), Value::from(event.event_type.as_str()));
    body.insert("event_id".to_string(), Value::from(event.event_key.clone()));
    body.insert("timestamp".to_string(), Value::from(now));
    body.insert("message".to_string(), Value::from(message));
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::NamedTempFile;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn channel(store: &Store, config: Value) -> NotificationChannel {
        let mut channel = NotificationChannel {
            id: 0,
            name: "ops".to_string(),
            config: serde_json::from_value(config).unwrap(),
            created_at: 0,
        };
        store.add_channel(&mut channel).unwrap();
        channel
    }

    fn down_event() -> Event {
        Event {
            event_type: EventType::MonitorDown,
            event_key: "monitor.down:1:42".to_string(),
            payload: json!({
                "monitor_id": 1,
                "monitor_name": "API",
                "target": "https://example.com/health",
                "error": "connect_refused"
            }),
        }
    }

    #[tokio::test]
    async fn test_dispatch_sends_and_finalizes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("content-type", "application/json"))
            .and(body_string_contains("connect_refused"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (_tmp, store) = test_store();
        let ch = channel(&store, json!({"url": format!("{}/hook", server.uri())}));
        let notifier = Notifier::new(store.clone(), 5);

        let event = down_event();
        notifier.dispatch(&event, 1000).await;

        let delivery = store.get_delivery(&event.event_key, ch.id).unwrap().unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Success);
        assert_eq!(delivery.http_status, Some(200));
        assert_eq!(delivery.finalized_at, Some(1000));
    }

    #[tokio::test]
    async fn test_duplicate_event_key_sends_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (_tmp, store) = test_store();
        channel(&store, json!({"url": server.uri()}));
        let notifier = Notifier::new(store.clone(), 5);

        let event = down_event();
        notifier.dispatch(&event, 1000).await;
        notifier.dispatch(&event, 1001).await;

        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_enabled_events_filter() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let (_tmp, store) = test_store();
        let ch = channel(
            &store,
            json!({"url": server.uri(), "enabled_events": ["monitor.up"]}),
        );
        let notifier = Notifier::new(store.clone(), 5);

        let event = down_event();
        notifier.dispatch(&event, 1000).await;

        // Filtered channels are skipped before the claim, so no row exists
        assert!(store.get_delivery(&event.event_key, ch.id).unwrap().is_none());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_test_ping_bypasses_filter() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (_tmp, store) = test_store();
        let ch = channel(
            &store,
            json!({"url": server.uri(), "enabled_events": ["monitor.up"]}),
        );
        let notifier = Notifier::new(store.clone(), 5);

        let event = Event {
            event_type: EventType::TestPing,
            event_key: format!("test.ping:{}:1000", ch.id),
            payload: json!({}),
        };
        notifier.dispatch(&event, 1000).await;

        let delivery = store.get_delivery(&event.event_key, ch.id).unwrap().unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Success);
    }

    #[tokio::test]
    async fn test_non_2xx_finalizes_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let (_tmp, store) = test_store();
        let ch = channel(&store, json!({"url": server.uri()}));
        let notifier = Notifier::new(store.clone(), 5);

        let event = down_event();
        notifier.dispatch(&event, 1000).await;

        let delivery = store.get_delivery(&event.event_key, ch.id).unwrap().unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Failed);
        assert_eq!(delivery.http_status, Some(503));
        assert_eq!(delivery.error.as_deref(), Some("HTTP 503"));
    }

    #[tokio::test]
    async fn test_missing_secret_fails_without_sending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let (_tmp, store) = test_store();
        let ch = channel(
            &store,
            json!({
                "url": server.uri(),
                "signing": {"enabled": true, "secret_ref": "UPTIMER_TEST_SECRET_UNSET_XYZ"}
            }),
        );
        let notifier = Notifier::new(store.clone(), 5);

        let event = down_event();
        notifier.dispatch(&event, 1000).await;

        let delivery = store.get_delivery(&event.event_key, ch.id).unwrap().unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Failed);
        assert!(delivery.error.unwrap().contains("missing signing secret"));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_signed_request_verifies() {
        std::env::set_var("UPTIMER_TEST_SECRET_SIGNING", "s3cret");

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (_tmp, store) = test_store();
        channel(
            &store,
            json!({
                "url": server.uri(),
                "signing": {"enabled": true, "secret_ref": "UPTIMER_TEST_SECRET_SIGNING"}
            }),
        );
        let notifier = Notifier::new(store.clone(), 5);
        notifier.dispatch(&down_event(), 1700000000).await;

        let requests = server.received_requests().await.unwrap();
        let request = &requests[0];
        let timestamp: i64 = request.headers[TIMESTAMP_HEADER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(timestamp, 1700000000);
        let signature = request.headers[SIGNATURE_HEADER].to_str().unwrap();
        let hex = signature.strip_prefix("sha256=").unwrap();
        let body = String::from_utf8(request.body.clone()).unwrap();
        assert!(verify_signature(b"s3cret", timestamp, &body, hex));
    }

    #[tokio::test]
    async fn test_param_payload_goes_to_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("event", "monitor.down"))
            .and(query_param("monitor_name", "API"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (_tmp, store) = test_store();
        let ch = channel(
            &store,
            json!({"url": server.uri(), "method": "GET", "payload_type": "param"}),
        );
        let notifier = Notifier::new(store.clone(), 5);

        let event = down_event();
        notifier.dispatch(&event, 1000).await;
        let delivery = store.get_delivery(&event.event_key, ch.id).unwrap().unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Success);
    }

    #[tokio::test]
    async fn test_form_payload_encoding() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("event=monitor.down"))
            .and(body_string_contains("monitor_name=API"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (_tmp, store) = test_store();
        channel(
            &store,
            json!({"url": server.uri(), "payload_type": "x-www-form-urlencoded"}),
        );
        let notifier = Notifier::new(store.clone(), 5);
        notifier.dispatch(&down_event(), 1000).await;
    }

    #[tokio::test]
    async fn test_templates_render_into_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let (_tmp, store) = test_store();
        channel(
            &store,
            json!({
                "url": server.uri(),
                "message_template": "{monitor_name} failed with {error}",
                "payload_template": {"text": "{message}", "kind": "{event}"}
            }),
        );
        let notifier = Notifier::new(store.clone(), 5);
        notifier.dispatch(&down_event(), 1000).await;

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(
            body,
            json!({"text": "API failed with connect_refused", "kind": "monitor.down"})
        );
    }
}
