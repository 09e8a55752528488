//! Controller Fetcher
//!
//! Reads the live configuration of the Clash external controller (`GET /configs`).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

const USER_AGENT: &str = concat!("cfw_helper/", env!("CARGO_PKG_VERSION"));

/// Why a single fetch failed. Every variant is transient for the poll loop.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection refused, DNS failure, timeout, or a broken body stream
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("controller answered with HTTP {0}")]
    Status(u16),

    /// Body is not a JSON object
    #[error("could not decode controller response: {0}")]
    Decode(String),
}

/// Decoded `/configs` response.
///
/// Only the fields the conditions look at are kept. A field with an
/// unexpected JSON type is treated the same as a missing one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConfigSnapshot {
    #[serde(default, deserialize_with = "lenient")]
    pub mode: Option<String>,

    #[serde(default, rename = "allow-lan", deserialize_with = "lenient")]
    pub allow_lan: Option<bool>,
}

impl ConfigSnapshot {
    /// Decodes a response body. Anything but a JSON object is rejected.
    pub fn from_slice(body: &[u8]) -> Result<Self, FetchError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))?;

        if !value.is_object() {
            return Err(FetchError::Decode(format!(
                "expected a JSON object, got {}",
                json_kind(&value)
            )));
        }

        serde_json::from_value(value).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Source of controller snapshots, one call per poll tick.
pub trait ConfigSource {
    fn fetch(&self) -> impl Future<Output = Result<ConfigSnapshot, FetchError>>;
}

/// HTTP implementation against a real controller
pub struct HttpFetcher {
    client: reqwest::Client,
    endpoint: Url,
    secret: Option<String>,
}

impl HttpFetcher {
    /// `endpoint` is the full `/configs` URL. Every request is bounded by `timeout`.
    pub fn new(endpoint: Url, secret: Option<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(FetchError::Transport)?;

        Ok(Self {
            client,
            endpoint,
            secret: secret.filter(|s| !s.is_empty()),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl ConfigSource for HttpFetcher {
    async fn fetch(&self) -> Result<ConfigSnapshot, FetchError> {
        let mut request = self.client.get(self.endpoint.clone());
        if let Some(secret) = &self.secret {
            request = request.bearer_auth(secret);
        }

        let response = request.send().await.map_err(FetchError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(FetchError::Transport)?;
        debug!("Fetched {} bytes from {}", body.len(), self.endpoint);

        ConfigSnapshot::from_slice(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher_for(server: &MockServer, secret: Option<&str>) -> HttpFetcher {
        let endpoint = Url::parse(&format!("{}/configs", server.uri())).unwrap();
        HttpFetcher::new(endpoint, secret.map(str::to_owned), Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn snapshot_reads_known_fields() {
        let body = br#"{"port":7890,"mode":"Rule","allow-lan":true,"log-level":"info"}"#;
        let snapshot = ConfigSnapshot::from_slice(body).unwrap();
        assert_eq!(snapshot.mode.as_deref(), Some("Rule"));
        assert_eq!(snapshot.allow_lan, Some(true));
    }

    #[test]
    fn snapshot_tolerates_missing_and_mistyped_fields() {
        let snapshot = ConfigSnapshot::from_slice(br#"{"mode":42,"allow-lan":"yes"}"#).unwrap();
        assert_eq!(snapshot, ConfigSnapshot::default());

        let snapshot = ConfigSnapshot::from_slice(b"{}").unwrap();
        assert_eq!(snapshot, ConfigSnapshot::default());
    }

    #[test]
    fn snapshot_rejects_non_objects() {
        assert!(matches!(
            ConfigSnapshot::from_slice(br#"["global", true]"#),
            Err(FetchError::Decode(_))
        ));
        assert!(matches!(
            ConfigSnapshot::from_slice(b"mode: rule"),
            Err(FetchError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn fetch_sends_bearer_secret() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/configs"))
            .and(header("Authorization", "Bearer s3cret"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "mode": "global", "allow-lan": false })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let snapshot = fetcher_for(&server, Some("s3cret")).fetch().await.unwrap();
        assert_eq!(snapshot.mode.as_deref(), Some("global"));
        assert_eq!(snapshot.allow_lan, Some(false));
    }

    #[tokio::test]
    async fn fetch_without_secret_omits_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/configs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "mode": "rule" })))
            .mount(&server)
            .await;

        fetcher_for(&server, Some("")).fetch().await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn fetch_classifies_status_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/configs"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&server)
            .await;

        let err = fetcher_for(&server, Some("wrong")).fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Status(401)));
    }

    #[tokio::test]
    async fn fetch_classifies_decode_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/configs"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
            .mount(&server)
            .await;

        let err = fetcher_for(&server, None).fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[tokio::test]
    async fn fetch_times_out_as_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/configs"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "mode": "rule" }))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let endpoint = Url::parse(&format!("{}/configs", server.uri())).unwrap();
        let fetcher = HttpFetcher::new(endpoint, None, Duration::from_millis(200)).unwrap();

        let err = fetcher.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }

    #[tokio::test]
    async fn fetch_reports_refused_connection_as_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = Url::parse(&format!("http://127.0.0.1:{}/configs", port)).unwrap();
        let fetcher = HttpFetcher::new(endpoint, None, Duration::from_secs(2)).unwrap();

        let err = fetcher.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }
}
