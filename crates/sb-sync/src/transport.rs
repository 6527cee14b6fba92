//! Transports to the ingest service.

use std::time::Duration;

use sb_queue::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::protocol::{IngestBody, IngestResponse};
use crate::{SyncError, SyncResult};

/// Delivers batches to the remote service.
///
/// Implementations must not acknowledge anything locally; they only report
/// what the remote side said.
pub trait IngestTransport {
    fn send_batch(&mut self, stream: Stream, body: &IngestBody) -> SyncResult<IngestResponse>;

    /// Tell the remote side the stream is alive but has nothing to send.
    fn send_heartbeat(&mut self, stream: Stream) -> SyncResult<()>;

    /// Ask the remote side to discard this device's records.
    fn request_reset(&mut self) -> SyncResult<()>;
}

impl<T: IngestTransport + ?Sized> IngestTransport for Box<T> {
    fn send_batch(&mut self, stream: Stream, body: &IngestBody) -> SyncResult<IngestResponse> {
        (**self).send_batch(stream, body)
    }

    fn send_heartbeat(&mut self, stream: Stream) -> SyncResult<()> {
        (**self).send_heartbeat(stream)
    }

    fn request_reset(&mut self) -> SyncResult<()> {
        (**self).request_reset()
    }
}

impl<T: IngestTransport + ?Sized> IngestTransport for &mut T {
    fn send_batch(&mut self, stream: Stream, body: &IngestBody) -> SyncResult<IngestResponse> {
        (**self).send_batch(stream, body)
    }

    fn send_heartbeat(&mut self, stream: Stream) -> SyncResult<()> {
        (**self).send_heartbeat(stream)
    }

    fn request_reset(&mut self) -> SyncResult<()> {
        (**self).request_reset()
    }
}

/// Endpoint paths relative to the API base URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub tank: String,
    pub pump: String,
    pub vacuum: String,
    pub error_log: String,
    pub heartbeat: String,
    pub reset: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            tank: "ingest_tank.php".to_string(),
            pump: "ingest_pump.php".to_string(),
            vacuum: "ingest_vacuum.php".to_string(),
            error_log: "ingest_error.php".to_string(),
            heartbeat: "ingest_nodata.php".to_string(),
            reset: "reset.php".to_string(),
        }
    }
}

impl Endpoints {
    pub fn for_stream(&self, stream: Stream) -> &str {
        match stream {
            Stream::Tank => &self.tank,
            Stream::Pump => &self.pump,
            Stream::Vacuum => &self.vacuum,
            Stream::ErrorLog => &self.error_log,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub base_url: String,
    pub api_key: String,
    pub device_id: String,
    pub timeout: Duration,
    pub endpoints: Endpoints,
}

/// HTTP transport over `ureq`.
pub struct HttpTransport {
    agent: ureq::Agent,
    config: HttpConfig,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> SyncResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(SyncError::InvalidArg {
                what: "api base URL must not be empty",
            });
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.timeout)
            .timeout_read(config.timeout)
            .timeout_write(config.timeout)
            .build();
        Ok(Self { agent, config })
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    fn post(&self, endpoint: &str, body: &impl Serialize) -> SyncResult<String> {
        let url = self.url(endpoint);
        let result = self
            .agent
            .post(&url)
            .set("X-API-Key", &self.config.api_key)
            .set("X-Device-Id", &self.config.device_id)
            .send_json(body);
        match result {
            Ok(resp) => resp.into_string().map_err(|e| SyncError::Transport {
                message: format!("{url}: reading response: {e}"),
            }),
            Err(ureq::Error::Status(code, resp)) => Err(SyncError::Status {
                code,
                body: resp.into_string().unwrap_or_default(),
            }),
            Err(ureq::Error::Transport(err)) => Err(SyncError::Transport {
                message: format!("{url}: {err}"),
            }),
        }
    }
}

impl IngestTransport for HttpTransport {
    fn send_batch(&mut self, stream: Stream, body: &IngestBody) -> SyncResult<IngestResponse> {
        let text = self.post(self.config.endpoints.for_stream(stream), body)?;
        serde_json::from_str(&text).map_err(|e| SyncError::MalformedResponse {
            message: format!("{e}: {}", truncate(&text, 200)),
        })
    }

    fn send_heartbeat(&mut self, stream: Stream) -> SyncResult<()> {
        let body = json!({ "stream": stream.as_str() });
        let text = self.post(&self.config.endpoints.heartbeat, &body)?;
        let status = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v.get("status").and_then(Value::as_str).map(str::to_string));
        tracing::debug!(%stream, ?status, "heartbeat sent");
        Ok(())
    }

    fn request_reset(&mut self) -> SyncResult<()> {
        let body = json!({ "device_id": self.config.device_id });
        self.post(&self.config.endpoints.reset, &body)?;
        Ok(())
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        let transport = HttpTransport::new(HttpConfig {
            base_url: "https://sugar.example/api/".into(),
            api_key: "k".into(),
            device_id: "pump-pi".into(),
            timeout: Duration::from_secs(1),
            endpoints: Endpoints::default(),
        })
        .unwrap();
        assert_eq!(
            transport.url("/ingest_pump.php"),
            "https://sugar.example/api/ingest_pump.php"
        );
    }

    #[test]
    fn empty_base_url_is_rejected() {
        let err = HttpTransport::new(HttpConfig {
            base_url: " ".into(),
            api_key: "k".into(),
            device_id: "d".into(),
            timeout: Duration::from_secs(1),
            endpoints: Endpoints::default(),
        });
        assert!(err.is_err());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("ok", 10), "ok");
    }
}
