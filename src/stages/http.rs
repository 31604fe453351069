//! HTTP client adapter for remote stage services.
//!
//! Endpoint: POST with the stage request as the JSON body
//! Auth: optional Bearer token
//!
//! The remote service answers with the stage envelope
//! `{ "status": "ok"|"error", "payload"?, "error_code"?, "error_message"? }`.
//! Transport and protocol outcomes are classified into `StageFailure` so
//! the retry policy treats a remote stage exactly like a local one.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{StageFailure, StageOutput, StageRequest, StageService};

/// Delegates one stage to an external service
pub struct HttpStage {
    name: String,
    url: String,
    token: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

/// Wire response from a remote stage service
#[derive(Debug, Serialize, Deserialize)]
pub struct StageEnvelope {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl HttpStage {
    /// Create a client for one stage endpoint
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            token: None,
            timeout,
            client,
        })
    }

    /// Attach a bearer token sent with every request
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn classify_envelope(&self, envelope: StageEnvelope) -> Result<StageOutput, StageFailure> {
        match envelope.status.as_str() {
            "ok" => match envelope.payload {
                Some(payload) => Ok(StageOutput::new(payload)),
                None => Err(StageFailure::malformed(format!(
                    "{} answered ok without a payload",
                    self.name
                ))),
            },
            "error" => {
                let message = envelope
                    .error_message
                    .unwrap_or_else(|| "no error message".to_string());
                match envelope.error_code.as_deref() {
                    Some("throttled") => Err(StageFailure::throttled(message)),
                    Some("unavailable") => Err(StageFailure::unavailable(message)),
                    Some("timeout") => Err(StageFailure::Timeout {
                        timeout_secs: self.timeout.as_secs(),
                    }),
                    Some("validation") => Err(StageFailure::validation(message)),
                    Some("rejected") => Err(StageFailure::rejected(message)),
                    other => Err(StageFailure::malformed(format!(
                        "unknown error code {:?} from {}: {}",
                        other, self.name, message
                    ))),
                }
            }
            other => Err(StageFailure::malformed(format!(
                "unknown envelope status '{}' from {}",
                other, self.name
            ))),
        }
    }
}

#[async_trait]
impl StageService for HttpStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: &StageRequest) -> Result<StageOutput, StageFailure> {
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(token) = &self.token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                return Err(StageFailure::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                })
            }
            Err(err) => {
                return Err(StageFailure::unavailable(format!("{}: {}", self.url, err)))
            }
        };

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(StageFailure::throttled(format!(
                "{} returned 429",
                self.url
            )));
        }
        if status.is_server_error() {
            return Err(StageFailure::unavailable(format!(
                "{} returned {}",
                self.url, status
            )));
        }
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(StageFailure::rejected(format!(
                "{} returned {}: {}",
                self.url, status, text
            )));
        }

        match response.json::<StageEnvelope>().await {
            Ok(envelope) => self.classify_envelope(envelope),
            Err(err) => Err(StageFailure::malformed(format!(
                "undecodable response from {}: {}",
                self.url, err
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stage() -> HttpStage {
        HttpStage::new("damage", "http://localhost:9/stage", Duration::from_secs(5)).unwrap()
    }

    fn envelope(body: Value) -> StageEnvelope {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_ok_envelope_yields_payload() {
        let output = stage()
            .classify_envelope(envelope(json!({
                "status": "ok",
                "payload": { "damage_detected": true }
            })))
            .unwrap();

        assert_eq!(output.payload["damage_detected"], true);
    }

    #[test]
    fn test_ok_without_payload_is_malformed() {
        let err = stage()
            .classify_envelope(envelope(json!({ "status": "ok" })))
            .unwrap_err();

        assert!(matches!(err, StageFailure::MalformedResponse { .. }));
    }

    #[test]
    fn test_error_codes_map_to_failure_kinds() {
        let cases = [
            ("throttled", "throttled"),
            ("unavailable", "unavailable"),
            ("timeout", "timeout"),
            ("validation", "validation"),
            ("rejected", "rejected"),
        ];

        for (code, expected_kind) in cases {
            let err = stage()
                .classify_envelope(envelope(json!({
                    "status": "error",
                    "error_code": code,
                    "error_message": "boom"
                })))
                .unwrap_err();
            assert_eq!(err.kind(), expected_kind, "code {code}");
        }
    }

    #[test]
    fn test_unknown_error_code_is_malformed() {
        let err = stage()
            .classify_envelope(envelope(json!({
                "status": "error",
                "error_code": "teapot",
                "error_message": "short and stout"
            })))
            .unwrap_err();

        assert!(matches!(err, StageFailure::MalformedResponse { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unknown_status_is_malformed() {
        let err = stage()
            .classify_envelope(envelope(json!({ "status": "maybe" })))
            .unwrap_err();

        assert!(matches!(err, StageFailure::MalformedResponse { .. }));
    }

    #[test]
    fn test_envelope_fields_default_when_absent() {
        let envelope: StageEnvelope =
            serde_json::from_str(r#"{ "status": "error" }"#).unwrap();

        assert_eq!(envelope.status, "error");
        assert!(envelope.payload.is_none());
        assert!(envelope.error_code.is_none());
        assert!(envelope.error_message.is_none());
    }
}
