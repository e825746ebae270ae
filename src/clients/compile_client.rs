use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::CompileError;
use crate::models::CompileRequest;

/// Posts the current document to the compilation service.
///
/// One request per call. No retries, and no timeout unless one is configured.
#[derive(Debug, Clone)]
pub struct CompileClient {
    client: Client,
    endpoint: String,
    timeout: Option<Duration>,
}

impl CompileClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// `None` when no compilation endpoint is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let endpoint = config.compile_url.as_ref()?;
        let client = Self::new(endpoint.clone());
        Some(match config.compile_timeout() {
            Some(timeout) => client.with_timeout(timeout),
            None => client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn submit(&self, code: &str, language: &str) -> Result<String, CompileError> {
        let body = CompileRequest {
            code: code.to_string(),
            language: language.to_string(),
        };
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        debug!("Submitting {} bytes of {} to {}", code.len(), language, self.endpoint);
        let response = request.send().await.map_err(|e| {
            warn!("Compile request to {} failed: {}", self.endpoint, e);
            CompileError::Failed(Some(e))
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| CompileError::Failed(Some(e)))?;
        if status.is_success() {
            Ok(output_from_body(text))
        } else {
            warn!("Compile service answered {}", status);
            Err(error_from_body(status.as_u16(), &text))
        }
    }

    /// The literal text to show as program output, success or not.
    pub async fn submit_for_display(&self, code: &str, language: &str) -> String {
        match self.submit(code, language).await {
            Ok(output) => output,
            Err(e) => e.to_string(),
        }
    }
}

fn output_from_body(text: String) -> String {
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(body)) => match body.get("output") {
            Some(Value::String(output)) => output.clone(),
            Some(Value::Null) | None => Value::Object(body).to_string(),
            Some(other) => other.to_string(),
        },
        Ok(other) => other.to_string(),
        Err(_) => text,
    }
}

fn error_from_body(status: u16, text: &str) -> CompileError {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(body)) => match body.get("error") {
            Some(Value::String(message)) => CompileError::Rejected {
                status,
                message: message.clone(),
            },
            _ => CompileError::Failed(None),
        },
        _ => CompileError::Failed(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_output_is_returned_verbatim() {
        assert_eq!(output_from_body(r#"{"output":"1\n"}"#.to_string()), "1\n");
    }

    #[test]
    fn body_without_output_is_serialized_whole() {
        assert_eq!(output_from_body(r#"{"stdout":"hi"}"#.to_string()), r#"{"stdout":"hi"}"#);
        assert_eq!(output_from_body(r#"{"output":[1,2]}"#.to_string()), "[1,2]");
        assert_eq!(output_from_body("plain text".to_string()), "plain text");
    }

    #[test]
    fn error_message_becomes_display_text() {
        let err = error_from_body(400, r#"{"error":"syntax error"}"#);
        assert_eq!(err.to_string(), "syntax error");
        assert!(matches!(err, CompileError::Rejected { status: 400, .. }));

        assert_eq!(error_from_body(500, "<html>").to_string(), "An error occurred");
        assert_eq!(error_from_body(500, r#"{"error":7}"#).to_string(), "An error occurred");
    }

    #[test]
    fn from_config_requires_endpoint() {
        assert!(CompileClient::from_config(&Config::default()).is_none());
        let config = Config {
            compile_url: Some("http://127.0.0.1:9/compile".to_string()),
            compile_timeout_secs: Some(2),
            ..Config::default()
        };
        let client = CompileClient::from_config(&config).unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:9/compile");
        assert_eq!(client.timeout, Some(Duration::from_secs(2)));
    }
}
