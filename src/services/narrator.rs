use crate::core::narrative::{NarrativeError, NarrativeReasonProvider, NarrativeRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Narrative reason provider backed by an external text-generation service
///
/// POSTs the pairing summary as JSON to `{endpoint}` and expects
/// `{"reason": "..."}` back.
pub struct HttpNarrator {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpNarrator {
    /// Create a new narrator; `request_timeout` bounds each HTTP call
    pub fn new(endpoint: String, api_key: Option<String>, request_timeout: Duration) -> Result<Self, NarrativeError> {
        let client = Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            endpoint,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl NarrativeReasonProvider for HttpNarrator {
    async fn narrate(&self, request: &NarrativeRequest) -> Result<String, NarrativeError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(NarrativeError::ApiError(format!(
                "Narrative request failed: {}",
                response.status()
            )));
        }

        let json: Value = response.json().await?;
        json.get("reason")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| NarrativeError::InvalidResponse("Missing reason field".into()))
    }
}
