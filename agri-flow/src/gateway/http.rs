//! HTTP transport for the four external capabilities.
//!
//! Classifier, prescriber and vendor directory take a JSON body and answer
//! with JSON. The insurance backend is a tool-call endpoint: it receives
//! `{"name": <action>, "arguments": {...}}` and answers with typed content
//! blocks, which are returned untouched for the insurance node to interpret.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tracing::debug;

use super::{ToolError, ToolName, ToolTransport};
use crate::{
    config::ToolEndpoints,
    error::{FlowError, Result},
};

pub struct HttpToolTransport {
    client: Client,
    endpoints: ToolEndpoints,
}

impl HttpToolTransport {
    pub fn new(endpoints: ToolEndpoints) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("agri-flow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FlowError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, endpoints })
    }

    fn base_url(&self, tool: ToolName) -> &str {
        let base = match tool {
            ToolName::Classify => &self.endpoints.classifier,
            ToolName::Prescribe => &self.endpoints.prescriber,
            ToolName::Insure => &self.endpoints.insurance,
            ToolName::FindVendor => &self.endpoints.vendors,
        };
        base.trim_end_matches('/')
    }

    fn url(&self, tool: ToolName) -> String {
        let path = match tool {
            ToolName::Classify => "classify",
            ToolName::Prescribe => "prescribe",
            ToolName::Insure => "tools/call",
            ToolName::FindVendor => "vendors/search",
        };
        format!("{}/{}", self.base_url(tool), path)
    }

    fn body(tool: ToolName, arguments: &Value) -> Value {
        match tool {
            ToolName::Insure => {
                let mut call_arguments = arguments.get("arguments").cloned().unwrap_or(json!({}));
                // the idempotency key travels with the tool arguments
                if let (Some(key), Value::Object(map)) = (
                    arguments.get(super::IDEMPOTENCY_KEY_ARG),
                    &mut call_arguments,
                ) {
                    map.insert(super::IDEMPOTENCY_KEY_ARG.to_string(), key.clone());
                }
                json!({
                    "name": arguments.get("action").cloned().unwrap_or(Value::Null),
                    "arguments": call_arguments,
                })
            }
            _ => arguments.clone(),
        }
    }
}

#[async_trait]
impl ToolTransport for HttpToolTransport {
    async fn call(&self, tool: ToolName, arguments: &Value) -> std::result::Result<Value, ToolError> {
        let url = self.url(tool);
        debug!(tool = %tool, url = %url, "Sending tool request");

        let response = self
            .client
            .post(&url)
            .json(&Self::body(tool, arguments))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::server(format!("{tool} returned {status}: {body}")));
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::client(format!("{tool} returned {status}: {body}")));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ToolError::malformed(format!("{tool} returned invalid JSON: {e}")))
    }

    async fn health(&self, tool: ToolName) -> bool {
        let url = format!("{}/health", self.base_url(tool));
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(tool = %tool, error = %e, "Health probe failed");
                false
            }
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ToolError {
    if e.is_timeout() {
        ToolError::timeout(e.to_string())
    } else if e.is_decode() {
        ToolError::malformed(e.to_string())
    } else if e.is_builder() {
        ToolError::client(e.to_string())
    } else {
        ToolError::connection(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_built_from_base_endpoints() {
        let transport = HttpToolTransport::new(ToolEndpoints {
            classifier: "http://clf:8001/".to_string(),
            ..ToolEndpoints::default()
        })
        .unwrap();
        assert_eq!(transport.url(ToolName::Classify), "http://clf:8001/classify");
        assert_eq!(
            transport.url(ToolName::Insure),
            "http://localhost:8003/tools/call"
        );
        assert_eq!(
            transport.url(ToolName::FindVendor),
            "http://localhost:8004/vendors/search"
        );
    }

    #[test]
    fn insurance_body_is_a_tool_call() {
        let body = HttpToolTransport::body(
            ToolName::Insure,
            &json!({
                "action": "generate_certificate",
                "arguments": {"crop": "wheat"},
                "idempotency_key": "k-1"
            }),
        );
        assert_eq!(
            body,
            json!({
                "name": "generate_certificate",
                "arguments": {"crop": "wheat", "idempotency_key": "k-1"}
            })
        );
    }
}
