//! Typed views of the external tool responses.
//!
//! Backends vary in field naming, so parsing is lenient (aliases, defaults)
//! and anything that still cannot be read is reported as a malformed reply.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

use crate::{
    error::{FlowError, Result},
    gateway::ToolName,
};

/// Uploaded plant photo, kept base64-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInput {
    pub mime_type: String,
    pub data: String,
}

impl ImageInput {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: STANDARD.encode(bytes),
        }
    }

    /// Stable fingerprint used to tell whether this image was already classified.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.data.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    #[serde(alias = "label", alias = "prediction")]
    pub disease: String,
    #[serde(alias = "score", alias = "probability")]
    pub confidence: f32,
    #[serde(default, alias = "heatmap", alias = "attention_map")]
    pub attention_artifact: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prescription {
    #[serde(alias = "treatment", alias = "answer")]
    pub treatment_text: String,
    #[serde(default)]
    pub dosage: Option<String>,
    #[serde(default, alias = "safety")]
    pub safety_notes: Option<String>,
    #[serde(default)]
    pub products: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorOffer {
    #[serde(alias = "name", alias = "vendor_name")]
    pub vendor: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default, alias = "stock")]
    pub availability: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(alias = "document")]
    Resource {
        uri: String,
        #[serde(default, alias = "mimeType")]
        mime_type: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
}

/// Reply from the insurance tool-call endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsuranceReply {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, alias = "isError")]
    pub is_error: bool,
}

static PREMIUM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)premium[^0-9]{0,40}([0-9][0-9,]*(?:\.[0-9]+)?)").expect("valid premium regex")
});

static CERTIFICATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:certificate|policy)\s*(?:id|no\.?|number|reference|ref)?\s*[:#]?\s*([A-Z0-9][A-Z0-9-]{5,})")
        .expect("valid certificate regex")
});

impl InsuranceReply {
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Resource { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn document_uri(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Resource { uri, .. } => Some(uri.as_str()),
            ContentBlock::Text { .. } => None,
        })
    }

    /// First text block that is itself a JSON object.
    pub fn structured(&self) -> Option<Value> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text { text } => serde_json::from_str::<Value>(text.trim())
                .ok()
                .filter(Value::is_object),
            ContentBlock::Resource { .. } => None,
        })
    }

    pub fn premium(&self) -> Option<f64> {
        if let Some(structured) = self.structured() {
            for key in ["premium", "farmer_premium", "total_premium", "premium_amount"] {
                if let Some(value) = structured.get(key).and_then(number_like) {
                    return Some(value);
                }
            }
        }
        let text = self.text();
        let caps = PREMIUM_RE.captures(&text)?;
        caps.get(1)?.as_str().replace(',', "").parse().ok()
    }

    pub fn certificate_reference(&self) -> Option<String> {
        if let Some(structured) = self.structured() {
            for key in ["certificate_reference", "certificate_id", "policy_number", "reference"] {
                if let Some(value) = structured.get(key).and_then(Value::as_str) {
                    return Some(value.to_string());
                }
            }
        }
        let text = self.text();
        CERTIFICATE_RE
            .captures(&text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    pub fn companies(&self) -> Vec<String> {
        if let Some(list) = self
            .structured()
            .and_then(|s| s.get("companies").cloned())
            .and_then(|c| c.as_array().cloned())
        {
            return list
                .iter()
                .filter_map(|entry| {
                    entry
                        .as_str()
                        .map(str::to_string)
                        .or_else(|| entry.get("name").and_then(Value::as_str).map(str::to_string))
                })
                .collect();
        }
        self.text()
            .lines()
            .map(|line| line.trim().trim_start_matches(['-', '*', '•']).trim())
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn number_like(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.replace(',', "").parse().ok()))
}

fn malformed(tool: ToolName, detail: impl std::fmt::Display) -> FlowError {
    FlowError::tool_unavailable(tool.as_str(), format!("malformed response: {detail}"))
}

pub fn parse_diagnosis(data: Value) -> Result<Diagnosis> {
    let diagnosis: Diagnosis =
        serde_json::from_value(data).map_err(|e| malformed(ToolName::Classify, e))?;
    if !(0.0..=1.0).contains(&diagnosis.confidence) {
        return Err(malformed(
            ToolName::Classify,
            format!("confidence {} out of range", diagnosis.confidence),
        ));
    }
    Ok(diagnosis)
}

pub fn parse_prescription(data: Value) -> Result<Prescription> {
    serde_json::from_value(data).map_err(|e| malformed(ToolName::Prescribe, e))
}

pub fn parse_insurance_reply(data: Value) -> Result<InsuranceReply> {
    let reply: InsuranceReply =
        serde_json::from_value(data).map_err(|e| malformed(ToolName::Insure, e))?;
    if reply.is_error {
        return Err(FlowError::tool_unavailable(
            ToolName::Insure.as_str(),
            format!("backend reported an error: {}", reply.text()),
        ));
    }
    Ok(reply)
}

/// Accepts either a bare array of offers or `{"vendors": [...]}`.
pub fn parse_vendor_offers(data: Value) -> Result<Vec<VendorOffer>> {
    let list = match data {
        Value::Array(_) => data,
        Value::Object(mut map) => map
            .remove("vendors")
            .or_else(|| map.remove("results"))
            .ok_or_else(|| malformed(ToolName::FindVendor, "missing vendors list"))?,
        other => return Err(malformed(ToolName::FindVendor, other)),
    };
    serde_json::from_value(list).map_err(|e| malformed(ToolName::FindVendor, e))
}
