use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payload encoding requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Json,
    Form,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Json => "json",
            ContentType::Form => "form",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hook as the provider reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookRecord {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub config: HookRecordConfig,
}

impl HookRecord {
    pub fn url(&self) -> Option<&str> {
        self.config.url.as_deref()
    }
}

/// Non-web hooks (email, services) carry no url.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookRecordConfig {
    pub url: Option<String>,
    pub content_type: Option<String>,
    pub secret: Option<String>,
}

/// The exact configuration sent when creating a hook for one route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HookConfig {
    pub url: String,
    pub content_type: ContentType,
    pub events: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// One inbound request, as dumped to the payload logger.
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub id: String,
    pub path: String,
    pub received_at: DateTime<Utc>,
    pub headers: serde_json::Value,
    pub payload: serde_json::Value,
}
