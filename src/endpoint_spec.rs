//! Declarative endpoint spec: which routes exist locally and which events
//! each route's hook subscribes to.
//!
//! The spec file is a JSON object keyed by route name:
//!
//! ```json
//! {
//!   "slow": {
//!     "verb": "post",
//!     "content_type": "json",
//!     "callback": "slow",
//!     "events": ["*"],
//!     "url_params": { "duration": 10000 }
//!   }
//! }
//! ```

use crate::handlers::Callback;
use crate::types::{ContentType, HookConfig};
use indexmap::IndexMap;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const REQUIRED_KEYS: [&str; 4] = ["content_type", "callback", "verb", "events"];

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("failed to read spec file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse spec: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("route {route} in spec is missing required key(s): {}", .missing.join(", "))]
    MissingKeys {
        route: String,
        missing: Vec<&'static str>,
    },

    #[error("route {route} in spec is invalid: {reason}")]
    Invalid { route: String, reason: String },

    #[error("spec declares no routes")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl FromStr for Verb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Verb::Get),
            "post" => Ok(Verb::Post),
            "put" => Ok(Verb::Put),
            "patch" => Ok(Verb::Patch),
            "delete" => Ok(Verb::Delete),
            other => Err(format!("unsupported verb '{other}'")),
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointDeclaration {
    pub route_name: String,
    pub verb: Verb,
    pub content_type: ContentType,
    pub events: Vec<String>,
    pub callback: Callback,
    /// Parameter name -> literal default, in declaration order.
    pub url_params: IndexMap<String, String>,
    pub secret: Option<String>,
}

impl EndpointDeclaration {
    /// `{base}/{route}[/{param_value}]*`
    pub fn hook_url(&self, base_url: &str) -> String {
        let mut url = format!("{}/{}", base_url.trim_end_matches('/'), self.route_name);
        for value in self.url_params.values() {
            url.push('/');
            url.push_str(value);
        }
        url
    }

    pub fn hook_config(&self, base_url: &str) -> HookConfig {
        HookConfig {
            url: self.hook_url(base_url),
            content_type: self.content_type,
            events: self.events.clone(),
            secret: self.secret.clone(),
        }
    }

    /// Local route in axum syntax: `/{route}[/{param}]*`.
    pub fn route_path(&self) -> String {
        let mut path = format!("/{}", self.route_name);
        for name in self.url_params.keys() {
            path.push_str("/{");
            path.push_str(name);
            path.push('}');
        }
        path
    }
}

#[derive(Debug, Clone, Default)]
pub struct EndpointSpec {
    routes: IndexMap<String, EndpointDeclaration>,
}

#[derive(Deserialize)]
struct RawDeclaration {
    verb: Option<String>,
    content_type: Option<String>,
    callback: Option<String>,
    events: Option<Vec<String>>,
    url_params: Option<IndexMap<String, serde_json::Value>>,
    secret: Option<String>,
    /// Name of an environment variable holding the secret.
    secret_env: Option<String>,
}

impl EndpointSpec {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SpecError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SpecError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, SpecError> {
        let raw: IndexMap<String, RawDeclaration> = serde_json::from_str(content)?;
        if raw.is_empty() {
            return Err(SpecError::Empty);
        }

        let mut routes = IndexMap::with_capacity(raw.len());
        for (route, decl) in raw {
            let parsed = validate(&route, decl)?;
            routes.insert(route, parsed);
        }
        Ok(Self { routes })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn get(&self, route: &str) -> Option<&EndpointDeclaration> {
        self.routes.get(route)
    }

    pub fn route_names(&self) -> Vec<&str> {
        self.routes.keys().map(String::as_str).collect()
    }

    pub fn declarations(&self) -> impl Iterator<Item = &EndpointDeclaration> {
        self.routes.values()
    }
}

fn validate(route: &str, raw: RawDeclaration) -> Result<EndpointDeclaration, SpecError> {
    let invalid = |reason: String| SpecError::Invalid {
        route: route.to_string(),
        reason,
    };

    let missing: Vec<&'static str> = REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|key| match *key {
            "content_type" => raw.content_type.is_none(),
            "callback" => raw.callback.is_none(),
            "verb" => raw.verb.is_none(),
            "events" => raw.events.is_none(),
            _ => false,
        })
        .collect();
    if !missing.is_empty() {
        return Err(SpecError::MissingKeys {
            route: route.to_string(),
            missing,
        });
    }

    if !is_path_segment(route) {
        return Err(invalid("route name must be a single non-empty path segment".into()));
    }

    let verb = raw.verb.unwrap_or_default().parse::<Verb>().map_err(invalid)?;
    let content_type = match raw.content_type.unwrap_or_default().to_ascii_lowercase().as_str() {
        "json" => ContentType::Json,
        "form" => ContentType::Form,
        other => return Err(invalid(format!("unsupported content_type '{other}'"))),
    };
    let callback = raw
        .callback
        .unwrap_or_default()
        .parse::<Callback>()
        .map_err(invalid)?;

    let events = raw.events.unwrap_or_default();
    if events.is_empty() {
        return Err(invalid("events must list at least one event name".into()));
    }
    if events.iter().any(|e| e.trim().is_empty()) {
        return Err(invalid("event names must not be blank".into()));
    }

    let mut url_params = IndexMap::new();
    for (name, value) in raw.url_params.unwrap_or_default() {
        if !is_path_segment(&name) {
            return Err(invalid(format!("url_params name '{name}' is not a valid path segment")));
        }
        let literal = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            other => {
                return Err(invalid(format!(
                    "url_params value for '{name}' must be a string, number or bool, got {other}"
                )))
            }
        };
        if !is_path_segment(&literal) {
            return Err(invalid(format!("url_params value for '{name}' is not a valid path segment")));
        }
        url_params.insert(name, literal);
    }

    let secret = match (raw.secret, raw.secret_env) {
        (Some(secret), _) => Some(secret),
        (None, Some(var)) => match std::env::var(&var) {
            Ok(value) if !value.is_empty() => Some(value),
            _ => return Err(invalid(format!("secret_env variable {var} is not set"))),
        },
        (None, None) => None,
    };

    Ok(EndpointDeclaration {
        route_name: route.to_string(),
        verb,
        content_type,
        events,
        callback,
        url_params,
        secret,
    })
}

fn is_path_segment(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with([':', '*'])
        && !s
            .chars()
            .any(|c| c == '/' || c == '{' || c == '}' || c == '?' || c == '#' || c.is_whitespace())
}
