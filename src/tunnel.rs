//! Publishing the local server on a public URL.

use crate::logging::Logger;
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};
use url::{Host, Url};

pub const NGROK_AGENT_API: &str = "http://127.0.0.1:4040";
const POLL_ATTEMPTS: usize = 30;
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("failed to start {bin}: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tunnel agent exited early with {0}")]
    Exited(std::process::ExitStatus),

    #[error("no public https url for port {port} after {attempts} attempts")]
    NoPublicUrl { port: u16, attempts: usize },

    #[error("invalid public url '{0}'")]
    InvalidUrl(String),
}

#[async_trait]
pub trait Tunnel: Send {
    /// Exposes `port` and returns the public base url.
    async fn open(&mut self, port: u16) -> Result<String, TunnelError>;
}

/// A url the operator already exposes by other means.
pub struct StaticTunnel {
    url: String,
}

impl StaticTunnel {
    pub fn new(url: impl Into<String>) -> Result<Self, TunnelError> {
        let url = url.into();
        match Url::parse(&url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some() => {
                Ok(Self {
                    url: url.trim_end_matches('/').to_string(),
                })
            }
            _ => Err(TunnelError::InvalidUrl(url)),
        }
    }
}

#[async_trait]
impl Tunnel for StaticTunnel {
    async fn open(&mut self, _port: u16) -> Result<String, TunnelError> {
        Ok(self.url.clone())
    }
}

/// Runs `ngrok http <port>` and reads the public url from the agent API.
/// The agent is killed when this value is dropped.
pub struct NgrokTunnel {
    bin: String,
    api_url: String,
    client: reqwest::Client,
    child: Option<Child>,
    logger: Logger,
}

#[derive(Deserialize)]
struct AgentTunnels {
    tunnels: Vec<AgentTunnel>,
}

#[derive(Deserialize)]
struct AgentTunnel {
    public_url: String,
    #[serde(default)]
    config: AgentTunnelConfig,
}

#[derive(Deserialize, Default)]
struct AgentTunnelConfig {
    #[serde(default)]
    addr: String,
}

impl NgrokTunnel {
    pub fn new(bin: impl Into<String>, logger: Logger) -> Self {
        Self {
            bin: bin.into(),
            api_url: NGROK_AGENT_API.to_string(),
            client: reqwest::Client::new(),
            child: None,
            logger,
        }
    }
}

#[async_trait]
impl Tunnel for NgrokTunnel {
    async fn open(&mut self, port: u16) -> Result<String, TunnelError> {
        let child = Command::new(&self.bin)
            .args(["http", &port.to_string(), "--log", "stdout"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TunnelError::Spawn {
                bin: self.bin.clone(),
                source,
            })?;
        self.logger
            .debug(format!("Started {} for port {port}, waiting for agent", self.bin));
        let child = self.child.insert(child);

        for attempt in 1..=POLL_ATTEMPTS {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(TunnelError::Exited(status));
            }
            match fetch_public_url(&self.client, &self.api_url, port).await {
                Some(url) => return Ok(url),
                None => {
                    self.logger
                        .debug(format!("Tunnel not ready (attempt {attempt}/{POLL_ATTEMPTS})"));
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }

        Err(TunnelError::NoPublicUrl {
            port,
            attempts: POLL_ATTEMPTS,
        })
    }
}

/// Picks the https tunnel forwarding to `port`, falling back to any https
/// tunnel when the agent reports no address.
async fn fetch_public_url(client: &reqwest::Client, api_url: &str, port: u16) -> Option<String> {
    let resp = client
        .get(format!("{}/api/tunnels", api_url.trim_end_matches('/')))
        .timeout(Duration::from_secs(2))
        .send()
        .await
        .ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let body: AgentTunnels = resp.json().await.ok()?;

    let https: Vec<&AgentTunnel> = body
        .tunnels
        .iter()
        .filter(|t| t.public_url.starts_with("https://"))
        .collect();
    let suffix = format!(":{port}");
    https
        .iter()
        .find(|t| t.config.addr.ends_with(&suffix))
        .or_else(|| https.iter().find(|t| t.config.addr.is_empty()))
        .map(|t| t.public_url.trim_end_matches('/').to_string())
}

/// The part of the tunnel host that survives a restart:
/// `abc123.ngrok.io` -> `ngrok.io`. An explicit port is kept
/// (`abc.tunnel.io:8443` -> `tunnel.io:8443`) and IP hosts are used whole.
pub fn tunnel_domain(base_url: &str) -> Option<String> {
    let parsed = Url::parse(base_url).ok()?;
    let domain = match parsed.host()? {
        Host::Domain(host) => match host.split_once('.') {
            Some((_, rest)) if rest.contains('.') => rest.to_string(),
            _ => host.to_string(),
        },
        Host::Ipv4(_) | Host::Ipv6(_) => parsed.host_str()?.to_string(),
    };
    Some(match parsed.port() {
        Some(port) => format!("{domain}:{port}"),
        None => domain,
    })
}
