//! Built-in route callbacks a spec can point at by name.

use crate::logging::SeverityRouter;
use axum::http::StatusCode;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_SLOW_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callback {
    /// 200 `OK`.
    Ok,
    /// 200 `SUCCESS: OK`.
    Success,
    /// Always 500, for exercising provider redelivery.
    Error,
    /// Sleeps for the `duration` path param (ms) before answering 200.
    Slow,
}

impl FromStr for Callback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ok" => Ok(Callback::Ok),
            "success" => Ok(Callback::Success),
            "error" => Ok(Callback::Error),
            "slow" => Ok(Callback::Slow),
            other => Err(format!(
                "unknown callback '{other}', expected one of ok, success, error, slow"
            )),
        }
    }
}

impl Callback {
    pub fn name(self) -> &'static str {
        match self {
            Callback::Ok => "ok",
            Callback::Success => "success",
            Callback::Error => "error",
            Callback::Slow => "slow",
        }
    }

    pub async fn respond(
        self,
        params: &HashMap<String, String>,
        logger: &SeverityRouter,
    ) -> (StatusCode, &'static str) {
        match self {
            Callback::Ok => (StatusCode::OK, "OK"),
            Callback::Success => {
                logger.debug("SUCCESS: Payload received...");
                (StatusCode::OK, "SUCCESS: OK")
            }
            Callback::Error => {
                logger.debug("ERROR: Payload received, erroring...");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "ERROR: *explosion* This seems fine....",
                )
            }
            Callback::Slow => {
                let ms = params
                    .get("duration")
                    .and_then(|d| d.parse::<u64>().ok())
                    .unwrap_or(DEFAULT_SLOW_MS);
                logger.debug(format!("SLOW: Sleeping for {ms}ms..."));
                tokio::time::sleep(Duration::from_millis(ms)).await;
                logger.debug("SLOW: Waking up, sending 200 OK back");
                (StatusCode::OK, "OK")
            }
        }
    }
}
