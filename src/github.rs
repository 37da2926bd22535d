//! Hook management against the GitHub REST API, scoped to one repository.

use crate::error::RemoteError;
use crate::logging::Logger;
use crate::types::{HookConfig, HookRecord};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, LINK, RETRY_AFTER, USER_AGENT};
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const PER_PAGE: usize = 100;
// A listing longer than this fails instead of returning a partial snapshot.
const MAX_PAGES: usize = 50;

/// The three calls the reconciler needs from a hook provider.
#[async_trait]
pub trait HookClient: Send + Sync {
    /// `owner/repo`, used as context in errors and logs.
    fn scope(&self) -> String;
    async fn list_hooks(&self) -> Result<Vec<HookRecord>, RemoteError>;
    async fn delete_hook(&self, id: u64) -> Result<(), RemoteError>;
    async fn create_hook(&self, config: &HookConfig) -> Result<HookRecord, RemoteError>;
}

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub api_url: String,
    pub owner: String,
    pub repo: String,
    pub token: String,
    pub timeout: Duration,
}

pub struct GitHubClient {
    client: reqwest::Client,
    hooks_url: String,
    owner: String,
    repo: String,
    logger: Logger,
}

#[derive(Serialize)]
struct CreateHookRequest<'a> {
    name: &'static str,
    active: bool,
    events: &'a [String],
    config: CreateHookConfig<'a>,
}

#[derive(Serialize)]
struct CreateHookConfig<'a> {
    url: &'a str,
    content_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret: Option<&'a str>,
    insecure_ssl: &'static str,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig, logger: Logger) -> Result<Self, RemoteError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static("2022-11-28"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("hookrelay/", env!("CARGO_PKG_VERSION"))),
        );
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| RemoteError::Auth("token contains invalid header characters".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| RemoteError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        let hooks_url = format!(
            "{}/repos/{}/{}/hooks",
            config.api_url.trim_end_matches('/'),
            config.owner,
            config.repo
        );

        Ok(Self {
            client,
            hooks_url,
            owner: config.owner,
            repo: config.repo,
            logger,
        })
    }

    async fn fetch_page(&self, url: &str) -> Result<(Vec<HookRecord>, Option<String>), RemoteError> {
        let resp = self.client.get(url).send().await.map_err(transport_error)?;
        let resp = check_status(resp).await?;
        let next = resp
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(next_link);
        let hooks = resp
            .json::<Vec<HookRecord>>()
            .await
            .map_err(|e| RemoteError::Unavailable(format!("unexpected hook list payload: {e}")))?;
        Ok((hooks, next))
    }
}

#[async_trait]
impl HookClient for GitHubClient {
    fn scope(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    async fn list_hooks(&self) -> Result<Vec<HookRecord>, RemoteError> {
        let mut hooks = Vec::new();
        let mut url = Some(format!("{}?per_page={PER_PAGE}", self.hooks_url));
        let mut pages = 0;

        while let Some(current) = url.take() {
            if pages == MAX_PAGES {
                let err = RemoteError::Unavailable(format!(
                    "hook listing still paginating after {MAX_PAGES} pages"
                ));
                self.logger
                    .error(format!("Error fetching existing hooks from {}: {err}", self.scope()));
                return Err(err);
            }
            let (page, next) = self.fetch_page(&current).await.inspect_err(|e| {
                self.logger
                    .error(format!("Error fetching existing hooks from {}: {e}", self.scope()));
            })?;
            hooks.extend(page);
            url = next;
            pages += 1;
        }

        self.logger
            .debug(format!("Fetched {} hook(s) from {}", hooks.len(), self.scope()));
        Ok(hooks)
    }

    async fn delete_hook(&self, id: u64) -> Result<(), RemoteError> {
        let url = format!("{}/{id}", self.hooks_url);
        let result = match self.client.delete(&url).send().await {
            Ok(resp) => check_status(resp).await.map(|_| ()),
            Err(e) => Err(transport_error(e)),
        };
        match &result {
            Ok(()) => self.logger.debug(format!("Deleted hook {id} from {}", self.scope())),
            // Already gone is what we wanted; the caller decides how to report it.
            Err(RemoteError::NotFound) => self
                .logger
                .debug(format!("Hook {id} already absent from {}", self.scope())),
            Err(e) => self
                .logger
                .error(format!("Error deleting hook {id} from {}: {e}", self.scope())),
        }
        result
    }

    async fn create_hook(&self, config: &HookConfig) -> Result<HookRecord, RemoteError> {
        let body = CreateHookRequest {
            name: "web",
            active: true,
            events: &config.events,
            config: CreateHookConfig {
                url: &config.url,
                content_type: config.content_type.as_str(),
                secret: config.secret.as_deref(),
                insecure_ssl: "0",
            },
        };

        let result = async {
            let resp = self
                .client
                .post(&self.hooks_url)
                .json(&body)
                .send()
                .await
                .map_err(transport_error)?;
            let resp = check_status(resp).await?;
            resp.json::<HookRecord>()
                .await
                .map_err(|e| RemoteError::Unavailable(format!("unexpected create payload: {e}")))
        }
        .await;

        match &result {
            Ok(hook) => self.logger.debug(format!(
                "Created hook {} for {} in {}",
                hook.id,
                config.url,
                self.scope()
            )),
            Err(e) => self.logger.error(format!(
                "Error creating hook {} ({} events, {}) in {}: {e}",
                config.url,
                config.events.join(","),
                config.content_type,
                self.scope()
            )),
        }
        result
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    RemoteError::Unavailable(e.to_string())
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let rate_limited = is_rate_limited(status, resp.headers());
    let body = resp.text().await.unwrap_or_default();
    let message = github_message(&body).unwrap_or(body);
    if rate_limited {
        return Err(RemoteError::Unavailable(format!("rate limited, {status}: {message}")));
    }
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            RemoteError::Auth(format!("{status}: {message}"))
        }
        StatusCode::NOT_FOUND => RemoteError::NotFound,
        StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => {
            RemoteError::ValidationRejected(format!("{status}: {message}"))
        }
        _ => RemoteError::Unavailable(format!("{status}: {message}")),
    })
}

/// GitHub answers 403 (or 429) for both primary and secondary rate limits.
fn is_rate_limited(status: StatusCode, headers: &HeaderMap) -> bool {
    if status != StatusCode::FORBIDDEN && status != StatusCode::TOO_MANY_REQUESTS {
        return false;
    }
    let exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");
    exhausted || headers.contains_key(RETRY_AFTER)
}

/// Pulls `message` plus any `errors[].message` out of a GitHub error body.
fn github_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let mut message = value.get("message")?.as_str()?.to_string();
    if let Some(errors) = value.get("errors").and_then(|e| e.as_array()) {
        let details: Vec<&str> = errors
            .iter()
            .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
            .collect();
        if !details.is_empty() {
            message.push_str(" (");
            message.push_str(&details.join("; "));
            message.push(')');
        }
    }
    Some(message)
}

/// Extracts the `rel="next"` target from an RFC 8288 `Link` header.
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| p.trim().replace(' ', "") == "rel=\"next\"");
        if !is_next {
            return None;
        }
        let target = target.trim();
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::testing::memory_logger;
    use crate::logging::LevelFilter;
    use crate::types::ContentType;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, logger: Logger) -> GitHubClient {
        GitHubClient::new(
            GitHubConfig {
                api_url: server.uri(),
                owner: "octo".into(),
                repo: "hello".into(),
                token: "t0ken".into(),
                timeout: Duration::from_secs(5),
            },
            logger,
        )
        .unwrap()
    }

    fn hook_json(id: u64, url: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "name": "web",
            "active": true,
            "events": ["*"],
            "config": { "url": url, "content_type": "json", "insecure_ssl": "0" }
        })
    }

    #[tokio::test]
    async fn list_hooks_sends_auth_and_follows_pagination() {
        let server = MockServer::start().await;
        let next = format!("<{}/repos/octo/hello/hooks?per_page=100&page=2>; rel=\"next\"", server.uri());

        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/hooks"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vec![hook_json(2, "https://b.ngrok.io/slow")]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/hooks"))
            .and(header("authorization", "Bearer t0ken"))
            .and(header("accept", "application/vnd.github+json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("link", next.as_str())
                    .set_body_json(vec![hook_json(1, "https://a.ngrok.io/webhook")]),
            )
            .mount(&server)
            .await;

        let (logger, _) = memory_logger(LevelFilter::All);
        let hooks = client_for(&server, logger).list_hooks().await.unwrap();

        let ids: Vec<u64> = hooks.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(hooks[1].url(), Some("https://b.ngrok.io/slow"));
    }

    #[tokio::test]
    async fn list_hooks_maps_401_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(serde_json::json!({"message": "Bad credentials"})),
            )
            .mount(&server)
            .await;

        let (logger, sink) = memory_logger(LevelFilter::Error);
        let err = client_for(&server, logger).list_hooks().await.unwrap_err();

        assert!(matches!(err, RemoteError::Auth(ref m) if m.contains("Bad credentials")));
        assert!(sink.contains("Error fetching existing hooks from octo/hello"));
    }

    #[tokio::test]
    async fn rate_limited_403_is_transient_but_plain_403_is_auth() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/repos/octo/hello/hooks/1"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("x-ratelimit-remaining", "0")
                    .set_body_json(serde_json::json!({"message": "API rate limit exceeded"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/repos/octo/hello/hooks/2"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("retry-after", "60")
                    .set_body_json(serde_json::json!({"message": "secondary rate limit"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/repos/octo/hello/hooks/3"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("x-ratelimit-remaining", "4999")
                    .set_body_json(serde_json::json!({"message": "Must have admin rights"})),
            )
            .mount(&server)
            .await;

        let (logger, _) = memory_logger(LevelFilter::All);
        let client = client_for(&server, logger);

        let primary = client.delete_hook(1).await.unwrap_err();
        assert!(primary.is_transient());
        assert!(primary.to_string().contains("API rate limit exceeded"));
        assert!(client.delete_hook(2).await.unwrap_err().is_transient());
        assert!(matches!(client.delete_hook(3).await, Err(RemoteError::Auth(_))));
    }

    #[tokio::test]
    async fn list_hooks_fails_instead_of_truncating_endless_pagination() {
        let server = MockServer::start().await;
        let next = format!("<{}/repos/octo/hello/hooks?per_page=100&page=2>; rel=\"next\"", server.uri());
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/hooks"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("link", next.as_str())
                    .set_body_json(vec![hook_json(1, "https://a.ngrok.io/webhook")]),
            )
            .expect(MAX_PAGES as u64)
            .mount(&server)
            .await;

        let (logger, sink) = memory_logger(LevelFilter::Error);
        let err = client_for(&server, logger).list_hooks().await.unwrap_err();

        assert!(err.is_transient());
        assert!(err.to_string().contains("50 pages"));
        assert!(sink.contains("Error fetching existing hooks from octo/hello"));
    }

    #[tokio::test]
    async fn delete_hook_maps_404_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/repos/octo/hello/hooks/9"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/repos/octo/hello/hooks/10"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let (logger, _) = memory_logger(LevelFilter::All);
        let client = client_for(&server, logger);
        assert!(matches!(client.delete_hook(9).await, Err(RemoteError::NotFound)));
        assert!(client.delete_hook(10).await.is_ok());
    }

    #[tokio::test]
    async fn delete_hook_maps_500_to_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let (logger, _) = memory_logger(LevelFilter::All);
        let err = client_for(&server, logger).delete_hook(3).await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("bad gateway"));
    }

    #[tokio::test]
    async fn create_hook_posts_github_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/octo/hello/hooks"))
            .and(body_json(serde_json::json!({
                "name": "web",
                "active": true,
                "events": ["push"],
                "config": {
                    "url": "https://abc.ngrok.io/validation",
                    "content_type": "form",
                    "secret": "shh",
                    "insecure_ssl": "0"
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(hook_json(77, "https://abc.ngrok.io/validation")))
            .expect(1)
            .mount(&server)
            .await;

        let (logger, _) = memory_logger(LevelFilter::All);
        let created = client_for(&server, logger)
            .create_hook(&HookConfig {
                url: "https://abc.ngrok.io/validation".into(),
                content_type: ContentType::Form,
                events: vec!["push".into()],
                secret: Some("shh".into()),
            })
            .await
            .unwrap();
        assert_eq!(created.id, 77);
    }

    #[tokio::test]
    async fn create_hook_maps_422_to_validation_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "message": "Validation Failed",
                "errors": [{ "resource": "Hook", "message": "Hook already exists on this repository" }]
            })))
            .mount(&server)
            .await;

        let (logger, sink) = memory_logger(LevelFilter::All);
        let err = client_for(&server, logger)
            .create_hook(&HookConfig {
                url: "https://abc.ngrok.io/webhook".into(),
                content_type: ContentType::Json,
                events: vec!["*".into()],
                secret: None,
            })
            .await
            .unwrap_err();

        match err {
            RemoteError::ValidationRejected(msg) => {
                assert!(msg.contains("Validation Failed (Hook already exists on this repository)"))
            }
            other => panic!("expected ValidationRejected, got {other:?}"),
        }
        assert!(sink.contains("Error creating hook https://abc.ngrok.io/webhook"));
    }

    #[test]
    fn next_link_picks_the_next_relation() {
        let header = r#"<https://api.github.com/x?page=3>; rel="next", <https://api.github.com/x?page=9>; rel="last""#;
        assert_eq!(next_link(header).as_deref(), Some("https://api.github.com/x?page=3"));
        assert_eq!(next_link(r#"<https://api.github.com/x?page=1>; rel="prev""#), None);
    }

    #[test]
    fn scope_is_owner_slash_repo() {
        let (logger, _) = memory_logger(LevelFilter::All);
        let client = GitHubClient::new(
            GitHubConfig {
                api_url: DEFAULT_API_URL.into(),
                owner: "octo".into(),
                repo: "hello".into(),
                token: "t".into(),
                timeout: Duration::from_secs(1),
            },
            logger,
        )
        .unwrap();
        assert_eq!(client.scope(), "octo/hello");
        assert_eq!(client.hooks_url, "https://api.github.com/repos/octo/hello/hooks");
    }
}
