//! Converges the provider's hooks onto the endpoint spec.
//!
//! A run lists the remote hooks once, removes the ones left behind by earlier
//! tunnels (or all of them, on request), then creates one hook per declared
//! route against the current public URL. Every batch awaits all of its items
//! and reports each outcome; one failing hook never stops its siblings.

use crate::endpoint_spec::EndpointSpec;
use crate::error::{Operation, ReconcileError, RemoteError};
use crate::github::HookClient;
use crate::logging::Logger;
use crate::types::HookRecord;
use futures::future::join_all;
use std::sync::Arc;
use url::Url;

/// How a remote hook url is matched against a route name when pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchRule {
    /// `config.url` contains `{tunnel_domain}/{route}` anywhere.
    #[default]
    Substring,
    /// Host, with any explicit port, is the tunnel domain (or a subdomain of
    /// it) and the first path segment equals the route exactly.
    PathSegment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Deleted,
    /// Delete answered 404: the hook is already gone.
    AlreadyAbsent,
    Created(u64),
}

#[derive(Debug)]
pub struct ItemResult {
    /// Hook url (deletes) or route name (creates).
    pub target: String,
    pub outcome: Result<Applied, ReconcileError>,
}

#[derive(Debug)]
pub struct BatchReport {
    pub operation: Operation,
    pub items: Vec<ItemResult>,
}

impl BatchReport {
    fn empty(operation: Operation) -> Self {
        Self {
            operation,
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.outcome.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemResult> {
        self.items.iter().filter(|i| i.outcome.is_err())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

pub struct Reconciler {
    client: Arc<dyn HookClient>,
    logger: Logger,
    tunnel_domain: String,
    match_rule: MatchRule,
    hooks: Vec<HookRecord>,
    is_setup: bool,
}

impl Reconciler {
    pub fn new(client: Arc<dyn HookClient>, logger: Logger, tunnel_domain: impl Into<String>) -> Self {
        Self {
            client,
            logger,
            tunnel_domain: tunnel_domain.into(),
            match_rule: MatchRule::default(),
            hooks: Vec::new(),
            is_setup: false,
        }
    }

    pub fn with_match_rule(mut self, rule: MatchRule) -> Self {
        self.match_rule = rule;
        self
    }

    /// Snapshot taken by the last `initialize()`.
    pub fn hooks(&self) -> &[HookRecord] {
        &self.hooks
    }

    /// Lists every remote hook. Must complete before any other operation.
    pub async fn initialize(&mut self) -> Result<usize, ReconcileError> {
        let hooks = self
            .client
            .list_hooks()
            .await
            .map_err(|source| self.remote_error(Operation::List, "hooks".into(), source))?;
        self.logger.debug(format!(
            "Loaded {} existing hook(s) from {}",
            hooks.len(),
            self.client.scope()
        ));
        self.hooks = hooks;
        self.is_setup = true;
        Ok(self.hooks.len())
    }

    /// Deletes hooks whose url points at a previous tunnel for one of `routes`.
    pub async fn prune_stale(&self, routes: &[&str]) -> Result<BatchReport, ReconcileError> {
        self.ensure_setup()?;

        let stale: Vec<&HookRecord> = self
            .hooks
            .iter()
            .filter(|hook| match hook.url() {
                Some(url) => {
                    self.logger.debug(format!(
                        "Comparing {url} with {}/{}",
                        self.tunnel_domain,
                        routes.join("|")
                    ));
                    routes.iter().any(|route| self.is_stale(url, route))
                }
                None => false,
            })
            .collect();

        Ok(self.delete_all(stale).await)
    }

    /// Deletes every remote hook, whatever it points at.
    pub async fn purge_all(&self) -> Result<BatchReport, ReconcileError> {
        self.ensure_setup()?;
        Ok(self.delete_all(self.hooks.iter().collect()).await)
    }

    /// Creates one hook per declared route against `base_url`.
    pub async fn converge(&self, base_url: &str, spec: &EndpointSpec) -> Result<BatchReport, ReconcileError> {
        self.ensure_setup()?;

        let creates = spec.declarations().map(move |decl| async move {
            let config = decl.hook_config(base_url);
            self.logger.debug(format!("Creating {}", config.url));
            let outcome = match self.client.create_hook(&config).await {
                Ok(hook) => {
                    self.logger.debug(format!("Created {} as hook {}", config.url, hook.id));
                    Ok(Applied::Created(hook.id))
                }
                Err(source) => Err(self.item_failed(Operation::Create, &decl.route_name, source)),
            };
            ItemResult {
                target: decl.route_name.clone(),
                outcome,
            }
        });

        let mut report = BatchReport::empty(Operation::Create);
        report.items = join_all(creates).await;
        Ok(report)
    }

    async fn delete_all(&self, hooks: Vec<&HookRecord>) -> BatchReport {
        let deletes = hooks.into_iter().map(move |hook| async move {
            let target = hook
                .url()
                .map(str::to_string)
                .unwrap_or_else(|| format!("hook {}", hook.id));
            self.logger.debug(format!("Removing {target}"));
            let outcome = match self.client.delete_hook(hook.id).await {
                Ok(()) => {
                    self.logger.debug(format!("Removed {target}"));
                    Ok(Applied::Deleted)
                }
                Err(RemoteError::NotFound) => Ok(Applied::AlreadyAbsent),
                Err(source) => Err(self.item_failed(Operation::Delete, &format!("#{}", hook.id), source)),
            };
            ItemResult { target, outcome }
        });

        let mut report = BatchReport::empty(Operation::Delete);
        report.items = join_all(deletes).await;
        report
    }

    fn is_stale(&self, url: &str, route: &str) -> bool {
        match self.match_rule {
            MatchRule::Substring => url.contains(&format!("{}/{route}", self.tunnel_domain)),
            MatchRule::PathSegment => {
                let Ok(parsed) = Url::parse(url) else {
                    return false;
                };
                let Some(host) = parsed.host_str() else {
                    return false;
                };
                let authority = match parsed.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_string(),
                };
                let host_matches = authority == self.tunnel_domain
                    || authority.ends_with(&format!(".{}", self.tunnel_domain));
                let first_segment = parsed.path_segments().and_then(|mut s| s.next());
                host_matches && first_segment == Some(route)
            }
        }
    }

    fn ensure_setup(&self) -> Result<(), ReconcileError> {
        if self.is_setup {
            return Ok(());
        }
        self.logger.error("Reconciler used before initialize()");
        Err(ReconcileError::NotSetup)
    }

    fn remote_error(&self, operation: Operation, target: String, source: RemoteError) -> ReconcileError {
        ReconcileError::Remote {
            operation,
            target,
            scope: self.client.scope(),
            source,
        }
    }

    fn item_failed(&self, operation: Operation, target: &str, source: RemoteError) -> ReconcileError {
        let err = self.remote_error(operation, target.to_string(), source);
        let hint = if err.remote().is_some_and(RemoteError::is_transient) {
            " (transient, safe to rerun)"
        } else {
            ""
        };
        self.logger.warning(format!("{err}{hint}"));
        err
    }
}

/// Cleanup batch (absent when the repository had no hooks) and create batch
/// of one full run.
#[derive(Debug)]
pub struct RunReport {
    pub removed: Option<BatchReport>,
    pub created: BatchReport,
}

/// One full run: list, then purge (`clear`) or prune, then converge.
/// Every delete completes before the first create is issued.
pub async fn reconcile(
    reconciler: &mut Reconciler,
    spec: &EndpointSpec,
    base_url: &str,
    clear: bool,
) -> Result<RunReport, ReconcileError> {
    let existing = reconciler.initialize().await?;
    for hook in reconciler.hooks() {
        reconciler.logger.debug(format!(
            "Existing hook {} ({}, active: {}, events: {}) -> {}",
            hook.id,
            hook.name,
            hook.active,
            hook.events.join(","),
            hook.url().unwrap_or("no url")
        ));
    }

    let removed = if existing == 0 {
        None
    } else if clear {
        reconciler.logger.notice(format!(
            "Clearing all {existing} hook(s) on {}",
            reconciler.client.scope()
        ));
        Some(reconciler.purge_all().await?)
    } else {
        Some(reconciler.prune_stale(&spec.route_names()).await?)
    };

    let created = reconciler.converge(base_url, spec).await?;
    Ok(RunReport { removed, created })
}
