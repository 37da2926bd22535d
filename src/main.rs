mod cli;
mod endpoint_spec;
mod error;
mod github;
mod handlers;
mod http_server;
mod logging;
mod reconciler;
mod tunnel;
mod types;

use anyhow::{anyhow, Context};
use clap::Parser;
use endpoint_spec::EndpointSpec;
use github::{GitHubClient, GitHubConfig};
use logging::{Severity, SeverityRouter};
use reconciler::{reconcile, Applied, BatchReport, MatchRule, Reconciler};
use std::sync::Arc;
use tunnel::{NgrokTunnel, StaticTunnel, Tunnel};

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = cli::Args::parse();

    let logger = args.app_logger().context("failed to set up application logger")?;
    let payload_logger = args.payload_logger().context("failed to set up payload logger")?;
    if payload_logger.sink_count(Severity::Info) == 0 {
        logger.notice("Payload dumps are disabled (no console or hookfile sink)");
    }

    let spec = EndpointSpec::from_path(&args.spec)
        .inspect_err(|e| logger.error(e))
        .with_context(|| format!("invalid endpoint spec {}", args.spec.display()))?;
    logger.info(format!(
        "Loaded {} route(s) from {}: {}",
        spec.len(),
        args.spec.display(),
        spec.route_names().join(", ")
    ));

    // ─── Serve and publish ───────────────────────────────────────────────────

    let app = http_server::router(&spec, logger.clone(), payload_logger);
    let (port, server) = http_server::start(args.port, app, logger.clone())
        .await
        .map_err(|e| anyhow!(e))?;

    let mut tunnel: Box<dyn Tunnel> = match &args.public_url {
        Some(url) => Box::new(StaticTunnel::new(url.clone())?),
        None => Box::new(NgrokTunnel::new(&args.ngrok_bin, logger.clone())),
    };
    let base_url = tunnel.open(port).await.context("failed to open tunnel")?;
    logger.notice(format!("Public url: {base_url}"));

    let tunnel_domain = args
        .tunnel_domain
        .clone()
        .or_else(|| tunnel::tunnel_domain(&base_url))
        .ok_or_else(|| anyhow!("cannot derive a tunnel domain from {base_url}, pass --tunnel-domain"))?;
    logger.debug(format!("Stale hooks are recognised by domain {tunnel_domain}"));

    // ─── Reconcile ───────────────────────────────────────────────────────────

    let client = GitHubClient::new(
        GitHubConfig {
            api_url: args.api_url.clone(),
            owner: args.repo.owner.clone(),
            repo: args.repo.repo.clone(),
            token: args.token.clone(),
            timeout: args.timeout(),
        },
        logger.clone(),
    )
    .context("failed to build GitHub client")?;

    let match_rule = if args.strict_match {
        MatchRule::PathSegment
    } else {
        MatchRule::Substring
    };
    let mut reconciler =
        Reconciler::new(Arc::new(client), logger.clone(), tunnel_domain).with_match_rule(match_rule);

    let run = reconcile(&mut reconciler, &spec, &base_url, args.clear)
        .await
        .with_context(|| format!("failed to reconcile hooks for {}", args.repo))?;
    if let Some(removed) = &run.removed {
        log_report(&logger, removed);
    }
    let created = run.created;
    log_report(&logger, &created);

    for item in &created.items {
        if let (Ok(Applied::Created(id)), Some(decl)) = (&item.outcome, spec.get(&item.target)) {
            logger.notice(format!(
                "{} {} -> {} (hook {id})",
                decl.verb,
                decl.hook_url(&base_url),
                decl.callback.name()
            ));
        }
    }

    server.await.context("HTTP server task failed")?;
    drop(tunnel);
    Ok(())
}

/// Per-item outcomes at info; a batch with failures gets one warning line.
/// The failures themselves were already logged where they happened.
fn log_report(logger: &SeverityRouter, report: &BatchReport) {
    for item in &report.items {
        match &item.outcome {
            Ok(Applied::Deleted) => logger.info(format!("Removed {}", item.target)),
            Ok(Applied::AlreadyAbsent) => logger.info(format!("{} was already gone", item.target)),
            Ok(Applied::Created(_)) | Err(_) => {}
        }
    }

    if !report.is_clean() {
        logger.warning(format!(
            "{} failed for {} item(s), {} of {} succeeded; the server keeps running",
            report.operation,
            report.failures().count(),
            report.succeeded(),
            report.len()
        ));
    }
}
