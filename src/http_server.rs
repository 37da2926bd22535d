use crate::endpoint_spec::{EndpointDeclaration, EndpointSpec, Verb};
use crate::logging::Logger;
use crate::types::Delivery;
use axum::{
    body::{Body, Bytes},
    extract::{Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{on, MethodFilter, MethodRouter},
    Router,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// GitHub caps payloads at 25 MB.
const BODY_LIMIT: usize = 25 * 1024 * 1024;

#[derive(Clone)]
struct ServerState {
    logger: Logger,
    /// Receives the pretty-printed dump of every inbound request.
    payload_logger: Logger,
}

/// One route per declaration at `/{route}[/{param}]*`, answering the
/// declared verb with its callback and GET with a plain `200 OK`.
pub fn router(spec: &EndpointSpec, logger: Logger, payload_logger: Logger) -> Router {
    let state = ServerState {
        logger,
        payload_logger,
    };

    let mut app = Router::new();
    for decl in spec.declarations() {
        let path = decl.route_path();
        state
            .logger
            .debug(format!("Routing {} {path} to '{}'", decl.verb, decl.callback.name()));
        app = app.route(&path, method_router(decl));
    }

    app.layer(middleware::from_fn_with_state(state.clone(), log_payload))
        .with_state(state)
}

fn method_router(decl: &EndpointDeclaration) -> MethodRouter<ServerState> {
    let callback = decl.callback;
    let filter = method_filter(decl.verb);

    // A route without params has nothing for `Path` to extract.
    let routed = if decl.url_params.is_empty() {
        on(filter, move |State(state): State<ServerState>| async move {
            callback.respond(&HashMap::new(), &state.logger).await
        })
    } else {
        on(
            filter,
            move |State(state): State<ServerState>, Path(params): Path<HashMap<String, String>>| async move {
                callback.respond(&params, &state.logger).await
            },
        )
    };

    if decl.verb == Verb::Get {
        routed
    } else {
        routed.get(health)
    }
}

fn method_filter(verb: Verb) -> MethodFilter {
    match verb {
        Verb::Get => MethodFilter::GET,
        Verb::Post => MethodFilter::POST,
        Verb::Put => MethodFilter::PUT,
        Verb::Patch => MethodFilter::PATCH,
        Verb::Delete => MethodFilter::DELETE,
    }
}

async fn health() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Dumps the request to the payload logger and swallows GitHub's creation
/// ping before it reaches the route handler.
async fn log_payload(State(state): State<ServerState>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, BODY_LIMIT).await {
        Ok(b) => b,
        Err(e) => {
            state
                .logger
                .warning(format!("Failed to read body for {}: {e}", parts.uri.path()));
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let payload = parse_payload(&parts.headers, &bytes);

    let delivery_id = parts
        .headers
        .get("x-github-delivery")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let delivery = Delivery {
        id: delivery_id,
        path: parts.uri.path().to_string(),
        received_at: Utc::now(),
        headers: header_json(&parts.headers),
        payload,
    };
    match serde_json::to_string_pretty(&delivery) {
        Ok(dump) => state.payload_logger.info(dump),
        Err(e) => state.logger.error(format!("Failed to serialize delivery {}: {e}", delivery.id)),
    }

    if delivery.payload.get("zen").is_some() {
        let hook_id = delivery
            .payload
            .get("hook_id")
            .map(Value::to_string)
            .unwrap_or_else(|| "?".into());
        let url = delivery
            .payload
            .pointer("/hook/config/url")
            .and_then(Value::as_str)
            .unwrap_or("?");
        state.logger.info(format!("{hook_id}:{url} creation ping"));
        return (StatusCode::OK, "OK").into_response();
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

/// JSON first, then urlencoded form (unwrapping GitHub's `payload=` field),
/// then raw text.
fn parse_payload(headers: &HeaderMap, body: &Bytes) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    if let Ok(json) = serde_json::from_slice::<Value>(body) {
        return json;
    }

    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if is_form {
        let fields: serde_json::Map<String, Value> = url::form_urlencoded::parse(body)
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
        if let Some(Value::String(inner)) = fields.get("payload") {
            if let Ok(json) = serde_json::from_str::<Value>(inner) {
                return json;
            }
        }
        return Value::Object(fields);
    }

    Value::String(String::from_utf8_lossy(body).into_owned())
}

fn header_json(headers: &HeaderMap) -> Value {
    let map: serde_json::Map<String, Value> = headers
        .iter()
        .filter_map(|(k, v)| {
            v.to_str()
                .ok()
                .map(|s| (k.to_string(), Value::String(s.to_string())))
        })
        .collect();
    Value::Object(map)
}

/// Bind `0.0.0.0:port` and serve `app` until SIGINT/SIGTERM. Returns the
/// bound port and the server task.
pub async fn start(port: u16, app: Router, logger: Logger) -> Result<(u16, JoinHandle<()>), String> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| format!("failed to bind HTTP server on port {port}: {e}"))?;

    let port = listener
        .local_addr()
        .map_err(|e| format!("failed to read bound address: {e}"))?
        .port();
    logger.notice(format!("HTTP server bound on port {port}"));

    let handle = tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(logger.clone()))
            .await;
        match served {
            Ok(()) => logger.notice("HTTP server stopped"),
            Err(e) => logger.error(format!("HTTP server error: {e}")),
        }
    });

    Ok((port, handle))
}

async fn shutdown_signal(logger: Logger) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            logger.error(format!("Failed to listen for ctrl-c: {e}"));
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                logger.error(format!("Failed to listen for SIGTERM: {e}"));
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    logger.notice("Signal received, shutting down");
}
