//! HTTP ingress: accept loop, the per-entry request gate, and the bridge
//! from HTTP request to worker envelope and back.

use crate::body::{self, BodyError};
use crate::conduit::{self, ConduitError};
use crate::registry::{HandlerEntry, HEALTH_PATH};
use crate::runtime::Runtime;
use crate::semantics::{self, AcceptVerdict};
use anyhow::Result;
use flowgate_core::ipc::envelope::{RequestEnvelope, ResponseEnvelope};
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{Method, StatusCode};
use hyper::service::service_fn;
use hyper::{Body, Request, Response};
use std::convert::Infallible;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Accept loop for the HTTP listener. Stops accepting on root cancel, then
/// drains in-flight connections for the configured grace period.
pub async fn run(listener: TcpListener, runtime: Runtime) -> Result<()> {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = runtime.cancel.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, _) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = ?err, "http accept failed");
                        continue;
                    }
                };
                let runtime = runtime.clone();
                connections.spawn(async move {
                    let service =
                        service_fn(move |req| serve_request(req, runtime.clone()));
                    let mut http = hyper::server::conn::Http::new();
                    http.http1_only(true);
                    http.http1_keep_alive(true);
                    if let Err(err) = http.serve_connection(stream, service).await {
                        debug!(error = ?err, "http connection ended");
                    }
                });
            }
        }
    }

    let grace = Duration::from_secs(runtime.config.timeout_read_external_process);
    let drain = async {
        while connections.join_next().await.is_some() {}
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!("http drain grace expired; aborting remaining connections");
        connections.abort_all();
    }
    info!("http server stopped");
    Ok(())
}

async fn serve_request(
    req: Request<Body>,
    runtime: Runtime,
) -> Result<Response<Body>, Infallible> {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match dispatch(req, &runtime).await {
        Ok(response) => response,
        Err(err) => {
            warn!(error = ?err, "request handling failed");
            status_only(StatusCode::INTERNAL_SERVER_ERROR)
        }
    };

    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_secs_f64() * 1000.0,
        "request served"
    );
    Ok(response)
}

struct WorkerRef {
    socket_path: String,
    worker_id: String,
}

async fn dispatch(req: Request<Body>, runtime: &Runtime) -> Result<Response<Body>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let Some(entry) = runtime.registry.lookup(&path).await else {
        return Ok(status_only(StatusCode::NOT_FOUND));
    };

    if path == HEALTH_PATH && method == Method::GET {
        if let Some(health) = entry.health.as_ref() {
            let reply = (health.as_ref())();
            return json_response(StatusCode::OK, &reply);
        }
    }

    // Gate: every arm is terminal and must leave `handling` untouched; only
    // the fall-through commits `handling = true`.
    let worker = {
        let mut state = entry.state.lock().await;
        if !state.enabled {
            return Ok(status_only(StatusCode::NOT_FOUND));
        }
        if state.handling {
            return Ok(status_only(StatusCode::LOCKED));
        }
        if !state.allowed_methods.contains(&method) {
            return Ok(status_only(StatusCode::METHOD_NOT_ALLOWED));
        }
        match semantics::evaluate_accept(req.headers()) {
            AcceptVerdict::Serveable => {}
            AcceptVerdict::Unsupported => {
                return Ok(Response::builder()
                    .status(StatusCode::UNSUPPORTED_MEDIA_TYPE)
                    .header(ACCEPT, semantics::ACCEPT_HEADER_VALUE)
                    .body(Body::empty())?);
            }
            AcceptVerdict::Malformed => {
                return Ok(status_only(StatusCode::BAD_REQUEST));
            }
        }
        state.handling = true;
        WorkerRef {
            socket_path: state.socket_path.clone(),
            worker_id: state.worker_id.clone(),
        }
    };

    let mut envelope = RequestEnvelope {
        method: method.to_string(),
        path: path.clone(),
        headers: semantics::header_map(req.headers()),
        body: None,
        content_type: String::new(),
        files: None,
        cookies: semantics::parse_cookies(req.headers()),
        instance_uid: runtime.config.server_uid.clone(),
    };

    if method != Method::GET && method != Method::DELETE {
        let raw_content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();
        let media = match semantics::parse_media_type(&raw_content_type) {
            Ok(media) => media,
            Err(_) => {
                clear_handling(&entry).await;
                return Ok(status_only(StatusCode::BAD_REQUEST));
            }
        };
        envelope.content_type = media.essence.clone();

        match body::process(req.into_body(), &media).await {
            Ok(payload) => {
                envelope.body = payload.body;
                if !payload.files.is_empty() {
                    envelope.files = Some(payload.files);
                }
            }
            Err(err) => {
                clear_handling(&entry).await;
                return json_response(
                    StatusCode::BAD_REQUEST,
                    &fail_envelope(err, &worker.worker_id),
                );
            }
        }
    }

    let deadline = Duration::from_secs(runtime.config.timeout_read_external_process);
    match conduit::exchange(&worker.socket_path, &envelope, deadline).await {
        Err(ConduitError::Dial(err)) => {
            warn!(
                operation = "socket:dial",
                resource = %worker.socket_path,
                worker = %worker.worker_id,
                error = ?err,
                "worker dial failed"
            );
            if let Some(files) = &envelope.files {
                body::delete_worker_files(files);
            }
            clear_handling(&entry).await;
            Ok(status_only(StatusCode::BAD_REQUEST))
        }
        Err(ConduitError::Write(err)) => {
            warn!(
                operation = "socket:write",
                resource = %worker.socket_path,
                worker = %worker.worker_id,
                error = ?err,
                "envelope write failed"
            );
            if let Some(files) = &envelope.files {
                body::delete_worker_files(files);
            }
            clear_handling(&entry).await;
            Ok(status_only(StatusCode::INTERNAL_SERVER_ERROR))
        }
        Err(ConduitError::Read(err)) => {
            // The worker may already be reading the envelope's files; they
            // are its property now.
            warn!(
                operation = "socket:read",
                resource = %worker.socket_path,
                worker = %worker.worker_id,
                error = ?err,
                "worker reply read failed"
            );
            clear_handling(&entry).await;
            Ok(status_only(StatusCode::INTERNAL_SERVER_ERROR))
        }
        Ok(reply) => {
            let mut state = entry.state.lock().await;
            state.handling = false;
            let status = if reply.ok {
                state.enabled = false; // single shot
                state.handled = true; // ready for removal
                StatusCode::ACCEPTED
            } else {
                StatusCode::BAD_REQUEST
            };
            drop(state);
            json_response(status, &reply)
        }
    }
}

async fn clear_handling(entry: &HandlerEntry) {
    entry.state.lock().await.handling = false;
}

fn fail_envelope(err: BodyError, worker_id: &str) -> ResponseEnvelope {
    ResponseEnvelope {
        ok: false,
        code: 400,
        status: "fail".to_string(),
        message: err.message(),
        instance_uid: worker_id.to_string(),
    }
}

fn status_only(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

fn json_response<T: serde::Serialize>(status: StatusCode, value: &T) -> Result<Response<Body>> {
    let payload = serde_json::to_vec(value)?;
    Ok(Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(payload))?)
}
