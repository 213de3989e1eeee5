// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The HTTP surface.
//!
//! JSON in, JSON out. A leading `!/` segment after the collection name
//! marks a request as "don't wait for completion"; the middleware
//! strips it and the handlers answer 202 instead of 200/201. Actor
//! errors map onto status codes: no route 404, no reply 408, handler
//! failure 500 with the `{"nok": [repr, trace]}` payload, and GET can
//! never be async (501).

mod handlers;
pub mod tasks;

pub use tasks::TaskDispatcher;

use crate::clients::FleetClients;
use crate::signals::{Signal, SignalHub};
use crate::task::{Task, TaskContext, TaskError};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{Method, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use drover_actors::DispatchError;
use drover_broker::BrokerError;
use drover_store::{Store, StoreError};
use serde_json::{json, Value};
use std::future::IntoFuture;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Shared state for every handler.
#[derive(Clone)]
pub struct HttpState {
    pub clients: FleetClients,
    pub store: Store,
    pub tasks: std::sync::Arc<TaskDispatcher>,
}

/// Marks a request that should not wait for completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct Nowait(pub bool);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotImplemented(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Dispatch(DispatchError::NoRoute(name)) => {
                (StatusCode::NOT_FOUND, Json(json!({ "nok": [format!("no route to {name}"), ""] })))
                    .into_response()
            }
            ApiError::Dispatch(DispatchError::NoReply) => {
                StatusCode::REQUEST_TIMEOUT.into_response()
            }
            ApiError::Dispatch(DispatchError::Nok { repr, trace }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "nok": [repr, trace] })),
            )
                .into_response(),
            ApiError::NotImplemented(reason) => {
                (StatusCode::NOT_IMPLEMENTED, Json(json!({ "nok": [reason, ""] }))).into_response()
            }
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "nok": [other.to_string(), ""] })),
            )
                .into_response(),
        }
    }
}

/// Wrap scalars as `{"ok": value}`; objects and arrays pass through.
fn jsonable(data: Value) -> Value {
    match data {
        Value::Object(_) | Value::Array(_) => data,
        scalar => json!({ "ok": scalar }),
    }
}

fn reply(status: StatusCode, data: Value) -> Response {
    (status, Json(jsonable(data))).into_response()
}

/// 200, or 202 when the caller asked not to wait.
fn ok(data: Value, nowait: bool) -> Response {
    if nowait {
        return accepted(data);
    }
    reply(StatusCode::OK, data)
}

/// 201, or 202 when the caller asked not to wait.
fn created(data: Value, nowait: bool) -> Response {
    if nowait {
        return accepted(data);
    }
    reply(StatusCode::CREATED, data)
}

fn accepted(data: Value) -> Response {
    let data = if data.is_null() { json!({ "ok": "operation scheduled" }) } else { data };
    reply(StatusCode::ACCEPTED, data)
}

/// Strip the `!/` nowait marker and tag the request. GET cannot be
/// async, so a nowait GET short-circuits to 501.
async fn nowait_middleware(mut request: Request<Body>, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let (rewritten, nowait) = match path.find("/!/") {
        Some(idx) => (format!("{}{}", &path[..idx], &path[idx + 2..]), true),
        None => match path.strip_suffix("/!") {
            Some(stripped) => (stripped.to_string(), true),
            None => (path, false),
        },
    };
    if nowait {
        if request.method() == Method::GET {
            return ApiError::NotImplemented("operation can't be async").into_response();
        }
        let path_and_query = match request.uri().query() {
            Some(query) => format!("{rewritten}?{query}"),
            None => rewritten,
        };
        if let Ok(uri) = path_and_query.parse::<Uri>() {
            *request.uri_mut() = uri;
        }
    }
    request.extensions_mut().insert(Nowait(nowait));
    next.run(request).await
}

/// Build the API router.
pub fn router(state: HttpState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(Duration::from_secs(86400));

    Router::new()
        .route("/ping/", get(handlers::ping))
        .route("/ping", get(handlers::ping))
        .route("/branches", get(handlers::branches_index))
        .route("/branches/:id", get(handlers::branch_show))
        .route(
            "/:app",
            get(handlers::app_show)
                .post(handlers::app_create)
                .put(handlers::app_create)
                .delete(handlers::app_delete),
        )
        .route(
            "/:app/instances",
            get(handlers::instances_index).post(handlers::instance_create),
        )
        .route(
            "/:app/instances/:name",
            get(handlers::instance_show)
                .post(handlers::instance_create_named)
                .put(handlers::instance_put)
                .delete(handlers::instance_delete),
        )
        .route("/:app/instances/:name/stats", get(handlers::instance_stats))
        .route(
            "/:app/instances/:name/autoscale",
            get(handlers::autoscale_show).post(handlers::autoscale_set),
        )
        .route("/:app/instances/:name/queues", get(handlers::consumers_index))
        .route(
            "/:app/instances/:name/queues/:queue",
            get(handlers::consumers_index_one)
                .put(handlers::consumer_add)
                .post(handlers::consumer_add)
                .delete(handlers::consumer_delete),
        )
        .route("/:app/queues", get(handlers::queues_index).post(handlers::queue_create))
        .route(
            "/:app/queues/:name",
            get(handlers::queue_show)
                .put(handlers::queue_put)
                .post(handlers::queue_put)
                .delete(handlers::queue_delete),
        )
        .route("/:app/queue/*rest", any(handlers::webhook))
        .route("/:app/query/:uuid/state", get(handlers::query_state))
        .route("/:app/query/:uuid/result", get(handlers::query_result))
        .route("/:app/query/:uuid/wait", get(handlers::query_wait))
        .layer(middleware::from_fn(nowait_middleware))
        .layer(cors)
        .with_state(state)
}

/// The HTTP server component.
pub struct HttpServer {
    listener: Option<TcpListener>,
    url: String,
    state: HttpState,
    signals: SignalHub,
}

impl HttpServer {
    /// Take ownership of an already-bound listener (the branch binds
    /// early so its advertised URL carries the real port).
    pub fn new(listener: TcpListener, url: String, state: HttpState, signals: SignalHub) -> Self {
        Self { listener: Some(listener), url, state, signals }
    }
}

#[async_trait]
impl Task for HttpServer {
    fn name(&self) -> String {
        "httpd".to_string()
    }

    async fn run(&mut self, ctx: &mut TaskContext) -> Result<(), TaskError> {
        let Some(listener) = self.listener.take() else {
            return Err(TaskError::Fatal("http listener consumed twice".to_string()));
        };
        let app = router(self.state.clone());
        info!(url = %self.url, "http server ready");
        self.signals.emit(Signal::HttpdReady { url: self.url.clone() });

        let cancel = ctx.cancel_token();
        let mut server = Box::pin(
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .into_future(),
        );
        loop {
            tokio::select! {
                result = &mut server => {
                    result.map_err(|e| TaskError::Fatal(e.to_string()))?;
                    return Ok(());
                }
                _ = tokio::time::sleep(Duration::from_millis(500)) => {
                    ctx.respond_to_ping();
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "httpd_tests.rs"]
mod tests;
