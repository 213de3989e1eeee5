// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request handlers.
//!
//! Parameters come from the query string and the body (JSON object or
//! form encoding), body winning on conflicts — operators drive this API
//! with curl as much as with the client library.

use super::{accepted, created, ok, ApiError, HttpState, Nowait};
use crate::clients::app_json;
use axum::extract::{Path, Query, State};
use axum::http::Method;
use axum::response::Response;
use axum::Extension;
use drover_store::InstanceSpec;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;

type Params = HashMap<String, String>;

/// Decode a percent-encoded component ('+' is a space).
fn url_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => {
                match bytes.get(i + 1..i + 3).and_then(|hex| {
                    u8::from_str_radix(std::str::from_utf8(hex).ok()?, 16).ok()
                }) {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            byte => out.push(byte),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn form_params(raw: &str) -> Params {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (url_decode(key), url_decode(value))
        })
        .collect()
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Body params: a JSON object or a form-encoded string.
fn body_params(body: &str) -> Params {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Params::new();
    }
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        return map.into_iter().map(|(k, v)| (k, value_to_string(v))).collect();
    }
    form_params(trimmed)
}

/// Query params overlaid with body params.
fn merged(query: Params, body: &str) -> Params {
    let mut params = query;
    params.extend(body_params(body));
    params
}

fn opt(params: &Params, key: &str) -> Option<String> {
    params.get(key).filter(|v| !v.is_empty()).cloned()
}

fn int(params: &Params, key: &str) -> Result<Option<u32>, ApiError> {
    match params.get(key).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ApiError::Validation(format!("{key} is not an integer: {raw:?}"))),
        None => Ok(None),
    }
}

// ----- liveness ----------------------------------------------------------

pub(super) async fn ping() -> Response {
    ok(json!({ "ok": "pong" }), false)
}

// ----- branches ----------------------------------------------------------

pub(super) async fn branches_index(State(state): State<HttpState>) -> Result<Response, ApiError> {
    Ok(ok(json!(state.clients.branches.all().await?), false))
}

pub(super) async fn branch_show(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    Ok(ok(state.clients.branches.get(&id).await?, false))
}

// ----- apps --------------------------------------------------------------

pub(super) async fn app_show(
    State(state): State<HttpState>,
    Path(app): Path<String>,
) -> Result<Response, ApiError> {
    let record = state.clients.apps.get(Some(&app)).await?;
    Ok(ok(app_json(&state.store, &record), false))
}

pub(super) async fn app_create(
    State(state): State<HttpState>,
    Path(app): Path<String>,
    Extension(Nowait(nowait)): Extension<Nowait>,
    Query(query): Query<Params>,
    body: String,
) -> Result<Response, ApiError> {
    let params = merged(query, &body);
    let value = state
        .clients
        .apps
        .add(
            &app,
            opt(&params, "broker"),
            opt(&params, "arguments"),
            opt(&params, "extra_config"),
        )
        .await?;
    Ok(created(value, nowait))
}

pub(super) async fn app_delete(
    State(state): State<HttpState>,
    Path(app): Path<String>,
) -> Result<Response, ApiError> {
    Ok(ok(json!(state.clients.apps.delete(&app).await?), false))
}

// ----- instances ---------------------------------------------------------

pub(super) async fn instances_index(
    State(state): State<HttpState>,
    Path(app): Path<String>,
) -> Result<Response, ApiError> {
    Ok(ok(json!(state.clients.instances.all(Some(&app)).await?), false))
}

pub(super) async fn instance_show(
    State(state): State<HttpState>,
    Path((_app, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    Ok(ok(state.clients.instances.get(&name).await?, false))
}

pub(super) async fn instance_create(
    State(state): State<HttpState>,
    Path(app): Path<String>,
    Extension(Nowait(nowait)): Extension<Nowait>,
    Query(query): Query<Params>,
    body: String,
) -> Result<Response, ApiError> {
    create_instance(state, app, None, nowait, merged(query, &body)).await
}

pub(super) async fn instance_create_named(
    State(state): State<HttpState>,
    Path((app, name)): Path<(String, String)>,
    Extension(Nowait(nowait)): Extension<Nowait>,
    Query(query): Query<Params>,
    body: String,
) -> Result<Response, ApiError> {
    create_instance(state, app, Some(name), nowait, merged(query, &body)).await
}

async fn create_instance(
    state: HttpState,
    app: String,
    name: Option<String>,
    nowait: bool,
    params: Params,
) -> Result<Response, ApiError> {
    // make sure the app exists fleet-wide before hanging instances off it
    state.clients.apps.add(&app, opt(&params, "broker"), None, None).await?;
    let spec = InstanceSpec {
        name: name.or_else(|| opt(&params, "name")),
        app: Some(app),
        queues: opt(&params, "queues"),
        max_concurrency: int(&params, "max")?
            .or(int(&params, "max_concurrency")?)
            .unwrap_or(1),
        min_concurrency: int(&params, "min")?
            .or(int(&params, "min_concurrency")?)
            .unwrap_or(1),
        broker: opt(&params, "broker"),
        pool: opt(&params, "pool"),
        arguments: opt(&params, "arguments"),
        extra_config: opt(&params, "extra_config"),
    };
    let value = state.clients.instances.add(spec, nowait).await?;
    Ok(created(value, nowait))
}

pub(super) async fn instance_put() -> Result<Response, ApiError> {
    Err(ApiError::NotImplemented("operation is not idempotent: use POST"))
}

pub(super) async fn instance_delete(
    State(state): State<HttpState>,
    Path((_app, name)): Path<(String, String)>,
    Extension(Nowait(nowait)): Extension<Nowait>,
) -> Result<Response, ApiError> {
    Ok(ok(state.clients.instances.remove(&name, nowait).await?, nowait))
}

pub(super) async fn instance_stats(
    State(state): State<HttpState>,
    Path((_app, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    Ok(ok(state.clients.instances.stats(&name).await?, false))
}

pub(super) async fn autoscale_show(
    State(state): State<HttpState>,
    Path((_app, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let instance = state.clients.instances.get(&name).await?;
    Ok(ok(
        json!({ "max": instance["max_concurrency"], "min": instance["min_concurrency"] }),
        false,
    ))
}

pub(super) async fn autoscale_set(
    State(state): State<HttpState>,
    Path((_app, name)): Path<(String, String)>,
    Extension(Nowait(nowait)): Extension<Nowait>,
    Query(query): Query<Params>,
    body: String,
) -> Result<Response, ApiError> {
    let params = merged(query, &body);
    let value = state
        .clients
        .instances
        .autoscale(&name, int(&params, "max")?, int(&params, "min")?)
        .await?;
    Ok(ok(value, nowait))
}

// ----- consumers ---------------------------------------------------------

pub(super) async fn consumers_index(
    State(state): State<HttpState>,
    Path((_app, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    Ok(ok(state.clients.instances.consuming_from(&name).await?, false))
}

pub(super) async fn consumers_index_one(
    State(state): State<HttpState>,
    Path((_app, name, _queue)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    Ok(ok(state.clients.instances.consuming_from(&name).await?, false))
}

pub(super) async fn consumer_add(
    State(state): State<HttpState>,
    Path((_app, name, queue)): Path<(String, String, String)>,
    Extension(Nowait(nowait)): Extension<Nowait>,
) -> Result<Response, ApiError> {
    let value = state.clients.instances.add_consumer(&name, &queue, nowait).await?;
    Ok(created(value, nowait))
}

pub(super) async fn consumer_delete(
    State(state): State<HttpState>,
    Path((_app, name, queue)): Path<(String, String, String)>,
    Extension(Nowait(nowait)): Extension<Nowait>,
) -> Result<Response, ApiError> {
    Ok(ok(state.clients.instances.cancel_consumer(&name, &queue, nowait).await?, nowait))
}

// ----- queues ------------------------------------------------------------

pub(super) async fn queues_index(State(state): State<HttpState>) -> Result<Response, ApiError> {
    Ok(ok(json!(state.clients.queues.all().await?), false))
}

pub(super) async fn queue_show(
    State(state): State<HttpState>,
    Path((_app, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    Ok(ok(state.clients.queues.get(&name).await?, false))
}

pub(super) async fn queue_create(
    State(state): State<HttpState>,
    Path(_app): Path<String>,
    Extension(Nowait(nowait)): Extension<Nowait>,
    Query(query): Query<Params>,
    body: String,
) -> Result<Response, ApiError> {
    let params = merged(query, &body);
    let Some(name) = opt(&params, "name") else {
        return Err(ApiError::Validation("queue name required".to_string()));
    };
    declare_queue(state, name, nowait, params).await
}

pub(super) async fn queue_put(
    State(state): State<HttpState>,
    Path((_app, name)): Path<(String, String)>,
    Extension(Nowait(nowait)): Extension<Nowait>,
    Query(query): Query<Params>,
    body: String,
) -> Result<Response, ApiError> {
    declare_queue(state, name, nowait, merged(query, &body)).await
}

async fn declare_queue(
    state: HttpState,
    name: String,
    nowait: bool,
    params: Params,
) -> Result<Response, ApiError> {
    let options: Option<Map<String, Value>> = match opt(&params, "options") {
        Some(raw) => Some(
            serde_json::from_str::<Map<String, Value>>(&raw)
                .map_err(|e| ApiError::Validation(format!("options is not a JSON object: {e}")))?,
        ),
        None => None,
    };
    let value = state
        .clients
        .queues
        .add(
            &name,
            opt(&params, "exchange"),
            opt(&params, "exchange_type"),
            opt(&params, "routing_key"),
            options,
            nowait,
        )
        .await?;
    Ok(created(value, nowait))
}

pub(super) async fn queue_delete(
    State(state): State<HttpState>,
    Path((_app, name)): Path<(String, String)>,
    Extension(Nowait(nowait)): Extension<Nowait>,
) -> Result<Response, ApiError> {
    let value = state.clients.queues.delete(&name, &state.clients.instances).await?;
    Ok(ok(value, nowait))
}

// ----- webhook dispatch --------------------------------------------------

/// Split `q1/http://host/path` into the queue segment and the URL.
fn split_webhook_path(rest: &str) -> Option<(Option<String>, String)> {
    let scheme_sep = rest.find("://")?;
    let scheme_start = rest[..scheme_sep].rfind('/').map(|i| i + 1).unwrap_or(0);
    let url = rest[scheme_start..].to_string();
    let queue = rest[..scheme_start].trim_matches('/').to_string();
    Some((Some(queue).filter(|q| !q.is_empty()), url))
}

pub(super) async fn webhook(
    State(state): State<HttpState>,
    Path((app, rest)): Path<(String, String)>,
    method: Method,
    Query(query): Query<Params>,
    body: String,
) -> Result<Response, ApiError> {
    let Some((queue_name, url)) = split_webhook_path(&rest) else {
        return Err(ApiError::Validation(format!("no URL in path: {rest:?}")));
    };
    let app_record = state.clients.apps.get(Some(&app)).await?;
    let broker_url = state.store.app_broker_url(&app_record);
    let queue_record = match &queue_name {
        Some(name) => Some(state.clients.queues.get_record(name).await?),
        None => None,
    };
    let data =
        if matches!(method, Method::GET | Method::HEAD) { Params::new() } else { body_params(&body) };
    let receipt = state
        .tasks
        .dispatch_webhook(
            &broker_url,
            queue_record.as_ref(),
            &url,
            method.as_str(),
            query,
            data,
        )
        .await?;
    let value = serde_json::to_value(&receipt)
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    Ok(accepted(value))
}

// ----- task queries ------------------------------------------------------

async fn app_broker(state: &HttpState, app: &str) -> Result<String, ApiError> {
    let record = state.clients.apps.get(Some(app)).await?;
    Ok(state.store.app_broker_url(&record))
}

pub(super) async fn query_state(
    State(state): State<HttpState>,
    Path((app, uuid)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let broker = app_broker(&state, &app).await?;
    let result = state.tasks.result(&broker, &uuid, Duration::from_millis(300)).await?;
    Ok(ok(json!({ "state": result.state }), false))
}

pub(super) async fn query_result(
    State(state): State<HttpState>,
    Path((app, uuid)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let broker = app_broker(&state, &app).await?;
    let result = state.tasks.result(&broker, &uuid, Duration::from_millis(300)).await?;
    Ok(ok(json!({ "result": result.result }), false))
}

pub(super) async fn query_wait(
    State(state): State<HttpState>,
    Path((app, uuid)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let broker = app_broker(&state, &app).await?;
    let result = state.tasks.result(&broker, &uuid, Duration::from_secs(30)).await?;
    Ok(ok(json!({ "result": result.result }), false))
}
