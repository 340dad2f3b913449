//! The guard middleware: one inspection pass over every request.
//!
//! # Responsibilities
//! - Short-circuit requests from blocked addresses before any other work.
//! - Serve decoy routes and detect filled decoy fields (honeypot).
//! - Enforce the CSRF token protocol on authenticated mutating requests.
//! - Classify the request surface against attack signatures; block on
//!   critical families, sanitize and continue on non-critical ones.
//! - Feed the reputation tracker and, after the response, the behavior
//!   profiler and passive response observations.
//!
//! # Design Decisions
//! - The guard loads one configuration snapshot at entry and uses it for
//!   the whole request, so a mid-flight reload cannot produce a half-old,
//!   half-new decision.
//! - Denial responses are generic. Attackers learn nothing about which
//!   layer rejected them; operators read the event log instead.
//! - Post-response accounting runs on a spawned task. A slow profiler or
//!   a contended event log never adds latency to the response path.
//! - Body buffering is bounded on both sides. Request payloads above the
//!   inspection cap and non-5xx response bodies stream through untouched;
//!   only 5xx bodies are sampled, up to a fixed limit, for leak markers.
//! - Internal guard faults fail open: the business request proceeds and
//!   an ApiError event records the fault.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, SET_COOKIE};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::{self, StreamExt};
use serde_json::json;

use crate::config::schema::GuardConfig;
use crate::csrf::protocol::{self as csrf, CsrfRejection, CSRF_COOKIE_NAME, CSRF_HEADER_NAME};
use crate::events::types::{now_ms, EventCategory, Severity};
use crate::honeypot::trap;
use crate::observability::metrics;
use crate::patterns::families::AttackFamily;
use crate::patterns::matcher::AttackSignal;
use crate::pipeline::state::SecurityMonitorState;
use crate::pipeline::surface::SerializedRequest;
use crate::profiler::endpoint::{Anomaly, RouteSample};
use crate::reputation::tracker::Observation;
use crate::scanner::builtin::{
    OBSERVATION_KEY, OBS_MISSING_HEADERS, OBS_STACK_TRACE, OBS_UNAUTH_ID_ACCESS,
};

/// Session identity attached by the application's auth layer. Its presence
/// marks a request as authenticated and turns on CSRF enforcement for
/// mutating methods.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub session_id: String,
}

/// Freshly issued CSRF token, inserted as a request extension so handlers
/// can render it into responses that need it inline.
#[derive(Debug, Clone)]
pub struct IssuedCsrfToken(pub String);

/// Response headers whose absence is worth one passive observation per
/// route.
const EXPECTED_RESPONSE_HEADERS: [&str; 4] = [
    "x-frame-options",
    "x-content-type-options",
    "strict-transport-security",
    "content-security-policy",
];

/// Substrings that mark a 5xx body as leaking implementation detail.
const STACK_MARKERS: [&str; 4] = ["stack:", " at ", "panicked at", "backtrace"];

/// Tower middleware entry point. Mount with
/// `axum::middleware::from_fn_with_state` and serve the router with
/// `into_make_service_with_connect_info::<SocketAddr>()` so the peer
/// address extractor resolves.
pub async fn guard_middleware(
    State(state): State<Arc<SecurityMonitorState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    metrics::record_request_guarded();
    let config = state.config();
    let auth = request.extensions().get::<AuthContext>().cloned();

    let (mut parts, body) = request.into_parts();
    let buffered =
        match buffer_for_inspection(body, config.listener.max_inspect_body_bytes).await {
            Ok(buffered) => buffered,
            Err(error) => {
                tracing::warn!(%error, "failed to read request body");
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "success": false, "error": "Bad request" })),
                )
                    .into_response();
            }
        };
    // Payloads above the inspection cap are forwarded untouched; the cap
    // bounds what the guard analyzes, it is not a request size limit.
    let (mut body_bytes, passthrough) = match buffered {
        BufferedBody::Full(bytes) => (bytes, None),
        BufferedBody::Oversized(rest) => {
            metrics::record_body_inspection_skipped();
            (Bytes::new(), Some(rest))
        }
    };

    let mut serialized = SerializedRequest::from_parts(&parts, &body_bytes, peer.ip());
    if passthrough.is_some() {
        serialized.body = None;
    }
    let addr = serialized.source_addr;
    let route_key = serialized.route_key();

    // Already-blocked addresses get the cheapest possible rejection.
    if state.reputation.is_blocked(&addr) {
        metrics::record_blocked("reputation");
        return generic_forbidden();
    }

    // Honeypot routes never reach a handler.
    if trap::is_decoy_route(&serialized.path, &config.honeypot) {
        return serve_decoy_route(&state, &config, &serialized).await;
    }

    // Filled decoy form fields mark an automated client.
    let form_fields = serialized.form_fields();
    let filled_decoys = trap::extract_filled_decoy_fields(&form_fields, &config.honeypot);
    if !filled_decoys.is_empty() {
        return serve_decoy_fields(&state, &config, &serialized, &filled_decoys);
    }

    // CSRF applies to authenticated requests with mutating methods.
    if let Some(auth) = &auth {
        if !matches!(serialized.method.as_str(), "GET" | "HEAD" | "OPTIONS") {
            if let Err(rejection) =
                check_csrf(&config, &serialized, &form_fields, &auth.session_id)
            {
                return reject_csrf(&state, &serialized, auth, rejection);
            }
        }
    }

    // Signature classification over the full textual surface.
    let signals = state
        .matcher
        .classify(&serialized.surface_text(), serialized.content_type_is_xml());
    for signal in &signals {
        metrics::record_attack_signal(signal.family.label());
    }
    if signals.iter().any(|s| s.family.is_critical()) {
        return block_critical_signals(&state, &serialized, &signals);
    }
    if !signals.is_empty() {
        body_bytes = sanitize_request(&state, &mut parts, &serialized, &signals, body_bytes);
    }

    // Every request feeds the reputation score, attack or not.
    let disposition = state.reputation.observe(
        addr,
        Observation {
            route_key: route_key.clone(),
            user_agent: serialized.user_agent(),
            signals: &signals,
            honeypot_hit: false,
        },
        &config.reputation,
    );
    if disposition.blocked {
        metrics::record_blocked("reputation");
        return generic_forbidden();
    }

    // Authenticated requests get a fresh token for the next mutation.
    let issued = auth
        .as_ref()
        .map(|a| csrf::issue(&config.csrf.secret, &a.session_id));
    if let Some(token) = &issued {
        parts.extensions.insert(IssuedCsrfToken(token.clone()));
    }

    let forwarded = match passthrough {
        Some(rest) => rest,
        None => Body::from(body_bytes),
    };
    let request = Request::from_parts(parts, forwarded);
    let started = Instant::now();
    let response = next.run(request).await;
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

    finish_response(
        &state,
        &config,
        serialized,
        auth.is_some(),
        issued,
        response,
        latency_ms,
    )
    .await
}

/// Outcome of bounded body buffering.
enum BufferedBody {
    /// The whole payload fit under the cap.
    Full(Bytes),
    /// The payload exceeded the cap. The returned body replays the
    /// already-read prefix followed by the untouched remainder of the
    /// stream, so nothing is lost.
    Oversized(Body),
}

/// Read a body up to `cap` bytes. Larger payloads come back as a
/// pass-through stream instead of an error, so the cap never denies a
/// request or response on its own.
async fn buffer_for_inspection(body: Body, cap: usize) -> Result<BufferedBody, axum::Error> {
    let mut data = body.into_data_stream();
    let mut buffered: Vec<u8> = Vec::new();
    while let Some(chunk) = data.next().await {
        let chunk = chunk?;
        if buffered.len() + chunk.len() > cap {
            let prefix = Bytes::from(buffered);
            let replayed =
                stream::iter([Ok::<_, axum::Error>(prefix), Ok(chunk)]).chain(data);
            return Ok(BufferedBody::Oversized(Body::from_stream(replayed)));
        }
        buffered.extend_from_slice(&chunk);
    }
    Ok(BufferedBody::Full(Bytes::from(buffered)))
}

/// Upper bound on how much of a 5xx body is sampled for leak markers.
const LEAK_SAMPLE_BYTES: usize = 64 * 1024;

/// Attach the CSRF cookie, sample 5xx bodies for leaked implementation
/// detail, and hand the observed exchange to a detached accounting task.
/// Non-5xx bodies stream through untouched.
async fn finish_response(
    state: &Arc<SecurityMonitorState>,
    config: &Arc<GuardConfig>,
    serialized: SerializedRequest,
    authenticated: bool,
    issued: Option<String>,
    response: Response,
    latency_ms: f64,
) -> Response {
    let (mut res_parts, res_body) = response.into_parts();

    if let Some(token) = issued {
        let cookie = format!(
            "{CSRF_COOKIE_NAME}={token}; Path=/; Max-Age={}; HttpOnly; Secure; SameSite=Strict",
            config.csrf.max_age_secs
        );
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            res_parts.headers.append(SET_COOKIE, value);
        }
    }

    let status = res_parts.status;
    let declared_size = res_parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<f64>().ok());

    let (res_body, stack_excerpt, sampled_size) = if status.is_server_error() {
        match buffer_for_inspection(res_body, LEAK_SAMPLE_BYTES).await {
            Ok(BufferedBody::Full(bytes)) => {
                let excerpt = leak_excerpt(&bytes);
                let size = bytes.len() as f64;
                (Body::from(bytes), excerpt, Some(size))
            }
            Ok(BufferedBody::Oversized(rest)) => (rest, None, None),
            Err(error) => {
                // The body stream is gone; nothing to forward. Record the
                // fault and answer with a bare status.
                record_api_error(state, &serialized, &format!("response capture failed: {error}"));
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    } else {
        (res_body, None, None)
    };

    let missing_headers: Vec<String> = EXPECTED_RESPONSE_HEADERS
        .iter()
        .filter(|name| !res_parts.headers.contains_key(**name))
        .map(|name| name.to_string())
        .collect();
    let size_bytes = declared_size.or(sampled_size).unwrap_or(0.0);

    let state = state.clone();
    let config = config.clone();
    tokio::spawn(async move {
        observe_exchange(
            &state,
            &config,
            &serialized,
            authenticated,
            status,
            latency_ms,
            size_bytes,
            stack_excerpt,
            missing_headers,
        );
    });

    Response::from_parts(res_parts, res_body)
}

/// First 200 characters of a 5xx body that contains a leak marker.
fn leak_excerpt(bytes: &Bytes) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?;
    let lower = text.to_lowercase();
    STACK_MARKERS
        .iter()
        .any(|marker| lower.contains(*marker))
        .then(|| text.chars().take(200).collect())
}

/// Post-response accounting: baseline training, anomaly events, and the
/// passive observations the periodic scan later turns into findings.
#[allow(clippy::too_many_arguments)]
fn observe_exchange(
    state: &SecurityMonitorState,
    config: &GuardConfig,
    serialized: &SerializedRequest,
    authenticated: bool,
    status: StatusCode,
    latency_ms: f64,
    size_bytes: f64,
    stack_excerpt: Option<String>,
    missing_headers: Vec<String>,
) {
    let route_key = serialized.route_key();
    let param_names = serialized.param_names();
    let header_names = serialized.header_names();

    let anomalies = state.profiler.observe(
        &route_key,
        RouteSample {
            latency_ms,
            size_bytes,
            param_names: &param_names,
            header_names: &header_names,
            is_error: status.is_client_error() || status.is_server_error(),
        },
        &config.anomaly,
    );
    for anomaly in &anomalies {
        metrics::record_anomaly(anomaly_label(anomaly));
        let mut details = BTreeMap::new();
        details.insert("route".into(), route_key.clone());
        details.insert(
            "anomaly".into(),
            serde_json::to_string(anomaly).unwrap_or_default(),
        );
        state.event_log.record(
            EventCategory::SuspiciousActivity,
            Severity::Medium,
            Some(serialized.source_addr),
            None,
            Some(route_key.clone()),
            true,
            details,
        );
    }

    if let Some(excerpt) = stack_excerpt {
        let mut details = BTreeMap::new();
        details.insert(OBSERVATION_KEY.into(), OBS_STACK_TRACE.into());
        details.insert("status".into(), status.as_u16().to_string());
        details.insert("excerpt".into(), excerpt);
        state.event_log.record(
            EventCategory::SecurityAlert,
            Severity::Low,
            Some(serialized.source_addr),
            None,
            Some(route_key.clone()),
            true,
            details,
        );
    }

    if !missing_headers.is_empty() && state.reported_header_routes.insert(route_key.clone()) {
        let mut details = BTreeMap::new();
        details.insert(OBSERVATION_KEY.into(), OBS_MISSING_HEADERS.into());
        details.insert("missing".into(), missing_headers.join(","));
        state.event_log.record(
            EventCategory::SecurityAlert,
            Severity::Low,
            None,
            None,
            Some(route_key.clone()),
            true,
            details,
        );
    }

    let has_authorization = serialized.header(AUTHORIZATION.as_str()).is_some();
    if status.is_success()
        && !authenticated
        && !has_authorization
        && state.id_path.is_match(&serialized.path)
        && state.reported_idor_routes.insert(route_key.clone())
    {
        let mut details = BTreeMap::new();
        details.insert(OBSERVATION_KEY.into(), OBS_UNAUTH_ID_ACCESS.into());
        details.insert("path".into(), serialized.path.clone());
        state.event_log.record(
            EventCategory::SecurityAlert,
            Severity::Low,
            Some(serialized.source_addr),
            None,
            Some(route_key),
            true,
            details,
        );
    }
}

/// Record the hit, penalize the source, stall, and answer with a
/// randomized plausible error. The real router never sees the request.
async fn serve_decoy_route(
    state: &SecurityMonitorState,
    config: &GuardConfig,
    serialized: &SerializedRequest,
) -> Response {
    metrics::record_honeypot_hit();
    let mut details = BTreeMap::new();
    details.insert("honeypot".into(), "route".into());
    details.insert("method".into(), serialized.method.clone());
    if let Some(ua) = serialized.user_agent() {
        details.insert("user_agent".into(), ua.to_string());
    }
    state.event_log.record(
        EventCategory::SuspiciousActivity,
        Severity::Critical,
        Some(serialized.source_addr),
        None,
        Some(serialized.route_key()),
        false,
        details,
    );
    state.reputation.observe(
        serialized.source_addr,
        Observation {
            route_key: serialized.route_key(),
            user_agent: serialized.user_agent(),
            signals: &[],
            honeypot_hit: true,
        },
        &config.reputation,
    );

    let decoy = trap::decoy_response(&config.honeypot);
    tokio::time::sleep(decoy.delay).await;
    (decoy.status, Json(json!({ "error": decoy.message }))).into_response()
}

/// A filled decoy form field gets a fake success so the bot keeps wasting
/// time, plus the same reputation penalty as a decoy route.
fn serve_decoy_fields(
    state: &SecurityMonitorState,
    config: &GuardConfig,
    serialized: &SerializedRequest,
    filled: &[String],
) -> Response {
    metrics::record_honeypot_hit();
    let mut details = BTreeMap::new();
    details.insert("honeypot".into(), "field".into());
    details.insert("fields".into(), filled.join(","));
    state.event_log.record(
        EventCategory::AutomatedAttack,
        Severity::Critical,
        Some(serialized.source_addr),
        None,
        Some(serialized.route_key()),
        false,
        details,
    );
    state.reputation.observe(
        serialized.source_addr,
        Observation {
            route_key: serialized.route_key(),
            user_agent: serialized.user_agent(),
            signals: &[],
            honeypot_hit: true,
        },
        &config.reputation,
    );

    (
        StatusCode::OK,
        Json(json!({ "success": true, "message": "Operation completed successfully" })),
    )
        .into_response()
}

/// Token lookup order: header first, then the `csrfToken` form field. The
/// double-submit cookie, when present, must match exactly.
fn check_csrf(
    config: &GuardConfig,
    serialized: &SerializedRequest,
    form_fields: &BTreeMap<String, String>,
    session_id: &str,
) -> Result<(), CsrfRejection> {
    let token = serialized
        .header(CSRF_HEADER_NAME)
        .map(|t| t.to_string())
        .or_else(|| form_fields.get("csrfToken").cloned())
        .ok_or(CsrfRejection::Missing)?;

    let max_age_ms = config.csrf.max_age_secs * 1000;
    if !csrf::validate(&config.csrf.secret, &token, session_id, now_ms(), max_age_ms) {
        return Err(CsrfRejection::Invalid);
    }

    if let Some(cookie) = serialized.cookie(CSRF_COOKIE_NAME) {
        if cookie != token {
            return Err(CsrfRejection::Mismatch);
        }
    }
    Ok(())
}

fn reject_csrf(
    state: &SecurityMonitorState,
    serialized: &SerializedRequest,
    auth: &AuthContext,
    rejection: CsrfRejection,
) -> Response {
    metrics::record_csrf_failure(rejection.code());
    let mut details = BTreeMap::new();
    details.insert("code".into(), rejection.code().into());
    details.insert("method".into(), serialized.method.clone());
    state.event_log.record(
        EventCategory::CsrfAttempt,
        Severity::Medium,
        Some(serialized.source_addr),
        Some(auth.session_id.clone()),
        Some(serialized.route_key()),
        false,
        details,
    );
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "success": false,
            "error": rejection.to_string(),
            "code": rejection.code(),
        })),
    )
        .into_response()
}

/// Critical families are never forwarded. The response is a generic 400;
/// the event log carries the evidence.
fn block_critical_signals(
    state: &SecurityMonitorState,
    serialized: &SerializedRequest,
    signals: &[AttackSignal],
) -> Response {
    metrics::record_blocked("attack_signal");
    for signal in signals.iter().filter(|s| s.family.is_critical()) {
        let mut details = BTreeMap::new();
        details.insert("family".into(), signal.family.label().into());
        details.insert("confidence".into(), format!("{:.2}", signal.confidence));
        details.insert("matched".into(), signal.matched.clone());
        state.event_log.record(
            category_for_family(signal.family),
            Severity::Critical,
            Some(serialized.source_addr),
            None,
            Some(serialized.route_key()),
            false,
            details,
        );
    }
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": "Bad request" })),
    )
        .into_response()
}

/// Strip matched excerpts out of the body and forward the rest. Only the
/// body is rewritten; path and headers matching a non-critical family are
/// logged but passed through.
fn sanitize_request(
    state: &SecurityMonitorState,
    parts: &mut axum::http::request::Parts,
    serialized: &SerializedRequest,
    signals: &[AttackSignal],
    body_bytes: Bytes,
) -> Bytes {
    metrics::record_sanitized();
    for signal in signals {
        let mut details = BTreeMap::new();
        details.insert("family".into(), signal.family.label().into());
        details.insert("matched".into(), signal.matched.clone());
        details.insert("action".into(), "sanitized".into());
        state.event_log.record(
            category_for_family(signal.family),
            Severity::High,
            Some(serialized.source_addr),
            None,
            Some(serialized.route_key()),
            true,
            details,
        );
    }

    let Some(body_text) = &serialized.body else {
        return body_bytes;
    };
    let sanitized = strip_matches(body_text, signals);
    if sanitized.len() != body_text.len() {
        if let Ok(value) = HeaderValue::from_str(&sanitized.len().to_string()) {
            parts.headers.insert(CONTENT_LENGTH, value);
        }
        return Bytes::from(sanitized);
    }
    body_bytes
}

/// Remove every case-insensitive occurrence of each matched excerpt.
/// Excerpts come from the lower-cased surface, so matching against a
/// lower-cased copy finds them regardless of the original casing.
fn strip_matches(text: &str, signals: &[AttackSignal]) -> String {
    let mut result = text.to_string();
    for signal in signals {
        if signal.matched.is_empty() {
            continue;
        }
        loop {
            let lower = result.to_lowercase();
            // Lower-casing can change byte lengths for some scripts; bail
            // out of the loop rather than split a char boundary.
            if lower.len() != result.len() {
                break;
            }
            match lower.find(&signal.matched) {
                Some(start) => {
                    let end = start + signal.matched.len();
                    if result.is_char_boundary(start) && result.is_char_boundary(end) {
                        result.replace_range(start..end, "");
                    } else {
                        break;
                    }
                }
                None => break,
            }
        }
    }
    result
}

fn category_for_family(family: AttackFamily) -> EventCategory {
    match family {
        AttackFamily::SqlInjection => EventCategory::SqlInjectionAttempt,
        AttackFamily::Xss => EventCategory::XssAttempt,
        AttackFamily::CommandInjection => EventCategory::AutomatedAttack,
        AttackFamily::PathTraversal | AttackFamily::XxeInjection => {
            EventCategory::SuspiciousActivity
        }
    }
}

fn anomaly_label(anomaly: &Anomaly) -> &'static str {
    match anomaly {
        Anomaly::ResponseTime { .. } => "response_time",
        Anomaly::ResponseSize { .. } => "response_size",
        Anomaly::UnexpectedParameters { .. } => "unexpected_parameters",
        Anomaly::SuspiciousHeader { .. } => "suspicious_header",
    }
}

fn generic_forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "success": false, "error": "Forbidden" })),
    )
        .into_response()
}

fn record_api_error(state: &SecurityMonitorState, serialized: &SerializedRequest, message: &str) {
    let mut details = BTreeMap::new();
    details.insert("error".into(), message.to_string());
    state.event_log.record(
        EventCategory::ApiError,
        Severity::Medium,
        Some(serialized.source_addr),
        None,
        Some(serialized.route_key()),
        false,
        details,
    );
}
