use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Path, Query, Request, State};
use axum::http::{header, HeaderMap, Response, StatusCode};
use axum::middleware::Next;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::{Stream, StreamExt};
use lendguard_control::{
    AlertStatus, EncryptedField, EventQuery, SecurityAlert, SecurityEvent, SecurityEventType,
    SessionAnomaly, SessionRecord, Severity, DEFAULT_RATE_LIMIT_ACTION,
};
use lendguard_kernel::{
    is_private_or_loopback, sanitize_error as sanitize_raw_error, FormFieldInput, FormValidation, KernelError, RawError,
    RecordedEvent, RiskAssessment, RiskInput, SanitizedError, SecurityKernel, SecurityMetrics,
    SecurityRequest, SessionCheck, SessionContext, SessionStart, SIGNATURE_HEADER,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize)]
pub struct WebhookAccepted {
    pub verified: bool,
    pub event_type: Option<String>,
}

#[derive(Deserialize)]
pub struct ValidateFormRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    pub fields: BTreeMap<String, FormFieldInput>,
}

#[derive(Serialize)]
pub struct ValidateFormResponse {
    #[serde(flatten)]
    pub validation: FormValidation,
    pub alerts: Vec<SecurityAlert>,
}

#[derive(Deserialize)]
pub struct EncryptFieldRequest {
    pub table_name: String,
    pub record_id: String,
    pub field_name: String,
    pub value: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct DecryptFieldRequest {
    pub encrypted_value: Option<String>,
    pub table_name: String,
    pub record_id: String,
    pub field_name: String,
}

#[derive(Serialize)]
pub struct DecryptFieldResponse {
    pub value: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct RateLimitRequest {
    pub identifier: Option<String>,
    pub action: Option<String>,
}

#[derive(Deserialize)]
pub struct LogEventRequest {
    pub event_type: SecurityEventType,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub details: Value,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct AlertQuery {
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct AlertUpdate {
    pub status: AlertStatus,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct AnomalyQuery {
    pub user_id: Option<String>,
}

pub async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response<Body>, AppError> {
    if !authorized(req.headers(), &state.admin_token) {
        return Err(AppError::unauthorized("invalid admin token"));
    }
    Ok(next.run(req).await)
}

/// An empty configured token rejects every caller.
fn authorized(headers: &HeaderMap, expected: &str) -> bool {
    let token = extract_bearer_token(headers);
    !expected.trim().is_empty() && token.as_deref() == Some(expected)
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now(),
    })
}

pub async fn geo_check(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Response<Body>, AppError> {
    let ip_address = client_ip(peer, &headers);
    let decision = state
        .kernel
        .check_geo(&ip_address, &header_values(&headers))
        .await?;
    let status = if decision.allowed {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    };
    Ok((status, Json(decision)).into_response())
}

pub async fn verify_webhook(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAccepted>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let ip_address = Some(client_ip(peer, &headers));
    let payload = body.clone();
    with_kernel(&state, move |kernel| {
        kernel.verify_webhook(&payload, signature.as_deref(), ip_address)
    })
    .await?;

    let event_type = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|value| value.get("type").and_then(Value::as_str).map(str::to_string));
    debug!(event_type = ?event_type, "webhook verified");
    Ok(Json(WebhookAccepted {
        verified: true,
        event_type,
    }))
}

pub async fn validate_form(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<ValidateFormRequest>,
) -> Result<Json<ValidateFormResponse>, AppError> {
    let ip_address = Some(client_ip(peer, &headers));
    let (validation, alerts) = with_kernel(&state, move |kernel| {
        kernel.validate_form(payload.user_id, ip_address, &payload.fields)
    })
    .await?;
    Ok(Json(ValidateFormResponse { validation, alerts }))
}

pub async fn encrypt_field(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EncryptFieldRequest>,
) -> Result<Json<EncryptedField>, AppError> {
    let field = with_kernel(&state, move |kernel| {
        kernel.encrypt_field(
            &payload.table_name,
            &payload.record_id,
            &payload.field_name,
            &payload.value,
        )
    })
    .await?;
    Ok(Json(field))
}

pub async fn decrypt_field(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DecryptFieldRequest>,
) -> Result<Json<DecryptFieldResponse>, AppError> {
    let value = with_kernel(&state, move |kernel| {
        kernel.decrypt_field(
            payload.encrypted_value.as_deref(),
            &payload.table_name,
            &payload.record_id,
            &payload.field_name,
        )
    })
    .await?;
    Ok(Json(DecryptFieldResponse { value }))
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(mut start): Json<SessionStart>,
) -> Result<Response<Body>, AppError> {
    start.ip_address = start.ip_address.or_else(|| Some(client_ip(peer, &headers)));
    start.user_agent = start.user_agent.or_else(|| user_agent(&headers));
    let opened = with_kernel(&state, move |kernel| kernel.create_session(start)).await?;
    let status = if opened.session.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::FORBIDDEN
    };
    Ok((status, Json(opened)).into_response())
}

pub async fn validate_session(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(mut context): Json<SessionContext>,
) -> Result<Json<SessionCheck>, AppError> {
    context.ip_address = context.ip_address.or_else(|| Some(client_ip(peer, &headers)));
    context.user_agent = context.user_agent.or_else(|| user_agent(&headers));
    let check = with_kernel(&state, move |kernel| kernel.check_session(&session_id, &context)).await?;
    Ok(Json(check))
}

pub async fn terminate_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionRecord>, AppError> {
    let session = with_kernel(&state, move |kernel| kernel.terminate_session(&session_id)).await?;
    Ok(Json(session))
}

pub async fn assess_risk(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(mut input): Json<RiskInput>,
) -> Result<Json<RiskAssessment>, AppError> {
    input.ip_address = input.ip_address.or_else(|| Some(client_ip(peer, &headers)));
    input.user_agent = input.user_agent.or_else(|| user_agent(&headers));
    let assessment = with_kernel(&state, move |kernel| Ok(kernel.assess_risk(&input))).await?;
    Ok(Json(assessment))
}

pub async fn check_rate_limit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<RateLimitRequest>,
) -> Result<Response<Body>, AppError> {
    let identifier = payload
        .identifier
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| client_ip(peer, &headers));
    let action = payload
        .action
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_RATE_LIMIT_ACTION.to_string());
    let decision =
        with_kernel(&state, move |kernel| kernel.check_rate_limit(&identifier, &action)).await?;
    let status = if decision.allowed {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };
    Ok((status, Json(decision)).into_response())
}

pub async fn inspect(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(mut req): Json<SecurityRequest>,
) -> Result<Response<Body>, AppError> {
    req.ip_address = req.ip_address.or_else(|| Some(client_ip(peer, &headers)));
    req.user_agent = req.user_agent.or_else(|| user_agent(&headers));
    let verdict = with_kernel(&state, move |kernel| kernel.inspect(req)).await?;
    let status = match (verdict.allowed, verdict.rate_limit.as_ref()) {
        (true, _) => StatusCode::OK,
        (false, Some(decision)) if !decision.allowed => StatusCode::TOO_MANY_REQUESTS,
        (false, _) => StatusCode::FORBIDDEN,
    };
    Ok((status, Json(verdict)).into_response())
}

pub async fn log_event(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<LogEventRequest>,
) -> Result<Response<Body>, AppError> {
    let mut event = SecurityEvent::new(payload.event_type)
        .with_user(payload.user_id)
        .with_ip(payload.ip_address.or_else(|| Some(client_ip(peer, &headers))))
        .with_user_agent(payload.user_agent.or_else(|| user_agent(&headers)))
        .with_details(payload.details);
    if let Some(severity) = payload.severity {
        event = event.with_severity(severity);
    }
    let recorded: RecordedEvent = with_kernel(&state, move |kernel| kernel.record_event(event)).await?;
    Ok((StatusCode::CREATED, Json(recorded)).into_response())
}

pub async fn sanitize_error(Json(raw): Json<RawError>) -> Json<SanitizedError> {
    Json(sanitize_raw_error(&raw))
}

pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventQuery>,
) -> Result<Json<Vec<SecurityEvent>>, AppError> {
    let events = with_kernel(&state, move |kernel| Ok(kernel.repository().list_events(&query)?)).await?;
    Ok(Json(events))
}

pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertQuery>,
) -> Result<Json<Vec<SecurityAlert>>, AppError> {
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(value) => Some(
            AlertStatus::parse(value)
                .ok_or_else(|| AppError::bad_request(format!("unknown alert status: {value}")))?,
        ),
    };
    let alerts = with_kernel(&state, move |kernel| Ok(kernel.repository().list_alerts(status)?)).await?;
    Ok(Json(alerts))
}

pub async fn update_alert(
    State(state): State<Arc<AppState>>,
    Path(alert_id): Path<String>,
    Json(update): Json<AlertUpdate>,
) -> Result<Json<SecurityAlert>, AppError> {
    let alert = with_kernel(&state, move |kernel| {
        Ok(kernel
            .repository()
            .update_alert_status(&alert_id, update.status)?)
    })
    .await?;
    debug!(alert_id = %alert.id, status = alert.status.as_str(), "alert updated");
    Ok(Json(alert))
}

pub async fn list_anomalies(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnomalyQuery>,
) -> Result<Json<Vec<SessionAnomaly>>, AppError> {
    let anomalies = with_kernel(&state, move |kernel| {
        Ok(kernel.repository().list_anomalies(query.user_id.as_deref())?)
    })
    .await?;
    Ok(Json(anomalies))
}

pub async fn get_metrics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SecurityMetrics>, AppError> {
    if let Some(metrics) = state.kernel.monitor().latest() {
        return Ok(Json(metrics));
    }
    let metrics = with_kernel(&state, |kernel| Ok(kernel.monitor().refresh()?)).await?;
    Ok(Json(metrics))
}

pub async fn event_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.kernel.subscribe()).filter_map(|item| async move {
        let event = match item {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "event stream lagged");
                return None;
            }
        };
        let payload = serde_json::to_string(&event).ok()?;
        Some(Ok(Event::default()
            .event(event.event_type.as_str())
            .id(event.id.clone())
            .data(payload)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn with_kernel<F, R>(state: &Arc<AppState>, op: F) -> Result<R, AppError>
where
    F: FnOnce(&SecurityKernel) -> Result<R, KernelError> + Send + 'static,
    R: Send + 'static,
{
    let kernel = state.kernel.clone();
    tokio::task::spawn_blocking(move || op(&kernel).map_err(AppError::from))
        .await
        .map_err(|err| AppError::internal(err.to_string()))?
}

/// The socket peer, unless the peer is a private or loopback proxy: then
/// the first `x-forwarded-for` hop, else `x-real-ip`, else the peer itself.
fn client_ip(peer: SocketAddr, headers: &HeaderMap) -> String {
    let peer_ip = peer.ip();
    if !is_private_or_loopback(peer_ip) {
        return peer_ip.to_string();
    }
    forwarded_ip(headers).unwrap_or_else(|| peer_ip.to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };
    forwarded.or_else(real_ip).map(str::to_string)
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn header_values(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?;
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::HeaderValue;
    use lendguard_control::{from_config_with_stores, ControlPlaneStores, SystemConfigLoader};
    use lendguard_kernel::{sign, FieldKind, StaticGeoLookup};
    use serde_json::json;

    const ADMIN_TOKEN: &str = "admin-token";
    const WEBHOOK_SECRET: &str = "hook-secret";

    fn test_config(token: &str) -> lendguard_control::SystemConfig {
        let raw = format!(
            "storage = {{ sqlite_path = \"\" }}\n\
             security = {{ admin_token = \"{token}\", webhook_secret = \"{WEBHOOK_SECRET}\", master_key = \"test-master-key\" }}\n\
             geo = {{ allowed_country = \"US\" }}\n"
        );
        SystemConfigLoader::from_str(&raw).expect("config")
    }

    fn build_state(token: &str) -> Arc<AppState> {
        build_state_in(token, "US")
    }

    fn build_state_in(token: &str, fallback_country: &str) -> Arc<AppState> {
        let config = test_config(token);
        let bundle = from_config_with_stores(&config, ControlPlaneStores::in_memory());
        let geo = StaticGeoLookup::shared(Some(fallback_country));
        let kernel = SecurityKernel::new(crate::state::kernel_config(&config), bundle, geo);
        Arc::new(AppState::new(&config, Arc::new(kernel)))
    }

    /// A reverse proxy on the same host.
    fn loopback() -> ConnectInfo<SocketAddr> {
        ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40_000)))
    }

    fn peer(addr: &str) -> SocketAddr {
        addr.parse().expect("socket addr")
    }

    async fn serve(state: Arc<AppState>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let app = crate::router(state).into_make_service_with_connect_info::<SocketAddr>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).expect("header value"));
        }
        map
    }

    async fn body_json(response: Response<Body>) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&body).expect("json body")
    }

    fn field(value: &str, kind: FieldKind) -> FormFieldInput {
        FormFieldInput {
            value: value.to_string(),
            kind,
            required: true,
        }
    }

    #[test]
    fn admin_token_must_match_and_be_configured() {
        let good = headers(&[("authorization", "Bearer admin-token")]);
        let bad = headers(&[("authorization", "Bearer nope")]);
        assert!(authorized(&good, ADMIN_TOKEN));
        assert!(!authorized(&bad, ADMIN_TOKEN));
        assert!(!authorized(&HeaderMap::new(), ADMIN_TOKEN));
        assert!(!authorized(&headers(&[("authorization", "Bearer  ")]), ""));
        assert!(!authorized(&good, ""));
    }

    #[test]
    fn client_ip_prefers_first_forwarded_hop_behind_proxy() {
        let proxy = peer("10.0.0.2:8443");
        let map = headers(&[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(client_ip(proxy, &map), "203.0.113.7");
        let map = headers(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_ip(proxy, &map), "198.51.100.2");
        assert_eq!(client_ip(proxy, &HeaderMap::new()), "10.0.0.2");
    }

    #[test]
    fn client_ip_ignores_forwarded_headers_from_public_peer() {
        let direct = peer("198.51.100.77:51234");
        let map = headers(&[
            ("x-forwarded-for", "10.0.0.1"),
            ("x-real-ip", "127.0.0.1"),
        ]);
        assert_eq!(client_ip(direct, &map), "198.51.100.77");
        assert_eq!(client_ip(peer("[::1]:9000"), &HeaderMap::new()), "::1");
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let Json(body) = health().await;
        assert_eq!(body.status, "ok");
    }

    #[tokio::test]
    async fn geo_check_allows_private_and_blocks_proxies() {
        let state = build_state(ADMIN_TOKEN);
        let ok = geo_check(
            State(state.clone()),
            loopback(),
            headers(&[("x-real-ip", "192.168.1.20"), ("user-agent", "Mozilla/5.0")]),
        )
        .await
        .expect("geo check");
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(body_json(ok).await["allowed"], true);

        let blocked = geo_check(
            State(state.clone()),
            loopback(),
            headers(&[
                ("x-forwarded-for", "8.8.8.8"),
                ("user-agent", "Googlebot/2.1"),
            ]),
        )
        .await
        .expect("geo check");
        assert_eq!(blocked.status(), StatusCode::FORBIDDEN);

        let Json(events) = list_events(State(state), Query(EventQuery::default()))
            .await
            .expect("events");
        assert!(events
            .iter()
            .any(|event| event.event_type == SecurityEventType::GeoBlocked));
    }

    #[tokio::test]
    async fn webhook_requires_valid_signature() {
        let state = build_state(ADMIN_TOKEN);
        let body = br#"{"type":"loan.updated","id":"ln_1"}"#;
        let signature = sign(WEBHOOK_SECRET, body).expect("sign");

        let Json(accepted) = verify_webhook(
            State(state.clone()),
            loopback(),
            headers(&[(SIGNATURE_HEADER, signature.as_str())]),
            Bytes::from_static(body),
        )
        .await
        .expect("verified");
        assert!(accepted.verified);
        assert_eq!(accepted.event_type.as_deref(), Some("loan.updated"));

        let err = verify_webhook(
            State(state.clone()),
            loopback(),
            headers(&[(SIGNATURE_HEADER, "sha256=00")]),
            Bytes::from_static(body),
        )
        .await
        .err()
        .expect("rejected");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert!(!err.to_string().contains("hex"));

        let err = verify_webhook(
            State(state),
            loopback(),
            HeaderMap::new(),
            Bytes::from_static(body),
        )
        .await
        .err()
        .expect("missing header");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn validate_form_flags_injection() {
        let state = build_state(ADMIN_TOKEN);
        let mut fields = BTreeMap::new();
        fields.insert("email".to_string(), field("jane@example.com", FieldKind::Email));
        fields.insert(
            "notes".to_string(),
            field("<script>alert(1)</script>", FieldKind::Text),
        );
        let Json(result) = validate_form(
            State(state),
            loopback(),
            headers(&[("x-real-ip", "203.0.113.9")]),
            Json(ValidateFormRequest {
                user_id: Some("u-1".to_string()),
                fields,
            }),
        )
        .await
        .expect("validate form");
        assert!(!result.validation.valid);
        assert!(result
            .validation
            .fields
            .iter()
            .any(|f| f.field == "email" && f.valid));
        assert!(!result.alerts.is_empty());
    }

    #[tokio::test]
    async fn encrypted_field_round_trips_through_storage() {
        let state = build_state(ADMIN_TOKEN);
        let Json(stored) = encrypt_field(
            State(state.clone()),
            Json(EncryptFieldRequest {
                table_name: "borrowers".to_string(),
                record_id: "b-1".to_string(),
                field_name: "ssn".to_string(),
                value: "123-45-6789".to_string(),
            }),
        )
        .await
        .expect("encrypt");
        assert_ne!(stored.encrypted_value, "123-45-6789");

        let Json(plain) = decrypt_field(
            State(state.clone()),
            Json(DecryptFieldRequest {
                table_name: "borrowers".to_string(),
                record_id: "b-1".to_string(),
                field_name: "ssn".to_string(),
                ..DecryptFieldRequest::default()
            }),
        )
        .await
        .expect("decrypt");
        assert_eq!(plain.value, "123-45-6789");

        let err = decrypt_field(
            State(state),
            Json(DecryptFieldRequest {
                table_name: "borrowers".to_string(),
                record_id: "missing".to_string(),
                field_name: "ssn".to_string(),
                ..DecryptFieldRequest::default()
            }),
        )
        .await
        .err()
        .expect("not found");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn session_lifecycle_over_http() {
        let state = build_state(ADMIN_TOKEN);
        let start = SessionStart {
            user_id: "officer-1".to_string(),
            ..SessionStart::default()
        };
        let response = create_session(
            State(state.clone()),
            loopback(),
            headers(&[("x-real-ip", "10.1.2.3"), ("user-agent", "Mozilla/5.0")]),
            Json(start),
        )
        .await
        .expect("create session");
        assert_eq!(response.status(), StatusCode::CREATED);
        let opened = body_json(response).await;
        let session_id = opened["session"]["session_id"]
            .as_str()
            .expect("session id")
            .to_string();
        assert_eq!(opened["session"]["ip_address"], "10.1.2.3");

        let Json(check) = validate_session(
            State(state.clone()),
            loopback(),
            Path(session_id.clone()),
            HeaderMap::new(),
            Json(SessionContext::default()),
        )
        .await
        .expect("validate");
        assert!(check.valid);

        let Json(closed) = terminate_session(State(state.clone()), Path(session_id.clone()))
            .await
            .expect("terminate");
        assert!(!closed.is_active);

        let Json(check) = validate_session(
            State(state.clone()),
            loopback(),
            Path(session_id.clone()),
            HeaderMap::new(),
            Json(SessionContext::default()),
        )
        .await
        .expect("validate");
        assert!(!check.valid);

        let err = terminate_session(State(state), Path("unknown".to_string()))
            .await
            .err()
            .expect("unknown session");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rate_limit_returns_too_many_requests() {
        let state = build_state(ADMIN_TOKEN);
        let mut last = StatusCode::OK;
        for _ in 0..6 {
            let response = check_rate_limit(
                State(state.clone()),
                loopback(),
                HeaderMap::new(),
                Json(RateLimitRequest {
                    identifier: Some("borrower@example.com".to_string()),
                    action: Some("login".to_string()),
                }),
            )
            .await
            .expect("rate limit");
            last = response.status();
        }
        assert_eq!(last, StatusCode::TOO_MANY_REQUESTS);

        let response = check_rate_limit(
            State(state.clone()),
            ConnectInfo("198.51.100.40:5000".parse().expect("addr")),
            HeaderMap::new(),
            Json(RateLimitRequest::default()),
        )
        .await
        .expect("peer identifier");
        assert_eq!(response.status(), StatusCode::OK);
        let decision = body_json(response).await;
        assert_eq!(decision["remaining"], 99);
    }

    #[tokio::test]
    async fn inspect_rejects_sql_injection() {
        let state = build_state(ADMIN_TOKEN);
        let mut req = SecurityRequest {
            user_id: Some("u-7".to_string()),
            ..SecurityRequest::default()
        };
        req.fields.insert(
            "search".to_string(),
            field("' OR 1=1 --", FieldKind::Text),
        );
        let response = inspect(
            State(state.clone()),
            loopback(),
            headers(&[("x-real-ip", "10.0.0.8")]),
            Json(req),
        )
        .await
        .expect("inspect");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let verdict = body_json(response).await;
        assert_eq!(verdict["allowed"], false);
        assert_eq!(verdict["rejected_by"], "input_validation");
    }

    #[tokio::test]
    async fn logged_events_escalate_and_alerts_can_be_resolved() {
        let state = build_state(ADMIN_TOKEN);
        let response = log_event(
            State(state.clone()),
            loopback(),
            HeaderMap::new(),
            Json(LogEventRequest {
                event_type: SecurityEventType::DataAccess,
                severity: Some(Severity::Critical),
                user_id: Some("u-9".to_string()),
                ip_address: None,
                user_agent: None,
                details: json!({ "table": "borrowers" }),
            }),
        )
        .await
        .expect("log event");
        assert_eq!(response.status(), StatusCode::CREATED);

        let Json(alerts) = list_alerts(
            State(state.clone()),
            Query(AlertQuery {
                status: Some("open".to_string()),
            }),
        )
        .await
        .expect("alerts");
        assert_eq!(alerts.len(), 1);

        let Json(resolved) = update_alert(
            State(state.clone()),
            Path(alerts[0].id.clone()),
            Json(AlertUpdate {
                status: AlertStatus::Resolved,
            }),
        )
        .await
        .expect("resolve");
        assert_eq!(resolved.status, AlertStatus::Resolved);

        let Json(open) = list_alerts(
            State(state.clone()),
            Query(AlertQuery {
                status: Some("open".to_string()),
            }),
        )
        .await
        .expect("alerts");
        assert!(open.is_empty());

        let err = list_alerts(
            State(state.clone()),
            Query(AlertQuery {
                status: Some("closed".to_string()),
            }),
        )
        .await
        .err()
        .expect("bad status");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let Json(metrics) = get_metrics(State(state)).await.expect("metrics");
        assert_eq!(metrics.critical_alerts, 0);
        assert_eq!(metrics.total_events_24h, 1);
    }

    #[tokio::test]
    async fn sanitize_error_hides_details() {
        let Json(sanitized) = sanitize_error(Json(RawError::new(
            "duplicate key value violates unique constraint \"borrowers_pkey\"",
        )))
        .await;
        assert!(!sanitized.message.contains("borrowers_pkey"));
    }

    #[tokio::test]
    async fn geo_check_ignores_spoofed_private_address_from_public_peer() {
        let state = build_state_in(ADMIN_TOKEN, "GB");
        let spoofed = geo_check(
            State(state.clone()),
            ConnectInfo(peer("81.2.69.142:50000")),
            headers(&[("x-forwarded-for", "10.0.0.1"), ("user-agent", "Mozilla/5.0")]),
        )
        .await
        .expect("geo check");
        assert_eq!(spoofed.status(), StatusCode::FORBIDDEN);
        let decision = body_json(spoofed).await;
        assert_eq!(decision["country_code"], "GB");

        let local = geo_check(
            State(state),
            loopback(),
            headers(&[("user-agent", "Mozilla/5.0")]),
        )
        .await
        .expect("geo check");
        assert_eq!(local.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn router_guards_admin_and_field_routes_with_bearer_token() {
        let base = serve(build_state(ADMIN_TOKEN)).await;
        let client = reqwest::Client::new();

        let health = client
            .get(format!("{base}/health"))
            .send()
            .await
            .expect("health");
        assert_eq!(health.status(), reqwest::StatusCode::OK);

        let anonymous = client
            .get(format!("{base}/api/admin/events"))
            .send()
            .await
            .expect("events");
        assert_eq!(anonymous.status(), reqwest::StatusCode::UNAUTHORIZED);
        let wrong = client
            .get(format!("{base}/api/admin/events"))
            .bearer_auth("nope")
            .send()
            .await
            .expect("events");
        assert_eq!(wrong.status(), reqwest::StatusCode::UNAUTHORIZED);
        let admin = client
            .get(format!("{base}/api/admin/events"))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .expect("events");
        assert_eq!(admin.status(), reqwest::StatusCode::OK);

        let field = json!({
            "table_name": "borrowers",
            "record_id": "b-9",
            "field_name": "ssn",
            "value": "123-45-6789",
        });
        let event = json!({ "event_type": "data_access", "user_id": "u-1" });
        for (path, body) in [
            ("/functions/encrypt-field", field.clone()),
            ("/functions/decrypt-field", field.clone()),
            ("/api/security/events", event.clone()),
        ] {
            let response = client
                .post(format!("{base}{path}"))
                .json(&body)
                .send()
                .await
                .expect("post");
            assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED, "{path}");
        }

        let stored = client
            .post(format!("{base}/functions/encrypt-field"))
            .bearer_auth(ADMIN_TOKEN)
            .json(&field)
            .send()
            .await
            .expect("encrypt");
        assert_eq!(stored.status(), reqwest::StatusCode::OK);
        let plain = client
            .post(format!("{base}/functions/decrypt-field"))
            .bearer_auth(ADMIN_TOKEN)
            .json(&field)
            .send()
            .await
            .expect("decrypt");
        assert_eq!(plain.status(), reqwest::StatusCode::OK);
        let plain: Value = plain.json().await.expect("decrypt body");
        assert_eq!(plain["value"], "123-45-6789");
        let logged = client
            .post(format!("{base}/api/security/events"))
            .bearer_auth(ADMIN_TOKEN)
            .json(&event)
            .send()
            .await
            .expect("log event");
        assert_eq!(logged.status(), reqwest::StatusCode::CREATED);
    }

    #[tokio::test]
    async fn router_rejects_everyone_when_admin_token_is_empty() {
        let base = serve(build_state("")).await;
        let response = reqwest::Client::new()
            .get(format!("{base}/api/admin/metrics"))
            .bearer_auth("anything")
            .send()
            .await
            .expect("metrics");
        assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn event_stream_delivers_recorded_events() {
        let state = build_state(ADMIN_TOKEN);
        let base = serve(state.clone()).await;
        let mut response = reqwest::Client::new()
            .get(format!("{base}/api/admin/events/stream"))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .expect("stream");
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/event-stream"));

        state
            .kernel
            .record_event(
                SecurityEvent::new(SecurityEventType::DataAccess).with_user(Some("u-3".to_string())),
            )
            .expect("record");

        let mut received = String::new();
        let read = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while let Some(chunk) = response.chunk().await.expect("chunk") {
                received.push_str(&String::from_utf8_lossy(&chunk));
                if received.contains("\n\n") {
                    break;
                }
            }
        })
        .await;
        assert!(read.is_ok(), "no event within timeout");
        assert!(received.contains("event: data_access"));
        assert!(received.contains("\"u-3\""));
    }
}
