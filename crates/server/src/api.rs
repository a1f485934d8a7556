//! JSON transport over [`WorkflowEngine`], one route per operation.
//!
//! The identity gateway in front of this service resolves the session and
//! forwards the actor as `x-actor-id` and `x-actor-role`. When
//! `server.gateway_token` is configured, every call must also present it as a
//! bearer token so the headers cannot be forged by direct callers.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rankguard_core::engine::{
    AcceptTerms, Cancellation, Completion, Decision, NewQuoteRequest, OpenNegotiation, Purchase,
    PurchaseReceipt, RefundClaim, Rejection, SettlementReceipt,
};
use rankguard_core::{
    Actor, GuaranteeSlot, InterfaceError, ProrationBreakdown, QuoteRequest, QuoteRequestId,
    QuoteRequestStatus, RefundRequest, RefundRequestId, RequestContext, Role, SlotId,
    WorkflowEngine, WorkflowError,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    engine: Arc<WorkflowEngine>,
    gateway_token: Option<SecretString>,
}

impl ApiState {
    pub fn new(engine: Arc<WorkflowEngine>, gateway_token: Option<SecretString>) -> Self {
        Self { engine, gateway_token }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/requests", post(create_request).get(list_requests))
        .route("/api/v1/requests/{id}", get(get_request))
        .route("/api/v1/requests/{id}/negotiate", post(open_negotiation))
        .route("/api/v1/requests/{id}/accept", post(accept_request))
        .route("/api/v1/requests/{id}/reject", post(reject_request))
        .route("/api/v1/requests/{id}/reopen", post(reopen_request))
        .route("/api/v1/requests/{id}/expire", post(expire_request))
        .route("/api/v1/requests/{id}/purchase", post(purchase_request))
        .route("/api/v1/slots/{id}", get(get_slot))
        .route("/api/v1/slots/{id}/approve", post(approve_slot))
        .route("/api/v1/slots/{id}/reject", post(reject_slot))
        .route("/api/v1/slots/{id}/complete", post(complete_slot))
        .route("/api/v1/slots/{id}/cancel", post(cancel_slot))
        .route("/api/v1/slots/{id}/refunds", get(list_refunds).post(request_refund))
        .route("/api/v1/slots/{id}/refund-proposals", post(propose_refund))
        .route("/api/v1/slots/{id}/refund-preview", get(preview_refund))
        .route("/api/v1/refunds/{id}/approve", post(approve_refund))
        .route("/api/v1/refunds/{id}/reject", post(reject_refund))
        .route("/api/v1/refunds/{id}/confirm", post(confirm_refund))
        .route("/api/v1/refunds/{id}/decline", post(decline_refund))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Caller resolution
// ---------------------------------------------------------------------------

/// The resolved actor plus the correlation id for this call.
#[derive(Debug)]
pub struct Caller(pub RequestContext);

impl FromRequestParts<ApiState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ApiState,
    ) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        let correlation_id = header_text(headers, CORRELATION_ID_HEADER)
            .map(str::to_string)
            .unwrap_or_else(|| format!("req-{}", Uuid::new_v4().simple()));

        if let Some(expected) = &state.gateway_token {
            let presented = header_text(headers, header::AUTHORIZATION.as_str())
                .and_then(|value| value.strip_prefix("Bearer "));
            let trusted = presented
                .is_some_and(|token| tokens_match(token.trim(), expected.expose_secret()));
            if !trusted {
                return Err(ApiError(InterfaceError::Forbidden {
                    message: "missing or invalid gateway token".to_string(),
                    correlation_id,
                }));
            }
        }

        let Some(actor_id) = header_text(headers, ACTOR_ID_HEADER) else {
            return Err(bad_request(format!("missing `{ACTOR_ID_HEADER}` header"), correlation_id));
        };
        let Some(raw_role) = header_text(headers, ACTOR_ROLE_HEADER) else {
            return Err(bad_request(
                format!("missing `{ACTOR_ROLE_HEADER}` header"),
                correlation_id,
            ));
        };
        let Some(role) = Role::parse(raw_role) else {
            return Err(bad_request(format!("unknown role `{raw_role}`"), correlation_id));
        };

        let actor = Actor::new(actor_id, role);
        Ok(Self(RequestContext::with_correlation_id(actor, correlation_id)))
    }
}

fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Compares without short-circuiting on the first differing byte.
fn tokens_match(presented: &str, expected: &str) -> bool {
    presented.len() == expected.len()
        && presented.bytes().zip(expected.bytes()).fold(0u8, |diff, (a, b)| diff | (a ^ b)) == 0
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    /// Engine detail for client errors; withheld for server-side failures.
    pub detail: Option<String>,
    pub correlation_id: String,
}

impl ApiError {
    fn from_workflow(error: WorkflowError, context: &RequestContext) -> Self {
        Self(error.into_interface(context.correlation_id.clone()))
    }

    pub fn status(&self) -> StatusCode {
        match self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self.0 {
            InterfaceError::BadRequest { .. } => "bad_request",
            InterfaceError::Forbidden { .. } => "forbidden",
            InterfaceError::NotFound { .. } => "not_found",
            InterfaceError::Conflict { .. } => "conflict",
            InterfaceError::ServiceUnavailable { .. } => "service_unavailable",
            InterfaceError::Internal { .. } => "internal",
        }
    }
}

impl From<InterfaceError> for ApiError {
    fn from(error: InterfaceError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(
                event_name = "api.request_failed",
                correlation_id = %self.0.correlation_id(),
                status = status.as_u16(),
                error = %self.0.message(),
                "request failed on the server side"
            );
        }

        let body = ErrorBody {
            error: self.kind().to_string(),
            message: self.0.user_message().to_string(),
            detail: status.is_client_error().then(|| self.0.message().to_string()),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn bad_request(message: String, correlation_id: String) -> ApiError {
    ApiError(InterfaceError::BadRequest { message, correlation_id })
}

fn respond<T>(context: &RequestContext, result: Result<T, WorkflowError>) -> ApiResult<T> {
    result.map(Json).map_err(|error| ApiError::from_workflow(error, context))
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Quote requests
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ListRequestsQuery {
    /// Comma separated statuses; all statuses when absent.
    pub status: Option<String>,
    pub limit: Option<usize>,
}

fn parse_statuses(raw: Option<&str>) -> Result<Vec<QuoteRequestStatus>, String> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            QuoteRequestStatus::parse(value).ok_or_else(|| format!("unknown status `{value}`"))
        })
        .collect()
}

async fn create_request(
    State(state): State<ApiState>,
    Caller(context): Caller,
    Json(payload): Json<NewQuoteRequest>,
) -> Result<(StatusCode, Json<QuoteRequest>), ApiError> {
    let request = respond(&context, state.engine.create_request(&context, payload).await)?;
    Ok((StatusCode::CREATED, request))
}

async fn list_requests(
    State(state): State<ApiState>,
    Caller(context): Caller,
    Query(query): Query<ListRequestsQuery>,
) -> ApiResult<Vec<QuoteRequest>> {
    let statuses = parse_statuses(query.status.as_deref())
        .map_err(|message| bad_request(message, context.correlation_id.clone()))?;
    respond(&context, state.engine.list_requests(&context, statuses, query.limit).await)
}

async fn get_request(
    State(state): State<ApiState>,
    Caller(context): Caller,
    Path(id): Path<String>,
) -> ApiResult<QuoteRequest> {
    respond(&context, state.engine.get_request(&context, &QuoteRequestId(id)).await)
}

async fn open_negotiation(
    State(state): State<ApiState>,
    Caller(context): Caller,
    Path(id): Path<String>,
    Json(payload): Json<OpenNegotiation>,
) -> ApiResult<QuoteRequest> {
    let id = QuoteRequestId(id);
    respond(&context, state.engine.open_negotiation(&context, &id, payload).await)
}

async fn accept_request(
    State(state): State<ApiState>,
    Caller(context): Caller,
    Path(id): Path<String>,
    Json(payload): Json<AcceptTerms>,
) -> ApiResult<QuoteRequest> {
    let id = QuoteRequestId(id);
    respond(&context, state.engine.accept_request(&context, &id, payload).await)
}

async fn reject_request(
    State(state): State<ApiState>,
    Caller(context): Caller,
    Path(id): Path<String>,
    Json(payload): Json<Rejection>,
) -> ApiResult<QuoteRequest> {
    let id = QuoteRequestId(id);
    respond(&context, state.engine.reject_request(&context, &id, payload).await)
}

async fn reopen_request(
    State(state): State<ApiState>,
    Caller(context): Caller,
    Path(id): Path<String>,
) -> ApiResult<QuoteRequest> {
    respond(&context, state.engine.reopen_request(&context, &QuoteRequestId(id)).await)
}

async fn expire_request(
    State(state): State<ApiState>,
    Caller(context): Caller,
    Path(id): Path<String>,
) -> ApiResult<QuoteRequest> {
    respond(&context, state.engine.expire_request(&context, &QuoteRequestId(id)).await)
}

async fn purchase_request(
    State(state): State<ApiState>,
    Caller(context): Caller,
    Path(id): Path<String>,
    Json(payload): Json<Purchase>,
) -> ApiResult<PurchaseReceipt> {
    let id = QuoteRequestId(id);
    respond(&context, state.engine.purchase_request(&context, &id, payload).await)
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

async fn get_slot(
    State(state): State<ApiState>,
    Caller(context): Caller,
    Path(id): Path<String>,
) -> ApiResult<GuaranteeSlot> {
    respond(&context, state.engine.get_slot(&context, &SlotId(id)).await)
}

async fn approve_slot(
    State(state): State<ApiState>,
    Caller(context): Caller,
    Path(id): Path<String>,
) -> ApiResult<GuaranteeSlot> {
    respond(&context, state.engine.approve_slot(&context, &SlotId(id)).await)
}

async fn reject_slot(
    State(state): State<ApiState>,
    Caller(context): Caller,
    Path(id): Path<String>,
    Json(payload): Json<Rejection>,
) -> ApiResult<GuaranteeSlot> {
    respond(&context, state.engine.reject_slot(&context, &SlotId(id), payload).await)
}

async fn complete_slot(
    State(state): State<ApiState>,
    Caller(context): Caller,
    Path(id): Path<String>,
    Json(payload): Json<Completion>,
) -> ApiResult<SettlementReceipt> {
    respond(&context, state.engine.complete_slot(&context, &SlotId(id), payload).await)
}

async fn cancel_slot(
    State(state): State<ApiState>,
    Caller(context): Caller,
    Path(id): Path<String>,
    Json(payload): Json<Cancellation>,
) -> ApiResult<SettlementReceipt> {
    respond(&context, state.engine.cancel_slot(&context, &SlotId(id), payload).await)
}

async fn list_refunds(
    State(state): State<ApiState>,
    Caller(context): Caller,
    Path(id): Path<String>,
) -> ApiResult<Vec<RefundRequest>> {
    respond(&context, state.engine.list_refunds(&context, &SlotId(id)).await)
}

async fn preview_refund(
    State(state): State<ApiState>,
    Caller(context): Caller,
    Path(id): Path<String>,
) -> ApiResult<ProrationBreakdown> {
    respond(&context, state.engine.preview_refund(&context, &SlotId(id)).await)
}

async fn request_refund(
    State(state): State<ApiState>,
    Caller(context): Caller,
    Path(id): Path<String>,
    Json(payload): Json<RefundClaim>,
) -> Result<(StatusCode, Json<RefundRequest>), ApiError> {
    let refund =
        respond(&context, state.engine.request_refund(&context, &SlotId(id), payload).await)?;
    Ok((StatusCode::CREATED, refund))
}

async fn propose_refund(
    State(state): State<ApiState>,
    Caller(context): Caller,
    Path(id): Path<String>,
    Json(payload): Json<RefundClaim>,
) -> Result<(StatusCode, Json<RefundRequest>), ApiError> {
    let refund =
        respond(&context, state.engine.propose_refund(&context, &SlotId(id), payload).await)?;
    Ok((StatusCode::CREATED, refund))
}

// ---------------------------------------------------------------------------
// Refund decisions
// ---------------------------------------------------------------------------

async fn approve_refund(
    State(state): State<ApiState>,
    Caller(context): Caller,
    Path(id): Path<String>,
    Json(payload): Json<Decision>,
) -> ApiResult<RefundRequest> {
    let id = RefundRequestId(id);
    respond(&context, state.engine.approve_refund(&context, &id, payload).await)
}

async fn reject_refund(
    State(state): State<ApiState>,
    Caller(context): Caller,
    Path(id): Path<String>,
    Json(payload): Json<Decision>,
) -> ApiResult<RefundRequest> {
    let id = RefundRequestId(id);
    respond(&context, state.engine.reject_refund(&context, &id, payload).await)
}

async fn confirm_refund(
    State(state): State<ApiState>,
    Caller(context): Caller,
    Path(id): Path<String>,
    Json(payload): Json<Decision>,
) -> ApiResult<RefundRequest> {
    let id = RefundRequestId(id);
    respond(&context, state.engine.confirm_refund(&context, &id, payload).await)
}

async fn decline_refund(
    State(state): State<ApiState>,
    Caller(context): Caller,
    Path(id): Path<String>,
    Json(payload): Json<Decision>,
) -> ApiResult<RefundRequest> {
    let id = RefundRequestId(id);
    respond(&context, state.engine.decline_refund(&context, &id, payload).await)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use chrono::{TimeZone, Utc};
    use rankguard_core::{
        CampaignId, CampaignMetadata, FixedClock, GuaranteeUnit, RefundSettings, WorkflowEngine,
    };
    use rankguard_db::{
        connect_with_settings, migrations, DbPool, SqlCampaignDirectory, SqlWorkflowStore,
    };
    use rust_decimal::Decimal;
    use secrecy::SecretString;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{parse_statuses, router, tokens_match, ApiState};

    const BUYER: (&str, &str) = ("buyer-1", "advertiser");
    const OTHER_BUYER: (&str, &str) = ("buyer-2", "advertiser");
    const DISTRIBUTOR: (&str, &str) = ("dist-1", "distributor");
    const GUEST: (&str, &str) = ("guest-1", "guest");

    async fn test_app(gateway_token: Option<&str>) -> (Router, DbPool) {
        let pool =
            connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let campaigns = SqlCampaignDirectory::new(pool.clone());
        campaigns
            .save(&CampaignMetadata {
                id: CampaignId("CMP-DAY".to_string()),
                guarantee_unit: GuaranteeUnit::Day,
                refund_settings: RefundSettings(json!({})),
            })
            .await
            .expect("seed campaign");

        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).single().expect("fixed time"),
        ));
        let engine =
            WorkflowEngine::new(Arc::new(SqlWorkflowStore::new(pool.clone())), Arc::new(campaigns))
                .with_clock(clock);
        let token = gateway_token.map(|token| SecretString::from(token.to_string()));

        (router(ApiState::new(Arc::new(engine), token)), pool)
    }

    struct Call<'a> {
        method: &'a str,
        uri: String,
        actor: Option<(&'a str, &'a str)>,
        headers: Vec<(&'a str, &'a str)>,
        body: Option<Value>,
    }

    impl<'a> Call<'a> {
        fn new(method: &'a str, uri: impl Into<String>) -> Self {
            Self { method, uri: uri.into(), actor: None, headers: Vec::new(), body: None }
        }

        fn by(mut self, actor: (&'a str, &'a str)) -> Self {
            self.actor = Some(actor);
            self
        }

        fn header(mut self, name: &'a str, value: &'a str) -> Self {
            self.headers.push((name, value));
            self
        }

        fn json(mut self, body: Value) -> Self {
            self.body = Some(body);
            self
        }

        async fn send(self, app: &Router) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(self.method).uri(&self.uri);
            if let Some((id, role)) = self.actor {
                builder = builder.header("x-actor-id", id).header("x-actor-role", role);
            }
            for (name, value) in self.headers {
                builder = builder.header(name, value);
            }
            let request = match self.body {
                Some(body) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string())),
                None => builder.body(Body::empty()),
            }
            .expect("request");

            let response = app.clone().oneshot(request).await.expect("response");
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).expect("json body")
            };
            (status, value)
        }
    }

    fn new_request() -> Value {
        json!({
            "campaign_id": "CMP-DAY",
            "target_rank": 3,
            "guarantee_count": 10,
            "initial_budget": 120000
        })
    }

    async fn created_request(app: &Router) -> String {
        let (status, body) =
            Call::new("POST", "/api/v1/requests").by(BUYER).json(new_request()).send(app).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().expect("request id").to_string()
    }

    fn decimal(value: &Value) -> Decimal {
        match value {
            Value::String(text) => text.parse().expect("decimal string"),
            other => other.to_string().parse().expect("decimal number"),
        }
    }

    #[tokio::test]
    async fn a_request_runs_from_creation_to_approved_refund_over_http() {
        let (app, pool) = test_app(None).await;
        let id = created_request(&app).await;

        let (status, body) = Call::new("POST", format!("/api/v1/requests/{id}/negotiate"))
            .by(DISTRIBUTOR)
            .json(json!({}))
            .send(&app)
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["status"], "negotiating");
        assert_eq!(body["distributor_id"], "dist-1");

        let (status, body) = Call::new("POST", format!("/api/v1/requests/{id}/accept"))
            .by(DISTRIBUTOR)
            .json(json!({
                "final_daily_amount": 10000,
                "final_budget_type": "daily",
                "final_total_amount": 100000
            }))
            .send(&app)
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["status"], "accepted");

        let (status, body) = Call::new("POST", format!("/api/v1/requests/{id}/purchase"))
            .by(BUYER)
            .json(json!({}))
            .send(&app)
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["request"]["status"], "purchased");
        assert_eq!(body["request"]["start_date"], "2026-04-01");
        assert_eq!(body["slot"]["status"], "pending");
        let slot_id = body["slot"]["id"].as_str().expect("slot id").to_string();

        let (status, body) = Call::new("POST", format!("/api/v1/slots/{slot_id}/approve"))
            .by(DISTRIBUTOR)
            .send(&app)
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["status"], "active");

        let (status, preview) = Call::new("GET", format!("/api/v1/slots/{slot_id}/refund-preview"))
            .by(BUYER)
            .send(&app)
            .await;
        assert_eq!(status, StatusCode::OK, "{preview}");
        assert!(decimal(&preview["refund_amount"]) > Decimal::ZERO);

        let (status, refund) = Call::new("POST", format!("/api/v1/slots/{slot_id}/refunds"))
            .by(BUYER)
            .json(json!({ "refund_reason": "rank dropped below target" }))
            .send(&app)
            .await;
        assert_eq!(status, StatusCode::CREATED, "{refund}");
        assert_eq!(refund["status"], "pending");
        assert_eq!(decimal(&refund["refund_amount"]), decimal(&preview["refund_amount"]));
        let refund_id = refund["id"].as_str().expect("refund id").to_string();

        let (status, body) = Call::new("POST", format!("/api/v1/refunds/{refund_id}/approve"))
            .by(DISTRIBUTOR)
            .json(json!({ "notes": "verified against rank history" }))
            .send(&app)
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["status"], "approved");

        let (status, body) = Call::new("GET", format!("/api/v1/slots/{slot_id}/refunds"))
            .by(BUYER)
            .send(&app)
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body.as_array().map(Vec::len), Some(1));

        pool.close().await;
    }

    #[tokio::test]
    async fn workflow_failures_map_to_status_codes() {
        let (app, pool) = test_app(None).await;
        let id = created_request(&app).await;

        let (status, body) =
            Call::new("GET", "/api/v1/requests/QR-missing").by(BUYER).send(&app).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, body) =
            Call::new("GET", format!("/api/v1/requests/{id}")).by(OTHER_BUYER).send(&app).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");

        let (status, body) = Call::new("POST", "/api/v1/requests")
            .by(GUEST)
            .json(new_request())
            .send(&app)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{body}");

        let (status, body) = Call::new("POST", format!("/api/v1/requests/{id}/purchase"))
            .by(BUYER)
            .json(json!({}))
            .send(&app)
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");
        assert!(body["detail"].as_str().is_some_and(|detail| detail.contains("requested")));

        let (status, body) = Call::new("POST", "/api/v1/requests")
            .by(BUYER)
            .json(json!({ "campaign_id": "CMP-DAY", "target_rank": 0, "guarantee_count": 10 }))
            .send(&app)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");

        pool.close().await;
    }

    #[tokio::test]
    async fn callers_must_identify_themselves() {
        let (app, pool) = test_app(None).await;

        let (status, body) = Call::new("GET", "/api/v1/requests")
            .header("x-correlation-id", "corr-42")
            .send(&app)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["correlation_id"], "corr-42");
        assert!(body["detail"].as_str().is_some_and(|detail| detail.contains("x-actor-id")));

        let (status, body) =
            Call::new("GET", "/api/v1/requests").by(("someone", "superuser")).send(&app).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().is_some_and(|detail| detail.contains("superuser")));

        pool.close().await;
    }

    #[tokio::test]
    async fn gateway_token_is_required_when_configured() {
        let (app, pool) = test_app(Some("s3cret-token")).await;

        let (status, body) = Call::new("GET", "/api/v1/requests").by(BUYER).send(&app).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");

        let (status, _) = Call::new("GET", "/api/v1/requests")
            .by(BUYER)
            .header("authorization", "Bearer wrong-token!")
            .send(&app)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = Call::new("GET", "/api/v1/requests")
            .by(BUYER)
            .header("authorization", "Bearer s3cret-token")
            .send(&app)
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body, json!([]));

        pool.close().await;
    }

    #[tokio::test]
    async fn listing_filters_by_status() {
        let (app, pool) = test_app(None).await;
        let id = created_request(&app).await;

        let (status, body) =
            Call::new("GET", "/api/v1/requests?status=requested").by(BUYER).send(&app).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body[0]["id"], id.as_str());

        let (status, body) =
            Call::new("GET", "/api/v1/requests?status=accepted").by(BUYER).send(&app).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body, json!([]));

        let (status, body) =
            Call::new("GET", "/api/v1/requests?status=bogus").by(BUYER).send(&app).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().is_some_and(|detail| detail.contains("bogus")));

        pool.close().await;
    }

    #[test]
    fn status_lists_parse_and_token_comparison_is_exact() {
        assert_eq!(parse_statuses(None).expect("none"), Vec::new());
        assert_eq!(parse_statuses(Some("requested, accepted")).expect("two").len(), 2);
        assert!(parse_statuses(Some("requested,nope")).is_err());

        assert!(tokens_match("abc", "abc"));
        assert!(!tokens_match("abc", "abd"));
        assert!(!tokens_match("abc", "abcd"));
    }
}
