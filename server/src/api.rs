//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the marketplace over HTTP. All
//! endpoints share application state through axum's `State` extractor.
//! Authenticated endpoints expect `Authorization: Bearer <token>`.
//!
//! ## Endpoints
//!
//! | Method | Path                               | Description                        |
//! |--------|------------------------------------|------------------------------------|
//! | GET    | `/health`                          | Liveness probe                     |
//! | POST   | `/listings`                        | Create a listing owned by caller   |
//! | GET    | `/listings/:id`                    | Listing by id                      |
//! | GET    | `/transactions?type=`              | Caller's transactions              |
//! | POST   | `/transactions`                    | Initiate a purchase                |
//! | GET    | `/transactions/:id`                | Transaction by id                  |
//! | POST   | `/transactions/:id/payment-proof`  | Upload proof (multipart `proof`)   |
//! | GET    | `/transactions/:id/payment-proof`  | Download proof (participants only) |
//! | PUT    | `/transactions/:id/confirm-payment`| Seller confirms payment            |
//! | PUT    | `/transactions/:id/ship`           | Seller marks shipped               |
//! | PUT    | `/transactions/:id/delivered`      | Buyer confirms delivery            |
//! | GET    | `/ratings/:user_id`                | Ratings received and average       |
//! | POST   | `/ratings/:user_id`                | Rate a user                        |
//! | GET    | `/ws?token=`                       | Live events for the caller         |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::{
        header::{AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS},
        HeaderMap, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use wardrobe_core::artifact::ArtifactStore;
use wardrobe_core::config::{BEARER_PREFIX, MAX_ARTIFACT_BYTES};
use wardrobe_core::identity::{Session, SessionVerifier};
use wardrobe_core::storage::{Listing, MarketDB, Rating};
use wardrobe_core::transaction::{ListingId, TransactionId, TransactionState, UserId};
use wardrobe_engine::{
    EngineError, EngineResult, RatingGate, RoleFilter, TransactionEngine, TransactionView,
};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone, since everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TransactionEngine>,
    pub ratings: Arc<RatingGate>,
    /// Listing catalog reads and writes.
    pub db: Arc<MarketDB>,
    pub verifier: Arc<SessionVerifier>,
    /// Where uploaded payment proofs are stored.
    pub artifacts: Arc<dyn ArtifactStore>,
    /// Broadcast channel for live event notifications.
    pub event_tx: broadcast::Sender<MarketEvent>,
    pub metrics: SharedMetrics,
}

/// Events pushed to WebSocket subscribers.
///
/// Each subscriber only receives events it is a party to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MarketEvent {
    /// A transaction was created or moved to a new state.
    #[serde(rename = "transaction_updated")]
    TransactionUpdated {
        transaction_id: TransactionId,
        listing_id: ListingId,
        state: TransactionState,
        buyer_id: UserId,
        seller_id: UserId,
        timestamp: i64,
    },
    /// A user received a rating.
    #[serde(rename = "rating_recorded")]
    RatingRecorded {
        rater_id: UserId,
        ratee_id: UserId,
        score: u8,
        timestamp: i64,
    },
}

impl MarketEvent {
    fn from_view(view: &TransactionView) -> Self {
        Self::TransactionUpdated {
            transaction_id: view.transaction.id,
            listing_id: view.transaction.listing_id,
            state: view.transaction.state,
            buyer_id: view.buyer_id(),
            seller_id: view.seller_id,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    fn from_rating(rating: &Rating) -> Self {
        Self::RatingRecorded {
            rater_id: rating.rater_id,
            ratee_id: rating.ratee_id,
            score: rating.score,
            timestamp: rating.created_at.timestamp_millis(),
        }
    }

    /// Whether `user` should see this event.
    pub fn involves(&self, user: UserId) -> bool {
        match self {
            Self::TransactionUpdated {
                buyer_id,
                seller_id,
                ..
            } => user == *buyer_id || user == *seller_id,
            Self::RatingRecorded {
                rater_id, ratee_id, ..
            } => user == *rater_id || user == *ratee_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/listings", post(create_listing_handler))
        .route("/listings/:id", get(listing_handler))
        .route(
            "/transactions",
            get(list_transactions_handler).post(initiate_handler),
        )
        .route("/transactions/:id", get(transaction_handler))
        .route(
            "/transactions/:id/payment-proof",
            get(payment_proof_file_handler).post(payment_proof_handler),
        )
        .route("/transactions/:id/confirm-payment", put(confirm_payment_handler))
        .route("/transactions/:id/ship", put(ship_handler))
        .route("/transactions/:id/delivered", put(delivered_handler))
        .route(
            "/ratings/:user_id",
            get(ratings_handler).post(rate_user_handler),
        )
        .route("/ws", get(ws_handler))
        // Room for the multipart envelope around a maximum-size upload.
        .layer(DefaultBodyLimit::max(MAX_ARTIFACT_BYTES + 64 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateListingRequest {
    pub title: String,
    pub price: u64,
}

#[derive(Debug, Deserialize)]
pub struct InitiateRequest {
    pub listing_id: ListingId,
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ShipRequest {
    pub tracking_info: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RateRequest {
    pub score: i64,
    pub transaction_id: Option<TransactionId>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(rename = "type", default)]
    pub filter: RoleFilter,
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: String,
}

/// Error body returned by every endpoint on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable outcome code, e.g. `not_found`.
    pub error: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// An engine error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

/// HTTP status for each engine outcome.
pub fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
        EngineError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        EngineError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        EngineError::Conflict(_) => StatusCode::CONFLICT,
        EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        EngineError::Artifact(e) if e.is_rejection() => StatusCode::BAD_REQUEST,
        EngineError::Artifact(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let message = if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
            "internal error".to_string()
        } else {
            self.0.to_string()
        };
        let body = ErrorResponse {
            error: self.0.code().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

fn invalid(message: impl Into<String>) -> ApiError {
    ApiError(EngineError::InvalidArgument(message.into()))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Resolves the caller from the bearer token.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Session, ApiError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix(BEARER_PREFIX))
        .ok_or_else(|| {
            ApiError(EngineError::Unauthenticated(
                "missing bearer token".into(),
            ))
        })?;
    Ok(state.verifier.verify(token).map_err(EngineError::from)?)
}

/// Unparseable ids cannot name a transaction, so they are not found.
fn parse_transaction_id(raw: &str) -> Result<TransactionId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError(EngineError::NotFound("transaction")))
}

/// Records metrics for a committed or refused transition and publishes it.
fn finish_transition(
    state: &AppState,
    event: &'static str,
    result: EngineResult<TransactionView>,
) -> Result<TransactionView, ApiError> {
    match result {
        Ok(view) => {
            state
                .metrics
                .transitions_applied_total
                .with_label_values(&[event])
                .inc();
            // No subscribers is not an error.
            let _ = state.event_tx.send(MarketEvent::from_view(&view));
            Ok(view)
        }
        Err(e) => Err(reject(state, e)),
    }
}

fn reject(state: &AppState, err: EngineError) -> ApiError {
    state
        .metrics
        .transitions_rejected_total
        .with_label_values(&[err.code()])
        .inc();
    ApiError(err)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: returns 200 if the server is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `POST /listings`: creates a listing owned by the caller.
///
/// A stand-in for the catalog service, enough to drive transactions.
async fn create_listing_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateListingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = authenticate(&state, &headers)?;
    let title = req.title.trim();
    if title.is_empty() {
        return Err(invalid("title must not be empty"));
    }
    let listing = state
        .db
        .create_listing(session.user_id, title.to_string(), req.price)
        .map_err(EngineError::from)?;
    tracing::info!(listing_id = listing.listing_id, owner_id = listing.owner_id, "listing created");
    Ok((StatusCode::CREATED, Json(listing)))
}

/// `GET /listings/:id`: returns a listing.
async fn listing_handler(
    State(state): State<AppState>,
    Path(id): Path<ListingId>,
) -> Result<Json<Listing>, ApiError> {
    state
        .db
        .get_listing(id)
        .map_err(EngineError::from)?
        .map(Json)
        .ok_or(ApiError(EngineError::NotFound("listing")))
}

/// `GET /transactions?type=all|buying|selling`: the caller's transactions.
async fn list_transactions_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<TransactionView>>, ApiError> {
    let session = authenticate(&state, &headers)?;
    Ok(Json(state.engine.list_transactions(&session, params.filter)?))
}

/// `POST /transactions`: opens a purchase.
async fn initiate_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<InitiateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let _timer = state
        .metrics
        .request_latency_seconds
        .with_label_values(&["initiate"])
        .start_timer();
    let session = authenticate(&state, &headers)?;

    match state.engine.initiate(&session, req.listing_id, req.message) {
        Ok(view) => {
            state.metrics.transactions_initiated_total.inc();
            let _ = state.event_tx.send(MarketEvent::from_view(&view));
            Ok((StatusCode::CREATED, Json(view)))
        }
        Err(e) => Err(reject(&state, e)),
    }
}

/// `GET /transactions/:id`: a transaction the caller takes part in.
async fn transaction_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<TransactionView>, ApiError> {
    let session = authenticate(&state, &headers)?;
    let id = parse_transaction_id(&id)?;
    Ok(Json(state.engine.get_transaction(&session, id)?))
}

/// `POST /transactions/:id/payment-proof`: multipart upload, field `proof`.
async fn payment_proof_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<TransactionView>, ApiError> {
    let _timer = state
        .metrics
        .request_latency_seconds
        .with_label_values(&["submit_payment_proof"])
        .start_timer();
    let session = authenticate(&state, &headers)?;
    let id = parse_transaction_id(&id)?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| invalid(format!("malformed multipart body: {e}")))?
    {
        if field.name() == Some("proof") {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| invalid(format!("failed to read upload: {e}")))?;
            upload = Some((file_name, bytes));
            break;
        }
    }
    let (file_name, bytes) = upload.ok_or_else(|| invalid("missing multipart field \"proof\""))?;

    let result =
        state
            .engine
            .upload_payment_proof(&session, id, &bytes, &file_name, state.artifacts.as_ref());
    finish_transition(&state, "submit_payment_proof", result).map(Json)
}

/// `GET /transactions/:id/payment-proof`: the stored proof file.
///
/// Only the buyer and the listing owner can fetch it; everyone else gets
/// the same 404 as for an unknown transaction.
async fn payment_proof_file_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let session = authenticate(&state, &headers)?;
    let id = parse_transaction_id(&id)?;
    let (proof, bytes) = state
        .engine
        .payment_proof(&session, id, state.artifacts.as_ref())?;

    Ok((
        [
            (CONTENT_TYPE, proof.content_type().to_string()),
            (
                CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", proof.file_name()),
            ),
            (X_CONTENT_TYPE_OPTIONS, "nosniff".to_string()),
        ],
        bytes,
    )
        .into_response())
}

/// `PUT /transactions/:id/confirm-payment`: seller acknowledges payment.
async fn confirm_payment_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<TransactionView>, ApiError> {
    let _timer = state
        .metrics
        .request_latency_seconds
        .with_label_values(&["confirm_payment"])
        .start_timer();
    let session = authenticate(&state, &headers)?;
    let id = parse_transaction_id(&id)?;
    let result = state.engine.confirm_payment(&session, id);
    finish_transition(&state, "confirm_payment", result).map(Json)
}

/// `PUT /transactions/:id/ship`: seller ships, body `{tracking_info?}`.
async fn ship_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<ShipRequest>>,
) -> Result<Json<TransactionView>, ApiError> {
    let _timer = state
        .metrics
        .request_latency_seconds
        .with_label_values(&["mark_shipped"])
        .start_timer();
    let session = authenticate(&state, &headers)?;
    let id = parse_transaction_id(&id)?;
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let result = state.engine.mark_shipped(&session, id, req.tracking_info);
    finish_transition(&state, "mark_shipped", result).map(Json)
}

/// `PUT /transactions/:id/delivered`: buyer confirms reception.
async fn delivered_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<TransactionView>, ApiError> {
    let _timer = state
        .metrics
        .request_latency_seconds
        .with_label_values(&["confirm_delivery"])
        .start_timer();
    let session = authenticate(&state, &headers)?;
    let id = parse_transaction_id(&id)?;
    let result = state.engine.confirm_delivery(&session, id);
    finish_transition(&state, "confirm_delivery", result).map(Json)
}

/// `GET /ratings/:user_id`: ratings a user received, newest first.
async fn ratings_handler(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.ratings.summary(user_id)?))
}

/// `POST /ratings/:user_id`: rate a user, optionally for a transaction.
async fn rate_user_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(ratee_id): Path<UserId>,
    Json(req): Json<RateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = authenticate(&state, &headers)?;
    match state
        .ratings
        .record_rating(&session, ratee_id, req.score, req.transaction_id)
    {
        Ok(rating) => {
            state.metrics.ratings_recorded_total.inc();
            let _ = state.event_tx.send(MarketEvent::from_rating(&rating));
            Ok((StatusCode::CREATED, Json(rating)))
        }
        Err(e) => Err(reject(&state, e)),
    }
}

/// `GET /ws?token=`: WebSocket upgrade for live event streaming.
///
/// The token is checked before upgrading. Clients receive JSON-encoded
/// [`MarketEvent`]s that involve them until they disconnect or their
/// session expires. Client messages are ignored.
async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let session = state
        .verifier
        .verify(&params.token)
        .map_err(EngineError::from)?;
    Ok(ws.on_upgrade(move |socket| handle_ws_connection(socket, state, session)))
}

/// Drives a single WebSocket connection, forwarding matching broadcast
/// events until the client disconnects, the session expires, or the
/// channel is closed.
async fn handle_ws_connection(mut socket: WebSocket, state: AppState, session: Session) {
    let mut rx = state.event_tx.subscribe();
    state.metrics.ws_connections.inc();

    let remaining = (session.expires_at - Utc::now())
        .to_std()
        .unwrap_or_default();
    let expiry = tokio::time::sleep(remaining);
    tokio::pin!(expiry);

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) if ev.involves(session.user_id) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize ws event: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(user_id = session.user_id, "ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
            _ = &mut expiry => {
                tracing::debug!(user_id = session.user_id, "ws session expired");
                break;
            }
        }
    }

    state.metrics.ws_connections.dec();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
