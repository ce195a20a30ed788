//! Application definition, including all HTTP route handlers.
//!
//! Route handlers are bundled via [`setup`] into an [`axum::Router`], which can then be run
//! using [`run`] at the configured port (see [`config`][`super::config`]).

use std::{
    any::Any,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{self, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::Level;
use types_rs::auth::LoginRequest;

use crate::{
    anonymity_set::{self, FoldError},
    config::{Config, MAX_REQUEST_SIZE},
    crypto::CryptoError,
    election,
    state::AppState,
    vote::{self, SubmitVoteError},
    voter::{self, HasVoted, VoterError},
};

/// Prepares the application to be run within an HTTP server.
///
/// Requires a provisioned pool inside `state` (see
/// [`provision`][`crate::provision::provision`]). Every handler is cut off
/// after `request_timeout`. Run the application with [`run`] with the result
/// of this function.
pub fn setup(state: AppState, request_timeout: Duration) -> Router {
    let _entered = tracing::span!(Level::DEBUG, "Setting up application").entered();
    Router::new()
        .route("/api/status", get(get_status))
        .route("/login", post(login))
        .route("/admin/users", get(list_voters))
        .route("/users/:email", get(get_user))
        .route("/lrs/generate-keys", get(generate_keys))
        .route("/lrs/sign", post(sign))
        .route("/keys/store", post(store_keys))
        .route(
            "/keys/public/folded",
            get(get_folded_public_keys).put(fold_public_keys),
        )
        .route(
            "/keys/public/folded/exists",
            get(get_folded_public_keys_exist),
        )
        .route("/fabric/vote", put(submit_vote))
        .route("/voter/has-voted", post(record_has_voted))
        .route("/admin/election/close", post(close_election))
        .route("/election/closed", get(get_election_closed))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_SIZE))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(
            CorsLayer::new()
                .allow_methods([
                    Method::HEAD,
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                ])
                .allow_headers(cors::Any)
                .allow_origin(cors::Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Create and run an HTTP server using the provided application at the port
/// from [`config`][`super::config`].
pub async fn run(app: Router, config: &Config) -> color_eyre::Result<()> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.port);
    tracing::info!("Server listening at http://{addr}/");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else {
        "unknown panic"
    };
    tracing::error!("Handler panicked: {details}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal server error" })),
    )
        .into_response()
}

/// Always responds with a successful status. Used to check whether the server
/// is running.
async fn get_status() -> impl IntoResponse {
    StatusCode::OK
}

async fn login(
    State(AppState { pool, hasher, .. }): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, Error> {
    Ok(Json(voter::login(&pool, &hasher, request).await?))
}

async fn list_voters(
    State(AppState { pool, .. }): State<AppState>,
) -> Result<impl IntoResponse, Error> {
    Ok(Json(voter::get_voters(&pool).await?))
}

async fn get_user(
    State(AppState { pool, .. }): State<AppState>,
    Path(email): Path<String>,
) -> Result<impl IntoResponse, Error> {
    Ok(Json(voter::get_user(&pool, &email).await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateKeysResponse {
    public_key: String,
    private_key: String,
}

async fn generate_keys(
    State(AppState { crypto, .. }): State<AppState>,
) -> Result<impl IntoResponse, Error> {
    let key_pair = voter::generate_key_pair(&crypto).await?;
    Ok(Json(GenerateKeysResponse {
        public_key: key_pair.public_key,
        private_key: key_pair.private_key,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest {
    #[serde(default)]
    folded_public_keys: String,
    #[serde(default)]
    private_key_content: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct SignResponse {
    signature: String,
}

async fn sign(
    State(AppState { crypto, .. }): State<AppState>,
    Json(request): Json<SignRequest>,
) -> Result<impl IntoResponse, Error> {
    for (name, value) in [
        ("foldedPublicKeys", &request.folded_public_keys),
        ("privateKeyContent", &request.private_key_content),
        ("message", &request.message),
    ] {
        if value.is_empty() {
            return Err(Error::BadRequest(format!("missing {name}")));
        }
    }

    let signature = voter::sign(
        &crypto,
        request.folded_public_keys,
        request.private_key_content,
        request.message,
    )
    .await?;
    Ok(Json(SignResponse { signature }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreKeysRequest {
    email: String,
    public_key: String,
    #[serde(default)]
    private_key: Option<String>,
}

async fn store_keys(
    State(AppState { pool, profile, .. }): State<AppState>,
    Json(request): Json<StoreKeysRequest>,
) -> Result<impl IntoResponse, Error> {
    if request.public_key.trim().is_empty() {
        return Err(Error::BadRequest("missing publicKey".to_owned()));
    }
    voter::store_keys(
        &pool,
        profile,
        &request.email,
        &request.public_key,
        request.private_key.as_deref(),
    )
    .await?;
    Ok(Json(json!({ "success": true })))
}

async fn get_folded_public_keys(
    State(AppState { pool, .. }): State<AppState>,
) -> Result<impl IntoResponse, Error> {
    anonymity_set::folded_public_keys(&pool)
        .await?
        .ok_or_else(|| Error::NotFound("public keys have not been folded".to_owned()))
}

async fn get_folded_public_keys_exist(
    State(AppState { pool, .. }): State<AppState>,
) -> Result<impl IntoResponse, Error> {
    Ok(anonymity_set::folded_public_keys_exist(&pool)
        .await?
        .to_string())
}

async fn fold_public_keys(
    State(AppState {
        pool,
        crypto,
        ledger,
        ..
    }): State<AppState>,
) -> Result<impl IntoResponse, Error> {
    let folded = anonymity_set::fold_anonymity_set(&pool, &crypto, ledger.as_ref()).await?;
    Ok((StatusCode::CREATED, folded))
}

#[derive(Debug, Serialize)]
struct SubmitVoteResponse {
    key: String,
}

async fn submit_vote(
    State(AppState { pool, ledger, .. }): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, Error> {
    let key = vote::submit_vote(&pool, ledger.as_ref(), &body).await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitVoteResponse {
            key: key.to_string(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct HasVotedRequest {
    email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HasVotedResponse {
    has_voted: bool,
    already_voted: bool,
}

async fn record_has_voted(
    State(AppState { pool, .. }): State<AppState>,
    Json(HasVotedRequest { email }): Json<HasVotedRequest>,
) -> Result<impl IntoResponse, Error> {
    let outcome = voter::record_has_voted(&pool, &email).await?;
    Ok(Json(HasVotedResponse {
        has_voted: true,
        already_voted: outcome == HasVoted::AlreadyVoted,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CloseElectionResponse {
    already_closed: bool,
}

async fn close_election(
    State(AppState { pool, .. }): State<AppState>,
) -> Result<impl IntoResponse, Error> {
    let outcome = election::close_election(&pool).await?;
    Ok(Json(CloseElectionResponse {
        already_closed: outcome.already_closed(),
    }))
}

async fn get_election_closed(
    State(AppState { pool, .. }): State<AppState>,
) -> Result<impl IntoResponse, Error> {
    Ok(election::is_election_closed(&pool).await?.to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_gateway_client::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Other(#[from] color_eyre::Report),
}

impl From<FoldError> for Error {
    fn from(error: FoldError) -> Self {
        match error {
            FoldError::AlreadyFolded => Self::Conflict(error.to_string()),
            FoldError::Crypto(e) => e.into(),
            FoldError::Database(e) => Self::Database(e),
            FoldError::Task(e) => Self::Other(e.into()),
        }
    }
}

impl From<CryptoError> for Error {
    fn from(error: CryptoError) -> Self {
        match error {
            CryptoError::InsufficientKeys { .. } => Self::Unprocessable(error.to_string()),
            e => Self::Other(e.into()),
        }
    }
}

impl From<SubmitVoteError> for Error {
    fn from(error: SubmitVoteError) -> Self {
        match error {
            SubmitVoteError::Invalid(message) => Self::BadRequest(message),
            SubmitVoteError::ElectionClosed => Self::Conflict(error.to_string()),
            SubmitVoteError::Database(e) => Self::Database(e),
            SubmitVoteError::Ledger(e) => Self::Ledger(e),
        }
    }
}

impl From<VoterError> for Error {
    fn from(error: VoterError) -> Self {
        match error {
            VoterError::InvalidEmail(message) => Self::BadRequest(message),
            VoterError::InvalidCredentials => Self::Unauthorized(error.to_string()),
            VoterError::NotFound(_) => Self::NotFound(error.to_string()),
            VoterError::Crypto(e) => e.into(),
            VoterError::Database(e) => Self::Database(e),
            e @ (VoterError::Credential(_) | VoterError::Task(_)) => Self::Other(e.into()),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Ledger(_) => StatusCode::BAD_GATEWAY,
            Error::Database(_) | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let json = Json(json!({ "error": self.to_string() }));
        tracing::error!("Responding with error: {status} {json:?}");
        (status, json).into_response()
    }
}
