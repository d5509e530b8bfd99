//! HTTP front: the request/response surface over [`actions`](crate::actions).
//!
//! POST bodies are accepted as JSON or as URL-encoded forms; GET parameters
//! come from the query string. Every response body is an
//! [`Outcome`](lendkit_core::Outcome) and the status code reflects the error
//! class.

use std::net::SocketAddr;

use axum::{
    extract::{rejection::QueryRejection, FromRequest, Query, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use lendkit_core::{LendKitError, LendKitResult, Outcome};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, info, warn};

use crate::{actions, Services};

/// Builds the router.
pub fn build_router(services: Services) -> Router {
    Router::new()
        .route("/admin", post(handle_admin))
        .route("/user", post(handle_user))
        .route("/book", post(handle_register_book).get(handle_query_book))
        .route("/book/request", post(handle_request_rent))
        .route("/book/rent", post(handle_rent_book))
        .route("/book/return", post(handle_return_book))
        .route("/book/list", get(handle_list_books))
        .route("/book/history", get(handle_history))
        .route("/health", get(handle_health))
        .with_state(services)
}

/// Serves the router on `bind` until Ctrl-C.
///
/// # Errors
///
/// Fails if the address cannot be bound or the server stops with an I/O error.
pub async fn serve(services: Services, bind: SocketAddr) -> eyre::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %listener.local_addr()?, "lendkit server listening");
    axum::serve(listener, build_router(services))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("lendkit server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }
}

/// HTTP status for a failed operation.
#[must_use]
pub const fn status_for(error: &LendKitError) -> StatusCode {
    match error {
        LendKitError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
        LendKitError::InvalidSecret { .. } => StatusCode::UNAUTHORIZED,
        LendKitError::UnauthorizedRegistrar { .. } => StatusCode::FORBIDDEN,
        LendKitError::IdentityNotFound { .. } => StatusCode::NOT_FOUND,
        LendKitError::AlreadyExists { .. } | LendKitError::DuplicateRegistration { .. } => {
            StatusCode::CONFLICT
        }
        LendKitError::TransactionRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        LendKitError::AuthorityUnreachable { .. } | LendKitError::NetworkUnreachable { .. } => {
            StatusCode::BAD_GATEWAY
        }
        LendKitError::DiscoveryFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
        LendKitError::OutcomeUnknown { .. } => StatusCode::GATEWAY_TIMEOUT,
        LendKitError::SerializationError { .. }
        | LendKitError::Crypto { .. }
        | LendKitError::Storage(_)
        | LendKitError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond(result: LendKitResult<Outcome>) -> Response {
    match result {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(error) => {
            warn!(%error, "request failed");
            (status_for(&error), Json(Outcome::failure(&error))).into_response()
        }
    }
}

const MALFORMED_BODY: &str = "malformed request body";
const MALFORMED_QUERY: &str = "malformed query string";

fn bad_request(attribute: &str, reason: &str) -> Response {
    respond(Err(LendKitError::InvalidInput {
        attribute: attribute.to_string(),
        reason: reason.to_string(),
    }))
}

// Parser detail is logged, never returned.
fn malformed_body(detail: &str) -> Response {
    debug!(detail, "rejected request body");
    bad_request("body", MALFORMED_BODY)
}

/// A request body given as JSON or as a URL-encoded form.
pub struct JsonOrForm<T>(pub T);

impl<S, T> FromRequest<S> for JsonOrForm<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"));

        if is_json {
            let Json(body) = Json::<T>::from_request(req, state)
                .await
                .map_err(|e| malformed_body(&e.body_text()))?;
            Ok(Self(body))
        } else {
            let Form(body) = Form::<T>::from_request(req, state)
                .await
                .map_err(|e| malformed_body(&e.body_text()))?;
            Ok(Self(body))
        }
    }
}

fn query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, Response> {
    query
        .map(|Query(params)| params)
        .map_err(|e| {
            debug!(detail = %e.body_text(), "rejected query string");
            bad_request("query", MALFORMED_QUERY)
        })
}

#[derive(Deserialize)]
struct AdminForm {
    #[serde(default)]
    id: String,
    #[serde(default, alias = "pw")]
    secret: String,
}

#[derive(Deserialize)]
struct UserForm {
    #[serde(default)]
    id: String,
    #[serde(default, alias = "userrole")]
    role: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookForm {
    #[serde(default)]
    book_name: String,
    #[serde(default)]
    owner: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RentRequestForm {
    #[serde(default)]
    book_name: String,
    #[serde(default)]
    owner: String,
    #[serde(default)]
    renter: String,
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    id: String,
}

/// POST /admin
async fn handle_admin(
    State(services): State<Services>,
    JsonOrForm(form): JsonOrForm<AdminForm>,
) -> Response {
    info!(id = %form.id, "POST /admin");
    respond(actions::enroll_admin(&services, &form.id, form.secret).await)
}

/// POST /user
async fn handle_user(
    State(services): State<Services>,
    JsonOrForm(form): JsonOrForm<UserForm>,
) -> Response {
    info!(id = %form.id, role = %form.role, "POST /user");
    respond(actions::register_user(&services, &form.id, &form.role).await)
}

/// POST /book
async fn handle_register_book(
    State(services): State<Services>,
    JsonOrForm(form): JsonOrForm<BookForm>,
) -> Response {
    info!(book = %form.book_name, owner = %form.owner, "POST /book");
    respond(actions::register_book(&services, &form.book_name, &form.owner).await)
}

/// GET /book
async fn handle_query_book(
    State(services): State<Services>,
    params: Result<Query<BookForm>, QueryRejection>,
) -> Response {
    let params = match query(params) {
        Ok(params) => params,
        Err(response) => return response,
    };
    info!(book = %params.book_name, owner = %params.owner, "GET /book");
    respond(actions::query_book(&services, &params.book_name, &params.owner).await)
}

/// POST /book/request
async fn handle_request_rent(
    State(services): State<Services>,
    JsonOrForm(form): JsonOrForm<RentRequestForm>,
) -> Response {
    info!(book = %form.book_name, owner = %form.owner, renter = %form.renter, "POST /book/request");
    respond(actions::request_rent(&services, &form.book_name, &form.owner, &form.renter).await)
}

/// POST /book/rent
async fn handle_rent_book(
    State(services): State<Services>,
    JsonOrForm(form): JsonOrForm<BookForm>,
) -> Response {
    info!(book = %form.book_name, owner = %form.owner, "POST /book/rent");
    respond(actions::rent_book(&services, &form.book_name, &form.owner).await)
}

/// POST /book/return
async fn handle_return_book(
    State(services): State<Services>,
    JsonOrForm(form): JsonOrForm<BookForm>,
) -> Response {
    info!(book = %form.book_name, owner = %form.owner, "POST /book/return");
    respond(actions::return_book(&services, &form.book_name, &form.owner).await)
}

/// GET /book/list
async fn handle_list_books(
    State(services): State<Services>,
    params: Result<Query<ListQuery>, QueryRejection>,
) -> Response {
    let params = match query(params) {
        Ok(params) => params,
        Err(response) => return response,
    };
    info!(id = %params.id, "GET /book/list");
    respond(actions::list_books(&services, &params.id).await)
}

/// GET /book/history
async fn handle_history(
    State(services): State<Services>,
    params: Result<Query<BookForm>, QueryRejection>,
) -> Response {
    let params = match query(params) {
        Ok(params) => params,
        Err(response) => return response,
    };
    info!(book = %params.book_name, owner = %params.owner, "GET /book/history");
    respond(actions::book_history(&services, &params.book_name, &params.owner).await)
}

/// GET /health
async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
