use std::sync::Arc;

use askama::Template;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, Uri, header},
    response::{Html, IntoResponse, Response},
    routing,
};
use serde::Serialize;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::url_service::{CreateUrlError, GetUrlError, UrlService};

const UNABLE_TO_SHORTEN: &str = "Unable to create shortened url";

#[derive(Clone)]
pub struct AppState {
    pub url_service: Arc<dyn UrlService>,
    pub url_host: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", routing::get(index))
        .route("/new/{*url}", routing::get(new_url))
        .route("/{slug}", routing::get(redirect_url))
        .fallback(not_found)
        .with_state(state)
}

#[derive(Serialize)]
pub struct Error {
    pub error: String,
    pub error_id: String,
}

fn error_response(status: StatusCode, error: impl Into<String>, err_uuid: Uuid) -> Response {
    (
        status,
        Json(Error {
            error: error.into(),
            error_id: err_uuid.to_string(),
        }),
    )
        .into_response()
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate<'a> {
    host: &'a str,
}

#[instrument(skip(state))]
async fn index(State(state): State<AppState>) -> Response {
    match (IndexTemplate {
        host: &state.url_host,
    })
    .render()
    {
        Ok(body) => Html(body).into_response(),
        Err(err) => {
            let err_uuid = Uuid::new_v4();
            error!(?err_uuid, ?err, "Failed to render index page");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                err_uuid,
            )
        }
    }
}

#[instrument(skip(state))]
async fn new_url(State(state): State<AppState>, Path(url): Path<String>, uri: Uri) -> Response {
    // The wildcard only captures the path, so the query string is reattached by hand.
    let url = match uri.query() {
        Some(query) => format!("{url}?{query}"),
        None => url,
    };

    match state.url_service.create_url(&url).await {
        Ok(shortened_url) => {
            info!(slug = %shortened_url.slug, "Created short url");
            (StatusCode::CREATED, Json(shortened_url)).into_response()
        }
        Err(error) => {
            let err_uuid = Uuid::new_v4();
            match error {
                CreateUrlError::InvalidUrl => {
                    info!(?err_uuid, ?error, "User submitted a bad request");
                    error_response(StatusCode::BAD_REQUEST, error.to_string(), err_uuid)
                }
                CreateUrlError::AllocationExhausted | CreateUrlError::DeadlineExceeded(_) => {
                    error!(?err_uuid, ?error, "Unable to allocate a slug in time");
                    error_response(StatusCode::BAD_REQUEST, UNABLE_TO_SHORTEN, err_uuid)
                }
                CreateUrlError::Internal(_) => {
                    error!(?err_uuid, ?error, "Encountered an error during a request");
                    error_response(StatusCode::BAD_REQUEST, UNABLE_TO_SHORTEN, err_uuid)
                }
            }
        }
    }
}

#[instrument(skip(state))]
async fn redirect_url(State(state): State<AppState>, Path(slug): Path<String>) -> Response {
    match state.url_service.get_url(&slug).await {
        Ok(redirect) => match HeaderValue::try_from(redirect.url) {
            Ok(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
            Err(err) => {
                let err_uuid = Uuid::new_v4();
                error!(?err_uuid, ?err, %slug, "Stored url is not a valid Location header");
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    err_uuid,
                )
            }
        },
        Err(error) => {
            let err_uuid = Uuid::new_v4();
            match error {
                GetUrlError::NotFound => {
                    info!(?err_uuid, slug, "No url found for slug");
                    error_response(StatusCode::NOT_FOUND, error.to_string(), err_uuid)
                }
                GetUrlError::DeadlineExceeded(_) => {
                    error!(?err_uuid, ?error, "Timed out looking up slug");
                    error_response(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Internal server error",
                        err_uuid,
                    )
                }
                GetUrlError::Internal(_) => {
                    error!(?err_uuid, ?error, "Encountered database error");
                    error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error",
                        err_uuid,
                    )
                }
            }
        }
    }
}

#[instrument]
async fn not_found(uri: Uri) -> Response {
    let err_uuid = Uuid::new_v4();
    info!(?err_uuid, "No route matched");
    error_response(StatusCode::NOT_FOUND, "Not found", err_uuid)
}
