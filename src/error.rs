use actix_web::http::{header::ContentType, StatusCode};
use actix_web::{HttpResponse, ResponseError};

use crate::mail::MailError;
use crate::repo::RepoError;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("not found")] NotFound,
    #[error("unauthorized")] Unauthorized,
    #[error("forbidden")] Forbidden,
    #[error("mail delivery failed: {0}")] Mail(#[from] MailError),
    #[error("template error: {0}")] Template(#[from] tera::Error),
    #[error("internal error: {0}")] Internal(String),
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            // handlers resolve conflicts they expect; any other one is a bug
            RepoError::Conflict => ApiError::Internal("unexpected store conflict".into()),
            RepoError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Mail(_) | ApiError::Template(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        // details of server-side failures stay in the log
        let reason = status.canonical_reason().unwrap_or("Error");
        let body = format!(
            "<!DOCTYPE html><html><head><title>{code} {reason}</title></head>\
             <body><h1>{code} {reason}</h1><p><a href=\"/\">Back to all posts</a></p></body></html>",
            code = status.as_u16(),
        );
        HttpResponse::build(status).content_type(ContentType::html()).body(body)
    }
}
