use std::sync::Arc;

use actix_web::dev::Payload;
use actix_web::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use actix_web::http::StatusCode;
use actix_web::web::Data;
use actix_web::{FromRequest, HttpRequest, HttpResponse, ResponseError};
use futures_util::future::LocalBoxFuture;

use crate::api::{ErrorDetail, UserId};
use crate::library_repository::{LibraryRepositoryError, UserRepository};

const TOKEN_SCHEMES: [&str; 2] = ["token", "bearer"];

#[derive(thiserror::Error, Debug)]
pub enum AuthenticationError {
    #[error("Authentication credentials were not provided.")]
    MissingCredentials,

    #[error("Invalid token.")]
    InvalidToken,

    #[error("User repository is not configured")]
    NotConfigured,

    #[error("User lookup failed {0}")]
    Repository(#[from] LibraryRepositoryError),
}

impl ResponseError for AuthenticationError {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthenticationError::MissingCredentials | AuthenticationError::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            AuthenticationError::NotConfigured | AuthenticationError::Repository(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self.status_code() {
            StatusCode::UNAUTHORIZED => HttpResponse::Unauthorized()
                .append_header((WWW_AUTHENTICATE, "Token"))
                .json(ErrorDetail::new(self.to_string())),
            status => {
                tracing::error!("Authentication failed {}", self);
                HttpResponse::build(status).json(ErrorDetail::new("A server error occurred."))
            }
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
/// The user owning the request. Taking it as a handler argument makes the endpoint require
/// `Authorization: Token <key>`
pub struct AuthenticatedUser {
    pub id: UserId,
    pub username: String,
}

/// Extracts the key from `Token <key>` or `Bearer <key>`
pub fn parse_authorization_header(header: &str) -> Result<&str, AuthenticationError> {
    let mut parts = header.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(key), None)
            if TOKEN_SCHEMES.contains(&scheme.to_lowercase().as_str()) =>
        {
            Ok(key)
        }
        (None, _, _) => Err(AuthenticationError::MissingCredentials),
        _ => Err(AuthenticationError::InvalidToken),
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = AuthenticationError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let users = req.app_data::<Data<Arc<dyn UserRepository>>>().cloned();
        let header = req
            .headers()
            .get(AUTHORIZATION)
            .map(|value| value.to_str().map(str::to_string));

        Box::pin(async move {
            let header = match header {
                None => return Err(AuthenticationError::MissingCredentials),
                Some(Err(_)) => return Err(AuthenticationError::InvalidToken),
                Some(Ok(header)) => header,
            };
            let key = parse_authorization_header(&header)?;
            let users = users.ok_or(AuthenticationError::NotConfigured)?;

            let user = users
                .find_user_by_token(key)
                .await?
                .ok_or(AuthenticationError::InvalidToken)?;
            Ok(AuthenticatedUser {
                id: user.id,
                username: user.username,
            })
        })
    }
}

impl paperclip::v2::schema::Apiv2Schema for AuthenticatedUser {}

impl paperclip::actix::OperationModifier for AuthenticatedUser {}
