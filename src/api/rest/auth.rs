//! Caller identity from the `x-user-id` / `x-user-role` headers set by the
//! upstream auth proxy.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::actor::{Actor, Role};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, AppError> {
    let id = headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized(format!("missing {USER_ID_HEADER} header")))?;
    let id = Uuid::parse_str(id.trim())
        .map_err(|_| AppError::Unauthorized(format!("malformed {USER_ID_HEADER} header")))?;

    let role = match headers.get(USER_ROLE_HEADER) {
        None => Role::Customer,
        Some(value) => value
            .to_str()
            .map_err(|_| AppError::Unauthorized(format!("malformed {USER_ROLE_HEADER} header")))?
            .parse::<Role>()
            .map_err(AppError::Unauthorized)?,
    };

    Ok(Actor { id, role })
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers)
    }
}
