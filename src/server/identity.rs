//! Caller identity as asserted by the upstream access proxy.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::debug;

use super::state::AdminList;
use super::ErrorResponse;

pub const HEADER_PROXY_USER_EMAIL: &str = "Cf-Access-Authenticated-User-Email";
pub const HEADER_USER_EMAIL: &str = "X-User-Email";

/// Email of the caller.
#[derive(Debug, Clone)]
pub struct UserIdentity {
    pub email: String,
}

/// A caller whose email is on the admin list.
#[derive(Debug, Clone)]
pub struct AdminIdentity {
    pub email: String,
}

#[derive(Debug)]
pub enum IdentityError {
    Missing,
    NotAdmin,
}

impl IntoResponse for IdentityError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            IdentityError::Missing => (StatusCode::UNAUTHORIZED, "No user identity provided"),
            IdentityError::NotAdmin => (StatusCode::FORBIDDEN, "Admin access required"),
        };
        (
            status,
            Json(ErrorResponse {
                error: message.to_string(),
            }),
        )
            .into_response()
    }
}

fn email_from_headers(parts: &Parts) -> Option<String> {
    [HEADER_PROXY_USER_EMAIL, HEADER_USER_EMAIL]
        .iter()
        .filter_map(|name| parts.headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .map(|value| value.to_string())
}

impl<S> FromRequestParts<S> for UserIdentity
where
    S: Send + Sync,
{
    type Rejection = IdentityError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match email_from_headers(parts) {
            Some(email) => Ok(UserIdentity { email }),
            None => {
                debug!("No identity header on {}", parts.uri.path());
                Err(IdentityError::Missing)
            }
        }
    }
}

impl<S> FromRequestParts<S> for AdminIdentity
where
    AdminList: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = IdentityError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = UserIdentity::from_request_parts(parts, state).await?;
        if AdminList::from_ref(state).contains(&user.email) {
            Ok(AdminIdentity { email: user.email })
        } else {
            debug!("{} is not an admin", user.email);
            Err(IdentityError::NotAdmin)
        }
    }
}
