use super::state::ServerState;
use crate::user::AuthTokenValue;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::IntoResponse,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, error};

/// A logged-in user, resolved from the session cookie or the
/// `Authorization` header.
#[derive(Debug)]
pub struct Session {
    pub user_id: i64,
    pub token: String,
}

pub const COOKIE_SESSION_TOKEN_KEY: &str = "session_token";
pub const HEADER_SESSION_TOKEN_KEY: &str = "Authorization";

pub enum SessionExtractionError {
    AccessDenied,
    InternalError,
}

impl IntoResponse for SessionExtractionError {
    fn into_response(self) -> axum::response::Response {
        let status = match self {
            SessionExtractionError::AccessDenied => StatusCode::FORBIDDEN,
            SessionExtractionError::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        };
        status.into_response()
    }
}

/// Cookie first, header second. Empty values count as missing.
fn session_token(parts: &Parts) -> Option<String> {
    let from_cookie = CookieJar::from_headers(&parts.headers)
        .get(COOKIE_SESSION_TOKEN_KEY)
        .map(|cookie| cookie.value().to_string());
    let from_header = || {
        parts
            .headers
            .get(HEADER_SESSION_TOKEN_KEY)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
    };
    from_cookie
        .filter(|token| !token.is_empty())
        .or_else(from_header)
        .filter(|token| !token.is_empty())
}

impl FromRequestParts<ServerState> for Session {
    type Rejection = SessionExtractionError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = session_token(parts) else {
            debug!("No session token in cookies nor headers");
            return Err(SessionExtractionError::AccessDenied);
        };

        match ctx.user_manager.get_auth_token(&AuthTokenValue(token)) {
            Ok(Some(auth_token)) => Ok(Session {
                user_id: auth_token.user_id,
                token: auth_token.value.0,
            }),
            Ok(None) => {
                debug!("Unknown session token");
                Err(SessionExtractionError::AccessDenied)
            }
            Err(e) => {
                error!("Failed to look up session token: {:#}", e);
                Err(SessionExtractionError::InternalError)
            }
        }
    }
}
