use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use super::AppState;
use super::error::ApiError;
use crate::model::UserId;
use crate::observability::AUTH_FAILURES_TOTAL;

/// Identity proven by an `Authorization: Bearer` header, if one was sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Caller(pub Option<UserId>);

impl Caller {
    /// Decide which user a request acts for. A token always wins; a
    /// `userId` that disagrees with it is refused.
    pub fn acting_user(&self, claimed: Option<UserId>) -> Result<UserId, ApiError> {
        match (&self.0, claimed) {
            (Some(authed), Some(claimed)) if *authed != claimed => Err(ApiError::Forbidden(
                "userId does not match the authenticated account".into(),
            )),
            (Some(authed), _) => Ok(authed.clone()),
            (None, Some(claimed)) => Ok(claimed),
            (None, None) => Err(ApiError::BadRequest("userId is required".into())),
        }
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(header) = parts.headers.get(AUTHORIZATION) else {
            return Ok(Caller(None));
        };
        let token = header
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("expected a Bearer token".into()))?;

        match state.accounts.authenticate(token).await {
            Ok(user) => Ok(Caller(Some(user))),
            Err(e) => {
                metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
                tracing::debug!(error = %e, "bearer token rejected");
                Err(ApiError::Unauthorized("invalid credentials".into()))
            }
        }
    }
}
