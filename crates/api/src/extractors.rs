//! Request extractors.

use axum::{extract::FromRequestParts, http::request::Parts};
use haggle_common::AppError;
use haggle_core::UserSummary;

/// Authenticated user extractor.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserSummary);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Set by the auth middleware
        parts
            .extensions
            .get::<UserSummary>()
            .cloned()
            .map(AuthUser)
            .ok_or(AppError::Unauthorized)
    }
}

/// Authenticated administrator extractor.
#[derive(Debug, Clone)]
pub struct AdminUser(pub UserSummary);

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;

        if !user.is_admin() {
            return Err(AppError::Forbidden("Administrator access required".to_string()));
        }

        Ok(Self(user))
    }
}
