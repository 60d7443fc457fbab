//! Permission Error Types

use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Business rules that block an otherwise valid request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusinessRule {
    /// The permission group still owns permissions.
    HasPermissions,
    /// The guild role is `leader` or `novice`.
    Protected,
}

impl BusinessRule {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::HasPermissions => "has_permissions",
            Self::Protected => "protected",
        }
    }
}

impl fmt::Display for BusinessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HasPermissions => f.write_str("HasPermissions"),
            Self::Protected => f.write_str("Protected"),
        }
    }
}

/// Errors raised by the permission engine.
#[derive(Debug, Error)]
pub enum AccessError {
    /// Malformed input or duplicate slug.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// No user identity was supplied.
    #[error("Authentication required")]
    Unauthenticated,

    /// The user lacks the required grant.
    #[error("Access forbidden")]
    Forbidden,

    #[error("Business rule violated: {0}")]
    BusinessRule(BusinessRule),

    #[error("Database error")]
    Database(#[from] sqlx::Error),
}

/// Result alias for the permission engine.
pub type AccessResult<T> = Result<T, AccessError>;

impl AccessError {
    /// Translate a failed write into the engine's taxonomy.
    ///
    /// Unique violations become `Validation` (duplicate slug), foreign key
    /// violations become `NotFound` for `entity`.
    pub fn from_write(err: sqlx::Error, entity: &'static str) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return Self::Validation(format!("{entity} slug already taken"));
            }
            if db_err.is_foreign_key_violation() {
                return Self::NotFound(entity);
            }
        }
        Self::Database(err)
    }

    /// Whether the error is one of the guard's authorization failures.
    #[must_use]
    pub const fn is_authorization(&self) -> bool {
        matches!(self, Self::Unauthenticated | Self::Forbidden)
    }
}

impl From<validator::ValidationErrors> for AccessError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, "validation", msg.clone()),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            Self::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                self.to_string(),
            ),
            // Never say which check failed.
            Self::Forbidden => (StatusCode::FORBIDDEN, "forbidden", self.to_string()),
            Self::BusinessRule(rule) => (StatusCode::CONFLICT, rule.code(), self.to_string()),
            Self::Database(err) => {
                tracing::error!("Database error in permissions: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database",
                    "Database error".to_string(),
                )
            }
        };

        (
            status,
            Json(serde_json::json!({ "error": code, "message": message })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(err: AccessError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_status_codes() {
        let cases = [
            (AccessError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (AccessError::NotFound("Permission group"), StatusCode::NOT_FOUND),
            (AccessError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (AccessError::Forbidden, StatusCode::FORBIDDEN),
            (
                AccessError::BusinessRule(BusinessRule::Protected),
                StatusCode::CONFLICT,
            ),
            (
                AccessError::Database(sqlx::Error::RowNotFound),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[tokio::test]
    async fn test_forbidden_body_is_generic() {
        let (status, body) = body_json(AccessError::Forbidden).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");
        assert_eq!(body["message"], "Access forbidden");
        assert_eq!(body.as_object().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_database_body_hides_details() {
        let (_, body) = body_json(AccessError::Database(sqlx::Error::PoolTimedOut)).await;
        assert_eq!(body["message"], "Database error");
    }

    #[tokio::test]
    async fn test_business_rule_body() {
        let (_, body) = body_json(AccessError::BusinessRule(BusinessRule::HasPermissions)).await;
        assert_eq!(body["error"], "has_permissions");
        assert!(body["message"].as_str().unwrap().contains("HasPermissions"));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            AccessError::NotFound("Guild role").to_string(),
            "Guild role not found"
        );
        assert!(AccessError::Forbidden.is_authorization());
        assert!(AccessError::Unauthenticated.is_authorization());
        assert!(!AccessError::NotFound("Guild").is_authorization());
    }

    #[test]
    fn test_non_database_write_errors_pass_through() {
        let err = AccessError::from_write(sqlx::Error::RowNotFound, "Permission");
        assert!(matches!(err, AccessError::Database(_)));
    }
}
