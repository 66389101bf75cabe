//! # Error Handling
//!
//! Problem+json error responses for the connector's HTTP surface, with trace
//! ID propagation.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::oauth::OAuthError;
use crate::telemetry;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<Box<serde_json::Value>>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            trace_id: Self::current_trace_id(),
        }
    }

    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Trace ID of the running request, or a short correlation ID outside one
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]).into_boxed_str())
            })
    }
}

/// Standard error types with predefined status codes
#[derive(Debug, Error)]
pub enum ErrorType {
    #[error("Not Found")]
    NotFound,
    #[error("Internal Server Error")]
    InternalServerError,
}

impl ErrorType {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorType::NotFound => StatusCode::NOT_FOUND,
            ErrorType::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ErrorType::NotFound => "NOT_FOUND",
            ErrorType::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }
}

/// Upstream service error information
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpstreamError {
    /// Upstream identifier ("github" or "travis")
    pub service: String,
    /// HTTP status code from upstream, when one was received
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Response body snippet from upstream (truncated)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_snippet: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(trace_id) = &self.trace_id
            && let Ok(header_value) = HeaderValue::from_str(trace_id)
        {
            headers.insert("x-trace-id", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<ErrorType> for ApiError {
    fn from(error_type: ErrorType) -> Self {
        Self::new(
            error_type.status_code(),
            error_type.error_code(),
            &error_type.to_string(),
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            &format!("Invalid query string: {}", rejection.body_text()),
        )
    }
}

impl From<OAuthError> for ApiError {
    fn from(error: OAuthError) -> Self {
        match &error {
            OAuthError::InvalidState => forbidden(Some("OAuth state is unknown or expired")),
            OAuthError::MissingCode => validation_error(
                "Authorization code is required",
                json!({ "field": "code" }),
            ),
            OAuthError::NotConfigured => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "GitHub OAuth is not configured",
            ),
            OAuthError::Upstream {
                service,
                status,
                message,
            } => upstream_error(service, *status, Some(message.clone())),
            OAuthError::Http(err) => {
                tracing::warn!(error = %err, "OAuth upstream request failed");
                upstream_error("github", None, Some(err.to_string()))
            }
            OAuthError::InvalidUrl(err) => {
                tracing::error!(error = %err, "OAuth URL could not be built");
                ErrorType::InternalServerError.into()
            }
        }
    }
}

/// Create an upstream error (502)
pub fn upstream_error(service: &str, status: Option<u16>, body: Option<String>) -> ApiError {
    let upstream = UpstreamError {
        service: service.to_string(),
        status,
        body_snippet: body.map(|b| {
            if b.chars().count() > 200 {
                let truncated: String = b.chars().take(200).collect();
                format!("{}...", truncated)
            } else {
                b
            }
        }),
    };

    let message = match status {
        Some(status) => format!("Upstream {} returned error status {}", service, status),
        None => format!("Upstream {} request failed", service),
    };

    ApiError::new(StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", &message).with_details(json!(upstream))
}

/// Create a forbidden error (403)
pub fn forbidden(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Insufficient permissions");
    ApiError::new(StatusCode::FORBIDDEN, "FORBIDDEN", msg)
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_basic() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", "Test error message");

        assert_eq!(error.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(error.message, Box::from("Test error message"));
        assert_eq!(error.details, None);
        assert!(error.trace_id.is_some());
    }

    #[test]
    fn test_error_type_mapping() {
        let not_found_error: ApiError = ErrorType::NotFound.into();
        assert_eq!(not_found_error.code, Box::from("NOT_FOUND"));
        assert_eq!(not_found_error.message, Box::from("Not Found"));
    }

    #[test]
    fn test_query_rejection_is_problem_json_bad_request() {
        let uri: axum::http::Uri = "/travis_token?isPrivate=yes&code=a&code=b".parse().unwrap();
        let rejection = axum::extract::Query::<std::collections::HashMap<String, u32>>::try_from_uri(&uri)
            .unwrap_err();
        let api_error: ApiError = rejection.into();
        assert_eq!(api_error.status, StatusCode::BAD_REQUEST);
        assert_eq!(api_error.code, Box::from("VALIDATION_FAILED"));
        assert!(api_error.message.starts_with("Invalid query string"));
    }

    #[test]
    fn test_oauth_errors_map_to_statuses() {
        let invalid: ApiError = OAuthError::InvalidState.into();
        assert_eq!(invalid.status, StatusCode::FORBIDDEN);

        let upstream: ApiError = OAuthError::Upstream {
            service: "travis".to_string(),
            status: Some(403),
            message: "access denied".to_string(),
        }
        .into();
        assert_eq!(upstream.status, StatusCode::BAD_GATEWAY);
        assert_eq!(
            upstream.details.as_deref(),
            Some(&json!({ "service": "travis", "status": 403, "body_snippet": "access denied" }))
        );
    }

    #[test]
    fn test_upstream_body_truncated_on_char_boundary() {
        let body = "é".repeat(300);
        let error = upstream_error("github", Some(500), Some(body));
        let snippet = error.details.unwrap()["body_snippet"]
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(snippet.chars().count(), 203);
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn test_content_type_header() {
        let response = ApiError::new(StatusCode::FORBIDDEN, "FORBIDDEN", "nope").into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
        assert!(response.headers().contains_key("x-trace-id"));
    }
}
