//! OAuth proxy handlers
//!
//! `/authorize` starts the GitHub flow, `/validate_state` checks the state
//! GitHub echoed back, and `/travis_token` turns the code into a Travis CI
//! token without exposing the client secret to the browser.

use axum::{
    extract::{Query, State, rejection::QueryRejection},
    http::{StatusCode, header::LOCATION},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use tracing::{info, warn};
use utoipa::IntoParams;

use crate::error::ApiError;
use crate::models::StateValidation;
use crate::oauth::{OAuthClient, OAuthError, TravisTokenResponse};
use crate::server::AppState;

/// Query of `/validate_state`
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ValidateStateQuery {
    /// State value GitHub returned to the browser
    pub state: Option<String>,
}

/// Query of `/travis_token`
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TravisTokenQuery {
    /// Authorization code GitHub returned to the browser
    pub code: Option<String>,
    /// `yes` to obtain a token for travis-ci.com (private repositories)
    #[serde(rename = "isPrivate")]
    pub is_private: Option<String>,
}

impl TravisTokenQuery {
    fn private(&self) -> bool {
        self.is_private
            .as_deref()
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "yes" | "true" | "1" | "on"))
            .unwrap_or(false)
    }
}

fn oauth_client(state: &AppState) -> Result<&OAuthClient, ApiError> {
    state
        .oauth
        .as_deref()
        .ok_or_else(|| ApiError::from(OAuthError::NotConfigured))
}

/// Redirect the browser to GitHub's authorize page
#[utoipa::path(
    get,
    path = "/authorize",
    responses(
        (status = 302, description = "Redirect to GitHub OAuth authorize page"),
        (status = 503, description = "GitHub OAuth is not configured", body = ApiError)
    ),
    tag = "oauth"
)]
pub async fn authorize(State(state): State<AppState>) -> Result<Response, ApiError> {
    let client = oauth_client(&state)?;
    let oauth_state = state.states.issue();
    let url = client.authorize_url(&oauth_state)?;

    info!(pending_states = state.states.len(), "Redirecting to GitHub authorize page");

    Ok((StatusCode::FOUND, [(LOCATION, url.to_string())]).into_response())
}

/// Check a state value returned by GitHub
#[utoipa::path(
    get,
    path = "/validate_state",
    params(ValidateStateQuery),
    responses(
        (status = 200, description = "State is known and unexpired", body = StateValidation),
        (status = 400, description = "Malformed query string", body = ApiError),
        (status = 403, description = "State is unknown or expired", body = ApiError)
    ),
    tag = "oauth"
)]
pub async fn validate_state(
    State(state): State<AppState>,
    query: Result<Query<ValidateStateQuery>, QueryRejection>,
) -> Result<Json<StateValidation>, ApiError> {
    let Query(query) = query?;
    let candidate = query.state.unwrap_or_default();
    state.states.validate(&candidate).map_err(|err| {
        warn!("Rejected OAuth state");
        ApiError::from(err)
    })?;

    Ok(Json(StateValidation { valid: true }))
}

/// Exchange a GitHub code for a Travis CI access token
#[utoipa::path(
    post,
    path = "/travis_token",
    params(TravisTokenQuery),
    responses(
        (status = 200, description = "Travis CI access token", body = TravisTokenResponse),
        (status = 400, description = "Authorization code missing or malformed query string", body = ApiError),
        (status = 502, description = "GitHub or Travis CI rejected the exchange", body = ApiError),
        (status = 503, description = "GitHub OAuth is not configured", body = ApiError)
    ),
    tag = "oauth"
)]
pub async fn travis_token(
    State(state): State<AppState>,
    query: Result<Query<TravisTokenQuery>, QueryRejection>,
) -> Result<Json<TravisTokenResponse>, ApiError> {
    let Query(query) = query?;
    let client = oauth_client(&state)?;
    let code = query.code.as_deref().unwrap_or_default();
    let token = client.exchange_for_travis_token(code, query.private()).await?;
    Ok(Json(token))
}
