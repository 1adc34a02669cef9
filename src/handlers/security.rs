use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    Json,
    body::Bytes,
    extract::{ConnectInfo, FromRequest, FromRequestParts, Request, State},
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    error::{AppError, Result, SecurityRejection},
    models::security_session::SecurityCodes,
    services::security::GenerateRequest,
    state::AppState,
    validation::security::*,
};

/// Audit details about the calling client.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let ip_address = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string());

        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        Ok(ClientMeta {
            ip_address,
            user_agent,
        })
    }
}

/// A JSON request body whose failures render as [`AppError`] JSON.
///
/// An empty body reads as `T::default()`, so a missing field and a missing
/// body take the same validation path.
#[derive(Debug, Clone, Default)]
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Default,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| AppError::Validation(e.body_text()))?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(JsonBody(T::default()));
        }

        sonic_rs::from_slice(&bytes)
            .map(JsonBody)
            .map_err(|e| AppError::Validation(format!("Invalid JSON body: {}", e)))
    }
}

/// The request payload for code generation.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerateCodesRequest {
    pub user_id: Option<String>,
}

/// The request payload for code validation.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCodesRequest {
    pub session_id: Option<String>,
    pub forward_code: Option<String>,
    pub backward_code: Option<String>,
    pub user_id: Option<String>,
}

/// The request payload for code refresh.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct RefreshCodesRequest {
    pub session_id: Option<String>,
}

/// The response payload for generation.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateCodesResponse {
    pub security_codes: SecurityCodes,
    /// Session lifetime in milliseconds.
    pub expires_in: i64,
    pub timestamp: DateTime<Utc>,
}

/// The response payload for a successful validation.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCodesResponse {
    pub valid: bool,
    pub message: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

/// The response payload for a successful refresh.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshCodesResponse {
    pub security_codes: SecurityCodes,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// The response payload for the status endpoint.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub active_sessions: usize,
    /// Session lifetime in milliseconds.
    pub session_duration: i64,
    pub timestamp: DateTime<Utc>,
}

/// Handles security code generation.
#[axum::debug_handler]
pub async fn generate(
    State(state): State<AppState>,
    client: ClientMeta,
    JsonBody(payload): JsonBody<GenerateCodesRequest>,
) -> Result<Response> {
    let user_id = validate_user_id(payload.user_id.as_deref())?.map(str::to_string);
    tracing::debug!("🔐 Generate request from {:?}", client.ip_address);

    let codes = state.security.generate(GenerateRequest {
        user_id,
        ip_address: client.ip_address,
        user_agent: client.user_agent,
    })?;

    let response = GenerateCodesResponse {
        security_codes: codes,
        expires_in: state.security.session_duration().num_milliseconds(),
        timestamp: state.security.now(),
    };

    Ok((StatusCode::OK, Json(response)).into_response())
}

/// Handles security code validation.
#[axum::debug_handler]
pub async fn validate(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<ValidateCodesRequest>,
) -> Result<Response> {
    let (session_id, forward_code, backward_code) = validate_code_presentation(
        payload.session_id.as_deref(),
        payload.forward_code.as_deref(),
        payload.backward_code.as_deref(),
    )?;
    let user_id = validate_user_id(payload.user_id.as_deref())?;

    state
        .security
        .validate(session_id, forward_code, backward_code, user_id)
        .into_result()?;

    let response = ValidateCodesResponse {
        valid: true,
        message: "Security codes validated successfully".to_string(),
        session_id: session_id.to_string(),
        timestamp: state.security.now(),
    };

    Ok((StatusCode::OK, Json(response)).into_response())
}

/// Handles security code refresh.
#[axum::debug_handler]
pub async fn refresh(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RefreshCodesRequest>,
) -> Result<Response> {
    let session_id = required(payload.session_id.as_deref()).ok_or_else(|| {
        AppError::Validation("Session ID required".to_string())
    })?;
    validate_session_id(session_id)?;

    let codes = state
        .security
        .refresh(session_id)?
        .ok_or(SecurityRejection::RefreshPreconditionFailed)?;

    let response = RefreshCodesResponse {
        security_codes: codes,
        message: "Security codes refreshed successfully".to_string(),
        timestamp: state.security.now(),
    };

    Ok((StatusCode::OK, Json(response)).into_response())
}

/// Reports the number of live sessions. Sweeps expired sessions first.
#[axum::debug_handler]
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        active_sessions: state.security.active_sessions(),
        session_duration: state.security.session_duration().num_milliseconds(),
        timestamp: state.security.now(),
    })
}
