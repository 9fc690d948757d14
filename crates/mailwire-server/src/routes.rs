use axum::extract::{Query, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{AppendHeaders, IntoResponse, Redirect, Response};
use axum::Json;
use serde::Deserialize;

use mailwire_core::validate_email;

use crate::cookie::SESSION_COOKIE;
use crate::server::AppState;

/// Status plus the active-connection count (registry diagnostics).
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "active_connections": state.registry.len(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ValidateParams {
    email_address: String,
}

/// Syntactic email validation for the login form.
pub async fn validate(Query(params): Query<ValidateParams>) -> impl IntoResponse {
    Json(serde_json::json!({
        "email_address": params.email_address,
        "valid": validate_email(&params.email_address),
    }))
}

#[derive(Debug, Deserialize)]
pub struct LoginParams {
    email_address: Option<String>,
}

/// Hand the browser the provider consent URL.
pub async fn login(
    State(state): State<AppState>,
    Query(params): Query<LoginParams>,
) -> Response {
    if let Some(email) = &params.email_address {
        tracing::info!(email, "starting auth");
    }
    match state.oauth.authorize_url(params.email_address.as_deref()) {
        Ok(url) => Json(serde_json::json!({"url": url})).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "authorize url construction failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    error: Option<String>,
}

/// Provider redirect target: finish the login and set the session cookie.
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let Some(code) = params.code else {
        tracing::error!(error = params.error.as_deref().unwrap_or("missing code"), "auth failed");
        return (StatusCode::BAD_REQUEST, "login failed").into_response();
    };

    let user = match state.oauth.exchange_code(&code).await {
        Ok(user) => user,
        Err(err) => {
            tracing::error!(error = %err, "oauth exchange failed");
            return (StatusCode::BAD_GATEWAY, "login failed").into_response();
        }
    };

    let record = match state.users.upsert(&user.email, user.display_name.as_deref()) {
        Ok(record) => record,
        Err(err) => {
            tracing::error!(error = %err, "user upsert failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let session = match state
        .sessions
        .create(&record.email, Some(state.config.session_ttl_secs))
    {
        Ok(session) => session,
        Err(err) => {
            tracing::error!(error = %err, "session creation failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let sealed = match state.codec.seal(SESSION_COOKIE, &session.token) {
        Ok(sealed) => sealed,
        Err(err) => {
            tracing::error!(error = %err, "cookie sealing failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    tracing::info!(principal = %record.email, "login complete, session cookie set");
    (
        AppendHeaders([(
            SET_COOKIE,
            format!("{SESSION_COOKIE}={sealed}; Path=/; HttpOnly; SameSite=Lax"),
        )]),
        Redirect::to("/"),
    )
        .into_response()
}

/// Delete the session row and expire the cookie.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = state.authenticator.session_token(&headers) {
        match state.sessions.delete(&token) {
            Ok(true) => tracing::info!("session deleted on logout"),
            Ok(false) => {}
            Err(err) => tracing::error!(error = %err, "session delete failed"),
        }
    }

    (
        AppendHeaders([(
            SET_COOKIE,
            format!("{SESSION_COOKIE}=; Path=/; Max-Age=0; HttpOnly"),
        )]),
        Redirect::to("/"),
    )
        .into_response()
}

/// Who the session cookie belongs to, if anyone.
pub async fn whoami(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match state.authenticator.authenticate(&headers) {
        Ok(Some(identity)) => Json(serde_json::json!({
            "logged_in": true,
            "principal": identity.principal,
        }))
        .into_response(),
        Ok(None) => Json(serde_json::json!({"logged_in": false})).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "whoami authentication failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
