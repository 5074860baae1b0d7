use axum::Json;
use axum::extract::{Form, Path, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;

use crate::server::AppState;
use crate::vfs::FsErrorKind;
use crate::vfs::bootstrap::default_home_perms;
use crate::vfs::types::EntryPermissions;

use super::apikeys::{self, KeyError};
use super::credentials::{CredentialsEntry, check_pwd, hash_pwd};
use super::session::{
    self, AuthStatus, login_file_path, signup_file_path, sysadmin_tags,
};

const SESSION_MAX_AGE_SECS: u32 = 3600;

fn session_cookie(state: &AppState, token: &str, max_age: u32) -> String {
    let mut cookie = format!("sessid={token}; Path=/; Max-Age={max_age}; HttpOnly");
    if !state.config.domain.is_empty() {
        cookie.push_str(&format!("; Domain={}", state.config.domain));
    }
    if state.config.is_https {
        cookie.push_str("; Secure");
    }
    cookie
}

fn cookie_value(req: &Request, name: &str) -> Option<String> {
    let header = req.headers().get(header::COOKIE)?.to_str().ok()?;
    header.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}

/// Middleware: resolve the `sessid` cookie into an [`AuthStatus`] request
/// extension, or reject with 401.
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(sess_id) = cookie_value(&req, "sessid") else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match session::resolve_session(&state.store, &sess_id).await {
        Ok(status) => {
            req.extensions_mut().insert(status);
            next.run(req).await
        }
        Err(err) => {
            tracing::debug!(error = %err, "session resolution failed");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct LoginRequest {
    username: String,
    password: String,
}

/// POST /login — verify the password against the user's login file and
/// issue a session cookie backed by `/etc/sess/<token>.sess`.
pub(crate) async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Response {
    let credentials = match session::load_credentials(&state.store, &req.username).await {
        Ok(c) => c,
        Err(err) => {
            tracing::debug!(username = %req.username, error = %err, "login lookup failed");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    if !check_pwd(&credentials.password, &req.password) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let token = match session::create_session(&state.store, &req.username).await {
        Ok(t) => t,
        Err(err) => {
            tracing::error!(error = %err, "failed to create session");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    tracing::info!(username = %req.username, "login");
    (
        StatusCode::OK,
        [(
            header::SET_COOKIE,
            session_cookie(&state, &token, SESSION_MAX_AGE_SECS),
        )],
    )
        .into_response()
}

/// POST /logout — drop the session file and expire the cookie.
pub(crate) async fn logout(
    State(state): State<AppState>,
    axum::Extension(auth): axum::Extension<AuthStatus>,
) -> Response {
    if let Err(err) = session::remove_session(&state.store, &auth.sess_id).await {
        tracing::warn!(error = %err, "logout failed to remove session file");
    }
    (
        StatusCode::OK,
        [(header::SET_COOKIE, session_cookie(&state, "", 0))],
    )
        .into_response()
}

/// GET /auth/status — what the middleware resolved for this caller.
pub(crate) async fn auth_status(
    axum::Extension(auth): axum::Extension<AuthStatus>,
) -> impl IntoResponse {
    Json(json!({ "username": auth.username, "tags": auth.tags }))
}

#[derive(Deserialize)]
pub(crate) struct SignupTokenQuery {
    token: String,
}

async fn username_taken(state: &AppState, username: &str) -> Result<bool, StatusCode> {
    let login_path = login_file_path(username).map_err(|_| StatusCode::BAD_REQUEST)?;
    let home_path = crate::vfs::path::abs_path("/home", username)
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    if !home_path.starts_with("/home/") {
        return Err(StatusCode::BAD_REQUEST);
    }

    for path in [login_path, home_path] {
        match state.store.lookup(Some(&sysadmin_tags()), &path).await {
            Ok(_) => return Ok(true),
            Err(err) if err.kind() == FsErrorKind::NotExist => continue,
            Err(err) => {
                tracing::error!(error = %err, "username availability lookup failed");
                return Err(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
    }
    Ok(false)
}

/// GET /signup/check-username/{username}?token=... — validate the signup
/// token exists and the username is free.
pub(crate) async fn signup_check_username(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<SignupTokenQuery>,
) -> StatusCode {
    let Ok(token_path) = signup_file_path(&query.token) else {
        return StatusCode::UNAUTHORIZED;
    };
    if state
        .store
        .lookup(Some(&sysadmin_tags()), &token_path)
        .await
        .is_err()
    {
        return StatusCode::UNAUTHORIZED;
    }
    if username.is_empty() {
        return StatusCode::BAD_REQUEST;
    }

    match username_taken(&state, &username).await {
        Ok(true) => StatusCode::CONFLICT,
        Ok(false) => StatusCode::OK,
        Err(code) => code,
    }
}

/// Body of a `/etc/passwd/<token>.signup` file. Unknown fields become the
/// new user's `user.profile`.
#[derive(Deserialize)]
struct SignupFile {
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    home_permissions: Option<EntryPermissions>,
    #[serde(flatten)]
    profile: serde_yaml::Mapping,
}

#[derive(Deserialize)]
pub(crate) struct SignupRequest {
    username: String,
    password: String,
    token: String,
}

/// POST /signup — consume a single-use signup token: create the login
/// file, home directory, `user.profile`, and a session.
pub(crate) async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Response {
    let admin = sysadmin_tags();

    let Ok(token_path) = signup_file_path(&req.token) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let signup_bytes = match state.store.lookup_read_all(Some(&admin), &token_path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::debug!(error = %err, "signup token lookup failed");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };
    let signup_file: SignupFile = match serde_yaml::from_slice(&signup_bytes) {
        Ok(f) => f,
        Err(err) => {
            tracing::warn!(error = %err, "signup token contains invalid YAML");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };
    if signup_file.tags.is_empty() {
        tracing::warn!("signup token has no tags");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match username_taken(&state, &req.username).await {
        Ok(false) => {}
        Ok(true) => return StatusCode::CONFLICT.into_response(),
        Err(code) => return code.into_response(),
    }

    let password_hash = match hash_pwd(&req.password) {
        Ok(h) => h,
        Err(err) => {
            tracing::error!(error = %err, "failed to hash password");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // Beyond this point the caller is authenticated as "may sign up with
    // these tags".
    let owner_tag = format!("user-{}", req.username);
    let mut user_tags = signup_file.tags.clone();
    user_tags.push(owner_tag.clone());
    let home_perms = signup_file
        .home_permissions
        .unwrap_or_else(|| default_home_perms(&owner_tag));

    let result: crate::vfs::FsResult<String> = async {
        let entry = CredentialsEntry {
            password: password_hash,
            tags: user_tags.clone(),
        };
        session::store_credentials(&state.store, &req.username, &entry).await?;

        let home_root = state.store.lookup(Some(&admin), "/home").await?;
        let user_home = state
            .store
            .write_directory(None, home_root.id, &req.username, Some(home_perms))
            .await?;

        let profile_yaml = serde_yaml::to_string(&signup_file.profile)
            .map_err(|e| crate::vfs::FsError::Invalid(format!("profile YAML: {e}")))?;
        state
            .store
            .write_file_contents(None, user_home.id, "user.profile", profile_yaml.as_bytes())
            .await?;

        let passwd_dir = state.store.lookup(Some(&admin), "/etc/passwd").await?;
        state
            .store
            .remove_child(Some(&admin), passwd_dir.id, &format!("{}.signup", req.token))
            .await?;

        session::create_session(&state.store, &req.username).await
    }
    .await;

    match result {
        Ok(token) => {
            tracing::info!(username = %req.username, "signup complete");
            (
                StatusCode::OK,
                [(
                    header::SET_COOKIE,
                    session_cookie(&state, &token, SESSION_MAX_AGE_SECS),
                )],
            )
                .into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "signup failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// All fields optional so a missing one reaches the handler body and gets
/// the same 401 as bad credentials, never an extractor rejection.
#[derive(Deserialize)]
pub(crate) struct MqttCheckRequest {
    clientid: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

/// POST /auth/mqtt-check — credential check endpoint for the broker. The
/// telemetry ingest client authenticates with the process-wide MQTT key;
/// everyone else against their login file, and must carry `edge-node`.
pub(crate) async fn mqtt_check(
    State(state): State<AppState>,
    Form(req): Form<MqttCheckRequest>,
) -> StatusCode {
    let (Some(clientid), Some(username), Some(password)) =
        (req.clientid, req.username, req.password)
    else {
        return StatusCode::UNAUTHORIZED;
    };

    if clientid == "telegraf-mqtt" {
        let key = &state.config.mqtt_key;
        let ok = !key.is_empty() && bool::from(key.as_bytes().ct_eq(password.as_bytes()));
        if ok {
            return StatusCode::OK;
        }
        tracing::warn!("mqtt env-key authentication rejected");
        return StatusCode::UNAUTHORIZED;
    }

    let credentials = match session::load_credentials(&state.store, &username).await {
        Ok(c) => c,
        Err(err) => {
            tracing::debug!(username = %username, error = %err, "mqtt login lookup failed");
            return StatusCode::UNAUTHORIZED;
        }
    };
    if !check_pwd(&credentials.password, &password) {
        return StatusCode::UNAUTHORIZED;
    }
    if !credentials.tags.iter().any(|t| t == "edge-node") {
        tracing::debug!(username = %username, "mqtt auth for non-edge-node user");
        return StatusCode::UNAUTHORIZED;
    }
    StatusCode::OK
}

/// GET /auth/key-status — probe endpoint for `Authorization: Bearer
/// <api-key>` callers. Accepts iff the key verifies against a stored
/// record.
pub(crate) async fn key_status(State(state): State<AppState>, req: Request) -> Response {
    let bearer = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let Some(presented) = bearer else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match apikeys::authenticate(state.api_keys.as_ref(), presented).await {
        Ok(key) => Json(json!({
            "id": key.id.to_hex(),
            "edge_id": key.edge_id.map(|id| id.to_hex()),
        }))
        .into_response(),
        Err(KeyError::NotExist | KeyError::Invalid) => StatusCode::UNAUTHORIZED.into_response(),
        Err(KeyError::Backend(err)) => {
            tracing::error!(error = %err, "key status backend failure");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Optional for the same reason as [`MqttCheckRequest`]: absent fields are
/// an auth failure, not a malformed request.
#[derive(Deserialize)]
pub(crate) struct KeyCheckRequest {
    username: Option<String>,
    password: Option<String>,
}

/// POST /auth/key-check — form-based API key verification where the key is
/// presented as both username and password.
pub(crate) async fn key_check(
    State(state): State<AppState>,
    Form(req): Form<KeyCheckRequest>,
) -> StatusCode {
    let (Some(username), Some(password)) = (req.username, req.password) else {
        return StatusCode::UNAUTHORIZED;
    };
    if username != password {
        return StatusCode::UNAUTHORIZED;
    }
    match apikeys::authenticate(state.api_keys.as_ref(), &username).await {
        Ok(_) => StatusCode::OK,
        Err(KeyError::NotExist | KeyError::Invalid) => StatusCode::UNAUTHORIZED,
        Err(KeyError::Backend(err)) => {
            tracing::error!(error = %err, "key check backend failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
