use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    Json,
};
use axum_extra::extract::{
    cookie::{Cookie, SameSite},
    CookieJar,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::access::{authorize, GuardDecision, REGISTER_PATH};
use crate::config::AuthConfig;
use crate::db::{
    actions, claim_invite, count_identities, create_school, create_session, delete_session,
    find_active_session, find_pending_invite, get_school, insert_identity, purge_expired_sessions,
    secret_hash_for, NewIdentity, School,
};
use crate::identity::{CredentialKind, Identity, IdentifierKind, Resolution, Role};
use crate::{AppState, DbPool};

use super::audit::{audit_log, ClientIp};
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{
    validate_email, validate_full_name, validate_password, validate_phone, validate_school_name,
    validate_staff_email, validate_staff_number,
};

/// Session token cookie name
pub const SESSION_COOKIE: &str = "edusphere_session";

/// Hash a password or PIN using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password or PIN against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

pub(crate) fn hash_secret(secret: &str) -> Result<String, ApiError> {
    hash_password(secret).map_err(|e| ApiError::internal(format!("Failed to hash secret: {}", e)))
}

/// Generate a random token
pub(crate) fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
pub(crate) fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extract the session token from the Authorization header or session cookie
fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok()) {
        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

fn session_cookie(token: String, config: &AuthConfig) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(config.cookie_secure)
        .same_site(SameSite::Lax)
        .build()
}

fn removal_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE).path("/").build()
}

// ---------------------------------------------------------------------------
// Session context
// ---------------------------------------------------------------------------

/// A verified session: the session row plus the identity it belongs to,
/// re-read from the identity store on every request.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub identity: Identity,
}

impl SessionContext {
    pub fn role(&self) -> Role {
        self.identity.role
    }
}

/// Per-request cache so several extractors share one lookup
#[derive(Clone)]
struct ResolvedSession(Option<SessionContext>);

async fn lookup_session(state: &AppState, token: &str) -> Result<Option<SessionContext>, ApiError> {
    let token_hash = hash_token(token);
    let Some(session) = find_active_session(&state.db, &token_hash).await? else {
        return Ok(None);
    };

    let identity = state
        .resolver
        .store()
        .identity_by_id(&session.identity_id)
        .await?;

    Ok(identity.map(|identity| SessionContext {
        session_id: session.id,
        identity,
    }))
}

/// Session lookup bounded by `auth.session_lookup_timeout_ms`
async fn load_session(state: &AppState, token: &str) -> Result<Option<SessionContext>, ApiError> {
    let timeout = state.config.auth.session_lookup_timeout();

    match tokio::time::timeout(timeout, lookup_session(state, token)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                timeout_ms = state.config.auth.session_lookup_timeout_ms,
                "Session lookup timed out"
            );
            Err(ApiError::service_unavailable(
                "Session lookup timed out, please retry",
            ))
        }
    }
}

async fn resolve_session(
    parts: &mut Parts,
    state: &AppState,
) -> Result<Option<SessionContext>, ApiError> {
    if let Some(ResolvedSession(cached)) = parts.extensions.get::<ResolvedSession>() {
        return Ok(cached.clone());
    }

    let resolved = match extract_token(&parts.headers) {
        Some(token) => load_session(state, &token).await?,
        None => None,
    };

    parts.extensions.insert(ResolvedSession(resolved.clone()));
    Ok(resolved)
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for SessionContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        resolve_session(parts, state)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

/// Session if one is present. Only a failed lookup rejects.
#[derive(Debug, Clone)]
pub struct MaybeSession(pub Option<SessionContext>);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeSession(resolve_session(parts, state).await?))
    }
}

/// Session whose identity is an admin. 401 without a session, 403 otherwise.
#[derive(Debug, Clone)]
pub struct AdminSession(pub SessionContext);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let session = resolve_session(parts, state).await?;

        match authorize(session.as_ref().map(|s| s.role()), Some(Role::Admin)) {
            GuardDecision::Allow => session
                .map(AdminSession)
                .ok_or_else(|| ApiError::unauthorized("Authentication required")),
            GuardDecision::RedirectToLogin => Err(ApiError::unauthorized("Authentication required")),
            GuardDecision::RedirectToUnauthorized => {
                let ip = ClientIp::from_request_parts(parts, state)
                    .await
                    .unwrap_or_default();
                audit_log(
                    state,
                    actions::ACCESS_DENIED,
                    session.as_ref().map(|s| s.identity.id.as_str()),
                    None,
                    ip.as_deref(),
                    Some(serde_json::json!({
                        "path": parts.uri.path(),
                        "required": Role::Admin,
                    })),
                )
                .await;
                Err(ApiError::forbidden("Admin access required"))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Identify / login / logout
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct IdentifyRequest {
    pub identifier: String,
}

#[derive(Debug, Serialize)]
pub struct IdentifyResponse {
    pub kind: IdentifierKind,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<CredentialKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidates: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub register_path: Option<&'static str>,
}

/// First login step: which secret the identifier signs in with
pub async fn identify(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IdentifyRequest>,
) -> Result<Json<IdentifyResponse>, ApiError> {
    let (identifier, resolution) = state.resolver.resolve(&request.identifier).await?;

    let mut response = IdentifyResponse {
        kind: identifier.kind(),
        status: resolution.status(),
        credential: None,
        candidates: None,
        register_path: None,
    };

    match resolution {
        Resolution::Found(identity) => response.credential = Some(identity.role.credential()),
        Resolution::NotFound => response.register_path = Some(REGISTER_PATH),
        Resolution::Ambiguous { candidates } => response.candidates = Some(candidates),
    }

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub identifier: String,
    /// Password, or PIN for students
    pub secret: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub identity: Identity,
    pub redirect_to: &'static str,
}

/// Create a session for `identity` and attach the cookie
async fn start_session(
    state: &AppState,
    jar: CookieJar,
    identity: Identity,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let token = generate_token();
    create_session(
        &state.db,
        &identity.id,
        &hash_token(&token),
        state.config.auth.session_ttl_hours,
    )
    .await?;

    let jar = jar.add(session_cookie(token.clone(), &state.config.auth));
    let redirect_to = identity.role.dashboard_path();

    Ok((
        jar,
        Json(LoginResponse {
            token,
            identity,
            redirect_to,
        }),
    ))
}

/// Login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    ip: ClientIp,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let (identifier, resolution) = state.resolver.resolve(&request.identifier).await?;

    let identity = match resolution {
        Resolution::Found(identity) => identity,
        Resolution::NotFound => {
            audit_log(
                &state,
                actions::AUTH_LOGIN_FAILED,
                None,
                None,
                ip.as_deref(),
                Some(serde_json::json!({ "kind": identifier.kind(), "reason": "not_found" })),
            )
            .await;
            return Err(ApiError::not_found("No account matches that identifier")
                .with_detail("register_path", REGISTER_PATH));
        }
        Resolution::Ambiguous { candidates } => {
            audit_log(
                &state,
                actions::AUTH_LOGIN_FAILED,
                None,
                None,
                ip.as_deref(),
                Some(serde_json::json!({
                    "kind": identifier.kind(),
                    "reason": "ambiguous",
                    "candidates": candidates,
                })),
            )
            .await;
            return Err(ApiError::conflict(
                "More than one account matches; use your staff number, email or phone",
            )
            .with_detail("candidates", candidates));
        }
    };

    let secret_hash = secret_hash_for(&state.db, &identity.id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    if !verify_password(&request.secret, &secret_hash) {
        audit_log(
            &state,
            actions::AUTH_LOGIN_FAILED,
            None,
            Some(&identity.id),
            ip.as_deref(),
            Some(serde_json::json!({ "kind": identifier.kind(), "reason": "bad_secret" })),
        )
        .await;
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    audit_log(
        &state,
        actions::AUTH_LOGIN,
        Some(&identity.id),
        None,
        ip.as_deref(),
        Some(serde_json::json!({ "kind": identifier.kind(), "role": identity.role })),
    )
    .await;

    tracing::info!(identity_id = %identity.id, role = %identity.role, "Login succeeded");
    start_session(&state, jar, identity).await
}

/// Logout endpoint. Succeeds whether or not a session was present.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    ip: ClientIp,
    MaybeSession(session): MaybeSession,
    jar: CookieJar,
) -> Result<(StatusCode, CookieJar), ApiError> {
    if let Some(session) = session {
        delete_session(&state.db, &session.session_id).await?;
        audit_log(
            &state,
            actions::AUTH_LOGOUT,
            Some(&session.identity.id),
            None,
            ip.as_deref(),
            None,
        )
        .await;
    }

    Ok((StatusCode::NO_CONTENT, jar.remove(removal_cookie())))
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub identity: Identity,
    pub redirect_to: &'static str,
}

/// Identity behind the current session
pub async fn current_session(session: SessionContext) -> Json<SessionResponse> {
    Json(SessionResponse {
        redirect_to: session.role().dashboard_path(),
        identity: session.identity,
    })
}

// ---------------------------------------------------------------------------
// Parent self-registration
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub phone: String,
    pub password: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub school_id: Option<String>,
    /// Accepted only so it can be rejected; the role is always parent.
    /// Any value, `null` included, counts as an attempt to choose one.
    #[serde(default, deserialize_with = "deserialize_present")]
    pub role: Option<serde_json::Value>,
}

// Some(..) whenever the key is present, even for an explicit null
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

/// Self-service registration. Always creates a parent.
pub async fn register(
    State(state): State<Arc<AppState>>,
    ip: ClientIp,
    jar: CookieJar,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, CookieJar, Json<LoginResponse>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    if request.role.is_some() {
        errors.add("role", "Role cannot be chosen at registration");
    }
    if let Err(e) = validate_full_name(&request.name) {
        errors.add("name", e);
    }
    let phone = validate_phone(&request.phone)
        .map_err(|e| {
            errors.add("phone", e);
        })
        .ok();
    if let Err(e) = validate_password(&request.password) {
        errors.add("password", e);
    }
    let email = match request.email.as_deref().filter(|e| !e.trim().is_empty()) {
        Some(email) => validate_email(email).map_err(|e| {
            errors.add("email", e);
        }).ok(),
        None => None,
    };
    errors.finish()?;

    if let Some(school_id) = &request.school_id {
        if get_school(&state.db, school_id).await?.is_none() {
            return Err(ApiError::validation_field("school_id", "Unknown school"));
        }
    }

    let mut new = NewIdentity::new(Role::Parent, request.name, hash_secret(&request.password)?);
    new.phone = phone;
    new.email = email;
    new.school_id = request.school_id;

    let identity = insert_identity(&state.db, &new).await?;

    audit_log(
        &state,
        actions::AUTH_REGISTER,
        Some(&identity.id),
        Some(&identity.id),
        ip.as_deref(),
        None,
    )
    .await;

    let (jar, body) = start_session(&state, jar, identity).await?;
    Ok((StatusCode::CREATED, jar, body))
}

// ---------------------------------------------------------------------------
// First-run setup
// ---------------------------------------------------------------------------

/// Response for setup status check
#[derive(Serialize)]
pub struct SetupStatusResponse {
    pub needs_setup: bool,
}

/// Request for initial setup
#[derive(Deserialize)]
pub struct SetupRequest {
    pub school_name: String,
    pub name: String,
    pub email: String,
    pub staff_number: String,
    pub password: String,
}

/// Check if initial setup is needed (no identities exist)
pub async fn setup_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SetupStatusResponse>, ApiError> {
    let count = count_identities(&state.db).await?;
    Ok(Json(SetupStatusResponse {
        needs_setup: count == 0,
    }))
}

/// Initial setup endpoint - creates the school and its first admin
pub async fn setup(
    State(state): State<Arc<AppState>>,
    ip: ClientIp,
    jar: CookieJar,
    Json(request): Json<SetupRequest>,
) -> Result<(StatusCode, CookieJar, Json<LoginResponse>), ApiError> {
    if count_identities(&state.db).await? > 0 {
        return Err(ApiError::forbidden("Setup has already been completed"));
    }

    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_school_name(&request.school_name) {
        errors.add("school_name", e);
    }
    if let Err(e) = validate_full_name(&request.name) {
        errors.add("name", e);
    }
    let email = validate_staff_email(&request.email)
        .map_err(|e| {
            errors.add("email", e);
        })
        .ok();
    let staff_number = validate_staff_number(&request.staff_number)
        .map_err(|e| {
            errors.add("staff_number", e);
        })
        .ok();
    if let Err(e) = validate_password(&request.password) {
        errors.add("password", e);
    }
    errors.finish()?;

    let mut new = NewIdentity::new(Role::Admin, request.name, hash_secret(&request.password)?);
    new.email = email;
    new.staff_number = staff_number;

    // The school insert takes the write lock, so the recount below sees any
    // setup that committed first.
    let mut tx = state.db.begin().await?;
    let school = create_school(&mut *tx, &request.school_name).await?;
    if count_identities(&mut *tx).await? > 0 {
        return Err(ApiError::forbidden("Setup has already been completed"));
    }
    new.school_id = Some(school.id.clone());
    let admin = insert_identity(&mut *tx, &new).await?;
    tx.commit().await?;

    tracing::info!(school_id = %school.id, admin_id = %admin.id, "Completed first-run setup");

    audit_log(
        &state,
        actions::AUTH_SETUP,
        Some(&admin.id),
        Some(&school.id),
        ip.as_deref(),
        Some(serde_json::json!({ "school_name": school.name })),
    )
    .await;

    let (jar, body) = start_session(&state, jar, admin).await?;
    Ok((StatusCode::CREATED, jar, body))
}

// ---------------------------------------------------------------------------
// Staff invites
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AcceptInviteRequest {
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Redeem a staff invite. Role, email, staff number and school come from the invite.
pub async fn accept_invite(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    ip: ClientIp,
    jar: CookieJar,
    Json(request): Json<AcceptInviteRequest>,
) -> Result<(StatusCode, CookieJar, Json<LoginResponse>), ApiError> {
    let invite = find_pending_invite(&state.db, &hash_token(&token))
        .await?
        .ok_or_else(|| ApiError::not_found("Invite not found or expired"))?;
    let role = invite.role_enum()?;

    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_full_name(&request.name) {
        errors.add("name", e);
    }
    if let Err(e) = validate_password(&request.password) {
        errors.add("password", e);
    }
    let phone = match request.phone.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(phone) => validate_phone(phone).map_err(|e| {
            errors.add("phone", e);
        }).ok(),
        None => None,
    };
    errors.finish()?;

    let mut new = NewIdentity::new(role, request.name, hash_secret(&request.password)?);
    new.email = Some(invite.email.clone());
    new.staff_number = Some(invite.staff_number.clone());
    new.phone = phone;
    new.school_id = Some(invite.school_id.clone());

    let mut tx = state.db.begin().await?;
    if !claim_invite(&mut *tx, &invite.id).await? {
        return Err(ApiError::conflict("Invite has already been used"));
    }
    let identity = insert_identity(&mut *tx, &new).await?;
    tx.commit().await?;

    audit_log(
        &state,
        actions::INVITE_ACCEPT,
        Some(&identity.id),
        Some(&invite.id),
        ip.as_deref(),
        Some(serde_json::json!({ "role": role })),
    )
    .await;

    let (jar, body) = start_session(&state, jar, identity).await?;
    Ok((StatusCode::CREATED, jar, body))
}

/// Spawn a background task that periodically deletes expired sessions
pub fn spawn_session_cleanup_task(db: DbPool, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(cleanup_interval_secs.max(1));
        loop {
            tokio::time::sleep(interval).await;
            match purge_expired_sessions(&db).await {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "Purged expired sessions"),
                Err(e) => tracing::warn!(error = %e, "Failed to purge expired sessions"),
            }
        }
    });
}

/// Public school lookup for join pages
pub async fn get_school_info(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<School>, ApiError> {
    let school = get_school(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("School not found"))?;
    Ok(Json(school))
}
