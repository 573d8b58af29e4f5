//! Admin-only endpoints: admissions, staff accounts, invites and listings.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::{actions, create_invite, insert_identity, list_identities, NewIdentity, NewInvite};
use crate::identity::{Identity, Role};
use crate::AppState;

use super::audit::{audit_log, ClientIp};
use super::auth::{generate_token, hash_secret, hash_token, AdminSession};
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{
    validate_admission_number, validate_fee_balance, validate_full_name, validate_password,
    validate_phone, validate_pin, validate_staff_email, validate_staff_number,
};

/// Parse a staff role; family roles are never created here
fn validate_staff_role(role: &str) -> Result<Role, String> {
    match role.parse::<Role>() {
        Ok(role) if role.is_staff() => Ok(role),
        _ => Err("Role must be one of: admin, teacher".to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct AdmitStudentRequest {
    pub admission_number: String,
    pub name: String,
    pub pin: String,
    #[serde(default)]
    pub parent_phone: Option<String>,
    #[serde(default)]
    pub fee_balance_cents: Option<i64>,
}

/// Admit a student into the admin's school
pub async fn admit_student(
    State(state): State<Arc<AppState>>,
    AdminSession(admin): AdminSession,
    ip: ClientIp,
    Json(req): Json<AdmitStudentRequest>,
) -> Result<(StatusCode, Json<Identity>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    let admission_number = match validate_admission_number(&req.admission_number) {
        Ok(adm) => Some(adm),
        Err(e) => {
            errors.add("admission_number", &e);
            None
        }
    };
    if let Err(e) = validate_full_name(&req.name) {
        errors.add("name", &e);
    }
    if let Err(e) = validate_pin(&req.pin) {
        errors.add("pin", &e);
    }
    let fee_balance_cents = req.fee_balance_cents.unwrap_or(0);
    if let Err(e) = validate_fee_balance(fee_balance_cents) {
        errors.add("fee_balance_cents", &e);
    }
    let parent_phone = match req.parent_phone.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(phone) => match validate_phone(phone) {
            Ok(phone) => Some(phone),
            Err(e) => {
                errors.add("parent_phone", &e);
                None
            }
        },
        None => None,
    };
    errors.finish()?;

    let parent_id = match parent_phone {
        Some(phone) => {
            let parent = state
                .resolver
                .store()
                .identities_by_phone(&phone)
                .await?
                .into_iter()
                .find(|identity| identity.role == Role::Parent)
                .ok_or_else(|| {
                    ApiError::validation_field("parent_phone", "No parent is registered with that phone")
                })?;
            Some(parent.id)
        }
        None => None,
    };

    let mut new = NewIdentity::new(Role::Student, req.name, hash_secret(&req.pin)?);
    new.admission_number = admission_number;
    new.school_id = admin.identity.school_id.clone();
    new.parent_id = parent_id;
    new.fee_balance_cents = fee_balance_cents;

    let student = insert_identity(&state.db, &new).await?;

    audit_log(
        &state,
        actions::STUDENT_ADMIT,
        Some(&admin.identity.id),
        Some(&student.id),
        ip.as_deref(),
        Some(serde_json::json!({
            "admission_number": student.admission_number,
            "linked_parent": student.parent_id.is_some(),
        })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(student)))
}

#[derive(Debug, Deserialize)]
pub struct CreateStaffRequest {
    pub role: String,
    pub staff_number: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub password: String,
}

/// Create a teacher or admin account directly
pub async fn create_staff(
    State(state): State<Arc<AppState>>,
    AdminSession(admin): AdminSession,
    ip: ClientIp,
    Json(req): Json<CreateStaffRequest>,
) -> Result<(StatusCode, Json<Identity>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    let role = match validate_staff_role(&req.role) {
        Ok(role) => Some(role),
        Err(e) => {
            errors.add("role", &e);
            None
        }
    };
    let staff_number = match validate_staff_number(&req.staff_number) {
        Ok(number) => Some(number),
        Err(e) => {
            errors.add("staff_number", &e);
            None
        }
    };
    if let Err(e) = validate_full_name(&req.name) {
        errors.add("name", &e);
    }
    let email = match validate_staff_email(&req.email) {
        Ok(email) => Some(email),
        Err(e) => {
            errors.add("email", &e);
            None
        }
    };
    let phone = match req.phone.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(phone) => match validate_phone(phone) {
            Ok(phone) => Some(phone),
            Err(e) => {
                errors.add("phone", &e);
                None
            }
        },
        None => None,
    };
    if let Err(e) = validate_password(&req.password) {
        errors.add("password", &e);
    }
    errors.finish()?;

    let role = role.ok_or_else(|| ApiError::validation_field("role", "Role is required"))?;

    let mut new = NewIdentity::new(role, req.name, hash_secret(&req.password)?);
    new.staff_number = staff_number;
    new.email = email;
    new.phone = phone;
    new.school_id = admin.identity.school_id.clone();

    let staff = insert_identity(&state.db, &new).await?;

    audit_log(
        &state,
        actions::STAFF_CREATE,
        Some(&admin.identity.id),
        Some(&staff.id),
        ip.as_deref(),
        Some(serde_json::json!({ "role": staff.role })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(staff)))
}

#[derive(Debug, Deserialize)]
pub struct CreateInviteRequest {
    pub email: String,
    pub role: String,
    pub staff_number: String,
}

#[derive(Debug, Serialize)]
pub struct CreateInviteResponse {
    pub id: String,
    /// Shown once; only its hash is stored
    pub token: String,
    pub accept_path: String,
    pub email: String,
    pub role: Role,
    pub expires_at: String,
}

/// Issue a single-use staff invite for the admin's school
pub async fn create_staff_invite(
    State(state): State<Arc<AppState>>,
    AdminSession(admin): AdminSession,
    ip: ClientIp,
    Json(req): Json<CreateInviteRequest>,
) -> Result<(StatusCode, Json<CreateInviteResponse>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    let email = match validate_staff_email(&req.email) {
        Ok(email) => Some(email),
        Err(e) => {
            errors.add("email", &e);
            None
        }
    };
    let role = match validate_staff_role(&req.role) {
        Ok(role) => Some(role),
        Err(e) => {
            errors.add("role", &e);
            None
        }
    };
    let staff_number = match validate_staff_number(&req.staff_number) {
        Ok(number) => Some(number),
        Err(e) => {
            errors.add("staff_number", &e);
            None
        }
    };
    errors.finish()?;

    let (Some(email), Some(role), Some(staff_number)) = (email, role, staff_number) else {
        return Err(ApiError::bad_request("Invalid invite request"));
    };

    let school_id = admin
        .identity
        .school_id
        .clone()
        .ok_or_else(|| ApiError::bad_request("Admin is not attached to a school"))?;

    let token = generate_token();
    let invite = create_invite(
        &state.db,
        &NewInvite {
            token_hash: hash_token(&token),
            email,
            staff_number,
            role,
            school_id,
            invited_by: admin.identity.id.clone(),
            ttl_hours: state.config.auth.invite_ttl_hours,
        },
    )
    .await?;

    audit_log(
        &state,
        actions::INVITE_CREATE,
        Some(&admin.identity.id),
        Some(&invite.id),
        ip.as_deref(),
        Some(serde_json::json!({ "role": role, "email": invite.email })),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(CreateInviteResponse {
            id: invite.id,
            accept_path: format!("/api/auth/invites/{}/accept", token),
            token,
            email: invite.email,
            role,
            expires_at: invite.expires_at,
        }),
    ))
}

#[derive(Debug, Deserialize, Default)]
pub struct ListIdentitiesQuery {
    pub role: Option<String>,
}

/// List identities, optionally filtered by role
pub async fn list_all_identities(
    State(state): State<Arc<AppState>>,
    _admin: AdminSession,
    Query(query): Query<ListIdentitiesQuery>,
) -> Result<Json<Vec<Identity>>, ApiError> {
    let role = match query.role.as_deref().filter(|r| !r.is_empty()) {
        Some(role) => Some(role.parse::<Role>()?),
        None => None,
    };

    let identities = list_identities(&state.db, role).await?;
    Ok(Json(identities))
}
