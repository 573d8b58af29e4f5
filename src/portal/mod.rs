// Portal pages. Each console is guarded by role and answers with a JSON
// view of what the page shows; rendering happens in the frontend.

use axum::{
    extract::State,
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::access::{
    authorize, select_dashboard, ADMIN_CONSOLE_PATH, DASHBOARD_PATH, LOGIN_PATH,
    PARENT_CONSOLE_PATH, REGISTER_PATH, STUDENT_CONSOLE_PATH, TEACHER_CONSOLE_PATH,
    UNAUTHORIZED_PATH,
};
use crate::api::audit::{audit_log, ClientIp};
use crate::api::auth::{MaybeSession, SessionContext};
use crate::api::error::ApiError;
use crate::db::{actions, children_of};
use crate::identity::{Identity, Role};
use crate::AppState;

pub fn create_router() -> Router<Arc<AppState>> {
    Router::new()
        // Public routes
        .route(LOGIN_PATH, get(login_page))
        .route(UNAUTHORIZED_PATH, get(unauthorized_page))
        .route(DASHBOARD_PATH, get(dashboard))
        // Guarded consoles
        .route(ADMIN_CONSOLE_PATH, get(admin_console))
        .route(TEACHER_CONSOLE_PATH, get(teacher_portal))
        .route(PARENT_CONSOLE_PATH, get(parent_portal))
        .route(STUDENT_CONSOLE_PATH, get(student_hub))
}

// Run the guard for a page. Denials are redirects; wrong-role denials are audited.
async fn guard_page(
    state: &AppState,
    session: Option<SessionContext>,
    required: Role,
    page: &'static str,
    ip: &ClientIp,
) -> Result<SessionContext, Response> {
    let decision = authorize(session.as_ref().map(|s| s.role()), Some(required));

    match (decision.redirect_path(), session) {
        (None, Some(session)) => Ok(session),
        (Some(target), Some(session)) => {
            tracing::debug!(
                identity_id = %session.identity.id,
                role = %session.role(),
                page,
                "Page access denied"
            );
            audit_log(
                state,
                actions::ACCESS_DENIED,
                Some(&session.identity.id),
                None,
                ip.as_deref(),
                Some(serde_json::json!({
                    "path": page,
                    "role": session.role(),
                    "required": required,
                })),
            )
            .await;
            Err(Redirect::to(target).into_response())
        }
        (target, None) => Err(Redirect::to(target.unwrap_or(LOGIN_PATH)).into_response()),
    }
}

#[derive(Serialize)]
struct LoginView {
    identify: &'static str,
    login: &'static str,
    register: &'static str,
    register_path: &'static str,
}

// Login landing: where the two login steps post to
async fn login_page() -> Json<LoginView> {
    Json(LoginView {
        identify: "/api/auth/identify",
        login: "/api/auth/login",
        register: "/api/auth/register",
        register_path: REGISTER_PATH,
    })
}

async fn unauthorized_page() -> Response {
    ApiError::forbidden("You do not have access to that page")
        .with_detail("login_path", LOGIN_PATH)
        .into_response()
}

// Send a signed-in identity to its own console
async fn dashboard(MaybeSession(session): MaybeSession) -> Redirect {
    let role = session.as_ref().map(|s| s.role().as_str());
    Redirect::to(select_dashboard(role))
}

#[derive(Serialize)]
struct ConsoleView {
    console: &'static str,
    identity: Identity,
}

async fn admin_console(
    State(state): State<Arc<AppState>>,
    ip: ClientIp,
    MaybeSession(session): MaybeSession,
) -> Response {
    match guard_page(&state, session, Role::Admin, ADMIN_CONSOLE_PATH, &ip).await {
        Ok(session) => Json(ConsoleView {
            console: ADMIN_CONSOLE_PATH,
            identity: session.identity,
        })
        .into_response(),
        Err(redirect) => redirect,
    }
}

async fn teacher_portal(
    State(state): State<Arc<AppState>>,
    ip: ClientIp,
    MaybeSession(session): MaybeSession,
) -> Response {
    match guard_page(&state, session, Role::Teacher, TEACHER_CONSOLE_PATH, &ip).await {
        Ok(session) => Json(ConsoleView {
            console: TEACHER_CONSOLE_PATH,
            identity: session.identity,
        })
        .into_response(),
        Err(redirect) => redirect,
    }
}

#[derive(Serialize)]
struct ChildSummary {
    id: String,
    full_name: String,
    admission_number: Option<String>,
    fee_balance_cents: i64,
}

#[derive(Serialize)]
struct ParentPortalView {
    console: &'static str,
    identity: Identity,
    children: Vec<ChildSummary>,
    total_fee_balance_cents: i64,
}

async fn parent_portal(
    State(state): State<Arc<AppState>>,
    ip: ClientIp,
    MaybeSession(session): MaybeSession,
) -> Result<Response, ApiError> {
    let session = match guard_page(&state, session, Role::Parent, PARENT_CONSOLE_PATH, &ip).await {
        Ok(session) => session,
        Err(redirect) => return Ok(redirect),
    };

    let children: Vec<ChildSummary> = children_of(&state.db, &session.identity.id)
        .await?
        .into_iter()
        .map(|child| ChildSummary {
            id: child.id,
            full_name: child.full_name,
            admission_number: child.admission_number,
            fee_balance_cents: child.fee_balance_cents,
        })
        .collect();
    let total_fee_balance_cents = children
        .iter()
        .fold(0i64, |total, c| total.saturating_add(c.fee_balance_cents));

    Ok(Json(ParentPortalView {
        console: PARENT_CONSOLE_PATH,
        identity: session.identity,
        children,
        total_fee_balance_cents,
    })
    .into_response())
}

#[derive(Serialize)]
struct StudentHubView {
    console: &'static str,
    fee_balance_cents: i64,
    identity: Identity,
}

async fn student_hub(
    State(state): State<Arc<AppState>>,
    ip: ClientIp,
    MaybeSession(session): MaybeSession,
) -> Response {
    match guard_page(&state, session, Role::Student, STUDENT_CONSOLE_PATH, &ip).await {
        Ok(session) => Json(StudentHubView {
            console: STUDENT_CONSOLE_PATH,
            fee_balance_cents: session.identity.fee_balance_cents,
            identity: session.identity,
        })
        .into_response(),
        Err(redirect) => redirect,
    }
}
