mod admin;
pub mod audit;
pub mod auth;
pub mod error;
pub mod rate_limit;
mod validation;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::portal;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth routes (public, stricter rate limit)
    let auth_routes = Router::new()
        .route("/identify", post(auth::identify))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/session", get(auth::current_session))
        .route("/register", post(auth::register))
        .route("/setup-status", get(auth::setup_status))
        .route("/setup", post(auth::setup))
        .route("/invites/:token/accept", post(auth::accept_invite))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    // Admin routes (AdminSession extractor on every handler)
    let admin_routes = Router::new()
        .route("/students", post(admin::admit_student))
        .route("/staff", post(admin::create_staff))
        .route("/invites", post(admin::create_staff_invite))
        .route("/identities", get(admin::list_all_identities))
        .route("/audit", get(audit::list_audit));

    let api_routes = Router::new()
        .route("/schools/:id", get(auth::get_school_info))
        .nest("/admin", admin_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    let portal_routes = portal::create_router().layer(middleware::from_fn_with_state(
        state.clone(),
        rate_limit::rate_limit_api,
    ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", auth_routes)
        .nest("/api", api_routes)
        .merge(portal_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::init_memory;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn test_app_with(config: Config) -> Router {
        let pool = init_memory().await.unwrap();
        create_router(Arc::new(AppState::new(config, pool)))
    }

    async fn test_app() -> Router {
        let mut config = Config::default();
        config.rate_limit.enabled = false;
        test_app_with(config).await
    }

    async fn send(app: &Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    fn post_json(uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_with(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn location(response: &Response) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    /// Run first-run setup and return the admin's token
    async fn setup_admin(app: &Router) -> String {
        let response = send(
            app,
            post_json(
                "/api/auth/setup",
                json!({
                    "school_name": "Riverside Academy",
                    "name": "Grace Head",
                    "email": "head@riverside.ac.ke",
                    "staff_number": "HDT-1",
                    "password": "correct8horse",
                }),
                None,
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["redirect_to"], "/admin");
        body["token"].as_str().unwrap().to_string()
    }

    async fn login(app: &Router, identifier: &str, secret: &str) -> Response {
        send(
            app,
            post_json(
                "/api/auth/login",
                json!({ "identifier": identifier, "secret": secret }),
                None,
            ),
        )
        .await
    }

    async fn login_token(app: &Router, identifier: &str, secret: &str) -> String {
        let response = login(app, identifier, secret).await;
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await["token"]
            .as_str()
            .unwrap()
            .to_string()
    }

    async fn admit(app: &Router, admin: &str, body: Value) -> Response {
        send(app, post_json("/api/admin/students", body, Some(admin))).await
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app().await;
        let response = send(&app, get_with("/health", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_setup_runs_once() {
        let app = test_app().await;

        let status = body_json(send(&app, get_with("/api/auth/setup-status", None)).await).await;
        assert_eq!(status["needs_setup"], true);

        setup_admin(&app).await;

        let status = body_json(send(&app, get_with("/api/auth/setup-status", None)).await).await;
        assert_eq!(status["needs_setup"], false);

        let again = send(
            &app,
            post_json(
                "/api/auth/setup",
                json!({
                    "school_name": "Other",
                    "name": "Intruder",
                    "email": "x@example.com",
                    "staff_number": "HDT-2",
                    "password": "correct8horse",
                }),
                None,
            ),
        )
        .await;
        assert_eq!(again.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_concurrent_setup_creates_one_admin() {
        let app = test_app().await;
        let setup = |staff_number: &str, email: &str| {
            post_json(
                "/api/auth/setup",
                json!({
                    "school_name": "Riverside Academy",
                    "name": "Grace Head",
                    "email": email,
                    "staff_number": staff_number,
                    "password": "correct8horse",
                }),
                None,
            )
        };

        let (first, second) = tokio::join!(
            send(&app, setup("HDT-1", "head@riverside.ac.ke")),
            send(&app, setup("HDT-2", "deputy@riverside.ac.ke")),
        );
        let mut statuses = [first.status(), second.status()];
        statuses.sort_by_key(|s| s.as_u16());
        assert_eq!(statuses, [StatusCode::CREATED, StatusCode::FORBIDDEN]);

        let winner = if first.status() == StatusCode::CREATED { first } else { second };
        let token = body_json(winner).await["token"].as_str().unwrap().to_string();
        let identities =
            body_json(send(&app, get_with("/api/admin/identities", Some(&token))).await).await;
        assert_eq!(identities.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_staff_email_cannot_look_like_admission_number() {
        let app = test_app().await;

        let response = send(
            &app,
            post_json(
                "/api/auth/setup",
                json!({
                    "school_name": "Riverside Academy",
                    "name": "Grace Head",
                    "email": "admin@riverside.ac.ke",
                    "staff_number": "HDT-1",
                    "password": "correct8horse",
                }),
                None,
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"]["details"]["email"].is_array());

        let admin = setup_admin(&app).await;
        let staff = send(
            &app,
            post_json(
                "/api/admin/staff",
                json!({
                    "role": "teacher",
                    "staff_number": "TCH-9",
                    "name": "Otieno Adm",
                    "email": "admissions@riverside.ac.ke",
                    "password": "correct8horse",
                }),
                Some(&admin),
            ),
        )
        .await;
        assert_eq!(staff.status(), StatusCode::BAD_REQUEST);

        let invite = send(
            &app,
            post_json(
                "/api/admin/invites",
                json!({
                    "email": "Admin2@riverside.ac.ke",
                    "role": "teacher",
                    "staff_number": "TCH-10",
                }),
                Some(&admin),
            ),
        )
        .await;
        assert_eq!(invite.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_student_scenario_guard_and_dashboard() {
        let app = test_app().await;
        let admin = setup_admin(&app).await;

        let response = admit(
            &app,
            &admin,
            json!({
                "admission_number": "ADM-2024-001",
                "name": "Amani Otieno",
                "pin": "4821",
                "fee_balance_cents": 1_250_000,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let identify = send(
            &app,
            post_json("/api/auth/identify", json!({ "identifier": "ADM-2024-001" }), None),
        )
        .await;
        let identify = body_json(identify).await;
        assert_eq!(identify["kind"], "admission_number");
        assert_eq!(identify["status"], "found");
        assert_eq!(identify["credential"], "pin");

        let response = login(&app, "adm-2024-001", "4821").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::SET_COOKIE).is_some());
        let body = body_json(response).await;
        assert_eq!(body["identity"]["role"], "student");
        assert_eq!(body["redirect_to"], "/student-hub");
        let student = body["token"].as_str().unwrap().to_string();

        let hub = send(&app, get_with("/student-hub", Some(&student))).await;
        assert_eq!(hub.status(), StatusCode::OK);
        assert_eq!(body_json(hub).await["fee_balance_cents"], 1_250_000);

        let admin_page = send(&app, get_with("/admin", Some(&student))).await;
        assert_eq!(admin_page.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&admin_page), "/unauthorized");

        let dashboard = send(&app, get_with("/dashboard", Some(&student))).await;
        assert_eq!(dashboard.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&dashboard), "/student-hub");
    }

    #[tokio::test]
    async fn test_no_session_redirects_to_login() {
        let app = test_app().await;

        for page in ["/admin", "/teacher-portal", "/parent-portal", "/student-hub", "/dashboard"] {
            let response = send(&app, get_with(page, None)).await;
            assert_eq!(response.status(), StatusCode::SEE_OTHER, "{}", page);
            assert_eq!(location(&response), "/login", "{}", page);
        }

        let unknown = send(&app, get_with("/admin", Some("not-a-real-token"))).await;
        assert_eq!(location(&unknown), "/login");

        let unauthorized = send(&app, get_with("/unauthorized", None)).await;
        assert_eq!(unauthorized.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_logout_clears_session() {
        let app = test_app().await;
        let admin = setup_admin(&app).await;

        let console = send(&app, get_with("/admin", Some(&admin))).await;
        assert_eq!(console.status(), StatusCode::OK);

        let response = send(&app, post_json("/api/auth/logout", json!({}), Some(&admin))).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let console = send(&app, get_with("/admin", Some(&admin))).await;
        assert_eq!(console.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&console), "/login");

        let session = send(&app, get_with("/api/auth/session", Some(&admin))).await;
        assert_eq!(session.status(), StatusCode::UNAUTHORIZED);

        // Logging out again is harmless
        let response = send(&app, post_json("/api/auth/logout", json!({}), Some(&admin))).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_session_cookie_is_accepted() {
        let app = test_app().await;
        let admin = setup_admin(&app).await;

        let request = Request::builder()
            .uri("/api/auth/session")
            .header(header::COOKIE, format!("edusphere_session={}", admin))
            .body(Body::empty())
            .unwrap();
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["identity"]["role"], "admin");
        assert_eq!(body["redirect_to"], "/admin");
    }

    #[tokio::test]
    async fn test_register_always_creates_parent() {
        let app = test_app().await;

        let rejected = send(
            &app,
            post_json(
                "/api/auth/register",
                json!({
                    "name": "Mallory",
                    "phone": "0711000111",
                    "password": "correct8horse",
                    "role": "admin",
                }),
                None,
            ),
        )
        .await;
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
        let body = body_json(rejected).await;
        assert_eq!(body["error"]["code"], "validation_error");
        assert!(body["error"]["details"]["role"].is_array());

        let null_role = send(
            &app,
            post_json(
                "/api/auth/register",
                json!({
                    "name": "Mallory",
                    "phone": "0711000111",
                    "password": "correct8horse",
                    "role": null,
                }),
                None,
            ),
        )
        .await;
        assert_eq!(null_role.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(null_role).await["error"]["details"]["role"].is_array());

        let created = send(
            &app,
            post_json(
                "/api/auth/register",
                json!({
                    "name": "Wanjiru Kamau",
                    "phone": "0712 345 678",
                    "password": "correct8horse",
                }),
                None,
            ),
        )
        .await;
        assert_eq!(created.status(), StatusCode::CREATED);
        let body = body_json(created).await;
        assert_eq!(body["identity"]["role"], "parent");
        assert_eq!(body["identity"]["phone"], "254712345678");
        assert_eq!(body["redirect_to"], "/parent-portal");

        let duplicate = send(
            &app,
            post_json(
                "/api/auth/register",
                json!({
                    "name": "Someone Else",
                    "phone": "+254712345678",
                    "password": "correct8horse",
                }),
                None,
            ),
        )
        .await;
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_parent_portal_lists_linked_children() {
        let app = test_app().await;
        let admin = setup_admin(&app).await;

        let response = send(
            &app,
            post_json(
                "/api/auth/register",
                json!({
                    "name": "Wanjiru Kamau",
                    "phone": "0712345678",
                    "password": "correct8horse",
                }),
                None,
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let unknown_parent = admit(
            &app,
            &admin,
            json!({
                "admission_number": "ADM-2024-002",
                "name": "Baraka Kamau",
                "pin": "7391",
                "parent_phone": "0799999999",
            }),
        )
        .await;
        assert_eq!(unknown_parent.status(), StatusCode::BAD_REQUEST);

        let oversized = admit(
            &app,
            &admin,
            json!({
                "admission_number": "ADM-2024-004",
                "name": "Imani Kamau",
                "pin": "7391",
                "parent_phone": "254712345678",
                "fee_balance_cents": i64::MAX,
            }),
        )
        .await;
        assert_eq!(oversized.status(), StatusCode::BAD_REQUEST);
        let body = body_json(oversized).await;
        assert!(body["error"]["details"]["fee_balance_cents"].is_array());

        for (adm, name, fees) in [
            ("ADM-2024-002", "Baraka Kamau", 500_000),
            ("ADM-2024-003", "Neema Kamau", 250_000),
        ] {
            let response = admit(
                &app,
                &admin,
                json!({
                    "admission_number": adm,
                    "name": name,
                    "pin": "7391",
                    "parent_phone": "254712345678",
                    "fee_balance_cents": fees,
                }),
            )
            .await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let parent = login_token(&app, "0712 345 678", "correct8horse").await;
        let portal = send(&app, get_with("/parent-portal", Some(&parent))).await;
        assert_eq!(portal.status(), StatusCode::OK);
        let body = body_json(portal).await;
        assert_eq!(body["children"].as_array().unwrap().len(), 2);
        assert_eq!(body["total_fee_balance_cents"], 750_000);

        let hub = send(&app, get_with("/student-hub", Some(&parent))).await;
        assert_eq!(location(&hub), "/unauthorized");
    }

    #[tokio::test]
    async fn test_login_failures() {
        let app = test_app().await;
        setup_admin(&app).await;

        let missing = login(&app, "ADM-9999", "4821").await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let body = body_json(missing).await;
        assert_eq!(body["error"]["details"]["register_path"], "/register");

        let wrong = login(&app, "HDT-1", "wrong8horse").await;
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(wrong).await["error"]["message"], "Invalid credentials");

        let empty = login(&app, "   ", "whatever").await;
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

        // Staff can sign in by staff number or email
        login_token(&app, "hdt-1", "correct8horse").await;
        login_token(&app, "Head@Riverside.ac.ke", "correct8horse").await;
    }

    #[tokio::test]
    async fn test_ambiguous_name_match_is_rejected() {
        let app = test_app().await;
        let admin = setup_admin(&app).await;

        for (number, name, email) in [
            ("TCH-01", "Peter Otieno", "peter@riverside.ac.ke"),
            ("TCH-02", "Mary Otieno", "mary@riverside.ac.ke"),
        ] {
            let response = send(
                &app,
                post_json(
                    "/api/admin/staff",
                    json!({
                        "role": "teacher",
                        "staff_number": number,
                        "name": name,
                        "email": email,
                        "password": "correct8horse",
                    }),
                    Some(&admin),
                ),
            )
            .await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = login(&app, "otieno", "correct8horse").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["error"]["details"]["candidates"], 2);

        let teacher = login_token(&app, "TCH-02", "correct8horse").await;
        let portal = send(&app, get_with("/teacher-portal", Some(&teacher))).await;
        assert_eq!(portal.status(), StatusCode::OK);
        assert_eq!(body_json(portal).await["identity"]["full_name"], "Mary Otieno");
    }

    #[tokio::test]
    async fn test_admin_api_requires_admin() {
        let app = test_app().await;
        let admin = setup_admin(&app).await;

        let anonymous = send(&app, get_with("/api/admin/identities", None)).await;
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let response = send(
            &app,
            post_json(
                "/api/auth/register",
                json!({ "name": "Wanjiru", "phone": "0712345678", "password": "correct8horse" }),
                None,
            ),
        )
        .await;
        let parent = body_json(response).await["token"].as_str().unwrap().to_string();

        let forbidden = send(&app, get_with("/api/admin/identities", Some(&parent))).await;
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let listed = send(&app, get_with("/api/admin/identities?role=parent", Some(&admin))).await;
        assert_eq!(listed.status(), StatusCode::OK);
        assert_eq!(body_json(listed).await.as_array().unwrap().len(), 1);

        let audit = send(&app, get_with("/api/admin/audit?action=access.denied", Some(&admin))).await;
        assert_eq!(audit.status(), StatusCode::OK);
        assert_eq!(body_json(audit).await.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_staff_invite_is_single_use() {
        let app = test_app().await;
        let admin = setup_admin(&app).await;

        let response = send(
            &app,
            post_json(
                "/api/admin/invites",
                json!({ "email": "new.teacher@riverside.ac.ke", "role": "teacher", "staff_number": "TCH-09" }),
                Some(&admin),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let invite = body_json(response).await;
        let accept_path = invite["accept_path"].as_str().unwrap().to_string();

        let accept = json!({ "name": "Joseph Mwangi", "password": "correct8horse" });
        let response = send(&app, post_json(&accept_path, accept.clone(), None)).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["identity"]["role"], "teacher");
        assert_eq!(body["identity"]["staff_number"], "TCH-09");
        assert_eq!(body["redirect_to"], "/teacher-portal");

        let again = send(&app, post_json(&accept_path, accept, None)).await;
        assert_eq!(again.status(), StatusCode::NOT_FOUND);

        login_token(&app, "TCH-09", "correct8horse").await;
    }

    #[tokio::test]
    async fn test_school_lookup() {
        let app = test_app().await;
        let admin = setup_admin(&app).await;

        let session = body_json(send(&app, get_with("/api/auth/session", Some(&admin))).await).await;
        let school_id = session["identity"]["school_id"].as_str().unwrap().to_string();

        let school = send(&app, get_with(&format!("/api/schools/{}", school_id), None)).await;
        assert_eq!(school.status(), StatusCode::OK);
        assert_eq!(body_json(school).await["name"], "Riverside Academy");

        let missing = send(&app, get_with("/api/schools/nope", None)).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_auth_routes_are_rate_limited() {
        let mut config = Config::default();
        config.rate_limit.auth_requests_per_window = 2;
        let app = test_app_with(config).await;

        for _ in 0..2 {
            let response = send(&app, get_with("/api/auth/setup-status", None)).await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let limited = send(&app, get_with("/api/auth/setup-status", None)).await;
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(limited.headers().get("retry-after").is_some());
    }

    fn with_forwarded_for(ip: &str) -> Request<Body> {
        Request::builder()
            .uri("/api/auth/setup-status")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_forged_forwarded_for_does_not_reset_auth_limit() {
        let mut config = Config::default();
        config.rate_limit.auth_requests_per_window = 2;
        let app = test_app_with(config).await;

        let mut statuses = Vec::new();
        for i in 0..6 {
            let response = send(&app, with_forwarded_for(&format!("203.0.113.{}", i))).await;
            statuses.push(response.status());
        }
        assert_eq!(&statuses[..2], &[StatusCode::OK, StatusCode::OK]);
        assert!(statuses[2..]
            .iter()
            .all(|s| *s == StatusCode::TOO_MANY_REQUESTS));
    }

    #[tokio::test]
    async fn test_forwarded_for_is_honoured_behind_trusted_proxy() {
        let mut config = Config::default();
        config.rate_limit.auth_requests_per_window = 2;
        config.server.trust_proxy = true;
        let app = test_app_with(config).await;

        for _ in 0..2 {
            let response = send(&app, with_forwarded_for("203.0.113.1")).await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        let limited = send(&app, with_forwarded_for("203.0.113.1")).await;
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);

        let other_client = send(&app, with_forwarded_for("203.0.113.2")).await;
        assert_eq!(other_client.status(), StatusCode::OK);
    }
}
