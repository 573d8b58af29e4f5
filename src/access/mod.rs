//! Route guarding and dashboard selection.
//!
//! Both decisions are pure: they take an already-verified role and return
//! where the request should go. The `portal` pages turn the outcome into
//! redirects, and `api::auth::AdminSession` turns it into 401/403 responses.

mod dashboard;
mod guard;

pub use dashboard::select_dashboard;
pub use guard::{authorize, GuardDecision};

pub const LOGIN_PATH: &str = "/login";
pub const UNAUTHORIZED_PATH: &str = "/unauthorized";
pub const REGISTER_PATH: &str = "/register";
pub const DASHBOARD_PATH: &str = "/dashboard";

pub const ADMIN_CONSOLE_PATH: &str = "/admin";
pub const TEACHER_CONSOLE_PATH: &str = "/teacher-portal";
pub const PARENT_CONSOLE_PATH: &str = "/parent-portal";
pub const STUDENT_CONSOLE_PATH: &str = "/student-hub";
