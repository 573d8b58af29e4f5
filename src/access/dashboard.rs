use super::{
    ADMIN_CONSOLE_PATH, LOGIN_PATH, PARENT_CONSOLE_PATH, STUDENT_CONSOLE_PATH,
    TEACHER_CONSOLE_PATH,
};
use crate::identity::Role;

impl Role {
    /// Console a signed-in identity with this role lands on
    pub fn dashboard_path(&self) -> &'static str {
        match self {
            Role::Admin => ADMIN_CONSOLE_PATH,
            Role::Teacher => TEACHER_CONSOLE_PATH,
            Role::Parent => PARENT_CONSOLE_PATH,
            Role::Student => STUDENT_CONSOLE_PATH,
        }
    }
}

/// Map a role string to its console. Unknown or missing roles go to login.
pub fn select_dashboard(role: Option<&str>) -> &'static str {
    role.and_then(|r| r.parse::<Role>().ok())
        .map(|r| r.dashboard_path())
        .unwrap_or(LOGIN_PATH)
}
