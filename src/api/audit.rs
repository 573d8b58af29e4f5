//! Audit log API endpoints and helpers.

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Query, State},
    http::{request::Parts, HeaderMap},
    Json,
};
use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use crate::db::{list_audit_logs, log_audit, AuditLog, AuditLogQuery};
use crate::AppState;

use super::auth::AdminSession;
use super::error::ApiError;

/// Client IP for a request. Proxy headers (`X-Forwarded-For`, then
/// `X-Real-IP`) are read only when `trust_proxy` is set; otherwise any
/// client could forge them. Falls back to the connection address.
pub fn extract_client_ip(
    headers: &HeaderMap,
    conn_info: Option<&SocketAddr>,
    trust_proxy: bool,
) -> Option<String> {
    if trust_proxy {
        // Comma-separated list, first is the client
        if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
            if let Some(first_ip) = forwarded.split(',').next() {
                let ip = first_ip.trim();
                if !ip.is_empty() {
                    return Some(ip.to_string());
                }
            }
        }

        if let Some(real_ip) = headers.get("x-real-ip").and_then(|h| h.to_str().ok()) {
            let ip = real_ip.trim();
            if !ip.is_empty() {
                return Some(ip.to_string());
            }
        }
    }

    conn_info.map(|addr| addr.ip().to_string())
}

/// Client IP for audit entries, if one can be determined
#[derive(Debug, Clone, Default)]
pub struct ClientIp(pub Option<String>);

impl ClientIp {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let conn = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| &info.0);
        Ok(ClientIp(extract_client_ip(
            &parts.headers,
            conn,
            state.config.server.trust_proxy,
        )))
    }
}

/// Record an audit event. Failures are logged and never fail the request.
pub async fn audit_log(
    state: &AppState,
    action: &str,
    identity_id: Option<&str>,
    target_id: Option<&str>,
    ip_address: Option<&str>,
    details: Option<serde_json::Value>,
) {
    if let Err(e) = log_audit(
        &state.db,
        action,
        identity_id,
        target_id,
        ip_address,
        details,
    )
    .await
    {
        tracing::warn!(
            action = action,
            error = %e,
            "Failed to create audit log entry"
        );
    }
}

/// List recent audit entries (admin only)
///
/// Query parameters:
/// - action: Filter by action (e.g., "auth.login_failed")
/// - limit: Max entries (defaults to 50, max 200)
pub async fn list_audit(
    State(state): State<Arc<AppState>>,
    _admin: AdminSession,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<Vec<AuditLog>>, ApiError> {
    let logs = list_audit_logs(&state.db, &query).await?;
    Ok(Json(logs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_forwarded_for_takes_first_hop_behind_proxy() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" 41.90.1.7 , 10.0.0.2"));
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(
            extract_client_ip(&headers, None, true).as_deref(),
            Some("41.90.1.7")
        );
    }

    #[test]
    fn test_real_ip_then_connection_behind_proxy() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(
            extract_client_ip(&headers, None, true).as_deref(),
            Some("10.0.0.9")
        );

        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(
            extract_client_ip(&HeaderMap::new(), Some(&addr), true).as_deref(),
            Some("127.0.0.1")
        );
        assert_eq!(extract_client_ip(&HeaderMap::new(), None, true), None);
    }

    #[test]
    fn test_proxy_headers_ignored_unless_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("41.90.1.7"));
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        let addr: SocketAddr = "192.168.4.20:51000".parse().unwrap();

        assert_eq!(
            extract_client_ip(&headers, Some(&addr), false).as_deref(),
            Some("192.168.4.20")
        );
        assert_eq!(extract_client_ip(&headers, None, false), None);
    }
}
