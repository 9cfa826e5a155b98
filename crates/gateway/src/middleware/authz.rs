//! Role-based authorization: once [`crate::middleware::auth`] has
//! attached an [`AuthenticatedUser`], check its roles against the policy
//! for the actor/target this request names.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::middleware::auth::AuthenticatedUser;
use crate::middleware::validation::ParsedInvoke;
use crate::GatewayState;

/// One rule: a caller holding `role` may invoke a method matching
/// `method_pattern` on an actor type matching `actor_type_pattern`.
///
/// Each pattern is matched independently: the bare pattern `"*"` matches
/// everything, `"prefix*"` matches anything starting with `prefix`, and
/// `"*suffix"` matches anything ending with `suffix`; otherwise the
/// pattern must equal the value exactly.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Role this rule grants access to.
    pub role: String,
    /// Pattern matched against the request's actor type (`actor_id.id`).
    pub actor_type_pattern: String,
    /// Pattern matched against the request's method name.
    pub method_pattern: String,
}

fn matches_pattern(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return value.starts_with(prefix);
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return value.ends_with(suffix);
    }
    pattern == value
}

impl Policy {
    /// Build a policy granting `role` access to methods matching
    /// `method_pattern` on actor types matching `actor_type_pattern`.
    pub fn new(
        role: impl Into<String>,
        actor_type_pattern: impl Into<String>,
        method_pattern: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            actor_type_pattern: actor_type_pattern.into(),
            method_pattern: method_pattern.into(),
        }
    }

    fn matches(&self, actor_type: &str, method: &str, roles: &[String]) -> bool {
        roles.contains(&self.role)
            && matches_pattern(&self.actor_type_pattern, actor_type)
            && matches_pattern(&self.method_pattern, method)
    }
}

/// The full set of policies this gateway enforces. Authorization
/// succeeds iff at least one rule matches both the caller's role set and
/// the request's actor type and method patterns; a call matched by no
/// rule is denied.
pub struct AuthzConfig {
    policies: Vec<Policy>,
}

impl AuthzConfig {
    /// Build a config enforcing `policies`.
    pub fn new(policies: Vec<Policy>) -> Self {
        Self { policies }
    }

    fn permits(&self, actor_type: &str, method: &str, roles: &[String]) -> bool {
        self.policies.iter().any(|policy| policy.matches(actor_type, method, roles))
    }
}

fn forbidden(reason: &str) -> Response {
    (StatusCode::FORBIDDEN, Json(json!({ "error": reason }))).into_response()
}

/// `axum::middleware::from_fn_with_state` handler enforcing [`AuthzConfig`]
/// against the authenticated caller's roles.
pub async fn authorize(State(state): State<Arc<GatewayState>>, request: Request, next: Next) -> Response {
    let Some(user) = request.extensions().get::<AuthenticatedUser>().cloned() else {
        state.metrics.record_rejection("authorization");
        return forbidden("no authenticated caller");
    };

    // GET /health carries no ParsedInvoke; only /invoke is governed by policy.
    let Some(ParsedInvoke(invoke)) = request.extensions().get::<ParsedInvoke>().cloned() else {
        return next.run(request).await;
    };

    if !state.authz.permits(&invoke.actor_id.id, &invoke.target_identifier, &user.roles) {
        state.metrics.record_rejection("authorization");
        return forbidden(&format!(
            "role(s) {:?} may not call {}.{}",
            user.roles, invoke.actor_id.id, invoke.target_identifier
        ));
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_wildcard_matches_any_suffix() {
        let policy = Policy::new("ops", "orders", "*");
        assert!(policy.matches("orders", "cancel", &["ops".to_string()]));
        assert!(policy.matches("orders", "create", &["ops".to_string()]));
        assert!(!policy.matches("billing", "refund", &["ops".to_string()]));
    }

    #[test]
    fn leading_wildcard_matches_any_prefix() {
        let policy = Policy::new("ops", "*", "*Cancel");
        assert!(policy.matches("orders", "orderCancel", &["ops".to_string()]));
        assert!(!policy.matches("orders", "cancelOrder", &["ops".to_string()]));
    }

    #[test]
    fn bare_star_matches_everything() {
        let policy = Policy::new("admin", "*", "*");
        assert!(policy.matches("anything", "at.all", &["admin".to_string()]));
    }

    #[test]
    fn any_matching_rule_is_sufficient_even_if_an_earlier_rule_matches_the_route_only() {
        let config = AuthzConfig::new(vec![
            Policy::new("ops", "orders", "*"),
            Policy::new("admin", "orders", "cancel"),
        ]);

        assert!(config.permits("orders", "cancel", &["ops".to_string()]));
        assert!(config.permits("orders", "cancel", &["admin".to_string()]));
        assert!(!config.permits("orders", "create", &["admin".to_string()]));
        assert!(!config.permits("nothing", "matches", &[]));
    }
}
