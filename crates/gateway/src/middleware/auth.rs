//! JWT authentication: decode and verify the bearer token on every
//! request, reject expired/premature/mis-scoped tokens, and guard
//! against replay of a single-use token via its `jti`.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::GatewayState;

/// Claims this gateway expects every token to carry. Extra claims in the
/// token are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the identity the token was issued to.
    pub sub: String,
    /// Issuer, checked against [`AuthConfig::issuer`].
    pub iss: String,
    /// Audience, checked against [`AuthConfig::audience`].
    pub aud: String,
    /// Expiry, seconds since epoch.
    pub exp: i64,
    /// Not-before, seconds since epoch.
    #[serde(default)]
    pub nbf: Option<i64>,
    /// Issued-at, seconds since epoch; required to enforce `max_token_age`.
    #[serde(default)]
    pub iat: Option<i64>,
    /// Unique token id; required to enforce replay protection.
    #[serde(default)]
    pub jti: Option<String>,
    /// Roles granted to the subject, consulted by the authorization stage.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Verification key material for one configured algorithm.
#[derive(Clone)]
pub enum VerificationKey {
    /// Shared secret for HS256.
    Hmac(Vec<u8>),
    /// PEM-encoded public key for ES256 or RS256.
    Pem(Vec<u8>),
}

/// How incoming bearer tokens are authenticated.
pub struct AuthConfig {
    algorithm: Algorithm,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    clock_skew: Duration,
    max_token_age: Option<Duration>,
    replay_cache: Option<ReplayCache>,
}

impl AuthConfig {
    /// Build a config verifying tokens signed with `algorithm` using
    /// `key`. `clock_skew` is applied as leeway around `exp`/`nbf`;
    /// `max_token_age`, if set, additionally rejects tokens whose `iat`
    /// is older than that duration even if `exp` hasn't passed yet.
    /// `replay_cache_capacity`, if non-zero, rejects any token whose
    /// `jti` has already been seen, bounded to the most recent N tokens.
    pub fn new(
        algorithm: Algorithm,
        key: VerificationKey,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        clock_skew: Duration,
        max_token_age: Option<Duration>,
        replay_cache_capacity: usize,
    ) -> crate::error::Result<Self> {
        let decoding_key = match (&algorithm, &key) {
            (Algorithm::HS256, VerificationKey::Hmac(secret)) => DecodingKey::from_secret(secret),
            (Algorithm::ES256, VerificationKey::Pem(pem)) => {
                DecodingKey::from_ec_pem(pem).map_err(|e| crate::error::Error::InvalidKey {
                    algorithm,
                    reason: e.to_string(),
                })?
            }
            (Algorithm::RS256, VerificationKey::Pem(pem)) => {
                DecodingKey::from_rsa_pem(pem).map_err(|e| crate::error::Error::InvalidKey {
                    algorithm,
                    reason: e.to_string(),
                })?
            }
            (other, _) => {
                return Err(crate::error::Error::InvalidKey {
                    algorithm: *other,
                    reason: "key material does not match algorithm".to_string(),
                })
            }
        };

        Ok(Self {
            algorithm,
            decoding_key,
            issuer: issuer.into(),
            audience: audience.into(),
            clock_skew,
            max_token_age,
            replay_cache: (replay_cache_capacity > 0)
                .then(|| ReplayCache::new(replay_cache_capacity)),
        })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[self.issuer.clone()]);
        validation.set_audience(&[self.audience.clone()]);
        validation.leeway = self.clock_skew.as_secs();
        validation
    }
}

/// Bounded cache of recently-seen `jti`s, used to reject a token that is
/// presented twice. Eviction is FIFO rather than by `exp`, so capacity
/// should comfortably exceed the expected number of distinct tokens
/// live within one `max_token_age` window.
struct ReplayCache {
    capacity: usize,
    seen: Mutex<(VecDeque<String>, HashSet<String>)>,
}

impl ReplayCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: Mutex::new((VecDeque::with_capacity(capacity), HashSet::with_capacity(capacity))),
        }
    }

    /// Returns `true` the first time `jti` is seen, `false` on replay.
    fn observe(&self, jti: &str) -> bool {
        let mut guard = self.seen.lock();
        let (order, set) = &mut *guard;
        if !set.insert(jti.to_string()) {
            return false;
        }
        order.push_back(jti.to_string());
        if order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                set.remove(&oldest);
            }
        }
        true
    }
}

/// Identity recovered from a verified token, attached to the request so
/// the authorization stage doesn't need to re-parse anything.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// The token's `sub` claim.
    pub subject: String,
    /// The token's `roles` claim.
    pub roles: Vec<String>,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn rejected(status: StatusCode, reason: &str) -> Response {
    (status, Json(json!({ "error": reason }))).into_response()
}

/// `axum::middleware::from_fn_with_state` handler verifying the bearer
/// token and attaching an [`AuthenticatedUser`] extension on success.
pub async fn authenticate(
    State(state): State<Arc<GatewayState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(header_value) = request.headers().get(header::AUTHORIZATION) else {
        state.metrics.record_rejection("authentication");
        return rejected(StatusCode::UNAUTHORIZED, "missing authorization header");
    };
    let Ok(header_str) = header_value.to_str() else {
        state.metrics.record_rejection("authentication");
        return rejected(StatusCode::UNAUTHORIZED, "invalid authorization header encoding");
    };
    let Some(token) = header_str.strip_prefix("Bearer ") else {
        state.metrics.record_rejection("authentication");
        return rejected(StatusCode::UNAUTHORIZED, "expected a Bearer token");
    };

    let claims = match jsonwebtoken::decode::<Claims>(token, &state.auth.decoding_key, &state.auth.validation())
    {
        Ok(data) => data.claims,
        Err(e) => {
            state.metrics.record_rejection("authentication");
            return rejected(StatusCode::UNAUTHORIZED, &format!("invalid token: {e}"));
        }
    };

    if let Some(max_age) = state.auth.max_token_age {
        match claims.iat {
            Some(iat) if (now_secs() - iat) as u64 <= max_age.as_secs() => {}
            Some(_) => {
                state.metrics.record_rejection("authentication");
                return rejected(StatusCode::UNAUTHORIZED, "token exceeds maximum age");
            }
            None => {
                state.metrics.record_rejection("authentication");
                return rejected(StatusCode::UNAUTHORIZED, "token missing iat required by max_token_age policy");
            }
        }
    }

    if let Some(cache) = &state.auth.replay_cache {
        match &claims.jti {
            Some(jti) if cache.observe(jti) => {}
            Some(_) => {
                state.metrics.record_rejection("authentication");
                return rejected(StatusCode::UNAUTHORIZED, "token already used");
            }
            None => {
                state.metrics.record_rejection("authentication");
                return rejected(StatusCode::UNAUTHORIZED, "token missing jti required by replay policy");
            }
        }
    }

    request.extensions_mut().insert(AuthenticatedUser {
        subject: claims.sub,
        roles: claims.roles,
    });

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn config() -> AuthConfig {
        AuthConfig::new(
            Algorithm::HS256,
            VerificationKey::Hmac(b"test-secret".to_vec()),
            "trebuchet-tests",
            "trebuchet-gateway",
            Duration::from_secs(5),
            Some(Duration::from_secs(3600)),
            128,
        )
        .unwrap()
    }

    fn token(claims: &Claims) -> String {
        encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(b"test-secret")).unwrap()
    }

    fn base_claims() -> Claims {
        let now = now_secs();
        Claims {
            sub: "user-1".to_string(),
            iss: "trebuchet-tests".to_string(),
            aud: "trebuchet-gateway".to_string(),
            exp: now + 300,
            nbf: Some(now - 5),
            iat: Some(now),
            jti: Some("jti-1".to_string()),
            roles: vec!["admin".to_string()],
        }
    }

    #[test]
    fn valid_token_decodes_with_matching_claims() {
        let config = config();
        let claims = base_claims();
        let data = jsonwebtoken::decode::<Claims>(&token(&claims), &config.decoding_key, &config.validation()).unwrap();
        assert_eq!(data.claims.sub, "user-1");
        assert_eq!(data.claims.roles, vec!["admin".to_string()]);
    }

    #[test]
    fn expired_token_is_rejected_by_validation() {
        let config = config();
        let mut claims = base_claims();
        claims.exp = now_secs() - 3600;
        let result = jsonwebtoken::decode::<Claims>(&token(&claims), &config.decoding_key, &config.validation());
        assert!(result.is_err());
    }

    #[test]
    fn wrong_audience_is_rejected() {
        let config = config();
        let mut claims = base_claims();
        claims.aud = "someone-else".to_string();
        let result = jsonwebtoken::decode::<Claims>(&token(&claims), &config.decoding_key, &config.validation());
        assert!(result.is_err());
    }

    #[test]
    fn replay_cache_rejects_the_second_use_of_the_same_jti() {
        let cache = ReplayCache::new(4);
        assert!(cache.observe("a"));
        assert!(!cache.observe("a"));
        assert!(cache.observe("b"));
    }

    #[test]
    fn replay_cache_evicts_oldest_once_past_capacity() {
        let cache = ReplayCache::new(2);
        assert!(cache.observe("a"));
        assert!(cache.observe("b"));
        assert!(cache.observe("c"));
        // "a" was evicted to make room for "c"; it can be observed again.
        assert!(cache.observe("a"));
    }
}
