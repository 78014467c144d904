/// Caller identity: JWT bearer tokens or gateway-supplied headers
use crate::config::AuthConfig;
use crate::errors::{DaemonError, DaemonResult};
use crate::types::AuthToken;
use atelier_core::Actor;
use chrono::{Duration, Utc};
use hyper::header::{HeaderMap, AUTHORIZATION};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Header carrying the caller id when a gateway authenticates upstream
pub const ACTOR_ID_HEADER: &str = "x-actor-id";
/// Comma-separated roles
pub const ACTOR_ROLES_HEADER: &str = "x-actor-roles";
/// Comma-separated capabilities
pub const ACTOR_CAPABILITIES_HEADER: &str = "x-actor-capabilities";

/// JWT claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl Claims {
    pub fn into_actor(self) -> Actor {
        Actor {
            user_id: self.sub,
            roles: self.roles,
            capabilities: self.capabilities,
        }
    }
}

/// Authentication manager
pub struct AuthManager {
    config: AuthConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AuthManager {
    /// Create a new authentication manager
    pub fn new(config: AuthConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
        AuthManager {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// Issue a token carrying the actor's roles and capabilities
    pub fn generate_token(&self, actor: &Actor) -> DaemonResult<AuthToken> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.config.token_expiry_secs as i64);

        let claims = Claims {
            sub: actor.user_id.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            roles: actor.roles.clone(),
            capabilities: actor.capabilities.clone(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| DaemonError::AuthError(format!("Token generation failed: {}", e)))?;

        Ok(AuthToken {
            token,
            expires_at: exp,
            capabilities: claims.capabilities,
        })
    }

    /// Verify a token
    pub fn verify_token(&self, token: &str) -> DaemonResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| DaemonError::AuthError(format!("Token verification failed: {}", e)))
    }

    /// Check if authentication is enabled
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Resolve the caller of a request.
    ///
    /// With auth enabled only a valid bearer token is accepted; otherwise the
    /// identity headers set by the fronting gateway are trusted.
    pub fn authenticate(&self, headers: &HeaderMap) -> DaemonResult<Actor> {
        if self.config.enabled {
            let token = headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_bearer_token)
                .ok_or_else(|| DaemonError::AuthError("missing bearer token".to_string()))?;
            return Ok(self.verify_token(token)?.into_actor());
        }

        actor_from_headers(headers)
    }
}

/// Extract the token from an `Authorization: Bearer ...` value
pub fn parse_bearer_token(value: &str) -> Option<&str> {
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Build an actor from the gateway identity headers
pub fn actor_from_headers(headers: &HeaderMap) -> DaemonResult<Actor> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let user_id = header(ACTOR_ID_HEADER)
        .ok_or_else(|| DaemonError::AuthError("missing caller identity".to_string()))?;

    let mut actor = Actor::new(user_id);
    actor.roles = split_list(header(ACTOR_ROLES_HEADER));
    actor.capabilities = split_list(header(ACTOR_CAPABILITIES_HEADER));
    Ok(actor)
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn auth_config(enabled: bool) -> AuthConfig {
        AuthConfig {
            enabled,
            jwt_secret: "test-secret".to_string(),
            token_expiry_secs: 3600,
        }
    }

    #[test]
    fn test_token_round_trip_keeps_capabilities() {
        let manager = AuthManager::new(auth_config(true));
        let actor = Actor::new("designer-1")
            .with_role("designer")
            .with_capability("workflows:create");

        let token = manager.generate_token(&actor).unwrap();
        assert!(!token.token.is_empty());

        let claims = manager.verify_token(&token.token).unwrap();
        assert_eq!(claims.into_actor(), actor);
    }

    #[test]
    fn test_invalid_token_rejected() {
        let manager = AuthManager::new(auth_config(true));
        assert!(matches!(
            manager.verify_token("invalid-token"),
            Err(DaemonError::AuthError(_))
        ));
    }

    #[test]
    fn test_parse_bearer_token() {
        assert_eq!(parse_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer_token("Bearer "), None);
        assert_eq!(parse_bearer_token("Basic abc"), None);
    }

    #[test]
    fn test_headers_identity() {
        let mut headers = HeaderMap::new();
        headers.insert(ACTOR_ID_HEADER, HeaderValue::from_static("manager-1"));
        headers.insert(
            ACTOR_CAPABILITIES_HEADER,
            HeaderValue::from_static("workflows:manage, projects:view"),
        );

        let actor = actor_from_headers(&headers).unwrap();
        assert_eq!(actor.user_id, "manager-1");
        assert_eq!(actor.capabilities, vec!["workflows:manage", "projects:view"]);
        assert!(actor.roles.is_empty());
    }

    #[test]
    fn test_enabled_auth_ignores_identity_headers() {
        let manager = AuthManager::new(auth_config(true));
        let mut headers = HeaderMap::new();
        headers.insert(ACTOR_ID_HEADER, HeaderValue::from_static("manager-1"));

        assert!(matches!(
            manager.authenticate(&headers),
            Err(DaemonError::AuthError(_))
        ));

        let token = manager.generate_token(&Actor::new("manager-1")).unwrap();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token.token)).unwrap(),
        );
        assert_eq!(manager.authenticate(&headers).unwrap().user_id, "manager-1");
    }

    #[test]
    fn test_missing_identity() {
        let manager = AuthManager::new(auth_config(false));
        assert!(matches!(
            manager.authenticate(&HeaderMap::new()),
            Err(DaemonError::AuthError(_))
        ));
    }
}
