//! Session Tokens
//!
//! Children sign in through the app's identity provider; the server only
//! checks the bearer token it hands out and maps it to a [`PlayerId`].
//! Staff accounts carry an extra role claim that unlocks admin requests.

use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::ids::PlayerId;
use crate::error::EngineError;

/// Role that grants admin requests unless configured otherwise.
pub const DEFAULT_ADMIN_ROLE: &str = "admin";

/// Key material used to verify token signatures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeySource {
    /// Provider public key (RS256), PEM encoded.
    RsaPem(String),
    /// Shared secret (HS256).
    Hmac(String),
}

/// Token verification settings.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Verification key. Without one every token is refused.
    pub key: Option<KeySource>,
    /// Required `iss`, if any.
    pub issuer: Option<String>,
    /// Required `aud`, if any.
    pub audience: Option<String>,
    /// Accept tokens past `exp`. Local testing only.
    pub allow_expired: bool,
    /// Role claim value that marks staff accounts.
    pub admin_role: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            key: None,
            issuer: None,
            audience: None,
            allow_expired: false,
            admin_role: DEFAULT_ADMIN_ROLE.to_string(),
        }
    }
}

impl AuthConfig {
    /// HS256 config around `secret`.
    pub fn hmac(secret: impl Into<String>) -> Self {
        Self {
            key: Some(KeySource::Hmac(secret.into())),
            ..Self::default()
        }
    }

    /// Read `AUTH_*` variables. A PEM key wins over a shared secret.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let key = var("AUTH_PUBLIC_KEY_PEM")
            .map(KeySource::RsaPem)
            .or_else(|| var("AUTH_SECRET").map(KeySource::Hmac));

        Self {
            key,
            issuer: var("AUTH_ISSUER"),
            audience: var("AUTH_AUDIENCE"),
            allow_expired: matches!(var("AUTH_SKIP_EXPIRY").as_deref(), Some("1" | "true")),
            admin_role: var("AUTH_ADMIN_ROLE").unwrap_or_else(|| DEFAULT_ADMIN_ROLE.to_string()),
        }
    }

    /// Whether a verification key is present.
    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    fn decoding_key(&self) -> Result<(Algorithm, DecodingKey), AuthError> {
        match &self.key {
            Some(KeySource::RsaPem(pem)) => DecodingKey::from_rsa_pem(pem.as_bytes())
                .map(|k| (Algorithm::RS256, k))
                .map_err(|e| AuthError::BadKey(e.to_string())),
            Some(KeySource::Hmac(secret)) => Ok((Algorithm::HS256, DecodingKey::from_secret(secret.as_bytes()))),
            None => Err(AuthError::NoKey),
        }
    }

    fn rules(&self, algorithm: Algorithm) -> Validation {
        let mut rules = Validation::new(algorithm);
        rules.leeway = 0;
        rules.validate_exp = !self.allow_expired;
        if self.allow_expired {
            rules.set_required_spec_claims(&["sub"]);
        } else {
            rules.set_required_spec_claims(&["sub", "exp"]);
        }
        match &self.audience {
            Some(aud) => rules.set_audience(&[aud]),
            None => rules.validate_aud = false,
        }
        if let Some(iss) = &self.issuer {
            rules.set_issuer(&[iss]);
        }
        rules
    }
}

/// Claims read from a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Provider account id.
    pub sub: String,
    /// Expiry, Unix seconds.
    #[serde(default)]
    pub exp: u64,
    /// Issue time, Unix seconds.
    #[serde(default)]
    pub iat: u64,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Audience, a string or a list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,
    /// Account roles.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl TokenClaims {
    /// Player this account plays as.
    pub fn player_id(&self) -> PlayerId {
        player_for_subject(&self.sub)
    }

    /// Whether the account holds `role`.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// UUID subjects are used as-is; any other subject is hashed to 16 bytes.
pub fn player_for_subject(sub: &str) -> PlayerId {
    if let Some(id) = PlayerId::from_uuid_str(sub) {
        return id;
    }
    let digest = Sha256::new()
        .chain_update(b"progression-player:")
        .chain_update(sub.as_bytes())
        .finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    PlayerId::new(bytes)
}

/// Why a token was refused.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Server has no verification key.
    #[error("no token key configured")]
    NoKey,
    /// Configured key could not be parsed.
    #[error("unusable verification key: {0}")]
    BadKey(String),
    /// Not a JWT.
    #[error("malformed token")]
    Malformed,
    /// Signature does not verify.
    #[error("signature mismatch")]
    BadSignature,
    /// Past `exp`.
    #[error("session expired")]
    Expired,
    /// `iss` not the configured issuer.
    #[error("unexpected issuer")]
    WrongIssuer,
    /// `aud` not the configured audience.
    #[error("unexpected audience")]
    WrongAudience,
    /// `sub` absent or empty.
    #[error("token has no subject")]
    NoSubject,
    /// Anything else the decoder reported.
    #[error("token rejected: {0}")]
    Rejected(String),
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err.kind() {
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                AuthError::Malformed
            }
            ErrorKind::InvalidSignature => AuthError::BadSignature,
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidIssuer => AuthError::WrongIssuer,
            ErrorKind::InvalidAudience => AuthError::WrongAudience,
            ErrorKind::MissingRequiredClaim(claim) if claim == "sub" => AuthError::NoSubject,
            _ => AuthError::Rejected(err.to_string()),
        }
    }
}

impl From<AuthError> for EngineError {
    fn from(err: AuthError) -> Self {
        EngineError::Unauthenticated(err.to_string())
    }
}

/// Verify `token` and return its claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    let (algorithm, key) = config.decoding_key()?;
    let claims = decode::<TokenClaims>(token, &key, &config.rules(algorithm))?.claims;

    if claims.sub.trim().is_empty() {
        return Err(AuthError::NoSubject);
    }
    Ok(claims)
}

// =============================================================================
// IDENTITY RESOLUTION
// =============================================================================

/// Who a validated token belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Player the token resolves to.
    pub player: PlayerId,
    /// Whether the token carries the admin role.
    pub admin: bool,
}

/// Maps bearer tokens to identities.
pub trait SessionResolver: Send + Sync {
    /// Resolve `token`, or fail with the reason it was rejected.
    fn resolve(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Resolver backed by JWT validation.
#[derive(Clone, Debug)]
pub struct JwtSessionResolver {
    config: AuthConfig,
}

impl JwtSessionResolver {
    /// Resolver using `config`.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }
}

impl SessionResolver for JwtSessionResolver {
    fn resolve(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = validate_token(token, &self.config)?;
        Ok(Identity {
            player: claims.player_id(),
            admin: claims.has_role(&self.config.admin_role),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const KEY: &str = "classroom-test-signing-key-0001";

    fn sign(claims: &TokenClaims, secret: &str) -> String {
        encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn kid_claims() -> TokenClaims {
        let now = Utc::now().timestamp() as u64;
        TokenClaims {
            sub: "kid-account-42".into(),
            exp: now + 3600,
            iat: now,
            iss: Some("school-idp".into()),
            aud: Some(serde_json::json!("learning-app")),
            roles: vec![],
        }
    }

    #[test]
    fn test_accepts_signed_token() {
        let claims = validate_token(&sign(&kid_claims(), KEY), &AuthConfig::hmac(KEY)).unwrap();
        assert_eq!(claims.sub, "kid-account-42");
    }

    #[test]
    fn test_refuses_expired_session() {
        let claims = TokenClaims { exp: 1, ..kid_claims() };
        let result = validate_token(&sign(&claims, KEY), &AuthConfig::hmac(KEY));
        assert!(matches!(result, Err(AuthError::Expired)));

        let lenient = AuthConfig { allow_expired: true, ..AuthConfig::hmac(KEY) };
        assert!(validate_token(&sign(&claims, KEY), &lenient).is_ok());
    }

    #[test]
    fn test_refuses_foreign_signature() {
        let token = sign(&kid_claims(), "some-other-signing-key-9999");
        let result = validate_token(&token, &AuthConfig::hmac(KEY));
        assert!(matches!(result, Err(AuthError::BadSignature)));
    }

    #[test]
    fn test_refuses_blank_subject() {
        let claims = TokenClaims { sub: "  ".into(), ..kid_claims() };
        let result = validate_token(&sign(&claims, KEY), &AuthConfig::hmac(KEY));
        assert!(matches!(result, Err(AuthError::NoSubject)));
    }

    #[test]
    fn test_issuer_and_audience_checks() {
        let token = sign(&kid_claims(), KEY);

        let config = AuthConfig { issuer: Some("another-idp".into()), ..AuthConfig::hmac(KEY) };
        assert!(matches!(validate_token(&token, &config), Err(AuthError::WrongIssuer)));

        let config = AuthConfig { audience: Some("admin-portal".into()), ..AuthConfig::hmac(KEY) };
        assert!(matches!(validate_token(&token, &config), Err(AuthError::WrongAudience)));

        let config = AuthConfig {
            issuer: Some("school-idp".into()),
            audience: Some("learning-app".into()),
            ..AuthConfig::hmac(KEY)
        };
        assert!(validate_token(&token, &config).is_ok());
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(validate_token("not-a-jwt", &AuthConfig::hmac(KEY)), Err(AuthError::Malformed)));
    }

    #[test]
    fn test_no_key_refuses_everything() {
        let result = validate_token(&sign(&kid_claims(), KEY), &AuthConfig::default());
        assert!(matches!(result, Err(AuthError::NoKey)));
    }

    #[test]
    fn test_player_for_subject() {
        assert_eq!(player_for_subject("kid-a"), player_for_subject("kid-a"));
        assert_ne!(player_for_subject("kid-a"), player_for_subject("kid-b"));

        let uuid = "6f1c2a38-4d1e-4b8f-9a55-0c3a1f7e9b21";
        assert_eq!(player_for_subject(uuid).to_uuid_string(), uuid);
    }

    #[test]
    fn test_resolver_admin_role() {
        let resolver = JwtSessionResolver::new(AuthConfig::hmac(KEY));

        let kid = resolver.resolve(&sign(&kid_claims(), KEY)).unwrap();
        assert!(!kid.admin);

        let staff = TokenClaims { roles: vec!["admin".into()], ..kid_claims() };
        let identity = resolver.resolve(&sign(&staff, KEY)).unwrap();
        assert!(identity.admin);
        assert_eq!(identity.player, staff.player_id());
    }

    #[test]
    fn test_auth_error_maps_to_unauthenticated() {
        let err: EngineError = AuthError::Expired.into();
        assert!(matches!(err, EngineError::Unauthenticated(_)));
    }
}
