use std::fs;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::revocation::RevocationStore;
use super::IamError;
use crate::clock::SharedClock;
use crate::config::TokenConfig;
use crate::utils::token_fingerprint;

const ACCESS_TOKEN_TYPE: &str = "access";

/// Claims for access tokens (short-lived, bound to one session)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "type")]
    pub token_type: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// Claims for refresh tokens (long-lived, identified by jti)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// Union of both shapes, used to tell them apart after signature checks.
#[derive(Debug, Deserialize)]
struct AnyClaims {
    sub: String,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    #[serde(rename = "type")]
    token_type: Option<String>,
    jti: Option<String>,
    iat: i64,
    exp: i64,
    iss: String,
    aud: String,
}

impl AnyClaims {
    fn into_verified(self) -> Option<VerifiedClaims> {
        match (self.token_type, self.session_id, self.jti) {
            (Some(t), Some(session_id), None) if t == ACCESS_TOKEN_TYPE => {
                Some(VerifiedClaims::Access(AccessTokenClaims {
                    sub: self.sub,
                    session_id,
                    token_type: t,
                    iat: self.iat,
                    exp: self.exp,
                    iss: self.iss,
                    aud: self.aud,
                }))
            }
            (None, None, Some(jti)) => Some(VerifiedClaims::Refresh(RefreshTokenClaims {
                sub: self.sub,
                jti,
                iat: self.iat,
                exp: self.exp,
                iss: self.iss,
                aud: self.aud,
            })),
            _ => None,
        }
    }
}

/// What a caller asks to have signed.
#[derive(Debug, Clone)]
pub enum PrincipalClaims {
    Access { subject: Uuid, session_id: Uuid },
    Refresh { subject: Uuid, jti: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifiedClaims {
    Access(AccessTokenClaims),
    Refresh(RefreshTokenClaims),
}

impl VerifiedClaims {
    pub fn subject(&self) -> &str {
        match self {
            VerifiedClaims::Access(c) => &c.sub,
            VerifiedClaims::Refresh(c) => &c.sub,
        }
    }

    pub fn exp(&self) -> i64 {
        match self {
            VerifiedClaims::Access(c) => c.exp,
            VerifiedClaims::Refresh(c) => c.exp,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Token pair returned to the client
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Signs, verifies and revokes session tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    revocations: Arc<dyn RevocationStore>,
    clock: SharedClock,
}

impl TokenService {
    /// Builds the service from config. RS256 PEM files win over an HS256
    /// secret when both are configured.
    pub fn new(
        config: &TokenConfig,
        revocations: Arc<dyn RevocationStore>,
        clock: SharedClock,
    ) -> Result<Self, anyhow::Error> {
        let (encoding_key, decoding_key, algorithm) =
            match (&config.private_key_path, &config.public_key_path) {
                (Some(private_path), Some(public_path)) => {
                    let private_pem = fs::read_to_string(private_path).map_err(|e| {
                        anyhow::anyhow!("Failed to read private key from {}: {}", private_path, e)
                    })?;
                    let public_pem = fs::read_to_string(public_path).map_err(|e| {
                        anyhow::anyhow!("Failed to read public key from {}: {}", public_path, e)
                    })?;
                    let encoding = EncodingKey::from_rsa_pem(private_pem.as_bytes())
                        .map_err(|e| anyhow::anyhow!("Failed to parse private key: {}", e))?;
                    let decoding = DecodingKey::from_rsa_pem(public_pem.as_bytes())
                        .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?;
                    (encoding, decoding, Algorithm::RS256)
                }
                _ => {
                    let secret = config
                        .hmac_secret
                        .as_deref()
                        .filter(|s| !s.is_empty())
                        .ok_or_else(|| anyhow::anyhow!("No token signing key configured"))?;
                    (
                        EncodingKey::from_secret(secret.as_bytes()),
                        DecodingKey::from_secret(secret.as_bytes()),
                        Algorithm::HS256,
                    )
                }
            };

        tracing::info!(algorithm = ?algorithm, issuer = %config.issuer, "Token service initialized");

        Ok(Self {
            encoding_key,
            decoding_key,
            algorithm,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_ttl: Duration::minutes(config.access_token_ttl_minutes),
            refresh_ttl: Duration::days(config.refresh_token_ttl_days),
            revocations,
            clock,
        })
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Sign `claims` valid for `ttl` from now.
    pub fn issue(&self, claims: PrincipalClaims, ttl: Duration) -> Result<IssuedToken, IamError> {
        let now = self.clock.now();
        let expires_at = now + ttl;
        let header = Header::new(self.algorithm);

        let token = match claims {
            PrincipalClaims::Access {
                subject,
                session_id,
            } => encode(
                &header,
                &AccessTokenClaims {
                    sub: subject.to_string(),
                    session_id: session_id.to_string(),
                    token_type: ACCESS_TOKEN_TYPE.to_string(),
                    iat: now.timestamp(),
                    exp: expires_at.timestamp(),
                    iss: self.issuer.clone(),
                    aud: self.audience.clone(),
                },
                &self.encoding_key,
            ),
            PrincipalClaims::Refresh { subject, jti } => encode(
                &header,
                &RefreshTokenClaims {
                    sub: subject.to_string(),
                    jti,
                    iat: now.timestamp(),
                    exp: expires_at.timestamp(),
                    iss: self.issuer.clone(),
                    aud: self.audience.clone(),
                },
                &self.encoding_key,
            ),
        }
        .map_err(|e| anyhow::anyhow!("Failed to encode token: {}", e))?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Access + refresh pair for a session. Also returns the refresh jti,
    /// which the session stores as its only accepted refresh token.
    pub fn issue_token_pair(
        &self,
        subject: Uuid,
        session_id: Uuid,
    ) -> Result<(TokenPair, String), IamError> {
        let access = self.issue(
            PrincipalClaims::Access {
                subject,
                session_id,
            },
            self.access_ttl,
        )?;
        let jti = Uuid::new_v4().to_string();
        let refresh = self.issue(
            PrincipalClaims::Refresh {
                subject,
                jti: jti.clone(),
            },
            self.refresh_ttl,
        )?;

        Ok((
            TokenPair {
                access_token: access.token,
                refresh_token: refresh.token,
                token_type: "Bearer".to_string(),
                expires_in: self.access_ttl.num_seconds(),
                access_expires_at: access.expires_at,
                refresh_expires_at: refresh.expires_at,
            },
            jti,
        ))
    }

    /// Signature, issuer, audience and shape; expiry is not checked here.
    fn decode_unexpired(&self, token: &str) -> Result<VerifiedClaims, IamError> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let data = decode::<AnyClaims>(token, &self.decoding_key, &validation).map_err(|e| {
            tracing::debug!(error = %e, "Token rejected");
            IamError::InvalidToken
        })?;
        data.claims.into_verified().ok_or(IamError::InvalidToken)
    }

    fn revocation_key(token: &str, claims: &VerifiedClaims) -> String {
        match claims {
            VerifiedClaims::Refresh(c) => c.jti.clone(),
            VerifiedClaims::Access(_) => token_fingerprint(token),
        }
    }

    /// Verify a token of either kind. Revocation is checked before expiry.
    pub async fn verify(&self, token: &str) -> Result<VerifiedClaims, IamError> {
        let claims = self.decode_unexpired(token)?;

        let key = Self::revocation_key(token, &claims);
        if self.revocations.is_revoked(&key).await? {
            return Err(IamError::TokenRevoked);
        }

        if self.clock.now().timestamp() >= claims.exp() {
            return Err(IamError::TokenExpired);
        }

        Ok(claims)
    }

    pub async fn verify_access(&self, token: &str) -> Result<AccessTokenClaims, IamError> {
        match self.verify(token).await? {
            VerifiedClaims::Access(c) => Ok(c),
            VerifiedClaims::Refresh(_) => Err(IamError::InvalidToken),
        }
    }

    pub async fn verify_refresh(&self, token: &str) -> Result<RefreshTokenClaims, IamError> {
        match self.verify(token).await? {
            VerifiedClaims::Refresh(c) => Ok(c),
            VerifiedClaims::Access(_) => Err(IamError::InvalidToken),
        }
    }

    /// Revoke a token until its own expiry. Revoking an expired token is a
    /// no-op; a token that fails signature checks is `InvalidToken`.
    pub async fn revoke(&self, token: &str) -> Result<(), IamError> {
        let claims = self.decode_unexpired(token)?;
        let key = Self::revocation_key(token, &claims);
        let expires_at = Utc
            .timestamp_opt(claims.exp(), 0)
            .single()
            .ok_or(IamError::InvalidToken)?;
        self.revoke_id(&key, expires_at).await
    }

    /// Revoke by key when the caller no longer holds the raw token.
    pub async fn revoke_id(&self, key: &str, expires_at: DateTime<Utc>) -> Result<(), IamError> {
        if expires_at <= self.clock.now() {
            return Ok(());
        }
        self.revocations.revoke(key, expires_at).await?;
        tracing::debug!("Token revoked");
        Ok(())
    }

    pub async fn purge_expired_revocations(&self) -> Result<usize, IamError> {
        Ok(self.revocations.purge_expired(self.clock.now()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::services::revocation::InMemoryRevocationStore;

    fn service(clock: &ManualClock) -> TokenService {
        let config = TokenConfig {
            hmac_secret: Some("unit-test-secret-unit-test-secret".to_string()),
            ..TokenConfig::default()
        };
        TokenService::new(
            &config,
            Arc::new(InMemoryRevocationStore::default()),
            Arc::new(clock.clone()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn access_token_round_trips_claims() {
        let clock = ManualClock::default();
        let tokens = service(&clock);
        let subject = Uuid::new_v4();
        let session_id = Uuid::new_v4();

        let issued = tokens
            .issue(
                PrincipalClaims::Access {
                    subject,
                    session_id,
                },
                Duration::minutes(15),
            )
            .unwrap();
        let claims = tokens.verify_access(&issued.token).await.unwrap();

        assert_eq!(claims.sub, subject.to_string());
        assert_eq!(claims.session_id, session_id.to_string());
        assert_eq!(claims.token_type, "access");
        assert_eq!(claims.exp, issued.expires_at.timestamp());
    }

    #[tokio::test]
    async fn expiry_follows_the_injected_clock() {
        let clock = ManualClock::default();
        let tokens = service(&clock);
        let (pair, _) = tokens
            .issue_token_pair(Uuid::new_v4(), Uuid::new_v4())
            .unwrap();

        clock.advance(tokens.access_ttl());
        assert!(matches!(
            tokens.verify(&pair.access_token).await,
            Err(IamError::TokenExpired)
        ));
        assert!(tokens.verify(&pair.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn revoked_token_fails_immediately() {
        let clock = ManualClock::default();
        let tokens = service(&clock);
        let (pair, _) = tokens
            .issue_token_pair(Uuid::new_v4(), Uuid::new_v4())
            .unwrap();

        tokens.revoke(&pair.refresh_token).await.unwrap();
        assert!(matches!(
            tokens.verify(&pair.refresh_token).await,
            Err(IamError::TokenRevoked)
        ));
        assert!(tokens.verify(&pair.access_token).await.is_ok());

        tokens.revoke(&pair.access_token).await.unwrap();
        assert!(matches!(
            tokens.verify(&pair.access_token).await,
            Err(IamError::TokenRevoked)
        ));
    }

    #[tokio::test]
    async fn wrong_audience_or_kind_is_invalid() {
        let clock = ManualClock::default();
        let tokens = service(&clock);
        let other = TokenService::new(
            &TokenConfig {
                hmac_secret: Some("unit-test-secret-unit-test-secret".to_string()),
                audience: "someone-else".to_string(),
                ..TokenConfig::default()
            },
            Arc::new(InMemoryRevocationStore::default()),
            Arc::new(clock.clone()),
        )
        .unwrap();

        let (pair, _) = other
            .issue_token_pair(Uuid::new_v4(), Uuid::new_v4())
            .unwrap();
        assert!(matches!(
            tokens.verify(&pair.access_token).await,
            Err(IamError::InvalidToken)
        ));

        let (pair, _) = tokens
            .issue_token_pair(Uuid::new_v4(), Uuid::new_v4())
            .unwrap();
        assert!(matches!(
            tokens.verify_access(&pair.refresh_token).await,
            Err(IamError::InvalidToken)
        ));
        assert!(matches!(
            tokens.verify("not.a.token").await,
            Err(IamError::InvalidToken)
        ));
    }

    #[test]
    fn access_claims_use_wire_names() {
        let claims = AccessTokenClaims {
            sub: "u".into(),
            session_id: "s".into(),
            token_type: "access".into(),
            iat: 1,
            exp: 2,
            iss: "i".into(),
            aud: "a".into(),
        };
        let value = serde_json::to_value(&claims).unwrap();
        assert_eq!(value["sessionId"], "s");
        assert_eq!(value["type"], "access");
    }
}
