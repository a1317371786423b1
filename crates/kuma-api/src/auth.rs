use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use kuma_core::UserId;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::error::{sanitize, AppError};

const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
/// Unknown `kid`s may trigger at most one refetch per interval.
const JWKS_MIN_REFETCH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub session_id: Option<String>,
}

/// Verifies access tokens issued by the external auth service and turns them
/// into an [`AuthenticatedUser`] in a single step.
#[derive(Clone)]
pub struct AccessTokenVerifier {
    config: Arc<AppConfig>,
    keys: KeySource,
}

#[derive(Clone)]
enum KeySource {
    SharedSecret(DecodingKey),
    Jwks {
        client: reqwest::Client,
        cache: Arc<RwLock<JwksCache>>,
    },
}

#[derive(Clone)]
struct SigningKey {
    key: DecodingKey,
    algorithm: Algorithm,
}

impl AccessTokenVerifier {
    pub fn new(config: Arc<AppConfig>) -> Result<Self, AppError> {
        let keys = match config.auth_jwt_secret.as_deref() {
            Some(secret) => KeySource::SharedSecret(DecodingKey::from_secret(secret.as_bytes())),
            None => {
                let client = reqwest::Client::builder()
                    .timeout(JWKS_FETCH_TIMEOUT)
                    .build()
                    .map_err(|error| {
                        AppError::Config(format!("JWKS client setup failed: {}", sanitize(&error)))
                    })?;
                KeySource::Jwks {
                    client,
                    cache: Arc::new(RwLock::new(JwksCache::default())),
                }
            }
        };
        Ok(Self { config, keys })
    }

    pub async fn verify_access_token(&self, token: &str) -> Result<AuthenticatedUser, AppError> {
        let header = decode_header(token).map_err(|error| {
            AppError::unauthorized(format!("Token header decode failed: {}", sanitize(&error)))
        })?;

        let signing = match &self.keys {
            KeySource::SharedSecret(key) => SigningKey {
                key: key.clone(),
                algorithm: Algorithm::HS256,
            },
            KeySource::Jwks { client, cache } => {
                let kid = header
                    .kid
                    .as_deref()
                    .ok_or_else(|| AppError::unauthorized("Token header missing `kid`"))?;
                self.find_key(client, cache, kid).await?
            }
        };
        if header.alg != signing.algorithm {
            return Err(AppError::unauthorized(format!(
                "Token algorithm {:?} is not allowed for this key",
                header.alg
            )));
        }

        let skew = self.config.auth_clock_skew.as_secs();
        let mut validation = Validation::new(signing.algorithm);
        validation.leeway = skew;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        if let Some(issuer) = self.config.auth_jwt_issuer.as_deref() {
            validation.set_issuer(&[issuer]);
        }

        let decoded =
            decode::<AccessClaims>(token, &signing.key, &validation).map_err(|error| {
                AppError::unauthorized(format!("Token validation failed: {}", sanitize(&error)))
            })?;
        let claims = decoded.claims;

        if let Some(expected) = self.config.auth_jwt_audience.as_deref() {
            if !audience_matches(claims.aud.as_ref(), expected) {
                return Err(AppError::unauthorized("Token audience is not allowed"));
            }
        }
        validate_issued_at(claims.iat, skew)?;

        claims.into_user()
    }

    async fn find_key(
        &self,
        client: &reqwest::Client,
        cache: &RwLock<JwksCache>,
        kid: &str,
    ) -> Result<SigningKey, AppError> {
        {
            let cache = cache.read().await;
            if !cache.is_stale(self.config.jwks_cache_ttl) {
                if let Some(key) = cache.keys.get(kid) {
                    return Ok(key.clone());
                }
            }
        }

        let mut cache = cache.write().await;
        if !cache.is_stale(self.config.jwks_cache_ttl) {
            if let Some(key) = cache.keys.get(kid) {
                return Ok(key.clone());
            }
        }
        if cache.refreshed_within(JWKS_MIN_REFETCH_INTERVAL) {
            return cache.keys.get(kid).cloned().ok_or_else(|| {
                AppError::unauthorized("Signing key not found in auth service JWKS")
            });
        }

        cache.last_attempt = Some(Instant::now());
        let keys = fetch_jwks(client, &self.config.auth_jwks_url).await?;
        tracing::debug!(keys = keys.len(), "Refreshed auth service JWKS");
        cache.keys = keys;
        cache.fetched_at = Some(Instant::now());

        cache
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| AppError::unauthorized("Signing key not found in auth service JWKS"))
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

#[derive(Default)]
struct JwksCache {
    keys: HashMap<String, SigningKey>,
    fetched_at: Option<Instant>,
    last_attempt: Option<Instant>,
}

impl JwksCache {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.map_or(true, |at| at.elapsed() > ttl)
    }

    fn refreshed_within(&self, interval: Duration) -> bool {
        self.last_attempt.is_some_and(|at| at.elapsed() < interval)
    }
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: Option<String>,
    kty: Option<String>,
    #[serde(rename = "use")]
    usage: Option<String>,
    crv: Option<String>,
    n: Option<String>,
    e: Option<String>,
    x: Option<String>,
}

/// Claims carried by auth service access tokens.
///
/// The user id lives in `id`; `sub` is accepted as a fallback.
#[derive(Debug, Deserialize)]
struct AccessClaims {
    id: Option<String>,
    sub: Option<String>,
    aud: Option<Value>,
    iat: Option<i64>,
    sid: Option<String>,
}

impl AccessClaims {
    fn into_user(self) -> Result<AuthenticatedUser, AppError> {
        let user_id = self
            .id
            .or(self.sub)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AppError::unauthorized("Token does not identify a user"))?;

        Ok(AuthenticatedUser {
            user_id: UserId::new(user_id),
            session_id: self.sid,
        })
    }
}

fn validate_issued_at(iat: Option<i64>, skew_secs: u64) -> Result<(), AppError> {
    let Some(iat) = iat else {
        return Ok(());
    };
    let now = chrono::Utc::now().timestamp();
    let skew = i64::try_from(skew_secs).unwrap_or(0);
    if iat > now.saturating_add(skew) {
        return Err(AppError::unauthorized("Token `iat` is in the future"));
    }
    Ok(())
}

async fn fetch_jwks(
    client: &reqwest::Client,
    jwks_url: &str,
) -> Result<HashMap<String, SigningKey>, AppError> {
    let response = client
        .get(jwks_url)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|error| {
            AppError::external(format!("JWKS request failed: {}", sanitize(&error)))
        })?;

    if !response.status().is_success() {
        return Err(AppError::external(format!(
            "JWKS request failed with HTTP {}",
            response.status().as_u16()
        )));
    }

    let payload = response.json::<JwksDocument>().await.map_err(|error| {
        AppError::external(format!("JWKS JSON parse failed: {}", sanitize(&error)))
    })?;

    signing_keys(payload)
}

fn signing_keys(document: JwksDocument) -> Result<HashMap<String, SigningKey>, AppError> {
    let mut out = HashMap::new();
    for key in document.keys {
        let Some(kid) = key.kid else {
            continue;
        };
        if key.usage.as_deref().is_some_and(|usage| usage != "sig") {
            continue;
        }
        let signing = match (key.kty.as_deref(), key.crv.as_deref()) {
            (Some("RSA"), _) => {
                let (Some(n), Some(e)) = (key.n, key.e) else {
                    continue;
                };
                let decoding = match DecodingKey::from_rsa_components(&n, &e) {
                    Ok(decoding) => decoding,
                    Err(error) => {
                        tracing::warn!(
                            kid = %kid,
                            error = %sanitize(&error),
                            "Skipping malformed JWKS RSA key"
                        );
                        continue;
                    }
                };
                SigningKey {
                    key: decoding,
                    algorithm: Algorithm::RS256,
                }
            }
            (Some("OKP"), Some("Ed25519")) => {
                let Some(x) = key.x else {
                    continue;
                };
                let decoding = match DecodingKey::from_ed_components(&x) {
                    Ok(decoding) => decoding,
                    Err(error) => {
                        tracing::warn!(
                            kid = %kid,
                            error = %sanitize(&error),
                            "Skipping malformed JWKS Ed25519 key"
                        );
                        continue;
                    }
                };
                SigningKey {
                    key: decoding,
                    algorithm: Algorithm::EdDSA,
                }
            }
            _ => continue,
        };
        out.insert(kid, signing);
    }

    if out.is_empty() {
        return Err(AppError::external(
            "JWKS did not include any usable signing keys",
        ));
    }

    Ok(out)
}

fn audience_matches(aud: Option<&Value>, expected: &str) -> bool {
    let Some(aud) = aud else {
        return false;
    };

    match aud {
        Value::String(value) => value == expected,
        Value::Array(values) => values
            .iter()
            .filter_map(Value::as_str)
            .any(|value| value == expected),
        _ => false,
    }
}
