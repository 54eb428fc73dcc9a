//! Bearer token decoding and signature verification.

use crate::config::AppConfig;
use crate::error::{StepError, StepResult};
use crate::model::TOKEN_CONTEXT;
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use std::str::FromStr;

/// Key under which the raw token is kept inside a token record.
pub const RAW_TOKEN_KEY: &str = "_token";

/// Seconds of clock skew tolerated on `exp`.
pub const EXP_LEEWAY: i64 = 60;

/// Decode the claims segment of `token` without checking the signature.
pub fn decode_claims(token: &str) -> StepResult<Map<String, Value>> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| StepError::invalid(format!("not a JWT: {token:?}")))?;

    let trimmed = payload.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD.decode(payload))
        .map_err(|e| StepError::invalid(format!("JWT payload is not base64: {e}")))?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(claims)) => Ok(claims),
        Ok(other) => Err(StepError::invalid(format!(
            "JWT payload is not an object: {other}"
        ))),
        Err(e) => Err(StepError::invalid(format!("JWT payload is not JSON: {e}"))),
    }
}

/// Build the record stored for a parsed token: decoded claims plus the
/// token context and the raw token.
pub fn token_record(token: &str) -> StepResult<Value> {
    let mut record = Map::new();
    record.insert("$context".into(), Value::String(TOKEN_CONTEXT.into()));
    record.insert(RAW_TOKEN_KEY.into(), Value::String(token.into()));
    for (claim, value) in decode_claims(token)? {
        record.insert(claim, value);
    }
    Ok(Value::Object(record))
}

/// Raw token of a stored record, if `value` is one.
pub fn raw_token(record: &Value) -> Option<&str> {
    if record.get("$context").and_then(Value::as_str) != Some(TOKEN_CONTEXT) {
        return None;
    }
    record.get(RAW_TOKEN_KEY).and_then(Value::as_str)
}

/// Checks a token's signature and returns its verified claims.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> StepResult<Map<String, Value>>;
}

/// Verifier backed by the `jsonwebtoken` crate.
#[derive(Clone)]
pub struct JsonWebTokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JsonWebTokenVerifier {
    /// Build from `public_key` and `jwt_algorithm` of the app config.
    pub fn from_config(config: &AppConfig) -> StepResult<Self> {
        let algorithm = Algorithm::from_str(config.jwt_algorithm()).map_err(|_| {
            StepError::invalid(format!(
                "unsupported JWT algorithm: {}",
                config.jwt_algorithm()
            ))
        })?;
        let key_text = config
            .public_key()
            .ok_or_else(|| StepError::Verification("public_key is not configured".into()))?;

        let key = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                DecodingKey::from_secret(key_text.as_bytes())
            }
            Algorithm::ES256 | Algorithm::ES384 => {
                DecodingKey::from_ec_pem(key_text.as_bytes())
                    .map_err(|e| StepError::Verification(e.to_string()))?
            }
            Algorithm::EdDSA => DecodingKey::from_ed_pem(key_text.as_bytes())
                .map_err(|e| StepError::Verification(e.to_string()))?,
            _ => DecodingKey::from_rsa_pem(key_text.as_bytes())
                .map_err(|e| StepError::Verification(e.to_string()))?,
        };

        // Only the signature is checked here. `exp` is optional and is
        // compared against the session clock by `check_expiry`.
        let mut validation = Validation::new(algorithm);
        validation.validate_aud = false;
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        Ok(Self { key, validation })
    }
}

impl std::fmt::Debug for JsonWebTokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonWebTokenVerifier")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenVerifier for JsonWebTokenVerifier {
    async fn verify(&self, token: &str) -> StepResult<Map<String, Value>> {
        jsonwebtoken::decode::<Map<String, Value>>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| StepError::Verification(e.to_string()))
    }
}

/// Fail when verified `claims` carry an `exp` that lies before `now`.
///
/// Tokens without `exp` never expire.
pub fn check_expiry(claims: &Map<String, Value>, now: DateTime<Utc>) -> StepResult {
    let Some(exp) = claims.get("exp") else {
        return Ok(());
    };
    let exp = exp
        .as_f64()
        .ok_or_else(|| StepError::Verification(format!("exp is not a number: {exp}")))?;
    if (exp as i64) + EXP_LEEWAY < now.timestamp() {
        return Err(StepError::Verification(format!(
            "token expired at {}",
            DateTime::from_timestamp(exp as i64, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| exp.to_string())
        )));
    }
    Ok(())
}

/// Verifier used when no key is configured; every check fails.
#[derive(Debug, Clone)]
pub struct MissingKeyVerifier(pub String);

#[async_trait]
impl TokenVerifier for MissingKeyVerifier {
    async fn verify(&self, _token: &str) -> StepResult<Map<String, Value>> {
        Err(StepError::Verification(self.0.clone()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    pub(crate) const SECRET: &str = "top-secret";

    pub(crate) fn mint(claims: Value) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    pub(crate) fn hs256_config() -> AppConfig {
        AppConfig::new()
            .with("public_key", SECRET)
            .with("jwt_algorithm", "HS256")
    }

    fn far_future() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[test]
    fn test_decode_claims() {
        let token = mint(json!({"sub": "user/5", "exp": far_future()}));
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.get("sub"), Some(&json!("user/5")));
    }

    #[test]
    fn test_decode_rejects_non_token() {
        assert!(decode_claims("abc").is_err());
        assert!(decode_claims("a.!!!.c").is_err());
    }

    #[test]
    fn test_token_record_shape() {
        let token = mint(json!({"sub": "user/5", "admin": true, "exp": far_future()}));
        let record = token_record(&token).unwrap();
        assert_eq!(record["$context"], json!(TOKEN_CONTEXT));
        assert_eq!(record["admin"], json!(true));
        assert_eq!(raw_token(&record), Some(token.as_str()));
        assert_eq!(raw_token(&json!({"_token": "x"})), None);
    }

    #[tokio::test]
    async fn test_verify_good_signature() {
        let token = mint(json!({"sub": "user/5", "exp": far_future()}));
        let verifier = JsonWebTokenVerifier::from_config(&hs256_config()).unwrap();
        let claims = verifier.verify(&token).await.unwrap();
        assert_eq!(claims["sub"], json!("user/5"));
    }

    #[tokio::test]
    async fn test_verify_bad_signature() {
        let token = encode(
            &Header::new(Algorithm::HS256),
            &json!({"sub": "x", "exp": far_future()}),
            &EncodingKey::from_secret(b"other"),
        )
        .unwrap();
        let verifier = JsonWebTokenVerifier::from_config(&hs256_config()).unwrap();
        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, StepError::Verification(_)));
    }

    #[tokio::test]
    async fn test_verify_token_without_exp() {
        let token = mint(json!({"sub": "user/5", "iat": chrono::Utc::now().timestamp()}));
        let verifier = JsonWebTokenVerifier::from_config(&hs256_config()).unwrap();
        let claims = verifier.verify(&token).await.unwrap();
        assert_eq!(claims["sub"], json!("user/5"));
        assert!(check_expiry(&claims, chrono::Utc::now()).is_ok());
    }

    #[test]
    fn test_check_expiry_against_given_time() {
        let now = chrono::Utc::now();
        let claims = json!({"exp": now.timestamp() + 7 * 86_400});
        let claims = claims.as_object().unwrap();
        assert!(check_expiry(claims, now).is_ok());
        assert!(check_expiry(claims, now + chrono::Duration::days(7)).is_ok());
        let err = check_expiry(claims, now + chrono::Duration::days(30)).unwrap_err();
        assert!(matches!(err, StepError::Verification(_)));
        assert!(check_expiry(json!({"exp": "soon"}).as_object().unwrap(), now).is_err());
    }

    #[test]
    fn test_missing_key_is_error() {
        let config = AppConfig::new().with("jwt_algorithm", "HS256");
        assert!(JsonWebTokenVerifier::from_config(&config).is_err());
    }
}
