use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and checks bearer credentials. Holds no per-user state.
#[derive(Clone)]
pub struct Verifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl Verifier {
    pub fn new(secret: &str, ttl_days: i64) -> Verifier {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);

        Verifier {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl: Duration::days(ttl_days),
        }
    }

    pub fn issue(&self, username: &str, email: &str) -> CoreResult<String> {
        self.issue_at(username, email, OffsetDateTime::now_utc())
    }

    pub fn issue_at(&self, username: &str, email: &str, issued_at: OffsetDateTime) -> CoreResult<String> {
        let claims = Claims {
            username: username.to_owned(),
            email: email.to_owned(),
            iat: issued_at.unix_timestamp(),
            exp: (issued_at + self.ttl).unix_timestamp(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| CoreError::Unexpected(err.into()))
    }

    /// Fails with `InvalidCredential` on expiry, a bad signature or garbage.
    pub fn verify(&self, token: &str) -> CoreResult<Claims> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation).map_err(|err| {
            tracing::debug!(error = %err, "Credential rejected");
            CoreError::InvalidCredential
        })?;

        if data.claims.username.is_empty() {
            return Err(CoreError::InvalidCredential);
        }
        Ok(data.claims)
    }
}
