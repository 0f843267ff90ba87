//! Session JWT issuance and verification — the `Bearer <JWT>` path.

use crate::claims::{Claims, SessionKind};
use ayb_error::AybError;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct SessionPayload {
    sub: Uuid,
    exp: i64,
    iat: i64,
}

pub struct SessionJwt {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl SessionJwt {
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Mint a session token for `user_id`, valid for `ttl_secs`.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the token can't be encoded.
    pub fn issue(&self, user_id: Uuid, ttl_secs: i64) -> Result<String, AybError> {
        let now = chrono::Utc::now().timestamp();
        let payload = SessionPayload {
            sub: user_id,
            iat: now,
            exp: now + ttl_secs,
        };
        encode(&Header::default(), &payload, &self.encoding_key).map_err(AybError::internal)
    }

    /// Verify signature and expiry, producing `Claims{sessionKind: user}`.
    ///
    /// # Errors
    ///
    /// Returns `401 Unauthenticated` if the signature or expiry don't check out.
    pub fn verify(&self, token: &str, request_id: Uuid) -> Result<Claims, AybError> {
        let data = decode::<SessionPayload>(token, &self.decoding_key, &Validation::default())
            .map_err(|_| AybError::Unauthenticated)?;

        Ok(Claims {
            request_id,
            session_kind: SessionKind::User,
            user_id: Some(data.claims.sub),
            ..Claims::anonymous(request_id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_valid_session_token() {
        let jwt = SessionJwt::new(b"test-secret-at-least-this-long");
        let user_id = Uuid::new_v4();
        let token = jwt.issue(user_id, 3600).unwrap();

        let claims = jwt.verify(&token, Uuid::new_v4()).unwrap();
        assert_eq!(claims.user_id, Some(user_id));
        assert_eq!(claims.session_kind, SessionKind::User);
    }

    #[test]
    fn rejects_a_token_signed_with_a_different_secret() {
        let issuer = SessionJwt::new(b"secret-one-is-long-enough");
        let verifier = SessionJwt::new(b"secret-two-is-long-enough");
        let token = issuer.issue(Uuid::new_v4(), 3600).unwrap();
        assert!(matches!(verifier.verify(&token, Uuid::new_v4()), Err(AybError::Unauthenticated)));
    }

    #[test]
    fn rejects_an_expired_token() {
        let jwt = SessionJwt::new(b"test-secret-at-least-this-long");
        let token = jwt.issue(Uuid::new_v4(), -1).unwrap();
        assert!(matches!(jwt.verify(&token, Uuid::new_v4()), Err(AybError::Unauthenticated)));
    }
}
