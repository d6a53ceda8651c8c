//! JWT decoding + signature verification.
//!
//! Signature checking is separated from the deterministic claim validation in
//! [`crate::claims`] so the latter stays trivially testable.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};

use crate::claims::{JwtClaims, TokenValidationError, validate_claims};

/// Token verification boundary consumed by HTTP middleware.
pub trait JwtValidator: Send + Sync {
    /// Verify the token signature, decode the claims, and validate the time
    /// window against `now`.
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError>;
}

/// HS256 (shared-secret) validator.
pub struct Hs256JwtValidator {
    key: DecodingKey,
}

impl Hs256JwtValidator {
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            key: DecodingKey::from_secret(&secret),
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is validated deterministically below from our own claims;
        // the registered `exp` claim is not part of the token shape.
        validation.validate_exp = false;
        validation.required_spec_claims = Default::default();

        let data = decode::<JwtClaims>(token, &self.key, &validation)
            .map_err(|_| TokenValidationError::Malformed)?;

        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use clinicore_core::OrganizationId;
    use jsonwebtoken::{EncodingKey, Header, encode};

    use crate::{PrincipalId, Role};

    fn mint(secret: &str, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> String {
        let claims = JwtClaims {
            sub: PrincipalId::new(),
            organization_id: OrganizationId::new(),
            clinic_id: None,
            roles: vec![Role::new("admin")],
            issued_at,
            expires_at,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("failed to encode jwt")
    }

    #[test]
    fn round_trips_a_valid_token() {
        let now = Utc::now();
        let token = mint("s3cret", now - Duration::minutes(1), now + Duration::minutes(10));
        let validator = Hs256JwtValidator::new(b"s3cret".to_vec());
        let claims = validator.validate(&token, now).unwrap();
        assert!(claims.roles.iter().any(|r| r.as_str() == "admin"));
    }

    #[test]
    fn wrong_secret_is_malformed() {
        let now = Utc::now();
        let token = mint("s3cret", now - Duration::minutes(1), now + Duration::minutes(10));
        let validator = Hs256JwtValidator::new(b"other".to_vec());
        assert_eq!(
            validator.validate(&token, now),
            Err(TokenValidationError::Malformed)
        );
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now();
        let token = mint("s3cret", now - Duration::minutes(20), now - Duration::minutes(10));
        let validator = Hs256JwtValidator::new(b"s3cret".to_vec());
        assert_eq!(
            validator.validate(&token, now),
            Err(TokenValidationError::Expired)
        );
    }
}
