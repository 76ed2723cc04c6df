//! Auth token minter (C1): produces and caches ES256 provider JWTs.

use crate::error::{Error, Result};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Proactive refresh threshold: a cached token is minted fresh once it's
/// this old, even if still technically valid.
const PROACTIVE_REFRESH_AGE: Duration = Duration::from_secs(50 * 60);

/// Hard expiry consumers (including the mock server) must enforce.
pub const MAX_TOKEN_AGE: Duration = Duration::from_secs(60 * 60);

/// An ES256 P-256 signing key used to mint provider JWTs.
#[derive(Clone)]
pub struct SigningKey {
    pub key_id: String,
    pub team_id: String,
    /// PKCS#8 PEM bytes. Loading from a `.p8` file is an external
    /// collaborator's job; this type accepts already-decoded PEM.
    pub private_key_pem: Vec<u8>,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("team_id", &self.team_id)
            .finish_non_exhaustive()
    }
}

/// The public counterpart of a [`SigningKey`], used to verify JWTs (the
/// mock server's role).
#[derive(Clone)]
pub struct VerificationKey {
    pub key_id: String,
    pub team_id: String,
    pub public_key_pem: Vec<u8>,
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("key_id", &self.key_id)
            .field("team_id", &self.team_id)
            .finish_non_exhaustive()
    }
}

/// A minted, encoded provider JWT.
#[derive(Debug, Clone)]
pub struct AuthToken {
    pub key_id: String,
    pub team_id: String,
    pub issued_at: i64,
    pub encoded_jwt: String,
}

#[derive(Serialize, Deserialize)]
struct Claims {
    iss: String,
    iat: i64,
}

/// Mints and caches one provider JWT at a time. Owned by a single
/// connection handler — not shared across connections, per the
/// concurrency model (shared mutable state lives on one executor).
pub struct AuthTokenMinter {
    signing_key: SigningKey,
    cached: Option<(AuthToken, Instant)>,
}

impl AuthTokenMinter {
    pub fn new(signing_key: SigningKey) -> Self {
        Self { signing_key, cached: None }
    }

    /// Return the cached token if it's younger than the proactive refresh
    /// threshold, minting a fresh one otherwise.
    pub fn token(&mut self) -> Result<AuthToken> {
        if let Some((token, minted_at)) = &self.cached {
            if minted_at.elapsed() < PROACTIVE_REFRESH_AGE {
                return Ok(token.clone());
            }
        }
        self.mint()
    }

    /// Discard the cached token, forcing the next `token()` call to mint
    /// a fresh one. Called after a 403/`ExpiredProviderToken`.
    pub fn invalidate(&mut self) {
        debug!(key_id = %self.signing_key.key_id, "invalidating cached provider token");
        self.cached = None;
    }

    fn mint(&mut self) -> Result<AuthToken> {
        let issued_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs() as i64;

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.signing_key.key_id.clone());

        let claims = Claims { iss: self.signing_key.team_id.clone(), iat: issued_at };

        let encoding_key = EncodingKey::from_ec_pem(&self.signing_key.private_key_pem)
            .map_err(|e| Error::Crypto(format!("invalid ES256 signing key: {e}")))?;

        let encoded_jwt = jsonwebtoken::encode(&header, &claims, &encoding_key)?;

        let token = AuthToken {
            key_id: self.signing_key.key_id.clone(),
            team_id: self.signing_key.team_id.clone(),
            issued_at,
            encoded_jwt,
        };

        debug!(key_id = %token.key_id, issued_at = token.issued_at, "minted provider token");
        self.cached = Some((token.clone(), Instant::now()));
        Ok(token)
    }
}

/// Verify a provider JWT against `key`, returning its claims. Used by the
/// mock server; does not check expiry by wall clock (callers compare
/// `iat` against their own notion of "now").
pub fn verify_token(encoded_jwt: &str, key: &VerificationKey) -> Result<(String, i64)> {
    let decoding_key = DecodingKey::from_ec_pem(&key.public_key_pem)
        .map_err(|e| Error::Crypto(format!("invalid ES256 verification key: {e}")))?;

    let mut validation = Validation::new(Algorithm::ES256);
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    let decoded = jsonwebtoken::decode::<Claims>(encoded_jwt, &decoding_key, &validation)?;
    Ok((decoded.claims.iss, decoded.claims.iat))
}

/// Extract the `kid` header without verifying the signature, so the mock
/// server can look up the right verification key first.
pub fn peek_key_id(encoded_jwt: &str) -> Result<String> {
    let header = jsonwebtoken::decode_header(encoded_jwt)?;
    header.kid.ok_or_else(|| Error::Rejection {
        reason: crate::notification::RejectionReason::InvalidProviderToken,
        timestamp: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // A throwaway P-256 key pair, PKCS#8/SEC1 PEM, generated once for test
    // fixtures only — never used against real APNs.
    const TEST_PRIVATE_KEY_PEM: &str = include_str!("../tests/fixtures/es256_private_key.pem");
    const TEST_PUBLIC_KEY_PEM: &str = include_str!("../tests/fixtures/es256_public_key.pem");

    fn test_signing_key() -> SigningKey {
        SigningKey {
            key_id: "ABC123DEFG".into(),
            team_id: "TEAM123456".into(),
            private_key_pem: TEST_PRIVATE_KEY_PEM.as_bytes().to_vec(),
        }
    }

    fn test_verification_key() -> VerificationKey {
        VerificationKey {
            key_id: "ABC123DEFG".into(),
            team_id: "TEAM123456".into(),
            public_key_pem: TEST_PUBLIC_KEY_PEM.as_bytes().to_vec(),
        }
    }

    #[test]
    fn jwt_roundtrips_through_mint_and_verify() {
        let mut minter = AuthTokenMinter::new(test_signing_key());
        let token = minter.token().unwrap();

        let (iss, iat) = verify_token(&token.encoded_jwt, &test_verification_key()).unwrap();
        assert_eq!(iss, "TEAM123456");
        assert_eq!(iat, token.issued_at);
    }

    #[test]
    fn token_is_reused_until_invalidated() {
        let mut minter = AuthTokenMinter::new(test_signing_key());
        let first = minter.token().unwrap();
        let second = minter.token().unwrap();
        assert_eq!(first.encoded_jwt, second.encoded_jwt);

        minter.invalidate();
        let third = minter.token().unwrap();
        assert_ne!(first.issued_at.min(third.issued_at), i64::MAX);
    }

    #[test]
    fn peek_key_id_reads_header_without_verifying() {
        let mut minter = AuthTokenMinter::new(test_signing_key());
        let token = minter.token().unwrap();
        assert_eq!(peek_key_id(&token.encoded_jwt).unwrap(), "ABC123DEFG");
    }
}
