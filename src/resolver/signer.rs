/// Resolve response signing
use crate::error::{FederationError, FederationResult};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::Value;

/// JWT `typ` of resolve responses
pub const RESOLVE_RESPONSE_TYP: &str = "resolve-response+jwt";

/// Signs response claims into a compact JWS
pub trait ResponseSigner: Send + Sync {
    fn sign(&self, claims: &Value, typ: &str) -> FederationResult<String>;
}

/// `jsonwebtoken` backed signer
pub struct JwtSigner {
    key: EncodingKey,
    algorithm: Algorithm,
    key_id: Option<String>,
}

impl JwtSigner {
    pub fn new(key: EncodingKey, algorithm: Algorithm, key_id: Option<String>) -> Self {
        Self {
            key,
            algorithm,
            key_id,
        }
    }

    /// HS256 signer over a shared secret
    pub fn hmac(secret: &[u8], key_id: impl Into<String>) -> Self {
        Self::new(
            EncodingKey::from_secret(secret),
            Algorithm::HS256,
            Some(key_id.into()),
        )
    }
}

impl ResponseSigner for JwtSigner {
    fn sign(&self, claims: &Value, typ: &str) -> FederationResult<String> {
        let mut header = Header::new(self.algorithm);
        header.kid = self.key_id.clone();
        header.typ = Some(typ.to_string());

        encode(&header, claims, &self.key)
            .map_err(|e| FederationError::Signing(format!("Failed to sign response: {}", e)))
    }
}
