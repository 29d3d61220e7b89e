/// Compact JWS helpers over `jsonwebtoken`
use crate::error::{FederationError, FederationResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{
    decode, decode_header,
    jwk::{Jwk, JwkSet},
    Algorithm, DecodingKey, Validation,
};

/// Decode the payload segment of a compact JWS without verification
pub fn decode_payload(token: &str) -> FederationResult<Vec<u8>> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(FederationError::InvalidStatement(
            "Token is not a compact JWS".to_string(),
        ));
    };

    URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| FederationError::InvalidStatement(format!("Invalid payload encoding: {}", e)))
}

/// Verify a compact JWS against a key set
///
/// The `kid` header selects the key when present; otherwise every key in
/// the set is tried. A key declaring an `alg` only verifies tokens whose
/// header names that algorithm. Time claims are not checked here.
pub fn verify(token: &str, keys: &JwkSet) -> FederationResult<()> {
    let header = decode_header(token)
        .map_err(|e| FederationError::InvalidStatement(format!("Invalid JWS header: {}", e)))?;

    let candidates: Vec<&Jwk> = match &header.kid {
        Some(kid) => keys.find(kid).into_iter().collect(),
        None => keys.keys.iter().collect(),
    };

    if candidates.is_empty() {
        return Err(FederationError::InvalidStatement(format!(
            "No key matches kid {:?}",
            header.kid
        )));
    }

    let mut validation = Validation::new(header.alg);
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let mut last_error = String::new();
    for jwk in candidates {
        if let Some(key_alg) = &jwk.common.key_algorithm {
            // KeyAlgorithm and Algorithm share their JOSE names
            let declared = format!("{:?}", key_alg).parse::<Algorithm>().ok();
            if declared != Some(header.alg) {
                last_error = format!(
                    "Key is for {:?}, token is signed with {:?}",
                    key_alg, header.alg
                );
                continue;
            }
        }

        let key = match DecodingKey::from_jwk(jwk) {
            Ok(key) => key,
            Err(e) => {
                last_error = format!("Unusable key: {}", e);
                continue;
            }
        };

        match decode::<serde_json::Value>(token, &key, &validation) {
            Ok(_) => return Ok(()),
            Err(e) => last_error = e.to_string(),
        }
    }

    Err(FederationError::InvalidStatement(format!(
        "Signature verification failed: {}",
        last_error
    )))
}
