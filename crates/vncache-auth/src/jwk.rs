use crate::error::AuthError;
use base64::Engine;
use p256::ecdsa::{SigningKey, VerifyingKey};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

/// JSON Web Key, public or private, RSA or EC (P-256).
///
/// This is a minimal re-rendition of RFC 7517 covering only the fields the
/// auth handshake needs: enough to materialize an `rsa`/`p256` key object
/// for signing or verification. It deliberately does not model JWK Sets or
/// the full parameter space (symmetric keys, other curves).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

fn b64url_decode(field: &'static str, value: Option<&str>) -> Result<Vec<u8>, AuthError> {
    let value = value.ok_or(AuthError::MalformedJwk(field))?;
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|_| AuthError::MalformedJwk(field))
}

/// Key material materialized from a `Jwk`, ready to sign or verify a
/// message digest.
pub enum KeyMaterial {
    RsaPrivate(Box<RsaPrivateKey>),
    RsaPublic(Box<RsaPublicKey>),
    EcPrivate(Box<SigningKey>),
    EcPublic(Box<VerifyingKey>),
}

impl Jwk {
    pub fn is_private(&self) -> bool {
        self.d.is_some()
    }

    pub fn load(&self) -> Result<KeyMaterial, AuthError> {
        match self.kty.as_str() {
            "RSA" => self.load_rsa(),
            "EC" => self.load_ec(),
            other => Err(AuthError::UnsupportedKeyType(other.to_owned())),
        }
    }

    fn load_rsa(&self) -> Result<KeyMaterial, AuthError> {
        let n = BigUint::from_bytes_be(&b64url_decode("n", self.n.as_deref())?);
        let e = BigUint::from_bytes_be(&b64url_decode("e", self.e.as_deref())?);
        if let Some(d_field) = self.d.as_deref() {
            let d = BigUint::from_bytes_be(&b64url_decode("d", Some(d_field))?);
            let key = RsaPrivateKey::from_components(n, e, d, Vec::new())
                .map_err(AuthError::Rsa)?;
            Ok(KeyMaterial::RsaPrivate(Box::new(key)))
        } else {
            let key = RsaPublicKey::new(n, e).map_err(AuthError::Rsa)?;
            Ok(KeyMaterial::RsaPublic(Box::new(key)))
        }
    }

    fn load_ec(&self) -> Result<KeyMaterial, AuthError> {
        if let Some(d_field) = self.d.as_deref() {
            let d = b64url_decode("d", Some(d_field))?;
            let key = SigningKey::from_slice(&d).map_err(AuthError::Ecdsa)?;
            Ok(KeyMaterial::EcPrivate(Box::new(key)))
        } else {
            let x = b64url_decode("x", self.x.as_deref())?;
            let y = b64url_decode("y", self.y.as_deref())?;
            let mut uncompressed = Vec::with_capacity(1 + x.len() + y.len());
            uncompressed.push(0x04);
            uncompressed.extend_from_slice(&x);
            uncompressed.extend_from_slice(&y);
            let key = VerifyingKey::from_sec1_bytes(&uncompressed).map_err(AuthError::Ecdsa)?;
            Ok(KeyMaterial::EcPublic(Box::new(key)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_key_type_is_rejected() {
        let jwk = Jwk {
            kty: "oct".to_owned(),
            kid: None,
            crv: None,
            n: None,
            e: None,
            d: None,
            x: None,
            y: None,
        };
        assert!(matches!(jwk.load(), Err(AuthError::UnsupportedKeyType(_))));
    }

    #[test]
    fn rsa_jwk_missing_modulus_is_rejected() {
        let jwk = Jwk {
            kty: "RSA".to_owned(),
            kid: None,
            crv: None,
            n: None,
            e: Some("AQAB".to_owned()),
            d: None,
            x: None,
            y: None,
        };
        assert!(matches!(jwk.load(), Err(AuthError::MalformedJwk("n"))));
    }

    #[test]
    fn is_private_detects_presence_of_d() {
        let public = Jwk {
            kty: "EC".to_owned(),
            kid: None,
            crv: Some("P-256".to_owned()),
            n: None,
            e: None,
            d: None,
            x: Some("x".to_owned()),
            y: Some("y".to_owned()),
        };
        assert!(!public.is_private());
    }
}
