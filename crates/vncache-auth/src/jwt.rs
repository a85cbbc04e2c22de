use crate::error::AuthError;
use crate::jwk::{Jwk, KeyMaterial};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use p256::pkcs8::EncodePrivateKey;
use rsa::pkcs1::EncodeRsaPrivateKey;
use serde::{de::DeserializeOwned, Serialize};

fn algorithm_for(material: &KeyMaterial) -> Algorithm {
    match material {
        KeyMaterial::RsaPrivate(_) | KeyMaterial::RsaPublic(_) => Algorithm::RS256,
        KeyMaterial::EcPrivate(_) | KeyMaterial::EcPublic(_) => Algorithm::ES256,
    }
}

fn encoding_key(material: &KeyMaterial) -> Result<EncodingKey, AuthError> {
    match material {
        KeyMaterial::RsaPrivate(key) => {
            let der = key.to_pkcs1_der().map_err(|_| AuthError::KeyNotLoaded)?;
            Ok(EncodingKey::from_rsa_der(der.as_bytes()))
        }
        KeyMaterial::EcPrivate(key) => {
            let secret: p256::SecretKey = key.as_nonzero_scalar().clone().into();
            let der = secret.to_pkcs8_der().map_err(|_| AuthError::KeyNotLoaded)?;
            Ok(EncodingKey::from_ec_der(der.as_bytes()))
        }
        KeyMaterial::RsaPublic(_) | KeyMaterial::EcPublic(_) => Err(AuthError::KeyNotLoaded),
    }
}

fn decoding_key(jwk: &Jwk) -> Result<DecodingKey, AuthError> {
    match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk.n.as_deref().ok_or(AuthError::MalformedJwk("n"))?;
            let e = jwk.e.as_deref().ok_or(AuthError::MalformedJwk("e"))?;
            DecodingKey::from_rsa_components(n, e).map_err(AuthError::Jwt)
        }
        "EC" => {
            let x = jwk.x.as_deref().ok_or(AuthError::MalformedJwk("x"))?;
            let y = jwk.y.as_deref().ok_or(AuthError::MalformedJwk("y"))?;
            DecodingKey::from_ec_components(x, y).map_err(AuthError::Jwt)
        }
        other => Err(AuthError::UnsupportedKeyType(other.to_owned())),
    }
}

/// Sign `claims` into a compact JWT using `signing_jwk`'s private key
/// material. The algorithm (`RS256` or `ES256`) is derived from the key
/// type, matching the JWK's own `kty`.
pub fn sign_jwt<T: Serialize>(signing_jwk: &Jwk, claims: &T) -> Result<String, AuthError> {
    let material = signing_jwk.load()?;
    let alg = algorithm_for(&material);
    let key = encoding_key(&material)?;
    let mut header = Header::new(alg);
    header.kid = signing_jwk.kid.clone();
    jsonwebtoken::encode(&header, claims, &key).map_err(AuthError::Jwt)
}

/// Verify a compact JWT against `verifying_jwk`'s public key material and
/// decode its claims.
pub fn verify_jwt<T: DeserializeOwned>(verifying_jwk: &Jwk, token: &str) -> Result<T, AuthError> {
    let key = decoding_key(verifying_jwk)?;
    let alg = match verifying_jwk.kty.as_str() {
        "RSA" => Algorithm::RS256,
        "EC" => Algorithm::ES256,
        other => return Err(AuthError::UnsupportedKeyType(other.to_owned())),
    };
    let mut validation = Validation::new(alg);
    validation.validate_exp = true;
    let data = jsonwebtoken::decode::<T>(token, &key, &validation).map_err(AuthError::Jwt)?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Claims {
        sub: String,
        exp: usize,
    }

    fn rsa_jwk_pair() -> (Jwk, Jwk) {
        use base64::Engine;
        use rand::rngs::OsRng;
        let private = rsa::RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let public = private.to_public_key();
        let enc = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let n = enc.encode(public.n().to_bytes_be());
        let e = enc.encode(public.e().to_bytes_be());
        let d = enc.encode(private.d().to_bytes_be());
        let private_jwk = Jwk {
            kty: "RSA".to_owned(),
            kid: Some("k1".to_owned()),
            crv: None,
            n: Some(n.clone()),
            e: Some(e.clone()),
            d: Some(d),
            x: None,
            y: None,
        };
        let public_jwk = Jwk {
            kty: "RSA".to_owned(),
            kid: Some("k1".to_owned()),
            crv: None,
            n: Some(n),
            e: Some(e),
            d: None,
            x: None,
            y: None,
        };
        (private_jwk, public_jwk)
    }

    #[test]
    fn rsa_jwt_round_trips() {
        let (private_jwk, public_jwk) = rsa_jwk_pair();
        let claims = Claims {
            sub: "client-1".to_owned(),
            exp: 9_999_999_999,
        };
        let token = sign_jwt(&private_jwk, &claims).unwrap();
        let decoded: Claims = verify_jwt(&public_jwk, &token).unwrap();
        assert_eq!(decoded, claims);
    }

    #[test]
    fn verifying_with_mismatched_key_fails() {
        let (private_jwk, _) = rsa_jwk_pair();
        let (_, other_public) = rsa_jwk_pair();
        let claims = Claims {
            sub: "client-1".to_owned(),
            exp: 9_999_999_999,
        };
        let token = sign_jwt(&private_jwk, &claims).unwrap();
        assert!(verify_jwt::<Claims>(&other_public, &token).is_err());
    }
}
