use crate::error::AuthError;
use crate::jwk::KeyMaterial;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature as EcSignature, SigningKey, VerifyingKey};
use rsa::pkcs1v15::{Signature as RsaSignature, SigningKey as RsaSigningKey, VerifyingKey as RsaVerifyingKey};
use rsa::signature::{SignatureEncoding, Signer as RsaSigner, Verifier as RsaVerifier};
use sha2::Sha256;

/// Sign a pre-computed SHA-256 digest with the given key material.
///
/// RSA keys sign with PKCS#1 v1.5 padding; EC keys sign with ECDSA over
/// P-256. Both paths hash the message as part of the signing primitive, so
/// callers pass the raw message bytes, not a pre-hashed digest.
pub fn sign_message(material: &KeyMaterial, message: &[u8]) -> Result<Vec<u8>, AuthError> {
    match material {
        KeyMaterial::RsaPrivate(key) => {
            let signing_key = RsaSigningKey::<Sha256>::new((**key).clone());
            let signature = signing_key.sign(message);
            Ok(signature.to_vec())
        }
        KeyMaterial::EcPrivate(key) => {
            let signature: EcSignature = key.sign(message);
            Ok(signature.to_der().as_bytes().to_vec())
        }
        KeyMaterial::RsaPublic(_) | KeyMaterial::EcPublic(_) => Err(AuthError::KeyNotLoaded),
    }
}

/// Verify a signature produced by [`sign_message`] against the given key
/// material, which must be the public counterpart of the signing key.
pub fn verify_message(material: &KeyMaterial, message: &[u8], signature: &[u8]) -> Result<bool, AuthError> {
    match material {
        KeyMaterial::RsaPublic(key) => {
            let verifying_key = RsaVerifyingKey::<Sha256>::new((**key).clone());
            let sig = RsaSignature::try_from(signature).map_err(|_| AuthError::KeyNotLoaded)?;
            Ok(verifying_key.verify(message, &sig).is_ok())
        }
        KeyMaterial::EcPublic(key) => {
            let sig = EcSignature::from_der(signature).map_err(AuthError::Ecdsa)?;
            Ok(verify_ec(key, message, &sig))
        }
        KeyMaterial::RsaPrivate(_) | KeyMaterial::EcPrivate(_) => Err(AuthError::KeyNotLoaded),
    }
}

fn verify_ec(key: &VerifyingKey, message: &[u8], sig: &EcSignature) -> bool {
    key.verify(message, sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::SigningKey as EcSigningKey;
    use rand::rngs::OsRng;
    use rsa::RsaPrivateKey;

    #[test]
    fn rsa_signature_round_trips() {
        let private = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let public = private.to_public_key();
        let priv_material = KeyMaterial::RsaPrivate(Box::new(private));
        let pub_material = KeyMaterial::RsaPublic(Box::new(public));

        let signature = sign_message(&priv_material, b"hello world").unwrap();
        assert!(verify_message(&pub_material, b"hello world", &signature).unwrap());
        assert!(!verify_message(&pub_material, b"tampered", &signature).unwrap());
    }

    #[test]
    fn ec_signature_round_trips() {
        let signing_key = EcSigningKey::random(&mut OsRng);
        let verifying_key = *signing_key.verifying_key();
        let priv_material = KeyMaterial::EcPrivate(Box::new(signing_key));
        let pub_material = KeyMaterial::EcPublic(Box::new(verifying_key));

        let signature = sign_message(&priv_material, b"hello world").unwrap();
        assert!(verify_message(&pub_material, b"hello world", &signature).unwrap());
        assert!(!verify_message(&pub_material, b"tampered", &signature).unwrap());
    }

    #[test]
    fn signing_with_a_public_key_is_rejected() {
        let private = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let public = KeyMaterial::RsaPublic(Box::new(private.to_public_key()));
        assert!(matches!(sign_message(&public, b"x"), Err(AuthError::KeyNotLoaded)));
    }
}
