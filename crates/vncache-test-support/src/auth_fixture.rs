//! A throwaway RSA keypair wrapped as a `vncache_auth::AuthManager`, for
//! integration tests that need a real (but not externally verified)
//! handshake signer. The mock cache node never checks the bearer token,
//! so this only needs to produce a manager the client-side code can call
//! without hitting `AuthError::MalformedJwk` / `UnsupportedKey`.

use base64::Engine;
use rand::rngs::OsRng;
use vncache_auth::{AuthManager, Jwk, StaticSecretProvider};

fn rsa_jwk_pair() -> (Jwk, Jwk) {
    let private = rsa::RsaPrivateKey::new(&mut OsRng, 2048).expect("generate test rsa key");
    let public = private.to_public_key();
    let enc = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let n = enc.encode(public.n().to_bytes_be());
    let e = enc.encode(public.e().to_bytes_be());
    let d = enc.encode(private.d().to_bytes_be());

    let private_jwk = Jwk {
        kty: "RSA".to_owned(),
        kid: Some("test-client".to_owned()),
        crv: None,
        n: Some(n.clone()),
        e: Some(e.clone()),
        d: Some(d),
        x: None,
        y: None,
    };
    let public_jwk = Jwk {
        kty: "RSA".to_owned(),
        kid: Some("test-client".to_owned()),
        crv: None,
        n: Some(n),
        e: Some(e),
        d: None,
        x: None,
        y: None,
    };
    (private_jwk, public_jwk)
}

/// An `AuthManager` backed by a freshly generated RSA keypair, suitable
/// for driving a `vncache::VncacheClient` against a `MockCacheNode`.
#[must_use]
pub fn test_auth_manager() -> AuthManager {
    let (private_jwk, public_jwk) = rsa_jwk_pair();
    AuthManager::new(Box::new(StaticSecretProvider::new(private_jwk, public_jwk)))
}
