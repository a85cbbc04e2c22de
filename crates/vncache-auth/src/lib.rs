//! JWT handshake and per-message signing for the cache client's auth
//! envelope: a client private key signs the handshake and outgoing message
//! hashes, a cache node's public key verifies incoming ones.

mod error;
mod jwk;
mod jwt;
mod sign;

pub use error::AuthError;
pub use jwk::{Jwk, KeyMaterial};

use tokio::sync::OnceCell;

/// Supplies the two key pairs the auth manager needs. Implementations may
/// read these from a secrets manager, an environment variable, or (in
/// tests) a fixed in-memory value; this crate never reads key material from
/// disk itself.
pub trait SecretProvider: Send + Sync {
    fn client_private_key(&self) -> Result<Jwk, AuthError>;
    fn cache_public_key(&self) -> Result<Jwk, AuthError>;
}

/// A `SecretProvider` wrapping two already-parsed JWKs, for tests and
/// embedders that already hold the key material in memory.
pub struct StaticSecretProvider {
    client_private_key: Jwk,
    cache_public_key: Jwk,
}

impl StaticSecretProvider {
    #[must_use]
    pub fn new(client_private_key: Jwk, cache_public_key: Jwk) -> Self {
        Self {
            client_private_key,
            cache_public_key,
        }
    }
}

impl SecretProvider for StaticSecretProvider {
    fn client_private_key(&self) -> Result<Jwk, AuthError> {
        Ok(self.client_private_key.clone())
    }

    fn cache_public_key(&self) -> Result<Jwk, AuthError> {
        Ok(self.cache_public_key.clone())
    }
}

/// Which side of a handshake a key is being used for. `Peer` selects the
/// key material used for node-to-node replication exchanges; `Client`
/// selects the material used for ordinary client requests. This
/// implementation holds only the two keys a `SecretProvider` supplies, so
/// both flags currently resolve to the same key pair — kept as an explicit
/// parameter so a provider backed by distinct peer/client key pairs can be
/// dropped in later without changing call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    Client,
    Peer,
}

/// Lazily materializes signing/verification keys from a `SecretProvider`
/// and exposes JWT + raw message-hash sign/verify operations over them.
///
/// Keys are loaded once, on first use, behind a `tokio::sync::OnceCell` so
/// a manager can be constructed cheaply and shared across tasks without
/// blocking on key material until it's actually needed.
pub struct AuthManager {
    provider: Box<dyn SecretProvider>,
    client_private: OnceCell<Jwk>,
    cache_public: OnceCell<Jwk>,
}

impl AuthManager {
    #[must_use]
    pub fn new(provider: Box<dyn SecretProvider>) -> Self {
        Self {
            provider,
            client_private: OnceCell::new(),
            cache_public: OnceCell::new(),
        }
    }

    async fn client_private_key(&self) -> Result<&Jwk, AuthError> {
        self.client_private
            .get_or_try_init(|| async { self.provider.client_private_key() })
            .await
    }

    async fn cache_public_key(&self) -> Result<&Jwk, AuthError> {
        self.cache_public
            .get_or_try_init(|| async { self.provider.cache_public_key() })
            .await
    }

    /// Sign a handshake payload as a compact JWT using the client's
    /// private key.
    pub async fn sign_handshake<T: serde::Serialize>(&self, claims: &T) -> Result<String, AuthError> {
        let key = self.client_private_key().await?;
        jwt::sign_jwt(key, claims)
    }

    /// Verify a handshake JWT issued by a cache node against its public key.
    pub async fn verify_handshake<T: serde::de::DeserializeOwned>(&self, token: &str) -> Result<T, AuthError> {
        let key = self.cache_public_key().await?;
        jwt::verify_jwt(key, token)
    }

    /// Sign a raw message (e.g. a frame body) with the role-selected key.
    pub async fn sign_message_hash(&self, role: KeyRole, message: &[u8]) -> Result<Vec<u8>, AuthError> {
        let _ = role;
        let key = self.client_private_key().await?;
        let material = key.load()?;
        sign::sign_message(&material, message)
    }

    /// Verify a raw message signature with the role-selected key.
    pub async fn verify_message_hash(&self, role: KeyRole, message: &[u8], signature: &[u8]) -> Result<bool, AuthError> {
        let _ = role;
        let key = self.cache_public_key().await?;
        let material = key.load()?;
        sign::verify_message(&material, message, signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
            kid: Some("client".to_owned()),
            crv: None,
            n: Some(n.clone()),
            e: Some(e.clone()),
            d: Some(d),
            x: None,
            y: None,
        };
        let public_jwk = Jwk {
            kty: "RSA".to_owned(),
            kid: Some("client".to_owned()),
            crv: None,
            n: Some(n),
            e: Some(e),
            d: None,
            x: None,
            y: None,
        };
        (private_jwk, public_jwk)
    }

    #[tokio::test]
    async fn keys_are_loaded_once_and_reused() {
        let (private_jwk, public_jwk) = rsa_jwk_pair();
        let provider = StaticSecretProvider::new(private_jwk, public_jwk);
        let manager = AuthManager::new(Box::new(provider));

        let sig = manager.sign_message_hash(KeyRole::Client, b"hello").await.unwrap();
        let first_key = manager.client_private_key().await.unwrap().kid.clone();
        let second_key = manager.client_private_key().await.unwrap().kid.clone();
        assert_eq!(first_key, second_key);
        assert!(!sig.is_empty());
    }

    #[tokio::test]
    async fn sign_then_verify_message_hash_round_trips() {
        let (private_jwk, public_jwk) = rsa_jwk_pair();
        let signer = AuthManager::new(Box::new(StaticSecretProvider::new(
            private_jwk.clone(),
            public_jwk.clone(),
        )));
        let sig = signer
            .sign_message_hash(KeyRole::Client, b"object-bytes")
            .await
            .unwrap();

        let verifier = AuthManager::new(Box::new(StaticSecretProvider::new(private_jwk, public_jwk)));
        let ok = verifier
            .verify_message_hash(KeyRole::Client, b"object-bytes", &sig)
            .await
            .unwrap();
        assert!(ok);
    }
}
