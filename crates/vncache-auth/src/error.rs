#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("secret provider: {0}")]
    Provider(String),
    #[error("unsupported jwk key type: {0}")]
    UnsupportedKeyType(String),
    #[error("jwk is missing required field: {0}")]
    MalformedJwk(&'static str),
    #[error("jwt encode/decode: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("rsa: {0}")]
    Rsa(#[from] rsa::Error),
    #[error("ecdsa signature: {0}")]
    Ecdsa(#[from] p256::ecdsa::Error),
    #[error("signing key not yet loaded")]
    KeyNotLoaded,
}
