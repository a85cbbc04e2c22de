#[derive(Debug, thiserror::Error)]
pub enum LocalCacheError {
    #[error("key must be non-empty after trimming")]
    EmptyKey,
    #[error("payload of {0} bytes exceeds the configured max_object_size of {1} bytes")]
    TooLarge(usize, usize),
}
