use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("media id must be positive, got {0}")]
    InvalidMediaId(i64),
}
