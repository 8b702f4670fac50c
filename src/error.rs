pub type ClipreelResult<T> = Result<T, ClipreelError>;

/// Crate-wide error taxonomy.
///
/// Generation failures carry their upstream classification (`Quota`,
/// `Credential`, `Transient`, `Generation`) so the batch layer can decide
/// retry/surface behavior without string matching. Pipeline failures use the
/// remaining variants.
#[derive(thiserror::Error, Debug)]
pub enum ClipreelError {
    #[error("quota exhausted: {0}")]
    Quota(String),

    #[error("invalid credential: {0}")]
    Credential(String),

    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("generation error: {0}")]
    Generation(String),

    #[error("no supported encoding profile: {0}")]
    EncodingUnavailable(String),

    #[error("asset missing: {0}")]
    AssetMissing(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ClipreelError {
    pub fn quota(msg: impl Into<String>) -> Self {
        Self::Quota(msg.into())
    }

    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    pub fn encoding_unavailable(msg: impl Into<String>) -> Self {
        Self::EncodingUnavailable(msg.into())
    }

    pub fn asset_missing(msg: impl Into<String>) -> Self {
        Self::AssetMissing(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Quota errors are surfaced once per batch and offer remediation.
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::Quota(_))
    }

    /// Credential errors block further generation until corrected.
    pub fn is_credential(&self) -> bool {
        matches!(self, Self::Credential(_))
    }

    /// Only transient failures are eligible for retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
