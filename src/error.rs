//! error types for keyfob

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// peripheral unreachable or refused its credential. fatal.
    #[error("device initialization failed: {0}")]
    DeviceInit(String),

    /// transient sensor/reader i/o failure during one capture attempt.
    /// capture loops swallow this and retry with operator feedback.
    #[error("capture failed: {0}")]
    Capture(String),

    /// non-success http status or malformed response from the vault.
    #[error("remote api error: {0}")]
    Remote(String),

    /// aead integrity check failed: tampered ciphertext or wrong key.
    /// recoverable per-share during unseal, fatal everywhere else.
    #[error("ciphertext authentication failed")]
    Authentication,

    /// block read/write failure on the physical medium.
    #[error("medium error at block {block}: {reason}")]
    Medium { block: u8, reason: String },

    /// quorum exhausted or share count mismatch.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// file i/o on the key file, record file or manifest.
    #[error("storage error: {0}")]
    Storage(String),

    /// unparseable key token, record or manifest contents.
    #[error("format error: {0}")]
    Format(String),
}
