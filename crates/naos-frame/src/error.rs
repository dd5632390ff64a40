/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The frame is shorter than the fixed header.
    #[error("frame too short ({len} bytes, need at least {min})")]
    TooShort { len: usize, min: usize },

    /// The frame header carries an unsupported version.
    #[error("unsupported frame version {0} (expected 1)")]
    InvalidVersion(u8),
}

pub type Result<T> = std::result::Result<T, FrameError>;
