use thiserror::Error;

pub type Result<T> = std::result::Result<T, SpeechError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpeechError {
    #[error("invalid speech parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("unknown phoneme code 0x{0:02x}")]
    UnknownPhoneme(u8),

    #[error("truncated phoneme record at offset {offset}")]
    TruncatedRecord { offset: usize },
}
