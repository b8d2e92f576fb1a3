use thiserror::Error;

/// Errors raised by construction-time validation and dump-time usage checks.
///
/// Demultiplexing never produces one of these; malformed event orderings are absorbed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoreError {
    #[error("{numerator}/{denominator} is not a valid time signature")]
    InvalidTimeSignature { numerator: u32, denominator: u32 },

    #[error("supplied key '{0}' is not valid")]
    InvalidKey(String),

    #[error("please specify the output")]
    MissingOutput,

    #[error("invalid instrument selection: {0}")]
    InvalidInstrumentSelection(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type ScoreResult<T> = std::result::Result<T, ScoreError>;
