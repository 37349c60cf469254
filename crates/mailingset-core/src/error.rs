use thiserror::Error;

/// Why a local-part expression failed to parse, matching the categories
/// the grammar in the core spec distinguishes.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorReason {
    #[error("mismatched_brace")]
    MismatchedBrace,
    #[error("misplaced_brace")]
    MisplacedBrace,
    #[error("mixed_operators")]
    MixedOperators,
    #[error("empty_group")]
    EmptyGroup,
    #[error("empty_operand")]
    EmptyOperand,
    #[error("bad_identifier")]
    BadIdentifier,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{reason} at position {position}")]
pub struct ParseError {
    pub reason: ParseErrorReason,
    pub position: usize,
}

/// Errors surfaced by the pipeline (parse, resolve, evaluate) up to the
/// SMTP layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailingSetError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("unknown name '{0}'")]
    UnknownName(String),

    #[error("ambiguous name '{name}': candidates {candidates:?}")]
    AmbiguousName {
        name: String,
        candidates: Vec<String>,
    },

    #[error("recipient domain does not match the configured incoming domain")]
    WrongDomain,

    #[error("expression evaluated to an empty set")]
    EmptySet,

    #[error("relay handoff failed: {0}")]
    RelayHandoffError(String),

    #[error("internal error: {0}")]
    InternalError(String),

    #[error("cycle detected in list definitions involving '{0}'")]
    CycleDetected(String),

    #[error("malformed list entry '{0}'")]
    MalformedListEntry(String),
}

impl MailingSetError {
    /// The SMTP reply code this error maps to per the error handling table.
    pub fn smtp_code(&self) -> u16 {
        match self {
            Self::Parse(_)
            | Self::UnknownName(_)
            | Self::AmbiguousName { .. }
            | Self::WrongDomain
            | Self::EmptySet => 550,
            Self::RelayHandoffError(_) | Self::InternalError(_) | Self::CycleDetected(_) => 451,
            Self::MalformedListEntry(_) => 451,
        }
    }
}
