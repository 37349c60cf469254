use crate::MessageConformance;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MailParsingError {
    #[error("invalid header: {0}")]
    HeaderParse(String),
    #[error("while assigning header '{header_name}': {error}")]
    InvalidHeaderValueDuringAssignment {
        header_name: String,
        error: Box<MailParsingError>,
    },
    #[error("while parsing header '{header_name}': {error}")]
    InvalidHeaderValueDuringGet {
        header_name: String,
        error: Box<MailParsingError>,
    },
    #[error("Header {0} not found")]
    MissingHeader(String),
    #[error("Invalid Content-Transfer-Encoding: {0}")]
    InvalidContentTransferEncoding(String),
    #[error("Error parsing Date header: {0}")]
    ChronoError(chrono::format::ParseError),
    #[error("Message has conformance issues: {}", .0.to_string())]
    ConformanceIssues(MessageConformance),
    #[error("Failed to detect the charset: {0}")]
    CharsetDetectionFailed(String),
}
