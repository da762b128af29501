//! Terminal vs. retryable classification of external-service failures
//! (spec.md §4.5).

const TERMINAL_CODES: &[&str] = &[
    "CARD_DECLINED",
    "EXPIRED_CARD",
    "INVALID_AMOUNT",
    "FRAUD_SUSPECTED",
    "INVALID_CREDENTIALS",
    "PERMISSION_DENIED",
    "UNSUPPORTED_OPERATION",
];

const RETRYABLE_CODES: &[&str] = &[
    "PROCESSING_ERROR",
    "RATE_LIMITED",
    "CONNECTION_ERROR",
    "TIMEOUT",
    "ACQUIRER_ERROR",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Terminal,
    Retryable,
    /// Not in either enumerated set: spec.md §4.5 "Anything else is not
    /// automatically retried" — treated like Terminal for retry purposes,
    /// but kept distinct so callers can log it differently.
    Unknown,
}

pub fn classify(code: &str) -> ErrorClass {
    if TERMINAL_CODES.contains(&code) {
        ErrorClass::Terminal
    } else if RETRYABLE_CODES.contains(&code) {
        ErrorClass::Retryable
    } else {
        ErrorClass::Unknown
    }
}

impl ErrorClass {
    pub fn should_retry(self) -> bool {
        matches!(self, ErrorClass::Retryable)
    }
}

/// An external-service failure carrying a stable code, the way the fiscal
/// cloud-TSS adapter (spec.md §4.11) and card-processor-style errors
/// report them.
#[derive(Debug, Clone)]
pub struct ExternalError {
    pub code: String,
    pub message: String,
}

impl std::fmt::Display for ExternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl ExternalError {
    pub fn classify(&self) -> ErrorClass {
        classify(&self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_terminal_and_retryable_codes() {
        assert_eq!(classify("CARD_DECLINED"), ErrorClass::Terminal);
        assert_eq!(classify("RATE_LIMITED"), ErrorClass::Retryable);
        assert_eq!(classify("SOMETHING_NEW"), ErrorClass::Unknown);
    }
}
