use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Turn a caller-supplied range into a span, rejecting `start >= end`.
pub(crate) fn checked_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    Span::try_new(start, end).ok_or(EngineError::InvalidRange { start, end })
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

pub(crate) fn validate_window(window: &Span) -> Result<(), EngineError> {
    if window.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

pub(crate) fn validate_name(name: &str) -> Result<String, EngineError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Invalid("name is required"));
    }
    if trimmed.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn validate_url(url: &str) -> Result<(), EngineError> {
    if url.len() > MAX_URL_LEN {
        return Err(EngineError::LimitExceeded("image url too long"));
    }
    Ok(())
}

/// Join codes are matched case-insensitively and ignore surrounding blanks.
pub(crate) fn normalize_join_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Fresh join code: the tail of a new ULID, which is all random bits rendered
/// in upper-case Crockford base32.
pub(crate) fn generate_join_code() -> String {
    let s = ulid::Ulid::new().to_string();
    s[s.len() - JOIN_CODE_LEN..].to_string()
}
