//! Validation rules for caller-supplied identifiers.

/// Error type for validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("id is required")]
    IdRequired,

    #[error("id must be 200 characters or less (got {0})")]
    IdTooLong(usize),

    #[error("id {id:?} contains invalid character {ch:?}")]
    InvalidCharacter { id: String, ch: char },

    #[error("id {0:?} ends in a numeric segment and would collide with step ids")]
    NumericSuffix(String),

    #[error("summary is required")]
    SummaryRequired,
}

const MAX_ID_LEN: usize = 200;

/// Validates an instance id (a template id or a caller ref).
///
/// Allowed characters are ASCII alphanumerics plus `-`, `_`, `.` and `:`.
/// The final `.`-separated segment may not be all digits, since
/// `<id>.<n>` is reserved for step ids.
pub fn validate_instance_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::IdRequired);
    }
    if id.len() > MAX_ID_LEN {
        return Err(ValidationError::IdTooLong(id.len()));
    }
    if let Some(ch) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
    {
        return Err(ValidationError::InvalidCharacter {
            id: id.to_owned(),
            ch,
        });
    }
    if let Some((_, last)) = id.rsplit_once('.') {
        if !last.is_empty() && last.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::NumericSuffix(id.to_owned()));
        }
    }
    Ok(())
}

/// Validates a digest summary.
pub fn validate_summary(summary: &str) -> Result<(), ValidationError> {
    if summary.trim().is_empty() {
        return Err(ValidationError::SummaryRequired);
    }
    Ok(())
}
