//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest host identifier accepted from the identity header.
const MAX_HOST_ID_LEN: usize = 128;

/// Validates that the correct answer index points inside the options list.
pub fn validate_answer_index(correct: usize, answers: usize) -> Result<(), ValidationError> {
    if correct >= answers {
        let mut err = ValidationError::new("correct_out_of_range");
        err.message = Some(
            format!("correct answer index {correct} is out of range for {answers} answers").into(),
        );
        return Err(err);
    }
    Ok(())
}

/// Validates an opaque host identifier: non-empty, bounded, no whitespace or
/// control characters.
///
/// ```ignore
/// validate_host_id("host-42")  // Ok
/// validate_host_id("")         // Err - empty
/// validate_host_id("a b")      // Err - whitespace
/// ```
pub fn validate_host_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_HOST_ID_LEN {
        let mut err = ValidationError::new("host_id_length");
        err.message = Some(
            format!(
                "host id must be between 1 and {MAX_HOST_ID_LEN} characters (got {})",
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        let mut err = ValidationError::new("host_id_format");
        err.message = Some("host id must not contain whitespace".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_index_must_be_in_range() {
        assert!(validate_answer_index(0, 2).is_ok());
        assert!(validate_answer_index(3, 4).is_ok());
        assert!(validate_answer_index(2, 2).is_err());
        assert!(validate_answer_index(0, 0).is_err());
    }

    #[test]
    fn host_id_rules() {
        assert!(validate_host_id("host-42").is_ok());
        assert!(validate_host_id("").is_err());
        assert!(validate_host_id("a b").is_err());
        assert!(validate_host_id("tab\there").is_err());
        assert!(validate_host_id(&"x".repeat(129)).is_err());
    }
}
