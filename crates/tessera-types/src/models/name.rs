use crate::error::ValidationError;

/// Longest accepted namespace or entity name (DNS label length).
pub const MAX_NAME_LEN: usize = 63;

/// Validate a namespace, edge, route, or listener name.
///
/// Names become store key segments, so `/` and other separators are rejected.
pub fn validate_name(field: &str, value: &str) -> Result<(), ValidationError> {
    let reject = |message: &str| ValidationError::InvalidName {
        field: field.to_string(),
        value: value.to_string(),
        message: message.to_string(),
    };

    if value.is_empty() {
        return Err(reject("must not be empty"));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(reject(&format!("must be at most {} characters", MAX_NAME_LEN)));
    }
    if value == "." || value == ".." {
        return Err(reject("reserved name"));
    }
    if let Some(bad) =
        value.chars().find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(reject(&format!("unexpected character '{}'", bad)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_typical_names() {
        for name in ["default", "edge-01", "aws_us.east", "E1"] {
            assert!(validate_name("name", name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_rejects_bad_names() {
        let too_long = "a".repeat(MAX_NAME_LEN + 1);
        for name in ["", ".", "..", "edge/1", "edge 1", too_long.as_str()] {
            let err = validate_name("name", name).unwrap_err();
            assert!(matches!(err, ValidationError::InvalidName { .. }), "{name:?}");
        }
    }
}
