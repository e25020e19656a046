//! Validation helpers for DTOs.

use validator::ValidationError;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Validates that a public key looks like a base58-encoded 32-byte key (32 to 44 characters).
pub fn validate_public_key(key: &str) -> Result<(), ValidationError> {
    if !(32..=44).contains(&key.len()) {
        let mut err = ValidationError::new("public_key_length");
        err.message = Some(
            format!(
                "Public key must be between 32 and 44 characters (got {})",
                key.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !key.chars().all(|c| BASE58_ALPHABET.contains(c)) {
        let mut err = ValidationError::new("public_key_format");
        err.message = Some("Public key must be base58 encoded".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_public_key_valid() {
        assert!(validate_public_key("9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin").is_ok());
        assert!(validate_public_key("11111111111111111111111111111111").is_ok());
    }

    #[test]
    fn test_validate_public_key_invalid_length() {
        assert!(validate_public_key("").is_err());
        assert!(validate_public_key("9xQeWvG816bUx9EPjHma").is_err());
        assert!(validate_public_key(&"1".repeat(45)).is_err());
    }

    #[test]
    fn test_validate_public_key_invalid_alphabet() {
        // 0, O, I and l are not part of base58
        assert!(validate_public_key("0xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin").is_err());
        assert!(validate_public_key("9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFIn").is_err());
        assert!(validate_public_key("9xQeWvG816bUx9EPjHmaT23yvVM2 WbrrpZb9PusVFin").is_err());
    }
}
