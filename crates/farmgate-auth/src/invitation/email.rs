//! Invitee email normalisation.

use validator::Validate;

use farmgate_core::result::AppResult;

#[derive(Debug, Validate)]
struct EmailAddress {
    #[validate(email(message = "Invalid email address"), length(max = 254))]
    address: String,
}

/// Trim, lowercase, and validate an email address.
pub fn normalize_email(raw: &str) -> AppResult<String> {
    let candidate = EmailAddress {
        address: raw.trim().to_lowercase(),
    };
    candidate.validate()?;
    Ok(candidate.address)
}

#[cfg(test)]
mod tests {
    use farmgate_core::ErrorKind;

    use super::*;

    #[test]
    fn test_normalizes_case_and_whitespace() {
        assert_eq!(normalize_email("  Bob@X.com ").unwrap(), "bob@x.com");
    }

    #[test]
    fn test_rejects_malformed_addresses() {
        for raw in ["", "bob", "bob@", "@x.com", "bob smith@x.com"] {
            let err = normalize_email(raw).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Validation, "{raw:?}");
        }
    }
}
