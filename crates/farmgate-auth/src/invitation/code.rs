//! Short invitation codes and the links that carry them.

use rand::Rng;

/// Symbols a code is drawn from.
pub const CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Default code length.
pub const CODE_LENGTH: usize = 8;

/// Source of invitation codes.
///
/// Uniqueness is not the generator's job; the caller retries on collision.
pub trait CodeGenerator: Send + Sync + std::fmt::Debug {
    /// Produce a candidate code.
    fn generate(&self) -> String;
}

/// Uniform random codes over [`CODE_ALPHABET`].
#[derive(Debug, Clone)]
pub struct RandomCodeGenerator {
    length: usize,
}

impl RandomCodeGenerator {
    /// Creates a generator for codes of [`CODE_LENGTH`] symbols.
    pub fn new() -> Self {
        Self {
            length: CODE_LENGTH,
        }
    }

    /// Creates a generator for codes of the given length.
    pub fn with_length(length: usize) -> Self {
        Self { length }
    }
}

impl Default for RandomCodeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> String {
        let mut rng = rand::rng();
        (0..self.length)
            .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }
}

/// Canonical form of a code typed or pasted by a user.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Builds invitation links of the form `{base}/{code}`.
#[derive(Debug, Clone)]
pub struct InvitationLinkBuilder {
    base_url: String,
}

impl InvitationLinkBuilder {
    /// Creates a builder for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }

    /// The link embedding `code`.
    pub fn link_for(&self, code: &str) -> String {
        format!("{}/{}", self.base_url, code)
    }

    /// Extract the code from a link built by this builder.
    pub fn code_from(&self, link: &str) -> Option<String> {
        link.strip_prefix(&self.base_url)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(|code| code.trim_end_matches('/'))
            .filter(|code| !code.is_empty() && !code.contains('/'))
            .map(normalize_code)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_codes_are_uppercase_alphanumeric() {
        let generator = RandomCodeGenerator::new();
        for _ in 0..200 {
            let code = generator.generate();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)), "{code}");
        }
    }

    #[test]
    fn test_codes_rarely_repeat() {
        let generator = RandomCodeGenerator::new();
        let codes: HashSet<String> = (0..1000).map(|_| generator.generate()).collect();
        assert!(codes.len() > 995);
    }

    #[test]
    fn test_link_round_trip() {
        let links = InvitationLinkBuilder::new("https://app.example/invite/");
        let link = links.link_for("AB12CD34");
        assert_eq!(link, "https://app.example/invite/AB12CD34");
        assert_eq!(links.code_from(&link).as_deref(), Some("AB12CD34"));
        assert_eq!(links.code_from("https://elsewhere/invite/AB12CD34"), None);
        assert_eq!(links.code_from("https://app.example/invite/"), None);
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  ab12cd34\n"), "AB12CD34");
    }
}
