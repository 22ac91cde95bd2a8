//! Challenge id generation.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;

use bulwark_core::ports::TokenGenerator;

/// Random bytes behind every challenge id.
const TOKEN_BYTES: usize = 32;

/// URL-safe base64 of 32 random bytes. The alphabet has no `:`, so ids
/// embed cleanly in `fp:<challenge>:<fingerprint>` identities.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTokenGenerator;

impl TokenGenerator for RandomTokenGenerator {
    fn generate(&self) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique_and_separator_free() {
        let generator = RandomTokenGenerator;
        let a = generator.generate();
        let b = generator.generate();

        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(!a.contains(':'));
    }
}
