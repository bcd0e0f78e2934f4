//! Proof Key for Code Exchange (RFC 7636), `S256` method only.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::random;

/// Random bytes behind a verifier; 48 bytes encode to 64 characters.
const VERIFIER_BYTES: usize = 48;

pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// Generates a code verifier from the OS random source.
///
/// The result is 64 characters of base64url text, inside the 43..=128 range
/// and the unreserved URI character set. It must only ever be sent to the
/// provider's token endpoint.
pub fn generate_code_verifier() -> Result<String, Error> {
    random::random_base64url::<VERIFIER_BYTES>()
}

/// Computes the `S256` challenge: `BASE64URL(SHA256(verifier))`, 43 characters.
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_unreserved(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
    }

    #[test]
    fn verifier_length_and_charset() {
        for _ in 0..100 {
            let verifier = generate_code_verifier().unwrap();
            assert!((43..=128).contains(&verifier.len()));
            assert!(
                verifier.chars().all(is_unreserved),
                "verifier should be URL-safe: {verifier}"
            );
        }
    }

    #[test]
    fn verifier_uniqueness() {
        let v1 = generate_code_verifier().unwrap();
        let v2 = generate_code_verifier().unwrap();
        assert_ne!(v1, v2);
    }

    #[test]
    fn challenge_shape_and_determinism() {
        let verifier = generate_code_verifier().unwrap();
        let c1 = generate_code_challenge(&verifier);
        let c2 = generate_code_challenge(&verifier);
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 43);
        assert!(
            c1.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn challenge_known_vector() {
        // RFC 7636, appendix B.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            generate_code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn challenge_differs_for_different_verifiers() {
        assert_ne!(
            generate_code_challenge("verifier_1"),
            generate_code_challenge("verifier_2")
        );
    }
}
