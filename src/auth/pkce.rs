//! PKCE S256 challenge generation and verification
//!
//! This module implements the Proof Key for Code Exchange (PKCE) extension
//! to OAuth 2.0 as defined in RFC 7636, specifically the `S256` challenge
//! method required by OAuth 2.1, plus the random `state` and `nonce` values
//! used to bind a callback to the flow that issued it.
//!
//! # How PKCE works
//!
//! 1. The client generates a high-entropy random string called the `code_verifier`.
//! 2. The client computes a SHA-256 hash of the verifier and base64url-encodes
//!    it to produce the `code_challenge`.
//! 3. The authorization request includes `code_challenge` and
//!    `code_challenge_method=S256`.
//! 4. The token exchange request includes the original `code_verifier`.
//! 5. The authorization server recomputes the challenge and compares it to
//!    the value sent in step 3, proving possession of the verifier.
//!
//! All randomness comes from `rand::rng()`, a thread-local CSPRNG seeded
//! from the operating system.
//!
//! # References
//!
//! - RFC 7636 <https://www.rfc-editor.org/rfc/rfc7636>

use base64::Engine as _;
use rand::{Rng as _, RngCore as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// RFC 7636 section 4.1 unreserved characters.
const VERIFIER_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Length of verifiers produced by [`generate_code_verifier`].
pub const CODE_VERIFIER_LENGTH: usize = 64;

/// Minimum verifier length permitted by RFC 7636.
pub const MIN_VERIFIER_LENGTH: usize = 43;

/// Maximum verifier length permitted by RFC 7636.
pub const MAX_VERIFIER_LENGTH: usize = 128;

/// Length of a base64url-encoded (unpadded) SHA-256 digest.
pub const CODE_CHALLENGE_LENGTH: usize = 43;

/// The only challenge method this crate emits.
pub const CHALLENGE_METHOD_S256: &str = "S256";

// ---------------------------------------------------------------------------
// PkceParams
// ---------------------------------------------------------------------------

/// A PKCE S256 verifier/challenge pair.
///
/// Created by [`generate_pkce_params`].  The verifier stays with the client
/// until the token exchange; only the challenge travels in the browser
/// redirect.
///
/// # Examples
///
/// ```
/// use openapi_mcp_auth::auth::pkce::{compute_code_challenge, generate_pkce_params};
///
/// let pkce = generate_pkce_params();
/// assert_eq!(pkce.code_challenge_method, "S256");
/// assert_eq!(pkce.code_verifier.len(), 64);
/// assert_eq!(pkce.code_challenge, compute_code_challenge(&pkce.code_verifier));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkceParams {
    /// The secret verifier sent to the token endpoint as `code_verifier`.
    pub code_verifier: String,

    /// `base64url(SHA256(code_verifier))`, sent as `code_challenge`.
    pub code_challenge: String,

    /// Always `"S256"`.
    pub code_challenge_method: String,
}

// ---------------------------------------------------------------------------
// Public functions
// ---------------------------------------------------------------------------

/// Generates a 64-character code verifier.
///
/// Each character is drawn uniformly from the 66-character unreserved set
/// `A-Z a-z 0-9 - . _ ~`.
pub fn generate_code_verifier() -> String {
    let mut rng = rand::rng();
    (0..CODE_VERIFIER_LENGTH)
        .map(|_| VERIFIER_CHARSET[rng.random_range(0..VERIFIER_CHARSET.len())] as char)
        .collect()
}

/// Computes the S256 code challenge for `verifier`.
///
/// `ASCII(BASE64URL(SHA256(ASCII(code_verifier))))` per RFC 7636
/// section 4.2, without padding.
///
/// # Examples
///
/// ```
/// use openapi_mcp_auth::auth::pkce::compute_code_challenge;
///
/// // RFC 7636 Appendix B
/// assert_eq!(
///     compute_code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
///     "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM",
/// );
/// ```
pub fn compute_code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice())
}

/// Generates a fresh verifier together with its S256 challenge.
pub fn generate_pkce_params() -> PkceParams {
    let code_verifier = generate_code_verifier();
    let code_challenge = compute_code_challenge(&code_verifier);
    PkceParams {
        code_verifier,
        code_challenge,
        code_challenge_method: CHALLENGE_METHOD_S256.to_string(),
    }
}

/// Returns `true` iff `challenge` is the S256 challenge of `verifier`.
///
/// The comparison runs in constant time with respect to the content of the
/// two challenges.
pub fn validate_code_verifier(verifier: &str, challenge: &str) -> bool {
    constant_time_eq(&compute_code_challenge(verifier), challenge)
}

/// Format check for a code verifier: 43 to 128 unreserved characters.
///
/// This does not say anything about whether the verifier matches a
/// particular challenge.
pub fn is_valid_code_verifier(verifier: &str) -> bool {
    (MIN_VERIFIER_LENGTH..=MAX_VERIFIER_LENGTH).contains(&verifier.len())
        && verifier.bytes().all(|b| VERIFIER_CHARSET.contains(&b))
}

/// Format check for an S256 code challenge: exactly 43 base64url characters.
pub fn is_valid_code_challenge(challenge: &str) -> bool {
    challenge.len() == CODE_CHALLENGE_LENGTH
        && challenge
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Generates a CSRF `state` value: 32 random bytes, base64url-encoded.
pub fn generate_state() -> String {
    random_token()
}

/// Generates an OpenID Connect `nonce`: 32 random bytes, base64url-encoded.
pub fn generate_nonce() -> String {
    random_token()
}

fn random_token() -> String {
    let mut random_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut random_bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Compares two strings in constant time.  Only the length is observable
/// through timing.
pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn is_unreserved(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
    }

    // -----------------------------------------------------------------------
    // generate_code_verifier()
    // -----------------------------------------------------------------------

    #[test]
    fn test_generate_code_verifier_has_length_64() {
        for _ in 0..32 {
            assert_eq!(generate_code_verifier().len(), 64);
        }
    }

    #[test]
    fn test_generate_code_verifier_uses_unreserved_charset() {
        for _ in 0..32 {
            let verifier = generate_code_verifier();
            assert!(
                verifier.chars().all(is_unreserved),
                "verifier contains a reserved character: {verifier}"
            );
        }
    }

    #[test]
    fn test_generate_code_verifier_is_unique() {
        assert_ne!(generate_code_verifier(), generate_code_verifier());
    }

    #[test]
    fn test_generated_verifier_passes_format_check() {
        assert!(is_valid_code_verifier(&generate_code_verifier()));
    }

    // -----------------------------------------------------------------------
    // compute_code_challenge()
    // -----------------------------------------------------------------------

    #[test]
    fn test_compute_code_challenge_is_deterministic() {
        let verifier = generate_code_verifier();
        assert_eq!(
            compute_code_challenge(&verifier),
            compute_code_challenge(&verifier)
        );
    }

    #[test]
    fn test_compute_code_challenge_is_43_base64url_chars() {
        let challenge = compute_code_challenge(&generate_code_verifier());
        assert_eq!(challenge.len(), 43);
        assert!(!challenge.contains('+'));
        assert!(!challenge.contains('/'));
        assert!(!challenge.contains('='));
        assert!(is_valid_code_challenge(&challenge));
    }

    #[test]
    fn test_s256_known_answer_rfc7636_appendix_b() {
        assert_eq!(
            compute_code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    // -----------------------------------------------------------------------
    // generate_pkce_params() / validate_code_verifier()
    // -----------------------------------------------------------------------

    #[test]
    fn test_generate_pkce_params_pairs_match() {
        let pkce = generate_pkce_params();
        assert_eq!(pkce.code_challenge_method, "S256");
        assert!(validate_code_verifier(
            &pkce.code_verifier,
            &pkce.code_challenge
        ));
    }

    #[test]
    fn test_validate_code_verifier_agrees_with_compute() {
        let a = generate_pkce_params();
        let b = generate_pkce_params();
        for (verifier, challenge) in [
            (&a.code_verifier, &a.code_challenge),
            (&a.code_verifier, &b.code_challenge),
            (&b.code_verifier, &a.code_challenge),
        ] {
            assert_eq!(
                validate_code_verifier(verifier, challenge),
                compute_code_challenge(verifier) == *challenge
            );
        }
    }

    #[test]
    fn test_validate_code_verifier_rejects_truncated_challenge() {
        let pkce = generate_pkce_params();
        assert!(!validate_code_verifier(
            &pkce.code_verifier,
            &pkce.code_challenge[..42]
        ));
    }

    // -----------------------------------------------------------------------
    // Format checks
    // -----------------------------------------------------------------------

    #[test]
    fn test_is_valid_code_verifier_length_boundaries() {
        assert!(!is_valid_code_verifier(&"a".repeat(42)));
        assert!(is_valid_code_verifier(&"a".repeat(43)));
        assert!(is_valid_code_verifier(&"a".repeat(128)));
        assert!(!is_valid_code_verifier(&"a".repeat(129)));
    }

    #[test]
    fn test_is_valid_code_verifier_rejects_disallowed_characters() {
        let base = "a".repeat(50);
        for bad in ['+', '/', '=', ' ', '!', 'é'] {
            let candidate = format!("{base}{bad}");
            assert!(
                !is_valid_code_verifier(&candidate),
                "character {bad:?} must be rejected"
            );
        }
        assert!(is_valid_code_verifier(&format!("{base}-._~")));
    }

    #[test]
    fn test_is_valid_code_challenge_rejects_wrong_length_or_alphabet() {
        assert!(!is_valid_code_challenge(&"A".repeat(42)));
        assert!(!is_valid_code_challenge(&"A".repeat(44)));
        assert!(!is_valid_code_challenge(&format!("{}+", "A".repeat(42))));
        assert!(!is_valid_code_challenge(&format!("{}=", "A".repeat(42))));
        assert!(is_valid_code_challenge(&format!("{}-_", "A".repeat(41))));
    }

    // -----------------------------------------------------------------------
    // State / nonce
    // -----------------------------------------------------------------------

    #[test]
    fn test_generate_state_is_32_bytes_base64url() {
        let state = generate_state();
        // 32 bytes -> 43 unpadded base64url characters
        assert_eq!(state.len(), 43);
        assert!(state
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(&state)
            .expect("state must be valid base64url");
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn test_generate_state_and_nonce_are_unique() {
        assert_ne!(generate_state(), generate_state());
        assert_ne!(generate_nonce(), generate_nonce());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("hello", "hello"));
        assert!(!constant_time_eq("hello", "world"));
        assert!(!constant_time_eq("hello", "hell"));
        assert!(constant_time_eq("", ""));
        assert!(!constant_time_eq("", "a"));
        assert!(!constant_time_eq("abc", "abd"));
    }
}
