//! PKCE (Proof Key for Code Exchange) engine
//!
//! Implements RFC 7636: verifier/challenge generation for the authorization
//! request and challenge verification for testing and diagnostics. Pure and
//! stateless; nothing is retained between calls.

use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::PkceError;

/// Unreserved characters permitted in a code verifier (RFC 7636 §4.1).
const VERIFIER_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// RFC 7636 verifier length bounds.
const VERIFIER_MIN_LEN: u64 = 43;
const VERIFIER_MAX_LEN: u64 = 128;

/// Code challenge transformation negotiated with the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeChallengeMethod {
    /// `BASE64URL(SHA256(verifier))`; the only method this client offers
    S256,
    /// Challenge equals the verifier; accepted for verification only
    Plain,
}

impl CodeChallengeMethod {
    /// Wire representation used in `code_challenge_method`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::S256 => "S256",
            Self::Plain => "plain",
        }
    }
}

impl FromStr for CodeChallengeMethod {
    type Err = PkceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S256" => Ok(Self::S256),
            "plain" => Ok(Self::Plain),
            other => Err(PkceError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// Fill `buf` from the OS entropy source.
fn secure_random(buf: &mut [u8]) -> Result<(), PkceError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| PkceError::EntropySourceUnavailable(e.to_string()))
}

/// Generate a cryptographically random code verifier
///
/// The length is chosen uniformly from the RFC 7636 range [43, 128] and every
/// character is drawn from the unreserved set `A-Za-z0-9-._~`.
///
/// # Errors
/// Returns [`PkceError::EntropySourceUnavailable`] if the OS random source
/// cannot be read.
pub fn generate_code_verifier() -> Result<String, PkceError> {
    let mut len_bytes = [0u8; 8];
    secure_random(&mut len_bytes)?;
    let span = VERIFIER_MAX_LEN - VERIFIER_MIN_LEN + 1;
    let len = (VERIFIER_MIN_LEN + u64::from_le_bytes(len_bytes) % span) as usize;

    // Rejection sampling: bytes at or past the largest multiple of the
    // charset size are discarded, keeping every character equally likely.
    let charset_len = VERIFIER_CHARSET.len() as u8;
    let zone = u8::MAX - u8::MAX % charset_len;

    let mut verifier = String::with_capacity(len);
    let mut buf = [0u8; 128];
    while verifier.len() < len {
        secure_random(&mut buf)?;
        for byte in buf {
            if byte < zone {
                verifier.push(VERIFIER_CHARSET[(byte % charset_len) as usize] as char);
                if verifier.len() == len {
                    break;
                }
            }
        }
    }

    Ok(verifier)
}

/// Compute the S256 code challenge for a verifier
///
/// Per RFC 7636, the challenge is `BASE64URL(SHA256(ASCII(code_verifier)))`
/// without padding.
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate a random state nonce for CSRF protection
///
/// 32 random bytes, base64url encoded (43 characters, >128 bits of entropy).
///
/// # Errors
/// Returns [`PkceError::EntropySourceUnavailable`] if the OS random source
/// cannot be read.
pub fn generate_state() -> Result<String, PkceError> {
    let mut raw = [0u8; 32];
    secure_random(&mut raw)?;
    Ok(URL_SAFE_NO_PAD.encode(raw))
}

/// Verify that a verifier reproduces the given challenge under `method`
///
/// Recomputes the challenge and compares in constant time. There is no
/// fallback between methods: the caller's expectation is always honored.
///
/// # Errors
/// Never fails for the supported methods; the `Result` exists so that callers
/// parsing a method string with [`CodeChallengeMethod::from_str`] keep a
/// single error path for unknown methods.
pub fn verify(
    verifier: &str,
    challenge: &str,
    method: CodeChallengeMethod,
) -> Result<bool, PkceError> {
    let expected = match method {
        CodeChallengeMethod::S256 => generate_code_challenge(verifier),
        CodeChallengeMethod::Plain => verifier.to_string(),
    };
    Ok(constant_time_eq(expected.as_bytes(), challenge.as_bytes()))
}

/// Byte comparison that does not short-circuit on the first mismatch.
///
/// Length is not secret for challenges and states, so a length mismatch may
/// return early.
#[must_use]
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// PKCE pair for one authorization attempt
///
/// The verifier is kept secret until token exchange; the challenge is sent in
/// the authorization request for server-side validation.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// Random string (43-128 chars over the unreserved set), kept secret
    pub code_verifier: String,

    /// SHA256 hash of the verifier, base64url encoded
    pub code_challenge: String,
}

impl PkceChallenge {
    /// Generate a fresh verifier/challenge pair.
    ///
    /// # Errors
    /// Returns [`PkceError::EntropySourceUnavailable`] if no secure random
    /// source exists.
    pub fn generate() -> Result<Self, PkceError> {
        let code_verifier = generate_code_verifier()?;
        let code_challenge = generate_code_challenge(&code_verifier);
        Ok(Self { code_verifier, code_challenge })
    }

    /// Challenge method advertised to the server (always `S256`).
    #[must_use]
    pub fn challenge_method(&self) -> CodeChallengeMethod {
        CodeChallengeMethod::S256
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the PKCE engine.
    use super::*;

    #[test]
    fn verifier_length_and_charset() {
        for _ in 0..32 {
            let verifier = generate_code_verifier().expect("entropy available");
            assert!(
                (43..=128).contains(&verifier.len()),
                "verifier length out of range: {}",
                verifier.len()
            );
            assert!(verifier
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')));
        }
    }

    /// With ~4000 sampled characters, every one of the 66 charset members
    /// should appear; a sampler that skews or drops part of the charset
    /// fails this with overwhelming probability.
    #[test]
    fn verifier_sampling_covers_the_whole_charset() {
        let mut seen = [false; VERIFIER_CHARSET.len()];
        for _ in 0..48 {
            let verifier = generate_code_verifier().expect("entropy available");
            for byte in verifier.bytes() {
                let index = VERIFIER_CHARSET
                    .iter()
                    .position(|c| *c == byte)
                    .expect("verifier chars come from the charset");
                seen[index] = true;
            }
        }
        assert!(seen.iter().all(|hit| *hit), "some charset characters never sampled");
    }

    #[test]
    fn generated_pairs_verify_under_s256() {
        let pair = PkceChallenge::generate().expect("entropy available");
        assert!(verify(&pair.code_verifier, &pair.code_challenge, CodeChallengeMethod::S256)
            .expect("supported method"));
    }

    /// Any single-character mutation of the challenge must fail verification.
    #[test]
    fn mutated_challenge_fails_verification() {
        let pair = PkceChallenge::generate().expect("entropy available");

        for i in 0..pair.code_challenge.len() {
            let mut mutated: Vec<u8> = pair.code_challenge.bytes().collect();
            mutated[i] = if mutated[i] == b'A' { b'B' } else { b'A' };
            let mutated = String::from_utf8(mutated).unwrap();
            if mutated == pair.code_challenge {
                continue;
            }

            assert!(
                !verify(&pair.code_verifier, &mutated, CodeChallengeMethod::S256).unwrap(),
                "mutation at index {i} unexpectedly verified"
            );
        }
    }

    #[test]
    fn plain_method_compares_verbatim() {
        assert!(verify("secret-verifier-value", "secret-verifier-value", CodeChallengeMethod::Plain)
            .unwrap());
        assert!(!verify("secret-verifier-value", "something-else", CodeChallengeMethod::Plain)
            .unwrap());
    }

    #[test]
    fn unknown_method_is_rejected() {
        let result = "S512".parse::<CodeChallengeMethod>();
        assert!(matches!(result, Err(PkceError::UnsupportedMethod(m)) if m == "S512"));
    }

    #[test]
    fn challenge_is_deterministic() {
        let pair = PkceChallenge::generate().expect("entropy available");
        assert_eq!(pair.code_challenge, generate_code_challenge(&pair.code_verifier));
    }

    #[test]
    fn generated_values_are_unique() {
        let a = PkceChallenge::generate().unwrap();
        let b = PkceChallenge::generate().unwrap();
        assert_ne!(a.code_verifier, b.code_verifier);
        assert_ne!(a.code_challenge, b.code_challenge);

        let s1 = generate_state().unwrap();
        let s2 = generate_state().unwrap();
        assert_ne!(s1, s2);
        assert!(s1.len() >= 43);
    }

    #[test]
    fn base64url_output_has_no_padding_or_unsafe_chars() {
        let pair = PkceChallenge::generate().unwrap();
        let state = generate_state().unwrap();

        for value in [&pair.code_challenge, &state] {
            assert!(!value.contains('='));
            assert!(!value.contains('+'));
            assert!(!value.contains('/'));
        }
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }
}
