//! Secure random identifiers and passwords

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use super::types::SecretString;
use crate::error::{BrokerError, Result};

const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!@#$%^&*()-_=+[]{}:;,.?/~";

/// Alphabet of account identifiers
const IDENTIFIER_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ1234567890";

/// Give up after this many draws that miss a required character class
const MAX_POLICY_ROUNDS: usize = 64;

/// Rules for generated passwords
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordPolicy {
    /// Number of characters
    pub length: usize,
    /// Include symbols in addition to letters and digits
    pub symbols: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            length: 30,
            symbols: true,
        }
    }
}

impl PasswordPolicy {
    /// Create a policy with the given length and symbols enabled
    pub fn with_length(length: usize) -> Self {
        Self {
            length,
            ..Self::default()
        }
    }

    fn classes(&self) -> Vec<&'static [u8]> {
        let mut classes = vec![UPPER, LOWER, DIGITS];
        if self.symbols {
            classes.push(SYMBOLS);
        }
        classes
    }
}

/// Source of account passwords
pub trait PasswordGenerator: Send + Sync {
    /// Generate a password satisfying `policy`
    fn generate(&self, policy: &PasswordPolicy) -> Result<SecretString>;
}

/// Password generator backed by the operating system RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRngPasswordGenerator;

impl PasswordGenerator for OsRngPasswordGenerator {
    fn generate(&self, policy: &PasswordPolicy) -> Result<SecretString> {
        let classes = policy.classes();
        if policy.length < classes.len() {
            return Err(BrokerError::InvalidSettings(format!(
                "password length {} cannot cover {} character classes",
                policy.length,
                classes.len()
            )));
        }

        let alphabet: Vec<u8> = classes.iter().flat_map(|c| c.iter().copied()).collect();

        for _ in 0..MAX_POLICY_ROUNDS {
            let candidate = SecretString::new(sample(&alphabet, policy.length)?);
            let satisfied = classes
                .iter()
                .all(|class| candidate.expose().bytes().any(|b| class.contains(&b)));
            if satisfied {
                return Ok(candidate);
            }
        }

        Err(BrokerError::Random(
            "could not draw a password covering every character class".to_string(),
        ))
    }
}

/// Generate a random identifier of `len` characters from `[A-Z0-9]`
pub fn random_identifier(len: usize) -> Result<String> {
    sample(IDENTIFIER_ALPHABET, len)
}

/// Draw `len` characters uniformly from `alphabet` using rejection sampling
fn sample(alphabet: &[u8], len: usize) -> Result<String> {
    debug_assert!(!alphabet.is_empty() && alphabet.len() <= 256);

    // Largest multiple of the alphabet size that fits in a byte
    let limit = 256 - (256 % alphabet.len());
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 64];

    while out.len() < len {
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| BrokerError::Random(e.to_string()))?;

        for &byte in buf.iter() {
            if (byte as usize) < limit {
                out.push(alphabet[byte as usize % alphabet.len()] as char);
                if out.len() == len {
                    break;
                }
            }
        }
    }

    buf.zeroize();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_identifier_shape() {
        let id = random_identifier(10).unwrap();
        assert_eq!(id.len(), 10);
        assert!(id.bytes().all(|b| IDENTIFIER_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_random_identifiers_differ() {
        let a = random_identifier(10).unwrap();
        let b = random_identifier(10).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_password_covers_classes() {
        let policy = PasswordPolicy::default();
        let password = OsRngPasswordGenerator.generate(&policy).unwrap();
        let value = password.expose();

        assert_eq!(value.len(), 30);
        assert!(value.bytes().any(|b| b.is_ascii_uppercase()));
        assert!(value.bytes().any(|b| b.is_ascii_lowercase()));
        assert!(value.bytes().any(|b| b.is_ascii_digit()));
        assert!(value.bytes().any(|b| SYMBOLS.contains(&b)));
    }

    #[test]
    fn test_password_without_symbols() {
        let policy = PasswordPolicy {
            length: 16,
            symbols: false,
        };
        let password = OsRngPasswordGenerator.generate(&policy).unwrap();
        assert!(password.expose().bytes().all(|b| b.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_password_too_short_for_policy() {
        let policy = PasswordPolicy::with_length(3);
        let result = OsRngPasswordGenerator.generate(&policy);
        assert!(matches!(result, Err(BrokerError::InvalidSettings(_))));
    }
}
