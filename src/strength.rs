//! Password-strength gate for the encrypt path.
//!
//! This is a heuristic, not an entropy estimate. It never runs on decrypt:
//! wrong passwords there must fail at AEAD verification.

use crate::config::StrengthPolicy;
use crate::error::{Error, Result};

pub const MIN_LEN: usize = 8;

/// Which character-class checks a password failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Weakness {
    pub too_short: bool,
    pub no_lowercase: bool,
    pub no_uppercase: bool,
    pub no_digit: bool,
    pub no_symbol: bool,
}

impl Weakness {
    pub fn is_empty(&self) -> bool {
        *self == Weakness::default()
    }

    /// Human-readable list, e.g. "8+ characters, digit".
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if self.too_short {
            parts.push(format!("{MIN_LEN}+ characters"));
        }
        if self.no_lowercase {
            parts.push("lowercase letter".to_string());
        }
        if self.no_uppercase {
            parts.push("uppercase letter".to_string());
        }
        if self.no_digit {
            parts.push("digit".to_string());
        }
        if self.no_symbol {
            parts.push("symbol".to_string());
        }
        parts.join(", ")
    }
}

pub fn assess(password: &str) -> Weakness {
    Weakness {
        too_short: password.chars().count() < MIN_LEN,
        no_lowercase: !password.chars().any(|c| c.is_lowercase()),
        no_uppercase: !password.chars().any(|c| c.is_uppercase()),
        no_digit: !password.chars().any(|c| c.is_ascii_digit()),
        no_symbol: !password
            .chars()
            .any(|c| !c.is_alphanumeric() && !c.is_whitespace()),
    }
}

pub fn is_strong(password: &str) -> bool {
    assess(password).is_empty()
}

/// Apply the gate. `Ok(())` means derivation may proceed.
pub fn enforce(password: &str, policy: StrengthPolicy) -> Result<()> {
    let weakness = assess(password);
    if weakness.is_empty() {
        return Ok(());
    }
    match policy {
        StrengthPolicy::Proceed => {
            tracing::warn!(missing = %weakness.describe(), "proceeding with weak password");
            Ok(())
        }
        StrengthPolicy::Reject => Err(Error::WeakPassword {
            missing: weakness.describe(),
            confirmable: false,
        }),
        StrengthPolicy::PromptCaller => Err(Error::WeakPassword {
            missing: weakness.describe(),
            confirmable: true,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_password_passes() {
        assert!(is_strong("Sw0rdFish!2024"));
        enforce("Sw0rdFish!2024", StrengthPolicy::Reject).unwrap();
    }

    #[test]
    fn each_class_is_reported() {
        let w = assess("abc");
        assert!(w.too_short && w.no_uppercase && w.no_digit && w.no_symbol);
        assert!(!w.no_lowercase);
        assert_eq!(w.describe(), "8+ characters, uppercase letter, digit, symbol");
    }

    #[test]
    fn policy_controls_outcome() {
        enforce("password", StrengthPolicy::Proceed).unwrap();

        match enforce("password", StrengthPolicy::Reject) {
            Err(Error::WeakPassword { confirmable, .. }) => assert!(!confirmable),
            other => panic!("unexpected: {other:?}"),
        }
        match enforce("password", StrengthPolicy::PromptCaller) {
            Err(Error::WeakPassword { confirmable, .. }) => assert!(confirmable),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn whitespace_is_not_a_symbol() {
        assert!(assess("Abcdefg1 ").no_symbol);
    }
}
