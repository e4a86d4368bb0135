use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::crypto::KdfParams;

/// How the metadata segment is protected inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MetadataMode {
    /// AEAD-encrypted, like the body.
    #[default]
    Encrypted,
    /// Stored in the clear with an HMAC-SHA256 tag.
    PlaintextWithMac,
}

impl MetadataMode {
    pub fn to_byte(self) -> u8 {
        match self {
            MetadataMode::Encrypted => 0x01,
            MetadataMode::PlaintextWithMac => 0x00,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(MetadataMode::Encrypted),
            0x00 => Some(MetadataMode::PlaintextWithMac),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataMode::Encrypted => "encrypted",
            MetadataMode::PlaintextWithMac => "plaintext+mac",
        }
    }
}

/// What encrypt does with a password that fails the strength gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StrengthPolicy {
    /// Log a warning and keep going.
    Proceed,
    /// Fail with a non-confirmable `WeakPassword`.
    Reject,
    /// Fail with a confirmable `WeakPassword`; the caller may ask the user
    /// and retry with `skip_strength_check`.
    #[default]
    PromptCaller,
}

/// Options for a single encrypt call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptOptions {
    /// Replace an existing destination file.
    pub force_overwrite: bool,

    /// Explicit destination; defaults to the input with a `.veil` extension.
    pub output_path: Option<PathBuf>,

    pub metadata_mode: MetadataMode,

    /// PBKDF2 cost. Not stored in the container.
    pub kdf: KdfParams,

    /// Bypass the strength gate entirely (tests, non-interactive callers).
    pub skip_strength_check: bool,

    pub strength_policy: StrengthPolicy,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            force_overwrite: false,
            output_path: None,
            metadata_mode: MetadataMode::default(),
            kdf: KdfParams::recommended(),
            skip_strength_check: false,
            strength_policy: StrengthPolicy::default(),
        }
    }
}

/// Options for a single decrypt call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptOptions {
    pub force_overwrite: bool,

    /// Explicit destination; defaults to the input with `.veil` stripped.
    pub output_path: Option<PathBuf>,

    /// Must match the cost used when the container was written.
    pub kdf: KdfParams,

    /// Re-read the staged output and check its signature before publishing.
    pub validate_content: bool,
}

impl Default for DecryptOptions {
    fn default() -> Self {
        Self {
            force_overwrite: false,
            output_path: None,
            kdf: KdfParams::recommended(),
            validate_content: true,
        }
    }
}

impl DecryptOptions {
    /// Convenience: same KDF cost as the encrypt options that produced the container.
    pub fn matching(enc: &EncryptOptions) -> Self {
        Self {
            kdf: enc.kdf.clone(),
            ..Default::default()
        }
    }
}
