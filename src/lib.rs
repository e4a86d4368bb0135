//! pdfveil core library.
//!
//! This crate provides the core primitives for pdfveil:
//! - VEIL container format v1 (metadata segment + body segment)
//! - PBKDF2-HMAC-SHA256 key derivation, one salt and key per segment
//! - AES-256-GCM segment encryption, HMAC-SHA256 for plaintext metadata
//! - Password-strength gate for the encrypt path
//! - PDF document collaborator (Info dictionary split / splice)
//! - Staged, atomic file output with guaranteed temp cleanup

pub mod config;
pub mod container;
pub mod crypto;
pub mod document;
pub mod error;
pub mod pipeline;
pub mod secure_fs;
pub mod strength;

use std::path::{Path, PathBuf};

pub use config::{DecryptOptions, EncryptOptions, MetadataMode, StrengthPolicy};
pub use container::Container;
pub use crypto::KdfParams;
pub use document::{DocumentFormat, PdfDocument};
pub use error::{Error, Result};

/// Encrypt a PDF file into a `.veil` container. Returns the output path.
///
/// This function:
/// 1) Splits the PDF into body and metadata
/// 2) Derives one key per segment and seals both
/// 3) Writes the container atomically
pub fn encrypt(document_path: impl AsRef<Path>, password: &str, options: &EncryptOptions) -> Result<PathBuf> {
    pipeline::encrypt_file(&PdfDocument, document_path.as_ref(), password, options)
}

/// Decrypt a `.veil` container back into a PDF file. Returns the output path.
///
/// Nothing is written under the final name unless both segments verify and
/// the reassembled document passes the signature check.
pub fn decrypt(container_path: impl AsRef<Path>, password: &str, options: &DecryptOptions) -> Result<PathBuf> {
    pipeline::decrypt_file(&PdfDocument, container_path.as_ref(), password, options)
}
