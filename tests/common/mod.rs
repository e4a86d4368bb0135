#![allow(dead_code)]

use pdfveil::document::Extracted;
use pdfveil::{DecryptOptions, DocumentFormat, EncryptOptions, Error, KdfParams, MetadataMode, Result};

pub const PASSWORD: &str = "Sw0rdFish!2024";

pub const SAMPLE_PDF: &[u8] = b"%PDF-1.7\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n\
3 0 obj\n<< /Title (Board minutes) /Author (J. Doe) /CreationDate (D:20240101120000Z) >>\nendobj\n\
xref\n0 4\n0000000000 65535 f \n\
trailer\n<< /Root 1 0 R /Info 3 0 R /Size 4 >>\nstartxref\n0\n%%EOF\n";

/// Keeps tests fast; production callers use `KdfParams::recommended()`.
pub fn fast_kdf() -> KdfParams {
    KdfParams { iterations: 1_000 }
}

pub fn enc_opts(mode: MetadataMode) -> EncryptOptions {
    EncryptOptions {
        metadata_mode: mode,
        kdf: fast_kdf(),
        skip_strength_check: true,
        ..Default::default()
    }
}

pub fn dec_opts() -> DecryptOptions {
    DecryptOptions {
        kdf: fast_kdf(),
        ..Default::default()
    }
}

pub fn body_100() -> Vec<u8> {
    (0..100u8).map(|i| i.wrapping_mul(37)).collect()
}

/// Minimal format: `RAW\n<metadata>\n<body>`. Metadata must not contain `\n`.
pub struct RawFormat;

pub const RAW_SIGNATURE: &[u8] = b"RAW\n";

impl RawFormat {
    pub fn compose(body: &[u8], metadata: &[u8]) -> Vec<u8> {
        let mut out = RAW_SIGNATURE.to_vec();
        out.extend_from_slice(metadata);
        out.push(b'\n');
        out.extend_from_slice(body);
        out
    }
}

impl DocumentFormat for RawFormat {
    fn extension(&self) -> &'static str {
        "raw"
    }

    fn is_valid_document(&self, bytes: &[u8]) -> bool {
        bytes.starts_with(RAW_SIGNATURE)
    }

    fn extract(&self, document: &[u8]) -> Result<Extracted> {
        let rest = &document[RAW_SIGNATURE.len()..];
        let split = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| Error::InvalidInputFormat("missing metadata line".into()))?;
        Ok(Extracted {
            metadata: rest[..split].to_vec(),
            body: rest[split + 1..].to_vec(),
        })
    }

    fn reassemble(&self, body: &[u8], metadata: &[u8]) -> Result<Vec<u8>> {
        Ok(Self::compose(body, metadata))
    }
}

/// Extracts like [`RawFormat`] but reassembles without the signature.
pub struct UnsignedReassembly;

impl DocumentFormat for UnsignedReassembly {
    fn extension(&self) -> &'static str {
        "raw"
    }

    fn is_valid_document(&self, bytes: &[u8]) -> bool {
        RawFormat.is_valid_document(bytes)
    }

    fn extract(&self, document: &[u8]) -> Result<Extracted> {
        RawFormat.extract(document)
    }

    fn reassemble(&self, body: &[u8], _metadata: &[u8]) -> Result<Vec<u8>> {
        Ok(body.to_vec())
    }
}

/// Extracts like [`RawFormat`] but reassembly always errors.
pub struct FailingReassembly;

impl DocumentFormat for FailingReassembly {
    fn extension(&self) -> &'static str {
        "raw"
    }

    fn is_valid_document(&self, bytes: &[u8]) -> bool {
        RawFormat.is_valid_document(bytes)
    }

    fn extract(&self, document: &[u8]) -> Result<Extracted> {
        RawFormat.extract(document)
    }

    fn reassemble(&self, _body: &[u8], _metadata: &[u8]) -> Result<Vec<u8>> {
        Err(Error::Metadata("unsupported layout".into()))
    }
}

pub fn tmp_leftovers(dir: &std::path::Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.contains(".tmp."))
        .collect()
}
