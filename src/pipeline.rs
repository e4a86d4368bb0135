//! Encrypt and decrypt pipelines.
//!
//! Both follow `Start -> Prepared -> KeysDerived -> SegmentsProcessed ->
//! ContentValidated -> Written`; any step may fail, and each call returns
//! exactly one `Ok(output_path)` or `Err(reason)`.

use std::path::{Path, PathBuf};

use zeroize::Zeroizing;

use crate::config::{DecryptOptions, EncryptOptions, MetadataMode};
use crate::container::{CipherSegment, Container, MetadataSegment, PlaintextSegment};
use crate::crypto::{self, KdfParams, SegmentKey, NONCE_LEN, SALT_LEN};
use crate::document::DocumentFormat;
use crate::error::{Error, Result};
use crate::secure_fs::{self, StagedFile};
use crate::strength;

pub const CONTAINER_EXTENSION: &str = "veil";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Prepared,
    KeysDerived,
    SegmentsProcessed,
    ContentValidated,
    Written,
}

fn enter(stage: Stage) {
    tracing::debug!(?stage, "pipeline stage");
}

/// Result of opening a container in memory.
pub struct Recovered {
    pub document: Zeroizing<Vec<u8>>,
    pub metadata: Zeroizing<Vec<u8>>,
    pub metadata_mode: MetadataMode,
}

impl std::fmt::Debug for Recovered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recovered")
            .field("document", &format_args!("<{} bytes>", self.document.len()))
            .field("metadata", &format_args!("<{} bytes>", self.metadata.len()))
            .field("metadata_mode", &self.metadata_mode)
            .finish()
    }
}

/// Seal `plaintext` into a segment under a fresh random nonce.
fn seal_segment(key: &SegmentKey, salt: [u8; SALT_LEN], plaintext: &[u8]) -> Result<CipherSegment> {
    let nonce: [u8; NONCE_LEN] = crypto::random_bytes()?;
    let (ciphertext, tag) = crypto::seal(key, &nonce, plaintext)?;
    Ok(CipherSegment {
        salt,
        nonce,
        ciphertext,
        tag,
    })
}

fn open_segment(key: &SegmentKey, seg: &CipherSegment) -> Result<Zeroizing<Vec<u8>>> {
    crypto::open(key, &seg.nonce, &seg.ciphertext, &seg.tag)
}

/// Two independent salts; the metadata salt is redrawn on the (negligible)
/// chance it equals the body salt.
fn fresh_salts() -> Result<([u8; SALT_LEN], [u8; SALT_LEN])> {
    let body: [u8; SALT_LEN] = crypto::random_bytes()?;
    loop {
        let meta: [u8; SALT_LEN] = crypto::random_bytes()?;
        if meta != body {
            return Ok((meta, body));
        }
    }
}

/// In-memory encrypt: document bytes in, container out.
pub fn seal_document<D: DocumentFormat + ?Sized>(
    format: &D,
    document: &[u8],
    password: &str,
    opts: &EncryptOptions,
) -> Result<Container> {
    enter(Stage::Start);
    opts.kdf.validate()?;
    if !opts.skip_strength_check {
        strength::enforce(password, opts.strength_policy)?;
    }
    if !format.is_valid_document(document) {
        return Err(Error::InvalidInputFormat(format!(
            "not a {} document (bad signature)",
            format.extension()
        )));
    }

    let extracted = format.extract(document)?;
    let body_bytes = Zeroizing::new(extracted.body);
    let metadata_bytes = Zeroizing::new(extracted.metadata);
    enter(Stage::Prepared);

    let (meta_salt, body_salt) = fresh_salts()?;
    let meta_key = crypto::derive_key(password, &meta_salt, &opts.kdf)?;
    let body_key = crypto::derive_key(password, &body_salt, &opts.kdf)?;
    enter(Stage::KeysDerived);

    let metadata = match opts.metadata_mode {
        MetadataMode::Encrypted => {
            MetadataSegment::Encrypted(seal_segment(&meta_key, meta_salt, &metadata_bytes)?)
        }
        MetadataMode::PlaintextWithMac => MetadataSegment::PlaintextWithMac(PlaintextSegment {
            salt: meta_salt,
            mac: crypto::metadata_mac(&meta_key, &metadata_bytes)?,
            plaintext: metadata_bytes.to_vec(),
        }),
    };
    let body = seal_segment(&body_key, body_salt, &body_bytes)?;
    enter(Stage::SegmentsProcessed);

    Ok(Container { metadata, body })
}

/// In-memory decrypt: container bytes in, reassembled document out.
///
/// Authentication failures are indistinguishable between segments.
pub fn open_container<D: DocumentFormat + ?Sized>(
    format: &D,
    bytes: &[u8],
    password: &str,
    kdf: &KdfParams,
) -> Result<Recovered> {
    enter(Stage::Start);
    kdf.validate()?;
    let container = Container::decode(bytes)?;
    enter(Stage::Prepared);

    let metadata_mode = container.metadata_mode();
    let meta_key = crypto::derive_key(password, container.metadata.salt(), kdf)?;
    let body_key = crypto::derive_key(password, &container.body.salt, kdf)?;
    enter(Stage::KeysDerived);

    let metadata = match &container.metadata {
        MetadataSegment::Encrypted(seg) => open_segment(&meta_key, seg)?,
        MetadataSegment::PlaintextWithMac(seg) => {
            crypto::verify_metadata_mac(&meta_key, &seg.plaintext, &seg.mac)?;
            Zeroizing::new(seg.plaintext.clone())
        }
    };
    let body = open_segment(&body_key, &container.body)?;
    enter(Stage::SegmentsProcessed);

    // Reassembly is a collaborator; a bug there must not pass as success.
    let document = Zeroizing::new(
        format
            .reassemble(&body, &metadata)
            .map_err(|e| Error::ContentIntegrityFailure(format!("reassembly failed: {e}")))?,
    );
    if !format.is_valid_document(&document) {
        return Err(Error::ContentIntegrityFailure(format!(
            "reassembled output is not a {} document",
            format.extension()
        )));
    }
    enter(Stage::ContentValidated);

    Ok(Recovered {
        document,
        metadata,
        metadata_mode,
    })
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case(ext))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// `report.pdf` -> `report.veil`
pub fn default_encrypt_output(input: &Path) -> PathBuf {
    input.with_extension(CONTAINER_EXTENSION)
}

/// `report.veil` -> `report.pdf`, `report.pdf.veil` -> `report.pdf`,
/// anything else -> `<input>.decrypted.pdf`.
pub fn default_decrypt_output(input: &Path, doc_ext: &str) -> PathBuf {
    if has_extension(input, CONTAINER_EXTENSION) {
        let stripped = input.with_extension("");
        if has_extension(&stripped, doc_ext) {
            stripped
        } else {
            with_suffix(&stripped, &format!(".{doc_ext}"))
        }
    } else {
        with_suffix(input, &format!(".decrypted.{doc_ext}"))
    }
}

fn resolve_output(input: &Path, explicit: Option<&PathBuf>, default: PathBuf) -> Result<PathBuf> {
    let dest = explicit.cloned().unwrap_or(default);
    if dest == input {
        return Err(Error::InvalidOptions(format!(
            "output path equals input path: {}",
            dest.display()
        )));
    }
    Ok(dest)
}

/// Encrypt the document at `input` into a container file.
pub fn encrypt_file<D: DocumentFormat + ?Sized>(
    format: &D,
    input: &Path,
    password: &str,
    opts: &EncryptOptions,
) -> Result<PathBuf> {
    let span = tracing::debug_span!("encrypt", input = %input.display());
    let _guard = span.enter();

    run_encrypt(format, input, password, opts)
        .inspect(|dest| {
            tracing::info!(output = %dest.display(), mode = opts.metadata_mode.as_str(), "encrypted")
        })
        .inspect_err(|e| tracing::debug!(kind = e.kind(), "encrypt failed"))
}

fn run_encrypt<D: DocumentFormat + ?Sized>(
    format: &D,
    input: &Path,
    password: &str,
    opts: &EncryptOptions,
) -> Result<PathBuf> {
    opts.kdf.validate()?;
    if !has_extension(input, format.extension()) {
        return Err(Error::InvalidInputFormat(format!(
            "{} does not have a .{} extension",
            input.display(),
            format.extension()
        )));
    }

    let dest = resolve_output(input, opts.output_path.as_ref(), default_encrypt_output(input))?;
    secure_fs::ensure_writable(&dest, opts.force_overwrite)?;

    let document = Zeroizing::new(std::fs::read(input).map_err(|e| Error::io(input, e))?);
    let container = seal_document(format, &document, password, opts)?;
    let bytes = container.encode()?;
    enter(Stage::ContentValidated);

    secure_fs::write_atomic(&dest, &bytes, false, opts.force_overwrite)?;
    enter(Stage::Written);
    Ok(dest)
}

/// Decrypt the container at `input` back into a document file.
pub fn decrypt_file<D: DocumentFormat + ?Sized>(
    format: &D,
    input: &Path,
    password: &str,
    opts: &DecryptOptions,
) -> Result<PathBuf> {
    let span = tracing::debug_span!("decrypt", input = %input.display());
    let _guard = span.enter();

    run_decrypt(format, input, password, opts)
        .inspect(|dest| tracing::info!(output = %dest.display(), "decrypted"))
        .inspect_err(|e| tracing::debug!(kind = e.kind(), "decrypt failed"))
}

fn run_decrypt<D: DocumentFormat + ?Sized>(
    format: &D,
    input: &Path,
    password: &str,
    opts: &DecryptOptions,
) -> Result<PathBuf> {
    opts.kdf.validate()?;
    let dest = resolve_output(
        input,
        opts.output_path.as_ref(),
        default_decrypt_output(input, format.extension()),
    )?;
    secure_fs::ensure_writable(&dest, opts.force_overwrite)?;

    let bytes = std::fs::read(input).map_err(|e| Error::io(input, e))?;
    let recovered = open_container(format, &bytes, password, &opts.kdf)?;

    // The guard removes the temp file on every return below.
    let staged = StagedFile::stage(&dest, &recovered.document, true)?;
    if opts.validate_content {
        let written = Zeroizing::new(staged.read_back()?);
        if written.len() != recovered.document.len() || !format.is_valid_document(&written) {
            return Err(Error::ContentIntegrityFailure(
                "staged output does not match the reassembled document".into(),
            ));
        }
    }
    staged.publish(&dest, opts.force_overwrite)?;
    enter(Stage::Written);
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::{self, Layer, SubscriberExt};

    use super::*;
    use crate::document::PdfDocument;

    #[test]
    fn default_outputs() {
        assert_eq!(
            default_encrypt_output(Path::new("dir/report.pdf")),
            PathBuf::from("dir/report.veil")
        );
        assert_eq!(
            default_decrypt_output(Path::new("dir/report.veil"), "pdf"),
            PathBuf::from("dir/report.pdf")
        );
        assert_eq!(
            default_decrypt_output(Path::new("report.pdf.veil"), "pdf"),
            PathBuf::from("report.pdf")
        );
        assert_eq!(
            default_decrypt_output(Path::new("x.tar.VEIL"), "pdf"),
            PathBuf::from("x.tar.pdf")
        );
        assert_eq!(
            default_decrypt_output(Path::new("blob.bin"), "pdf"),
            PathBuf::from("blob.bin.decrypted.pdf")
        );
    }

    #[test]
    fn salts_are_distinct() {
        let (m, b) = fresh_salts().unwrap();
        assert_ne!(m, b);
    }

    /// Collects the `stage` field of every event.
    struct StageLog(Arc<Mutex<Vec<String>>>);

    impl<S: tracing::Subscriber> Layer<S> for StageLog {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: layer::Context<'_, S>) {
            struct Find(Option<String>);
            impl Visit for Find {
                fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
                    if field.name() == "stage" {
                        self.0 = Some(format!("{value:?}"));
                    }
                }
            }
            let mut find = Find(None);
            event.record(&mut find);
            if let Some(stage) = find.0 {
                self.0.lock().unwrap().push(stage);
            }
        }
    }

    fn stages_of<T>(f: impl FnOnce() -> T) -> (T, Vec<String>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(StageLog(log.clone()));
        let out = tracing::subscriber::with_default(subscriber, f);
        let stages = log.lock().unwrap().clone();
        (out, stages)
    }

    const DOC: &[u8] = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\n%%EOF\n";

    fn sealed(mode: MetadataMode) -> Vec<u8> {
        let opts = EncryptOptions {
            metadata_mode: mode,
            kdf: KdfParams { iterations: 1_000 },
            skip_strength_check: true,
            ..Default::default()
        };
        seal_document(&PdfDocument, DOC, "Sw0rdFish!2024", &opts)
            .unwrap()
            .encode()
            .unwrap()
    }

    #[test]
    fn decrypt_stages_follow_documented_order() {
        for mode in [MetadataMode::Encrypted, MetadataMode::PlaintextWithMac] {
            let bytes = sealed(mode);
            let kdf = KdfParams { iterations: 1_000 };
            let (res, stages) =
                stages_of(|| open_container(&PdfDocument, &bytes, "Sw0rdFish!2024", &kdf));
            assert_eq!(&res.unwrap().document[..], DOC);
            assert_eq!(
                stages,
                ["Start", "Prepared", "KeysDerived", "SegmentsProcessed", "ContentValidated"]
            );
        }
    }

    #[test]
    fn keys_are_derived_before_any_segment_is_verified() {
        let bytes = sealed(MetadataMode::Encrypted);
        let kdf = KdfParams { iterations: 1_000 };
        let (res, stages) = stages_of(|| open_container(&PdfDocument, &bytes, "wrong", &kdf));
        assert!(matches!(res, Err(Error::AuthenticationFailure)));
        assert_eq!(stages, ["Start", "Prepared", "KeysDerived"]);
    }

    #[test]
    fn output_equal_to_input_rejected() {
        let p = PathBuf::from("a.pdf");
        let err = resolve_output(&p, Some(&p), PathBuf::from("a.veil")).unwrap_err();
        assert!(matches!(err, Error::InvalidOptions(_)));
    }
}
