//! VEIL container codec.
//!
//! Pure serialization, no cryptography. Layout (v1, big-endian):
//!
//! ```text
//! magic            4   "VEIL"
//! version          1   0x01
//! metadata_mode    1   0x01 = Encrypted, 0x00 = PlaintextWithMac
//! -- Encrypted:
//!   meta_salt      16
//!   meta_nonce     12
//!   meta_len       4   (u32)
//!   meta_ct        meta_len
//!   meta_tag       16
//! -- PlaintextWithMac:
//!   meta_salt      16
//!   meta_len       4   (u32)
//!   meta_plain     meta_len
//!   meta_mac       32  (HMAC-SHA256)
//! body_salt        16
//! body_nonce       12
//! body_len         4   (u32)
//! body_ct          body_len
//! body_tag         16
//! ```
//!
//! Decoding is strictly sequential. Any field that runs past the end of the
//! input, and any byte left over after `body_tag`, is a `MalformedContainer`.

use subtle::ConstantTimeEq;

use crate::config::MetadataMode;
use crate::crypto::{MAC_LEN, NONCE_LEN, SALT_LEN, TAG_LEN};
use crate::error::{Error, Result};

pub const MAGIC: &[u8; 4] = b"VEIL";
pub const VERSION: u8 = 0x01;

const PREAMBLE_LEN: usize = 4 + 1 + 1;
const CIPHER_SEGMENT_OVERHEAD: usize = SALT_LEN + NONCE_LEN + 4 + TAG_LEN;
const PLAIN_SEGMENT_OVERHEAD: usize = SALT_LEN + 4 + MAC_LEN;

/// One AEAD-encrypted region with its own salt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherSegment {
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    /// The wire `length` field is always `ciphertext.len()`.
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

/// Metadata stored in the clear, authenticated by an HMAC keyed from its own salt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaintextSegment {
    pub salt: [u8; SALT_LEN],
    pub plaintext: Vec<u8>,
    pub mac: [u8; MAC_LEN],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataSegment {
    Encrypted(CipherSegment),
    PlaintextWithMac(PlaintextSegment),
}

impl MetadataSegment {
    pub fn mode(&self) -> MetadataMode {
        match self {
            MetadataSegment::Encrypted(_) => MetadataMode::Encrypted,
            MetadataSegment::PlaintextWithMac(_) => MetadataMode::PlaintextWithMac,
        }
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        match self {
            MetadataSegment::Encrypted(seg) => &seg.salt,
            MetadataSegment::PlaintextWithMac(seg) => &seg.salt,
        }
    }
}

/// A parsed or freshly sealed container. Built once, encoded, dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub metadata: MetadataSegment,
    pub body: CipherSegment,
}

impl Container {
    pub fn metadata_mode(&self) -> MetadataMode {
        self.metadata.mode()
    }

    pub fn encoded_len(&self) -> usize {
        let meta = match &self.metadata {
            MetadataSegment::Encrypted(seg) => CIPHER_SEGMENT_OVERHEAD + seg.ciphertext.len(),
            MetadataSegment::PlaintextWithMac(seg) => PLAIN_SEGMENT_OVERHEAD + seg.plaintext.len(),
        };
        PREAMBLE_LEN + meta + CIPHER_SEGMENT_OVERHEAD + self.body.ciphertext.len()
    }

    /// Serialize in the fixed field order above.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.push(self.metadata_mode().to_byte());

        match &self.metadata {
            MetadataSegment::Encrypted(seg) => put_cipher_segment(&mut out, seg)?,
            MetadataSegment::PlaintextWithMac(seg) => {
                out.extend_from_slice(&seg.salt);
                put_len(&mut out, seg.plaintext.len())?;
                out.extend_from_slice(&seg.plaintext);
                out.extend_from_slice(&seg.mac);
            }
        }
        put_cipher_segment(&mut out, &self.body)?;

        debug_assert_eq!(out.len(), self.encoded_len());
        Ok(out)
    }

    /// Parse a container. Magic and version are checked before anything else.
    pub fn decode(input: &[u8]) -> Result<Self> {
        let mut r = Reader::new(input);

        let magic = r.take(MAGIC.len(), "magic")?;
        // SECURITY: constant-time magic check
        if magic.ct_eq(MAGIC).unwrap_u8() != 1 {
            return Err(Error::malformed("not a VEIL container (bad magic)"));
        }

        let version = r.u8("version")?;
        if version != VERSION {
            return Err(Error::malformed(format!(
                "unsupported container version {version} (expected {VERSION})"
            )));
        }

        let mode_byte = r.u8("metadata_mode")?;
        let mode = MetadataMode::from_byte(mode_byte).ok_or_else(|| {
            Error::malformed(format!("unknown metadata mode byte 0x{mode_byte:02x}"))
        })?;

        let metadata = match mode {
            MetadataMode::Encrypted => MetadataSegment::Encrypted(r.cipher_segment("meta")?),
            MetadataMode::PlaintextWithMac => {
                let salt = r.array::<SALT_LEN>("meta_salt")?;
                let len = r.u32_be("meta_len")? as usize;
                let plaintext = r.take(len, "meta_plaintext")?.to_vec();
                let mac = r.array::<MAC_LEN>("meta_mac")?;
                MetadataSegment::PlaintextWithMac(PlaintextSegment {
                    salt,
                    plaintext,
                    mac,
                })
            }
        };

        let body = r.cipher_segment("body")?;

        if r.remaining() != 0 {
            return Err(Error::malformed(format!(
                "{} trailing bytes after body tag",
                r.remaining()
            )));
        }

        Ok(Self { metadata, body })
    }
}

fn put_len(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let len: u32 = len
        .try_into()
        .map_err(|_| Error::SegmentTooLarge { len })?;
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

fn put_cipher_segment(out: &mut Vec<u8>, seg: &CipherSegment) -> Result<()> {
    out.extend_from_slice(&seg.salt);
    out.extend_from_slice(&seg.nonce);
    put_len(out, seg.ciphertext.len())?;
    out.extend_from_slice(&seg.ciphertext);
    out.extend_from_slice(&seg.tag);
    Ok(())
}

/// Sequential cursor over the input. Every read either advances by exactly
/// the requested size or fails.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize, field: &str) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::malformed(format!(
                "truncated {field} at offset {}: need {n} bytes, {} left",
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self, field: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    fn u8(&mut self, field: &str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    fn u32_be(&mut self, field: &str) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array::<4>(field)?))
    }

    fn cipher_segment(&mut self, prefix: &str) -> Result<CipherSegment> {
        let salt = self.array::<SALT_LEN>(&format!("{prefix}_salt"))?;
        let nonce = self.array::<NONCE_LEN>(&format!("{prefix}_nonce"))?;
        let len = self.u32_be(&format!("{prefix}_len"))? as usize;
        let ciphertext = self.take(len, &format!("{prefix}_ciphertext"))?.to_vec();
        let tag = self.array::<TAG_LEN>(&format!("{prefix}_tag"))?;
        Ok(CipherSegment {
            salt,
            nonce,
            ciphertext,
            tag,
        })
    }
}
