use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Key, Nonce, Tag,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const MAC_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// A derived segment key, wiped on drop.
pub type SegmentKey = Zeroizing<[u8; KEY_LEN]>;

/// PBKDF2-HMAC-SHA256 parameters.
///
/// The container does not record these, so encrypt and decrypt must agree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub iterations: u32,
}

impl KdfParams {
    pub const DEFAULT_ITERATIONS: u32 = 200_000;

    pub fn recommended() -> Self {
        Self {
            iterations: Self::DEFAULT_ITERATIONS,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(Error::InvalidOptions(
                "KDF iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::recommended()
    }
}

/// Secure random bytes from the OS RNG.
pub fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut out = [0u8; N];
    getrandom::getrandom(&mut out).map_err(|e| Error::Rng(e.to_string()))?;
    Ok(out)
}

/// Derive a 32-byte segment key from a password and a per-segment salt.
///
/// Pure and deterministic: same inputs, same key.
pub fn derive_key(password: &str, salt: &[u8; SALT_LEN], params: &KdfParams) -> Result<SegmentKey> {
    derive_key_with_salt(password, salt, params)
}

fn derive_key_with_salt(password: &str, salt: &[u8], params: &KdfParams) -> Result<SegmentKey> {
    params.validate()?;
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, params.iterations, &mut *key);
    Ok(key)
}

/// AES-256-GCM seal with a detached tag. Returns `(ciphertext, tag)`.
///
/// The caller supplies a nonce that has never been used with `key`; the
/// pipelines draw a fresh one from the OS RNG for every call.
pub fn seal(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_LEN])> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut buf = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(nonce), b"", &mut buf)
        .map_err(|_| Error::SegmentTooLarge { len: plaintext.len() })?;

    let mut tag_out = [0u8; TAG_LEN];
    tag_out.copy_from_slice(tag.as_slice());
    Ok((buf, tag_out))
}

/// AES-256-GCM open. Verification and decryption are atomic: on a bad tag
/// the working buffer is wiped and nothing is returned.
pub fn open(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut buf = Zeroizing::new(ciphertext.to_vec());
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            b"",
            buf.as_mut_slice(),
            Tag::from_slice(tag),
        )
        .map_err(|_| Error::AuthenticationFailure)?;
    Ok(buf)
}

/// HMAC-SHA256 over plaintext metadata.
pub fn metadata_mac(key: &[u8; KEY_LEN], data: &[u8]) -> Result<[u8; MAC_LEN]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| Error::InvalidOptions(format!("HMAC key: {e}")))?;
    mac.update(data);
    let mut out = [0u8; MAC_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Constant-time check of a stored metadata MAC.
pub fn verify_metadata_mac(key: &[u8; KEY_LEN], data: &[u8], expected: &[u8; MAC_LEN]) -> Result<()> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| Error::InvalidOptions(format!("HMAC key: {e}")))?;
    mac.update(data);
    mac.verify_slice(expected)
        .map_err(|_| Error::AuthenticationFailure)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KdfParams {
        KdfParams { iterations: 1_000 }
    }

    #[test]
    fn derive_key_is_deterministic() {
        let salt = [7u8; SALT_LEN];
        let a = derive_key("Sw0rdFish!2024", &salt, &fast()).unwrap();
        let b = derive_key("Sw0rdFish!2024", &salt, &fast()).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn derive_key_depends_on_salt_password_and_cost() {
        let k = derive_key("pw", &[1u8; SALT_LEN], &fast()).unwrap();
        let other_salt = derive_key("pw", &[2u8; SALT_LEN], &fast()).unwrap();
        let other_pw = derive_key("pw2", &[1u8; SALT_LEN], &fast()).unwrap();
        let other_cost = derive_key("pw", &[1u8; SALT_LEN], &KdfParams { iterations: 1_001 }).unwrap();
        assert_ne!(*k, *other_salt);
        assert_ne!(*k, *other_pw);
        assert_ne!(*k, *other_cost);
    }

    #[test]
    fn derive_key_matches_rfc7914_pbkdf2_vector() {
        // RFC 7914 section 11: PBKDF2-HMAC-SHA256("passwd", "salt", c=1),
        // first 32 bytes.
        let key = derive_key_with_salt("passwd", b"salt", &KdfParams { iterations: 1 }).unwrap();
        assert_eq!(
            *key,
            [
                0x55, 0xac, 0x04, 0x6e, 0x56, 0xe3, 0x08, 0x9f, 0xec, 0x16, 0x91, 0xc2, 0x25, 0x44,
                0xb6, 0x05, 0xf9, 0x41, 0x85, 0x21, 0x6d, 0xde, 0x04, 0x65, 0xe6, 0x8b, 0x9d, 0x57,
                0xc2, 0x0d, 0xac, 0xbc,
            ]
        );

        let twice = derive_key_with_salt("passwd", b"salt", &KdfParams { iterations: 2 }).unwrap();
        assert_ne!(*twice, *key);
    }

    #[test]
    fn zero_iterations_rejected() {
        let err = derive_key("pw", &[0u8; SALT_LEN], &KdfParams { iterations: 0 }).unwrap_err();
        assert!(matches!(err, Error::InvalidOptions(_)));
    }

    #[test]
    fn seal_open_roundtrip() {
        let key = [9u8; KEY_LEN];
        let nonce = [3u8; NONCE_LEN];
        let (ct, tag) = seal(&key, &nonce, b"segment body").unwrap();
        assert_eq!(ct.len(), b"segment body".len());
        let pt = open(&key, &nonce, &ct, &tag).unwrap();
        assert_eq!(pt.as_slice(), b"segment body");
    }

    #[test]
    fn open_rejects_flipped_tag_and_wrong_key() {
        let key = [9u8; KEY_LEN];
        let nonce = [3u8; NONCE_LEN];
        let (ct, mut tag) = seal(&key, &nonce, b"abc").unwrap();

        let wrong = [8u8; KEY_LEN];
        assert!(matches!(
            open(&wrong, &nonce, &ct, &tag),
            Err(Error::AuthenticationFailure)
        ));

        tag[0] ^= 0x01;
        assert!(matches!(
            open(&key, &nonce, &ct, &tag),
            Err(Error::AuthenticationFailure)
        ));
    }

    #[test]
    fn random_nonces_differ() {
        let a: [u8; NONCE_LEN] = random_bytes().unwrap();
        let b: [u8; NONCE_LEN] = random_bytes().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn mac_verifies_and_rejects_tamper() {
        let key = [5u8; KEY_LEN];
        let mac = metadata_mac(&key, br#"{"title":"x"}"#).unwrap();
        verify_metadata_mac(&key, br#"{"title":"x"}"#, &mac).unwrap();
        assert!(matches!(
            verify_metadata_mac(&key, br#"{"title":"y"}"#, &mac),
            Err(Error::AuthenticationFailure)
        ));
    }
}
