//! Recording blob files.
//!
//! On-disk layout: `magic "EZR1" || version u16 LE || flags u16 LE ||
//! salt[32] || nonce[12] || payload`. When the encrypted flag is set the
//! payload is AES-256-GCM ciphertext with the tag appended; otherwise the
//! salt and nonce are zero and the payload is plaintext. Files are written
//! through a temp file and renamed into place, then marked read-only.

use crate::errors::{Result, RpaError};
use crate::storage::crypto::{self, NONCE_LEN, SALT_LEN};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const MAGIC: &[u8; 4] = b"EZR1";
pub const FORMAT_VERSION: u16 = 1;
const FLAG_ENCRYPTED: u16 = 0x0001;
const HEADER_LEN: usize = 4 + 2 + 2 + SALT_LEN + NONCE_LEN;

/// Serialize a payload into blob bytes, encrypting when a passphrase is
/// given.
pub fn encode(plaintext: &[u8], passphrase: Option<&str>) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(HEADER_LEN + plaintext.len() + crypto::TAG_LEN);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());

    match passphrase {
        Some(passphrase) => {
            let salt = crypto::random_salt();
            let nonce = crypto::random_nonce();
            let key = crypto::derive_key(passphrase, &salt, crypto::PBKDF2_ITERATIONS);
            let ciphertext = crypto::encrypt(&key, &nonce, plaintext)?;
            out.extend_from_slice(&FLAG_ENCRYPTED.to_le_bytes());
            out.extend_from_slice(&salt);
            out.extend_from_slice(&nonce);
            out.extend_from_slice(&ciphertext);
        }
        None => {
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&[0u8; SALT_LEN]);
            out.extend_from_slice(&[0u8; NONCE_LEN]);
            out.extend_from_slice(plaintext);
        }
    }
    Ok(out)
}

/// Parse blob bytes back into the plaintext payload.
pub fn decode(bytes: &[u8], passphrase: Option<&str>) -> Result<Vec<u8>> {
    if bytes.len() < HEADER_LEN {
        return Err(RpaError::Corruption("blob truncated".to_string()));
    }
    if &bytes[0..4] != MAGIC {
        return Err(RpaError::Corruption("bad blob magic".to_string()));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != FORMAT_VERSION {
        return Err(RpaError::Corruption(format!(
            "unsupported blob version {version}"
        )));
    }
    let flags = u16::from_le_bytes([bytes[6], bytes[7]]);
    let salt: [u8; SALT_LEN] = bytes[8..8 + SALT_LEN].try_into().unwrap();
    let nonce_start = 8 + SALT_LEN;
    let nonce: [u8; NONCE_LEN] = bytes[nonce_start..nonce_start + NONCE_LEN]
        .try_into()
        .unwrap();
    let payload = &bytes[HEADER_LEN..];

    if flags & FLAG_ENCRYPTED == 0 {
        return Ok(payload.to_vec());
    }

    let passphrase = passphrase.ok_or_else(|| {
        RpaError::DecryptionFailed("blob is encrypted and no passphrase was supplied".to_string())
    })?;
    let key = crypto::derive_key(passphrase, &salt, crypto::PBKDF2_ITERATIONS);
    crypto::decrypt(&key, &nonce, payload)
}

/// Blob store rooted at `<app_data_dir>/blobs`.
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    pub fn open(app_data_dir: &Path) -> Result<Self> {
        let dir = app_data_dir.join("blobs");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, recording_id: &str) -> PathBuf {
        self.dir.join(format!("{recording_id}.rec"))
    }

    /// Atomic write: temp file in the same directory, then rename over the
    /// destination. The final file is marked read-only.
    pub fn write(&self, recording_id: &str, bytes: &[u8]) -> Result<u64> {
        let path = self.path_for(recording_id);
        let tmp = self.dir.join(format!("{recording_id}.rec.tmp"));

        if path.exists() {
            // The previous blob was marked read-only; clear that so the
            // rename can replace it on every platform.
            let mut perms = fs::metadata(&path)?.permissions();
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
            let _ = fs::set_permissions(&path, perms);
        }

        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;

        let mut perms = fs::metadata(&path)?.permissions();
        perms.set_readonly(true);
        if let Err(e) = fs::set_permissions(&path, perms) {
            debug!("could not mark blob read-only: {e}");
        }
        Ok(bytes.len() as u64)
    }

    pub fn read(&self, recording_id: &str) -> Result<Vec<u8>> {
        let path = self.path_for(recording_id);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RpaError::NotFound(format!("blob for {recording_id}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn remove(&self, recording_id: &str) -> Result<()> {
        let path = self.path_for(recording_id);
        if !path.exists() {
            return Ok(());
        }
        let mut perms = fs::metadata(&path)?.permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        let _ = fs::set_permissions(&path, perms);
        fs::remove_file(&path)?;
        Ok(())
    }
}
