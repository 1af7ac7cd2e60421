//! Binary container format: header, header MAC, encrypted payload.
//!
//! A `.k2db` container has this layout:
//!
//! ```text
//! [K2DB: 4 bytes][version: 1 byte][header_len: 4 bytes LE][header JSON][HMAC-SHA256: 32 bytes][nonce: 12 bytes][ciphertext + tag]
//! ```
//!
//! - **Magic** (`K2DB`): identifies the file as a ktwo container.
//! - **Version**: format version (currently `1`).
//! - **Header length**: little-endian u32 telling us where the header
//!   JSON ends.
//! - **Header JSON**: serialized `ContainerHeader` (KDF params + salt).
//!   Readable without the password so the KDF can run.
//! - **HMAC-SHA256**: tag over magic, version, length and header JSON.
//! - **Payload**: AES-256-GCM over the encoded vault tree, with the
//!   same header bytes as associated data.

use std::fs;
use std::path::Path;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::codec;
use super::model::{Extra, Timestamp, Vault};
use crate::crypto::{self, Credentials, KdfParams};
use crate::errors::{KtwoError, Result};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic bytes at the start of every container.
const MAGIC: &[u8; 4] = b"K2DB";

/// Current binary format version.
pub const CURRENT_VERSION: u8 = 1;

/// Size of the header MAC (SHA-256 = 32 bytes).
const HMAC_LEN: usize = 32;

/// Fixed-size prefix: 4 (magic) + 1 (version) + 4 (header_len).
const PREFIX_LEN: usize = 9;

// ---------------------------------------------------------------------------
// ContainerHeader
// ---------------------------------------------------------------------------

/// Unencrypted metadata at the start of a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerHeader {
    /// KDF parameters, salt included.
    pub kdf: KdfParams,

    /// When the vault was first created.
    pub created_at: Timestamp,

    #[serde(flatten)]
    pub extra: Extra,
}

/// A container split into its sections, before any key is involved.
pub struct ParsedContainer<'a> {
    pub header: ContainerHeader,
    /// Prefix plus header JSON, exactly as stored. MAC input and AEAD
    /// associated data.
    authenticated: &'a [u8],
    mac: &'a [u8],
    body: &'a [u8],
}

/// Split a container into its sections.
///
/// Only structural problems are reported here (`InvalidContainer`);
/// nothing is verified yet.
pub fn parse(data: &[u8]) -> Result<ParsedContainer<'_>> {
    if data.len() < PREFIX_LEN + HMAC_LEN {
        return Err(KtwoError::InvalidContainer(
            "file too small to be a valid container".into(),
        ));
    }

    if &data[0..4] != MAGIC {
        return Err(KtwoError::InvalidContainer(
            "missing K2DB magic bytes".into(),
        ));
    }

    let version = data[4];
    if version != CURRENT_VERSION {
        return Err(KtwoError::InvalidContainer(format!(
            "unsupported version {version}, expected {CURRENT_VERSION}"
        )));
    }

    let header_len_u32 = u32::from_le_bytes(
        data[5..9]
            .try_into()
            .map_err(|_| KtwoError::InvalidContainer("bad header length".into()))?,
    );
    let header_len = usize::try_from(header_len_u32).map_err(|_| {
        KtwoError::InvalidContainer(format!(
            "header length {header_len_u32} exceeds platform address space"
        ))
    })?;

    let header_end = PREFIX_LEN
        .checked_add(header_len)
        .ok_or_else(|| KtwoError::InvalidContainer("header length overflow".into()))?;
    if header_end + HMAC_LEN > data.len() {
        return Err(KtwoError::InvalidContainer(
            "header length exceeds file size".into(),
        ));
    }

    let header: ContainerHeader = serde_json::from_slice(&data[PREFIX_LEN..header_end])
        .map_err(|e| KtwoError::InvalidContainer(format!("header JSON: {e}")))?;

    Ok(ParsedContainer {
        header,
        authenticated: &data[..header_end],
        mac: &data[header_end..header_end + HMAC_LEN],
        body: &data[header_end + HMAC_LEN..],
    })
}

/// Read only the KDF parameters of a container.
pub fn peek_kdf(data: &[u8]) -> Result<KdfParams> {
    Ok(parse(data)?.header.kdf)
}

/// Encrypt a vault into a self-describing container.
///
/// Every call uses a fresh nonce, so two encryptions of the same vault
/// differ byte-wise but decrypt to equal trees.
pub fn encrypt_container(vault: &Vault, credentials: &Credentials) -> Result<Vec<u8>> {
    if !credentials.matches(&vault.kdf) {
        return Err(KtwoError::InvalidParameters(
            "credentials were derived for different KDF parameters".into(),
        ));
    }

    let header = ContainerHeader {
        kdf: vault.kdf.clone(),
        created_at: vault.created_at,
        extra: vault.header_extra.clone(),
    };
    let header_bytes = serde_json::to_vec(&header)
        .map_err(|e| KtwoError::Serialization(format!("header: {e}")))?;
    let header_len = u32::try_from(header_bytes.len()).map_err(|_| {
        KtwoError::Serialization(format!(
            "header length {} exceeds u32::MAX",
            header_bytes.len()
        ))
    })?;

    let mut buf = Vec::with_capacity(PREFIX_LEN + header_bytes.len() + HMAC_LEN);
    buf.extend_from_slice(MAGIC); // 4 bytes
    buf.push(CURRENT_VERSION); // 1 byte
    buf.extend_from_slice(&header_len.to_le_bytes()); // 4 bytes LE
    buf.extend_from_slice(&header_bytes); // header JSON

    let mac_key = credentials.header_mac_key()?;
    let tag = compute_hmac(&mac_key[..], &buf)?;

    let payload = codec::encode(vault)?;
    let cipher_key = credentials.cipher_key()?;
    let sealed = crypto::encrypt(&cipher_key[..], &payload, &buf)?;

    buf.extend_from_slice(&tag); // 32 bytes
    buf.extend_from_slice(&sealed); // nonce + ciphertext + tag
    Ok(buf)
}

/// Decrypt a container into a vault tree.
///
/// Wrong credentials and tampered bytes both fail with
/// `AuthenticationFailed`; no partial data is ever returned.
pub fn decrypt_container(data: &[u8], credentials: &Credentials) -> Result<Vault> {
    let parsed = parse(data)?;

    let mac_key = credentials.header_mac_key()?;
    verify_hmac(&mac_key[..], parsed.authenticated, parsed.mac)?;

    let cipher_key = credentials.cipher_key()?;
    let plaintext = Zeroizing::new(crypto::decrypt(
        &cipher_key[..],
        parsed.body,
        parsed.authenticated,
    )?);

    let mut vault = codec::decode(&plaintext, parsed.header.kdf)
        .map_err(|_| KtwoError::AuthenticationFailed)?;
    vault.header_extra = parsed.header.extra;
    Ok(vault)
}

/// Compute HMAC-SHA256 over `data`.
fn compute_hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| KtwoError::InvalidParameters(format!("invalid HMAC key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Verify the header MAC in constant time.
fn verify_hmac(key: &[u8], data: &[u8], expected: &[u8]) -> Result<()> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).map_err(|_| KtwoError::AuthenticationFailed)?;
    mac.update(data);
    mac.verify_slice(expected)
        .map_err(|_| KtwoError::AuthenticationFailed)
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Read a container file, mapping a missing file to `VaultNotFound`.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(KtwoError::VaultNotFound(path.to_path_buf()));
    }
    Ok(fs::read(path)?)
}

/// Write bytes to disk **atomically**.
///
/// Writes a temp file in the same directory and renames it over the
/// target, so readers never see a half-written file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    if !parent.as_os_str().is_empty() && !parent.exists() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));

    fs::write(&tmp_path, bytes)?;

    // On Unix, restrict permissions to owner-only read/write.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
    }

    fs::rename(&tmp_path, path)?;
    Ok(())
}
