//! Key handling, attribute blobs, and content decryption.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{
    BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit, StreamCipher,
    StreamCipherSeek,
};
use aes::Aes128;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::action::Transform;
use crate::vfs::{VfsError, VfsResult};

type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Prefix of every decrypted attribute blob.
pub const ATTRIBUTE_MAGIC: &[u8] = b"MEGA";

const ZERO_IV: [u8; 16] = [0; 16];

/// Decode MEGA's unpadded base64url, tolerating the standard alphabet and
/// trailing padding.
pub fn b64_decode(s: &str) -> VfsResult<Vec<u8>> {
    let normalized: String = s
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            c => c,
        })
        .collect();
    URL_SAFE_NO_PAD
        .decode(normalized)
        .map_err(|e| VfsError::decode(format!("base64: {e}")))
}

pub fn b64_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Fold a 32-byte key+MAC blob into a 16-byte key. 16-byte keys pass through.
pub fn unmerge_key(key: &[u8]) -> VfsResult<[u8; 16]> {
    let mut out = [0u8; 16];
    match key.len() {
        16 => out.copy_from_slice(key),
        32 => {
            for (i, b) in out.iter_mut().enumerate() {
                *b = key[i] ^ key[i + 16];
            }
        }
        n => return Err(VfsError::decode(format!("key must be 16 or 32 bytes, got {n}"))),
    }
    Ok(out)
}

/// Content nonce of a 32-byte file key; folders have none.
pub fn nonce_of(key: &[u8]) -> [u8; 8] {
    let mut nonce = [0u8; 8];
    if key.len() >= 24 {
        nonce.copy_from_slice(&key[16..24]);
    }
    nonce
}

/// AES-128-ECB decrypt of wrapped key material.
pub fn decrypt_key(key: &[u8; 16], data: &[u8]) -> VfsResult<Vec<u8>> {
    if data.is_empty() || data.len() % 16 != 0 {
        return Err(VfsError::decode(format!("wrapped key of {} bytes", data.len())));
    }
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut out = data.to_vec();
    for block in out.chunks_exact_mut(16) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(out)
}

/// AES-128-ECB encrypt of key material.
pub fn encrypt_key(key: &[u8; 16], data: &[u8]) -> VfsResult<Vec<u8>> {
    if data.is_empty() || data.len() % 16 != 0 {
        return Err(VfsError::decode(format!("key of {} bytes", data.len())));
    }
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut out = data.to_vec();
    for block in out.chunks_exact_mut(16) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(out)
}

/// Decrypted node attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    /// Node name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// Color label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lbl: Option<u8>,
    /// Favorite flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fav: Option<u8>,
}

impl Attributes {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            n: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.n.as_deref()
    }
}

/// Decrypt an attribute blob. Returns `None` when the blob does not decrypt
/// to the magic prefix followed by JSON.
pub fn decrypt_attributes(key: &[u8; 16], at: &[u8]) -> Option<Attributes> {
    if at.is_empty() || at.len() % 16 != 0 {
        return None;
    }
    let mut buf = at.to_vec();
    let plain = Aes128CbcDec::new(GenericArray::from_slice(key), GenericArray::from_slice(&ZERO_IV))
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .ok()?;
    let body = plain.strip_prefix(ATTRIBUTE_MAGIC)?;
    let end = body.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    serde_json::from_slice(&body[..end]).ok()
}

/// Encrypt attributes into a blob `decrypt_attributes` accepts.
pub fn encrypt_attributes(key: &[u8; 16], attrs: &Attributes) -> VfsResult<Vec<u8>> {
    let mut buf = ATTRIBUTE_MAGIC.to_vec();
    buf.extend_from_slice(&serde_json::to_vec(attrs)?);
    let len = buf.len();
    buf.resize(len.div_ceil(16) * 16, 0);
    let len = buf.len();
    let out = Aes128CbcEnc::new(GenericArray::from_slice(key), GenericArray::from_slice(&ZERO_IV))
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .map_err(|_| VfsError::decode("attribute blob padding"))?;
    Ok(out.to_vec())
}

/// Content cipher: AES-128-CTR with `nonce || block index` counter blocks.
///
/// The keystream can be entered at any byte offset, which is what lets
/// ranged downloads start mid-file.
pub struct ContentDecryptor {
    cipher: Aes128Ctr,
}

impl ContentDecryptor {
    /// Start at byte `offset` of the plaintext.
    pub fn new(key: &[u8; 16], nonce: [u8; 8], offset: u64) -> Self {
        let mut iv = [0u8; 16];
        iv[..8].copy_from_slice(&nonce);
        let mut cipher = Aes128Ctr::new(GenericArray::from_slice(key), GenericArray::from_slice(&iv));
        cipher.seek(offset);
        Self { cipher }
    }

    /// XOR `data` with the keystream in place. Encrypts and decrypts alike.
    pub fn apply(&mut self, data: &mut [u8]) {
        self.cipher.apply_keystream(data);
    }
}

impl Transform for ContentDecryptor {
    fn transform(&mut self, chunk: Bytes) -> VfsResult<Bytes> {
        let mut buf = chunk.to_vec();
        self.apply(&mut buf);
        Ok(Bytes::from(buf))
    }
}
