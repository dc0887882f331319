//! Value Cipher
//!
//! blob 포맷 (v1, 출력 가능한 ASCII):
//! `x1]<base64 nonce>]<base64 ciphertext>`
//!
//! - nonce: 24 bytes (XChaCha20-Poly1305), 호출마다 새로 생성
//! - AAD: 포맷 태그 (`x1`)
//! - `]`는 표준 Base64 알파벳에 없으므로 버전 마커(정수)와 구분된다

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::Rng;

use crate::error::CryptoError;
use crate::master_key::MasterKey;

pub const BLOB_DELIMITER: char = ']';
pub const BLOB_TAG: &str = "x1";

/// Nonce 길이 (XChaCha20-Poly1305용 24 bytes)
pub const NONCE_LEN: usize = 24;

/// 암호문 blob 형태인지 검사
pub fn is_cipher_blob(value: &str) -> bool {
    value.contains(BLOB_DELIMITER)
}

/// 마스터키로 값을 암호화하여 blob 생성
pub fn encrypt_value(key: &MasterKey, plaintext: &[u8]) -> Result<String, CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill(&mut nonce);

    let cipher = XChaCha20Poly1305::new(key.bytes().into());
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: BLOB_TAG.as_bytes(),
            },
        )
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(format!(
        "{tag}{d}{nonce}{d}{body}",
        tag = BLOB_TAG,
        d = BLOB_DELIMITER,
        nonce = BASE64.encode(nonce),
        body = BASE64.encode(ciphertext),
    ))
}

/// blob을 복호화
pub fn decrypt_value(key: &MasterKey, blob: &str) -> Result<Vec<u8>, CryptoError> {
    let mut parts = blob.splitn(3, BLOB_DELIMITER);
    let (tag, nonce, body) = match (parts.next(), parts.next(), parts.next()) {
        (Some(tag), Some(nonce), Some(body)) => (tag, nonce, body),
        _ => return Err(CryptoError::MalformedBlob("missing delimiter".to_string())),
    };
    if tag != BLOB_TAG {
        return Err(CryptoError::MalformedBlob(format!("unknown format tag {:?}", tag)));
    }

    let nonce = BASE64
        .decode(nonce)
        .map_err(|e| CryptoError::MalformedBlob(format!("nonce: {}", e)))?;
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::MalformedBlob(format!(
            "nonce length {}",
            nonce.len()
        )));
    }
    let ciphertext = BASE64
        .decode(body)
        .map_err(|e| CryptoError::MalformedBlob(format!("body: {}", e)))?;

    let cipher = XChaCha20Poly1305::new(key.bytes().into());
    cipher
        .decrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: &ciphertext,
                aad: BLOB_TAG.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::Authentication)
}
