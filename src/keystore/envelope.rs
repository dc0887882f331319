//! X25519 봉투 암호화
//!
//! 포맷 (v1):
//! - version: 1 byte
//! - ephemeral public key: 32 bytes
//! - nonce: 24 bytes (XChaCha20-Poly1305)
//! - ciphertext: AEAD 결과 (= 암호문 + 태그)
//!
//! AAD: version + ephemeral public key

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::Rng;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::KeystoreError;

pub const ENVELOPE_VERSION: u8 = 1;

const PUBLIC_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const HEADER_LEN: usize = 1 + PUBLIC_KEY_LEN + NONCE_LEN;

const WRAP_SALT: &[u8] = b"secured-store/wrap/v1";
const DEVICE_SECRET_SALT: &[u8] = b"secured-store/device-secret/v1";

/// 새 X25519 개인키 생성
pub fn generate_secret() -> Zeroizing<[u8; 32]> {
    Zeroizing::new(StaticSecret::random_from_rng(OsRng).to_bytes())
}

pub fn public_key_of(secret: &[u8; 32]) -> [u8; 32] {
    *PublicKey::from(&StaticSecret::from(*secret)).as_bytes()
}

fn wrapping_key(
    shared: &[u8],
    ephemeral_public: &[u8; 32],
    recipient_public: &[u8; 32],
) -> Result<Zeroizing<[u8; 32]>, KeystoreError> {
    let mut info = Vec::with_capacity(PUBLIC_KEY_LEN * 2);
    info.extend_from_slice(ephemeral_public);
    info.extend_from_slice(recipient_public);

    let hkdf = Hkdf::<Sha256>::new(Some(WRAP_SALT), shared);
    let mut okm = Zeroizing::new([0u8; 32]);
    hkdf.expand(&info, &mut okm[..])
        .map_err(|e| KeystoreError::Unavailable(format!("HKDF expansion failed: {}", e)))?;
    Ok(okm)
}

/// 수신자 공개키로 키 재료를 봉인
pub fn seal(recipient_public: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, KeystoreError> {
    let ephemeral = StaticSecret::random_from_rng(OsRng);
    let ephemeral_public = *PublicKey::from(&ephemeral).as_bytes();
    let shared = ephemeral.diffie_hellman(&PublicKey::from(*recipient_public));

    let key = wrapping_key(shared.as_bytes(), &ephemeral_public, recipient_public)?;

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill(&mut nonce);

    let mut header = Vec::with_capacity(HEADER_LEN);
    header.push(ENVELOPE_VERSION);
    header.extend_from_slice(&ephemeral_public);

    let cipher = XChaCha20Poly1305::new((&*key).into());
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &header,
            },
        )
        .map_err(|_| KeystoreError::InvalidKeyMaterial)?;

    let mut out = header;
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// 개인키로 봉인 해제. 다른 키로 봉인되었거나 변조되면 `Rejected`
pub fn open(secret: &[u8; 32], sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, KeystoreError> {
    if sealed.len() <= HEADER_LEN {
        return Err(KeystoreError::Rejected("envelope too short".to_string()));
    }
    if sealed[0] != ENVELOPE_VERSION {
        return Err(KeystoreError::Rejected(format!(
            "unknown envelope version {}",
            sealed[0]
        )));
    }

    let (header, rest) = sealed.split_at(1 + PUBLIC_KEY_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let mut ephemeral_public = [0u8; PUBLIC_KEY_LEN];
    ephemeral_public.copy_from_slice(&header[1..]);

    let own = StaticSecret::from(*secret);
    let own_public = *PublicKey::from(&own).as_bytes();
    let shared = own.diffie_hellman(&PublicKey::from(ephemeral_public));
    let key = wrapping_key(shared.as_bytes(), &ephemeral_public, &own_public)?;

    let cipher = XChaCha20Poly1305::new((&*key).into());
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: header,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| KeystoreError::Rejected("envelope authentication failed".to_string()))
}

/// 개인키에 묶인 결정적 비밀값 (같은 키 + 같은 context → 같은 값)
pub fn derive_device_secret(
    secret: &[u8; 32],
    context: &[u8],
) -> Result<Zeroizing<[u8; 32]>, KeystoreError> {
    let hkdf = Hkdf::<Sha256>::new(Some(DEVICE_SECRET_SALT), secret);
    let mut okm = Zeroizing::new([0u8; 32]);
    hkdf.expand(context, &mut okm[..])
        .map_err(|e| KeystoreError::Unavailable(format!("HKDF expansion failed: {}", e)))?;
    Ok(okm)
}
