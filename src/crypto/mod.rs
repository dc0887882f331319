//! 키 해싱과 값 암복호화

pub mod cipher;
pub mod hasher;

pub use cipher::{decrypt_value, encrypt_value, is_cipher_blob};
pub use hasher::hash_key_name;
