//! Sealing of bearer tokens carried by job payloads.

use std::fmt::Debug;

use aes_gcm::{
	Aes256Gcm, Nonce,
	aead::{Aead, AeadCore, KeyInit, OsRng},
};
use kiln_backend_model::job::SealedToken;
use thiserror::Error;

const NONCE_LEN: usize = 12;

/// AES-256-GCM cipher keyed with the scheduler message secret.
///
/// Sealed tokens are formatted as `hex(nonce):hex(ciphertext)`, where the
/// ciphertext carries the authentication tag.
pub struct MessageCipher {
	cipher: Aes256Gcm,
}

impl MessageCipher {
	pub fn new(secret_hex: &str) -> Result<Self, CipherError> {
		let key = hex::decode(secret_hex.trim()).map_err(|_| CipherError::InvalidKey)?;
		let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CipherError::InvalidKey)?;
		Ok(Self { cipher })
	}

	pub fn seal(&self, plaintext: &str) -> Result<SealedToken, CipherError> {
		let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
		let ciphertext = self
			.cipher
			.encrypt(&nonce, plaintext.as_bytes())
			.map_err(|_| CipherError::Encrypt)?;
		Ok(SealedToken(format!(
			"{}:{}",
			hex::encode(nonce),
			hex::encode(ciphertext)
		)))
	}

	pub fn open(&self, sealed: &SealedToken) -> Result<String, CipherError> {
		let (nonce, ciphertext) = sealed.0.split_once(':').ok_or(CipherError::Malformed)?;
		let nonce = hex::decode(nonce).map_err(|_| CipherError::Malformed)?;
		let ciphertext = hex::decode(ciphertext).map_err(|_| CipherError::Malformed)?;
		if nonce.len() != NONCE_LEN {
			return Err(CipherError::Malformed);
		}
		let plaintext = self
			.cipher
			.decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
			.map_err(|_| CipherError::Decrypt)?;
		String::from_utf8(plaintext).map_err(|_| CipherError::Malformed)
	}
}

impl Debug for MessageCipher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MessageCipher").finish_non_exhaustive()
	}
}

#[derive(Debug, Error)]
pub enum CipherError {
	#[error("message secret must be 64 hex digits")]
	InvalidKey,
	#[error("sealed token is malformed")]
	Malformed,
	#[error("failed to seal token")]
	Encrypt,
	#[error("failed to open sealed token")]
	Decrypt,
}
