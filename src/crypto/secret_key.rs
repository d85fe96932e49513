use crate::error::{Error, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A constant that provides a default for CPU difficulty for interactive key derivation
pub const KDF_OPS_INTERACTIVE: u32 = 2;
/// A constant that provides a default for mem difficulty for interactive key derivation
pub const KDF_MEM_INTERACTIVE: u32 = 65536;

/// A self-describing, encrypted object that can be opened with the right key.
#[derive(Debug, Clone, PartialEq, getset::Getters)]
#[getset(get = "pub")]
pub struct Sealed {
    /// Our heroic nonce
    nonce: [u8; 24],
    /// The ciphertext
    ciphertext: Vec<u8>,
}

/// 32 bytes of secret material that wipe themselves when dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes([u8; 32]);

impl SecretBytes {
    pub(crate) fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub(crate) fn expose_secret(&self) -> &[u8; 32] {
        &self.0
    }
}

/// A symmetric encryption key
pub enum SecretKey {
    XChaCha20Poly1305(SecretBytes),
}

impl SecretKey {
    #[cfg(test)]
    pub(crate) fn new_xchacha20poly1305<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut randbuf = [0u8; 32];
        rng.fill_bytes(&mut randbuf);
        let key = Self::XChaCha20Poly1305(SecretBytes::new(randbuf));
        randbuf.zeroize();
        key
    }

    /// Encrypt a value with this key and a random nonce
    pub fn seal<R: RngCore + CryptoRng>(&self, rng: &mut R, data: &[u8]) -> Result<Sealed> {
        match self {
            Self::XChaCha20Poly1305(key) => {
                let mut nonce = [0u8; 24];
                rng.fill_bytes(&mut nonce);
                let cipher = chacha20poly1305::XChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(key.expose_secret().as_slice()));
                let ciphertext = cipher
                    .encrypt(chacha20poly1305::XNonce::from_slice(&nonce), data)
                    .map_err(|_| Error::CryptoSealFailed)?;
                Ok(Sealed { nonce, ciphertext })
            }
        }
    }

    /// Decrypt a value with this key
    pub fn open(&self, sealed: &Sealed) -> Result<Vec<u8>> {
        match self {
            Self::XChaCha20Poly1305(key) => {
                let cipher = chacha20poly1305::XChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(key.expose_secret().as_slice()));
                cipher
                    .decrypt(chacha20poly1305::XNonce::from_slice(sealed.nonce()), sealed.ciphertext().as_slice())
                    .map_err(|_| Error::CryptoOpenFailed)
            }
        }
    }
}

/// Generate a secret key from a passphrase/salt
pub fn derive_secret_key(passphrase: &[u8], salt_bytes: &[u8], ops: u32, mem: u32) -> Result<SecretKey> {
    const LEN: usize = 32;
    let salt: &[u8; 16] = salt_bytes.get(0..16).ok_or(Error::CryptoKDFFailed)?.try_into().map_err(|_| Error::CryptoKDFFailed)?;
    let mut key = [0u8; LEN];
    let argon2_ctx = argon2::Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::new(mem, ops, 1, Some(LEN)).map_err(|_| Error::CryptoKDFFailed)?,
    );
    argon2_ctx
        .hash_password_into(passphrase, salt, &mut key)
        .map_err(|_| Error::CryptoKDFFailed)?;
    let secret = SecretKey::XChaCha20Poly1305(SecretBytes::new(key));
    key.zeroize();
    Ok(secret)
}
