//! Key derivation and AEAD primitives for the relay wire protocol.
//!
//! Every key is derived from the shared password mixed with a 12-byte nonce
//! via HKDF-SHA256, then used with ChaCha20-Poly1305 (16-byte tag). Stream
//! directions treat the nonce as a big-endian counter that advances after
//! every seal/open; a nonce value is never reused under the same key.

use chacha20poly1305::{
    aead::{Aead as AeadTrait, KeyInit},
    ChaCha20Poly1305,
};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Derived symmetric key length in bytes.
pub const KEY_SIZE: usize = 32;
/// AEAD nonce length in bytes.
pub const NONCE_SIZE: usize = 12;
/// Poly1305 authentication tag length in bytes.
pub const TAG_SIZE: usize = 16;

/// HKDF info string binding derived keys to this protocol.
const KDF_INFO: &[u8] = b"cloak relay key";

/// A derived 32-byte symmetric key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_SIZE]);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Derive the record key for a (password, nonce) pair.
///
/// Deterministic: both peers derive the same key from the same pair, so the
/// 12 nonce bytes are the only per-stream state exchanged in the clear.
pub fn derive_key(password: &[u8], nonce: &[u8; NONCE_SIZE]) -> DerivedKey {
    let hk = Hkdf::<Sha256>::new(Some(nonce), password);
    let mut key = [0u8; KEY_SIZE];
    // 32 bytes is far below the HKDF-SHA256 output limit
    hk.expand(KDF_INFO, &mut key).expect("hkdf expand");
    DerivedKey(key)
}

/// Rolling 12-byte nonce, treated as a big-endian counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// A fresh random nonce from the OS RNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }

    /// Advance the counter by one. Wraps at 2^96.
    pub fn increment(&mut self) {
        for b in self.0.iter_mut().rev() {
            *b = b.wrapping_add(1);
            if *b != 0 {
                break;
            }
        }
    }
}

/// A ChaCha20-Poly1305 cipher bound to one derived key.
pub struct SealingKey {
    cipher: ChaCha20Poly1305,
}

impl SealingKey {
    pub fn new(key: &DerivedKey) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.as_bytes().into()),
        }
    }

    /// Encrypt `plaintext`, returning ciphertext with the 16-byte tag
    /// appended.
    pub fn seal(&self, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(nonce.as_bytes().into(), plaintext)
            .map_err(|_| Error::Protocol("seal failed"))
    }

    /// Decrypt `ciphertext` (with trailing tag). Authentication failure is
    /// fatal to the stream; callers close without retrying.
    pub fn open(&self, nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < TAG_SIZE {
            return Err(Error::Protocol("short ciphertext"));
        }
        self.cipher
            .decrypt(nonce.as_bytes().into(), ciphertext)
            .map_err(|_| Error::Protocol("record authentication failed"))
    }
}

/// Generate a fresh random nonce and derive its key. Used once per
/// server-to-client stream direction and once per outgoing UDP datagram.
pub fn prepare_key(password: &[u8]) -> (SealingKey, Nonce) {
    let nonce = Nonce::random();
    let key = derive_key(password, nonce.as_bytes());
    (SealingKey::new(&key), nonce)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_deterministic() {
        let nonce = [7u8; NONCE_SIZE];
        let a = derive_key(b"pw", &nonce);
        let b = derive_key(b"pw", &nonce);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_derive_key_differs_by_nonce() {
        let a = derive_key(b"pw", &[0u8; NONCE_SIZE]);
        let b = derive_key(b"pw", &[1u8; NONCE_SIZE]);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_derive_key_differs_by_password() {
        let nonce = [0u8; NONCE_SIZE];
        let a = derive_key(b"pw", &nonce);
        let b = derive_key(b"other", &nonce);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = derive_key(b"pw", &[0u8; NONCE_SIZE]);
        let sk = SealingKey::new(&key);
        let nonce = Nonce::from_bytes([0u8; NONCE_SIZE]);

        let sealed = sk.seal(&nonce, b"hello").unwrap();
        assert_eq!(sealed.len(), 5 + TAG_SIZE);

        let opened = sk.open(&nonce, &sealed).unwrap();
        assert_eq!(opened, b"hello");
    }

    #[test]
    fn test_open_rejects_tampered() {
        let key = derive_key(b"pw", &[0u8; NONCE_SIZE]);
        let sk = SealingKey::new(&key);
        let nonce = Nonce::from_bytes([0u8; NONCE_SIZE]);

        let mut sealed = sk.seal(&nonce, b"hello").unwrap();
        sealed[0] ^= 0x01;
        assert!(matches!(
            sk.open(&nonce, &sealed),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_open_rejects_wrong_key() {
        let nonce = Nonce::from_bytes([0u8; NONCE_SIZE]);
        let sealed = SealingKey::new(&derive_key(b"pw", nonce.as_bytes()))
            .seal(&nonce, b"secret")
            .unwrap();
        let other = SealingKey::new(&derive_key(b"wrong", nonce.as_bytes()));
        assert!(other.open(&nonce, &sealed).is_err());
    }

    #[test]
    fn test_open_rejects_short_input() {
        let key = derive_key(b"pw", &[0u8; NONCE_SIZE]);
        let sk = SealingKey::new(&key);
        let nonce = Nonce::from_bytes([0u8; NONCE_SIZE]);
        assert!(sk.open(&nonce, &[0u8; 4]).is_err());
    }

    #[test]
    fn test_nonce_increment_big_endian() {
        let mut n = Nonce::from_bytes([0u8; NONCE_SIZE]);
        n.increment();
        assert_eq!(n.as_bytes()[11], 1);
        assert_eq!(&n.as_bytes()[..11], &[0u8; 11]);

        let mut n = Nonce::from_bytes([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff]);
        n.increment();
        assert_eq!(&n.as_bytes()[10..], &[1, 0]);

        let mut n = Nonce::from_bytes([0xff; NONCE_SIZE]);
        n.increment();
        assert_eq!(n.as_bytes(), &[0u8; NONCE_SIZE]);
    }

    #[test]
    fn test_nonce_sequence_never_repeats() {
        let mut n = Nonce::from_bytes([0u8; NONCE_SIZE]);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(*n.as_bytes()));
            n.increment();
        }
    }

    #[test]
    fn test_prepare_key_random_nonces() {
        let (_, n1) = prepare_key(b"pw");
        let (_, n2) = prepare_key(b"pw");
        assert_ne!(n1.as_bytes(), n2.as_bytes());
    }

    #[test]
    fn test_prepare_key_matches_derive() {
        let (sk, nonce) = prepare_key(b"pw");
        let sealed = sk.seal(&nonce, b"payload").unwrap();

        // The peer derives the same key from the password and nonce alone.
        let peer = SealingKey::new(&derive_key(b"pw", nonce.as_bytes()));
        assert_eq!(peer.open(&nonce, &sealed).unwrap(), b"payload");
    }
}
