//! Single-shot AEAD codec for UDP datagrams.
//!
//! Each datagram is an independent sealed blob `nonce(12) || sealed(body)`
//! where the body starts with the destination address triple followed by
//! user data. When token authentication is in play the plaintext carries a
//! trailing `token || len_be16` suffix that [`split_token`] peels off.

use crate::address::Address;
use crate::crypto::{self, Nonce, SealingKey, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};

/// Seal `plaintext` under a fresh random nonce, producing a full datagram.
pub fn encrypt(password: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let (key, nonce) = crypto::prepare_key(password);
    let sealed = key.seal(&nonce, plaintext)?;

    let mut datagram = Vec::with_capacity(NONCE_SIZE + sealed.len());
    datagram.extend_from_slice(nonce.as_bytes());
    datagram.extend_from_slice(&sealed);
    Ok(datagram)
}

/// Open a datagram and split the plaintext into the destination address and
/// the remaining data (user payload, plus the token suffix when present).
pub fn decrypt(password: &[u8], datagram: &[u8]) -> Result<(Address, Vec<u8>)> {
    if datagram.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Protocol("short datagram"));
    }

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(&datagram[..NONCE_SIZE]);
    let key = SealingKey::new(&crypto::derive_key(password, &nonce_bytes));
    let nonce = Nonce::from_bytes(nonce_bytes);

    let plaintext = key.open(&nonce, &datagram[NONCE_SIZE..])?;
    let (addr, consumed) = Address::decode(&plaintext)?;
    Ok((addr, plaintext[consumed..].to_vec()))
}

/// Split `data` into `(user_prefix, token)` per the trailing
/// `token || len_be16` layout.
pub fn split_token(data: &[u8]) -> Result<(&[u8], &[u8])> {
    if data.len() < 2 {
        return Err(Error::Protocol("missing token trailer"));
    }
    let token_len = u16::from_be_bytes([data[data.len() - 2], data[data.len() - 1]]) as usize;
    if data.len() < token_len + 2 {
        return Err(Error::Protocol("malformed token trailer"));
    }
    let boundary = data.len() - token_len - 2;
    Ok((&data[..boundary], &data[boundary..data.len() - 2]))
}
