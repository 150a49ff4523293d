//! The process-wide master key.
//!
//! Record layout: `iv(16) | AES-256-CBC(pad byte || plaintext || random tail) | HMAC-SHA-256(ciphertext)`.
//! The pad byte N is the number of random tail bytes, N in [1..16], chosen
//! so the CBC input is a whole number of blocks. The random tail keeps very
//! short values from being fingerprinted by length alone.
//!
//! On disk the key is wrapped as
//! `version(1) | salt(16) | iterations(u32 LE) | nonce(12) | AES-256-GCM seal(key)`
//! under a PBKDF2-HMAC-SHA-256 passphrase-derived key.

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::fs;
use std::path::Path;
use zeroize::Zeroize;

use crate::{CryptoError, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// The size of a wrapped leaf key produced by [`MasterKey::new_encrypted_key`]:
/// 16-byte IV + 48 bytes of CBC output + 32-byte HMAC.
pub const ENCRYPTED_KEY_SIZE: usize = 96;

const BLOCK_SIZE: usize = 16;
const MAC_SIZE: usize = 32;
const SALT_SIZE: usize = 16;
const GCM_NONCE_SIZE: usize = 12;
const KEY_FILE_VERSION: u8 = 1;

/// PBKDF2 iteration count for passphrase wrapping.
const PBKDF2_ITERATIONS: u32 = 200_000;
/// Iteration count when the passphrase is empty (developer mode).
const PBKDF2_ITERATIONS_DEV: u32 = 10;

/// The 32-byte symmetric key under which every persistent record is
/// encrypted and every keyed hash is computed.
///
/// Process-wide and read-only after construction. There is no "empty"
/// state: holding a `MasterKey` means key material is present.
pub struct MasterKey {
    key: [u8; 32],
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey").field("key", &"[REDACTED]").finish()
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl MasterKey {
    /// Generate a fresh random master key.
    pub fn create() -> Result<Self> {
        let mut key = [0u8; 32];
        getrandom::getrandom(&mut key).map_err(|e| CryptoError::Io(e.into()))?;
        Ok(Self { key })
    }

    /// Wrap raw key bytes.
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    /// Encrypt the key under `passphrase` and write it to `path`.
    ///
    /// An empty passphrase drops the PBKDF2 cost to a trivial count; that
    /// mode exists for development setups only.
    pub fn save(&self, passphrase: &str, path: &Path) -> Result<()> {
        let mut salt = [0u8; SALT_SIZE];
        getrandom::getrandom(&mut salt).map_err(|e| CryptoError::Io(e.into()))?;
        let iterations = if passphrase.is_empty() {
            PBKDF2_ITERATIONS_DEV
        } else {
            PBKDF2_ITERATIONS
        };

        let mut wrap_key = derive_wrap_key(passphrase, &salt, iterations);
        let cipher =
            Aes256Gcm::new_from_slice(&wrap_key).expect("wrap key is 32 bytes");
        wrap_key.zeroize();

        let mut nonce = [0u8; GCM_NONCE_SIZE];
        getrandom::getrandom(&mut nonce).map_err(|e| CryptoError::Io(e.into()))?;
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), self.key.as_slice())
            .map_err(|_| CryptoError::Malformed)?;

        let mut data = Vec::with_capacity(1 + SALT_SIZE + 4 + GCM_NONCE_SIZE + sealed.len());
        data.push(KEY_FILE_VERSION);
        data.extend_from_slice(&salt);
        data.extend_from_slice(&iterations.to_le_bytes());
        data.extend_from_slice(&nonce);
        data.extend_from_slice(&sealed);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &data)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// Read a wrapped master key from `path` and decrypt it with
    /// `passphrase`.
    pub fn read(passphrase: &str, path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        // version + salt + iterations + nonce + GCM tag + 32-byte key
        if data.len() < 1 + SALT_SIZE + 4 + GCM_NONCE_SIZE + 16 + 32 {
            return Err(CryptoError::WrongPassphrase);
        }
        let version = data[0];
        if version != KEY_FILE_VERSION {
            return Err(CryptoError::UnsupportedVersion(version));
        }
        let salt = &data[1..1 + SALT_SIZE];
        let mut off = 1 + SALT_SIZE;
        let iterations = u32::from_le_bytes(
            data[off..off + 4].try_into().expect("sliced four bytes"),
        );
        off += 4;
        let nonce = &data[off..off + GCM_NONCE_SIZE];
        off += GCM_NONCE_SIZE;

        let mut wrap_key = derive_wrap_key(passphrase, salt, iterations);
        let cipher =
            Aes256Gcm::new_from_slice(&wrap_key).expect("wrap key is 32 bytes");
        wrap_key.zeroize();

        let mut key_bytes = cipher
            .decrypt(Nonce::from_slice(nonce), &data[off..])
            .map_err(|_| CryptoError::WrongPassphrase)?;
        if key_bytes.len() != 32 {
            key_bytes.zeroize();
            return Err(CryptoError::WrongPassphrase);
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&key_bytes);
        key_bytes.zeroize();
        Ok(Self { key })
    }

    /// HMAC-SHA-256 of `data`, keyed by the master key.
    pub fn hash(&self, data: &[u8]) -> [u8; 32] {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key)
            .expect("hmac accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().into()
    }

    /// Encrypt `data` for persistence.
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut iv = [0u8; BLOCK_SIZE];
        getrandom::getrandom(&mut iv).map_err(|e| CryptoError::Io(e.into()))?;

        // Pad byte + plaintext + N random tail bytes, N in [1..16].
        let pad = BLOCK_SIZE - (data.len() + 1) % BLOCK_SIZE;
        let mut padded = Vec::with_capacity(data.len() + pad + 1);
        padded.push(pad as u8);
        padded.extend_from_slice(data);
        let mut tail = vec![0u8; pad];
        getrandom::getrandom(&mut tail).map_err(|e| CryptoError::Io(e.into()))?;
        padded.extend_from_slice(&tail);

        let enc = Aes256CbcEnc::new_from_slices(&self.key, &iv)
            .expect("key and iv have fixed sizes");
        let ciphertext = enc.encrypt_padded_vec_mut::<NoPadding>(&padded);
        padded.zeroize();

        let mac = self.hash(&ciphertext);

        let mut out = Vec::with_capacity(BLOCK_SIZE + ciphertext.len() + MAC_SIZE);
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        out.extend_from_slice(&mac);
        Ok(out)
    }

    /// Decrypt data produced by [`encrypt`](Self::encrypt).
    ///
    /// The HMAC is verified before any decryption happens; a mismatch is a
    /// hard failure and nothing is returned.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < BLOCK_SIZE + BLOCK_SIZE + MAC_SIZE {
            return Err(CryptoError::ShortCiphertext);
        }
        let iv = &data[..BLOCK_SIZE];
        let ciphertext = &data[BLOCK_SIZE..data.len() - MAC_SIZE];
        let mac = &data[data.len() - MAC_SIZE..];

        let mut verifier = <HmacSha256 as Mac>::new_from_slice(&self.key)
            .expect("hmac accepts any key length");
        verifier.update(ciphertext);
        verifier.verify_slice(mac).map_err(|_| CryptoError::BadMac)?;

        if ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::Malformed);
        }
        let dec = Aes256CbcDec::new_from_slices(&self.key, iv)
            .expect("key and iv have fixed sizes");
        let mut plain = dec
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
            .map_err(|_| CryptoError::Malformed)?;

        let pad = plain[0] as usize;
        if pad == 0 || pad > BLOCK_SIZE || 1 + pad > plain.len() {
            plain.zeroize();
            return Err(CryptoError::Malformed);
        }
        let out = plain[1..plain.len() - pad].to_vec();
        plain.zeroize();
        Ok(out)
    }

    /// Generate a fresh 32-byte leaf key and return it wrapped by the
    /// master key. The result is always [`ENCRYPTED_KEY_SIZE`] bytes.
    pub fn new_encrypted_key(&self) -> Result<Vec<u8>> {
        let mut key = [0u8; 32];
        getrandom::getrandom(&mut key).map_err(|e| CryptoError::Io(e.into()))?;
        let wrapped = self.encrypt(&key)?;
        key.zeroize();
        debug_assert_eq!(wrapped.len(), ENCRYPTED_KEY_SIZE);
        Ok(wrapped)
    }

    /// Unwrap a leaf key produced by [`new_encrypted_key`](Self::new_encrypted_key).
    pub fn decrypt_key(&self, wrapped: &[u8]) -> Result<[u8; 32]> {
        if wrapped.len() != ENCRYPTED_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength(wrapped.len()));
        }
        let mut plain = self.decrypt(wrapped)?;
        if plain.len() != 32 {
            let n = plain.len();
            plain.zeroize();
            return Err(CryptoError::InvalidKeyLength(n));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&plain);
        plain.zeroize();
        Ok(key)
    }
}

fn derive_wrap_key(passphrase: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, &mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_every_padding_boundary() {
        let mk = MasterKey::create().unwrap();
        for len in 0..=17 {
            let msg: Vec<u8> = (0..len as u8).collect();
            let enc = mk.encrypt(&msg).unwrap();
            assert_eq!(enc.len() % BLOCK_SIZE, 0);
            assert_eq!(mk.decrypt(&enc).unwrap(), msg, "length {len}");
        }
    }

    #[test]
    fn roundtrip_large() {
        let mk = MasterKey::create().unwrap();
        let msg: Vec<u8> = (0..100_000).map(|i| (i % 251) as u8).collect();
        let enc = mk.encrypt(&msg).unwrap();
        assert_eq!(mk.decrypt(&enc).unwrap(), msg);
    }

    #[test]
    fn any_bitflip_fails_with_bad_mac() {
        let mk = MasterKey::create().unwrap();
        let enc = mk.encrypt(b"authenticated record").unwrap();
        // The MAC covers the ciphertext; every authenticated byte must trip it.
        for byte in BLOCK_SIZE..enc.len() {
            for bit in 0..8 {
                let mut tampered = enc.clone();
                tampered[byte] ^= 1 << bit;
                assert!(
                    matches!(mk.decrypt(&tampered), Err(CryptoError::BadMac)),
                    "flip at byte {byte} bit {bit} did not fail"
                );
            }
        }
    }

    #[test]
    fn short_input_is_rejected() {
        let mk = MasterKey::create().unwrap();
        assert!(matches!(
            mk.decrypt(&[0u8; 63]),
            Err(CryptoError::ShortCiphertext)
        ));
        assert!(matches!(mk.decrypt(b""), Err(CryptoError::ShortCiphertext)));
    }

    #[test]
    fn same_plaintext_encrypts_differently() {
        let mk = MasterKey::create().unwrap();
        assert_ne!(mk.encrypt(b"x").unwrap(), mk.encrypt(b"x").unwrap());
    }

    #[test]
    fn save_and_read_with_matching_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.key");
        let mk = MasterKey::create().unwrap();
        mk.save("foo", &path).unwrap();

        let reloaded = MasterKey::read("foo", &path).unwrap();
        assert_eq!(reloaded.as_bytes(), mk.as_bytes());

        assert!(matches!(
            MasterKey::read("bar", &path),
            Err(CryptoError::WrongPassphrase)
        ));
    }

    #[test]
    fn empty_passphrase_uses_dev_iterations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.key");
        let mk = MasterKey::create().unwrap();
        mk.save("", &path).unwrap();

        let data = fs::read(&path).unwrap();
        let iterations =
            u32::from_le_bytes(data[1 + SALT_SIZE..1 + SALT_SIZE + 4].try_into().unwrap());
        assert_eq!(iterations, PBKDF2_ITERATIONS_DEV);
        assert_eq!(
            MasterKey::read("", &path).unwrap().as_bytes(),
            mk.as_bytes()
        );
    }

    #[test]
    fn unknown_key_file_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.key");
        let mk = MasterKey::create().unwrap();
        mk.save("foo", &path).unwrap();

        let mut data = fs::read(&path).unwrap();
        data[0] = 9;
        fs::write(&path, &data).unwrap();
        assert!(matches!(
            MasterKey::read("foo", &path),
            Err(CryptoError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn encrypted_key_is_always_96_bytes() {
        let mk = MasterKey::create().unwrap();
        for _ in 0..32 {
            let wrapped = mk.new_encrypted_key().unwrap();
            assert_eq!(wrapped.len(), ENCRYPTED_KEY_SIZE);
            let key = mk.decrypt_key(&wrapped).unwrap();
            assert_eq!(key.len(), 32);
        }
    }

    #[test]
    fn decrypt_key_rejects_wrong_length() {
        let mk = MasterKey::create().unwrap();
        assert!(matches!(
            mk.decrypt_key(&[0u8; 95]),
            Err(CryptoError::InvalidKeyLength(95))
        ));
    }

    #[test]
    fn keyed_hash_is_deterministic_and_key_bound() {
        let a = MasterKey::create().unwrap();
        let b = MasterKey::create().unwrap();
        assert_eq!(a.hash(b"data"), a.hash(b"data"));
        assert_ne!(a.hash(b"data"), b.hash(b"data"));
        assert_ne!(a.hash(b"data"), a.hash(b"datb"));
    }
}
