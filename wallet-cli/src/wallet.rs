use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use secp256k1::SecretKey;
use serde::{Deserialize, Serialize};
use tinychain_core::transaction::SECP;
use tinychain_core::{Address, ChainError, SignedTx, Tx};

const KEYSTORE_DIR: &str = "keystore";
const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 24;
const KEY_SIZE: usize = 32;

pub fn keystore_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(KEYSTORE_DIR)
}

/// On-disk keystore entry. The secret key is sealed with a password-derived
/// key; the plaintext nonce is prepended to the encrypted value.
#[derive(Serialize, Deserialize)]
struct KeystoreFile {
    address: Address,
    salt: String,       // hex, argon2 input
    ciphertext: String, // hex, nonce(24) || sealed secret key
}

pub struct Wallet {
    pub address: Address,
    secret: SecretKey,
}

impl Wallet {
    pub fn generate() -> Self {
        let (secret, pubkey) = SECP.generate_keypair(&mut rand::thread_rng());
        Wallet {
            address: Address::from_pubkey(&pubkey),
            secret,
        }
    }

    pub fn sign(&self, tx: Tx) -> Result<SignedTx, ChainError> {
        SignedTx::sign(tx, &self.secret)
    }
}

fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; KEY_SIZE]> {
    let params = Params::new(15 * 1000, 2, 1, Some(KEY_SIZE))
        .map_err(|e| anyhow!("argon2 params: {e}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| anyhow!("argon2: {e}"))?;
    Ok(key)
}

/// Generate a keypair and seal it under `password` in the keystore.
pub fn new_account(data_dir: &Path, password: &str) -> Result<Address> {
    let wallet = Wallet::generate();
    save(data_dir, &wallet, password)?;
    Ok(wallet.address)
}

pub fn save(data_dir: &Path, wallet: &Wallet, password: &str) -> Result<()> {
    let dir = keystore_dir(data_dir);
    fs::create_dir_all(&dir)?;

    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    let key = derive_key(password, &salt)?;

    let cipher = XChaCha20Poly1305::new_from_slice(&key)
        .map_err(|_| anyhow!("cipher initialisation failed"))?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(&nonce, wallet.secret.secret_bytes().as_slice())
        .map_err(|e| anyhow!("keystore encryption failed: {e}"))?;

    let mut ciphertext = Vec::with_capacity(NONCE_SIZE + sealed.len());
    ciphertext.extend_from_slice(nonce.as_slice());
    ciphertext.extend_from_slice(&sealed);

    let entry = KeystoreFile {
        address: wallet.address,
        salt: hex::encode(salt),
        ciphertext: hex::encode(ciphertext),
    };
    let path = dir.join(format!("{}.json", wallet.address));
    fs::write(&path, serde_json::to_string_pretty(&entry)?)?;
    Ok(())
}

pub fn load(data_dir: &Path, address: &Address, password: &str) -> Result<Wallet> {
    let path = keystore_dir(data_dir).join(format!("{}.json", address));
    let data =
        fs::read_to_string(&path).with_context(|| format!("no keystore file for {address}"))?;
    let entry: KeystoreFile = serde_json::from_str(&data)?;

    let salt = hex::decode(&entry.salt)?;
    let ciphertext = hex::decode(&entry.ciphertext)?;
    if ciphertext.len() <= NONCE_SIZE {
        return Err(anyhow!("keystore ciphertext is too short"));
    }

    let key = derive_key(password, &salt)?;
    let cipher = XChaCha20Poly1305::new_from_slice(&key)
        .map_err(|_| anyhow!("cipher initialisation failed"))?;
    let nonce = XNonce::from_slice(&ciphertext[..NONCE_SIZE]);
    let secret_bytes = cipher
        .decrypt(nonce, &ciphertext[NONCE_SIZE..])
        .map_err(|_| anyhow!("wrong password or corrupted keystore"))?;

    let secret = SecretKey::from_slice(&secret_bytes)?;
    let derived = Address::from_pubkey(&secret.public_key(&SECP));
    if derived != *address {
        return Err(anyhow!(
            "keystore address mismatch: file names {address}, key derives {derived}"
        ));
    }
    Ok(Wallet {
        address: derived,
        secret,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "tinychain_wallet_{}_{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn keystore_round_trip() {
        let dir = test_data_dir("round_trip");
        let address = new_account(&dir, "security123").unwrap();

        let wallet = load(&dir, &address, "security123").unwrap();
        assert_eq!(wallet.address, address);

        // the unsealed key signs TXs that recover to the keystore address
        let tx = Tx::new(address, Address([0x22; 20]), 1, 1, "");
        let signed = wallet.sign(tx).unwrap();
        assert!(signed.is_authentic());
    }

    #[test]
    fn wrong_password_is_rejected() {
        let dir = test_data_dir("wrong_pwd");
        let address = new_account(&dir, "security123").unwrap();
        assert!(load(&dir, &address, "hunter2").is_err());
    }

    #[test]
    fn missing_keystore_file_is_an_error() {
        let dir = test_data_dir("missing");
        assert!(load(&dir, &Address([0x01; 20]), "pw").is_err());
    }
}
