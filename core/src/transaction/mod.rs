use once_cell::sync::Lazy;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ChainError;
use crate::types::{Address, Hash, Sig, keccak256};

/// Process-wide signing/verification context.
pub static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// A token transfer. `data` is a free-form tag ("reward" is reserved; the
/// miner credit is implicit and no reward TXs are produced).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Tx {
    pub from: Address,
    pub to: Address,
    pub value: u64,
    pub nonce: u64,
    pub time: u64, // unix seconds
    pub data: String,
}

impl Tx {
    pub fn new(from: Address, to: Address, value: u64, nonce: u64, data: &str) -> Self {
        Tx {
            from,
            to,
            value,
            nonce,
            time: chrono::Utc::now().timestamp() as u64,
            data: data.to_string(),
        }
    }

    /// Canonical JSON encoding. Signatures commit to exactly these bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ChainError> {
        Ok(serde_json::to_vec(self)?)
    }

    fn sig_digest(&self) -> Result<[u8; 32], ChainError> {
        Ok(keccak256(&self.encode()?))
    }
}

/// A Tx plus its recoverable signature. The JSON field order is the Tx
/// fields followed by `signature`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    #[serde(flatten)]
    pub tx: Tx,
    pub signature: Sig,
}

impl SignedTx {
    pub fn sign(tx: Tx, secret: &SecretKey) -> Result<Self, ChainError> {
        let msg = Message::from_digest(tx.sig_digest()?);
        let (recovery_id, compact) = SECP
            .sign_ecdsa_recoverable(&msg, secret)
            .serialize_compact();

        let mut raw = [0u8; 65];
        raw[..64].copy_from_slice(&compact);
        raw[64] = recovery_id.to_i32() as u8;
        Ok(SignedTx {
            tx,
            signature: Sig(raw),
        })
    }

    /// True iff the signer recovered from the signature equals `from`. Any
    /// recovery failure counts as not authentic.
    pub fn is_authentic(&self) -> bool {
        match self.recover_signer() {
            Ok(signer) => signer == self.tx.from,
            Err(_) => false,
        }
    }

    fn recover_signer(&self) -> Result<Address, ChainError> {
        let msg = Message::from_digest(self.tx.sig_digest()?);
        let raw = &self.signature.0;
        let recovery_id =
            RecoveryId::from_i32(raw[64] as i32).map_err(|_| ChainError::Forged)?;
        let sig = RecoverableSignature::from_compact(&raw[..64], recovery_id)
            .map_err(|_| ChainError::Forged)?;
        let pubkey: PublicKey = SECP
            .recover_ecdsa(&msg, &sig)
            .map_err(|_| ChainError::Forged)?;
        Ok(Address::from_pubkey(&pubkey))
    }

    /// TX identity: sha256 over the signed JSON encoding. Mempool and
    /// archive maps are keyed by its hex form.
    pub fn hash(&self) -> Result<Hash, ChainError> {
        let encoded = serde_json::to_vec(self)?;
        let digest = Sha256::digest(&encoded);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Ok(Hash(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair(fill: u8) -> (SecretKey, Address) {
        let secret = SecretKey::from_slice(&[fill; 32]).unwrap();
        let pubkey = secret.public_key(&SECP);
        (secret, Address::from_pubkey(&pubkey))
    }

    #[test]
    fn sign_and_recover() {
        let (secret, from) = keypair(0x11);
        let (_, to) = keypair(0x22);
        let tx = Tx::new(from, to, 42, 1, "");
        let signed = SignedTx::sign(tx, &secret).unwrap();
        assert!(signed.is_authentic());
    }

    #[test]
    fn tampered_tx_is_forged() {
        let (secret, from) = keypair(0x11);
        let (_, to) = keypair(0x22);
        let tx = Tx::new(from, to, 42, 1, "");
        let mut signed = SignedTx::sign(tx, &secret).unwrap();

        // Same signature over a shifted timestamp must not recover the sender.
        signed.tx.time += 1;
        assert!(!signed.is_authentic());
    }

    #[test]
    fn wrong_sender_is_forged() {
        let (secret, _) = keypair(0x11);
        let (_, mallory) = keypair(0x33);
        let (_, to) = keypair(0x22);
        let tx = Tx::new(mallory, to, 1, 1, "");
        let signed = SignedTx::sign(tx, &secret).unwrap();
        assert!(!signed.is_authentic());
    }

    #[test]
    fn json_round_trip_preserves_signature() {
        let (secret, from) = keypair(0x11);
        let (_, to) = keypair(0x22);
        let signed = SignedTx::sign(Tx::new(from, to, 7, 1, "hello"), &secret).unwrap();

        let json = serde_json::to_string(&signed).unwrap();
        let decoded: SignedTx = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, signed);
        assert!(decoded.is_authentic());
        assert_eq!(decoded.hash().unwrap(), signed.hash().unwrap());
    }

    #[test]
    fn identity_hash_covers_signature() {
        let (secret, from) = keypair(0x11);
        let (_, to) = keypair(0x22);
        let tx = Tx {
            from,
            to,
            value: 1,
            nonce: 1,
            time: 1_700_000_000,
            data: String::new(),
        };
        let a = SignedTx::sign(tx.clone(), &secret).unwrap();
        let mut b = a.clone();
        b.signature.0[0] ^= 0xff;
        assert_ne!(a.hash().unwrap(), b.hash().unwrap());
    }
}
