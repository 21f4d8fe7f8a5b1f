use std::fmt;
use std::str::FromStr;

use secp256k1::PublicKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tiny_keccak::{Hasher, Keccak};

use crate::error::ChainError;

/// keccak256 digest, as used for account address derivation.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    out
}

/// 32-byte content hash. JSON form is 64 lowercase hex chars; "empty" means
/// all zeros.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub fn zero() -> Self {
        Hash([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Accepts an optional 0x prefix.
    pub fn from_hex(s: &str) -> Result<Self, ChainError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(ChainError::MalformedHex(
                hex::FromHexError::InvalidStringLength,
            ));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Hash(out))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash::from_hex(s)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// 20-byte account identifier: the low 20 bytes of keccak256 over the
/// uncompressed public key (without the 0x04 prefix byte). JSON form is
/// 0x-prefixed lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn from_pubkey(pubkey: &PublicKey) -> Self {
        let uncompressed = pubkey.serialize_uncompressed();
        let digest = keccak256(&uncompressed[1..]);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        Address(out)
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, ChainError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        if bytes.len() != 20 {
            return Err(ChainError::MalformedHex(
                hex::FromHexError::InvalidStringLength,
            ));
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Address(out))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::from_hex(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// 65-byte recoverable ECDSA signature: r(32) || s(32) || v(1), v in {0, 1}.
/// JSON form is 130 hex chars.
#[derive(Clone, PartialEq, Eq)]
pub struct Sig(pub [u8; 65]);

impl fmt::Debug for Sig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sig({})", hex::encode(self.0))
    }
}

impl Serialize for Sig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Sig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(&s))
            .map_err(serde::de::Error::custom)?;
        if bytes.len() != 65 {
            return Err(serde::de::Error::custom(format!(
                "signature must be 65 bytes, got {}",
                bytes.len()
            )));
        }
        let mut out = [0u8; 65];
        out.copy_from_slice(&bytes);
        Ok(Sig(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::{Secp256k1, SecretKey};

    #[test]
    fn hash_hex_round_trip() {
        let hash = Hash([0xab; 32]);
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Hash::from_hex(&hex).unwrap(), hash);
        // 0x prefix is accepted on input
        assert_eq!(Hash::from_hex(&format!("0x{hex}")).unwrap(), hash);
    }

    #[test]
    fn zero_hash() {
        assert!(Hash::zero().is_zero());
        assert!(!Hash([1u8; 32]).is_zero());
        assert_eq!(Hash::from_hex(&"0".repeat(64)).unwrap(), Hash::zero());
    }

    #[test]
    fn hash_rejects_bad_lengths() {
        assert!(Hash::from_hex("abcd").is_err());
        assert!(Hash::from_hex(&"f".repeat(63)).is_err());
    }

    #[test]
    fn address_hex_round_trip() {
        let addr = Address([0x5a; 20]);
        let hex = addr.to_hex();
        assert!(hex.starts_with("0x"));
        assert_eq!(hex.len(), 42);
        assert_eq!(Address::from_hex(&hex).unwrap(), addr);
        // bare hex is accepted too
        assert_eq!(Address::from_hex(&hex[2..]).unwrap(), addr);
    }

    #[test]
    fn address_derivation_is_deterministic() {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0x42; 32]).unwrap();
        let pubkey = secret.public_key(&secp);
        assert_eq!(Address::from_pubkey(&pubkey), Address::from_pubkey(&pubkey));
    }

    #[test]
    fn json_forms() {
        let hash = Hash([0x01; 32]);
        assert_eq!(
            serde_json::to_string(&hash).unwrap(),
            format!("\"{}\"", "01".repeat(32))
        );

        let addr = Address([0x02; 20]);
        assert_eq!(
            serde_json::to_string(&addr).unwrap(),
            format!("\"0x{}\"", "02".repeat(20))
        );

        let sig = Sig([0x03; 65]);
        let json = serde_json::to_string(&sig).unwrap();
        assert_eq!(json.len(), 132); // 130 hex chars + quotes
        assert_eq!(serde_json::from_str::<Sig>(&json).unwrap(), sig);
    }
}
