//! Hashing and secp256r1 key material.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use neo3_io::{BinaryWriter, IoError, IoResult, MemoryReader, Serializable};
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use ripemd::Ripemd160;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};
use crate::uint160::UInt160;
use crate::uint256::UInt256;

/// SHA-256 of the input.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Double SHA-256, the identity hash of blocks and transactions.
pub fn hash256(data: &[u8]) -> UInt256 {
    UInt256(sha256(&sha256(data)))
}

/// RIPEMD-160 over SHA-256, the identity hash of scripts and accounts.
pub fn hash160(data: &[u8]) -> UInt160 {
    let sha = sha256(data);
    let mut hasher = Ripemd160::new();
    hasher.update(sha);
    UInt160(hasher.finalize().into())
}

/// The byte length of a compressed secp256r1 public key.
pub const EC_POINT_SIZE: usize = 33;

/// A compressed secp256r1 public key.
///
/// Validated on construction; ordered by compressed encoding so designated
/// node lists and multisig participants sort deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ECPoint([u8; EC_POINT_SIZE]);

impl ECPoint {
    /// Builds a point from its 33-byte compressed encoding.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != EC_POINT_SIZE {
            return Err(CoreError::InvalidSignature(format!(
                "public key must be {EC_POINT_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|e| CoreError::InvalidSignature(format!("not on curve: {e}")))?;
        let mut out = [0u8; EC_POINT_SIZE];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// Compressed encoding.
    pub fn as_bytes(&self) -> &[u8; EC_POINT_SIZE] {
        &self.0
    }

    /// Verifies an ECDSA-SHA256 signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(key) = VerifyingKey::from_sec1_bytes(&self.0) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(signature) else {
            return false;
        };
        key.verify(message, &sig).is_ok()
    }
}

impl PartialOrd for ECPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ECPoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Display for ECPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for ECPoint {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|e| CoreError::InvalidSignature(format!("invalid hex: {e}")))?;
        Self::from_bytes(&bytes)
    }
}

impl Serializable for ECPoint {
    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_bytes(&self.0)
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        let bytes = reader.read_array::<EC_POINT_SIZE>()?;
        Self::from_bytes(&bytes).map_err(|e| IoError::Format(e.to_string()))
    }

    fn size(&self) -> usize {
        EC_POINT_SIZE
    }
}

impl Serialize for ECPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ECPoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Signer;
    use p256::ecdsa::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn hash160_of_empty_input() {
        // RIPEMD160(SHA256("")) is a fixed vector.
        let h = hash160(&[]);
        assert_eq!(
            hex::encode(h.as_bytes()),
            "b472a266d0bd89c13706a4132ccfb16f7c3b9fcb"
        );
    }

    #[test]
    fn point_round_trip_and_verify() {
        let sk = SigningKey::random(&mut OsRng);
        let encoded = sk.verifying_key().to_encoded_point(true);
        let point = ECPoint::from_bytes(encoded.as_bytes()).unwrap();

        let message = b"state root";
        let signature: Signature = sk.sign(message);
        assert!(point.verify(message, &signature.to_bytes()));
        assert!(!point.verify(b"another message", &signature.to_bytes()));
    }

    #[test]
    fn rejects_bytes_off_curve() {
        assert!(ECPoint::from_bytes(&[0x02; 33]).is_err());
        assert!(ECPoint::from_bytes(&[0u8; 33]).is_err());
    }
}
