//! Verification script builders for accounts and multisig groups.

use neo3_core::crypto::hash160;
use neo3_core::{ECPoint, UInt160};
use neo3_vm::{interop_id, OpCode, ScriptBuilder};

use crate::{ContractError, ContractResult};

/// The verification script of a single key: push the key, check one
/// signature against it.
pub fn create_signature_script(key: &ECPoint) -> Vec<u8> {
    let mut builder = ScriptBuilder::new();
    builder.emit_push_bytes(key.as_bytes());
    builder.emit_syscall(interop_id("System.Crypto.CheckSig"));
    builder.into_bytes()
}

/// The verification script of an m-of-n multisig group.
///
/// Keys are sorted so every party derives the same script and address.
pub fn create_multisig_script(m: usize, keys: &[ECPoint]) -> ContractResult<Vec<u8>> {
    let n = keys.len();
    if n == 0 || n > 1024 {
        return Err(ContractError::InvalidOperation(format!(
            "multisig group of {n} keys"
        )));
    }
    if m == 0 || m > n {
        return Err(ContractError::InvalidOperation(format!(
            "{m}-of-{n} multisig threshold"
        )));
    }
    let mut sorted: Vec<ECPoint> = keys.to_vec();
    sorted.sort();
    sorted.dedup();
    if sorted.len() != n {
        return Err(ContractError::InvalidOperation(
            "duplicate keys in multisig group".into(),
        ));
    }
    let mut builder = ScriptBuilder::new();
    builder.emit_push_i64(m as i64);
    for key in &sorted {
        builder.emit_push_bytes(key.as_bytes());
    }
    builder.emit_push_i64(n as i64);
    builder.emit_syscall(interop_id("System.Crypto.CheckMultisig"));
    Ok(builder.into_bytes())
}

/// The consensus multisig script: `n - (n-1)/3` of `n`.
pub fn create_default_multisig_script(keys: &[ECPoint]) -> ContractResult<Vec<u8>> {
    let n = keys.len();
    create_multisig_script(n - (n - 1) / 3, keys)
}

/// The committee multisig script: `n/2 + 1` of `n`.
pub fn create_majority_multisig_script(keys: &[ECPoint]) -> ContractResult<Vec<u8>> {
    let n = keys.len();
    create_multisig_script(n / 2 + 1, keys)
}

/// Address of the consensus multisig over `keys`.
pub fn default_multisig_address(keys: &[ECPoint]) -> ContractResult<UInt160> {
    Ok(hash160(&create_default_multisig_script(keys)?))
}

/// Address of the committee multisig over `keys`; zero for an empty set.
pub fn majority_multisig_address(keys: &[ECPoint]) -> ContractResult<UInt160> {
    if keys.is_empty() {
        return Ok(UInt160::zero());
    }
    Ok(hash160(&create_majority_multisig_script(keys)?))
}

/// Address of a single-key account.
pub fn signature_address(key: &ECPoint) -> UInt160 {
    hash160(&create_signature_script(key))
}

/// Whether a verification script has the single-signature shape.
pub fn is_signature_script(script: &[u8]) -> bool {
    script.len() == 40
        && script[0] == OpCode::PushData1 as u8
        && script[1] == 33
        && script[35] == OpCode::Syscall as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::SigningKey;
    use rand::rngs::OsRng;

    fn key() -> ECPoint {
        let sk = SigningKey::random(&mut OsRng);
        ECPoint::from_bytes(sk.verifying_key().to_encoded_point(true).as_bytes()).unwrap()
    }

    #[test]
    fn signature_script_shape() {
        let script = create_signature_script(&key());
        assert!(is_signature_script(&script));
    }

    #[test]
    fn multisig_address_ignores_key_order() {
        let (a, b, c) = (key(), key(), key());
        let forward = majority_multisig_address(&[a, b, c]).unwrap();
        let backward = majority_multisig_address(&[c, a, b]).unwrap();
        assert_eq!(forward, backward);
    }

    #[test]
    fn thresholds() {
        // 4 keys: committee majority 3, consensus 3; 7 keys: 4 and 5.
        let keys4: Vec<ECPoint> = (0..4).map(|_| key()).collect();
        assert!(create_multisig_script(3, &keys4).is_ok());
        assert!(create_multisig_script(5, &keys4).is_err());
        assert!(create_multisig_script(0, &keys4).is_err());
    }

    #[test]
    fn empty_committee_has_zero_address() {
        assert_eq!(majority_multisig_address(&[]).unwrap(), UInt160::zero());
    }
}
