//! The NEO governance token: committee and validator bookkeeping.

use num_bigint::BigInt;
use num_traits::Zero;

use neo3_core::{ECPoint, UInt160};
use neo3_persistence::DataCache;
use neo3_vm::StackItem;

use crate::contract::{default_multisig_address, majority_multisig_address};
use crate::interop::InteropContext;
use crate::native::{native_hash, NativeContract, NativeMethod};
use crate::{ContractError, ContractResult};

const PREFIX_ACCOUNT: u8 = 0x14;
const PREFIX_TOTAL_SUPPLY: u8 = 0x0B;

/// Fixed issuance: one hundred million indivisible NEO.
pub const NEO_TOTAL_SUPPLY: i64 = 100_000_000;

/// The NEO token contract.
pub struct NeoToken {
    hash: UInt160,
    methods: Vec<NativeMethod>,
}

impl NeoToken {
    pub const ID: i32 = -5;
    pub const NAME: &'static str = "NeoToken";

    pub fn new() -> Self {
        Self {
            hash: native_hash(Self::NAME),
            methods: vec![
                NativeMethod::safe("symbol", 0, 0),
                NativeMethod::safe("decimals", 0, 0),
                NativeMethod::safe("totalSupply", 0, 1 << 15),
                NativeMethod::safe("balanceOf", 1, 1 << 15),
                NativeMethod::safe("getCommittee", 0, 1 << 15),
                NativeMethod::safe("getNextBlockValidators", 0, 1 << 15),
            ],
        }
    }

    fn account_key(account: &UInt160) -> Vec<u8> {
        let mut key = Vec::with_capacity(21);
        key.push(PREFIX_ACCOUNT);
        key.extend_from_slice(account.as_bytes());
        key
    }

    /// The NEO balance of an account.
    pub fn balance_of(&self, dao: &DataCache, account: &UInt160) -> BigInt {
        dao.get_storage_item(Self::ID, &Self::account_key(account))
            .ok()
            .flatten()
            .map(|bytes| BigInt::from_signed_bytes_le(&bytes))
            .unwrap_or_else(BigInt::zero)
    }

    /// The committee, sorted for deterministic addresses.
    pub fn committee(&self, settings: &neo3_config::ProtocolSettings) -> Vec<ECPoint> {
        let mut keys = settings.standby_committee.clone();
        keys.sort();
        keys
    }

    /// Address the committee multisig controls.
    pub fn committee_address(
        &self,
        settings: &neo3_config::ProtocolSettings,
    ) -> ContractResult<UInt160> {
        majority_multisig_address(&settings.standby_committee)
    }

    /// Validators of the next block.
    pub fn next_block_validators(
        &self,
        settings: &neo3_config::ProtocolSettings,
    ) -> Vec<ECPoint> {
        settings.standby_validators()
    }

    /// The `nextConsensus` address for the current validator set.
    pub fn next_consensus_address(
        &self,
        settings: &neo3_config::ProtocolSettings,
    ) -> ContractResult<UInt160> {
        let validators = self.next_block_validators(settings);
        if validators.is_empty() {
            return Ok(UInt160::zero());
        }
        default_multisig_address(&validators)
    }
}

impl Default for NeoToken {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeContract for NeoToken {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn id(&self) -> i32 {
        Self::ID
    }

    fn hash(&self) -> UInt160 {
        self.hash
    }

    fn methods(&self) -> &[NativeMethod] {
        &self.methods
    }

    fn invoke(
        &self,
        ctx: &mut InteropContext<'_>,
        method: &str,
        args: Vec<StackItem>,
    ) -> ContractResult<StackItem> {
        match method {
            "symbol" => Ok(StackItem::byte_string(b"NEO".to_vec())),
            "decimals" => Ok(StackItem::integer(0)),
            "totalSupply" => Ok(StackItem::integer(NEO_TOTAL_SUPPLY)),
            "balanceOf" => {
                let bytes = args[0]
                    .try_bytes()
                    .map_err(|_| ContractError::InvalidOperation("account is not bytes".into()))?;
                let account = UInt160::from_bytes(&bytes)
                    .map_err(|e| ContractError::InvalidOperation(e.to_string()))?;
                Ok(StackItem::Integer(self.balance_of(ctx.dao, &account)))
            }
            "getCommittee" => Ok(StackItem::array(
                self.committee(ctx.settings)
                    .iter()
                    .map(|k| StackItem::byte_string(k.as_bytes().to_vec()))
                    .collect(),
            )),
            "getNextBlockValidators" => Ok(StackItem::array(
                self.next_block_validators(ctx.settings)
                    .iter()
                    .map(|k| StackItem::byte_string(k.as_bytes().to_vec()))
                    .collect(),
            )),
            other => Err(ContractError::UnknownMethod(
                self.hash,
                other.to_string(),
                args.len(),
            )),
        }
    }

    fn initialize(&self, ctx: &mut InteropContext<'_>) -> ContractResult<()> {
        let supply_key = [PREFIX_TOTAL_SUPPLY];
        if ctx.dao.get_storage_item(Self::ID, &supply_key)?.is_some() {
            return Ok(());
        }
        ctx.dao.put_storage_item(
            Self::ID,
            &supply_key,
            BigInt::from(NEO_TOTAL_SUPPLY).to_signed_bytes_le(),
        );
        let committee = self.committee_address(ctx.settings)?;
        ctx.dao.put_storage_item(
            Self::ID,
            &Self::account_key(&committee),
            BigInt::from(NEO_TOTAL_SUPPLY).to_signed_bytes_le(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo3_config::ProtocolSettings;

    #[test]
    fn empty_committee_yields_zero_consensus_address() {
        let token = NeoToken::new();
        let settings = ProtocolSettings::default();
        assert_eq!(
            token.next_consensus_address(&settings).unwrap(),
            UInt160::zero()
        );
    }
}
