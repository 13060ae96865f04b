//! The policy native contract: runtime-tunable network parameters.

use neo3_core::UInt160;
use neo3_persistence::DataCache;
use neo3_vm::StackItem;

use crate::contract::majority_multisig_address;
use crate::interop::InteropContext;
use crate::native::{native_hash, NativeContract, NativeMethod};
use crate::{ContractError, ContractResult};

const PREFIX_FEE_PER_BYTE: u8 = 0x0A;
const PREFIX_BLOCKED_ACCOUNT: u8 = 0x0F;
const PREFIX_EXEC_FEE_FACTOR: u8 = 0x12;
const PREFIX_STORAGE_PRICE: u8 = 0x13;

/// Default network fee floor per transaction byte.
pub const DEFAULT_FEE_PER_BYTE: i64 = 1000;
/// Default multiplier for opcode and syscall base prices.
pub const DEFAULT_EXEC_FEE_FACTOR: i64 = 30;
/// Default gas price of one byte of contract storage.
pub const DEFAULT_STORAGE_PRICE: i64 = 100_000;

const MAX_EXEC_FEE_FACTOR: i64 = 100;
const MAX_FEE_PER_BYTE: i64 = 100_000_000;
const MAX_STORAGE_PRICE: i64 = 10_000_000;

/// The policy contract.
pub struct PolicyContract {
    hash: UInt160,
    methods: Vec<NativeMethod>,
}

impl PolicyContract {
    pub const ID: i32 = -7;
    pub const NAME: &'static str = "PolicyContract";

    pub fn new() -> Self {
        Self {
            hash: native_hash(Self::NAME),
            methods: vec![
                NativeMethod::safe("getFeePerByte", 0, 1 << 15),
                NativeMethod::safe("getExecFeeFactor", 0, 1 << 15),
                NativeMethod::safe("getStoragePrice", 0, 1 << 15),
                NativeMethod::safe("isBlocked", 1, 1 << 15),
                NativeMethod::unsafe_method("setFeePerByte", 1, 1 << 15),
                NativeMethod::unsafe_method("setExecFeeFactor", 1, 1 << 15),
                NativeMethod::unsafe_method("setStoragePrice", 1, 1 << 15),
                NativeMethod::unsafe_method("blockAccount", 1, 1 << 15),
                NativeMethod::unsafe_method("unblockAccount", 1, 1 << 15),
            ],
        }
    }

    fn get_i64(dao: &DataCache, prefix: u8, default: i64) -> i64 {
        dao.get_storage_item(Self::ID, &[prefix])
            .ok()
            .flatten()
            .and_then(|bytes| bytes.try_into().ok().map(i64::from_le_bytes))
            .unwrap_or(default)
    }

    fn set_i64(ctx: &mut InteropContext<'_>, prefix: u8, value: i64) {
        ctx.dao
            .put_storage_item(Self::ID, &[prefix], value.to_le_bytes().to_vec());
    }

    /// The network-fee-per-byte floor.
    pub fn fee_per_byte(&self, dao: &DataCache) -> i64 {
        Self::get_i64(dao, PREFIX_FEE_PER_BYTE, DEFAULT_FEE_PER_BYTE)
    }

    /// The execution fee multiplier.
    pub fn exec_fee_factor(&self, dao: &DataCache) -> i64 {
        Self::get_i64(dao, PREFIX_EXEC_FEE_FACTOR, DEFAULT_EXEC_FEE_FACTOR)
    }

    /// The per-byte price of contract storage.
    pub fn storage_price(&self, dao: &DataCache) -> i64 {
        Self::get_i64(dao, PREFIX_STORAGE_PRICE, DEFAULT_STORAGE_PRICE)
    }

    /// Whether the account is barred from sending transactions.
    pub fn is_blocked(&self, dao: &DataCache, account: &UInt160) -> bool {
        let mut key = Vec::with_capacity(21);
        key.push(PREFIX_BLOCKED_ACCOUNT);
        key.extend_from_slice(account.as_bytes());
        dao.get_storage_item(Self::ID, &key)
            .ok()
            .flatten()
            .is_some()
    }

    fn require_committee(&self, ctx: &InteropContext<'_>) -> ContractResult<()> {
        if ctx.check_committee()? {
            Ok(())
        } else {
            let committee = majority_multisig_address(&ctx.settings.standby_committee)?;
            Err(ContractError::WitnessFailed(committee))
        }
    }

    fn set_bounded(
        &self,
        ctx: &mut InteropContext<'_>,
        prefix: u8,
        value: i64,
        max: i64,
    ) -> ContractResult<()> {
        self.require_committee(ctx)?;
        if value <= 0 || value > max {
            return Err(ContractError::InvalidOperation(format!(
                "value {value} out of (0, {max}]"
            )));
        }
        Self::set_i64(ctx, prefix, value);
        Ok(())
    }

    fn account_arg(item: &StackItem) -> ContractResult<UInt160> {
        let bytes = item
            .try_bytes()
            .map_err(|_| ContractError::InvalidOperation("account is not bytes".into()))?;
        UInt160::from_bytes(&bytes)
            .map_err(|e| ContractError::InvalidOperation(e.to_string()))
    }
}

impl Default for PolicyContract {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeContract for PolicyContract {
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
            "getFeePerByte" => Ok(StackItem::integer(self.fee_per_byte(ctx.dao))),
            "getExecFeeFactor" => Ok(StackItem::integer(self.exec_fee_factor(ctx.dao))),
            "getStoragePrice" => Ok(StackItem::integer(self.storage_price(ctx.dao))),
            "isBlocked" => {
                let account = Self::account_arg(&args[0])?;
                Ok(StackItem::Boolean(self.is_blocked(ctx.dao, &account)))
            }
            "setFeePerByte" => {
                let value = args[0].try_i64().map_err(ContractError::Vm)?;
                self.set_bounded(ctx, PREFIX_FEE_PER_BYTE, value, MAX_FEE_PER_BYTE)?;
                Ok(StackItem::Null)
            }
            "setExecFeeFactor" => {
                let value = args[0].try_i64().map_err(ContractError::Vm)?;
                self.set_bounded(ctx, PREFIX_EXEC_FEE_FACTOR, value, MAX_EXEC_FEE_FACTOR)?;
                Ok(StackItem::Null)
            }
            "setStoragePrice" => {
                let value = args[0].try_i64().map_err(ContractError::Vm)?;
                self.set_bounded(ctx, PREFIX_STORAGE_PRICE, value, MAX_STORAGE_PRICE)?;
                Ok(StackItem::Null)
            }
            "blockAccount" => {
                self.require_committee(ctx)?;
                let account = Self::account_arg(&args[0])?;
                let mut key = vec![PREFIX_BLOCKED_ACCOUNT];
                key.extend_from_slice(account.as_bytes());
                let fresh = ctx.dao.get_storage_item(Self::ID, &key)?.is_none();
                if fresh {
                    ctx.dao.put_storage_item(Self::ID, &key, vec![0x01]);
                }
                Ok(StackItem::Boolean(fresh))
            }
            "unblockAccount" => {
                self.require_committee(ctx)?;
                let account = Self::account_arg(&args[0])?;
                let mut key = vec![PREFIX_BLOCKED_ACCOUNT];
                key.extend_from_slice(account.as_bytes());
                let existed = ctx.dao.get_storage_item(Self::ID, &key)?.is_some();
                if existed {
                    ctx.dao.delete_storage_item(Self::ID, &key);
                }
                Ok(StackItem::Boolean(existed))
            }
            other => Err(ContractError::UnknownMethod(
                self.hash,
                other.to_string(),
                args.len(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo3_persistence::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn defaults_apply_before_any_write() {
        let policy = PolicyContract::new();
        let dao = DataCache::new(Arc::new(MemoryStore::new()));
        assert_eq!(policy.fee_per_byte(&dao), DEFAULT_FEE_PER_BYTE);
        assert_eq!(policy.exec_fee_factor(&dao), DEFAULT_EXEC_FEE_FACTOR);
        assert_eq!(policy.storage_price(&dao), DEFAULT_STORAGE_PRICE);
        assert!(!policy.is_blocked(&dao, &UInt160::zero()));
    }

    #[test]
    fn stored_values_override_defaults() {
        let policy = PolicyContract::new();
        let mut dao = DataCache::new(Arc::new(MemoryStore::new()));
        dao.put_storage_item(
            PolicyContract::ID,
            &[PREFIX_FEE_PER_BYTE],
            1001i64.to_le_bytes().to_vec(),
        );
        assert_eq!(policy.fee_per_byte(&dao), 1001);
    }
}
