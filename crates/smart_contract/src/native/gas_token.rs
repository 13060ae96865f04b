//! The GAS utility token.
//!
//! Backs all fee accounting: senders are debited system and network fees in
//! the pre-transaction trigger, and the primary validator collects the
//! network fees afterwards.

use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use tracing::debug;

use neo3_core::{ECPoint, UInt160};
use neo3_persistence::DataCache;
use neo3_vm::StackItem;

use crate::contract::signature_address;
use crate::exec_result::{AppStackItem, NotificationEvent};
use crate::interop::InteropContext;
use crate::native::{native_hash, NativeContract, NativeMethod};
use crate::{ContractError, ContractResult};

const PREFIX_ACCOUNT: u8 = 0x14;
const PREFIX_TOTAL_SUPPLY: u8 = 0x0B;

/// GAS uses eight decimals.
pub const GAS_DECIMALS: u32 = 8;
/// One whole GAS in fractions.
pub const GAS_FACTOR: i64 = 100_000_000;
/// Genesis distribution: 52 million GAS.
pub const INITIAL_GAS: i64 = 52_000_000 * GAS_FACTOR;

/// The GAS token contract.
pub struct GasToken {
    hash: UInt160,
    methods: Vec<NativeMethod>,
}

impl GasToken {
    pub const ID: i32 = -6;
    pub const NAME: &'static str = "GasToken";

    pub fn new() -> Self {
        Self {
            hash: native_hash(Self::NAME),
            methods: vec![
                NativeMethod::safe("symbol", 0, 0),
                NativeMethod::safe("decimals", 0, 0),
                NativeMethod::safe("totalSupply", 0, 1 << 15),
                NativeMethod::safe("balanceOf", 1, 1 << 15),
                NativeMethod::unsafe_method("transfer", 4, 1 << 17),
            ],
        }
    }

    fn account_key(account: &UInt160) -> Vec<u8> {
        let mut key = Vec::with_capacity(21);
        key.push(PREFIX_ACCOUNT);
        key.extend_from_slice(account.as_bytes());
        key
    }

    /// The GAS balance of an account, in fractions.
    pub fn balance_of(&self, dao: &DataCache, account: &UInt160) -> BigInt {
        dao.get_storage_item(Self::ID, &Self::account_key(account))
            .ok()
            .flatten()
            .map(|bytes| BigInt::from_signed_bytes_le(&bytes))
            .unwrap_or_else(BigInt::zero)
    }

    /// The circulating supply, in fractions.
    pub fn total_supply(&self, dao: &DataCache) -> BigInt {
        dao.get_storage_item(Self::ID, &[PREFIX_TOTAL_SUPPLY])
            .ok()
            .flatten()
            .map(|bytes| BigInt::from_signed_bytes_le(&bytes))
            .unwrap_or_else(BigInt::zero)
    }

    fn set_balance(dao: &mut DataCache, account: &UInt160, balance: &BigInt) {
        let key = Self::account_key(account);
        if balance.is_zero() {
            dao.delete_storage_item(Self::ID, &key);
        } else {
            dao.put_storage_item(Self::ID, &key, balance.to_signed_bytes_le());
        }
    }

    fn set_total_supply(dao: &mut DataCache, supply: &BigInt) {
        dao.put_storage_item(
            Self::ID,
            &[PREFIX_TOTAL_SUPPLY],
            supply.to_signed_bytes_le(),
        );
    }

    /// Credits freshly issued GAS to an account.
    pub fn mint(&self, dao: &mut DataCache, account: &UInt160, amount: &BigInt) {
        if amount.is_zero() {
            return;
        }
        let balance = self.balance_of(dao, account) + amount;
        Self::set_balance(dao, account, &balance);
        let supply = self.total_supply(dao) + amount;
        Self::set_total_supply(dao, &supply);
    }

    /// Destroys GAS held by an account; the balance must cover it.
    pub fn burn(&self, dao: &mut DataCache, account: &UInt160, amount: &BigInt) -> ContractResult<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let balance = self.balance_of(dao, account);
        if balance < *amount {
            return Err(ContractError::InvalidOperation(format!(
                "burn of {amount} exceeds balance {balance} of {account}"
            )));
        }
        let remaining = balance - amount;
        Self::set_balance(dao, account, &remaining);
        let supply = self.total_supply(dao) - amount;
        Self::set_total_supply(dao, &supply);
        Ok(())
    }

    /// Moves GAS between accounts; `from` must have witnessed the execution.
    pub fn transfer(
        &self,
        ctx: &mut InteropContext<'_>,
        from: &UInt160,
        to: &UInt160,
        amount: &BigInt,
    ) -> ContractResult<bool> {
        if amount.is_negative() {
            return Err(ContractError::InvalidOperation(
                "negative transfer amount".into(),
            ));
        }
        if !ctx.check_witness(from) {
            return Ok(false);
        }
        let from_balance = self.balance_of(ctx.dao, from);
        if from_balance < *amount {
            return Ok(false);
        }
        if from != to && !amount.is_zero() {
            let remaining = from_balance - amount;
            Self::set_balance(ctx.dao, from, &remaining);
            let to_balance = self.balance_of(ctx.dao, to) + amount;
            Self::set_balance(ctx.dao, to, &to_balance);
        }
        ctx.notify(NotificationEvent {
            contract: self.hash,
            name: "Transfer".into(),
            state: vec![
                AppStackItem::Bytes(from.as_bytes().to_vec()),
                AppStackItem::Bytes(to.as_bytes().to_vec()),
                AppStackItem::Integer(amount.clone()),
            ],
        });
        Ok(true)
    }

    fn primary_account(&self, ctx: &InteropContext<'_>) -> Option<UInt160> {
        let block = ctx.persisting_block?;
        let validators: Vec<ECPoint> = ctx.settings.standby_validators();
        let key = validators.get(block.header.primary_index as usize)?;
        Some(signature_address(key))
    }
}

impl Default for GasToken {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeContract for GasToken {
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
            "symbol" => Ok(StackItem::byte_string(b"GAS".to_vec())),
            "decimals" => Ok(StackItem::integer(i64::from(GAS_DECIMALS))),
            "totalSupply" => Ok(StackItem::Integer(self.total_supply(ctx.dao))),
            "balanceOf" => {
                let account = account_arg(&args[0])?;
                Ok(StackItem::Integer(self.balance_of(ctx.dao, &account)))
            }
            "transfer" => {
                let from = account_arg(&args[0])?;
                let to = account_arg(&args[1])?;
                let amount = args[2]
                    .try_integer()
                    .map_err(ContractError::Vm)?;
                // args[3] is opaque user data forwarded to onNEP17Payment.
                let ok = self.transfer(ctx, &from, &to, &amount)?;
                Ok(StackItem::Boolean(ok))
            }
            other => Err(ContractError::UnknownMethod(
                self.hash,
                other.to_string(),
                args.len(),
            )),
        }
    }

    fn initialize(&self, ctx: &mut InteropContext<'_>) -> ContractResult<()> {
        if !self.total_supply(ctx.dao).is_zero() {
            return Ok(());
        }
        let committee =
            crate::contract::majority_multisig_address(&ctx.settings.standby_committee)?;
        self.mint(ctx.dao, &committee, &BigInt::from(INITIAL_GAS));
        Ok(())
    }

    /// Debits every sender the full fee of its transaction.
    fn on_persist(&self, ctx: &mut InteropContext<'_>) -> ContractResult<()> {
        let Some(block) = ctx.persisting_block else {
            return Ok(());
        };
        let charges: Vec<(UInt160, BigInt)> = block
            .transactions
            .iter()
            .map(|tx| {
                (
                    tx.sender(),
                    BigInt::from(tx.system_fee) + BigInt::from(tx.network_fee),
                )
            })
            .collect();
        for (sender, fee) in charges {
            self.burn(ctx.dao, &sender, &fee)?;
            debug!(%sender, %fee, "tx fee burned");
        }
        Ok(())
    }

    /// Credits the block's network fees to the primary validator.
    fn post_persist(&self, ctx: &mut InteropContext<'_>) -> ContractResult<()> {
        let Some(block) = ctx.persisting_block else {
            return Ok(());
        };
        let net_fees: i64 = block.transactions.iter().map(|tx| tx.network_fee).sum();
        if net_fees == 0 {
            return Ok(());
        }
        if let Some(primary) = self.primary_account(ctx) {
            self.mint(ctx.dao, &primary, &BigInt::from(net_fees));
        }
        Ok(())
    }
}

fn account_arg(item: &StackItem) -> ContractResult<UInt160> {
    let bytes = item
        .try_bytes()
        .map_err(|_| ContractError::InvalidOperation("account is not bytes".into()))?;
    UInt160::from_bytes(&bytes).map_err(|e| ContractError::InvalidOperation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo3_persistence::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn mint_and_burn_track_supply() {
        let gas = GasToken::new();
        let mut dao = DataCache::new(Arc::new(MemoryStore::new()));
        let account = UInt160::from_bytes(&[1u8; 20]).unwrap();

        gas.mint(&mut dao, &account, &BigInt::from(500));
        assert_eq!(gas.balance_of(&dao, &account), BigInt::from(500));
        assert_eq!(gas.total_supply(&dao), BigInt::from(500));

        gas.burn(&mut dao, &account, &BigInt::from(200)).unwrap();
        assert_eq!(gas.balance_of(&dao, &account), BigInt::from(300));
        assert_eq!(gas.total_supply(&dao), BigInt::from(300));

        assert!(gas.burn(&mut dao, &account, &BigInt::from(1000)).is_err());
    }

    #[test]
    fn zero_balance_clears_storage() {
        let gas = GasToken::new();
        let mut dao = DataCache::new(Arc::new(MemoryStore::new()));
        let account = UInt160::from_bytes(&[2u8; 20]).unwrap();
        gas.mint(&mut dao, &account, &BigInt::from(10));
        gas.burn(&mut dao, &account, &BigInt::from(10)).unwrap();
        assert!(dao
            .get_storage_item(GasToken::ID, &GasToken::account_key(&account))
            .unwrap()
            .is_none());
    }
}
