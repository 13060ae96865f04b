//! The oracle native contract.
//!
//! Carries the request price and verifies that oracle response transactions
//! are witnessed by the currently designated oracle set. Response payloads
//! themselves ride in the `OracleResponse` transaction attribute, which the
//! mempool indexes by request id.

use neo3_core::transaction::AttributeType;
use neo3_core::UInt160;
use neo3_persistence::DataCache;
use neo3_vm::StackItem;

use crate::contract::majority_multisig_address;
use crate::interop::InteropContext;
use crate::native::{native_hash, NativeContract, NativeMethod};
use crate::{ContractError, ContractResult};

const PREFIX_PRICE: u8 = 0x05;

/// Default price charged per oracle request: 0.5 GAS.
pub const DEFAULT_ORACLE_PRICE: i64 = 50_000_000;

/// The oracle contract.
pub struct OracleContract {
    hash: UInt160,
    methods: Vec<NativeMethod>,
}

impl OracleContract {
    pub const ID: i32 = -9;
    pub const NAME: &'static str = "OracleContract";

    pub fn new() -> Self {
        Self {
            hash: native_hash(Self::NAME),
            methods: vec![
                NativeMethod::safe("getPrice", 0, 1 << 15),
                NativeMethod::unsafe_method("setPrice", 1, 1 << 15),
                NativeMethod::safe("verify", 0, 1 << 15),
            ],
        }
    }

    /// The request price, in GAS fractions.
    pub fn price(&self, dao: &DataCache) -> i64 {
        dao.get_storage_item(Self::ID, &[PREFIX_PRICE])
            .ok()
            .flatten()
            .and_then(|bytes| bytes.try_into().ok().map(i64::from_le_bytes))
            .unwrap_or(DEFAULT_ORACLE_PRICE)
    }

}

impl Default for OracleContract {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeContract for OracleContract {
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
            "getPrice" => Ok(StackItem::integer(self.price(ctx.dao))),
            "setPrice" => {
                if !ctx.check_committee()? {
                    let committee =
                        majority_multisig_address(&ctx.settings.standby_committee)?;
                    return Err(ContractError::WitnessFailed(committee));
                }
                let price = args[0].try_i64().map_err(ContractError::Vm)?;
                if price <= 0 {
                    return Err(ContractError::InvalidOperation(format!(
                        "oracle price {price} must be positive"
                    )));
                }
                ctx.dao
                    .put_storage_item(Self::ID, &[PREFIX_PRICE], price.to_le_bytes().to_vec());
                Ok(StackItem::Null)
            }
            "verify" => {
                let has_response = ctx
                    .tx
                    .map(|tx| !tx.get_attributes(AttributeType::OracleResponse).is_empty())
                    .unwrap_or(false);
                Ok(StackItem::Boolean(has_response))
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
    fn default_price_until_set() {
        let oracle = OracleContract::new();
        let mut dao = DataCache::new(Arc::new(MemoryStore::new()));
        assert_eq!(oracle.price(&dao), DEFAULT_ORACLE_PRICE);
        dao.put_storage_item(
            OracleContract::ID,
            &[PREFIX_PRICE],
            123i64.to_le_bytes().to_vec(),
        );
        assert_eq!(oracle.price(&dao), 123);
    }
}
