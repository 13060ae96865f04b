//! The ledger native contract: chain data exposed to scripts.

use neo3_core::{UInt160, UInt256};
use neo3_vm::StackItem;

use crate::interop::InteropContext;
use crate::native::{native_hash, NativeContract, NativeMethod};
use crate::{ContractError, ContractResult};

/// The ledger contract.
pub struct LedgerContract {
    hash: UInt160,
    methods: Vec<NativeMethod>,
}

impl LedgerContract {
    pub const ID: i32 = -4;
    pub const NAME: &'static str = "LedgerContract";

    pub fn new() -> Self {
        Self {
            hash: native_hash(Self::NAME),
            methods: vec![
                NativeMethod::safe("currentHash", 0, 1 << 15),
                NativeMethod::safe("currentIndex", 0, 1 << 15),
                NativeMethod::safe("getBlock", 1, 1 << 16),
                NativeMethod::safe("getTransaction", 1, 1 << 15),
                NativeMethod::safe("getTransactionHeight", 1, 1 << 15),
            ],
        }
    }

    fn hash_arg(item: &StackItem) -> ContractResult<UInt256> {
        let bytes = item
            .try_bytes()
            .map_err(|_| ContractError::InvalidOperation("hash is not bytes".into()))?;
        UInt256::from_bytes(&bytes).map_err(|e| ContractError::InvalidOperation(e.to_string()))
    }

    /// Whether a block at `index` still falls inside the traceability
    /// window ending at the current height.
    fn is_traceable(ctx: &InteropContext<'_>, index: u32) -> bool {
        let current = ctx.current_height();
        index <= current
            && index >= current.saturating_sub(ctx.settings.max_traceable_blocks)
    }
}

impl Default for LedgerContract {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeContract for LedgerContract {
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
            "currentHash" => match ctx.dao.get_current_block()? {
                Some((hash, _)) => Ok(StackItem::byte_string(hash.as_bytes().to_vec())),
                None => Ok(StackItem::Null),
            },
            "currentIndex" => match ctx.dao.get_current_block()? {
                Some((_, index)) => Ok(StackItem::integer(i64::from(index))),
                None => Ok(StackItem::integer(-1)),
            },
            "getBlock" => {
                let hash = Self::hash_arg(&args[0])?;
                match ctx.dao.get_block(&hash)? {
                    Some(block) if Self::is_traceable(ctx, block.index()) => {
                        Ok(StackItem::array(vec![
                            StackItem::byte_string(block.hash().as_bytes().to_vec()),
                            StackItem::integer(i64::from(block.header.version)),
                            StackItem::byte_string(block.header.prev_hash.as_bytes().to_vec()),
                            StackItem::byte_string(
                                block.header.merkle_root.as_bytes().to_vec(),
                            ),
                            StackItem::integer(block.header.timestamp as i64),
                            StackItem::integer(i64::from(block.index())),
                            StackItem::integer(block.transactions.len() as i64),
                        ]))
                    }
                    _ => Ok(StackItem::Null),
                }
            }
            "getTransaction" => {
                let hash = Self::hash_arg(&args[0])?;
                match ctx.dao.get_transaction(&hash)? {
                    Some((height, tx)) if Self::is_traceable(ctx, height) => {
                        Ok(StackItem::array(vec![
                            StackItem::byte_string(tx.hash().as_bytes().to_vec()),
                            StackItem::integer(i64::from(tx.nonce)),
                            StackItem::byte_string(tx.sender().as_bytes().to_vec()),
                            StackItem::integer(tx.system_fee),
                            StackItem::integer(tx.network_fee),
                            StackItem::integer(i64::from(tx.valid_until_block)),
                            StackItem::byte_string(tx.script.clone()),
                        ]))
                    }
                    _ => Ok(StackItem::Null),
                }
            }
            "getTransactionHeight" => {
                let hash = Self::hash_arg(&args[0])?;
                match ctx.dao.get_transaction(&hash)? {
                    Some((height, _)) if Self::is_traceable(ctx, height) => {
                        Ok(StackItem::integer(i64::from(height)))
                    }
                    _ => Ok(StackItem::integer(-1)),
                }
            }
            other => Err(ContractError::UnknownMethod(
                self.hash,
                other.to_string(),
                args.len(),
            )),
        }
    }

    /// Writes the persisting block and its transactions into the DAO.
    fn on_persist(&self, ctx: &mut InteropContext<'_>) -> ContractResult<()> {
        let Some(block) = ctx.persisting_block else {
            return Ok(());
        };
        let block = block.clone();
        ctx.dao.put_block(&block)?;
        for tx in &block.transactions {
            ctx.dao.put_transaction(block.index(), tx)?;
        }
        ctx.dao.put_current_block(&block.hash(), block.index());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_engine::Trigger;
    use neo3_config::ProtocolSettings;
    use neo3_core::{Block, BlockHeader, Signer, Transaction, Witness};
    use neo3_persistence::{DataCache, MemoryStore};
    use std::sync::Arc;

    fn sample_chain_data() -> (Block, Transaction) {
        let tx = Transaction {
            nonce: 7,
            valid_until_block: 100,
            signers: vec![Signer::called_by_entry(UInt160::zero())],
            script: vec![0x40],
            witnesses: vec![Witness::default()],
            ..Transaction::default()
        };
        let block = Block {
            header: BlockHeader {
                version: 0,
                prev_hash: UInt256::zero(),
                merkle_root: UInt256::zero(),
                timestamp: 1,
                nonce: 2,
                index: 1,
                primary_index: 0,
                next_consensus: UInt160::zero(),
                witness: Witness::default(),
            },
            transactions: vec![tx.clone()],
        };
        (block, tx)
    }

    fn query(
        ledger: &LedgerContract,
        dao: &mut DataCache,
        settings: &ProtocolSettings,
        method: &str,
        hash: &[u8],
    ) -> StackItem {
        let mut notifications = Vec::new();
        let mut ctx = InteropContext {
            dao,
            settings,
            trigger: Trigger::Application,
            tx: None,
            persisting_block: None,
            entry_script_hash: None,
            calling_script_hash: None,
            current_script_hash: None,
            notifications: &mut notifications,
        };
        ledger
            .invoke(&mut ctx, method, vec![StackItem::byte_string(hash.to_vec())])
            .unwrap()
    }

    #[test]
    fn queries_respect_the_traceability_window() {
        let ledger = LedgerContract::new();
        let mut settings = ProtocolSettings::default();
        settings.max_traceable_blocks = 2;
        let mut dao = DataCache::new(Arc::new(MemoryStore::new()));

        let (block, tx) = sample_chain_data();
        dao.put_block(&block).unwrap();
        dao.put_transaction(1, &tx).unwrap();
        let block_hash = block.hash();
        let tx_hash = tx.hash();

        // Height 1 is inside a 2-block window ending at height 3.
        dao.put_current_block(&block_hash, 3);
        let height = query(
            &ledger,
            &mut dao,
            &settings,
            "getTransactionHeight",
            tx_hash.as_bytes(),
        );
        assert_eq!(height.try_i64().unwrap(), 1);
        assert!(!query(&ledger, &mut dao, &settings, "getBlock", block_hash.as_bytes())
            .is_null());

        // At height 10 the data is still stored but no longer reachable.
        dao.put_current_block(&block_hash, 10);
        let height = query(
            &ledger,
            &mut dao,
            &settings,
            "getTransactionHeight",
            tx_hash.as_bytes(),
        );
        assert_eq!(height.try_i64().unwrap(), -1);
        assert!(query(&ledger, &mut dao, &settings, "getBlock", block_hash.as_bytes())
            .is_null());
        assert!(query(
            &ledger,
            &mut dao,
            &settings,
            "getTransaction",
            tx_hash.as_bytes()
        )
        .is_null());
    }
}
