//! The blockchain orchestrator.
//!
//! Serializes block persistence through one critical section: header checks,
//! per-transaction VM execution against stacked DAO caches, the MPT advance
//! and the atomic commit, then subscriber notification and mempool cleanup.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use num_bigint::BigInt;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use neo3_config::ProtocolSettings;
use neo3_core::constants::{MAX_TRANSACTION_SIZE, MAX_VALID_UNTIL_BLOCK_INCREMENT};
use neo3_core::transaction::AttributeType;
use neo3_core::{
    Block, BlockHeader, CoreError, MPTRoot, Transaction, TransactionAttribute, UInt160, UInt256,
    Witness,
};
use neo3_io::{from_bytes, to_bytes};
use neo3_mpt::Trie;
use neo3_persistence::{DataCache, Store};
use neo3_smart_contract::exec_result::put_exec_result;
use neo3_smart_contract::{
    majority_multisig_address, ApplicationEngine, ContractError, InteropContext, NativeRegistry,
    Trigger,
};
use neo3_vm::{CallFlags, OpCode, VMState};

use crate::mempool::{Feer, MempoolError, Pool};

/// Genesis timestamp, milliseconds.
const GENESIS_TIMESTAMP: u64 = 1_468_595_301_000;
const GENESIS_NONCE: u64 = 2_083_236_893;

/// Gas allowed to a single witness verification, absent a larger fee budget.
const MAX_VERIFICATION_GAS: i64 = 150_000_000;

/// Rejection reasons for relayed transactions; stable for RPC mapping.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("transaction of {0} bytes exceeds the size limit")]
    OversizedTransaction(usize),

    #[error("invalid transaction: {0}")]
    InvalidFormat(#[from] CoreError),

    #[error("transaction expired at {valid_until}, height is {height}")]
    Expired { valid_until: u32, height: u32 },

    #[error("transaction not valid before {0}")]
    NotYetValid(u32),

    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("sender cannot cover declared fees")]
    InsufficientFunds,

    #[error("network fee below size and verification cost")]
    InsufficientNetworkFee,

    #[error("witness verification failed for {0}")]
    WitnessFailed(UInt160),

    #[error(transparent)]
    Mempool(#[from] MempoolError),

    #[error("storage failure: {0}")]
    Storage(#[from] neo3_persistence::StorageError),

    #[error("contract failure: {0}")]
    Contract(#[from] ContractError),
}

/// Failures of block-level operations.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("storage failure: {0}")]
    Storage(#[from] neo3_persistence::StorageError),

    #[error("state trie failure: {0}")]
    Mpt(#[from] neo3_mpt::MptError),

    #[error("contract failure: {0}")]
    Contract(#[from] ContractError),

    #[error("codec failure: {0}")]
    Io(#[from] neo3_io::IoError),

    #[error("state root mismatch at {height}: local {local}, submitted {submitted}")]
    StateRootMismatch {
        height: u32,
        local: UInt256,
        submitted: UInt256,
    },

    #[error("node refuses writes after a failed commit")]
    WritesRefused,
}

pub type ChainResult<T> = std::result::Result<T, ChainError>;

/// What subscribers hear about.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    /// A block was committed.
    Block(Block),
    /// A transaction in a committed block finished executing.
    TransactionExecuted { hash: UInt256, success: bool },
    /// A witnessed state root was accepted.
    StateRoot(MPTRoot),
}

/// The chain: storage, natives, mempool and the persist pipeline.
pub struct Blockchain {
    settings: Arc<ProtocolSettings>,
    store: Arc<dyn Store>,
    natives: Arc<NativeRegistry>,
    mempool: Arc<Pool>,
    /// Covers header validation, execution and commit.
    persist_lock: Mutex<()>,
    tip: RwLock<(UInt256, u32)>,
    events: broadcast::Sender<ChainEvent>,
    /// Set after a failed commit; every later write is refused.
    writes_refused: AtomicBool,
}

impl Blockchain {
    /// Opens the chain over a store, creating genesis state if absent.
    pub fn new(
        settings: Arc<ProtocolSettings>,
        store: Arc<dyn Store>,
    ) -> ChainResult<Arc<Self>> {
        let natives = Arc::new(NativeRegistry::new(settings.p2p_sig_extensions));
        let mempool = Arc::new(Pool::new(settings.mem_pool_size));
        let (events, _) = broadcast::channel(256);
        let chain = Arc::new(Self {
            settings,
            store,
            natives,
            mempool,
            persist_lock: Mutex::new(()),
            tip: RwLock::new((UInt256::zero(), 0)),
            events,
            writes_refused: AtomicBool::new(false),
        });
        let dao = DataCache::new(Arc::clone(&chain.store));
        match dao.get_current_block()? {
            Some((hash, index)) => {
                *chain.tip.write() = (hash, index);
                info!(height = index, "chain opened");
            }
            None => {
                chain.persist_genesis()?;
            }
        }
        Ok(chain)
    }

    pub fn settings(&self) -> &ProtocolSettings {
        &self.settings
    }

    pub fn natives(&self) -> &Arc<NativeRegistry> {
        &self.natives
    }

    pub fn mempool(&self) -> &Arc<Pool> {
        &self.mempool
    }

    /// Current chain height.
    pub fn height(&self) -> u32 {
        self.tip.read().1
    }

    /// Hash of the latest committed block.
    pub fn current_hash(&self) -> UInt256 {
        self.tip.read().0
    }

    /// Subscribes to block, execution and state-root events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    /// A read snapshot over the committed state.
    pub fn snapshot(&self) -> DataCache {
        DataCache::new(Arc::clone(&self.store))
    }

    fn genesis_block(&self) -> ChainResult<Block> {
        let next_consensus = self.natives.neo.next_consensus_address(&self.settings)?;
        Ok(Block {
            header: BlockHeader {
                version: 0,
                prev_hash: UInt256::zero(),
                merkle_root: UInt256::zero(),
                timestamp: GENESIS_TIMESTAMP,
                nonce: GENESIS_NONCE,
                index: 0,
                primary_index: 0,
                next_consensus,
                witness: Witness::new(Vec::new(), vec![OpCode::Push1 as u8]),
            },
            transactions: Vec::new(),
        })
    }

    fn persist_genesis(&self) -> ChainResult<()> {
        let _guard = self.persist_lock.lock();
        let genesis = self.genesis_block()?;
        let mut cache = DataCache::new(Arc::clone(&self.store));
        let mut notifications = Vec::new();
        {
            let mut ctx = self.interop_ctx(
                &mut cache,
                Trigger::OnPersist,
                Some(&genesis),
                &mut notifications,
            );
            self.natives.initialize_all(&mut ctx)?;
            self.natives.on_persist_all(&mut ctx)?;
            self.natives.post_persist_all(&mut ctx)?;
        }
        self.advance_state_root(&mut cache, 0, None)?;
        self.commit(&mut cache)?;
        *self.tip.write() = (genesis.hash(), 0);
        info!(hash = %genesis.hash(), "genesis persisted");
        let _ = self.events.send(ChainEvent::Block(genesis));
        Ok(())
    }

    fn interop_ctx<'a>(
        &'a self,
        cache: &'a mut DataCache,
        trigger: Trigger,
        block: Option<&'a Block>,
        notifications: &'a mut Vec<neo3_smart_contract::NotificationEvent>,
    ) -> InteropContext<'a> {
        InteropContext {
            dao: cache,
            settings: &self.settings,
            trigger,
            tx: None,
            persisting_block: block,
            entry_script_hash: None,
            calling_script_hash: None,
            current_script_hash: None,
            notifications,
        }
    }

    /// Applies the cache's storage diff to the trie in ascending key order
    /// and records the resulting root for the height.
    fn advance_state_root(
        &self,
        cache: &mut DataCache,
        index: u32,
        prev_root: Option<UInt256>,
    ) -> ChainResult<UInt256> {
        let changes = cache.storage_changes();
        let mut trie = Trie::new(prev_root.filter(|r| !r.is_zero()));
        for (key, value) in &changes {
            match value {
                Some(value) => trie.put(cache, key, value)?,
                None => trie.delete(cache, key)?,
            }
        }
        let root_hash = trie.root_hash();
        let root = MPTRoot::new(index, root_hash);
        cache.put_state_root(index, to_bytes(&root)?);
        debug!(height = index, root = %root_hash, entries = changes.len(), "state root advanced");
        Ok(root_hash)
    }

    fn commit(&self, cache: &mut DataCache) -> ChainResult<usize> {
        match cache.persist() {
            Ok(written) => Ok(written),
            Err(err) => {
                self.writes_refused.store(true, Ordering::Release);
                error!(error = %err, "block commit failed; refusing further writes");
                Err(ChainError::Storage(err))
            }
        }
    }

    /// The locally computed state root for a height.
    pub fn state_root(&self, height: u32) -> ChainResult<Option<MPTRoot>> {
        let dao = self.snapshot();
        match dao.get_state_root(height)? {
            Some(bytes) => Ok(Some(from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Accepts a finalized, witness-bearing state root.
    pub fn add_state_root(&self, root: MPTRoot) -> ChainResult<()> {
        if root.witness.is_none() {
            return Err(ChainError::InvalidBlock(
                "state root carries no witness".into(),
            ));
        }
        let local = self.state_root(root.index)?.ok_or_else(|| {
            ChainError::InvalidBlock(format!("no local state root at {}", root.index))
        })?;
        if local.root != root.root {
            return Err(ChainError::StateRootMismatch {
                height: root.index,
                local: local.root,
                submitted: root.root,
            });
        }
        let mut dao = self.snapshot();
        dao.put_state_root(root.index, to_bytes(&root)?);
        dao.persist()?;
        let _ = self.events.send(ChainEvent::StateRoot(root));
        Ok(())
    }

    /// Validates and commits the next block.
    pub fn add_block(&self, block: Block) -> ChainResult<()> {
        if self.writes_refused.load(Ordering::Acquire) {
            return Err(ChainError::WritesRefused);
        }
        let _guard = self.persist_lock.lock();

        let mut cache = DataCache::new(Arc::clone(&self.store));
        let (tip_hash, tip_index) = cache
            .get_current_block()?
            .ok_or_else(|| ChainError::InvalidBlock("no genesis".into()))?;

        // Header linkage.
        if block.index() != tip_index + 1 {
            return Err(ChainError::InvalidBlock(format!(
                "index {} does not follow {tip_index}",
                block.index()
            )));
        }
        if block.header.prev_hash != tip_hash {
            return Err(ChainError::InvalidBlock(format!(
                "previous hash {} is not the tip {tip_hash}",
                block.header.prev_hash
            )));
        }
        let prev_header = cache
            .get_block(&tip_hash)?
            .ok_or_else(|| {
                ChainError::Storage(neo3_persistence::StorageError::Corruption(format!(
                    "tip block {tip_hash} missing"
                )))
            })?
            .header;
        if block.header.timestamp <= prev_header.timestamp {
            return Err(ChainError::InvalidBlock(format!(
                "timestamp {} does not advance past {}",
                block.header.timestamp, prev_header.timestamp
            )));
        }
        if self.settings.verify_blocks {
            if block.header.witness.script_hash() != prev_header.next_consensus {
                return Err(ChainError::InvalidBlock(
                    "block witness is not the designated consensus address".into(),
                ));
            }
            if !self.verify_header_witness(&block.header) {
                return Err(ChainError::InvalidBlock(
                    "block witness verification failed".into(),
                ));
            }
        }

        // Transaction roots and optional re-verification.
        block
            .verify_merkle_root()
            .map_err(|e| ChainError::InvalidBlock(e.to_string()))?;
        if self.settings.verify_transactions {
            for tx in &block.transactions {
                self.verify_transaction(tx).map_err(|e| {
                    ChainError::InvalidBlock(format!("transaction {}: {e}", tx.hash()))
                })?;
            }
        }

        // Execution: system triggers around per-transaction child caches.
        let mut notifications = Vec::new();
        {
            let mut ctx = self.interop_ctx(
                &mut cache,
                Trigger::OnPersist,
                Some(&block),
                &mut notifications,
            );
            self.natives.on_persist_all(&mut ctx)?;
        }
        let mut executed: Vec<(UInt256, bool)> = Vec::with_capacity(block.transactions.len());
        for tx in &block.transactions {
            let tx_cache = cache.begin();
            let mut engine = ApplicationEngine::new(
                Trigger::Application,
                Some(tx.clone()),
                Some(block.clone()),
                tx_cache,
                Arc::clone(&self.settings),
                Arc::clone(&self.natives),
                tx.system_fee,
            );
            let state = engine.run(tx.script.clone(), CallFlags::ALL);
            let (child, result) = engine.finish();
            let success = state == VMState::Halt;
            cache = if success {
                child.commit()?
            } else {
                warn!(tx = %tx.hash(), exception = ?result.exception, "transaction faulted");
                child.discard()?
            };
            put_exec_result(&mut cache, &tx.hash(), &result)?;
            executed.push((tx.hash(), success));
        }
        {
            let mut ctx = self.interop_ctx(
                &mut cache,
                Trigger::PostPersist,
                Some(&block),
                &mut notifications,
            );
            self.natives.post_persist_all(&mut ctx)?;
        }

        // State root over the accumulated diff.
        let prev_root = self.state_root(tip_index)?.map(|r| r.root);
        self.advance_state_root(&mut cache, block.index(), prev_root)?;

        // Atomic commit, then the world learns about it.
        self.commit(&mut cache)?;
        *self.tip.write() = (block.hash(), block.index());
        info!(height = block.index(), hash = %block.hash(), txs = block.transactions.len(), "block persisted");
        for (hash, success) in executed {
            let _ = self
                .events
                .send(ChainEvent::TransactionExecuted { hash, success });
        }
        let _ = self.events.send(ChainEvent::Block(block.clone()));

        // Mempool: drop included transactions and everything their
        // Conflicts attributes exclude.
        let mut excluded: HashSet<UInt256> = HashSet::new();
        for tx in &block.transactions {
            excluded.insert(tx.hash());
            for attr in tx.get_attributes(AttributeType::Conflicts) {
                if let TransactionAttribute::Conflicts { hash } = attr {
                    excluded.insert(*hash);
                }
            }
        }
        self.mempool
            .remove_stale(move |tx| !excluded.contains(&tx.hash()), self);
        Ok(())
    }

    fn verify_header_witness(&self, header: &BlockHeader) -> bool {
        let mut engine = ApplicationEngine::new(
            Trigger::Verification,
            None,
            None,
            self.snapshot(),
            Arc::clone(&self.settings),
            Arc::clone(&self.natives),
            MAX_VERIFICATION_GAS,
        );
        engine.set_sign_data(header.sign_data(self.settings.magic));
        if engine
            .load_script(header.witness.verification_script.clone(), CallFlags::READ_ONLY)
            .is_err()
        {
            return false;
        }
        if !header.witness.invocation_script.is_empty()
            && engine
                .load_script(header.witness.invocation_script.clone(), CallFlags::NONE)
                .is_err()
        {
            return false;
        }
        engine.execute() == VMState::Halt
            && engine
                .result()
                .and_then(|item| item.try_bool().ok())
                .unwrap_or(false)
    }

    /// Full relay verification of a transaction against current state.
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<(), VerifyError> {
        let size = neo3_io::Serializable::size(tx);
        if size > MAX_TRANSACTION_SIZE {
            return Err(VerifyError::OversizedTransaction(size));
        }
        tx.validate_structure(self.settings.p2p_sig_extensions)?;

        let height = self.height();
        if !(tx.valid_until_block > height
            && tx.valid_until_block <= height + MAX_VALID_UNTIL_BLOCK_INCREMENT)
        {
            return Err(VerifyError::Expired {
                valid_until: tx.valid_until_block,
                height,
            });
        }

        let dao = self.snapshot();
        self.verify_attributes(tx, &dao, height)?;

        for signer in &tx.signers {
            if self.natives.policy.is_blocked(&dao, &signer.account) {
                return Err(VerifyError::PolicyViolation(format!(
                    "signer {} is blocked",
                    signer.account
                )));
            }
        }

        let balance = self.natives.gas.balance_of(&dao, &tx.sender());
        let fee = BigInt::from(tx.system_fee) + BigInt::from(tx.network_fee);
        if balance < fee {
            return Err(VerifyError::InsufficientFunds);
        }

        let size_fee = self.natives.policy.fee_per_byte(&dao) * size as i64;
        let mut verification_budget = tx.network_fee - size_fee;
        if verification_budget < 0 {
            return Err(VerifyError::InsufficientNetworkFee);
        }
        verification_budget = verification_budget.min(MAX_VERIFICATION_GAS);

        for (signer, witness) in tx.signers.iter().zip(&tx.witnesses) {
            if witness.script_hash() != signer.account {
                return Err(VerifyError::WitnessFailed(signer.account));
            }
            let consumed = self.verify_witness(tx, witness, verification_budget)?;
            verification_budget -= consumed;
        }
        Ok(())
    }

    fn verify_attributes(
        &self,
        tx: &Transaction,
        dao: &DataCache,
        height: u32,
    ) -> Result<(), VerifyError> {
        for attr in &tx.attributes {
            match attr {
                TransactionAttribute::HighPriority => {
                    let committee = majority_multisig_address(&self.settings.standby_committee)
                        .map_err(VerifyError::Contract)?;
                    if tx.sender() != committee {
                        return Err(VerifyError::InvalidAttribute(
                            "HighPriority requires the committee as sender".into(),
                        ));
                    }
                }
                TransactionAttribute::NotValidBefore { height: nvb } => {
                    if height + 1 < *nvb {
                        return Err(VerifyError::NotYetValid(*nvb));
                    }
                }
                TransactionAttribute::OracleResponse { .. } => {
                    let (nodes, _) = self
                        .natives
                        .role_management
                        .get_designated_by_role(
                            dao,
                            neo3_smart_contract::Role::Oracle,
                            height + 1,
                        )
                        .map_err(VerifyError::Contract)?;
                    if nodes.is_empty() {
                        return Err(VerifyError::InvalidAttribute(
                            "no oracle nodes designated".into(),
                        ));
                    }
                    let oracle = majority_multisig_address(&nodes)
                        .map_err(VerifyError::Contract)?;
                    if !tx.has_signer(&oracle) {
                        return Err(VerifyError::InvalidAttribute(
                            "oracle response lacks the oracle multisig signer".into(),
                        ));
                    }
                }
                TransactionAttribute::Conflicts { .. }
                | TransactionAttribute::NotaryAssisted { .. } => {}
            }
        }
        Ok(())
    }

    /// Runs one witness under its gas budget; returns the gas it consumed.
    fn verify_witness(
        &self,
        tx: &Transaction,
        witness: &Witness,
        budget: i64,
    ) -> Result<i64, VerifyError> {
        if witness.verification_script.is_empty() {
            return Err(VerifyError::WitnessFailed(witness.script_hash()));
        }
        let mut engine = ApplicationEngine::new(
            Trigger::Verification,
            Some(tx.clone()),
            None,
            self.snapshot(),
            Arc::clone(&self.settings),
            Arc::clone(&self.natives),
            budget,
        );
        engine.set_sign_data(tx.sign_data(self.settings.magic));
        engine
            .load_script(witness.verification_script.clone(), CallFlags::READ_ONLY)
            .map_err(|_| VerifyError::WitnessFailed(witness.script_hash()))?;
        if !witness.invocation_script.is_empty() {
            engine
                .load_script(witness.invocation_script.clone(), CallFlags::NONE)
                .map_err(|_| VerifyError::WitnessFailed(witness.script_hash()))?;
        }
        let state = engine.execute();
        let truthy = engine
            .result()
            .and_then(|item| item.try_bool().ok())
            .unwrap_or(false);
        if state != VMState::Halt || !truthy {
            return Err(VerifyError::WitnessFailed(witness.script_hash()));
        }
        Ok(engine.gas_consumed())
    }

    /// Verifies and admits a relayed transaction into the mempool.
    pub fn pool_transaction(&self, tx: Transaction) -> Result<(), VerifyError> {
        if self.settings.verify_transactions {
            self.verify_transaction(&tx)?;
        }
        self.mempool.add(tx, self)?;
        Ok(())
    }

    /// A throwaway engine over current state, for RPC invocations.
    pub fn get_test_vm(
        &self,
        trigger: Trigger,
        tx: Option<Transaction>,
        block: Option<Block>,
    ) -> ApplicationEngine {
        ApplicationEngine::new(
            trigger,
            tx,
            block,
            self.snapshot(),
            Arc::clone(&self.settings),
            Arc::clone(&self.natives),
            MAX_VERIFICATION_GAS,
        )
    }
}

impl Feer for Blockchain {
    fn block_height(&self) -> u32 {
        self.height()
    }

    fn get_utility_token_balance(&self, account: &UInt160) -> BigInt {
        self.natives.gas.balance_of(&self.snapshot(), account)
    }

    fn fee_per_byte(&self) -> i64 {
        self.natives.policy.fee_per_byte(&self.snapshot())
    }

    fn p2p_sig_extensions_enabled(&self) -> bool {
        self.settings.p2p_sig_extensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo3_core::merkle::compute_merkle_root;
    use neo3_core::Signer;
    use neo3_persistence::MemoryStore;

    fn test_settings() -> Arc<ProtocolSettings> {
        let mut settings = ProtocolSettings::default();
        settings.verify_blocks = false;
        settings.verify_transactions = false;
        settings.p2p_sig_extensions = true;
        Arc::new(settings)
    }

    fn open_chain() -> Arc<Blockchain> {
        Blockchain::new(test_settings(), Arc::new(MemoryStore::new())).unwrap()
    }

    fn next_block(chain: &Blockchain, transactions: Vec<Transaction>) -> Block {
        let prev = chain.snapshot().get_block(&chain.current_hash()).unwrap().unwrap();
        let hashes: Vec<UInt256> = transactions.iter().map(Transaction::hash).collect();
        Block {
            header: BlockHeader {
                version: 0,
                prev_hash: prev.hash(),
                merkle_root: compute_merkle_root(&hashes),
                timestamp: prev.header.timestamp + 15_000,
                nonce: 7,
                index: prev.index() + 1,
                primary_index: 0,
                next_consensus: prev.header.next_consensus,
                witness: Witness::new(Vec::new(), vec![OpCode::Push1 as u8]),
            },
            transactions,
        }
    }

    #[test]
    fn genesis_is_deterministic() {
        let a = open_chain();
        let b = open_chain();
        assert_eq!(a.height(), 0);
        assert_eq!(a.current_hash(), b.current_hash());
        assert_eq!(
            a.state_root(0).unwrap().unwrap().root,
            b.state_root(0).unwrap().unwrap().root
        );
    }

    #[test]
    fn empty_block_advances_the_chain() {
        let chain = open_chain();
        let block = next_block(&chain, Vec::new());
        chain.add_block(block.clone()).unwrap();
        assert_eq!(chain.height(), 1);
        assert_eq!(chain.current_hash(), block.hash());
        let stored = chain.snapshot().get_block(&block.hash()).unwrap().unwrap();
        assert_eq!(stored, block);
        assert!(chain.state_root(1).unwrap().is_some());
    }

    #[test]
    fn wrong_linkage_rejected() {
        let chain = open_chain();
        let mut block = next_block(&chain, Vec::new());
        block.header.index = 5;
        assert!(matches!(
            chain.add_block(block),
            Err(ChainError::InvalidBlock(_))
        ));

        let mut block = next_block(&chain, Vec::new());
        block.header.prev_hash = UInt256::from_bytes(&[9u8; 32]).unwrap();
        assert!(matches!(
            chain.add_block(block),
            Err(ChainError::InvalidBlock(_))
        ));

        let mut block = next_block(&chain, Vec::new());
        block.header.timestamp = 0;
        assert!(matches!(
            chain.add_block(block),
            Err(ChainError::InvalidBlock(_))
        ));
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn merkle_mismatch_rejected() {
        let chain = open_chain();
        let mut block = next_block(&chain, Vec::new());
        block.header.merkle_root = UInt256::from_bytes(&[1u8; 32]).unwrap();
        assert!(matches!(
            chain.add_block(block),
            Err(ChainError::InvalidBlock(_))
        ));
    }

    fn funded_tx(chain: &Blockchain, nonce: u32) -> Transaction {
        // The committee multisig owns the genesis GAS; with an empty
        // committee its address is zero, which the test sender reuses.
        let sender = UInt160::zero();
        Transaction {
            nonce,
            system_fee: 0,
            network_fee: 0,
            valid_until_block: chain.height() + 100,
            signers: vec![Signer::called_by_entry(sender)],
            script: vec![OpCode::Push1 as u8, OpCode::Ret as u8],
            witnesses: vec![Witness::default()],
            ..Transaction::default()
        }
    }

    #[test]
    fn transactions_execute_and_results_persist() {
        let chain = open_chain();
        let tx = funded_tx(&chain, 1);
        let tx_hash = tx.hash();
        let block = next_block(&chain, vec![tx]);
        chain.add_block(block.clone()).unwrap();

        let dao = chain.snapshot();
        let (height, stored) = dao.get_transaction(&tx_hash).unwrap().unwrap();
        assert_eq!(height, 1);
        assert_eq!(stored.hash(), tx_hash);
        let result =
            neo3_smart_contract::exec_result::get_exec_result(&dao, &tx_hash)
                .unwrap()
                .unwrap();
        assert_eq!(result.vm_state, VMState::Halt);
        assert!(result.gas_consumed >= 0);
    }

    #[test]
    fn faulting_transaction_rolls_back_but_block_commits() {
        let chain = open_chain();
        let mut tx = funded_tx(&chain, 2);
        tx.script = vec![OpCode::Abort as u8];
        let tx_hash = tx.hash();
        let block = next_block(&chain, vec![tx]);
        chain.add_block(block).unwrap();

        assert_eq!(chain.height(), 1);
        let result = neo3_smart_contract::exec_result::get_exec_result(
            &chain.snapshot(),
            &tx_hash,
        )
        .unwrap()
        .unwrap();
        assert_eq!(result.vm_state, VMState::Fault);
        assert!(result.exception.is_some());
    }

    #[test]
    fn state_root_is_a_function_of_history() {
        let run = || {
            let chain = open_chain();
            let block = next_block(&chain, vec![funded_tx(&chain, 3)]);
            chain.add_block(block).unwrap();
            chain.state_root(1).unwrap().unwrap().root
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn included_transactions_leave_the_mempool() {
        let chain = open_chain();
        let tx = funded_tx(&chain, 4);
        let tx_hash = tx.hash();
        chain.mempool().add(tx.clone(), chain.as_ref()).unwrap();
        assert!(chain.mempool().contains_key(&tx_hash));

        let block = next_block(&chain, vec![tx]);
        chain.add_block(block).unwrap();
        assert!(!chain.mempool().contains_key(&tx_hash));
    }

    #[test]
    fn add_state_root_requires_matching_local_root() {
        let chain = open_chain();
        let local = chain.state_root(0).unwrap().unwrap();

        let mut forged = MPTRoot::new(0, UInt256::from_bytes(&[7u8; 32]).unwrap());
        forged.witness = Some(Witness::default());
        assert!(matches!(
            chain.add_state_root(forged),
            Err(ChainError::StateRootMismatch { .. })
        ));

        let mut signed = local.clone();
        signed.witness = Some(Witness::new(vec![1], vec![2]));
        chain.add_state_root(signed).unwrap();
        let stored = chain.state_root(0).unwrap().unwrap();
        assert!(stored.witness.is_some());
    }
}
