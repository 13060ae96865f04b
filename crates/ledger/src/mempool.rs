//! The memory pool: admission, ordering, eviction and conflict resolution
//! for unconfirmed transactions.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use num_bigint::BigInt;
use num_traits::Zero;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use neo3_core::transaction::AttributeType;
use neo3_core::{Transaction, TransactionAttribute, UInt160, UInt256};

/// Chain state the pool consults during admission.
pub trait Feer: Send + Sync {
    /// Current chain height.
    fn block_height(&self) -> u32;

    /// GAS balance of an account, in fractions.
    fn get_utility_token_balance(&self, account: &UInt160) -> BigInt;

    /// The policy fee-per-byte floor.
    fn fee_per_byte(&self) -> i64;

    /// Whether the P2P signature extension attributes are enabled.
    fn p2p_sig_extensions_enabled(&self) -> bool;
}

/// Stable admission errors; RPC maps them to codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MempoolError {
    /// The transaction is already pooled.
    #[error("already in the memory pool")]
    Duplicate,

    /// The sender cannot pay for this transaction alone.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// The sender cannot pay for this plus its pooled transactions.
    #[error("conflicts with the memory pool")]
    Conflict,

    /// The pool is full and the transaction ranks below everything in it.
    #[error("out of memory")]
    OutOfMemory,

    /// Admission is barred by a `Conflicts` attribute relationship.
    #[error("conflicts with the memory pool due to Conflicts attribute")]
    ConflictsAttribute,

    /// A pooled oracle response with the same id pays at least as much.
    #[error("conflicts with the memory pool due to OracleResponse attribute")]
    OracleResponse,
}

/// A pooled transaction and the height it was admitted at.
#[derive(Debug, Clone)]
struct PoolItem {
    tx: Arc<Transaction>,
    block_stamp: u32,
}

impl PoolItem {
    /// Priority ordering: the `HighPriority` class first, then fee per byte,
    /// then raw network fee. `Greater` means higher priority.
    fn compare(&self, other: &PoolItem) -> Ordering {
        let high = self.tx.has_attribute(AttributeType::HighPriority);
        let other_high = other.tx.has_attribute(AttributeType::HighPriority);
        match (high, other_high) {
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            _ => {}
        }
        self.tx
            .fee_per_byte()
            .cmp(&other.tx.fee_per_byte())
            .then_with(|| self.tx.network_fee.cmp(&other.tx.network_fee))
    }
}

/// A sender's balance and the fees it has committed to pooled transactions.
#[derive(Debug, Clone)]
struct BalanceAndFees {
    balance: BigInt,
    fee_sum: BigInt,
}

fn tx_fee(tx: &Transaction) -> BigInt {
    BigInt::from(tx.system_fee) + BigInt::from(tx.network_fee)
}

/// Checks a sender's ability to pay; returns the new committed fee sum.
fn check_balance(
    tx: &Transaction,
    state: &BalanceAndFees,
) -> Result<BigInt, MempoolError> {
    let fee = tx_fee(tx);
    if state.balance < fee {
        return Err(MempoolError::InsufficientFunds);
    }
    let cumulative = &fee + &state.fee_sum;
    if state.balance < cumulative {
        return Err(MempoolError::Conflict);
    }
    Ok(cumulative)
}

fn conflict_hashes(tx: &Transaction) -> Vec<UInt256> {
    tx.get_attributes(AttributeType::Conflicts)
        .iter()
        .filter_map(|attr| match attr {
            TransactionAttribute::Conflicts { hash } => Some(*hash),
            _ => None,
        })
        .collect()
}

fn oracle_response_id(tx: &Transaction) -> Option<u64> {
    tx.get_attributes(AttributeType::OracleResponse)
        .first()
        .and_then(|attr| match attr {
            TransactionAttribute::OracleResponse { id, .. } => Some(*id),
            _ => None,
        })
}

struct PoolInner {
    verified_map: HashMap<UInt256, Arc<Transaction>>,
    /// Descending by priority; equal priorities keep insertion order.
    verified_txes: Vec<PoolItem>,
    fees: HashMap<UInt160, BalanceAndFees>,
    /// Target hash to the pooled transactions naming it in `Conflicts`.
    conflicts: HashMap<UInt256, Vec<UInt256>>,
    /// Oracle response id to the single pooled response for it.
    oracle_resp: HashMap<u64, UInt256>,
    fee_per_byte: i64,
    resend_threshold: u32,
    resend_func: Option<Arc<dyn Fn(Arc<Transaction>) + Send + Sync>>,
}

impl PoolInner {
    fn contains_key(&self, hash: &UInt256) -> bool {
        self.verified_map.contains_key(hash)
    }

    fn try_add_sender_fee(
        &mut self,
        tx: &Transaction,
        feer: &dyn Feer,
        need_check: bool,
    ) -> bool {
        let sender = tx.sender();
        let state = self.fees.entry(sender).or_insert_with(|| BalanceAndFees {
            balance: feer.get_utility_token_balance(&sender),
            fee_sum: BigInt::zero(),
        });
        if need_check {
            match check_balance(tx, state) {
                Ok(new_sum) => {
                    state.fee_sum = new_sum;
                    true
                }
                Err(_) => false,
            }
        } else {
            state.fee_sum += tx_fee(tx);
            true
        }
    }

    /// Checks `Conflicts` relationships and the sender's balance; returns
    /// the pooled transactions the admission would evict.
    fn check_tx_conflicts(
        &self,
        tx: &Transaction,
        feer: &dyn Feer,
    ) -> Result<Vec<Arc<Transaction>>, MempoolError> {
        let sender = tx.sender();
        let actual = self
            .fees
            .get(&sender)
            .cloned()
            .unwrap_or_else(|| BalanceAndFees {
                balance: feer.get_utility_token_balance(&sender),
                fee_sum: BigInt::zero(),
            });

        let mut to_remove: Vec<Arc<Transaction>> = Vec::new();
        let mut expected = actual;
        if feer.p2p_sig_extensions_enabled() {
            // Pooled transactions whose Conflicts attribute targets this
            // hash must each cosign with the sender and pay strictly less.
            if let Some(targeting) = self.conflicts.get(&tx.hash()) {
                for hash in targeting {
                    let existing = match self.verified_map.get(hash) {
                        Some(existing) => existing,
                        None => continue,
                    };
                    if !existing.has_signer(&sender)
                        || existing.network_fee >= tx.network_fee
                    {
                        return Err(MempoolError::ConflictsAttribute);
                    }
                    to_remove.push(Arc::clone(existing));
                }
            }
            // Pooled transactions this one names must be cosigned with
            // their sender and underpay it.
            let named = conflict_hashes(tx);
            for hash in &named {
                let Some(existing) = self.verified_map.get(hash) else {
                    continue;
                };
                if !tx.has_signer(&existing.sender()) {
                    return Err(MempoolError::ConflictsAttribute);
                }
                if existing.network_fee >= tx.network_fee {
                    return Err(MempoolError::ConflictsAttribute);
                }
                to_remove.push(Arc::clone(existing));
            }
            to_remove.sort_by_key(|t| t.hash());
            to_remove.dedup_by_key(|t| t.hash());

            // Conflicts cycles are rejected conservatively: eviction
            // candidates related to each other, or naming the incoming hash
            // while also being named by it, leave no consistent order.
            let removal_set: HashSet<UInt256> = to_remove.iter().map(|t| t.hash()).collect();
            for candidate in &to_remove {
                for hash in conflict_hashes(candidate) {
                    if removal_set.contains(&hash) {
                        return Err(MempoolError::ConflictsAttribute);
                    }
                    if hash == tx.hash() && named.contains(&candidate.hash()) {
                        return Err(MempoolError::ConflictsAttribute);
                    }
                }
            }

            // The sender's own evictions free their committed fees.
            for candidate in &to_remove {
                if candidate.sender() == sender {
                    expected.fee_sum -= tx_fee(candidate);
                }
            }
        }
        check_balance(tx, &expected)?;
        Ok(to_remove)
    }

    fn remove_internal(&mut self, hash: &UInt256, _feer: &dyn Feer) {
        let Some(tx) = self.verified_map.remove(hash) else {
            return;
        };
        if let Some(position) = self
            .verified_txes
            .iter()
            .position(|item| item.tx.hash() == *hash)
        {
            self.verified_txes.remove(position);
        }
        if let Some(state) = self.fees.get_mut(&tx.sender()) {
            state.fee_sum -= tx_fee(&tx);
        }
        self.remove_conflicts_of(&tx);
        if let Some(id) = oracle_response_id(&tx) {
            self.oracle_resp.remove(&id);
        }
    }

    /// Drops this transaction's entries from the reverse conflict index.
    fn remove_conflicts_of(&mut self, tx: &Transaction) {
        for target in conflict_hashes(tx) {
            if let Some(list) = self.conflicts.get_mut(&target) {
                list.retain(|h| *h != tx.hash());
                if list.is_empty() {
                    self.conflicts.remove(&target);
                }
            }
        }
    }

    fn index_conflicts_of(&mut self, tx: &Transaction) {
        for target in conflict_hashes(tx) {
            self.conflicts.entry(target).or_default().push(tx.hash());
        }
    }

    fn publish_size(&self) {
        debug!(size = self.verified_txes.len(), "mempool size");
    }
}

/// The bounded, sorted transaction pool.
pub struct Pool {
    inner: RwLock<PoolInner>,
    capacity: usize,
}

impl Pool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(PoolInner {
                verified_map: HashMap::new(),
                verified_txes: Vec::with_capacity(capacity),
                fees: HashMap::new(),
                conflicts: HashMap::new(),
                oracle_resp: HashMap::new(),
                fee_per_byte: 0,
                resend_threshold: 0,
                resend_func: None,
            }),
            capacity,
        }
    }

    /// Number of pooled transactions.
    pub fn count(&self) -> usize {
        self.inner.read().verified_txes.len()
    }

    /// Whether the hash is pooled.
    pub fn contains_key(&self, hash: &UInt256) -> bool {
        self.inner.read().contains_key(hash)
    }

    /// The pooled transaction for a hash.
    pub fn try_get_value(&self, hash: &UInt256) -> Option<Arc<Transaction>> {
        self.inner.read().verified_map.get(hash).cloned()
    }

    /// All pooled transactions, highest priority first.
    pub fn get_verified_transactions(&self) -> Vec<Arc<Transaction>> {
        self.inner
            .read()
            .verified_txes
            .iter()
            .map(|item| Arc::clone(&item.tx))
            .collect()
    }

    /// Whether the transaction is pooled or related to the pool through
    /// `Conflicts` attributes in either direction.
    pub fn has_conflicts(&self, tx: &Transaction, feer: &dyn Feer) -> bool {
        let inner = self.inner.read();
        if inner.contains_key(&tx.hash()) {
            return true;
        }
        if feer.p2p_sig_extensions_enabled() {
            if inner.conflicts.contains_key(&tx.hash()) {
                return true;
            }
            for hash in conflict_hashes(tx) {
                if inner.contains_key(&hash) {
                    return true;
                }
            }
        }
        false
    }

    /// Whether the sender could pay for this transaction on top of its
    /// pooled ones, without admitting it.
    pub fn verify(&self, tx: &Transaction, feer: &dyn Feer) -> bool {
        self.inner.read().check_tx_conflicts(tx, feer).is_ok()
    }

    /// Registers the resend schedule: stale transactions are handed to the
    /// callback at power-of-two multiples of `threshold` blocks.
    pub fn set_resend_threshold(
        &self,
        threshold: u32,
        callback: Arc<dyn Fn(Arc<Transaction>) + Send + Sync>,
    ) {
        let mut inner = self.inner.write();
        inner.resend_threshold = threshold;
        inner.resend_func = Some(callback);
    }

    /// Tries to admit a transaction.
    pub fn add(&self, tx: Transaction, feer: &dyn Feer) -> Result<(), MempoolError> {
        let tx = Arc::new(tx);
        let hash = tx.hash();
        let item = PoolItem {
            tx: Arc::clone(&tx),
            block_stamp: feer.block_height(),
        };

        let mut inner = self.inner.write();
        if inner.contains_key(&hash) {
            return Err(MempoolError::Duplicate);
        }
        let to_remove = inner.check_tx_conflicts(&tx, feer)?;

        // Oracle responses are unique per request id; a better-paying
        // response replaces the pooled one.
        if let Some(id) = oracle_response_id(&tx) {
            if let Some(existing_hash) = inner.oracle_resp.get(&id).copied() {
                let existing_fee = inner
                    .verified_map
                    .get(&existing_hash)
                    .map(|t| t.network_fee)
                    .unwrap_or(0);
                if existing_fee >= tx.network_fee {
                    return Err(MempoolError::OracleResponse);
                }
                inner.remove_internal(&existing_hash, feer);
            }
        }

        if feer.p2p_sig_extensions_enabled() {
            for conflicting in &to_remove {
                let conflicting_hash = conflicting.hash();
                debug!(evicted = %conflicting_hash, admitted = %hash, "conflicts eviction");
                inner.remove_internal(&conflicting_hash, feer);
            }
        }

        // Insertion position by binary search over descending priorities;
        // strictly-greater keeps equal-priority arrivals in order.
        let position = inner
            .verified_txes
            .partition_point(|existing| item.compare(existing) != Ordering::Greater);

        if inner.verified_txes.len() == self.capacity {
            if position == inner.verified_txes.len() {
                return Err(MempoolError::OutOfMemory);
            }
            let unlucky = inner
                .verified_txes
                .pop()
                .expect("pool is at capacity, hence non-empty");
            let unlucky_hash = unlucky.tx.hash();
            inner.verified_map.remove(&unlucky_hash);
            if feer.p2p_sig_extensions_enabled() {
                inner.remove_conflicts_of(&unlucky.tx);
            }
            if let Some(id) = oracle_response_id(&unlucky.tx) {
                inner.oracle_resp.remove(&id);
            }
            if let Some(state) = inner.fees.get_mut(&unlucky.tx.sender()) {
                state.fee_sum -= tx_fee(&unlucky.tx);
            }
            debug!(evicted = %unlucky_hash, "capacity eviction");
        }

        inner.verified_txes.insert(position, item);
        inner.verified_map.insert(hash, Arc::clone(&tx));
        if feer.p2p_sig_extensions_enabled() {
            inner.index_conflicts_of(&tx);
        }
        if let Some(id) = oracle_response_id(&tx) {
            inner.oracle_resp.insert(id, hash);
        }
        // Balance already proven by check_tx_conflicts.
        inner.try_add_sender_fee(&tx, feer, false);
        inner.publish_size();
        Ok(())
    }

    /// Removes a transaction and all derived index entries.
    pub fn remove(&self, hash: &UInt256, feer: &dyn Feer) {
        let mut inner = self.inner.write();
        inner.remove_internal(hash, feer);
        inner.publish_size();
    }

    /// Re-filters the pool after a block: keeps transactions passing the
    /// predicate, the (possibly raised) fee floor and a fresh balance check,
    /// rebuilding the fee and conflict indices from scratch.
    pub fn remove_stale(
        &self,
        is_ok: impl Fn(&Transaction) -> bool,
        feer: &dyn Feer,
    ) {
        let mut inner = self.inner.write();
        let policy_changed = {
            let new_fee = feer.fee_per_byte();
            if new_fee > inner.fee_per_byte {
                inner.fee_per_byte = new_fee;
                true
            } else {
                false
            }
        };
        let fee_floor = inner.fee_per_byte;
        let height = feer.block_height();
        let threshold = inner.resend_threshold;
        let old = std::mem::take(&mut inner.verified_txes);
        inner.fees = HashMap::new();
        if feer.p2p_sig_extensions_enabled() {
            inner.conflicts = HashMap::new();
        }
        let mut stale: Vec<Arc<Transaction>> = Vec::new();
        for item in old {
            let keep = is_ok(&item.tx)
                && (!policy_changed || item.tx.fee_per_byte() >= fee_floor)
                && inner.try_add_sender_fee(&item.tx, feer, true);
            if keep {
                if feer.p2p_sig_extensions_enabled() {
                    let tx = Arc::clone(&item.tx);
                    inner.index_conflicts_of(&tx);
                }
                if threshold != 0 {
                    // Resend at threshold, 2x, 4x... so the age divided by
                    // the threshold must be a power of two.
                    let age = height.wrapping_sub(item.block_stamp);
                    if age % threshold == 0 && (age / threshold).count_ones() == 1 {
                        stale.push(Arc::clone(&item.tx));
                    }
                }
                inner.verified_txes.push(item);
            } else {
                let hash = item.tx.hash();
                inner.verified_map.remove(&hash);
                if let Some(id) = oracle_response_id(&item.tx) {
                    inner.oracle_resp.remove(&id);
                }
                debug!(dropped = %hash, "stale eviction");
            }
        }
        inner.publish_size();
        if !stale.is_empty() {
            if let Some(resend) = inner.resend_func.clone() {
                // Handed off so the caller never blocks on the transport.
                std::thread::spawn(move || {
                    for tx in stale {
                        resend(tx);
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo3_core::transaction::OracleResponseCode;
    use neo3_core::{Signer, Witness};
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex;

    struct TestFeer {
        height: u32,
        balances: Mutex<StdHashMap<UInt160, BigInt>>,
        fee_per_byte: i64,
        extensions: bool,
    }

    impl TestFeer {
        fn new() -> Self {
            Self {
                height: 1,
                balances: Mutex::new(StdHashMap::new()),
                fee_per_byte: 0,
                extensions: true,
            }
        }

        fn fund(&self, account: UInt160, amount: i64) {
            self.balances
                .lock()
                .unwrap()
                .insert(account, BigInt::from(amount));
        }
    }

    impl Feer for TestFeer {
        fn block_height(&self) -> u32 {
            self.height
        }

        fn get_utility_token_balance(&self, account: &UInt160) -> BigInt {
            self.balances
                .lock()
                .unwrap()
                .get(account)
                .cloned()
                .unwrap_or_else(BigInt::zero)
        }

        fn fee_per_byte(&self) -> i64 {
            self.fee_per_byte
        }

        fn p2p_sig_extensions_enabled(&self) -> bool {
            self.extensions
        }
    }

    fn account(byte: u8) -> UInt160 {
        UInt160::from_bytes(&[byte; 20]).unwrap()
    }

    fn tx_with(nonce: u32, sender: UInt160, net_fee: i64) -> Transaction {
        Transaction {
            nonce,
            network_fee: net_fee,
            valid_until_block: 1000,
            signers: vec![Signer::called_by_entry(sender)],
            script: vec![0x40],
            witnesses: vec![Witness::default()],
            ..Transaction::default()
        }
    }

    /// A transaction padded to a chosen encoded size, so fee-per-byte can be
    /// pinned exactly.
    fn tx_sized(nonce: u32, sender: UInt160, net_fee: i64, size: usize) -> Transaction {
        let mut tx = tx_with(nonce, sender, net_fee);
        let base = neo3_io::Serializable::size(&tx);
        assert!(size > base, "requested size too small");
        tx.script = vec![0x40; tx.script.len() + (size - base)];
        assert_eq!(neo3_io::Serializable::size(&tx), size);
        tx
    }

    #[test]
    fn duplicate_rejected() {
        let pool = Pool::new(10);
        let feer = TestFeer::new();
        let sender = account(1);
        feer.fund(sender, 1_000_000);
        let tx = tx_with(1, sender, 100);
        pool.add(tx.clone(), &feer).unwrap();
        assert_eq!(pool.add(tx, &feer), Err(MempoolError::Duplicate));
    }

    #[test]
    fn insufficient_funds_and_cumulative_conflict() {
        let pool = Pool::new(10);
        let feer = TestFeer::new();
        let sender = account(1);
        feer.fund(sender, 150);
        assert_eq!(
            pool.add(tx_with(1, sender, 200), &feer),
            Err(MempoolError::InsufficientFunds)
        );
        pool.add(tx_with(2, sender, 100), &feer).unwrap();
        assert_eq!(
            pool.add(tx_with(3, sender, 100), &feer),
            Err(MempoolError::Conflict)
        );
    }

    #[test]
    fn sorting_by_fee_per_byte_then_net_fee() {
        // Densities {10, 10, 20} per byte: the densest transaction leads
        // even though it pays the smallest raw fee, and the two
        // equal-density ones tie-break by raw network fee.
        let pool = Pool::new(10);
        let feer = TestFeer::new();
        let sender = account(1);
        feer.fund(sender, 10_000_000);

        pool.add(tx_sized(1, sender, 1000, 100), &feer).unwrap(); // 10/byte
        pool.add(tx_sized(2, sender, 2000, 200), &feer).unwrap(); // 10/byte
        pool.add(tx_sized(3, sender, 1200, 60), &feer).unwrap(); // 20/byte

        let fees: Vec<i64> = pool
            .get_verified_transactions()
            .iter()
            .map(|t| t.network_fee)
            .collect();
        assert_eq!(fees, vec![1200, 2000, 1000]);
    }

    #[test]
    fn high_priority_is_a_hard_class() {
        let pool = Pool::new(10);
        let feer = TestFeer::new();
        let sender = account(1);
        feer.fund(sender, 10_000_000);

        pool.add(tx_with(1, sender, 100_000), &feer).unwrap();
        let mut priority = tx_with(2, sender, 1);
        priority
            .attributes
            .push(TransactionAttribute::HighPriority);
        pool.add(priority, &feer).unwrap();

        let head = &pool.get_verified_transactions()[0];
        assert!(head.has_attribute(AttributeType::HighPriority));
    }

    #[test]
    fn conflicts_admission_and_rejection() {
        // A pooled with netFee 100; B names A, cosigns, pays 150: admitted,
        // A evicted. C names A-like target with equal fee: rejected.
        let pool = Pool::new(10);
        let feer = TestFeer::new();
        let sender = account(1);
        feer.fund(sender, 10_000_000);

        let tx_a = tx_with(1, sender, 100);
        let a_hash = tx_a.hash();
        pool.add(tx_a, &feer).unwrap();

        let mut tx_b = tx_with(2, sender, 150);
        tx_b.attributes
            .push(TransactionAttribute::Conflicts { hash: a_hash });
        pool.add(tx_b.clone(), &feer).unwrap();
        assert!(!pool.contains_key(&a_hash));
        assert!(pool.contains_key(&tx_b.hash()));

        let mut tx_c = tx_with(3, sender, 150);
        tx_c.attributes
            .push(TransactionAttribute::Conflicts { hash: tx_b.hash() });
        assert_eq!(
            pool.add(tx_c, &feer),
            Err(MempoolError::ConflictsAttribute)
        );
    }

    #[test]
    fn conflicts_require_cosigning() {
        let pool = Pool::new(10);
        let feer = TestFeer::new();
        let (alice, mallory) = (account(1), account(2));
        feer.fund(alice, 10_000_000);
        feer.fund(mallory, 10_000_000);

        let tx_a = tx_with(1, alice, 100);
        let a_hash = tx_a.hash();
        pool.add(tx_a, &feer).unwrap();

        // Mallory does not cosign with Alice, so she cannot evict her tx.
        let mut attack = tx_with(2, mallory, 500);
        attack
            .attributes
            .push(TransactionAttribute::Conflicts { hash: a_hash });
        assert_eq!(
            pool.add(attack, &feer),
            Err(MempoolError::ConflictsAttribute)
        );
        assert!(pool.contains_key(&a_hash));
    }

    #[test]
    fn conflicting_pairs_never_coexist() {
        // Whatever the admission order, two transactions related through a
        // Conflicts attribute are never pooled simultaneously.
        let pool = Pool::new(10);
        let feer = TestFeer::new();
        let sender = account(1);
        feer.fund(sender, 10_000_000);

        let tx_a = tx_with(1, sender, 100);
        let a_hash = tx_a.hash();
        let mut tx_b = tx_with(2, sender, 150);
        tx_b.attributes
            .push(TransactionAttribute::Conflicts { hash: a_hash });

        pool.add(tx_a.clone(), &feer).unwrap();
        pool.add(tx_b.clone(), &feer).unwrap();
        assert!(pool.contains_key(&tx_b.hash()) && !pool.contains_key(&a_hash));

        // The other order: the named transaction arrives second and is
        // barred because the pooled one outbids it.
        let pool = Pool::new(10);
        pool.add(tx_b.clone(), &feer).unwrap();
        assert_eq!(
            pool.add(tx_a, &feer),
            Err(MempoolError::ConflictsAttribute)
        );
        assert!(pool.contains_key(&tx_b.hash()));
    }

    #[test]
    fn oracle_response_collision() {
        // X pooled with id 42, fee 10. Y same id fee 11 replaces it; Z same
        // id fee 11 is rejected.
        let pool = Pool::new(10);
        let feer = TestFeer::new();
        let sender = account(1);
        feer.fund(sender, 10_000_000);

        let oracle_attr = |id| TransactionAttribute::OracleResponse {
            id,
            code: OracleResponseCode::Success,
            result: Vec::new(),
        };

        let mut tx_x = tx_with(1, sender, 10);
        tx_x.attributes.push(oracle_attr(42));
        let x_hash = tx_x.hash();
        pool.add(tx_x, &feer).unwrap();

        let mut tx_y = tx_with(2, sender, 11);
        tx_y.attributes.push(oracle_attr(42));
        pool.add(tx_y, &feer).unwrap();
        assert!(!pool.contains_key(&x_hash));

        let mut tx_z = tx_with(3, sender, 11);
        tx_z.attributes.push(oracle_attr(42));
        assert_eq!(pool.add(tx_z, &feer), Err(MempoolError::OracleResponse));
    }

    #[test]
    fn capacity_eviction_and_out_of_memory() {
        let pool = Pool::new(3);
        let feer = TestFeer::new();
        let sender = account(1);
        feer.fund(sender, 100_000_000);

        pool.add(tx_with(1, sender, 300), &feer).unwrap();
        pool.add(tx_with(2, sender, 200), &feer).unwrap();
        pool.add(tx_with(3, sender, 100), &feer).unwrap();

        // Ranks below everything: refused outright.
        assert_eq!(
            pool.add(tx_with(4, sender, 50), &feer),
            Err(MempoolError::OutOfMemory)
        );
        // Ranks above the tail: tail evicted.
        pool.add(tx_with(5, sender, 250), &feer).unwrap();
        assert_eq!(pool.count(), 3);
        let fees: Vec<i64> = pool
            .get_verified_transactions()
            .iter()
            .map(|t| t.network_fee)
            .collect();
        assert!(!fees.contains(&100));
    }

    #[test]
    fn add_remove_restores_prior_state() {
        let pool = Pool::new(10);
        let feer = TestFeer::new();
        let sender = account(1);
        feer.fund(sender, 10_000_000);

        let mut survivor = tx_with(1, sender, 100);
        survivor
            .attributes
            .push(TransactionAttribute::Conflicts {
                hash: UInt256::from_bytes(&[9u8; 32]).unwrap(),
            });
        pool.add(survivor.clone(), &feer).unwrap();

        let mut tx = tx_with(2, sender, 50);
        tx.attributes.push(TransactionAttribute::Conflicts {
            hash: UInt256::from_bytes(&[8u8; 32]).unwrap(),
        });
        tx.attributes.push(TransactionAttribute::OracleResponse {
            id: 7,
            code: OracleResponseCode::Success,
            result: Vec::new(),
        });
        let hash = tx.hash();
        pool.add(tx, &feer).unwrap();
        pool.remove(&hash, &feer);

        let inner = pool.inner.read();
        assert_eq!(inner.verified_txes.len(), 1);
        assert_eq!(inner.verified_map.len(), 1);
        assert_eq!(inner.conflicts.len(), 1);
        assert!(inner.oracle_resp.is_empty());
        let committed = &inner.fees[&sender];
        assert_eq!(committed.fee_sum, tx_fee(&survivor));
    }

    #[test]
    fn fee_undercut_on_policy_bump() {
        // A pooled tx at 1000 per byte is evicted when the floor moves to
        // 1001.
        let pool = Pool::new(10);
        let mut feer = TestFeer::new();
        let sender = account(1);
        feer.fund(sender, i64::MAX / 2);

        let size = 60usize;
        let tx = tx_sized(1, sender, 1000 * size as i64, size);
        assert_eq!(tx.fee_per_byte(), 1000);
        let hash = tx.hash();
        pool.add(tx, &feer).unwrap();

        feer.fee_per_byte = 1001;
        pool.remove_stale(|_| true, &feer);
        assert!(!pool.contains_key(&hash));
    }

    #[test]
    fn remove_stale_drops_included_and_rebuilds_fees() {
        let pool = Pool::new(10);
        let feer = TestFeer::new();
        let sender = account(1);
        feer.fund(sender, 10_000_000);

        let tx_kept = tx_with(1, sender, 100);
        let tx_gone = tx_with(2, sender, 200);
        let gone_hash = tx_gone.hash();
        pool.add(tx_kept.clone(), &feer).unwrap();
        pool.add(tx_gone, &feer).unwrap();

        pool.remove_stale(|tx| tx.hash() != gone_hash, &feer);
        assert!(pool.contains_key(&tx_kept.hash()));
        assert!(!pool.contains_key(&gone_hash));
        let inner = pool.inner.read();
        assert_eq!(inner.fees[&sender].fee_sum, tx_fee(&tx_kept));
    }

    #[test]
    fn sender_fee_sums_never_exceed_balance() {
        let pool = Pool::new(100);
        let feer = TestFeer::new();
        let sender = account(1);
        feer.fund(sender, 1_000);

        for nonce in 0..20 {
            let _ = pool.add(tx_with(nonce, sender, 100), &feer);
        }
        let inner = pool.inner.read();
        let committed = &inner.fees[&sender];
        assert!(committed.fee_sum <= committed.balance);
    }

    #[test]
    fn sorted_invariant_holds_under_churn() {
        let pool = Pool::new(50);
        let feer = TestFeer::new();
        let sender = account(1);
        feer.fund(sender, i64::MAX / 2);

        for nonce in 0..40u32 {
            let fee = 100 + i64::from((nonce * 37) % 19) * 50;
            let _ = pool.add(tx_with(nonce, sender, fee), &feer);
        }
        let inner = pool.inner.read();
        for pair in inner.verified_txes.windows(2) {
            assert_ne!(pair[0].compare(&pair[1]), Ordering::Less);
        }
    }
}
