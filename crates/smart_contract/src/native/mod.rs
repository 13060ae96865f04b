//! Native contracts: in-process code behind stable reserved ids.
//!
//! Natives are dispatched through the same `(scriptHash, method, argc)`
//! surface as deployed contracts and read and write the same DAO cache, but
//! their bodies are direct procedure calls.

pub mod contract_management;
pub mod gas_token;
pub mod ledger_contract;
pub mod neo_token;
pub mod oracle_contract;
pub mod policy_contract;
pub mod role_management;

pub use contract_management::ContractManagement;
pub use gas_token::GasToken;
pub use ledger_contract::LedgerContract;
pub use neo_token::NeoToken;
pub use oracle_contract::OracleContract;
pub use policy_contract::PolicyContract;
pub use role_management::{Role, RoleManagement};

use std::collections::HashMap;
use std::sync::Arc;

use neo3_config::ProtocolSettings;
use neo3_core::UInt160;
use neo3_vm::{CallFlags, StackItem};

use crate::contract_state::ContractState;
use crate::interop::InteropContext;
use crate::{ContractError, ContractResult};

/// Descriptor of one native method: the dispatch key plus price and flags.
#[derive(Debug, Clone, Copy)]
pub struct NativeMethod {
    pub name: &'static str,
    pub parameter_count: usize,
    /// Base gas price, multiplied by the execution fee factor.
    pub price: i64,
    pub required_flags: CallFlags,
    /// Safe methods do not mutate state and may be called read-only.
    pub safe: bool,
}

impl NativeMethod {
    pub const fn safe(name: &'static str, parameter_count: usize, price: i64) -> Self {
        Self {
            name,
            parameter_count,
            price,
            required_flags: CallFlags::READ_STATES,
            safe: true,
        }
    }

    pub const fn unsafe_method(
        name: &'static str,
        parameter_count: usize,
        price: i64,
    ) -> Self {
        Self {
            name,
            parameter_count,
            price,
            required_flags: CallFlags::STATES,
            safe: false,
        }
    }
}

/// The interface every native contract implements.
pub trait NativeContract: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reserved id; negative and unique.
    fn id(&self) -> i32;

    fn hash(&self) -> UInt160;

    fn methods(&self) -> &[NativeMethod];

    /// Runs a method; the caller has already charged gas and checked flags.
    fn invoke(
        &self,
        ctx: &mut InteropContext<'_>,
        method: &str,
        args: Vec<StackItem>,
    ) -> ContractResult<StackItem>;

    /// One-time setup at the activation height.
    fn initialize(&self, _ctx: &mut InteropContext<'_>) -> ContractResult<()> {
        Ok(())
    }

    /// Runs before a block's transactions.
    fn on_persist(&self, _ctx: &mut InteropContext<'_>) -> ContractResult<()> {
        Ok(())
    }

    /// Runs after a block's transactions.
    fn post_persist(&self, _ctx: &mut InteropContext<'_>) -> ContractResult<()> {
        Ok(())
    }

    /// Whether this contract is active at `height` under the given settings.
    fn is_active(&self, settings: &ProtocolSettings, height: u32) -> bool {
        settings.is_native_active(self.name(), height)
    }

    /// Finds the method descriptor for a name and argument count.
    fn method(&self, name: &str, parameter_count: usize) -> Option<&NativeMethod> {
        self.methods()
            .iter()
            .find(|m| m.name == name && m.parameter_count == parameter_count)
    }
}

/// Derives the stable hash of a native from its name.
pub fn native_hash(name: &str) -> UInt160 {
    ContractState::create_contract_hash(&UInt160::zero(), 0, name)
}

/// All native contracts, dispatchable by hash and reachable as typed
/// handles for direct procedure calls.
pub struct NativeRegistry {
    pub management: Arc<ContractManagement>,
    pub ledger: Arc<LedgerContract>,
    pub neo: Arc<NeoToken>,
    pub gas: Arc<GasToken>,
    pub policy: Arc<PolicyContract>,
    pub role_management: Arc<RoleManagement>,
    pub oracle: Arc<OracleContract>,
    by_hash: HashMap<UInt160, Arc<dyn NativeContract>>,
}

impl NativeRegistry {
    pub fn new(p2p_sig_extensions: bool) -> Self {
        let management = Arc::new(ContractManagement::new());
        let ledger = Arc::new(LedgerContract::new());
        let neo = Arc::new(NeoToken::new());
        let gas = Arc::new(GasToken::new());
        let policy = Arc::new(PolicyContract::new());
        let role_management = Arc::new(RoleManagement::new(p2p_sig_extensions));
        let oracle = Arc::new(OracleContract::new());

        let contracts: Vec<Arc<dyn NativeContract>> = vec![
            management.clone(),
            ledger.clone(),
            neo.clone(),
            gas.clone(),
            policy.clone(),
            role_management.clone(),
            oracle.clone(),
        ];
        let by_hash = contracts
            .iter()
            .map(|c| (c.hash(), Arc::clone(c)))
            .collect();
        Self {
            management,
            ledger,
            neo,
            gas,
            policy,
            role_management,
            oracle,
            by_hash,
        }
    }

    /// Resolves a native by script hash. Callers dispatching on behalf of a
    /// script must still check activation for the executing height.
    pub fn by_hash(&self, hash: &UInt160) -> Option<&Arc<dyn NativeContract>> {
        self.by_hash.get(hash)
    }

    pub fn is_native(&self, hash: &UInt160) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// Iterates natives in id order (most negative last).
    pub fn all(&self) -> Vec<Arc<dyn NativeContract>> {
        let mut contracts: Vec<Arc<dyn NativeContract>> =
            self.by_hash.values().map(Arc::clone).collect();
        contracts.sort_by_key(|c| std::cmp::Reverse(c.id()));
        contracts
    }

    /// Runs every active native's genesis initialization.
    pub fn initialize_all(&self, ctx: &mut InteropContext<'_>) -> ContractResult<()> {
        for contract in self.all() {
            if contract.is_active(ctx.settings, 0) {
                contract.initialize(ctx)?;
            }
        }
        Ok(())
    }

    /// Runs the pre-transaction trigger of every active native.
    pub fn on_persist_all(&self, ctx: &mut InteropContext<'_>) -> ContractResult<()> {
        let height = ctx.persisting_index().unwrap_or(0);
        for contract in self.all() {
            if contract.is_active(ctx.settings, height) {
                contract.on_persist(ctx)?;
            }
        }
        Ok(())
    }

    /// Runs the post-transaction trigger of every active native.
    pub fn post_persist_all(&self, ctx: &mut InteropContext<'_>) -> ContractResult<()> {
        let height = ctx.persisting_index().unwrap_or(0);
        for contract in self.all() {
            if contract.is_active(ctx.settings, height) {
                contract.post_persist(ctx)?;
            }
        }
        Ok(())
    }

    /// Invokes a native method after locating its descriptor.
    ///
    /// A native that has not reached its activation height is
    /// indistinguishable from an unknown contract.
    pub fn invoke(
        &self,
        ctx: &mut InteropContext<'_>,
        hash: &UInt160,
        method: &str,
        args: Vec<StackItem>,
    ) -> ContractResult<StackItem> {
        let contract = self
            .by_hash(hash)
            .ok_or(ContractError::UnknownContract(*hash))?;
        let height = ctx
            .persisting_index()
            .unwrap_or_else(|| ctx.current_height());
        if !contract.is_active(ctx.settings, height) {
            return Err(ContractError::UnknownContract(*hash));
        }
        if contract.method(method, args.len()).is_none() {
            return Err(ContractError::UnknownMethod(
                *hash,
                method.to_string(),
                args.len(),
            ));
        }
        contract.invoke(ctx, method, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_engine::Trigger;
    use neo3_persistence::{DataCache, MemoryStore};

    #[test]
    fn inactive_native_is_unknown_to_dispatch() {
        let registry = NativeRegistry::new(false);
        let mut settings = ProtocolSettings::default();
        settings
            .native_activations
            .insert(OracleContract::NAME.into(), vec![100]);
        let mut dao = DataCache::new(Arc::new(MemoryStore::new()));
        let mut notifications = Vec::new();
        let mut ctx = InteropContext {
            dao: &mut dao,
            settings: &settings,
            trigger: Trigger::Application,
            tx: None,
            persisting_block: None,
            entry_script_hash: None,
            calling_script_hash: None,
            current_script_hash: None,
            notifications: &mut notifications,
        };

        // Height 0 is before the oracle's configured activation.
        let oracle_hash = registry.oracle.hash();
        let err = registry
            .invoke(&mut ctx, &oracle_hash, "getPrice", Vec::new())
            .unwrap_err();
        assert!(matches!(err, ContractError::UnknownContract(_)));

        // Natives without a configured wave dispatch from genesis.
        let policy_hash = registry.policy.hash();
        assert!(registry
            .invoke(&mut ctx, &policy_hash, "getFeePerByte", Vec::new())
            .is_ok());
    }

    #[test]
    fn ids_are_negative_and_unique() {
        let registry = NativeRegistry::new(true);
        let mut ids: Vec<i32> = registry.all().iter().map(|c| c.id()).collect();
        assert!(ids.iter().all(|id| *id < 0));
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), registry.all().len());
    }

    #[test]
    fn hashes_resolve_back() {
        let registry = NativeRegistry::new(false);
        for contract in registry.all() {
            let resolved = registry.by_hash(&contract.hash()).unwrap();
            assert_eq!(resolved.name(), contract.name());
        }
        assert!(!registry.is_native(&UInt160::zero()));
    }
}
