//! The contract management native: deploy, update, destroy.

use tracing::info;

use neo3_core::UInt160;
use neo3_io::from_bytes;
use neo3_persistence::DataCache;
use neo3_vm::StackItem;

use crate::contract_state::{
    delete_contract, get_contract, put_contract, ContractState, NefFile,
};
use crate::interop::InteropContext;
use crate::manifest::ContractManifest;
use crate::native::{native_hash, NativeContract, NativeMethod};
use crate::{ContractError, ContractResult};

const KEY_NEXT_ID: u8 = 0x0C;

/// The management contract.
pub struct ContractManagement {
    hash: UInt160,
    methods: Vec<NativeMethod>,
}

impl ContractManagement {
    pub const ID: i32 = -1;
    pub const NAME: &'static str = "ContractManagement";

    pub fn new() -> Self {
        Self {
            hash: native_hash(Self::NAME),
            methods: vec![
                NativeMethod::safe("getContract", 1, 1 << 15),
                NativeMethod::unsafe_method("deploy", 2, 0),
                NativeMethod::unsafe_method("update", 2, 0),
                NativeMethod::unsafe_method("destroy", 0, 1 << 15),
            ],
        }
    }

    fn next_id(&self, dao: &mut DataCache) -> ContractResult<i32> {
        let current = dao
            .get_storage_item(Self::ID, &[KEY_NEXT_ID])?
            .and_then(|bytes| bytes.try_into().ok().map(i32::from_le_bytes))
            .unwrap_or(0);
        let next = current + 1;
        dao.put_storage_item(Self::ID, &[KEY_NEXT_ID], next.to_le_bytes().to_vec());
        Ok(next)
    }

    /// Deploys a contract on behalf of the transaction sender.
    pub fn deploy(
        &self,
        ctx: &mut InteropContext<'_>,
        nef: NefFile,
        manifest: ContractManifest,
    ) -> ContractResult<ContractState> {
        let sender = ctx
            .tx
            .map(|tx| tx.sender())
            .ok_or_else(|| ContractError::InvalidOperation("deploy outside a transaction".into()))?;
        let hash = ContractState::create_contract_hash(&sender, nef.checksum, &manifest.name);
        if get_contract(ctx.dao, &hash)?.is_some() {
            return Err(ContractError::InvalidOperation(format!(
                "contract {hash} already deployed"
            )));
        }
        manifest.validate(&hash)?;
        let state = ContractState {
            id: self.next_id(ctx.dao)?,
            update_counter: 0,
            hash,
            nef,
            manifest,
        };
        put_contract(ctx.dao, &state)?;
        info!(contract = %hash, id = state.id, "contract deployed");
        Ok(state)
    }

    /// Replaces the code or manifest of the calling contract.
    pub fn update(
        &self,
        ctx: &mut InteropContext<'_>,
        nef: Option<NefFile>,
        manifest: Option<ContractManifest>,
    ) -> ContractResult<ContractState> {
        let current_hash = ctx.current_script_hash.ok_or_else(|| {
            ContractError::InvalidOperation("update outside a contract context".into())
        })?;
        let mut state = get_contract(ctx.dao, &current_hash)?
            .ok_or(ContractError::UnknownContract(current_hash))?;
        if nef.is_none() && manifest.is_none() {
            return Err(ContractError::InvalidOperation(
                "update with neither code nor manifest".into(),
            ));
        }
        if let Some(nef) = nef {
            state.nef = nef;
        }
        if let Some(manifest) = manifest {
            manifest.validate(&state.hash)?;
            state.manifest = manifest;
        }
        state.update_counter = state.update_counter.wrapping_add(1);
        put_contract(ctx.dao, &state)?;
        info!(contract = %state.hash, update = state.update_counter, "contract updated");
        Ok(state)
    }

    /// Removes the calling contract and its storage.
    pub fn destroy(&self, ctx: &mut InteropContext<'_>) -> ContractResult<()> {
        let current_hash = ctx.current_script_hash.ok_or_else(|| {
            ContractError::InvalidOperation("destroy outside a contract context".into())
        })?;
        let Some(state) = get_contract(ctx.dao, &current_hash)? else {
            return Ok(());
        };
        delete_contract(ctx.dao, &state);
        let mut doomed: Vec<Vec<u8>> = Vec::new();
        ctx.dao.seek_storage(state.id, &[], &mut |key, _| {
            doomed.push(key.to_vec());
            true
        })?;
        for key in doomed {
            ctx.dao.delete_storage_item(state.id, &key);
        }
        info!(contract = %state.hash, "contract destroyed");
        Ok(())
    }

    fn state_to_item(state: &ContractState) -> ContractResult<StackItem> {
        Ok(StackItem::array(vec![
            StackItem::integer(i64::from(state.id)),
            StackItem::integer(i64::from(state.update_counter)),
            StackItem::byte_string(state.hash.as_bytes().to_vec()),
            StackItem::byte_string(state.nef.script.clone()),
            StackItem::byte_string(state.manifest.to_json()?.into_bytes()),
        ]))
    }
}

impl Default for ContractManagement {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeContract for ContractManagement {
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
            "getContract" => {
                let bytes = args[0]
                    .try_bytes()
                    .map_err(|_| ContractError::InvalidOperation("hash is not bytes".into()))?;
                let hash = UInt160::from_bytes(&bytes)
                    .map_err(|e| ContractError::InvalidOperation(e.to_string()))?;
                match get_contract(ctx.dao, &hash)? {
                    Some(state) => Self::state_to_item(&state),
                    None => Ok(StackItem::Null),
                }
            }
            "deploy" => {
                let nef_bytes = args[0].try_bytes().map_err(ContractError::Vm)?;
                let manifest_bytes = args[1].try_bytes().map_err(ContractError::Vm)?;
                let nef: NefFile = from_bytes(&nef_bytes)?;
                let manifest = ContractManifest::from_json(
                    std::str::from_utf8(&manifest_bytes).map_err(|e| {
                        ContractError::InvalidManifest(e.to_string())
                    })?,
                )?;
                let state = self.deploy(ctx, nef, manifest)?;
                Self::state_to_item(&state)
            }
            "update" => {
                let nef = match &args[0] {
                    StackItem::Null => None,
                    item => Some(from_bytes::<NefFile>(
                        &item.try_bytes().map_err(ContractError::Vm)?,
                    )?),
                };
                let manifest = match &args[1] {
                    StackItem::Null => None,
                    item => {
                        let bytes = item.try_bytes().map_err(ContractError::Vm)?;
                        Some(ContractManifest::from_json(
                            std::str::from_utf8(&bytes)
                                .map_err(|e| ContractError::InvalidManifest(e.to_string()))?,
                        )?)
                    }
                };
                let state = self.update(ctx, nef, manifest)?;
                Self::state_to_item(&state)
            }
            "destroy" => {
                self.destroy(ctx)?;
                Ok(StackItem::Null)
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
    use neo3_config::ProtocolSettings;
    use neo3_core::{Signer, Transaction, Witness};
    use neo3_persistence::MemoryStore;
    use std::sync::Arc;

    use crate::application_engine::Trigger;
    use crate::contract_state::get_contract_by_id;

    fn deploy_tx(sender: UInt160) -> Transaction {
        Transaction {
            signers: vec![Signer::called_by_entry(sender)],
            script: vec![0x40],
            witnesses: vec![Witness::default()],
            ..Transaction::default()
        }
    }

    #[test]
    fn deploy_assigns_sequential_ids() {
        let management = ContractManagement::new();
        let mut dao = DataCache::new(Arc::new(MemoryStore::new()));
        let settings = ProtocolSettings::default();
        let sender = UInt160::from_bytes(&[1u8; 20]).unwrap();
        let tx = deploy_tx(sender);
        let mut notifications = Vec::new();
        let mut ctx = InteropContext {
            dao: &mut dao,
            settings: &settings,
            trigger: Trigger::Application,
            tx: Some(&tx),
            persisting_block: None,
            entry_script_hash: None,
            calling_script_hash: None,
            current_script_hash: None,
            notifications: &mut notifications,
        };

        let first = management
            .deploy(&mut ctx, NefFile::new("c", vec![0x40]), ContractManifest::new("a"))
            .unwrap();
        let second = management
            .deploy(&mut ctx, NefFile::new("c", vec![0x40]), ContractManifest::new("b"))
            .unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_ne!(first.hash, second.hash);

        // Redeploying the same name from the same sender collides.
        assert!(management
            .deploy(&mut ctx, NefFile::new("c", vec![0x40]), ContractManifest::new("a"))
            .is_err());

        assert_eq!(get_contract_by_id(ctx.dao, 2).unwrap().unwrap(), second);
    }
}
