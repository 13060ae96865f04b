//! The state every host service and native contract executes against.

use neo3_config::ProtocolSettings;
use neo3_core::{Block, Signer, Transaction, UInt160, WitnessScope};
use neo3_persistence::DataCache;

use crate::application_engine::Trigger;
use crate::contract::majority_multisig_address;
use crate::contract_state::get_manifest;
use crate::exec_result::NotificationEvent;
use crate::ContractResult;

/// Mutable view handed to syscall handlers and native contract methods.
///
/// Natives see the same DAO cache and the same gas meter as user code; the
/// engine owns both and lends them out per call.
pub struct InteropContext<'a> {
    pub dao: &'a mut DataCache,
    pub settings: &'a ProtocolSettings,
    pub trigger: Trigger,
    pub tx: Option<&'a Transaction>,
    pub persisting_block: Option<&'a Block>,
    /// Hash of the entry script of this execution.
    pub entry_script_hash: Option<UInt160>,
    /// Hash of the script that invoked the current one.
    pub calling_script_hash: Option<UInt160>,
    /// Hash of the script currently executing.
    pub current_script_hash: Option<UInt160>,
    pub notifications: &'a mut Vec<NotificationEvent>,
}

impl InteropContext<'_> {
    /// Height of the latest committed block; zero before genesis.
    pub fn current_height(&self) -> u32 {
        self.dao
            .get_current_block()
            .ok()
            .flatten()
            .map(|(_, index)| index)
            .unwrap_or(0)
    }

    /// Index of the block being persisted, if one is.
    pub fn persisting_index(&self) -> Option<u32> {
        self.persisting_block.map(|b| b.index())
    }

    /// Whether `account` authorized the current execution.
    ///
    /// Resolves the signer's witness scope against the script currently
    /// running: `CalledByEntry` passes at the entry script or one hop below
    /// it, the custom scopes consult their allow-lists, `Global` always
    /// passes and `None` never does.
    pub fn check_witness(&self, account: &UInt160) -> bool {
        let Some(tx) = self.tx else {
            return false;
        };
        let Some(signer) = tx.signers.iter().find(|s| s.account == *account) else {
            return false;
        };
        self.check_signer_scope(signer)
    }

    fn check_signer_scope(&self, signer: &Signer) -> bool {
        if signer.has_scope(WitnessScope::Global) {
            return true;
        }
        if signer.has_scope(WitnessScope::CalledByEntry) {
            let at_entry = match (&self.calling_script_hash, &self.entry_script_hash) {
                (None, _) => true,
                (Some(calling), Some(entry)) => calling == entry,
                (Some(_), None) => false,
            };
            if at_entry {
                return true;
            }
        }
        if signer.has_scope(WitnessScope::CustomContracts) {
            if let Some(current) = &self.current_script_hash {
                if signer.allowed_contracts.contains(current) {
                    return true;
                }
            }
        }
        if signer.has_scope(WitnessScope::CustomGroups) {
            if let Some(current) = &self.current_script_hash {
                if let Ok(Some(manifest)) = get_manifest(self.dao, current) {
                    if manifest.groups.iter().any(|group| {
                        signer.allowed_groups.contains(&group.public_key)
                    }) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Whether the committee multisig authorized the current execution.
    pub fn check_committee(&self) -> ContractResult<bool> {
        let committee = majority_multisig_address(&self.settings.standby_committee)?;
        Ok(self.check_witness(&committee))
    }

    /// Records a contract event.
    pub fn notify(&mut self, event: NotificationEvent) {
        self.notifications.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo3_persistence::MemoryStore;
    use std::sync::Arc;

    fn base_tx(signer: Signer) -> Transaction {
        Transaction {
            signers: vec![signer],
            script: vec![0x40],
            witnesses: vec![Default::default()],
            ..Transaction::default()
        }
    }

    fn ctx_fixture<'a>(
        dao: &'a mut DataCache,
        settings: &'a ProtocolSettings,
        tx: Option<&'a Transaction>,
        notifications: &'a mut Vec<NotificationEvent>,
    ) -> InteropContext<'a> {
        InteropContext {
            dao,
            settings,
            trigger: Trigger::Application,
            tx,
            persisting_block: None,
            entry_script_hash: None,
            calling_script_hash: None,
            current_script_hash: None,
            notifications,
        }
    }

    #[test]
    fn global_scope_passes_everywhere() {
        let account = UInt160::from_bytes(&[1u8; 20]).unwrap();
        let tx = base_tx(Signer::global(account));
        let mut dao = DataCache::new(Arc::new(MemoryStore::new()));
        let settings = ProtocolSettings::default();
        let mut notifications = Vec::new();
        let mut ctx = ctx_fixture(&mut dao, &settings, Some(&tx), &mut notifications);
        ctx.calling_script_hash = Some(UInt160::from_bytes(&[9u8; 20]).unwrap());
        ctx.entry_script_hash = Some(UInt160::zero());
        assert!(ctx.check_witness(&account));
    }

    #[test]
    fn called_by_entry_fails_deep_in_the_call_chain() {
        let account = UInt160::from_bytes(&[1u8; 20]).unwrap();
        let tx = base_tx(Signer::called_by_entry(account));
        let mut dao = DataCache::new(Arc::new(MemoryStore::new()));
        let settings = ProtocolSettings::default();
        let mut notifications = Vec::new();
        let mut ctx = ctx_fixture(&mut dao, &settings, Some(&tx), &mut notifications);
        assert!(ctx.check_witness(&account));

        ctx.entry_script_hash = Some(UInt160::zero());
        ctx.calling_script_hash = Some(UInt160::from_bytes(&[9u8; 20]).unwrap());
        assert!(!ctx.check_witness(&account));
    }

    #[test]
    fn custom_contracts_scope_consults_allow_list() {
        let account = UInt160::from_bytes(&[1u8; 20]).unwrap();
        let allowed = UInt160::from_bytes(&[2u8; 20]).unwrap();
        let signer = Signer {
            account,
            scopes: vec![WitnessScope::CustomContracts],
            allowed_contracts: vec![allowed],
            allowed_groups: Vec::new(),
        };
        let tx = base_tx(signer);
        let mut dao = DataCache::new(Arc::new(MemoryStore::new()));
        let settings = ProtocolSettings::default();
        let mut notifications = Vec::new();
        let mut ctx = ctx_fixture(&mut dao, &settings, Some(&tx), &mut notifications);
        ctx.current_script_hash = Some(allowed);
        assert!(ctx.check_witness(&account));
        ctx.current_script_hash = Some(UInt160::zero());
        assert!(!ctx.check_witness(&account));
    }

    #[test]
    fn unknown_account_fails() {
        let tx = base_tx(Signer::global(UInt160::zero()));
        let mut dao = DataCache::new(Arc::new(MemoryStore::new()));
        let settings = ProtocolSettings::default();
        let mut notifications = Vec::new();
        let ctx = ctx_fixture(&mut dao, &settings, Some(&tx), &mut notifications);
        assert!(!ctx.check_witness(&UInt160::from_bytes(&[7u8; 20]).unwrap()));
    }
}
