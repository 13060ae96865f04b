//! State-root signature aggregation and relay.
//!
//! Collects validator signatures on per-height state roots; once strictly
//! more than half of the designated state validators have signed, the root
//! is finalized with a sorted multisig witness, handed to the chain, and
//! broadcast through the relay callback as an extensible payload.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info};

use neo3_core::constants::MAX_VALID_UNTIL_BLOCK_INCREMENT;
use neo3_core::crypto::hash160;
use neo3_core::{ECPoint, ExtensiblePayload, MPTRoot, Witness};
use neo3_io::{to_bytes, BinaryWriter};
use neo3_smart_contract::{create_majority_multisig_script, Role};
use neo3_vm::ScriptBuilder;

use crate::blockchain::{Blockchain, ChainError};

/// Payload category for state service traffic.
pub const STATE_SERVICE_CATEGORY: &str = "StateService";

/// Message tag of a finalized state root inside the payload data.
const MESSAGE_ROOT: u8 = 0x01;

/// Receives finalized payloads for network broadcast.
pub type RelayCallback = Arc<dyn Fn(ExtensiblePayload) + Send + Sync>;

/// Errors of the aggregation service.
#[derive(Debug, Error)]
pub enum StateRootError {
    #[error("validator index {index} out of range for {count} validators")]
    InvalidValidatorIndex { index: i32, count: usize },

    #[error("invalid state root signature from validator {0}")]
    InvalidSignature(u32),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("contract failure: {0}")]
    Contract(#[from] neo3_smart_contract::ContractError),

    #[error("codec failure: {0}")]
    Io(#[from] neo3_io::IoError),
}

/// Per-height collection state.
#[derive(Default)]
struct IncompleteRoot {
    /// The locally computed root, once the chain has it.
    root: Option<MPTRoot>,
    /// Signatures by validator key; duplicates are no-ops.
    signatures: HashMap<ECPoint, Vec<u8>>,
    /// Unverified signatures buffered before the local root is known.
    retries: u32,
    finalized: bool,
}

/// The signature aggregation service.
pub struct StateRootService {
    chain: Arc<Blockchain>,
    incomplete: Mutex<HashMap<u32, IncompleteRoot>>,
    relay: RwLock<Option<RelayCallback>>,
}

impl StateRootService {
    pub fn new(chain: Arc<Blockchain>) -> Self {
        Self {
            chain,
            incomplete: Mutex::new(HashMap::new()),
            relay: RwLock::new(None),
        }
    }

    /// Registers the broadcast callback.
    pub fn set_relay_callback(&self, callback: RelayCallback) {
        *self.relay.write() = Some(callback);
    }

    /// The state validators designated for a height.
    pub fn state_validators(&self, height: u32) -> Vec<ECPoint> {
        self.chain
            .natives()
            .role_management
            .get_designated_by_role(&self.chain.snapshot(), Role::StateValidator, height)
            .map(|(nodes, _)| nodes)
            .unwrap_or_default()
    }

    /// Adds one validator's signature over the root at `height`.
    ///
    /// Collection is monotonic and idempotent: duplicates are no-ops and a
    /// finalized height accepts further signatures without effect.
    pub fn add_signature(
        &self,
        height: u32,
        validator_index: i32,
        signature: Vec<u8>,
    ) -> Result<(), StateRootError> {
        let validators = self.state_validators(height);
        if validator_index < 0 || validator_index as usize >= validators.len() {
            return Err(StateRootError::InvalidValidatorIndex {
                index: validator_index,
                count: validators.len(),
            });
        }
        let public_key = validators[validator_index as usize];

        let finalized = {
            let mut incomplete = self.incomplete.lock();
            let entry = incomplete.entry(height).or_default();
            if entry.finalized {
                return Ok(());
            }
            if entry.root.is_none() {
                entry.root = self.chain.state_root(height)?;
            }
            match &entry.root {
                Some(root) => {
                    let message = root.signed_hash();
                    if !public_key.verify(message.as_bytes(), &signature) {
                        return Err(StateRootError::InvalidSignature(height));
                    }
                }
                None => {
                    // Buffered until the local root lands; verified then.
                    entry.retries += 1;
                    debug!(
                        height,
                        validator_index,
                        retries = entry.retries,
                        "signature buffered before local root"
                    );
                }
            }
            entry.signatures.entry(public_key).or_insert(signature);
            self.try_finalize(entry, &validators)?
        };

        if let Some((root, payload)) = finalized {
            // The chain write and the relay happen outside the collection
            // lock; the callback must not be able to re-enter it blocked.
            self.chain.add_state_root(root)?;
            if let Some(relay) = self.relay.read().clone() {
                relay(payload);
            }
        }
        Ok(())
    }

    /// Called when the chain computed the root for a height: verifies
    /// buffered signatures and finalizes if the quorum is already there.
    pub fn on_local_root(&self, height: u32) -> Result<(), StateRootError> {
        let validators = self.state_validators(height);
        let finalized = {
            let mut incomplete = self.incomplete.lock();
            let Some(entry) = incomplete.get_mut(&height) else {
                return Ok(());
            };
            if entry.finalized || entry.root.is_some() {
                return Ok(());
            }
            let Some(root) = self.chain.state_root(height)? else {
                return Ok(());
            };
            let message = root.signed_hash();
            entry
                .signatures
                .retain(|key, sig| key.verify(message.as_bytes(), sig));
            entry.root = Some(root);
            self.try_finalize(entry, &validators)?
        };
        if let Some((root, payload)) = finalized {
            self.chain.add_state_root(root)?;
            if let Some(relay) = self.relay.read().clone() {
                relay(payload);
            }
        }
        Ok(())
    }

    /// Finalizes when strictly more than half of the validators signed.
    fn try_finalize(
        &self,
        entry: &mut IncompleteRoot,
        validators: &[ECPoint],
    ) -> Result<Option<(MPTRoot, ExtensiblePayload)>, StateRootError> {
        let Some(root) = entry.root.clone() else {
            return Ok(None);
        };
        if validators.is_empty() || entry.signatures.len() * 2 <= validators.len() {
            return Ok(None);
        }

        // Assemble the witness in validator-sorted key order, taking the
        // quorum-sized prefix of available signatures.
        let quorum = validators.len() / 2 + 1;
        let mut sorted: Vec<ECPoint> = validators.to_vec();
        sorted.sort();
        let mut invocation = ScriptBuilder::new();
        let mut taken = 0usize;
        for key in &sorted {
            if taken == quorum {
                break;
            }
            if let Some(signature) = entry.signatures.get(key) {
                invocation.emit_push_bytes(signature);
                taken += 1;
            }
        }
        if taken < quorum {
            return Ok(None);
        }
        let verification = create_majority_multisig_script(validators)?;

        let mut finalized = root;
        finalized.witness = Some(Witness::new(invocation.into_bytes(), verification.clone()));
        entry.finalized = true;
        info!(height = finalized.index, root = %finalized.root, "state root finalized");

        let payload = self.build_payload(&finalized, &verification)?;
        Ok(Some((finalized, payload)))
    }

    fn build_payload(
        &self,
        root: &MPTRoot,
        verification: &[u8],
    ) -> Result<ExtensiblePayload, StateRootError> {
        let mut data = BinaryWriter::new();
        data.write_u8(MESSAGE_ROOT)?;
        data.write_bytes(&to_bytes(root)?)?;
        let witness = root
            .witness
            .clone()
            .unwrap_or_else(|| Witness::new(Vec::new(), verification.to_vec()));
        Ok(ExtensiblePayload {
            category: STATE_SERVICE_CATEGORY.to_string(),
            network: self.chain.settings().magic,
            valid_block_start: root.index,
            valid_block_end: root.index + MAX_VALID_UNTIL_BLOCK_INCREMENT,
            sender: hash160(verification),
            data: data.into_bytes(),
            witness,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo3_config::ProtocolSettings;
    use neo3_core::crypto::ECPoint;
    use neo3_persistence::MemoryStore;
    use neo3_smart_contract::native::role_management::RoleManagement;
    use p256::ecdsa::signature::Signer as _;
    use p256::ecdsa::SigningKey;
    use rand::rngs::OsRng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_chain() -> Arc<Blockchain> {
        let mut settings = ProtocolSettings::default();
        settings.verify_blocks = false;
        settings.verify_transactions = false;
        Blockchain::new(Arc::new(settings), Arc::new(MemoryStore::new())).unwrap()
    }

    fn designate_validators(chain: &Blockchain, keys: &[ECPoint]) {
        // Effective from height 0 onward: write the record directly at the
        // designation key for index 0.
        let mut dao = chain.snapshot();
        let mut key = vec![Role::StateValidator as u8];
        key.extend_from_slice(&0u32.to_be_bytes());
        let mut writer = BinaryWriter::new();
        let mut sorted = keys.to_vec();
        sorted.sort();
        writer.write_serializable_list(&sorted).unwrap();
        dao.put_storage_item(RoleManagement::ID, &key, writer.into_bytes());
        dao.persist().unwrap();
    }

    #[test]
    fn quorum_finalizes_exactly_once() {
        let chain = test_chain();
        let signing: Vec<SigningKey> = (0..4).map(|_| SigningKey::random(&mut OsRng)).collect();
        let mut keys: Vec<ECPoint> = signing
            .iter()
            .map(|sk| {
                ECPoint::from_bytes(sk.verifying_key().to_encoded_point(true).as_bytes())
                    .unwrap()
            })
            .collect();
        designate_validators(&chain, &keys);
        // The service sees validators in designated (sorted) order.
        keys.sort();

        let service = StateRootService::new(Arc::clone(&chain));
        let relayed = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(parking_lot::Mutex::new(Vec::<ExtensiblePayload>::new()));
        {
            let relayed = Arc::clone(&relayed);
            let seen = Arc::clone(&seen);
            service.set_relay_callback(Arc::new(move |payload| {
                relayed.fetch_add(1, Ordering::SeqCst);
                seen.lock().push(payload);
            }));
        }

        let validators = service.state_validators(0);
        assert_eq!(validators.len(), 4);
        let root = chain.state_root(0).unwrap().unwrap();
        let message = root.signed_hash();
        let sign_with = |key: &ECPoint| -> Vec<u8> {
            let signer = signing
                .iter()
                .find(|sk| {
                    sk.verifying_key().to_encoded_point(true).as_bytes()
                        == key.as_bytes().as_slice()
                })
                .unwrap();
            let signature: p256::ecdsa::Signature = signer.sign(message.as_bytes());
            signature.to_bytes().to_vec()
        };

        // Two of four signatures: no quorum yet.
        service
            .add_signature(0, 0, sign_with(&validators[0]))
            .unwrap();
        service
            .add_signature(0, 2, sign_with(&validators[2]))
            .unwrap();
        assert_eq!(relayed.load(Ordering::SeqCst), 0);

        // A duplicate is a no-op.
        service
            .add_signature(0, 0, sign_with(&validators[0]))
            .unwrap();
        assert_eq!(relayed.load(Ordering::SeqCst), 0);

        // The third distinct signature crosses n/2 and relays exactly once.
        service
            .add_signature(0, 1, sign_with(&validators[1]))
            .unwrap();
        assert_eq!(relayed.load(Ordering::SeqCst), 1);

        // Late signatures change nothing.
        service
            .add_signature(0, 3, sign_with(&validators[3]))
            .unwrap();
        assert_eq!(relayed.load(Ordering::SeqCst), 1);

        let payloads = seen.lock();
        let payload = &payloads[0];
        assert_eq!(payload.category, STATE_SERVICE_CATEGORY);
        assert_eq!(
            payload.valid_block_end - payload.valid_block_start,
            MAX_VALID_UNTIL_BLOCK_INCREMENT
        );
        assert!(!payload.data.is_empty());

        // The finalized root reached the chain with its witness.
        let stored = chain.state_root(0).unwrap().unwrap();
        assert!(stored.witness.is_some());
    }

    #[test]
    fn out_of_range_validator_rejected() {
        let chain = test_chain();
        let service = StateRootService::new(chain);
        assert!(matches!(
            service.add_signature(0, 0, vec![0u8; 64]),
            Err(StateRootError::InvalidValidatorIndex { .. })
        ));
    }

    #[test]
    fn bad_signature_rejected() {
        let chain = test_chain();
        let sk = SigningKey::random(&mut OsRng);
        let key =
            ECPoint::from_bytes(sk.verifying_key().to_encoded_point(true).as_bytes()).unwrap();
        designate_validators(&chain, &[key]);
        let service = StateRootService::new(chain);
        assert!(matches!(
            service.add_signature(0, 0, vec![0u8; 64]),
            Err(StateRootError::InvalidSignature(_))
        ));
    }
}
