//! The role management (Designate) native contract.
//!
//! Maintains, per role, a history of designated public-key lists keyed by
//! the block index at which they become effective, and caches the oracle
//! multisig address across blocks.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use neo3_core::{ECPoint, UInt160};
use neo3_io::{BinaryWriter, MemoryReader};
use neo3_persistence::DataCache;
use neo3_vm::StackItem;

use crate::contract::majority_multisig_address;
use crate::interop::InteropContext;
use crate::native::{native_hash, NativeContract, NativeMethod};
use crate::{ContractError, ContractResult};

/// Maximum number of nodes designated for one role.
pub const MAX_NODE_COUNT: usize = 32;

/// A designated participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Role {
    StateValidator = 4,
    Oracle = 8,
    P2PNotary = 128,
}

impl Role {
    pub fn from_byte(value: u8) -> Option<Role> {
        match value {
            4 => Some(Role::StateValidator),
            8 => Some(Role::Oracle),
            128 => Some(Role::P2PNotary),
            _ => None,
        }
    }
}

/// Cached oracle node set and its multisig address.
#[derive(Debug, Clone)]
struct OraclesData {
    nodes: Vec<ECPoint>,
    address: UInt160,
    height: u32,
}

/// The Designate contract.
pub struct RoleManagement {
    hash: UInt160,
    methods: Vec<NativeMethod>,
    p2p_sig_extensions: bool,
    /// Set inside the commit critical section when a designation landed.
    roles_changed: AtomicBool,
    oracles: RwLock<Option<OraclesData>>,
}

impl RoleManagement {
    pub const ID: i32 = -8;
    pub const NAME: &'static str = "RoleManagement";

    pub fn new(p2p_sig_extensions: bool) -> Self {
        Self {
            hash: native_hash(Self::NAME),
            methods: vec![
                NativeMethod::safe("getDesignatedByRole", 2, 1 << 15),
                NativeMethod::unsafe_method("designateAsRole", 2, 1 << 15),
            ],
            p2p_sig_extensions,
            roles_changed: AtomicBool::new(true),
            oracles: RwLock::new(None),
        }
    }

    fn is_valid_role(&self, role: Role) -> bool {
        match role {
            Role::StateValidator | Role::Oracle => true,
            Role::P2PNotary => self.p2p_sig_extensions,
        }
    }

    fn role_key(role: Role, index: u32) -> Vec<u8> {
        let mut key = Vec::with_capacity(5);
        key.push(role as u8);
        key.extend_from_slice(&index.to_be_bytes());
        key
    }

    fn decode_nodes(bytes: &[u8]) -> ContractResult<Vec<ECPoint>> {
        let mut reader = MemoryReader::new(bytes);
        Ok(reader.read_serializable_list(MAX_NODE_COUNT)?)
    }

    fn encode_nodes(nodes: &[ECPoint]) -> ContractResult<Vec<u8>> {
        let mut writer = BinaryWriter::with_capacity(1 + nodes.len() * 33);
        writer.write_serializable_list(nodes)?;
        Ok(writer.into_bytes())
    }

    /// The designated list with the greatest stored index `<= index`, along
    /// with that index. Empty when nothing was designated yet.
    pub fn get_designated_by_role(
        &self,
        dao: &DataCache,
        role: Role,
        index: u32,
    ) -> ContractResult<(Vec<ECPoint>, u32)> {
        if !self.is_valid_role(role) {
            return Err(ContractError::InvalidOperation(format!(
                "invalid role {}",
                role as u8
            )));
        }
        if role == Role::Oracle && !self.roles_changed.load(Ordering::Acquire) {
            if let Some(data) = self.oracles.read().as_ref() {
                if data.height <= index {
                    return Ok((data.nodes.clone(), data.height));
                }
            }
        }
        let mut best: Option<(u32, Vec<u8>)> = None;
        dao.seek_storage(Self::ID, &[role as u8], &mut |key, value| {
            if key.len() == 5 {
                let stored_index = u32::from_be_bytes(
                    key[1..5].try_into().expect("length checked above"),
                );
                if stored_index <= index
                    && best.as_ref().map_or(true, |(b, _)| stored_index > *b)
                {
                    best = Some((stored_index, value.to_vec()));
                }
            }
            true
        })?;
        match best {
            Some((stored_index, bytes)) => {
                Ok((Self::decode_nodes(&bytes)?, stored_index))
            }
            None => Ok((Vec::new(), 0)),
        }
    }

    /// Designates `nodes` for `role`, effective from the next block.
    pub fn designate_as_role(
        &self,
        ctx: &mut InteropContext<'_>,
        role: Role,
        mut nodes: Vec<ECPoint>,
    ) -> ContractResult<()> {
        if nodes.is_empty() {
            return Err(ContractError::InvalidOperation("empty node list".into()));
        }
        if nodes.len() > MAX_NODE_COUNT {
            return Err(ContractError::InvalidOperation(format!(
                "node list of {} exceeds {MAX_NODE_COUNT}",
                nodes.len()
            )));
        }
        if !self.is_valid_role(role) {
            return Err(ContractError::InvalidOperation(format!(
                "invalid role {}",
                role as u8
            )));
        }
        if !ctx.check_committee()? {
            let committee = majority_multisig_address(&ctx.settings.standby_committee)?;
            return Err(ContractError::WitnessFailed(committee));
        }
        let block = ctx.persisting_block.ok_or_else(|| {
            ContractError::InvalidOperation("no persisting block in the context".into())
        })?;
        let index = block.index() + 1;
        let key = Self::role_key(role, index);
        if ctx.dao.get_storage_item(Self::ID, &key)?.is_some() {
            return Err(ContractError::InvalidOperation(format!(
                "role {} already designated at {index}",
                role as u8
            )));
        }
        nodes.sort();
        let value = Self::encode_nodes(&nodes)?;
        ctx.dao.put_storage_item(Self::ID, &key, value);
        self.roles_changed.store(true, Ordering::Release);
        Ok(())
    }

    /// The cached oracle multisig address; zero before any designation.
    pub fn oracle_address(&self, dao: &DataCache) -> ContractResult<UInt160> {
        if !self.roles_changed.load(Ordering::Acquire) {
            if let Some(data) = self.oracles.read().as_ref() {
                return Ok(data.address);
            }
        }
        let (nodes, _) = self.get_designated_by_role(dao, Role::Oracle, u32::MAX)?;
        majority_multisig_address(&nodes)
    }

    fn role_from_item(&self, item: &StackItem) -> ContractResult<Role> {
        let value = item
            .try_i64()
            .map_err(|_| ContractError::InvalidOperation("role is not an integer".into()))?;
        u8::try_from(value)
            .ok()
            .and_then(Role::from_byte)
            .filter(|r| self.is_valid_role(*r))
            .ok_or_else(|| ContractError::InvalidOperation(format!("invalid role {value}")))
    }
}

impl NativeContract for RoleManagement {
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
            "getDesignatedByRole" => {
                let role = self.role_from_item(&args[0])?;
                let index = args[1].try_i64().map_err(|_| {
                    ContractError::InvalidOperation("index is not an integer".into())
                })?;
                let limit = i64::from(ctx.current_height()) + 1;
                if index < 0 || index > limit {
                    return Err(ContractError::InvalidOperation(format!(
                        "index {index} out of bounds (limit {limit})"
                    )));
                }
                let (nodes, _) =
                    self.get_designated_by_role(ctx.dao, role, index as u32)?;
                Ok(StackItem::array(
                    nodes
                        .iter()
                        .map(|n| StackItem::byte_string(n.as_bytes().to_vec()))
                        .collect(),
                ))
            }
            "designateAsRole" => {
                let role = self.role_from_item(&args[0])?;
                let StackItem::Array(items) = &args[1] else {
                    return Err(ContractError::InvalidOperation(
                        "nodes argument is not an array".into(),
                    ));
                };
                let mut nodes = Vec::with_capacity(items.borrow().len());
                for item in items.borrow().iter() {
                    let bytes = item.try_bytes().map_err(|_| {
                        ContractError::InvalidOperation("node is not a byte string".into())
                    })?;
                    nodes.push(ECPoint::from_bytes(&bytes).map_err(|e| {
                        ContractError::InvalidOperation(e.to_string())
                    })?);
                }
                self.designate_as_role(ctx, role, nodes)?;
                Ok(StackItem::Null)
            }
            other => Err(ContractError::UnknownMethod(
                self.hash,
                other.to_string(),
                args.len(),
            )),
        }
    }

    fn post_persist(&self, ctx: &mut InteropContext<'_>) -> ContractResult<()> {
        if !self.roles_changed.load(Ordering::Acquire) {
            return Ok(());
        }
        let (nodes, height) =
            self.get_designated_by_role(ctx.dao, Role::Oracle, u32::MAX)?;
        let address = majority_multisig_address(&nodes)?;
        *self.oracles.write() = Some(OraclesData {
            nodes,
            address,
            height,
        });
        self.roles_changed.store(false, Ordering::Release);
        Ok(())
    }
}
