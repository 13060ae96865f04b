//! Persisted results of script execution.

use neo3_core::{UInt160, UInt256};
use neo3_io::{
    from_bytes, to_bytes, var_bytes_size, var_uint_size, BinaryWriter, IoError, IoResult,
    MemoryReader, Serializable,
};
use neo3_persistence::{DataCache, StorageResult};
use neo3_vm::{StackItem, VMState};
use num_bigint::BigInt;

use crate::application_engine::Trigger;

/// Depth bound when flattening result stacks for persistence.
const MAX_RESULT_DEPTH: usize = 16;

/// An owned, persistable snapshot of a stack item.
///
/// Interop handles and aliasing disappear in the snapshot; that is fine for
/// execution results, which are read back only for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppStackItem {
    Null,
    Boolean(bool),
    Integer(BigInt),
    Bytes(Vec<u8>),
    Array(Vec<AppStackItem>),
    Map(Vec<(AppStackItem, AppStackItem)>),
    /// Anything that cannot be persisted, kept as a type marker.
    Opaque,
}

impl AppStackItem {
    /// Snapshots a live stack item, cutting off at `MAX_RESULT_DEPTH`.
    pub fn from_stack_item(item: &StackItem) -> AppStackItem {
        Self::convert(item, 0)
    }

    fn convert(item: &StackItem, depth: usize) -> AppStackItem {
        if depth >= MAX_RESULT_DEPTH {
            return AppStackItem::Opaque;
        }
        match item {
            StackItem::Null => AppStackItem::Null,
            StackItem::Boolean(b) => AppStackItem::Boolean(*b),
            StackItem::Integer(i) => AppStackItem::Integer(i.clone()),
            StackItem::ByteString(bytes) => AppStackItem::Bytes(bytes.as_ref().clone()),
            StackItem::Buffer(buffer) => AppStackItem::Bytes(buffer.borrow().clone()),
            StackItem::Array(items) | StackItem::Struct(items) => AppStackItem::Array(
                items
                    .borrow()
                    .iter()
                    .map(|i| Self::convert(i, depth + 1))
                    .collect(),
            ),
            StackItem::Map(entries) => AppStackItem::Map(
                entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| (Self::convert(k, depth + 1), Self::convert(v, depth + 1)))
                    .collect(),
            ),
            StackItem::InteropInterface(_) | StackItem::Pointer { .. } => AppStackItem::Opaque,
        }
    }
}

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INTEGER: u8 = 2;
const TAG_BYTES: u8 = 3;
const TAG_ARRAY: u8 = 4;
const TAG_MAP: u8 = 5;
const TAG_OPAQUE: u8 = 6;

impl Serializable for AppStackItem {
    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        match self {
            AppStackItem::Null => writer.write_u8(TAG_NULL),
            AppStackItem::Boolean(b) => {
                writer.write_u8(TAG_BOOL)?;
                writer.write_bool(*b)
            }
            AppStackItem::Integer(i) => {
                writer.write_u8(TAG_INTEGER)?;
                writer.write_var_bytes(&i.to_signed_bytes_le())
            }
            AppStackItem::Bytes(bytes) => {
                writer.write_u8(TAG_BYTES)?;
                writer.write_var_bytes(bytes)
            }
            AppStackItem::Array(items) => {
                writer.write_u8(TAG_ARRAY)?;
                writer.write_serializable_list(items)
            }
            AppStackItem::Map(entries) => {
                writer.write_u8(TAG_MAP)?;
                writer.write_var_uint(entries.len() as u64)?;
                for (key, value) in entries {
                    key.serialize(writer)?;
                    value.serialize(writer)?;
                }
                Ok(())
            }
            AppStackItem::Opaque => writer.write_u8(TAG_OPAQUE),
        }
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        match reader.read_u8()? {
            TAG_NULL => Ok(AppStackItem::Null),
            TAG_BOOL => Ok(AppStackItem::Boolean(reader.read_bool()?)),
            TAG_INTEGER => {
                let bytes = reader.read_var_bytes(32)?;
                Ok(AppStackItem::Integer(BigInt::from_signed_bytes_le(&bytes)))
            }
            TAG_BYTES => Ok(AppStackItem::Bytes(reader.read_var_bytes(0xFFFF)?)),
            TAG_ARRAY => Ok(AppStackItem::Array(reader.read_serializable_list(2048)?)),
            TAG_MAP => {
                let count = reader.read_var_uint(2048)? as usize;
                let mut entries = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    let key = AppStackItem::deserialize(reader)?;
                    let value = AppStackItem::deserialize(reader)?;
                    entries.push((key, value));
                }
                Ok(AppStackItem::Map(entries))
            }
            TAG_OPAQUE => Ok(AppStackItem::Opaque),
            other => Err(IoError::Format(format!("unknown result tag {other}"))),
        }
    }

    fn size(&self) -> usize {
        1 + match self {
            AppStackItem::Null | AppStackItem::Opaque => 0,
            AppStackItem::Boolean(_) => 1,
            AppStackItem::Integer(i) => var_bytes_size(i.to_signed_bytes_le().len()),
            AppStackItem::Bytes(bytes) => var_bytes_size(bytes.len()),
            AppStackItem::Array(items) => {
                var_uint_size(items.len() as u64)
                    + items.iter().map(Serializable::size).sum::<usize>()
            }
            AppStackItem::Map(entries) => {
                var_uint_size(entries.len() as u64)
                    + entries
                        .iter()
                        .map(|(k, v)| k.size() + v.size())
                        .sum::<usize>()
            }
        }
    }
}

/// An event a contract raised during execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub contract: UInt160,
    pub name: String,
    pub state: Vec<AppStackItem>,
}

impl Serializable for NotificationEvent {
    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        self.contract.serialize(writer)?;
        writer.write_var_string(&self.name)?;
        writer.write_serializable_list(&self.state)
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        Ok(Self {
            contract: UInt160::deserialize(reader)?,
            name: reader.read_var_string(32)?,
            state: reader.read_serializable_list(2048)?,
        })
    }

    fn size(&self) -> usize {
        20 + var_bytes_size(self.name.len())
            + var_uint_size(self.state.len() as u64)
            + self.state.iter().map(Serializable::size).sum::<usize>()
    }
}

/// The persisted outcome of executing a transaction script or a system
/// trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppExecResult {
    pub trigger: Trigger,
    pub vm_state: VMState,
    pub gas_consumed: i64,
    /// The faulting exception rendered as text, if any.
    pub exception: Option<String>,
    pub stack: Vec<AppStackItem>,
    pub notifications: Vec<NotificationEvent>,
}

impl Serializable for AppExecResult {
    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_u8(self.trigger as u8)?;
        writer.write_u8(match self.vm_state {
            VMState::Halt => 1,
            VMState::Fault => 2,
            VMState::Break => 3,
            VMState::None => 0,
        })?;
        writer.write_i64(self.gas_consumed)?;
        match &self.exception {
            Some(message) => {
                writer.write_u8(1)?;
                writer.write_var_string(message)?;
            }
            None => writer.write_u8(0)?,
        }
        writer.write_serializable_list(&self.stack)?;
        writer.write_serializable_list(&self.notifications)
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        let trigger = Trigger::from_byte(reader.read_u8()?)
            .ok_or_else(|| IoError::Format("unknown trigger".into()))?;
        let vm_state = match reader.read_u8()? {
            0 => VMState::None,
            1 => VMState::Halt,
            2 => VMState::Fault,
            3 => VMState::Break,
            other => return Err(IoError::Format(format!("unknown vm state {other}"))),
        };
        let gas_consumed = reader.read_i64()?;
        let exception = match reader.read_u8()? {
            0 => None,
            _ => Some(reader.read_var_string(1024)?),
        };
        let stack = reader.read_serializable_list(2048)?;
        let notifications = reader.read_serializable_list(2048)?;
        Ok(Self {
            trigger,
            vm_state,
            gas_consumed,
            exception,
            stack,
            notifications,
        })
    }

    fn size(&self) -> usize {
        1 + 1
            + 8
            + 1
            + self
                .exception
                .as_ref()
                .map_or(0, |m| var_bytes_size(m.len()))
            + var_uint_size(self.stack.len() as u64)
            + self.stack.iter().map(Serializable::size).sum::<usize>()
            + var_uint_size(self.notifications.len() as u64)
            + self
                .notifications
                .iter()
                .map(Serializable::size)
                .sum::<usize>()
    }
}

/// Persists an execution result keyed by block or transaction hash.
pub fn put_exec_result(
    dao: &mut DataCache,
    hash: &UInt256,
    result: &AppExecResult,
) -> StorageResult<()> {
    let bytes = to_bytes(result)?;
    dao.put_exec_result(hash, bytes);
    Ok(())
}

/// Loads the execution result for a block or transaction hash.
pub fn get_exec_result(
    dao: &DataCache,
    hash: &UInt256,
) -> StorageResult<Option<AppExecResult>> {
    match dao.get_exec_result(hash)? {
        Some(bytes) => Ok(Some(from_bytes(&bytes)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_round_trip() {
        let result = AppExecResult {
            trigger: Trigger::Application,
            vm_state: VMState::Halt,
            gas_consumed: 123_456,
            exception: None,
            stack: vec![
                AppStackItem::Integer(BigInt::from(-7)),
                AppStackItem::Array(vec![AppStackItem::Bytes(b"x".to_vec()), AppStackItem::Null]),
            ],
            notifications: vec![NotificationEvent {
                contract: UInt160::zero(),
                name: "Transfer".into(),
                state: vec![AppStackItem::Boolean(true)],
            }],
        };
        let bytes = to_bytes(&result).unwrap();
        assert_eq!(bytes.len(), result.size());
        assert_eq!(from_bytes::<AppExecResult>(&bytes).unwrap(), result);
    }

    #[test]
    fn fault_with_exception_round_trips() {
        let result = AppExecResult {
            trigger: Trigger::Application,
            vm_state: VMState::Fault,
            gas_consumed: 10,
            exception: Some("division by zero".into()),
            stack: Vec::new(),
            notifications: Vec::new(),
        };
        let bytes = to_bytes(&result).unwrap();
        let decoded = from_bytes::<AppExecResult>(&bytes).unwrap();
        assert_eq!(decoded.exception.as_deref(), Some("division by zero"));
    }

    #[test]
    fn snapshot_cuts_interop_handles() {
        let item = StackItem::array(vec![StackItem::integer(1), StackItem::Null]);
        let snapshot = AppStackItem::from_stack_item(&item);
        assert_eq!(
            snapshot,
            AppStackItem::Array(vec![
                AppStackItem::Integer(BigInt::from(1)),
                AppStackItem::Null
            ])
        );
    }
}
