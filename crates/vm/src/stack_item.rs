//! Values manipulated by the virtual machine.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use crate::error::{VmError, VmResult};
use crate::script::Script;

/// Interior of an array or struct, shared between aliases.
pub type ArrayRef = Rc<RefCell<Vec<StackItem>>>;

/// Interior of a map: insertion-ordered key/value pairs so enumeration is
/// deterministic.
pub type MapRef = Rc<RefCell<Vec<(StackItem, StackItem)>>>;

/// Largest byte-string or buffer the machine will construct.
pub const MAX_ITEM_SIZE: usize = 1024 * 1024;

/// Largest integer magnitude: 32 bytes of two's complement.
pub const MAX_INTEGER_SIZE: usize = 32;

/// Type tags, also used as the operand of `ISTYPE`/`CONVERT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StackItemType {
    Any = 0x00,
    Pointer = 0x10,
    Boolean = 0x20,
    Integer = 0x21,
    ByteString = 0x28,
    Buffer = 0x30,
    Array = 0x40,
    Struct = 0x41,
    Map = 0x48,
    InteropInterface = 0x60,
}

impl StackItemType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Any),
            0x10 => Some(Self::Pointer),
            0x20 => Some(Self::Boolean),
            0x21 => Some(Self::Integer),
            0x28 => Some(Self::ByteString),
            0x30 => Some(Self::Buffer),
            0x40 => Some(Self::Array),
            0x41 => Some(Self::Struct),
            0x48 => Some(Self::Map),
            0x60 => Some(Self::InteropInterface),
            _ => None,
        }
    }
}

/// A value on the evaluation stack.
///
/// Compound variants share their interior, so aliases observe mutation; the
/// reference counter bounds how many items stay reachable.
#[derive(Debug, Clone)]
pub enum StackItem {
    Null,
    Boolean(bool),
    Integer(BigInt),
    ByteString(Rc<Vec<u8>>),
    Buffer(Rc<RefCell<Vec<u8>>>),
    Array(ArrayRef),
    Struct(ArrayRef),
    Map(MapRef),
    InteropInterface(Rc<dyn Any>),
    Pointer { script: Rc<Script>, position: usize },
}

impl StackItem {
    pub fn byte_string(bytes: impl Into<Vec<u8>>) -> Self {
        Self::ByteString(Rc::new(bytes.into()))
    }

    pub fn buffer(bytes: Vec<u8>) -> Self {
        Self::Buffer(Rc::new(RefCell::new(bytes)))
    }

    pub fn integer(value: impl Into<BigInt>) -> Self {
        Self::Integer(value.into())
    }

    pub fn array(items: Vec<StackItem>) -> Self {
        Self::Array(Rc::new(RefCell::new(items)))
    }

    pub fn struct_(items: Vec<StackItem>) -> Self {
        Self::Struct(Rc::new(RefCell::new(items)))
    }

    pub fn map() -> Self {
        Self::Map(Rc::new(RefCell::new(Vec::new())))
    }

    pub fn item_type(&self) -> StackItemType {
        match self {
            Self::Null => StackItemType::Any,
            Self::Boolean(_) => StackItemType::Boolean,
            Self::Integer(_) => StackItemType::Integer,
            Self::ByteString(_) => StackItemType::ByteString,
            Self::Buffer(_) => StackItemType::Buffer,
            Self::Array(_) => StackItemType::Array,
            Self::Struct(_) => StackItemType::Struct,
            Self::Map(_) => StackItemType::Map,
            Self::InteropInterface(_) => StackItemType::InteropInterface,
            Self::Pointer { .. } => StackItemType::Pointer,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Truthiness of the item.
    pub fn try_bool(&self) -> VmResult<bool> {
        Ok(match self {
            Self::Null => false,
            Self::Boolean(b) => *b,
            Self::Integer(i) => !i.is_zero(),
            Self::ByteString(bytes) => bytes.iter().any(|b| *b != 0),
            Self::Buffer(_)
            | Self::Array(_)
            | Self::Struct(_)
            | Self::Map(_)
            | Self::InteropInterface(_)
            | Self::Pointer { .. } => true,
        })
    }

    /// Numeric value of the item, bounded to 32 bytes of two's complement.
    pub fn try_integer(&self) -> VmResult<BigInt> {
        let value = match self {
            Self::Boolean(b) => BigInt::from(u8::from(*b)),
            Self::Integer(i) => i.clone(),
            Self::ByteString(bytes) => integer_from_bytes(bytes)?,
            Self::Buffer(buffer) => integer_from_bytes(&buffer.borrow())?,
            _ => return Err(VmError::InvalidCast("integer conversion")),
        };
        check_integer(&value)?;
        Ok(value)
    }

    /// Byte form of the item.
    pub fn try_bytes(&self) -> VmResult<Vec<u8>> {
        match self {
            Self::Boolean(b) => Ok(vec![u8::from(*b)]),
            Self::Integer(i) => Ok(integer_to_bytes(i)),
            Self::ByteString(bytes) => Ok(bytes.as_ref().clone()),
            Self::Buffer(buffer) => Ok(buffer.borrow().clone()),
            _ => Err(VmError::InvalidCast("byte conversion")),
        }
    }

    /// Integer narrowed to i64, for counts and indices.
    pub fn try_i64(&self) -> VmResult<i64> {
        self.try_integer()?
            .to_i64()
            .ok_or(VmError::IntegerOverflow)
    }

    /// Value equality.
    ///
    /// Primitives compare by canonical bytes, compound items and buffers by
    /// identity, pointers by script identity and position.
    pub fn equals(&self, other: &StackItem) -> VmResult<bool> {
        Ok(match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Null, _) | (_, Self::Null) => false,
            (Self::Buffer(a), Self::Buffer(b)) => Rc::ptr_eq(a, b),
            (Self::Array(a), Self::Array(b)) | (Self::Struct(a), Self::Struct(b)) => {
                Rc::ptr_eq(a, b)
            }
            (Self::Map(a), Self::Map(b)) => Rc::ptr_eq(a, b),
            (Self::InteropInterface(a), Self::InteropInterface(b)) => Rc::ptr_eq(a, b),
            (
                Self::Pointer {
                    script: sa,
                    position: pa,
                },
                Self::Pointer {
                    script: sb,
                    position: pb,
                },
            ) => Rc::ptr_eq(sa, sb) && pa == pb,
            (a, b) if a.is_primitive() && b.is_primitive() => {
                let left = a.try_bytes()?;
                if left.len() > MAX_ITEM_SIZE {
                    return Err(VmError::ItemTooLarge);
                }
                left == b.try_bytes()?
            }
            _ => false,
        })
    }

    fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Boolean(_) | Self::Integer(_) | Self::ByteString(_)
        )
    }

    /// Structural copy for struct semantics; shared interiors are duplicated.
    pub fn deep_copy(&self) -> StackItem {
        match self {
            Self::Array(items) => Self::array(
                items.borrow().iter().map(StackItem::deep_copy).collect(),
            ),
            Self::Struct(items) => Self::struct_(
                items.borrow().iter().map(StackItem::deep_copy).collect(),
            ),
            Self::Map(entries) => Self::Map(Rc::new(RefCell::new(
                entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_copy()))
                    .collect(),
            ))),
            Self::Buffer(buffer) => Self::buffer(buffer.borrow().clone()),
            other => other.clone(),
        }
    }

    /// Converts the item to the requested type, per `CONVERT` semantics.
    pub fn convert_to(&self, target: StackItemType) -> VmResult<StackItem> {
        if self.item_type() == target {
            return Ok(self.clone());
        }
        match target {
            StackItemType::Boolean => Ok(Self::Boolean(self.try_bool()?)),
            StackItemType::Integer => Ok(Self::Integer(self.try_integer()?)),
            StackItemType::ByteString => Ok(Self::byte_string(self.try_bytes()?)),
            StackItemType::Buffer => Ok(Self::buffer(self.try_bytes()?)),
            StackItemType::Array => match self {
                Self::Struct(items) => Ok(Self::Array(Rc::new(RefCell::new(
                    items.borrow().clone(),
                )))),
                _ => Err(VmError::InvalidCast("array conversion")),
            },
            StackItemType::Struct => match self {
                Self::Array(items) => Ok(Self::Struct(Rc::new(RefCell::new(
                    items.borrow().clone(),
                )))),
                _ => Err(VmError::InvalidCast("struct conversion")),
            },
            _ => Err(VmError::InvalidCast("type conversion")),
        }
    }

    /// Whether maps accept this item as a key.
    pub fn is_valid_map_key(&self) -> bool {
        self.is_primitive()
    }
}

/// Rejects integers outside the 32-byte two's-complement range.
pub fn check_integer(value: &BigInt) -> VmResult<()> {
    let bits = value.bits();
    if bits < 8 * MAX_INTEGER_SIZE as u64 {
        return Ok(());
    }
    // 2^255 only fits when negative.
    if bits == 8 * MAX_INTEGER_SIZE as u64
        && value.sign() == num_bigint::Sign::Minus
        && value.magnitude().count_ones() == 1
    {
        return Ok(());
    }
    Err(VmError::IntegerOverflow)
}

/// Decodes a little-endian signed integer of at most 32 bytes.
pub fn integer_from_bytes(bytes: &[u8]) -> VmResult<BigInt> {
    if bytes.len() > MAX_INTEGER_SIZE {
        return Err(VmError::IntegerOverflow);
    }
    if bytes.is_empty() {
        return Ok(BigInt::zero());
    }
    Ok(BigInt::from_signed_bytes_le(bytes))
}

/// Canonical little-endian signed encoding; zero is the empty string.
pub fn integer_to_bytes(value: &BigInt) -> Vec<u8> {
    if value.is_zero() {
        return Vec::new();
    }
    value.to_signed_bytes_le()
}
