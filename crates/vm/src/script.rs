//! Scripts, instruction decoding and the script builder.

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::error::{VmError, VmResult};
use crate::op_code::{OpCode, OperandSize};

/// An immutable compiled script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    bytes: Vec<u8>,
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: OpCode,
    pub operand: Vec<u8>,
    /// Offset of the instruction within its script.
    pub position: usize,
}

impl Instruction {
    /// Total encoded length including opcode and any length prefix.
    pub fn len(&self) -> usize {
        let prefix = match self.opcode.operand_size() {
            OperandSize::Fixed(_) => 0,
            OperandSize::Prefixed(n) => n,
        };
        1 + prefix + self.operand.len()
    }

    /// Signed 8-bit operand, for short jumps.
    pub fn operand_i8(&self) -> VmResult<i8> {
        match self.operand.as_slice() {
            [byte] => Ok(*byte as i8),
            _ => Err(VmError::InvalidOperation("expected 1-byte operand".into())),
        }
    }

    /// Signed 32-bit operand, for long jumps and syscall ids.
    pub fn operand_i32(&self) -> VmResult<i32> {
        let bytes: [u8; 4] = self
            .operand
            .as_slice()
            .try_into()
            .map_err(|_| VmError::InvalidOperation("expected 4-byte operand".into()))?;
        Ok(i32::from_le_bytes(bytes))
    }

    pub fn operand_u8(&self, index: usize) -> VmResult<u8> {
        self.operand
            .get(index)
            .copied()
            .ok_or_else(|| VmError::InvalidOperation("operand too short".into()))
    }

    /// Little-endian signed integer operand of the `PUSHINT` family.
    pub fn operand_integer(&self) -> BigInt {
        BigInt::from_signed_bytes_le(&self.operand)
    }
}

impl Script {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decodes the instruction at `position`.
    pub fn instruction_at(&self, position: usize) -> VmResult<Instruction> {
        let byte = *self
            .bytes
            .get(position)
            .ok_or(VmError::InvalidInstructionPointer(position))?;
        let opcode = OpCode::from_byte(byte)?;
        let operand = match opcode.operand_size() {
            OperandSize::Fixed(size) => self.slice(position + 1, size)?.to_vec(),
            OperandSize::Prefixed(prefix_size) => {
                let prefix = self.slice(position + 1, prefix_size)?;
                let mut length = 0usize;
                for (i, b) in prefix.iter().enumerate() {
                    length |= (*b as usize) << (8 * i);
                }
                if length > crate::stack_item::MAX_ITEM_SIZE {
                    return Err(VmError::ItemTooLarge);
                }
                self.slice(position + 1 + prefix_size, length)?.to_vec()
            }
        };
        Ok(Instruction {
            opcode,
            operand,
            position,
        })
    }

    fn slice(&self, start: usize, len: usize) -> VmResult<&[u8]> {
        self.bytes
            .get(start..start + len)
            .ok_or(VmError::InvalidInstructionPointer(start))
    }
}

impl From<Vec<u8>> for Script {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

/// Builds scripts instruction by instruction.
#[derive(Debug, Default)]
pub struct ScriptBuilder {
    bytes: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, opcode: OpCode) -> &mut Self {
        self.bytes.push(opcode as u8);
        self
    }

    pub fn emit_with_operand(&mut self, opcode: OpCode, operand: &[u8]) -> &mut Self {
        self.bytes.push(opcode as u8);
        self.bytes.extend_from_slice(operand);
        self
    }

    /// Pushes an integer using the shortest encoding.
    pub fn emit_push_integer(&mut self, value: &BigInt) -> &mut Self {
        if let Some(small) = value.to_i64() {
            if (-1..=16).contains(&small) {
                let opcode = match small {
                    -1 => OpCode::PushM1 as u8,
                    n => OpCode::Push0 as u8 + n as u8,
                };
                self.bytes.push(opcode);
                return self;
            }
        }
        let bytes = value.to_signed_bytes_le();
        let (opcode, width) = match bytes.len() {
            0..=1 => (OpCode::PushInt8, 1),
            2 => (OpCode::PushInt16, 2),
            3..=4 => (OpCode::PushInt32, 4),
            5..=8 => (OpCode::PushInt64, 8),
            9..=16 => (OpCode::PushInt128, 16),
            _ => (OpCode::PushInt256, 32),
        };
        let mut padded = bytes;
        let fill = if value.sign() == num_bigint::Sign::Minus {
            0xFF
        } else {
            0x00
        };
        padded.resize(width, fill);
        self.emit_with_operand(opcode, &padded)
    }

    pub fn emit_push_i64(&mut self, value: i64) -> &mut Self {
        self.emit_push_integer(&BigInt::from(value))
    }

    pub fn emit_push_bool(&mut self, value: bool) -> &mut Self {
        self.emit(if value {
            OpCode::PushTrue
        } else {
            OpCode::PushFalse
        })
    }

    /// Pushes a byte string with the smallest `PUSHDATA` form.
    pub fn emit_push_bytes(&mut self, data: &[u8]) -> &mut Self {
        match data.len() {
            0..=0xFF => {
                self.bytes.push(OpCode::PushData1 as u8);
                self.bytes.push(data.len() as u8);
            }
            0x100..=0xFFFF => {
                self.bytes.push(OpCode::PushData2 as u8);
                self.bytes.extend_from_slice(&(data.len() as u16).to_le_bytes());
            }
            _ => {
                self.bytes.push(OpCode::PushData4 as u8);
                self.bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
            }
        }
        self.bytes.extend_from_slice(data);
        self
    }

    pub fn emit_syscall(&mut self, id: u32) -> &mut Self {
        self.bytes.push(OpCode::Syscall as u8);
        self.bytes.extend_from_slice(&id.to_le_bytes());
        self
    }

    pub fn to_script(&self) -> Script {
        Script::new(self.bytes.clone())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_pushdata() {
        let mut builder = ScriptBuilder::new();
        builder.emit_push_bytes(b"abc").emit(OpCode::Ret);
        let script = builder.to_script();

        let ins = script.instruction_at(0).unwrap();
        assert_eq!(ins.opcode, OpCode::PushData1);
        assert_eq!(ins.operand, b"abc");
        assert_eq!(ins.len(), 5);

        let ret = script.instruction_at(5).unwrap();
        assert_eq!(ret.opcode, OpCode::Ret);
    }

    #[test]
    fn small_integers_use_single_byte() {
        let mut builder = ScriptBuilder::new();
        builder.emit_push_i64(-1);
        builder.emit_push_i64(0);
        builder.emit_push_i64(16);
        builder.emit_push_i64(17);
        let script = builder.to_script();
        assert_eq!(script.instruction_at(0).unwrap().opcode, OpCode::PushM1);
        assert_eq!(script.instruction_at(1).unwrap().opcode, OpCode::Push0);
        assert_eq!(script.instruction_at(2).unwrap().opcode, OpCode::Push16);
        let wide = script.instruction_at(3).unwrap();
        assert_eq!(wide.opcode, OpCode::PushInt8);
        assert_eq!(wide.operand_integer(), BigInt::from(17));
    }

    #[test]
    fn negative_integers_sign_extend() {
        let mut builder = ScriptBuilder::new();
        builder.emit_push_i64(-200);
        let script = builder.to_script();
        let ins = script.instruction_at(0).unwrap();
        assert_eq!(ins.opcode, OpCode::PushInt16);
        assert_eq!(ins.operand_integer(), BigInt::from(-200));
    }

    #[test]
    fn truncated_operand_is_detected() {
        let script = Script::new(vec![OpCode::PushInt32 as u8, 0x01]);
        assert!(script.instruction_at(0).is_err());
    }
}
