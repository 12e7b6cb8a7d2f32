//! Decoded bytecode instructions ("tuples").
//!
//! The first pipeline stage turns a method's raw code bytes into one tuple
//! per instruction, resolving constant-pool operands on the way. Program
//! counters are byte offsets into the original code, so branch targets can
//! be checked against real instruction boundaries later.

use crate::classfile::ConstantPool;
use crate::errors::Error;
use byteorder::{BigEndian, ByteOrder};
use std::fmt;

/// Bytecode opcodes understood by the back end.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Opcode {
    Iconst0,
    Iconst1,
    Ldc,
    Iload,
    Istore,
    Dup,
    Pop,
    Iadd,
    Isub,
    Imul,
    Idiv,
    Irem,
    Ineg,
    Ifeq,
    Ifne,
    IfIcmpeq,
    IfIcmpne,
    IfIcmplt,
    IfIcmpge,
    IfIcmpgt,
    IfIcmple,
    Goto,
    Invokestatic,
    Ireturn,
    Return,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        Some(match byte {
            0x03 => Opcode::Iconst0,
            0x04 => Opcode::Iconst1,
            0x12 => Opcode::Ldc,
            0x15 => Opcode::Iload,
            0x36 => Opcode::Istore,
            0x59 => Opcode::Dup,
            0x57 => Opcode::Pop,
            0x60 => Opcode::Iadd,
            0x64 => Opcode::Isub,
            0x68 => Opcode::Imul,
            0x6c => Opcode::Idiv,
            0x70 => Opcode::Irem,
            0x74 => Opcode::Ineg,
            0x99 => Opcode::Ifeq,
            0x9a => Opcode::Ifne,
            0x9f => Opcode::IfIcmpeq,
            0xa0 => Opcode::IfIcmpne,
            0xa1 => Opcode::IfIcmplt,
            0xa2 => Opcode::IfIcmpge,
            0xa3 => Opcode::IfIcmpgt,
            0xa4 => Opcode::IfIcmple,
            0xa7 => Opcode::Goto,
            0xb8 => Opcode::Invokestatic,
            0xac => Opcode::Ireturn,
            0xb1 => Opcode::Return,
            _ => return None,
        })
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Iconst0 => "iconst_0",
            Opcode::Iconst1 => "iconst_1",
            Opcode::Ldc => "ldc",
            Opcode::Iload => "iload",
            Opcode::Istore => "istore",
            Opcode::Dup => "dup",
            Opcode::Pop => "pop",
            Opcode::Iadd => "iadd",
            Opcode::Isub => "isub",
            Opcode::Imul => "imul",
            Opcode::Idiv => "idiv",
            Opcode::Irem => "irem",
            Opcode::Ineg => "ineg",
            Opcode::Ifeq => "ifeq",
            Opcode::Ifne => "ifne",
            Opcode::IfIcmpeq => "if_icmpeq",
            Opcode::IfIcmpne => "if_icmpne",
            Opcode::IfIcmplt => "if_icmplt",
            Opcode::IfIcmpge => "if_icmpge",
            Opcode::IfIcmpgt => "if_icmpgt",
            Opcode::IfIcmple => "if_icmple",
            Opcode::Goto => "goto",
            Opcode::Invokestatic => "invokestatic",
            Opcode::Ireturn => "ireturn",
            Opcode::Return => "return",
        }
    }

    /// Branch instructions, conditional or not.
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Goto
                | Opcode::Ifeq
                | Opcode::Ifne
                | Opcode::IfIcmpeq
                | Opcode::IfIcmpne
                | Opcode::IfIcmplt
                | Opcode::IfIcmpge
                | Opcode::IfIcmpgt
                | Opcode::IfIcmple
        )
    }

    pub fn is_return(self) -> bool {
        matches!(self, Opcode::Ireturn | Opcode::Return)
    }
}

/// Operand of a decoded instruction.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Operand {
    None,
    /// Resolved integer literal (immediate or via the constant pool).
    Constant(i32),
    /// Local-variable slot index.
    Local(u8),
    /// Absolute target pc of a branch.
    Branch(u32),
    /// Static call target, resolved from the constant pool.
    Call { name: String, descriptor: String },
}

/// One decoded bytecode instruction.
#[derive(Clone, Debug)]
pub struct Tuple {
    pub pc: u32,
    pub opcode: Opcode,
    pub is_leader: bool,
    pub operand: Operand,
}

impl Tuple {
    /// Target pc of a branch tuple.
    pub fn branch_target(&self) -> Option<u32> {
        match self.operand {
            Operand::Branch(target) => Some(target),
            _ => None,
        }
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.operand {
            Operand::None => write!(f, "{}: {}", self.pc, self.opcode.mnemonic()),
            Operand::Constant(value) => {
                write!(f, "{}: {} {}", self.pc, self.opcode.mnemonic(), value)
            }
            Operand::Local(index) => {
                write!(f, "{}: {} {}", self.pc, self.opcode.mnemonic(), index)
            }
            Operand::Branch(target) => {
                write!(f, "{}: {} {}", self.pc, self.opcode.mnemonic(), target)
            }
            Operand::Call { name, descriptor } => {
                write!(f, "{}: {} {}{}", self.pc, self.opcode.mnemonic(), name, descriptor)
            }
        }
    }
}

/// Decodes a method's code bytes into tuples.
pub fn decode_tuples(method: &str, code: &[u8], pool: &ConstantPool) -> Result<Vec<Tuple>, Error> {
    let mut tuples = Vec::new();
    let mut i = 0usize;
    while i < code.len() {
        let pc = i as u32;
        let byte = code[i];
        let opcode = Opcode::from_byte(byte)
            .ok_or_else(|| Error::malformed(method, format!("unknown opcode 0x{:02x} at pc {}", byte, pc)))?;
        i += 1;

        let operand = match opcode {
            Opcode::Iconst0 => Operand::Constant(0),
            Opcode::Iconst1 => Operand::Constant(1),
            Opcode::Ldc => {
                let index = operand_u8(method, code, &mut i, pc)? as u16;
                let value = pool.integer(index).ok_or_else(|| {
                    Error::malformed(
                        method,
                        format!("ldc at pc {} references non-integer pool entry {}", pc, index),
                    )
                })?;
                Operand::Constant(value)
            }
            Opcode::Iload | Opcode::Istore => {
                Operand::Local(operand_u8(method, code, &mut i, pc)?)
            }
            op if op.is_branch() => {
                let displacement = operand_i16(method, code, &mut i, pc)?;
                let target = pc as i64 + displacement as i64;
                if target < 0 {
                    return Err(Error::unreachable(
                        method,
                        format!("branch at pc {} targets negative pc {}", pc, target),
                    ));
                }
                Operand::Branch(target as u32)
            }
            Opcode::Invokestatic => {
                let index = operand_u16(method, code, &mut i, pc)?;
                let (name, descriptor) = pool.method_ref(index).ok_or_else(|| {
                    Error::malformed(
                        method,
                        format!(
                            "invokestatic at pc {} references pool entry {} which is not a method",
                            pc, index
                        ),
                    )
                })?;
                Operand::Call {
                    name: name.to_owned(),
                    descriptor: descriptor.to_owned(),
                }
            }
            _ => Operand::None,
        };

        tuples.push(Tuple {
            pc,
            opcode,
            is_leader: false,
            operand,
        });
    }
    Ok(tuples)
}

fn operand_u8(method: &str, code: &[u8], i: &mut usize, pc: u32) -> Result<u8, Error> {
    if *i >= code.len() {
        return Err(truncated(method, pc));
    }
    let value = code[*i];
    *i += 1;
    Ok(value)
}

fn operand_u16(method: &str, code: &[u8], i: &mut usize, pc: u32) -> Result<u16, Error> {
    if *i + 2 > code.len() {
        return Err(truncated(method, pc));
    }
    let value = BigEndian::read_u16(&code[*i..]);
    *i += 2;
    Ok(value)
}

fn operand_i16(method: &str, code: &[u8], i: &mut usize, pc: u32) -> Result<i16, Error> {
    if *i + 2 > code.len() {
        return Err(truncated(method, pc));
    }
    let value = BigEndian::read_i16(&code[*i..]);
    *i += 2;
    Ok(value)
}

fn truncated(method: &str, pc: u32) -> Error {
    Error::malformed(method, format!("truncated operand at pc {}", pc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::Constant;

    fn pool_with_integer(value: i32) -> ConstantPool {
        let mut pool = ConstantPool::new();
        pool.push(Constant::Integer(value));
        pool
    }

    #[test]
    fn decodes_operand_widths() {
        // iconst_1; istore 1; iload 1; ldc #1; iadd; ireturn
        let code = [0x04, 0x36, 0x01, 0x15, 0x01, 0x12, 0x01, 0x60, 0xac];
        let pool = pool_with_integer(7);
        let tuples = decode_tuples("m", &code, &pool).unwrap();
        let pcs: Vec<u32> = tuples.iter().map(|t| t.pc).collect();
        assert_eq!(pcs, vec![0, 1, 3, 5, 7, 8]);
        assert_eq!(tuples[3].operand, Operand::Constant(7));
    }

    #[test]
    fn branch_displacement_is_signed_and_pc_relative() {
        // pc 0: goto +5 -> 5; pc 3: nothing else... use: iconst_0 at 3, 4; goto -4 at 5
        let code = [0xa7, 0x00, 0x05, 0x03, 0x03, 0xa7, 0xff, 0xfc];
        let pool = ConstantPool::new();
        let tuples = decode_tuples("m", &code, &pool).unwrap();
        assert_eq!(tuples[0].branch_target(), Some(5));
        assert_eq!(tuples[3].branch_target(), Some(1));
    }

    #[test]
    fn rejects_unknown_opcode() {
        let pool = ConstantPool::new();
        let err = decode_tuples("m", &[0xfe], &pool).unwrap_err();
        assert!(matches!(err, Error::MalformedBytecode { .. }));
    }

    #[test]
    fn rejects_truncated_operand() {
        let pool = ConstantPool::new();
        let err = decode_tuples("m", &[0x15], &pool).unwrap_err();
        assert!(matches!(err, Error::MalformedBytecode { .. }));
    }

    #[test]
    fn rejects_ldc_of_non_integer() {
        let mut pool = ConstantPool::new();
        pool.push(Constant::Utf8("no".to_owned()));
        let err = decode_tuples("m", &[0x12, 0x01], &pool).unwrap_err();
        assert!(matches!(err, Error::MalformedBytecode { .. }));
    }
}
