//! Shared helpers: a tiny bytecode assembler with labels and a class-file
//! view builder, so tests can state programs instead of byte soup.

#![allow(dead_code)]

use byteorder::{BigEndian, ByteOrder};
use class2reg::classfile::{ClassFile, Constant, ConstantPool, MethodAccessFlags, MethodInfo};
use std::collections::HashMap;

pub struct ClassBuilder {
    pool: ConstantPool,
    methods: Vec<MethodInfo>,
}

impl ClassBuilder {
    pub fn new() -> ClassBuilder {
        ClassBuilder {
            pool: ConstantPool::new(),
            methods: Vec::new(),
        }
    }

    /// Interns an integer constant, returning its pool index (for `ldc`).
    pub fn integer(&mut self, value: i32) -> u16 {
        self.pool.push(Constant::Integer(value))
    }

    /// Interns a static method reference, returning its pool index (for
    /// `invokestatic`).
    pub fn method_ref(&mut self, name: &str, descriptor: &str) -> u16 {
        let n = self.pool.push(Constant::Utf8(name.to_owned()));
        let d = self.pool.push(Constant::Utf8(descriptor.to_owned()));
        let nat = self.pool.push(Constant::NameAndType {
            name_index: n,
            descriptor_index: d,
        });
        let class = self.pool.push(Constant::Class { name_index: n });
        self.pool.push(Constant::MethodRef {
            class_index: class,
            name_and_type_index: nat,
        })
    }

    pub fn add_method(&mut self, name: &str, descriptor: &str, max_locals: u16, code: Vec<u8>) {
        self.methods.push(MethodInfo {
            access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            max_locals,
            code,
        });
    }

    pub fn build(self) -> ClassFile {
        ClassFile {
            constant_pool: self.pool,
            methods: self.methods,
        }
    }
}

/// Assembles one method body. Branch targets are symbolic labels patched
/// into signed pc-relative displacements at `finish`.
pub struct Asm {
    code: Vec<u8>,
    labels: HashMap<String, u32>,
    fixups: Vec<Fixup>,
}

struct Fixup {
    operand_at: usize,
    branch_pc: u32,
    label: String,
}

impl Asm {
    pub fn new() -> Asm {
        Asm {
            code: Vec::new(),
            labels: HashMap::new(),
            fixups: Vec::new(),
        }
    }

    pub fn label(&mut self, name: &str) -> &mut Asm {
        self.labels.insert(name.to_owned(), self.code.len() as u32);
        self
    }

    pub fn iconst_0(&mut self) -> &mut Asm {
        self.byte(0x03)
    }

    pub fn iconst_1(&mut self) -> &mut Asm {
        self.byte(0x04)
    }

    pub fn ldc(&mut self, pool_index: u16) -> &mut Asm {
        self.byte(0x12).byte(pool_index as u8)
    }

    pub fn iload(&mut self, index: u8) -> &mut Asm {
        self.byte(0x15).byte(index)
    }

    pub fn istore(&mut self, index: u8) -> &mut Asm {
        self.byte(0x36).byte(index)
    }

    pub fn dup(&mut self) -> &mut Asm {
        self.byte(0x59)
    }

    pub fn pop(&mut self) -> &mut Asm {
        self.byte(0x57)
    }

    pub fn iadd(&mut self) -> &mut Asm {
        self.byte(0x60)
    }

    pub fn isub(&mut self) -> &mut Asm {
        self.byte(0x64)
    }

    pub fn imul(&mut self) -> &mut Asm {
        self.byte(0x68)
    }

    pub fn idiv(&mut self) -> &mut Asm {
        self.byte(0x6c)
    }

    pub fn irem(&mut self) -> &mut Asm {
        self.byte(0x70)
    }

    pub fn ineg(&mut self) -> &mut Asm {
        self.byte(0x74)
    }

    pub fn goto(&mut self, label: &str) -> &mut Asm {
        self.branch(0xa7, label)
    }

    pub fn ifeq(&mut self, label: &str) -> &mut Asm {
        self.branch(0x99, label)
    }

    pub fn ifne(&mut self, label: &str) -> &mut Asm {
        self.branch(0x9a, label)
    }

    pub fn if_icmpeq(&mut self, label: &str) -> &mut Asm {
        self.branch(0x9f, label)
    }

    pub fn if_icmpne(&mut self, label: &str) -> &mut Asm {
        self.branch(0xa0, label)
    }

    pub fn if_icmplt(&mut self, label: &str) -> &mut Asm {
        self.branch(0xa1, label)
    }

    pub fn if_icmpge(&mut self, label: &str) -> &mut Asm {
        self.branch(0xa2, label)
    }

    pub fn if_icmpgt(&mut self, label: &str) -> &mut Asm {
        self.branch(0xa3, label)
    }

    pub fn if_icmple(&mut self, label: &str) -> &mut Asm {
        self.branch(0xa4, label)
    }

    pub fn invokestatic(&mut self, pool_index: u16) -> &mut Asm {
        self.byte(0xb8).byte((pool_index >> 8) as u8).byte(pool_index as u8)
    }

    pub fn ireturn(&mut self) -> &mut Asm {
        self.byte(0xac)
    }

    pub fn vreturn(&mut self) -> &mut Asm {
        self.byte(0xb1)
    }

    pub fn finish(mut self) -> Vec<u8> {
        for fixup in &self.fixups {
            let target = *self
                .labels
                .get(&fixup.label)
                .unwrap_or_else(|| panic!("undefined label '{}'", fixup.label));
            let displacement = target as i64 - fixup.branch_pc as i64;
            BigEndian::write_i16(
                &mut self.code[fixup.operand_at..],
                i16::try_from(displacement).expect("branch displacement fits in i16"),
            );
        }
        self.code
    }

    fn byte(&mut self, byte: u8) -> &mut Asm {
        self.code.push(byte);
        self
    }

    fn branch(&mut self, opcode: u8, label: &str) -> &mut Asm {
        let branch_pc = self.code.len() as u32;
        self.code.push(opcode);
        self.fixups.push(Fixup {
            operand_at: self.code.len(),
            branch_pc,
            label: label.to_owned(),
        });
        self.code.extend_from_slice(&[0, 0]);
        self
    }
}

/// Adds `read()I` and `write(I)V` references, returning their pool indices.
pub fn io_refs(builder: &mut ClassBuilder) -> (u16, u16) {
    let read = builder.method_ref("read", "()I");
    let write = builder.method_ref("write", "(I)V");
    (read, write)
}
