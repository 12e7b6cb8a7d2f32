//! The parsed class-file view consumed by the compiler.
//!
//! Only the slice of the class-file format the source language's front end
//! actually produces is modelled: a constant pool holding integers and
//! static method references, and per-method code attributes. The
//! [`reader`] submodule parses this view out of a `.class` file on disk.

mod descriptors;
pub mod reader;

pub use descriptors::{BadDescriptor, BaseType, Descriptor, MethodDescriptor};

use bitflags::bitflags;

/// Name and raw descriptor of each of the runtime-provided IO methods.
///
/// These must be present in the constant pool of any program using them but
/// are never compiled; calls to them lower to dedicated read/write
/// instructions instead of a full call sequence.
pub const IO_METHODS: [(&str, &str); 3] = [("read", "()I"), ("write", "(I)V"), ("write", "(Z)V")];

/// Returns true if `name`/`descriptor` names one of the runtime IO methods.
pub fn is_io_method(name: &str, descriptor: &str) -> bool {
    IO_METHODS
        .iter()
        .any(|(n, d)| *n == name && *d == descriptor)
}

bitflags! {
    /// Method access flags. The front end only emits public static methods,
    /// but the view keeps the raw flags around.
    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
    }
}

/// One entry of the constant pool.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Constant {
    Utf8(String),
    Integer(i32),
    Class { name_index: u16 },
    MethodRef { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
}

/// The constant pool, addressable by 1-based index.
#[derive(Clone, Default, Debug)]
pub struct ConstantPool {
    entries: Vec<Option<Constant>>,
}

impl ConstantPool {
    pub fn new() -> ConstantPool {
        ConstantPool::default()
    }

    /// Appends an entry and returns its 1-based index.
    pub fn push(&mut self, constant: Constant) -> u16 {
        self.entries.push(Some(constant));
        self.entries.len() as u16
    }

    pub fn get(&self, index: u16) -> Option<&Constant> {
        if index == 0 {
            return None;
        }
        self.entries.get(index as usize - 1)?.as_ref()
    }

    /// The integer literal at `index`.
    pub fn integer(&self, index: u16) -> Option<i32> {
        match self.get(index)? {
            Constant::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn utf8(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            Constant::Utf8(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Resolves a `MethodRef` at `index` into its (name, descriptor) pair.
    pub fn method_ref(&self, index: u16) -> Option<(&str, &str)> {
        let (name_index, descriptor_index) = match self.get(index)? {
            Constant::MethodRef {
                name_and_type_index,
                ..
            } => match self.get(*name_and_type_index)? {
                Constant::NameAndType {
                    name_index,
                    descriptor_index,
                } => (*name_index, *descriptor_index),
                _ => return None,
            },
            _ => return None,
        };
        Some((self.utf8(name_index)?, self.utf8(descriptor_index)?))
    }
}

/// One method of the input class: name, descriptor, and its code attribute.
#[derive(Clone, Debug)]
pub struct MethodInfo {
    pub access_flags: MethodAccessFlags,
    pub name: String,
    pub descriptor: String,
    /// Declared number of local-variable slots.
    pub max_locals: u16,
    /// Raw bytecode of the method body.
    pub code: Vec<u8>,
}

/// The parsed class-file view: a constant pool plus the method table.
#[derive(Clone, Default, Debug)]
pub struct ClassFile {
    pub constant_pool: ConstantPool,
    pub methods: Vec<MethodInfo>,
}
