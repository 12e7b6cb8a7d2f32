//! Minimal `.class` reader producing the [`ClassFile`] view.
//!
//! Only the constant-pool entry kinds the front end emits are understood;
//! anything else is a hard error rather than a skip, since a foreign class
//! file is not something the back end can compile anyway.

use super::{ClassFile, Constant, ConstantPool, MethodAccessFlags, MethodInfo};
use crate::errors::Error;
use byteorder::{BigEndian, ReadBytesExt};
use std::fs;
use std::io::Read;
use std::path::Path;

const MAGIC: u32 = 0xCAFE_BABE;

const CONSTANT_UTF8: u8 = 1;
const CONSTANT_INTEGER: u8 = 3;
const CONSTANT_CLASS: u8 = 7;
const CONSTANT_METHODREF: u8 = 10;
const CONSTANT_NAME_AND_TYPE: u8 = 12;

/// Reads and parses the class file at `path`.
pub fn read_class_file(path: &Path) -> Result<ClassFile, Error> {
    let bytes = fs::read(path)?;
    parse_class_file(&bytes)
}

/// Parses a class file from raw bytes.
pub fn parse_class_file(bytes: &[u8]) -> Result<ClassFile, Error> {
    let mut input = bytes;
    let r = &mut input;

    if read_u32(r)? != MAGIC {
        return Err(bad("not a class file (bad magic number)"));
    }
    let _minor = read_u16(r)?;
    let _major = read_u16(r)?;

    let constant_pool = parse_constant_pool(r)?;

    let _access_flags = read_u16(r)?;
    let _this_class = read_u16(r)?;
    let _super_class = read_u16(r)?;

    let interfaces_count = read_u16(r)?;
    for _ in 0..interfaces_count {
        read_u16(r)?;
    }

    let fields_count = read_u16(r)?;
    for _ in 0..fields_count {
        skip_member(r)?;
    }

    let methods_count = read_u16(r)?;
    let mut methods = Vec::with_capacity(methods_count as usize);
    for _ in 0..methods_count {
        methods.push(parse_method(r, &constant_pool)?);
    }

    // Trailing class attributes are irrelevant to compilation.
    Ok(ClassFile {
        constant_pool,
        methods,
    })
}

fn parse_constant_pool(r: &mut &[u8]) -> Result<ConstantPool, Error> {
    let count = read_u16(r)?;
    let mut pool = ConstantPool::new();
    let mut index = 1;
    while index < count {
        let tag = read_u8(r)?;
        let constant = match tag {
            CONSTANT_UTF8 => {
                let len = read_u16(r)? as usize;
                let mut buf = vec![0u8; len];
                r.read_exact(&mut buf).map_err(|_| truncated())?;
                let s = String::from_utf8(buf)
                    .map_err(|_| bad("constant pool holds invalid UTF-8"))?;
                Constant::Utf8(s)
            }
            CONSTANT_INTEGER => Constant::Integer(read_u32(r)? as i32),
            CONSTANT_CLASS => Constant::Class {
                name_index: read_u16(r)?,
            },
            CONSTANT_METHODREF => Constant::MethodRef {
                class_index: read_u16(r)?,
                name_and_type_index: read_u16(r)?,
            },
            CONSTANT_NAME_AND_TYPE => Constant::NameAndType {
                name_index: read_u16(r)?,
                descriptor_index: read_u16(r)?,
            },
            other => {
                return Err(bad(format!("unsupported constant pool tag {}", other)));
            }
        };
        pool.push(constant);
        index += 1;
    }
    Ok(pool)
}

fn parse_method(r: &mut &[u8], pool: &ConstantPool) -> Result<MethodInfo, Error> {
    let access_flags = MethodAccessFlags::from_bits_truncate(read_u16(r)?);
    let name_index = read_u16(r)?;
    let descriptor_index = read_u16(r)?;

    let name = pool
        .utf8(name_index)
        .ok_or_else(|| bad("method name index does not reference a Utf8 entry"))?
        .to_owned();
    let descriptor = pool
        .utf8(descriptor_index)
        .ok_or_else(|| bad("method descriptor index does not reference a Utf8 entry"))?
        .to_owned();

    let mut max_locals = 0;
    let mut code = Vec::new();
    let attributes_count = read_u16(r)?;
    for _ in 0..attributes_count {
        let attr_name_index = read_u16(r)?;
        let attr_len = read_u32(r)? as usize;
        if pool.utf8(attr_name_index) == Some("Code") {
            let attr = take(r, attr_len)?;
            let mut a = attr;
            let ar = &mut a;
            let _max_stack = read_u16(ar)?;
            max_locals = read_u16(ar)?;
            let code_len = read_u32(ar)? as usize;
            code = take(ar, code_len)?.to_vec();
        } else {
            take(r, attr_len)?;
        }
    }

    Ok(MethodInfo {
        access_flags,
        name,
        descriptor,
        max_locals,
        code,
    })
}

// Fields never matter to the back end; parse just enough to step over one.
fn skip_member(r: &mut &[u8]) -> Result<(), Error> {
    let _access = read_u16(r)?;
    let _name = read_u16(r)?;
    let _descriptor = read_u16(r)?;
    let attributes_count = read_u16(r)?;
    for _ in 0..attributes_count {
        let _attr_name = read_u16(r)?;
        let len = read_u32(r)? as usize;
        take(r, len)?;
    }
    Ok(())
}

fn take<'a>(r: &mut &'a [u8], len: usize) -> Result<&'a [u8], Error> {
    if r.len() < len {
        return Err(truncated());
    }
    let (head, tail) = r.split_at(len);
    *r = tail;
    Ok(head)
}

fn read_u8(r: &mut &[u8]) -> Result<u8, Error> {
    r.read_u8().map_err(|_| truncated())
}

fn read_u16(r: &mut &[u8]) -> Result<u16, Error> {
    r.read_u16::<BigEndian>().map_err(|_| truncated())
}

fn read_u32(r: &mut &[u8]) -> Result<u32, Error> {
    r.read_u32::<BigEndian>().map_err(|_| truncated())
}

fn truncated() -> Error {
    bad("truncated class file")
}

fn bad(detail: impl Into<String>) -> Error {
    Error::malformed("class file", detail)
}
