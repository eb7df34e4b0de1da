//! Minimal class-file parser: constant pool, fields, methods and the handful of attributes the
//! class loader and resolution engine need (§4.3, §6). Scoped to JVMS §4.4 entries utf8,
//! integer, float, long, double, string, class, name-and-type, field-ref, method-ref and
//! interface-method-ref; method-handle, method-type and invokedynamic entries are rejected.

use byteorder::{BigEndian, ReadBytesExt};
use std::fmt;
use std::io::{Cursor, Read};

pub const MAGIC: u32 = 0xCAFE_BABE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassFileError {
    BadMagic(u32),
    UnsupportedVersion { major: u16 },
    UnexpectedEof,
    UnknownConstantTag(u8),
    ConstantPoolIndexOutOfRange(u16),
    ConstantPoolTypeMismatch { index: u16, expected: &'static str },
    UnsupportedConstantKind { index: u16, tag: u8 },
    InvalidUtf8 { index: u16 },
    MalformedAttribute(&'static str),
    CodeTooLarge(u32),
}

impl fmt::Display for ClassFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for ClassFileError {}

impl From<std::io::Error> for ClassFileError {
    fn from(_: std::io::Error) -> Self {
        ClassFileError::UnexpectedEof
    }
}

/// A single `constant_pool` entry (JVMS §4.4). `Long` and `Double` occupy two slots in the
/// surrounding pool, mirrored here as a `Padding` placeholder at the following index.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantPoolEntry {
    Padding,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name_index: u16 },
    String { utf8_index: u16 },
    FieldRef { class_index: u16, name_and_type_index: u16 },
    MethodRef { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodRef { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
}

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELDREF: u8 = 9;
const TAG_METHODREF: u8 = 10;
const TAG_INTERFACE_METHODREF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;

/// The `constant_pool` table, 1-indexed per JVMS §4.1 (index 0 is never valid).
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    entries: Vec<ConstantPoolEntry>,
}

impl ConstantPool {
    /// Builds a pool directly from its entries, index 0 included as `Padding`. Used by tests
    /// and by callers constructing synthetic class files in memory.
    pub fn from_entries(entries: Vec<ConstantPoolEntry>) -> Self {
        ConstantPool { entries }
    }

    fn get(&self, index: u16) -> Result<&ConstantPoolEntry, ClassFileError> {
        self.entries
            .get(index as usize)
            .filter(|e| !matches!(e, ConstantPoolEntry::Padding) || index == 0)
            .ok_or(ClassFileError::ConstantPoolIndexOutOfRange(index))
    }

    pub fn utf8(&self, index: u16) -> Result<&str, ClassFileError> {
        match self.get(index)? {
            ConstantPoolEntry::Utf8(s) => Ok(s),
            _ => Err(ClassFileError::ConstantPoolTypeMismatch { index, expected: "Utf8" }),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&str, ClassFileError> {
        match self.get(index)? {
            ConstantPoolEntry::Class { name_index } => self.utf8(*name_index),
            _ => Err(ClassFileError::ConstantPoolTypeMismatch { index, expected: "Class" }),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str), ClassFileError> {
        match self.get(index)? {
            ConstantPoolEntry::NameAndType { name_index, descriptor_index } => {
                Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?))
            }
            _ => Err(ClassFileError::ConstantPoolTypeMismatch { index, expected: "NameAndType" }),
        }
    }

    pub fn entry(&self, index: u16) -> Result<&ConstantPoolEntry, ClassFileError> {
        self.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AccessFlags(pub u16);

impl AccessFlags {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const PROTECTED: u16 = 0x0004;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const SUPER: u16 = 0x0020;
    pub const SYNCHRONIZED: u16 = 0x0020;
    pub const VOLATILE: u16 = 0x0040;
    pub const BRIDGE: u16 = 0x0040;
    pub const TRANSIENT: u16 = 0x0080;
    pub const VARARGS: u16 = 0x0080;
    pub const NATIVE: u16 = 0x0100;
    pub const INTERFACE: u16 = 0x0200;
    pub const ABSTRACT: u16 = 0x0400;
    pub const STRICT: u16 = 0x0800;
    pub const SYNTHETIC: u16 = 0x1000;
    pub const ANNOTATION: u16 = 0x2000;
    pub const ENUM: u16 = 0x4000;

    pub fn has(self, mask: u16) -> bool {
        self.0 & mask != 0
    }

    pub fn is_public(self) -> bool {
        self.has(Self::PUBLIC)
    }
    pub fn is_private(self) -> bool {
        self.has(Self::PRIVATE)
    }
    pub fn is_protected(self) -> bool {
        self.has(Self::PROTECTED)
    }
    pub fn is_static(self) -> bool {
        self.has(Self::STATIC)
    }
    pub fn is_final(self) -> bool {
        self.has(Self::FINAL)
    }
    pub fn is_interface(self) -> bool {
        self.has(Self::INTERFACE)
    }
    pub fn is_abstract(self) -> bool {
        self.has(Self::ABSTRACT)
    }
    pub fn is_native(self) -> bool {
        self.has(Self::NATIVE)
    }
    pub fn is_synthetic(self) -> bool {
        self.has(Self::SYNTHETIC)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

/// A single entry of the `StackMapTable` attribute (JVMS §4.7.4), retained in its raw
/// frame-type/offset-delta form: the garbage collector's root walk only needs offsets and
/// verification-type tags, never the resolved frame state a verifier would reconstruct.
#[derive(Debug, Clone)]
pub struct StackMapFrameEntry {
    pub frame_type: u8,
    pub offset_delta: u16,
    pub locals: Vec<VerificationType>,
    pub stack: Vec<VerificationType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    Object { class_index: u16 },
    Uninitialized { offset: u16 },
}

impl VerificationType {
    /// Whether a local or operand-stack slot of this kind holds a heap reference the garbage
    /// collector must trace.
    pub fn is_reference(self) -> bool {
        matches!(
            self,
            VerificationType::Null
                | VerificationType::UninitializedThis
                | VerificationType::Object { .. }
                | VerificationType::Uninitialized { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub stack_map_table: Vec<StackMapFrameEntry>,
    pub line_number_table: Vec<(u16, u16)>,
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub access_flags: AccessFlags,
    pub name: String,
    pub descriptor: String,
    pub constant_value_index: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub access_flags: AccessFlags,
    pub name: String,
    pub descriptor: String,
    pub code: Option<CodeAttribute>,
}

#[derive(Debug, Clone)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: AccessFlags,
    pub this_class: String,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
}

/// Earliest major version this parser accepts (Java SE 1.1, the oldest format with the modern
/// constant-pool tag set).
const MIN_MAJOR_VERSION: u16 = 45;
/// Latest major version exercised by the corpus this loader targets.
const MAX_MAJOR_VERSION: u16 = 68;

struct Reader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { cursor: Cursor::new(bytes) }
    }

    fn u1(&mut self) -> Result<u8, ClassFileError> {
        Ok(self.cursor.read_u8()?)
    }

    fn u2(&mut self) -> Result<u16, ClassFileError> {
        Ok(self.cursor.read_u16::<BigEndian>()?)
    }

    fn u4(&mut self) -> Result<u32, ClassFileError> {
        Ok(self.cursor.read_u32::<BigEndian>()?)
    }

    fn i4(&mut self) -> Result<i32, ClassFileError> {
        Ok(self.cursor.read_i32::<BigEndian>()?)
    }

    fn f4(&mut self) -> Result<f32, ClassFileError> {
        Ok(self.cursor.read_f32::<BigEndian>()?)
    }

    fn i8(&mut self) -> Result<i64, ClassFileError> {
        Ok(self.cursor.read_i64::<BigEndian>()?)
    }

    fn f8(&mut self) -> Result<f64, ClassFileError> {
        Ok(self.cursor.read_f64::<BigEndian>()?)
    }

    fn bytes(&mut self, len: usize) -> Result<Vec<u8>, ClassFileError> {
        let mut buf = vec![0u8; len];
        self.cursor.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn skip(&mut self, len: u32) -> Result<(), ClassFileError> {
        self.bytes(len as usize)?;
        Ok(())
    }
}

pub fn parse(bytes: &[u8]) -> Result<ClassFile, ClassFileError> {
    let mut r = Reader::new(bytes);

    let magic = r.u4()?;
    if magic != MAGIC {
        return Err(ClassFileError::BadMagic(magic));
    }
    let minor_version = r.u2()?;
    let major_version = r.u2()?;
    if !(MIN_MAJOR_VERSION..=MAX_MAJOR_VERSION).contains(&major_version) {
        return Err(ClassFileError::UnsupportedVersion { major: major_version });
    }

    let constant_pool = parse_constant_pool(&mut r)?;
    let access_flags = AccessFlags(r.u2()?);
    let this_class_index = r.u2()?;
    let this_class = constant_pool.class_name(this_class_index)?.to_string();
    let super_class_index = r.u2()?;
    let super_class = if super_class_index == 0 {
        None
    } else {
        Some(constant_pool.class_name(super_class_index)?.to_string())
    };

    let interfaces_count = r.u2()?;
    let mut interfaces = Vec::with_capacity(interfaces_count as usize);
    for _ in 0..interfaces_count {
        let index = r.u2()?;
        interfaces.push(constant_pool.class_name(index)?.to_string());
    }

    let fields_count = r.u2()?;
    let mut fields = Vec::with_capacity(fields_count as usize);
    for _ in 0..fields_count {
        fields.push(parse_field(&mut r, &constant_pool)?);
    }

    let methods_count = r.u2()?;
    let mut methods = Vec::with_capacity(methods_count as usize);
    for _ in 0..methods_count {
        methods.push(parse_method(&mut r, &constant_pool)?);
    }

    // Top-level attributes (SourceFile, InnerClasses, ...) carry nothing the class loader or
    // resolution engine needs; skip them wholesale.
    let class_attrs_count = r.u2()?;
    for _ in 0..class_attrs_count {
        skip_attribute(&mut r)?;
    }

    Ok(ClassFile {
        minor_version,
        major_version,
        constant_pool,
        access_flags,
        this_class,
        super_class,
        interfaces,
        fields,
        methods,
    })
}

fn parse_constant_pool(r: &mut Reader) -> Result<ConstantPool, ClassFileError> {
    let count = r.u2()?;
    let mut entries = Vec::with_capacity(count as usize);
    entries.push(ConstantPoolEntry::Padding); // index 0 is unused
    let mut index = 1u16;
    while index < count {
        let tag = r.u1()?;
        let entry = match tag {
            TAG_UTF8 => {
                let len = r.u2()?;
                let raw = r.bytes(len as usize)?;
                let text = String::from_utf8(raw)
                    .map_err(|_| ClassFileError::InvalidUtf8 { index })?;
                ConstantPoolEntry::Utf8(text)
            }
            TAG_INTEGER => ConstantPoolEntry::Integer(r.i4()?),
            TAG_FLOAT => ConstantPoolEntry::Float(r.f4()?),
            TAG_LONG => ConstantPoolEntry::Long(r.i8()?),
            TAG_DOUBLE => ConstantPoolEntry::Double(r.f8()?),
            TAG_CLASS => ConstantPoolEntry::Class { name_index: r.u2()? },
            TAG_STRING => ConstantPoolEntry::String { utf8_index: r.u2()? },
            TAG_FIELDREF => ConstantPoolEntry::FieldRef {
                class_index: r.u2()?,
                name_and_type_index: r.u2()?,
            },
            TAG_METHODREF => ConstantPoolEntry::MethodRef {
                class_index: r.u2()?,
                name_and_type_index: r.u2()?,
            },
            TAG_INTERFACE_METHODREF => ConstantPoolEntry::InterfaceMethodRef {
                class_index: r.u2()?,
                name_and_type_index: r.u2()?,
            },
            TAG_NAME_AND_TYPE => ConstantPoolEntry::NameAndType {
                name_index: r.u2()?,
                descriptor_index: r.u2()?,
            },
            other => return Err(ClassFileError::UnsupportedConstantKind { index, tag: other }),
        };
        let occupies_two_slots = matches!(entry, ConstantPoolEntry::Long(_) | ConstantPoolEntry::Double(_));
        entries.push(entry);
        index += 1;
        if occupies_two_slots {
            entries.push(ConstantPoolEntry::Padding);
            index += 1;
        }
    }
    Ok(ConstantPool { entries })
}

fn parse_field(r: &mut Reader, cp: &ConstantPool) -> Result<FieldInfo, ClassFileError> {
    let access_flags = AccessFlags(r.u2()?);
    let name = cp.utf8(r.u2()?)?.to_string();
    let descriptor = cp.utf8(r.u2()?)?.to_string();
    let attrs_count = r.u2()?;
    let mut constant_value_index = None;
    for _ in 0..attrs_count {
        let name_index = r.u2()?;
        let length = r.u4()?;
        if cp.utf8(name_index)? == "ConstantValue" {
            constant_value_index = Some(r.u2()?);
        } else {
            r.skip(length)?;
        }
    }
    Ok(FieldInfo { access_flags, name, descriptor, constant_value_index })
}

fn parse_method(r: &mut Reader, cp: &ConstantPool) -> Result<MethodInfo, ClassFileError> {
    let access_flags = AccessFlags(r.u2()?);
    let name = cp.utf8(r.u2()?)?.to_string();
    let descriptor = cp.utf8(r.u2()?)?.to_string();
    let attrs_count = r.u2()?;
    let mut code = None;
    for _ in 0..attrs_count {
        let name_index = r.u2()?;
        let length = r.u4()?;
        if cp.utf8(name_index)? == "Code" {
            code = Some(parse_code(r, cp)?);
        } else {
            r.skip(length)?;
        }
    }
    Ok(MethodInfo { access_flags, name, descriptor, code })
}

fn parse_code(r: &mut Reader, cp: &ConstantPool) -> Result<CodeAttribute, ClassFileError> {
    let max_stack = r.u2()?;
    let max_locals = r.u2()?;
    let code_length = r.u4()?;
    if code_length == 0 || code_length >= 65536 {
        return Err(ClassFileError::CodeTooLarge(code_length));
    }
    let code = r.bytes(code_length as usize)?;

    let exception_table_len = r.u2()?;
    let mut exception_table = Vec::with_capacity(exception_table_len as usize);
    for _ in 0..exception_table_len {
        exception_table.push(ExceptionTableEntry {
            start_pc: r.u2()?,
            end_pc: r.u2()?,
            handler_pc: r.u2()?,
            catch_type: r.u2()?,
        });
    }

    let mut stack_map_table = Vec::new();
    let mut line_number_table = Vec::new();
    let code_attrs_count = r.u2()?;
    for _ in 0..code_attrs_count {
        let name_index = r.u2()?;
        let length = r.u4()?;
        match cp.utf8(name_index)? {
            "StackMapTable" => stack_map_table = parse_stack_map_table(r)?,
            "LineNumberTable" => {
                let n = r.u2()?;
                for _ in 0..n {
                    let start_pc = r.u2()?;
                    let line_number = r.u2()?;
                    line_number_table.push((start_pc, line_number));
                }
            }
            _ => r.skip(length)?,
        }
    }

    Ok(CodeAttribute {
        max_stack,
        max_locals,
        code,
        exception_table,
        stack_map_table,
        line_number_table,
    })
}

fn parse_stack_map_table(r: &mut Reader) -> Result<Vec<StackMapFrameEntry>, ClassFileError> {
    let count = r.u2()?;
    let mut frames = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let frame_type = r.u1()?;
        let entry = match frame_type {
            0..=63 => StackMapFrameEntry {
                frame_type,
                offset_delta: frame_type as u16,
                locals: Vec::new(),
                stack: Vec::new(),
            },
            64..=127 => {
                let stack = vec![parse_verification_type(r)?];
                StackMapFrameEntry {
                    frame_type,
                    offset_delta: (frame_type - 64) as u16,
                    locals: Vec::new(),
                    stack,
                }
            }
            247 => {
                let offset_delta = r.u2()?;
                let stack = vec![parse_verification_type(r)?];
                StackMapFrameEntry { frame_type, offset_delta, locals: Vec::new(), stack }
            }
            248..=251 => StackMapFrameEntry {
                frame_type,
                offset_delta: r.u2()?,
                locals: Vec::new(),
                stack: Vec::new(),
            },
            252..=254 => {
                let offset_delta = r.u2()?;
                let n = frame_type - 251;
                let mut locals = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    locals.push(parse_verification_type(r)?);
                }
                StackMapFrameEntry { frame_type, offset_delta, locals, stack: Vec::new() }
            }
            255 => {
                let offset_delta = r.u2()?;
                let locals_count = r.u2()?;
                let mut locals = Vec::with_capacity(locals_count as usize);
                for _ in 0..locals_count {
                    locals.push(parse_verification_type(r)?);
                }
                let stack_count = r.u2()?;
                let mut stack = Vec::with_capacity(stack_count as usize);
                for _ in 0..stack_count {
                    stack.push(parse_verification_type(r)?);
                }
                StackMapFrameEntry { frame_type, offset_delta, locals, stack }
            }
            _ => return Err(ClassFileError::MalformedAttribute("StackMapTable frame_type")),
        };
        frames.push(entry);
    }
    Ok(frames)
}

fn parse_verification_type(r: &mut Reader) -> Result<VerificationType, ClassFileError> {
    let tag = r.u1()?;
    Ok(match tag {
        0 => VerificationType::Top,
        1 => VerificationType::Integer,
        2 => VerificationType::Float,
        3 => VerificationType::Double,
        4 => VerificationType::Long,
        5 => VerificationType::Null,
        6 => VerificationType::UninitializedThis,
        7 => VerificationType::Object { class_index: r.u2()? },
        8 => VerificationType::Uninitialized { offset: r.u2()? },
        _ => return Err(ClassFileError::MalformedAttribute("verification_type_info tag")),
    })
}

fn skip_attribute(r: &mut Reader) -> Result<(), ClassFileError> {
    let _name_index = r.u2()?;
    let length = r.u4()?;
    r.skip(length)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_class_file() -> Vec<u8> {
        // magic, minor, major
        let mut bytes = vec![0xCAu8, 0xFE, 0xBA, 0xBE, 0x00, 0x00, 0x00, 0x34];
        // constant_pool_count = 5: #1 Utf8("Main"), #2 Class(#1), #3 Utf8("java/lang/Object"),
        // #4 Class(#3)
        bytes.extend_from_slice(&5u16.to_be_bytes());
        bytes.push(TAG_UTF8);
        bytes.extend_from_slice(&4u16.to_be_bytes());
        bytes.extend_from_slice(b"Main");
        bytes.push(TAG_CLASS);
        bytes.extend_from_slice(&1u16.to_be_bytes());
        bytes.push(TAG_UTF8);
        bytes.extend_from_slice(&16u16.to_be_bytes());
        bytes.extend_from_slice(b"java/lang/Object");
        bytes.push(TAG_CLASS);
        bytes.extend_from_slice(&3u16.to_be_bytes());
        // access_flags, this_class, super_class
        bytes.extend_from_slice(&AccessFlags::PUBLIC.to_be_bytes());
        bytes.extend_from_slice(&2u16.to_be_bytes());
        bytes.extend_from_slice(&4u16.to_be_bytes());
        // interfaces_count, fields_count, methods_count, attributes_count
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes
    }

    #[test]
    fn parses_minimal_class() {
        let class = parse(&minimal_class_file()).unwrap();
        assert_eq!(class.this_class, "Main");
        assert_eq!(class.super_class.as_deref(), Some("java/lang/Object"));
        assert!(class.access_flags.is_public());
        assert!(class.fields.is_empty());
        assert!(class.methods.is_empty());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = minimal_class_file();
        bytes[0] = 0x00;
        assert!(matches!(parse(&bytes), Err(ClassFileError::BadMagic(_))));
    }

    #[test]
    fn rejects_unsupported_major_version() {
        let mut bytes = minimal_class_file();
        bytes[6..8].copy_from_slice(&9999u16.to_be_bytes());
        assert!(matches!(
            parse(&bytes),
            Err(ClassFileError::UnsupportedVersion { major: 9999 })
        ));
    }

    #[test]
    fn long_and_double_constants_occupy_two_slots() {
        // constant_pool_count = 3: #1 Long, (#2 unused), nothing else addressable.
        let mut bytes = vec![0xCAu8, 0xFE, 0xBA, 0xBE, 0x00, 0x00, 0x00, 0x34];
        bytes.extend_from_slice(&3u16.to_be_bytes());
        bytes.push(TAG_LONG);
        bytes.extend_from_slice(&42i64.to_be_bytes());
        let mut r = Reader::new(&bytes[10..]);
        let cp = parse_constant_pool(&mut r).unwrap();
        assert_eq!(cp.len(), 3);
        assert!(matches!(cp.entry(1).unwrap(), ConstantPoolEntry::Long(42)));
        assert!(matches!(cp.entry(2).unwrap(), ConstantPoolEntry::Padding));
    }
}
