//! Method records and their code bodies (§3 "Method record").

use crate::classfile::{AccessFlags, ConstantPool, ExceptionTableEntry, MethodInfo, StackMapFrameEntry};
use crate::error::{JvmError, LinkageError};
use crate::keys::{ClassId, MethodDescriptorId, Symbol};

/// A resolved exception-table entry: `catch_type` has already been turned into the caught
/// class's name (`None` for a `finally` block, whose raw `catch_type` index is zero).
#[derive(Debug, Clone)]
pub struct CaughtException {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: Option<String>,
}

/// The body of a non-native, non-abstract method: raw bytecode plus the tables the bytecode
/// decoder and the garbage collector's root walk both need.
///
/// Unlike a JIT, this crate never executes `code`; it is retained so the bytecode decoder
/// (§4.2) can be driven over it and so `stack_map_table` is actually consumed by root-gathering
/// rather than parsed and discarded.
#[derive(Debug, Clone)]
pub struct CodeBody {
    pub code: Box<[u8]>,
    pub max_stack: u16,
    pub max_locals: u16,
    pub exception_table: Vec<CaughtException>,
    pub stack_map_table: Vec<StackMapFrameEntry>,
    pub line_number_table: Vec<(u16, u16)>,
}

impl CodeBody {
    fn from_code_attribute(
        attr: crate::classfile::CodeAttribute,
        constant_pool: &ConstantPool,
    ) -> Result<Self, JvmError> {
        let exception_table = attr
            .exception_table
            .into_iter()
            .map(|e: ExceptionTableEntry| {
                let catch_type = if e.catch_type == 0 {
                    None
                } else {
                    Some(constant_pool.class_name(e.catch_type)?.to_string())
                };
                Ok(CaughtException {
                    start_pc: e.start_pc,
                    end_pc: e.end_pc,
                    handler_pc: e.handler_pc,
                    catch_type,
                })
            })
            .collect::<Result<Vec<_>, JvmError>>()?;
        Ok(CodeBody {
            code: attr.code.into_boxed_slice(),
            max_stack: attr.max_stack,
            max_locals: attr.max_locals,
            exception_table,
            stack_map_table: attr.stack_map_table,
            line_number_table: attr.line_number_table,
        })
    }

    /// Line number for the handler/instruction at or before `bytecode_offset`, if any.
    pub fn line_number_at(&self, bytecode_offset: u16) -> Option<u16> {
        self.line_number_table
            .iter()
            .filter(|(start_pc, _)| *start_pc <= bytecode_offset)
            .max_by_key(|(start_pc, _)| *start_pc)
            .map(|(_, line)| *line)
    }
}

/// How a method is actually realized. Abstract methods and interface methods without a default
/// body carry no code at all; native methods are implemented outside this crate (§1 scope).
#[derive(Debug, Clone)]
pub enum MethodBody {
    Concrete(CodeBody),
    Native,
    Abstract,
}

/// Subset of `AccessFlags` relevant to method dispatch and resolution, kept as a narrow copy
/// so callers don't have to reach back into the class-file representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodFlags {
    pub is_static: bool,
    pub is_final: bool,
    pub is_native: bool,
    pub is_abstract: bool,
    pub is_private: bool,
    pub is_public: bool,
    pub is_protected: bool,
}

impl From<AccessFlags> for MethodFlags {
    fn from(flags: AccessFlags) -> Self {
        MethodFlags {
            is_static: flags.is_static(),
            is_final: flags.is_final(),
            is_native: flags.has(AccessFlags::NATIVE),
            is_abstract: flags.has(AccessFlags::ABSTRACT),
            is_private: flags.has(AccessFlags::PRIVATE),
            is_public: flags.has(AccessFlags::PUBLIC),
            is_protected: flags.has(AccessFlags::PROTECTED),
        }
    }
}

/// A method record (§3). `name`/`desc` are interned so `MethodKey` lookups stay cheap;
/// `descriptor_id` indexes the parsed `MethodDescriptor` in the class-object store's
/// method-descriptor table.
#[derive(Debug, Clone)]
pub struct Method {
    pub class_id: ClassId,
    pub name: Symbol,
    pub desc: Symbol,
    pub descriptor_id: MethodDescriptorId,
    pub flags: MethodFlags,
    pub body: MethodBody,
    /// `None` for methods that never occupy a dispatch slot (statics, `<init>`, `<clinit>`,
    /// private instance methods).
    pub vtable_slot: Option<u16>,
}

impl Method {
    pub fn new(
        info: &MethodInfo,
        class_id: ClassId,
        descriptor_id: MethodDescriptorId,
        name: Symbol,
        desc: Symbol,
        constant_pool: &ConstantPool,
    ) -> Result<Self, JvmError> {
        let flags = MethodFlags::from(info.access_flags);
        let body = match (&info.code, flags.is_native, flags.is_abstract) {
            (Some(_), true, _) | (Some(_), _, true) => {
                return Err(LinkageError::AbstractMethodWithCode.into());
            }
            (Some(attr), false, false) => {
                MethodBody::Concrete(CodeBody::from_code_attribute(attr.clone(), constant_pool)?)
            }
            (None, true, _) => MethodBody::Native,
            (None, false, true) => MethodBody::Abstract,
            (None, false, false) => return Err(LinkageError::MissingCodeAttribute.into()),
        };
        Ok(Method { class_id, name, desc, descriptor_id, flags, body, vtable_slot: None })
    }

    pub fn is_instance_initializer(&self, interner: &lasso::ThreadedRodeo) -> bool {
        interner.resolve(&self.name) == "<init>"
    }

    pub fn is_class_initializer(&self, interner: &lasso::ThreadedRodeo) -> bool {
        interner.resolve(&self.name) == "<clinit>"
    }

    pub fn code(&self) -> Option<&CodeBody> {
        match &self.body {
            MethodBody::Concrete(body) => Some(body),
            _ => None,
        }
    }

    /// Whether this method occupies a dynamic-dispatch slot: never true for statics,
    /// constructors, `<clinit>` or private instance methods (§4.3 step 4).
    pub fn participates_in_dispatch(&self, interner: &lasso::ThreadedRodeo) -> bool {
        !self.flags.is_static
            && !self.flags.is_private
            && !self.is_instance_initializer(interner)
            && !self.is_class_initializer(interner)
    }
}
