use crate::classfile::ClassFileError;
use crate::descriptor::DescriptorError;
use crate::keys::{ClassId, MethodKey};
use std::error::Error;
use std::fmt::{self, Display};

/// A failure surfaced by one of the three core subsystems (class loading, resolution, GC) or
/// by the class-file/descriptor/bytecode parsers that feed them.
///
/// Per the error-handling policy: parse errors, resolution failures, OOM and invariant
/// violations all terminate the operation they arose in; none are recovered below the
/// boundary that constructed the `Vm`. Unlike the source this was modeled on, "abort" here
/// means propagating an `Err` to that boundary rather than calling `std::process::abort`.
#[derive(Debug)]
pub enum JvmError {
    Descriptor(DescriptorError),
    Bytecode(BytecodeError),
    ClassFile(ClassFileError),
    ClassNotFound(String),
    Linkage(LinkageError),
    OutOfMemory,
    InvariantViolation(&'static str),
    MethodNotFound(MethodKey, ClassId),
    Io(std::io::Error),
}

impl From<DescriptorError> for JvmError {
    fn from(value: DescriptorError) -> Self {
        JvmError::Descriptor(value)
    }
}

impl From<BytecodeError> for JvmError {
    fn from(value: BytecodeError) -> Self {
        JvmError::Bytecode(value)
    }
}

impl From<ClassFileError> for JvmError {
    fn from(value: ClassFileError) -> Self {
        JvmError::ClassFile(value)
    }
}

impl From<LinkageError> for JvmError {
    fn from(value: LinkageError) -> Self {
        JvmError::Linkage(value)
    }
}

impl From<std::io::Error> for JvmError {
    fn from(value: std::io::Error) -> Self {
        JvmError::Io(value)
    }
}

impl Display for JvmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for JvmError {}

/// Failures raised while decoding a raw method body (§4.2). Iteration terminates on the first
/// one; there is no recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BytecodeError {
    UnknownOpcode(u8),
    TruncatedOperand { offset: usize },
    NegativePairCount { offset: usize },
    LowGreaterThanHigh { offset: usize },
    ZeroInvokeInterfaceCount { offset: usize },
    NonZeroPadding { offset: usize },
}

/// Failures raised during class linking (§4.3 step 3-7): anything that makes the class graph
/// inconsistent with the invariants in §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkageError {
    DuplicatedStackMapTable,
    MissingCodeAttribute,
    MissingSuperclass,
    AbstractMethodWithCode,
    FieldOffsetMismatch { field: &'static str, expected: usize, actual: usize },
    /// A `static final String` field's `ConstantValue` (JVMS §4.7.2): legal input, but
    /// interning it needs heap access the class loader doesn't have at link time.
    UnresolvedStringConstant,
}

impl Display for LinkageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for LinkageError {}
