//! Class-object store types (§3 "Class object"). `JvmClass` is the sum type the class loader
//! and resolution engine actually operate over; `array`/`class`/`field`/`interface`/`method`
//! hold the per-kind detail.

pub mod array;
pub mod class;
pub mod field;
pub mod interface;
pub mod method;

use crate::error::JvmError;
use crate::heap::HeapRef;
use crate::keys::{ClassId, FieldKey, MethodId, MethodKey, Symbol};
use crate::rt::array::{ObjectArrayClass, PrimitiveArrayClass};
use crate::rt::class::InstanceClass;
use crate::rt::field::{StaticField, Value};
use crate::rt::interface::InterfaceClass;
use crate::rt::method::Method;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU8, Ordering};

/// The coarse, 3-state view the resolution engine and any future code generator rely on.
/// `Uninitialized` covers both `ClassState::Loaded` and `ClassState::Linked`; see §3's
/// "Class-object state refinement".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    InProgress,
    Initialized,
}

/// The finer 4-state machine `add()` actually drives, distinguishing "parsed, supertypes
/// resolved" from "v-table/i-table/layout computed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ClassState {
    Loaded = 0,
    Linked = 1,
    Initializing = 2,
    Initialized = 3,
}

impl From<u8> for ClassState {
    fn from(value: u8) -> Self {
        match value {
            0 => ClassState::Loaded,
            1 => ClassState::Linked,
            2 => ClassState::Initializing,
            3 => ClassState::Initialized,
            other => unreachable!("invalid ClassState byte {other}"),
        }
    }
}

impl ClassState {
    pub fn coarse(self) -> InitState {
        match self {
            ClassState::Loaded | ClassState::Linked => InitState::Uninitialized,
            ClassState::Initializing => InitState::InProgress,
            ClassState::Initialized => InitState::Initialized,
        }
    }
}

/// Behavior shared by every class-object kind that actually has instance/static data and a
/// dispatch surface: `Instance` and `Interface`. Primitive and array classes implement only the
/// parts of `JvmClass`'s delegating API that apply to them directly.
pub trait ClassLike {
    fn base(&self) -> &BaseClass;

    fn name(&self) -> Symbol {
        self.base().name
    }

    fn flags(&self) -> crate::classfile::AccessFlags {
        self.base().flags
    }

    fn get_super(&self) -> Option<ClassId> {
        self.base().super_id
    }

    fn get_source_file(&self) -> Option<&str> {
        self.base().source_file.get().and_then(|s| s.as_deref())
    }

    fn get_direct_interfaces(&self) -> &[ClassId] {
        self.base().direct_interfaces.get().map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn get_interfaces(&self) -> &[ClassId] {
        self.base().interfaces.get().map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn get_clinit_method_id(&self) -> Option<crate::keys::MethodId> {
        *self.base().clinit.get().unwrap_or(&None)
    }

    fn has_clinit(&self) -> bool {
        self.get_clinit_method_id().is_some()
    }

    fn get_mirror_ref(&self) -> Option<HeapRef> {
        self.base().mirror_ref.get().copied()
    }

    fn set_mirror_ref(&self, r: HeapRef) {
        let _ = self.base().mirror_ref.set(r);
    }

    fn state(&self) -> ClassState {
        ClassState::from(self.base().state.load(Ordering::Acquire))
    }

    fn is_linked(&self) -> bool {
        self.state() >= ClassState::Linked
    }

    fn set_linked(&self) {
        self.base().state.store(ClassState::Linked as u8, Ordering::Release);
    }

    fn is_initializing(&self) -> bool {
        self.state() == ClassState::Initializing
    }

    fn set_initializing(&self) {
        self.base().state.store(ClassState::Initializing as u8, Ordering::Release);
    }

    fn set_initialized(&self) {
        self.base().state.store(ClassState::Initialized as u8, Ordering::Release);
    }

    fn is_initialized_or_initializing(&self) -> bool {
        matches!(self.state(), ClassState::Initializing | ClassState::Initialized)
    }

    fn get_static_field_value(&self, key: FieldKey) -> Option<Value> {
        self.base().static_fields.get()?.get(&key).map(|f| *f.value.read().unwrap())
    }

    fn set_static_field_value(&self, key: FieldKey, value: Value) -> Result<(), JvmError> {
        let fields = self
            .base()
            .static_fields
            .get()
            .ok_or(JvmError::InvariantViolation("static fields read before linking"))?;
        let field = fields
            .get(&key)
            .ok_or(JvmError::InvariantViolation("unknown static field key"))?;
        *field.value.write().unwrap() = value;
        Ok(())
    }

    fn has_static_field(&self, key: FieldKey) -> bool {
        self.base().static_fields.get().is_some_and(|m| m.contains_key(&key))
    }
}

/// Shared state for `Instance` and `Interface` class objects (§3). Most fields are filled in
/// exactly once, during linking, hence `OnceCell`: after `set_linked()` they are read-only.
#[derive(Debug)]
pub struct BaseClass {
    pub name: Symbol,
    pub flags: crate::classfile::AccessFlags,
    pub super_id: Option<ClassId>,
    pub state: AtomicU8,
    pub mirror_ref: OnceCell<HeapRef>,
    /// All interfaces reachable from this class, flattened DFS order (§4.3 step 7).
    pub interfaces: OnceCell<Vec<ClassId>>,
    /// Interfaces named directly in this class's `interfaces[]` class-file entry.
    pub direct_interfaces: OnceCell<Vec<ClassId>>,
    pub static_fields: OnceCell<std::collections::HashMap<FieldKey, StaticField>>,
    pub clinit: OnceCell<Option<crate::keys::MethodId>>,
    pub source_file: OnceCell<Option<String>>,
}

impl BaseClass {
    pub fn new(name: Symbol, flags: crate::classfile::AccessFlags, super_id: Option<ClassId>) -> Self {
        BaseClass {
            name,
            flags,
            super_id,
            state: AtomicU8::new(ClassState::Loaded as u8),
            mirror_ref: OnceCell::new(),
            interfaces: OnceCell::new(),
            direct_interfaces: OnceCell::new(),
            static_fields: OnceCell::new(),
            clinit: OnceCell::new(),
            source_file: OnceCell::new(),
        }
    }
}

/// A primitive type's class object (§3 "Primitive"): always initialized, carries only a size
/// and a name, never participates in dispatch.
#[derive(Debug)]
pub struct PrimitiveClass {
    pub name: Symbol,
    pub instance_size: usize,
}

/// The sum type the class loader and resolution engine operate over. Every loaded type,
/// regardless of kind, is represented by exactly one `JvmClass` value, pinned for the process
/// lifetime in the class-object store (§3 Lifecycles).
#[derive(Debug)]
pub enum JvmClass {
    Instance(InstanceClass),
    Interface(InterfaceClass),
    Primitive(PrimitiveClass),
    PrimitiveArray(PrimitiveArrayClass),
    InstanceArray(ObjectArrayClass),
}

impl std::fmt::Display for JvmClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JvmClass::Instance(c) => write!(f, "class#{}", c.base().name),
            JvmClass::Interface(c) => write!(f, "interface#{}", c.base().name),
            JvmClass::Primitive(c) => write!(f, "primitive#{}", c.name),
            JvmClass::PrimitiveArray(c) => write!(f, "array#{}", c.name),
            JvmClass::InstanceArray(c) => write!(f, "array#{}", c.name),
        }
    }
}

impl JvmClass {
    pub fn as_class_like(&self) -> Option<&dyn ClassLike> {
        match self {
            JvmClass::Instance(c) => Some(c),
            JvmClass::Interface(c) => Some(c),
            _ => None,
        }
    }

    pub fn name(&self) -> Symbol {
        match self {
            JvmClass::Instance(c) => c.base().name,
            JvmClass::Interface(c) => c.base().name,
            JvmClass::Primitive(c) => c.name,
            JvmClass::PrimitiveArray(c) => c.name,
            JvmClass::InstanceArray(c) => c.name,
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, JvmClass::Primitive(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, JvmClass::PrimitiveArray(_) | JvmClass::InstanceArray(_))
    }

    pub fn is_interface(&self) -> bool {
        matches!(self, JvmClass::Interface(_))
    }

    pub fn get_super_id(&self) -> Option<ClassId> {
        match self {
            JvmClass::Instance(c) => c.base().super_id,
            JvmClass::Interface(c) => c.base().super_id,
            JvmClass::PrimitiveArray(c) => Some(c.super_id),
            JvmClass::InstanceArray(c) => Some(c.super_id),
            JvmClass::Primitive(_) => None,
        }
    }

    pub fn get_mirror_ref(&self) -> Option<HeapRef> {
        match self {
            JvmClass::Instance(c) => c.get_mirror_ref(),
            JvmClass::Interface(c) => c.get_mirror_ref(),
            JvmClass::PrimitiveArray(c) => c.get_mirror_ref(),
            JvmClass::InstanceArray(c) => c.get_mirror_ref(),
            JvmClass::Primitive(_) => None,
        }
    }

    pub fn set_mirror_ref(&self, r: HeapRef) {
        match self {
            JvmClass::Instance(c) => c.set_mirror_ref(r),
            JvmClass::Interface(c) => c.set_mirror_ref(r),
            JvmClass::PrimitiveArray(c) => c.set_mirror_ref(r),
            JvmClass::InstanceArray(c) => c.set_mirror_ref(r),
            JvmClass::Primitive(_) => {}
        }
    }

    pub fn get_vtable_method_id(&self, slot: u16) -> Option<MethodId> {
        match self {
            JvmClass::Instance(c) => c.get_vtable_method_id(slot),
            JvmClass::PrimitiveArray(c) => c.get_vtable_method_id(slot),
            JvmClass::InstanceArray(c) => c.get_vtable_method_id(slot),
            _ => None,
        }
    }

    pub fn get_static_method_id(&self, key: MethodKey) -> Result<MethodId, JvmError> {
        self.get_static_method_id_opt(key)
            .ok_or(JvmError::MethodNotFound(key, ClassId::from_usize(usize::MAX)))
    }

    pub fn get_static_method_id_opt(&self, key: MethodKey) -> Option<MethodId> {
        match self {
            JvmClass::Instance(c) => c.declared_method_id(key),
            JvmClass::Interface(c) => c.declared_method_id(key),
            _ => None,
        }
    }

    pub fn instance_fields(&self) -> &[crate::rt::field::InstanceField] {
        match self {
            JvmClass::Instance(c) => c.instance_fields(),
            _ => &[],
        }
    }
}
