use crate::classfile::AccessFlags;
use crate::descriptor::Descriptor;
use crate::heap::HeapRef;
use crate::keys::{ClassId, FieldDescriptorId};
use std::sync::RwLock;

/// A primitive or reference value as stored in a static field slot. Reference fields hold a
/// `HeapRef`-shaped index into the heap (§3); this crate does not interpret bytecode, so the
/// value itself is opaque storage sized by its descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Reference(Option<HeapRef>),
}

impl Value {
    pub fn default_for(descriptor: &Descriptor) -> Self {
        match descriptor {
            Descriptor::Boolean => Value::Boolean(false),
            Descriptor::Byte => Value::Byte(0),
            Descriptor::Char => Value::Char(0),
            Descriptor::Short => Value::Short(0),
            Descriptor::Int => Value::Int(0),
            Descriptor::Long => Value::Long(0),
            Descriptor::Float => Value::Float(0.0),
            Descriptor::Double => Value::Double(0.0),
            Descriptor::Void => unreachable!("void is not a field type"),
            Descriptor::Object(_) | Descriptor::Array(_) => Value::Reference(None),
        }
    }
}

/// A non-static field, located at a fixed `offset` within every instance of `declaring_class`
/// (or a subclass). Offsets are assigned once, bottom-up through the superclass chain, and
/// never change afterwards (§4.3 step 5).
#[derive(Debug, Clone, Copy)]
pub struct InstanceField {
    pub flags: AccessFlags,
    pub descriptor_id: FieldDescriptorId,
    pub offset: usize,
    pub declaring_class: ClassId,
}

/// A static field. Storage lives on the class itself, one slot per field, guarded by a
/// `RwLock` since multiple threads may read or write it after `<clinit>` runs.
#[derive(Debug)]
pub struct StaticField {
    pub flags: AccessFlags,
    pub descriptor: FieldDescriptorId,
    pub value: RwLock<Value>,
}
