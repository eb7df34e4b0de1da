//! Array class objects (§3 "Class object", Array kind). Always `Initialized`, `bases[]` is
//! always `{Object, Cloneable, Serializable}` (§3 invariant).

use crate::descriptor::Descriptor;
use crate::heap::HeapRef;
use crate::keys::{ClassId, MethodId, MethodKey, Symbol};
use once_cell::sync::OnceCell;
use std::collections::HashMap;

/// `component_type` is one of the eight primitives (`[I`, `[B`, ...).
#[derive(Debug)]
pub struct PrimitiveArrayClass {
    pub name: Symbol,
    pub super_id: ClassId,
    pub element_type: Descriptor,
    pub vtable: Vec<MethodId>,
    pub vtable_index: HashMap<MethodKey, u16>,
    mirror_ref: OnceCell<HeapRef>,
}

/// `component_type` is a class or interface, or another array (`[[I`, `[Ljava/lang/String;`).
#[derive(Debug)]
pub struct ObjectArrayClass {
    pub name: Symbol,
    pub super_id: ClassId,
    pub element_class_id: ClassId,
    pub vtable: Vec<MethodId>,
    pub vtable_index: HashMap<MethodKey, u16>,
    mirror_ref: OnceCell<HeapRef>,
}

impl PrimitiveArrayClass {
    pub fn new(
        name: Symbol,
        super_id: ClassId,
        element_type: Descriptor,
        vtable: Vec<MethodId>,
        vtable_index: HashMap<MethodKey, u16>,
    ) -> Self {
        PrimitiveArrayClass { name, super_id, element_type, vtable, vtable_index, mirror_ref: OnceCell::new() }
    }

    pub fn get_mirror_ref(&self) -> Option<HeapRef> {
        self.mirror_ref.get().copied()
    }

    pub fn set_mirror_ref(&self, r: HeapRef) {
        let _ = self.mirror_ref.set(r);
    }

    pub fn get_vtable_method_id(&self, slot: u16) -> Option<MethodId> {
        self.vtable.get(slot as usize).copied()
    }

    pub fn get_vtable_slot(&self, key: MethodKey) -> Option<u16> {
        self.vtable_index.get(&key).copied()
    }
}

impl ObjectArrayClass {
    pub fn new(
        name: Symbol,
        super_id: ClassId,
        element_class_id: ClassId,
        vtable: Vec<MethodId>,
        vtable_index: HashMap<MethodKey, u16>,
    ) -> Self {
        ObjectArrayClass { name, super_id, element_class_id, vtable, vtable_index, mirror_ref: OnceCell::new() }
    }

    pub fn get_mirror_ref(&self) -> Option<HeapRef> {
        self.mirror_ref.get().copied()
    }

    pub fn set_mirror_ref(&self, r: HeapRef) {
        let _ = self.mirror_ref.set(r);
    }

    pub fn get_vtable_method_id(&self, slot: u16) -> Option<MethodId> {
        self.vtable.get(slot as usize).copied()
    }

    pub fn get_vtable_slot(&self, key: MethodKey) -> Option<u16> {
        self.vtable_index.get(&key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_array_mirror_ref_round_trips() {
        let interner = lasso::ThreadedRodeo::default();
        let name = interner.get_or_intern("[I");
        let arr = PrimitiveArrayClass::new(
            name,
            ClassId::from_usize(0),
            Descriptor::Int,
            vec![],
            HashMap::new(),
        );
        assert_eq!(arr.get_mirror_ref(), None);
        arr.set_mirror_ref(42);
        assert_eq!(arr.get_mirror_ref(), Some(42));
    }
}
