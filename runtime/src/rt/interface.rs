//! Interface class objects (§3 "Class object", Interface kind).

use crate::classfile::ClassFile;
use crate::error::JvmError;
use crate::keys::{ClassId, FieldKey, MethodId, MethodKey, Symbol};
use crate::rt::field::{StaticField, Value};
use crate::rt::method::Method;
use crate::rt::{BaseClass, ClassLike};
use once_cell::sync::OnceCell;
use std::collections::HashMap;

/// Same shape as `Class`, minus an instance layout: `field_area_size` is always 0, `bases[]`
/// holds only direct super-interfaces (§3).
#[derive(Debug)]
pub struct InterfaceClass {
    base: BaseClass,
    /// `table_size`: one slot per method this interface introduces that participates in
    /// i-table dispatch (non-static, non-private).
    table_size: OnceCell<u16>,
    declared_methods: OnceCell<HashMap<MethodKey, MethodId>>,
}

impl InterfaceClass {
    /// Parses the `Loaded` state: name, flags, direct super-interfaces recorded but not yet
    /// resolved to `ClassId`s (the loader fills `direct_interfaces`/`interfaces` during `add`).
    pub fn load(class_file: &ClassFile, name: Symbol) -> Self {
        InterfaceClass {
            base: BaseClass::new(name, class_file.access_flags, None),
            table_size: OnceCell::new(),
            declared_methods: OnceCell::new(),
        }
    }

    /// §4.3 step 4/7 analogue for interfaces: every non-static, non-private method declared
    /// here gets the next dense slot, continuing from every distinct super-interface's own
    /// method set already assigned (interfaces don't share a single linear super chain, so
    /// slots are simply dense over this interface's own declarations).
    pub fn link_methods(
        &self,
        methods: Vec<Method>,
        method_ids: Vec<MethodId>,
        interner: &lasso::ThreadedRodeo,
    ) -> Vec<Method> {
        let mut declared = HashMap::new();
        let mut next_slot: u16 = 0;
        let mut out = Vec::with_capacity(methods.len());
        for (mut method, id) in methods.into_iter().zip(method_ids) {
            declared.insert(MethodKey { name: method.name, desc: method.desc }, id);
            if method.participates_in_dispatch(interner) {
                method.vtable_slot = Some(next_slot);
                next_slot += 1;
            }
            out.push(method);
        }
        let _ = self.table_size.set(next_slot);
        let _ = self.declared_methods.set(declared);
        out
    }

    pub fn link_fields(&self, field_keys: impl IntoIterator<Item = (FieldKey, Value, crate::classfile::AccessFlags)>) {
        let mut map = HashMap::new();
        for (key, initial, flags) in field_keys {
            map.insert(key, StaticField { flags, descriptor: crate::keys::FieldDescriptorId::from_usize(0), value: std::sync::RwLock::new(initial) });
        }
        let _ = self.base.static_fields.set(map);
    }

    pub fn set_direct_interfaces(&self, interfaces: Vec<ClassId>) {
        let _ = self.base.direct_interfaces.set(interfaces);
    }

    pub fn set_all_interfaces(&self, interfaces: Vec<ClassId>) {
        let _ = self.base.interfaces.set(interfaces);
    }

    pub fn table_size(&self) -> u16 {
        self.table_size.get().copied().unwrap_or(0)
    }

    pub fn declared_method_id(&self, key: MethodKey) -> Option<MethodId> {
        self.declared_methods.get()?.get(&key).copied()
    }

    pub fn declared_methods(&self) -> impl Iterator<Item = (&MethodKey, &MethodId)> {
        self.declared_methods.get().into_iter().flatten()
    }
}

impl ClassLike for InterfaceClass {
    fn base(&self) -> &BaseClass {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::AccessFlags;

    fn minimal_class_file() -> ClassFile {
        ClassFile {
            minor_version: 0,
            major_version: 61,
            constant_pool: crate::classfile::ConstantPool::from_entries(vec![crate::classfile::ConstantPoolEntry::Padding]),
            access_flags: AccessFlags(AccessFlags::INTERFACE | AccessFlags::ABSTRACT),
            this_class: "java/lang/Runnable".to_string(),
            super_class: None,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
        }
    }

    #[test]
    fn interface_starts_loaded_and_unlinked() {
        let interner = lasso::ThreadedRodeo::default();
        let name = interner.get_or_intern("java/lang/Runnable");
        let class_file = minimal_class_file();
        let iface = InterfaceClass::load(&class_file, name);
        assert!(!iface.is_linked());
        assert_eq!(iface.table_size(), 0);
    }

    #[test]
    fn link_methods_assigns_dense_slots_to_abstract_methods() {
        let interner = lasso::ThreadedRodeo::default();
        let name = interner.get_or_intern("java/lang/Runnable");
        let class_file = minimal_class_file();
        let iface = InterfaceClass::load(&class_file, name);
        let run = interner.get_or_intern("run");
        let desc = interner.get_or_intern("()V");
        let method = Method {
            class_id: ClassId::from_usize(0),
            name: run,
            desc,
            descriptor_id: crate::keys::MethodDescriptorId::from_usize(0),
            flags: crate::rt::method::MethodFlags::from(AccessFlags(AccessFlags::PUBLIC | AccessFlags::ABSTRACT)),
            body: crate::rt::method::MethodBody::Abstract,
            vtable_slot: None,
        };
        let linked = iface.link_methods(vec![method], vec![MethodId::from_usize(5)], &interner);
        assert_eq!(linked[0].vtable_slot, Some(0));
        assert_eq!(iface.table_size(), 1);
        assert_eq!(
            iface.declared_method_id(MethodKey { name: run, desc }),
            Some(MethodId::from_usize(5))
        );
    }
}
