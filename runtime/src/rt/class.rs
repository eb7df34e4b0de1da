//! Ordinary class class-objects (§3 "Class object", Class kind) and the §4.3 step 4-7
//! algorithms that turn a parsed class file plus its already-linked superclass into a laid-out,
//! dispatch-ready type.

use crate::descriptor::Descriptor;
use crate::error::JvmError;
use crate::keys::{ClassId, FieldDescriptorId, FieldKey, MethodId, MethodKey, Symbol};
use crate::rt::field::{InstanceField, StaticField, Value};
use crate::rt::method::Method;
use crate::rt::{BaseClass, ClassLike};
use once_cell::sync::OnceCell;
use std::collections::HashMap;

/// Per-class-per-interface dispatch table (§3 "ITable"): the interface's identity plus a
/// trailing array of method ids sized by that interface's `table_size`.
#[derive(Debug, Clone)]
pub struct ITable {
    pub interface_id: ClassId,
    pub vtable: Vec<MethodId>,
}

/// A field as seen before field-layout assignment: its key, type and class-file flags, plus the
/// raw `ConstantValue` if present (applied to static storage per §4.3 step 5).
pub struct UnlinkedField {
    pub key: FieldKey,
    pub descriptor: Descriptor,
    pub descriptor_id: FieldDescriptorId,
    pub flags: crate::classfile::AccessFlags,
    pub constant_value: Option<Value>,
}

#[derive(Debug)]
pub struct InstanceClass {
    base: BaseClass,
    field_area_size: OnceCell<usize>,
    /// Pointer-sized offsets (already divided by `POINTER_SIZE`) of every reference-typed
    /// instance field, inherited ones included (§3 invariant).
    gc_mask: OnceCell<Vec<usize>>,
    table_size: OnceCell<u16>,
    vtable: OnceCell<Vec<MethodId>>,
    vtable_index: OnceCell<HashMap<MethodKey, u16>>,
    itables: OnceCell<Vec<ITable>>,
    declared_methods: OnceCell<HashMap<MethodKey, MethodId>>,
    instance_fields: OnceCell<Vec<InstanceField>>,
    instance_field_index: OnceCell<HashMap<FieldKey, usize>>,
}

impl InstanceClass {
    pub fn new(name: Symbol, flags: crate::classfile::AccessFlags, super_id: Option<ClassId>) -> Self {
        InstanceClass {
            base: BaseClass::new(name, flags, super_id),
            field_area_size: OnceCell::new(),
            gc_mask: OnceCell::new(),
            table_size: OnceCell::new(),
            vtable: OnceCell::new(),
            vtable_index: OnceCell::new(),
            itables: OnceCell::new(),
            declared_methods: OnceCell::new(),
            instance_fields: OnceCell::new(),
            instance_field_index: OnceCell::new(),
        }
    }

    pub fn is_abstract(&self) -> bool {
        self.base.flags.is_abstract()
    }

    /// §4.3 step 5-6: lays out instance fields starting from the superclass's
    /// `field_area_size`, aligning each field to its own size; separates out statics into side
    /// storage. Builds `gc_mask` by inheriting the superclass's and appending this class's own
    /// reference-field offsets.
    pub fn link_fields(
        &self,
        fields: Vec<UnlinkedField>,
        super_field_area_size: usize,
        super_gc_mask: &[usize],
    ) -> Result<(), JvmError> {
        let mut offset = super_field_area_size;
        let mut instance_fields = Vec::new();
        let mut instance_index = HashMap::new();
        let mut gc_mask = super_gc_mask.to_vec();
        let mut statics = HashMap::new();

        for f in fields {
            if f.flags.is_static() {
                let default = f.constant_value.unwrap_or_else(|| Value::default_for(&f.descriptor));
                statics.insert(
                    f.key,
                    StaticField { flags: f.flags, descriptor: f.descriptor_id, value: std::sync::RwLock::new(default) },
                );
                continue;
            }
            let size = f.descriptor.size_of();
            offset = (offset + size - 1) & !(size - 1);
            if f.descriptor.is_reference() {
                gc_mask.push(offset / crate::descriptor::POINTER_SIZE);
            }
            instance_index.insert(f.key, instance_fields.len());
            instance_fields.push(InstanceField {
                flags: f.flags,
                descriptor_id: f.descriptor_id,
                offset,
                declaring_class: ClassId::from_usize(0), // patched by caller once this class's id is known
            });
            offset += size;
        }

        let _ = self.field_area_size.set(offset);
        let _ = self.gc_mask.set(gc_mask);
        let _ = self.instance_fields.set(instance_fields);
        let _ = self.instance_field_index.set(instance_index);
        let _ = self.base.static_fields.set(statics);
        Ok(())
    }

    /// Patches `declaring_class` on every instance field once the caller knows this class's own
    /// `ClassId` (fields are laid out before the class is registered in the store).
    pub fn set_declaring_class(&mut self, class_id: ClassId) {
        if let Some(fields) = self.instance_fields.get_mut() {
            for f in fields {
                f.declaring_class = class_id;
            }
        }
    }

    pub fn field_area_size(&self) -> usize {
        self.field_area_size.get().copied().unwrap_or(0)
    }

    pub fn gc_mask(&self) -> &[usize] {
        self.gc_mask.get().map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn instance_fields(&self) -> &[InstanceField] {
        self.instance_fields.get().map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn get_instance_field(&self, key: FieldKey) -> Option<&InstanceField> {
        let idx = *self.instance_field_index.get()?.get(&key)?;
        self.instance_fields().get(idx)
    }

    /// §4.3 step 4: every declared method that (a) isn't `<clinit>`/`<init>`, (b) isn't static
    /// or private, inherits its superclass's overridden slot if name+descriptor match, else
    /// gets the next slot after `super_table_size`.
    pub fn prepare_methods(
        &self,
        mut methods: Vec<Method>,
        method_ids: Vec<MethodId>,
        super_table_size: u16,
        super_vtable: &[MethodId],
        super_vtable_index: &HashMap<MethodKey, u16>,
        interner: &lasso::ThreadedRodeo,
    ) -> Vec<Method> {
        let mut vtable = super_vtable.to_vec();
        let mut vtable_index = super_vtable_index.clone();
        let mut declared = HashMap::new();
        let mut next_slot = super_table_size;

        for (method, id) in methods.iter_mut().zip(method_ids.iter().copied()) {
            let key = MethodKey { name: method.name, desc: method.desc };
            declared.insert(key, id);
            if !method.participates_in_dispatch(interner) {
                continue;
            }
            if let Some(&slot) = vtable_index.get(&key) {
                method.vtable_slot = Some(slot);
                vtable[slot as usize] = id;
            } else {
                method.vtable_slot = Some(next_slot);
                vtable_index.insert(key, next_slot);
                vtable.push(id);
                next_slot += 1;
            }
        }

        let _ = self.table_size.set(next_slot);
        let _ = self.vtable.set(vtable);
        let _ = self.vtable_index.set(vtable_index);
        let _ = self.declared_methods.set(declared);
        methods
    }

    pub fn table_size(&self) -> u16 {
        self.table_size.get().copied().unwrap_or(0)
    }

    /// The full v-table, inherited slots included. Used by the class loader when a subclass or
    /// array class needs to seed its own v-table from this one.
    pub fn vtable(&self) -> &[MethodId] {
        self.vtable.get().map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn vtable_index(&self) -> Option<&HashMap<MethodKey, u16>> {
        self.vtable_index.get()
    }

    pub fn get_vtable_method_id(&self, slot: u16) -> Option<MethodId> {
        self.vtable.get()?.get(slot as usize).copied()
    }

    pub fn get_vtable_slot(&self, key: MethodKey) -> Option<u16> {
        self.vtable_index.get()?.get(&key).copied()
    }

    pub fn declared_method_id(&self, key: MethodKey) -> Option<MethodId> {
        self.declared_methods.get()?.get(&key).copied()
    }

    /// §4.3 step 7: one i-table per interface reachable from this class (DFS order, already
    /// computed by the caller in `all_interfaces`), zero-initialized then filled with whichever
    /// method id this class's own vtable/declared-method resolution assigns to each interface
    /// method slot. Skipped for abstract classes (no i-tables are required before a concrete
    /// subclass completes them).
    pub fn link_itables(&self, itables: Vec<ITable>) {
        let _ = self.itables.set(itables);
    }

    pub fn itables(&self) -> &[ITable] {
        self.itables.get().map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn get_interface_method_id(&self, interface_id: ClassId, slot: u16) -> Option<MethodId> {
        self.itables()
            .iter()
            .find(|t| t.interface_id == interface_id)
            .and_then(|t| t.vtable.get(slot as usize).copied())
    }
}

impl ClassLike for InstanceClass {
    fn base(&self) -> &BaseClass {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::AccessFlags;
    use crate::rt::method::{MethodBody, MethodFlags};

    fn field(interner: &lasso::ThreadedRodeo, name: &str, descriptor: Descriptor, is_static: bool) -> UnlinkedField {
        let flags_bits = if is_static { AccessFlags::STATIC } else { 0 };
        UnlinkedField {
            key: FieldKey { name: interner.get_or_intern(name), desc: interner.get_or_intern(descriptor.write()) },
            descriptor,
            descriptor_id: FieldDescriptorId::from_usize(0),
            flags: AccessFlags(flags_bits),
            constant_value: None,
        }
    }

    #[test]
    fn fields_are_aligned_and_gc_mask_records_references_only() {
        let interner = lasso::ThreadedRodeo::default();
        let class = InstanceClass::new(interner.get_or_intern("Example"), AccessFlags(0), None);
        let fields = vec![
            field(&interner, "flag", Descriptor::Boolean, false),
            field(&interner, "value", Descriptor::Long, false),
            field(&interner, "name", Descriptor::Object("java/lang/String".to_string()), false),
        ];
        class.link_fields(fields, 0, &[]).unwrap();

        let offsets: Vec<usize> = class.instance_fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets[0], 0); // flag: 1 byte at 0
        assert_eq!(offsets[1], 8); // value: 8-byte aligned, not packed right after flag
        assert_eq!(class.gc_mask(), &[offsets[2] / crate::descriptor::POINTER_SIZE]);
    }

    #[test]
    fn static_fields_get_default_values_and_are_excluded_from_layout() {
        let interner = lasso::ThreadedRodeo::default();
        let class = InstanceClass::new(interner.get_or_intern("Example"), AccessFlags(0), None);
        let fields = vec![field(&interner, "COUNT", Descriptor::Int, true)];
        class.link_fields(fields, 0, &[]).unwrap();
        assert_eq!(class.instance_fields().len(), 0);
        assert_eq!(class.field_area_size(), 0);
    }

    fn abstract_method(name: Symbol, desc: Symbol) -> Method {
        Method {
            class_id: ClassId::from_usize(0),
            name,
            desc,
            descriptor_id: crate::keys::MethodDescriptorId::from_usize(0),
            flags: MethodFlags::from(AccessFlags(AccessFlags::PUBLIC)),
            body: MethodBody::Abstract,
            vtable_slot: None,
        }
    }

    #[test]
    fn overriding_method_reuses_superclass_slot() {
        let interner = lasso::ThreadedRodeo::default();
        let to_string = interner.get_or_intern("toString");
        let desc = interner.get_or_intern("()Ljava/lang/String;");
        let super_vtable = vec![MethodId::from_usize(1)];
        let mut super_index = HashMap::new();
        super_index.insert(MethodKey { name: to_string, desc }, 0u16);

        let class = InstanceClass::new(interner.get_or_intern("Sub"), AccessFlags(0), Some(ClassId::from_usize(0)));
        let method = abstract_method(to_string, desc);
        let linked = class.prepare_methods(vec![method], vec![MethodId::from_usize(9)], 1, &super_vtable, &super_index, &interner);
        assert_eq!(linked[0].vtable_slot, Some(0));
        assert_eq!(class.get_vtable_method_id(0), Some(MethodId::from_usize(9)));
        assert_eq!(class.table_size(), 1);
    }

    #[test]
    fn new_method_gets_slot_after_superclass_table_size() {
        let interner = lasso::ThreadedRodeo::default();
        let run = interner.get_or_intern("run");
        let desc = interner.get_or_intern("()V");
        let class = InstanceClass::new(interner.get_or_intern("Sub"), AccessFlags(0), Some(ClassId::from_usize(0)));
        let method = abstract_method(run, desc);
        let linked = class.prepare_methods(vec![method], vec![MethodId::from_usize(3)], 2, &[MethodId::from_usize(1), MethodId::from_usize(2)], &HashMap::new(), &interner);
        assert_eq!(linked[0].vtable_slot, Some(2));
        assert_eq!(class.table_size(), 3);
    }
}
