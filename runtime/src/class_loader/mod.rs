//! Class loader (§4.3): parses class-file bytes, recursively resolves and links supertypes, and
//! builds the dense class/method stores the resolution engine and garbage collector read from.
//!
//! A single `ClassLoader` owns the whole class graph for the process; it is not reentrant
//! across threads (§4.3 "Concurrency").

use crate::classfile::{self, ClassFile, ConstantPool, ConstantPoolEntry};
use crate::descriptor::{self, Descriptor, MethodDescriptor};
use crate::error::JvmError;
use crate::keys::{ClassId, FieldDescriptorId, FieldKey, MethodDescriptorId, MethodId, MethodKey, Symbol};
use crate::resolution::{self, ClassStore};
use crate::rt::array::{ObjectArrayClass, PrimitiveArrayClass};
use crate::rt::class::{ITable, InstanceClass, UnlinkedField};
use crate::rt::field::Value;
use crate::rt::interface::InterfaceClass;
use crate::rt::method::Method;
use crate::rt::{ClassLike, JvmClass, PrimitiveClass};
use std::collections::{HashMap, HashSet};

/// Where `add()`'s caller gets a class's raw bytes, keyed by internal name
/// (`java/lang/Object`, never the dotted form). The loader never reads a filesystem or module
/// image itself; that lookup is out of scope (§4.3).
pub trait ClassPath {
    fn find_class(&self, name: &str) -> Option<Vec<u8>>;
}

/// The eight primitive type names, exactly as `Descriptor::pretty()` renders them. Installed
/// once as permanently-initialized class objects so `for_name`/`for_name_loaded` never have to
/// special-case them.
const PRIMITIVE_NAMES: [(&str, usize); 8] = [
    ("boolean", 1),
    ("byte", 1),
    ("char", 2),
    ("short", 2),
    ("int", 4),
    ("long", 8),
    ("float", 4),
    ("double", 8),
];

/// The class-object store (§3) plus the descriptor pools every `Method`/`InstanceField` record
/// indexes into. Everything here is dense and append-only; nothing is ever removed.
pub struct ClassLoader {
    class_path: Box<dyn ClassPath>,
    interner: lasso::ThreadedRodeo,
    classes: Vec<JvmClass>,
    methods: Vec<Method>,
    by_name: HashMap<Symbol, ClassId>,
    field_descriptors: Vec<Descriptor>,
    field_descriptor_index: HashMap<String, FieldDescriptorId>,
    method_descriptors: Vec<MethodDescriptor>,
    method_descriptor_index: HashMap<String, MethodDescriptorId>,
    /// §4.3 step 8's `prepare_class_object` callback; a JIT or interpreter hook point, left as a
    /// plain closure here rather than a virtual-method hierarchy.
    prepare_hook: Option<Box<dyn FnMut(ClassId, &JvmClass)>>,
}

impl ClassLoader {
    pub fn new(class_path: Box<dyn ClassPath>) -> Self {
        let mut loader = ClassLoader {
            class_path,
            interner: lasso::ThreadedRodeo::default(),
            classes: Vec::new(),
            methods: Vec::new(),
            by_name: HashMap::new(),
            field_descriptors: Vec::new(),
            field_descriptor_index: HashMap::new(),
            method_descriptors: Vec::new(),
            method_descriptor_index: HashMap::new(),
            prepare_hook: None,
        };
        loader.install_primitives();
        loader
    }

    fn install_primitives(&mut self) {
        for (name, instance_size) in PRIMITIVE_NAMES {
            let symbol = self.interner.get_or_intern(name);
            let id = ClassId::from_usize(self.classes.len());
            self.classes.push(JvmClass::Primitive(PrimitiveClass { name: symbol, instance_size }));
            self.by_name.insert(symbol, id);
        }
    }

    pub fn interner(&self) -> &lasso::ThreadedRodeo {
        &self.interner
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn set_prepare_hook(&mut self, hook: impl FnMut(ClassId, &JvmClass) + 'static) {
        self.prepare_hook = Some(Box::new(hook));
    }

    fn invoke_prepare_hook(&mut self, class_id: ClassId) {
        if let Some(mut hook) = self.prepare_hook.take() {
            hook(class_id, &self.classes[class_id.to_index()]);
            self.prepare_hook = Some(hook);
        }
    }

    pub fn field_descriptor(&self, id: FieldDescriptorId) -> &Descriptor {
        &self.field_descriptors[id.to_index()]
    }

    pub fn method_descriptor(&self, id: MethodDescriptorId) -> &MethodDescriptor {
        &self.method_descriptors[id.to_index()]
    }

    fn intern_field_descriptor(&mut self, text: &str) -> Result<FieldDescriptorId, JvmError> {
        if let Some(&id) = self.field_descriptor_index.get(text) {
            return Ok(id);
        }
        let parsed = descriptor::parse_field(text)?;
        let id = FieldDescriptorId::from_usize(self.field_descriptors.len());
        self.field_descriptors.push(parsed);
        self.field_descriptor_index.insert(text.to_string(), id);
        Ok(id)
    }

    fn intern_method_descriptor(&mut self, text: &str) -> Result<MethodDescriptorId, JvmError> {
        if let Some(&id) = self.method_descriptor_index.get(text) {
            return Ok(id);
        }
        let parsed = descriptor::parse_method(text)?;
        let id = MethodDescriptorId::from_usize(self.method_descriptors.len());
        self.method_descriptors.push(parsed);
        self.method_descriptor_index.insert(text.to_string(), id);
        Ok(id)
    }

    /// §4.3 `for_name`: resolves any field descriptor to its class object, loading named
    /// classes from `ClassPath` (and transitively their supertypes) as needed. Array and
    /// primitive descriptors never reach `ClassPath` directly.
    pub fn for_name(&mut self, descriptor: &Descriptor) -> Result<ClassId, JvmError> {
        match descriptor {
            Descriptor::Object(name) => self.load_class_by_name(name),
            Descriptor::Array(component) => self.array_class_for(descriptor, component),
            primitive => {
                let symbol = self.interner.get_or_intern(primitive.pretty());
                self.by_name
                    .get(&symbol)
                    .copied()
                    .ok_or(JvmError::InvariantViolation("primitive class requested before bootstrap"))
            }
        }
    }

    /// §4.3 `for_name_loaded`: same lookup, but never triggers `ClassPath::find_class`. Still
    /// synthesizes an array class object on demand if its component type is already loaded.
    pub fn for_name_loaded(&mut self, descriptor: &Descriptor) -> Option<ClassId> {
        match descriptor {
            Descriptor::Object(name) => {
                let symbol = self.interner.get_or_intern(name);
                self.by_name.get(&symbol).copied()
            }
            Descriptor::Array(component) => {
                let array_name = descriptor.write();
                let symbol = self.interner.get_or_intern(&array_name);
                if let Some(&id) = self.by_name.get(&symbol) {
                    return Some(id);
                }
                let object_symbol = self.interner.get_or_intern("java/lang/Object");
                let object_id = *self.by_name.get(&object_symbol)?;
                let component_id =
                    if component.is_reference() { Some(self.for_name_loaded(component)?) } else { None };
                Some(self.build_array_class(symbol, component, component_id, object_id))
            }
            primitive => {
                let symbol = self.interner.get_or_intern(primitive.pretty());
                self.by_name.get(&symbol).copied()
            }
        }
    }

    fn load_class_by_name(&mut self, name: &str) -> Result<ClassId, JvmError> {
        let symbol = self.interner.get_or_intern(name);
        if let Some(&id) = self.by_name.get(&symbol) {
            return Ok(id);
        }
        let bytes = self.class_path.find_class(name).ok_or_else(|| JvmError::ClassNotFound(name.to_string()))?;
        self.add(&bytes)
    }

    fn array_class_for(&mut self, descriptor: &Descriptor, component: &Descriptor) -> Result<ClassId, JvmError> {
        let array_name = descriptor.write();
        let symbol = self.interner.get_or_intern(&array_name);
        if let Some(&id) = self.by_name.get(&symbol) {
            return Ok(id);
        }
        let object_id = self.load_class_by_name("java/lang/Object")?;
        let component_id = if component.is_reference() { Some(self.for_name(component)?) } else { None };
        Ok(self.build_array_class(symbol, component, component_id, object_id))
    }

    fn build_array_class(
        &mut self,
        symbol: Symbol,
        component: &Descriptor,
        component_id: Option<ClassId>,
        object_id: ClassId,
    ) -> ClassId {
        let array_id = ClassId::from_usize(self.classes.len());
        let (vtable, vtable_index) = self.object_vtable(object_id);
        let class = match component_id {
            Some(element_class_id) => {
                JvmClass::InstanceArray(ObjectArrayClass::new(symbol, object_id, element_class_id, vtable, vtable_index))
            }
            None => JvmClass::PrimitiveArray(PrimitiveArrayClass::new(symbol, object_id, component.clone(), vtable, vtable_index)),
        };
        self.classes.push(class);
        self.by_name.insert(symbol, array_id);
        array_id
    }

    fn object_vtable(&self, object_id: ClassId) -> (Vec<MethodId>, HashMap<MethodKey, u16>) {
        match &self.classes[object_id.to_index()] {
            JvmClass::Instance(c) => (c.vtable().to_vec(), c.vtable_index().cloned().unwrap_or_default()),
            _ => (Vec::new(), HashMap::new()),
        }
    }

    /// §4.3 `load_bootstrap`: loads the handful of classes every other class's layout or
    /// dispatch surface implicitly depends on. Mirror-object back-patching is the allocating
    /// owner's job (no class object has a mirror until the heap allocates one for it), not the
    /// loader's; see the ledger.
    pub fn load_bootstrap(&mut self) -> Result<ClassId, JvmError> {
        self.load_class_by_name("java/lang/Object")?;
        self.load_class_by_name("java/lang/Cloneable")?;
        self.load_class_by_name("java/io/Serializable")?;
        let class_class_id = self.load_class_by_name("java/lang/Class")?;
        self.load_class_by_name("java/lang/String")?;
        Ok(class_class_id)
    }

    /// §4.3 `add`, steps 1-8.
    pub fn add(&mut self, bytes: &[u8]) -> Result<ClassId, JvmError> {
        // Step 1.
        let class_file = classfile::parse(bytes)?;
        let name_symbol = self.interner.get_or_intern(&class_file.this_class);

        // Step 2: re-entry guard.
        if let Some(&existing) = self.by_name.get(&name_symbol) {
            return Ok(existing);
        }

        // Step 3.
        let super_id = match &class_file.super_class {
            Some(name) => Some(self.load_class_by_name(name)?),
            None => None,
        };
        let mut direct_interfaces = Vec::with_capacity(class_file.interfaces.len());
        for name in &class_file.interfaces {
            direct_interfaces.push(self.load_class_by_name(name)?);
        }

        let class_id = ClassId::from_usize(self.classes.len());
        if class_file.access_flags.is_interface() {
            self.add_interface(class_file, name_symbol, class_id, direct_interfaces)
        } else {
            self.add_instance(class_file, name_symbol, class_id, super_id, direct_interfaces)
        }
    }

    fn add_instance(
        &mut self,
        class_file: ClassFile,
        name_symbol: Symbol,
        class_id: ClassId,
        super_id: Option<ClassId>,
        direct_interfaces: Vec<ClassId>,
    ) -> Result<ClassId, JvmError> {
        let is_abstract = class_file.access_flags.is_abstract();
        let mut instance = InstanceClass::new(name_symbol, class_file.access_flags, super_id);
        let all_interfaces = self.flatten_interfaces(super_id, &direct_interfaces);
        let _ = instance.base().direct_interfaces.set(direct_interfaces);
        let _ = instance.base().interfaces.set(all_interfaces.clone());

        // Steps 5-6: instance layout and gc mask.
        let mut unlinked_fields = Vec::with_capacity(class_file.fields.len());
        for f in &class_file.fields {
            let descriptor = descriptor::parse_field(&f.descriptor)?;
            let descriptor_id = self.intern_field_descriptor(&f.descriptor)?;
            let key = FieldKey { name: self.interner.get_or_intern(&f.name), desc: self.interner.get_or_intern(&f.descriptor) };
            let constant_value = match f.constant_value_index {
                Some(idx) if f.access_flags.is_static() => {
                    Some(read_constant_value(&class_file.constant_pool, idx, &descriptor)?)
                }
                _ => None,
            };
            unlinked_fields.push(UnlinkedField { key, descriptor, descriptor_id, flags: f.access_flags, constant_value });
        }
        let (super_field_area_size, super_gc_mask) = match super_id.map(|id| &self.classes[id.to_index()]) {
            Some(JvmClass::Instance(c)) => (c.field_area_size(), c.gc_mask().to_vec()),
            _ => (0, Vec::new()),
        };
        instance.link_fields(unlinked_fields, super_field_area_size, &super_gc_mask)?;

        // Step 4: v-table slot assignment.
        let mut methods = Vec::with_capacity(class_file.methods.len());
        let mut clinit_id = None;
        for m in &class_file.methods {
            let method_id = MethodId::from_usize(self.methods.len() + methods.len());
            let name_symbol = self.interner.get_or_intern(&m.name);
            let desc_symbol = self.interner.get_or_intern(&m.descriptor);
            let descriptor_id = self.intern_method_descriptor(&m.descriptor)?;
            if m.name == "<clinit>" {
                clinit_id = Some(method_id);
            }
            methods.push(Method::new(m, class_id, descriptor_id, name_symbol, desc_symbol, &class_file.constant_pool)?);
        }
        let method_ids: Vec<MethodId> =
            (0..methods.len()).map(|i| MethodId::from_usize(self.methods.len() + i)).collect();
        let (super_table_size, super_vtable, super_vtable_index) = match super_id.map(|id| &self.classes[id.to_index()]) {
            Some(JvmClass::Instance(c)) => (c.table_size(), c.vtable().to_vec(), c.vtable_index().cloned().unwrap_or_default()),
            _ => (0, Vec::new(), HashMap::new()),
        };
        let methods =
            instance.prepare_methods(methods, method_ids, super_table_size, &super_vtable, &super_vtable_index, &self.interner);
        let _ = instance.base().clinit.set(clinit_id);

        instance.set_declaring_class(class_id);
        self.methods.extend(methods);
        self.classes.push(JvmClass::Instance(instance));
        self.by_name.insert(name_symbol, class_id);

        // Step 7: i-tables, skipped for abstract classes.
        if !is_abstract {
            let itables = self.build_itables(&all_interfaces, class_id);
            if let JvmClass::Instance(c) = &self.classes[class_id.to_index()] {
                c.link_itables(itables);
            }
        }

        // Step 8.
        self.invoke_prepare_hook(class_id);
        Ok(class_id)
    }

    fn add_interface(
        &mut self,
        class_file: ClassFile,
        name_symbol: Symbol,
        class_id: ClassId,
        direct_interfaces: Vec<ClassId>,
    ) -> Result<ClassId, JvmError> {
        let iface = InterfaceClass::load(&class_file, name_symbol);
        let all_interfaces = self.flatten_interfaces(None, &direct_interfaces);
        iface.set_direct_interfaces(direct_interfaces);
        iface.set_all_interfaces(all_interfaces);

        let mut field_entries = Vec::with_capacity(class_file.fields.len());
        for f in &class_file.fields {
            let descriptor = descriptor::parse_field(&f.descriptor)?;
            let _ = self.intern_field_descriptor(&f.descriptor)?;
            let key = FieldKey { name: self.interner.get_or_intern(&f.name), desc: self.interner.get_or_intern(&f.descriptor) };
            let value = match f.constant_value_index {
                Some(idx) => read_constant_value(&class_file.constant_pool, idx, &descriptor)?,
                None => Value::default_for(&descriptor),
            };
            field_entries.push((key, value, f.access_flags));
        }
        iface.link_fields(field_entries);

        let mut methods = Vec::with_capacity(class_file.methods.len());
        let mut clinit_id = None;
        for m in &class_file.methods {
            let method_id = MethodId::from_usize(self.methods.len() + methods.len());
            let name_symbol = self.interner.get_or_intern(&m.name);
            let desc_symbol = self.interner.get_or_intern(&m.descriptor);
            let descriptor_id = self.intern_method_descriptor(&m.descriptor)?;
            if m.name == "<clinit>" {
                clinit_id = Some(method_id);
            }
            methods.push(Method::new(m, class_id, descriptor_id, name_symbol, desc_symbol, &class_file.constant_pool)?);
        }
        let method_ids: Vec<MethodId> =
            (0..methods.len()).map(|i| MethodId::from_usize(self.methods.len() + i)).collect();
        let methods = iface.link_methods(methods, method_ids, &self.interner);
        let _ = iface.base().clinit.set(clinit_id);
        self.methods.extend(methods);

        self.classes.push(JvmClass::Interface(iface));
        self.by_name.insert(name_symbol, class_id);

        self.invoke_prepare_hook(class_id);
        Ok(class_id)
    }

    /// §4.3 step 7 input: this class's interfaces, DFS-flattened with super-interfaces visited
    /// (and pushed) before the interface that names them, so a reversed iteration sees the most
    /// specific interface first (matches `resolution`'s "reverse post-order" assumption).
    fn flatten_interfaces(&self, super_id: Option<ClassId>, direct: &[ClassId]) -> Vec<ClassId> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        if let Some(sid) = super_id {
            if let Some(inherited) = self.classes[sid.to_index()].as_class_like().map(|c| c.get_interfaces()) {
                for &iface in inherited {
                    if seen.insert(iface) {
                        out.push(iface);
                    }
                }
            }
        }
        for &iface in direct {
            self.dfs_interface(iface, &mut out, &mut seen);
        }
        out
    }

    fn dfs_interface(&self, iface: ClassId, out: &mut Vec<ClassId>, seen: &mut HashSet<ClassId>) {
        if !seen.insert(iface) {
            return;
        }
        let supers: Vec<ClassId> = match &self.classes[iface.to_index()] {
            JvmClass::Interface(c) => c.get_direct_interfaces().to_vec(),
            _ => Vec::new(),
        };
        for s in supers {
            self.dfs_interface(s, out, seen);
        }
        out.push(iface);
    }

    /// One i-table per interface in `all_interfaces`, sized by that interface's `table_size`,
    /// filled via method resolution against `class_id` itself (§4.3 step 7).
    fn build_itables(&self, all_interfaces: &[ClassId], class_id: ClassId) -> Vec<ITable> {
        let unresolved = MethodId::from_usize(u32::MAX as usize);
        all_interfaces
            .iter()
            .map(|&interface_id| {
                let JvmClass::Interface(iface) = &self.classes[interface_id.to_index()] else {
                    return ITable { interface_id, vtable: Vec::new() };
                };
                let mut vtable = vec![unresolved; iface.table_size() as usize];
                for (key, declared_id) in iface.declared_methods() {
                    let Some(slot) = self.method(*declared_id).vtable_slot else { continue };
                    if let Some(resolved) = resolution::method_resolution(self, class_id, *key) {
                        let resolved_key = MethodKey { name: resolved.name, desc: resolved.desc };
                        if let Some(resolved_id) = self.class(resolved.class_id).get_static_method_id_opt(resolved_key) {
                            vtable[slot as usize] = resolved_id;
                        }
                    }
                }
                ITable { interface_id, vtable }
            })
            .collect()
    }
}

impl ClassStore for ClassLoader {
    fn class(&self, id: ClassId) -> &JvmClass {
        &self.classes[id.to_index()]
    }

    fn method(&self, id: MethodId) -> &Method {
        &self.methods[id.to_index()]
    }

    fn interner(&self) -> &lasso::ThreadedRodeo {
        &self.interner
    }
}

/// Reads a `ConstantValue` attribute's referenced pool entry as the `Value` its owning field's
/// descriptor calls for. A `String`-typed constant (JVMS §4.7.2, legal and common) needs heap
/// allocation to intern, which the loader doesn't have at link time; see the ledger. Any other
/// descriptor/pool-entry mismatch is a malformed class file.
fn read_constant_value(cp: &ConstantPool, index: u16, descriptor: &Descriptor) -> Result<Value, JvmError> {
    let entry = cp.entry(index)?;
    Ok(match (entry, descriptor) {
        (ConstantPoolEntry::Integer(v), Descriptor::Int) => Value::Int(*v),
        (ConstantPoolEntry::Integer(v), Descriptor::Short) => Value::Short(*v as i16),
        (ConstantPoolEntry::Integer(v), Descriptor::Char) => Value::Char(*v as u16),
        (ConstantPoolEntry::Integer(v), Descriptor::Byte) => Value::Byte(*v as i8),
        (ConstantPoolEntry::Integer(v), Descriptor::Boolean) => Value::Boolean(*v != 0),
        (ConstantPoolEntry::Float(v), Descriptor::Float) => Value::Float(*v),
        (ConstantPoolEntry::Long(v), Descriptor::Long) => Value::Long(*v),
        (ConstantPoolEntry::Double(v), Descriptor::Double) => Value::Double(*v),
        (ConstantPoolEntry::String { .. }, Descriptor::Object(name)) if name == "java/lang/String" => {
            return Err(JvmError::Linkage(crate::error::LinkageError::UnresolvedStringConstant));
        }
        _ => return Err(JvmError::InvariantViolation("ConstantValue type does not match field descriptor")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::AccessFlags;

    struct FixtureClassPath {
        files: HashMap<String, Vec<u8>>,
    }

    impl ClassPath for FixtureClassPath {
        fn find_class(&self, name: &str) -> Option<Vec<u8>> {
            self.files.get(name).cloned()
        }
    }

    struct ClassFileBuilder {
        constants: Vec<ConstantPoolEntry>,
        this_class: String,
        super_class: Option<String>,
        interfaces: Vec<String>,
        fields: Vec<(String, String, bool)>,
        methods: Vec<(String, String, u16)>,
        access_flags: u16,
    }

    impl ClassFileBuilder {
        fn new(this_class: &str) -> Self {
            ClassFileBuilder {
                constants: vec![ConstantPoolEntry::Padding],
                this_class: this_class.to_string(),
                super_class: None,
                interfaces: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
                access_flags: AccessFlags::PUBLIC,
            }
        }

        fn super_class(mut self, name: &str) -> Self {
            self.super_class = Some(name.to_string());
            self
        }

        fn field(mut self, name: &str, desc: &str, is_static: bool) -> Self {
            self.fields.push((name.to_string(), desc.to_string(), is_static));
            self
        }

        /// Adds an abstract method (no `Code` attribute needed, §4.3's dispatch-slot assignment
        /// only cares about the signature and flags).
        fn abstract_method(mut self, name: &str, desc: &str) -> Self {
            self.methods.push((name.to_string(), desc.to_string(), AccessFlags::PUBLIC | AccessFlags::ABSTRACT));
            self
        }

        fn interface_flag(mut self) -> Self {
            self.access_flags |= AccessFlags::INTERFACE | AccessFlags::ABSTRACT;
            self
        }

        fn utf8(&mut self, s: &str) -> u16 {
            if let Some(pos) = self.constants.iter().position(|e| matches!(e, ConstantPoolEntry::Utf8(v) if v == s)) {
                return pos as u16;
            }
            self.constants.push(ConstantPoolEntry::Utf8(s.to_string()));
            (self.constants.len() - 1) as u16
        }

        fn class_ref(&mut self, name: &str) -> u16 {
            let name_index = self.utf8(name);
            self.constants.push(ConstantPoolEntry::Class { name_index });
            (self.constants.len() - 1) as u16
        }

        fn build(mut self) -> Vec<u8> {
            let this_class_name = self.this_class.clone();
            let this_index = self.class_ref(&this_class_name);
            let super_class_name = self.super_class.clone();
            let super_index = super_class_name.as_deref().map(|s| self.class_ref(s));
            let interface_names = self.interfaces.clone();
            let interface_indices: Vec<u16> = interface_names.iter().map(|i| self.class_ref(i)).collect();
            let field_list = self.fields.clone();
            let field_entries: Vec<(u16, u16)> =
                field_list.iter().map(|(name, desc, _)| (self.utf8(name), self.utf8(desc))).collect();
            let method_list = self.methods.clone();
            let method_entries: Vec<(u16, u16)> =
                method_list.iter().map(|(name, desc, _)| (self.utf8(name), self.utf8(desc))).collect();

            let mut bytes = vec![0xCAu8, 0xFE, 0xBA, 0xBE, 0x00, 0x00, 0x00, 0x3D];
            bytes.extend_from_slice(&(self.constants.len() as u16).to_be_bytes());
            for entry in &self.constants[1..] {
                match entry {
                    ConstantPoolEntry::Utf8(s) => {
                        bytes.push(1);
                        bytes.extend_from_slice(&(s.len() as u16).to_be_bytes());
                        bytes.extend_from_slice(s.as_bytes());
                    }
                    ConstantPoolEntry::Class { name_index } => {
                        bytes.push(7);
                        bytes.extend_from_slice(&name_index.to_be_bytes());
                    }
                    _ => unreachable!("test builder only emits Utf8/Class entries"),
                }
            }
            bytes.extend_from_slice(&self.access_flags.to_be_bytes());
            bytes.extend_from_slice(&this_index.to_be_bytes());
            bytes.extend_from_slice(&super_index.unwrap_or(0).to_be_bytes());
            bytes.extend_from_slice(&(interface_indices.len() as u16).to_be_bytes());
            for idx in interface_indices {
                bytes.extend_from_slice(&idx.to_be_bytes());
            }
            bytes.extend_from_slice(&(field_entries.len() as u16).to_be_bytes());
            for ((_, _, is_static), (name_idx, desc_idx)) in field_list.iter().zip(field_entries) {
                let flags = if *is_static { AccessFlags::STATIC | AccessFlags::PUBLIC } else { AccessFlags::PUBLIC };
                bytes.extend_from_slice(&flags.to_be_bytes());
                bytes.extend_from_slice(&name_idx.to_be_bytes());
                bytes.extend_from_slice(&desc_idx.to_be_bytes());
                bytes.extend_from_slice(&0u16.to_be_bytes()); // attributes_count
            }
            bytes.extend_from_slice(&(method_entries.len() as u16).to_be_bytes());
            for ((_, _, flags), (name_idx, desc_idx)) in method_list.iter().zip(method_entries) {
                bytes.extend_from_slice(&flags.to_be_bytes());
                bytes.extend_from_slice(&name_idx.to_be_bytes());
                bytes.extend_from_slice(&desc_idx.to_be_bytes());
                bytes.extend_from_slice(&0u16.to_be_bytes()); // attributes_count
            }
            bytes.extend_from_slice(&0u16.to_be_bytes()); // class attributes_count
            bytes
        }
    }

    fn loader_with(files: Vec<(&str, Vec<u8>)>) -> ClassLoader {
        let files = files.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        ClassLoader::new(Box::new(FixtureClassPath { files }))
    }

    #[test]
    fn missing_class_surfaces_class_not_found() {
        let mut loader = loader_with(vec![]);
        let err = loader.for_name(&Descriptor::Object("does/not/Exist".to_string())).unwrap_err();
        assert!(matches!(err, JvmError::ClassNotFound(name) if name == "does/not/Exist"));
    }

    #[test]
    fn loading_the_same_class_twice_returns_the_same_id() {
        let object_bytes = ClassFileBuilder::new("java/lang/Object").build();
        let mut loader = loader_with(vec![("java/lang/Object", object_bytes)]);
        let first = loader.for_name(&Descriptor::Object("java/lang/Object".to_string())).unwrap();
        let second = loader.for_name(&Descriptor::Object("java/lang/Object".to_string())).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn instance_fields_are_laid_out_and_gc_mask_records_the_reference_field() {
        let object_bytes = ClassFileBuilder::new("java/lang/Object").build();
        let point_bytes = ClassFileBuilder::new("Point")
            .super_class("java/lang/Object")
            .field("x", "I", false)
            .field("name", "Ljava/lang/String;", false)
            .build();
        let mut loader = loader_with(vec![("java/lang/Object", object_bytes), ("Point", point_bytes)]);
        let point_id = loader.for_name(&Descriptor::Object("Point".to_string())).unwrap();
        let JvmClass::Instance(point) = loader.class(point_id) else { panic!("expected instance class") };
        assert_eq!(point.instance_fields().len(), 2);
        assert_eq!(point.gc_mask().len(), 1);
    }

    #[test]
    fn subclass_inherits_interfaces_flattened_from_its_superclass() {
        let object_bytes = ClassFileBuilder::new("java/lang/Object").build();
        let runnable_bytes = ClassFileBuilder::new("Runnable").interface_flag().build();
        let base_bytes = ClassFileBuilder::new("Base").super_class("java/lang/Object").build();
        let mut loader = loader_with(vec![
            ("java/lang/Object", object_bytes),
            ("Runnable", runnable_bytes),
            ("Base", base_bytes),
        ]);
        loader.for_name(&Descriptor::Object("Base".to_string())).unwrap();
        let mut task = ClassFileBuilder::new("Task");
        task.super_class = Some("Base".to_string());
        task.interfaces.push("Runnable".to_string());
        let runnable_id = loader.for_name(&Descriptor::Object("Runnable".to_string())).unwrap();
        let task_id = loader.add(&task.build()).unwrap();
        let JvmClass::Instance(task_class) = loader.class(task_id) else { panic!("expected instance class") };
        assert_eq!(task_class.get_interfaces(), &[runnable_id]);
    }

    #[test]
    fn table_sizes_and_itables_match_declared_and_inherited_methods() {
        let object_bytes = ClassFileBuilder::new("java/lang/Object").build();
        let i_bytes = ClassFileBuilder::new("I").interface_flag().abstract_method("foo", "()V").build();
        let mut loader = loader_with(vec![("java/lang/Object", object_bytes), ("I", i_bytes)]);
        let i_id = loader.for_name(&Descriptor::Object("I".to_string())).unwrap();

        let mut c = ClassFileBuilder::new("C").super_class("java/lang/Object").abstract_method("bar", "()V").abstract_method(
            "baz", "()V",
        );
        c.interfaces.push("I".to_string());
        let c_id = loader.add(&c.build()).unwrap();

        let JvmClass::Interface(iface) = loader.class(i_id) else { panic!("expected interface class") };
        assert_eq!(iface.table_size(), 1);

        let JvmClass::Instance(c_class) = loader.class(c_id) else { panic!("expected instance class") };
        assert_eq!(c_class.table_size(), 2);
        let itables = c_class.itables();
        assert_eq!(itables.len(), 1);
        assert_eq!(itables[0].interface_id, i_id);
        assert_eq!(itables[0].vtable.len(), 1);
    }

    #[test]
    fn array_class_is_cached_after_first_creation() {
        let object_bytes = ClassFileBuilder::new("java/lang/Object").build();
        let mut loader = loader_with(vec![("java/lang/Object", object_bytes)]);
        let array_descriptor = Descriptor::Array(Box::new(Descriptor::Int));
        let first = loader.for_name(&array_descriptor).unwrap();
        let second = loader.for_name(&array_descriptor).unwrap();
        assert_eq!(first, second);
        assert!(loader.class(first).is_array());
    }
}
