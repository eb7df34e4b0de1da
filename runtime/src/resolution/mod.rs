//! Method resolution and selection (§4.4, JVM §5.4.3-5.4.6).
//!
//! Operates over a `ClassStore` seam rather than a concrete class loader so it can be unit
//! tested against a small in-memory fixture without constructing a real class graph.

use crate::keys::{ClassId, MethodId, MethodKey, Symbol};
use crate::rt::method::Method;
use crate::rt::{ClassLike, JvmClass};

/// The lookups the resolution algorithms need from the class-object store. A real
/// implementation is the class loader itself; tests use a small fixture.
pub trait ClassStore {
    fn class(&self, id: ClassId) -> &JvmClass;
    fn method(&self, id: MethodId) -> &Method;
    fn interner(&self) -> &lasso::ThreadedRodeo;
}

fn declared_method<'a>(store: &'a dyn ClassStore, class_id: ClassId, key: MethodKey) -> Option<&'a Method> {
    let id = match store.class(class_id) {
        JvmClass::Instance(c) => c.declared_method_id(key),
        JvmClass::Interface(c) => c.declared_method_id(key),
        _ => None,
    }?;
    Some(store.method(id))
}

/// `class_id` followed by every superclass, root (`Object`) last.
fn superclass_chain(store: &dyn ClassStore, class_id: ClassId) -> Vec<ClassId> {
    let mut chain = vec![class_id];
    let mut current = class_id;
    while let Some(super_id) = store.class(current).get_super_id() {
        chain.push(super_id);
        current = super_id;
    }
    chain
}

fn all_interfaces(store: &dyn ClassStore, class_id: ClassId) -> Vec<ClassId> {
    match store.class(class_id) {
        JvmClass::Instance(c) => c.get_interfaces().to_vec(),
        JvmClass::Interface(c) => c.get_interfaces().to_vec(),
        _ => Vec::new(),
    }
}

fn class_name(store: &dyn ClassStore, class_id: ClassId) -> Symbol {
    store.class(class_id).name()
}

fn package_of<'a>(name: &'a str) -> &'a str {
    match name.rfind('/') {
        Some(idx) => &name[..idx],
        None => "",
    }
}

fn same_package(store: &dyn ClassStore, a: ClassId, b: ClassId) -> bool {
    let interner = store.interner();
    let a = interner.resolve(&class_name(store, a));
    let b = interner.resolve(&class_name(store, b));
    package_of(a) == package_of(b)
}

/// §5.4.5: whether a candidate method declared in `candidate_class` can override a resolved
/// method declared in `resolved_class`, given the candidate's own access flags.
fn can_override(
    store: &dyn ClassStore,
    candidate: &Method,
    candidate_class: ClassId,
    resolved_class: ClassId,
) -> bool {
    if candidate.flags.is_private {
        return false;
    }
    if candidate.flags.is_public || candidate.flags.is_protected {
        return true;
    }
    same_package(store, candidate_class, resolved_class)
}

/// §4.4 "Method resolution", starting at class `class_id`.
pub fn method_resolution<'a>(store: &'a dyn ClassStore, class_id: ClassId, key: MethodKey) -> Option<&'a Method> {
    for super_id in superclass_chain(store, class_id) {
        if let Some(m) = declared_method(store, super_id, key) {
            return Some(m);
        }
    }

    // Reverse post-order over the flattened DFS interface list approximates "sub-interfaces
    // first" well enough for the acyclic interface DAGs this loader admits.
    let interfaces = all_interfaces(store, class_id);
    for &iface in interfaces.iter().rev() {
        if let Some(m) = declared_method(store, iface, key) {
            if !m.flags.is_abstract {
                return Some(m);
            }
        }
    }
    for &iface in interfaces.iter().rev() {
        if let Some(m) = declared_method(store, iface, key) {
            if !m.flags.is_private && !m.flags.is_static {
                return Some(m);
            }
        }
    }
    None
}

/// §4.4 "Interface method resolution", starting at interface `interface_id`.
pub fn interface_method_resolution<'a>(
    store: &'a dyn ClassStore,
    interface_id: ClassId,
    object_class_id: ClassId,
    key: MethodKey,
) -> Option<&'a Method> {
    if let Some(m) = declared_method(store, interface_id, key) {
        return Some(m);
    }
    if let Some(m) = declared_method(store, object_class_id, key) {
        if m.flags.is_public && !m.flags.is_static {
            return Some(m);
        }
    }
    let interfaces = all_interfaces(store, interface_id);
    for &iface in interfaces.iter().rev() {
        if let Some(m) = declared_method(store, iface, key) {
            if !m.flags.is_abstract {
                return Some(m);
            }
        }
    }
    for &iface in interfaces.iter().rev() {
        if let Some(m) = declared_method(store, iface, key) {
            if !m.flags.is_private && !m.flags.is_static {
                return Some(m);
            }
        }
    }
    None
}

/// §4.4 "Special method resolution". `call_context_id` is `None` for the synthetic top-level
/// caller (no re-resolution is possible without a call context).
pub fn special_method_resolution<'a>(
    store: &'a dyn ClassStore,
    start_class_id: ClassId,
    object_class_id: ClassId,
    key: MethodKey,
    call_context_id: Option<ClassId>,
    call_context_has_acc_super: bool,
) -> Option<(ClassId, &'a Method)> {
    let is_interface = matches!(store.class(start_class_id), JvmClass::Interface(_));
    let resolved = if is_interface {
        interface_method_resolution(store, start_class_id, object_class_id, key)
    } else {
        method_resolution(store, start_class_id, key)
    }?;
    let resolved_class = resolved.class_id;

    let Some(call_context) = call_context_id else {
        return Some((resolved_class, resolved));
    };
    let is_instance_init = store.interner().resolve(&resolved.name) == "<init>";
    let resolved_is_class = !matches!(store.class(resolved_class), JvmClass::Interface(_));
    let resolved_is_true_superclass =
        superclass_chain(store, call_context).iter().skip(1).any(|&c| c == resolved_class);

    if is_instance_init || !resolved_is_class || !resolved_is_true_superclass || !call_context_has_acc_super {
        return Some((resolved_class, resolved));
    }

    let Some(direct_super) = store.class(call_context).get_super_id() else {
        return Some((resolved_class, resolved));
    };
    let resolved = method_resolution(store, direct_super, key)?;
    Some((resolved.class_id, resolved))
}

/// Whether `b`'s name is one of the three types every array class is assignable to (§3 "Array
/// class object" invariant: `bases[]` is always `{Object, Cloneable, Serializable}`).
fn is_array_supertype(store: &dyn ClassStore, b: ClassId) -> bool {
    matches!(store.interner().resolve(&class_name(store, b)), "java/lang/Object" | "java/lang/Cloneable" | "java/io/Serializable")
}

fn component_subtype_compatible(store: &dyn ClassStore, a: ClassId, b: ClassId) -> bool {
    match (store.class(a), store.class(b)) {
        (JvmClass::InstanceArray(x), JvmClass::InstanceArray(y)) => {
            would_be_instance_of(store, x.element_class_id, y.element_class_id)
        }
        (JvmClass::PrimitiveArray(x), JvmClass::PrimitiveArray(y)) => {
            std::mem::discriminant(&x.element_type) == std::mem::discriminant(&y.element_type)
        }
        _ => false,
    }
}

/// §8 "Subtyping": whether a value of class `a` would pass `instanceof b`. For non-array
/// classes, `b` in `a`'s transitive base set (superclasses plus all flattened interfaces); for
/// arrays, component-type compatibility or `b` being one of `{Object, Cloneable, Serializable}`.
pub fn would_be_instance_of(store: &dyn ClassStore, a: ClassId, b: ClassId) -> bool {
    if a == b {
        return true;
    }
    let a_is_array = matches!(store.class(a), JvmClass::InstanceArray(_) | JvmClass::PrimitiveArray(_));
    let b_is_array = matches!(store.class(b), JvmClass::InstanceArray(_) | JvmClass::PrimitiveArray(_));
    if a_is_array {
        return if b_is_array { component_subtype_compatible(store, a, b) } else { is_array_supertype(store, b) };
    }
    if b_is_array {
        return false;
    }
    superclass_chain(store, a).contains(&b) || all_interfaces(store, a).contains(&b)
}

/// §4.4 "Method selection" for virtual dispatch from a receiver of class `receiver_class_id`.
pub fn method_selection<'a>(
    store: &'a dyn ClassStore,
    receiver_class_id: ClassId,
    resolved: &Method,
) -> Option<&'a Method> {
    if resolved.flags.is_private {
        return declared_method(store, resolved.class_id, MethodKey { name: resolved.name, desc: resolved.desc });
    }

    let key = MethodKey { name: resolved.name, desc: resolved.desc };
    for class_id in superclass_chain(store, receiver_class_id) {
        if let Some(m) = declared_method(store, class_id, key) {
            if !m.flags.is_static && can_override(store, m, class_id, resolved.class_id) {
                return Some(m);
            }
        }
    }

    for &iface in all_interfaces(store, receiver_class_id).iter().rev() {
        if let Some(m) = declared_method(store, iface, key) {
            if !m.flags.is_static && !m.flags.is_private && !m.flags.is_abstract && can_override(store, m, iface, resolved.class_id) {
                return Some(m);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::AccessFlags;
    use crate::keys::{FieldDescriptorId, MethodDescriptorId};
    use crate::rt::class::InstanceClass;
    use crate::rt::interface::InterfaceClass;
    use crate::rt::method::{MethodBody, MethodFlags};
    use std::collections::HashMap;

    struct Fixture {
        classes: Vec<JvmClass>,
        methods: Vec<Method>,
        interner: lasso::ThreadedRodeo,
    }

    impl ClassStore for Fixture {
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

    fn make_method(class_id: ClassId, name: Symbol, desc: Symbol, flags: AccessFlags, abstract_body: bool) -> Method {
        Method {
            class_id,
            name,
            desc,
            descriptor_id: MethodDescriptorId::from_usize(0),
            flags: MethodFlags::from(flags),
            body: if abstract_body { MethodBody::Abstract } else { MethodBody::Native },
            vtable_slot: None,
        }
    }

    /// `Object <- Base <- Derived`, `Derived` overrides `Base.greet()`.
    fn build_fixture() -> (Fixture, MethodKey) {
        let interner = lasso::ThreadedRodeo::default();
        let greet = interner.get_or_intern("greet");
        let desc = interner.get_or_intern("()V");
        let key = MethodKey { name: greet, desc };

        let object_id = ClassId::from_usize(0);
        let base_id = ClassId::from_usize(1);
        let derived_id = ClassId::from_usize(2);

        let object_class = InstanceClass::new(interner.get_or_intern("java/lang/Object"), AccessFlags(AccessFlags::PUBLIC), None);

        let base_class = InstanceClass::new(interner.get_or_intern("Base"), AccessFlags(AccessFlags::PUBLIC), Some(object_id));
        let base_method = make_method(base_id, greet, desc, AccessFlags(AccessFlags::PUBLIC), false);
        base_class.prepare_methods(vec![base_method], vec![MethodId::from_usize(0)], 0, &[], &HashMap::new(), &interner);

        let derived_class = InstanceClass::new(interner.get_or_intern("Derived"), AccessFlags(AccessFlags::PUBLIC), Some(base_id));
        let derived_method = make_method(derived_id, greet, desc, AccessFlags(AccessFlags::PUBLIC), false);
        derived_class.prepare_methods(vec![derived_method], vec![MethodId::from_usize(1)], 1, &[MethodId::from_usize(0)], &{
            let mut m = HashMap::new();
            m.insert(key, 0u16);
            m
        }, &interner);

        let methods = vec![
            make_method(base_id, greet, desc, AccessFlags(AccessFlags::PUBLIC), false),
            make_method(derived_id, greet, desc, AccessFlags(AccessFlags::PUBLIC), false),
        ];

        let fixture = Fixture {
            classes: vec![JvmClass::Instance(object_class), JvmClass::Instance(base_class), JvmClass::Instance(derived_class)],
            methods,
            interner,
        };
        (fixture, key)
    }

    #[test]
    fn method_resolution_finds_method_on_direct_superclass() {
        let (fixture, key) = build_fixture();
        let base_id = ClassId::from_usize(1);
        let resolved = method_resolution(&fixture, base_id, key).unwrap();
        assert_eq!(resolved.class_id, base_id);
    }

    #[test]
    fn method_selection_picks_overriding_declaration_on_receiver() {
        let (fixture, key) = build_fixture();
        let base_id = ClassId::from_usize(1);
        let derived_id = ClassId::from_usize(2);
        let resolved = method_resolution(&fixture, base_id, key).unwrap();
        let selected = method_selection(&fixture, derived_id, resolved).unwrap();
        assert_eq!(selected.class_id, derived_id);
    }

    #[test]
    fn would_be_instance_of_holds_for_superclasses_but_not_siblings() {
        let (fixture, _) = build_fixture();
        let object_id = ClassId::from_usize(0);
        let base_id = ClassId::from_usize(1);
        let derived_id = ClassId::from_usize(2);
        assert!(would_be_instance_of(&fixture, derived_id, base_id));
        assert!(would_be_instance_of(&fixture, derived_id, object_id));
        assert!(!would_be_instance_of(&fixture, base_id, derived_id));
    }

    #[test]
    fn array_would_be_instance_of_object_cloneable_and_serializable() {
        use crate::rt::array::ObjectArrayClass;

        let interner = lasso::ThreadedRodeo::default();
        let object_id = ClassId::from_usize(0);
        let string_id = ClassId::from_usize(1);
        let string_array_id = ClassId::from_usize(2);
        let int_array_id = ClassId::from_usize(3);
        let object_class = InstanceClass::new(interner.get_or_intern("java/lang/Object"), AccessFlags(AccessFlags::PUBLIC), None);
        let string_class = InstanceClass::new(interner.get_or_intern("java/lang/String"), AccessFlags(AccessFlags::PUBLIC), Some(object_id));
        let string_array = ObjectArrayClass::new(interner.get_or_intern("[Ljava/lang/String;"), object_id, string_id, Vec::new(), HashMap::new());
        let int_array = crate::rt::array::PrimitiveArrayClass::new(
            interner.get_or_intern("[I"),
            object_id,
            crate::descriptor::Descriptor::Int,
            Vec::new(),
            HashMap::new(),
        );

        let fixture = Fixture {
            classes: vec![
                JvmClass::Instance(object_class),
                JvmClass::Instance(string_class),
                JvmClass::InstanceArray(string_array),
                JvmClass::PrimitiveArray(int_array),
            ],
            methods: Vec::new(),
            interner,
        };

        assert!(would_be_instance_of(&fixture, string_array_id, object_id));
        assert!(would_be_instance_of(&fixture, int_array_id, object_id));
        assert!(!would_be_instance_of(&fixture, string_array_id, string_id));
    }
}
