//! String interning (§4.7): canonicalizes Java string literals to a single `String` object per
//! distinct (bytes, encoding) pair, storing them on the managed heap and participating in
//! collection as a root provider so the dedup table survives relocation.

use super::{GarbageCollector, HeapLayout, HeapRef, RootProvider, UnwindContext};
use crate::error::JvmError;
use crate::keys::{ClassId, FieldKey};
use crate::rt::class::InstanceClass;
use std::collections::HashMap;

/// Java's compact string representation: LATIN-1 when every code point fits in a byte,
/// otherwise UTF-16BE (JEP 254).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Encoding {
    Latin1,
    Utf16Be,
}

/// Converts UTF-8 text to `(bytes, encoding)` in Java's compact form.
fn compact_encode(text: &str) -> (Vec<u8>, Encoding) {
    if text.chars().all(|c| (c as u32) <= 0xFF) {
        let bytes = text.chars().map(|c| c as u8).collect();
        (bytes, Encoding::Latin1)
    } else {
        let mut bytes = Vec::with_capacity(text.len() * 2);
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        (bytes, Encoding::Utf16Be)
    }
}

const VALUE_OFFSET: usize = 16;
const CODER_OFFSET: usize = 24;
const HASH_OFFSET: usize = 28;
const HASH_IS_ZERO_OFFSET: usize = 32;

/// Asserts `java/lang/String`'s loaded field layout matches the fixed offsets the interner
/// hardcodes. A mismatch means a JDK whose `String` shape this crate cannot safely poke at.
fn validate_layout(string_class: &InstanceClass, interner: &lasso::ThreadedRodeo) -> Result<(), JvmError> {
    let check = |name: &str, desc: &str, expected: usize| -> Result<(), JvmError> {
        let key = FieldKey { name: interner.get_or_intern(name), desc: interner.get_or_intern(desc) };
        let field = string_class
            .get_instance_field(key)
            .ok_or(JvmError::Linkage(crate::error::LinkageError::FieldOffsetMismatch {
                field: "missing",
                expected,
                actual: 0,
            }))?;
        if field.offset != expected {
            return Err(JvmError::Linkage(crate::error::LinkageError::FieldOffsetMismatch {
                field: "string field",
                expected,
                actual: field.offset,
            }));
        }
        Ok(())
    };
    check("value", "[B", VALUE_OFFSET)?;
    check("coder", "B", CODER_OFFSET)?;
    check("hash", "I", HASH_OFFSET)?;
    check("hashIsZero", "Z", HASH_IS_ZERO_OFFSET)?;
    Ok(())
}

/// Dedups interned strings by their compact encoding and keeps every live one rooted across
/// collections.
pub struct StringInterner {
    string_class_id: ClassId,
    byte_array_class_id: ClassId,
    entries: HashMap<(Vec<u8>, Encoding), HeapRef>,
}

impl StringInterner {
    /// Validates `string_class`'s field layout and returns an interner bound to it. `interner`
    /// is the symbol table, used only to build the field lookup keys.
    pub fn new(
        string_class: &InstanceClass,
        string_class_id: ClassId,
        byte_array_class_id: ClassId,
        interner: &lasso::ThreadedRodeo,
    ) -> Result<Self, JvmError> {
        validate_layout(string_class, interner)?;
        Ok(StringInterner { string_class_id, byte_array_class_id, entries: HashMap::new() })
    }

    /// Returns the canonical `String` object for `text`, allocating a new one (plus its backing
    /// byte array) on first sight of this exact (bytes, encoding) pair.
    pub fn intern(
        &mut self,
        gc: &mut GarbageCollector,
        layout: &dyn HeapLayout,
        unwind: &mut dyn UnwindContext,
        text: &str,
    ) -> Result<HeapRef, JvmError> {
        let (bytes, encoding) = compact_encode(text);
        if let Some(&existing) = self.entries.get(&(bytes.clone(), encoding)) {
            return Ok(existing);
        }

        let array_size = 8 + bytes.len();
        let array_ref = gc.allocate(layout, unwind, self.byte_array_class_id, array_size)?;
        gc.write_byte_array_payload(array_ref, &bytes);

        let string_size = layout.instance_size(self.string_class_id);
        let string_ref = gc.allocate(layout, unwind, self.string_class_id, string_size)?;
        gc.write_reference_field(string_ref, VALUE_OFFSET, Some(array_ref));
        gc.write_byte_field(string_ref, CODER_OFFSET, if encoding == Encoding::Latin1 { 0 } else { 1 });
        gc.write_int_field(string_ref, HASH_OFFSET, 0);
        gc.write_byte_field(string_ref, HASH_IS_ZERO_OFFSET, 1);

        self.entries.insert((bytes, encoding), string_ref);
        Ok(string_ref)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decodes an interned reference back to its original text (§8: `intern(s).to_utf8() == s`).
    /// `r` must be a reference this interner produced; any other reference's `coder`/`value`
    /// bytes would decode to nonsense.
    pub fn to_utf8(&self, gc: &GarbageCollector, r: HeapRef) -> String {
        let coder = gc.read_byte_field(r, CODER_OFFSET);
        let value_ref = gc.read_reference_field(r, VALUE_OFFSET).expect("interned string has a value array");
        let bytes = gc.read_byte_array_payload(value_ref);
        if coder == 0 {
            bytes.iter().map(|&b| b as char).collect()
        } else {
            let units: Vec<u16> = bytes.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect();
            String::from_utf16(&units).expect("interned UTF-16BE payload is well-formed")
        }
    }
}

impl RootProvider for StringInterner {
    fn add_root_objects(&self, visit: &mut dyn FnMut(HeapRef)) {
        for &r in self.entries.values() {
            visit(r);
        }
    }

    fn relocate_roots(&mut self, forward: &dyn Fn(HeapRef) -> HeapRef) {
        for r in self.entries.values_mut() {
            *r = forward(*r);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin1_text_encodes_one_byte_per_char() {
        let (bytes, encoding) = compact_encode("hello");
        assert_eq!(encoding, Encoding::Latin1);
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn non_latin1_text_encodes_as_utf16_big_endian() {
        let (bytes, encoding) = compact_encode("h\u{1F600}");
        assert_eq!(encoding, Encoding::Utf16Be);
        // 'h' (U+0068) as one BE code unit, then the surrogate pair for U+1F600.
        assert_eq!(&bytes[0..2], &[0x00, 0x68]);
        assert_eq!(bytes.len(), 2 + 4);
    }

    #[test]
    fn interning_the_same_text_twice_returns_the_same_reference() {
        let (a, enc_a) = compact_encode("same");
        let (b, enc_b) = compact_encode("same");
        assert_eq!((a, enc_a), (b, enc_b));
    }

    struct FlatLayout {
        string_size: usize,
    }

    impl HeapLayout for FlatLayout {
        fn instance_size(&self, _class_id: ClassId) -> usize {
            self.string_size
        }
        fn gc_mask(&self, _class_id: ClassId) -> &[usize] {
            &[]
        }
        fn is_reference_array(&self, _class_id: ClassId) -> bool {
            false
        }
    }

    /// Builds a `StringInterner` bound to a from-scratch `java/lang/String` layout whose field
    /// offsets happen to match the hardcoded constants, plus a small heap to intern into.
    fn fixture() -> (StringInterner, GarbageCollector, FlatLayout) {
        use crate::rt::class::{InstanceClass, UnlinkedField};
        use crate::keys::FieldDescriptorId;
        use crate::classfile::AccessFlags;

        let interner = lasso::ThreadedRodeo::default();
        let string_class = InstanceClass::new(interner.get_or_intern("java/lang/String"), AccessFlags(AccessFlags::PUBLIC), None);
        // `link_fields` lays fields out in declaration order, 16 bytes past the (simulated)
        // superclass field area, which reproduces the real `java/lang/String` offsets this
        // interner hardcodes.
        let unlinked = vec![
            ("value", "[B"),
            ("coder", "B"),
            ("hash", "I"),
            ("hashIsZero", "Z"),
        ]
        .into_iter()
        .map(|(name, desc)| UnlinkedField {
            key: FieldKey { name: interner.get_or_intern(name), desc: interner.get_or_intern(desc) },
            descriptor: crate::descriptor::parse_field(desc).unwrap(),
            descriptor_id: FieldDescriptorId::from_usize(0),
            flags: AccessFlags(AccessFlags::PRIVATE),
            constant_value: None,
        })
        .collect();
        string_class.link_fields(unlinked, 16, &[]).unwrap();

        let string_class_id = ClassId::from_usize(0);
        let byte_array_class_id = ClassId::from_usize(1);
        let string_interner = StringInterner::new(&string_class, string_class_id, byte_array_class_id, &interner).unwrap();
        let layout = FlatLayout { string_size: 40 };
        let gc = GarbageCollector::new(4096);
        (string_interner, gc, layout)
    }

    /// Scenario 6: interning "hi" and "日本" produces distinct objects with the expected coder
    /// byte (0 for LATIN-1, 1 for UTF-16BE), and re-interning "hi" returns the same reference.
    #[test]
    fn interning_latin1_and_wide_text_yields_distinct_objects_with_correct_coder() {
        use super::super::SyntheticUnwindContext;

        let (mut string_interner, mut gc, layout) = fixture();
        let mut unwind = SyntheticUnwindContext::default();

        let hi = string_interner.intern(&mut gc, &layout, &mut unwind, "hi").unwrap();
        let nihon = string_interner.intern(&mut gc, &layout, &mut unwind, "\u{65e5}\u{672c}").unwrap();
        let hi_again = string_interner.intern(&mut gc, &layout, &mut unwind, "hi").unwrap();

        assert_eq!(hi, hi_again);
        assert_ne!(hi, nihon);
        assert_eq!(string_interner.len(), 2);
    }

    /// §8 interner-idempotence property's other half: `intern(s).to_utf8() == s`.
    #[test]
    fn interned_text_round_trips_through_to_utf8() {
        use super::super::SyntheticUnwindContext;

        let (mut string_interner, mut gc, layout) = fixture();
        let mut unwind = SyntheticUnwindContext::default();

        let hi = string_interner.intern(&mut gc, &layout, &mut unwind, "hi").unwrap();
        let nihon = string_interner.intern(&mut gc, &layout, &mut unwind, "\u{65e5}\u{672c}").unwrap();

        assert_eq!(string_interner.to_utf8(&gc, hi), "hi");
        assert_eq!(string_interner.to_utf8(&gc, nihon), "\u{65e5}\u{672c}");
    }
}
