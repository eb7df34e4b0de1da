//! The managed heap: a semi-space copying garbage collector driven by stack maps and
//! registered root providers (§4.6).

pub mod string_interner;

use crate::descriptor::POINTER_SIZE;
use crate::error::JvmError;
use crate::keys::ClassId;
use crate::roots::FrameStack;
use std::collections::HashMap;

/// Offset of an object's header within one of the GC's two spaces. Stable across a single
/// collection; a collection invalidates every previously-issued `HeapRef` pointing into the
/// space that was `from` (callers must go through the GC's root/stack-map machinery to have
/// their references updated, exactly as §3's "Java object" lifecycle describes).
pub type HeapRef = usize;

const HEADER_ALIGN: usize = 8;
/// Lowest offset ever handed out by `allocate`; keeps `0` free to mean "no reference" in raw
/// heap-internal pointer fields.
const NULL_RESERVE: usize = HEADER_ALIGN;

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Every heap object begins with a class-object pointer (§3 invariant). The mark bit used
/// during collection is stolen from that pointer's low bit rather than kept in a side bitmap,
/// per §9's "tagged form... chosen here for cache locality" resolution; `ClassId` stands in for
/// the real pointer since this crate never emits machine code that dereferences it directly.
#[repr(C)]
#[derive(Clone, Copy)]
struct ObjectHeader {
    tagged_class: u32,
    size: u32,
}

impl ObjectHeader {
    const SIZE: usize = size_of::<ObjectHeader>();

    fn new(class_id: ClassId, size: u32) -> Self {
        ObjectHeader { tagged_class: (class_id.to_index() as u32) << 1, size }
    }

    fn class_id(self) -> ClassId {
        ClassId::from_usize((self.tagged_class >> 1) as usize)
    }

    fn is_marked(self) -> bool {
        self.tagged_class & 1 != 0
    }

    fn set_marked(&mut self, marked: bool) {
        if marked {
            self.tagged_class |= 1;
        } else {
            self.tagged_class &= !1;
        }
    }
}

const _: () = assert!(ObjectHeader::SIZE == 8);

/// The per-class information the GC needs without depending on the class-object store crate
/// module directly (avoids a `heap` <-> `rt` dependency cycle).
pub trait HeapLayout {
    /// Total bytes (header included) for a non-array instance of this class.
    fn instance_size(&self, class_id: ClassId) -> usize;
    /// Pointer-sized-word offsets of reference-typed instance fields, header included in the
    /// offset base (§3 invariant: "`gc_mask` enumerates exactly the offsets of reference-typed
    /// instance fields").
    fn gc_mask(&self, class_id: ClassId) -> &[usize];
    /// Whether this class is an array of references (its payload is walked word-by-word rather
    /// than through `gc_mask`).
    fn is_reference_array(&self, class_id: ClassId) -> bool;
}

/// One (base, derived) pointer pair the JIT spilled into a stack frame at a given instruction
/// pointer (§3 "Stack map entry"). `base_register`/`derived_register` are DWARF register
/// numbers; `derived_register` is `None` when the frame only holds a direct, non-interior
/// reference.
#[derive(Debug, Clone, Copy)]
pub struct StackMapEntry {
    pub base_register: u16,
    pub derived_register: Option<u16>,
}

/// One currently-active call frame, abstracted so root-gathering and fixup don't depend on a
/// concrete unwinder (§9 "Stack walking via unwind"). The default, libunwind-backed
/// implementation lives outside this crate's concern; a synthetic implementation is enough to
/// exercise the GC in tests.
pub trait StackFrame {
    fn program_counter(&self) -> usize;
    fn read_register(&self, reg: u16) -> usize;
    fn write_register(&mut self, reg: u16, value: usize);
}

/// Supplies the set of currently-active frames to walk during a collection.
pub trait UnwindContext {
    fn frames(&mut self) -> Vec<&mut dyn StackFrame>;
}

/// A source of roots living outside the managed heap (§4.6 "Root providers"): the string
/// interner's side allocator, the class-object store's static-reference slots, or any other
/// external heap that may point at managed objects.
pub trait RootProvider {
    /// Every object this provider currently keeps alive.
    fn add_root_objects(&self, visit: &mut dyn FnMut(HeapRef));
    /// Called after copying, once per surviving object, to let the provider rewrite its own
    /// stored references through the forwarding map.
    fn relocate_roots(&mut self, forward: &dyn Fn(HeapRef) -> HeapRef);
}

/// An in-process stand-in for a real unwinder, used by tests and by any caller that doesn't
/// have a live call stack to walk (e.g. between compiled-code invocations).
#[derive(Debug, Default)]
pub struct SyntheticUnwindContext {
    frames: Vec<SyntheticFrame>,
}

#[derive(Debug, Clone)]
pub struct SyntheticFrame {
    pub program_counter: usize,
    pub registers: HashMap<u16, usize>,
}

impl StackFrame for SyntheticFrame {
    fn program_counter(&self) -> usize {
        self.program_counter
    }
    fn read_register(&self, reg: u16) -> usize {
        *self.registers.get(&reg).unwrap_or(&0)
    }
    fn write_register(&mut self, reg: u16, value: usize) {
        self.registers.insert(reg, value);
    }
}

impl SyntheticUnwindContext {
    pub fn push(&mut self, frame: SyntheticFrame) {
        self.frames.push(frame);
    }
}

impl UnwindContext for SyntheticUnwindContext {
    fn frames(&mut self) -> Vec<&mut dyn StackFrame> {
        self.frames.iter_mut().map(|f| f as &mut dyn StackFrame).collect()
    }
}

/// The semi-space copying collector and managed heap (§4.6). One `from` and one `to` region of
/// equal size; allocation bumps a pointer in `from`, collection copies everything reachable
/// into `to` and swaps their roles.
pub struct GarbageCollector {
    heap_size: usize,
    space_a: Box<[u8]>,
    space_b: Box<[u8]>,
    from_is_a: bool,
    next: usize,
    stack_map: HashMap<usize, Vec<StackMapEntry>>,
    static_roots: crate::roots::RootList,
    local_roots: FrameStack,
    root_providers: Vec<Box<dyn RootProvider>>,
}

impl GarbageCollector {
    pub fn new(heap_size: usize) -> Self {
        GarbageCollector {
            heap_size,
            space_a: vec![0u8; heap_size].into_boxed_slice(),
            space_b: vec![0u8; heap_size].into_boxed_slice(),
            from_is_a: true,
            // Offset 0 is reserved so a `HeapRef` of 0 can double as "no reference" in raw
            // in-heap pointer fields (array payloads, object fields) without an `Option` wrapper.
            next: NULL_RESERVE,
            stack_map: HashMap::new(),
            static_roots: crate::roots::RootList::new(),
            local_roots: FrameStack::new(),
            root_providers: Vec::new(),
        }
    }

    pub fn heap_size(&self) -> usize {
        self.heap_size
    }

    pub fn add_stackmap_entries(&mut self, pc: usize, entries: Vec<StackMapEntry>) {
        self.stack_map.insert(pc, entries);
    }

    pub fn register_root_provider(&mut self, provider: Box<dyn RootProvider>) {
        self.root_providers.push(provider);
    }

    pub fn push_local_frame(&mut self) {
        self.local_roots.push_frame();
    }

    pub fn pop_local_frame(&mut self) {
        self.local_roots.pop_frame();
    }

    pub fn root(&mut self, value: Option<HeapRef>) -> crate::roots::RootRef {
        let r = self.local_roots.top().allocate();
        self.local_roots.top().set(r, value);
        r
    }

    pub fn allocate_static(&mut self) -> crate::roots::RootRef {
        self.static_roots.allocate()
    }

    fn from_space(&self) -> &[u8] {
        if self.from_is_a { &self.space_a } else { &self.space_b }
    }

    fn from_space_mut(&mut self) -> &mut [u8] {
        if self.from_is_a { &mut self.space_a } else { &mut self.space_b }
    }

    fn read_header(space: &[u8], offset: usize) -> ObjectHeader {
        let bytes: [u8; ObjectHeader::SIZE] = space[offset..offset + ObjectHeader::SIZE].try_into().unwrap();
        unsafe { std::mem::transmute(bytes) }
    }

    fn write_header(space: &mut [u8], offset: usize, header: ObjectHeader) {
        let bytes: [u8; ObjectHeader::SIZE] = unsafe { std::mem::transmute(header) };
        space[offset..offset + ObjectHeader::SIZE].copy_from_slice(&bytes);
    }

    fn read_word(space: &[u8], offset: usize) -> usize {
        let bytes: [u8; 8] = space[offset..offset + 8].try_into().unwrap();
        usize::from_ne_bytes(bytes)
    }

    fn write_word(space: &mut [u8], offset: usize, value: usize) {
        space[offset..offset + 8].copy_from_slice(&value.to_ne_bytes());
    }

    /// Allocates `size` raw bytes for an object of `class_id`, running a collection first if
    /// the bump pointer would overrun `from`. Fails with `OutOfMemory` if a single collection
    /// doesn't free enough space (§7 "a second failure is fatal").
    pub fn allocate(&mut self, layout: &dyn HeapLayout, unwind: &mut dyn UnwindContext, class_id: ClassId, size: usize) -> Result<HeapRef, JvmError> {
        let aligned = align_up(size, HEADER_ALIGN);
        if self.next + aligned > self.heap_size {
            self.collect(layout, unwind);
            if self.next + aligned > self.heap_size {
                return Err(JvmError::OutOfMemory);
            }
        }
        let offset = self.next;
        self.next += aligned;
        let header = ObjectHeader::new(class_id, aligned as u32);
        Self::write_header(self.from_space_mut(), offset, header);
        Ok(offset)
    }

    pub fn class_id_of(&self, r: HeapRef) -> ClassId {
        Self::read_header(self.from_space(), r).class_id()
    }

    /// Writes a length-prefixed byte payload starting right after `r`'s header. Used for
    /// primitive byte arrays (e.g. a `String`'s backing `value` array); `abs_offset` below is
    /// always relative to `r`'s own object start, not to this array's.
    pub fn write_byte_array_payload(&mut self, r: HeapRef, bytes: &[u8]) {
        let space = self.from_space_mut();
        Self::write_word(space, r + ObjectHeader::SIZE, bytes.len());
        space[r + ObjectHeader::SIZE + 8..r + ObjectHeader::SIZE + 8 + bytes.len()].copy_from_slice(bytes);
    }

    /// Writes a reference-typed field at `abs_offset` bytes from `r`'s object start (the
    /// convention the string interner uses for `java/lang/String`'s fixed layout, §4.7).
    pub fn write_reference_field(&mut self, r: HeapRef, abs_offset: usize, value: Option<HeapRef>) {
        Self::write_word(self.from_space_mut(), r + abs_offset, value.unwrap_or(0));
    }

    pub fn write_byte_field(&mut self, r: HeapRef, abs_offset: usize, value: u8) {
        self.from_space_mut()[r + abs_offset] = value;
    }

    pub fn write_int_field(&mut self, r: HeapRef, abs_offset: usize, value: i32) {
        self.from_space_mut()[r + abs_offset..r + abs_offset + 4].copy_from_slice(&value.to_ne_bytes());
    }

    /// Reads back a length-prefixed byte payload written by `write_byte_array_payload`.
    pub fn read_byte_array_payload(&self, r: HeapRef) -> Vec<u8> {
        let space = self.from_space();
        let len = Self::read_word(space, r + ObjectHeader::SIZE);
        space[r + ObjectHeader::SIZE + 8..r + ObjectHeader::SIZE + 8 + len].to_vec()
    }

    pub fn read_reference_field(&self, r: HeapRef, abs_offset: usize) -> Option<HeapRef> {
        let value = Self::read_word(self.from_space(), r + abs_offset);
        if value == 0 { None } else { Some(value) }
    }

    pub fn read_byte_field(&self, r: HeapRef, abs_offset: usize) -> u8 {
        self.from_space()[r + abs_offset]
    }

    fn mark(layout: &dyn HeapLayout, space: &mut [u8], next: usize, r: HeapRef, worklist: &mut Vec<HeapRef>) {
        let mut header = Self::read_header(space, r);
        if header.is_marked() || r >= next {
            return;
        }
        header.set_marked(true);
        Self::write_header(space, r, header);
        worklist.push(r);
    }

    fn to_space(&self) -> &[u8] {
        if self.from_is_a { &self.space_b } else { &self.space_a }
    }

    /// Runs one full collection (§4.6 steps 1-6). Destructures `self` up front so the scan of
    /// `from`/`to` and the callbacks into `stack_map`/`static_roots`/`local_roots`/
    /// `root_providers` borrow disjoint fields instead of re-entering `&mut self` methods.
    pub fn collect(&mut self, layout: &dyn HeapLayout, unwind: &mut dyn UnwindContext) {
        let next = self.next;
        let GarbageCollector {
            space_a,
            space_b,
            from_is_a,
            stack_map,
            static_roots,
            local_roots,
            root_providers,
            ..
        } = self;
        let (from, to): (&mut [u8], &mut [u8]) =
            if *from_is_a { (space_a, space_b) } else { (space_b, space_a) };

        // Step 1: clear `to`.
        to.fill(0);

        // Step 2: root gathering.
        let mut worklist = Vec::new();
        for frame in unwind.frames() {
            if let Some(entries) = stack_map.get(&frame.program_counter()) {
                for entry in entries {
                    let base = frame.read_register(entry.base_register);
                    if base < next {
                        Self::mark(layout, from, next, base, &mut worklist);
                    }
                }
            }
        }
        for r in static_roots.iter_live() {
            Self::mark(layout, from, next, r, &mut worklist);
        }
        for r in local_roots.iter_live() {
            Self::mark(layout, from, next, r, &mut worklist);
        }
        for provider in root_providers.iter() {
            provider.add_root_objects(&mut |r| Self::mark(layout, from, next, r, &mut worklist));
        }

        // Step 3: marking (transitive closure over `gc_mask`/array payloads).
        while let Some(obj) = worklist.pop() {
            let class_id = Self::read_header(from, obj).class_id();
            let payload = obj + ObjectHeader::SIZE;
            if layout.is_reference_array(class_id) {
                let len = Self::read_word(from, payload);
                for i in 0..len {
                    let slot = payload + 8 + i * POINTER_SIZE;
                    let target = Self::read_word(from, slot);
                    if target != 0 {
                        Self::mark(layout, from, next, target, &mut worklist);
                    }
                }
            } else {
                for &word_offset in layout.gc_mask(class_id) {
                    let slot = payload + word_offset * POINTER_SIZE;
                    let target = Self::read_word(from, slot);
                    if target != 0 {
                        Self::mark(layout, from, next, target, &mut worklist);
                    }
                }
            }
        }

        // Step 4: forwarding and copying, scanning `from` in ascending address order so
        // survivor order in `to` matches scan order (§8 "Determinism").
        let mut forwarding: HashMap<HeapRef, HeapRef> = HashMap::new();
        let mut scan = NULL_RESERVE;
        let mut to_next = NULL_RESERVE;
        while scan < next {
            let header = Self::read_header(from, scan);
            let size = header.size as usize;
            if header.is_marked() {
                let dest = to_next;
                let mut moved_header = header;
                moved_header.set_marked(false);
                to[dest..dest + size].copy_from_slice(&from[scan..scan + size]);
                Self::write_header(to, dest, moved_header);
                forwarding.insert(scan, dest);
                to_next += size;
            }
            scan += size;
        }

        // Step 5: pointer fixup.
        for frame in unwind.frames() {
            if let Some(entries) = stack_map.get(&frame.program_counter()).cloned() {
                for entry in entries {
                    let base = frame.read_register(entry.base_register);
                    if let Some(&new_base) = forwarding.get(&base) {
                        frame.write_register(entry.base_register, new_base);
                        if let Some(derived_reg) = entry.derived_register {
                            let derived = frame.read_register(derived_reg);
                            let offset = derived.wrapping_sub(base);
                            frame.write_register(derived_reg, new_base.wrapping_add(offset));
                        }
                    }
                }
            }
        }
        static_roots.rewrite(&forwarding);
        local_roots.rewrite(&forwarding);
        for provider in root_providers.iter_mut() {
            provider.relocate_roots(&|r| forwarding.get(&r).copied().unwrap_or(r));
        }
        // Every surviving object's own reference fields, now living in `to`.
        let mut cursor = NULL_RESERVE;
        while cursor < to_next {
            let header = Self::read_header(to, cursor);
            let class_id = header.class_id();
            let payload = cursor + ObjectHeader::SIZE;
            if layout.is_reference_array(class_id) {
                let len = Self::read_word(to, payload);
                for i in 0..len {
                    let slot = payload + 8 + i * POINTER_SIZE;
                    let target = Self::read_word(to, slot);
                    if let Some(&new_target) = forwarding.get(&target) {
                        Self::write_word(to, slot, new_target);
                    }
                }
            } else {
                for &word_offset in layout.gc_mask(class_id) {
                    let slot = payload + word_offset * POINTER_SIZE;
                    let target = Self::read_word(to, slot);
                    if target != 0 {
                        if let Some(&new_target) = forwarding.get(&target) {
                            Self::write_word(to, slot, new_target);
                        }
                    }
                }
            }
            cursor += header.size as usize;
        }

        // Step 6: swap spaces.
        *from_is_a = !*from_is_a;
        self.next = to_next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlatLayout {
        instance_size: usize,
    }

    impl HeapLayout for FlatLayout {
        fn instance_size(&self, _class_id: ClassId) -> usize {
            self.instance_size
        }
        fn gc_mask(&self, _class_id: ClassId) -> &[usize] {
            &[]
        }
        fn is_reference_array(&self, _class_id: ClassId) -> bool {
            false
        }
    }

    #[test]
    fn allocation_bumps_the_pointer_and_header_round_trips() {
        let mut gc = GarbageCollector::new(4096);
        let layout = FlatLayout { instance_size: 16 };
        let mut unwind = SyntheticUnwindContext::default();
        let class_id = ClassId::from_usize(3);
        let r = gc.allocate(&layout, &mut unwind, class_id, 16).unwrap();
        assert_eq!(r, NULL_RESERVE);
        assert_eq!(gc.class_id_of(r), class_id);
        let r2 = gc.allocate(&layout, &mut unwind, class_id, 16).unwrap();
        assert_eq!(r2, NULL_RESERVE + 16);
    }

    /// Scenario 5: half of 1000 16-byte objects survive via a root; survivors compact to the
    /// front of the sibling space in scan order.
    #[test]
    fn collection_compacts_surviving_objects_to_the_front() {
        let mut gc = GarbageCollector::new(1000 * 16 + NULL_RESERVE);
        let layout = FlatLayout { instance_size: 16 };
        let mut unwind = SyntheticUnwindContext::default();
        let class_id = ClassId::from_usize(1);

        let mut survivors = Vec::new();
        for i in 0..1000 {
            let r = gc.allocate(&layout, &mut unwind, class_id, 16).unwrap();
            if i % 2 == 0 {
                let root = gc.root(Some(r));
                survivors.push(root);
            }
        }

        gc.collect(&layout, &mut unwind);

        assert_eq!(gc.next, NULL_RESERVE + 500 * 16);
        for (i, root) in survivors.iter().enumerate() {
            let r = gc.local_roots.top().get(*root).unwrap();
            assert_eq!(r, NULL_RESERVE + i * 16);
            assert_eq!(gc.class_id_of(r), class_id);
        }
    }

    #[test]
    fn derived_pointer_offset_is_preserved_across_collection() {
        let mut gc = GarbageCollector::new(4096);
        let layout = FlatLayout { instance_size: 32 };
        let class_id = ClassId::from_usize(2);
        let base = gc.allocate(&layout, &mut SyntheticUnwindContext::default(), class_id, 32).unwrap();
        let derived = base + 12;

        let mut unwind = SyntheticUnwindContext::default();
        let mut registers = HashMap::new();
        registers.insert(0u16, base);
        registers.insert(1u16, derived);
        unwind.push(SyntheticFrame { program_counter: 0x1000, registers });
        gc.add_stackmap_entries(0x1000, vec![StackMapEntry { base_register: 0, derived_register: Some(1) }]);

        gc.collect(&layout, &mut unwind);

        let new_base = unwind.frames[0].read_register(0);
        let new_derived = unwind.frames[0].read_register(1);
        assert_eq!(new_derived - new_base, 12);
    }
}
