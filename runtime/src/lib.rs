//! Class loader, garbage collector, and bytecode decoder: the three core subsystems a JIT or
//! interpreter builds on (§1). No process-wide mutable singleton; every caller owns its own
//! `Vm`.

pub mod bytecode;
pub mod class_loader;
pub mod classfile;
pub mod descriptor;
pub mod error;
pub mod heap;
pub mod keys;
pub mod resolution;
pub mod roots;
pub mod rt;

pub use error::JvmError;

use class_loader::{ClassLoader, ClassPath};
use descriptor::Descriptor;
use heap::string_interner::StringInterner;
use heap::{GarbageCollector, HeapLayout, SyntheticUnwindContext};
use keys::ClassId;
use resolution::ClassStore;
use rt::JvmClass;
use std::path::PathBuf;
use tracing::debug;

/// Launch configuration, normally built from CLI flags (`vm`'s binary) or test fixtures.
#[derive(Debug, Clone)]
pub struct VmConfig {
    pub home: PathBuf,
    pub main_class: String,
    pub version: String,
    pub class_path: Vec<String>,
    pub initial_heap_size: usize,
    pub max_heap_size: usize,
    pub frame_stack_size: usize,
}

/// Resolves class bytes from a flat list of directories, mirroring package-qualified names to
/// `<dir>/<name>.class` (§4.3's minimal, jimage-less classpath seam).
pub struct DirectoryClassPath {
    roots: Vec<PathBuf>,
}

impl DirectoryClassPath {
    pub fn new(roots: Vec<String>) -> Self {
        DirectoryClassPath { roots: roots.into_iter().map(PathBuf::from).collect() }
    }
}

impl ClassPath for DirectoryClassPath {
    fn find_class(&self, name: &str) -> Option<Vec<u8>> {
        for root in &self.roots {
            let path = root.join(format!("{name}.class"));
            if let Ok(bytes) = std::fs::read(&path) {
                return Some(bytes);
            }
        }
        None
    }
}

/// `HeapLayout` backed directly by the class-object store; kept as a thin adapter rather than
/// folded into `ClassLoader` itself so `heap` never depends on `rt`/`class_loader` types.
struct ClassLoaderLayout<'a> {
    loader: &'a ClassLoader,
}

impl HeapLayout for ClassLoaderLayout<'_> {
    fn instance_size(&self, class_id: ClassId) -> usize {
        match self.loader.class(class_id) {
            JvmClass::Instance(c) => c.field_area_size() + 8,
            JvmClass::Primitive(p) => p.instance_size,
            _ => 8,
        }
    }

    fn gc_mask(&self, class_id: ClassId) -> &[usize] {
        match self.loader.class(class_id) {
            JvmClass::Instance(c) => c.gc_mask(),
            _ => &[],
        }
    }

    fn is_reference_array(&self, class_id: ClassId) -> bool {
        matches!(self.loader.class(class_id), JvmClass::InstanceArray(_))
    }
}

/// Owns the class loader, heap, and string interner for one running process.
pub struct Vm {
    pub loader: ClassLoader,
    pub gc: GarbageCollector,
    pub interner: StringInterner,
}

impl Vm {
    pub fn new(config: &VmConfig) -> Result<Self, JvmError> {
        debug!("starting vm for {}", config.main_class);
        let class_path = DirectoryClassPath::new(config.class_path.clone());
        let mut loader = ClassLoader::new(Box::new(class_path));
        let mut gc = GarbageCollector::new(config.max_heap_size.max(1 << 20));

        let class_class_id = loader.load_bootstrap()?;

        let byte_array_id = loader
            .for_name(&Descriptor::Array(Box::new(Descriptor::Byte)))
            .expect("[B must resolve once java/lang/Object is loaded");
        let string_id = loader
            .for_name_loaded(&Descriptor::Object("java/lang/String".to_string()))
            .expect("java/lang/String was just loaded by load_bootstrap");

        Self::backpatch_mirrors(&loader, &mut gc, class_class_id)?;

        let interner = match loader.class(string_id) {
            JvmClass::Instance(string_class) => {
                StringInterner::new(string_class, string_id, byte_array_id, loader.interner())?
            }
            _ => return Err(JvmError::InvariantViolation("java/lang/String did not load as an instance class")),
        };

        Ok(Vm { loader, gc, interner })
    }

    /// §4.3 `load_bootstrap`'s back-patch: every class object loaded so far gets a `Class`
    /// mirror allocated on the heap, its header pointing back at the class object it mirrors.
    /// Primitive classes have no mirror slot and are skipped.
    fn backpatch_mirrors(loader: &ClassLoader, gc: &mut GarbageCollector, class_class_id: ClassId) -> Result<(), JvmError> {
        let mut unwind = SyntheticUnwindContext::default();
        let layout = ClassLoaderLayout { loader };
        let mirror_size = layout.instance_size(class_class_id);
        for i in 0..loader.class_count() {
            let id = ClassId::from_usize(i);
            if matches!(loader.class(id), JvmClass::Primitive(_)) {
                continue;
            }
            if loader.class(id).get_mirror_ref().is_some() {
                continue;
            }
            let mirror = gc.allocate(&layout, &mut unwind, class_class_id, mirror_size)?;
            loader.class(id).set_mirror_ref(mirror);
        }
        Ok(())
    }

    /// Allocates and interns a string literal, per §4.7.
    pub fn intern_string(&mut self, text: &str) -> Result<heap::HeapRef, JvmError> {
        let layout = ClassLoaderLayout { loader: &self.loader };
        let mut unwind = SyntheticUnwindContext::default();
        self.interner.intern(&mut self.gc, &layout, &mut unwind, text)
    }
}

/// Entry point for the `vm` CLI binary: builds a `Vm` and loads the bootstrap classes, then
/// hands control back (bytecode execution is out of scope here; see §1).
pub fn start(config: VmConfig) -> Result<(), JvmError> {
    let vm = Vm::new(&config)?;
    debug!("bootstrap classes loaded, {} classes resident", vm.loader.class_count());
    Ok(())
}
