//! Dense identifiers used to refer to class-object-store entries without holding borrows.

use lasso::Spur;
use std::fmt;

/// Interned name (class name, field name, method name, descriptor text, ...).
pub type Symbol = Spur;

macro_rules! dense_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            pub fn from_usize(index: usize) -> Self {
                Self(index as u32)
            }

            pub fn to_index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

dense_id!(ClassId);
dense_id!(MethodId);
dense_id!(FieldDescriptorId);
dense_id!(MethodDescriptorId);
dense_id!(InterfaceId);

/// Identifies a method by name+descriptor, independent of owning class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub name: Symbol,
    pub desc: Symbol,
}

/// Identifies a field by name+descriptor, independent of owning class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldKey {
    pub name: Symbol,
    pub desc: Symbol,
}
