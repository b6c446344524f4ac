//! Type-erased records flowing along graph edges.
//!
//! A `Record` owns one payload value together with its `RecordType`. Stages
//! declare the `RecordType` they accept and produce, and the compiler checks
//! those declarations against each other before anything runs. At runtime the
//! executor only moves records around; the receiving stage downcasts.

use std::any::{self, Any, TypeId};
use std::fmt;

/// Identity of a payload type. Two types are compatible only when their
/// `TypeId`s are equal.
#[derive(Clone, Copy)]
pub struct RecordType {
    id: TypeId,
    name: &'static str,
}

impl RecordType {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Full Rust type name, for diagnostics only.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name without module path, e.g. `NoteSequence`.
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        let start = base.rfind("::").map(|i| i + 2).unwrap_or(0);
        &self.name[start..]
    }
}

impl PartialEq for RecordType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RecordType {}

impl std::hash::Hash for RecordType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordType({})", self.name)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Object-safe view over a record payload.
///
/// Implemented for every `Clone + Debug + Send + 'static` type; clones are
/// needed when one port feeds more than one consumer.
pub trait Payload: Any + Send + fmt::Debug {
    fn clone_payload(&self) -> Box<dyn Payload>;
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T> Payload for T
where
    T: Any + Clone + Send + fmt::Debug,
{
    fn clone_payload(&self) -> Box<dyn Payload> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// Returned when a record is downcast to a type it does not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMismatch {
    pub expected: RecordType,
    pub found: RecordType,
}

impl fmt::Display for TypeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, found {}", self.expected, self.found)
    }
}

/// An owned, type-erased payload.
pub struct Record {
    ty: RecordType,
    payload: Box<dyn Payload>,
}

impl Record {
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Clone + Send + fmt::Debug,
    {
        Self {
            ty: RecordType::of::<T>(),
            payload: Box::new(value),
        }
    }

    #[inline]
    pub fn record_type(&self) -> RecordType {
        self.ty
    }

    #[inline]
    pub fn is<T: 'static>(&self) -> bool {
        self.ty.id() == TypeId::of::<T>()
    }

    /// Borrow the payload as `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.payload.as_any().downcast_ref::<T>()
    }

    /// Take the payload out as `T`.
    pub fn downcast<T: 'static>(self) -> Result<T, TypeMismatch> {
        if !self.is::<T>() {
            return Err(TypeMismatch {
                expected: RecordType::of::<T>(),
                found: self.ty,
            });
        }
        let found = self.ty;
        self.payload
            .into_any()
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| TypeMismatch {
                expected: RecordType::of::<T>(),
                found,
            })
    }
}

impl Clone for Record {
    fn clone(&self) -> Self {
        Self {
            ty: self.ty,
            payload: self.payload.clone_payload(),
        }
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("type", &self.ty)
            .field("payload", &self.payload)
            .finish()
    }
}
