// src/types.rs

//! Dependency keys.
//!
//! Every edge in a flow graph is expressed through a [`TypeKey`]: a task that
//! produces a `TypeKey` is its provider, a task that consumes it depends on
//! that provider. Keys are usually derived from a Rust type, but can also be
//! explicit named tokens (useful when describing graphs without concrete
//! types, e.g. in tests or tooling).

use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of a [`TypeKey`]. Equality and hashing only look at this.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyId {
    Type(TypeId),
    Named(Cow<'static, str>),
    /// Output of the predicate node gating the task with this ordinal.
    Predicate(usize),
    /// Output of an `invoke` task with this ordinal.
    NoOutput(usize),
    Context,
    Error,
}

/// Opaque identifier for a value kind flowing through the graph.
#[derive(Debug, Clone)]
pub struct TypeKey {
    id: KeyId,
    name: Cow<'static, str>,
}

impl TypeKey {
    /// Key for the Rust type `T`.
    pub fn of<T: Any>() -> Self {
        Self {
            id: KeyId::Type(TypeId::of::<T>()),
            name: Cow::Borrowed(std::any::type_name::<T>()),
        }
    }

    /// Key identified by name only. Two named keys are equal iff their names are.
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        let name = name.into();
        Self {
            id: KeyId::Named(name.clone()),
            name,
        }
    }

    /// Marker for the cancellation context parameter.
    pub fn context() -> Self {
        Self {
            id: KeyId::Context,
            name: Cow::Borrowed("context"),
        }
    }

    /// Marker for the error result.
    pub fn error() -> Self {
        Self {
            id: KeyId::Error,
            name: Cow::Borrowed("error"),
        }
    }

    pub(crate) fn predicate_sentinel(task_ordinal: usize) -> Self {
        Self {
            id: KeyId::Predicate(task_ordinal),
            name: Cow::Owned(format!("predicate#{task_ordinal}")),
        }
    }

    pub(crate) fn no_output_sentinel(task_ordinal: usize) -> Self {
        Self {
            id: KeyId::NoOutput(task_ordinal),
            name: Cow::Owned(format!("invoke#{task_ordinal}")),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_context(&self) -> bool {
        self.id == KeyId::Context
    }

    pub fn is_error(&self) -> bool {
        self.id == KeyId::Error
    }

    /// True for internal keys the compiler introduces (predicate and invoke outputs).
    pub fn is_sentinel(&self) -> bool {
        matches!(self.id, KeyId::Predicate(_) | KeyId::NoOutput(_))
    }

    /// True if this key was derived from the Rust type `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.id == KeyId::Type(TypeId::of::<T>())
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Source position of a declaration, used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub const fn new(file: &'static str, line: u32, column: u32) -> Self {
        Self { file, line, column }
    }

    /// Location of the caller of the enclosing `#[track_caller]` function.
    #[track_caller]
    pub fn caller() -> Self {
        std::panic::Location::caller().into()
    }
}

impl From<&'static std::panic::Location<'static>> for SourceLocation {
    fn from(loc: &'static std::panic::Location<'static>) -> Self {
        Self::new(loc.file(), loc.line(), loc.column())
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}
