//! # Errors
//!
//! Container failures are structured `DogError`s carried inside
//! `anyhow::Error`, so provider factories (which return `anyhow::Result`)
//! and the container itself share one error channel.
//!
//! Callers that need the structured form downcast with
//! [`DogError::from_anyhow`].

use std::fmt;

use anyhow::Error as AnyError;

/// A convenience result type for DogRS core APIs.
pub type DogResult<T> = std::result::Result<T, AnyError>;

/// Classes of container failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A provider (or a required dependency of one) is not registered.
    UnknownDependency,
    /// Resolving a provider re-entered the same provider.
    CircularDependency,
    /// An instance exists but is not of the requested type.
    TypeMismatch,
    /// An operation was attempted in the wrong application state.
    InvalidLifecycle,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::UnknownDependency => "UnknownDependency",
            ErrorKind::CircularDependency => "CircularDependency",
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::InvalidLifecycle => "InvalidLifecycle",
        }
    }

    /// Kebab-cased class name, handy for log fields.
    pub fn class_name(&self) -> &'static str {
        match self {
            ErrorKind::UnknownDependency => "unknown-dependency",
            ErrorKind::CircularDependency => "circular-dependency",
            ErrorKind::TypeMismatch => "type-mismatch",
            ErrorKind::InvalidLifecycle => "invalid-lifecycle",
        }
    }
}

/// A structured DogRS error that can live inside `anyhow::Error`.
#[derive(Debug)]
pub struct DogError {
    pub kind: ErrorKind,
    pub message: String,
    pub source: Option<AnyError>,
}

impl DogError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: AnyError) -> Self {
        self.source = Some(source);
        self
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Convert into `anyhow::Error`.
    pub fn into_anyhow(self) -> AnyError {
        AnyError::new(self)
    }

    /// Downcast an `anyhow::Error` to a `DogError` if possible.
    pub fn from_anyhow(err: &AnyError) -> Option<&DogError> {
        err.downcast_ref::<DogError>()
    }

    pub fn unknown_dependency(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownDependency, msg)
    }
    pub fn circular_dependency(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::CircularDependency, msg)
    }
    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeMismatch, msg)
    }
    pub fn invalid_lifecycle(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidLifecycle, msg)
    }
}

impl fmt::Display for DogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.message)
    }
}

impl std::error::Error for DogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Convenience helper for “bail with DogError”.
#[macro_export]
macro_rules! bail_dog {
    ($ctor:ident, $msg:expr) => {
        return Err($crate::errors::DogError::$ctor($msg).into_anyhow())
    };
    ($ctor:ident, $fmt:expr, $($arg:tt)*) => {
        return Err($crate::errors::DogError::$ctor(format!($fmt, $($arg)*)).into_anyhow())
    };
}
