//! Error taxonomy shared by the transport and the engine.
//!
//! Callers branch on [`ErrorKind`], never on message text. Annotating an error
//! with [`KeelError::context`] keeps its kind visible through any number of
//! layers.

/// Classification of a [`KeelError`], independent of annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    NotValid,
    NotSupported,
    Conflict,
    Transport,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum KeelError {
    /// The object (or its resource type) does not exist. Retryable only while
    /// resolving definitions.
    #[error("{0}")]
    NotFound(String),
    /// Create hit an existing object. Handled by the ensure paths, never surfaced.
    #[error("{0}")]
    AlreadyExists(String),
    /// Malformed, empty or unserved version and similar input problems.
    #[error("{0}")]
    NotValid(String),
    /// Well-formed input the engine refuses to handle (e.g. cluster scope).
    #[error("{0}")]
    NotSupported(String),
    /// Update rejected because the resourceVersion was stale.
    #[error("{0}")]
    Conflict(String),
    /// Any other failure reported by the transport.
    #[error("{0}")]
    Transport(String),
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<KeelError>,
    },
}

pub type Result<T, E = KeelError> = std::result::Result<T, E>;

impl KeelError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{what} not found"))
    }

    pub fn already_exists(what: impl std::fmt::Display) -> Self {
        Self::AlreadyExists(format!("{what} already exists"))
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// Kind of the innermost error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::NotValid(_) => ErrorKind::NotValid,
            Self::NotSupported(_) => ErrorKind::NotSupported,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Context { source, .. } => source.kind(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }

    /// Wrap with a leading message, keeping the kind.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context { context: context.into(), source: Box::new(self) }
    }
}

pub trait ResultExt<T> {
    /// Annotate the error (if any) with a lazily built message.
    fn annotate<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> ResultExt<T> for Result<T> {
    fn annotate<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.context(f()))
    }
}
