use super::types::FsEntry;

/// Uniform error kinds for filesystem and store failures. Callers branch on
/// `kind()`, never on the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsErrorKind {
    NotExist,
    Exist,
    AccessDenied,
    Invalid,
    Conflict,
    Backend,
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotExist(String),

    #[error("already exists: {0}")]
    Exist(String),

    #[error("cannot access file/directory (access denied): {0}")]
    AccessDenied(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("conflicting concurrent update: {0}")]
    Conflict(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("operation cancelled")]
    Cancelled,

    /// A path walk stopped partway. Carries the deepest entry that resolved
    /// so callers like `mkdir -p` and `mv` can resume from there instead of
    /// re-walking the whole path.
    #[error("lookup stopped at {last_successful_path}: {source}")]
    LookupStop {
        last_successful_path: String,
        last_entry: Box<FsEntry>,
        #[source]
        source: Box<FsError>,
    },
}

impl FsError {
    pub fn kind(&self) -> FsErrorKind {
        match self {
            FsError::NotExist(_) => FsErrorKind::NotExist,
            FsError::Exist(_) => FsErrorKind::Exist,
            FsError::AccessDenied(_) => FsErrorKind::AccessDenied,
            FsError::Invalid(_) => FsErrorKind::Invalid,
            FsError::Conflict(_) => FsErrorKind::Conflict,
            FsError::Backend(_) => FsErrorKind::Backend,
            FsError::Cancelled => FsErrorKind::Cancelled,
            FsError::LookupStop { source, .. } => source.kind(),
        }
    }

    pub fn is(&self, kind: FsErrorKind) -> bool {
        self.kind() == kind
    }

    /// The resume point of a stopped walk, if this error carries one.
    pub fn lookup_stop(&self) -> Option<(&str, &FsEntry)> {
        match self {
            FsError::LookupStop {
                last_successful_path,
                last_entry,
                ..
            } => Some((last_successful_path.as_str(), last_entry)),
            _ => None,
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
