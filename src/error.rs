//! Launcher errors.

use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::io::Error as IoError;
use std::path::PathBuf;

/// Launcher result.
pub type Result<T> = std::result::Result<T, Error>;

/// Launch error.
///
/// Every variant is fatal. By the time an error is returned from the launcher
/// all setup performed so far has been undone.
#[derive(Debug)]
pub enum Error {
    /// Malformed or missing manifest.
    Config(ConfigError),

    /// Namespace or mount system call refused by the kernel.
    Privilege { operation: &'static str, source: IoError },

    /// A granted capability's host resource could not be provided.
    CapabilityBind { capability: &'static str, path: PathBuf, source: IoError },

    /// D-Bus filtering proxy failed to start.
    DBusProxy(IoError),

    /// Syscall filter could not be loaded or installed.
    Filter { path: PathBuf, reason: FilterFailure },

    /// Target executable could not be executed.
    Exec { path: PathBuf, source: IoError },

    /// Launch interrupted by a signal before the target was executed.
    Cancelled,
}

impl Error {
    /// Process exit code for this error class.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 78,
            Self::Privilege { .. } => 77,
            Self::CapabilityBind { .. } => 69,
            Self::DBusProxy(_) => 76,
            Self::Filter { .. } => 71,
            Self::Exec { .. } => 126,
            Self::Cancelled => 130,
        }
    }

    pub(crate) fn privilege(operation: &'static str) -> impl FnOnce(IoError) -> Self {
        move |source| Self::Privilege { operation, source }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Config(error) => Some(error),
            Self::Privilege { source, .. }
            | Self::CapabilityBind { source, .. }
            | Self::Exec { source, .. } => Some(source),
            Self::DBusProxy(error) => Some(error),
            Self::Filter { .. } | Self::Cancelled => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(error) => write!(f, "invalid manifest: {error}"),
            Self::Privilege { operation, source } => {
                write!(f, "insufficient privilege to {operation}: {source}")
            },
            Self::CapabilityBind { capability, path, source } => {
                write!(f, "cannot grant {capability} ({}): {source}", path.display())
            },
            Self::DBusProxy(error) => write!(f, "D-Bus proxy failed: {error}"),
            Self::Filter { path, reason } => {
                write!(f, "syscall filter {:?}: {reason}", path.display())
            },
            Self::Exec { path, source } => write!(f, "cannot execute {:?}: {source}", path.display()),
            Self::Cancelled => write!(f, "launch cancelled"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(error: ConfigError) -> Self {
        Self::Config(error)
    }
}

/// Manifest validation error.
#[derive(Debug)]
pub enum ConfigError {
    /// Manifest file could not be read.
    Read(PathBuf, IoError),

    /// Manifest is not a well-formed record.
    ///
    /// This includes missing required fields and masks which are not unsigned
    /// 32-bit integers.
    Parse(serde_json::Error),

    /// Application identity is unusable as a path component.
    InvalidIdentity(String),

    /// Install root is not an absolute path.
    RelativeRoot(PathBuf),

    /// Executable does not resolve beneath the install root.
    ExecutableOutsideRoot { executable: PathBuf, root: PathBuf },

    /// D-Bus well-known name is malformed.
    InvalidBusName(String),

    /// Manifest could not be written.
    Persist(PathBuf, IoError),
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Read(_, error) | Self::Persist(_, error) => Some(error),
            Self::Parse(error) => Some(error),
            _ => None,
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(path, error) => write!(f, "cannot read {:?}: {error}", path.display()),
            Self::Parse(error) => write!(f, "{error}"),
            Self::InvalidIdentity(app) => write!(f, "invalid application identity {app:?}"),
            Self::RelativeRoot(root) => {
                write!(f, "install root {:?} is not absolute", root.display())
            },
            Self::ExecutableOutsideRoot { executable, root } => write!(
                f,
                "executable {:?} is not beneath install root {:?}",
                executable.display(),
                root.display()
            ),
            Self::InvalidBusName(name) => write!(f, "invalid D-Bus name {name:?}"),
            Self::Persist(path, error) => write!(f, "cannot write {:?}: {error}", path.display()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(error: serde_json::Error) -> Self {
        Self::Parse(error)
    }
}

/// Reason a syscall filter was rejected.
#[derive(Debug)]
pub enum FilterFailure {
    /// Filter file could not be read.
    Read(IoError),

    /// Filter file is not a valid program.
    Malformed(String),

    /// Filter could not be applied to the target process.
    Install(IoError),
}

impl Display for FilterFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(error) => write!(f, "unreadable: {error}"),
            Self::Malformed(reason) => write!(f, "malformed: {reason}"),
            Self::Install(error) => write!(f, "install failed: {error}"),
        }
    }
}
