//! Application manifests.
//!
//! A manifest is written once by the installer when an application is
//! provisioned and is read-only afterwards. Everything the launcher relies on
//! is validated in [`Manifest::load`], so an invalid record never reaches the
//! launcher.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::capabilities::{BusCapabilities, Capabilities, CapabilitySet};
use crate::error::ConfigError;

/// Maximum length of a D-Bus name.
const MAX_BUS_NAME_LEN: usize = 255;

/// Validated application manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    app: String,
    root: PathBuf,
    icon: String,
    executable: PathBuf,
    entry: String,
    capabilities: Capabilities,
    seccomp_filter: Option<PathBuf>,
    bus_name: Option<String>,
    bus_capabilities: BusCapabilities,
}

/// On-disk manifest layout.
#[derive(Serialize, Deserialize)]
struct Record {
    app: String,
    path: PathBuf,
    icon: String,
    executable: PathBuf,
    entry: String,
    permissions: u32,
    #[serde(default)]
    seccomp_filter: Option<PathBuf>,
    #[serde(default)]
    dbus_app: Option<String>,
    #[serde(default, deserialize_with = "nullable_mask")]
    dbus_permissions: u32,
}

/// Treat an explicit `null` mask like an absent one.
fn nullable_mask<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let mask = Option::<u32>::deserialize(deserializer)?;
    Ok(mask.unwrap_or_else(|| BusCapabilities::default().to_integer()))
}

impl Manifest {
    /// Load and validate a manifest.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| ConfigError::Read(path.into(), err))?;
        let record: Record = serde_json::from_reader(file)?;
        Self::try_from(record)
    }

    /// Parse and validate a manifest from its JSON text.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let record: Record = serde_json::from_str(json)?;
        Self::try_from(record)
    }

    /// Write the manifest.
    ///
    /// The record is written to a temporary file next to `path` and renamed
    /// over it, so concurrent loads observe either the old or the new record.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let persist_error = |err| ConfigError::Persist(path.into(), err);

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(dir).map_err(persist_error)?;

        let json = serde_json::to_string_pretty(&self.record())?;
        file.write_all(json.as_bytes()).map_err(persist_error)?;
        file.as_file().sync_all().map_err(persist_error)?;
        file.persist(path).map_err(|err| persist_error(err.error))?;

        Ok(())
    }

    fn record(&self) -> Record {
        Record {
            app: self.app.clone(),
            path: self.root.clone(),
            icon: self.icon.clone(),
            executable: self.executable.clone(),
            entry: self.entry.clone(),
            permissions: self.capabilities.to_integer(),
            seccomp_filter: self.seccomp_filter.clone(),
            dbus_app: self.bus_name.clone(),
            dbus_permissions: self.bus_capabilities.to_integer(),
        }
    }

    /// Application identity.
    pub fn app(&self) -> &str {
        &self.app
    }

    /// Install root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Launcher icon reference.
    pub fn icon(&self) -> &str {
        &self.icon
    }

    /// Absolute path of the target executable.
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Desktop entry reference.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Compiled syscall filter, if filtering is requested.
    pub fn seccomp_filter(&self) -> Option<&Path> {
        self.seccomp_filter.as_deref()
    }

    /// Well-known D-Bus name owned by the application.
    pub fn bus_name(&self) -> Option<&str> {
        self.bus_name.as_deref()
    }

    pub fn bus_capabilities(&self) -> BusCapabilities {
        self.bus_capabilities
    }
}

impl TryFrom<Record> for Manifest {
    type Error = ConfigError;

    fn try_from(record: Record) -> Result<Self, Self::Error> {
        validate_identity(&record.app)?;

        if !record.path.is_absolute() {
            return Err(ConfigError::RelativeRoot(record.path));
        }
        let root = normalize(&record.path);

        let executable = normalize(&root.join(&record.executable));
        let outside_root = || ConfigError::ExecutableOutsideRoot {
            executable: executable.clone(),
            root: root.clone(),
        };
        if executable == root || !executable.starts_with(&root) {
            return Err(outside_root());
        }

        // Reject symlinks leading out of the install root.
        if let (Ok(real_root), Ok(real_executable)) =
            (fs::canonicalize(&root), fs::canonicalize(&executable))
        {
            if !real_executable.starts_with(real_root) {
                return Err(outside_root());
            }
        }

        if let Some(name) = &record.dbus_app {
            validate_bus_name(name)?;
        }

        Ok(Self {
            app: record.app,
            root,
            icon: record.icon,
            executable,
            entry: record.entry,
            capabilities: Capabilities::from_integer(record.permissions),
            seccomp_filter: record.seccomp_filter,
            bus_name: record.dbus_app,
            bus_capabilities: BusCapabilities::from_integer(record.dbus_permissions),
        })
    }
}

/// Manifest builder used when provisioning an application.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    app: String,
    root: PathBuf,
    executable: PathBuf,
    icon: String,
    entry: String,
    capabilities: Capabilities,
    seccomp_filter: Option<PathBuf>,
    bus_name: Option<String>,
    bus_capabilities: BusCapabilities,
}

impl ManifestBuilder {
    pub fn new(
        app: impl Into<String>,
        root: impl Into<PathBuf>,
        executable: impl Into<PathBuf>,
    ) -> Self {
        Self {
            app: app.into(),
            root: root.into(),
            executable: executable.into(),
            icon: String::new(),
            entry: String::new(),
            capabilities: Capabilities::empty(),
            seccomp_filter: None,
            bus_name: None,
            bus_capabilities: BusCapabilities::default(),
        }
    }

    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    pub fn entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }

    /// Add capabilities to the grant.
    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities |= capabilities;
        self
    }

    pub fn seccomp_filter(mut self, filter: impl Into<PathBuf>) -> Self {
        self.seccomp_filter = Some(filter.into());
        self
    }

    /// Give the application a bus identity with the specified interface grants.
    pub fn bus(mut self, name: impl Into<String>, capabilities: BusCapabilities) -> Self {
        self.bus_name = Some(name.into());
        self.bus_capabilities = capabilities;
        self
    }

    /// Validate the manifest.
    pub fn build(self) -> Result<Manifest, ConfigError> {
        Manifest::try_from(Record {
            app: self.app,
            path: self.root,
            icon: self.icon,
            executable: self.executable,
            entry: self.entry,
            permissions: self.capabilities.to_integer(),
            seccomp_filter: self.seccomp_filter,
            dbus_app: self.bus_name,
            dbus_permissions: self.bus_capabilities.to_integer(),
        })
    }
}

/// Ensure the application identity can be used as a single path component.
fn validate_identity(app: &str) -> Result<(), ConfigError> {
    if app.is_empty() || app == "." || app == ".." || app.contains(['/', '\0']) {
        return Err(ConfigError::InvalidIdentity(app.into()));
    }
    Ok(())
}

/// Check a D-Bus well-known name.
fn validate_bus_name(name: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidBusName(name.into());

    if name.len() > MAX_BUS_NAME_LEN || name.starts_with(':') {
        return Err(invalid());
    }

    let mut elements = 0;
    for element in name.split('.') {
        let valid_chars =
            element.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        let leading_digit = element.bytes().next().map_or(true, |b| b.is_ascii_digit());
        if !valid_chars || leading_digit {
            return Err(invalid());
        }
        elements += 1;
    }

    if elements < 2 {
        return Err(invalid());
    }

    Ok(())
}

/// Lexically resolve `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => (),
            Component::ParentDir => {
                normalized.pop();
            },
            component => normalized.push(component),
        }
    }
    normalized
}
