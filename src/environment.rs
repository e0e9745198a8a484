//! Sandboxed process environment.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::Path;

/// Session bus address variable.
pub const BUS_ADDRESS: &str = "DBUS_SESSION_BUS_ADDRESS";

/// Environment of the sandboxed process.
///
/// This is a fresh mapping derived from a snapshot of the launcher's
/// environment; the launcher's own environment is never modified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<OsString, OsString>,
}

impl Environment {
    /// Start from a snapshot of the parent environment.
    ///
    /// The host bus address is never inherited.
    pub fn from_parent<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        let mut vars: BTreeMap<OsString, OsString> =
            vars.into_iter().map(|(key, value)| (key.into(), value.into())).collect();
        vars.remove(OsStr::new(BUS_ADDRESS));
        Self { vars }
    }

    pub fn set(&mut self, key: impl Into<OsString>, value: impl Into<OsString>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: impl AsRef<OsStr>) -> Option<&OsStr> {
        self.vars.get(key.as_ref()).map(OsString::as_os_str)
    }

    /// Prepend a directory to a colon-separated search path.
    pub fn prepend_path(&mut self, key: &str, dir: &Path) {
        let mut value = OsString::from(dir);
        if let Some(existing) = self.vars.get(OsStr::new(key)).filter(|value| !value.is_empty()) {
            value.push(":");
            value.push(existing);
        }
        self.vars.insert(key.into(), value);
    }

    /// Point the bus address at a proxy socket inside the sandbox.
    pub fn set_bus_socket(&mut self, socket: &Path) {
        let mut address = OsString::from("unix:path=");
        address.push(socket);
        self.vars.insert(BUS_ADDRESS.into(), address);
    }

    pub fn into_vec(self) -> Vec<(OsString, OsString)> {
        self.vars.into_iter().collect()
    }
}
