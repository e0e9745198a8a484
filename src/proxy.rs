//! D-Bus filtering proxy policy.
//!
//! The sandbox never sees the host's session bus. When D-Bus access is
//! granted, a filtering proxy listens on a sandbox-local socket and only
//! forwards method calls and signals for the interfaces in the application's
//! [`BusCapabilities`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::capabilities::{BusCapabilities, BusInterface, CapabilitySet};

/// Forwarding rules of a filtering proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyPolicy {
    own_name: Option<String>,
    interfaces: Vec<BusInterface>,
}

impl ProxyPolicy {
    /// Create a policy for an application bus identity and its grants.
    ///
    /// Unknown grant bits are ignored.
    pub fn new(own_name: Option<&str>, grants: BusCapabilities) -> Self {
        if grants.unknown_bits() != 0 {
            log::warn!("ignoring unknown bus capability bits {:#x}", grants.unknown_bits());
        }

        Self { own_name: own_name.map(String::from), interfaces: grants.interfaces() }
    }

    /// Check whether calls on an interface are forwarded.
    pub fn permits(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|granted| granted.interface == interface)
    }

    /// Well-known name the application may own.
    pub fn own_name(&self) -> Option<&str> {
        self.own_name.as_deref()
    }

    /// Filtering arguments for `xdg-dbus-proxy`.
    pub fn rules(&self) -> Vec<String> {
        let mut rules = vec![String::from("--filter")];

        if let Some(name) = &self.own_name {
            rules.push(format!("--own={name}"));
        }

        for BusInterface { service, interface, path } in &self.interfaces {
            rules.push(format!("--call={service}={interface}.*@{path}"));
            rules.push(format!("--broadcast={service}={interface}.*@{path}"));
        }

        rules
    }
}

/// Proxy process invocation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProxyCommand {
    /// Proxy executable.
    pub program: PathBuf,
    /// Address of the host bus.
    pub upstream: String,
    /// Socket the proxy listens on.
    pub socket: PathBuf,
    /// Filtering arguments.
    pub rules: Vec<String>,
}

impl ProxyCommand {
    pub fn new(program: &Path, upstream: &str, socket: &Path, policy: &ProxyPolicy) -> Self {
        Self {
            program: program.into(),
            upstream: upstream.into(),
            socket: socket.into(),
            rules: policy.rules(),
        }
    }

    /// Positional and filtering arguments, without the readiness descriptor.
    pub fn args(&self) -> Vec<OsString> {
        let mut args = vec![OsString::from(&self.upstream), OsString::from(&self.socket)];
        args.extend(self.rules.iter().map(OsString::from));
        args
    }
}
