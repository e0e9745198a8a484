//! Pharaoh application sandbox.
//!
//! This crate launches installed applications inside a per-application
//! sandbox. The sandbox's filesystem view is built from nothing: only system
//! directories, the application's install root, its data directory and the
//! host resources of its granted capabilities are visible.
//!
//! # Example
//!
//! ```no_run
//! use pharaoh::{Layout, Launcher, LinuxHost, Manifest};
//!
//! let layout = Layout::from_env();
//! let manifest = Manifest::load(layout.manifest_path("org.example.App")).unwrap();
//!
//! // Build the sandbox and execute the application inside it.
//! let host = LinuxHost::new().unwrap();
//! let session = Launcher::new(manifest, layout, host).launch().unwrap();
//!
//! // Wait for the sandbox to exit; this also tears it down.
//! let status = session.wait().unwrap();
//! println!("application exited with {status}");
//! ```

pub use crate::capabilities::{BusCapabilities, Capabilities, CapabilitySet};
pub use crate::error::{ConfigError, Error, Result};
pub use crate::launcher::{Host, LaunchState, Launcher, Session};
pub use crate::layout::Layout;
#[cfg(target_os = "linux")]
pub use crate::linux::LinuxHost;
pub use crate::manifest::{Manifest, ManifestBuilder};

pub mod capabilities;
pub mod environment;
pub mod error;
pub mod filter;
pub mod launcher;
pub mod layout;
#[cfg(target_os = "linux")]
pub mod linux;
pub mod manifest;
pub mod proxy;
pub mod teardown;
