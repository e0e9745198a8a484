//! Sandbox capability sets.
//!
//! Capabilities are grants: every recognized bit opens up one host resource
//! to the sandbox and no bit ever restricts anything. The bit values are
//! persisted in manifests and must never be renumbered; new capabilities are
//! only ever appended.
//!
//! Bits which are not known to this version are carried along unchanged so
//! that re-persisting a manifest never drops them, but they are never turned
//! into any isolation action.

use bitflags::bitflags;
use bitflags::Flags;

bitflags! {
    /// Sandbox capabilities.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Access to the host's GPU render nodes.
        const DRI = 1 << 0;
        /// Session bus access through the filtering proxy.
        const DBUS = 1 << 1;
        /// Access to the host's POSIX shared memory directory.
        const IPC = 1 << 2;
        /// Access to the PulseAudio server socket.
        const PULSEAUDIO = 1 << 3;
        /// Access to the PipeWire server socket.
        const PIPEWIRE = 1 << 4;
    }
}

bitflags! {
    /// D-Bus interface grants.
    ///
    /// The empty set is the default: an application can own a bus name
    /// without being allowed to talk to any other service.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BusCapabilities: u32 {
        /// Desktop notifications.
        const NOTIFICATIONS = 1 << 0;
    }
}

/// Common operations of the persisted capability bitmasks.
///
/// Set union is the bitflags `|` operator (or `union`).
pub trait CapabilitySet: Flags<Bits = u32> + Copy {
    /// Decode a persisted mask, retaining unknown bits.
    fn from_integer(bits: u32) -> Self {
        Self::from_bits_retain(bits)
    }

    /// Encode the mask for persistence, unknown bits included.
    fn to_integer(self) -> u32 {
        self.bits()
    }

    /// Check whether a capability is granted.
    fn grants(self, capability: Self) -> bool {
        self.contains(capability)
    }

    /// All recognized capabilities in this set, in ascending bit order.
    ///
    /// Unknown bits are never yielded.
    fn granted(self) -> Vec<Self> {
        let mut granted: Vec<Self> = Self::FLAGS
            .iter()
            .map(|flag| *flag.value())
            .filter(|flag| flag.bits().count_ones() == 1 && self.contains(*flag))
            .collect();
        granted.sort_by_key(|flag| flag.bits());
        granted
    }

    /// Bits not known to this version.
    fn unknown_bits(self) -> u32 {
        self.bits() & !Self::all().bits()
    }

    /// Name of a single recognized capability.
    fn name(self) -> Option<&'static str> {
        Self::FLAGS.iter().find(|flag| flag.value().bits() == self.bits()).map(|flag| flag.name())
    }
}

impl CapabilitySet for Capabilities {}
impl CapabilitySet for BusCapabilities {}

/// D-Bus interface exposed by a bus capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusInterface {
    /// Well-known name of the service.
    pub service: &'static str,
    /// Interface the calls are made on.
    pub interface: &'static str,
    /// Object path of the service.
    pub path: &'static str,
}

impl BusCapabilities {
    /// Interface backing a single bus capability.
    pub fn interface(self) -> Option<BusInterface> {
        if self == Self::NOTIFICATIONS {
            Some(BusInterface {
                service: "org.freedesktop.Notifications",
                interface: "org.freedesktop.Notifications",
                path: "/org/freedesktop/Notifications",
            })
        } else {
            None
        }
    }

    /// Interfaces for all recognized grants in this set.
    pub fn interfaces(self) -> Vec<BusInterface> {
        self.granted().into_iter().filter_map(Self::interface).collect()
    }
}
