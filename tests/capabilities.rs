use pharaoh::{BusCapabilities, Capabilities, CapabilitySet};

/// All masks composed of known capability bits.
fn known_masks() -> impl Iterator<Item = Capabilities> {
    (0..=Capabilities::all().bits()).map(Capabilities::from_bits_truncate)
}

#[test]
fn integer_round_trip() {
    for capabilities in known_masks() {
        let restored = Capabilities::from_integer(capabilities.to_integer());
        assert_eq!(restored, capabilities);
    }
}

#[test]
fn registry_is_stable() {
    assert_eq!(Capabilities::DRI.to_integer(), 1);
    assert_eq!(Capabilities::DBUS.to_integer(), 2);
    assert_eq!(Capabilities::IPC.to_integer(), 4);
    assert_eq!(Capabilities::PULSEAUDIO.to_integer(), 8);
    assert_eq!(Capabilities::PIPEWIRE.to_integer(), 16);
    assert_eq!(BusCapabilities::NOTIFICATIONS.to_integer(), 1);
}

#[test]
fn union_laws() {
    for a in known_masks() {
        for b in known_masks() {
            assert_eq!(a | b, b | a);
            assert_eq!(a | a, a);

            for flag in Capabilities::all().granted() {
                assert_eq!((a | b).grants(flag), a.grants(flag) || b.grants(flag));
            }
        }
    }
}

#[test]
fn granted_in_bit_order() {
    let capabilities = Capabilities::PIPEWIRE | Capabilities::DRI | Capabilities::IPC;
    assert_eq!(
        capabilities.granted(),
        [Capabilities::DRI, Capabilities::IPC, Capabilities::PIPEWIRE]
    );
    assert!(Capabilities::empty().granted().is_empty());
}

#[test]
fn unknown_bits_are_retained() {
    let mask = Capabilities::DBUS.to_integer() | 1 << 9 | 1 << 31;
    let capabilities = Capabilities::from_integer(mask);

    // Unknown bits survive re-persisting.
    assert_eq!(capabilities.to_integer(), mask);
    assert_eq!(capabilities.unknown_bits(), 1 << 9 | 1 << 31);

    // They are never reported as grants.
    assert_eq!(capabilities.granted(), [Capabilities::DBUS]);
}

#[test]
fn capability_names() {
    assert_eq!(Capabilities::PULSEAUDIO.name(), Some("PULSEAUDIO"));
    assert_eq!((Capabilities::DRI | Capabilities::IPC).name(), None);
    assert_eq!(BusCapabilities::NOTIFICATIONS.name(), Some("NOTIFICATIONS"));
}

#[test]
fn bus_default_is_empty() {
    assert_eq!(BusCapabilities::default(), BusCapabilities::empty());
    assert!(BusCapabilities::default().interfaces().is_empty());
}

#[test]
fn notification_interface() {
    let interfaces = (BusCapabilities::NOTIFICATIONS | BusCapabilities::from_bits_retain(1 << 7))
        .interfaces();

    assert_eq!(interfaces.len(), 1);
    assert_eq!(interfaces[0].service, "org.freedesktop.Notifications");
    assert_eq!(interfaces[0].interface, "org.freedesktop.Notifications");
    assert_eq!(interfaces[0].path, "/org/freedesktop/Notifications");
}
