use std::ffi::OsString;
use std::path::Path;

use pharaoh::proxy::{ProxyCommand, ProxyPolicy};
use pharaoh::BusCapabilities;

const NOTIFICATIONS: &str = "org.freedesktop.Notifications";
const FILE_MANAGER: &str = "org.freedesktop.FileManager1";

#[test]
fn granted_interface_is_forwarded() {
    let policy = ProxyPolicy::new(Some("org.example.App"), BusCapabilities::NOTIFICATIONS);

    assert!(policy.permits(NOTIFICATIONS));
    assert!(!policy.permits(FILE_MANAGER));
}

#[test]
fn nothing_forwarded_by_default() {
    let policy = ProxyPolicy::new(Some("org.example.App"), BusCapabilities::default());

    assert!(!policy.permits(NOTIFICATIONS));
    assert!(!policy.permits(FILE_MANAGER));
    assert_eq!(policy.rules(), ["--filter", "--own=org.example.App"]);
}

#[test]
fn unknown_grants_forward_nothing() {
    let policy = ProxyPolicy::new(None, BusCapabilities::from_bits_retain(1 << 5));

    assert!(!policy.permits(NOTIFICATIONS));
    assert_eq!(policy.own_name(), None);
    assert_eq!(policy.rules(), ["--filter"]);
}

#[test]
fn proxy_arguments() {
    let policy = ProxyPolicy::new(Some("org.example.App"), BusCapabilities::NOTIFICATIONS);
    let command = ProxyCommand::new(
        Path::new("/usr/bin/xdg-dbus-proxy"),
        "unix:path=/run/user/1000/bus",
        Path::new("/tmp/pharaoh-bus-x/bus"),
        &policy,
    );

    let expected: Vec<OsString> = [
        "unix:path=/run/user/1000/bus",
        "/tmp/pharaoh-bus-x/bus",
        "--filter",
        "--own=org.example.App",
        "--call=org.freedesktop.Notifications=org.freedesktop.Notifications.*@/org/freedesktop/Notifications",
        "--broadcast=org.freedesktop.Notifications=org.freedesktop.Notifications.*@/org/freedesktop/Notifications",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    assert_eq!(command.args(), expected);
}
