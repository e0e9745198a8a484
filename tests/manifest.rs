use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use pharaoh::error::ConfigError;
use pharaoh::{BusCapabilities, Capabilities, CapabilitySet, Manifest, ManifestBuilder};
use serde_json::{json, Value};
use tempfile::TempDir;

/// Complete persisted record.
fn record(root: &Path) -> Value {
    json!({
        "app": "org.example.App",
        "path": root,
        "icon": "org.example.App.png",
        "executable": "usr/bin/app",
        "entry": "org.example.App.desktop",
        "permissions": 3,
        "seccomp_filter": null,
        "dbus_app": "org.example.App",
        "dbus_permissions": 1,
    })
}

fn parse(record: &Value) -> Result<Manifest, ConfigError> {
    Manifest::from_json(&record.to_string())
}

#[test]
fn load_complete_record() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("org.example.App.json");
    fs::write(&path, record(Path::new("/opt/app")).to_string()).unwrap();

    let manifest = Manifest::load(&path).unwrap();
    assert_eq!(manifest.app(), "org.example.App");
    assert_eq!(manifest.root(), Path::new("/opt/app"));
    assert_eq!(manifest.executable(), Path::new("/opt/app/usr/bin/app"));
    assert_eq!(manifest.icon(), "org.example.App.png");
    assert_eq!(manifest.entry(), "org.example.App.desktop");
    assert_eq!(manifest.capabilities(), Capabilities::DRI | Capabilities::DBUS);
    assert_eq!(manifest.seccomp_filter(), None);
    assert_eq!(manifest.bus_name(), Some("org.example.App"));
    assert_eq!(manifest.bus_capabilities(), BusCapabilities::NOTIFICATIONS);
}

#[test]
fn missing_required_field() {
    for field in ["app", "path", "icon", "executable", "entry", "permissions"] {
        let mut record = record(Path::new("/opt/app"));
        record.as_object_mut().unwrap().remove(field);

        let result = parse(&record);
        assert!(matches!(result, Err(ConfigError::Parse(_))), "missing {field} was accepted");
    }
}

#[test]
fn missing_manifest_file() {
    let dir = TempDir::new().unwrap();
    let result = Manifest::load(dir.path().join("missing.json"));
    assert!(matches!(result, Err(ConfigError::Read(..))));
}

#[test]
fn optional_fields() {
    let mut record = record(Path::new("/opt/app"));
    let object = record.as_object_mut().unwrap();
    object.remove("seccomp_filter");
    object.remove("dbus_app");
    object.remove("dbus_permissions");

    let manifest = parse(&record).unwrap();
    assert_eq!(manifest.seccomp_filter(), None);
    assert_eq!(manifest.bus_name(), None);
    assert_eq!(manifest.bus_capabilities(), BusCapabilities::default());
}

#[test]
fn null_bus_permissions() {
    let mut record = record(Path::new("/opt/app"));
    record["dbus_permissions"] = Value::Null;

    let manifest = parse(&record).unwrap();
    assert_eq!(manifest.bus_capabilities(), BusCapabilities::default());
}

#[test]
fn invalid_masks() {
    for mask in [json!(-1), json!(1.5), json!(4_294_967_296u64), json!("1"), Value::Null] {
        let mut record = record(Path::new("/opt/app"));
        record["permissions"] = mask.clone();
        assert!(matches!(parse(&record), Err(ConfigError::Parse(_))), "accepted {mask}");
    }

    for mask in [json!(-1), json!(2.5), json!(4_294_967_296u64)] {
        let mut record = record(Path::new("/opt/app"));
        record["dbus_permissions"] = mask.clone();
        assert!(matches!(parse(&record), Err(ConfigError::Parse(_))), "accepted {mask}");
    }
}

#[test]
fn executable_outside_root() {
    for executable in ["../other/bin/app", "/usr/bin/app", ".", "usr/../.."] {
        let mut record = record(Path::new("/opt/app"));
        record["executable"] = json!(executable);

        let result = parse(&record);
        assert!(
            matches!(result, Err(ConfigError::ExecutableOutsideRoot { .. })),
            "{executable} was accepted"
        );
    }

    // Absolute paths beneath the root are fine.
    let mut record = record(Path::new("/opt/app"));
    record["executable"] = json!("/opt/app/usr/bin/app");
    assert!(parse(&record).is_ok());
}

#[test]
fn executable_symlink_escape() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("root");
    let outside = dir.path().join("outside");
    fs::create_dir_all(root.join("usr/bin")).unwrap();
    fs::create_dir_all(&outside).unwrap();
    fs::write(outside.join("app"), "").unwrap();
    symlink(outside.join("app"), root.join("usr/bin/app")).unwrap();

    let result = parse(&record(&root));
    assert!(matches!(result, Err(ConfigError::ExecutableOutsideRoot { .. })));
}

#[test]
fn relative_root() {
    let result = parse(&record(Path::new("opt/app")));
    assert!(matches!(result, Err(ConfigError::RelativeRoot(_))));
}

#[test]
fn invalid_identity() {
    for app in ["", ".", "..", "org/example", "org\0example"] {
        let mut record = record(Path::new("/opt/app"));
        record["app"] = json!(app);
        assert!(matches!(parse(&record), Err(ConfigError::InvalidIdentity(_))), "accepted {app:?}");
    }
}

#[test]
fn bus_names() {
    for name in ["org.example.App", "org.example.App_2", "com.example-corp.Tool"] {
        let mut record = record(Path::new("/opt/app"));
        record["dbus_app"] = json!(name);
        assert!(parse(&record).is_ok(), "rejected {name}");
    }

    for name in ["", "org", ":1.42", "org..example", "org.2example", "org.example.App!"] {
        let mut record = record(Path::new("/opt/app"));
        record["dbus_app"] = json!(name);
        assert!(matches!(parse(&record), Err(ConfigError::InvalidBusName(_))), "accepted {name}");
    }

    let mut record = record(Path::new("/opt/app"));
    record["dbus_app"] = json!(format!("org.{}", "a".repeat(255)));
    assert!(matches!(parse(&record), Err(ConfigError::InvalidBusName(_))));
}

#[test]
fn persist_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("org.example.App.json");

    let manifest = ManifestBuilder::new("org.example.App", "/opt/app", "usr/bin/app")
        .icon("icon.png")
        .entry("app.desktop")
        .capabilities(Capabilities::IPC)
        .capabilities(Capabilities::PIPEWIRE)
        .seccomp_filter("/opt/app/filter.json")
        .bus("org.example.App", BusCapabilities::NOTIFICATIONS)
        .build()
        .unwrap();
    manifest.persist(&path).unwrap();

    let loaded = Manifest::load(&path).unwrap();
    assert_eq!(loaded, manifest);
    assert_eq!(loaded.capabilities(), Capabilities::IPC | Capabilities::PIPEWIRE);

    // Only the manifest itself is left in the directory.
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn persist_replaces_existing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("org.example.App.json");
    fs::write(&path, "{ partial").unwrap();

    let manifest = ManifestBuilder::new("org.example.App", "/opt/app", "usr/bin/app")
        .build()
        .unwrap();
    manifest.persist(&path).unwrap();

    assert_eq!(Manifest::load(&path).unwrap(), manifest);
}

#[test]
fn unknown_bits_persisted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("org.example.App.json");

    let mut record = record(Path::new("/opt/app"));
    record["permissions"] = json!(1u32 << 31 | 1);
    record["dbus_permissions"] = json!(1u32 << 12 | 1);
    let manifest = parse(&record).unwrap();
    manifest.persist(&path).unwrap();

    let persisted: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(persisted["permissions"], json!(1u32 << 31 | 1));
    assert_eq!(persisted["dbus_permissions"], json!(1u32 << 12 | 1));

    let loaded = Manifest::load(&path).unwrap();
    assert_eq!(loaded.capabilities().unknown_bits(), 1 << 31);
    assert_eq!(loaded.capabilities().granted(), [Capabilities::DRI]);
}

#[test]
fn persisted_keys() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("org.example.App.json");
    parse(&record(Path::new("/opt/app"))).unwrap().persist(&path).unwrap();

    let persisted: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    let mut keys: Vec<_> = persisted.as_object().unwrap().keys().cloned().collect();
    keys.sort();
    assert_eq!(keys, [
        "app",
        "dbus_app",
        "dbus_permissions",
        "entry",
        "executable",
        "icon",
        "path",
        "permissions",
        "seccomp_filter",
    ]);
}
