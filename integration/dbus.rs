use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use pharaoh::{BusCapabilities, Capabilities};
use serde::{Deserialize, Serialize};

use crate::{Outcome, TestEnv, TestSetup, APP};

const PROXY_SCRIPT: &str = r#"#!/bin/sh
echo $$ > 'PID_FILE'
: > "$2"
for arg; do
    case "$arg" in
        --fd=*) fd="${arg#--fd=}" ;;
    esac
done
eval "printf x >&$fd"
exec sleep 600
"#;

#[derive(Serialize, Deserialize)]
struct TestData {
    secret: PathBuf,
}

pub fn setup(env: &TestEnv) -> TestSetup {
    // Stand-in proxy: create the socket path, report readiness, then idle.
    let proxy = env.dir.join("dbus-proxy");
    let script = PROXY_SCRIPT.replace("PID_FILE", &env.proxy_pid_file().to_string_lossy());
    fs::write(&proxy, script).unwrap();
    fs::set_permissions(&proxy, fs::Permissions::from_mode(0o755)).unwrap();

    let upstream = env.dir.join("bus");
    fs::write(&upstream, "").unwrap();
    env::set_var("PHARAOH_DBUS_PROXY", &proxy);
    env::set_var("DBUS_SESSION_BUS_ADDRESS", format!("unix:path={}", upstream.display()));

    let secret = env.dir.join("secret");
    fs::write(&secret, "host only").unwrap();

    let manifest = env.manifest(Capabilities::DBUS).bus(APP, BusCapabilities::NOTIFICATIONS);

    let data = serde_json::to_string(&TestData { secret }).unwrap();

    TestSetup { manifest, data, outcome: Outcome::Success }
}

pub fn validate(data: String) {
    let data: TestData = serde_json::from_str(&data).unwrap();

    // Bus is reached through the proxy socket in the sandbox runtime dir.
    let runtime_dir = PathBuf::from(env::var_os("XDG_RUNTIME_DIR").unwrap());
    let socket = runtime_dir.join("bus");
    let address = env::var("DBUS_SESSION_BUS_ADDRESS").unwrap();
    assert_eq!(address, format!("unix:path={}", socket.display()));
    assert!(socket.exists());

    // Proxy is not part of the sandbox, only init and the target are.
    let pids: Vec<u32> = fs::read_dir("/proc")
        .unwrap()
        .flatten()
        .filter_map(|entry| entry.file_name().to_string_lossy().parse().ok())
        .collect();
    assert_eq!(pids.len(), 2, "unexpected processes: {pids:?}");

    // No visible process exposes the host's filesystem.
    for pid in pids {
        let relative = data.secret.strip_prefix("/").unwrap();
        let leaked = PathBuf::from(format!("/proc/{pid}/root")).join(relative);
        assert!(fs::read(&leaked).is_err(), "host file readable through {leaked:?}");
    }
    assert!(fs::read(&data.secret).is_err());
}
