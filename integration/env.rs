use std::env;
use std::path::PathBuf;

use pharaoh::Capabilities;
use serde::{Deserialize, Serialize};

use crate::{Outcome, TestEnv, TestSetup, APP};

#[derive(Serialize, Deserialize)]
struct TestData {
    home: PathBuf,
}

pub fn setup(env: &TestEnv) -> TestSetup {
    let manifest = env.manifest(Capabilities::empty());

    let data = TestData { home: env.dir.join("data").join(APP) };
    let data = serde_json::to_string(&data).unwrap();

    TestSetup { manifest, data, outcome: Outcome::Success }
}

pub fn validate(data: String) {
    let data: TestData = serde_json::from_str(&data).unwrap();

    assert_eq!(env::var("PHARAOH_APP_ID").unwrap(), APP);
    assert_eq!(env::var("TMPDIR").unwrap(), "/tmp");
    assert_eq!(env::var_os("HOME").map(PathBuf::from), Some(data.home.clone()));

    // Host session bus is never inherited.
    assert_eq!(env::var_os("DBUS_SESSION_BUS_ADDRESS"), None);

    // Target starts in its data directory.
    assert_eq!(env::current_dir().unwrap(), data.home);

    let runtime_dir = PathBuf::from(env::var_os("XDG_RUNTIME_DIR").unwrap());
    assert!(runtime_dir.starts_with("/run/user"));
    assert!(runtime_dir.is_dir());
}
