use std::fs;
use std::path::{Component, PathBuf};

use pharaoh::Capabilities;
use serde::{Deserialize, Serialize};

use crate::{Outcome, TestEnv, TestSetup};

/// Top-level entries the sandbox root may contain.
const ROOT_ENTRIES: &[&str] =
    &["bin", "dev", "etc", "lib", "lib64", "proc", "run", "sbin", "tmp", "usr"];

#[derive(Serialize, Deserialize)]
struct TestData {
    secret: PathBuf,
    scratch: PathBuf,
}

pub fn setup(env: &TestEnv) -> TestSetup {
    let secret = env.dir.join("secret");
    fs::write(&secret, "secret").unwrap();

    let manifest = env.manifest(Capabilities::empty());

    let data = TestData { secret, scratch: env.dir.clone() };
    let data = serde_json::to_string(&data).unwrap();

    TestSetup { manifest, data, outcome: Outcome::Success }
}

pub fn validate(data: String) {
    let data: TestData = serde_json::from_str(&data).unwrap();

    // Host files next to the install root are hidden.
    assert!(!data.secret.exists());
    assert!(fs::read(&data.secret).is_err());

    // Install root and data are bound at their host paths below the scratch
    // directory, which adds its top-level directory to the root.
    let scratch_top = data.scratch.components().find_map(|component| match component {
        Component::Normal(name) => Some(name.to_os_string()),
        _ => None,
    });

    // Nothing outside the default set is visible.
    for entry in fs::read_dir("/").unwrap() {
        let name = entry.unwrap().file_name();
        if Some(&name) == scratch_top.as_ref() {
            continue;
        }

        let name = name.to_string_lossy();
        assert!(ROOT_ENTRIES.contains(&name.as_ref()), "unexpected root entry {name}");
    }
}
