use std::env;
use std::fs;
use std::path::Path;

use pharaoh::Capabilities;

use crate::{Outcome, TestEnv, TestSetup};

const FILE_CONTENT: &str = "expected content";

pub fn setup(env: &TestEnv) -> TestSetup {
    let manifest = env.manifest(Capabilities::empty());
    TestSetup { manifest, data: String::new(), outcome: Outcome::Success }
}

pub fn validate(_data: String) {
    // System directories are readable but not writable.
    assert!(fs::read_dir("/usr").is_ok());
    assert!(fs::write("/usr/pharaoh-test", FILE_CONTENT).is_err());

    // Sandbox root itself is read-only.
    assert!(fs::write("/pharaoh-test", FILE_CONTENT).is_err());
    assert!(fs::create_dir("/pharaoh-test").is_err());

    // Data directory and temporary directory are writable.
    let home = env::var_os("HOME").unwrap();
    let file = Path::new(&home).join("file");
    fs::write(&file, FILE_CONTENT).unwrap();
    assert_eq!(fs::read_to_string(&file).unwrap(), FILE_CONTENT);

    fs::write("/tmp/file", FILE_CONTENT).unwrap();
}
