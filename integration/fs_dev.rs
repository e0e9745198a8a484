use std::fs;
use std::path::Path;

use pharaoh::Capabilities;

use crate::{Outcome, TestEnv, TestSetup};

const DEVICES: &[&str] = &["console", "fd", "null", "stderr", "stdin", "stdout", "zero"];

pub fn setup(env: &TestEnv) -> TestSetup {
    let manifest = env.manifest(Capabilities::empty());
    TestSetup { manifest, data: String::new(), outcome: Outcome::Success }
}

pub fn validate(_data: String) {
    // Only the minimal device set is present.
    for entry in fs::read_dir("/dev").unwrap() {
        let name = entry.unwrap().file_name();
        let name = name.to_string_lossy();
        assert!(DEVICES.contains(&name.as_ref()), "unexpected device {name}");
    }

    // GPU and shared memory require a grant.
    assert!(!Path::new("/dev/dri").exists());
    assert!(!Path::new("/dev/shm").exists());

    // Null device is usable.
    fs::write("/dev/null", b"discarded").unwrap();
    assert_eq!(fs::read("/dev/null").unwrap(), b"");
}
