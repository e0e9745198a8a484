use std::fs;
use std::os::unix::process;

use pharaoh::Capabilities;

use crate::{Outcome, TestEnv, TestSetup};

const ARGUMENT: &str = "argument with spaces";

pub fn setup(env: &TestEnv) -> TestSetup {
    let manifest = env.manifest(Capabilities::empty());
    TestSetup { manifest, data: ARGUMENT.into(), outcome: Outcome::Success }
}

pub fn validate(data: String) {
    // Arguments are passed through unchanged.
    assert_eq!(data, ARGUMENT);

    // Target is the first child of the sandbox's own init.
    assert_eq!(process::parent_id(), 1);

    // Only sandbox processes are visible.
    let processes = fs::read_dir("/proc")
        .unwrap()
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().parse::<u32>().is_ok())
        .count();
    assert_eq!(processes, 2);
}
