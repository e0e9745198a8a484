use std::fs;
use std::path::PathBuf;

use pharaoh::Capabilities;
use serde::{Deserialize, Serialize};

use crate::{Outcome, TestEnv, TestSetup};

/// Application installed next to the launched one.
const OTHER_APP: &str = "org.example.Other";

#[derive(Serialize, Deserialize)]
struct TestData {
    other_root: PathBuf,
    other_data: PathBuf,
}

pub fn setup(env: &TestEnv) -> TestSetup {
    let other_root = env.install(OTHER_APP);
    let other_data = env.dir.join("data").join(OTHER_APP);
    fs::create_dir_all(&other_data).unwrap();
    fs::write(other_data.join("file"), "private").unwrap();

    let manifest = env.manifest(Capabilities::empty());

    let data = TestData { other_root, other_data };
    let data = serde_json::to_string(&data).unwrap();

    TestSetup { manifest, data, outcome: Outcome::Success }
}

pub fn validate(data: String) {
    let data: TestData = serde_json::from_str(&data).unwrap();

    // Another application's install root and data are never exposed.
    assert!(!data.other_root.exists());
    assert!(!data.other_data.exists());
}
