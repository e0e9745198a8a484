use std::fs;
use std::io::Error as IoError;

use pharaoh::Capabilities;

use crate::{Outcome, TestEnv, TestSetup};

const POLICY: &str = r#"{
    "main": {
        "mismatch_action": "allow",
        "match_action": { "errno": 1 },
        "filter": [{ "syscall": "getpriority" }]
    }
}"#;

pub fn setup(env: &TestEnv) -> TestSetup {
    let filter = env.dir.join("filter.json");
    fs::write(&filter, POLICY).unwrap();

    let manifest = env.manifest(Capabilities::empty()).seccomp_filter(filter);

    TestSetup { manifest, data: String::new(), outcome: Outcome::Success }
}

pub fn validate(_data: String) {
    // Filtered syscall fails with the policy's errno.
    let result = unsafe { libc::getpriority(libc::PRIO_PROCESS, 0) };
    assert_eq!(result, -1);
    assert_eq!(IoError::last_os_error().raw_os_error(), Some(libc::EPERM));

    // Everything else is allowed.
    let result = unsafe { libc::getppid() };
    assert_eq!(result, 1);

    // Filter cannot be escaped by gaining privileges.
    let no_new_privs = unsafe { libc::prctl(libc::PR_GET_NO_NEW_PRIVS, 0, 0, 0, 0) };
    assert_eq!(no_new_privs, 1);
}
