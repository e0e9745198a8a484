use pharaoh::Capabilities;

use crate::{Outcome, TestEnv, TestSetup};

pub fn setup(env: &TestEnv) -> TestSetup {
    let manifest =
        env.manifest(Capabilities::empty()).seccomp_filter(env.dir.join("missing.bpf"));

    TestSetup { manifest, data: String::new(), outcome: Outcome::Aborted(71) }
}

pub fn validate(_data: String) {
    unreachable!("target launched without its syscall filter");
}
