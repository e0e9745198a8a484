use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{self, Command, Stdio};

use pharaoh::error::Error;
use pharaoh::{Capabilities, Launcher, Layout, LinuxHost, ManifestBuilder};
use tempfile::TempDir;

test_mods! {
    mod dbus;
    mod env;
    mod exec;
    mod fs_dev;
    mod fs_readonly;
    mod fs_restricted;
    mod isolation;
    mod missing_filter;
    mod seccomp;
}

/// Integration test directory.
const TEST_DIR: &str = "integration";

/// Application installed for every test.
pub const APP: &str = "org.example.Harness";

/// Exit code of a test which cannot run on this host.
const SKIPPED: i32 = 200;

/// Seconds a single test may take before it is considered hung.
const TIMEOUT: u32 = 60;

/// Test setup state.
pub struct TestSetup {
    pub manifest: ManifestBuilder,
    pub data: String,
    pub outcome: Outcome,
}

/// Expected launch result.
pub enum Outcome {
    /// The target runs and validates successfully.
    Success,
    /// The launch aborts with this exit code.
    Aborted(i32),
}

/// Scratch host tree of one test.
pub struct TestEnv {
    pub dir: PathBuf,
}

impl TestEnv {
    /// Install a copy of the harness as an application.
    pub fn install(&self, app: &str) -> PathBuf {
        let root = self.dir.join("apps").join(app);
        fs::create_dir_all(root.join("usr/bin")).unwrap();

        let executable = root.join("usr/bin/harness");
        fs::copy(std::env::current_exe().unwrap(), &executable).unwrap();
        fs::set_permissions(&executable, fs::Permissions::from_mode(0o755)).unwrap();

        root
    }

    /// Manifest of the harness application.
    pub fn manifest(&self, capabilities: Capabilities) -> ManifestBuilder {
        let root = self.install(APP);
        ManifestBuilder::new(APP, root, "usr/bin/harness")
            .icon("harness.png")
            .entry("harness.desktop")
            .capabilities(capabilities)
    }

    /// File a stand-in D-Bus proxy records its PID in.
    pub fn proxy_pid_file(&self) -> PathBuf {
        self.dir.join("proxy.pid")
    }
}

fn main() {
    let mut args = std::env::args().skip(1);

    // Get test name or spawn all the tests.
    let test_name = match args.next() {
        Some(test_name) => test_name,
        None => {
            spawn_tests();
            return;
        },
    };

    // Find test matching the name.
    let test = match TESTS.iter().find(|(cmd, ..)| cmd == &test_name) {
        Some(test) => test,
        None => unreachable!("invalid test module name: {test_name:?}"),
    };

    // Run setup or test validation.
    match args.next() {
        Some(test_data) => test.2(test_data),
        None => run_setup(&test_name, &test.1),
    }
}

/// Reexecute binary to launch tests as separate processes.
fn spawn_tests() {
    eprintln!("\nrunning {} tests", TESTS.len());

    // Spawn child processes for all tests.
    let current_exe = std::env::current_exe().unwrap();
    let children: Vec<_> = TESTS
        .iter()
        .map(|(cmd, ..)| {
            let child =
                Command::new(&current_exe).args([cmd]).stderr(Stdio::piped()).spawn().unwrap();
            (cmd, child)
        })
        .collect();

    // Check results for each test.
    let mut passed = 0;
    let mut skipped = 0;
    for (name, child) in children {
        let output = match child.wait_with_output() {
            Ok(output) => output,
            Err(err) => {
                eprintln!("test {TEST_DIR}/{name}.rs ... \x1b[31mHARNESS FAILURE\x1b[0m: {err}");
                continue;
            },
        };

        // Report individual test results.
        if output.status.code() == Some(SKIPPED) {
            eprintln!("test {TEST_DIR}/{name}.rs ... \x1b[33mignored\x1b[0m");
            skipped += 1;
        } else if !output.status.success() {
            eprintln!("test {TEST_DIR}/{name}.rs ... \x1b[31mFAILED\x1b[0m");

            // Print stderr on failure if there is some.
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.is_empty() {
                eprintln!("\n---- {TEST_DIR}/{name}.rs stderr ----\n{}\n", stderr.trim());
            }
        } else {
            eprintln!("test {TEST_DIR}/{name}.rs ... \x1b[32mok\x1b[0m");
            passed += 1;
        }
    }

    // Print total results.
    let failed = TESTS.len() - passed - skipped;
    if failed > 0 {
        eprintln!(
            "\ntest result: \x1b[31mFAILED\x1b[0m. {passed} passed; {failed} failed; {skipped} ignored"
        );
    } else {
        eprintln!(
            "\ntest result: \x1b[32mok\x1b[0m. {passed} passed; {failed} failed; {skipped} ignored"
        );
    }

    eprintln!();

    if failed > 0 {
        process::exit(1);
    }
}

/// Run test's setup step and launch the validation inside the sandbox.
fn run_setup(test_name: &str, setup: &fn(&TestEnv) -> TestSetup) {
    let tempdir = TempDir::new().unwrap();
    let env = TestEnv { dir: tempdir.path().to_path_buf() };
    let test_setup = setup(&env);

    // Fail hung launches instead of blocking the whole run.
    unsafe { libc::alarm(TIMEOUT) };

    let mut layout = Layout::from_env();
    layout.app_dir = env.dir.join("apps");
    layout.data_dir = env.dir.join("data");
    layout.staging_dir = env.dir.join("staging");
    layout.console = None;
    fs::create_dir_all(&layout.staging_dir).unwrap();
    let staging_dir = layout.staging_dir.clone();

    let manifest = test_setup.manifest.build().unwrap();
    let host = LinuxHost::new().unwrap();

    // Reexecute test inside the sandbox.
    let result = Launcher::new(manifest, layout, host).args([test_name, test_setup.data.as_str()]).launch();

    match (result, test_setup.outcome) {
        (Err(Error::Privilege { operation: "create namespaces", source }), _) => {
            eprintln!("user namespaces unavailable: {source}");
            process::exit(SKIPPED);
        },
        (Ok(session), Outcome::Success) => {
            let status = session.wait().unwrap();
            assert_no_leftovers(&env, &staging_dir);
            if !status.success() {
                process::exit(status.code().unwrap_or(1));
            }
        },
        (Err(err), Outcome::Aborted(code)) => {
            assert_eq!(err.exit_code(), code, "unexpected error: {err}");
            assert_no_leftovers(&env, &staging_dir);
        },
        (Ok(_), Outcome::Aborted(code)) => panic!("launch succeeded, expected exit code {code}"),
        (Err(err), Outcome::Success) => panic!("launch failed: {err}"),
    }
}

/// Ensure a launch left neither mounts, staging directories nor processes
/// behind.
fn assert_no_leftovers(env: &TestEnv, staging_dir: &Path) {
    let mountinfo = fs::read_to_string("/proc/self/mountinfo").unwrap();
    let staging = staging_dir.to_string_lossy();
    for line in mountinfo.lines() {
        assert!(!line.contains(staging.as_ref()), "mount left behind: {line}");
    }

    assert_eq!(fs::read_dir(staging_dir).unwrap().count(), 0);

    // Every helper process was reaped.
    let mut status = 0;
    let result = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
    let error = std::io::Error::last_os_error();
    assert_eq!((result, error.raw_os_error()), (-1, Some(libc::ECHILD)), "child left behind");

    if let Ok(pid) = fs::read_to_string(env.proxy_pid_file()) {
        let proc_dir = PathBuf::from(format!("/proc/{}", pid.trim()));
        assert!(!proc_dir.exists(), "D-Bus proxy {} still running", pid.trim());
    }
}

#[macro_export]
macro_rules! test_mods {
    ($($(#[$cfg:meta])? mod $mod:ident);*;) => {
        $(
            $( #[$cfg] )?
            mod $mod;
        )*

        const TESTS: &[(&str, fn(&$crate::TestEnv) -> $crate::TestSetup, fn(String))] = &[$(
            $( #[$cfg] )?
            (stringify!($mod), $mod :: setup, $mod :: validate),
        )*];
    };
}
