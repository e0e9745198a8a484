//! Sandbox init process.
//!
//! The init is the first process of the sandbox's PID namespace. It waits for
//! the supervisor to hand off the target, moves into the staging root, forks
//! the target and reaps every process of the sandbox until none is left.

use std::env;
use std::ffi::{CString, OsStr};
use std::fs::File;
use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};
use std::mem;
use std::os::fd::{OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::ptr;

use rustix::pipe::{self, PipeFlags};
use rustix::process::{Pid, Signal};
use serde::{Deserialize, Serialize};

use crate::error::{Error, FilterFailure, Result};
use crate::filter::FilterProgram;
use crate::launcher::ExecTarget;
use crate::linux::seccomp::{self, SyscallFilter};
use crate::linux::{mounts, namespaces, SignalMask};

/// Exit code of the init when it failed before the target was started.
const SETUP_FAILURE: i32 = 1;

/// Exit code of the target when it failed before `execve`.
const EXEC_FAILURE: i32 = 127;

/// Everything the init needs to start the target.
#[derive(Serialize, Deserialize)]
struct Handoff {
    target: ExecTarget,
    filter: Option<FilterProgram>,
}

/// Sandbox side of the launch which failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum Stage {
    Handoff = 1,
    Root = 2,
    Filter = 3,
    Exec = 4,
}

impl Stage {
    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Handoff),
            2 => Some(Self::Root),
            3 => Some(Self::Filter),
            4 => Some(Self::Exec),
            _ => None,
        }
    }
}

/// Failure report size: stage and errno, both little endian.
const REPORT_SIZE: usize = 2 * mem::size_of::<u32>();

/// Supervisor handle to the sandbox init.
pub struct Init {
    pid: Pid,
    control: Option<OwnedFd>,
    failures: Option<OwnedFd>,
    status: Option<ExitStatus>,
}

impl Init {
    /// Fork the sandbox init.
    ///
    /// Must be called right after the PID namespace was created, while the
    /// calling process is still single-threaded. The init closes the
    /// launcher's proxy spawner channel, which must never reach the sandbox.
    pub fn spawn(signals: &SignalMask, spawner_channel: RawFd) -> IoResult<Self> {
        let (control_rx, control_tx) = pipe::pipe_with(PipeFlags::CLOEXEC)?;
        let (failures_rx, failures_tx) = pipe::pipe_with(PipeFlags::CLOEXEC)?;

        match unsafe { libc::fork() } {
            -1 => Err(IoError::last_os_error()),
            0 => {
                unsafe { libc::close(spawner_channel) };
                drop(control_tx);
                drop(failures_rx);
                run(control_rx, failures_tx, signals)
            },
            pid => {
                let pid = Pid::from_raw(pid).ok_or_else(|| IoError::from(ErrorKind::Other))?;
                log::debug!("forked sandbox init {}", pid.as_raw_nonzero());
                Ok(Self { pid, control: Some(control_tx), failures: Some(failures_rx), status: None })
            },
        }
    }

    /// Hand the target off to the init and wait until it was executed.
    pub fn exec(&mut self, target: &ExecTarget, filter: Option<FilterProgram>) -> Result<()> {
        let filter_path = filter.as_ref().and_then(|filter| filter.source()).map(PathBuf::from);
        let handoff = Handoff { target: target.clone(), filter };
        let message = serde_json::to_vec(&handoff).map_err(|err| Error::Exec {
            path: target.program.clone(),
            source: IoError::new(ErrorKind::InvalidData, err),
        })?;

        // Closing the control pipe marks the end of the handoff.
        let control = self.control.take().ok_or_else(|| Error::Privilege {
            operation: "hand off the target",
            source: IoError::from(ErrorKind::NotConnected),
        })?;
        File::from(control)
            .write_all(&message)
            .map_err(Error::privilege("hand off the target"))?;

        // The report pipe is closed by `execve` or by the sandbox's exit.
        let mut report = Vec::new();
        if let Some(failures) = self.failures.take() {
            File::from(failures)
                .read_to_end(&mut report)
                .map_err(Error::privilege("await the target"))?;
        }

        if report.len() < REPORT_SIZE {
            return Ok(());
        }

        let stage = u32::from_le_bytes([report[0], report[1], report[2], report[3]]);
        let errno = i32::from_le_bytes([report[4], report[5], report[6], report[7]]);
        let source = IoError::from_raw_os_error(errno);

        log::debug!("sandbox reported failure in stage {stage}: {source}");

        Err(match Stage::from_raw(stage) {
            Some(Stage::Handoff) | Some(Stage::Root) | None => {
                Error::Privilege { operation: "enter the sandbox root", source }
            },
            Some(Stage::Filter) => Error::Filter {
                path: filter_path.unwrap_or_default(),
                reason: FilterFailure::Install(source),
            },
            Some(Stage::Exec) => Error::Exec { path: target.program.clone(), source },
        })
    }

    /// Wait for the init to exit.
    ///
    /// This function will continue to have the same return value after it has
    /// been called at least once.
    pub fn wait(&mut self) -> IoResult<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }

        // Without a handoff the init exits on its own.
        self.control = None;

        let mut status: libc::c_int = 0;
        loop {
            let result = unsafe { libc::waitpid(self.pid.as_raw_nonzero().get(), &mut status, 0) };
            if result != -1 {
                break;
            }

            let error = IoError::last_os_error();
            if error.kind() != ErrorKind::Interrupted {
                return Err(error);
            }
        }

        let status = ExitStatus::from_raw(status);
        self.status = Some(status);
        Ok(status)
    }

    /// Terminate the init and with it the whole sandbox.
    pub fn kill(&mut self) -> IoResult<()> {
        if self.status.is_some() {
            return Ok(());
        }

        rustix::process::kill_process(self.pid, Signal::Kill)?;
        self.wait().map(|_| ())
    }
}

/// Init process main.
fn run(control: OwnedFd, failures: OwnedFd, signals: &SignalMask) -> ! {
    unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) };

    // End-of-file without a message means the launch was aborted.
    let mut message = Vec::new();
    if File::from(control).read_to_end(&mut message).is_err() || message.is_empty() {
        exit(0);
    }

    let handoff: Handoff = match serde_json::from_slice(&message) {
        Ok(handoff) => handoff,
        Err(_) => fail(&failures, Stage::Handoff, libc::EINVAL),
    };

    if let Err(err) = enter_root(&handoff.target.root) {
        fail(&failures, Stage::Root, errno(&err));
    }

    match unsafe { libc::fork() } {
        -1 => fail(&failures, Stage::Exec, errno(&IoError::last_os_error())),
        0 => exec_target(handoff, &failures, signals),
        target => {
            drop(failures);
            exit(reap(target))
        },
    }
}

/// Replace the filesystem view of the init with the staging root.
fn enter_root(root: &Path) -> IoResult<()> {
    // Keep the supervisor's view of the host intact.
    namespaces::unshare_mounts()?;

    mounts::mount_proc(&root.join("proc"))?;
    mounts::pivot_root(root)
}

/// Target process main.
fn exec_target(handoff: Handoff, failures: &OwnedFd, signals: &SignalMask) -> ! {
    let Handoff { target, filter } = handoff;

    signals.restore();

    if let Err(err) = env::set_current_dir(&target.cwd) {
        fail(failures, Stage::Exec, errno(&err));
    }

    // Everything allocating has to happen before the filter is in place.
    let exec = match Execve::new(&target) {
        Ok(exec) => exec,
        Err(err) => fail(failures, Stage::Exec, errno(&err)),
    };
    let filter = filter.as_ref().map(SyscallFilter::new);

    if let Err(err) = seccomp::no_new_privs() {
        fail(failures, Stage::Filter, errno(&err));
    }

    if let Some(filter) = &filter {
        if let Err(err) = filter.apply() {
            fail(failures, Stage::Filter, errno(&err));
        }
    }

    let err = exec.exec();
    fail(failures, Stage::Exec, errno(&err))
}

/// Prepared `execve` arguments.
struct Execve {
    program: CString,
    _strings: Vec<CString>,
    argv: Vec<*const libc::c_char>,
    envp: Vec<*const libc::c_char>,
}

impl Execve {
    fn new(target: &ExecTarget) -> IoResult<Self> {
        let c_string = |bytes: &[u8]| {
            CString::new(bytes).map_err(|err| IoError::new(ErrorKind::InvalidInput, err))
        };

        let program = c_string(target.program.as_os_str().as_bytes())?;

        let mut args = vec![program.clone()];
        for arg in &target.args {
            args.push(c_string(arg.as_bytes())?);
        }

        let mut vars = Vec::with_capacity(target.env.len());
        for (key, value) in &target.env {
            let mut var = key.as_bytes().to_vec();
            var.push(b'=');
            var.extend_from_slice(OsStr::as_bytes(value));
            vars.push(c_string(&var)?);
        }

        let pointers = |strings: &[CString]| {
            strings.iter().map(|string| string.as_ptr()).chain([ptr::null()]).collect::<Vec<_>>()
        };
        let argv = pointers(&args);
        let envp = pointers(&vars);

        let mut strings = args;
        strings.append(&mut vars);

        Ok(Self { program, _strings: strings, argv, envp })
    }

    /// Execute the target, returning only on failure.
    fn exec(&self) -> IoError {
        unsafe { libc::execve(self.program.as_ptr(), self.argv.as_ptr(), self.envp.as_ptr()) };
        IoError::last_os_error()
    }
}

/// Reap every process of the sandbox, returning the target's exit code.
fn reap(target: libc::pid_t) -> i32 {
    let mut code = SETUP_FAILURE;

    loop {
        let mut status: libc::c_int = 0;
        let pid = unsafe { libc::waitpid(-1, &mut status, 0) };

        if pid == -1 {
            if IoError::last_os_error().kind() == ErrorKind::Interrupted {
                continue;
            }

            // No children left.
            return code;
        }

        if pid == target {
            let status = ExitStatus::from_raw(status);
            code = match (status.code(), status.signal()) {
                (Some(code), _) => code,
                (None, Some(signal)) => 128 + signal,
                (None, None) => SETUP_FAILURE,
            };
        }
    }
}

/// Report a failure to the supervisor and exit.
fn fail(failures: &OwnedFd, stage: Stage, errno: i32) -> ! {
    let mut report = [0; REPORT_SIZE];
    report[..4].copy_from_slice(&(stage as u32).to_le_bytes());
    report[4..].copy_from_slice(&errno.to_le_bytes());
    let _ = rustix::io::write(failures, &report);

    exit(if stage == Stage::Exec { EXEC_FAILURE } else { SETUP_FAILURE })
}

fn errno(error: &IoError) -> i32 {
    error.raw_os_error().unwrap_or(libc::EIO)
}

/// Exit without running any of the supervisor's exit handlers.
fn exit(code: i32) -> ! {
    unsafe { libc::_exit(code) }
}
