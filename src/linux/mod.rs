//! Linux isolation host.

use std::fs::{self, DirBuilder};
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::mem::MaybeUninit;
use std::os::fd::AsRawFd;
use std::os::unix::fs::{symlink, DirBuilderExt};
use std::path::Path;
use std::process::ExitStatus;
use std::ptr;

use crate::error::{Error, Result};
use crate::filter::FilterProgram;
use crate::launcher::{BindMount, ExecTarget, Host};
use crate::linux::init::Init;
use crate::linux::spawner::Spawner;
use crate::proxy::ProxyCommand;

mod init;
mod mounts;
mod namespaces;
mod proxy;
pub mod seccomp;
mod spawner;

/// Signals cancelling a launch.
const CANCEL_SIGNALS: [libc::c_int; 3] = [libc::SIGINT, libc::SIGTERM, libc::SIGHUP];

/// Isolation primitives of the running kernel.
///
/// Creating the host blocks the cancellation signals of the calling process
/// for the lifetime of the process, so a pending cancellation can be observed
/// between setup steps. The sandboxed target starts with the original mask.
///
/// D-Bus proxies are started by a spawner forked before the sandbox's PID
/// namespace, so they are never visible from inside the sandbox.
pub struct LinuxHost {
    signals: SignalMask,
    init: Option<Init>,
    spawner: Option<Spawner>,
    filter: Option<FilterProgram>,
}

impl LinuxHost {
    /// Prepare the calling process for launching a sandbox.
    ///
    /// The calling process must be single-threaded.
    pub fn new() -> Result<Self> {
        let signals = SignalMask::block(&CANCEL_SIGNALS).map_err(Error::privilege("block signals"))?;
        Ok(Self { signals, init: None, spawner: None, filter: None })
    }

    fn init(&mut self) -> Result<&mut Init> {
        self.init.as_mut().ok_or_else(|| Error::Privilege {
            operation: "enter the sandbox",
            source: IoError::new(ErrorKind::NotFound, "namespaces were not created"),
        })
    }
}

impl Host for LinuxHost {
    fn create_namespaces(&mut self) -> IoResult<()> {
        namespaces::create_namespaces()?;

        let spawner = Spawner::spawn()?;
        let init = namespaces::unshare_pids()
            .and_then(|()| Init::spawn(&self.signals, spawner.as_raw_fd()));

        match init {
            Ok(init) => {
                self.init = Some(init);
                self.spawner = Some(spawner);
                Ok(())
            },
            Err(err) => {
                let _ = spawner.shutdown();
                Err(err)
            },
        }
    }

    fn release_namespaces(&mut self) -> IoResult<()> {
        let killed = match self.init.as_mut() {
            Some(init) => init.kill(),
            None => Ok(()),
        };

        let stopped = match self.spawner.take() {
            Some(spawner) => spawner.shutdown(),
            None => Ok(()),
        };

        killed.and(stopped)
    }

    fn mount_tmpfs(&mut self, target: &Path, mode: u32) -> IoResult<()> {
        mounts::mount_tmpfs(target, mode)
    }

    fn bind(&mut self, mount: &BindMount) -> IoResult<()> {
        mounts::bind(&mount.source, &mount.target, mount.writable)
    }

    fn create_dir(&mut self, path: &Path, mode: u32) -> IoResult<()> {
        DirBuilder::new().recursive(true).mode(mode).create(path)
    }

    fn symlink(&mut self, original: &Path, link: &Path) -> IoResult<()> {
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent)?;
        }
        symlink(original, link)
    }

    fn unmount(&mut self, target: &Path) -> IoResult<()> {
        mounts::unmount(target)
    }

    fn start_proxy(&mut self, command: &ProxyCommand) -> IoResult<u32> {
        match self.spawner.as_mut() {
            Some(spawner) => spawner.start(command),
            None => Err(IoError::new(ErrorKind::NotConnected, "namespaces were not created")),
        }
    }

    fn stop_proxy(&mut self, pid: u32) -> IoResult<()> {
        match self.spawner.as_mut() {
            Some(spawner) => spawner.stop(pid),
            None => Ok(()),
        }
    }

    fn install_filter(&mut self, program: &FilterProgram) -> Result<()> {
        // Installed by the target right before `execve`.
        self.filter = Some(program.clone());
        Ok(())
    }

    fn exec(&mut self, target: &ExecTarget) -> Result<()> {
        let filter = self.filter.take();
        self.init()?.exec(target, filter)
    }

    fn wait(&mut self) -> IoResult<ExitStatus> {
        match self.init.as_mut() {
            Some(init) => init.wait(),
            None => Err(IoError::new(ErrorKind::NotFound, "no sandbox is running")),
        }
    }

    fn cancelled(&mut self) -> bool {
        self.signals.pending()
    }
}

/// Blocked signals and the mask they were blocked from.
pub(crate) struct SignalMask {
    blocked: libc::sigset_t,
    original: libc::sigset_t,
}

impl SignalMask {
    /// Block signals for the calling thread.
    fn block(signals: &[libc::c_int]) -> IoResult<Self> {
        unsafe {
            let mut blocked = MaybeUninit::<libc::sigset_t>::zeroed();
            libc::sigemptyset(blocked.as_mut_ptr());
            for signal in signals {
                libc::sigaddset(blocked.as_mut_ptr(), *signal);
            }
            let blocked = blocked.assume_init();

            let mut original = MaybeUninit::<libc::sigset_t>::zeroed();
            if libc::sigprocmask(libc::SIG_BLOCK, &blocked, original.as_mut_ptr()) != 0 {
                return Err(IoError::last_os_error());
            }

            Ok(Self { blocked, original: original.assume_init() })
        }
    }

    /// Check whether any of the blocked signals was received.
    fn pending(&self) -> bool {
        unsafe {
            let mut pending = MaybeUninit::<libc::sigset_t>::zeroed();
            if libc::sigpending(pending.as_mut_ptr()) != 0 {
                return false;
            }
            let pending = pending.assume_init();

            CANCEL_SIGNALS.iter().any(|signal| {
                libc::sigismember(&self.blocked, *signal) == 1
                    && libc::sigismember(&pending, *signal) == 1
            })
        }
    }

    /// Restore the mask from before the signals were blocked.
    fn restore(&self) {
        unsafe { libc::sigprocmask(libc::SIG_SETMASK, &self.original, ptr::null_mut()) };
    }
}
