//! D-Bus proxy process.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult};
use std::os::fd::{AsRawFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use rustix::io::FdFlags;

use crate::proxy::ProxyCommand;

/// Maximum time a proxy may take to start listening.
const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Running proxy.
///
/// The proxy exits once its lifeline is closed, and is killed when the
/// process which spawned it dies.
pub struct Proxy {
    child: Child,
    _lifeline: UnixStream,
}

impl Proxy {
    /// Spawn the proxy and wait until it is listening.
    pub fn spawn(command: &ProxyCommand) -> IoResult<Self> {
        let (lifeline, proxy_end) = UnixStream::pair()?;
        let fd = proxy_end.as_raw_fd();

        let mut process = Command::new(&command.program);
        process.args(command.args()).arg(format!("--fd={fd}")).stdin(Stdio::null());
        unsafe {
            process.pre_exec(move || {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) != 0 {
                    return Err(IoError::last_os_error());
                }

                // Hand the descriptor to the proxy across `execve`.
                let fd = BorrowedFd::borrow_raw(fd);
                rustix::io::fcntl_setfd(fd, FdFlags::empty()).map_err(IoError::from)
            });
        }

        let mut child = process.spawn()?;
        drop(proxy_end);

        match Self::await_ready(&lifeline) {
            Ok(()) => {
                log::debug!("D-Bus proxy {} listening on {:?}", child.id(), command.socket);
                Ok(Self { child, _lifeline: lifeline })
            },
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(err)
            },
        }
    }

    fn await_ready(mut lifeline: &UnixStream) -> IoResult<()> {
        lifeline.set_read_timeout(Some(READY_TIMEOUT))?;

        let mut byte = [0; 1];
        match lifeline.read(&mut byte) {
            Ok(1) => Ok(()),
            Ok(_) => Err(IoError::new(ErrorKind::UnexpectedEof, "proxy exited before listening")),
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                Err(IoError::new(ErrorKind::TimedOut, "proxy did not start listening"))
            },
            Err(err) => Err(err),
        }
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Terminate the proxy and reap it.
    pub fn stop(mut self) -> IoResult<()> {
        match self.child.kill() {
            Ok(()) => (),
            // Already reaped.
            Err(err) if err.kind() == ErrorKind::InvalidInput => (),
            Err(err) => return Err(err),
        }
        self.child.wait().map(|_| ())
    }
}
