//! D-Bus proxy spawner.
//!
//! Proxies keep the host's filesystem view and hold the unfiltered bus
//! connection, so they must never be part of the sandbox's PID namespace.
//! The spawner is forked before that namespace exists and starts and stops
//! every proxy on the launcher's behalf. Requests and replies are single
//! lines of JSON.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Error as IoError, ErrorKind, Result as IoResult, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use rustix::process::Pid;
use serde::{Deserialize, Serialize};

use crate::linux::proxy::Proxy;
use crate::proxy::ProxyCommand;

#[derive(Serialize, Deserialize, Debug)]
enum Request {
    Start(ProxyCommand),
    Stop(u32),
}

#[derive(Serialize, Deserialize, Debug)]
enum Reply {
    Started(u32),
    Stopped,
    Failed { errno: Option<i32>, message: String },
}

impl Reply {
    fn failed(error: &IoError) -> Self {
        Self::Failed { errno: error.raw_os_error(), message: error.to_string() }
    }

    fn into_error(self) -> IoError {
        match self {
            Self::Failed { errno: Some(errno), .. } => IoError::from_raw_os_error(errno),
            Self::Failed { message, .. } => IoError::new(ErrorKind::Other, message),
            reply => IoError::new(ErrorKind::InvalidData, format!("unexpected reply {reply:?}")),
        }
    }
}

/// Launcher handle to the spawner process.
pub struct Spawner {
    pid: Pid,
    channel: BufReader<UnixStream>,
}

impl Spawner {
    /// Fork the spawner.
    ///
    /// Must be called before the sandbox's PID namespace is created, while the
    /// calling process is still single-threaded.
    pub fn spawn() -> IoResult<Self> {
        let (channel, spawner_end) = UnixStream::pair()?;
        let parent = rustix::process::getpid();

        match unsafe { libc::fork() } {
            -1 => Err(IoError::last_os_error()),
            0 => {
                drop(channel);
                run(spawner_end, parent)
            },
            pid => {
                drop(spawner_end);
                let pid = Pid::from_raw(pid).ok_or_else(|| IoError::from(ErrorKind::Other))?;
                log::debug!("forked proxy spawner {}", pid.as_raw_nonzero());
                Ok(Self { pid, channel: BufReader::new(channel) })
            },
        }
    }

    /// Start a proxy and wait until it is listening, returning its PID.
    pub fn start(&mut self, command: &ProxyCommand) -> IoResult<u32> {
        match self.request(&Request::Start(command.clone()))? {
            Reply::Started(pid) => Ok(pid),
            reply => Err(reply.into_error()),
        }
    }

    /// Terminate and reap a proxy.
    pub fn stop(&mut self, pid: u32) -> IoResult<()> {
        match self.request(&Request::Stop(pid))? {
            Reply::Stopped => Ok(()),
            reply => Err(reply.into_error()),
        }
    }

    /// Stop all remaining proxies and reap the spawner.
    pub fn shutdown(self) -> IoResult<()> {
        let Self { pid, channel } = self;

        // End-of-file makes the spawner stop its proxies and exit.
        drop(channel);

        let mut status: libc::c_int = 0;
        loop {
            let result = unsafe { libc::waitpid(pid.as_raw_nonzero().get(), &mut status, 0) };
            if result != -1 {
                return Ok(());
            }

            let error = IoError::last_os_error();
            if error.kind() != ErrorKind::Interrupted {
                return Err(error);
            }
        }
    }

    fn request(&mut self, request: &Request) -> IoResult<Reply> {
        let mut message = serde_json::to_vec(request)?;
        message.push(b'\n');
        self.channel.get_mut().write_all(&message)?;

        let mut line = String::new();
        if self.channel.read_line(&mut line)? == 0 {
            return Err(IoError::new(ErrorKind::UnexpectedEof, "proxy spawner exited"));
        }

        Ok(serde_json::from_str(&line)?)
    }
}

impl AsRawFd for Spawner {
    fn as_raw_fd(&self) -> RawFd {
        self.channel.get_ref().as_raw_fd()
    }
}

/// Spawner process main.
fn run(channel: UnixStream, parent: Pid) -> ! {
    unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) };
    if rustix::process::getppid() != Some(parent) {
        unsafe { libc::_exit(0) };
    }

    let mut proxies: HashMap<u32, Proxy> = HashMap::new();
    let mut reader = BufReader::new(&channel);
    let mut writer = &channel;

    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => (),
        }

        let reply = match serde_json::from_str(&line) {
            Ok(Request::Start(command)) => match Proxy::spawn(&command) {
                Ok(proxy) => {
                    let pid = proxy.id();
                    proxies.insert(pid, proxy);
                    Reply::Started(pid)
                },
                Err(err) => Reply::failed(&err),
            },
            Ok(Request::Stop(pid)) => match proxies.remove(&pid).map(Proxy::stop) {
                Some(Err(err)) => Reply::failed(&err),
                Some(Ok(())) | None => Reply::Stopped,
            },
            Err(err) => Reply::failed(&IoError::new(ErrorKind::InvalidData, err)),
        };

        let mut message = match serde_json::to_vec(&reply) {
            Ok(message) => message,
            Err(_) => break,
        };
        message.push(b'\n');
        if writer.write_all(&message).is_err() {
            break;
        }
    }

    for (_, proxy) in proxies.drain() {
        let _ = proxy.stop();
    }

    unsafe { libc::_exit(0) }
}
