//! Sandbox launcher.
//!
//! The launcher drives a single application from the unconfined calling
//! process to a confined running target. Setup is strictly sequential:
//!
//! ```text
//! Init -> NamespacesCreated -> RootPrepared -> CapabilitiesBound
//!      -> [DBusProxyReady] -> [FilterInstalled] -> Execed
//! ```
//!
//! Any failure aborts the launch and unwinds every step performed so far.

use std::env;
use std::ffi::OsString;
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capabilities::{Capabilities, CapabilitySet};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::filter::FilterProgram;
use crate::layout::Layout;
use crate::manifest::Manifest;
use crate::proxy::{ProxyCommand, ProxyPolicy};
use crate::teardown::{Teardown, Undo};

/// Delay before the single proxy start retry.
pub const PROXY_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Host isolation primitives.
///
/// All paths are host paths; mount targets are located beneath the staging
/// root passed to the first [`Host::mount_tmpfs`] call.
pub trait Host {
    /// Create the sandbox's mount, PID and IPC namespaces.
    fn create_namespaces(&mut self) -> IoResult<()>;

    /// Terminate everything started inside the namespaces.
    fn release_namespaces(&mut self) -> IoResult<()>;

    /// Mount a fresh tmpfs, creating the mount point.
    fn mount_tmpfs(&mut self, target: &Path, mode: u32) -> IoResult<()>;

    /// Bind a host path, creating the mount point.
    fn bind(&mut self, mount: &BindMount) -> IoResult<()>;

    /// Create a directory inside the staging root.
    fn create_dir(&mut self, path: &Path, mode: u32) -> IoResult<()>;

    /// Create a symlink inside the staging root.
    fn symlink(&mut self, original: &Path, link: &Path) -> IoResult<()>;

    /// Detach a mount.
    fn unmount(&mut self, target: &Path) -> IoResult<()>;

    /// Start a D-Bus proxy and wait until it is ready, returning its PID.
    fn start_proxy(&mut self, command: &ProxyCommand) -> IoResult<u32>;

    /// Terminate a D-Bus proxy.
    fn stop_proxy(&mut self, pid: u32) -> IoResult<()>;

    /// Install the syscall filter of the target process.
    ///
    /// No other setup may follow this call except [`Host::exec`].
    fn install_filter(&mut self, program: &FilterProgram) -> Result<()>;

    /// Replace the confined process image with the target executable.
    fn exec(&mut self, target: &ExecTarget) -> Result<()>;

    /// Wait for the sandbox to exit.
    fn wait(&mut self) -> IoResult<ExitStatus>;

    /// Check whether the launch was cancelled.
    fn cancelled(&mut self) -> bool;
}

impl<T: Host + ?Sized> Host for &mut T {
    fn create_namespaces(&mut self) -> IoResult<()> {
        (**self).create_namespaces()
    }

    fn release_namespaces(&mut self) -> IoResult<()> {
        (**self).release_namespaces()
    }

    fn mount_tmpfs(&mut self, target: &Path, mode: u32) -> IoResult<()> {
        (**self).mount_tmpfs(target, mode)
    }

    fn bind(&mut self, mount: &BindMount) -> IoResult<()> {
        (**self).bind(mount)
    }

    fn create_dir(&mut self, path: &Path, mode: u32) -> IoResult<()> {
        (**self).create_dir(path, mode)
    }

    fn symlink(&mut self, original: &Path, link: &Path) -> IoResult<()> {
        (**self).symlink(original, link)
    }

    fn unmount(&mut self, target: &Path) -> IoResult<()> {
        (**self).unmount(target)
    }

    fn start_proxy(&mut self, command: &ProxyCommand) -> IoResult<u32> {
        (**self).start_proxy(command)
    }

    fn stop_proxy(&mut self, pid: u32) -> IoResult<()> {
        (**self).stop_proxy(pid)
    }

    fn install_filter(&mut self, program: &FilterProgram) -> Result<()> {
        (**self).install_filter(program)
    }

    fn exec(&mut self, target: &ExecTarget) -> Result<()> {
        (**self).exec(target)
    }

    fn wait(&mut self) -> IoResult<ExitStatus> {
        (**self).wait()
    }

    fn cancelled(&mut self) -> bool {
        (**self).cancelled()
    }
}

/// Bind mount from the host into the staging root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: PathBuf,
    pub target: PathBuf,
    pub writable: bool,
}

/// Process image started inside the sandbox.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExecTarget {
    /// Staging root the sandbox pivots into.
    pub root: PathBuf,
    /// Executable path inside the sandbox.
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(OsString, OsString)>,
    /// Working directory inside the sandbox.
    pub cwd: PathBuf,
}

/// Launch progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LaunchState {
    Init,
    NamespacesCreated,
    RootPrepared,
    CapabilitiesBound,
    DBusProxyReady,
    FilterInstalled,
    Execed,
    Aborted,
}

impl Display for LaunchState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Sandbox launcher for one application.
pub struct Launcher<H: Host> {
    manifest: Manifest,
    layout: Layout,
    host: H,
    args: Vec<OsString>,
    env: Environment,
}

impl<H: Host> Launcher<H> {
    /// Prepare the launch of an application.
    ///
    /// The child environment is derived from the current process environment.
    pub fn new(manifest: Manifest, layout: Layout, host: H) -> Self {
        Self {
            manifest,
            layout,
            host,
            args: Vec::new(),
            env: Environment::from_parent(env::vars_os()),
        }
    }

    /// Arguments passed to the target executable.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the parent environment snapshot.
    pub fn parent_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        self.env = Environment::from_parent(vars);
        self
    }

    /// Run the isolation protocol up to the target's execution.
    ///
    /// On failure all setup is undone before the error is returned.
    pub fn launch(self) -> Result<Session<H>> {
        let Self { manifest, layout, host, args, env } = self;
        let mut setup = Setup { host, teardown: Teardown::new(), state: LaunchState::Init };

        let result = Protocol { manifest: &manifest, layout: &layout, setup: &mut setup, env, args }
            .run();

        match result {
            Ok(()) => Ok(Session { setup }),
            Err(err) => {
                log::error!("launch of {} aborted in state {}: {err}", manifest.app(), setup.state);
                setup.state = LaunchState::Aborted;
                setup.teardown.unwind(&mut setup.host);
                Err(err)
            },
        }
    }
}

/// Running sandbox session.
///
/// Dropping the session without waiting tears it down immediately.
pub struct Session<H: Host> {
    setup: Setup<H>,
}

impl<H: Host> Session<H> {
    /// Wait for the sandbox to exit, then tear down all helpers and mounts.
    pub fn wait(mut self) -> IoResult<ExitStatus> {
        let status = self.setup.host.wait();
        self.setup.teardown.unwind(&mut self.setup.host);
        status
    }

    pub fn state(&self) -> LaunchState {
        self.setup.state
    }
}

/// Launch resources and their undo actions.
struct Setup<H: Host> {
    host: H,
    teardown: Teardown,
    state: LaunchState,
}

impl<H: Host> Drop for Setup<H> {
    fn drop(&mut self) {
        self.teardown.unwind(&mut self.host);
    }
}

/// Isolation protocol state.
struct Protocol<'a, H: Host> {
    manifest: &'a Manifest,
    layout: &'a Layout,
    setup: &'a mut Setup<H>,
    env: Environment,
    args: Vec<OsString>,
}

impl<H: Host> Protocol<'_, H> {
    fn run(mut self) -> Result<()> {
        self.check_cancelled()?;
        let (root, data_dir) = self.init()?;

        self.enter(LaunchState::NamespacesCreated)?;
        self.setup.host.create_namespaces().map_err(Error::privilege("create namespaces"))?;
        self.setup.teardown.push(Undo::ReleaseNamespaces);

        self.enter(LaunchState::RootPrepared)?;
        self.prepare_root(&root, &data_dir)?;

        self.enter(LaunchState::CapabilitiesBound)?;
        self.bind_capabilities(&root)?;

        let capabilities = self.manifest.capabilities();
        if capabilities.grants(Capabilities::DBUS) {
            self.enter(LaunchState::DBusProxyReady)?;
            self.start_proxy(&root)?;
        } else if let Some(name) = self.manifest.bus_name() {
            log::warn!("ignoring bus name {name}: D-Bus access is not granted");
        }

        check_executable(self.manifest.executable())?;

        if let Some(path) = self.manifest.seccomp_filter() {
            self.enter(LaunchState::FilterInstalled)?;
            let program = FilterProgram::load(path)
                .map_err(|reason| Error::Filter { path: path.into(), reason })?;
            self.setup.host.install_filter(&program)?;
            log::debug!("installed {} instruction syscall filter", program.len());
        }

        self.enter(LaunchState::Execed)?;
        let target = self.exec_target(&root, &data_dir);
        self.setup.host.exec(&target)?;
        self.setup.teardown.commit();

        Ok(())
    }

    /// Advance to the next state.
    fn enter(&mut self, state: LaunchState) -> Result<()> {
        debug_assert!(
            state > self.setup.state,
            "launch state {state} after {}",
            self.setup.state
        );
        self.check_cancelled()?;

        log::info!("{}: {} -> {state}", self.manifest.app(), self.setup.state);
        self.setup.state = state;

        Ok(())
    }

    fn check_cancelled(&mut self) -> Result<()> {
        if self.setup.host.cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Create the staging root and the application's data directory.
    fn init(&mut self) -> Result<(PathBuf, PathBuf)> {
        let staging = tempfile::Builder::new()
            .prefix("pharaoh-root-")
            .tempdir_in(&self.layout.staging_dir)
            .map_err(Error::privilege("create staging directory"))?;
        let root = staging.path().to_path_buf();
        self.setup.teardown.push(Undo::DeleteTemp(staging));

        let data_dir = self.layout.app_data_dir(self.manifest.app());
        if let Some(created) = first_missing_ancestor(&data_dir) {
            fs::create_dir_all(&data_dir)
                .map_err(Error::privilege("create application data directory"))?;
            self.setup.teardown.push_abort_only(Undo::RemoveDir(created));
        }

        Ok((root, data_dir))
    }

    /// Build the default-deny filesystem view.
    fn prepare_root(&mut self, root: &Path, data_dir: &Path) -> Result<()> {
        self.mount_tmpfs(root, 0o755)?;
        self.mount_tmpfs(&sandbox_path(root, "/tmp"), 0o1777)?;
        self.mount_tmpfs(&sandbox_path(root, "/dev"), 0o755)?;

        for node in ["null", "zero"] {
            let source = self.layout.dev_dir.join(node);
            self.bind(root, source, &Path::new("/dev").join(node), true)?;
        }
        if let Some(console) = self.layout.console.clone() {
            self.bind(root, console, Path::new("/dev/console"), true)?;
        }

        let dev_links = [
            ("/proc/self/fd", "/dev/fd"),
            ("/proc/self/fd/0", "/dev/stdin"),
            ("/proc/self/fd/1", "/dev/stdout"),
            ("/proc/self/fd/2", "/dev/stderr"),
        ];
        for (original, link) in dev_links {
            self.setup
                .host
                .symlink(Path::new(original), &sandbox_path(root, link))
                .map_err(Error::privilege("populate /dev"))?;
        }

        let runtime_dir = self.layout.sandbox_runtime_dir();
        for (dir, mode) in [(Path::new("/proc"), 0o555), (runtime_dir.as_path(), 0o700)] {
            self.setup
                .host
                .create_dir(&sandbox_path(root, dir), mode)
                .map_err(Error::privilege("populate root"))?;
        }

        for path in self.layout.system_paths.clone() {
            let metadata = match fs::symlink_metadata(&path) {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };

            if metadata.file_type().is_symlink() {
                let original = fs::read_link(&path).map_err(Error::privilege("read symlink"))?;
                self.setup
                    .host
                    .symlink(&original, &sandbox_path(root, &path))
                    .map_err(Error::privilege("populate root"))?;
            } else {
                self.bind(root, path.clone(), &path, false)?;
            }
        }

        let install_root = self.manifest.root().to_path_buf();
        self.bind(root, install_root.clone(), &install_root, true)?;
        self.bind(root, data_dir.to_path_buf(), data_dir, true)?;

        Ok(())
    }

    /// Bind the host resources of every granted capability.
    fn bind_capabilities(&mut self, root: &Path) -> Result<()> {
        let capabilities = self.manifest.capabilities();
        if capabilities.unknown_bits() != 0 {
            log::warn!("ignoring unknown capability bits {:#x}", capabilities.unknown_bits());
        }

        for capability in capabilities.granted() {
            for mount in self.capability_mounts(capability, root)? {
                let name = capability.name().unwrap_or("capability");
                if !mount.source.exists() {
                    let source = IoError::new(ErrorKind::NotFound, "host resource is missing");
                    return Err(Error::CapabilityBind { capability: name, path: mount.source, source });
                }

                self.setup.host.bind(&mount).map_err(|source| Error::CapabilityBind {
                    capability: name,
                    path: mount.source.clone(),
                    source,
                })?;
                self.setup.teardown.push(Undo::Unmount(mount.target));
            }
        }

        Ok(())
    }

    /// Mounts backing one capability.
    fn capability_mounts(&self, capability: Capabilities, root: &Path) -> Result<Vec<BindMount>> {
        let runtime_dir = self.layout.sandbox_runtime_dir();
        let host_runtime_socket = |name: &str| match &self.layout.runtime_dir {
            Some(dir) => Ok(BindMount {
                source: dir.join(name),
                target: sandbox_path(root, &runtime_dir.join(name)),
                writable: true,
            }),
            None => Err(Error::CapabilityBind {
                capability: capability.name().unwrap_or("capability"),
                path: PathBuf::from("$XDG_RUNTIME_DIR"),
                source: IoError::new(ErrorKind::NotFound, "no user runtime directory"),
            }),
        };

        let mounts = if capability == Capabilities::DRI {
            let nodes = self.layout.render_nodes();
            if nodes.is_empty() {
                return Err(Error::CapabilityBind {
                    capability: "DRI",
                    path: self.layout.dri_dir.clone(),
                    source: IoError::new(ErrorKind::NotFound, "no render nodes"),
                });
            }

            nodes
                .into_iter()
                .map(|node| {
                    let name = node.file_name().map(PathBuf::from).unwrap_or_default();
                    let target = sandbox_path(root, &Path::new("/dev/dri").join(name));
                    BindMount { source: node, target, writable: true }
                })
                .collect()
        } else if capability == Capabilities::IPC {
            vec![BindMount {
                source: self.layout.shm_dir.clone(),
                target: sandbox_path(root, "/dev/shm"),
                writable: true,
            }]
        } else if capability == Capabilities::PULSEAUDIO {
            vec![host_runtime_socket("pulse")?]
        } else if capability == Capabilities::PIPEWIRE {
            vec![host_runtime_socket("pipewire-0")?]
        } else {
            // D-Bus access goes through the proxy instead of a bind.
            Vec::new()
        };

        Ok(mounts)
    }

    /// Start the filtering proxy and expose its socket.
    fn start_proxy(&mut self, root: &Path) -> Result<()> {
        let upstream = self.layout.session_bus.clone().ok_or_else(|| {
            Error::DBusProxy(IoError::new(ErrorKind::NotFound, "no host session bus"))
        })?;

        let bus_dir = tempfile::Builder::new()
            .prefix("pharaoh-bus-")
            .tempdir_in(&self.layout.staging_dir)
            .map_err(Error::DBusProxy)?;
        let socket = bus_dir.path().join("bus");
        self.setup.teardown.push(Undo::DeleteTemp(bus_dir));

        let policy = ProxyPolicy::new(self.manifest.bus_name(), self.manifest.bus_capabilities());
        let command = ProxyCommand::new(&self.layout.dbus_proxy, &upstream, &socket, &policy);

        let pid = match self.setup.host.start_proxy(&command) {
            Ok(pid) => pid,
            Err(err) => {
                log::warn!("D-Bus proxy failed to start, retrying: {err}");
                let _ = fs::remove_file(&socket);
                thread::sleep(PROXY_RETRY_DELAY);
                self.check_cancelled()?;
                self.setup.host.start_proxy(&command).map_err(Error::DBusProxy)?
            },
        };
        self.setup.teardown.push(Undo::StopProxy(pid));

        let sandbox_socket = self.layout.sandbox_runtime_dir().join("bus");
        let mount = BindMount {
            source: socket,
            target: sandbox_path(root, &sandbox_socket),
            writable: true,
        };
        self.setup.host.bind(&mount).map_err(Error::DBusProxy)?;
        self.setup.teardown.push(Undo::Unmount(mount.target));

        self.env.set_bus_socket(&sandbox_socket);

        Ok(())
    }

    /// Final process description of the confined target.
    fn exec_target(&mut self, root: &Path, data_dir: &Path) -> ExecTarget {
        let mut env = self.env.clone();
        env.set("HOME", data_dir);
        env.set("XDG_RUNTIME_DIR", self.layout.sandbox_runtime_dir());
        env.set("TMPDIR", "/tmp");
        env.set("PHARAOH_APP_ID", self.manifest.app());

        let install_root = self.manifest.root();
        let bin_dir = install_root.join("usr/bin");
        if bin_dir.is_dir() {
            env.prepend_path("PATH", &bin_dir);
        }
        let lib_dir = install_root.join("usr/lib");
        if lib_dir.is_dir() {
            env.prepend_path("LD_LIBRARY_PATH", &lib_dir);
        }

        ExecTarget {
            root: root.into(),
            program: self.manifest.executable().into(),
            args: self.args.clone(),
            env: env.into_vec(),
            cwd: data_dir.into(),
        }
    }

    fn mount_tmpfs(&mut self, target: &Path, mode: u32) -> Result<()> {
        self.setup.host.mount_tmpfs(target, mode).map_err(Error::privilege("mount tmpfs"))?;
        self.setup.teardown.push(Undo::Unmount(target.into()));
        Ok(())
    }

    fn bind(&mut self, root: &Path, source: PathBuf, path: &Path, writable: bool) -> Result<()> {
        let mount = BindMount { source, target: sandbox_path(root, path), writable };
        self.setup.host.bind(&mount).map_err(Error::privilege("bind mount"))?;
        self.setup.teardown.push(Undo::Unmount(mount.target));
        Ok(())
    }
}

/// Host location of an absolute sandbox path.
pub fn sandbox_path(root: &Path, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    root.join(path.strip_prefix("/").unwrap_or(path))
}

/// Outermost directory `create_dir_all` would create for `path`.
fn first_missing_ancestor(path: &Path) -> Option<PathBuf> {
    path.ancestors().take_while(|ancestor| !ancestor.exists()).last().map(Path::to_path_buf)
}

/// Ensure the target is an executable regular file.
fn check_executable(path: &Path) -> Result<()> {
    let exec_error = |source| Error::Exec { path: path.into(), source };

    let metadata = fs::metadata(path).map_err(exec_error)?;
    if !metadata.is_file() || metadata.permissions().mode() & 0o111 == 0 {
        return Err(exec_error(IoError::from(ErrorKind::PermissionDenied)));
    }

    Ok(())
}
