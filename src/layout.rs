//! Host layout.
//!
//! All host paths the launcher reads from or binds into the sandbox.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// Default directory holding one install root per application.
pub const APPLICATION_DIRECTORY: &str = "/var/lib/pharaoh/app";

/// Per-user directory holding one data directory per application.
const APPLICATION_HOME_DIRECTORY: &str = ".var/app";

/// Default D-Bus filtering proxy executable.
const DBUS_PROXY: &str = "xdg-dbus-proxy";

/// Host directories shared read-only with every sandbox.
const SYSTEM_PATHS: &[&str] = &["/usr", "/etc", "/bin", "/sbin", "/lib", "/lib64"];

/// Host paths used by the launcher.
#[derive(Debug, Clone)]
pub struct Layout {
    /// Directory of install roots and manifests.
    pub app_dir: PathBuf,
    /// Directory of per-application data directories.
    pub data_dir: PathBuf,
    /// Directory for temporary sandbox roots and proxy sockets.
    pub staging_dir: PathBuf,
    /// Host device directory providing `null` and `zero`.
    pub dev_dir: PathBuf,
    /// Host GPU device directory.
    pub dri_dir: PathBuf,
    /// Host POSIX shared memory directory.
    pub shm_dir: PathBuf,
    /// Host user runtime directory.
    pub runtime_dir: Option<PathBuf>,
    /// Host session bus address.
    pub session_bus: Option<String>,
    /// D-Bus filtering proxy executable.
    pub dbus_proxy: PathBuf,
    /// Host directories shared read-only.
    pub system_paths: Vec<PathBuf>,
    /// Controlling terminal exposed as `/dev/console`.
    pub console: Option<PathBuf>,
    /// Effective user ID.
    pub uid: u32,
}

impl Layout {
    /// Derive the layout from the process environment.
    #[cfg(target_os = "linux")]
    pub fn from_env() -> Self {
        let uid = rustix::process::geteuid().as_raw();

        let runtime_dir = env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from);
        let session_bus = env::var("DBUS_SESSION_BUS_ADDRESS").ok().or_else(|| {
            let socket = runtime_dir.as_ref()?.join("bus");
            socket.exists().then(|| format!("unix:path={}", socket.display()))
        });

        let data_dir = env_path("PHARAOH_DATA_DIR")
            .unwrap_or_else(|| user_home().join(APPLICATION_HOME_DIRECTORY));

        Self {
            app_dir: env_path("PHARAOH_APP_DIR").unwrap_or_else(|| APPLICATION_DIRECTORY.into()),
            data_dir,
            staging_dir: env::temp_dir(),
            dev_dir: "/dev".into(),
            dri_dir: "/dev/dri".into(),
            shm_dir: "/dev/shm".into(),
            runtime_dir,
            session_bus,
            dbus_proxy: env_path("PHARAOH_DBUS_PROXY").unwrap_or_else(|| DBUS_PROXY.into()),
            system_paths: SYSTEM_PATHS.iter().map(PathBuf::from).collect(),
            console: controlling_terminal(),
            uid,
        }
    }

    /// Location of an application's manifest.
    pub fn manifest_path(&self, app: &str) -> PathBuf {
        self.app_dir.join(app).join(format!("{app}.json"))
    }

    /// Location of an application's persistent data.
    pub fn app_data_dir(&self, app: &str) -> PathBuf {
        self.data_dir.join(app)
    }

    /// Runtime directory inside the sandbox.
    pub fn sandbox_runtime_dir(&self) -> PathBuf {
        PathBuf::from(format!("/run/user/{}", self.uid))
    }

    /// GPU render nodes available on the host.
    pub fn render_nodes(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.dri_dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut nodes: Vec<_> = entries
            .flatten()
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("renderD"))
            .map(|entry| entry.path())
            .collect();
        nodes.sort();
        nodes
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).filter(|value| !value.is_empty()).map(PathBuf::from)
}

/// Home directory of the invoking user.
///
/// When running through `sudo`, this is the home of the user who invoked it.
fn user_home() -> PathBuf {
    if let Some(user) = env::var_os("SUDO_USER").filter(|user| !user.is_empty()) {
        let mut home = OsString::from("/home/");
        home.push(user);
        return home.into();
    }

    env_path("HOME").unwrap_or_else(|| PathBuf::from("/"))
}

/// Terminal attached to stdin, if any.
fn controlling_terminal() -> Option<PathBuf> {
    let tty = fs::read_link("/proc/self/fd/0").ok()?;
    let is_terminal = tty.starts_with("/dev/pts")
        || (tty.starts_with("/dev") && tty_name(&tty).starts_with("tty"));
    is_terminal.then_some(tty)
}

fn tty_name(path: &Path) -> String {
    path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default()
}
