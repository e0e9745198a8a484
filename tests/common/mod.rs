#![allow(dead_code)]

use std::fs::{self, File};
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::os::unix::fs::{symlink, PermissionsExt};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use pharaoh::error::{Error, FilterFailure, Result};
use pharaoh::filter::FilterProgram;
use pharaoh::launcher::{BindMount, ExecTarget, Host};
use pharaoh::proxy::ProxyCommand;
use pharaoh::{Capabilities, Layout, ManifestBuilder};
use tempfile::TempDir;

/// Application used by most tests.
pub const APP: &str = "org.example.App";

/// Host operation observed by the recording host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateNamespaces,
    ReleaseNamespaces,
    MountTmpfs(PathBuf),
    Bind(BindMount),
    CreateDir(PathBuf),
    Symlink(PathBuf, PathBuf),
    Unmount(PathBuf),
    StartProxy(ProxyCommand),
    StopProxy(u32),
    InstallFilter(usize),
    Exec(ExecTarget),
    Wait,
}

/// Host recording every successful operation.
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub calls: Vec<Call>,
    /// Mounts currently in place.
    pub mounted: Vec<PathBuf>,
    /// Running proxies.
    pub proxies: Vec<u32>,
    pub namespaces: bool,
    /// Fail the fallible operation with this index.
    pub fail_at: Option<usize>,
    /// Number of proxy starts which fail before one succeeds.
    pub proxy_failures: usize,
    /// Report cancellation once this many operations have been attempted.
    pub cancel_at: Option<usize>,
    attempts: usize,
    next_pid: u32,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self { next_pid: 100, ..Self::default() }
    }

    pub fn failing_at(step: usize) -> Self {
        Self { fail_at: Some(step), ..Self::new() }
    }

    /// Number of fallible operations attempted so far.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn binds(&self) -> Vec<&BindMount> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Bind(mount) => Some(mount),
                _ => None,
            })
            .collect()
    }

    pub fn exec_target(&self) -> Option<&ExecTarget> {
        self.calls.iter().find_map(|call| match call {
            Call::Exec(target) => Some(target),
            _ => None,
        })
    }

    pub fn proxy_command(&self) -> Option<&ProxyCommand> {
        self.calls.iter().find_map(|call| match call {
            Call::StartProxy(command) => Some(command),
            _ => None,
        })
    }

    pub fn installed_filter(&self) -> bool {
        self.calls.iter().any(|call| matches!(call, Call::InstallFilter(_)))
    }

    /// Account for one fallible operation.
    fn attempt(&mut self) -> IoResult<()> {
        let step = self.attempts;
        self.attempts += 1;

        if self.fail_at == Some(step) {
            Err(IoError::new(ErrorKind::PermissionDenied, format!("injected failure {step}")))
        } else {
            Ok(())
        }
    }
}

impl Host for RecordingHost {
    fn create_namespaces(&mut self) -> IoResult<()> {
        self.attempt()?;
        self.namespaces = true;
        self.calls.push(Call::CreateNamespaces);
        Ok(())
    }

    fn release_namespaces(&mut self) -> IoResult<()> {
        self.namespaces = false;
        self.calls.push(Call::ReleaseNamespaces);
        Ok(())
    }

    fn mount_tmpfs(&mut self, target: &Path, _mode: u32) -> IoResult<()> {
        self.attempt()?;
        self.mounted.push(target.into());
        self.calls.push(Call::MountTmpfs(target.into()));
        Ok(())
    }

    fn bind(&mut self, mount: &BindMount) -> IoResult<()> {
        self.attempt()?;
        self.mounted.push(mount.target.clone());
        self.calls.push(Call::Bind(mount.clone()));
        Ok(())
    }

    fn create_dir(&mut self, path: &Path, _mode: u32) -> IoResult<()> {
        self.attempt()?;
        self.calls.push(Call::CreateDir(path.into()));
        Ok(())
    }

    fn symlink(&mut self, original: &Path, link: &Path) -> IoResult<()> {
        self.attempt()?;
        self.calls.push(Call::Symlink(original.into(), link.into()));
        Ok(())
    }

    fn unmount(&mut self, target: &Path) -> IoResult<()> {
        let index = self
            .mounted
            .iter()
            .rposition(|mounted| mounted == target)
            .ok_or_else(|| IoError::new(ErrorKind::NotFound, "not mounted"))?;
        self.mounted.remove(index);
        self.calls.push(Call::Unmount(target.into()));
        Ok(())
    }

    fn start_proxy(&mut self, command: &ProxyCommand) -> IoResult<u32> {
        if let Err(err) = self.attempt() {
            // Injected proxy failures persist across the retry.
            self.proxy_failures = 1;
            return Err(err);
        }
        if self.proxy_failures > 0 {
            self.proxy_failures -= 1;
            return Err(IoError::new(ErrorKind::AddrInUse, "socket bind race"));
        }

        self.next_pid += 1;
        self.proxies.push(self.next_pid);
        self.calls.push(Call::StartProxy(command.clone()));
        Ok(self.next_pid)
    }

    fn stop_proxy(&mut self, pid: u32) -> IoResult<()> {
        self.proxies.retain(|proxy| *proxy != pid);
        self.calls.push(Call::StopProxy(pid));
        Ok(())
    }

    fn install_filter(&mut self, program: &FilterProgram) -> Result<()> {
        self.attempt().map_err(|err| Error::Filter {
            path: program.source().map(PathBuf::from).unwrap_or_default(),
            reason: FilterFailure::Install(err),
        })?;
        self.calls.push(Call::InstallFilter(program.len()));
        Ok(())
    }

    fn exec(&mut self, target: &ExecTarget) -> Result<()> {
        self.attempt().map_err(|source| Error::Exec { path: target.program.clone(), source })?;
        self.calls.push(Call::Exec(target.clone()));
        Ok(())
    }

    fn wait(&mut self) -> IoResult<ExitStatus> {
        self.calls.push(Call::Wait);
        Ok(ExitStatus::from_raw(0))
    }

    fn cancelled(&mut self) -> bool {
        self.cancel_at.map_or(false, |step| self.attempts >= step)
    }
}

/// Scratch host tree with one installed application.
pub struct Fixture {
    pub dir: TempDir,
    pub layout: Layout,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path();

        let dev_dir = path.join("dev");
        let dri_dir = dev_dir.join("dri");
        let shm_dir = dev_dir.join("shm");
        let runtime_dir = path.join("run/user/1000");
        for dir in [&dri_dir, &shm_dir, &runtime_dir, &path.join("staging")] {
            fs::create_dir_all(dir).unwrap();
        }
        for file in [
            dev_dir.join("null"),
            dev_dir.join("zero"),
            dri_dir.join("renderD128"),
            dri_dir.join("card0"),
            runtime_dir.join("pulse"),
            runtime_dir.join("pipewire-0"),
        ] {
            File::create(file).unwrap();
        }

        // One real system directory and one symlinked one.
        let usr = path.join("system/usr");
        fs::create_dir_all(usr.join("lib")).unwrap();
        symlink("usr/lib", path.join("system/lib")).unwrap();

        let layout = Layout {
            app_dir: path.join("apps"),
            data_dir: path.join("data"),
            staging_dir: path.join("staging"),
            dev_dir,
            dri_dir,
            shm_dir,
            runtime_dir: Some(runtime_dir),
            session_bus: Some(String::from("unix:path=/run/user/1000/bus")),
            dbus_proxy: PathBuf::from("/usr/bin/xdg-dbus-proxy"),
            system_paths: vec![usr, path.join("system/lib"), path.join("system/missing")],
            console: None,
            uid: 1000,
        };

        let fixture = Self { dir, layout };
        fixture.install(APP);
        fixture
    }

    /// Create the install root of an application.
    pub fn install(&self, app: &str) -> PathBuf {
        let root = self.root(app);
        fs::create_dir_all(root.join("usr/bin")).unwrap();
        fs::create_dir_all(root.join("usr/lib")).unwrap();

        let executable = root.join("usr/bin/app");
        fs::write(&executable, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&executable, fs::Permissions::from_mode(0o755)).unwrap();

        root
    }

    pub fn root(&self, app: &str) -> PathBuf {
        self.layout.app_dir.join(app)
    }

    /// Manifest of an installed application.
    pub fn manifest(&self, app: &str, capabilities: Capabilities) -> ManifestBuilder {
        ManifestBuilder::new(app, self.root(app), "usr/bin/app")
            .icon(format!("{app}.png"))
            .entry(format!("{app}.desktop"))
            .capabilities(capabilities)
    }

    /// Entries left in the staging directory.
    pub fn staged(&self) -> usize {
        fs::read_dir(&self.layout.staging_dir).unwrap().count()
    }
}
