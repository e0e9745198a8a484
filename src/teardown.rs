//! Launch teardown.
//!
//! Every setup step that changes host state registers the action undoing it.
//! Unwinding runs all registered actions in reverse order and never stops at
//! a failing one, so a failed launch leaves nothing behind.

use std::fs;
use std::io::Result as IoResult;
use std::path::PathBuf;

use tempfile::TempDir;

use crate::launcher::Host;

/// Action undoing one setup step.
#[derive(Debug)]
pub enum Undo {
    /// Terminate the sandbox init and leave the namespaces.
    ReleaseNamespaces,
    /// Detach a mount.
    Unmount(PathBuf),
    /// Terminate a D-Bus proxy.
    StopProxy(u32),
    /// Remove a directory created for the application.
    RemoveDir(PathBuf),
    /// Remove a temporary directory.
    DeleteTemp(TempDir),
}

impl Undo {
    fn run<H: Host>(self, host: &mut H) -> IoResult<()> {
        match self {
            Self::ReleaseNamespaces => host.release_namespaces(),
            Self::Unmount(target) => host.unmount(&target),
            Self::StopProxy(pid) => host.stop_proxy(pid),
            Self::RemoveDir(path) => fs::remove_dir_all(path),
            Self::DeleteTemp(dir) => dir.close(),
        }
    }
}

/// Registered undo actions of a launch.
#[derive(Debug, Default)]
pub struct Teardown {
    actions: Vec<(Undo, Scope)>,
}

/// When an undo action has to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Whenever the launch ends.
    Session,
    /// Only if the launch is aborted before the target is executed.
    Abort,
}

impl Teardown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action for the end of the session.
    pub fn push(&mut self, undo: Undo) {
        log::debug!("registered undo action {undo:?}");
        self.actions.push((undo, Scope::Session));
    }

    /// Register an action which is discarded once the target is running.
    pub fn push_abort_only(&mut self, undo: Undo) {
        log::debug!("registered abort action {undo:?}");
        self.actions.push((undo, Scope::Abort));
    }

    /// Discard abort-only actions.
    pub fn commit(&mut self) {
        self.actions.retain(|(_, scope)| *scope == Scope::Session);
    }

    /// Run all registered actions in reverse registration order.
    pub fn unwind<H: Host>(&mut self, host: &mut H) {
        while let Some((undo, _)) = self.actions.pop() {
            log::debug!("undoing {undo:?}");
            let description = format!("{undo:?}");
            if let Err(err) = undo.run(host) {
                log::warn!("teardown step {description} failed: {err}");
            }
        }
    }
}
