//! Linux namespaces.

use std::fs;
use std::io::{Error as IoError, Result as IoResult};
use std::ptr;

use bitflags::bitflags;

/// Isolate the launcher using Linux namespaces.
///
/// The calling process is moved into new user, mount and IPC namespaces, with
/// its user and group mapped onto themselves, and all mounts are made private
/// so nothing mounted afterwards propagates back to the host.
///
/// The network namespace is intentionally shared with the host.
pub fn create_namespaces() -> IoResult<()> {
    // Get EUID/EGID outside of the namespace.
    let uid = unsafe { libc::geteuid() };
    let gid = unsafe { libc::getegid() };

    create_user_namespace(uid, gid, uid, gid, Namespaces::MOUNT | Namespaces::IPC)?;

    make_mounts_private()
}

/// Create the sandbox's PID namespace.
///
/// Only children forked afterwards are placed in it: the next child becomes
/// PID 1 of the sandbox.
pub fn unshare_pids() -> IoResult<()> {
    unshare(Namespaces::PID)
}

/// Detach the calling process from the mount namespace it was forked into.
pub fn unshare_mounts() -> IoResult<()> {
    unshare(Namespaces::MOUNT)
}

/// Create a new user namespace.
///
/// The parent and child UIDs and GIDs define the user and group mappings
/// between the parent namespace and the new user namespace.
fn create_user_namespace(
    parent_uid: u32,
    parent_gid: u32,
    child_uid: u32,
    child_gid: u32,
    extra_namespaces: Namespaces,
) -> IoResult<()> {
    // Create the namespace.
    unshare(Namespaces::USER | extra_namespaces)?;

    // Map the UID and GID.
    let uid_map = format!("{child_uid} {parent_uid} 1\n");
    let gid_map = format!("{child_gid} {parent_gid} 1\n");
    fs::write("/proc/self/uid_map", uid_map.as_bytes())?;
    fs::write("/proc/self/setgroups", b"deny")?;
    fs::write("/proc/self/gid_map", gid_map.as_bytes())?;

    Ok(())
}

/// Stop mount events from propagating between the host and the sandbox.
fn make_mounts_private() -> IoResult<()> {
    let flags = libc::MS_REC | libc::MS_PRIVATE;
    let result =
        unsafe { libc::mount(ptr::null(), c"/".as_ptr(), ptr::null(), flags, ptr::null()) };
    if result == 0 {
        Ok(())
    } else {
        Err(IoError::last_os_error())
    }
}

/// Enter a namespace.
fn unshare(namespaces: Namespaces) -> IoResult<()> {
    let result = unsafe { libc::unshare(namespaces.bits()) };
    if result == 0 {
        Ok(())
    } else {
        Err(IoError::last_os_error())
    }
}

bitflags! {
    /// Unshare system call namespace flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    struct Namespaces: libc::c_int {
        /// Unshare the IPC namespace, so that the calling process has a private copy of
        /// the IPC namespace which is not shared with any other process.
        const IPC = libc::CLONE_NEWIPC;
        /// Unshare the mount namespace, so that the calling process has a private copy
        /// of its namespace which is not shared with any other process.
        const MOUNT = libc::CLONE_NEWNS;
        /// Unshare the PID namespace, so that the calling process has a new PID
        /// namespace for its children which is not shared with any previously existing
        /// process. The calling process is **not** moved into the new namespace. The
        /// first child created by the calling process will have the process ID 1 and
        /// will assume the role of init in the new namespace.
        const PID = libc::CLONE_NEWPID;
        /// Unshare the user namespace, so that the calling process is moved into a new
        /// user namespace which is not shared with any previously existing process. The
        /// caller obtains a full set of capabilities in the new namespace.
        ///
        /// Requires that the calling process is not threaded.
        const USER = libc::CLONE_NEWUSER;
    }
}
