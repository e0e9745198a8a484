//! Mount primitives.

use std::ffi::{CStr, CString};
use std::fs::{self, File};
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

/// Mount a tmpfs, creating the mount point if necessary.
pub fn mount_tmpfs(target: &Path, mode: u32) -> IoResult<()> {
    fs::create_dir_all(target)?;

    let target = c_path(target)?;
    let options = CString::new(format!("mode={mode:o}")).map_err(invalid_input)?;
    mount(
        Some(c"tmpfs"),
        &target,
        Some(c"tmpfs"),
        libc::MS_NOSUID | libc::MS_NODEV,
        Some(&options),
    )
}

/// Bind mount `source` onto `target`, creating the mount point if necessary.
///
/// Read-only bind mounts keep all the source mount's locked flags, since a
/// user namespace may not clear them.
pub fn bind(source: &Path, target: &Path, writable: bool) -> IoResult<()> {
    if source.is_dir() {
        fs::create_dir_all(target)?;
    } else {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        File::create(target)?;
    }

    let c_source = c_path(source)?;
    let c_target = c_path(target)?;
    mount(Some(&c_source), &c_target, None, libc::MS_BIND | libc::MS_REC, None)?;

    if !writable {
        let flags = libc::MS_REMOUNT | libc::MS_BIND | libc::MS_RDONLY | locked_flags(&c_target)?;
        mount(None, &c_target, None, flags, None)?;
    }

    Ok(())
}

/// Lazily detach a mount.
pub fn unmount(target: &Path) -> IoResult<()> {
    let target = c_path(target)?;
    let result = unsafe { libc::umount2(target.as_ptr(), libc::MNT_DETACH) };
    if result == 0 {
        Ok(())
    } else {
        Err(IoError::last_os_error())
    }
}

/// Mount a procfs for the current PID namespace.
pub fn mount_proc(target: &Path) -> IoResult<()> {
    let target = c_path(target)?;
    let flags = libc::MS_NOSUID | libc::MS_NODEV | libc::MS_NOEXEC;
    mount(Some(c"proc"), &target, Some(c"proc"), flags, None)
}

/// Make `new_root` the root of the mount namespace and drop the old root.
pub fn pivot_root(new_root: &Path) -> IoResult<()> {
    let new_root = c_path(new_root)?;
    let current = c".";

    unsafe {
        if libc::chdir(new_root.as_ptr()) != 0 {
            return Err(IoError::last_os_error());
        }

        // Stack the old root on top of the new one, then detach it.
        if libc::syscall(libc::SYS_pivot_root, current.as_ptr(), current.as_ptr()) != 0 {
            return Err(IoError::last_os_error());
        }
        if libc::umount2(current.as_ptr(), libc::MNT_DETACH) != 0 {
            return Err(IoError::last_os_error());
        }

        if libc::chdir(c"/".as_ptr()) != 0 {
            return Err(IoError::last_os_error());
        }
    }

    // Nothing may be added to the root after this point.
    let root = c"/";
    let flags = libc::MS_REMOUNT | libc::MS_BIND | libc::MS_RDONLY | locked_flags(root)?;
    mount(None, root, None, flags, None)
}

/// Mount flags of an existing mount which must be preserved on remount.
fn locked_flags(path: &CStr) -> IoResult<libc::c_ulong> {
    let mut stat = MaybeUninit::<libc::statvfs>::zeroed();
    let result = unsafe { libc::statvfs(path.as_ptr(), stat.as_mut_ptr()) };
    if result != 0 {
        return Err(IoError::last_os_error());
    }
    let stat = unsafe { stat.assume_init() };

    let mut flags = 0;
    for (st_flag, ms_flag) in [
        (libc::ST_NOSUID, libc::MS_NOSUID),
        (libc::ST_NODEV, libc::MS_NODEV),
        (libc::ST_NOEXEC, libc::MS_NOEXEC),
        (libc::ST_NOATIME, libc::MS_NOATIME),
        (libc::ST_NODIRATIME, libc::MS_NODIRATIME),
        (libc::ST_RELATIME, libc::MS_RELATIME),
    ] {
        if stat.f_flag & st_flag != 0 {
            flags |= ms_flag;
        }
    }

    Ok(flags)
}

fn mount(
    source: Option<&CStr>,
    target: &CStr,
    fstype: Option<&CStr>,
    flags: libc::c_ulong,
    data: Option<&CStr>,
) -> IoResult<()> {
    let as_ptr = |value: Option<&CStr>| value.map_or(ptr::null(), CStr::as_ptr);
    let result = unsafe {
        libc::mount(
            as_ptr(source),
            target.as_ptr(),
            as_ptr(fstype),
            flags,
            as_ptr(data).cast(),
        )
    };

    if result == 0 {
        Ok(())
    } else {
        Err(IoError::last_os_error())
    }
}

fn c_path(path: &Path) -> IoResult<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(invalid_input)
}

fn invalid_input(error: impl std::error::Error + Send + Sync + 'static) -> IoError {
    IoError::new(ErrorKind::InvalidInput, error)
}
