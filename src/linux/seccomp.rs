//! Seccomp system call filtering.

use std::io::{Error as IoError, Result as IoResult};

use seccompiler::TargetArch;

use crate::filter::FilterProgram;

/// Architecture JSON policies are compiled for.
pub fn target_arch() -> Result<TargetArch, String> {
    if cfg!(target_arch = "x86_64") {
        Ok(TargetArch::x86_64)
    } else if cfg!(target_arch = "aarch64") {
        Ok(TargetArch::aarch64)
    } else {
        Err(format!("unsupported architecture {}", std::env::consts::ARCH))
    }
}

/// Filter converted to the kernel's representation.
///
/// Conversion allocates, so it must happen before anything restricts the
/// calling process.
pub struct SyscallFilter {
    instructions: Vec<libc::sock_filter>,
}

impl SyscallFilter {
    pub fn new(program: &FilterProgram) -> Self {
        let instructions = program
            .instructions()
            .iter()
            .map(|insn| libc::sock_filter { code: insn.code, jt: insn.jt, jf: insn.jf, k: insn.k })
            .collect();
        Self { instructions }
    }

    /// Apply the filter to the calling thread.
    ///
    /// Requires `no_new_privs` to be set.
    pub fn apply(&self) -> IoResult<()> {
        let program = libc::sock_fprog {
            len: self.instructions.len() as libc::c_ushort,
            filter: self.instructions.as_ptr() as *mut libc::sock_filter,
        };

        let result = unsafe {
            libc::prctl(
                libc::PR_SET_SECCOMP,
                libc::SECCOMP_MODE_FILTER,
                &program as *const libc::sock_fprog,
            )
        };

        match result {
            0 => Ok(()),
            _ => Err(IoError::last_os_error()),
        }
    }
}

/// Prevent suid/sgid.
pub fn no_new_privs() -> IoResult<()> {
    let result = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };

    match result {
        0 => Ok(()),
        _ => Err(IoError::last_os_error()),
    }
}
