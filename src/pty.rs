//! Pty plumbing: allocate a master/slave pair and launch the shell on
//! the slave end.

use failure::Error;
use std::ffi::CStr;
use std::io::{self, Read, Write};
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

static CHILD_SIGNALLED: AtomicBool = AtomicBool::new(false);

/// Our end of the pty.  Reading yields whatever the child writes;
/// writes show up on the child's stdin.
pub struct MasterPty {
    fd: RawFd,
}

/// The child's end of the pty, consumed by `spawn_command`.
pub struct SlavePty {
    fd: RawFd,
}

/// Allocate a pty pair with the given window size.
pub fn openpty(rows: u16, cols: u16) -> Result<(MasterPty, SlavePty), Error> {
    let mut master: libc::c_int = -1;
    let mut slave: libc::c_int = -1;
    let mut size = libc::winsize { ws_row: rows, ws_col: cols, ws_xpixel: 0, ws_ypixel: 0 };

    let result = unsafe {
        libc::openpty(&mut master, &mut slave, ptr::null_mut(), ptr::null_mut(), &mut size)
    };
    if result != 0 {
        bail!("openpty() failed: {}", io::Error::last_os_error());
    }

    Ok((MasterPty { fd: master }, SlavePty { fd: slave }))
}

impl MasterPty {
    /// Dup the descriptor so the reader and key writer threads can own
    /// independent handles.
    pub fn try_clone(&self) -> Result<MasterPty, Error> {
        let fd = unsafe { libc::dup(self.fd) };
        if fd < 0 {
            bail!("dup() failed: {}", io::Error::last_os_error());
        }
        Ok(MasterPty { fd })
    }
}

impl Read for MasterPty {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size =
            unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if size < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(size as usize)
        }
    }
}

impl Write for MasterPty {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let size =
            unsafe { libc::write(self.fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if size < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(size as usize)
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MasterPty {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

impl SlavePty {
    /// Wire the slave end up as the child's stdio and controlling
    /// terminal, then spawn the command on it.  The caller configures
    /// the environment on `cmd` beforehand.
    pub fn spawn_command(self, mut cmd: Command) -> Result<Child, Error> {
        cmd.stdin(self.stdio()?).stdout(self.stdio()?).stderr(self.stdio()?);
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() < 0 {
                    return Err(io::Error::last_os_error());
                }
                if libc::ioctl(0, libc::TIOCSCTTY as _, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                // the child starts with default signal dispositions
                for sig in &[
                    libc::SIGCHLD,
                    libc::SIGHUP,
                    libc::SIGINT,
                    libc::SIGQUIT,
                    libc::SIGTERM,
                    libc::SIGALRM,
                ] {
                    libc::signal(*sig, libc::SIG_DFL);
                }
                Ok(())
            });
        }
        let child = cmd.spawn()?;
        // our copy of the slave closes on drop; the child holds its own
        Ok(child)
    }

    fn stdio(&self) -> Result<Stdio, Error> {
        let fd = unsafe { libc::dup(self.fd) };
        if fd < 0 {
            bail!("dup() failed: {}", io::Error::last_os_error());
        }
        Ok(unsafe { Stdio::from_raw_fd(fd) })
    }
}

impl Drop for SlavePty {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Username and home directory for seeding the child's environment.
pub fn passwd_info() -> Result<(String, String), Error> {
    unsafe {
        let pw = libc::getpwuid(libc::getuid());
        if pw.is_null() {
            bail!("getpwuid() failed: {}", io::Error::last_os_error());
        }
        let name = CStr::from_ptr((*pw).pw_name).to_string_lossy().into_owned();
        let dir = CStr::from_ptr((*pw).pw_dir).to_string_lossy().into_owned();
        Ok((name, dir))
    }
}

extern "C" fn handle_sigchld(_: libc::c_int) {
    CHILD_SIGNALLED.store(true, Ordering::Relaxed);
}

/// Note when the child changes state; the render loop polls and logs.
pub fn install_sigchld_handler() {
    unsafe {
        libc::signal(libc::SIGCHLD, handle_sigchld as libc::sighandler_t);
    }
}

pub fn child_signalled() -> bool {
    CHILD_SIGNALLED.swap(false, Ordering::Relaxed)
}
