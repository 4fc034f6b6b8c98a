//! Plug-in executable resolution and process launch.
//!
//! Each plug-in gets a pair of pipes. The child's ends are passed on the
//! command line as raw fd numbers after a `-tinct` marker, the way the
//! plug-in library's [`crate::client::PluginConnection`] expects them.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::process::{Child, Command};

use crate::error::ChannelError;

/// A launched plug-in process with the host's ends of its pipes.
pub struct SpawnedPlugin {
    pub child: Child,
    /// Host reads plug-in output here.
    pub host_read: OwnedFd,
    /// Host writes to the plug-in here.
    pub host_write: OwnedFd,
    /// The argv the child was started with, for diagnostics.
    pub argv: Vec<String>,
}

/// Resolve a plug-in program name to an executable path.
///
/// Names containing a path separator are used as-is; bare names are searched
/// in `search_dirs` in order.
pub fn resolve_program(name: &str, search_dirs: &[PathBuf]) -> Result<PathBuf, ChannelError> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        if path.is_file() {
            return Ok(path);
        }
        return Err(ChannelError::Spawn(name.to_string()));
    }
    for dir in search_dirs {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(ChannelError::Spawn(name.to_string()))
}

/// One unidirectional pipe as a `(read, write)` pair of owned fds.
fn create_pipe() -> Result<(OwnedFd, OwnedFd), ChannelError> {
    let mut fds = [0i32; 2];
    // SAFETY: fds is a valid out-array for pipe(2); on success both entries
    // are open fds we take ownership of.
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(ChannelError::Process(std::io::Error::last_os_error()));
    }
    let read = unsafe { OwnedFd::from_raw_fd(fds[0]) };
    let write = unsafe { OwnedFd::from_raw_fd(fds[1]) };
    Ok((read, write))
}

/// Mark an fd close-on-exec so only the child's ends leak across exec.
fn set_cloexec(fd: &OwnedFd) -> Result<(), ChannelError> {
    // SAFETY: fd is open for the lifetime of this call.
    let rc = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) };
    if rc != 0 {
        return Err(ChannelError::Process(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Launch the plug-in at `path` with fresh pipes.
///
/// The child's pipe ends are closed in the host after a successful spawn;
/// pipe EOF then tracks child exit with no extra bookkeeping.
pub fn spawn_plugin(path: &Path) -> Result<SpawnedPlugin, ChannelError> {
    let (child_read, host_write) = create_pipe()?;
    let (host_read, child_write) = create_pipe()?;
    set_cloexec(&host_read)?;
    set_cloexec(&host_write)?;

    let argv = vec![
        path.display().to_string(),
        "-tinct".to_string(),
        child_read.as_raw_fd().to_string(),
        child_write.as_raw_fd().to_string(),
    ];

    log::debug!("spawning plug-in: {argv:?}");
    let child = Command::new(path)
        .args(&argv[1..])
        .spawn()
        .map_err(ChannelError::Process)?;

    // Child holds its own copies now.
    drop(child_read);
    drop(child_write);

    Ok(SpawnedPlugin {
        child,
        host_read,
        host_write,
        argv,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
