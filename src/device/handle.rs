// src/device/handle.rs

use log::{debug, trace};
use nix::fcntl::{open, OFlag};
use nix::sys::stat::{minor, Mode};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use crate::device::NodeType;
use crate::error::{Result, SurfacelessError};

/// An open device node as seen by the prober.
///
/// The node is closed when the value is dropped, so releasing a rejected
/// candidate is a matter of letting its handles go out of scope.
pub trait DeviceNode {
    /// Descriptor passed to the rendering driver.
    fn raw_fd(&self) -> RawFd;
    /// Path the node was opened from.
    fn path(&self) -> &Path;
}

/// Owned file descriptor of a DRM device node.
#[derive(Debug)]
pub struct DeviceHandle {
    fd: OwnedFd,
    path: PathBuf,
}

impl DeviceHandle {
    /// Opens `path` read-write with close-on-exec.
    pub fn open(path: &Path) -> Result<Self> {
        let fd = open(path, OFlag::O_RDWR | OFlag::O_CLOEXEC, Mode::empty()).map_err(|source| {
            SurfacelessError::Io {
                path: path.to_path_buf(),
                source,
            }
        })?;
        debug!("Opened device node {} as fd {}", path.display(), fd.as_raw_fd());
        Ok(Self {
            fd,
            path: path.to_path_buf(),
        })
    }

    /// Device number of the node, from `fstat`.
    pub fn rdev(&self) -> Result<libc::dev_t> {
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(self.fd.as_raw_fd(), &mut st) } == -1 {
            return Err(SurfacelessError::Io {
                path: self.path.clone(),
                source: nix::Error::last(),
            });
        }
        Ok(st.st_rdev)
    }

    /// Node type derived from the minor number.
    pub fn node_type(&self) -> Option<NodeType> {
        self.rdev().ok().and_then(|rdev| NodeType::from_minor(minor(rdev)))
    }
}

impl DeviceNode for DeviceHandle {
    fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl AsFd for DeviceHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        trace!(
            "Closing device node {} (fd {})",
            self.path.display(),
            self.fd.as_raw_fd()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn open_missing_node_reports_path() {
        let err = DeviceHandle::open(Path::new("/nonexistent/renderD128")).unwrap_err();
        match err {
            SurfacelessError::Io { path, source } => {
                assert_eq!(path, Path::new("/nonexistent/renderD128"));
                assert_eq!(source, nix::Error::ENOENT);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn node_type_follows_the_minor_number() {
        // /dev/null is char 1:3, which classifies as a primary-range minor.
        let handle = DeviceHandle::open(Path::new("/dev/null")).unwrap();
        assert_eq!(handle.node_type(), Some(NodeType::Primary));
        assert_eq!(handle.path(), Path::new("/dev/null"));
    }
}
