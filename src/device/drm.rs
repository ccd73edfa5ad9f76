// src/device/drm.rs
//! Linux DRM devices: enumeration from `/dev/dri` and a loader that reads
//! sysfs to name devices and their drivers.

use log::{debug, trace, warn};
use nix::sys::stat::{major, minor};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::device::{DeviceHandle, DeviceList, DeviceLoader, DeviceNode, NodePair, NodeType};
use crate::error::{Result, SurfacelessError};

pub const DRI_DIR: &str = "/dev/dri";
pub const SYSFS_ROOT: &str = "/sys";

fn io_error(path: &Path, e: io::Error) -> SurfacelessError {
    SurfacelessError::Io {
        path: path.to_path_buf(),
        source: nix::Error::from_raw(e.raw_os_error().unwrap_or(libc::EIO)),
    }
}

/// Node type and index from a `/dev/dri` entry name.
fn classify_node(name: &str) -> Option<(NodeType, u32)> {
    let (node_type, digits) = if let Some(rest) = name.strip_prefix("renderD") {
        (NodeType::Render, rest)
    } else if let Some(rest) = name.strip_prefix("controlD") {
        (NodeType::Control, rest)
    } else if let Some(rest) = name.strip_prefix("card") {
        (NodeType::Primary, rest)
    } else {
        return None;
    };
    digits.parse().ok().map(|n| (node_type, n))
}

/// Lists the system's devices: the software device first, then one entry
/// per DRM device in `/dev/dri`.
pub fn enumerate_devices() -> Result<DeviceList> {
    enumerate_devices_in(Path::new(DRI_DIR), &Path::new(SYSFS_ROOT).join("class/drm"))
}

/// Like [`enumerate_devices`] with explicit roots. Nodes are grouped by the
/// sysfs device they belong to; without sysfs, by node number modulo 64.
pub fn enumerate_devices_in(dri_dir: &Path, sysfs_class: &Path) -> Result<DeviceList> {
    let mut list = DeviceList::with_software_device();

    let entries = match fs::read_dir(dri_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("{} does not exist; software device only", dri_dir.display());
            return Ok(list);
        }
        Err(e) => return Err(io_error(dri_dir, e)),
    };

    let mut groups: BTreeMap<String, [Option<PathBuf>; 3]> = BTreeMap::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_error(dri_dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some((node_type, index)) = classify_node(&name) else {
            continue;
        };
        let key = fs::canonicalize(sysfs_class.join(&name).join("device"))
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| format!("drm-{:03}", index % 64));
        trace!("{} -> {:?} node of {}", name, node_type, key);
        groups.entry(key).or_default()[node_type as usize] = Some(entry.path());
    }

    for (key, [primary, control, render]) in groups {
        let id = list.push_drm(primary, control, render);
        debug!("Enumerated {} at {}", id, key);
    }
    Ok(list)
}

/// Userspace driver for a kernel driver.
pub fn userspace_driver(kernel_driver: &str) -> &str {
    match kernel_driver {
        "i915" | "xe" => "iris",
        "amdgpu" => "radeonsi",
        "radeon" => "r600",
        other => other,
    }
}

/// `pci-0000_01_00_0` style tag for a device on `subsystem` with bus id
/// `bus_id`.
pub fn device_tag(subsystem: &str, bus_id: &str) -> String {
    let sanitized: String = bus_id
        .chars()
        .map(|c| if c == ':' || c == '.' { '_' } else { c })
        .collect();
    format!("{}-{}", subsystem, sanitized)
}

fn link_name(path: &Path) -> Option<String> {
    fs::read_link(path)
        .ok()
        .and_then(|target| target.file_name().map(|n| n.to_string_lossy().into_owned()))
}

/// Loader for real DRM nodes.
#[derive(Debug, Clone)]
pub struct SysfsLoader {
    sysfs_root: PathBuf,
    dri_dir: PathBuf,
    driver_override: Option<String>,
    prefer_device: Option<String>,
}

impl Default for SysfsLoader {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from(SYSFS_ROOT),
            dri_dir: PathBuf::from(DRI_DIR),
            driver_override: None,
            prefer_device: None,
        }
    }
}

impl SysfsLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            driver_override: config.driver_override.clone(),
            prefer_device: config.prefer_device.clone(),
            ..Self::default()
        }
    }

    pub fn with_roots(mut self, sysfs_root: PathBuf, dri_dir: PathBuf) -> Self {
        self.sysfs_root = sysfs_root;
        self.dri_dir = dri_dir;
        self
    }

    fn sysfs_device_dir(&self, handle: &DeviceHandle) -> Option<PathBuf> {
        let rdev = handle.rdev().ok()?;
        Some(
            self.sysfs_root
                .join("dev/char")
                .join(format!("{}:{}", major(rdev), minor(rdev)))
                .join("device"),
        )
    }

    /// Opens the render node of the device tagged `tag`.
    fn open_render_node_of(&mut self, tag: &str) -> Option<DeviceHandle> {
        let entries = fs::read_dir(&self.dri_dir).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !matches!(classify_node(&name.to_string_lossy()), Some((NodeType::Render, _))) {
                continue;
            }
            let Ok(handle) = DeviceHandle::open(&entry.path()) else {
                continue;
            };
            if self.device_name(&handle).as_deref() == Some(tag) {
                return Some(handle);
            }
        }
        None
    }
}

impl DeviceLoader for SysfsLoader {
    type Handle = DeviceHandle;

    fn open_device(&mut self, path: &Path) -> Result<DeviceHandle> {
        DeviceHandle::open(path)
    }

    fn user_preferred_nodes(&mut self, opened: DeviceHandle) -> NodePair<DeviceHandle> {
        let Some(tag) = self.prefer_device.clone() else {
            return NodePair::single(opened);
        };
        if self.device_name(&opened).as_deref() == Some(tag.as_str()) {
            return NodePair::single(opened);
        }
        match self.open_render_node_of(&tag) {
            Some(render) => {
                debug!(
                    "Rendering on preferred device {} ({}), displaying on {}",
                    tag,
                    render.path().display(),
                    opened.path().display()
                );
                NodePair {
                    render,
                    display: Some(opened),
                }
            }
            None => {
                warn!("Preferred device {} not found, using the probed node", tag);
                NodePair::single(opened)
            }
        }
    }

    fn device_name(&mut self, handle: &DeviceHandle) -> Option<String> {
        let dir = self.sysfs_device_dir(handle)?;
        let subsystem = link_name(&dir.join("subsystem"))?;
        let bus_id = fs::canonicalize(&dir)
            .ok()?
            .file_name()?
            .to_string_lossy()
            .into_owned();
        Some(device_tag(&subsystem, &bus_id))
    }

    fn driver_name(&mut self, handle: &DeviceHandle) -> Option<String> {
        if let Some(name) = &self.driver_override {
            return Some(name.clone());
        }
        let dir = self.sysfs_device_dir(handle)?;
        let kernel = link_name(&dir.join("driver"))?;
        let name = userspace_driver(&kernel).to_string();
        trace!("{}: kernel driver {} -> {}", handle.path().display(), kernel, name);
        Some(name)
    }

    fn node_type(&mut self, handle: &DeviceHandle) -> Option<NodeType> {
        handle.node_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceClass;
    use test_log::test;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("surfaceless-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn kernel_drivers_map_to_userspace_drivers() {
        assert_eq!(userspace_driver("i915"), "iris");
        assert_eq!(userspace_driver("xe"), "iris");
        assert_eq!(userspace_driver("amdgpu"), "radeonsi");
        assert_eq!(userspace_driver("radeon"), "r600");
        assert_eq!(userspace_driver("virtio_gpu"), "virtio_gpu");
    }

    #[test]
    fn pci_bus_ids_become_tags() {
        assert_eq!(device_tag("pci", "0000:01:00.0"), "pci-0000_01_00_0");
        assert_eq!(device_tag("platform", "gpu"), "platform-gpu");
    }

    #[test]
    fn node_names_are_classified() {
        assert_eq!(classify_node("card1"), Some((NodeType::Primary, 1)));
        assert_eq!(classify_node("controlD64"), Some((NodeType::Control, 64)));
        assert_eq!(classify_node("renderD129"), Some((NodeType::Render, 129)));
        assert_eq!(classify_node("by-path"), None);
    }

    #[test]
    fn missing_dri_dir_lists_only_the_software_device() {
        let root = scratch_dir("no-dri");
        let list = enumerate_devices_in(&root.join("dri"), &root.join("class")).unwrap();
        assert_eq!(list.len(), 1);
        assert!(list.software_device().is_some());
    }

    #[test]
    fn nodes_without_sysfs_group_by_index() {
        let root = scratch_dir("grouping");
        let dri = root.join("dri");
        fs::create_dir_all(&dri).unwrap();
        for name in ["card0", "renderD128", "card1", "renderD129", "by-path"] {
            fs::write(dri.join(name), b"").unwrap();
        }

        let list = enumerate_devices_in(&dri, &root.join("class")).unwrap();
        assert_eq!(list.len(), 3);

        let drm: Vec<_> = list
            .iter()
            .filter(|d| d.supports(DeviceClass::DRM))
            .collect();
        assert_eq!(drm.len(), 2);
        assert_eq!(drm[0].node_path(NodeType::Primary), Some(dri.join("card0").as_path()));
        assert_eq!(drm[0].node_path(NodeType::Render), Some(dri.join("renderD128").as_path()));
        assert!(!drm[0].has_node(NodeType::Control));
        assert_eq!(drm[1].node_path(NodeType::Render), Some(dri.join("renderD129").as_path()));

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn driver_override_wins_over_sysfs() {
        let config = Config {
            driver_override: Some("zink".into()),
            ..Config::default()
        };
        let mut loader = SysfsLoader::from_config(&config);
        let handle = DeviceHandle::open(Path::new("/dev/null")).unwrap();
        assert_eq!(loader.driver_name(&handle).as_deref(), Some("zink"));
    }
}
