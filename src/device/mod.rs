// src/device/mod.rs
//! Device discovery: the system device list, node handles, the loader
//! contract and the prober that turns a list of candidates into one bound
//! device.

use bitflags::bitflags;
use std::fmt;
use std::path::{Path, PathBuf};

pub mod drm;
pub mod handle;
pub mod loader;
pub mod prober;

#[cfg(test)]
mod tests;

pub use handle::{DeviceHandle, DeviceNode};
pub use loader::{DeviceLoader, NodePair};
pub use prober::{DeviceProber, ProbedDevice};

/// Access category of a device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum NodeType {
    /// Full access, display capable (`card*`).
    Primary = 0,
    Control = 1,
    /// Render-only access (`renderD*`).
    Render = 2,
}

impl NodeType {
    pub const ALL: [NodeType; 3] = [NodeType::Primary, NodeType::Control, NodeType::Render];

    pub fn mask(self) -> NodeMask {
        NodeMask::from_bits_truncate(1 << self as u32)
    }

    /// Classifies a DRM minor number.
    pub fn from_minor(minor: u64) -> Option<Self> {
        match minor >> 6 {
            0 => Some(NodeType::Primary),
            1 => Some(NodeType::Control),
            2 | 3 => Some(NodeType::Render),
            _ => None,
        }
    }
}

bitflags! {
    /// Which node types a device exposes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NodeMask: u32 {
        const PRIMARY = 1 << 0;
        const CONTROL = 1 << 1;
        const RENDER = 1 << 2;
    }
}

bitflags! {
    /// Device classes a list entry supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeviceClass: u32 {
        const DRM = 1 << 0;
        const SOFTWARE = 1 << 1;
    }
}

/// Position of a device in its [`DeviceList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub usize);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

/// One entry of the system device list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCandidate {
    id: DeviceId,
    classes: DeviceClass,
    available_nodes: NodeMask,
    nodes: [Option<PathBuf>; 3],
}

impl DeviceCandidate {
    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn classes(&self) -> DeviceClass {
        self.classes
    }

    pub fn supports(&self, class: DeviceClass) -> bool {
        self.classes.contains(class)
    }

    pub fn available_nodes(&self) -> NodeMask {
        self.available_nodes
    }

    pub fn has_node(&self, node_type: NodeType) -> bool {
        self.available_nodes.contains(node_type.mask())
    }

    /// Path of the node, only if the availability mask advertises it.
    pub fn node_path(&self, node_type: NodeType) -> Option<&Path> {
        if !self.has_node(node_type) {
            return None;
        }
        self.nodes[node_type as usize].as_deref()
    }
}

/// The ordered list of devices known to the process.
///
/// Iterated read-only by the prober; its order is the probe order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceList {
    devices: Vec<DeviceCandidate>,
}

impl DeviceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// A list that starts with the device-agnostic software device.
    pub fn with_software_device() -> Self {
        let mut list = Self::new();
        list.push(DeviceClass::SOFTWARE, NodeMask::empty(), [None, None, None]);
        list
    }

    /// Appends an entry and returns its id.
    pub fn push(
        &mut self,
        classes: DeviceClass,
        available_nodes: NodeMask,
        nodes: [Option<PathBuf>; 3],
    ) -> DeviceId {
        let id = DeviceId(self.devices.len());
        self.devices.push(DeviceCandidate {
            id,
            classes,
            available_nodes,
            nodes,
        });
        id
    }

    /// Appends a DRM device from its node paths; availability follows
    /// which paths are present.
    pub fn push_drm(
        &mut self,
        primary: Option<PathBuf>,
        control: Option<PathBuf>,
        render: Option<PathBuf>,
    ) -> DeviceId {
        let mut mask = NodeMask::empty();
        mask.set(NodeMask::PRIMARY, primary.is_some());
        mask.set(NodeMask::CONTROL, control.is_some());
        mask.set(NodeMask::RENDER, render.is_some());
        self.push(DeviceClass::DRM, mask, [primary, control, render])
    }

    pub fn get(&self, id: DeviceId) -> Option<&DeviceCandidate> {
        self.devices.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceCandidate> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn software_device(&self) -> Option<&DeviceCandidate> {
        self.devices
            .iter()
            .find(|d| d.supports(DeviceClass::SOFTWARE))
    }
}
