// src/device/loader.rs
//
// Contract between the prober and whatever knows how to open device nodes
// and name their drivers.

use std::path::Path;

use crate::device::{DeviceNode, NodeType};
use crate::error::Result;

/// The render handle plus, when the user prefers a different GPU for
/// rendering, the originally probed node that keeps serving as the display
/// handle.
#[derive(Debug)]
pub struct NodePair<H> {
    pub render: H,
    /// `None` when rendering and display share one node.
    pub display: Option<H>,
}

impl<H> NodePair<H> {
    pub fn single(render: H) -> Self {
        NodePair {
            render,
            display: None,
        }
    }

    pub fn is_split(&self) -> bool {
        self.display.is_some()
    }
}

/// Opens device nodes and resolves names for them.
pub trait DeviceLoader {
    type Handle: DeviceNode;

    /// Opens the node at `path`.
    fn open_device(&mut self, path: &Path) -> Result<Self::Handle>;

    /// Applies the user's preferred-GPU choice to a freshly opened node.
    ///
    /// The default keeps the node for both rendering and display.
    fn user_preferred_nodes(&mut self, opened: Self::Handle) -> NodePair<Self::Handle> {
        NodePair::single(opened)
    }

    /// Human-readable tag of the device behind `handle`.
    fn device_name(&mut self, handle: &Self::Handle) -> Option<String>;

    /// Name of the userspace driver for `handle`.
    fn driver_name(&mut self, handle: &Self::Handle) -> Option<String>;

    fn node_type(&mut self, handle: &Self::Handle) -> Option<NodeType>;
}
