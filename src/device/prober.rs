// src/device/prober.rs
//! Device probing with ordered fallback.
//!
//! Each hardware candidate runs through the whole pipeline (open, preferred
//! GPU, names, driver, screen) as a tentative [`ProbedDevice`] that is only
//! handed to the display once the screen reports graphics support. A
//! candidate that fails any step is rolled back before the next one is
//! tried: its handles close when they drop, its driver name is freed, and
//! any screen created for it is destroyed through the driver.

use log::{debug, info, warn};

use crate::binding::LoaderVariant;
use crate::config::DisplayOptions;
use crate::device::{
    DeviceCandidate, DeviceClass, DeviceId, DeviceList, DeviceLoader, DeviceNode, NodePair,
    NodeType,
};
use crate::driver::{RenderDriver, ScreenCaps, ScreenRequest};
use crate::error::{Result, SurfacelessError};

/// Kernel drivers for which forced software rendering uses the KMS-aware
/// software rasterizer.
const KMS_SWRAST_HOSTS: [&str; 2] = ["vgem", "virtio_gpu"];
pub const KMS_SWRAST_DRIVER: &str = "kms_swrast";
pub const SWRAST_DRIVER: &str = "swrast";
pub const ZINK_DRIVER: &str = "zink";

/// Result of a successful probe, owned by the display from then on.
#[derive(Debug)]
pub struct ProbedDevice<H, S> {
    pub device: DeviceId,
    /// `None` for the software device, which has no node.
    pub nodes: Option<NodePair<H>>,
    pub driver_name: String,
    pub device_name: Option<String>,
    pub is_render_node: bool,
    pub kopper: bool,
    pub swrast: bool,
    pub loader: LoaderVariant,
    pub render_screen: S,
    /// Present only when the display node differs from the render node.
    pub display_screen: Option<S>,
}

/// Runs the probe strategies against one loader and driver.
pub struct DeviceProber<'a, L: DeviceLoader, D: RenderDriver> {
    loader: &'a mut L,
    driver: &'a mut D,
    options: &'a DisplayOptions,
    native_presentation: bool,
}

impl<'a, L: DeviceLoader, D: RenderDriver> DeviceProber<'a, L, D> {
    pub fn new(
        loader: &'a mut L,
        driver: &'a mut D,
        options: &'a DisplayOptions,
        native_presentation: bool,
    ) -> Self {
        Self {
            loader,
            driver,
            options,
            native_presentation,
        }
    }

    /// Walks `devices` in order and returns the first candidate whose
    /// driver yields a graphics-capable screen.
    ///
    /// With `force_software` only primary nodes are considered and only
    /// KMS-friendly virtual devices are kept (switched to `kms_swrast`).
    pub fn probe_hardware(
        &mut self,
        devices: &DeviceList,
        force_software: bool,
        zink: bool,
    ) -> Result<ProbedDevice<L::Handle, D::Screen>> {
        let node_type = if force_software {
            NodeType::Primary
        } else {
            NodeType::Render
        };

        for candidate in devices.iter() {
            if !self.eligible(candidate, node_type) {
                continue;
            }
            match self.try_candidate(candidate, node_type, force_software, zink) {
                Ok(probed) => {
                    info!(
                        "Probed {}: driver '{}' on {:?} node",
                        probed.device, probed.driver_name, node_type
                    );
                    return Ok(probed);
                }
                Err(e) => debug!("Skipping {}: {}", candidate.id(), e),
            }
        }

        debug!("Hardware probe found no usable {:?} node", node_type);
        Err(SurfacelessError::ProbeExhausted)
    }

    fn eligible(&self, candidate: &DeviceCandidate, node_type: NodeType) -> bool {
        if !candidate.supports(DeviceClass::DRM) {
            return false;
        }
        if let Some(pinned) = self.options.device {
            if pinned != candidate.id() {
                return false;
            }
        }
        candidate.has_node(node_type)
    }

    fn try_candidate(
        &mut self,
        candidate: &DeviceCandidate,
        node_type: NodeType,
        force_software: bool,
        zink: bool,
    ) -> Result<ProbedDevice<L::Handle, D::Screen>> {
        let path = candidate.node_path(node_type).ok_or_else(|| {
            SurfacelessError::CandidateRejected(format!("no {:?} node path", node_type))
        })?;

        let opened = self.loader.open_device(path)?;
        let nodes = self.loader.user_preferred_nodes(opened);

        let device_name = if nodes.is_split() {
            let name = self.loader.device_name(&nodes.render).ok_or_else(|| {
                SurfacelessError::CandidateRejected(
                    "failed to get device name for requested GPU".to_string(),
                )
            })?;
            Some(name)
        } else {
            None
        };
        let is_render_node = self.loader.node_type(&nodes.render) == Some(NodeType::Render);

        let resolved = self.loader.driver_name(&nodes.render);
        let driver_name = if force_software {
            resolved
                .filter(|name| KMS_SWRAST_HOSTS.contains(&name.as_str()))
                .map(|_| KMS_SWRAST_DRIVER.to_string())
        } else {
            resolved
        };
        let driver_name = driver_name.ok_or_else(|| {
            SurfacelessError::CandidateRejected(format!(
                "no driver for {}",
                nodes.render.path().display()
            ))
        })?;

        let kopper = self.options.kopper(zink);
        let swrast = force_software && !kopper && driver_name != "vmwgfx";
        let loader = LoaderVariant::select(kopper, force_software, self.native_presentation);

        let (render_screen, display_screen) =
            self.create_screens(&driver_name, Some(&nodes), loader, is_render_node)?;

        if !self.driver.screen_caps(&render_screen).contains(ScreenCaps::GRAPHICS) {
            debug!("Driver {} doesn't support graphics, skipping.", driver_name);
            if let Some(screen) = display_screen {
                self.driver.destroy_screen(screen);
            }
            self.driver.destroy_screen(render_screen);
            return Err(SurfacelessError::CandidateRejected(format!(
                "driver {} has no graphics support",
                driver_name
            )));
        }

        Ok(ProbedDevice {
            device: candidate.id(),
            nodes: Some(nodes),
            driver_name,
            device_name,
            is_render_node,
            kopper,
            swrast,
            loader,
            render_screen,
            display_screen,
        })
    }

    /// Binds the device-agnostic software device. There is exactly one
    /// candidate, so any failure ends the strategy.
    pub fn probe_software(
        &mut self,
        devices: &DeviceList,
        zink: bool,
    ) -> Result<ProbedDevice<L::Handle, D::Screen>> {
        let device = devices.software_device().ok_or_else(|| {
            SurfacelessError::CandidateRejected("no software device in the device list".into())
        })?;
        if let Some(pinned) = self.options.device {
            if pinned != device.id() {
                return Err(SurfacelessError::CandidateRejected(format!(
                    "display is pinned to {}, not the software device",
                    pinned
                )));
            }
        }

        let driver_name = if zink { ZINK_DRIVER } else { SWRAST_DRIVER }.to_string();
        let kopper = self.options.kopper(zink);
        let loader = LoaderVariant::select(kopper, true, self.native_presentation);

        let (render_screen, _) = self.create_screens(&driver_name, None, loader, false)?;

        info!("Probed software {}: driver '{}'", device.id(), driver_name);
        Ok(ProbedDevice {
            device: device.id(),
            nodes: None,
            driver_name,
            device_name: None,
            is_render_node: false,
            kopper,
            swrast: !kopper,
            loader,
            render_screen,
            display_screen: None,
        })
    }

    /// Creates the render screen and, for split nodes, the display screen.
    fn create_screens(
        &mut self,
        driver_name: &str,
        nodes: Option<&NodePair<L::Handle>>,
        loader: LoaderVariant,
        is_render_node: bool,
    ) -> Result<(D::Screen, Option<D::Screen>)> {
        let request = ScreenRequest {
            driver_name,
            fd: nodes.map(|n| n.render.raw_fd()),
            loader,
            extensions: loader.extensions(),
            is_render_node,
        };
        let render_screen = self.driver.create_screen(&request).map_err(|e| {
            warn!("DRI2: failed to create screen: {}", e);
            e
        })?;

        let display_fd = nodes.and_then(|n| n.display.as_ref()).map(|h| h.raw_fd());
        let display_screen = match display_fd {
            Some(fd) => {
                let request = ScreenRequest {
                    fd: Some(fd),
                    is_render_node: false,
                    ..request
                };
                match self.driver.create_screen(&request) {
                    Ok(screen) => Some(screen),
                    Err(e) => {
                        warn!("DRI2: failed to create display screen: {}", e);
                        self.driver.destroy_screen(render_screen);
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        Ok((render_screen, display_screen))
    }
}
