// src/display.rs
//! The surfaceless display: probing, config setup, surfaces.
//!
//! A display owns its loader, its driver and whatever the probe bound. The
//! driver binding is the last thing [`Display::initialize`] sets, so an
//! observer that sees a binding also sees a bound device, its screens and
//! its configs.

use log::{debug, error, info, warn};
use once_cell::unsync::OnceCell;
use std::os::unix::io::RawFd;

use crate::binding::{DisplayOps, DriverBinding, LoaderVariant};
use crate::bridge::{BufferMask, ImageList, ImageLoader, KopperLoader, SwrastLoader};
use crate::config::{DisplayOptions, SoftwareFallback};
use crate::device::{DeviceId, DeviceList, DeviceLoader, DeviceNode, DeviceProber, ProbedDevice};
use crate::driver::{DrawableInfo, FlushFlags, PixelFormat, RenderDriver};
use crate::error::{Result, SurfacelessError};
use crate::host::{HostIntegration, NativeSurface};
use crate::surface::{Colorspace, Surface, SurfaceAttributes, SurfaceConfig, SurfaceKind, SurfaceTypes};

/// Visuals exposed for pbuffers, in the order configs are added.
pub const PBUFFER_VISUALS: [PixelFormat; 7] = [
    PixelFormat::Abgr16161616F,
    PixelFormat::Xbgr16161616F,
    PixelFormat::Argb2101010,
    PixelFormat::Xrgb2101010,
    PixelFormat::Argb8888,
    PixelFormat::Xrgb8888,
    PixelFormat::Rgb565,
];

pub struct Display<L: DeviceLoader, D: RenderDriver> {
    loader: L,
    driver: D,
    devices: DeviceList,
    options: DisplayOptions,
    host: Option<HostIntegration>,
    probed: Option<ProbedDevice<L::Handle, D::Screen>>,
    configs: Vec<SurfaceConfig>,
    binding: OnceCell<DriverBinding>,
}

impl<L: DeviceLoader, D: RenderDriver> Display<L, D> {
    pub fn new(loader: L, driver: D, devices: DeviceList, options: DisplayOptions) -> Self {
        Self {
            loader,
            driver,
            devices,
            options,
            host: None,
            probed: None,
            configs: Vec::new(),
            binding: OnceCell::new(),
        }
    }

    /// Attaches the host used for window surfaces. Without one the display
    /// only ever binds the pbuffer table.
    pub fn with_host(mut self, host: HostIntegration) -> Self {
        self.host = Some(host);
        self
    }

    /// Brings the display up: hardware probe, then the software device when
    /// allowed, then config setup. Calling it again on an initialized
    /// display does nothing.
    pub fn initialize(&mut self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        let force_software = self.options.force_software;
        let zink = self.options.zink;
        let mut loaded = self.probe_hardware(force_software, zink);
        if !loaded
            && (force_software || self.options.software_fallback == SoftwareFallback::Always)
        {
            debug!("Falling back to surfaceless swrast without DRM.");
            loaded = self.probe_software();
        }
        if !loaded {
            error!("DRI2: failed to load driver");
            return Err(SurfacelessError::NotInitialized(
                "DRI2: failed to load driver".to_string(),
            ));
        }

        if let Err(e) = self.setup_configs() {
            error!("DRI2: failed to set up configs: {}", e);
            self.release_device();
            return Err(SurfacelessError::NotInitialized(format!(
                "config setup failed: {}",
                e
            )));
        }

        let loader = match self.probed.as_ref() {
            Some(probed) => probed.loader,
            None => {
                return Err(SurfacelessError::NotInitialized(
                    "device released during setup".to_string(),
                ))
            }
        };
        let binding = DriverBinding::select(loader);
        if self.binding.set(binding).is_err() {
            warn!("Display binding was already set");
        }
        info!(
            "Display initialized on {:?} with {:?} ({} configs)",
            self.device(),
            binding,
            self.configs.len()
        );
        Ok(())
    }

    /// Runs the hardware strategy. The probed device is stored only when a
    /// candidate makes it all the way through.
    pub fn probe_hardware(&mut self, force_software: bool, zink: bool) -> bool {
        if self.probed.is_some() {
            return true;
        }
        let native = self.native_presentation();
        let mut prober = DeviceProber::new(&mut self.loader, &mut self.driver, &self.options, native);
        match prober.probe_hardware(&self.devices, force_software, zink) {
            Ok(probed) => {
                self.probed = Some(probed);
                true
            }
            Err(e) => {
                debug!("Hardware probe failed: {}", e);
                false
            }
        }
    }

    /// Runs the software strategy against the device-agnostic device.
    pub fn probe_software(&mut self) -> bool {
        if self.probed.is_some() {
            return true;
        }
        let native = self.native_presentation();
        let zink = self.options.zink;
        let mut prober = DeviceProber::new(&mut self.loader, &mut self.driver, &self.options, native);
        match prober.probe_software(&self.devices, zink) {
            Ok(probed) => {
                self.probed = Some(probed);
                true
            }
            Err(e) => {
                warn!("Software probe failed: {}", e);
                false
            }
        }
    }

    fn native_presentation(&self) -> bool {
        self.host.is_some()
    }

    fn setup_configs(&mut self) -> Result<()> {
        let probed = self
            .probed
            .as_mut()
            .ok_or_else(|| SurfacelessError::NotInitialized("no device bound".to_string()))?;

        if let Some(nodes) = probed.nodes.as_ref() {
            if probed.device_name.is_none() {
                probed.device_name = self.loader.device_name(&nodes.render);
            }
        }

        let driver_configs = self.driver.configs(&probed.render_screen)?;
        let window = probed.kopper && self.host.is_some();

        let mut configs = Vec::new();
        for driver_config in driver_configs {
            // Presenting displays expose every driver config for both kinds.
            let types = if window {
                SurfaceTypes::PBUFFER | SurfaceTypes::WINDOW
            } else if PBUFFER_VISUALS.contains(&driver_config.format) {
                SurfaceTypes::PBUFFER
            } else {
                continue;
            };
            configs.push(SurfaceConfig {
                id: configs.len() as u32 + 1,
                format: driver_config.format,
                surface_types: types,
                driver_config,
            });
        }
        if configs.is_empty() {
            warn!("Driver {} exposes no usable configs", probed.driver_name);
        }
        debug!("Added {} configs for {}", configs.len(), probed.driver_name);
        self.configs = configs;
        Ok(())
    }

    /// Destroys the screens (display screen first) and closes the nodes.
    fn release_device(&mut self) {
        self.configs.clear();
        if let Some(probed) = self.probed.take() {
            let ProbedDevice {
                device,
                nodes,
                render_screen,
                display_screen,
                ..
            } = probed;
            if let Some(screen) = display_screen {
                self.driver.destroy_screen(screen);
            }
            self.driver.destroy_screen(render_screen);
            drop(nodes);
            debug!("Released {}", device);
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.binding.get().is_some()
    }

    pub fn binding(&self) -> Option<DriverBinding> {
        self.binding.get().copied()
    }

    fn require(&self, op: DisplayOps, name: &'static str) -> Result<DriverBinding> {
        let binding = self
            .binding()
            .ok_or_else(|| SurfacelessError::NotInitialized(name.to_string()))?;
        binding.require(op, name)?;
        Ok(binding)
    }

    /// The bound device. `None` until a probe has fully succeeded.
    pub fn device(&self) -> Option<DeviceId> {
        self.probed.as_ref().map(|p| p.device)
    }

    pub fn driver_name(&self) -> Option<&str> {
        self.probed.as_ref().map(|p| p.driver_name.as_str())
    }

    pub fn device_name(&self) -> Option<&str> {
        self.probed.as_ref().and_then(|p| p.device_name.as_deref())
    }

    pub fn loader_variant(&self) -> Option<LoaderVariant> {
        self.probed.as_ref().map(|p| p.loader)
    }

    pub fn is_render_node(&self) -> bool {
        self.probed.as_ref().is_some_and(|p| p.is_render_node)
    }

    pub fn is_kopper(&self) -> bool {
        self.probed.as_ref().is_some_and(|p| p.kopper)
    }

    pub fn is_swrast(&self) -> bool {
        self.probed.as_ref().is_some_and(|p| p.swrast)
    }

    /// Descriptor of the render node, if the device has one.
    pub fn render_fd(&self) -> Option<RawFd> {
        self.probed
            .as_ref()
            .and_then(|p| p.nodes.as_ref())
            .map(|n| n.render.raw_fd())
    }

    /// Descriptor of the separate display node when rendering happens on a
    /// preferred GPU.
    pub fn display_fd(&self) -> Option<RawFd> {
        self.probed
            .as_ref()
            .and_then(|p| p.nodes.as_ref())
            .and_then(|n| n.display.as_ref())
            .map(|h| h.raw_fd())
    }

    pub fn has_display_screen(&self) -> bool {
        self.probed
            .as_ref()
            .is_some_and(|p| p.display_screen.is_some())
    }

    pub fn configs(&self) -> &[SurfaceConfig] {
        &self.configs
    }

    pub fn devices(&self) -> &DeviceList {
        &self.devices
    }

    pub fn options(&self) -> &DisplayOptions {
        &self.options
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Creates an off-screen surface for `config`.
    pub fn create_pbuffer_surface(
        &mut self,
        config: &SurfaceConfig,
        attrs: SurfaceAttributes,
    ) -> Result<Surface<D>> {
        self.require(DisplayOps::CREATE_PBUFFER, "create_pbuffer_surface")?;
        let (width, height) = attrs.validated_size()?;
        self.create_surface(SurfaceKind::Pbuffer, config, attrs.colorspace, width, height, None)
    }

    /// Creates a surface presented through the host. Its size comes from
    /// the host's view of `native`.
    pub fn create_window_surface(
        &mut self,
        config: &SurfaceConfig,
        native: NativeSurface,
        attrs: SurfaceAttributes,
    ) -> Result<Surface<D>> {
        self.require(DisplayOps::CREATE_WINDOW, "create_window_surface")?;
        attrs.validated_size()?;
        let host = self
            .host
            .as_ref()
            .ok_or(SurfacelessError::Unsupported("create_window_surface"))?;
        let (width, height) = host.drawable_size(native)?;
        self.create_surface(
            SurfaceKind::Window,
            config,
            attrs.colorspace,
            width,
            height,
            Some(native),
        )
    }

    fn create_surface(
        &mut self,
        kind: SurfaceKind,
        config: &SurfaceConfig,
        colorspace: Colorspace,
        width: u32,
        height: u32,
        native: Option<NativeSurface>,
    ) -> Result<Surface<D>> {
        let config = *self
            .configs
            .iter()
            .find(|c| *c == config)
            .ok_or_else(|| {
                SurfacelessError::ConfigMismatch(format!(
                    "config {} ({:?}) does not belong to this display",
                    config.id, config.format
                ))
            })?;
        if !config.supports(kind)
            || (colorspace == Colorspace::Srgb && !config.driver_config.srgb_capable)
        {
            return Err(SurfacelessError::ConfigMismatch(
                "Unsupported surfacetype/colorspace configuration".to_string(),
            ));
        }

        let probed = self
            .probed
            .as_ref()
            .ok_or_else(|| SurfacelessError::NotInitialized("no device bound".to_string()))?;
        let info = DrawableInfo {
            kind,
            width,
            height,
            format: config.format,
        };
        let drawable =
            self.driver
                .create_drawable(&probed.render_screen, &config.driver_config, &info)?;
        debug!("Created {:?} surface {}x{} ({:?})", kind, width, height, config.format);

        Ok(Surface {
            kind,
            config,
            width,
            height,
            format: config.format,
            colorspace,
            front: None,
            drawable: Some(drawable),
            staging: None,
            native,
        })
    }

    /// Releases the surface's image buffer, its staging buffer, and then its
    /// drawable.
    pub fn destroy_surface(&mut self, mut surface: Surface<D>) {
        if let Some(image) = surface.front.take() {
            self.driver.destroy_image(image);
        }
        surface.staging = None;
        if let Some(drawable) = surface.drawable.take() {
            self.driver.destroy_drawable(drawable);
        }
        debug!("Destroyed {:?} surface", surface.kind);
    }

    /// Drops cached buffers so the next request reallocates them.
    pub fn invalidate_buffers(&mut self, surface: &mut Surface<D>) {
        if let Some(image) = surface.front.take() {
            self.driver.destroy_image(image);
        }
        surface.staging = None;
    }

    pub fn swap_buffers(&mut self, surface: &mut Surface<D>) -> Result<()> {
        self.require(DisplayOps::SWAP_BUFFERS, "swap_buffers")?;
        let drawable = surface.drawable_mut()?;
        self.driver.swap_buffers(
            drawable,
            FlushFlags::DRAWABLE | FlushFlags::INVALIDATE_ANCILLARY,
        )
    }

    pub fn swap_interval(&mut self, surface: &mut Surface<D>, interval: i32) -> Result<()> {
        self.require(DisplayOps::SWAP_INTERVAL, "swap_interval")?;
        let drawable = surface.drawable_mut()?;
        self.driver.set_swap_interval(drawable, interval)
    }

    pub fn query_buffer_age(&mut self, surface: &Surface<D>) -> Result<i32> {
        self.require(DisplayOps::QUERY_BUFFER_AGE, "query_buffer_age")?;
        let drawable = surface
            .drawable()
            .ok_or_else(|| SurfacelessError::BadParameter("surface has no drawable".into()))?;
        Ok(self.driver.query_buffer_age(drawable))
    }

    /// Image-loader callbacks over the render screen.
    pub fn image_loader(&mut self) -> Option<ImageLoader<'_, D>> {
        self.binding.get()?;
        let probed = self.probed.as_ref()?;
        Some(ImageLoader::new(&mut self.driver, &probed.render_screen))
    }

    /// Shorthand for one `get_buffers` call through [`Self::image_loader`].
    pub fn get_buffers<'s>(
        &mut self,
        surface: &'s mut Surface<D>,
        mask: BufferMask,
    ) -> Result<ImageList<'s, D::Image>> {
        let mut loader = self
            .image_loader()
            .ok_or_else(|| SurfacelessError::NotInitialized("get_buffers".to_string()))?;
        Ok(loader.get_buffers(surface, mask))
    }

    /// Software readback callbacks; only for the software pbuffer loader.
    pub fn swrast_loader(&self) -> Option<SwrastLoader> {
        match self.binding()?.loader() {
            LoaderVariant::SoftwarePbuffer => Some(SwrastLoader),
            _ => None,
        }
    }

    /// Presentation callbacks; only for the kopper loader.
    pub fn kopper_loader(&self) -> Option<KopperLoader<'_>> {
        match self.binding()?.loader() {
            LoaderVariant::Presentation { .. } => Some(KopperLoader::new(self.host.as_ref())),
            _ => None,
        }
    }
}

impl<L: DeviceLoader, D: RenderDriver> Drop for Display<L, D> {
    fn drop(&mut self) {
        self.release_device();
    }
}
