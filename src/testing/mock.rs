use log::trace;
use std::collections::{HashMap, HashSet};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::binding::{LoaderExtensions, LoaderVariant};
use crate::device::{DeviceLoader, DeviceNode, NodePair, NodeType};
use crate::driver::{
    DrawableInfo, DriverConfig, FlushFlags, PixelFormat, RenderDriver, ScreenCaps, ScreenRequest,
};
use crate::error::{Result, SurfacelessError};
use crate::host::{NativeSurface, PresentationHost};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A recorded loader call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderEvent {
    /// Every `open_device` call, successful or not.
    Open(PathBuf),
    Close(PathBuf),
}

#[derive(Debug, Default)]
struct LoaderState {
    events: Vec<LoaderEvent>,
    live: usize,
}

/// What the mock knows about one node path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockNode {
    pub driver_name: Option<String>,
    pub device_name: Option<String>,
    pub node_type: Option<NodeType>,
    pub fail_open: bool,
}

impl MockNode {
    pub fn render(driver_name: &str) -> Self {
        MockNode {
            driver_name: Some(driver_name.to_string()),
            node_type: Some(NodeType::Render),
            ..MockNode::default()
        }
    }

    pub fn primary(driver_name: &str) -> Self {
        MockNode {
            driver_name: Some(driver_name.to_string()),
            node_type: Some(NodeType::Primary),
            ..MockNode::default()
        }
    }

    pub fn named(mut self, device_name: &str) -> Self {
        self.device_name = Some(device_name.to_string());
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }
}

/// Handle to a mock node; records its close when dropped.
#[derive(Debug)]
pub struct MockHandle {
    path: PathBuf,
    fd: RawFd,
    state: Arc<Mutex<LoaderState>>,
}

impl DeviceNode for MockHandle {
    fn raw_fd(&self) -> RawFd {
        self.fd
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.live = state.live.saturating_sub(1);
        state.events.push(LoaderEvent::Close(self.path.clone()));
    }
}

/// A scripted [`DeviceLoader`].
#[derive(Debug, Default)]
pub struct MockLoader {
    nodes: HashMap<PathBuf, MockNode>,
    preferred: Option<PathBuf>,
    next_fd: RawFd,
    state: Arc<Mutex<LoaderState>>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self {
            next_fd: 100,
            ..Self::default()
        }
    }

    pub fn with_node(mut self, path: impl Into<PathBuf>, node: MockNode) -> Self {
        self.nodes.insert(path.into(), node);
        self
    }

    /// Makes `path` the user's preferred render node: any other opened node
    /// becomes the display node of a split pair.
    pub fn preferring(mut self, path: impl Into<PathBuf>) -> Self {
        self.preferred = Some(path.into());
        self
    }

    /// A view of the call record that outlives the loader.
    pub fn tracker(&self) -> LoaderTracker {
        LoaderTracker {
            state: Arc::clone(&self.state),
        }
    }

    fn node(&self, handle: &MockHandle) -> Option<&MockNode> {
        self.nodes.get(&handle.path)
    }
}

impl DeviceLoader for MockLoader {
    type Handle = MockHandle;

    fn open_device(&mut self, path: &Path) -> Result<MockHandle> {
        let mut state = lock(&self.state);
        state.events.push(LoaderEvent::Open(path.to_path_buf()));
        match self.nodes.get(path) {
            Some(node) if !node.fail_open => {
                state.live += 1;
                let fd = self.next_fd;
                self.next_fd += 1;
                trace!("MockLoader: opened {} as fd {}", path.display(), fd);
                Ok(MockHandle {
                    path: path.to_path_buf(),
                    fd,
                    state: Arc::clone(&self.state),
                })
            }
            _ => Err(SurfacelessError::Io {
                path: path.to_path_buf(),
                source: nix::Error::ENOENT,
            }),
        }
    }

    fn user_preferred_nodes(&mut self, opened: MockHandle) -> NodePair<MockHandle> {
        let Some(preferred) = self.preferred.clone() else {
            return NodePair::single(opened);
        };
        if preferred == opened.path {
            return NodePair::single(opened);
        }
        match self.open_device(&preferred) {
            Ok(render) => NodePair {
                render,
                display: Some(opened),
            },
            Err(_) => NodePair::single(opened),
        }
    }

    fn device_name(&mut self, handle: &MockHandle) -> Option<String> {
        self.node(handle).and_then(|n| n.device_name.clone())
    }

    fn driver_name(&mut self, handle: &MockHandle) -> Option<String> {
        self.node(handle).and_then(|n| n.driver_name.clone())
    }

    fn node_type(&mut self, handle: &MockHandle) -> Option<NodeType> {
        self.node(handle).and_then(|n| n.node_type)
    }
}

/// Read access to a [`MockLoader`]'s record.
#[derive(Debug, Clone)]
pub struct LoaderTracker {
    state: Arc<Mutex<LoaderState>>,
}

impl LoaderTracker {
    pub fn events(&self) -> Vec<LoaderEvent> {
        lock(&self.state).events.clone()
    }

    pub fn open_calls(&self) -> usize {
        lock(&self.state)
            .events
            .iter()
            .filter(|e| matches!(e, LoaderEvent::Open(_)))
            .count()
    }

    /// Handles opened and not yet dropped.
    pub fn live_handles(&self) -> usize {
        lock(&self.state).live
    }
}

/// A recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    CreateScreen {
        driver_name: String,
        fd: Option<RawFd>,
        loader: LoaderVariant,
        extensions: LoaderExtensions,
    },
    DestroyScreen(u32),
    Configs(u32),
    CreateDrawable(u32),
    DestroyDrawable(u32),
    CreateImage {
        width: u32,
        height: u32,
        format: PixelFormat,
    },
    ImageFailed,
    DestroyImage(u32),
    Swap(u32),
}

#[derive(Debug, Default)]
struct DriverState {
    events: Vec<DriverEvent>,
    live_screens: usize,
    live_drawables: usize,
    live_images: usize,
    failing_images: usize,
    fail_configs: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub struct MockScreen {
    pub id: u32,
    pub driver_name: String,
    pub loader: LoaderVariant,
    graphics: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub struct MockDrawable {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub swap_interval: i32,
    pub swaps: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub struct MockImage {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// A scripted [`RenderDriver`].
#[derive(Debug)]
pub struct MockDriver {
    next_id: u32,
    formats: Vec<PixelFormat>,
    srgb_formats: HashSet<PixelFormat>,
    fail_screens_for: HashSet<String>,
    no_graphics_for: HashSet<String>,
    screens_before_failure: Option<usize>,
    state: Arc<Mutex<DriverState>>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// A driver that loads everything, exposing ARGB8888 (sRGB-capable),
    /// XRGB8888 and RGB565 configs.
    pub fn new() -> Self {
        Self {
            next_id: 1,
            formats: vec![PixelFormat::Argb8888, PixelFormat::Xrgb8888, PixelFormat::Rgb565],
            srgb_formats: [PixelFormat::Argb8888].into_iter().collect(),
            fail_screens_for: HashSet::new(),
            no_graphics_for: HashSet::new(),
            screens_before_failure: None,
            state: Arc::default(),
        }
    }

    pub fn with_formats(mut self, formats: &[PixelFormat]) -> Self {
        self.formats = formats.to_vec();
        self
    }

    /// Screen creation fails for `driver_name`.
    pub fn failing_screen_for(mut self, driver_name: &str) -> Self {
        self.fail_screens_for.insert(driver_name.to_string());
        self
    }

    /// Screens for `driver_name` are created without graphics support.
    pub fn without_graphics_for(mut self, driver_name: &str) -> Self {
        self.no_graphics_for.insert(driver_name.to_string());
        self
    }

    /// Every screen creation after the first `count` fails.
    pub fn failing_screens_after(mut self, count: usize) -> Self {
        self.screens_before_failure = Some(count);
        self
    }

    pub fn failing_configs(self) -> Self {
        lock(&self.state).fail_configs = true;
        self
    }

    pub fn tracker(&self) -> DriverTracker {
        DriverTracker {
            state: Arc::clone(&self.state),
        }
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl RenderDriver for MockDriver {
    type Screen = MockScreen;
    type Drawable = MockDrawable;
    type Image = MockImage;

    fn create_screen(&mut self, request: &ScreenRequest<'_>) -> Result<MockScreen> {
        lock(&self.state).events.push(DriverEvent::CreateScreen {
            driver_name: request.driver_name.to_string(),
            fd: request.fd,
            loader: request.loader,
            extensions: request.extensions,
        });
        if self.fail_screens_for.contains(request.driver_name) {
            return Err(SurfacelessError::Driver(format!(
                "cannot load {}",
                request.driver_name
            )));
        }
        if let Some(remaining) = self.screens_before_failure.as_mut() {
            if *remaining == 0 {
                return Err(SurfacelessError::Driver("screen creation failed".into()));
            }
            *remaining -= 1;
        }
        let id = self.next_id();
        lock(&self.state).live_screens += 1;
        Ok(MockScreen {
            id,
            driver_name: request.driver_name.to_string(),
            loader: request.loader,
            graphics: !self.no_graphics_for.contains(request.driver_name),
        })
    }

    fn screen_caps(&self, screen: &MockScreen) -> ScreenCaps {
        if screen.graphics {
            ScreenCaps::GRAPHICS | ScreenCaps::COMPUTE
        } else {
            ScreenCaps::COMPUTE
        }
    }

    fn destroy_screen(&mut self, screen: MockScreen) {
        let mut state = lock(&self.state);
        state.live_screens = state.live_screens.saturating_sub(1);
        state.events.push(DriverEvent::DestroyScreen(screen.id));
    }

    fn configs(&mut self, screen: &MockScreen) -> Result<Vec<DriverConfig>> {
        let mut state = lock(&self.state);
        state.events.push(DriverEvent::Configs(screen.id));
        if state.fail_configs {
            return Err(SurfacelessError::Driver("config enumeration failed".into()));
        }
        Ok(self
            .formats
            .iter()
            .enumerate()
            .map(|(i, &format)| DriverConfig {
                id: 100 + i as u32,
                format,
                double_buffered: false,
                srgb_capable: self.srgb_formats.contains(&format),
                depth_bits: 0,
                stencil_bits: 0,
            })
            .collect())
    }

    fn create_drawable(
        &mut self,
        _screen: &MockScreen,
        _config: &DriverConfig,
        info: &DrawableInfo,
    ) -> Result<MockDrawable> {
        let id = self.next_id();
        let mut state = lock(&self.state);
        state.live_drawables += 1;
        state.events.push(DriverEvent::CreateDrawable(id));
        Ok(MockDrawable {
            id,
            width: info.width,
            height: info.height,
            swap_interval: 1,
            swaps: 0,
        })
    }

    fn destroy_drawable(&mut self, drawable: MockDrawable) {
        let mut state = lock(&self.state);
        state.live_drawables = state.live_drawables.saturating_sub(1);
        state.events.push(DriverEvent::DestroyDrawable(drawable.id));
    }

    fn create_image(
        &mut self,
        _screen: &MockScreen,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Option<MockImage> {
        {
            let mut state = lock(&self.state);
            if state.failing_images > 0 {
                state.failing_images -= 1;
                state.events.push(DriverEvent::ImageFailed);
                return None;
            }
            state.live_images += 1;
            state.events.push(DriverEvent::CreateImage {
                width,
                height,
                format,
            });
        }
        Some(MockImage {
            id: self.next_id(),
            width,
            height,
            format,
        })
    }

    fn destroy_image(&mut self, image: MockImage) {
        let mut state = lock(&self.state);
        state.live_images = state.live_images.saturating_sub(1);
        state.events.push(DriverEvent::DestroyImage(image.id));
    }

    fn swap_buffers(&mut self, drawable: &mut MockDrawable, _flags: FlushFlags) -> Result<()> {
        drawable.swaps += 1;
        lock(&self.state).events.push(DriverEvent::Swap(drawable.id));
        Ok(())
    }

    fn set_swap_interval(&mut self, drawable: &mut MockDrawable, interval: i32) -> Result<()> {
        drawable.swap_interval = interval;
        Ok(())
    }

    fn query_buffer_age(&mut self, drawable: &MockDrawable) -> i32 {
        drawable.swaps.min(2) as i32
    }
}

/// Read access to a [`MockDriver`]'s record, plus faults that can be armed
/// after the driver has been handed to a display.
#[derive(Debug, Clone)]
pub struct DriverTracker {
    state: Arc<Mutex<DriverState>>,
}

impl DriverTracker {
    pub fn events(&self) -> Vec<DriverEvent> {
        lock(&self.state).events.clone()
    }

    /// Driver names passed to `create_screen`, in call order.
    pub fn screen_requests(&self) -> Vec<String> {
        lock(&self.state)
            .events
            .iter()
            .filter_map(|e| match e {
                DriverEvent::CreateScreen { driver_name, .. } => Some(driver_name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Loader extensions offered with each `create_screen`, in call order.
    pub fn screen_extensions(&self) -> Vec<LoaderExtensions> {
        lock(&self.state)
            .events
            .iter()
            .filter_map(|e| match e {
                DriverEvent::CreateScreen { extensions, .. } => Some(*extensions),
                _ => None,
            })
            .collect()
    }

    /// Live screens, drawables and images.
    pub fn live_objects(&self) -> (usize, usize, usize) {
        let state = lock(&self.state);
        (state.live_screens, state.live_drawables, state.live_images)
    }

    /// The next `count` image allocations fail.
    pub fn fail_next_images(&self, count: usize) {
        lock(&self.state).failing_images = count;
    }
}

/// Host that records the calls it receives and reports a fixed size.
#[derive(Debug)]
pub struct RecordingHost {
    size: (u32, u32),
    substitute: Option<NativeSurface>,
    calls: Mutex<Vec<&'static str>>,
}

impl RecordingHost {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            substitute: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// `prepare_surface` hands back `native` instead of its argument.
    pub fn substituting(mut self, native: NativeSurface) -> Self {
        self.substitute = Some(native);
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }
}

impl PresentationHost for RecordingHost {
    fn prepare_surface(&self, native: NativeSurface) -> NativeSurface {
        lock(&self.calls).push("prepare_surface");
        self.substitute.unwrap_or(native)
    }

    fn drawable_size(&self, _native: NativeSurface) -> (u32, u32) {
        lock(&self.calls).push("drawable_size");
        self.size
    }
}
