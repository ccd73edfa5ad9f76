// src/lib.rs
//! Surfaceless EGL platform: binds a display to a GPU (or a software
//! rasterizer) without any window system, creates off-screen pbuffer
//! surfaces, and serves their image buffers to the rendering driver.

pub mod binding;
pub mod bridge;
pub mod config;
pub mod device;
pub mod display;
pub mod driver;
pub mod error;
pub mod host;
pub mod surface;
pub mod testing;

pub use binding::{DriverBinding, LoaderVariant};
pub use bridge::{BufferMask, ImageList, ImageLoader, KopperLoader, LoaderCap, Region, SwrastLoader};
pub use config::{Config, DisplayOptions, SoftwareFallback, CONFIG};
pub use device::{DeviceClass, DeviceId, DeviceList, DeviceLoader, NodeType};
pub use display::Display;
pub use driver::{PixelFormat, RenderDriver};
pub use error::{Result, SurfacelessError};
pub use host::{HostIntegration, InlineScheduler, MainThreadScheduler, NativeSurface, PresentationHost, ThreadScheduler};
pub use surface::{Colorspace, Surface, SurfaceAttributes, SurfaceConfig, SurfaceKind};
