// src/driver/mod.rs
//! The rendering-driver contract.
//!
//! The display never looks inside screens, drawables or images; it only
//! creates them through [`RenderDriver`], hands them back to it, and frees
//! each exactly once by passing ownership into the matching `destroy_*`
//! call.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::os::unix::io::RawFd;

use crate::binding::{LoaderExtensions, LoaderVariant};
use crate::error::{Result, SurfacelessError};
use crate::surface::SurfaceKind;

pub mod headless;

pub use headless::HeadlessDriver;

/// Pixel layouts an image buffer can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Abgr16161616F,
    Xbgr16161616F,
    Argb2101010,
    Xrgb2101010,
    Argb8888,
    Xrgb8888,
    Abgr8888,
    Xbgr8888,
    Rgb565,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Abgr16161616F | PixelFormat::Xbgr16161616F => 8,
            PixelFormat::Rgb565 => 2,
            _ => 4,
        }
    }
}

/// A framebuffer configuration the driver exposes for a screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DriverConfig {
    pub id: u32,
    pub format: PixelFormat,
    pub double_buffered: bool,
    pub srgb_capable: bool,
    pub depth_bits: u8,
    pub stencil_bits: u8,
}

bitflags! {
    /// What a created screen can do.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ScreenCaps: u32 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
    }
}

bitflags! {
    /// Flags passed along with a presentation swap.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FlushFlags: u32 {
        const DRAWABLE = 1 << 0;
        const CONTEXT = 1 << 1;
        const INVALIDATE_ANCILLARY = 1 << 2;
    }
}

/// Everything the driver needs to create a screen for one device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenRequest<'a> {
    pub driver_name: &'a str,
    /// `None` for device-agnostic software rendering.
    pub fd: Option<RawFd>,
    pub loader: LoaderVariant,
    /// Loader extensions the driver may bind for `loader`.
    pub extensions: LoaderExtensions,
    pub is_render_node: bool,
}

/// Parameters for a new drawable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawableInfo {
    pub kind: SurfaceKind,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// A loaded rendering driver, consumed as an opaque capability table.
pub trait RenderDriver {
    type Screen;
    type Drawable;
    type Image;

    fn create_screen(&mut self, request: &ScreenRequest<'_>) -> Result<Self::Screen>;

    fn screen_caps(&self, screen: &Self::Screen) -> ScreenCaps;

    fn destroy_screen(&mut self, screen: Self::Screen);

    /// Framebuffer configurations supported by `screen`.
    fn configs(&mut self, screen: &Self::Screen) -> Result<Vec<DriverConfig>>;

    fn create_drawable(
        &mut self,
        screen: &Self::Screen,
        config: &DriverConfig,
        info: &DrawableInfo,
    ) -> Result<Self::Drawable>;

    fn destroy_drawable(&mut self, drawable: Self::Drawable);

    /// Allocates GPU image storage; `None` when allocation fails.
    fn create_image(
        &mut self,
        screen: &Self::Screen,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Option<Self::Image>;

    fn destroy_image(&mut self, image: Self::Image);

    fn swap_buffers(&mut self, _drawable: &mut Self::Drawable, _flags: FlushFlags) -> Result<()> {
        Err(SurfacelessError::Unsupported("swap_buffers"))
    }

    fn set_swap_interval(&mut self, _drawable: &mut Self::Drawable, _interval: i32) -> Result<()> {
        Err(SurfacelessError::Unsupported("swap_interval"))
    }

    /// Age of the back buffer in frames; 0 when unknown.
    fn query_buffer_age(&mut self, _drawable: &Self::Drawable) -> i32 {
        0
    }
}
