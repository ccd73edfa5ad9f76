// src/surface.rs
//! Drawable surface objects and the configs they are created from.

use bitflags::bitflags;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::driver::{DriverConfig, PixelFormat, RenderDriver};
use crate::error::{Result, SurfacelessError};
use crate::host::NativeSurface;

/// What kind of target a surface is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SurfaceKind {
    /// Off-screen, single-buffered.
    Pbuffer,
    /// Presented through the host platform.
    Window,
}

bitflags! {
    /// Surface kinds a config can back.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SurfaceTypes: u32 {
        const PBUFFER = 1 << 0;
        const WINDOW = 1 << 1;
    }
}

impl From<SurfaceKind> for SurfaceTypes {
    fn from(kind: SurfaceKind) -> Self {
        match kind {
            SurfaceKind::Pbuffer => SurfaceTypes::PBUFFER,
            SurfaceKind::Window => SurfaceTypes::WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Colorspace {
    #[default]
    Linear,
    Srgb,
}

/// A display-level config: one driver config exposed for a set of surface
/// kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceConfig {
    pub id: u32,
    pub format: PixelFormat,
    pub surface_types: SurfaceTypes,
    pub driver_config: DriverConfig,
}

impl SurfaceConfig {
    pub fn supports(&self, kind: SurfaceKind) -> bool {
        self.surface_types.contains(kind.into())
    }
}

/// Attributes given at surface creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceAttributes {
    pub width: i32,
    pub height: i32,
    pub colorspace: Colorspace,
}

impl SurfaceAttributes {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            colorspace: Colorspace::Linear,
        }
    }

    pub fn srgb(mut self) -> Self {
        self.colorspace = Colorspace::Srgb;
        self
    }

    pub(crate) fn validated_size(&self) -> Result<(u32, u32)> {
        let width = u32::try_from(self.width)
            .map_err(|_| SurfacelessError::BadParameter(format!("width {}", self.width)))?;
        let height = u32::try_from(self.height)
            .map_err(|_| SurfacelessError::BadParameter(format!("height {}", self.height)))?;
        Ok((width, height))
    }
}

/// One drawable target bound to a display and a config.
///
/// Owned by whoever created it; must be handed back to
/// [`Display::destroy_surface`](crate::display::Display::destroy_surface),
/// which releases the image buffer, the staging buffer and then the
/// drawable.
pub struct Surface<D: RenderDriver> {
    pub(crate) kind: SurfaceKind,
    pub(crate) config: SurfaceConfig,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) format: PixelFormat,
    pub(crate) colorspace: Colorspace,
    pub(crate) front: Option<D::Image>,
    pub(crate) drawable: Option<D::Drawable>,
    pub(crate) staging: Option<Vec<u8>>,
    pub(crate) native: Option<NativeSurface>,
}

impl<D: RenderDriver> Surface<D> {
    pub fn kind(&self) -> SurfaceKind {
        self.kind
    }

    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn colorspace(&self) -> Colorspace {
        self.colorspace
    }

    /// The cached front image, if one has been allocated.
    pub fn front(&self) -> Option<&D::Image> {
        self.front.as_ref()
    }

    pub fn has_staging_buffer(&self) -> bool {
        self.staging.is_some()
    }

    pub fn native(&self) -> Option<NativeSurface> {
        self.native
    }

    pub fn drawable(&self) -> Option<&D::Drawable> {
        self.drawable.as_ref()
    }

    pub(crate) fn drawable_mut(&mut self) -> Result<&mut D::Drawable> {
        self.drawable
            .as_mut()
            .ok_or_else(|| SurfacelessError::BadParameter("surface has no drawable".into()))
    }

    /// Bytes per row of the staging buffer.
    pub(crate) fn stride(&self) -> Result<usize> {
        (self.width as usize)
            .checked_mul(self.format.bytes_per_pixel())
            .ok_or_else(|| self.allocation_failed())
    }

    /// Bytes needed to stage the whole surface.
    pub(crate) fn staging_len(&self) -> Result<usize> {
        self.stride()?
            .checked_mul(self.height as usize)
            .ok_or_else(|| self.allocation_failed())
    }

    pub(crate) fn allocation_failed(&self) -> SurfacelessError {
        SurfacelessError::AllocationFailed {
            width: self.width,
            height: self.height,
        }
    }
}

impl<D: RenderDriver> Drop for Surface<D> {
    fn drop(&mut self) {
        if self.drawable.is_some() {
            warn!(
                "{:?} surface {}x{} dropped without destroy_surface; driver resources leak",
                self.kind, self.width, self.height
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn negative_sizes_are_bad_parameters() {
        assert_eq!(SurfaceAttributes::new(3, 0).validated_size().unwrap(), (3, 0));
        assert!(matches!(
            SurfaceAttributes::new(3, -2).validated_size(),
            Err(SurfacelessError::BadParameter(_))
        ));
    }

    #[test]
    fn surface_types_follow_kinds() {
        let types = SurfaceTypes::from(SurfaceKind::Pbuffer) | SurfaceKind::Window.into();
        assert_eq!(types, SurfaceTypes::PBUFFER | SurfaceTypes::WINDOW);
        assert_eq!(SurfaceAttributes::new(1, 1).srgb().colorspace, Colorspace::Srgb);
    }
}
