// src/bridge.rs
//! Entry points the rendering driver calls back into during a frame.
//!
//! The display hands out short-lived views over its driver and screen; the
//! driver uses them with the surface it is drawing to. None of these calls
//! run device discovery again.

use bitflags::bitflags;
use log::{trace, warn};

use crate::driver::RenderDriver;
use crate::error::{Result, SurfacelessError};
use crate::host::{HostIntegration, NativeSurface};
use crate::surface::{Surface, SurfaceKind};

bitflags! {
    /// Buffer roles the driver asks for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferMask: u32 {
        const FRONT = 1 << 0;
        const BACK = 1 << 1;
    }
}

/// Buffers returned for one request.
#[derive(Debug, PartialEq, Eq)]
pub struct ImageList<'s, I> {
    pub mask: BufferMask,
    pub front: Option<&'s I>,
    pub back: Option<&'s I>,
}

impl<'s, I> ImageList<'s, I> {
    pub fn empty() -> Self {
        ImageList {
            mask: BufferMask::empty(),
            front: None,
            back: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }
}

/// Capability queries the driver may issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderCap {
    /// Half-float pixel formats.
    Fp16,
    /// RGBA channel ordering in addition to BGRA.
    RgbaOrdering,
    Other(u32),
}

/// Fixed answers to capability queries; independent of any surface.
pub fn get_capability(cap: LoaderCap) -> u32 {
    match cap {
        LoaderCap::Fp16 | LoaderCap::RgbaOrdering => 1,
        LoaderCap::Other(_) => 0,
    }
}

/// The image-loader callbacks.
pub struct ImageLoader<'a, D: RenderDriver> {
    driver: &'a mut D,
    screen: &'a D::Screen,
}

impl<'a, D: RenderDriver> ImageLoader<'a, D> {
    pub(crate) fn new(driver: &'a mut D, screen: &'a D::Screen) -> Self {
        Self { driver, screen }
    }

    /// Returns the surface's buffers for `mask`.
    ///
    /// Pbuffers are single-buffered but get a front buffer instead of a back
    /// buffer, so a request for either role is answered with the one front
    /// image. It is allocated on first use and reused until the surface is
    /// destroyed or its buffers are invalidated. If allocation fails the
    /// list is empty and the next call tries again.
    pub fn get_buffers<'s>(
        &mut self,
        surface: &'s mut Surface<D>,
        mask: BufferMask,
    ) -> ImageList<'s, D::Image> {
        if !mask.intersects(BufferMask::FRONT | BufferMask::BACK) {
            return ImageList::empty();
        }

        if surface.front.is_none() {
            match self
                .driver
                .create_image(self.screen, surface.width, surface.height, surface.format)
            {
                Some(image) => {
                    trace!(
                        "Allocated {}x{} {:?} front image",
                        surface.width,
                        surface.height,
                        surface.format
                    );
                    surface.front = Some(image);
                }
                None => {
                    warn!(
                        "{}",
                        SurfacelessError::AllocationFailed {
                            width: surface.width,
                            height: surface.height,
                        }
                    );
                    return ImageList::empty();
                }
            }
        }

        ImageList {
            mask: BufferMask::FRONT,
            front: surface.front.as_ref(),
            back: None,
        }
    }

    /// Surfaceless output has nothing to flush to.
    pub fn flush_front_buffer(&mut self, _surface: &Surface<D>) {}

    pub fn get_capability(&self, cap: LoaderCap) -> u32 {
        get_capability(cap)
    }
}

/// Software pbuffer callbacks: readback through a staging buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwrastLoader;

impl SwrastLoader {
    /// `(x, y, width, height)` of the drawable.
    pub fn get_drawable_info<D: RenderDriver>(&self, surface: &Surface<D>) -> (i32, i32, u32, u32) {
        (0, 0, surface.width, surface.height)
    }

    /// Copies a row-strided region from `data` into the staging buffer.
    pub fn put_image<D: RenderDriver>(
        &self,
        surface: &mut Surface<D>,
        region: Region,
        stride: usize,
        data: &[u8],
    ) -> Result<()> {
        region.check(surface)?;
        if region.width == 0 || region.height == 0 {
            return Ok(());
        }
        let bpp = surface.format.bytes_per_pixel();
        let surface_stride = surface.stride()?;
        let row_bytes = region.width as usize * bpp;
        let needed = stride
            .checked_mul(region.height as usize - 1)
            .and_then(|n| n.checked_add(row_bytes));
        if stride < row_bytes || !needed.is_some_and(|n| data.len() >= n) {
            return Err(SurfacelessError::BadParameter(format!(
                "{} bytes at stride {} cannot hold {}x{} pixels",
                data.len(),
                stride,
                region.width,
                region.height
            )));
        }
        let staging = match surface.staging.take() {
            Some(staging) => staging,
            None => {
                let size = surface.staging_len()?;
                let mut staging = Vec::new();
                staging
                    .try_reserve_exact(size)
                    .map_err(|_| surface.allocation_failed())?;
                staging.resize(size, 0);
                trace!("Allocated {} byte staging buffer", size);
                staging
            }
        };
        let staging = surface.staging.insert(staging);
        for row in 0..region.height as usize {
            let src = &data[row * stride..row * stride + row_bytes];
            let dst_off = (region.y as usize + row) * surface_stride + region.x as usize * bpp;
            staging[dst_off..dst_off + row_bytes].copy_from_slice(src);
        }
        Ok(())
    }

    /// Reads a region back, tightly packed. Unwritten pixels read as zero.
    pub fn get_image<D: RenderDriver>(
        &self,
        surface: &Surface<D>,
        region: Region,
        out: &mut [u8],
    ) -> Result<()> {
        region.check(surface)?;
        let bpp = surface.format.bytes_per_pixel();
        let surface_stride = surface.stride()?;
        let row_bytes = region.width as usize * bpp;
        let needed = row_bytes.checked_mul(region.height as usize);
        if !needed.is_some_and(|n| out.len() >= n) {
            return Err(SurfacelessError::BadParameter(format!(
                "output of {} bytes is too small for {}x{} pixels",
                out.len(),
                region.width,
                region.height
            )));
        }
        for row in 0..region.height as usize {
            let dst = &mut out[row * row_bytes..(row + 1) * row_bytes];
            match surface.staging.as_deref() {
                Some(staging) => {
                    let off = (region.y as usize + row) * surface_stride + region.x as usize * bpp;
                    dst.copy_from_slice(&staging[off..off + row_bytes]);
                }
                None => dst.fill(0),
            }
        }
        Ok(())
    }
}

/// A rectangle inside a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    fn check<D: RenderDriver>(&self, surface: &Surface<D>) -> Result<()> {
        let fits = |start: u32, len: u32, limit: u32| {
            start.checked_add(len).is_some_and(|end| end <= limit)
        };
        if fits(self.x, self.width, surface.width) && fits(self.y, self.height, surface.height) {
            Ok(())
        } else {
            Err(SurfacelessError::BadParameter(format!(
                "region {:?} outside {}x{} surface",
                self,
                surface.width,
                surface.height
            )))
        }
    }
}

/// What the driver needs to create its presentation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationInfo {
    pub layer: Option<NativeSurface>,
    pub has_alpha: bool,
    /// Present without blending against the desktop.
    pub present_opaque: bool,
}

/// Kopper presentation callbacks.
#[derive(Debug, Clone, Copy)]
pub struct KopperLoader<'a> {
    host: Option<&'a HostIntegration>,
}

impl<'a> KopperLoader<'a> {
    pub(crate) fn new(host: Option<&'a HostIntegration>) -> Self {
        Self { host }
    }

    /// Fills in presentation info for window surfaces; `None` for others.
    ///
    /// The host may replace the native surface with a presentation-capable
    /// one; the surface then remembers the replacement.
    pub fn set_surface_create_info<D: RenderDriver>(
        &self,
        surface: &mut Surface<D>,
    ) -> Result<Option<PresentationInfo>> {
        if surface.kind != SurfaceKind::Window {
            return Ok(None);
        }
        if let (Some(native), Some(host)) = (surface.native, self.host) {
            let prepared = host.prepare_surface(native)?;
            if prepared != native {
                trace!("Host replaced native surface {:?} with {:?}", native, prepared);
                surface.native = Some(prepared);
            }
        }
        Ok(Some(PresentationInfo {
            layer: surface.native,
            has_alpha: true,
            present_opaque: true,
        }))
    }

    /// Current drawable size: asked of the host when the surface has a
    /// native handle, otherwise the size it was created with.
    pub fn get_drawable_info<D: RenderDriver>(&self, surface: &Surface<D>) -> Result<(u32, u32)> {
        match (surface.native, self.host) {
            (Some(native), Some(host)) => host.drawable_size(native),
            _ => Ok((surface.width, surface.height)),
        }
    }
}
