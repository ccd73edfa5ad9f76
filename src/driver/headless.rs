// src/driver/headless.rs
//! In-memory software rendering driver.

use log::{debug, info, trace};

use crate::binding::LoaderExtensions;
use crate::device::prober::{KMS_SWRAST_DRIVER, SWRAST_DRIVER, ZINK_DRIVER};
use crate::driver::{
    DrawableInfo, DriverConfig, FlushFlags, PixelFormat, RenderDriver, ScreenCaps, ScreenRequest,
};
use crate::error::{Result, SurfacelessError};
use crate::surface::SurfaceKind;

const SUPPORTED_DRIVERS: [&str; 3] = [SWRAST_DRIVER, KMS_SWRAST_DRIVER, ZINK_DRIVER];

const FORMATS: [PixelFormat; 8] = [
    PixelFormat::Abgr16161616F,
    PixelFormat::Xbgr16161616F,
    PixelFormat::Argb2101010,
    PixelFormat::Xrgb2101010,
    PixelFormat::Argb8888,
    PixelFormat::Xrgb8888,
    PixelFormat::Abgr8888,
    PixelFormat::Rgb565,
];

#[derive(Debug)]
pub struct HeadlessScreen {
    pub driver_name: String,
    pub presentation: bool,
}

#[derive(Debug)]
pub struct HeadlessDrawable {
    pub kind: SurfaceKind,
    pub width: u32,
    pub height: u32,
    pub swap_interval: i32,
    pub frames: u64,
}

/// Heap-backed pixel storage.
#[derive(Debug)]
pub struct HeadlessImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pixels: Box<[u8]>,
}

/// Renders nothing, but accepts every software driver name and hands out
/// real memory for images.
#[derive(Debug, Default)]
pub struct HeadlessDriver {
    live_screens: usize,
    live_drawables: usize,
    live_images: usize,
}

impl HeadlessDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Screens, drawables and images not yet destroyed.
    pub fn live_objects(&self) -> (usize, usize, usize) {
        (self.live_screens, self.live_drawables, self.live_images)
    }
}

impl RenderDriver for HeadlessDriver {
    type Screen = HeadlessScreen;
    type Drawable = HeadlessDrawable;
    type Image = HeadlessImage;

    fn create_screen(&mut self, request: &ScreenRequest<'_>) -> Result<HeadlessScreen> {
        if !SUPPORTED_DRIVERS.contains(&request.driver_name) {
            return Err(SurfacelessError::Driver(format!(
                "headless driver cannot load '{}'",
                request.driver_name
            )));
        }
        self.live_screens += 1;
        info!(
            "HeadlessDriver: screen for '{}' (fd {:?}, {:?}, {:?})",
            request.driver_name, request.fd, request.loader, request.extensions
        );
        Ok(HeadlessScreen {
            driver_name: request.driver_name.to_string(),
            presentation: request.extensions.contains(LoaderExtensions::KOPPER_LOADER),
        })
    }

    fn screen_caps(&self, _screen: &HeadlessScreen) -> ScreenCaps {
        ScreenCaps::GRAPHICS
    }

    fn destroy_screen(&mut self, screen: HeadlessScreen) {
        self.live_screens = self.live_screens.saturating_sub(1);
        debug!("HeadlessDriver: destroyed screen for '{}'", screen.driver_name);
    }

    fn configs(&mut self, _screen: &HeadlessScreen) -> Result<Vec<DriverConfig>> {
        Ok(FORMATS
            .iter()
            .enumerate()
            .map(|(i, &format)| DriverConfig {
                id: i as u32 + 1,
                format,
                double_buffered: false,
                srgb_capable: matches!(format, PixelFormat::Argb8888 | PixelFormat::Xrgb8888),
                depth_bits: 24,
                stencil_bits: 8,
            })
            .collect())
    }

    fn create_drawable(
        &mut self,
        _screen: &HeadlessScreen,
        _config: &DriverConfig,
        info: &DrawableInfo,
    ) -> Result<HeadlessDrawable> {
        self.live_drawables += 1;
        Ok(HeadlessDrawable {
            kind: info.kind,
            width: info.width,
            height: info.height,
            swap_interval: 1,
            frames: 0,
        })
    }

    fn destroy_drawable(&mut self, _drawable: HeadlessDrawable) {
        self.live_drawables = self.live_drawables.saturating_sub(1);
    }

    fn create_image(
        &mut self,
        _screen: &HeadlessScreen,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Option<HeadlessImage> {
        let size = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(format.bytes_per_pixel())?;
        let mut pixels = Vec::new();
        if let Err(e) = pixels.try_reserve_exact(size) {
            debug!("HeadlessDriver: {}x{} {:?} image: {}", width, height, format, e);
            return None;
        }
        pixels.resize(size, 0);
        self.live_images += 1;
        trace!("HeadlessDriver: {}x{} {:?} image ({} bytes)", width, height, format, size);
        Some(HeadlessImage {
            width,
            height,
            format,
            pixels: pixels.into_boxed_slice(),
        })
    }

    fn destroy_image(&mut self, _image: HeadlessImage) {
        self.live_images = self.live_images.saturating_sub(1);
    }

    fn swap_buffers(&mut self, drawable: &mut HeadlessDrawable, flags: FlushFlags) -> Result<()> {
        drawable.frames += 1;
        trace!("HeadlessDriver: swap #{} ({:?})", drawable.frames, flags);
        Ok(())
    }

    fn set_swap_interval(&mut self, drawable: &mut HeadlessDrawable, interval: i32) -> Result<()> {
        if interval < 0 {
            return Err(SurfacelessError::BadParameter(format!(
                "swap interval {}",
                interval
            )));
        }
        drawable.swap_interval = interval;
        Ok(())
    }

    /// Single-buffered: after the first swap the buffer shown is always one
    /// frame old.
    fn query_buffer_age(&mut self, drawable: &HeadlessDrawable) -> i32 {
        if drawable.frames == 0 {
            0
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::LoaderVariant;
    use test_log::test;

    fn request(driver_name: &str) -> ScreenRequest<'_> {
        ScreenRequest {
            driver_name,
            fd: None,
            loader: LoaderVariant::SoftwarePbuffer,
            extensions: LoaderVariant::SoftwarePbuffer.extensions(),
            is_render_node: false,
        }
    }

    #[test]
    fn refuses_hardware_driver_names() {
        let mut driver = HeadlessDriver::new();
        assert!(driver.create_screen(&request("iris")).is_err());
        assert_eq!(driver.live_objects(), (0, 0, 0));
    }

    #[test]
    fn images_are_sized_by_format() {
        let mut driver = HeadlessDriver::new();
        let screen = driver.create_screen(&request("swrast")).unwrap();
        let image = driver
            .create_image(&screen, 16, 8, PixelFormat::Abgr16161616F)
            .unwrap();
        assert_eq!(image.pixels.len(), 16 * 8 * 8);
        driver.destroy_image(image);
        driver.destroy_screen(screen);
        assert_eq!(driver.live_objects(), (0, 0, 0));
    }

    #[test]
    fn presentation_follows_the_kopper_extension() {
        let mut driver = HeadlessDriver::new();
        let pbuffer = driver.create_screen(&request("swrast")).unwrap();
        assert!(!pbuffer.presentation);
        let kopper = LoaderVariant::Presentation { native: false };
        let screen = driver
            .create_screen(&ScreenRequest {
                loader: kopper,
                extensions: kopper.extensions(),
                ..request("zink")
            })
            .unwrap();
        assert!(screen.presentation);
        driver.destroy_screen(screen);
        driver.destroy_screen(pbuffer);
    }

    #[test]
    fn oversized_images_are_refused() {
        let mut driver = HeadlessDriver::new();
        let screen = driver.create_screen(&request("swrast")).unwrap();
        let image = driver.create_image(&screen, i32::MAX as u32, 1 << 28, PixelFormat::Abgr16161616F);
        assert!(image.is_none());
        assert!(driver
            .create_image(&screen, u32::MAX, u32::MAX, PixelFormat::Abgr16161616F)
            .is_none());
        assert_eq!(driver.live_objects(), (1, 0, 0));
        driver.destroy_screen(screen);
    }

    #[test]
    fn buffer_age_starts_unknown() {
        let mut driver = HeadlessDriver::new();
        let screen = driver.create_screen(&request("zink")).unwrap();
        let configs = driver.configs(&screen).unwrap();
        let info = DrawableInfo {
            kind: SurfaceKind::Window,
            width: 4,
            height: 4,
            format: configs[0].format,
        };
        let mut drawable = driver.create_drawable(&screen, &configs[0], &info).unwrap();
        assert_eq!(driver.query_buffer_age(&drawable), 0);
        driver.swap_buffers(&mut drawable, FlushFlags::DRAWABLE).unwrap();
        assert_eq!(driver.query_buffer_age(&drawable), 1);
        assert!(driver.set_swap_interval(&mut drawable, -1).is_err());
        driver.destroy_drawable(drawable);
        driver.destroy_screen(screen);
    }
}
