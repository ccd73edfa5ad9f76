// src/binding.rs
//! Callback tables bound to a display.
//!
//! Two choices are made per display. The loader variant is picked while
//! probing, because the driver needs it to create its screen. The display
//! binding is picked once every fallible initialization step has finished
//! and is never changed afterwards.

use bitflags::bitflags;

use crate::error::{Result, SurfacelessError};

bitflags! {
    /// Loader extensions advertised to the rendering driver.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LoaderExtensions: u32 {
        const IMAGE_LOADER = 1 << 0;
        const IMAGE_LOOKUP = 1 << 1;
        const SWRAST_PBUFFER_LOADER = 1 << 2;
        const KOPPER_LOADER = 1 << 3;
    }
}

/// Which loader callbacks the driver gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderVariant {
    /// Image buffers straight from a hardware driver.
    HardwareImage,
    /// Software rendering into pbuffers, with image loading as well.
    SoftwarePbuffer,
    /// Kopper presentation. `native` is set when the host can present
    /// window surfaces.
    Presentation { native: bool },
}

impl LoaderVariant {
    pub fn select(kopper: bool, swrast: bool, native_presentation: bool) -> Self {
        if kopper {
            LoaderVariant::Presentation {
                native: native_presentation,
            }
        } else if swrast {
            LoaderVariant::SoftwarePbuffer
        } else {
            LoaderVariant::HardwareImage
        }
    }

    pub fn extensions(self) -> LoaderExtensions {
        match self {
            LoaderVariant::HardwareImage => {
                LoaderExtensions::IMAGE_LOADER | LoaderExtensions::IMAGE_LOOKUP
            }
            LoaderVariant::SoftwarePbuffer => {
                LoaderExtensions::SWRAST_PBUFFER_LOADER
                    | LoaderExtensions::IMAGE_LOADER
                    | LoaderExtensions::IMAGE_LOOKUP
            }
            LoaderVariant::Presentation { .. } => {
                LoaderExtensions::KOPPER_LOADER | LoaderExtensions::IMAGE_LOOKUP
            }
        }
    }
}

bitflags! {
    /// Display-level operations a binding makes callable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DisplayOps: u32 {
        const CREATE_PBUFFER = 1 << 0;
        const DESTROY_SURFACE = 1 << 1;
        const CREATE_IMAGE = 1 << 2;
        const CREATE_WINDOW = 1 << 3;
        const SWAP_BUFFERS = 1 << 4;
        const SWAP_INTERVAL = 1 << 5;
        const QUERY_BUFFER_AGE = 1 << 6;
    }
}

/// The table a display dispatches surface operations through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverBinding {
    /// Off-screen pbuffers only.
    Pbuffer { loader: LoaderVariant },
    /// Pbuffers plus window surfaces presented through the host.
    Presentation { loader: LoaderVariant },
}

impl DriverBinding {
    /// Presentation is bound only when the loader took the kopper path and
    /// the host can actually present.
    pub fn select(loader: LoaderVariant) -> Self {
        match loader {
            LoaderVariant::Presentation { native: true } => DriverBinding::Presentation { loader },
            _ => DriverBinding::Pbuffer { loader },
        }
    }

    pub fn loader(&self) -> LoaderVariant {
        match *self {
            DriverBinding::Pbuffer { loader } | DriverBinding::Presentation { loader } => loader,
        }
    }

    pub fn ops(&self) -> DisplayOps {
        let pbuffer =
            DisplayOps::CREATE_PBUFFER | DisplayOps::DESTROY_SURFACE | DisplayOps::CREATE_IMAGE;
        match self {
            DriverBinding::Pbuffer { .. } => pbuffer,
            DriverBinding::Presentation { .. } => {
                pbuffer
                    | DisplayOps::CREATE_WINDOW
                    | DisplayOps::SWAP_BUFFERS
                    | DisplayOps::SWAP_INTERVAL
                    | DisplayOps::QUERY_BUFFER_AGE
            }
        }
    }

    pub fn require(&self, op: DisplayOps, name: &'static str) -> Result<()> {
        if self.ops().contains(op) {
            Ok(())
        } else {
            Err(SurfacelessError::Unsupported(name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kopper_wins_over_software() {
        assert_eq!(
            LoaderVariant::select(true, true, false),
            LoaderVariant::Presentation { native: false }
        );
        assert_eq!(
            LoaderVariant::select(false, true, true),
            LoaderVariant::SoftwarePbuffer
        );
        assert_eq!(
            LoaderVariant::select(false, false, true),
            LoaderVariant::HardwareImage
        );
    }

    #[test]
    fn only_non_presentation_variants_carry_the_image_loader() {
        assert!(LoaderVariant::HardwareImage
            .extensions()
            .contains(LoaderExtensions::IMAGE_LOADER));
        assert!(LoaderVariant::SoftwarePbuffer
            .extensions()
            .contains(LoaderExtensions::IMAGE_LOADER | LoaderExtensions::SWRAST_PBUFFER_LOADER));
        let kopper = LoaderVariant::Presentation { native: true }.extensions();
        assert!(!kopper.contains(LoaderExtensions::IMAGE_LOADER));
        assert!(kopper.contains(LoaderExtensions::KOPPER_LOADER));
    }

    #[test]
    fn pbuffer_binding_rejects_presentation_ops() {
        let binding = DriverBinding::select(LoaderVariant::Presentation { native: false });
        assert!(matches!(binding, DriverBinding::Pbuffer { .. }));
        assert!(binding.require(DisplayOps::CREATE_PBUFFER, "create_pbuffer_surface").is_ok());
        assert!(matches!(
            binding.require(DisplayOps::SWAP_BUFFERS, "swap_buffers"),
            Err(SurfacelessError::Unsupported("swap_buffers"))
        ));

        let binding = DriverBinding::select(LoaderVariant::Presentation { native: true });
        assert!(binding.require(DisplayOps::SWAP_BUFFERS, "swap_buffers").is_ok());
    }
}
