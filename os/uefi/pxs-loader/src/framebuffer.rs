//! # GOP for the Kernel

use log::{debug, warn};
use pxs_boot::addresses::PhysicalAddress;
use pxs_boot::boot_info::{GraphicsMode, PixelLayout};
use uefi::boot::{self, OpenProtocolAttributes, OpenProtocolParams, ScopedProtocol};
use uefi::proto::console::gop::{GraphicsOutput, PixelFormat};

/// Describe the current graphics mode. The mode is not changed.
pub fn current_graphics_mode() -> Option<GraphicsMode> {
    let mut gop = match get_gop() {
        Ok(gop) => gop,
        Err(e) => {
            debug!("Failed to get GOP: {e:?}");
            return None;
        }
    };

    let mode = gop.current_mode_info();
    let (width, height) = mode.resolution();
    let pixel_layout = match mode.pixel_format() {
        PixelFormat::Rgb => PixelLayout::Rgb,
        PixelFormat::Bgr => PixelLayout::Bgr,
        format @ (PixelFormat::Bitmask | PixelFormat::BltOnly) => {
            warn!("Unsupported pixel format {format:?}, kernel gets geometry only");
            PixelLayout::Other
        }
    };

    let (Ok(width), Ok(height), Ok(stride)) = (
        u32::try_from(width),
        u32::try_from(height),
        u32::try_from(mode.stride()),
    ) else {
        warn!("GOP mode geometry out of range");
        return None;
    };

    let mut fb = gop.frame_buffer();
    Some(GraphicsMode {
        framebuffer_base: PhysicalAddress::new(fb.as_mut_ptr() as u64),
        framebuffer_size: fb.size() as u64,
        width,
        height,
        stride,
        pixel_layout,
    })
}

/// Fetch the Graphics Output Protocol (GOP) without taking it away from the
/// firmware console.
fn get_gop() -> Result<ScopedProtocol<GraphicsOutput>, uefi::Error> {
    let handle = boot::get_handle_for_protocol::<GraphicsOutput>()?;

    // SAFETY: The protocol is only read; the console driver keeps using it.
    unsafe {
        boot::open_protocol::<GraphicsOutput>(
            OpenProtocolParams {
                handle,
                agent: boot::image_handle(),
                controller: None,
            },
            OpenProtocolAttributes::GetProtocol,
        )
    }
}
