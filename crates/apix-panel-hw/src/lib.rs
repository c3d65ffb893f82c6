//! APIX Panel Hardware Library
//!
//! Drives the 320x240 RGB565 USB LCD fitted to some mini PC cases. The panel
//! enumerates as a USB Mass Storage device (Bulk-Only Transport) but only
//! answers a small set of vendor SCSI commands that carry framebuffer data.
//! It keeps no image of its own: hosts must push frames continuously or the
//! panel resets itself after roughly two seconds.

pub mod error;
pub mod lcd;

pub use error::{Error, Result};
pub use lcd::device::LcdDevice;
pub use lcd::transport::ScsiResult;

/// LCD display dimensions
pub const LCD_WIDTH: usize = 320;
pub const LCD_HEIGHT: usize = 240;

/// One full frame of 8-bit RGB, row-major, top row first.
pub const FRAME_BYTES: usize = LCD_WIDTH * LCD_HEIGHT * 3;

/// USB VID:PID for the LCD device
pub const LCD_VID: u16 = 0x0402;
pub const LCD_PID: u16 = 0x3922;
