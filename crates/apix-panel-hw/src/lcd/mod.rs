//! LCD communication over USB Bulk-Only Transport.

pub mod device;
pub mod packer;
pub mod protocol;
pub mod transport;

pub use device::LcdDevice;
pub use packer::pack_frame;
pub use transport::{ScsiResult, ScsiTransport, UsbBackend};
