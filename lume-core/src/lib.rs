pub mod error;
pub mod device;
pub mod host;
pub mod shader;

pub use error::{LumeError, LumeResult};
pub use device::{Buffer, BufferDescriptor, BufferUsage, Device, Fence};
pub use host::HostDevice;
