/// The slice of an accelerator device the renderer talks to.
///
/// Window/surface handling, pipeline creation and descriptor plumbing live in
/// the backend that implements this trait; the renderer only needs buffers,
/// fences and a queue to submit to.
pub trait Device: Sized + Clone {
    type Buffer: Buffer;
    type Fence: Fence;

    /// Wait for the device to be idle.
    fn wait_idle(&self) -> crate::LumeResult<()>;

    fn create_buffer(&self, descriptor: BufferDescriptor) -> crate::LumeResult<Self::Buffer>;
    fn create_fence(&self, signaled: bool) -> crate::LumeResult<Self::Fence>;

    /// Blocks until one (or all, with `wait_all`) of `fences` is signaled.
    /// `timeout` is in nanoseconds; `u64::MAX` waits forever.
    fn wait_for_fences(&self, fences: &[&Self::Fence], wait_all: bool, timeout: u64) -> crate::LumeResult<()>;
    fn reset_fences(&self, fences: &[&Self::Fence]) -> crate::LumeResult<()>;

    /// Submit the work recorded for the current frame. `signal_fence` is
    /// signaled once that work has completed on the device.
    fn submit(&self, signal_fence: Option<&Self::Fence>) -> crate::LumeResult<()>;
}

pub trait Buffer {
    fn write_data(&self, offset: u64, data: &[u8]) -> crate::LumeResult<()>;
    fn read_data(&self, offset: u64, data: &mut [u8]) -> crate::LumeResult<()>;
    fn size(&self) -> u64;
}

pub trait Fence: Send + Sync {
    fn is_signaled(&self) -> bool;
}

pub struct BufferDescriptor {
    pub size: u64,
    pub usage: BufferUsage,
    pub mapped_at_creation: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BufferUsage(pub u32);

impl BufferUsage {
    pub const VERTEX: Self = Self(1 << 0);
    pub const INDEX: Self = Self(1 << 1);
    pub const UNIFORM: Self = Self(1 << 2);
    pub const STORAGE: Self = Self(1 << 3);
    pub const COPY_SRC: Self = Self(1 << 4);
    pub const COPY_DST: Self = Self(1 << 5);
    pub const INDIRECT: Self = Self(1 << 6);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
