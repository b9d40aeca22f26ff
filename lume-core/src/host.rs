//! A device whose memory is plain host memory.
//!
//! Compute work recorded against a `HostDevice` runs inline on the CPU, so by
//! the time `submit` is called the frame's work has already finished and the
//! fence can be signaled immediately. This keeps fence/slot bookkeeping
//! identical to a real queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::device::{Buffer, BufferDescriptor, BufferUsage, Device, Fence};
use crate::{LumeError, LumeResult};

#[derive(Default)]
struct HostStats {
    allocated_bytes: AtomicU64,
    submissions: AtomicU64,
}

#[derive(Clone, Default)]
pub struct HostDevice {
    stats: Arc<HostStats>,
}

impl HostDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes of every buffer created so far.
    pub fn allocated_bytes(&self) -> u64 {
        self.stats.allocated_bytes.load(Ordering::Relaxed)
    }

    pub fn submission_count(&self) -> u64 {
        self.stats.submissions.load(Ordering::Relaxed)
    }
}

pub struct HostBuffer {
    data: RwLock<Vec<u8>>,
    usage: BufferUsage,
}

impl HostBuffer {
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    fn check_range(&self, offset: u64, len: usize) -> LumeResult<std::ops::Range<usize>> {
        let size = self.size();
        let end = offset.checked_add(len as u64).filter(|&end| end <= size);
        match end {
            Some(end) => Ok(offset as usize..end as usize),
            None => Err(LumeError::OutOfBounds { offset, len: len as u64, size }),
        }
    }
}

impl Buffer for HostBuffer {
    fn write_data(&self, offset: u64, data: &[u8]) -> LumeResult<()> {
        let range = self.check_range(offset, data.len())?;
        let mut guard = self.data.write().map_err(|_| LumeError::Generic("host buffer lock poisoned"))?;
        guard[range].copy_from_slice(data);
        Ok(())
    }

    fn read_data(&self, offset: u64, data: &mut [u8]) -> LumeResult<()> {
        let range = self.check_range(offset, data.len())?;
        let guard = self.data.read().map_err(|_| LumeError::Generic("host buffer lock poisoned"))?;
        data.copy_from_slice(&guard[range]);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.data.read().map(|d| d.len() as u64).unwrap_or(0)
    }
}

#[derive(Clone)]
pub struct HostFence {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl HostFence {
    fn set(&self, value: bool) -> LumeResult<()> {
        let (lock, cvar) = &*self.state;
        let mut signaled = lock.lock().map_err(|_| LumeError::Generic("fence lock poisoned"))?;
        *signaled = value;
        if value {
            cvar.notify_all();
        }
        Ok(())
    }

    /// Blocks until signaled or `deadline` passes. Returns whether the fence was signaled.
    fn wait_until(&self, deadline: Option<Instant>) -> LumeResult<bool> {
        let (lock, cvar) = &*self.state;
        let mut signaled = lock.lock().map_err(|_| LumeError::Generic("fence lock poisoned"))?;
        while !*signaled {
            match deadline {
                None => {
                    signaled = cvar.wait(signaled).map_err(|_| LumeError::Generic("fence lock poisoned"))?;
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    let (guard, _) = cvar
                        .wait_timeout(signaled, deadline - now)
                        .map_err(|_| LumeError::Generic("fence lock poisoned"))?;
                    signaled = guard;
                }
            }
        }
        Ok(true)
    }
}

impl Fence for HostFence {
    fn is_signaled(&self) -> bool {
        self.state.0.lock().map(|s| *s).unwrap_or(false)
    }
}

impl Device for HostDevice {
    type Buffer = HostBuffer;
    type Fence = HostFence;

    fn wait_idle(&self) -> LumeResult<()> {
        // Nothing is ever left running after submit.
        Ok(())
    }

    fn create_buffer(&self, descriptor: BufferDescriptor) -> LumeResult<HostBuffer> {
        let size = usize::try_from(descriptor.size)
            .map_err(|_| LumeError::ResourceCreationFailed(format!("buffer size {} exceeds host address space", descriptor.size)))?;
        let mut data = Vec::new();
        data.try_reserve_exact(size).map_err(|_| LumeError::OutOfMemory)?;
        data.resize(size, 0);
        self.stats.allocated_bytes.fetch_add(descriptor.size, Ordering::Relaxed);
        log::trace!("host buffer: {} bytes, usage {:#x}", descriptor.size, descriptor.usage.0);
        Ok(HostBuffer { data: RwLock::new(data), usage: descriptor.usage })
    }

    fn create_fence(&self, signaled: bool) -> LumeResult<HostFence> {
        Ok(HostFence { state: Arc::new((Mutex::new(signaled), Condvar::new())) })
    }

    fn wait_for_fences(&self, fences: &[&HostFence], wait_all: bool, timeout: u64) -> LumeResult<()> {
        if fences.is_empty() {
            return Ok(());
        }
        let deadline = (timeout != u64::MAX).then(|| Instant::now() + Duration::from_nanos(timeout));

        if wait_all {
            for fence in fences {
                if !fence.wait_until(deadline)? {
                    return Err(LumeError::Timeout);
                }
            }
            return Ok(());
        }

        loop {
            if fences.iter().any(|f| f.is_signaled()) {
                return Ok(());
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(LumeError::Timeout);
            }
            std::thread::yield_now();
        }
    }

    fn reset_fences(&self, fences: &[&HostFence]) -> LumeResult<()> {
        for fence in fences {
            fence.set(false)?;
        }
        Ok(())
    }

    fn submit(&self, signal_fence: Option<&HostFence>) -> LumeResult<()> {
        self.stats.submissions.fetch_add(1, Ordering::Relaxed);
        if let Some(fence) = signal_fence {
            fence.set(true)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_round_trip_and_bounds() {
        let device = HostDevice::new();
        let buffer = device
            .create_buffer(BufferDescriptor { size: 16, usage: BufferUsage::STORAGE, mapped_at_creation: false })
            .unwrap();
        buffer.write_data(4, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 8];
        buffer.read_data(0, &mut out).unwrap();
        assert_eq!(out, [0, 0, 0, 0, 1, 2, 3, 4]);

        assert!(matches!(buffer.write_data(14, &[0; 4]), Err(LumeError::OutOfBounds { .. })));
        assert_eq!(device.allocated_bytes(), 16);
    }

    #[test]
    fn submit_signals_fence() {
        let device = HostDevice::new();
        let fence = device.create_fence(false).unwrap();
        assert!(matches!(device.wait_for_fences(&[&fence], true, 1_000), Err(LumeError::Timeout)));
        device.submit(Some(&fence)).unwrap();
        device.wait_for_fences(&[&fence], true, u64::MAX).unwrap();
        device.reset_fences(&[&fence]).unwrap();
        assert!(!fence.is_signaled());
    }

    #[test]
    fn fence_wakes_waiter_on_other_thread() {
        let device = HostDevice::new();
        let fence = device.create_fence(false).unwrap();
        std::thread::scope(|s| {
            let waiter = s.spawn(|| device.wait_for_fences(&[&fence], true, u64::MAX));
            device.submit(Some(&fence)).unwrap();
            waiter.join().unwrap().unwrap();
        });
    }
}
