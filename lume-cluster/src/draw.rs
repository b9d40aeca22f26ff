use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Context, Result, ensure};
use glam::{Mat4, Quat, Vec3};
use lume_core::{Buffer, BufferDescriptor, BufferUsage, Device, LumeResult};
use rayon::prelude::*;

use crate::geometry::Geometry;
use crate::{DrawCommand, PerDrawData};

/// Fixed-size bitfield that any number of threads may update at once.
pub struct VisibilityBits {
    words: Vec<AtomicU32>,
    len: usize,
}

impl VisibilityBits {
    /// All bits start cleared.
    pub fn new(len: usize) -> Self {
        Self { words: (0..len.div_ceil(32)).map(|_| AtomicU32::new(0)).collect(), len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> bool {
        index < self.len && self.words[index / 32].load(Ordering::Relaxed) & (1 << (index % 32)) != 0
    }

    pub fn set(&self, index: usize, value: bool) {
        if index >= self.len {
            return;
        }
        let mask = 1u32 << (index % 32);
        if value {
            self.words[index / 32].fetch_or(mask, Ordering::Relaxed);
        } else {
            self.words[index / 32].fetch_and(!mask, Ordering::Relaxed);
        }
    }

    pub fn clear_all(&self) {
        self.words.par_iter().for_each(|w| w.store(0, Ordering::Relaxed));
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.load(Ordering::Relaxed).count_ones() as usize).sum()
    }
}

/// Capacity-bounded append buffer for draw commands.
///
/// Writers claim a slot with an atomic increment, so emission order is
/// unspecified. The counter never exceeds the capacity; pushes beyond it
/// are dropped.
pub struct DrawStream {
    slots: Vec<OnceLock<DrawCommand>>,
    count: AtomicU32,
}

impl DrawStream {
    pub fn new(capacity: u32) -> Self {
        Self { slots: (0..capacity).map(|_| OnceLock::new()).collect(), count: AtomicU32::new(0) }
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Must run before every generation pass.
    pub fn reset(&mut self) {
        let used = self.len() as usize;
        for slot in &mut self.slots[..used] {
            slot.take();
        }
        *self.count.get_mut() = 0;
    }

    pub fn len(&self) -> u32 {
        self.count.load(Ordering::Acquire).min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `command`, returning its slot, or `None` when full.
    pub fn push(&self, command: DrawCommand) -> Option<u32> {
        let capacity = self.capacity();
        let slot = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| (c < capacity).then_some(c + 1))
            .ok()?;
        // Every slot index is handed out once per pass, so the cell is empty.
        let _ = self.slots[slot as usize].set(command);
        Some(slot)
    }

    pub fn commands(&self) -> Vec<DrawCommand> {
        self.slots[..self.len() as usize].iter().filter_map(|s| s.get().copied()).collect()
    }
}

/// Instance data plus the visibility state that persists across frames.
pub struct DrawState {
    pub instances: Vec<PerDrawData>,
    pub instance_visibility: VisibilityBits,
    pub cluster_visibility: VisibilityBits,
}

impl DrawState {
    pub fn new(geometry: &Geometry, instances: Vec<PerDrawData>) -> Result<Self> {
        let mut cluster_bits = 0usize;
        for (i, draw) in instances.iter().enumerate() {
            let mesh = geometry.mesh(draw.mesh_index).with_context(|| format!("instance {} uses unknown mesh {}", i, draw.mesh_index))?;
            let end = draw.cluster_visibility_offset as usize + mesh.total_cluster_count() as usize;
            cluster_bits = cluster_bits.max(end);
        }
        let instance_visibility = VisibilityBits::new(instances.len());
        Ok(Self { instances, instance_visibility, cluster_visibility: VisibilityBits::new(cluster_bits) })
    }

    pub fn reset_visibility(&self) {
        self.instance_visibility.clear_all();
        self.cluster_visibility.clear_all();
    }
}

fn hash(mut x: u32) -> u32 {
    x = (x ^ 61) ^ (x >> 16);
    x = x.wrapping_mul(9);
    x ^= x >> 4;
    x = x.wrapping_mul(0x27d4_eb2d);
    x ^ (x >> 15)
}

/// Spreads `count` instances on a regular grid filling a cube of edge
/// `cube_size` centered at the origin. Meshes are assigned round-robin and
/// each instance gets a pseudo-random yaw.
pub fn spawn_instances(geometry: &Geometry, count: u32, cube_size: f32) -> Result<Vec<PerDrawData>> {
    ensure!(!geometry.meshes.is_empty(), "no meshes to spawn");

    let per_axis = ((count as f64).cbrt().ceil() as u32).max(1);
    let spacing = cube_size / per_axis as f32;
    let origin = Vec3::splat(-0.5 * cube_size + 0.5 * spacing);

    let mut instances = Vec::with_capacity(count as usize);
    let mut cluster_offset = 0u32;
    for i in 0..count {
        let cell = Vec3::new((i % per_axis) as f32, ((i / per_axis) % per_axis) as f32, (i / (per_axis * per_axis)) as f32);
        let mesh_index = i % geometry.meshes.len() as u32;
        let yaw = hash(i) as f32 / u32::MAX as f32 * std::f32::consts::TAU;

        instances.push(PerDrawData {
            model: Mat4::from_rotation_translation(Quat::from_rotation_y(yaw), origin + cell * spacing),
            mesh_index,
            cluster_visibility_offset: cluster_offset,
            _padding: [0; 2],
        });
        cluster_offset = cluster_offset
            .checked_add(geometry.meshes[mesh_index as usize].total_cluster_count())
            .context("cluster visibility bits exceed u32 range")?;
    }
    Ok(instances)
}

/// Device-side draw command stream: commands plus the indirect count.
pub struct DrawCommandBuffers<D: Device> {
    pub commands: D::Buffer,
    pub count: D::Buffer,
    capacity: u32,
}

impl<D: Device> DrawCommandBuffers<D> {
    pub fn new(device: &D, capacity: u32) -> LumeResult<Self> {
        let usage = BufferUsage::STORAGE | BufferUsage::INDIRECT | BufferUsage::COPY_DST;
        let commands = device.create_buffer(BufferDescriptor {
            size: (capacity.max(1) as u64) * std::mem::size_of::<DrawCommand>() as u64,
            usage,
            mapped_at_creation: false,
        })?;
        let count = device.create_buffer(BufferDescriptor { size: 4, usage, mapped_at_creation: false })?;
        Ok(Self { commands, count, capacity })
    }

    /// Copies the stream's commands and count into the device buffers.
    pub fn publish(&self, stream: &DrawStream) -> LumeResult<u32> {
        let commands = stream.commands();
        let count = commands.len() as u32;
        self.commands.write_data(0, bytemuck::cast_slice(&commands))?;
        self.count.write_data(0, bytemuck::bytes_of(&count))?;
        Ok(count)
    }

    /// What an indirect consumer would see: `count` commands, clamped to capacity.
    pub fn read(&self) -> LumeResult<Vec<DrawCommand>> {
        let mut count = 0u32;
        self.count.read_data(0, bytemuck::bytes_of_mut(&mut count))?;
        let mut commands = vec![DrawCommand::default(); count.min(self.capacity) as usize];
        self.commands.read_data(0, bytemuck::cast_slice_mut(&mut commands))?;
        Ok(commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(i: u32) -> DrawCommand {
        DrawCommand { task_x: 1, task_y: 1, task_z: 1, draw_index: i, lod_index: 0, mesh_visibility: 0 }
    }

    #[test]
    fn visibility_bits_set_and_clear() {
        let bits = VisibilityBits::new(70);
        bits.set(0, true);
        bits.set(33, true);
        bits.set(69, true);
        bits.set(70, true);
        assert!(bits.get(33) && bits.get(69) && !bits.get(70));
        assert_eq!(bits.count_ones(), 3);
        bits.set(33, false);
        assert!(!bits.get(33));
        bits.clear_all();
        assert_eq!(bits.count_ones(), 0);
    }

    #[test]
    fn stream_drops_past_capacity() {
        let mut stream = DrawStream::new(2);
        assert_eq!(stream.push(command(0)), Some(0));
        assert_eq!(stream.push(command(1)), Some(1));
        assert_eq!(stream.push(command(2)), None);
        assert_eq!(stream.len(), 2);
        stream.reset();
        assert!(stream.is_empty());
        assert_eq!(stream.push(command(5)), Some(0));
        assert_eq!(stream.commands(), vec![command(5)]);
    }

    #[test]
    fn concurrent_pushes_claim_unique_slots() {
        const THREADS: u32 = 8;
        const PER_THREAD: u32 = 5_000;
        const CAPACITY: u32 = 30_000;

        let stream = DrawStream::new(CAPACITY);
        let accepted = AtomicU32::new(0);
        std::thread::scope(|s| {
            for t in 0..THREADS {
                let (stream, accepted) = (&stream, &accepted);
                s.spawn(move || {
                    for i in 0..PER_THREAD {
                        if stream.push(command(t * PER_THREAD + i)).is_some() {
                            accepted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        assert_eq!(stream.len(), CAPACITY);
        assert_eq!(accepted.into_inner(), CAPACITY);
        let mut ids: Vec<u32> = stream.commands().iter().map(|c| c.draw_index).collect();
        assert_eq!(ids.len(), CAPACITY as usize);
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), CAPACITY as usize);
    }

    #[test]
    fn rayon_pushes_under_capacity_keep_everything() {
        let stream = DrawStream::new(10_000);
        (0..10_000u32).into_par_iter().for_each(|i| {
            stream.push(command(i));
        });
        let mut ids: Vec<u32> = stream.commands().iter().map(|c| c.draw_index).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..10_000).collect::<Vec<_>>());
    }
}
