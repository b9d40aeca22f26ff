//! Frame orchestration: the five phase schedule, the barriers between
//! phases, and the ring of per-frame resources.

use anyhow::{Context, Result, bail};
use log::{debug, trace};
use lume_core::{Buffer, BufferDescriptor, BufferUsage, Device, LumeResult};

use crate::camera::{Camera, FrameCamera};
use crate::draw::{DrawCommandBuffers, DrawState, DrawStream};
use crate::generate::{CullPass, DrawGenerator, GenerateSummary};
use crate::geometry::{Geometry, GeometryBuffers, upload_storage};
use crate::hzb::{DepthBuffer, Hzb};
use crate::raster::{ClusterRasterizer, RasterSummary};
use crate::settings::{RendererConfig, Settings};
use crate::{DrawCommand, PerDrawData, PerFrameData};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Resource {
    FrameUniforms,
    Instances,
    Geometry,
    InstanceVisibility,
    ClusterVisibility,
    DrawCommands,
    DepthTarget,
    Hzb,
}

impl Resource {
    /// Written by the host before any phase runs.
    fn is_uploaded(self) -> bool {
        matches!(self, Resource::FrameUniforms | Resource::Instances | Resource::Geometry)
    }

    /// Kept across frames; a schedule that never writes one reads the
    /// previous frame's contents.
    fn persists(self) -> bool {
        matches!(self, Resource::Hzb | Resource::InstanceVisibility | Resource::ClusterVisibility)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FramePhase {
    PrepassDraws,
    PrepassGeometry,
    BuildHzb,
    FinalDraws,
    FinalGeometry,
}

impl FramePhase {
    pub const SEQUENCE: [FramePhase; 5] = [
        FramePhase::PrepassDraws,
        FramePhase::PrepassGeometry,
        FramePhase::BuildHzb,
        FramePhase::FinalDraws,
        FramePhase::FinalGeometry,
    ];

    pub fn reads(self) -> &'static [Resource] {
        use Resource::*;
        match self {
            FramePhase::PrepassDraws => &[FrameUniforms, Instances, Geometry, InstanceVisibility, Hzb],
            FramePhase::PrepassGeometry => &[FrameUniforms, Instances, Geometry, DrawCommands, ClusterVisibility],
            FramePhase::BuildHzb => &[DepthTarget],
            FramePhase::FinalDraws => &[FrameUniforms, Instances, Geometry, InstanceVisibility, Hzb],
            FramePhase::FinalGeometry => &[FrameUniforms, Instances, Geometry, DrawCommands, ClusterVisibility, Hzb, DepthTarget],
        }
    }

    pub fn writes(self) -> &'static [Resource] {
        use Resource::*;
        match self {
            FramePhase::PrepassDraws => &[InstanceVisibility, DrawCommands],
            FramePhase::PrepassGeometry => &[DepthTarget],
            FramePhase::BuildHzb => &[Hzb],
            FramePhase::FinalDraws => &[InstanceVisibility, DrawCommands],
            FramePhase::FinalGeometry => &[DepthTarget, ClusterVisibility],
        }
    }

    /// Resources this phase reads as the previous frame left them.
    pub fn carried(self) -> &'static [Resource] {
        use Resource::*;
        match self {
            FramePhase::PrepassDraws => &[InstanceVisibility, Hzb],
            FramePhase::PrepassGeometry | FramePhase::FinalGeometry => &[ClusterVisibility],
            FramePhase::BuildHzb | FramePhase::FinalDraws => &[],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hazard {
    ReadAfterWrite,
    WriteAfterWrite,
    WriteAfterRead,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Barrier {
    pub src: FramePhase,
    pub dst: FramePhase,
    pub resource: Resource,
    pub hazard: Hazard,
}

/// Every dependency between phases of `sequence` on a shared resource.
pub fn plan_barriers(sequence: &[FramePhase]) -> Vec<Barrier> {
    let mut barriers = Vec::new();
    for (j, &dst) in sequence.iter().enumerate() {
        let earlier = &sequence[..j];
        let mut touched: Vec<Resource> = dst.reads().to_vec();
        touched.extend(dst.writes().iter().filter(|r| !dst.reads().contains(*r)));

        for resource in touched {
            let reads = dst.reads().contains(&resource);
            let writes = dst.writes().contains(&resource);
            let last_write = earlier.iter().rposition(|p| p.writes().contains(&resource));

            if let Some(i) = last_write {
                let hazard = if reads { Hazard::ReadAfterWrite } else { Hazard::WriteAfterWrite };
                barriers.push(Barrier { src: earlier[i], dst, resource, hazard });
            }
            if writes {
                let since = last_write.map_or(0, |i| i + 1);
                for &src in &earlier[since..] {
                    if src.reads().contains(&resource) && !src.writes().contains(&resource) {
                        barriers.push(Barrier { src, dst, resource, hazard: Hazard::WriteAfterRead });
                    }
                }
            }
        }
    }
    barriers
}

/// Rejects orderings in which a phase reads a resource before the phase
/// that produces it this frame.
pub fn validate_order(sequence: &[FramePhase]) -> Result<()> {
    for (j, &phase) in sequence.iter().enumerate() {
        if sequence[..j].contains(&phase) {
            bail!("{:?} scheduled twice", phase);
        }
        for &resource in phase.reads() {
            if resource.is_uploaded() || phase.carried().contains(&resource) {
                continue;
            }
            if resource.persists() && !sequence.iter().any(|p| p.writes().contains(&resource)) {
                continue;
            }
            if !sequence[..j].iter().any(|p| p.writes().contains(&resource)) {
                bail!("{:?} reads {:?} before it is produced", phase, resource);
            }
        }
    }
    Ok(())
}

pub struct FrameSchedule {
    pub phases: Vec<FramePhase>,
    pub barriers: Vec<Barrier>,
}

impl FrameSchedule {
    /// With a frozen camera the HZB is kept as it was.
    pub fn new(freeze_camera: bool) -> Result<Self> {
        let phases: Vec<FramePhase> = FramePhase::SEQUENCE
            .into_iter()
            .filter(|&p| !(freeze_camera && p == FramePhase::BuildHzb))
            .collect();
        validate_order(&phases)?;
        let barriers = plan_barriers(&phases);
        Ok(Self { phases, barriers })
    }

    pub fn barriers_before(&self, phase: FramePhase) -> impl Iterator<Item = &Barrier> + '_ {
        self.barriers.iter().filter(move |b| b.dst == phase)
    }
}

/// Ring of fences; slot `i` is reused only after the work submitted with
/// it `frames_in_flight` frames ago has completed.
pub struct FramePacer<D: Device> {
    fences: Vec<D::Fence>,
    frame: u64,
}

impl<D: Device> FramePacer<D> {
    pub fn new(device: &D, frames_in_flight: usize) -> LumeResult<Self> {
        let fences = (0..frames_in_flight.max(1)).map(|_| device.create_fence(true)).collect::<LumeResult<Vec<_>>>()?;
        Ok(Self { fences, frame: 0 })
    }

    pub fn frames_in_flight(&self) -> usize {
        self.fences.len()
    }

    pub fn frame_index(&self) -> u64 {
        self.frame
    }

    pub fn slot(&self) -> usize {
        (self.frame % self.fences.len() as u64) as usize
    }

    /// Waits until the current slot is free and returns it. The fence stays
    /// signaled until `end`, so a frame abandoned in between does not wedge
    /// the slot.
    pub fn begin(&mut self, device: &D) -> LumeResult<usize> {
        let slot = self.slot();
        device.wait_for_fences(&[&self.fences[slot]], true, u64::MAX)?;
        Ok(slot)
    }

    pub fn end(&mut self, device: &D) -> LumeResult<()> {
        let slot = self.slot();
        device.reset_fences(&[&self.fences[slot]])?;
        device.submit(Some(&self.fences[slot]))?;
        self.frame += 1;
        Ok(())
    }
}

struct FrameSlot<D: Device> {
    uniforms: D::Buffer,
    draws: DrawCommandBuffers<D>,
    stream: DrawStream,
}

#[derive(Clone, Debug, Default)]
pub struct PassReport {
    pub generate: GenerateSummary,
    pub raster: RasterSummary,
    /// Commands as the cluster stage read them from the device buffer.
    pub commands: Vec<DrawCommand>,
}

#[derive(Clone, Debug)]
pub struct FrameReport {
    pub frame_index: u64,
    pub slot: usize,
    pub prepass: PassReport,
    pub final_pass: PassReport,
    pub hzb_rebuilt: bool,
}

#[derive(Clone, Debug)]
pub enum FrameOutcome {
    Rendered(FrameReport),
    /// The surface has zero extent; nothing was submitted.
    Skipped,
}

pub struct Renderer<D: Device> {
    device: D,
    config: RendererConfig,
    geometry: Geometry,
    geometry_buffers: GeometryBuffers<D>,
    state: DrawState,
    instance_buffer: D::Buffer,
    slots: Vec<FrameSlot<D>>,
    pacer: FramePacer<D>,
    camera: Option<FrameCamera>,
    depth: DepthBuffer,
    hzb: Hzb,
    extent: (u32, u32),
}

impl<D: Device> Renderer<D> {
    pub fn new(device: D, geometry: Geometry, instances: Vec<PerDrawData>, config: RendererConfig) -> Result<Self> {
        let state = DrawState::new(&geometry, instances)?;
        let geometry_buffers = GeometryBuffers::new(&device, &geometry).context("Failed to upload geometry")?;
        let instance_buffer =
            upload_storage(&device, bytemuck::cast_slice(&state.instances)).context("Failed to upload instances")?;

        let pacer = FramePacer::new(&device, config.frames_in_flight)?;
        let slots = (0..pacer.frames_in_flight())
            .map(|_| -> Result<FrameSlot<D>> {
                let uniforms = device.create_buffer(BufferDescriptor {
                    size: std::mem::size_of::<PerFrameData>() as u64,
                    usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                    mapped_at_creation: false,
                })?;
                Ok(FrameSlot {
                    uniforms,
                    draws: DrawCommandBuffers::new(&device, config.max_draw_count)?,
                    stream: DrawStream::new(config.max_draw_count),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let extent = (config.width, config.height);
        debug!(
            "renderer: {} meshes, {} instances, {} cluster bits, {} slots",
            geometry.meshes.len(),
            state.instances.len(),
            state.cluster_visibility.len(),
            slots.len()
        );
        Ok(Self {
            device,
            geometry,
            geometry_buffers,
            state,
            instance_buffer,
            slots,
            pacer,
            camera: None,
            depth: DepthBuffer::new(extent.0, extent.1),
            hzb: Hzb::new(extent.0, extent.1),
            extent,
            config,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn geometry_buffers(&self) -> &GeometryBuffers<D> {
        &self.geometry_buffers
    }

    pub fn instance_buffer(&self) -> &D::Buffer {
        &self.instance_buffer
    }

    pub fn state(&self) -> &DrawState {
        &self.state
    }

    pub fn depth(&self) -> &DepthBuffer {
        &self.depth
    }

    pub fn hzb(&self) -> &Hzb {
        &self.hzb
    }

    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }

    pub fn frame_index(&self) -> u64 {
        self.pacer.frame_index()
    }

    /// Size dependent resources are recreated only once every frame in
    /// flight has finished with them.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if (width, height) == self.extent {
            return Ok(());
        }
        self.extent = (width, height);
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.device.wait_idle()?;
        self.depth = DepthBuffer::new(width, height);
        self.hzb = Hzb::new(width, height);
        debug!("resized to {}x{}, hzb {}", width, height, self.hzb.size());
        Ok(())
    }

    pub fn render_frame(&mut self, camera: &Camera, settings: &Settings) -> Result<FrameOutcome> {
        let (width, height) = self.extent;
        if width == 0 || height == 0 {
            return Ok(FrameOutcome::Skipped);
        }

        let frame_index = self.pacer.frame_index();
        let slot_index = self.pacer.begin(&self.device)?;
        let aspect = width as f32 / height as f32;
        let frame_camera = match &mut self.camera {
            Some(fc) => {
                fc.update(camera, aspect, settings.freeze_camera);
                fc
            }
            none => none.insert(FrameCamera::new(camera, aspect)),
        };
        let frame = PerFrameData::new(frame_camera, settings, &self.config, self.extent, self.hzb.size());

        let Self { geometry, state, slots, depth, hzb, .. } = self;
        let slot = &mut slots[slot_index];
        slot.uniforms.write_data(0, bytemuck::bytes_of(&frame))?;

        let schedule = FrameSchedule::new(settings.freeze_camera)?;
        let mut prepass = PassReport::default();
        let mut final_pass = PassReport::default();
        let mut hzb_rebuilt = false;

        for &phase in &schedule.phases {
            for barrier in schedule.barriers_before(phase) {
                trace!("barrier {:?} -> {:?} on {:?} ({:?})", barrier.src, barrier.dst, barrier.resource, barrier.hazard);
            }
            match phase {
                FramePhase::PrepassDraws | FramePhase::FinalDraws => {
                    let (pass, report) = match phase {
                        FramePhase::PrepassDraws => (CullPass::Prepass, &mut prepass),
                        _ => (CullPass::Final, &mut final_pass),
                    };
                    slot.stream.reset();
                    let generator = DrawGenerator { frame: &frame, meshes: &geometry.meshes, state, hzb };
                    report.generate = generator.run(pass, &slot.stream);
                    slot.draws.publish(&slot.stream)?;
                }
                FramePhase::PrepassGeometry | FramePhase::FinalGeometry => {
                    let (pass, report) = match phase {
                        FramePhase::PrepassGeometry => {
                            depth.clear();
                            (CullPass::Prepass, &mut prepass)
                        }
                        _ => (CullPass::Final, &mut final_pass),
                    };
                    let commands = slot.draws.read()?;
                    let rasterizer = ClusterRasterizer { frame: &frame, geometry, state, hzb, depth };
                    report.raster = rasterizer.run(pass, &commands);
                    report.commands = commands;
                }
                FramePhase::BuildHzb => {
                    hzb.build(depth);
                    hzb_rebuilt = true;
                }
            }
        }

        self.pacer.end(&self.device)?;
        debug!(
            "frame {}: prepass {} draws / {} clusters, final {} draws / {} clusters",
            frame_index,
            prepass.commands.len(),
            prepass.raster.clusters_drawn,
            final_pass.commands.len(),
            final_pass.raster.clusters_drawn
        );

        Ok(FrameOutcome::Rendered(FrameReport { frame_index, slot: slot_index, prepass, final_pass, hzb_rebuilt }))
    }
}
