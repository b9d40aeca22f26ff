//! Accelerator kernels. The host device runs the equivalent Rust passes in
//! `generate` and `hzb`; these are what a GPU backend loads.

use lume_core::LumeResult;
use lume_core::shader::{ShaderSource, compile_shader};

pub const GENERATE_DRAWS_WGSL: &str = include_str!("../shaders/generate_draws.wgsl");
pub const HZB_DOWNSAMPLE_WGSL: &str = include_str!("../shaders/hzb_downsample.wgsl");

pub struct CompiledKernels {
    pub generate_draws: Vec<u32>,
    pub hzb_downsample: Vec<u32>,
}

/// Validates both kernels and returns their SPIR-V.
pub fn compile_kernels() -> LumeResult<CompiledKernels> {
    Ok(CompiledKernels {
        generate_draws: compile_shader(ShaderSource::Wgsl(GENERATE_DRAWS_WGSL))?,
        hzb_downsample: compile_shader(ShaderSource::Wgsl(HZB_DOWNSAMPLE_WGSL))?,
    })
}
