use naga::back::spv;

use crate::{LumeError, LumeResult};

pub enum ShaderSource<'a> {
    Wgsl(&'a str),
}

/// Parses and validates a kernel, returning SPIR-V words for the backend.
pub fn compile_shader(source: ShaderSource) -> LumeResult<Vec<u32>> {
    let module = match source {
        ShaderSource::Wgsl(src) => naga::front::wgsl::Frontend::new()
            .parse(src)
            .map_err(|e| LumeError::ShaderCompilationFailed(format!("WGSL parse error: {}", e.emit_to_string(src))))?,
    };

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| LumeError::ShaderCompilationFailed(format!("Naga validation error: {:?}", e)))?;

    let write_options = spv::Options::default();
    let spv = spv::write_vec(&module, &info, &write_options, None)
        .map_err(|e| LumeError::ShaderCompilationFailed(format!("SPIR-V write error: {:?}", e)))?;

    log::debug!("compiled kernel: {} entry points, {} SPIR-V words", module.entry_points.len(), spv.len());
    Ok(spv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_trivial_compute_kernel() {
        let src = r#"
            @group(0) @binding(0) var<storage, read_write> data: array<u32>;

            @compute @workgroup_size(32)
            fn main(@builtin(global_invocation_id) id: vec3<u32>) {
                if (id.x < arrayLength(&data)) {
                    data[id.x] = data[id.x] * 2u;
                }
            }
        "#;
        let words = compile_shader(ShaderSource::Wgsl(src)).unwrap();
        assert_eq!(words[0], 0x0723_0203);
    }

    #[test]
    fn rejects_invalid_source() {
        let err = compile_shader(ShaderSource::Wgsl("fn main( {")).unwrap_err();
        assert!(matches!(err, LumeError::ShaderCompilationFailed(_)));
    }
}
