//! Shader compilation, linking, binding resolution, and the static quad.
//!
//! Compilation is two independent stages (vertex, fragment) validated with
//! naga before anything touches the device, so a malformed source yields a
//! stage-tagged diagnostic and no partially-created GPU objects. Named
//! bindings are resolved once from the parsed modules; a name the shader
//! never declares resolves to the sentinel and uploads to it are no-ops.

use bytemuck;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use std::collections::HashMap;
use thiserror::Error;
use wgpu::util::DeviceExt;

use super::gpu::GpuContext;
use super::uniforms::FrameUniforms;

pub const VERTEX_SOURCE: &str = include_str!("../shaders/field.vert.wgsl");
pub const FRAGMENT_SOURCE: &str = include_str!("../shaders/field.frag.wgsl");

/// Binding names forming the contract between FrameUniforms and the shader.
pub const UNIFORM_FRAME: &str = "u_frame";
pub const UNIFORM_SPECTRUM: &str = "u_spectrum";
pub const ATTR_POSITION: &str = "position";

/// Two triangles covering the clip-space square; uploaded once, never mutated.
pub const QUAD_VERTICES: [[f32; 2]; 6] = [
    [-1.0, -1.0],
    [1.0, -1.0],
    [-1.0, 1.0],
    [-1.0, 1.0],
    [1.0, -1.0],
    [1.0, 1.0],
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Vertex,
    Fragment,
}

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("{stage:?} shader failed to compile:\n{log}")]
    Compile { stage: Stage, log: String },
    #[error("Pipeline link failed:\n{log}")]
    Link { log: String },
}

/// Prepend the spectrum length as a WGSL const so the shader's declared
/// array size tracks the analyser window from one shared value.
pub fn inject_bin_count(source: &str, bin_count: usize) -> String {
    format!("const SPECTRUM_BINS: u32 = {}u;\n\n{}", bin_count, source)
}

/// Parse and validate one shader stage. Returns the naga IR used for
/// binding resolution, or a diagnostic rendered against the source.
pub fn compile_stage(source: &str, stage: Stage) -> Result<naga::Module, ShaderError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| ShaderError::Compile {
        stage,
        log: e.emit_to_string(source),
    })?;

    Validator::new(ValidationFlags::all(), Capabilities::default())
        .validate(&module)
        .map_err(|e| ShaderError::Compile {
            stage,
            log: e.emit_to_string(source),
        })?;

    Ok(module)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindingLocation {
    pub group: u32,
    pub binding: u32,
}

/// Name -> handle mapping resolved once after compilation. `None` is the
/// "unused" sentinel for declared-but-absent (or optimized-out) names.
#[derive(Debug, Default)]
pub struct BindingMap(HashMap<String, Option<BindingLocation>>);

impl BindingMap {
    /// The sentinel covers names the sources never declare; a global that is
    /// declared but unreferenced still resolves (the IR retains it), and
    /// uploads to it are harmless writes the shader ignores.
    pub fn resolve(modules: &[&naga::Module], names: &[&str]) -> Self {
        let mut map = HashMap::new();
        for &name in names {
            let found = modules.iter().find_map(|module| {
                module.global_variables.iter().find_map(|(_, var)| {
                    if var.name.as_deref() == Some(name) {
                        var.binding.as_ref().map(|b| BindingLocation {
                            group: b.group,
                            binding: b.binding,
                        })
                    } else {
                        None
                    }
                })
            });
            if found.is_none() {
                log::warn!("Shader binding '{}' not found; uploads to it are no-ops", name);
            }
            map.insert(name.to_string(), found);
        }
        Self(map)
    }

    pub fn get(&self, name: &str) -> Option<BindingLocation> {
        self.0.get(name).copied().flatten()
    }
}

/// Vertex-stage input location for a named attribute, if declared.
pub fn resolve_attribute(module: &naga::Module, name: &str) -> Option<u32> {
    let entry = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == naga::ShaderStage::Vertex)?;

    entry.function.arguments.iter().find_map(|arg| {
        if arg.name.as_deref() == Some(name) {
            match arg.binding {
                Some(naga::Binding::Location { location, .. }) => Some(location),
                _ => None,
            }
        } else {
            None
        }
    })
}

/// A compiled and linked render program plus the GPU resources it draws with.
/// Immutable once linked; a failed attempt never leaves one behind.
pub struct ShaderProgram {
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    uniform_buffer: wgpu::Buffer,
    spectrum_buffer: wgpu::Buffer,
    vertex_buffer: wgpu::Buffer,
    bindings: BindingMap,
    bin_count: usize,
}

impl ShaderProgram {
    pub fn new(
        gpu: &GpuContext,
        vertex_src: &str,
        fragment_src: &str,
        bin_count: usize,
    ) -> Result<Self, ShaderError> {
        let fragment_src = inject_bin_count(fragment_src, bin_count);

        let vertex_ir = compile_stage(vertex_src, Stage::Vertex)?;
        let fragment_ir = compile_stage(&fragment_src, Stage::Fragment)?;

        let bindings = BindingMap::resolve(
            &[&fragment_ir, &vertex_ir],
            &[UNIFORM_FRAME, UNIFORM_SPECTRUM],
        );
        let position_location = resolve_attribute(&vertex_ir, ATTR_POSITION).unwrap_or_else(|| {
            log::warn!("Vertex attribute '{}' not found; using location 0", ATTR_POSITION);
            0
        });

        let vertex_module = create_module(gpu, vertex_src, Stage::Vertex)?;
        let fragment_module = create_module(gpu, &fragment_src, Stage::Fragment)?;

        let uniform_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame_uniforms"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let spectrum_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("spectrum_buffer"),
            size: (bin_count * std::mem::size_of::<f32>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let vertex_buffer = bind_geometry(gpu);

        // Link: layouts, bind group, and the pipeline itself, under a
        // validation scope so interface mismatches surface as LinkError.
        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let bind_group_layout =
            gpu.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("field_bind_group_layout"),
                    entries: &[
                        // @binding(0): FrameUniforms
                        wgpu::BindGroupLayoutEntry {
                            binding: 0,
                            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Uniform,
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                        // @binding(1): spectrum bins (storage)
                        wgpu::BindGroupLayoutEntry {
                            binding: 1,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Storage { read_only: true },
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                    ],
                });

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("field_bind_group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: spectrum_buffer.as_entire_binding(),
                },
            ],
        });

        let pipeline_layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("field_pipeline_layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        let pipeline = gpu
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("field_pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vertex_module,
                    entry_point: Some("vs_main"),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &[wgpu::VertexAttribute {
                            offset: 0,
                            shader_location: position_location,
                            format: wgpu::VertexFormat::Float32x2,
                        }],
                    }],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fragment_module,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: gpu.config.format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    unclipped_depth: false,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });

        if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(ShaderError::Link {
                log: err.to_string(),
            });
        }

        Ok(Self {
            pipeline,
            bind_group,
            uniform_buffer,
            spectrum_buffer,
            vertex_buffer,
            bindings,
            bin_count,
        })
    }

    /// Upload the per-frame uniform set. Buffers whose binding resolved to
    /// the sentinel are skipped.
    pub fn upload(&self, queue: &wgpu::Queue, uniforms: &FrameUniforms, spectrum: &[f32]) {
        if self.bindings.get(UNIFORM_FRAME).is_some() {
            queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(uniforms));
        }
        if self.bindings.get(UNIFORM_SPECTRUM).is_some() {
            let len = spectrum.len().min(self.bin_count);
            queue.write_buffer(
                &self.spectrum_buffer,
                0,
                bytemuck::cast_slice(&spectrum[..len]),
            );
        }
    }

    /// One draw over the 6-vertex quad.
    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>) {
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        pass.draw(0..QUAD_VERTICES.len() as u32, 0..1);
    }
}

fn create_module(
    gpu: &GpuContext,
    source: &str,
    stage: Stage,
) -> Result<wgpu::ShaderModule, ShaderError> {
    gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = gpu
        .device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(match stage {
                Stage::Vertex => "field_vertex",
                Stage::Fragment => "field_fragment",
            }),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
    if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
        return Err(ShaderError::Compile {
            stage,
            log: err.to_string(),
        });
    }
    Ok(module)
}

/// One-time upload of the static quad.
fn bind_geometry(gpu: &GpuContext) -> wgpu::Buffer {
    gpu.device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad_vertices"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BINS: usize = 128;

    #[test]
    fn embedded_stages_compile() {
        compile_stage(VERTEX_SOURCE, Stage::Vertex).unwrap();
        let fragment = inject_bin_count(FRAGMENT_SOURCE, BINS);
        compile_stage(&fragment, Stage::Fragment).unwrap();
    }

    #[test]
    fn malformed_fragment_reports_stage_and_log() {
        // Unterminated block
        let broken = "@fragment\nfn fs_main() -> @location(0) vec4<f32> {\n";
        let err = compile_stage(broken, Stage::Fragment).unwrap_err();
        match err {
            ShaderError::Compile { stage, log } => {
                assert_eq!(stage, Stage::Fragment);
                assert!(!log.is_empty());
            }
            other => panic!("expected compile error, got {:?}", other),
        }
    }

    #[test]
    fn type_errors_are_compile_errors_too() {
        let broken = r#"
            @fragment
            fn fs_main() -> @location(0) vec4<f32> {
                return vec2<f32>(0.0, 0.0);
            }
        "#;
        assert!(matches!(
            compile_stage(broken, Stage::Fragment),
            Err(ShaderError::Compile { stage: Stage::Fragment, .. })
        ));
    }

    #[test]
    fn bindings_resolve_with_sentinel_for_unknown_names() {
        let vertex = compile_stage(VERTEX_SOURCE, Stage::Vertex).unwrap();
        let fragment_src = inject_bin_count(FRAGMENT_SOURCE, BINS);
        let fragment = compile_stage(&fragment_src, Stage::Fragment).unwrap();

        let map = BindingMap::resolve(
            &[&fragment, &vertex],
            &[UNIFORM_FRAME, UNIFORM_SPECTRUM, "u_bogus"],
        );

        assert_eq!(
            map.get(UNIFORM_FRAME),
            Some(BindingLocation { group: 0, binding: 0 })
        );
        assert_eq!(
            map.get(UNIFORM_SPECTRUM),
            Some(BindingLocation { group: 0, binding: 1 })
        );
        assert_eq!(map.get("u_bogus"), None);
        // Never-resolved names behave the same as unresolved ones
        assert_eq!(map.get("u_never_asked"), None);
    }

    #[test]
    fn declared_but_unreferenced_global_still_resolves() {
        let src = r#"
            @group(0) @binding(2) var<uniform> u_unused: f32;

            @fragment
            fn fs_main() -> @location(0) vec4<f32> {
                return vec4<f32>(0.0, 0.0, 0.0, 1.0);
            }
        "#;
        let module = compile_stage(src, Stage::Fragment).unwrap();
        let map = BindingMap::resolve(&[&module], &["u_unused"]);
        assert_eq!(
            map.get("u_unused"),
            Some(BindingLocation { group: 0, binding: 2 })
        );
    }

    #[test]
    fn position_attribute_resolves_to_location_zero() {
        let vertex = compile_stage(VERTEX_SOURCE, Stage::Vertex).unwrap();
        assert_eq!(resolve_attribute(&vertex, ATTR_POSITION), Some(0));
        assert_eq!(resolve_attribute(&vertex, "normal"), None);
    }

    #[test]
    fn injected_bin_count_matches_request() {
        let src = inject_bin_count("fn noop() {}", 128);
        assert!(src.starts_with("const SPECTRUM_BINS: u32 = 128u;"));
    }

    #[test]
    fn quad_covers_clip_space() {
        assert_eq!(QUAD_VERTICES.len(), 6);
        for corner in [[-1.0, -1.0], [1.0, -1.0], [-1.0, 1.0], [1.0, 1.0]] {
            assert!(QUAD_VERTICES.contains(&corner));
        }
    }
}
