// SPDX-License-Identifier: CEPL-1.0
use std::ffi::CStr;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use ash::util::read_spv;
use ash::vk;
use prism_render::PushConstants;
use prism_scene::{Topology, Vertex};
use tracing::{debug, warn};

pub(crate) const TOPOLOGIES: [Topology; 6] = [
    Topology::PointList,
    Topology::LineList,
    Topology::LineStrip,
    Topology::TriangleList,
    Topology::TriangleStrip,
    Topology::TriangleFan,
];

pub(crate) fn vk_topology(t: Topology) -> vk::PrimitiveTopology {
    match t {
        Topology::PointList => vk::PrimitiveTopology::POINT_LIST,
        Topology::LineList => vk::PrimitiveTopology::LINE_LIST,
        Topology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        Topology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        Topology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        Topology::TriangleFan => vk::PrimitiveTopology::TRIANGLE_FAN,
    }
}

fn topology_slot(t: Topology) -> usize {
    TOPOLOGIES.iter().position(|&x| x == t).unwrap_or(0)
}

/// Vertex input matching `prism_scene::Vertex`.
pub(crate) fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 5] {
    let attr = |location, format, offset| vk::VertexInputAttributeDescription {
        location,
        binding: 0,
        format,
        offset,
    };
    [
        attr(0, vk::Format::R32G32B32_SFLOAT, 0),
        attr(1, vk::Format::R32G32B32_SFLOAT, 12),
        attr(2, vk::Format::R32G32B32A32_SFLOAT, 24),
        attr(3, vk::Format::R32G32_SFLOAT, 40),
        attr(4, vk::Format::R8G8B8A8_UNORM, 48),
    ]
}

fn hex_bytes(b: &[u8]) -> String {
    use std::fmt::Write as _;
    b.iter().fold(String::with_capacity(b.len() * 2), |mut s, x| {
        let _ = write!(&mut s, "{x:02x}");
        s
    })
}

/// Cache file keyed by vendor, device, driver and cache UUID, next to the binary's cwd.
pub(crate) fn pipeline_cache_path(props: &vk::PhysicalDeviceProperties) -> PathBuf {
    PathBuf::from(format!(
        "prism_pipeline_cache_{:04x}_{:04x}_{:08x}_{}.bin",
        props.vendor_id,
        props.device_id,
        props.driver_version,
        hex_bytes(&props.pipeline_cache_uuid)
    ))
}

pub(crate) unsafe fn create_or_load_pipeline_cache(
    device: &ash::Device,
    path: &Path,
) -> Result<vk::PipelineCache> {
    let data = fs::read(path).ok();
    let (p_initial_data, initial_data_size) = match &data {
        Some(bytes) => (bytes.as_ptr() as *const std::ffi::c_void, bytes.len()),
        None => (std::ptr::null(), 0),
    };
    let ci = vk::PipelineCacheCreateInfo {
        s_type: vk::StructureType::PIPELINE_CACHE_CREATE_INFO,
        initial_data_size,
        p_initial_data,
        ..Default::default()
    };
    match device.create_pipeline_cache(&ci, None) {
        Ok(cache) => Ok(cache),
        // Stale or foreign blob; start empty.
        Err(e) if data.is_some() => {
            warn!("pipeline cache {} rejected ({e:?}); starting empty", path.display());
            let empty = vk::PipelineCacheCreateInfo {
                s_type: vk::StructureType::PIPELINE_CACHE_CREATE_INFO,
                ..Default::default()
            };
            Ok(device.create_pipeline_cache(&empty, None)?)
        }
        Err(e) => Err(anyhow!("create_pipeline_cache: {e:?}")),
    }
}

pub(crate) unsafe fn save_pipeline_cache(
    device: &ash::Device,
    cache: vk::PipelineCache,
    path: &Path,
) -> Result<()> {
    // Some drivers fail here when the cache is empty; nothing to keep then.
    if let Ok(bytes) = device.get_pipeline_cache_data(cache) {
        fs::write(path, &bytes).with_context(|| format!("write {}", path.display()))?;
        debug!("pipeline cache saved to {} ({} bytes)", path.display(), bytes.len());
    }
    Ok(())
}

/// Layout plus one graphics pipeline per primitive topology.
pub(crate) struct ScenePipelines {
    pub layout: vk::PipelineLayout,
    pipelines: [vk::Pipeline; TOPOLOGIES.len()],
}

impl ScenePipelines {
    pub fn get(&self, t: Topology) -> vk::Pipeline {
        self.pipelines[topology_slot(t)]
    }

    /// STRICT: color format MUST match the current presentable images. On a
    /// format change the set is rebuilt before the next record.
    pub unsafe fn new(
        device: &ash::Device,
        cache: vk::PipelineCache,
        color_format: vk::Format,
        depth_format: vk::Format,
        set_layout: vk::DescriptorSetLayout,
    ) -> Result<Self> {
        let push_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: std::mem::size_of::<PushConstants>() as u32,
        };
        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: 1,
            p_set_layouts: &set_layout,
            push_constant_range_count: 1,
            p_push_constant_ranges: &push_range,
            ..Default::default()
        };
        let layout = device
            .create_pipeline_layout(&layout_info, None)
            .context("create_pipeline_layout")?;

        let mut set = Self {
            layout,
            pipelines: [vk::Pipeline::null(); TOPOLOGIES.len()],
        };
        if let Err(e) = set.build_all(device, cache, color_format, depth_format) {
            set.destroy(device);
            return Err(e);
        }
        Ok(set)
    }

    unsafe fn build_all(
        &mut self,
        device: &ash::Device,
        cache: vk::PipelineCache,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<()> {
        let vs_bytes = include_bytes!(concat!(env!("OUT_DIR"), "/scene.vert.spv"));
        let fs_bytes = include_bytes!(concat!(env!("OUT_DIR"), "/scene.frag.spv"));
        let vs_code = read_spv(&mut Cursor::new(&vs_bytes[..]))?;
        let fs_code = read_spv(&mut Cursor::new(&fs_bytes[..]))?;
        let module = |code: &[u32]| {
            let ci = vk::ShaderModuleCreateInfo {
                s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
                p_code: code.as_ptr(),
                code_size: code.len() * 4,
                ..Default::default()
            };
            device.create_shader_module(&ci, None)
        };
        let vs = module(&vs_code)?;
        let fs = match module(&fs_code) {
            Ok(m) => m,
            Err(e) => {
                device.destroy_shader_module(vs, None);
                return Err(e.into());
            }
        };

        let result = self.build_with(device, cache, vs, fs, color_format, depth_format);
        device.destroy_shader_module(vs, None);
        device.destroy_shader_module(fs, None);
        result
    }

    unsafe fn build_with(
        &mut self,
        device: &ash::Device,
        cache: vk::PipelineCache,
        vs: vk::ShaderModule,
        fs: vk::ShaderModule,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<()> {
        let entry = CStr::from_bytes_with_nul(b"main\0")?;
        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: vs,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: fs,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
        ];

        let vb = vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        };
        let va = vertex_attributes();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: 1,
            p_vertex_binding_descriptions: &vb,
            vertex_attribute_description_count: va.len() as u32,
            p_vertex_attribute_descriptions: va.as_ptr(),
            ..Default::default()
        };
        let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dyn_states.len() as u32,
            p_dynamic_states: dyn_states.as_ptr(),
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        // Scene winding is not guaranteed; draw both faces.
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
            depth_test_enable: vk::TRUE,
            depth_write_enable: vk::TRUE,
            depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
            ..Default::default()
        };
        let color_blend_att = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::RGBA,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_blend_att,
            ..Default::default()
        };
        let rendering = vk::PipelineRenderingCreateInfo {
            s_type: vk::StructureType::PIPELINE_RENDERING_CREATE_INFO,
            color_attachment_count: 1,
            p_color_attachment_formats: &color_format,
            depth_attachment_format: depth_format,
            ..Default::default()
        };

        let assemblies: Vec<vk::PipelineInputAssemblyStateCreateInfo> = TOPOLOGIES
            .iter()
            .map(|&t| vk::PipelineInputAssemblyStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
                topology: vk_topology(t),
                ..Default::default()
            })
            .collect();
        let infos: Vec<vk::GraphicsPipelineCreateInfo> = assemblies
            .iter()
            .map(|ia| vk::GraphicsPipelineCreateInfo {
                s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
                p_next: (&rendering as *const _) as *const _,
                stage_count: stages.len() as u32,
                p_stages: stages.as_ptr(),
                p_vertex_input_state: &vertex_input,
                p_input_assembly_state: ia,
                p_viewport_state: &viewport_state,
                p_rasterization_state: &raster,
                p_multisample_state: &multisample,
                p_depth_stencil_state: &depth_stencil,
                p_color_blend_state: &color_blend,
                p_dynamic_state: &dynamic_state,
                layout: self.layout,
                ..Default::default()
            })
            .collect();

        let pipelines = match device.create_graphics_pipelines(cache, &infos, None) {
            Ok(p) => p,
            Err((partial, err)) => {
                for p in partial.into_iter().filter(|p| *p != vk::Pipeline::null()) {
                    device.destroy_pipeline(p, None);
                }
                return Err(anyhow!("create_graphics_pipelines failed: {err:?}"));
            }
        };
        for (slot, p) in self.pipelines.iter_mut().zip(pipelines) {
            *slot = p;
        }
        Ok(())
    }

    /// Rebuilds every pipeline for a new color format. Caller has waited for idle.
    pub unsafe fn rebuild(
        &mut self,
        device: &ash::Device,
        cache: vk::PipelineCache,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<()> {
        self.destroy_pipelines(device);
        self.build_all(device, cache, color_format, depth_format)
    }

    unsafe fn destroy_pipelines(&mut self, device: &ash::Device) {
        for p in &mut self.pipelines {
            if *p != vk::Pipeline::null() {
                device.destroy_pipeline(*p, None);
                *p = vk::Pipeline::null();
            }
        }
    }

    /// Pipelines before their layout.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        self.destroy_pipelines(device);
        if self.layout != vk::PipelineLayout::null() {
            device.destroy_pipeline_layout(self.layout, None);
            self.layout = vk::PipelineLayout::null();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_topology_has_its_own_pipeline_slot() {
        let mut slots: Vec<usize> = TOPOLOGIES.iter().map(|&t| topology_slot(t)).collect();
        slots.dedup();
        assert_eq!(slots, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(
            vk_topology(Topology::TriangleFan),
            vk::PrimitiveTopology::TRIANGLE_FAN
        );
    }

    #[test]
    fn attribute_offsets_match_vertex_layout() {
        let attrs = vertex_attributes();
        let v = Vertex::default();
        let base = &v as *const Vertex as usize;
        assert_eq!(attrs[1].offset as usize, &v.normal as *const _ as usize - base);
        assert_eq!(attrs[2].offset as usize, &v.tangent as *const _ as usize - base);
        assert_eq!(attrs[3].offset as usize, &v.texcoord as *const _ as usize - base);
        assert_eq!(attrs[4].offset as usize, &v.color as *const _ as usize - base);
        assert_eq!(std::mem::size_of::<Vertex>(), 52);
    }

    #[test]
    fn cache_name_is_keyed_by_device() {
        let props = vk::PhysicalDeviceProperties {
            vendor_id: 0x10de,
            device_id: 0x2204,
            driver_version: 1,
            ..Default::default()
        };
        let name = pipeline_cache_path(&props);
        let name = name.to_string_lossy();
        assert!(name.starts_with("prism_pipeline_cache_10de_2204_00000001_"));
        assert!(name.ends_with(".bin"));
    }
}
