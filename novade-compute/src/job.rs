use ash::vk;
use std::ffi::CString;
use std::sync::Arc;
use tracing::{debug, info};

use crate::device::LogicalDevice;
use crate::error::{ComputeError, Result, Stage, VkResultExt};
use crate::shader::ShaderProgram;

/// Binding slot of the storage image in set 0.
pub const STORAGE_IMAGE_BINDING: u32 = 0;

/// Shader, pipeline, and a descriptor set pointing at one storage image view.
///
/// Handles are filled in creation order; drop destroys whatever was created,
/// in reverse. A partially built job is therefore cleaned up on error.
pub struct ComputeJob {
    device: Arc<LogicalDevice>,
    shader_module: vk::ShaderModule,
    descriptor_set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
}

impl ComputeJob {
    /// Builds the pipeline for `program` and binds `image_view` at binding 0.
    ///
    /// The set expects the image in `GENERAL` layout and is never rewritten.
    /// `entry_point` must name a GLCompute entry point declared by `program`.
    pub fn build(
        device: Arc<LogicalDevice>,
        program: &ShaderProgram,
        entry_point: &str,
        image_view: vk::ImageView,
    ) -> Result<Self> {
        let entry_name = CString::new(entry_point)?;
        let mut job = Self {
            device,
            shader_module: vk::ShaderModule::null(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_set: vk::DescriptorSet::null(),
        };

        // 1. Shader module
        job.shader_module = program.create_module(&job.device)?;

        // 2. Descriptor set layout: one storage image, compute stage only
        let binding = vk::DescriptorSetLayoutBinding::builder()
            .binding(STORAGE_IMAGE_BINDING)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .build();
        let dsl_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(std::slice::from_ref(&binding));
        job.descriptor_set_layout = unsafe { job.device.create_descriptor_set_layout(&dsl_info, None) }
            .at(Stage::DescriptorSetLayout)?;

        // 3. Pipeline layout
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(std::slice::from_ref(&job.descriptor_set_layout));
        job.pipeline_layout =
            unsafe { job.device.create_pipeline_layout(&layout_info, None) }.at(Stage::PipelineLayout)?;

        // 4. Compute pipeline
        if !program.has_entry_point(entry_point) {
            return Err(ComputeError::MissingEntryPoint {
                name: entry_point.to_owned(),
            });
        }
        let stage_info = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(job.shader_module)
            .name(&entry_name)
            .build();
        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage_info)
            .layout(job.pipeline_layout)
            .build();
        let pipelines = unsafe {
            job.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(pipelines, result)| {
            for pipeline in pipelines.into_iter().filter(|p| *p != vk::Pipeline::null()) {
                unsafe { job.device.destroy_pipeline(pipeline, None) };
            }
            ComputeError::Backend {
                stage: Stage::Pipeline,
                result,
            }
        })?;
        job.pipeline = pipelines.into_iter().next().ok_or(ComputeError::Backend {
            stage: Stage::Pipeline,
            result: vk::Result::ERROR_UNKNOWN,
        })?;
        info!("Compute pipeline created.");

        // 5. Descriptor pool for exactly one storage-image set
        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_IMAGE,
            descriptor_count: 1,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        job.descriptor_pool =
            unsafe { job.device.create_descriptor_pool(&pool_info, None) }.at(Stage::DescriptorPool)?;

        // 6. Descriptor set
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(job.descriptor_pool)
            .set_layouts(std::slice::from_ref(&job.descriptor_set_layout));
        let sets = unsafe { job.device.allocate_descriptor_sets(&alloc_info) }.at(Stage::DescriptorSet)?;
        job.descriptor_set = sets.into_iter().next().ok_or(ComputeError::Backend {
            stage: Stage::DescriptorSet,
            result: vk::Result::ERROR_UNKNOWN,
        })?;

        // 7. Point binding 0 at the view
        let image_info = vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view,
            image_layout: vk::ImageLayout::GENERAL,
        };
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(job.descriptor_set)
            .dst_binding(STORAGE_IMAGE_BINDING)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .image_info(std::slice::from_ref(&image_info))
            .build();
        unsafe { job.device.update_descriptor_sets(&[write], &[]) };
        debug!("Descriptor set written for storage image view {:?}", image_view);

        Ok(job)
    }

    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }
}

impl Drop for ComputeJob {
    fn drop(&mut self) {
        // Destroying a null handle is a no-op, so a half-built job is fine here.
        unsafe {
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            self.device.destroy_shader_module(self.shader_module, None);
        }
        info!("Compute pipeline, layouts, descriptor pool and shader module destroyed.");
    }
}
