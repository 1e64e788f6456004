//! One end-to-end run: image, job, dispatch, readback.

use std::sync::Arc;

use tracing::info;

use crate::barrier::CommandPlan;
use crate::config::ExecutorConfig;
use crate::device::{ComputeContext, LogicalDevice};
use crate::error::Result;
use crate::executor::{ExecutionReceipt, Executor};
use crate::image::{ImageExtent, StorageImage, UnboundImage};
use crate::job::ComputeJob;
use crate::memory::DeviceMemoryBlock;
use crate::readback::ImageReadback;
use crate::selector::SelectionResult;
use crate::shader::ShaderProgram;

/// Values copied out of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeOutput {
    pub device_name: String,
    pub extent: ImageExtent,
    pub row_pitch: u64,
    /// Row-major texels with row padding removed.
    pub values: Vec<f32>,
}

impl ComputeOutput {
    pub fn row(&self, row: u32) -> &[f32] {
        let width = self.extent.width() as usize;
        let start = row as usize * width;
        &self.values[start..start + width]
    }
}

/// All resources of a single dispatch.
///
/// Fields drop in declaration order, which is the reverse of creation:
/// executor, then job, then image and its memory. The device goes last, once
/// the final `Arc` is released.
pub struct ComputeSession {
    executor: Executor,
    job: ComputeJob,
    image: StorageImage,
    plan: CommandPlan,
}

impl ComputeSession {
    /// Creates the image in host-visible memory and builds the job around it.
    pub fn prepare(
        device: &Arc<LogicalDevice>,
        selection: &SelectionResult,
        extent: ImageExtent,
        program: &ShaderProgram,
        entry_point: &str,
    ) -> Result<Self> {
        let plan = CommandPlan::single_dispatch(extent.width(), extent.height())?;

        let unbound = UnboundImage::create(Arc::clone(device), extent, selection.queue_family_index)?;
        let requirements = *unbound.requirements();
        requirements.check_block(selection.host_visible_memory_type, requirements.size)?;

        let memory =
            DeviceMemoryBlock::allocate(Arc::clone(device), requirements.size, selection.host_visible_memory_type)?;
        let image = unbound.bind(memory)?;

        let job = ComputeJob::build(Arc::clone(device), program, entry_point, image.view())?;
        let executor = Executor::new(Arc::clone(device))?;

        Ok(Self {
            executor,
            job,
            image,
            plan,
        })
    }

    pub fn execute(&self) -> Result<ExecutionReceipt> {
        self.executor.submit_and_wait(&self.plan, &self.job, &self.image)
    }

    /// Maps the image for reading. Requires a receipt from [`Self::execute`].
    pub fn readback(&self, receipt: &ExecutionReceipt) -> Result<ImageReadback<'_>> {
        ImageReadback::map(&self.image, receipt)
    }

    pub fn image(&self) -> &StorageImage {
        &self.image
    }
}

/// Loads the shader named in `config`, or the built-in fill program.
pub fn load_program(config: &ExecutorConfig) -> Result<ShaderProgram> {
    match &config.shader.path {
        Some(path) => {
            let bytes = std::fs::read(path)?;
            info!("Loaded {} bytes of SPIR-V from {:?}", bytes.len(), path);
            ShaderProgram::from_bytes(&bytes)
        }
        None => {
            info!("No shader path configured; using the built-in fill program");
            Ok(ShaderProgram::fill_ones())
        }
    }
}

/// Selects a device, runs `program` once over a fresh image and copies the result out.
pub fn run(config: &ExecutorConfig, program: &ShaderProgram) -> Result<ComputeOutput> {
    let extent = ImageExtent::new(config.image.width, config.image.height)?;
    let context = ComputeContext::new(config)?;

    let session = ComputeSession::prepare(
        context.device(),
        context.selection(),
        extent,
        program,
        &config.shader.entry_point,
    )?;
    let receipt = session.execute()?;

    let readback = session.readback(&receipt)?;
    let view = readback.view()?;
    let output = ComputeOutput {
        device_name: context.capabilities().name.clone(),
        extent,
        row_pitch: view.row_pitch(),
        values: view.to_dense(),
    };
    info!(
        "Read back {}x{} texels (row pitch {} bytes) from {}",
        extent.width(),
        extent.height(),
        output.row_pitch,
        output.device_name
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_rows_are_width_sized() {
        let output = ComputeOutput {
            device_name: "Test GPU".into(),
            extent: ImageExtent::new(3, 2).unwrap(),
            row_pitch: 16,
            values: vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
        };
        assert_eq!(output.row(0), &[0.0, 1.0, 2.0]);
        assert_eq!(output.row(1), &[3.0, 4.0, 5.0]);
    }

    #[test]
    fn default_config_uses_builtin_program() {
        let program = load_program(&ExecutorConfig::default()).unwrap();
        assert_eq!(program, ShaderProgram::fill_ones());
    }

    #[test]
    fn unreadable_shader_path_is_an_io_error() {
        let mut config = ExecutorConfig::default();
        config.shader.path = Some("/nonexistent/fill.spv".into());
        assert!(matches!(load_program(&config), Err(crate::error::ComputeError::Io(_))));
    }
}
