//! Records a validated [`CommandPlan`], submits it once and waits for it.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::barrier::{Command, CommandPlan, ImageState};
use crate::device::LogicalDevice;
use crate::error::{ComputeError, ProtocolError, Result, Stage, VkResultExt};
use crate::image::StorageImage;
use crate::job::ComputeJob;

/// Proof that a plan ran to completion on the device.
///
/// Host reads are only possible through a receipt whose state is `Readable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionReceipt {
    final_state: ImageState,
}

impl ExecutionReceipt {
    pub fn final_state(&self) -> ImageState {
        self.final_state
    }

    pub fn check_host_read(&self) -> Result<(), ProtocolError> {
        match self.final_state {
            ImageState::Readable => Ok(()),
            other => Err(ProtocolError::HostReadOutsideReadable(other)),
        }
    }
}

/// Owns the command pool and the completion fence.
///
/// The fence is reset before every submission, so an executor may be asked to
/// run its plan more than once. Each call still waits for its own dispatch.
pub struct Executor {
    device: Arc<LogicalDevice>,
    command_pool: vk::CommandPool,
    fence: vk::Fence,
}

impl Executor {
    pub fn new(device: Arc<LogicalDevice>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(device.queue_family_index());
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }.at(Stage::CommandPool)?;

        let fence_info = vk::FenceCreateInfo::builder();
        let fence = match unsafe { device.create_fence(&fence_info, None) } {
            Ok(fence) => fence,
            Err(result) => {
                unsafe { device.destroy_command_pool(command_pool, None) };
                return Err(ComputeError::Backend {
                    stage: Stage::Fence,
                    result,
                });
            }
        };

        Ok(Self {
            device,
            command_pool,
            fence,
        })
    }

    /// Records `plan` for `job` and `image`, submits it, and blocks until the
    /// device signals the fence.
    ///
    /// A failed recording or submission is not retried. If the wait itself
    /// fails the command buffer may still be pending, so it is left to the pool.
    pub fn submit_and_wait(
        &self,
        plan: &CommandPlan,
        job: &ComputeJob,
        image: &StorageImage,
    ) -> Result<ExecutionReceipt> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_pool(self.command_pool)
            .command_buffer_count(1);
        let command_buffers =
            unsafe { self.device.allocate_command_buffers(&alloc_info) }.at(Stage::CommandBuffer)?;

        let result = self.record_and_submit(command_buffers[0], plan, job, image);

        if may_still_be_pending(&result) {
            warn!("Fence wait failed; leaving the command buffer to the pool");
        } else {
            unsafe {
                self.device.free_command_buffers(self.command_pool, &command_buffers);
            }
        }
        result?;

        info!("Compute dispatch completed.");
        Ok(ExecutionReceipt {
            final_state: plan.final_state(),
        })
    }

    fn record_and_submit(
        &self,
        command_buffer: vk::CommandBuffer,
        plan: &CommandPlan,
        job: &ComputeJob,
        image: &StorageImage,
    ) -> Result<()> {
        let begin_info =
            vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(command_buffer, &begin_info) }.at(Stage::Recording)?;

        for command in plan.commands() {
            self.record(command_buffer, command, job, image);
        }

        unsafe { self.device.end_command_buffer(command_buffer) }.at(Stage::Recording)?;

        unsafe { self.device.reset_fences(&[self.fence]) }.at(Stage::Fence)?;

        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(std::slice::from_ref(&command_buffer))
            .build();
        unsafe {
            self.device
                .queue_submit(self.device.queue(), &[submit_info], self.fence)
        }
        .at(Stage::Submission)?;
        debug!("Submitted {} commands; waiting for fence", plan.commands().len());

        unsafe { self.device.wait_for_fences(&[self.fence], true, u64::MAX) }.at(Stage::Wait)
    }

    fn record(&self, command_buffer: vk::CommandBuffer, command: &Command, job: &ComputeJob, image: &StorageImage) {
        unsafe {
            match *command {
                Command::Transition(ref transition) => {
                    let barrier = transition.image_barrier(image.handle(), self.device.queue_family_index());
                    self.device.cmd_pipeline_barrier(
                        command_buffer,
                        transition.src_stage,
                        transition.dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[barrier],
                    );
                }
                Command::BindPipeline => {
                    self.device
                        .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::COMPUTE, job.pipeline());
                }
                Command::BindDescriptorSet => {
                    self.device.cmd_bind_descriptor_sets(
                        command_buffer,
                        vk::PipelineBindPoint::COMPUTE,
                        job.pipeline_layout(),
                        0,
                        &[job.descriptor_set()],
                        &[],
                    );
                }
                Command::Dispatch { x, y, z } => {
                    self.device.cmd_dispatch(command_buffer, x, y, z);
                }
            }
        }
    }
}

/// True when `result` leaves a submitted command buffer in an unknown state.
fn may_still_be_pending(result: &Result<()>) -> bool {
    matches!(result, Err(ComputeError::Backend { stage: Stage::Wait, .. }))
}

impl Drop for Executor {
    fn drop(&mut self) {
        unsafe {
            // A pool with pending buffers must not be destroyed.
            let _ = self.device.device_wait_idle();
            self.device.destroy_fence(self.fence, None);
            self.device.destroy_command_pool(self.command_pool, None);
        }
        debug!("Command pool and fence destroyed.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_gates_host_reads() {
        let done = ExecutionReceipt {
            final_state: ImageState::Readable,
        };
        assert!(done.check_host_read().is_ok());

        let unfinished = ExecutionReceipt {
            final_state: ImageState::Writable,
        };
        assert_eq!(
            unfinished.check_host_read(),
            Err(ProtocolError::HostReadOutsideReadable(ImageState::Writable))
        );
    }

    #[test]
    fn only_a_failed_wait_keeps_the_command_buffer() {
        let wait_failed: Result<()> = Err(ComputeError::Backend {
            stage: Stage::Wait,
            result: vk::Result::ERROR_DEVICE_LOST,
        });
        assert!(may_still_be_pending(&wait_failed));

        let submit_failed: Result<()> = Err(ComputeError::Backend {
            stage: Stage::Submission,
            result: vk::Result::ERROR_DEVICE_LOST,
        });
        assert!(!may_still_be_pending(&submit_failed));
        assert!(!may_still_be_pending(&Err(ProtocolError::PipelineNotBound.into())));
        assert!(!may_still_be_pending(&Ok(())));
    }
}
