//! Layout state machine for the storage image and the validated command plan.
//!
//! The image moves `Undefined -> Writable -> Readable` through exactly two
//! barriers. Plans are checked against this machine before anything is
//! recorded into a native command buffer.

use ash::vk;

use crate::error::ProtocolError;
use crate::image::color_subresource_range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    /// Freshly created; contents are undefined.
    Undefined,
    /// In `GENERAL` layout, visible to compute-shader writes.
    Writable,
    /// Shader writes are complete and made available to host reads.
    Readable,
}

/// One image memory barrier between two [`ImageState`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ImageState,
    pub to: ImageState,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

impl Transition {
    pub const PREPARE_FOR_WRITE: Transition = Transition {
        from: ImageState::Undefined,
        to: ImageState::Writable,
        old_layout: vk::ImageLayout::UNDEFINED,
        new_layout: vk::ImageLayout::GENERAL,
        src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        dst_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        src_access: vk::AccessFlags::empty(),
        dst_access: vk::AccessFlags::SHADER_WRITE,
    };

    pub const PUBLISH_TO_HOST: Transition = Transition {
        from: ImageState::Writable,
        to: ImageState::Readable,
        old_layout: vk::ImageLayout::GENERAL,
        new_layout: vk::ImageLayout::GENERAL,
        src_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        src_access: vk::AccessFlags::SHADER_WRITE,
        dst_access: vk::AccessFlags::MEMORY_READ,
    };

    /// The native barrier for `image`, owned by `queue_family_index` throughout.
    pub fn image_barrier(&self, image: vk::Image, queue_family_index: u32) -> vk::ImageMemoryBarrier {
        vk::ImageMemoryBarrier::builder()
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_queue_family_index(queue_family_index)
            .dst_queue_family_index(queue_family_index)
            .image(image)
            .subresource_range(color_subresource_range())
            .build()
    }
}

/// Tracks the image's logical state and rejects out-of-order operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageStateTracker {
    state: ImageState,
}

impl Default for ImageStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageStateTracker {
    pub fn new() -> Self {
        Self {
            state: ImageState::Undefined,
        }
    }

    pub fn state(&self) -> ImageState {
        self.state
    }

    pub fn apply(&mut self, transition: &Transition) -> Result<(), ProtocolError> {
        if transition.from != self.state {
            return Err(ProtocolError::TransitionOutOfOrder {
                expected: transition.from,
                actual: self.state,
            });
        }
        self.state = transition.to;
        Ok(())
    }

    pub fn check_dispatch(&self) -> Result<(), ProtocolError> {
        match self.state {
            ImageState::Writable => Ok(()),
            other => Err(ProtocolError::DispatchOutsideWritable(other)),
        }
    }

    pub fn check_host_read(&self) -> Result<(), ProtocolError> {
        match self.state {
            ImageState::Readable => Ok(()),
            other => Err(ProtocolError::HostReadOutsideReadable(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Transition(Transition),
    BindPipeline,
    BindDescriptorSet,
    Dispatch { x: u32, y: u32, z: u32 },
}

/// A command sequence that has passed protocol validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPlan {
    commands: Vec<Command>,
    final_state: ImageState,
}

impl CommandPlan {
    /// Transition, bind, dispatch `width x height x 1` groups, transition.
    pub fn single_dispatch(width: u32, height: u32) -> Result<Self, ProtocolError> {
        Self::validate(vec![
            Command::Transition(Transition::PREPARE_FOR_WRITE),
            Command::BindPipeline,
            Command::BindDescriptorSet,
            Command::Dispatch {
                x: width,
                y: height,
                z: 1,
            },
            Command::Transition(Transition::PUBLISH_TO_HOST),
        ])
    }

    /// Replays `commands` against a fresh tracker.
    pub fn validate(commands: Vec<Command>) -> Result<Self, ProtocolError> {
        let mut tracker = ImageStateTracker::new();
        let mut pipeline_bound = false;
        let mut descriptor_set_bound = false;

        for command in &commands {
            match *command {
                Command::Transition(ref transition) => tracker.apply(transition)?,
                Command::BindPipeline => pipeline_bound = true,
                Command::BindDescriptorSet => descriptor_set_bound = true,
                Command::Dispatch { x, y, z } => {
                    tracker.check_dispatch()?;
                    if !pipeline_bound {
                        return Err(ProtocolError::PipelineNotBound);
                    }
                    if !descriptor_set_bound {
                        return Err(ProtocolError::DescriptorSetNotBound);
                    }
                    if x == 0 || y == 0 || z == 0 {
                        return Err(ProtocolError::EmptyDispatch { x, y, z });
                    }
                }
            }
        }

        Ok(Self {
            commands,
            final_state: tracker.state(),
        })
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn final_state(&self) -> ImageState {
        self.final_state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn single_dispatch_ends_readable() {
        let plan = CommandPlan::single_dispatch(8, 8).unwrap();
        assert_eq!(plan.final_state(), ImageState::Readable);
        assert_eq!(plan.commands().len(), 5);
        assert_eq!(plan.commands()[3], Command::Dispatch { x: 8, y: 8, z: 1 });
    }

    #[test]
    fn transitions_carry_expected_masks() {
        let prepare = Transition::PREPARE_FOR_WRITE;
        assert_eq!(prepare.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(prepare.new_layout, vk::ImageLayout::GENERAL);
        assert_eq!(prepare.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(prepare.dst_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
        assert!(prepare.src_access.is_empty());
        assert_eq!(prepare.dst_access, vk::AccessFlags::SHADER_WRITE);

        let publish = Transition::PUBLISH_TO_HOST;
        assert_eq!(publish.old_layout, vk::ImageLayout::GENERAL);
        assert_eq!(publish.new_layout, vk::ImageLayout::GENERAL);
        assert_eq!(publish.src_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
        assert_eq!(publish.dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        assert_eq!(publish.src_access, vk::AccessFlags::SHADER_WRITE);
        assert_eq!(publish.dst_access, vk::AccessFlags::MEMORY_READ);
    }

    #[test]
    fn barrier_keeps_queue_ownership() {
        let barrier = Transition::PREPARE_FOR_WRITE.image_barrier(vk::Image::null(), 2);
        assert_eq!(barrier.src_queue_family_index, 2);
        assert_eq!(barrier.dst_queue_family_index, 2);
        assert_eq!(barrier.subresource_range.level_count, 1);
        assert_eq!(barrier.subresource_range.layer_count, 1);
        assert_eq!(barrier.subresource_range.aspect_mask, vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn dispatch_in_undefined_is_rejected() {
        let err = CommandPlan::validate(vec![
            Command::BindPipeline,
            Command::BindDescriptorSet,
            Command::Dispatch { x: 1, y: 1, z: 1 },
        ])
        .unwrap_err();
        assert_eq!(err, ProtocolError::DispatchOutsideWritable(ImageState::Undefined));
    }

    #[test]
    fn host_read_while_writable_is_rejected() {
        let mut tracker = ImageStateTracker::new();
        tracker.apply(&Transition::PREPARE_FOR_WRITE).unwrap();
        assert_eq!(
            tracker.check_host_read(),
            Err(ProtocolError::HostReadOutsideReadable(ImageState::Writable))
        );
        tracker.apply(&Transition::PUBLISH_TO_HOST).unwrap();
        assert_eq!(tracker.check_host_read(), Ok(()));
    }

    #[test]
    fn reordered_transitions_are_rejected() {
        let err = CommandPlan::validate(vec![
            Command::Transition(Transition::PUBLISH_TO_HOST),
            Command::Transition(Transition::PREPARE_FOR_WRITE),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            ProtocolError::TransitionOutOfOrder {
                expected: ImageState::Writable,
                actual: ImageState::Undefined,
            }
        );
    }

    #[test]
    fn repeated_prepare_is_rejected() {
        let mut tracker = ImageStateTracker::new();
        tracker.apply(&Transition::PREPARE_FOR_WRITE).unwrap();
        assert!(tracker.apply(&Transition::PREPARE_FOR_WRITE).is_err());
    }

    #[test]
    fn dispatch_after_publish_is_rejected() {
        let err = CommandPlan::validate(vec![
            Command::Transition(Transition::PREPARE_FOR_WRITE),
            Command::BindPipeline,
            Command::BindDescriptorSet,
            Command::Transition(Transition::PUBLISH_TO_HOST),
            Command::Dispatch { x: 1, y: 1, z: 1 },
        ])
        .unwrap_err();
        assert_eq!(err, ProtocolError::DispatchOutsideWritable(ImageState::Readable));
    }

    #[test]
    fn dispatch_requires_bindings() {
        let err = CommandPlan::validate(vec![
            Command::Transition(Transition::PREPARE_FOR_WRITE),
            Command::BindDescriptorSet,
            Command::Dispatch { x: 1, y: 1, z: 1 },
        ])
        .unwrap_err();
        assert_eq!(err, ProtocolError::PipelineNotBound);

        let err = CommandPlan::validate(vec![
            Command::Transition(Transition::PREPARE_FOR_WRITE),
            Command::BindPipeline,
            Command::Dispatch { x: 1, y: 1, z: 1 },
        ])
        .unwrap_err();
        assert_eq!(err, ProtocolError::DescriptorSetNotBound);
    }

    #[test]
    fn zero_sized_dispatch_is_rejected() {
        assert_eq!(
            CommandPlan::single_dispatch(0, 8).unwrap_err(),
            ProtocolError::EmptyDispatch { x: 0, y: 8, z: 1 }
        );
    }
}
