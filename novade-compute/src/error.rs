//! Error types for the compute executor.
//!
//! Every error here is terminal for the current run. Resources that were already
//! created are released by their owners as the error propagates.

use std::fmt;
use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

use crate::barrier::ImageState;

/// Result alias used throughout the crate.
pub type Result<T, E = ComputeError> = std::result::Result<T, E>;

/// Top-level error for a compute run.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// Device selection failed before any resource was created.
    #[error("Capability selection failed: {0}")]
    Capability(#[from] CapabilityError),

    /// A native Vulkan call returned an error code.
    #[error("Vulkan call failed during {stage}: {result:?}")]
    Backend {
        stage: Stage,
        #[source]
        result: vk::Result,
    },

    /// The recorded barrier/dispatch sequence violated the layout protocol.
    #[error("Synchronization protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// The shader blob is not a usable SPIR-V module.
    #[error("Invalid SPIR-V module: {0}")]
    InvalidShader(String),

    /// The module declares no GLCompute entry point with this name.
    #[error("SPIR-V module has no compute entry point named '{name}'")]
    MissingEntryPoint { name: String },

    /// The chosen memory type is not allowed by the resource's requirements.
    #[error("Memory type {index} is not allowed by requirement bitmask {bitmask:#034b}")]
    MemoryTypeNotAllowed { index: u32, bitmask: u32 },

    /// The memory block is smaller than the resource requires.
    #[error("Allocation of {allocated} bytes is smaller than the required {required} bytes")]
    InsufficientAllocation { allocated: u64, required: u64 },

    /// Width or height is zero or otherwise unusable.
    #[error("Invalid image extent {width}x{height}")]
    InvalidExtent { width: u32, height: u32 },

    /// The backend reported a row layout that cannot hold the logical extent.
    #[error("Invalid row layout: {0}")]
    RowLayout(String),

    /// The Vulkan loader library could not be opened.
    #[error("Failed to load the Vulkan entry point: {0}")]
    Loading(#[from] ash::LoadingError),

    /// Configuration loading or validation failed.
    #[error("Configuration Error: {0}")]
    Config(#[from] ConfigError),

    /// A string destined for the driver contained an interior NUL byte.
    #[error("Invalid C string: {0}")]
    Nul(#[from] std::ffi::NulError),

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
}

impl ComputeError {
    /// The resource-creation step this error belongs to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ComputeError::Backend { stage, .. } => Some(*stage),
            ComputeError::InvalidShader(_) => Some(Stage::ShaderModule),
            ComputeError::MissingEntryPoint { .. } => Some(Stage::Pipeline),
            _ => None,
        }
    }
}

/// The step in which a native call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    InstanceCreation,
    DebugMessenger,
    DeviceEnumeration,
    DeviceCreation,
    ImageCreation,
    MemoryAllocation,
    MemoryBinding,
    ImageViewCreation,
    ShaderModule,
    DescriptorSetLayout,
    PipelineLayout,
    Pipeline,
    DescriptorPool,
    DescriptorSet,
    CommandPool,
    CommandBuffer,
    Recording,
    Fence,
    Submission,
    Wait,
    Mapping,
    Invalidate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::InstanceCreation => "instance creation",
            Stage::DebugMessenger => "debug messenger creation",
            Stage::DeviceEnumeration => "physical device enumeration",
            Stage::DeviceCreation => "logical device creation",
            Stage::ImageCreation => "image creation",
            Stage::MemoryAllocation => "memory allocation",
            Stage::MemoryBinding => "memory binding",
            Stage::ImageViewCreation => "image view creation",
            Stage::ShaderModule => "shader module creation",
            Stage::DescriptorSetLayout => "descriptor set layout creation",
            Stage::PipelineLayout => "pipeline layout creation",
            Stage::Pipeline => "compute pipeline creation",
            Stage::DescriptorPool => "descriptor pool creation",
            Stage::DescriptorSet => "descriptor set allocation",
            Stage::CommandPool => "command pool creation",
            Stage::CommandBuffer => "command buffer allocation",
            Stage::Recording => "command recording",
            Stage::Fence => "fence creation or reset",
            Stage::Submission => "queue submission",
            Stage::Wait => "fence wait",
            Stage::Mapping => "memory mapping",
            Stage::Invalidate => "mapped range invalidation",
        };
        f.write_str(name)
    }
}

/// Attaches a [`Stage`] to a raw `vk::Result`.
pub(crate) trait VkResultExt<T> {
    fn at(self, stage: Stage) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn at(self, stage: Stage) -> Result<T> {
        self.map_err(|result| ComputeError::Backend { stage, result })
    }
}

/// Why a device was rejected, or why selection failed overall.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("device is a software (CPU) implementation")]
    SoftwareDevice,

    #[error("no queue family supports compute")]
    NoComputeQueue,

    #[error("no memory type is device-local")]
    NoDeviceLocalMemory,

    #[error("no memory type is host-visible")]
    NoHostVisibleMemory,

    #[error("requested {requested} exceeds the device limit {limit} for {limit_name}")]
    ExtentExceedsLimit {
        limit_name: &'static str,
        requested: u32,
        limit: u32,
    },

    /// Every enumerated device was rejected.
    #[error("no suitable device among {} candidate(s)", rejections.len())]
    NoSuitableDevice { rejections: Vec<DeviceRejection> },
}

/// A single device's rejection, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRejection {
    pub device_index: usize,
    pub device_name: String,
    pub reason: CapabilityError,
}

impl fmt::Display for DeviceRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({}): {}", self.device_index, self.device_name, self.reason)
    }
}

/// Misordered or missing state transitions around the dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("transition expects the image in {expected:?} but it is in {actual:?}")]
    TransitionOutOfOrder {
        expected: ImageState,
        actual: ImageState,
    },

    #[error("dispatch requires the image in Writable, found {0:?}")]
    DispatchOutsideWritable(ImageState),

    #[error("host read requires the image in Readable, found {0:?}")]
    HostReadOutsideReadable(ImageState),

    #[error("dispatch recorded before a compute pipeline was bound")]
    PipelineNotBound,

    #[error("dispatch recorded before the descriptor set was bound")]
    DescriptorSetNotBound,

    #[error("dispatch group count {x}x{y}x{z} contains a zero dimension")]
    EmptyDispatch { x: u32, y: u32, z: u32 },
}

/// Errors from loading and validating the executor configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path:?}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Failed to initialize logging: {0}")]
    LoggingInitialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_names_stage() {
        let err: Result<()> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).at(Stage::MemoryAllocation);
        let message = err.unwrap_err().to_string();
        assert!(message.contains("memory allocation"), "{message}");
        assert!(message.contains("ERROR_OUT_OF_DEVICE_MEMORY"), "{message}");
    }

    #[test]
    fn shader_errors_report_their_stage() {
        assert_eq!(ComputeError::InvalidShader("bad".into()).stage(), Some(Stage::ShaderModule));
        assert_eq!(
            ComputeError::MissingEntryPoint { name: "missing".into() }.stage(),
            Some(Stage::Pipeline)
        );
        let backend: Result<()> = Err(vk::Result::ERROR_DEVICE_LOST).at(Stage::Wait);
        assert_eq!(backend.unwrap_err().stage(), Some(Stage::Wait));
        assert_eq!(ComputeError::InvalidExtent { width: 0, height: 1 }.stage(), None);
    }

    #[test]
    fn no_suitable_device_counts_candidates() {
        let err = CapabilityError::NoSuitableDevice {
            rejections: vec![
                DeviceRejection {
                    device_index: 0,
                    device_name: "llvmpipe".into(),
                    reason: CapabilityError::SoftwareDevice,
                },
                DeviceRejection {
                    device_index: 1,
                    device_name: "Test GPU".into(),
                    reason: CapabilityError::NoComputeQueue,
                },
            ],
        };
        assert_eq!(err.to_string(), "no suitable device among 2 candidate(s)");
    }

    #[test]
    fn capability_error_converts_into_compute_error() {
        let err: ComputeError = CapabilityError::NoHostVisibleMemory.into();
        assert!(matches!(err, ComputeError::Capability(CapabilityError::NoHostVisibleMemory)));
    }
}
