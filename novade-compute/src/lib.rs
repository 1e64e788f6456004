//! Single-shot Vulkan compute executor.
//!
//! Picks a compute-capable device, queue family and memory types, creates one
//! linear `R32_SFLOAT` storage image in host-visible memory, runs a SPIR-V
//! compute shader over it with a single `(width, height, 1)` dispatch, and
//! reads the result back through the driver-reported row pitch.
//!
//! ```rust,ignore
//! use novade_compute::{config::ExecutorConfig, session, shader::ShaderProgram};
//!
//! let config = ExecutorConfig::default();
//! let output = session::run(&config, &ShaderProgram::fill_ones())?;
//! assert!(output.values.iter().all(|&v| v == 1.0));
//! ```

pub mod barrier;
pub mod capability;
pub mod config;
pub mod device;
pub mod error;
pub mod executor;
pub mod image;
pub mod instance;
pub mod job;
pub mod logging;
pub mod memory;
pub mod readback;
pub mod selector;
pub mod session;
pub mod shader;

pub use device::{ComputeContext, LogicalDevice};
pub use error::{CapabilityError, ComputeError, ProtocolError, Result};
pub use selector::SelectionResult;
pub use session::{ComputeOutput, ComputeSession};
