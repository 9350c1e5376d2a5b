//! `bmm-tensor` - Dense tensors with pluggable compute backends for batchmm.
//!
//! This crate provides:
//! - A row-major f32 `Tensor` with batch slicing and stacking
//! - A `ComputeBackend` trait for host compute and the reference `CpuBackend`
//! - An `Accelerator` trait for devices with their own memory and command
//!   stream, plus the emulated `StreamAccelerator`
//! - Shape utilities
//! - The `.bmt` tensor file format used to ship job inputs and outputs

pub mod accel;
pub mod backend;
pub mod cpu;
pub mod error;
pub mod io;
pub mod shape;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use accel::{Accelerator, StreamAccelerator, StreamBuffer};
pub use backend::ComputeBackend;
pub use cpu::CpuBackend;
pub use error::{Result, TensorError};
pub use shape::Shape;
pub use tensor::Tensor;
