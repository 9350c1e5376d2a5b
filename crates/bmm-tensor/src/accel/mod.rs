// Accelerator devices.
//
// An accelerator owns memory separate from the host and executes work on an
// in-order command stream. Launches return as soon as the command is queued;
// only `download` and `synchronize` block the host.

mod stream;

pub use stream::{StreamAccelerator, StreamBuffer};

use std::fmt::Debug;

use crate::error::Result;
use crate::tensor::Tensor;

/// Trait for compute devices with their own memory and command stream.
///
/// Buffers are device-resident handles; dropping a buffer releases its
/// device memory.
pub trait Accelerator: Debug {
    /// Device-resident buffer type.
    type Buffer;

    /// Returns the name of this device kind (e.g., "stream").
    fn name(&self) -> &str;

    /// Device ordinal this handle is bound to.
    fn ordinal(&self) -> usize;

    /// Queue a host-to-device copy of `host`.
    fn upload(&self, host: &Tensor) -> Result<Self::Buffer>;

    /// Queue a batched product `[b, m, k] @ [b, k, n]` on device buffers.
    ///
    /// Shapes are validated on the host before the launch is queued.
    fn batched_matmul(&self, lhs: &Self::Buffer, rhs: &Self::Buffer) -> Result<Self::Buffer>;

    /// Copy `buffer` back to host memory, waiting for all prior work on the
    /// stream that produces it.
    fn download(&self, buffer: &Self::Buffer) -> Result<Tensor>;

    /// Block until every queued command on the stream has completed.
    ///
    /// Returns the first device fault raised since the stream was created.
    fn synchronize(&self) -> Result<()>;
}
