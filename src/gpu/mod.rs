//! wgpu device backend for compute contexts.
//!
//! Only available with the `gpu` feature flag:
//! ```bash
//! cargo build --features gpu
//! ```
//!
//! The engine never compiles kernels itself; this module provides storage
//! buffers and blocking host/device transfers so `ComputeContext` can migrate
//! frame buffers to a real adapter.

mod device;

pub use device::{GpuDevice, GpuDeviceError};
