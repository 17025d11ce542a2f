//! Frame buffers with host/device residency tracking.
//!
//! A `Buffer` is the unit of data exchanged between nodes. It always owns a
//! host array and may own a device copy allocated through a `ComputeContext`.
//! The residency flag names which copy is authoritative:
//!
//! ```text
//!            host_array_mut                 dispatch
//!   Host  <────────────────  Synced  ────────────────>  Device
//!     └──── device_sync ────>  ^  <──── host_array ──────┘
//! ```
//!
//! Every migration is a copy, and a migration into a domain that is already
//! valid does nothing. Methods that may migrate take `&mut self`, so at most one
//! transition can be in flight per buffer.

use crate::pipeline::compute::{ComputeContext, DeviceMemory};
use crate::pipeline::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Ordered dimension sizes, fastest-varying axis first (width, height, ...).
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Dims(Vec<usize>);

impl Dims {
    pub fn new(sizes: &[usize]) -> Self {
        Self(sizes.to_vec())
    }

    pub fn d2(width: usize, height: usize) -> Self {
        Self(vec![width, height])
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    /// Total number of elements.
    pub fn element_count(&self) -> usize {
        if self.0.is_empty() {
            0
        } else {
            self.0.iter().product()
        }
    }

    /// `(width, height)` of a rank-2 shape.
    pub fn as_2d(&self) -> PipelineResult<(usize, usize)> {
        match self.0.as_slice() {
            [w, h] => Ok((*w, *h)),
            other => Err(PipelineError::Shape(format!(
                "expected a 2-D buffer, got rank {} ({:?})",
                other.len(),
                other
            ))),
        }
    }
}

impl fmt::Debug for Dims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|d| d.to_string()).collect();
        write!(f, "{}", parts.join("x"))
    }
}

impl fmt::Display for Dims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<&[usize]> for Dims {
    fn from(sizes: &[usize]) -> Self {
        Self::new(sizes)
    }
}

/// Which copy of a buffer's data is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Residency {
    /// Only the host array is valid.
    Host,
    /// Only the device copy is valid.
    Device,
    /// Both copies hold identical data.
    Synced,
}

/// A frame of `f32` data flowing between nodes.
pub struct Buffer {
    dims: Dims,
    host: Vec<f32>,
    device: Option<DeviceMemory>,
    residency: Residency,
    /// Position of this frame in its producer's stream.
    pub sequence: u64,
}

impl Buffer {
    /// Create a zero-filled host-resident buffer.
    pub fn new(dims: Dims) -> Self {
        let len = dims.element_count();
        Self {
            dims,
            host: vec![0.0; len],
            device: None,
            residency: Residency::Host,
            sequence: 0,
        }
    }

    /// Wrap existing host data. Fails if `data` does not match `dims`.
    pub fn from_vec(dims: Dims, data: Vec<f32>) -> PipelineResult<Self> {
        if data.len() != dims.element_count() {
            return Err(PipelineError::Shape(format!(
                "{} elements do not fill a {} buffer",
                data.len(),
                dims
            )));
        }
        Ok(Self {
            dims,
            host: data,
            device: None,
            residency: Residency::Host,
            sequence: 0,
        })
    }

    pub fn dims(&self) -> &Dims {
        &self.dims
    }

    /// `(width, height)`; `ShapeError` unless the buffer is 2-D.
    pub fn dims_2d(&self) -> PipelineResult<(usize, usize)> {
        self.dims.as_2d()
    }

    pub fn len(&self) -> usize {
        self.host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    /// Size of the data in bytes.
    pub fn byte_len(&self) -> usize {
        self.host.len() * std::mem::size_of::<f32>()
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    /// Device copy, if one has been allocated.
    pub fn device_memory(&self) -> Option<&DeviceMemory> {
        self.device.as_ref()
    }

    /// Host data without migrating; `None` when only the device copy is valid.
    pub fn try_host(&self) -> Option<&[f32]> {
        match self.residency {
            Residency::Host | Residency::Synced => Some(&self.host),
            Residency::Device => None,
        }
    }

    fn ensure_host(&mut self, ctx: &ComputeContext) -> PipelineResult<()> {
        if self.residency != Residency::Device {
            return Ok(());
        }
        let mem = self.device.as_ref().ok_or_else(|| {
            PipelineError::Device("device-resident buffer has no device memory".into())
        })?;
        ctx.download(mem, &mut self.host)?;
        self.residency = Residency::Synced;
        Ok(())
    }

    /// Make the host copy valid, downloading through `ctx` if needed.
    /// Fails with `ContextMismatch` if the device copy belongs to another context.
    pub fn host_sync(&mut self, ctx: &ComputeContext) -> PipelineResult<()> {
        self.ensure_host(ctx)
    }

    /// Host view of the data, downloading first if the device copy is authoritative.
    pub fn host_array(&mut self, ctx: &ComputeContext) -> PipelineResult<&[f32]> {
        self.ensure_host(ctx)?;
        Ok(&self.host)
    }

    /// Mutable host view. Any device copy becomes stale.
    pub fn host_array_mut(&mut self, ctx: &ComputeContext) -> PipelineResult<&mut [f32]> {
        self.ensure_host(ctx)?;
        self.residency = Residency::Host;
        Ok(&mut self.host)
    }

    /// Raw native-endian bytes of the host data.
    pub fn as_bytes(&mut self, ctx: &ComputeContext) -> PipelineResult<&[u8]> {
        self.ensure_host(ctx)?;
        Ok(bytemuck::cast_slice(&self.host))
    }

    /// Make the device copy valid on `ctx`, uploading if needed.
    pub fn device_sync(&mut self, ctx: &ComputeContext) -> PipelineResult<()> {
        match self.residency {
            Residency::Device => {
                // Only reachable through the owning context.
                let owner = self.device.as_ref().map(|m| m.owner());
                if owner != Some(ctx.id()) {
                    return Err(PipelineError::ContextMismatch {
                        owner: owner.unwrap_or(ctx.id()),
                        used: ctx.id(),
                    });
                }
                Ok(())
            }
            Residency::Synced
                if self.device.as_ref().map(|m| m.owner()) == Some(ctx.id()) =>
            {
                Ok(())
            }
            Residency::Synced | Residency::Host => {
                let reusable = self
                    .device
                    .as_ref()
                    .is_some_and(|m| m.owner() == ctx.id() && m.len() == self.host.len());
                if !reusable {
                    self.device = Some(ctx.allocate(self.host.len())?);
                }
                if let Some(mem) = self.device.as_mut() {
                    ctx.upload(&self.host, mem)?;
                }
                self.residency = Residency::Synced;
                Ok(())
            }
        }
    }

    /// Run `kernel` on the device copy. The device copy becomes authoritative.
    pub fn dispatch<F>(&mut self, ctx: &ComputeContext, kernel: F) -> PipelineResult<()>
    where
        F: FnOnce(&mut [f32]),
    {
        self.device_sync(ctx)?;
        let mem = self
            .device
            .as_mut()
            .ok_or_else(|| PipelineError::Device("device copy missing after sync".into()))?;
        ctx.dispatch(mem, kernel)?;
        self.residency = Residency::Device;
        Ok(())
    }

    /// Deep copy for fan-out. The copy is host-resident.
    pub fn duplicate(&mut self, ctx: &ComputeContext) -> PipelineResult<Buffer> {
        self.ensure_host(ctx)?;
        Ok(Buffer {
            dims: self.dims.clone(),
            host: self.host.clone(),
            device: None,
            residency: Residency::Host,
            sequence: self.sequence,
        })
    }

    /// Change the shape in place. Contents become unspecified.
    fn reshape(&mut self, dims: &Dims) {
        let len = dims.element_count();
        self.host.resize(len, 0.0);
        if self.device.as_ref().is_some_and(|m| m.len() != len) {
            self.device = None;
        }
        self.dims = dims.clone();
        self.residency = Residency::Host;
        self.sequence = 0;
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("dims", &self.dims)
            .field("residency", &self.residency)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Counters reported by a `BufferPool`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub allocated: u64,
    pub reused: u64,
    pub recycled: u64,
}

/// Executor-owned recycling of frame buffers keyed by shape.
///
/// Acquired buffers have unspecified contents; producers overwrite them fully.
pub struct BufferPool {
    free: Mutex<HashMap<Dims, Vec<Buffer>>>,
    max_per_shape: usize,
    allocated: AtomicU64,
    reused: AtomicU64,
    recycled: AtomicU64,
}

impl BufferPool {
    pub fn new(max_per_shape: usize) -> Self {
        Self {
            free: Mutex::new(HashMap::new()),
            max_per_shape,
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            recycled: AtomicU64::new(0),
        }
    }

    /// Take a buffer of shape `dims`, reusing a recycled one when available.
    pub fn acquire(&self, dims: &Dims) -> Buffer {
        let reused = self
            .free
            .lock()
            .ok()
            .and_then(|mut free| free.get_mut(dims).and_then(Vec::pop));
        match reused {
            Some(mut buffer) => {
                buffer.reshape(dims);
                self.reused.fetch_add(1, Ordering::Relaxed);
                buffer
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Buffer::new(dims.clone())
            }
        }
    }

    /// Return a buffer for reuse. Dropped if the shape's free list is full.
    pub fn recycle(&self, buffer: Buffer) {
        if buffer.is_empty() {
            return;
        }
        let Ok(mut free) = self.free.lock() else {
            return;
        };
        let list = free.entry(buffer.dims.clone()).or_default();
        if list.len() < self.max_per_shape {
            list.push(buffer);
            self.recycled.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            recycled: self.recycled.load(Ordering::Relaxed),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(8)
    }
}
