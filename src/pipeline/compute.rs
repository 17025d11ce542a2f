//! Compute contexts: per-node or per-graph handles to a device command queue.
//!
//! A `ComputeContext` owns one command queue. Every device operation (allocate,
//! upload, download, kernel dispatch) takes the queue lock, so nodes sharing a
//! context are serialized by the context itself rather than by the buffers.
//!
//! Two backends exist:
//! - **Emulated**: device memory lives in a separate host allocation. Used by
//!   default and in tests; migrations are real copies with the same semantics
//!   as a discrete device.
//! - **Wgpu** (feature `gpu`): storage buffers on a wgpu adapter.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::ContextId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[cfg(feature = "gpu")]
use crate::gpu::GpuDevice;

/// Device backend bound to a context.
pub enum DeviceBackend {
    Emulated,
    #[cfg(feature = "gpu")]
    Wgpu(GpuDevice),
}

impl DeviceBackend {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceBackend::Emulated => "emulated",
            #[cfg(feature = "gpu")]
            DeviceBackend::Wgpu(_) => "wgpu",
        }
    }
}

/// Which backend to create contexts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Emulated,
    Wgpu,
}

enum DeviceStorage {
    Emulated(Vec<f32>),
    #[cfg(feature = "gpu")]
    Wgpu(wgpu::Buffer),
}

/// A device-side allocation. Only usable through the context that created it.
pub struct DeviceMemory {
    owner: ContextId,
    len: usize,
    storage: DeviceStorage,
}

impl DeviceMemory {
    pub fn owner(&self) -> ContextId {
        self.owner
    }

    /// Number of `f32` elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for DeviceMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceMemory")
            .field("owner", &self.owner)
            .field("len", &self.len)
            .finish()
    }
}

/// Snapshot of a context's transfer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeStats {
    pub uploads: u64,
    pub downloads: u64,
    pub dispatches: u64,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
}

#[derive(Default)]
struct Counters {
    uploads: AtomicU64,
    downloads: AtomicU64,
    dispatches: AtomicU64,
    bytes_uploaded: AtomicU64,
    bytes_downloaded: AtomicU64,
}

struct CommandQueue {
    backend: DeviceBackend,
    submitted: u64,
}

/// Handle to one device command queue.
pub struct ComputeContext {
    id: ContextId,
    label: String,
    queue: Mutex<CommandQueue>,
    counters: Counters,
}

impl ComputeContext {
    /// Create a context on the emulated backend.
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_backend(label, DeviceBackend::Emulated)
    }

    pub fn with_backend(label: impl Into<String>, backend: DeviceBackend) -> Self {
        let id = ContextId::next();
        let label = label.into();
        tracing::debug!("Created compute context {} '{}' ({})", id, label, backend.name());
        Self {
            id,
            label,
            queue: Mutex::new(CommandQueue {
                backend,
                submitted: 0,
            }),
            counters: Counters::default(),
        }
    }

    /// Create a shared context for the requested backend kind.
    pub fn create(label: impl Into<String>, kind: BackendKind) -> PipelineResult<Arc<Self>> {
        let backend = match kind {
            BackendKind::Emulated => DeviceBackend::Emulated,
            #[cfg(feature = "gpu")]
            BackendKind::Wgpu => DeviceBackend::Wgpu(
                GpuDevice::new_blocking().map_err(|e| PipelineError::Device(e.to_string()))?,
            ),
            #[cfg(not(feature = "gpu"))]
            BackendKind::Wgpu => {
                return Err(PipelineError::Device(
                    "wgpu backend requested but the `gpu` feature is disabled".into(),
                ))
            }
        };
        Ok(Arc::new(Self::with_backend(label, backend)))
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn backend_name(&self) -> &'static str {
        self.queue
            .lock()
            .map(|q| q.backend.name())
            .unwrap_or("poisoned")
    }

    pub fn stats(&self) -> ComputeStats {
        ComputeStats {
            uploads: self.counters.uploads.load(Ordering::Relaxed),
            downloads: self.counters.downloads.load(Ordering::Relaxed),
            dispatches: self.counters.dispatches.load(Ordering::Relaxed),
            bytes_uploaded: self.counters.bytes_uploaded.load(Ordering::Relaxed),
            bytes_downloaded: self.counters.bytes_downloaded.load(Ordering::Relaxed),
        }
    }

    /// Number of commands submitted through this context's queue.
    pub fn submitted(&self) -> u64 {
        self.queue.lock().map(|q| q.submitted).unwrap_or(0)
    }

    fn lock_queue(&self) -> PipelineResult<MutexGuard<'_, CommandQueue>> {
        self.queue
            .lock()
            .map_err(|_| PipelineError::Device(format!("command queue of {} poisoned", self.id)))
    }

    fn check_owner(&self, mem: &DeviceMemory) -> PipelineResult<()> {
        if mem.owner != self.id {
            return Err(PipelineError::ContextMismatch {
                owner: mem.owner,
                used: self.id,
            });
        }
        Ok(())
    }

    /// Allocate `len` elements of device memory.
    pub fn allocate(&self, len: usize) -> PipelineResult<DeviceMemory> {
        let mut queue = self.lock_queue()?;
        queue.submitted += 1;
        let storage = match &queue.backend {
            DeviceBackend::Emulated => DeviceStorage::Emulated(vec![0.0; len]),
            #[cfg(feature = "gpu")]
            DeviceBackend::Wgpu(device) => DeviceStorage::Wgpu(device.create_storage(len)),
        };
        Ok(DeviceMemory {
            owner: self.id,
            len,
            storage,
        })
    }

    /// Copy `host` into `mem`. Blocks until the transfer has been queued.
    pub fn upload(&self, host: &[f32], mem: &mut DeviceMemory) -> PipelineResult<()> {
        self.check_owner(mem)?;
        if host.len() != mem.len {
            return Err(PipelineError::Device(format!(
                "upload of {} elements into allocation of {}",
                host.len(),
                mem.len
            )));
        }
        let mut queue = self.lock_queue()?;
        queue.submitted += 1;
        match (&queue.backend, &mut mem.storage) {
            (DeviceBackend::Emulated, DeviceStorage::Emulated(dst)) => dst.copy_from_slice(host),
            #[cfg(feature = "gpu")]
            (DeviceBackend::Wgpu(device), DeviceStorage::Wgpu(buffer)) => {
                device.write(buffer, host)
            }
            #[cfg(feature = "gpu")]
            _ => return Err(PipelineError::Device("backend/storage mismatch".into())),
        }
        self.counters.uploads.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_uploaded
            .fetch_add(std::mem::size_of_val(host) as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Copy `mem` into `host`. Blocks until the data is on the host.
    pub fn download(&self, mem: &DeviceMemory, host: &mut [f32]) -> PipelineResult<()> {
        self.check_owner(mem)?;
        if host.len() != mem.len {
            return Err(PipelineError::Device(format!(
                "download of {} elements into host array of {}",
                mem.len,
                host.len()
            )));
        }
        let mut queue = self.lock_queue()?;
        queue.submitted += 1;
        match (&queue.backend, &mem.storage) {
            (DeviceBackend::Emulated, DeviceStorage::Emulated(src)) => host.copy_from_slice(src),
            #[cfg(feature = "gpu")]
            (DeviceBackend::Wgpu(device), DeviceStorage::Wgpu(buffer)) => device
                .read(buffer, host)
                .map_err(|e| PipelineError::Device(e.to_string()))?,
            #[cfg(feature = "gpu")]
            _ => return Err(PipelineError::Device("backend/storage mismatch".into())),
        }
        self.counters.downloads.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_downloaded
            .fetch_add(std::mem::size_of_val(host) as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Run `kernel` against device memory on this context's queue.
    ///
    /// Only the emulated backend executes host closures; wgpu kernels need a
    /// compiled pipeline and are rejected here.
    pub fn dispatch<F>(&self, mem: &mut DeviceMemory, kernel: F) -> PipelineResult<()>
    where
        F: FnOnce(&mut [f32]),
    {
        self.check_owner(mem)?;
        let mut queue = self.lock_queue()?;
        queue.submitted += 1;
        match (&queue.backend, &mut mem.storage) {
            (DeviceBackend::Emulated, DeviceStorage::Emulated(data)) => kernel(data),
            #[cfg(feature = "gpu")]
            _ => {
                return Err(PipelineError::Device(
                    "host kernels cannot run on the wgpu backend".into(),
                ))
            }
        }
        self.counters.dispatches.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl std::fmt::Debug for ComputeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeContext")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish()
    }
}
