//! GPU device initialization and blocking buffer transfers.

use thiserror::Error;

/// GPU device errors.
#[derive(Debug, Error)]
pub enum GpuDeviceError {
    /// No compatible GPU adapter found
    #[error("No compatible GPU adapter found")]
    NoAdapter,

    /// Failed to request GPU device
    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(String),

    /// Failed to start the runtime used to drive adapter requests
    #[error("Failed to start device runtime: {0}")]
    Runtime(String),

    /// Mapping a staging buffer for readback failed
    #[error("Buffer mapping failed: {0}")]
    Map(String),
}

/// wgpu device + queue pair used by a compute context.
pub struct GpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter: wgpu::Adapter,
}

impl GpuDevice {
    /// Initialize a device on any available backend.
    pub async fn new() -> Result<Self, GpuDeviceError> {
        Self::new_with_backend(wgpu::Backends::all()).await
    }

    /// Initialize a device, blocking the calling thread.
    pub fn new_blocking() -> Result<Self, GpuDeviceError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .map_err(|e| GpuDeviceError::Runtime(e.to_string()))?;
        runtime.block_on(Self::new())
    }

    /// Initialize a device with a specific backend set.
    pub async fn new_with_backend(backends: wgpu::Backends) -> Result<Self, GpuDeviceError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuDeviceError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("tomoflow compute device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|e| GpuDeviceError::DeviceRequest(e.to_string()))?;

        tracing::info!("GPU device ready: {}", adapter.get_info().name);

        Ok(Self {
            device,
            queue,
            adapter,
        })
    }

    /// Adapter info (GPU name, backend, etc.)
    pub fn info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    fn byte_size(len: usize) -> u64 {
        // Zero-sized bindings are invalid; keep one element of padding.
        (len.max(1) * std::mem::size_of::<f32>()) as u64
    }

    /// Create a storage buffer holding `len` floats.
    pub fn create_storage(&self, len: usize) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tomoflow frame"),
            size: Self::byte_size(len),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        })
    }

    /// Queue a host → device copy and submit it.
    pub fn write(&self, buffer: &wgpu::Buffer, host: &[f32]) {
        self.queue.write_buffer(buffer, 0, bytemuck::cast_slice(host));
        self.queue.submit(std::iter::empty());
    }

    /// Copy `buffer` into `host` through a staging buffer, waiting for completion.
    pub fn read(&self, buffer: &wgpu::Buffer, host: &mut [f32]) -> Result<(), GpuDeviceError> {
        if host.is_empty() {
            return Ok(());
        }
        let size = std::mem::size_of_val(host) as u64;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tomoflow staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|e| GpuDeviceError::Map(e.to_string()))?
            .map_err(|e| GpuDeviceError::Map(e.to_string()))?;

        {
            let data = slice.get_mapped_range();
            host.copy_from_slice(bytemuck::cast_slice(&data));
        }
        staging.unmap();
        Ok(())
    }
}
