//! Scene upload: flattens a [`Scene`] into one device-local vertex buffer.

use ash::vk;
use ember_core::{Scene, Vertex};
use gpu_allocator::MemoryLocation;
use tracing::info;

use crate::device::RenderDevice;
use crate::error::{RenderError, Result};

/// A scene resident on the device. Immutable once uploaded.
///
/// An empty scene has no buffer; the frame scheduler only clears for it.
pub struct DeviceScene<B> {
    vertex_buffer: Option<B>,
    vertex_count: u32,
}

impl<B> DeviceScene<B> {
    pub const fn empty() -> Self {
        Self {
            vertex_buffer: None,
            vertex_count: 0,
        }
    }

    pub fn vertex_buffer(&self) -> Option<&B> {
        self.vertex_buffer.as_ref()
    }

    pub const fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub const fn is_empty(&self) -> bool {
        self.vertex_buffer.is_none() || self.vertex_count == 0
    }

    /// Buffer and count to draw, or `None` when there is nothing to draw.
    pub fn drawable(&self) -> Option<(&B, u32)> {
        match &self.vertex_buffer {
            Some(buffer) if self.vertex_count > 0 => Some((buffer, self.vertex_count)),
            _ => None,
        }
    }

    /// Release the vertex buffer. The device must no longer be reading it.
    pub fn destroy<D: RenderDevice<Buffer = B>>(&mut self, device: &D) {
        if let Some(buffer) = self.vertex_buffer.take() {
            device.destroy_buffer(buffer);
        }
        self.vertex_count = 0;
    }
}

impl<B> Default for DeviceScene<B> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Upload `scene` through a host-visible staging buffer into device-local memory.
///
/// Blocks until the copy has completed. Fails with
/// [`RenderError::EmptyScene`] when the scene has no vertices.
pub fn upload<D: RenderDevice>(device: &D, scene: &Scene) -> Result<DeviceScene<D::Buffer>> {
    let vertices = scene.vertices();
    let size = (vertices.len() * Vertex::STRIDE) as u64;
    if size == 0 {
        return Err(RenderError::EmptyScene);
    }

    let staging = device.create_buffer(
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
        "scene staging",
    )?;

    let uploaded = copy_to_device_local(device, &staging, bytemuck::cast_slice(&vertices));
    device.destroy_buffer(staging);
    let vertex_buffer = uploaded?;

    info!(
        vertices = vertices.len(),
        meshes = scene.meshes().len(),
        bytes = size,
        "Scene uploaded"
    );

    Ok(DeviceScene {
        vertex_buffer: Some(vertex_buffer),
        vertex_count: scene.vertex_count(),
    })
}

fn copy_to_device_local<D: RenderDevice>(
    device: &D,
    staging: &D::Buffer,
    bytes: &[u8],
) -> Result<D::Buffer> {
    let size = bytes.len() as u64;
    device.write_buffer(staging, bytes)?;

    let vertex_buffer = device.create_buffer(
        size,
        vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::TRANSFER_SRC
            | vk::BufferUsageFlags::VERTEX_BUFFER,
        MemoryLocation::GpuOnly,
        "scene vertices",
    )?;

    let copied = device.execute_one_shot(&mut |cmd| {
        device.cmd_copy_buffer(cmd, staging, &vertex_buffer, size);
    });
    if let Err(e) = copied {
        device.destroy_buffer(vertex_buffer);
        return Err(e.into());
    }

    Ok(vertex_buffer)
}

/// Copy the device-local vertices back to the host.
///
/// Goes through a host-readable buffer and a one-shot copy. Returns an
/// empty list for an empty scene.
pub fn read_back<D: RenderDevice>(
    device: &D,
    scene: &DeviceScene<D::Buffer>,
) -> Result<Vec<Vertex>> {
    let Some((buffer, count)) = scene.drawable() else {
        return Ok(Vec::new());
    };
    let size = u64::from(count) * Vertex::STRIDE as u64;

    let readback = device.create_buffer(
        size,
        vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuToCpu,
        "scene readback",
    )?;

    let bytes = device
        .execute_one_shot(&mut |cmd| device.cmd_copy_buffer(cmd, buffer, &readback, size))
        .and_then(|()| device.read_buffer(&readback, size));
    device.destroy_buffer(readback);

    Ok(bytes?
        .chunks_exact(Vertex::STRIDE)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}
