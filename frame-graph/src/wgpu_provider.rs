use crate::desc::{MemoryRequirements, ResourceDesc};
use crate::provider::{CommandRecorder, PhysicalResourceProvider, ProviderError, ResolvedTransition};
use std::sync::Arc;
use wgpu::{
    Buffer, BufferDescriptor, CommandEncoder, Device, ErrorFilter, Extent3d, Texture,
    TextureDescriptor, TextureView, TextureViewDescriptor,
};

/// wgpu has no placed resources, so a region is a dedicated texture or buffer.
#[derive(Debug, Clone)]
pub enum WgpuRegion {
    Texture { texture: Arc<Texture>, size: u64 },
    Buffer { buffer: Arc<Buffer>, size: u64 },
}

impl WgpuRegion {
    fn size(&self) -> u64 {
        match self {
            WgpuRegion::Texture { size, .. } | WgpuRegion::Buffer { size, .. } => *size,
        }
    }
}

#[derive(Debug, Clone)]
pub enum WgpuView {
    Texture {
        texture: Arc<Texture>,
        view: TextureView,
    },
    Buffer {
        buffer: Arc<Buffer>,
        offset: u64,
        size: u64,
    },
}

impl WgpuView {
    pub fn from_texture(texture: Arc<Texture>) -> Self {
        let view = texture.create_view(&TextureViewDescriptor::default());
        WgpuView::Texture { texture, view }
    }

    pub fn from_buffer(buffer: Arc<Buffer>) -> Self {
        let size = buffer.size();
        WgpuView::Buffer {
            buffer,
            offset: 0,
            size,
        }
    }

    pub fn texture(&self) -> Option<&Texture> {
        match self {
            WgpuView::Texture { texture, .. } => Some(texture),
            WgpuView::Buffer { .. } => None,
        }
    }

    pub fn texture_view(&self) -> Option<&TextureView> {
        match self {
            WgpuView::Texture { view, .. } => Some(view),
            WgpuView::Buffer { .. } => None,
        }
    }

    pub fn buffer(&self) -> Option<&Buffer> {
        match self {
            WgpuView::Buffer { buffer, .. } => Some(buffer),
            WgpuView::Texture { .. } => None,
        }
    }

    pub fn buffer_binding(&self) -> Option<wgpu::BufferBinding<'_>> {
        match self {
            WgpuView::Buffer {
                buffer,
                offset,
                size,
            } => Some(wgpu::BufferBinding {
                buffer,
                offset: *offset,
                size: wgpu::BufferSize::new(*size),
            }),
            WgpuView::Texture { .. } => None,
        }
    }
}

pub struct WgpuProvider {
    device: Device,
    budget: Option<u64>,
    live_bytes: u64,
    next_region: usize,
}

impl WgpuProvider {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            budget: None,
            live_bytes: 0,
            next_region: 0,
        }
    }

    /// Refuses allocations that would take the live total past `bytes`.
    pub fn with_budget(mut self, bytes: u64) -> Self {
        self.budget = Some(bytes);
        self
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    fn available(&self) -> u64 {
        self.budget.map_or(0, |budget| budget.saturating_sub(self.live_bytes))
    }

    /// Runs `create` inside out-of-memory and validation error scopes, so a
    /// failed creation surfaces here instead of at submission.
    fn scoped<T>(
        &self,
        requested: u64,
        create: impl FnOnce(&Device) -> T,
    ) -> Result<T, ProviderError> {
        self.device.push_error_scope(ErrorFilter::OutOfMemory);
        self.device.push_error_scope(ErrorFilter::Validation);
        let created = create(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());

        match out_of_memory.or(validation) {
            Some(error) => Err(provider_error(error, requested, self.available())),
            None => Ok(created),
        }
    }
}

fn provider_error(error: wgpu::Error, requested: u64, available: u64) -> ProviderError {
    match error {
        wgpu::Error::OutOfMemory { .. } => ProviderError::OutOfMemory {
            requested,
            available,
        },
        other => ProviderError::Backend(other.to_string()),
    }
}

impl PhysicalResourceProvider for WgpuProvider {
    type Region = WgpuRegion;
    type View = WgpuView;

    fn allocate(
        &mut self,
        requirements: &MemoryRequirements,
        desc: &ResourceDesc,
    ) -> Result<WgpuRegion, ProviderError> {
        if self.budget.is_some() && requirements.size > self.available() {
            return Err(ProviderError::OutOfMemory {
                requested: requirements.size,
                available: self.available(),
            });
        }

        let label = format!("pool_{}", self.next_region);
        let region = match desc {
            ResourceDesc::Texture(texture) => {
                let texture = self.scoped(requirements.size, |device| {
                    device.create_texture(&TextureDescriptor {
                        label: Some(&label),
                        size: Extent3d {
                            width: texture.width,
                            height: texture.height,
                            depth_or_array_layers: texture.depth_or_array_layers,
                        },
                        mip_level_count: texture.mip_level_count,
                        sample_count: texture.sample_count,
                        dimension: texture.dimension,
                        format: texture.format,
                        usage: texture.usage,
                        view_formats: &[],
                    })
                })?;
                WgpuRegion::Texture {
                    texture: Arc::new(texture),
                    size: requirements.size,
                }
            }
            ResourceDesc::Buffer(buffer) => {
                let buffer = self.scoped(requirements.size, |device| {
                    device.create_buffer(&BufferDescriptor {
                        label: Some(&label),
                        size: requirements.size,
                        usage: buffer.usage,
                        mapped_at_creation: false,
                    })
                })?;
                WgpuRegion::Buffer {
                    buffer: Arc::new(buffer),
                    size: requirements.size,
                }
            }
        };

        self.next_region += 1;
        self.live_bytes += region.size();
        Ok(region)
    }

    fn free(&mut self, region: WgpuRegion) {
        self.live_bytes = self.live_bytes.saturating_sub(region.size());
    }

    fn create_view(
        &mut self,
        region: &WgpuRegion,
        desc: &ResourceDesc,
    ) -> Result<WgpuView, ProviderError> {
        match (region, desc) {
            (WgpuRegion::Texture { texture, .. }, ResourceDesc::Texture(texture_desc)) => {
                let view = texture.create_view(&TextureViewDescriptor {
                    label: texture_desc.label.as_deref(),
                    ..Default::default()
                });
                Ok(WgpuView::Texture {
                    texture: Arc::clone(texture),
                    view,
                })
            }
            (WgpuRegion::Buffer { buffer, .. }, ResourceDesc::Buffer(buffer_desc)) => {
                Ok(WgpuView::Buffer {
                    buffer: Arc::clone(buffer),
                    offset: 0,
                    size: buffer_desc.size,
                })
            }
            _ => Err(ProviderError::Backend(format!(
                "region cannot hold a {:?} resource",
                desc.kind()
            ))),
        }
    }
}

/// wgpu tracks resource states itself; transitions only become debug markers.
impl CommandRecorder<WgpuProvider> for CommandEncoder {
    fn transition(&mut self, transitions: &[ResolvedTransition<'_, WgpuView>]) {
        for resolved in transitions {
            let transition = resolved.transition;
            self.insert_debug_marker(&format!(
                "{:?} {} -> {}",
                transition.handle, transition.before, transition.after
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_out_of_memory_becomes_a_provider_out_of_memory() {
        let error = wgpu::Error::OutOfMemory {
            source: Box::new(std::fmt::Error),
        };
        assert_eq!(
            provider_error(error, 4096, 1024),
            ProviderError::OutOfMemory {
                requested: 4096,
                available: 1024,
            }
        );
    }

    #[test]
    fn validation_errors_become_backend_failures() {
        let error = wgpu::Error::Validation {
            source: Box::new(std::fmt::Error),
            description: "texture usage is empty".to_string(),
        };
        match provider_error(error, 4096, 0) {
            ProviderError::Backend(message) => {
                assert!(message.contains("texture usage is empty"), "{message}")
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
