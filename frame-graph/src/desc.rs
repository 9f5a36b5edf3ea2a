use crate::handle::ResourceKind;
use crate::{RenderGraphError, Result};
use wgpu::{BufferUsages, TextureDimension, TextureFormat, TextureUsages};

pub const TEXTURE_ALIGNMENT: u64 = 64 * 1024;
pub const MULTISAMPLED_TEXTURE_ALIGNMENT: u64 = 4 * 1024 * 1024;
pub const BUFFER_ALIGNMENT: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputExtent {
    pub width: u32,
    pub height: u32,
}

impl OutputExtent {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    fn scaled(self, scale: f32) -> (u32, u32) {
        let width = ((self.width as f32 * scale).round() as u32).max(1);
        let height = ((self.height as f32 * scale).round() as u32).max(1);
        (width, height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color(wgpu::Color),
    DepthStencil { depth: f32, stencil: u32 },
    Zero,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub label: Option<String>,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub depth_or_array_layers: u32,
    pub mip_level_count: u32,
    pub sample_count: u32,
    pub dimension: TextureDimension,
    pub usage: TextureUsages,
    /// When set, width and height are `scale * primary output` and are
    /// recomputed on every build.
    pub output_scale: Option<f32>,
    pub clear_value: Option<ClearValue>,
}

impl TextureDesc {
    pub fn new(format: TextureFormat, width: u32, height: u32) -> Self {
        Self {
            label: None,
            format,
            width,
            height,
            depth_or_array_layers: 1,
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
            output_scale: None,
            clear_value: None,
        }
    }

    pub fn output_relative(format: TextureFormat, scale: f32) -> Self {
        Self {
            output_scale: Some(scale),
            ..Self::new(format, 1, 1)
        }
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn usage(mut self, usage: TextureUsages) -> Self {
        self.usage = usage;
        self
    }

    pub fn sample_count(mut self, count: u32) -> Self {
        self.sample_count = count;
        self
    }

    pub fn mip_levels(mut self, levels: u32) -> Self {
        self.mip_level_count = levels;
        self
    }

    pub fn array_layers(mut self, layers: u32) -> Self {
        self.depth_or_array_layers = layers;
        self
    }

    pub fn dimension_3d(mut self, depth: u32) -> Self {
        self.dimension = TextureDimension::D3;
        self.depth_or_array_layers = depth;
        self
    }

    pub fn clear(mut self, value: ClearValue) -> Self {
        self.clear_value = Some(value);
        self
    }

    pub fn is_output_relative(&self) -> bool {
        self.output_scale.is_some()
    }

    pub fn resolve(&self, output: OutputExtent) -> Self {
        match self.output_scale {
            Some(scale) => {
                let (width, height) = output.scaled(scale);
                Self {
                    width,
                    height,
                    ..self.clone()
                }
            }
            None => self.clone(),
        }
    }

    fn texel_block_bytes(&self) -> u64 {
        self.format.block_copy_size(None).unwrap_or(8) as u64
    }

    fn byte_size(&self) -> u64 {
        let (block_width, block_height) = self.format.block_dimensions();
        let block_bytes = self.texel_block_bytes();

        (0..self.mip_level_count)
            .map(|mip| {
                let width = (self.width >> mip).max(1).div_ceil(block_width) as u64;
                let height = (self.height >> mip).max(1).div_ceil(block_height) as u64;
                let layers = match self.dimension {
                    TextureDimension::D3 => (self.depth_or_array_layers >> mip).max(1),
                    _ => self.depth_or_array_layers,
                } as u64;
                width * height * layers * block_bytes
            })
            .sum::<u64>()
            * self.sample_count as u64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferDesc {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsages,
    pub clear_value: Option<ClearValue>,
}

impl BufferDesc {
    pub fn new(size: u64) -> Self {
        Self {
            label: None,
            size,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
            clear_value: None,
        }
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn usage(mut self, usage: BufferUsages) -> Self {
        self.usage = usage;
        self
    }

    pub fn zeroed(mut self) -> Self {
        self.clear_value = Some(ClearValue::Zero);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceDesc {
    Texture(TextureDesc),
    Buffer(BufferDesc),
}

impl ResourceDesc {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceDesc::Texture(_) => ResourceKind::Texture,
            ResourceDesc::Buffer(_) => ResourceKind::Buffer,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            ResourceDesc::Texture(desc) => desc.label.as_deref(),
            ResourceDesc::Buffer(desc) => desc.label.as_deref(),
        }
    }

    pub fn clear_value(&self) -> Option<ClearValue> {
        match self {
            ResourceDesc::Texture(desc) => desc.clear_value,
            ResourceDesc::Buffer(desc) => desc.clear_value,
        }
    }

    pub fn as_texture(&self) -> Option<&TextureDesc> {
        match self {
            ResourceDesc::Texture(desc) => Some(desc),
            ResourceDesc::Buffer(_) => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&BufferDesc> {
        match self {
            ResourceDesc::Buffer(desc) => Some(desc),
            ResourceDesc::Texture(_) => None,
        }
    }

    pub fn validate(&self, resource: &str) -> Result<()> {
        let reason = match self {
            ResourceDesc::Texture(desc) => {
                if desc.width == 0 || desc.height == 0 || desc.depth_or_array_layers == 0 {
                    Some("texture extent must be non-zero")
                } else if desc.mip_level_count == 0 {
                    Some("texture needs at least one mip level")
                } else if desc.sample_count == 0 {
                    Some("texture sample count must be non-zero")
                } else if desc
                    .output_scale
                    .is_some_and(|scale| !scale.is_finite() || scale <= 0.0)
                {
                    Some("output scale must be a positive finite number")
                } else {
                    None
                }
            }
            ResourceDesc::Buffer(desc) => {
                (desc.size == 0).then_some("buffer size must be non-zero")
            }
        };

        match reason {
            Some(reason) => Err(RenderGraphError::InvalidResourceDesc {
                resource: resource.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    pub fn memory_requirements(&self) -> MemoryRequirements {
        match self {
            ResourceDesc::Texture(desc) => {
                let alignment = if desc.sample_count > 1 {
                    MULTISAMPLED_TEXTURE_ALIGNMENT
                } else {
                    TEXTURE_ALIGNMENT
                };
                MemoryRequirements {
                    size: desc.byte_size().next_multiple_of(alignment),
                    alignment,
                    class: MemoryClass::Texture {
                        format: desc.format,
                        dimension: desc.dimension,
                        width: desc.width,
                        height: desc.height,
                        depth_or_array_layers: desc.depth_or_array_layers,
                        mip_level_count: desc.mip_level_count,
                        sample_count: desc.sample_count,
                    },
                }
            }
            ResourceDesc::Buffer(desc) => MemoryRequirements {
                size: desc.size.next_multiple_of(BUFFER_ALIGNMENT),
                alignment: BUFFER_ALIGNMENT,
                class: MemoryClass::Buffer,
            },
        }
    }

    pub fn usage_covers(&self, other: &ResourceDesc) -> bool {
        match (self, other) {
            (ResourceDesc::Texture(ours), ResourceDesc::Texture(theirs)) => {
                ours.usage.contains(theirs.usage)
            }
            (ResourceDesc::Buffer(ours), ResourceDesc::Buffer(theirs)) => {
                ours.usage.contains(theirs.usage)
            }
            _ => false,
        }
    }
}

/// Resources only alias when their classes are equal: textures need a
/// byte-identical layout, buffers only need enough bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemoryClass {
    Texture {
        format: TextureFormat,
        dimension: TextureDimension,
        width: u32,
        height: u32,
        depth_or_array_layers: u32,
        mip_level_count: u32,
        sample_count: u32,
    },
    Buffer,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryRequirements {
    pub size: u64,
    pub alignment: u64,
    pub class: MemoryClass,
}

impl MemoryRequirements {
    pub fn satisfies(&self, request: &MemoryRequirements) -> bool {
        self.class == request.class
            && self.size >= request.size
            && self.alignment >= request.alignment
            && self.alignment % request.alignment == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_texture_follows_output() {
        let desc = TextureDesc::output_relative(TextureFormat::Rgba16Float, 0.5);

        let small = desc.resolve(OutputExtent::new(1280, 720));
        assert_eq!((small.width, small.height), (640, 360));

        let large = desc.resolve(OutputExtent::new(1920, 1080));
        assert_eq!((large.width, large.height), (960, 540));
        assert_eq!(large.output_scale, Some(0.5));
    }

    #[test]
    fn relative_texture_never_collapses_to_zero() {
        let desc = TextureDesc::output_relative(TextureFormat::R8Unorm, 0.01);
        let resolved = desc.resolve(OutputExtent::new(10, 10));
        assert_eq!((resolved.width, resolved.height), (1, 1));
    }

    #[test]
    fn absolute_texture_ignores_output() {
        let desc = TextureDesc::new(TextureFormat::Rgba8Unorm, 256, 128);
        assert_eq!(desc.resolve(OutputExtent::new(1920, 1080)), desc);
    }

    #[test]
    fn texture_requirements() {
        let desc = ResourceDesc::Texture(TextureDesc::new(TextureFormat::Rgba8Unorm, 256, 256));
        let requirements = desc.memory_requirements();
        assert_eq!(requirements.size, 256 * 256 * 4);
        assert_eq!(requirements.alignment, TEXTURE_ALIGNMENT);

        let tiny = ResourceDesc::Texture(TextureDesc::new(TextureFormat::R8Unorm, 4, 4));
        assert_eq!(tiny.memory_requirements().size, TEXTURE_ALIGNMENT);

        let multisampled = ResourceDesc::Texture(
            TextureDesc::new(TextureFormat::Rgba8Unorm, 256, 256).sample_count(4),
        );
        assert_eq!(
            multisampled.memory_requirements().alignment,
            MULTISAMPLED_TEXTURE_ALIGNMENT
        );
    }

    #[test]
    fn mip_chain_adds_up() {
        let desc = ResourceDesc::Texture(
            TextureDesc::new(TextureFormat::R32Float, 512, 512).mip_levels(3),
        );
        let expected = (512 * 512 + 256 * 256 + 128 * 128) * 4;
        assert_eq!(
            desc.memory_requirements().size,
            (expected as u64).next_multiple_of(TEXTURE_ALIGNMENT)
        );
    }

    #[test]
    fn different_formats_never_share_a_class() {
        let a = ResourceDesc::Texture(TextureDesc::new(TextureFormat::Rgba8Unorm, 64, 64));
        let b = ResourceDesc::Texture(TextureDesc::new(TextureFormat::Bgra8Unorm, 64, 64));
        assert!(!a.memory_requirements().satisfies(&b.memory_requirements()));
        assert!(a.memory_requirements().satisfies(&a.memory_requirements()));
    }

    #[test]
    fn larger_buffer_satisfies_smaller() {
        let big = ResourceDesc::Buffer(BufferDesc::new(4096)).memory_requirements();
        let small = ResourceDesc::Buffer(BufferDesc::new(1000)).memory_requirements();
        assert_eq!(small.size, 1024);
        assert!(big.satisfies(&small));
        assert!(!small.satisfies(&big));
    }

    #[test]
    fn invalid_descriptors() {
        let zero = ResourceDesc::Texture(TextureDesc::new(TextureFormat::Rgba8Unorm, 0, 4));
        assert!(matches!(
            zero.validate("zero"),
            Err(RenderGraphError::InvalidResourceDesc { .. })
        ));

        let bad_scale =
            ResourceDesc::Texture(TextureDesc::output_relative(TextureFormat::Rgba8Unorm, 0.0));
        assert!(bad_scale.validate("scale").is_err());

        assert!(ResourceDesc::Buffer(BufferDesc::new(0)).validate("empty").is_err());
        assert!(ResourceDesc::Buffer(BufferDesc::new(4)).validate("ok").is_ok());
    }

    #[test]
    fn usage_coverage() {
        let wide = ResourceDesc::Texture(TextureDesc::new(TextureFormat::Rgba8Unorm, 8, 8).usage(
            TextureUsages::RENDER_ATTACHMENT
                | TextureUsages::TEXTURE_BINDING
                | TextureUsages::STORAGE_BINDING,
        ));
        let narrow = ResourceDesc::Texture(TextureDesc::new(TextureFormat::Rgba8Unorm, 8, 8));
        assert!(wide.usage_covers(&narrow));
        assert!(!narrow.usage_covers(&wide));
        assert!(!wide.usage_covers(&ResourceDesc::Buffer(BufferDesc::new(8))));
    }
}
