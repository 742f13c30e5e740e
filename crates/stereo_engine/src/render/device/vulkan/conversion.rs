//! Conversions from device-interface types to Vulkan types

use ash::vk;

use crate::render::device::{
    BufferUsage, ClearValue, Extent2D, Filter, ImageAspect, ImageLayout, PipelineStage,
    ShaderStages,
};
use crate::render::error::RenderError;

/// Convert buffer usage flags
pub fn buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut result = vk::BufferUsageFlags::empty();

    if usage.contains(BufferUsage::UNIFORM) {
        result |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        result |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::VERTEX) {
        result |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        result |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::TRANSFER_SRC) {
        result |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::TRANSFER_DST) {
        result |= vk::BufferUsageFlags::TRANSFER_DST;
    }

    result
}

/// Convert push constant stages
pub fn shader_stages(stages: ShaderStages) -> vk::ShaderStageFlags {
    let mut result = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStages::VERTEX) {
        result |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        result |= vk::ShaderStageFlags::FRAGMENT;
    }
    result
}

/// Convert an image layout
pub fn image_layout(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ImageLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

/// Accesses that must complete before leaving `layout`, or that wait after
/// entering it
pub fn layout_access(layout: ImageLayout) -> vk::AccessFlags {
    match layout {
        ImageLayout::Undefined | ImageLayout::PresentSrc => vk::AccessFlags::empty(),
        ImageLayout::ColorAttachment => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ImageLayout::DepthAttachment => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ImageLayout::ShaderReadOnly => vk::AccessFlags::SHADER_READ,
        ImageLayout::TransferSrc => vk::AccessFlags::TRANSFER_READ,
        ImageLayout::TransferDst => vk::AccessFlags::TRANSFER_WRITE,
    }
}

/// Convert a pipeline stage
pub fn pipeline_stage(stage: PipelineStage) -> vk::PipelineStageFlags {
    match stage {
        PipelineStage::TopOfPipe => vk::PipelineStageFlags::TOP_OF_PIPE,
        PipelineStage::FragmentShader => vk::PipelineStageFlags::FRAGMENT_SHADER,
        PipelineStage::FragmentTests => {
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        }
        PipelineStage::ColorAttachmentOutput => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        PipelineStage::Transfer => vk::PipelineStageFlags::TRANSFER,
        PipelineStage::BottomOfPipe => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
    }
}

/// Convert an image aspect
pub fn image_aspect(aspect: ImageAspect) -> vk::ImageAspectFlags {
    match aspect {
        ImageAspect::Color => vk::ImageAspectFlags::COLOR,
        ImageAspect::Depth => vk::ImageAspectFlags::DEPTH,
    }
}

/// Convert a blit filter
pub fn filter(filter: Filter) -> vk::Filter {
    match filter {
        Filter::Nearest => vk::Filter::NEAREST,
        Filter::Linear => vk::Filter::LINEAR,
    }
}

/// Convert an attachment clear value
pub fn clear_value(value: ClearValue) -> vk::ClearValue {
    match value {
        ClearValue::Color(float32) => vk::ClearValue {
            color: vk::ClearColorValue { float32 },
        },
        ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
        },
    }
}

/// Convert an extent
pub fn extent(extent: Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: extent.width,
        height: extent.height,
    }
}

/// Far corner of a whole-image blit region
pub fn blit_corner(extent: Extent2D) -> vk::Offset3D {
    vk::Offset3D {
        x: i32::try_from(extent.width).unwrap_or(i32::MAX),
        y: i32::try_from(extent.height).unwrap_or(i32::MAX),
        z: 1,
    }
}

/// Map a Vulkan result code to a render error
pub fn render_error(operation: &'static str, result: vk::Result) -> RenderError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost,
        other => RenderError::Backend(format!("{operation} failed: {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_maps_each_flag() {
        let usage = buffer_usage(BufferUsage::UNIFORM | BufferUsage::STORAGE);
        assert_eq!(
            usage,
            vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER
        );
        assert!(buffer_usage(BufferUsage::empty()).is_empty());
    }

    #[test]
    fn test_shadow_barrier_stages() {
        let tests = pipeline_stage(PipelineStage::FragmentTests);
        assert!(tests.contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
        assert!(tests.contains(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS));
        assert_eq!(
            layout_access(ImageLayout::DepthAttachment),
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
        assert_eq!(layout_access(ImageLayout::ShaderReadOnly), vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn test_blit_corner_covers_whole_image() {
        let corner = blit_corner(Extent2D::new(1280, 720));
        assert_eq!((corner.x, corner.y, corner.z), (1280, 720, 1));
    }

    #[test]
    fn test_device_lost_is_not_a_backend_error() {
        assert_eq!(
            render_error("submit", vk::Result::ERROR_DEVICE_LOST),
            RenderError::DeviceLost
        );
        assert!(matches!(
            render_error("submit", vk::Result::ERROR_OUT_OF_HOST_MEMORY),
            RenderError::Backend(_)
        ));
    }
}
