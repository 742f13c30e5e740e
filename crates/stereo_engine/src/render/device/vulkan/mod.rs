//! Vulkan graphics device
//!
//! Implements [`GraphicsDevice`] over `ash` with buffer and image memory from
//! the Vulkan Memory Allocator. Instance, device, queue and swapchain are
//! created by the embedding application (usually through the XR runtime)
//! and handed over in [`VulkanDeviceCreateInfo`]. Setup objects such as
//! render passes and pipelines are built with the raw device and brought in
//! through the `import_*` methods.
//!
//! Handles are the raw Vulkan handle values (`vk::Handle::as_raw`), so a
//! handle converts back to its Vulkan object without a lookup. Buffers,
//! owned images and command contexts also keep side tables for their
//! allocations and pools.

use std::collections::HashMap;
use std::time::Duration;

use ash::extensions::khr::Swapchain;
use ash::vk::{self, Handle};
use vk_mem::Alloc as _;

use super::{
    BufferDesc, BufferHandle, Command, CommandContextHandle, DescriptorBinding, DescriptorKind,
    DescriptorSetHandle, DescriptorSetLayoutHandle, Extent2D, FenceHandle, FramebufferHandle,
    GraphicsDevice, ImageBarrier, ImageHandle, ImageViewHandle, MemoryLocation, PipelineHandle,
    PipelineLayoutHandle, RenderPassHandle, SemaphoreHandle, Submission,
};
use crate::render::error::{RenderError, RenderResult};

pub mod conversion;

use conversion::render_error;

/// Externally created Vulkan objects the device is built from
pub struct VulkanDeviceCreateInfo {
    /// Instance the device was created from
    pub instance: ash::Instance,
    /// Physical device
    pub physical_device: vk::PhysicalDevice,
    /// Logical device
    pub device: ash::Device,
    /// Graphics queue, also used for presentation
    pub queue: vk::Queue,
    /// Family of `queue`
    pub queue_family_index: u32,
    /// Swapchain extension loader
    pub swapchain_loader: Swapchain,
    /// Presentation swapchain
    pub swapchain: vk::SwapchainKHR,
    /// Size of the swapchain images
    pub swapchain_extent: Extent2D,
    /// Descriptor sets the internal pool can hold
    pub max_descriptor_sets: u32,
}

struct VulkanBuffer {
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: usize,
    location: MemoryLocation,
    mapped: Option<*mut u8>,
}

#[derive(Clone, Copy)]
struct CommandContext {
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
}

/// [`GraphicsDevice`] over a Vulkan logical device
pub struct VulkanDevice {
    device: ash::Device,
    allocator: vk_mem::Allocator,
    queue: vk::Queue,
    queue_family_index: u32,
    swapchain_loader: Swapchain,
    swapchain: vk::SwapchainKHR,
    swapchain_images: Vec<ImageHandle>,
    swapchain_extent: Extent2D,
    descriptor_pool: vk::DescriptorPool,
    buffers: HashMap<BufferHandle, VulkanBuffer>,
    images: HashMap<ImageHandle, vk_mem::Allocation>,
    contexts: HashMap<CommandContextHandle, CommandContext>,
}

impl VulkanDevice {
    /// Wrap externally created Vulkan objects
    ///
    /// The device does not take ownership of the instance, logical device or
    /// swapchain; they must outlive it.
    pub fn new(info: VulkanDeviceCreateInfo) -> RenderResult<Self> {
        let allocator = vk_mem::Allocator::new(vk_mem::AllocatorCreateInfo::new(
            &info.instance,
            &info.device,
            info.physical_device,
        ))
        .map_err(|e| {
            RenderError::ResourceCreationFailed(format!("memory allocator: {e:?}"))
        })?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: info.max_descriptor_sets * 2,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: info.max_descriptor_sets * 2,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: info.max_descriptor_sets,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(info.max_descriptor_sets)
            .pool_sizes(&pool_sizes);
        let descriptor_pool = unsafe { info.device.create_descriptor_pool(&pool_info, None) }
            .map_err(|e| render_error("create_descriptor_pool", e))?;

        let swapchain_images = unsafe { info.swapchain_loader.get_swapchain_images(info.swapchain) }
            .map_err(|e| render_error("get_swapchain_images", e))?
            .into_iter()
            .map(|image| ImageHandle(image.as_raw()))
            .collect::<Vec<_>>();

        log::info!(
            "Vulkan device ready: {} swapchain images at {}x{}",
            swapchain_images.len(),
            info.swapchain_extent.width,
            info.swapchain_extent.height
        );

        Ok(Self {
            device: info.device,
            allocator,
            queue: info.queue,
            queue_family_index: info.queue_family_index,
            swapchain_loader: info.swapchain_loader,
            swapchain: info.swapchain,
            swapchain_images,
            swapchain_extent: info.swapchain_extent,
            descriptor_pool,
            buffers: HashMap::new(),
            images: HashMap::new(),
            contexts: HashMap::new(),
        })
    }

    /// Raw logical device for setup-time object creation
    pub fn raw_device(&self) -> &ash::Device {
        &self.device
    }

    /// Pool that descriptor sets are allocated from
    ///
    /// Sets allocated here externally can be freed through
    /// [`GraphicsDevice::free_descriptor_set`].
    pub fn descriptor_pool(&self) -> vk::DescriptorPool {
        self.descriptor_pool
    }

    /// Create a device-local image backed by an allocator allocation
    pub fn create_image(&mut self, info: &vk::ImageCreateInfo) -> RenderResult<ImageHandle> {
        let alloc_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (image, allocation) = unsafe { self.allocator.create_image(info, &alloc_info) }
            .map_err(|e| render_error("create_image", e))?;

        let handle = ImageHandle(image.as_raw());
        self.images.insert(handle, allocation);
        Ok(handle)
    }

    /// Adopt an externally created image view
    pub fn import_image_view(&self, view: vk::ImageView) -> ImageViewHandle {
        ImageViewHandle(view.as_raw())
    }

    /// Adopt an externally created framebuffer
    pub fn import_framebuffer(&self, framebuffer: vk::Framebuffer) -> FramebufferHandle {
        FramebufferHandle(framebuffer.as_raw())
    }

    /// Adopt an externally created render pass
    pub fn import_render_pass(&self, render_pass: vk::RenderPass) -> RenderPassHandle {
        RenderPassHandle(render_pass.as_raw())
    }

    /// Adopt an externally created graphics pipeline
    pub fn import_pipeline(&self, pipeline: vk::Pipeline) -> PipelineHandle {
        PipelineHandle(pipeline.as_raw())
    }

    /// Adopt an externally created pipeline layout
    pub fn import_pipeline_layout(&self, layout: vk::PipelineLayout) -> PipelineLayoutHandle {
        PipelineLayoutHandle(layout.as_raw())
    }

    /// Adopt an externally created descriptor set layout
    pub fn import_descriptor_set_layout(
        &self,
        layout: vk::DescriptorSetLayout,
    ) -> DescriptorSetLayoutHandle {
        DescriptorSetLayoutHandle(layout.as_raw())
    }

    /// Adopt a descriptor set allocated from [`Self::descriptor_pool`]
    pub fn import_descriptor_set(&self, set: vk::DescriptorSet) -> DescriptorSetHandle {
        DescriptorSetHandle(set.as_raw())
    }

    fn command_buffer(&self, context: CommandContextHandle) -> RenderResult<vk::CommandBuffer> {
        self.contexts
            .get(&context)
            .map(|ctx| ctx.buffer)
            .ok_or_else(|| RenderError::invalid(format!("unknown command context {context:?}")))
    }

    fn record_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier) {
        let image_barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(conversion::image_layout(barrier.old_layout))
            .new_layout(conversion::image_layout(barrier.new_layout))
            .src_access_mask(conversion::layout_access(barrier.old_layout))
            .dst_access_mask(conversion::layout_access(barrier.new_layout))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(vk::Image::from_raw(barrier.image.0))
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: conversion::image_aspect(barrier.aspect),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .build();

        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                conversion::pipeline_stage(barrier.src_stage),
                conversion::pipeline_stage(barrier.dst_stage),
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[image_barrier],
            );
        }
    }
}

fn timeout_nanos(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

fn color_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    }
}

impl GraphicsDevice for VulkanDevice {
    fn create_buffer(&mut self, desc: &BufferDesc) -> RenderResult<BufferHandle> {
        let size = usize::try_from(desc.size)
            .map_err(|_| RenderError::invalid(format!("buffer '{}' too large", desc.label)))?;
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(desc.size)
            .usage(conversion::buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let alloc_info = match desc.location {
            MemoryLocation::CpuToGpu => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::Auto,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                required_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT,
                ..Default::default()
            },
            MemoryLocation::GpuOnly => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
        };

        let (buffer, allocation) = unsafe { self.allocator.create_buffer(&buffer_info, &alloc_info) }
            .map_err(|e| {
                RenderError::ResourceCreationFailed(format!("buffer '{}': {e:?}", desc.label))
            })?;

        let handle = BufferHandle(buffer.as_raw());
        log::trace!("Created buffer '{}' ({} bytes) as {handle:?}", desc.label, desc.size);
        self.buffers.insert(
            handle,
            VulkanBuffer {
                buffer,
                allocation,
                size,
                location: desc.location,
                mapped: None,
            },
        );
        Ok(handle)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        let Some(mut entry) = self.buffers.remove(&buffer) else {
            log::error!("destroy_buffer: unknown buffer {buffer:?}");
            return;
        };
        unsafe {
            if entry.mapped.is_some() {
                self.allocator.unmap_memory(&mut entry.allocation);
            }
            self.allocator.destroy_buffer(entry.buffer, &mut entry.allocation);
        }
    }

    fn map_buffer(&mut self, buffer: BufferHandle) -> RenderResult<&mut [u8]> {
        let entry = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| RenderError::invalid(format!("unknown buffer {buffer:?}")))?;
        if entry.location != MemoryLocation::CpuToGpu {
            return Err(RenderError::invalid(format!(
                "buffer {buffer:?} is not host visible"
            )));
        }

        let ptr = match entry.mapped {
            Some(ptr) => ptr,
            None => {
                let ptr = unsafe { self.allocator.map_memory(&mut entry.allocation) }
                    .map_err(|e| render_error("map_memory", e))?;
                entry.mapped = Some(ptr);
                ptr
            }
        };
        // The allocation is at least `size` bytes and stays mapped until unmap_buffer.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, entry.size) })
    }

    fn unmap_buffer(&mut self, buffer: BufferHandle) {
        let Some(entry) = self.buffers.get_mut(&buffer) else {
            log::error!("unmap_buffer: unknown buffer {buffer:?}");
            return;
        };
        if entry.mapped.take().is_some() {
            unsafe { self.allocator.unmap_memory(&mut entry.allocation) };
        }
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        let raw = vk::Image::from_raw(image.0);
        match self.images.remove(&image) {
            Some(mut allocation) => unsafe { self.allocator.destroy_image(raw, &mut allocation) },
            None => unsafe { self.device.destroy_image(raw, None) },
        }
    }

    fn destroy_image_view(&mut self, view: ImageViewHandle) {
        unsafe {
            self.device
                .destroy_image_view(vk::ImageView::from_raw(view.0), None);
        }
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        unsafe {
            self.device
                .destroy_framebuffer(vk::Framebuffer::from_raw(framebuffer.0), None);
        }
    }

    fn destroy_render_pass(&mut self, render_pass: RenderPassHandle) {
        unsafe {
            self.device
                .destroy_render_pass(vk::RenderPass::from_raw(render_pass.0), None);
        }
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        unsafe {
            self.device
                .destroy_pipeline(vk::Pipeline::from_raw(pipeline.0), None);
        }
    }

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle) {
        unsafe {
            self.device
                .destroy_pipeline_layout(vk::PipelineLayout::from_raw(layout.0), None);
        }
    }

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) {
        unsafe {
            self.device
                .destroy_descriptor_set_layout(vk::DescriptorSetLayout::from_raw(layout.0), None);
        }
    }

    fn allocate_descriptor_set(
        &mut self,
        layout: DescriptorSetLayoutHandle,
        bindings: &[DescriptorBinding],
    ) -> RenderResult<DescriptorSetHandle> {
        let layouts = [vk::DescriptorSetLayout::from_raw(layout.0)];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&layouts);
        let set = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| render_error("allocate_descriptor_sets", e))?
            .into_iter()
            .next()
            .ok_or_else(|| RenderError::Backend("no descriptor set returned".to_string()))?;

        let buffer_infos = bindings
            .iter()
            .map(|binding| {
                let buffer = self
                    .buffers
                    .get(&binding.buffer)
                    .map(|entry| entry.buffer)
                    .ok_or_else(|| {
                        RenderError::invalid(format!("unknown buffer {:?}", binding.buffer))
                    })?;
                Ok(vk::DescriptorBufferInfo {
                    buffer,
                    offset: 0,
                    range: vk::WHOLE_SIZE,
                })
            })
            .collect::<RenderResult<Vec<_>>>()?;

        let writes = bindings
            .iter()
            .zip(&buffer_infos)
            .map(|(binding, info)| {
                let ty = match binding.kind {
                    DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
                    DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
                };
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(binding.binding)
                    .descriptor_type(ty)
                    .buffer_info(std::slice::from_ref(info))
                    .build()
            })
            .collect::<Vec<_>>();
        unsafe { self.device.update_descriptor_sets(&writes, &[]) };

        Ok(DescriptorSetHandle(set.as_raw()))
    }

    fn free_descriptor_set(&mut self, set: DescriptorSetHandle) {
        let sets = [vk::DescriptorSet::from_raw(set.0)];
        if let Err(e) = unsafe { self.device.free_descriptor_sets(self.descriptor_pool, &sets) } {
            log::error!("free_descriptor_sets failed: {e:?}");
        }
    }

    fn create_command_context(&mut self) -> RenderResult<CommandContextHandle> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(self.queue_family_index);
        let pool = unsafe { self.device.create_command_pool(&pool_info, None) }
            .map_err(|e| render_error("create_command_pool", e))?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffer = match unsafe { self.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) if !buffers.is_empty() => buffers[0],
            Ok(_) => {
                unsafe { self.device.destroy_command_pool(pool, None) };
                return Err(RenderError::Backend("no command buffer returned".to_string()));
            }
            Err(e) => {
                unsafe { self.device.destroy_command_pool(pool, None) };
                return Err(render_error("allocate_command_buffers", e));
            }
        };

        let handle = CommandContextHandle(buffer.as_raw());
        self.contexts.insert(handle, CommandContext { pool, buffer });
        Ok(handle)
    }

    fn destroy_command_context(&mut self, context: CommandContextHandle) {
        match self.contexts.remove(&context) {
            // Destroying the pool frees its command buffer
            Some(ctx) => unsafe { self.device.destroy_command_pool(ctx.pool, None) },
            None => log::error!("destroy_command_context: unknown context {context:?}"),
        }
    }

    fn reset_command_context(&mut self, context: CommandContextHandle) -> RenderResult<()> {
        let pool = self
            .contexts
            .get(&context)
            .map(|ctx| ctx.pool)
            .ok_or_else(|| RenderError::invalid(format!("unknown command context {context:?}")))?;
        unsafe {
            self.device
                .reset_command_pool(pool, vk::CommandPoolResetFlags::empty())
        }
        .map_err(|e| render_error("reset_command_pool", e))
    }

    fn begin_commands(&mut self, context: CommandContextHandle) -> RenderResult<()> {
        let cmd = self.command_buffer(context)?;
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }
            .map_err(|e| render_error("begin_command_buffer", e))
    }

    fn record(&mut self, context: CommandContextHandle, command: &Command) {
        let cmd = match self.command_buffer(context) {
            Ok(cmd) => cmd,
            Err(e) => {
                log::error!("record: {e}");
                return;
            }
        };
        let device = &self.device;

        match command {
            Command::BeginRenderPass {
                render_pass,
                framebuffer,
                extent,
                clear_values,
            } => {
                let clears = clear_values
                    .iter()
                    .copied()
                    .map(conversion::clear_value)
                    .collect::<Vec<_>>();
                let area = vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: conversion::extent(*extent),
                };
                let begin_info = vk::RenderPassBeginInfo::builder()
                    .render_pass(vk::RenderPass::from_raw(render_pass.0))
                    .framebuffer(vk::Framebuffer::from_raw(framebuffer.0))
                    .render_area(area)
                    .clear_values(&clears);
                let viewport = vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: extent.width as f32,
                    height: extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                };
                unsafe {
                    device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
                    device.cmd_set_viewport(cmd, 0, &[viewport]);
                    device.cmd_set_scissor(cmd, 0, &[area]);
                }
            }
            Command::EndRenderPass => unsafe { device.cmd_end_render_pass(cmd) },
            Command::BindPipeline(pipeline) => unsafe {
                device.cmd_bind_pipeline(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    vk::Pipeline::from_raw(pipeline.0),
                );
            },
            Command::BindDescriptorSets {
                layout,
                first_set,
                sets,
            } => {
                let sets = sets
                    .iter()
                    .map(|set| vk::DescriptorSet::from_raw(set.0))
                    .collect::<Vec<_>>();
                unsafe {
                    device.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::GRAPHICS,
                        vk::PipelineLayout::from_raw(layout.0),
                        *first_set,
                        &sets,
                        &[],
                    );
                }
            }
            Command::BindVertexBuffer(buffer) => unsafe {
                device.cmd_bind_vertex_buffers(cmd, 0, &[vk::Buffer::from_raw(buffer.0)], &[0]);
            },
            Command::BindIndexBuffer(buffer) => unsafe {
                device.cmd_bind_index_buffer(
                    cmd,
                    vk::Buffer::from_raw(buffer.0),
                    0,
                    vk::IndexType::UINT32,
                );
            },
            Command::PushConstants {
                layout,
                stages,
                offset,
                data,
            } => unsafe {
                device.cmd_push_constants(
                    cmd,
                    vk::PipelineLayout::from_raw(layout.0),
                    conversion::shader_stages(*stages),
                    *offset,
                    data,
                );
            },
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => unsafe {
                device.cmd_draw(cmd, *vertex_count, *instance_count, *first_vertex, *first_instance);
            },
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => unsafe {
                device.cmd_draw_indexed(
                    cmd,
                    *index_count,
                    *instance_count,
                    *first_index,
                    *vertex_offset,
                    *first_instance,
                );
            },
            Command::PipelineBarrier(barrier) => self.record_barrier(cmd, barrier),
            Command::BlitImage {
                src,
                src_extent,
                dst,
                dst_extent,
                filter,
            } => {
                let region = vk::ImageBlit {
                    src_subresource: color_layers(),
                    src_offsets: [vk::Offset3D::default(), conversion::blit_corner(*src_extent)],
                    dst_subresource: color_layers(),
                    dst_offsets: [vk::Offset3D::default(), conversion::blit_corner(*dst_extent)],
                };
                unsafe {
                    device.cmd_blit_image(
                        cmd,
                        vk::Image::from_raw(src.0),
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        vk::Image::from_raw(dst.0),
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                        conversion::filter(*filter),
                    );
                }
            }
        }
    }

    fn end_commands(&mut self, context: CommandContextHandle) -> RenderResult<()> {
        let cmd = self.command_buffer(context)?;
        unsafe { self.device.end_command_buffer(cmd) }
            .map_err(|e| render_error("end_command_buffer", e))
    }

    fn create_fence(&mut self, signaled: bool) -> RenderResult<FenceHandle> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { self.device.create_fence(&info, None) }
            .map_err(|e| render_error("create_fence", e))?;
        Ok(FenceHandle(fence.as_raw()))
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        unsafe { self.device.destroy_fence(vk::Fence::from_raw(fence.0), None) };
    }

    fn wait_fence(&mut self, fence: FenceHandle, timeout: Duration) -> RenderResult<()> {
        let fences = [vk::Fence::from_raw(fence.0)];
        match unsafe {
            self.device
                .wait_for_fences(&fences, true, timeout_nanos(timeout))
        } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RenderError::Timeout {
                operation: "wait_fence",
                timeout,
            }),
            Err(e) => Err(render_error("wait_for_fences", e)),
        }
    }

    fn reset_fence(&mut self, fence: FenceHandle) -> RenderResult<()> {
        let fences = [vk::Fence::from_raw(fence.0)];
        unsafe { self.device.reset_fences(&fences) }.map_err(|e| render_error("reset_fences", e))
    }

    fn create_semaphore(&mut self) -> RenderResult<SemaphoreHandle> {
        let info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe { self.device.create_semaphore(&info, None) }
            .map_err(|e| render_error("create_semaphore", e))?;
        Ok(SemaphoreHandle(semaphore.as_raw()))
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        unsafe {
            self.device
                .destroy_semaphore(vk::Semaphore::from_raw(semaphore.0), None);
        }
    }

    fn submit(&mut self, submission: &Submission) -> RenderResult<()> {
        let wait_semaphores = [vk::Semaphore::from_raw(submission.wait_semaphore.0)];
        let wait_stages = [conversion::pipeline_stage(submission.wait_stage)];
        let command_buffers = [self.command_buffer(submission.context)?];
        let signal_semaphores = [vk::Semaphore::from_raw(submission.signal_semaphore.0)];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device.queue_submit(
                self.queue,
                &[submit_info],
                vk::Fence::from_raw(submission.fence.0),
            )
        }
        .map_err(|e| render_error("queue_submit", e))
    }

    fn acquire_next_image(
        &mut self,
        signal: SemaphoreHandle,
        timeout: Duration,
    ) -> RenderResult<u32> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout_nanos(timeout),
                vk::Semaphore::from_raw(signal.0),
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::debug!("Swapchain is suboptimal for the surface");
                }
                Ok(index)
            }
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(RenderError::Timeout {
                operation: "acquire_next_image",
                timeout,
            }),
            Err(e) => Err(render_error("acquire_next_image", e)),
        }
    }

    fn present(&mut self, image_index: u32, wait: SemaphoreHandle) -> RenderResult<()> {
        let wait_semaphores = [vk::Semaphore::from_raw(wait.0)];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader.queue_present(self.queue, &present_info) }
            .map(|suboptimal| {
                if suboptimal {
                    log::debug!("Presented to a suboptimal swapchain");
                }
            })
            .map_err(|e| render_error("queue_present", e))
    }

    fn presentation_images(&self) -> &[ImageHandle] {
        &self.swapchain_images
    }

    fn presentation_extent(&self) -> Extent2D {
        self.swapchain_extent
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(|e| render_error("device_wait_idle", e))
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        if !self.buffers.is_empty() || !self.images.is_empty() || !self.contexts.is_empty() {
            log::error!(
                "Vulkan device dropped with {} buffers, {} images and {} command contexts alive",
                self.buffers.len(),
                self.images.len(),
                self.contexts.len()
            );
        }
        unsafe {
            self.device
                .destroy_descriptor_pool(self.descriptor_pool, None);
        }
    }
}
