use std::ffi::CString;
use std::ptr;

use anyhow::{anyhow, Context, Result};
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use shaderc::ShaderKind;
use winit::window::Window;

use crate::caps::Capabilities;
use crate::display::Frame;
use crate::program::{CompileError, Keywords, Material, ProgramCompiler};
use crate::render::config::{
    choose_composite_alpha, choose_extent, choose_present_mode, choose_surface_format,
    desired_image_count, is_srgb, vk_format,
};
use crate::texture::TextureFormat;

/// Enabled on the present shader when the swapchain re-encodes to sRGB.
pub const SRGB_TARGET: &str = "SRGB_TARGET";

#[derive(Clone, Copy, Debug)]
pub struct ShaderSource {
    pub name: &'static str,
    pub kind: ShaderKind,
    pub glsl: &'static str,
    pub keywords: &'static [&'static str],
}

pub const FULLSCREEN_VERT: ShaderSource = ShaderSource {
    name: "fullscreen.vert",
    kind: ShaderKind::Vertex,
    keywords: &[],
    glsl: r#"
#version 450
layout(location = 0) out vec2 v_uv;
vec2 positions[3] = vec2[](
    vec2(-1.0, -1.0),
    vec2( 3.0, -1.0),
    vec2(-1.0,  3.0)
);
vec2 uvs[3] = vec2[](
    vec2(0.0, 0.0),
    vec2(2.0, 0.0),
    vec2(0.0, 2.0)
);
void main() {
    gl_Position = vec4(positions[gl_VertexIndex], 0.0, 1.0);
    v_uv = uvs[gl_VertexIndex];
}
"#,
};

pub const PRESENT_FRAG: ShaderSource = ShaderSource {
    name: "present.frag",
    kind: ShaderKind::Fragment,
    keywords: &[SRGB_TARGET],
    glsl: r#"
#version 450
layout(set = 0, binding = 0) uniform sampler2D u_frame;
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 o_color;

#ifdef SRGB_TARGET
vec3 to_linear(vec3 c) {
    vec3 lo = c / 12.92;
    vec3 hi = pow((c + 0.055) / 1.055, vec3(2.4));
    return mix(hi, lo, lessThanEqual(c, vec3(0.04045)));
}
#endif

void main() {
    // Frame rows are stored bottom first.
    vec4 color = texture(u_frame, vec2(v_uv.x, 1.0 - v_uv.y));
#ifdef SRGB_TARGET
    color.rgb = to_linear(color.rgb);
#endif
    o_color = color;
}
"#,
};

/// GLSL to SPIR-V through shaderc, with keywords passed as macro defines.
pub struct ShadercCompiler {
    compiler: shaderc::Compiler,
}

impl ShadercCompiler {
    pub fn new() -> Result<Self> {
        let compiler = shaderc::Compiler::new().ok_or_else(|| anyhow!("shader compiler missing"))?;
        Ok(Self { compiler })
    }
}

fn check_keywords(source: &ShaderSource, keywords: &Keywords) -> Result<(), CompileError> {
    match keywords
        .iter()
        .find(|kw| !source.keywords.iter().any(|known| known == kw))
    {
        Some(keyword) => Err(CompileError::UnknownKeyword {
            program: source.name.to_owned(),
            keyword: keyword.to_owned(),
        }),
        None => Ok(()),
    }
}

impl ProgramCompiler for ShadercCompiler {
    type Source = ShaderSource;
    type Program = Vec<u32>;

    fn compile(
        &mut self,
        source: &ShaderSource,
        keywords: &Keywords,
    ) -> Result<Vec<u32>, CompileError> {
        check_keywords(source, keywords)?;
        let diagnostic = |log: String| CompileError::Diagnostic {
            program: source.name.to_owned(),
            log,
        };
        let mut options = shaderc::CompileOptions::new()
            .ok_or_else(|| diagnostic("shader options missing".to_owned()))?;
        options.set_optimization_level(shaderc::OptimizationLevel::Performance);
        for keyword in keywords.iter() {
            options.add_macro_definition(keyword, Some("1"));
        }
        let binary = self
            .compiler
            .compile_into_spirv(source.glsl, source.kind, source.name, "main", Some(&options))
            .map_err(|err| diagnostic(err.to_string()))?;
        log::debug!("compiled {} ({} words)", source.name, binary.as_binary().len());
        Ok(binary.as_binary().to_vec())
    }
}

/// Device copy of the latest frame plus its staging buffer.
struct FrameTexture {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    staging_buffer: vk::Buffer,
    staging_memory: vk::DeviceMemory,
    extent: vk::Extent2D,
    layout: vk::ImageLayout,
}

impl FrameTexture {
    const FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

    fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let size = extent.width as vk::DeviceSize * extent.height as vk::DeviceSize * 4;
        let (staging_buffer, staging_memory) = create_buffer(
            instance,
            device,
            physical_device,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let (image, memory) = create_image(
            instance,
            device,
            physical_device,
            extent,
            Self::FORMAT,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        )?;
        let view = create_image_view(device, image, Self::FORMAT)?;
        Ok(Self {
            image,
            memory,
            view,
            staging_buffer,
            staging_memory,
            extent,
            layout: vk::ImageLayout::UNDEFINED,
        })
    }

    fn write(&self, device: &ash::Device, data: &[u8]) -> Result<()> {
        unsafe {
            let mapped = device
                .map_memory(
                    self.staging_memory,
                    0,
                    data.len() as vk::DeviceSize,
                    vk::MemoryMapFlags::empty(),
                )
                .context("map staging buffer")?;
            ptr::copy_nonoverlapping(data.as_ptr(), mapped as *mut u8, data.len());
            device.unmap_memory(self.staging_memory);
        }
        Ok(())
    }

    fn destroy(self, device: &ash::Device) {
        unsafe {
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
            device.destroy_buffer(self.staging_buffer, None);
            device.free_memory(self.staging_memory, None);
        }
    }
}

/// Presents engine frames to a window: uploads the RGBA8 frame and blends
/// it over a transparent swapchain image.
pub struct VulkanPresenter {
    _entry: ash::Entry,
    instance: ash::Instance,
    surface_loader: ash::extensions::khr::Surface,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue_family_index: u32,
    queue: vk::Queue,
    swapchain_loader: ash::extensions::khr::Swapchain,
    swapchain: vk::SwapchainKHR,
    swapchain_image_views: Vec<vk::ImageView>,
    swapchain_framebuffers: Vec<vk::Framebuffer>,
    surface_format: vk::SurfaceFormatKHR,
    swapchain_extent: vk::Extent2D,
    surface_size: (u32, u32),
    needs_recreate: bool,
    render_pass: vk::RenderPass,
    descriptor_set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    sampler: vk::Sampler,
    frame_texture: Option<FrameTexture>,
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight_fence: vk::Fence,
}

impl VulkanPresenter {
    pub fn new(window: &Window) -> Result<Self> {
        let entry = unsafe { ash::Entry::load().context("load Vulkan entry")? };
        let app_name = CString::new("smoke-sim")?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(0)
            .engine_name(&app_name)
            .engine_version(0)
            .api_version(vk::API_VERSION_1_0);
        let extension_names =
            ash_window::enumerate_required_extensions(window.raw_display_handle())
                .context("enumerate required extensions")?;
        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(extension_names);
        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .context("create Vulkan instance")?
        };
        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
            .context("create surface")?
        };
        let surface_loader = ash::extensions::khr::Surface::new(&entry, &instance);
        let (physical_device, queue_family_index) =
            pick_physical_device(&instance, &surface_loader, surface)?;
        let queue_priorities = [1.0_f32];
        let queue_info = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities)
            .build()];
        let device_extensions = [ash::extensions::khr::Swapchain::name().as_ptr()];
        let device_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_info)
            .enabled_extension_names(&device_extensions);
        let device = unsafe {
            instance
                .create_device(physical_device, &device_info, None)
                .context("create logical device")?
        };
        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };
        let swapchain_loader = ash::extensions::khr::Swapchain::new(&instance, &device);
        let formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(physical_device, surface)
                .context("surface formats")?
        };
        let surface_format = choose_surface_format(&formats);
        let surface_size = (window.inner_size().width, window.inner_size().height);
        let (swapchain, swapchain_images, swapchain_extent) = create_swapchain(
            &swapchain_loader,
            &surface_loader,
            surface,
            physical_device,
            surface_format,
            surface_size,
            queue_family_index,
        )?;
        let swapchain_image_views =
            create_image_views(&device, &swapchain_images, surface_format.format)?;
        let render_pass = create_render_pass(&device, surface_format.format)?;

        let mut shaders = ShadercCompiler::new()?;
        let keywords = if is_srgb(surface_format.format) {
            Keywords::none().with(SRGB_TARGET)
        } else {
            Keywords::none()
        };
        let vert_spv = Material::<ShadercCompiler>::new(FULLSCREEN_VERT)
            .program(&mut shaders, &Keywords::none())?;
        let frag_spv =
            Material::<ShadercCompiler>::new(PRESENT_FRAG).program(&mut shaders, &keywords)?;

        let descriptor_set_layout = create_descriptor_set_layout(&device)?;
        let pipeline_layout = create_pipeline_layout(&device, descriptor_set_layout)?;
        let pipeline =
            create_pipeline(&device, render_pass, pipeline_layout, &vert_spv, &frag_spv)?;
        let command_pool = create_command_pool(&device, queue_family_index)?;
        let command_buffer = create_command_buffer(&device, command_pool)?;
        let sampler = create_sampler(&device)?;
        let descriptor_pool = create_descriptor_pool(&device)?;
        let descriptor_set =
            allocate_descriptor_set(&device, descriptor_pool, descriptor_set_layout)?;
        let swapchain_framebuffers = create_framebuffers(
            &device,
            render_pass,
            &swapchain_image_views,
            swapchain_extent,
        )?;
        let (image_available, render_finished, in_flight_fence) = create_sync_objects(&device)?;
        log::info!(
            "presenting {}x{} as {:?}",
            swapchain_extent.width,
            swapchain_extent.height,
            surface_format.format
        );
        Ok(Self {
            _entry: entry,
            instance,
            surface_loader,
            surface,
            physical_device,
            device,
            queue_family_index,
            queue,
            swapchain_loader,
            swapchain,
            swapchain_image_views,
            swapchain_framebuffers,
            surface_format,
            swapchain_extent,
            surface_size,
            needs_recreate: false,
            render_pass,
            descriptor_set_layout,
            pipeline_layout,
            pipeline,
            command_pool,
            command_buffer,
            descriptor_pool,
            descriptor_set,
            sampler,
            frame_texture: None,
            image_available,
            render_finished,
            in_flight_fence,
        })
    }

    /// Field formats the device can render to plus its filtering and size
    /// limits.
    pub fn capabilities(&self) -> Capabilities {
        let features = |format: TextureFormat| unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, vk_format(format))
                .optimal_tiling_features
        };
        let renderable = [
            TextureFormat::R16F,
            TextureFormat::Rg16F,
            TextureFormat::Rgba16F,
            TextureFormat::Rgba32F,
        ]
        .into_iter()
        .filter(|format| {
            features(*format).contains(
                vk::FormatFeatureFlags::COLOR_ATTACHMENT | vk::FormatFeatureFlags::SAMPLED_IMAGE,
            )
        })
        .collect();
        let linear_filtering = features(TextureFormat::Rgba16F)
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR);
        let limits = unsafe {
            self.instance
                .get_physical_device_properties(self.physical_device)
                .limits
        };
        Capabilities {
            renderable,
            linear_filtering,
            max_texture_size: limits.max_image_dimension2_d as usize,
        }
    }

    pub fn present(&mut self, frame: &Frame, window_size: (u32, u32)) -> Result<()> {
        let (width, height) = frame.dims();
        if window_size.0 == 0 || window_size.1 == 0 || width == 0 || height == 0 {
            return Ok(());
        }
        if self.needs_recreate || window_size != self.surface_size {
            self.recreate_swapchain(window_size)?;
        }
        unsafe {
            self.device
                .wait_for_fences(&[self.in_flight_fence], true, u64::MAX)
                .context("wait for in-flight fence")?;
        }
        // Fallible work runs before the acquire and the fence reset.
        let extent = vk::Extent2D {
            width: width as u32,
            height: height as u32,
        };
        self.ensure_frame_texture(extent)?;
        self.frame_texture
            .as_mut()
            .ok_or_else(|| anyhow!("frame texture missing"))?
            .write(&self.device, &frame.to_rgba8())?;
        let image_index = unsafe {
            match self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                self.image_available,
                vk::Fence::null(),
            ) {
                Ok((index, suboptimal)) => {
                    self.needs_recreate |= suboptimal;
                    index
                }
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    self.needs_recreate = true;
                    return Ok(());
                }
                Err(err) => return Err(anyhow!("acquire next image: {err}")),
            }
        };
        let texture = self
            .frame_texture
            .as_mut()
            .ok_or_else(|| anyhow!("frame texture missing"))?;
        if let Err(err) = record_frame_commands(
            &self.device,
            self.command_buffer,
            texture,
            self.render_pass,
            self.swapchain_framebuffers[image_index as usize],
            self.swapchain_extent,
            self.pipeline,
            self.pipeline_layout,
            self.descriptor_set,
        ) {
            self.replace_frame_sync()?;
            return Err(err);
        }

        unsafe {
            self.device
                .reset_fences(&[self.in_flight_fence])
                .context("reset in-flight fence")?;
        }
        let wait_semaphores = [self.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.render_finished];
        let command_buffers = [self.command_buffer];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        let submitted = unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info.build()], self.in_flight_fence)
        };
        if let Err(err) = submitted {
            self.replace_frame_sync()?;
            return Err(anyhow!("queue submit: {err}"));
        }
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        unsafe {
            match self
                .swapchain_loader
                .queue_present(self.queue, &present_info)
            {
                Ok(suboptimal) => {
                    self.needs_recreate |= suboptimal;
                    Ok(())
                }
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    self.needs_recreate = true;
                    Ok(())
                }
                Err(err) => Err(anyhow!("queue present: {err}")),
            }
        }
    }

    /// Swaps in a fresh acquire semaphore and a signaled fence after a
    /// frame that acquired an image but never submitted.
    fn replace_frame_sync(&mut self) -> Result<()> {
        unsafe {
            self.device
                .device_wait_idle()
                .context("wait for device idle")?;
            self.device.destroy_semaphore(self.image_available, None);
            self.device.destroy_fence(self.in_flight_fence, None);
            let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
            self.in_flight_fence = self
                .device
                .create_fence(&fence_info, None)
                .context("create in-flight fence")?;
            self.image_available = self
                .device
                .create_semaphore(&vk::SemaphoreCreateInfo::builder(), None)
                .context("create image available semaphore")?;
        }
        Ok(())
    }

    fn ensure_frame_texture(&mut self, extent: vk::Extent2D) -> Result<()> {
        if self
            .frame_texture
            .as_ref()
            .is_some_and(|texture| texture.extent == extent)
        {
            return Ok(());
        }
        unsafe {
            self.device
                .device_wait_idle()
                .context("wait for device idle")?;
        }
        if let Some(old) = self.frame_texture.take() {
            old.destroy(&self.device);
        }
        let texture =
            FrameTexture::new(&self.instance, &self.device, self.physical_device, extent)?;
        write_descriptor_set(&self.device, self.descriptor_set, texture.view, self.sampler);
        log::debug!("frame texture {}x{}", extent.width, extent.height);
        self.frame_texture = Some(texture);
        Ok(())
    }

    fn recreate_swapchain(&mut self, window_size: (u32, u32)) -> Result<()> {
        unsafe {
            self.device
                .device_wait_idle()
                .context("wait for device idle")?;
        }
        self.destroy_swapchain();
        let (swapchain, images, extent) = create_swapchain(
            &self.swapchain_loader,
            &self.surface_loader,
            self.surface,
            self.physical_device,
            self.surface_format,
            window_size,
            self.queue_family_index,
        )?;
        self.swapchain = swapchain;
        self.swapchain_extent = extent;
        self.swapchain_image_views =
            create_image_views(&self.device, &images, self.surface_format.format)?;
        self.swapchain_framebuffers = create_framebuffers(
            &self.device,
            self.render_pass,
            &self.swapchain_image_views,
            extent,
        )?;
        self.surface_size = window_size;
        self.needs_recreate = false;
        log::debug!("swapchain recreated at {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Leaves null handles behind so a failed recreate is still safe to drop.
    fn destroy_swapchain(&mut self) {
        unsafe {
            for framebuffer in self.swapchain_framebuffers.drain(..) {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            for view in self.swapchain_image_views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            self.swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }
        self.swapchain = vk::SwapchainKHR::null();
    }
}

impl Drop for VulkanPresenter {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            if let Some(texture) = self.frame_texture.take() {
                texture.destroy(&self.device);
            }
            self.device.destroy_fence(self.in_flight_fence, None);
            self.device
                .destroy_semaphore(self.render_finished, None);
            self.device
                .destroy_semaphore(self.image_available, None);
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_pipeline(self.pipeline, None);
            self.device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            self.device
                .destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            self.device
                .destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.destroy_sampler(self.sampler, None);
            self.destroy_swapchain();
            self.device.destroy_render_pass(self.render_pass, None);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}

fn pick_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::extensions::khr::Surface,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32)> {
    let devices = unsafe {
        instance
            .enumerate_physical_devices()
            .context("enumerate physical devices")?
    };
    devices
        .iter()
        .copied()
        .find_map(|device| {
            find_queue_family(instance, surface_loader, surface, device)
                .map(|queue_family_index| (device, queue_family_index))
        })
        .ok_or_else(|| anyhow!("no compatible Vulkan physical device found"))
}

fn find_queue_family(
    instance: &ash::Instance,
    surface_loader: &ash::extensions::khr::Surface,
    surface: vk::SurfaceKHR,
    device: vk::PhysicalDevice,
) -> Option<u32> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    families.iter().enumerate().find_map(|(index, family)| {
        let supports_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let supports_present = unsafe {
            surface_loader
                .get_physical_device_surface_support(device, index as u32, surface)
                .ok()?
        };
        (supports_graphics && supports_present).then_some(index as u32)
    })
}

fn create_swapchain(
    swapchain_loader: &ash::extensions::khr::Swapchain,
    surface_loader: &ash::extensions::khr::Surface,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    surface_format: vk::SurfaceFormatKHR,
    window_size: (u32, u32),
    queue_family_index: u32,
) -> Result<(vk::SwapchainKHR, Vec<vk::Image>, vk::Extent2D)> {
    let capabilities = unsafe {
        surface_loader
            .get_physical_device_surface_capabilities(physical_device, surface)
            .context("surface capabilities")?
    };
    let present_modes = unsafe {
        surface_loader
            .get_physical_device_surface_present_modes(physical_device, surface)
            .context("present modes")?
    };
    let present_mode = choose_present_mode(&present_modes);
    let composite_alpha = choose_composite_alpha(capabilities.supported_composite_alpha);
    if composite_alpha != vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED {
        log::warn!("surface has no premultiplied compositing, using {composite_alpha:?}");
    }
    let extent = choose_extent(&capabilities, window_size);
    let image_count = desired_image_count(&capabilities);
    let indices = [queue_family_index];
    let create_info = vk::SwapchainCreateInfoKHR::builder()
        .surface(surface)
        .min_image_count(image_count)
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        .queue_family_indices(&indices)
        .pre_transform(capabilities.current_transform)
        .composite_alpha(composite_alpha)
        .present_mode(present_mode)
        .clipped(true);
    let swapchain = unsafe {
        swapchain_loader
            .create_swapchain(&create_info, None)
            .context("create swapchain")?
    };
    let images = unsafe {
        swapchain_loader
            .get_swapchain_images(swapchain)
            .context("swapchain images")?
    };
    Ok((swapchain, images, extent))
}

fn create_image_views(
    device: &ash::Device,
    images: &[vk::Image],
    format: vk::Format,
) -> Result<Vec<vk::ImageView>> {
    images
        .iter()
        .map(|image| create_image_view(device, *image, format))
        .collect()
}

fn color_subresource() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(color_subresource());
    unsafe {
        device
            .create_image_view(&create_info, None)
            .context("create image view")
    }
}

fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);
    let color_attachment_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(std::slice::from_ref(&color_attachment_ref));
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
    let attachments = [color_attachment.build()];
    let subpasses = [subpass.build()];
    let dependencies = [dependency.build()];
    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);
    unsafe {
        device
            .create_render_pass(&render_pass_info, None)
            .context("create render pass")
    }
}

fn create_descriptor_set_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
    let binding = vk::DescriptorSetLayoutBinding::builder()
        .binding(0)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::FRAGMENT)
        .build();
    let bindings = [binding];
    let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
    unsafe {
        device
            .create_descriptor_set_layout(&layout_info, None)
            .context("create descriptor set layout")
    }
}

fn create_pipeline_layout(
    device: &ash::Device,
    descriptor_set_layout: vk::DescriptorSetLayout,
) -> Result<vk::PipelineLayout> {
    let layouts = [descriptor_set_layout];
    let pipeline_layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&layouts);
    unsafe {
        device
            .create_pipeline_layout(&pipeline_layout_info, None)
            .context("create pipeline layout")
    }
}

/// Fullscreen triangle with premultiplied-alpha blending; viewport and
/// scissor are dynamic so swapchain resizes keep the pipeline.
fn create_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    pipeline_layout: vk::PipelineLayout,
    vert_spv: &[u32],
    frag_spv: &[u32],
) -> Result<vk::Pipeline> {
    let vert_module = create_shader_module(device, vert_spv)?;
    let frag_module = create_shader_module(device, frag_spv)?;

    let entry = CString::new("main")?;
    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_module)
            .name(&entry)
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_module)
            .name(&entry)
            .build(),
    ];
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder();
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);
    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);
    let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);
    let color_blend_attachment = vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::TRUE,
        src_color_blend_factor: vk::BlendFactor::ONE,
        dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        color_blend_op: vk::BlendOp::ADD,
        src_alpha_blend_factor: vk::BlendFactor::ONE,
        dst_alpha_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        alpha_blend_op: vk::BlendOp::ADD,
        color_write_mask: vk::ColorComponentFlags::RGBA,
    };
    let color_blend_attachments = [color_blend_attachment];
    let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);
    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisample)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(pipeline_layout)
        .render_pass(render_pass)
        .subpass(0);
    let pipelines = unsafe {
        device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
            .map_err(|(_, err)| anyhow!("create graphics pipeline: {err:?}"))
    };
    unsafe {
        device.destroy_shader_module(vert_module, None);
        device.destroy_shader_module(frag_module, None);
    }
    pipelines?
        .first()
        .copied()
        .ok_or_else(|| anyhow!("no graphics pipeline returned"))
}

fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
    unsafe {
        device
            .create_shader_module(&create_info, None)
            .context("create shader module")
    }
}

fn create_sampler(device: &ash::Device) -> Result<vk::Sampler> {
    let sampler_info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
        .max_anisotropy(1.0)
        .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK);
    unsafe {
        device
            .create_sampler(&sampler_info, None)
            .context("create sampler")
    }
}

fn create_descriptor_pool(device: &ash::Device) -> Result<vk::DescriptorPool> {
    let pool_sizes = [vk::DescriptorPoolSize {
        ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        descriptor_count: 1,
    }];
    let pool_info = vk::DescriptorPoolCreateInfo::builder()
        .pool_sizes(&pool_sizes)
        .max_sets(1);
    unsafe {
        device
            .create_descriptor_pool(&pool_info, None)
            .context("create descriptor pool")
    }
}

fn allocate_descriptor_set(
    device: &ash::Device,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set_layout: vk::DescriptorSetLayout,
) -> Result<vk::DescriptorSet> {
    let layouts = [descriptor_set_layout];
    let alloc_info = vk::DescriptorSetAllocateInfo::builder()
        .descriptor_pool(descriptor_pool)
        .set_layouts(&layouts);
    let sets = unsafe {
        device
            .allocate_descriptor_sets(&alloc_info)
            .context("allocate descriptor set")?
    };
    sets.first()
        .copied()
        .ok_or_else(|| anyhow!("no descriptor set returned"))
}

fn write_descriptor_set(
    device: &ash::Device,
    descriptor_set: vk::DescriptorSet,
    image_view: vk::ImageView,
    sampler: vk::Sampler,
) {
    let image_info = vk::DescriptorImageInfo::builder()
        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .image_view(image_view)
        .sampler(sampler);
    let write = vk::WriteDescriptorSet::builder()
        .dst_set(descriptor_set)
        .dst_binding(0)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(std::slice::from_ref(&image_info));
    unsafe {
        device.update_descriptor_sets(&[write.build()], &[]);
    }
}

fn create_buffer(
    instance: &ash::Instance,
    device: &ash::Device,
    physical_device: vk::PhysicalDevice,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let buffer = unsafe {
        device
            .create_buffer(&buffer_info, None)
            .context("create buffer")?
    };
    let mem_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
    let memory_type = find_memory_type(instance, physical_device, mem_requirements, properties)?;
    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(mem_requirements.size)
        .memory_type_index(memory_type);
    let memory = unsafe {
        device
            .allocate_memory(&alloc_info, None)
            .context("allocate buffer memory")?
    };
    unsafe {
        device
            .bind_buffer_memory(buffer, memory, 0)
            .context("bind buffer memory")?;
    }
    Ok((buffer, memory))
}

fn create_image(
    instance: &ash::Instance,
    device: &ash::Device,
    physical_device: vk::PhysicalDevice,
    extent: vk::Extent2D,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
) -> Result<(vk::Image, vk::DeviceMemory)> {
    let image_info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);
    let image = unsafe {
        device
            .create_image(&image_info, None)
            .context("create image")?
    };
    let mem_requirements = unsafe { device.get_image_memory_requirements(image) };
    let memory_type = find_memory_type(
        instance,
        physical_device,
        mem_requirements,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(mem_requirements.size)
        .memory_type_index(memory_type);
    let memory = unsafe {
        device
            .allocate_memory(&alloc_info, None)
            .context("allocate image memory")?
    };
    unsafe {
        device
            .bind_image_memory(image, memory, 0)
            .context("bind image memory")?;
    }
    Ok((image, memory))
}

fn find_memory_type(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32> {
    let mem_properties =
        unsafe { instance.get_physical_device_memory_properties(physical_device) };
    mem_properties.memory_types[..mem_properties.memory_type_count as usize]
        .iter()
        .enumerate()
        .find(|(index, mem_type)| {
            requirements.memory_type_bits & (1 << index) != 0
                && mem_type.property_flags.contains(properties)
        })
        .map(|(index, _)| index as u32)
        .ok_or_else(|| anyhow!("no suitable memory type found"))
}

fn layout_transition_params(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Result<(
    vk::PipelineStageFlags,
    vk::PipelineStageFlags,
    vk::AccessFlags,
    vk::AccessFlags,
)> {
    match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok((
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
        )),
        (vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok((
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::SHADER_READ,
            vk::AccessFlags::TRANSFER_WRITE,
        )),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => Ok((
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
        )),
        _ => Err(anyhow!(
            "unsupported layout transition {old_layout:?} -> {new_layout:?}"
        )),
    }
}

fn cmd_transition(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Result<()> {
    let (src_stage, dst_stage, src_access, dst_access) =
        layout_transition_params(old_layout, new_layout)?;
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .image(image)
        .subresource_range(color_subresource());
    unsafe {
        device.cmd_pipeline_barrier(
            command_buffer,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier.build()],
        );
    }
    Ok(())
}

/// Records upload of the staged frame followed by the fullscreen draw into
/// the framebuffer of the acquired swapchain image.
#[allow(clippy::too_many_arguments)]
fn record_frame_commands(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    texture: &mut FrameTexture,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    descriptor_set: vk::DescriptorSet,
) -> Result<()> {
    let begin_info =
        vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe {
        device
            .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
            .context("reset command buffer")?;
        device
            .begin_command_buffer(command_buffer, &begin_info)
            .context("begin command buffer")?;
    }
    cmd_transition(
        device,
        command_buffer,
        texture.image,
        texture.layout,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    )?;
    let region = vk::BufferImageCopy::builder()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
        .image_extent(vk::Extent3D {
            width: texture.extent.width,
            height: texture.extent.height,
            depth: 1,
        });
    unsafe {
        device.cmd_copy_buffer_to_image(
            command_buffer,
            texture.staging_buffer,
            texture.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region.build()],
        );
    }
    cmd_transition(
        device,
        command_buffer,
        texture.image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )?;
    texture.layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;

    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: [0.0, 0.0, 0.0, 0.0],
        },
    }];
    let render_area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    let render_pass_info = vk::RenderPassBeginInfo::builder()
        .render_pass(render_pass)
        .framebuffer(framebuffer)
        .render_area(render_area)
        .clear_values(&clear_values);
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    unsafe {
        device.cmd_begin_render_pass(
            command_buffer,
            &render_pass_info,
            vk::SubpassContents::INLINE,
        );
        device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
        device.cmd_set_viewport(command_buffer, 0, &[viewport]);
        device.cmd_set_scissor(command_buffer, 0, &[render_area]);
        device.cmd_bind_descriptor_sets(
            command_buffer,
            vk::PipelineBindPoint::GRAPHICS,
            pipeline_layout,
            0,
            &[descriptor_set],
            &[],
        );
        device.cmd_draw(command_buffer, 3, 1, 0, 0);
        device.cmd_end_render_pass(command_buffer);
        device
            .end_command_buffer(command_buffer)
            .context("end command buffer")?;
    }
    Ok(())
}

fn create_framebuffers(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    image_views: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    image_views
        .iter()
        .map(|view| {
            let attachments = [*view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            unsafe {
                device
                    .create_framebuffer(&framebuffer_info, None)
                    .context("create framebuffer")
            }
        })
        .collect()
}

fn create_command_pool(device: &ash::Device, queue_family_index: u32) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::builder()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
    unsafe {
        device
            .create_command_pool(&pool_info, None)
            .context("create command pool")
    }
}

fn create_command_buffer(
    device: &ash::Device,
    command_pool: vk::CommandPool,
) -> Result<vk::CommandBuffer> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);
    let buffers = unsafe {
        device
            .allocate_command_buffers(&alloc_info)
            .context("allocate command buffer")?
    };
    buffers
        .first()
        .copied()
        .ok_or_else(|| anyhow!("no command buffer returned"))
}

fn create_sync_objects(device: &ash::Device) -> Result<(vk::Semaphore, vk::Semaphore, vk::Fence)> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();
    let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
    let image_available = unsafe {
        device
            .create_semaphore(&semaphore_info, None)
            .context("create image available semaphore")?
    };
    let render_finished = unsafe {
        device
            .create_semaphore(&semaphore_info, None)
            .context("create render finished semaphore")?
    };
    let in_flight_fence = unsafe {
        device
            .create_fence(&fence_info, None)
            .context("create in-flight fence")?
    };
    Ok((image_available, render_finished, in_flight_fence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_shader_rejects_unknown_keyword() {
        let err = check_keywords(&PRESENT_FRAG, &Keywords::none().with("HDR")).unwrap_err();
        assert_eq!(
            err,
            CompileError::UnknownKeyword {
                program: "present.frag".into(),
                keyword: "HDR".into(),
            }
        );
        assert!(check_keywords(&PRESENT_FRAG, &Keywords::none().with(SRGB_TARGET)).is_ok());
        assert!(check_keywords(&FULLSCREEN_VERT, &Keywords::none().with(SRGB_TARGET)).is_err());
    }

    #[test]
    fn shaders_compile_for_each_variant() {
        let mut compiler = ShadercCompiler::new().unwrap();
        let mut frag = Material::<ShadercCompiler>::new(PRESENT_FRAG);
        let plain = frag.program(&mut compiler, &Keywords::none()).unwrap();
        let srgb = frag
            .program(&mut compiler, &Keywords::none().with(SRGB_TARGET))
            .unwrap();
        assert_ne!(plain, srgb);
        assert_eq!(frag.variant_count(), 2);
        let vert = Material::<ShadercCompiler>::new(FULLSCREEN_VERT)
            .program(&mut compiler, &Keywords::none())
            .unwrap();
        // SPIR-V magic number.
        assert_eq!(vert[0], 0x0723_0203);
    }

    #[test]
    fn broken_source_reports_diagnostic() {
        let broken = ShaderSource {
            name: "broken.frag",
            kind: ShaderKind::Fragment,
            keywords: &[],
            glsl: "#version 450\nvoid main() { undefined_call(); }\n",
        };
        let mut compiler = ShadercCompiler::new().unwrap();
        let err = compiler.compile(&broken, &Keywords::none()).unwrap_err();
        assert!(matches!(
            err,
            CompileError::Diagnostic { ref program, .. } if program == "broken.frag"
        ));
    }
}
