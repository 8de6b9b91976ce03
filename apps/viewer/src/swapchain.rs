use crate::context::*;
use anyhow::{anyhow, Result};
use spark::{vk, Builder};
use std::cmp;
use std::slice;
use std::str::FromStr;
use strum::{Display, EnumString, EnumVariantNames};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumVariantNames)]
#[strum(serialize_all = "kebab_case")]
pub enum PresentMode {
    Fifo,
    Mailbox,
    Immediate,
}

impl PresentMode {
    fn vk_present_mode(&self) -> vk::PresentModeKHR {
        match self {
            PresentMode::Fifo => vk::PresentModeKHR::FIFO,
            PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        }
    }
}

pub fn try_present_mode_from_str(s: &str) -> Result<PresentMode, String> {
    PresentMode::from_str(s).map_err(|_| format!("unknown present mode `{}`", s))
}

pub struct Swapchain {
    context: SharedContext,
    swapchain: vk::SwapchainKHR,
    surface_format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
}

pub enum SwapchainAcquireResult {
    OutOfDate,
    Suboptimal(u32),
    Ok(u32),
}

impl Swapchain {
    const MIN_IMAGE_COUNT: u32 = 2;
    pub const USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::TRANSFER_DST;

    fn create(
        context: &Context,
        window_extent: vk::Extent2D,
        present_mode: PresentMode,
    ) -> spark::Result<(vk::SwapchainKHR, vk::SurfaceFormatKHR, vk::Extent2D)> {
        let surface_capabilities = unsafe {
            context
                .instance
                .get_physical_device_surface_capabilities_khr(context.physical_device, context.surface)
        }?;
        // a surface that leaves the extent to the swapchain reports u32::MAX
        let extent = if surface_capabilities.current_extent.width == u32::MAX {
            let min = surface_capabilities.min_image_extent;
            let max = surface_capabilities.max_image_extent;
            vk::Extent2D {
                width: window_extent.width.max(min.width).min(max.width),
                height: window_extent.height.max(min.height).min(max.height),
            }
        } else {
            surface_capabilities.current_extent
        };

        let surface_formats = unsafe {
            context
                .instance
                .get_physical_device_surface_formats_khr_to_vec(context.physical_device, context.surface)
        }?;
        let surface_format = surface_formats
            .iter()
            .find(|sf| match (sf.format, sf.color_space) {
                (vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR) => true,
                (vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR) => true,
                _ => false,
            })
            .or_else(|| surface_formats.first())
            .copied()
            .ok_or(vk::Result::ERROR_FORMAT_NOT_SUPPORTED)?;

        let present_modes = unsafe {
            context
                .instance
                .get_physical_device_surface_present_modes_khr_to_vec(context.physical_device, context.surface)
        }?;
        let vk_present_mode = if present_modes.contains(&present_mode.vk_present_mode()) {
            present_mode.vk_present_mode()
        } else {
            vk::PresentModeKHR::FIFO
        };

        let mut min_image_count = cmp::max(Self::MIN_IMAGE_COUNT, surface_capabilities.min_image_count);
        if surface_capabilities.max_image_count != 0 {
            min_image_count = min_image_count.min(surface_capabilities.max_image_count);
        }

        let swapchain_create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(context.surface)
            .min_image_count(min_image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(Self::USAGE)
            .p_queue_family_indices(slice::from_ref(&context.queue_family_index))
            .pre_transform(vk::SurfaceTransformFlagsKHR::IDENTITY)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk_present_mode)
            .clipped(true);
        let swapchain = unsafe { context.device.create_swapchain_khr(&swapchain_create_info, None) }?;

        Ok((swapchain, surface_format, extent))
    }

    pub fn new(context: &SharedContext, window_extent: vk::Extent2D, present_mode: PresentMode) -> Result<Self> {
        let (swapchain, surface_format, extent) = Swapchain::create(context, window_extent, present_mode)
            .map_err(|err| anyhow!("failed to create swapchain: {}", err))?;
        let images = unsafe { context.device.get_swapchain_images_khr_to_vec(swapchain) }
            .map_err(|err| anyhow!("failed to query swapchain images: {}", err))?;

        Ok(Swapchain {
            context: SharedContext::clone(context),
            swapchain,
            surface_format,
            extent,
            images,
        })
    }

    pub fn acquire(&self, image_available_semaphore: vk::Semaphore) -> spark::Result<SwapchainAcquireResult> {
        let res = unsafe {
            self.context
                .device
                .acquire_next_image_khr(self.swapchain, u64::MAX, Some(image_available_semaphore), None)
        };
        match res {
            Ok((vk::Result::SUCCESS, image_index)) => Ok(SwapchainAcquireResult::Ok(image_index)),
            Ok((vk::Result::SUBOPTIMAL_KHR, image_index)) => Ok(SwapchainAcquireResult::Suboptimal(image_index)),
            Ok((err, _)) => Err(err),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SwapchainAcquireResult::OutOfDate),
            Err(err) => Err(err),
        }
    }

    pub fn get_format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn get_extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn get_image(&self, image_index: u32) -> vk::Image {
        self.images[image_index as usize]
    }

    /// Returns false when the surface no longer matches the swapchain.
    pub fn present(&self, image_index: u32, rendering_finished_semaphore: vk::Semaphore) -> spark::Result<bool> {
        let present_info = vk::PresentInfoKHR::builder()
            .p_wait_semaphores(slice::from_ref(&rendering_finished_semaphore))
            .p_swapchains(slice::from_ref(&self.swapchain), slice::from_ref(&image_index));
        match unsafe { self.context.device.queue_present_khr(self.context.queue, &present_info) } {
            Ok(vk::Result::SUCCESS) => Ok(true),
            Ok(vk::Result::SUBOPTIMAL_KHR) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(false),
            Ok(err) | Err(err) => Err(err),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_swapchain_khr(Some(self.swapchain), None);
        }
    }
}
