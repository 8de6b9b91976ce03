use crate::context::*;
use spark::{vk, Builder};
use std::slice;

struct CommandBufferSet {
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
}

impl CommandBufferSet {
    fn new(context: &Context) -> spark::Result<Self> {
        let device = &context.device;

        let pool = {
            let command_pool_create_info = vk::CommandPoolCreateInfo {
                queue_family_index: context.queue_family_index,
                ..Default::default()
            };
            unsafe { device.create_command_pool(&command_pool_create_info, None) }?
        };

        let cmd = {
            let command_buffer_allocate_info = vk::CommandBufferAllocateInfo {
                command_pool: Some(pool),
                level: vk::CommandBufferLevel::PRIMARY,
                command_buffer_count: 1,
                ..Default::default()
            };
            let command_buffers: [vk::CommandBuffer; 1] =
                unsafe { device.allocate_command_buffers_array(&command_buffer_allocate_info) }?;
            command_buffers[0]
        };

        let fence = {
            let fence_create_info = vk::FenceCreateInfo {
                flags: vk::FenceCreateFlags::SIGNALED,
                ..Default::default()
            };
            unsafe { device.create_fence(&fence_create_info, None) }?
        };

        Ok(Self { pool, cmd, fence })
    }

    fn wait(&self, context: &Context) -> spark::Result<()> {
        let timeout_ns = 1000 * 1000 * 1000;
        loop {
            let res = unsafe { context.device.wait_for_fences(slice::from_ref(&self.fence), true, timeout_ns) };
            match res {
                Ok(_) => break Ok(()),
                Err(vk::Result::TIMEOUT) => {}
                Err(err) => break Err(err),
            }
        }
    }

    fn begin(&self, context: &Context) -> spark::Result<vk::CommandBuffer> {
        self.wait(context)?;
        unsafe {
            context.device.reset_fences(slice::from_ref(&self.fence))?;
            context
                .device
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
        }

        let command_buffer_begin_info = vk::CommandBufferBeginInfo {
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        unsafe { context.device.begin_command_buffer(self.cmd, &command_buffer_begin_info) }?;
        Ok(self.cmd)
    }

    fn destroy(&self, context: &Context) {
        let device = &context.device;
        unsafe {
            device.destroy_fence(Some(self.fence), None);
            device.free_command_buffers(self.pool, slice::from_ref(&self.cmd));
            device.destroy_command_pool(Some(self.pool), None);
        }
    }
}

/// One command buffer for the frame in flight and one for blocking setup work.
pub struct CommandBufferPool {
    context: SharedContext,
    frame: CommandBufferSet,
    setup: CommandBufferSet,
    image_available_semaphore: vk::Semaphore,
    rendering_finished_semaphore: vk::Semaphore,
}

impl CommandBufferPool {
    pub fn new(context: &SharedContext) -> spark::Result<Self> {
        let frame = CommandBufferSet::new(context)?;
        let setup = CommandBufferSet::new(context)?;
        let image_available_semaphore = unsafe { context.device.create_semaphore(&Default::default(), None) }?;
        let rendering_finished_semaphore = unsafe { context.device.create_semaphore(&Default::default(), None) }?;
        Ok(Self {
            context: SharedContext::clone(context),
            frame,
            setup,
            image_available_semaphore,
            rendering_finished_semaphore,
        })
    }

    pub fn image_available_semaphore(&self) -> vk::Semaphore {
        self.image_available_semaphore
    }

    pub fn begin_frame(&self) -> spark::Result<vk::CommandBuffer> {
        self.frame.begin(&self.context)
    }

    /// Submits the frame, synchronising with the acquired image when there is one.
    ///
    /// Returns the semaphore that presentation must wait on.
    pub fn submit_frame(&self, acquired: bool) -> spark::Result<Option<vk::Semaphore>> {
        let device = &self.context.device;
        unsafe { device.end_command_buffer(self.frame.cmd) }?;

        let mut submit_info = vk::SubmitInfo::builder().p_command_buffers(slice::from_ref(&self.frame.cmd));
        if acquired {
            submit_info = submit_info
                .p_wait_semaphores(
                    slice::from_ref(&self.image_available_semaphore),
                    slice::from_ref(&vk::PipelineStageFlags::TRANSFER),
                )
                .p_signal_semaphores(slice::from_ref(&self.rendering_finished_semaphore));
        }
        unsafe { device.queue_submit(self.context.queue, slice::from_ref(&*submit_info), Some(self.frame.fence)) }?;
        Ok(if acquired {
            Some(self.rendering_finished_semaphore)
        } else {
            None
        })
    }

    pub fn wait_frame(&self) -> spark::Result<()> {
        self.frame.wait(&self.context)
    }

    /// Records and runs setup commands, blocking until they complete.
    pub fn run_setup<F>(&self, f: F) -> spark::Result<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let device = &self.context.device;
        let cmd = self.setup.begin(&self.context)?;
        f(cmd);
        unsafe { device.end_command_buffer(cmd) }?;

        let submit_info = vk::SubmitInfo::builder().p_command_buffers(slice::from_ref(&cmd));
        unsafe { device.queue_submit(self.context.queue, slice::from_ref(&*submit_info), Some(self.setup.fence)) }?;
        self.setup.wait(&self.context)
    }
}

impl Drop for CommandBufferPool {
    fn drop(&mut self) {
        let device = &self.context.device;
        unsafe {
            device.destroy_semaphore(Some(self.rendering_finished_semaphore), None);
            device.destroy_semaphore(Some(self.image_available_semaphore), None);
        }
        self.setup.destroy(&self.context);
        self.frame.destroy(&self.context);
    }
}
