use anyhow::{anyhow, Result};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle, RawWindowHandle};
use spark::{vk, Instance, InstanceExtensions};
use winit::window::Window;

pub fn enable_extensions(window: &Window, extensions: &mut InstanceExtensions) -> Result<()> {
    match window.raw_window_handle() {
        #[cfg(target_os = "linux")]
        RawWindowHandle::Xlib(..) => extensions.enable_khr_xlib_surface(),

        #[cfg(target_os = "linux")]
        RawWindowHandle::Wayland(..) => extensions.enable_khr_wayland_surface(),

        #[cfg(target_os = "windows")]
        RawWindowHandle::Win32(..) => extensions.enable_khr_win32_surface(),

        handle => return Err(anyhow!("unsupported window handle {:?}", handle)),
    }
    Ok(())
}

pub fn create(instance: &Instance, window: &Window) -> spark::Result<vk::SurfaceKHR> {
    match (window.raw_display_handle(), window.raw_window_handle()) {
        #[cfg(target_os = "linux")]
        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
            let create_info = vk::XlibSurfaceCreateInfoKHR {
                dpy: display.display as _,
                window: handle.window,
                ..Default::default()
            };
            unsafe { instance.create_xlib_surface_khr(&create_info, None) }
        }

        #[cfg(target_os = "linux")]
        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR {
                display: display.display as _,
                surface: handle.surface as _,
                ..Default::default()
            };
            unsafe { instance.create_wayland_surface_khr(&create_info, None) }
        }

        #[cfg(target_os = "windows")]
        (_, RawWindowHandle::Win32(handle)) => {
            let create_info = vk::Win32SurfaceCreateInfoKHR {
                hinstance: handle.hinstance,
                hwnd: handle.hwnd,
                ..Default::default()
            };
            unsafe { instance.create_win32_surface_khr(&create_info, None) }
        }

        _ => Err(vk::Result::ERROR_EXTENSION_NOT_PRESENT),
    }
}
