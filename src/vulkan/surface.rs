use std::ffi::CStr;

use ash::{khr, vk};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};

use crate::{Error, Result};

/// A window the backend can present to.
pub trait PresentationTarget: HasWindowHandle + HasDisplayHandle + Send + Sync {
    /// Current drawable size in pixels. Zero while minimized.
    fn extent(&self) -> [u32; 2];
}

fn display_handle(target: &dyn PresentationTarget) -> Result<RawDisplayHandle> {
    target
        .display_handle()
        .map(|handle| handle.as_raw())
        .map_err(|_| Error::Unsupported("display handle unavailable"))
}

/// Instance extensions needed to create a surface on `target`'s display.
pub(crate) fn required_extensions(
    target: &dyn PresentationTarget,
) -> Result<[&'static CStr; 2]> {
    let platform = match display_handle(target)? {
        RawDisplayHandle::Windows(_) => khr::win32_surface::NAME,
        RawDisplayHandle::Wayland(_) => khr::wayland_surface::NAME,
        RawDisplayHandle::Xlib(_) => khr::xlib_surface::NAME,
        RawDisplayHandle::Xcb(_) => khr::xcb_surface::NAME,
        RawDisplayHandle::Android(_) => khr::android_surface::NAME,
        _ => return Err(Error::Unsupported("windowing system")),
    };
    Ok([khr::surface::NAME, platform])
}

/// # Safety
/// `instance` must have been created with [`required_extensions`] for `target`, and
/// `target` must outlive the returned surface.
pub(crate) unsafe fn create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    target: &dyn PresentationTarget,
) -> Result<vk::SurfaceKHR> {
    let window = target
        .window_handle()
        .map_err(|_| Error::Unsupported("window handle unavailable"))?
        .as_raw();
    let surface = match (display_handle(target)?, window) {
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(window)) => unsafe {
            khr::win32_surface::Instance::new(entry, instance).create_win32_surface(
                &vk::Win32SurfaceCreateInfoKHR {
                    hinstance: window.hinstance.map_or(0, |h| h.get()) as vk::HINSTANCE,
                    hwnd: window.hwnd.get() as vk::HWND,
                    ..Default::default()
                },
                None,
            )
        },
        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(window)) => unsafe {
            khr::wayland_surface::Instance::new(entry, instance).create_wayland_surface(
                &vk::WaylandSurfaceCreateInfoKHR {
                    display: display.display.as_ptr(),
                    surface: window.surface.as_ptr(),
                    ..Default::default()
                },
                None,
            )
        },
        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(window)) => unsafe {
            khr::xlib_surface::Instance::new(entry, instance).create_xlib_surface(
                &vk::XlibSurfaceCreateInfoKHR {
                    dpy: display
                        .display
                        .map_or(std::ptr::null_mut(), |d| d.as_ptr())
                        .cast(),
                    window: window.window,
                    ..Default::default()
                },
                None,
            )
        },
        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(window)) => unsafe {
            khr::xcb_surface::Instance::new(entry, instance).create_xcb_surface(
                &vk::XcbSurfaceCreateInfoKHR {
                    connection: display
                        .connection
                        .map_or(std::ptr::null_mut(), |c| c.as_ptr()),
                    window: window.window.get(),
                    ..Default::default()
                },
                None,
            )
        },
        (RawDisplayHandle::Android(_), RawWindowHandle::AndroidNdk(window)) => unsafe {
            khr::android_surface::Instance::new(entry, instance).create_android_surface(
                &vk::AndroidSurfaceCreateInfoKHR {
                    window: window.a_native_window.as_ptr(),
                    ..Default::default()
                },
                None,
            )
        },
        _ => return Err(Error::Unsupported("windowing system")),
    };
    Ok(surface?)
}

pub(crate) fn has_presentation_support(
    surface_fn: &khr::surface::Instance,
    pdevice: vk::PhysicalDevice,
    queue_family: u32,
    surface: vk::SurfaceKHR,
) -> bool {
    unsafe { surface_fn.get_physical_device_surface_support(pdevice, queue_family, surface) }
        .unwrap_or(false)
}
