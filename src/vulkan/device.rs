use std::{
    ffi::{CStr, CString, c_char},
    fmt::Debug,
    mem::ManuallyDrop,
    ops::Deref,
    sync::{Arc, Mutex, MutexGuard},
};

use ash::{khr, vk};

use super::{
    PresentationTarget, VulkanConfig,
    surface::{create_surface, has_presentation_support, required_extensions},
};
use crate::{Error, Result, registry::lock};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
/// Upper bound on live object bindings.
const MAX_BINDINGS: u32 = 4096;

/// The logical device together with its instance, surface, queue and allocator.
///
/// Cheap to clone. Every registry of Vulkan objects holds one as its owner, so the
/// device outlives every object created on it.
#[derive(Clone)]
pub struct Device(Arc<DeviceInner>);

pub(crate) struct DeviceInner {
    _entry: ash::Entry,
    instance: ash::Instance,
    surface_fn: khr::surface::Instance,
    surface: vk::SurfaceKHR,
    pdevice: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    device: ash::Device,
    queue_family: u32,
    queue: Mutex<vk::Queue>,
    allocator: ManuallyDrop<vk_mem::Allocator>,
    swapchain_fn: khr::swapchain::Device,
    accel: Option<AccelSupport>,
    binding_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    descriptor_pool: Mutex<vk::DescriptorPool>,
    /// Transient pool for blocking one-off submissions.
    transient_pool: Mutex<vk::CommandPool>,
}

pub(crate) struct AccelSupport {
    pub(crate) loader: khr::acceleration_structure::Device,
    pub(crate) scratch_alignment: u64,
}

impl Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("handle", &self.0.device.handle())
            .field("queue_family", &self.0.queue_family)
            .field("ray_tracing", &self.0.accel.is_some())
            .finish_non_exhaustive()
    }
}

impl Deref for Device {
    type Target = ash::Device;

    fn deref(&self) -> &ash::Device {
        &self.0.device
    }
}

struct Candidate {
    pdevice: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    queue_family: u32,
    ray_tracing: bool,
}

impl Device {
    /// Create an instance and a surface for `target`, then pick the best physical
    /// device that can render to it.
    pub fn new(config: &VulkanConfig, target: &dyn PresentationTarget) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|_| Error::Unsupported("Vulkan loader not found"))?;
        let instance = create_instance(&entry, config, target)?;
        let surface_fn = khr::surface::Instance::new(&entry, &instance);
        let surface = match unsafe { create_surface(&entry, &instance, target) } {
            Ok(surface) => surface,
            Err(err) => {
                unsafe { instance.destroy_instance(None) };
                return Err(err);
            }
        };
        let candidate = match pick_physical_device(&instance, &surface_fn, surface, config) {
            Ok(candidate) => candidate,
            Err(err) => {
                unsafe {
                    surface_fn.destroy_surface(surface, None);
                    instance.destroy_instance(None);
                }
                return Err(err);
            }
        };
        let name = unsafe { CStr::from_ptr(candidate.properties.device_name.as_ptr()) };
        tracing::info!(
            device = ?name,
            queue_family = candidate.queue_family,
            ray_tracing = candidate.ray_tracing,
            "Creating device"
        );

        let device = match create_logical_device(&instance, &candidate) {
            Ok(device) => device,
            Err(err) => {
                unsafe {
                    surface_fn.destroy_surface(surface, None);
                    instance.destroy_instance(None);
                }
                return Err(err);
            }
        };
        let queue = unsafe { device.get_device_queue(candidate.queue_family, 0) };

        let mut allocator_info =
            vk_mem::AllocatorCreateInfo::new(&instance, &device, candidate.pdevice);
        allocator_info.vulkan_api_version = vk::API_VERSION_1_2;
        if candidate.ray_tracing {
            allocator_info.flags |= vk_mem::AllocatorCreateFlags::BUFFER_DEVICE_ADDRESS;
        }
        let allocator = match unsafe { vk_mem::Allocator::new(allocator_info) } {
            Ok(allocator) => allocator,
            Err(err) => {
                unsafe {
                    device.destroy_device(None);
                    surface_fn.destroy_surface(surface, None);
                    instance.destroy_instance(None);
                }
                return Err(err.into());
            }
        };

        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(candidate.pdevice) };
        // From here on a failure drops `inner`, which tears down what was created.
        let mut inner = DeviceInner {
            swapchain_fn: khr::swapchain::Device::new(&instance, &device),
            accel: candidate.ray_tracing.then(|| AccelSupport {
                loader: khr::acceleration_structure::Device::new(&instance, &device),
                scratch_alignment: scratch_alignment(&instance, candidate.pdevice),
            }),
            _entry: entry,
            instance,
            surface_fn,
            surface,
            pdevice: candidate.pdevice,
            properties: candidate.properties,
            memory_properties,
            queue_family: candidate.queue_family,
            queue: Mutex::new(queue),
            allocator: ManuallyDrop::new(allocator),
            device,
            binding_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            descriptor_pool: Mutex::new(vk::DescriptorPool::null()),
            transient_pool: Mutex::new(vk::CommandPool::null()),
        };
        inner.create_shared_objects()?;
        Ok(Self(Arc::new(inner)))
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.0.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.0.pdevice
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.0.properties
    }

    pub(crate) fn memory_type_flags(&self, memory_type: u32) -> vk::MemoryPropertyFlags {
        self.0
            .memory_properties
            .memory_types_as_slice()
            .get(memory_type as usize)
            .map_or(vk::MemoryPropertyFlags::empty(), |ty| ty.property_flags)
    }

    pub fn queue_family(&self) -> u32 {
        self.0.queue_family
    }

    pub(crate) fn queue(&self) -> MutexGuard<'_, vk::Queue> {
        lock(&self.0.queue)
    }

    pub fn allocator(&self) -> &vk_mem::Allocator {
        &self.0.allocator
    }

    pub(crate) fn surface(&self) -> vk::SurfaceKHR {
        self.0.surface
    }

    pub(crate) fn surface_fn(&self) -> &khr::surface::Instance {
        &self.0.surface_fn
    }

    pub(crate) fn swapchain_fn(&self) -> &khr::swapchain::Device {
        &self.0.swapchain_fn
    }

    pub(crate) fn accel(&self) -> Option<&AccelSupport> {
        self.0.accel.as_ref()
    }

    pub fn supports_ray_tracing(&self) -> bool {
        self.0.accel.is_some()
    }

    /// Layout of the single per-draw constant block every pipeline binds at set 0.
    pub fn binding_layout(&self) -> vk::DescriptorSetLayout {
        self.0.binding_layout
    }

    /// Pipeline layout shared by every graphics pipeline.
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.0.pipeline_layout
    }

    pub(crate) fn descriptor_pool(&self) -> MutexGuard<'_, vk::DescriptorPool> {
        lock(&self.0.descriptor_pool)
    }

    /// Record `f` into a one-off command buffer, submit it and block until it ran.
    pub(crate) fn submit_blocking(&self, f: impl FnOnce(vk::CommandBuffer)) -> Result<()> {
        let pool = lock(&self.0.transient_pool);
        unsafe {
            let command_buffer = self.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::default()
                    .command_pool(*pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1),
            )?[0];
            let result = (|| -> Result<()> {
                self.begin_command_buffer(
                    command_buffer,
                    &vk::CommandBufferBeginInfo::default()
                        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )?;
                f(command_buffer);
                self.end_command_buffer(command_buffer)?;
                let fence = self.create_fence(&vk::FenceCreateInfo::default(), None)?;
                let queue = *self.queue();
                let submitted = self
                    .queue_submit(
                        queue,
                        &[vk::SubmitInfo::default().command_buffers(&[command_buffer])],
                        fence,
                    )
                    .and_then(|()| self.wait_for_fences(&[fence], true, u64::MAX));
                self.destroy_fence(fence, None);
                Ok(submitted?)
            })();
            self.free_command_buffers(*pool, &[command_buffer]);
            result
        }
    }
}

impl DeviceInner {
    fn create_shared_objects(&mut self) -> Result<()> {
        unsafe {
            let bindings = [vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)];
            self.binding_layout = self.device.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings),
                None,
            )?;
            self.pipeline_layout = self.device.create_pipeline_layout(
                &vk::PipelineLayoutCreateInfo::default().set_layouts(&[self.binding_layout]),
                None,
            )?;
            let sizes = [vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: MAX_BINDINGS,
            }];
            *self.descriptor_pool.get_mut().map_err(|_| poisoned())? =
                self.device.create_descriptor_pool(
                    &vk::DescriptorPoolCreateInfo::default()
                        .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
                        .max_sets(MAX_BINDINGS)
                        .pool_sizes(&sizes),
                    None,
                )?;
            *self.transient_pool.get_mut().map_err(|_| poisoned())? =
                self.device.create_command_pool(
                    &vk::CommandPoolCreateInfo::default()
                        .flags(vk::CommandPoolCreateFlags::TRANSIENT)
                        .queue_family_index(self.queue_family),
                    None,
                )?;
        }
        Ok(())
    }
}

fn poisoned() -> Error {
    Error::invariant("device", "lock poisoned during creation")
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        tracing::info!(device = ?self.device.handle(), "drop device");
        let descriptor_pool = *lock(&self.descriptor_pool);
        let transient_pool = *lock(&self.transient_pool);
        // Null handles from a partially created device are ignored by the destroy calls.
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_command_pool(transient_pool, None);
            self.device.destroy_descriptor_pool(descriptor_pool, None);
            self.device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            self.device
                .destroy_descriptor_set_layout(self.binding_layout, None);
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            self.surface_fn.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}

fn create_instance(
    entry: &ash::Entry,
    config: &VulkanConfig,
    target: &dyn PresentationTarget,
) -> Result<ash::Instance> {
    let application_name = CString::new(config.application_name.as_str())
        .map_err(|_| Error::InvalidConfig("application name contains a nul byte".into()))?;
    let app_info = vk::ApplicationInfo::default()
        .application_name(&application_name)
        .engine_name(c"scoria")
        .api_version(vk::API_VERSION_1_2);
    let extensions: Vec<*const c_char> = required_extensions(target)?
        .iter()
        .map(|name| name.as_ptr())
        .collect();

    let mut layers: Vec<*const c_char> = Vec::new();
    if config.validation {
        let available = unsafe { entry.enumerate_instance_layer_properties() }?;
        if available
            .iter()
            .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER))
        {
            layers.push(VALIDATION_LAYER.as_ptr());
        } else {
            tracing::warn!("validation requested but the Khronos layer is not installed");
        }
    }

    let info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);
    Ok(unsafe { entry.create_instance(&info, None) }?)
}

fn has_extensions(instance: &ash::Instance, pdevice: vk::PhysicalDevice, names: &[&CStr]) -> bool {
    let Ok(available) = (unsafe { instance.enumerate_device_extension_properties(pdevice) }) else {
        return false;
    };
    names.iter().all(|name| {
        available
            .iter()
            .any(|ext| ext.extension_name_as_c_str() == Ok(*name))
    })
}

const RAY_TRACING_EXTENSIONS: [&CStr; 2] = [
    khr::acceleration_structure::NAME,
    khr::deferred_host_operations::NAME,
];

fn supports_ray_tracing(instance: &ash::Instance, pdevice: vk::PhysicalDevice) -> bool {
    if !has_extensions(instance, pdevice, &RAY_TRACING_EXTENSIONS) {
        return false;
    }
    let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut accel_features = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
    let mut features = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut features12)
        .push_next(&mut accel_features);
    unsafe { instance.get_physical_device_features2(pdevice, &mut features) };
    features12.buffer_device_address == vk::TRUE
        && accel_features.acceleration_structure == vk::TRUE
}

fn scratch_alignment(instance: &ash::Instance, pdevice: vk::PhysicalDevice) -> u64 {
    let mut accel_properties = vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
    let mut properties = vk::PhysicalDeviceProperties2::default().push_next(&mut accel_properties);
    unsafe { instance.get_physical_device_properties2(pdevice, &mut properties) };
    u64::from(accel_properties.min_acceleration_structure_scratch_offset_alignment).max(1)
}

fn pick_physical_device(
    instance: &ash::Instance,
    surface_fn: &khr::surface::Instance,
    surface: vk::SurfaceKHR,
    config: &VulkanConfig,
) -> Result<Candidate> {
    let pdevices = unsafe { instance.enumerate_physical_devices() }?;
    let candidates = pdevices.into_iter().filter_map(|pdevice| {
        let properties = unsafe { instance.get_physical_device_properties(pdevice) };
        if properties.api_version < vk::API_VERSION_1_2
            || !has_extensions(instance, pdevice, &[khr::swapchain::NAME])
        {
            return None;
        }
        let families =
            unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        let queue_family = families.iter().enumerate().find_map(|(index, family)| {
            let index = index as u32;
            (family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && has_presentation_support(surface_fn, pdevice, index, surface))
            .then_some(index)
        })?;
        let ray_tracing = config.ray_tracing && supports_ray_tracing(instance, pdevice);
        Some(Candidate {
            pdevice,
            properties,
            queue_family,
            ray_tracing,
        })
    });
    let rank = |candidate: &Candidate| {
        let device_type = match candidate.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 3,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
            _ => 0,
        };
        (candidate.ray_tracing == config.ray_tracing, device_type)
    };
    let candidate = candidates
        .max_by_key(rank)
        .ok_or(Error::Unsupported("no device can render to this window"))?;
    if config.ray_tracing && !candidate.ray_tracing {
        tracing::warn!("ray tracing requested but not supported; acceleration structures are disabled");
    }
    Ok(candidate)
}

fn create_logical_device(instance: &ash::Instance, candidate: &Candidate) -> Result<ash::Device> {
    let priorities = [1.0];
    let queue_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(candidate.queue_family)
        .queue_priorities(&priorities);
    let mut extensions = vec![khr::swapchain::NAME.as_ptr()];
    let mut features12 = vk::PhysicalDeviceVulkan12Features::default().buffer_device_address(true);
    let mut accel_features =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default().acceleration_structure(true);
    if candidate.ray_tracing {
        extensions.extend(RAY_TRACING_EXTENSIONS.iter().map(|name| name.as_ptr()));
    }
    let mut info = vk::DeviceCreateInfo::default()
        .queue_create_infos(std::slice::from_ref(&queue_info))
        .enabled_extension_names(&extensions);
    if candidate.ray_tracing {
        info = info
            .push_next(&mut features12)
            .push_next(&mut accel_features);
    }
    Ok(unsafe { instance.create_device(candidate.pdevice, &info, None) }?)
}
