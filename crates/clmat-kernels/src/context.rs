//! OpenCL device session.
//!
//! A [`Session`] owns one platform/device pair, its context, a single
//! in-order command queue and the [`KernelRegistry`] built against them.
//! There is no process-wide session: callers open one and pass it around.

use std::sync::Arc;

use crate::config::{DeviceType, SessionConfig};
use crate::error::KernelError;
use crate::Result;
use crate::ffi::{
    self, check_cl, query_string, ClCommandQueue, ClContext, ClDeviceId, ClInt, ClPlatformId,
    ClUint, OpenClApi, CL_DEVICE_NAME, CL_DEVICE_NOT_FOUND, CL_SUCCESS,
};
use crate::registry::KernelRegistry;

/// Raw handles of an open session.
#[derive(Clone, Copy)]
pub(crate) struct Handles {
    pub(crate) device: ClDeviceId,
    pub(crate) context: ClContext,
    pub(crate) queue: ClCommandQueue,
}

/// An open OpenCL device with its compiled kernels.
pub struct Session {
    api: Arc<OpenClApi>,
    handles: Option<Handles>,
    registry: KernelRegistry,
    device_name: String,
    device_type: DeviceType,
    build_options: String,
}

impl Session {
    /// Open the configured platform and device.
    pub fn open(config: &SessionConfig) -> Result<Self> {
        let api = match &config.library_path {
            Some(path) => OpenClApi::load_from(path)?,
            None => ffi::opencl_api().ok_or_else(|| {
                KernelError::DeviceUnavailable("OpenCL ICD loader not found".into())
            })?,
        };

        let platform = select_platform(&api, config.platform_index)?;
        let (device, device_type) = select_device(&api, platform, config)?;

        let mut err: ClInt = CL_SUCCESS;
        let context = unsafe {
            (api.create_context)(
                std::ptr::null(),
                1,
                &device,
                std::ptr::null(),
                std::ptr::null_mut(),
                &mut err,
            )
        };
        check_cl(err, "clCreateContext")?;

        let queue = unsafe { (api.create_command_queue)(context, device, 0, &mut err) };
        if let Err(e) = check_cl(err, "clCreateCommandQueue") {
            let _ = unsafe { (api.release_context)(context) };
            return Err(e);
        }

        let device_name = query_string("clGetDeviceInfo", |size, ptr, ret| unsafe {
            (api.get_device_info)(device, CL_DEVICE_NAME, size, ptr, ret)
        })
        .unwrap_or_else(|_| String::from("<unknown>"));

        tracing::info!(device = %device_name, ?device_type, "opened OpenCL session");

        Ok(Self {
            api,
            handles: Some(Handles { device, context, queue }),
            registry: KernelRegistry::new(),
            device_name,
            device_type,
            build_options: config.build_options_string(),
        })
    }

    /// Compile `source` and register the kernels it defines under `names`.
    ///
    /// See [`KernelRegistry`] for the partial-commit rules when a name fails.
    pub fn register(&mut self, source: &str, names: &[&str]) -> Result<()> {
        let handles = self.handles()?;
        self.registry.register(
            &self.api,
            handles.context,
            handles.device,
            source,
            names,
            &self.build_options,
        )
    }

    /// Release kernels, programs, queue and context.
    ///
    /// Returns `Uninitialized` if the session is already closed.
    pub fn close(&mut self) -> Result<()> {
        let handles = self.handles.take().ok_or(KernelError::Uninitialized)?;

        let mut first_err = self.registry.release_all(&self.api).err();
        if let Err(e) = check_cl(
            unsafe { (self.api.release_command_queue)(handles.queue) },
            "clReleaseCommandQueue",
        ) {
            first_err.get_or_insert(e);
        }
        if let Err(e) = check_cl(
            unsafe { (self.api.release_context)(handles.context) },
            "clReleaseContext",
        ) {
            first_err.get_or_insert(e);
        }

        tracing::info!(device = %self.device_name, "closed OpenCL session");
        first_err.map_or(Ok(()), Err)
    }

    pub fn is_open(&self) -> bool {
        self.handles.is_some()
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Device type actually in use, after any CPU fallback.
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn registry(&self) -> &KernelRegistry {
        &self.registry
    }

    pub(crate) fn api(&self) -> &Arc<OpenClApi> {
        &self.api
    }

    pub(crate) fn handles(&self) -> Result<Handles> {
        self.handles.ok_or(KernelError::Uninitialized)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.is_open() {
            let _ = self.close();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("device_name", &self.device_name)
            .field("device_type", &self.device_type)
            .field("open", &self.is_open())
            .field("kernels", &self.registry.names())
            .finish()
    }
}

fn select_platform(api: &OpenClApi, index: usize) -> Result<ClPlatformId> {
    let mut count: ClUint = 0;
    let code = unsafe { (api.get_platform_ids)(0, std::ptr::null_mut(), &mut count) };
    if code != CL_SUCCESS || count == 0 {
        return Err(KernelError::DeviceUnavailable(format!(
            "no OpenCL platform ({})",
            ffi::cl_status_name(code)
        )));
    }

    let mut platforms: Vec<ClPlatformId> = vec![std::ptr::null_mut(); count as usize];
    check_cl(
        unsafe { (api.get_platform_ids)(count, platforms.as_mut_ptr(), std::ptr::null_mut()) },
        "clGetPlatformIDs",
    )?;
    platforms.get(index).copied().ok_or_else(|| {
        KernelError::DeviceUnavailable(format!(
            "platform index {index} out of range ({count} platforms)"
        ))
    })
}

fn first_device(
    api: &OpenClApi,
    platform: ClPlatformId,
    device_type: DeviceType,
) -> Result<Option<ClDeviceId>> {
    let mut device: ClDeviceId = std::ptr::null_mut();
    let code = unsafe {
        (api.get_device_ids)(platform, device_type.as_raw(), 1, &mut device, std::ptr::null_mut())
    };
    if code == CL_DEVICE_NOT_FOUND {
        return Ok(None);
    }
    check_cl(code, "clGetDeviceIDs")?;
    Ok(Some(device))
}

fn select_device(
    api: &OpenClApi,
    platform: ClPlatformId,
    config: &SessionConfig,
) -> Result<(ClDeviceId, DeviceType)> {
    if let Some(device) = first_device(api, platform, config.device_type)? {
        return Ok((device, config.device_type));
    }
    if config.cpu_fallback && config.device_type != DeviceType::Cpu {
        tracing::warn!(requested = ?config.device_type, "no matching OpenCL device, falling back to CPU");
        if let Some(device) = first_device(api, platform, DeviceType::Cpu)? {
            return Ok((device, DeviceType::Cpu));
        }
    }
    Err(KernelError::DeviceUnavailable(format!(
        "no OpenCL device of type {:?}",
        config.device_type
    )))
}
