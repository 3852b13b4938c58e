//! Runtime-loaded OpenCL function pointers via dlopen.
//!
//! Nothing links against an OpenCL SDK at build time; the ICD loader
//! (`libOpenCL.so.1` and friends) is opened on first use and the handful of
//! entry points the engine needs are resolved into a plain function table.

use std::ffi::{c_char, c_void};
use std::path::Path;
use std::sync::{Arc, OnceLock};

use libloading::Library;

use crate::error::KernelError;
use crate::Result;

// ---------------------------------------------------------------------------
// Scalar types and status codes
// ---------------------------------------------------------------------------

pub type ClInt = i32;
pub type ClUint = u32;
pub type ClBool = u32;
pub type ClBitfield = u64;

pub const CL_SUCCESS: ClInt = 0;
pub const CL_DEVICE_NOT_FOUND: ClInt = -1;
pub const CL_BUILD_PROGRAM_FAILURE: ClInt = -11;
pub const CL_PLATFORM_NOT_FOUND_KHR: ClInt = -1001;

pub const CL_TRUE: ClBool = 1;

// cl_device_type
pub const CL_DEVICE_TYPE_DEFAULT: ClBitfield = 1 << 0;
pub const CL_DEVICE_TYPE_CPU: ClBitfield = 1 << 1;
pub const CL_DEVICE_TYPE_GPU: ClBitfield = 1 << 2;
pub const CL_DEVICE_TYPE_ACCELERATOR: ClBitfield = 1 << 3;
pub const CL_DEVICE_TYPE_ALL: ClBitfield = 0xFFFF_FFFF;

// cl_device_info
pub const CL_DEVICE_TYPE: ClUint = 0x1000;
pub const CL_DEVICE_NAME: ClUint = 0x102B;

// cl_mem_flags
pub const CL_MEM_READ_WRITE: ClBitfield = 1 << 0;
pub const CL_MEM_WRITE_ONLY: ClBitfield = 1 << 1;
pub const CL_MEM_READ_ONLY: ClBitfield = 1 << 2;

// cl_program_build_info
pub const CL_PROGRAM_BUILD_LOG: ClUint = 0x1183;

// cl_kernel_info
pub const CL_KERNEL_NUM_ARGS: ClUint = 0x1191;

// cl_kernel_arg_info
pub const CL_KERNEL_ARG_ADDRESS_QUALIFIER: ClUint = 0x1196;
pub const CL_KERNEL_ARG_TYPE_NAME: ClUint = 0x1198;

// cl_kernel_arg_address_qualifier
pub const CL_KERNEL_ARG_ADDRESS_GLOBAL: ClUint = 0x119B;
pub const CL_KERNEL_ARG_ADDRESS_LOCAL: ClUint = 0x119C;
pub const CL_KERNEL_ARG_ADDRESS_CONSTANT: ClUint = 0x119D;
pub const CL_KERNEL_ARG_ADDRESS_PRIVATE: ClUint = 0x119E;

// Opaque handles
pub type ClPlatformId = *mut c_void;
pub type ClDeviceId = *mut c_void;
pub type ClContext = *mut c_void;
pub type ClCommandQueue = *mut c_void;
pub type ClProgram = *mut c_void;
pub type ClKernel = *mut c_void;
pub type ClMem = *mut c_void;
pub type ClEvent = *mut c_void;

// ---------------------------------------------------------------------------
// OpenCL API function signatures
// ---------------------------------------------------------------------------

type FnClGetPlatformIds = unsafe extern "C" fn(ClUint, *mut ClPlatformId, *mut ClUint) -> ClInt;
type FnClGetDeviceIds = unsafe extern "C" fn(
    ClPlatformId, ClBitfield, ClUint, *mut ClDeviceId, *mut ClUint,
) -> ClInt;
type FnClGetDeviceInfo = unsafe extern "C" fn(
    ClDeviceId, ClUint, usize, *mut c_void, *mut usize,
) -> ClInt;
type FnClCreateContext = unsafe extern "C" fn(
    *const isize,          // properties
    ClUint,                // num_devices
    *const ClDeviceId,     // devices
    *const c_void,         // pfn_notify (unused)
    *mut c_void,           // user_data
    *mut ClInt,            // errcode_ret
) -> ClContext;
type FnClCreateCommandQueue = unsafe extern "C" fn(
    ClContext, ClDeviceId, ClBitfield, *mut ClInt,
) -> ClCommandQueue;
type FnClReleaseCommandQueue = unsafe extern "C" fn(ClCommandQueue) -> ClInt;
type FnClReleaseContext = unsafe extern "C" fn(ClContext) -> ClInt;
type FnClCreateProgramWithSource = unsafe extern "C" fn(
    ClContext, ClUint, *const *const c_char, *const usize, *mut ClInt,
) -> ClProgram;
type FnClBuildProgram = unsafe extern "C" fn(
    ClProgram,
    ClUint,                // num_devices
    *const ClDeviceId,     // device_list
    *const c_char,         // options
    *const c_void,         // pfn_notify (unused)
    *mut c_void,           // user_data
) -> ClInt;
type FnClGetProgramBuildInfo = unsafe extern "C" fn(
    ClProgram, ClDeviceId, ClUint, usize, *mut c_void, *mut usize,
) -> ClInt;
type FnClReleaseProgram = unsafe extern "C" fn(ClProgram) -> ClInt;
type FnClCreateKernel = unsafe extern "C" fn(ClProgram, *const c_char, *mut ClInt) -> ClKernel;
type FnClReleaseKernel = unsafe extern "C" fn(ClKernel) -> ClInt;
type FnClGetKernelInfo = unsafe extern "C" fn(
    ClKernel, ClUint, usize, *mut c_void, *mut usize,
) -> ClInt;
type FnClGetKernelArgInfo = unsafe extern "C" fn(
    ClKernel, ClUint, ClUint, usize, *mut c_void, *mut usize,
) -> ClInt;
type FnClSetKernelArg = unsafe extern "C" fn(ClKernel, ClUint, usize, *const c_void) -> ClInt;
type FnClCreateBuffer = unsafe extern "C" fn(
    ClContext, ClBitfield, usize, *mut c_void, *mut ClInt,
) -> ClMem;
type FnClReleaseMemObject = unsafe extern "C" fn(ClMem) -> ClInt;
type FnClEnqueueWriteBuffer = unsafe extern "C" fn(
    ClCommandQueue,
    ClMem,
    ClBool,                // blocking
    usize,                 // offset
    usize,                 // size
    *const c_void,         // host ptr
    ClUint,
    *const ClEvent,
    *mut ClEvent,
) -> ClInt;
type FnClEnqueueReadBuffer = unsafe extern "C" fn(
    ClCommandQueue,
    ClMem,
    ClBool,
    usize,
    usize,
    *mut c_void,
    ClUint,
    *const ClEvent,
    *mut ClEvent,
) -> ClInt;
type FnClEnqueueNdRangeKernel = unsafe extern "C" fn(
    ClCommandQueue,
    ClKernel,
    ClUint,                // work_dim
    *const usize,          // global offset (null)
    *const usize,          // global size
    *const usize,          // local size (nullable)
    ClUint,
    *const ClEvent,
    *mut ClEvent,
) -> ClInt;
type FnClFinish = unsafe extern "C" fn(ClCommandQueue) -> ClInt;

// ---------------------------------------------------------------------------
// Loaded API struct
// ---------------------------------------------------------------------------

pub struct OpenClApi {
    _lib: Library,
    pub get_platform_ids: FnClGetPlatformIds,
    pub get_device_ids: FnClGetDeviceIds,
    pub get_device_info: FnClGetDeviceInfo,
    pub create_context: FnClCreateContext,
    pub create_command_queue: FnClCreateCommandQueue,
    pub release_command_queue: FnClReleaseCommandQueue,
    pub release_context: FnClReleaseContext,
    pub create_program_with_source: FnClCreateProgramWithSource,
    pub build_program: FnClBuildProgram,
    pub get_program_build_info: FnClGetProgramBuildInfo,
    pub release_program: FnClReleaseProgram,
    pub create_kernel: FnClCreateKernel,
    pub release_kernel: FnClReleaseKernel,
    pub get_kernel_info: FnClGetKernelInfo,
    pub get_kernel_arg_info: FnClGetKernelArgInfo,
    pub set_kernel_arg: FnClSetKernelArg,
    pub create_buffer: FnClCreateBuffer,
    pub release_mem_object: FnClReleaseMemObject,
    pub enqueue_write_buffer: FnClEnqueueWriteBuffer,
    pub enqueue_read_buffer: FnClEnqueueReadBuffer,
    pub enqueue_nd_range_kernel: FnClEnqueueNdRangeKernel,
    pub finish: FnClFinish,
}

// Safety: the table holds plain function pointers into a library that stays
// loaded for as long as the table lives.
unsafe impl Send for OpenClApi {}
unsafe impl Sync for OpenClApi {}

#[cfg(target_os = "macos")]
const LIBRARY_CANDIDATES: &[&str] = &["/System/Library/Frameworks/OpenCL.framework/OpenCL"];
#[cfg(target_os = "windows")]
const LIBRARY_CANDIDATES: &[&str] = &["OpenCL.dll"];
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const LIBRARY_CANDIDATES: &[&str] = &["libOpenCL.so.1", "libOpenCL.so"];

static OPENCL_API: OnceLock<Option<Arc<OpenClApi>>> = OnceLock::new();

impl OpenClApi {
    fn from_library(lib: Library) -> Option<Self> {
        unsafe {
            let api = OpenClApi {
                get_platform_ids: *lib.get::<FnClGetPlatformIds>(b"clGetPlatformIDs\0").ok()?,
                get_device_ids: *lib.get::<FnClGetDeviceIds>(b"clGetDeviceIDs\0").ok()?,
                get_device_info: *lib.get::<FnClGetDeviceInfo>(b"clGetDeviceInfo\0").ok()?,
                create_context: *lib.get::<FnClCreateContext>(b"clCreateContext\0").ok()?,
                create_command_queue: *lib.get::<FnClCreateCommandQueue>(b"clCreateCommandQueue\0").ok()?,
                release_command_queue: *lib.get::<FnClReleaseCommandQueue>(b"clReleaseCommandQueue\0").ok()?,
                release_context: *lib.get::<FnClReleaseContext>(b"clReleaseContext\0").ok()?,
                create_program_with_source: *lib.get::<FnClCreateProgramWithSource>(b"clCreateProgramWithSource\0").ok()?,
                build_program: *lib.get::<FnClBuildProgram>(b"clBuildProgram\0").ok()?,
                get_program_build_info: *lib.get::<FnClGetProgramBuildInfo>(b"clGetProgramBuildInfo\0").ok()?,
                release_program: *lib.get::<FnClReleaseProgram>(b"clReleaseProgram\0").ok()?,
                create_kernel: *lib.get::<FnClCreateKernel>(b"clCreateKernel\0").ok()?,
                release_kernel: *lib.get::<FnClReleaseKernel>(b"clReleaseKernel\0").ok()?,
                get_kernel_info: *lib.get::<FnClGetKernelInfo>(b"clGetKernelInfo\0").ok()?,
                get_kernel_arg_info: *lib.get::<FnClGetKernelArgInfo>(b"clGetKernelArgInfo\0").ok()?,
                set_kernel_arg: *lib.get::<FnClSetKernelArg>(b"clSetKernelArg\0").ok()?,
                create_buffer: *lib.get::<FnClCreateBuffer>(b"clCreateBuffer\0").ok()?,
                release_mem_object: *lib.get::<FnClReleaseMemObject>(b"clReleaseMemObject\0").ok()?,
                enqueue_write_buffer: *lib.get::<FnClEnqueueWriteBuffer>(b"clEnqueueWriteBuffer\0").ok()?,
                enqueue_read_buffer: *lib.get::<FnClEnqueueReadBuffer>(b"clEnqueueReadBuffer\0").ok()?,
                enqueue_nd_range_kernel: *lib.get::<FnClEnqueueNdRangeKernel>(b"clEnqueueNDRangeKernel\0").ok()?,
                finish: *lib.get::<FnClFinish>(b"clFinish\0").ok()?,
                _lib: lib,
            };
            Some(api)
        }
    }

    fn try_load() -> Option<Self> {
        LIBRARY_CANDIDATES.iter().find_map(|name| {
            let lib = unsafe { Library::new(name) }.ok()?;
            Self::from_library(lib)
        })
    }

    /// Load the OpenCL API from an explicit library path.
    pub fn load_from(path: &Path) -> Result<Arc<Self>> {
        let lib = unsafe { Library::new(path) }.map_err(|e| {
            KernelError::DeviceUnavailable(format!("cannot load {}: {}", path.display(), e))
        })?;
        Self::from_library(lib).map(Arc::new).ok_or_else(|| {
            KernelError::DeviceUnavailable(format!(
                "{} does not export the OpenCL 1.2 entry points",
                path.display()
            ))
        })
    }
}

/// Get the runtime-loaded OpenCL API. Returns None if no ICD loader was found.
pub fn opencl_api() -> Option<Arc<OpenClApi>> {
    OPENCL_API.get_or_init(|| OpenClApi::try_load().map(Arc::new)).clone()
}

// ---------------------------------------------------------------------------
// Error checking helpers
// ---------------------------------------------------------------------------

/// Check an OpenCL return code.
pub fn check_cl(code: ClInt, call: &'static str) -> Result<()> {
    if code == CL_SUCCESS {
        Ok(())
    } else {
        Err(KernelError::BackendError { code, call })
    }
}

/// Symbolic name of an OpenCL status code.
pub fn cl_status_name(code: ClInt) -> &'static str {
    match code {
        0 => "CL_SUCCESS",
        -1 => "CL_DEVICE_NOT_FOUND",
        -2 => "CL_DEVICE_NOT_AVAILABLE",
        -3 => "CL_COMPILER_NOT_AVAILABLE",
        -4 => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
        -5 => "CL_OUT_OF_RESOURCES",
        -6 => "CL_OUT_OF_HOST_MEMORY",
        -7 => "CL_PROFILING_INFO_NOT_AVAILABLE",
        -8 => "CL_MEM_COPY_OVERLAP",
        -9 => "CL_IMAGE_FORMAT_MISMATCH",
        -10 => "CL_IMAGE_FORMAT_NOT_SUPPORTED",
        -11 => "CL_BUILD_PROGRAM_FAILURE",
        -12 => "CL_MAP_FAILURE",
        -13 => "CL_MISALIGNED_SUB_BUFFER_OFFSET",
        -14 => "CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST",
        -15 => "CL_COMPILE_PROGRAM_FAILURE",
        -16 => "CL_LINKER_NOT_AVAILABLE",
        -17 => "CL_LINK_PROGRAM_FAILURE",
        -18 => "CL_DEVICE_PARTITION_FAILED",
        -19 => "CL_KERNEL_ARG_INFO_NOT_AVAILABLE",
        -30 => "CL_INVALID_VALUE",
        -31 => "CL_INVALID_DEVICE_TYPE",
        -32 => "CL_INVALID_PLATFORM",
        -33 => "CL_INVALID_DEVICE",
        -34 => "CL_INVALID_CONTEXT",
        -35 => "CL_INVALID_QUEUE_PROPERTIES",
        -36 => "CL_INVALID_COMMAND_QUEUE",
        -37 => "CL_INVALID_HOST_PTR",
        -38 => "CL_INVALID_MEM_OBJECT",
        -39 => "CL_INVALID_IMAGE_FORMAT_DESCRIPTOR",
        -40 => "CL_INVALID_IMAGE_SIZE",
        -41 => "CL_INVALID_SAMPLER",
        -42 => "CL_INVALID_BINARY",
        -43 => "CL_INVALID_BUILD_OPTIONS",
        -44 => "CL_INVALID_PROGRAM",
        -45 => "CL_INVALID_PROGRAM_EXECUTABLE",
        -46 => "CL_INVALID_KERNEL_NAME",
        -47 => "CL_INVALID_KERNEL_DEFINITION",
        -48 => "CL_INVALID_KERNEL",
        -49 => "CL_INVALID_ARG_INDEX",
        -50 => "CL_INVALID_ARG_VALUE",
        -51 => "CL_INVALID_ARG_SIZE",
        -52 => "CL_INVALID_KERNEL_ARGS",
        -53 => "CL_INVALID_WORK_DIMENSION",
        -54 => "CL_INVALID_WORK_GROUP_SIZE",
        -55 => "CL_INVALID_WORK_ITEM_SIZE",
        -56 => "CL_INVALID_GLOBAL_OFFSET",
        -57 => "CL_INVALID_EVENT_WAIT_LIST",
        -58 => "CL_INVALID_EVENT",
        -59 => "CL_INVALID_OPERATION",
        -60 => "CL_INVALID_GL_OBJECT",
        -61 => "CL_INVALID_BUFFER_SIZE",
        -62 => "CL_INVALID_MIP_LEVEL",
        -63 => "CL_INVALID_GLOBAL_WORK_SIZE",
        -64 => "CL_INVALID_PROPERTY",
        -65 => "CL_INVALID_IMAGE_DESCRIPTOR",
        -66 => "CL_INVALID_COMPILER_OPTIONS",
        -67 => "CL_INVALID_LINKER_OPTIONS",
        -68 => "CL_INVALID_DEVICE_PARTITION_COUNT",
        -1000 => "CL_INVALID_GL_SHAREGROUP_REFERENCE_KHR",
        -1001 => "CL_PLATFORM_NOT_FOUND_KHR",
        _ => "CL_UNKNOWN_ERROR",
    }
}

/// Read a NUL-terminated string result from a `clGet*Info`-style query.
///
/// `query(size, ptr, size_ret)` is called once for the size and once for
/// the payload.
pub(crate) fn query_string(
    call: &'static str,
    mut query: impl FnMut(usize, *mut c_void, *mut usize) -> ClInt,
) -> Result<String> {
    let mut size: usize = 0;
    check_cl(query(0, std::ptr::null_mut(), &mut size), call)?;
    if size == 0 {
        return Ok(String::new());
    }
    let mut buf = vec![0u8; size];
    check_cl(query(size, buf.as_mut_ptr() as *mut c_void, std::ptr::null_mut()), call)?;
    if let Some(nul) = buf.iter().position(|&b| b == 0) {
        buf.truncate(nul);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names() {
        assert_eq!(cl_status_name(CL_SUCCESS), "CL_SUCCESS");
        assert_eq!(cl_status_name(CL_DEVICE_NOT_FOUND), "CL_DEVICE_NOT_FOUND");
        assert_eq!(cl_status_name(CL_BUILD_PROGRAM_FAILURE), "CL_BUILD_PROGRAM_FAILURE");
        assert_eq!(cl_status_name(-52), "CL_INVALID_KERNEL_ARGS");
        assert_eq!(cl_status_name(12345), "CL_UNKNOWN_ERROR");
    }

    #[test]
    fn test_check_cl() {
        let ok: crate::Result<()> = check_cl(CL_SUCCESS, "clFinish");
        assert!(ok.is_ok());
        match check_cl(-36, "clFinish") {
            Err(KernelError::BackendError { code, call }) => {
                assert_eq!(code, -36);
                assert_eq!(call, "clFinish");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_query_string_truncates_at_nul() {
        let payload = b"Tahiti\0\0";
        let s = query_string("clGetDeviceInfo", |size, ptr, size_ret| {
            if ptr.is_null() {
                unsafe { *size_ret = payload.len() };
            } else {
                assert_eq!(size, payload.len());
                unsafe {
                    std::ptr::copy_nonoverlapping(payload.as_ptr(), ptr as *mut u8, size)
                };
            }
            CL_SUCCESS
        })
        .unwrap();
        assert_eq!(s, "Tahiti");
    }

    #[test]
    fn test_missing_library_is_device_unavailable() {
        let err = OpenClApi::load_from(Path::new("/nonexistent/libOpenCL.so")).err().unwrap();
        assert!(matches!(err, KernelError::DeviceUnavailable(_)));
    }
}
