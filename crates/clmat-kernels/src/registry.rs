//! Kernel registry: compiled programs and introspected kernel signatures.
//!
//! Each registered kernel keeps the argument list the OpenCL compiler
//! reported for it (`-cl-kernel-arg-info`), resolved once into
//! [`ArgDescriptor`]s so that invocation never has to look at type strings.

use std::collections::HashMap;
use std::ffi::{c_char, c_void, CString};
use std::fmt;

use crate::error::KernelError;
use crate::Result;
use crate::ffi::{
    check_cl, query_string, ClDeviceId, ClContext, ClInt, ClKernel, ClProgram, ClUint, OpenClApi,
    CL_BUILD_PROGRAM_FAILURE, CL_KERNEL_ARG_ADDRESS_CONSTANT, CL_KERNEL_ARG_ADDRESS_GLOBAL,
    CL_KERNEL_ARG_ADDRESS_LOCAL, CL_KERNEL_ARG_ADDRESS_PRIVATE, CL_KERNEL_ARG_ADDRESS_QUALIFIER,
    CL_KERNEL_ARG_TYPE_NAME, CL_KERNEL_NUM_ARGS, CL_PROGRAM_BUILD_LOG, CL_SUCCESS,
};

/// Element type of a kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Char,
    Int,
    Float,
    Double,
}

impl ElementKind {
    /// Size in bytes of one element.
    pub fn size(self) -> usize {
        match self {
            ElementKind::Char => 1,
            ElementKind::Int | ElementKind::Float => 4,
            ElementKind::Double => 8,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::Char => write!(f, "char"),
            ElementKind::Int => write!(f, "int"),
            ElementKind::Float => write!(f, "float"),
            ElementKind::Double => write!(f, "double"),
        }
    }
}

/// Address space qualifier of a kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    Global,
    Local,
    Constant,
    Private,
}

impl AddressSpace {
    fn from_raw(raw: ClUint) -> Self {
        match raw {
            CL_KERNEL_ARG_ADDRESS_GLOBAL => AddressSpace::Global,
            CL_KERNEL_ARG_ADDRESS_LOCAL => AddressSpace::Local,
            CL_KERNEL_ARG_ADDRESS_CONSTANT => AddressSpace::Constant,
            _ => AddressSpace::Private,
        }
    }
}

/// Introspected signature of one kernel parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgDescriptor {
    pub kind: ElementKind,
    pub is_pointer: bool,
    pub address_space: AddressSpace,
    /// Type name as reported by the compiler, e.g. `double*`.
    pub type_name: String,
}

impl ArgDescriptor {
    pub fn new(kind: ElementKind, is_pointer: bool, address_space: AddressSpace) -> Self {
        Self {
            kind,
            is_pointer,
            address_space,
            type_name: format!("{}{}", kind, if is_pointer { "*" } else { "" }),
        }
    }

    /// Kernel-local scratch memory: sized at call time, never backed by a buffer.
    pub fn is_local(&self) -> bool {
        self.is_pointer && self.address_space == AddressSpace::Local
    }

    /// Element size in bytes.
    pub fn elem_size(&self) -> usize {
        self.kind.size()
    }
}

/// Resolve a compiler-reported type name into an element kind and a pointer flag.
///
/// The first of `char`, `int`, `float`, `double` found in the name wins, so
/// `uchar*` is a char pointer and `uint` an int.
pub fn parse_type_name(type_name: &str) -> Option<(ElementKind, bool)> {
    const KINDS: [(&str, ElementKind); 4] = [
        ("char", ElementKind::Char),
        ("int", ElementKind::Int),
        ("float", ElementKind::Float),
        ("double", ElementKind::Double),
    ];
    let kind = KINDS
        .iter()
        .find(|(pat, _)| type_name.contains(pat))
        .map(|(_, kind)| *kind)?;
    Some((kind, type_name.contains('*')))
}

/// A compiled kernel with its argument signature.
pub struct RegisteredKernel {
    name: String,
    kernel: ClKernel,
    args: Vec<ArgDescriptor>,
}

impl RegisteredKernel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[ArgDescriptor] {
        &self.args
    }

    pub(crate) fn raw(&self) -> ClKernel {
        self.kernel
    }
}

impl fmt::Debug for RegisteredKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredKernel")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish()
    }
}

/// Kernels keyed by name, plus the programs they were built from.
#[derive(Default)]
pub struct KernelRegistry {
    kernels: HashMap<String, RegisteredKernel>,
    programs: Vec<ClProgram>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kernels.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredKernel> {
        self.kernels.get(name)
    }

    /// Registered kernel names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.kernels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    /// Build `source` as one program and register the named entry points.
    ///
    /// Names are committed in order: when a later name fails (duplicate,
    /// unsupported argument type, missing entry point) the kernels committed
    /// before it stay registered and usable. The program is released if
    /// none of its kernels was committed.
    pub(crate) fn register(
        &mut self,
        api: &OpenClApi,
        context: ClContext,
        device: ClDeviceId,
        source: &str,
        names: &[&str],
        build_options: &str,
    ) -> Result<()> {
        let program = build_program(api, context, device, source, build_options)?;

        let mut committed = 0usize;
        let mut result = Ok(());
        for &name in names {
            if self.kernels.contains_key(name) {
                result = Err(KernelError::DuplicateName(name.to_string()));
                break;
            }
            match create_kernel(api, program, name) {
                Ok(kernel) => {
                    tracing::debug!(kernel = name, args = kernel.args.len(), "registered kernel");
                    self.kernels.insert(name.to_string(), kernel);
                    committed += 1;
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        if committed > 0 {
            self.programs.push(program);
        } else {
            let _ = unsafe { (api.release_program)(program) };
        }
        if result.is_ok() {
            tracing::info!(kernels = ?names, "registered program");
        }
        result
    }

    /// Release every kernel, then every program exactly once.
    pub(crate) fn release_all(&mut self, api: &OpenClApi) -> Result<()> {
        let mut first_err = None;
        for (_, k) in self.kernels.drain() {
            if let Err(e) = check_cl(unsafe { (api.release_kernel)(k.kernel) }, "clReleaseKernel") {
                first_err.get_or_insert(e);
            }
        }
        for program in self.programs.drain(..) {
            if let Err(e) = check_cl(unsafe { (api.release_program)(program) }, "clReleaseProgram") {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

fn build_program(
    api: &OpenClApi,
    context: ClContext,
    device: ClDeviceId,
    source: &str,
    build_options: &str,
) -> Result<ClProgram> {
    let c_source = CString::new(source)
        .map_err(|_| KernelError::InvalidArgument("kernel source contains a NUL byte".into()))?;
    let c_options = CString::new(build_options)
        .map_err(|_| KernelError::InvalidArgument("build options contain a NUL byte".into()))?;

    let mut err: ClInt = CL_SUCCESS;
    let src_ptr: *const c_char = c_source.as_ptr();
    let program = unsafe {
        (api.create_program_with_source)(context, 1, &src_ptr, std::ptr::null(), &mut err)
    };
    check_cl(err, "clCreateProgramWithSource")?;

    let code = unsafe {
        (api.build_program)(
            program,
            1,
            &device,
            c_options.as_ptr(),
            std::ptr::null(),
            std::ptr::null_mut(),
        )
    };
    if code == CL_SUCCESS {
        return Ok(program);
    }

    let outcome = if code == CL_BUILD_PROGRAM_FAILURE {
        let log = query_string("clGetProgramBuildInfo", |size, ptr, size_ret| unsafe {
            (api.get_program_build_info)(program, device, CL_PROGRAM_BUILD_LOG, size, ptr, size_ret)
        })
        .unwrap_or_default();
        tracing::error!("program build failed:\n{}", log);
        KernelError::BuildFailure { log }
    } else {
        KernelError::BackendError { code, call: "clBuildProgram" }
    };
    let _ = unsafe { (api.release_program)(program) };
    Err(outcome)
}

fn create_kernel(api: &OpenClApi, program: ClProgram, name: &str) -> Result<RegisteredKernel> {
    let c_name = CString::new(name)
        .map_err(|_| KernelError::InvalidArgument(format!("kernel name {name:?} contains a NUL byte")))?;

    let mut err: ClInt = CL_SUCCESS;
    let kernel = unsafe { (api.create_kernel)(program, c_name.as_ptr(), &mut err) };
    check_cl(err, "clCreateKernel")?;

    match introspect_args(api, kernel, name) {
        Ok(args) => Ok(RegisteredKernel { name: name.to_string(), kernel, args }),
        Err(e) => {
            let _ = unsafe { (api.release_kernel)(kernel) };
            Err(e)
        }
    }
}

fn introspect_args(api: &OpenClApi, kernel: ClKernel, name: &str) -> Result<Vec<ArgDescriptor>> {
    let mut argc: ClUint = 0;
    check_cl(
        unsafe {
            (api.get_kernel_info)(
                kernel,
                CL_KERNEL_NUM_ARGS,
                std::mem::size_of::<ClUint>(),
                &mut argc as *mut ClUint as *mut c_void,
                std::ptr::null_mut(),
            )
        },
        "clGetKernelInfo",
    )?;

    (0..argc)
        .map(|index| {
            let type_name = query_string("clGetKernelArgInfo", |size, ptr, size_ret| unsafe {
                (api.get_kernel_arg_info)(kernel, index, CL_KERNEL_ARG_TYPE_NAME, size, ptr, size_ret)
            })?;
            let (kind, is_pointer) =
                parse_type_name(&type_name).ok_or_else(|| KernelError::UnsupportedArgumentType {
                    kernel: name.to_string(),
                    index: index as usize,
                    type_name: type_name.clone(),
                })?;

            let mut qualifier: ClUint = CL_KERNEL_ARG_ADDRESS_PRIVATE;
            check_cl(
                unsafe {
                    (api.get_kernel_arg_info)(
                        kernel,
                        index,
                        CL_KERNEL_ARG_ADDRESS_QUALIFIER,
                        std::mem::size_of::<ClUint>(),
                        &mut qualifier as *mut ClUint as *mut c_void,
                        std::ptr::null_mut(),
                    )
                },
                "clGetKernelArgInfo",
            )?;

            Ok(ArgDescriptor {
                kind,
                is_pointer,
                address_space: AddressSpace::from_raw(qualifier),
                type_name,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type_names() {
        assert_eq!(parse_type_name("double*"), Some((ElementKind::Double, true)));
        assert_eq!(parse_type_name("int"), Some((ElementKind::Int, false)));
        assert_eq!(parse_type_name("float*"), Some((ElementKind::Float, true)));
        assert_eq!(parse_type_name("char"), Some((ElementKind::Char, false)));
        assert_eq!(parse_type_name("uchar*"), Some((ElementKind::Char, true)));
        assert_eq!(parse_type_name("uint"), Some((ElementKind::Int, false)));
    }

    #[test]
    fn test_parse_type_name_first_match_wins() {
        // "char" is tested before "int", so a hypothetical name containing both is a char.
        assert_eq!(parse_type_name("char_int*"), Some((ElementKind::Char, true)));
        assert_eq!(parse_type_name("float4"), Some((ElementKind::Float, false)));
    }

    #[test]
    fn test_parse_type_name_unsupported() {
        assert_eq!(parse_type_name("half*"), None);
        assert_eq!(parse_type_name("long"), None);
        assert_eq!(parse_type_name(""), None);
    }

    #[test]
    fn test_element_sizes() {
        assert_eq!(ElementKind::Char.size(), 1);
        assert_eq!(ElementKind::Int.size(), 4);
        assert_eq!(ElementKind::Float.size(), 4);
        assert_eq!(ElementKind::Double.size(), 8);
    }

    #[test]
    fn test_descriptor_locality() {
        let local = ArgDescriptor::new(ElementKind::Double, true, AddressSpace::Local);
        assert!(local.is_local());
        assert_eq!(local.type_name, "double*");
        assert!(!ArgDescriptor::new(ElementKind::Double, true, AddressSpace::Global).is_local());
        assert!(!ArgDescriptor::new(ElementKind::Int, false, AddressSpace::Private).is_local());
        assert_eq!(AddressSpace::from_raw(CL_KERNEL_ARG_ADDRESS_CONSTANT), AddressSpace::Constant);
        assert_eq!(AddressSpace::from_raw(0), AddressSpace::Private);
    }

    #[test]
    fn test_empty_registry() {
        let reg = KernelRegistry::new();
        assert!(reg.is_empty());
        assert!(!reg.contains("matadd"));
        assert!(reg.get("matadd").is_none());
        assert!(reg.names().is_empty());
    }
}
