//! Kernel invocation: argument marshaling, dispatch and read-back.
//!
//! Arguments are a typed list ([`KernelArg`]) matched positionally against
//! the kernel's [`ArgDescriptor`]s. Every device buffer created for a call
//! is owned by a [`BufferSet`] and released before `run` returns, on every
//! path.

use std::ffi::c_void;

use crate::context::Session;
use crate::error::KernelError;
use crate::Result;
use crate::ffi::{check_cl, ClMem, ClUint};
use crate::memory::{ArgFlags, BufferSet, DeviceBuffer};
use crate::registry::{AddressSpace, ArgDescriptor, ElementKind};

mod sealed {
    pub trait Sealed {}
    impl Sealed for i8 {}
    impl Sealed for i32 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Host element types that map onto a kernel [`ElementKind`].
pub trait DeviceElement: bytemuck::Pod + sealed::Sealed {
    const KIND: ElementKind;

    fn into_scalar(self) -> ScalarValue;
}

impl DeviceElement for i8 {
    const KIND: ElementKind = ElementKind::Char;
    fn into_scalar(self) -> ScalarValue {
        ScalarValue::Char(self)
    }
}

impl DeviceElement for i32 {
    const KIND: ElementKind = ElementKind::Int;
    fn into_scalar(self) -> ScalarValue {
        ScalarValue::Int(self)
    }
}

impl DeviceElement for f32 {
    const KIND: ElementKind = ElementKind::Float;
    fn into_scalar(self) -> ScalarValue {
        ScalarValue::Float(self)
    }
}

impl DeviceElement for f64 {
    const KIND: ElementKind = ElementKind::Double;
    fn into_scalar(self) -> ScalarValue {
        ScalarValue::Double(self)
    }
}

/// A by-value kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    Char(i8),
    Int(i32),
    Float(f32),
    Double(f64),
}

impl ScalarValue {
    pub fn kind(&self) -> ElementKind {
        match self {
            ScalarValue::Char(_) => ElementKind::Char,
            ScalarValue::Int(_) => ElementKind::Int,
            ScalarValue::Float(_) => ElementKind::Float,
            ScalarValue::Double(_) => ElementKind::Double,
        }
    }

    /// Native-endian bytes of the value.
    fn to_ne_bytes(self) -> Vec<u8> {
        match self {
            ScalarValue::Char(v) => v.to_ne_bytes().to_vec(),
            ScalarValue::Int(v) => v.to_ne_bytes().to_vec(),
            ScalarValue::Float(v) => v.to_ne_bytes().to_vec(),
            ScalarValue::Double(v) => v.to_ne_bytes().to_vec(),
        }
    }
}

enum HostData<'a> {
    Shared(&'a [u8]),
    Exclusive(&'a mut [u8]),
}

impl HostData<'_> {
    fn bytes(&self) -> &[u8] {
        match self {
            HostData::Shared(b) => b,
            HostData::Exclusive(b) => b,
        }
    }
}

/// Host data bound to a global pointer parameter.
pub struct BufferArg<'a> {
    kind: ElementKind,
    host: HostData<'a>,
    flags: ArgFlags,
}

impl BufferArg<'_> {
    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn flags(&self) -> ArgFlags {
        self.flags
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.host.bytes().len() / self.kind.size()
    }

    pub fn is_empty(&self) -> bool {
        self.host.bytes().is_empty()
    }
}

/// One positional kernel argument.
pub enum KernelArg<'a> {
    /// Bound by value.
    Scalar(ScalarValue),
    /// Backed by a device buffer created for this call.
    Buffer(BufferArg<'a>),
    /// `__local` scratch of `len` elements; no buffer and no host data.
    Local { kind: ElementKind, len: usize },
}

impl<'a> KernelArg<'a> {
    pub fn scalar<T: DeviceElement>(value: T) -> Self {
        KernelArg::Scalar(value.into_scalar())
    }

    /// Read-only host data. `COPY_OUT` is rejected at dispatch time.
    pub fn input<T: DeviceElement>(data: &'a [T], flags: ArgFlags) -> Self {
        KernelArg::Buffer(BufferArg {
            kind: T::KIND,
            host: HostData::Shared(bytemuck::cast_slice(data)),
            flags,
        })
    }

    /// Host data the kernel may write back into via `COPY_OUT`.
    pub fn output<T: DeviceElement>(data: &'a mut [T], flags: ArgFlags) -> Self {
        KernelArg::Buffer(BufferArg {
            kind: T::KIND,
            host: HostData::Exclusive(bytemuck::cast_slice_mut(data)),
            flags,
        })
    }

    pub fn local<T: DeviceElement>(len: usize) -> Self {
        KernelArg::Local { kind: T::KIND, len }
    }

    fn describe(&self) -> String {
        match self {
            KernelArg::Scalar(v) => format!("scalar {}", v.kind()),
            KernelArg::Buffer(b) => format!("{}* buffer", b.kind),
            KernelArg::Local { kind, .. } => format!("local {kind}*"),
        }
    }
}

/// Global and optional local work sizes, 1 to 3 dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdRange {
    global: Vec<usize>,
    local: Option<Vec<usize>>,
}

impl NdRange {
    pub fn new(global: &[usize]) -> Self {
        Self { global: global.to_vec(), local: None }
    }

    pub fn d1(n: usize) -> Self {
        Self::new(&[n])
    }

    pub fn d2(x: usize, y: usize) -> Self {
        Self::new(&[x, y])
    }

    pub fn d3(x: usize, y: usize, z: usize) -> Self {
        Self::new(&[x, y, z])
    }

    pub fn with_local(mut self, local: &[usize]) -> Self {
        self.local = Some(local.to_vec());
        self
    }

    pub fn dims(&self) -> usize {
        self.global.len()
    }

    pub fn global(&self) -> &[usize] {
        &self.global
    }

    pub fn local(&self) -> Option<&[usize]> {
        self.local.as_deref()
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=3).contains(&self.global.len()) {
            return Err(KernelError::InvalidArgument(format!(
                "work dimension must be 1-3, got {}",
                self.global.len()
            )));
        }
        if self.global.contains(&0) {
            return Err(KernelError::InvalidArgument(format!(
                "global work size {:?} has a zero entry",
                self.global
            )));
        }
        if let Some(local) = &self.local {
            if local.len() != self.global.len() || local.contains(&0) {
                return Err(KernelError::InvalidArgument(format!(
                    "local work size {:?} does not fit global {:?}",
                    local, self.global
                )));
            }
        }
        Ok(())
    }
}

impl Session {
    /// Run a registered kernel synchronously.
    ///
    /// `args` must match the kernel's parameters one-to-one. Buffers flagged
    /// `COPY_OUT` are written back into their host slices before this returns.
    pub fn run(&self, name: &str, range: &NdRange, args: &mut [KernelArg<'_>]) -> Result<()> {
        let handles = self.handles()?;
        let kernel = self
            .registry()
            .get(name)
            .ok_or_else(|| KernelError::UnknownKernel(name.to_string()))?;
        range.validate()?;

        let descriptors = kernel.args();
        if args.len() != descriptors.len() {
            return Err(KernelError::InvalidArgument(format!(
                "kernel '{}' takes {} arguments, got {}",
                name,
                descriptors.len(),
                args.len()
            )));
        }

        let api = self.api();
        let mut buffers = BufferSet::new();

        for (index, (arg, desc)) in args.iter().zip(descriptors).enumerate() {
            let (size, value): (usize, Vec<u8>) = match arg {
                KernelArg::Scalar(v) => {
                    check_scalar(name, index, v, desc)?;
                    (desc.elem_size(), v.to_ne_bytes())
                }
                KernelArg::Buffer(b) => {
                    check_buffer(name, index, b, desc)?;
                    let access = b.flags.access()?;
                    let buffer = DeviceBuffer::allocate(
                        api,
                        handles.context,
                        access,
                        b.len() * desc.elem_size(),
                    )?;
                    if b.flags.contains(ArgFlags::COPY_IN) {
                        buffer.write(handles.queue, b.host.bytes())?;
                    }
                    buffers.push(index, buffer);
                    (std::mem::size_of::<ClMem>(), Vec::new())
                }
                KernelArg::Local { kind, len } => {
                    check_local(name, index, *kind, *len, desc)?;
                    (len * desc.elem_size(), Vec::new())
                }
            };

            let ptr: *const c_void = match arg {
                KernelArg::Scalar(_) => value.as_ptr() as *const c_void,
                KernelArg::Buffer(_) => match buffers.get(index) {
                    Some(buffer) => buffer.as_raw() as *const ClMem as *const c_void,
                    None => return Err(KernelError::NullInput { index }),
                },
                KernelArg::Local { .. } => std::ptr::null(),
            };
            check_cl(
                unsafe { (api.set_kernel_arg)(kernel.raw(), index as ClUint, size, ptr) },
                "clSetKernelArg",
            )?;
        }

        tracing::debug!(
            kernel = name,
            global = ?range.global(),
            local = ?range.local(),
            buffers = buffers.len(),
            "dispatching kernel"
        );
        let local_ptr = range.local().map_or(std::ptr::null(), |l| l.as_ptr());
        check_cl(
            unsafe {
                (api.enqueue_nd_range_kernel)(
                    handles.queue,
                    kernel.raw(),
                    range.dims() as ClUint,
                    std::ptr::null(),
                    range.global().as_ptr(),
                    local_ptr,
                    0,
                    std::ptr::null(),
                    std::ptr::null_mut(),
                )
            },
            "clEnqueueNDRangeKernel",
        )?;
        check_cl(unsafe { (api.finish)(handles.queue) }, "clFinish")?;

        for (index, arg) in args.iter_mut().enumerate() {
            let KernelArg::Buffer(b) = arg else { continue };
            if !b.flags.contains(ArgFlags::COPY_OUT) {
                continue;
            }
            let (Some(buffer), HostData::Exclusive(host)) = (buffers.get(index), &mut b.host) else {
                continue;
            };
            buffer.read(handles.queue, host)?;
        }

        buffers.release_all()
    }
}

fn mismatch(kernel: &str, index: usize, arg: &str, desc: &ArgDescriptor) -> KernelError {
    KernelError::InvalidArgument(format!(
        "kernel '{}' argument {} expects {} ({:?}), got {}",
        kernel, index, desc.type_name, desc.address_space, arg
    ))
}

fn check_scalar(kernel: &str, index: usize, value: &ScalarValue, desc: &ArgDescriptor) -> Result<()> {
    if desc.is_pointer || value.kind() != desc.kind {
        return Err(mismatch(kernel, index, &KernelArg::Scalar(*value).describe(), desc));
    }
    Ok(())
}

fn check_buffer(kernel: &str, index: usize, arg: &BufferArg<'_>, desc: &ArgDescriptor) -> Result<()> {
    let described = format!("{}* buffer", arg.kind);
    if !needs_buffer(desc) || arg.kind != desc.kind {
        return Err(mismatch(kernel, index, &described, desc));
    }
    if arg.is_empty() {
        return Err(KernelError::NullInput { index });
    }
    if arg.flags.contains(ArgFlags::COPY_OUT) && matches!(arg.host, HostData::Shared(_)) {
        return Err(KernelError::InvalidArgument(format!(
            "kernel '{kernel}' argument {index}: COPY_OUT needs mutable host data"
        )));
    }
    arg.flags.access().map(|_| ())
}

fn check_local(
    kernel: &str,
    index: usize,
    kind: ElementKind,
    len: usize,
    desc: &ArgDescriptor,
) -> Result<()> {
    if !desc.is_local() || kind != desc.kind {
        return Err(mismatch(kernel, index, &format!("local {kind}*"), desc));
    }
    if len == 0 {
        return Err(KernelError::InvalidArgument(format!(
            "kernel '{kernel}' argument {index}: local scratch of zero elements"
        )));
    }
    Ok(())
}

/// Whether a parameter is bound to device memory created per call.
pub fn needs_buffer(desc: &ArgDescriptor) -> bool {
    desc.is_pointer && matches!(desc.address_space, AddressSpace::Global | AddressSpace::Constant)
}
