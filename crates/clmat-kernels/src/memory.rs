//! Device buffers and host↔device transfers.
//!
//! Buffers only ever live for the duration of one kernel invocation. They
//! are collected in a [`BufferSet`] which releases everything it holds on
//! drop, so early returns in the invoker cannot leak device memory.

use std::ffi::c_void;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use crate::error::KernelError;
use crate::Result;
use crate::ffi::{
    check_cl, ClBitfield, ClCommandQueue, ClContext, ClInt, ClMem, OpenClApi, CL_MEM_READ_ONLY,
    CL_MEM_READ_WRITE, CL_MEM_WRITE_ONLY, CL_SUCCESS, CL_TRUE,
};

/// Transfer and access flags attached to a buffer argument.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ArgFlags {
    bits: u32,
}

impl ArgFlags {
    /// Write host data into the device buffer before dispatch.
    pub const COPY_IN: ArgFlags = ArgFlags { bits: 1 << 0 };
    /// The kernel only reads the buffer.
    pub const READ_ONLY: ArgFlags = ArgFlags { bits: 1 << 1 };
    /// The kernel only writes the buffer.
    pub const WRITE_ONLY: ArgFlags = ArgFlags { bits: 1 << 2 };
    /// Read the device buffer back into host data after dispatch.
    pub const COPY_OUT: ArgFlags = ArgFlags { bits: 1 << 3 };
    /// `READ_ONLY | WRITE_ONLY`.
    pub const READ_WRITE: ArgFlags = ArgFlags { bits: (1 << 1) | (1 << 2) };

    const ALL: u32 = 0b1111;

    pub const fn empty() -> Self {
        ArgFlags { bits: 0 }
    }

    /// Build from raw bits. Unknown bits are kept so validation can reject them.
    pub const fn from_bits(bits: u32) -> Self {
        ArgFlags { bits }
    }

    pub const fn bits(self) -> u32 {
        self.bits
    }

    pub const fn contains(self, other: ArgFlags) -> bool {
        self.bits & other.bits == other.bits
    }

    /// Device access mode implied by the access bits.
    pub fn access(self) -> Result<AccessMode> {
        if self.bits & !Self::ALL != 0 {
            return Err(KernelError::InvalidArgument(format!(
                "unknown flag bits {:#x}",
                self.bits & !Self::ALL
            )));
        }
        match (self.contains(Self::READ_ONLY), self.contains(Self::WRITE_ONLY)) {
            (true, true) => Ok(AccessMode::ReadWrite),
            (true, false) => Ok(AccessMode::ReadOnly),
            (false, true) => Ok(AccessMode::WriteOnly),
            (false, false) => Err(KernelError::InvalidArgument(format!(
                "flags {self:?} carry no access mode"
            ))),
        }
    }
}

impl BitOr for ArgFlags {
    type Output = ArgFlags;

    fn bitor(self, rhs: ArgFlags) -> ArgFlags {
        ArgFlags { bits: self.bits | rhs.bits }
    }
}

impl fmt::Debug for ArgFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::COPY_IN, "COPY_IN"),
            (Self::READ_ONLY, "READ_ONLY"),
            (Self::WRITE_ONLY, "WRITE_ONLY"),
            (Self::COPY_OUT, "COPY_OUT"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "ArgFlags(empty)")
        } else {
            write!(f, "ArgFlags({})", set.join(" | "))
        }
    }
}

/// Device-side access mode of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn as_mem_flags(self) -> ClBitfield {
        match self {
            AccessMode::ReadOnly => CL_MEM_READ_ONLY,
            AccessMode::WriteOnly => CL_MEM_WRITE_ONLY,
            AccessMode::ReadWrite => CL_MEM_READ_WRITE,
        }
    }
}

/// An OpenCL memory object of `nbytes` bytes.
///
/// Released via `clReleaseMemObject` on drop.
pub struct DeviceBuffer {
    api: Arc<OpenClApi>,
    mem: ClMem,
    nbytes: usize,
}

impl DeviceBuffer {
    /// Allocate an uninitialised device buffer.
    pub fn allocate(
        api: &Arc<OpenClApi>,
        context: ClContext,
        access: AccessMode,
        nbytes: usize,
    ) -> Result<Self> {
        let mut err: ClInt = CL_SUCCESS;
        let mem = unsafe {
            (api.create_buffer)(context, access.as_mem_flags(), nbytes, std::ptr::null_mut(), &mut err)
        };
        check_cl(err, "clCreateBuffer")?;
        tracing::debug!(nbytes, ?access, "allocated device buffer");
        Ok(Self { api: Arc::clone(api), mem, nbytes })
    }

    /// Blocking host → device copy of `data` into the start of the buffer.
    pub fn write(&self, queue: ClCommandQueue, data: &[u8]) -> Result<()> {
        if data.len() > self.nbytes {
            return Err(KernelError::InvalidArgument(format!(
                "write of {} bytes into a {}-byte buffer",
                data.len(),
                self.nbytes
            )));
        }
        check_cl(
            unsafe {
                (self.api.enqueue_write_buffer)(
                    queue,
                    self.mem,
                    CL_TRUE,
                    0,
                    data.len(),
                    data.as_ptr() as *const c_void,
                    0,
                    std::ptr::null(),
                    std::ptr::null_mut(),
                )
            },
            "clEnqueueWriteBuffer",
        )
    }

    /// Blocking device → host copy from the start of the buffer into `out`.
    pub fn read(&self, queue: ClCommandQueue, out: &mut [u8]) -> Result<()> {
        if out.len() > self.nbytes {
            return Err(KernelError::InvalidArgument(format!(
                "read of {} bytes from a {}-byte buffer",
                out.len(),
                self.nbytes
            )));
        }
        check_cl(
            unsafe {
                (self.api.enqueue_read_buffer)(
                    queue,
                    self.mem,
                    CL_TRUE,
                    0,
                    out.len(),
                    out.as_mut_ptr() as *mut c_void,
                    0,
                    std::ptr::null(),
                    std::ptr::null_mut(),
                )
            },
            "clEnqueueReadBuffer",
        )
    }

    /// Number of bytes in this buffer.
    pub fn len(&self) -> usize {
        self.nbytes
    }

    pub fn is_empty(&self) -> bool {
        self.nbytes == 0
    }

    /// Raw handle, for binding as a kernel argument.
    pub fn as_raw(&self) -> &ClMem {
        &self.mem
    }

    /// Release now and report the runtime status.
    pub fn release(mut self) -> Result<()> {
        let mem = std::mem::replace(&mut self.mem, std::ptr::null_mut());
        check_cl(unsafe { (self.api.release_mem_object)(mem) }, "clReleaseMemObject")
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if !self.mem.is_null() {
            let _ = unsafe { (self.api.release_mem_object)(self.mem) };
        }
    }
}

/// Scoped owner of every device buffer created for one invocation, keyed
/// by argument position.
pub struct BufferSet {
    buffers: Vec<(usize, DeviceBuffer)>,
}

impl BufferSet {
    pub fn new() -> Self {
        Self { buffers: Vec::new() }
    }

    pub fn push(&mut self, arg_index: usize, buffer: DeviceBuffer) {
        self.buffers.push((arg_index, buffer));
    }

    pub fn get(&self, arg_index: usize) -> Option<&DeviceBuffer> {
        self.buffers.iter().find(|(i, _)| *i == arg_index).map(|(_, b)| b)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &DeviceBuffer)> {
        self.buffers.iter().map(|(i, b)| (*i, b))
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Release every buffer, returning the first failure after all of them
    /// have been released.
    pub fn release_all(mut self) -> Result<()> {
        let mut first_err = None;
        for (_, buffer) in self.buffers.drain(..) {
            if let Err(e) = buffer.release() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BufferSet {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            tracing::debug!(count = self.buffers.len(), "releasing device buffers on early exit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_modes() {
        assert_eq!((ArgFlags::COPY_IN | ArgFlags::READ_ONLY).access().unwrap(), AccessMode::ReadOnly);
        assert_eq!((ArgFlags::WRITE_ONLY | ArgFlags::COPY_OUT).access().unwrap(), AccessMode::WriteOnly);
        assert_eq!(
            (ArgFlags::READ_ONLY | ArgFlags::WRITE_ONLY).access().unwrap(),
            AccessMode::ReadWrite
        );
        assert_eq!(ArgFlags::READ_WRITE, ArgFlags::READ_ONLY | ArgFlags::WRITE_ONLY);
    }

    #[test]
    fn test_flags_without_access_are_rejected() {
        assert!(matches!(
            (ArgFlags::COPY_IN | ArgFlags::COPY_OUT).access(),
            Err(KernelError::InvalidArgument(_))
        ));
        assert!(ArgFlags::empty().access().is_err());
        assert!(ArgFlags::from_bits(0b1_0010).access().is_err());
    }

    #[test]
    fn test_mem_flags() {
        assert_eq!(AccessMode::ReadOnly.as_mem_flags(), CL_MEM_READ_ONLY);
        assert_eq!(AccessMode::WriteOnly.as_mem_flags(), CL_MEM_WRITE_ONLY);
        assert_eq!(AccessMode::ReadWrite.as_mem_flags(), CL_MEM_READ_WRITE);
    }

    #[test]
    fn test_flags_debug() {
        assert_eq!(format!("{:?}", ArgFlags::COPY_IN | ArgFlags::READ_ONLY), "ArgFlags(COPY_IN | READ_ONLY)");
        assert_eq!(format!("{:?}", ArgFlags::empty()), "ArgFlags(empty)");
    }
}
