// mlx5 RegEx Engine Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Host memory registration and memory keys.
//!
//! A database is a host buffer the device reads and writes by DMA. Making it
//! usable takes three resources, created in this order and released in the
//! reverse one:
//!
//! 1. the mapping itself ([`HostBuffer`]),
//! 2. its DMA registration with the device (a umem),
//! 3. a memory key describing address translation and access rights.
//!
//! [`MemoryKey`] owns all three. Releasing a layer is only attempted once the
//! layer above it is gone; if the device refuses to drop a layer, everything
//! below it is deliberately leaked rather than freed under a live mapping.

use crate::config::{Backing, RegexConfig};
use crate::device::{trace_command, Access, Device, ObjectHandle, PdHandle, UmemHandle, UmemRequest};
use crate::error::RegexError;
use crate::layout::{create_mkey_in, create_mkey_out, mkc, CreateMkeyIn, CreateMkeyOut};
use crate::opcode::Opcode;
use scopeguard::ScopeGuard;
use std::io;
use std::ptr::NonNull;

/// Anonymous memory mapping owned for the lifetime of a registration.
#[derive(Debug)]
pub struct HostBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

impl HostBuffer {
    /// Map `len` bytes of zero-filled memory.
    ///
    /// With [`Backing::HugeTlb`] the mapping is shared, populated up front and
    /// served from the reserved huge page pool, so it is never swapped and is
    /// aligned to the huge page size.
    pub fn allocate(len: usize, backing: Backing) -> io::Result<Self> {
        let flags = match backing {
            Backing::HugeTlb => {
                libc::MAP_SHARED | libc::MAP_ANONYMOUS | libc::MAP_POPULATE | libc::MAP_HUGETLB
            }
            Backing::Standard => libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        };

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // Anonymous mappings are zero-filled by the kernel.
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;
        Ok(Self { ptr, len })
    }

    /// Start of the mapping.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Start of the mapping as a device virtual address.
    pub fn addr(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }

    /// Length of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The mapped bytes.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping is readable for `len` bytes until drop.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        let rc = unsafe { libc::munmap(self.ptr.as_ptr().cast::<libc::c_void>(), self.len) };
        if rc != 0 {
            log::warn!(
                "munmap of {} bytes at {:#x} failed: {}",
                self.len,
                self.addr(),
                io::Error::last_os_error()
            );
        }
    }
}

/// A host buffer registered with the device for DMA.
#[derive(Debug)]
pub struct MemoryRegistration {
    buffer: HostBuffer,
    umem: UmemHandle,
}

impl MemoryRegistration {
    pub fn buffer(&self) -> &HostBuffer {
        &self.buffer
    }

    pub fn umem(&self) -> UmemHandle {
        self.umem
    }
}

/// Size of the key's translation table entry, in 16-byte octwords.
///
/// The registered extent is rounded up to whole pages first; the device
/// refuses DMA outside the window this describes.
pub fn translation_octword_size(size: usize, page_size: usize) -> u64 {
    let aligned = (size as u64).div_ceil(page_size as u64) * page_size as u64;
    aligned * 8 / 16
}

/// A hardware memory key together with the registration it describes.
///
/// Call [`MemoryKey::release`] to tear it down and observe errors; dropping
/// an unreleased key releases it and logs any failure.
pub struct MemoryKey<'d, D: Device + ?Sized> {
    device: &'d D,
    id: u32,
    pdn: u32,
    addr: u64,
    size: usize,
    object: Option<ObjectHandle>,
    registration: Option<MemoryRegistration>,
}

impl<'d, D: Device + ?Sized> MemoryKey<'d, D> {
    /// Key id as used in commands (mkey index << 8 | variant byte).
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Protection domain the key was created under.
    pub fn pdn(&self) -> u32 {
        self.pdn
    }

    /// Virtual base address of the registered buffer.
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// Size of the registered buffer in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The registration backing this key.
    pub fn registration(&self) -> Option<&MemoryRegistration> {
        self.registration.as_ref()
    }

    /// Destroy the key, deregister the memory, then unmap it.
    pub fn release(mut self) -> Result<(), RegexError> {
        self.release_inner()
    }

    /// Give up the key and its memory without touching the device.
    ///
    /// Used when the device may still reference the memory.
    pub(crate) fn leak(mut self) {
        self.object = None;
        if let Some(registration) = self.registration.take() {
            std::mem::forget(registration);
        }
    }

    fn release_inner(&mut self) -> Result<(), RegexError> {
        if let Some(object) = self.object.take() {
            if let Err(source) = self.device.destroy_object(object) {
                if let Some(registration) = self.registration.take() {
                    std::mem::forget(registration);
                }
                return Err(RegexError::Release {
                    resource: "memory key",
                    source,
                });
            }
        }

        if let Some(MemoryRegistration { buffer, umem }) = self.registration.take() {
            if let Err(source) = self.device.deregister_umem(umem) {
                std::mem::forget(buffer);
                return Err(RegexError::Release {
                    resource: "memory registration",
                    source,
                });
            }
            drop(buffer);
        }

        log::debug!("released memory key {:#x}", self.id);
        Ok(())
    }
}

impl<D: Device + ?Sized> Drop for MemoryKey<'_, D> {
    fn drop(&mut self) {
        if self.object.is_some() || self.registration.is_some() {
            if let Err(e) = self.release_inner() {
                log::warn!("dropping memory key {:#x}: {}", self.id, e);
            }
        }
    }
}

impl<D: Device + ?Sized> std::fmt::Debug for MemoryKey<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKey")
            .field("id", &format_args!("{:#x}", self.id))
            .field("pdn", &self.pdn)
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("size", &self.size)
            .finish()
    }
}

/// Allocate, register and key a buffer of `size` bytes.
///
/// On failure every resource acquired by this call is released again before
/// the error is returned.
pub fn register_memory<'d, D: Device + ?Sized>(
    device: &'d D,
    pd: PdHandle,
    size: usize,
    access: Access,
    config: &RegexConfig,
) -> Result<MemoryKey<'d, D>, RegexError> {
    let page_size = config.get_page_size();
    let backing = config.get_backing();

    if !page_size.is_power_of_two() || size == 0 || size % page_size != 0 {
        return Err(RegexError::InvalidArgument(format!(
            "{} bytes is not a non-zero multiple of the page size {}",
            size, page_size
        )));
    }

    let translation_size = u32::try_from(translation_octword_size(size, page_size))
        .map_err(|_| RegexError::InvalidArgument(format!("{} bytes is too large for one key", size)))?;

    let buffer = HostBuffer::allocate(size, backing).map_err(|source| {
        let err = RegexError::Allocation {
            size,
            backing,
            source,
        };
        log::error!("{}", err);
        err
    })?;

    // The start address is page aligned, so the umem must be mapped with the
    // same page size for the key to be accepted.
    let request = UmemRequest {
        addr: buffer.as_ptr(),
        size,
        access,
        pgsz_bitmap: page_size as u64,
    };
    let umem = device.register_umem(&request).map_err(|source| {
        let err = RegexError::Registration {
            addr: buffer.addr(),
            size,
            source,
        };
        log::error!("{}", err);
        err
    })?;
    let umem = scopeguard::guard(umem, |umem| {
        if let Err(e) = device.deregister_umem(umem) {
            log::warn!("failed to deregister umem {} while unwinding: {}", umem.id, e);
        }
    });

    let mut input = CreateMkeyIn::new();
    input.set(create_mkey_in::OPCODE, Opcode::CreateMkey.as_u16() as u32);
    input.set(create_mkey_in::PG_ACCESS, 1);
    input.set(create_mkey_in::MKEY_UMEM_VALID, 1);
    input.set(create_mkey_in::MKEY_UMEM_ID, umem.id);

    let entry = create_mkey_in::entry;
    input.set(entry(mkc::LOG_PAGE_SIZE), page_size.trailing_zeros());
    input.set(entry(mkc::ACCESS_MODE_1_0), mkc::ACCESS_MODE_MTT);
    input.set(entry(mkc::LW), 1);
    input.set(entry(mkc::LR), 1);
    input.set(entry(mkc::QPN), mkc::QPN_ANY);
    input.set(entry(mkc::PD), pd.pdn);
    input.set(entry(mkc::MKEY_7_0), umem.id & 0xff);
    input.set(entry(mkc::UMR_EN), 0);
    input.set(entry(mkc::TRANSLATIONS_OCTWORD_SIZE), translation_size);
    input.set(entry(mkc::RELAXED_ORDERING_WRITE), 0);
    input.set(entry(mkc::RELAXED_ORDERING_READ), 0);
    input.set64(entry(mkc::START_ADDR), buffer.addr());
    input.set64(entry(mkc::LEN), size as u64);

    trace_command("in", Opcode::CreateMkey, input.as_bytes());
    let mut output = CreateMkeyOut::new();
    let object = device
        .create_object(input.as_words(), output.as_words_mut())
        .map_err(|source| {
            let err = RegexError::ObjectCreation {
                object: "memory key",
                source,
            };
            log::error!("{}", err);
            err
        })?;

    let umem = ScopeGuard::into_inner(umem);
    let index = output.get(create_mkey_out::MKEY_INDEX);
    let id = (index << 8) | (umem.id & 0xff);
    let addr = buffer.addr();

    log::debug!(
        "registered {} bytes at {:#x} as umem {}, mkey {:#x}",
        size,
        addr,
        umem.id,
        id
    );

    Ok(MemoryKey {
        device,
        id,
        pdn: pd.pdn,
        addr,
        size,
        object: Some(object),
        registration: Some(MemoryRegistration { buffer, umem }),
    })
}
