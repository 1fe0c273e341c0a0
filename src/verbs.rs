// mlx5 RegEx Engine Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! rdma-core backed [`Device`].
//!
//! Talks to the hardware through libibverbs and libmlx5 (DevX). Only built
//! with the `rdma-core` feature; the libraries must be installed to link.

use crate::caps::is_supported;
use crate::device::{Device, ObjectHandle, PdHandle, UmemHandle, UmemRequest};
use crate::error::RegexError;
use std::ffi::CStr;
use std::io;
use std::mem;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr::{self, NonNull};

#[allow(non_camel_case_types)]
mod ffi {
    use super::*;

    #[repr(C)]
    pub struct ibv_device {
        _private: [u8; 0],
    }

    #[repr(C)]
    pub struct ibv_context {
        _private: [u8; 0],
    }

    #[repr(C)]
    pub struct ibv_pd {
        _private: [u8; 0],
    }

    #[repr(C)]
    pub struct mlx5dv_devx_obj {
        _private: [u8; 0],
    }

    #[repr(C)]
    pub struct mlx5dv_devx_umem {
        pub umem_id: u32,
    }

    #[repr(C)]
    pub struct mlx5dv_context_attr {
        pub flags: u32,
        pub comp_mask: u64,
    }

    #[repr(C)]
    pub struct mlx5dv_devx_umem_in {
        pub addr: *mut c_void,
        pub size: usize,
        pub access: u32,
        pub pgsz_bitmap: u64,
        pub comp_mask: u64,
    }

    #[repr(C)]
    pub struct mlx5dv_pd {
        pub pdn: u32,
        pub comp_mask: u64,
    }

    #[repr(C)]
    pub struct obj_pair {
        pub input: *mut c_void,
        pub output: *mut c_void,
    }

    /// `struct mlx5dv_obj`; only the PD slot is used.
    #[repr(C)]
    pub struct mlx5dv_obj {
        pub qp: obj_pair,
        pub cq: obj_pair,
        pub srq: obj_pair,
        pub rwq: obj_pair,
        pub dm: obj_pair,
        pub ah: obj_pair,
        pub pd: obj_pair,
    }

    pub const MLX5DV_CONTEXT_FLAGS_DEVX: u32 = 1 << 0;
    pub const MLX5DV_OBJ_PD: u64 = 1 << 6;

    #[link(name = "ibverbs")]
    extern "C" {
        pub fn ibv_get_device_list(num_devices: *mut c_int) -> *mut *mut ibv_device;
        pub fn ibv_free_device_list(list: *mut *mut ibv_device);
        pub fn ibv_get_device_name(device: *mut ibv_device) -> *const c_char;
        pub fn ibv_close_device(context: *mut ibv_context) -> c_int;
        pub fn ibv_alloc_pd(context: *mut ibv_context) -> *mut ibv_pd;
        pub fn ibv_dealloc_pd(pd: *mut ibv_pd) -> c_int;
    }

    #[link(name = "mlx5")]
    extern "C" {
        pub fn mlx5dv_is_supported(device: *mut ibv_device) -> bool;
        pub fn mlx5dv_open_device(
            device: *mut ibv_device,
            attr: *mut mlx5dv_context_attr,
        ) -> *mut ibv_context;
        pub fn mlx5dv_init_obj(obj: *mut mlx5dv_obj, obj_type: u64) -> c_int;
        pub fn mlx5dv_devx_general_cmd(
            context: *mut ibv_context,
            input: *const c_void,
            inlen: usize,
            output: *mut c_void,
            outlen: usize,
        ) -> c_int;
        pub fn mlx5dv_devx_obj_create(
            context: *mut ibv_context,
            input: *const c_void,
            inlen: usize,
            output: *mut c_void,
            outlen: usize,
        ) -> *mut mlx5dv_devx_obj;
        pub fn mlx5dv_devx_obj_destroy(obj: *mut mlx5dv_devx_obj) -> c_int;
        pub fn mlx5dv_devx_umem_reg_ex(
            context: *mut ibv_context,
            umem_in: *mut mlx5dv_devx_umem_in,
        ) -> *mut mlx5dv_devx_umem;
        pub fn mlx5dv_devx_umem_dereg(umem: *mut mlx5dv_devx_umem) -> c_int;
    }
}

/// Turn an rdma-core return code into an `io::Result`.
///
/// rdma-core returns either a positive errno or -1 with `errno` set.
fn check(ret: c_int) -> io::Result<()> {
    match ret {
        0 => Ok(()),
        r if r > 0 => Err(io::Error::from_raw_os_error(r)),
        _ => Err(io::Error::last_os_error()),
    }
}

/// The device list returned by `ibv_get_device_list`.
struct DeviceList {
    list: NonNull<*mut ffi::ibv_device>,
    len: usize,
}

impl DeviceList {
    fn get() -> io::Result<Self> {
        let mut num: c_int = 0;
        // SAFETY: num is a valid out-pointer.
        let list = unsafe { ffi::ibv_get_device_list(&mut num) };
        let list = NonNull::new(list).ok_or_else(io::Error::last_os_error)?;
        Ok(Self {
            list,
            len: num.max(0) as usize,
        })
    }

    fn iter(&self) -> impl Iterator<Item = *mut ffi::ibv_device> + '_ {
        // SAFETY: the list holds `len` valid entries until it is freed on drop.
        (0..self.len).map(move |i| unsafe { *self.list.as_ptr().add(i) })
    }
}

impl Drop for DeviceList {
    fn drop(&mut self) {
        // SAFETY: the list came from ibv_get_device_list and is freed once.
        unsafe { ffi::ibv_free_device_list(self.list.as_ptr()) };
    }
}

fn device_name(device: *mut ffi::ibv_device) -> String {
    // SAFETY: device comes from a live device list.
    let name = unsafe { ffi::ibv_get_device_name(device) };
    if name.is_null() {
        return String::from("<unnamed>");
    }
    // SAFETY: rdma-core returns a NUL-terminated name owned by the device.
    unsafe { CStr::from_ptr(name) }
        .to_string_lossy()
        .into_owned()
}

/// An mlx5 device opened with DevX enabled.
pub struct VerbsDevice {
    context: NonNull<ffi::ibv_context>,
    name: String,
}

impl VerbsDevice {
    fn open(device: *mut ffi::ibv_device) -> io::Result<Self> {
        let name = device_name(device);
        let mut attr = ffi::mlx5dv_context_attr {
            flags: ffi::MLX5DV_CONTEXT_FLAGS_DEVX,
            comp_mask: 0,
        };
        // SAFETY: device comes from a live device list; attr is valid.
        let context = unsafe { ffi::mlx5dv_open_device(device, &mut attr) };
        let context = NonNull::new(context).ok_or_else(io::Error::last_os_error)?;
        log::debug!("opened {} with DevX", name);
        Ok(Self { context, name })
    }

    /// The verbs name of the device, e.g. `mlx5_0`.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn pdn(pd: *mut ffi::ibv_pd) -> io::Result<u32> {
        let mut info = ffi::mlx5dv_pd {
            pdn: 0,
            comp_mask: 0,
        };
        // SAFETY: mlx5dv_obj is plain pointers; all-null is a valid value.
        let mut obj: ffi::mlx5dv_obj = unsafe { mem::zeroed() };
        obj.pd.input = pd.cast();
        obj.pd.output = ptr::addr_of_mut!(info).cast();
        // SAFETY: only the PD slot is requested and it points at live data.
        check(unsafe { ffi::mlx5dv_init_obj(&mut obj, ffi::MLX5DV_OBJ_PD) })?;
        Ok(info.pdn)
    }
}

impl Device for VerbsDevice {
    fn general_cmd(&self, input: &[u32], output: &mut [u32]) -> io::Result<()> {
        // SAFETY: both buffers are valid for their byte lengths.
        check(unsafe {
            ffi::mlx5dv_devx_general_cmd(
                self.context.as_ptr(),
                input.as_ptr().cast(),
                mem::size_of_val(input),
                output.as_mut_ptr().cast(),
                mem::size_of_val(output),
            )
        })
    }

    fn create_object(&self, input: &[u32], output: &mut [u32]) -> io::Result<ObjectHandle> {
        // SAFETY: both buffers are valid for their byte lengths.
        let obj = unsafe {
            ffi::mlx5dv_devx_obj_create(
                self.context.as_ptr(),
                input.as_ptr().cast(),
                mem::size_of_val(input),
                output.as_mut_ptr().cast(),
                mem::size_of_val(output),
            )
        };
        if obj.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(ObjectHandle(obj as usize))
    }

    fn destroy_object(&self, object: ObjectHandle) -> io::Result<()> {
        // SAFETY: the handle came from create_object and is destroyed once.
        check(unsafe { ffi::mlx5dv_devx_obj_destroy(object.0 as *mut ffi::mlx5dv_devx_obj) })
    }

    fn register_umem(&self, request: &UmemRequest) -> io::Result<UmemHandle> {
        let mut umem_in = ffi::mlx5dv_devx_umem_in {
            addr: request.addr.cast(),
            size: request.size,
            access: request.access.bits(),
            pgsz_bitmap: request.pgsz_bitmap,
            comp_mask: 0,
        };
        // SAFETY: the caller keeps the buffer mapped while it is registered.
        let umem = unsafe { ffi::mlx5dv_devx_umem_reg_ex(self.context.as_ptr(), &mut umem_in) };
        if umem.is_null() {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: umem is non-null and owned by us until deregistered.
        let id = unsafe { (*umem).umem_id };
        Ok(UmemHandle {
            raw: umem as usize,
            id,
        })
    }

    fn deregister_umem(&self, umem: UmemHandle) -> io::Result<()> {
        // SAFETY: the handle came from register_umem and is deregistered once.
        check(unsafe { ffi::mlx5dv_devx_umem_dereg(umem.raw as *mut ffi::mlx5dv_devx_umem) })
    }

    fn alloc_pd(&self) -> io::Result<PdHandle> {
        // SAFETY: the context is open.
        let pd = unsafe { ffi::ibv_alloc_pd(self.context.as_ptr()) };
        if pd.is_null() {
            return Err(io::Error::last_os_error());
        }
        match Self::pdn(pd) {
            Ok(pdn) => Ok(PdHandle {
                raw: pd as usize,
                pdn,
            }),
            Err(e) => {
                // SAFETY: pd was allocated above and nothing references it.
                unsafe { ffi::ibv_dealloc_pd(pd) };
                Err(e)
            }
        }
    }

    fn dealloc_pd(&self, pd: PdHandle) -> io::Result<()> {
        // SAFETY: the handle came from alloc_pd and is released once.
        check(unsafe { ffi::ibv_dealloc_pd(pd.raw as *mut ffi::ibv_pd) })
    }
}

impl Drop for VerbsDevice {
    fn drop(&mut self) {
        // SAFETY: the context was opened by us and is closed once.
        if let Err(e) = check(unsafe { ffi::ibv_close_device(self.context.as_ptr()) }) {
            log::warn!("closing {}: {}", self.name, e);
        }
    }
}

impl std::fmt::Debug for VerbsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerbsDevice").field("name", &self.name).finish()
    }
}

/// Names of the mlx5 devices on this system.
pub fn discover_devices() -> Result<Vec<String>, RegexError> {
    let list = DeviceList::get()?;
    Ok(list
        .iter()
        // SAFETY: entries of a live device list.
        .filter(|dev| unsafe { ffi::mlx5dv_is_supported(*dev) })
        .map(device_name)
        .collect())
}

/// Open the first mlx5 device that offers regex offload.
///
/// Devices that cannot be opened with DevX are skipped.
///
/// # Errors
///
/// - [`RegexError::NoDeviceFound`] if there are no RDMA devices at all
/// - [`RegexError::Unsupported`] if none of them supports regex offload
pub fn open_first_supported() -> Result<VerbsDevice, RegexError> {
    let list = DeviceList::get()?;
    if list.len == 0 {
        log::info!("no RDMA devices found");
        return Err(RegexError::NoDeviceFound);
    }

    for dev in list.iter() {
        // SAFETY: entry of a live device list.
        if !unsafe { ffi::mlx5dv_is_supported(dev) } {
            continue;
        }
        let device = match VerbsDevice::open(dev) {
            Ok(device) => device,
            Err(e) => {
                log::warn!("{}: DevX unavailable: {}", device_name(dev), e);
                continue;
            }
        };
        if is_supported(&device) {
            log::info!("using {} for regex offload", device.name());
            return Ok(device);
        }
        log::debug!("{}: no regex offload", device.name());
    }

    log::info!("regex offload not supported on any of {} device(s)", list.len);
    Err(RegexError::Unsupported)
}
