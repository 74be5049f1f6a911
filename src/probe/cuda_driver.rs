// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Minimal runtime binding of the CUDA driver API for host-to-device copies.

use std::ffi::{c_char, c_void, CStr};
use std::time::{Duration, Instant};

use libloading::{Library, Symbol};

use crate::error::{Error, Result};
use crate::probe::transfer_speed::TransferBackend;

type CuResult = i32;
type CuDevice = i32;
type CuDevicePtr = u64;
type CuContext = *mut c_void;

const CUDA_SUCCESS: CuResult = 0;

#[cfg(target_os = "windows")]
const DRIVER_PATHS: &[&str] = &["nvcuda.dll"];
#[cfg(not(target_os = "windows"))]
const DRIVER_PATHS: &[&str] = &["libcuda.so.1", "libcuda.so"];

type CuInitFn = unsafe extern "C" fn(u32) -> CuResult;
type CuDeviceGetCountFn = unsafe extern "C" fn(*mut i32) -> CuResult;
type CuDeviceGetFn = unsafe extern "C" fn(*mut CuDevice, i32) -> CuResult;
type CuDeviceGetNameFn = unsafe extern "C" fn(*mut c_char, i32, CuDevice) -> CuResult;
type CuPrimaryCtxRetainFn = unsafe extern "C" fn(*mut CuContext, CuDevice) -> CuResult;
type CuPrimaryCtxReleaseFn = unsafe extern "C" fn(CuDevice) -> CuResult;
type CuCtxSetCurrentFn = unsafe extern "C" fn(CuContext) -> CuResult;
type CuCtxSynchronizeFn = unsafe extern "C" fn() -> CuResult;
type CuMemAllocFn = unsafe extern "C" fn(*mut CuDevicePtr, usize) -> CuResult;
type CuMemFreeFn = unsafe extern "C" fn(CuDevicePtr) -> CuResult;
type CuMemcpyHtoDFn = unsafe extern "C" fn(CuDevicePtr, *const c_void, usize) -> CuResult;
type CuMemHostAllocFn = unsafe extern "C" fn(*mut *mut c_void, usize, u32) -> CuResult;
type CuMemFreeHostFn = unsafe extern "C" fn(*mut c_void) -> CuResult;

/// Entry points resolved once at load time.
struct DriverApi {
    ctx_set_current: CuCtxSetCurrentFn,
    ctx_synchronize: CuCtxSynchronizeFn,
    mem_alloc: CuMemAllocFn,
    mem_free: CuMemFreeFn,
    memcpy_htod: CuMemcpyHtoDFn,
    mem_host_alloc: CuMemHostAllocFn,
    mem_free_host: CuMemFreeHostFn,
    primary_ctx_release: Option<CuPrimaryCtxReleaseFn>,
}

/// The CUDA driver bound to device 0 through its primary context.
pub struct CudaDriver {
    api: DriverApi,
    device: CuDevice,
    context: CuContext,
    device_name: String,
    // Keeps the function pointers in `api` valid; dropped last
    _library: Library,
}

// SAFETY: the CUDA driver API is thread-safe and the primary context may be
// made current on any thread. `context` is only handed back to the driver.
unsafe impl Send for CudaDriver {}
// SAFETY: see above; no method mutates `CudaDriver` itself.
unsafe impl Sync for CudaDriver {}

fn check(result: CuResult, call: &str) -> Result<()> {
    if result == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(Error::Probe(format!("{call} failed with CUDA error {result}")))
    }
}

/// Copies a function pointer out of the library.
///
/// # Safety
/// `T` must match the C signature of `name`.
unsafe fn symbol<T: Copy>(library: &Library, name: &[u8]) -> Result<T> {
    // SAFETY: upheld by the caller.
    let symbol: Symbol<T> = unsafe { library.get(name) }.map_err(|e| {
        Error::NotSupported(format!(
            "CUDA driver symbol {} missing: {e}",
            String::from_utf8_lossy(name.strip_suffix(b"\0").unwrap_or(name))
        ))
    })?;
    Ok(*symbol)
}

impl CudaDriver {
    /// Loads the driver library and retains the primary context of device 0.
    ///
    /// Fails with [`Error::NotSupported`] when no driver or no device exists.
    pub fn load() -> Result<Self> {
        let library = DRIVER_PATHS
            .iter()
            // SAFETY: loading the vendor driver runs its initializers, which
            // is what every CUDA application does.
            .find_map(|path| unsafe { Library::new(*path) }.ok())
            .ok_or_else(|| Error::NotSupported("CUDA driver library not found".to_string()))?;

        // SAFETY: every signature below matches cuda.h of the v2 driver API.
        unsafe {
            let init: CuInitFn = symbol(&library, b"cuInit\0")?;
            let device_get_count: CuDeviceGetCountFn = symbol(&library, b"cuDeviceGetCount\0")?;
            let device_get: CuDeviceGetFn = symbol(&library, b"cuDeviceGet\0")?;
            let device_get_name: CuDeviceGetNameFn = symbol(&library, b"cuDeviceGetName\0")?;
            let primary_ctx_retain: CuPrimaryCtxRetainFn =
                symbol(&library, b"cuDevicePrimaryCtxRetain\0")?;
            let primary_ctx_release: Option<CuPrimaryCtxReleaseFn> =
                symbol(&library, b"cuDevicePrimaryCtxRelease_v2\0")
                    .or_else(|_| symbol(&library, b"cuDevicePrimaryCtxRelease\0"))
                    .ok();

            let api = DriverApi {
                ctx_set_current: symbol(&library, b"cuCtxSetCurrent\0")?,
                ctx_synchronize: symbol(&library, b"cuCtxSynchronize\0")?,
                mem_alloc: symbol(&library, b"cuMemAlloc_v2\0")?,
                mem_free: symbol(&library, b"cuMemFree_v2\0")?,
                memcpy_htod: symbol(&library, b"cuMemcpyHtoD_v2\0")?,
                mem_host_alloc: symbol(&library, b"cuMemHostAlloc\0")?,
                mem_free_host: symbol(&library, b"cuMemFreeHost\0")?,
                primary_ctx_release,
            };

            check(init(0), "cuInit").map_err(|e| Error::NotSupported(e.to_string()))?;

            let mut count = 0;
            check(device_get_count(&mut count), "cuDeviceGetCount")?;
            if count <= 0 {
                return Err(Error::NotSupported("no CUDA device present".to_string()));
            }

            let mut device: CuDevice = 0;
            check(device_get(&mut device, 0), "cuDeviceGet")?;

            let mut name = [0 as c_char; 256];
            let device_name = if device_get_name(name.as_mut_ptr(), name.len() as i32, device)
                == CUDA_SUCCESS
            {
                CStr::from_ptr(name.as_ptr()).to_string_lossy().into_owned()
            } else {
                "Unknown GPU".to_string()
            };

            let mut context: CuContext = std::ptr::null_mut();
            check(
                primary_ctx_retain(&mut context, device),
                "cuDevicePrimaryCtxRetain",
            )?;
            if context.is_null() {
                return Err(Error::Probe("primary context is null".to_string()));
            }

            Ok(Self {
                api,
                device,
                context,
                device_name,
                _library: library,
            })
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    fn make_current(&self) -> Result<()> {
        // SAFETY: `context` was retained in `load` and is released only on drop.
        check(unsafe { (self.api.ctx_set_current)(self.context) }, "cuCtxSetCurrent")
    }

    fn synchronize(&self) -> Result<()> {
        // SAFETY: a context is current on this thread.
        check(unsafe { (self.api.ctx_synchronize)() }, "cuCtxSynchronize")
    }

    /// Times one synchronous copy of `bytes` bytes from `src` to a fresh device buffer.
    fn timed_copy(&self, src: *const c_void, bytes: usize) -> Result<Duration> {
        let mut device_ptr: CuDevicePtr = 0;
        // SAFETY: out-pointer is valid; size is the caller's buffer length.
        check(
            unsafe { (self.api.mem_alloc)(&mut device_ptr, bytes) },
            "cuMemAlloc",
        )?;

        let result = self.copy_and_time(device_ptr, src, bytes);

        // SAFETY: `device_ptr` came from cuMemAlloc above.
        if let Err(e) = check(unsafe { (self.api.mem_free)(device_ptr) }, "cuMemFree") {
            tracing::debug!("{e}");
        }
        result
    }

    fn copy_and_time(&self, dst: CuDevicePtr, src: *const c_void, bytes: usize) -> Result<Duration> {
        self.synchronize()?;
        let start = Instant::now();
        // SAFETY: `src` points to at least `bytes` readable bytes and `dst`
        // to a device allocation of the same size.
        check(
            unsafe { (self.api.memcpy_htod)(dst, src, bytes) },
            "cuMemcpyHtoD",
        )?;
        self.synchronize()?;
        Ok(start.elapsed())
    }
}

impl TransferBackend for CudaDriver {
    fn transfer(&self, data: &[f32], pinned: bool) -> Result<Duration> {
        self.make_current()?;
        let bytes = std::mem::size_of_val(data);

        if !pinned {
            return self.timed_copy(data.as_ptr().cast(), bytes);
        }

        let mut host: *mut c_void = std::ptr::null_mut();
        // SAFETY: out-pointer is valid; flags 0 requests plain page-locked memory.
        check(
            unsafe { (self.api.mem_host_alloc)(&mut host, bytes, 0) },
            "cuMemHostAlloc",
        )?;
        if host.is_null() {
            return Err(Error::Probe("cuMemHostAlloc returned null".to_string()));
        }

        // SAFETY: `host` is a fresh allocation of `bytes` bytes that does not
        // overlap `data`.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr().cast::<u8>(), host.cast::<u8>(), bytes);
        }
        let result = self.timed_copy(host, bytes);

        // SAFETY: `host` came from cuMemHostAlloc above.
        if let Err(e) = check(unsafe { (self.api.mem_free_host)(host) }, "cuMemFreeHost") {
            tracing::debug!("{e}");
        }
        result
    }
}

impl Drop for CudaDriver {
    fn drop(&mut self) {
        if let Some(release) = self.api.primary_ctx_release {
            // SAFETY: balances the retain in `load`.
            let _ = unsafe { release(self.device) };
        }
    }
}
