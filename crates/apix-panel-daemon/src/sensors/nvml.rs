//! Runtime binding to the NVIDIA management library.
//!
//! The library is dlopened so the daemon carries no build-time NVIDIA
//! dependency. Every symbol resolves with a `_v2` preference where the API
//! has one; if the library or any symbol is missing, or init fails, the
//! probe reports the GPU as unavailable.

use std::os::raw::{c_int, c_uint, c_void};

use libloading::Library;
use tracing::debug;

use super::gpu::GpuStats;

const NVML_SUCCESS: c_int = 0;
const NVML_TEMPERATURE_GPU: c_int = 0;
const NVML_CLOCK_GRAPHICS: c_int = 0;

/// Library names and paths tried in order.
const LIBRARY_PATHS: [&str; 5] = [
    "libnvidia-ml.so.1",
    "libnvidia-ml.so",
    "/usr/lib/x86_64-linux-gnu/libnvidia-ml.so.1",
    "/usr/lib64/libnvidia-ml.so.1",
    "/usr/local/cuda/lib64/libnvidia-ml.so.1",
];

#[repr(C)]
struct Utilization {
    gpu: c_uint,
    memory: c_uint,
}

type InitFn = unsafe extern "C" fn() -> c_int;
type ShutdownFn = unsafe extern "C" fn() -> c_int;
type DeviceGetCountFn = unsafe extern "C" fn(*mut c_uint) -> c_int;
type DeviceGetHandleByIndexFn = unsafe extern "C" fn(c_uint, *mut *mut c_void) -> c_int;
type DeviceGetTemperatureFn = unsafe extern "C" fn(*mut c_void, c_int, *mut c_uint) -> c_int;
type DeviceGetUtilizationRatesFn = unsafe extern "C" fn(*mut c_void, *mut Utilization) -> c_int;
type DeviceGetClockInfoFn = unsafe extern "C" fn(*mut c_void, c_int, *mut c_uint) -> c_int;
type DeviceGetFanSpeedFn = unsafe extern "C" fn(*mut c_void, *mut c_uint) -> c_int;

/// Resolved entry points, kept valid by the owned library handle.
pub struct Nvml {
    _lib: Library,
    shutdown: ShutdownFn,
    device_get_count: DeviceGetCountFn,
    device_get_handle_by_index: DeviceGetHandleByIndexFn,
    device_get_temperature: DeviceGetTemperatureFn,
    device_get_utilization_rates: DeviceGetUtilizationRatesFn,
    device_get_clock_info: DeviceGetClockInfoFn,
    device_get_fan_speed: DeviceGetFanSpeedFn,
}

impl Nvml {
    /// Loads the library, resolves every entry point and initializes it.
    /// None if any step fails.
    pub fn load() -> Option<Self> {
        // SAFETY: loading the vendor library runs its initializers; the
        // symbol signatures match the documented management API
        unsafe {
            let mut library = None;
            for path in LIBRARY_PATHS {
                if let Ok(lib) = Library::new(path) {
                    library = Some(lib);
                    break;
                }
            }
            let lib = library?;

            let init: InitFn = match resolve(&lib, b"nvmlInit_v2") {
                Some(f) => f,
                None => resolve(&lib, b"nvmlInit")?,
            };
            let shutdown: ShutdownFn = resolve(&lib, b"nvmlShutdown")?;
            let device_get_count: DeviceGetCountFn = match resolve(&lib, b"nvmlDeviceGetCount_v2")
            {
                Some(f) => f,
                None => resolve(&lib, b"nvmlDeviceGetCount")?,
            };
            let device_get_handle_by_index: DeviceGetHandleByIndexFn =
                match resolve(&lib, b"nvmlDeviceGetHandleByIndex_v2") {
                    Some(f) => f,
                    None => resolve(&lib, b"nvmlDeviceGetHandleByIndex")?,
                };
            let device_get_temperature: DeviceGetTemperatureFn =
                resolve(&lib, b"nvmlDeviceGetTemperature")?;
            let device_get_utilization_rates: DeviceGetUtilizationRatesFn =
                resolve(&lib, b"nvmlDeviceGetUtilizationRates")?;
            let device_get_clock_info: DeviceGetClockInfoFn =
                resolve(&lib, b"nvmlDeviceGetClockInfo")?;
            let device_get_fan_speed: DeviceGetFanSpeedFn =
                resolve(&lib, b"nvmlDeviceGetFanSpeed")?;

            if init() != NVML_SUCCESS {
                debug!("management library init failed");
                return None;
            }

            Some(Self {
                _lib: lib,
                shutdown,
                device_get_count,
                device_get_handle_by_index,
                device_get_temperature,
                device_get_utilization_rates,
                device_get_clock_info,
                device_get_fan_speed,
            })
        }
    }

    /// Samples the first GPU. Fields the library rejects stay absent.
    pub fn stats(&self) -> GpuStats {
        let mut stats = GpuStats::default();

        // SAFETY: the device handle comes from the library and is only
        // handed back to it
        unsafe {
            let mut count: c_uint = 0;
            if (self.device_get_count)(&mut count) != NVML_SUCCESS || count == 0 {
                return stats;
            }
            let mut device: *mut c_void = std::ptr::null_mut();
            if (self.device_get_handle_by_index)(0, &mut device) != NVML_SUCCESS {
                return stats;
            }

            let mut temp: c_uint = 0;
            if (self.device_get_temperature)(device, NVML_TEMPERATURE_GPU, &mut temp)
                == NVML_SUCCESS
            {
                stats.temp = Some(f64::from(temp));
            }

            let mut util = Utilization { gpu: 0, memory: 0 };
            if (self.device_get_utilization_rates)(device, &mut util) == NVML_SUCCESS {
                stats.usage = Some(f64::from(util.gpu));
            }

            let mut clock: c_uint = 0;
            if (self.device_get_clock_info)(device, NVML_CLOCK_GRAPHICS, &mut clock)
                == NVML_SUCCESS
            {
                stats.clock = Some(f64::from(clock));
            }

            let mut fan: c_uint = 0;
            if (self.device_get_fan_speed)(device, &mut fan) == NVML_SUCCESS {
                stats.fan = Some(f64::from(fan));
            }
        }
        stats
    }
}

impl Drop for Nvml {
    fn drop(&mut self) {
        // SAFETY: init succeeded in load()
        unsafe {
            (self.shutdown)();
        }
    }
}

/// Looks up one symbol and copies out its function pointer.
unsafe fn resolve<T: Copy>(lib: &Library, name: &[u8]) -> Option<T> {
    lib.get::<T>(name).ok().map(|symbol| *symbol)
}
