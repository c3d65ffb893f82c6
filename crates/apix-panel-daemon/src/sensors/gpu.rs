//! GPU metrics: AMD and Intel via sysfs, NVIDIA via the vendor library.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::nvml::Nvml;

/// One GPU sample; absent fields were unreadable this tick.
#[derive(Debug, Default, Clone, Copy)]
pub struct GpuStats {
    pub temp: Option<f64>,
    pub usage: Option<f64>,
    pub clock: Option<f64>,
    pub fan: Option<f64>,
}

/// GPU metrics source found at startup. AMD wins over Intel, Intel over
/// NVIDIA; the first hit decides for the life of the poller.
pub enum GpuProbe {
    Amd { hwmon: PathBuf },
    Intel,
    Nvidia(Nvml),
    None,
}

impl GpuProbe {
    pub fn detect() -> Self {
        if let Some(hwmon) = amd_hwmon_path() {
            info!("AMD GPU metrics via {}", hwmon.display());
            return GpuProbe::Amd { hwmon };
        }
        if Path::new("/sys/class/drm/card0/gt/gt0").exists() {
            info!("Intel GPU metrics via sysfs");
            return GpuProbe::Intel;
        }
        if Path::new("/proc/driver/nvidia/version").exists() {
            match Nvml::load() {
                Some(nvml) => {
                    info!("NVIDIA GPU metrics via management library");
                    return GpuProbe::Nvidia(nvml);
                }
                None => debug!("NVIDIA driver present but management library unavailable"),
            }
        }
        GpuProbe::None
    }

    pub fn stats(&self) -> GpuStats {
        match self {
            GpuProbe::Amd { hwmon } => amd_stats(hwmon),
            GpuProbe::Intel => intel_stats(),
            GpuProbe::Nvidia(nvml) => nvml.stats(),
            GpuProbe::None => GpuStats::default(),
        }
    }

    /// Metric keys this source registers at detection time.
    pub fn detected_keys(&self) -> Vec<&'static str> {
        match self {
            GpuProbe::Amd { hwmon } => {
                let stats = amd_stats(hwmon);
                let mut keys = Vec::new();
                if stats.temp.is_some_and(|t| t > 0.0 && t < 101.0) {
                    keys.push("gpu_temp");
                }
                if stats.usage.is_some() {
                    keys.push("gpu_usage");
                }
                if stats.clock.is_some() {
                    keys.push("gpu_clock");
                }
                if stats.fan.is_some() {
                    keys.push("gpu_fan");
                }
                keys
            }
            // only the clock is sampled today; temperature has no confirmed
            // sysfs path and stays at its initial value
            GpuProbe::Intel => vec!["gpu_temp", "gpu_usage", "gpu_clock"],
            GpuProbe::Nvidia(_) => vec!["gpu_temp", "gpu_usage", "gpu_clock", "gpu_fan"],
            GpuProbe::None => Vec::new(),
        }
    }
}

fn amd_hwmon_path() -> Option<PathBuf> {
    for i in 0..10 {
        let base = PathBuf::from(format!("/sys/class/hwmon/hwmon{i}"));
        if let Ok(name) = fs::read_to_string(base.join("name")) {
            if name.trim() == "amdgpu" {
                return Some(base);
            }
        }
    }
    None
}

fn read_f64(path: &Path) -> Option<f64> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn amd_stats(hwmon: &Path) -> GpuStats {
    GpuStats {
        temp: read_f64(&hwmon.join("temp1_input")).map(|v| (v / 1000.0).round()),
        usage: read_f64(Path::new("/sys/class/drm/card1/device/gpu_busy_percent")),
        clock: read_f64(&hwmon.join("freq1_input")).map(|v| (v / 1e6).round()),
        // raw reading; the hardware reports either RPM or PWM here
        fan: read_f64(&hwmon.join("fan1_input")),
    }
}

fn intel_stats() -> GpuStats {
    GpuStats {
        clock: read_f64(Path::new("/sys/class/drm/card0/gt/gt0/freq0_cur_freq")).map(|v| v / 1e6),
        ..GpuStats::default()
    }
}
