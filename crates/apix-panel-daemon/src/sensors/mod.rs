//! System metrics: detection, polling, snapshot.
//!
//! One worker thread wakes every 50 ms and checks two deadlines: fast
//! samples (CPU load/temp/freq, GPU) and slow samples (CPU count, disk,
//! memory). Only metrics that probed plausibly at startup ever appear in
//! the snapshot; the key set never changes after construction. A sample
//! that fails or lands out of range is dropped for that tick and the key
//! keeps its previous value.

mod cpu;
mod disk;
mod gpu;
mod memory;
mod nvml;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;

use cpu::CpuTracker;
use gpu::GpuProbe;

/// Scheduler tick.
const POLL_TICK: Duration = Duration::from_millis(50);

/// Polls system metrics on fast and slow cadences.
pub struct SystemInfoPoller {
    fast_interval: Duration,
    slow_interval: Duration,
    inner: Arc<PollerInner>,
    worker: Option<JoinHandle<()>>,
}

struct PollerInner {
    running: AtomicBool,
    info: Mutex<HashMap<String, f64>>,
    cpu: Mutex<CpuTracker>,
    gpu: GpuProbe,
}

impl SystemInfoPoller {
    /// Probes every metric source once and registers the plausible ones.
    pub fn new(fast_interval: f64, slow_interval: f64) -> Self {
        let gpu = GpuProbe::detect();
        let mut cpu = CpuTracker::new();

        let mut info = HashMap::new();
        for key in detect_available_metrics(&mut cpu, &gpu) {
            info.insert(key.to_string(), 0.0);
        }
        debug!("detected metrics: {:?}", {
            let mut keys: Vec<&String> = info.keys().collect();
            keys.sort();
            keys
        });

        Self {
            fast_interval: Duration::from_secs_f64(fast_interval),
            slow_interval: Duration::from_secs_f64(slow_interval),
            inner: Arc::new(PollerInner {
                running: AtomicBool::new(false),
                info: Mutex::new(info),
                cpu: Mutex::new(cpu),
                gpu,
            }),
            worker: None,
        }
    }

    /// Starts the worker. No-op while already running.
    pub fn start(&mut self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = self.inner.clone();
        let fast = self.fast_interval;
        let slow = self.slow_interval;
        self.worker = Some(std::thread::spawn(move || {
            let mut next_fast = Instant::now();
            let mut next_slow = Instant::now();
            while inner.running.load(Ordering::SeqCst) {
                let now = Instant::now();
                if now >= next_fast {
                    merge_info(&inner, poll_fast(&inner));
                    next_fast = now + fast;
                }
                if now >= next_slow {
                    merge_info(&inner, poll_slow());
                    next_slow = now + slow;
                }
                std::thread::sleep(POLL_TICK);
            }
        }));
    }

    /// Stops the worker and waits for it to exit. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    /// Names of the metrics registered at startup; order unspecified.
    pub fn get_available_metrics(&self) -> Vec<String> {
        self.inner.info.lock().unwrap().keys().cloned().collect()
    }

    /// Copy of the current snapshot.
    pub fn get_info(&self) -> HashMap<String, f64> {
        self.inner.info.lock().unwrap().clone()
    }
}

impl Default for SystemInfoPoller {
    fn default() -> Self {
        Self::new(0.2, 2.5)
    }
}

impl Drop for SystemInfoPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn detect_available_metrics(cpu: &mut CpuTracker, gpu: &GpuProbe) -> Vec<&'static str> {
    let mut metrics = Vec::new();

    let percent = cpu.percent();
    if percent > 0.0 && percent <= 100.0 {
        metrics.push("cpu_percent");
    }
    if cpu::count().is_some() {
        metrics.push("cpu_count");
    }
    if cpu::frequency().is_some_and(|f| f > 0.0) {
        metrics.push("cpu_freq");
    }
    if cpu::temperature().is_some_and(plausible_cpu_temp) {
        metrics.push("cpu_temp");
    }

    if let Some((percent, used_gb)) = memory::usage() {
        if percent > 0.0 {
            metrics.push("mem_percent");
        }
        if used_gb > 0.0 {
            metrics.push("mem_used_gb");
        }
    }

    if let Some((percent, free_gb)) = disk::usage() {
        if percent > 0.0 {
            metrics.push("disk_percent");
        }
        if free_gb > 0.0 {
            metrics.push("disk_free_gb");
        }
    }

    metrics.extend(gpu.detected_keys());
    metrics
}

/// Accepted range for the CPU package temperature, exclusive bounds.
fn plausible_cpu_temp(celsius: f64) -> bool {
    celsius > 15.0 && celsius < 100.0
}

fn poll_fast(inner: &PollerInner) -> HashMap<String, f64> {
    let mut out = HashMap::new();

    let percent = inner.cpu.lock().unwrap().percent();
    if percent > 0.0 && percent <= 100.0 {
        out.insert("cpu_percent".to_string(), percent);
    }
    if let Some(temp) = cpu::temperature() {
        if plausible_cpu_temp(temp) {
            out.insert("cpu_temp".to_string(), temp);
        }
    }
    if let Some(freq) = cpu::frequency() {
        if freq > 0.0 {
            out.insert("cpu_freq".to_string(), freq);
        }
    }

    let stats = inner.gpu.stats();
    if let Some(temp) = stats.temp {
        if temp > 0.0 && temp < 101.0 {
            out.insert("gpu_temp".to_string(), temp);
        }
    }
    if let Some(usage) = stats.usage {
        out.insert("gpu_usage".to_string(), usage);
    }
    if let Some(clock) = stats.clock {
        if clock > 0.0 {
            out.insert("gpu_clock".to_string(), clock);
        }
    }
    if let Some(fan) = stats.fan {
        out.insert("gpu_fan".to_string(), fan);
    }

    out
}

fn poll_slow() -> HashMap<String, f64> {
    let mut out = HashMap::new();

    if let Some(count) = cpu::count() {
        out.insert("cpu_count".to_string(), count as f64);
    }
    if let Some((percent, free_gb)) = disk::usage() {
        if percent > 0.0 {
            out.insert("disk_percent".to_string(), percent);
        }
        if free_gb > 0.0 {
            out.insert("disk_free_gb".to_string(), free_gb);
        }
    }
    if let Some((percent, used_gb)) = memory::usage() {
        if percent > 0.0 {
            out.insert("mem_percent".to_string(), percent);
        }
        if used_gb > 0.0 {
            out.insert("mem_used_gb".to_string(), used_gb);
        }
    }

    out
}

/// Folds a sample batch into the snapshot. Keys are fixed at detection;
/// anything else is dropped so the key set stays stable.
fn merge_info(inner: &PollerInner, updated: HashMap<String, f64>) {
    if updated.is_empty() {
        return;
    }
    let mut info = inner.info.lock().unwrap();
    for (key, value) in updated {
        if let Some(slot) = info.get_mut(&key) {
            *slot = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poller_with_keys(keys: &[&str]) -> SystemInfoPoller {
        let mut info = HashMap::new();
        for key in keys {
            info.insert(key.to_string(), 0.0);
        }
        SystemInfoPoller {
            fast_interval: Duration::from_millis(200),
            slow_interval: Duration::from_millis(2500),
            inner: Arc::new(PollerInner {
                running: AtomicBool::new(false),
                info: Mutex::new(info),
                cpu: Mutex::new(CpuTracker::new()),
                gpu: GpuProbe::None,
            }),
            worker: None,
        }
    }

    #[test]
    fn test_cpu_temp_bounds() {
        assert!(!plausible_cpu_temp(14.9));
        assert!(plausible_cpu_temp(15.1));
        assert!(plausible_cpu_temp(99.9));
        assert!(!plausible_cpu_temp(100.0));
        assert!(!plausible_cpu_temp(15.0));
    }

    #[test]
    fn test_merge_only_touches_detected_keys() {
        let poller = poller_with_keys(&["cpu_percent"]);
        let mut batch = HashMap::new();
        batch.insert("cpu_percent".to_string(), 42.0);
        batch.insert("gpu_temp".to_string(), 60.0);
        merge_info(&poller.inner, batch);

        let info = poller.get_info();
        assert_eq!(info.get("cpu_percent"), Some(&42.0));
        assert!(!info.contains_key("gpu_temp"));
    }

    #[test]
    fn test_key_set_is_stable_across_merges() {
        let poller = poller_with_keys(&["cpu_percent", "mem_percent"]);
        let before = {
            let mut keys = poller.get_available_metrics();
            keys.sort();
            keys
        };

        let mut batch = HashMap::new();
        batch.insert("disk_percent".to_string(), 10.0);
        merge_info(&poller.inner, batch);

        let after = {
            let mut keys = poller.get_available_metrics();
            keys.sort();
            keys
        };
        assert_eq!(before, after);
    }

    #[test]
    fn test_failed_sample_keeps_previous_value() {
        let poller = poller_with_keys(&["cpu_temp"]);
        let mut batch = HashMap::new();
        batch.insert("cpu_temp".to_string(), 55.0);
        merge_info(&poller.inner, batch);

        // an empty batch (every sample rejected) changes nothing
        merge_info(&poller.inner, HashMap::new());
        assert_eq!(poller.get_info().get("cpu_temp"), Some(&55.0));
    }

    #[test]
    fn test_start_stop_idempotent() {
        let mut poller = poller_with_keys(&["cpu_count"]);
        poller.start();
        poller.start();
        std::thread::sleep(Duration::from_millis(60));
        poller.stop();
        poller.stop();
        assert!(poller.worker.is_none());

        // the snapshot stays readable after stop
        let _ = poller.get_info();
    }

    #[test]
    fn test_worker_populates_detected_keys() {
        let mut poller = poller_with_keys(&["cpu_count"]);
        poller.start();
        std::thread::sleep(Duration::from_millis(150));
        poller.stop();
        let info = poller.get_info();
        // hardware concurrency is always readable on the test host
        assert!(info.get("cpu_count").copied().unwrap_or(0.0) >= 1.0);
    }
}
