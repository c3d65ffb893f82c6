//! CPU load, frequency and temperature.

use std::fs;
use std::time::{Duration, Instant};

/// Jiffies from the aggregate "cpu" line of /proc/stat.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: i64,
    pub nice: i64,
    pub system: i64,
    pub idle: i64,
    pub iowait: i64,
    pub irq: i64,
    pub softirq: i64,
    pub steal: i64,
}

impl CpuTimes {
    pub fn total(&self) -> i64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    pub fn active(&self) -> i64 {
        self.total() - self.idle - self.iowait
    }

    /// Parses the first line of /proc/stat content.
    pub fn parse(stat: &str) -> Option<Self> {
        let line = stat.lines().next()?;
        if !line.starts_with("cpu") {
            return None;
        }
        let mut fields = line
            .split_whitespace()
            .skip(1)
            .filter_map(|f| f.parse::<i64>().ok());
        Some(Self {
            user: fields.next()?,
            nice: fields.next()?,
            system: fields.next()?,
            idle: fields.next()?,
            iowait: fields.next().unwrap_or(0),
            irq: fields.next().unwrap_or(0),
            softirq: fields.next().unwrap_or(0),
            steal: fields.next().unwrap_or(0),
        })
    }
}

fn read_cpu_times() -> Option<CpuTimes> {
    CpuTimes::parse(&fs::read_to_string("/proc/stat").ok()?)
}

/// Load percentage between two /proc/stat readings.
fn percent_between(last: &CpuTimes, current: &CpuTimes) -> f64 {
    let total = current.total() - last.total();
    if total <= 0 {
        return 0.0;
    }
    (current.active() - last.active()) as f64 / total as f64 * 100.0
}

/// Tracks deltas between /proc/stat reads for the load percentage.
pub struct CpuTracker {
    last: Option<(CpuTimes, Instant)>,
}

impl CpuTracker {
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Current CPU load percentage.
    ///
    /// The first call measures against boot (all-zero baseline); back-to-back
    /// calls under 100 ms apart return 0.0 rather than a meaningless delta.
    pub fn percent(&mut self) -> f64 {
        let Some(current) = read_cpu_times() else {
            return 0.0;
        };
        let now = Instant::now();

        let baseline = match self.last.take() {
            Some((times, at)) => {
                if now.duration_since(at) < Duration::from_millis(100) {
                    self.last = Some((times, at));
                    return 0.0;
                }
                times
            }
            None => CpuTimes::default(),
        };

        let percent = percent_between(&baseline, &current);
        self.last = Some((current, now));
        percent
    }
}

impl Default for CpuTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// First "cpu MHz" value from /proc/cpuinfo.
pub fn frequency() -> Option<f64> {
    parse_frequency(&fs::read_to_string("/proc/cpuinfo").ok()?)
}

pub(crate) fn parse_frequency(cpuinfo: &str) -> Option<f64> {
    for line in cpuinfo.lines() {
        if line.starts_with("cpu MHz") {
            return line.split(':').nth(1)?.trim().parse().ok();
        }
    }
    None
}

/// Hottest k10temp/coretemp reading across hwmon devices, in Celsius.
pub fn temperature() -> Option<f64> {
    let mut max_temp: Option<f64> = None;
    for i in 0..10 {
        let hwmon = format!("/sys/class/hwmon/hwmon{i}");
        let Ok(name) = fs::read_to_string(format!("{hwmon}/name")) else {
            continue;
        };
        let name = name.trim();
        if name != "k10temp" && name != "coretemp" {
            continue;
        }
        for idx in 1..=5 {
            if let Ok(raw) = fs::read_to_string(format!("{hwmon}/temp{idx}_input")) {
                if let Ok(millicelsius) = raw.trim().parse::<f64>() {
                    let celsius = millicelsius / 1000.0;
                    max_temp = Some(max_temp.map_or(celsius, |m: f64| m.max(celsius)));
                }
            }
        }
    }
    max_temp
}

/// Hardware concurrency.
pub fn count() -> Option<usize> {
    std::thread::available_parallelism().ok().map(|n| n.get())
}
