//! Memory usage from /proc/meminfo.

use std::fs;

/// Returns (used percent, used GB) or None when /proc/meminfo is unusable.
pub fn usage() -> Option<(f64, f64)> {
    parse_meminfo(&fs::read_to_string("/proc/meminfo").ok()?)
}

pub(crate) fn parse_meminfo(meminfo: &str) -> Option<(f64, f64)> {
    let mut total_kb = 0i64;
    let mut available_kb = 0i64;
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total_kb = rest.split_whitespace().next()?.parse().ok()?;
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available_kb = rest.split_whitespace().next()?.parse().ok()?;
        }
    }
    if total_kb <= 0 {
        return None;
    }

    let used_kb = total_kb - available_kb;
    let percent = used_kb as f64 / total_kb as f64 * 100.0;
    let used_gb = used_kb as f64 * 1024.0 / (1024.0 * 1024.0 * 1024.0);
    Some((percent, used_gb))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meminfo() {
        let meminfo = "MemTotal:       16384000 kB\n\
                       MemFree:         1024000 kB\n\
                       MemAvailable:    8192000 kB\n\
                       Buffers:          512000 kB\n";
        let (percent, used_gb) = parse_meminfo(meminfo).unwrap();
        assert!((percent - 50.0).abs() < 1e-9);
        // 8192000 kB used = ~7.8 GB
        assert!((used_gb - 7.8125).abs() < 1e-3);
    }

    #[test]
    fn test_parse_meminfo_missing_total() {
        assert!(parse_meminfo("MemAvailable: 1000 kB\n").is_none());
        assert!(parse_meminfo("").is_none());
    }
}
