//! Remote probe scripts and output parsing
//!
//! The snapshot script prints one `@@<section>` marker per probe followed
//! by that probe's raw output; a probe that fails prints `@@failed` in its
//! section. Parsing is independent per section so one failing probe only
//! blanks its own fields.

use crate::models::{ImageRecord, ResourceSnapshot, SnapshotStatus};
use chrono::Utc;
use std::collections::HashMap;

const KIB_PER_GIB: f64 = 1024.0 * 1024.0;
const BYTES_PER_TIB: f64 = 1024.0 * 1024.0 * 1024.0 * 1024.0;

pub const SECTION_CPU: &str = "cpu";
pub const SECTION_MEMORY: &str = "memory";
pub const SECTION_STORAGE: &str = "storage";
pub const SECTION_GPU: &str = "gpu";

const FAILED_MARKER: &str = "@@failed";

/// Shell script run on the node for a resource snapshot
pub const SNAPSHOT_SCRIPT: &str = "\
echo '@@cpu'; { head -n 1 /proc/stat && sleep 1 && head -n 1 /proc/stat && nproc; } 2>/dev/null || echo '@@failed'
echo '@@memory'; cat /proc/meminfo 2>/dev/null || echo '@@failed'
echo '@@storage'; df -P -B1 / 2>/dev/null || echo '@@failed'
echo '@@gpu'; nvidia-smi --query-gpu=utilization.gpu --format=csv,noheader,nounits 2>/dev/null || echo '@@failed'
";

/// Shell script run on the node to list container images
pub const IMAGES_SCRIPT: &str =
    "docker images --format '{{.Repository}}\\t{{.Tag}}\\t{{.Digest}}\\t{{.Size}}'";

/// Split sectioned probe output into `section -> body`
pub fn split_sections(output: &str) -> HashMap<&str, String> {
    let mut sections: HashMap<&str, String> = HashMap::new();
    let mut current: Option<&str> = None;

    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed != FAILED_MARKER {
            if let Some(name) = trimmed.strip_prefix("@@") {
                current = Some(name);
                sections.entry(name).or_default();
                continue;
            }
        }
        if let Some(name) = current {
            let body = sections.entry(name).or_default();
            body.push_str(line);
            body.push('\n');
        }
    }

    sections
}

fn section_body<'a>(sections: &'a HashMap<&str, String>, name: &str) -> Option<&'a str> {
    sections
        .get(name)
        .map(String::as_str)
        .filter(|body| !body.trim().is_empty() && !body.contains(FAILED_MARKER))
}

/// Jiffy counters from an aggregate `cpu` line of /proc/stat
/// Returns (idle, total)
fn parse_proc_stat_line(line: &str) -> Option<(u64, u64)> {
    let mut parts = line.split_whitespace();
    if parts.next()? != "cpu" {
        return None;
    }
    let values: Vec<u64> = parts.map(|p| p.parse().unwrap_or(0)).collect();
    if values.len() < 4 {
        return None;
    }
    // idle + iowait
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    let total = values.iter().sum();
    Some((idle, total))
}

/// Parse two /proc/stat samples followed by `nproc`
/// Returns (utilization percent, core count)
pub fn parse_cpu(body: &str) -> Option<(f64, f64)> {
    let lines: Vec<&str> = body.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.len() < 3 {
        return None;
    }

    let (idle_a, total_a) = parse_proc_stat_line(lines[0])?;
    let (idle_b, total_b) = parse_proc_stat_line(lines[1])?;
    let cores: f64 = lines[2].parse().ok()?;

    let d_total = total_b.saturating_sub(total_a);
    let d_idle = idle_b.saturating_sub(idle_a);
    let utilization = if d_total == 0 {
        0.0
    } else {
        100.0 * (1.0 - d_idle as f64 / d_total as f64)
    };

    Some((utilization.clamp(0.0, 100.0), cores))
}

/// Parse /proc/meminfo
/// Returns (utilization percent, total GiB)
pub fn parse_meminfo(body: &str) -> Option<(f64, f64)> {
    let mut total_kib = None;
    let mut available_kib = None;

    for line in body.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 2 {
            match parts[0] {
                "MemTotal:" => total_kib = parts[1].parse::<f64>().ok(),
                "MemAvailable:" => available_kib = parts[1].parse::<f64>().ok(),
                _ => {}
            }
        }
    }

    let total = total_kib.filter(|t| *t > 0.0)?;
    let available = available_kib?;
    let utilization = 100.0 * (total - available).max(0.0) / total;
    Some((utilization, total / KIB_PER_GIB))
}

/// Parse `df -P -B1` output for a single mount
/// Returns (utilization percent, total TiB)
pub fn parse_df(body: &str) -> Option<(f64, f64)> {
    // Skip the header; the data line has a numeric second column
    let line = body.lines().find(|l| {
        l.split_whitespace()
            .nth(1)
            .is_some_and(|c| c.parse::<u64>().is_ok())
    })?;
    let parts: Vec<&str> = line.split_whitespace().collect();
    let total: f64 = parts.get(1)?.parse().ok()?;
    let used: f64 = parts.get(2)?.parse().ok()?;
    if total <= 0.0 {
        return None;
    }
    Some((100.0 * used / total, total / BYTES_PER_TIB))
}

/// Parse per-GPU utilization lines from nvidia-smi
/// Returns (mean utilization percent, GPU count)
pub fn parse_gpu(body: &str) -> Option<(f64, f64)> {
    let readings: Vec<f64> = body
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| l.trim_end_matches('%').trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;

    if readings.is_empty() {
        return None;
    }
    let mean = readings.iter().sum::<f64>() / readings.len() as f64;
    Some((mean, readings.len() as f64))
}

/// Build a snapshot from sectioned probe output
///
/// Returns the snapshot and the names of the probes that failed.
pub fn parse_snapshot(output: &str) -> (ResourceSnapshot, Vec<&'static str>) {
    let sections = split_sections(output);
    let mut failed = Vec::new();

    let mut probe = |name: &'static str, parse: fn(&str) -> Option<(f64, f64)>| {
        let parsed = section_body(&sections, name).and_then(parse);
        if parsed.is_none() {
            failed.push(name);
        }
        parsed
    };

    let cpu = probe(SECTION_CPU, parse_cpu);
    let memory = probe(SECTION_MEMORY, parse_meminfo);
    let storage = probe(SECTION_STORAGE, parse_df);
    let gpu = probe(SECTION_GPU, parse_gpu);

    let status = if failed.is_empty() {
        SnapshotStatus::Ok
    } else {
        SnapshotStatus::Partial
    };
    let error = (!failed.is_empty()).then(|| format!("probes failed: {}", failed.join(", ")));

    let snapshot = ResourceSnapshot {
        cpu_utilization: cpu.map(|c| c.0),
        memory_utilization: memory.map(|m| m.0),
        storage_utilization: storage.map(|s| s.0),
        gpu_utilization: gpu.map(|g| g.0),
        cpu_cores: cpu.map(|c| c.1),
        memory_total_gb: memory.map(|m| m.1),
        storage_total_tb: storage.map(|s| s.1),
        gpu_count: gpu.map(|g| g.1),
        collected_at: Utc::now(),
        status,
        error,
    };

    (snapshot, failed)
}

/// Parse a docker size string such as `1.2GB`, `512MB`, `15.3kB`, `800B`
///
/// Docker reports sizes in decimal units.
pub fn parse_size(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: f64 = number.parse().ok()?;

    let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1.0,
        "kb" => 1e3,
        "mb" => 1e6,
        "gb" => 1e9,
        "tb" => 1e12,
        _ => return None,
    };

    Some((value * multiplier).round() as u64)
}

/// Parse the image listing produced by [`IMAGES_SCRIPT`]
///
/// Dangling images (`<none>` repository) are skipped. Untagged images are
/// referenced by digest when one is known.
pub fn parse_images(output: &str, node_id: &str) -> Vec<ImageRecord> {
    let mut records: Vec<ImageRecord> = Vec::new();

    for line in output.lines() {
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        if fields.len() < 4 {
            continue;
        }
        let (repository, tag, digest, size) = (fields[0], fields[1], fields[2], fields[3]);
        if repository.is_empty() || repository == "<none>" {
            continue;
        }

        let reference = if !tag.is_empty() && tag != "<none>" {
            format!("{}:{}", repository, tag)
        } else if !digest.is_empty() && digest != "<none>" {
            format!("{}@{}", repository, digest)
        } else {
            repository.to_string()
        };

        if records.iter().any(|r| r.reference == reference) {
            continue;
        }

        records.push(ImageRecord {
            reference,
            size_bytes: parse_size(size).unwrap_or(0),
            node_id: node_id.to_string(),
        });
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEALTHY_OUTPUT: &str = "\
@@cpu
cpu  1000 0 1000 8000 0 0 0 0 0 0
cpu  1100 0 1100 8200 0 0 0 0 0 0
32
@@memory
MemTotal:       67108864 kB
MemFree:        10000000 kB
MemAvailable:   16777216 kB
@@storage
Filesystem 1-blocks Used Available Capacity Mounted on
/dev/sda1 2199023255552 549755813888 1649267441664 25% /
@@gpu
50
70
";

    #[test]
    fn test_parse_cpu() {
        let (util, cores) = parse_cpu(
            "cpu  1000 0 1000 8000 0 0 0 0 0 0\ncpu  1100 0 1100 8200 0 0 0 0 0 0\n32\n",
        )
        .unwrap();
        // 400 jiffies elapsed, 200 idle
        assert!((util - 50.0).abs() < 1e-9);
        assert_eq!(cores, 32.0);
    }

    #[test]
    fn test_parse_cpu_counts_iowait_as_idle() {
        let (util, _) =
            parse_cpu("cpu 0 0 0 0 0\ncpu 100 0 0 100 200\n4\n").unwrap();
        assert!((util - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_meminfo() {
        let (util, total_gb) =
            parse_meminfo("MemTotal: 67108864 kB\nMemAvailable: 16777216 kB\n").unwrap();
        assert_eq!(total_gb, 64.0);
        assert_eq!(util, 75.0);

        assert!(parse_meminfo("MemFree: 10 kB\n").is_none());
    }

    #[test]
    fn test_parse_df() {
        let (util, total_tb) = parse_df(
            "Filesystem 1-blocks Used Available Capacity Mounted on\n/dev/sda1 2199023255552 549755813888 1649267441664 25% /\n",
        )
        .unwrap();
        assert_eq!(util, 25.0);
        assert_eq!(total_tb, 2.0);
    }

    #[test]
    fn test_parse_gpu() {
        assert_eq!(parse_gpu("50\n70\n"), Some((60.0, 2.0)));
        assert_eq!(parse_gpu(""), None);
        assert_eq!(parse_gpu("[N/A]\n"), None);
    }

    #[test]
    fn test_parse_snapshot_all_sections() {
        let (snapshot, failed) = parse_snapshot(HEALTHY_OUTPUT);
        assert!(failed.is_empty());
        assert_eq!(snapshot.status, SnapshotStatus::Ok);
        assert_eq!(snapshot.cpu_cores, Some(32.0));
        assert_eq!(snapshot.memory_total_gb, Some(64.0));
        assert_eq!(snapshot.storage_total_tb, Some(2.0));
        assert_eq!(snapshot.gpu_count, Some(2.0));
        assert_eq!(snapshot.gpu_utilization, Some(60.0));
        assert!(snapshot.error.is_none());
    }

    #[test]
    fn test_parse_snapshot_without_gpu_is_partial() {
        let output = HEALTHY_OUTPUT.replace("@@gpu\n50\n70\n", "@@gpu\n@@failed\n");
        let (snapshot, failed) = parse_snapshot(&output);

        assert_eq!(failed, vec![SECTION_GPU]);
        assert_eq!(snapshot.status, SnapshotStatus::Partial);
        assert!(snapshot.gpu_utilization.is_none());
        assert!(snapshot.gpu_count.is_none());
        assert_eq!(snapshot.cpu_cores, Some(32.0));
        assert!(snapshot.error.unwrap().contains("gpu"));
    }

    #[test]
    fn test_parse_snapshot_garbage() {
        let (snapshot, failed) = parse_snapshot("bash: command not found\n");
        assert_eq!(failed.len(), 4);
        assert_eq!(snapshot.status, SnapshotStatus::Partial);
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1.2GB"), Some(1_200_000_000));
        assert_eq!(parse_size("512MB"), Some(512_000_000));
        assert_eq!(parse_size("15.3kB"), Some(15_300));
        assert_eq!(parse_size("800B"), Some(800));
        assert_eq!(parse_size("lots"), None);
    }

    #[test]
    fn test_parse_images() {
        let output = "\
pytorch/pytorch\t2.1.0-cuda12.1\t<none>\t8.5GB
nvcr.io/nvidia/tensorflow\t<none>\tsha256:abc123\t6GB
<none>\t<none>\t<none>\t120MB
pytorch/pytorch\t2.1.0-cuda12.1\t<none>\t8.5GB
malformed line
";
        let images = parse_images(output, "gpu-1");
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].reference, "pytorch/pytorch:2.1.0-cuda12.1");
        assert_eq!(images[0].size_bytes, 8_500_000_000);
        assert_eq!(images[0].node_id, "gpu-1");
        assert_eq!(images[1].reference, "nvcr.io/nvidia/tensorflow@sha256:abc123");
    }
}
