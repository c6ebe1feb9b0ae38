// Metrics collection and tracking

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::pipeline::{SessionError, SessionReport};

const MAX_SAMPLES: usize = 1000;

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Count, min/max/avg and percentiles of a latency
#[derive(Debug)]
pub struct LatencyStats {
    count: AtomicU64,
    total_ms: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
    // For percentile calculation, keep the most recent samples only
    samples: Mutex<VecDeque<u64>>,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_ms: AtomicU64::new(0),
            min_ms: AtomicU64::new(u64::MAX),
            max_ms: AtomicU64::new(0),
            samples: Mutex::new(VecDeque::with_capacity(MAX_SAMPLES)),
        }
    }

    pub fn record(&self, latency: Duration) {
        let ms = latency.as_millis() as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
        self.min_ms.fetch_min(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);

        if let Ok(mut samples) = self.samples.lock() {
            if samples.len() == MAX_SAMPLES {
                samples.pop_front();
            }
            samples.push_back(ms);
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn avg_ms(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        self.total_ms.load(Ordering::Relaxed) as f64 / count as f64
    }

    pub fn percentile(&self, p: u8) -> u64 {
        let Ok(samples) = self.samples.lock() else {
            return 0;
        };
        if samples.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let index = (sorted.len() * p as usize / 100).min(sorted.len() - 1);
        sorted[index]
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let count = self.count();
        LatencySnapshot {
            count,
            avg_ms: self.avg_ms(),
            min_ms: if count == 0 { 0 } else { self.min_ms.load(Ordering::Relaxed) },
            max_ms: self.max_ms.load(Ordering::Relaxed),
            p50_ms: self.percentile(50),
            p95_ms: self.percentile(95),
            p99_ms: self.percentile(99),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide counters for the streaming pipeline
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    sessions_started: AtomicU64,
    sessions_completed: AtomicU64,
    sessions_failed: AtomicU64,
    sessions_cancelled: AtomicU64,
    rejected_payloads: AtomicU64,
    segments: AtomicU64,
    failed_segments: AtomicU64,
    frames_sent: AtomicU64,
    time_to_first_audio: LatencyStats,
    synthesis: LatencyStats,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        let _ = START_TIME.get_or_init(Instant::now);
        Self::default()
    }

    pub fn session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn payload_rejected(&self) {
        self.rejected_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_finished(&self, outcome: &Result<SessionReport, SessionError>) {
        match outcome {
            Ok(report) => {
                self.sessions_completed.fetch_add(1, Ordering::Relaxed);
                self.segments.fetch_add(report.segments, Ordering::Relaxed);
                self.failed_segments.fetch_add(report.failed_segments, Ordering::Relaxed);
                self.frames_sent.fetch_add(report.frames_sent, Ordering::Relaxed);
                if let Some(ttfa) = report.time_to_first_audio {
                    self.time_to_first_audio.record(ttfa);
                }
                for latency in &report.synthesis_latencies {
                    self.synthesis.record(*latency);
                }
            }
            Err(SessionError::Cancelled) | Err(SessionError::Delivery(_)) => {
                self.sessions_cancelled.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.sessions_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            sessions_cancelled: self.sessions_cancelled.load(Ordering::Relaxed),
            rejected_payloads: self.rejected_payloads.load(Ordering::Relaxed),
            segments: self.segments.load(Ordering::Relaxed),
            failed_segments: self.failed_segments.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            time_to_first_audio: self.time_to_first_audio.snapshot(),
            synthesis: self.synthesis.snapshot(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LatencySnapshot {
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct PipelineSnapshot {
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_failed: u64,
    pub sessions_cancelled: u64,
    pub rejected_payloads: u64,
    pub segments: u64,
    pub failed_segments: u64,
    pub frames_sent: u64,
    pub time_to_first_audio: LatencySnapshot,
    pub synthesis: LatencySnapshot,
}

#[derive(Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub uptime_seconds: u64,
}

impl SystemMetrics {
    pub fn collect() -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_cpu();
        system.refresh_memory();

        // Get CPU usage (average across all cores)
        let cpu_usage = system.global_cpu_info().cpu_usage();

        let memory_used = system.used_memory();
        let memory_total = system.total_memory();
        let memory_usage_percent = if memory_total > 0 {
            (memory_used as f64 / memory_total as f64 * 100.0) as f32
        } else {
            0.0
        };

        let uptime = START_TIME.get().map(|start| start.elapsed().as_secs()).unwrap_or(0);

        Self {
            cpu_usage_percent: cpu_usage,
            memory_used_mb: memory_used / 1024 / 1024, // Convert bytes to MB
            memory_total_mb: memory_total / 1024 / 1024,
            memory_usage_percent,
            uptime_seconds: uptime,
        }
    }
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub pipeline: PipelineSnapshot,
}
