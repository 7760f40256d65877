use std::fmt;
use std::time::{Duration, Instant};

pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Throughput and latency over one reporting window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub average_latency_micros: u64,
    pub observed_fps: f64,
    pub frame_count: u64,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} usec avg, actual {:.2} fps (over {} frames)",
            self.average_latency_micros, self.observed_fps, self.frame_count
        )
    }
}

/// Rolling frame/latency accumulator, reset every `interval`
#[derive(Debug)]
pub struct StatsReporter {
    interval: Duration,
    frame_count: u64,
    summed_latency_micros: u64,
    window_start: Instant,
}

impl StatsReporter {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(Instant::now(), interval)
    }

    pub fn starting_at(window_start: Instant, interval: Duration) -> Self {
        StatsReporter {
            interval,
            frame_count: 0,
            summed_latency_micros: 0,
            window_start,
        }
    }

    pub fn record(&mut self, latency_micros: u64) {
        self.frame_count += 1;
        self.summed_latency_micros += latency_micros;
    }

    #[cfg(test)]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Emit a summary and start a new window once `interval` has passed
    pub fn flush_if_due(&mut self, now: Instant) -> Option<Summary> {
        if now.saturating_duration_since(self.window_start) < self.interval {
            return None;
        }

        let average_latency_micros = self
            .summed_latency_micros
            .checked_div(self.frame_count)
            .unwrap_or(0);
        let summary = Summary {
            average_latency_micros,
            observed_fps: self.frame_count as f64 / self.interval.as_secs_f64(),
            frame_count: self.frame_count,
        };

        self.frame_count = 0;
        self.summed_latency_micros = 0;
        self.window_start = now;
        Some(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_reports_and_resets() {
        let start = Instant::now();
        let mut stats = StatsReporter::starting_at(start, DEFAULT_REPORT_INTERVAL);

        for _ in 0..300 {
            stats.record(100);
        }
        assert_eq!(stats.flush_if_due(start + Duration::from_secs(9)), None);

        stats.record(400);
        let summary = stats.flush_if_due(start + Duration::from_secs(10)).unwrap();
        assert_eq!(summary.frame_count, 301);
        assert_eq!(summary.average_latency_micros, 100);
        assert!((summary.observed_fps - 30.1).abs() < 1e-9);
        assert_eq!(stats.frame_count(), 0);

        // New window starts at the flush
        assert_eq!(stats.flush_if_due(start + Duration::from_secs(19)), None);
    }

    #[test]
    fn test_empty_window() {
        let start = Instant::now();
        let mut stats = StatsReporter::starting_at(start, Duration::from_secs(1));
        let summary = stats.flush_if_due(start + Duration::from_secs(2)).unwrap();
        assert_eq!(summary.frame_count, 0);
        assert_eq!(summary.average_latency_micros, 0);
    }

    #[test]
    fn test_summary_display() {
        let summary = Summary {
            average_latency_micros: 250,
            observed_fps: 29.9,
            frame_count: 299,
        };
        assert_eq!(summary.to_string(), "250 usec avg, actual 29.90 fps (over 299 frames)");
    }
}
