//! Process-wide stream and chat counters
//!
//! Every counter is a relaxed atomic: the relay, viewer tasks and chat tasks
//! bump them concurrently without coordinating. Gauges (current viewers, chat
//! users) track their peak with `fetch_max`.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Cumulative counters for the lifetime of the process
#[derive(Debug)]
pub struct StreamStats {
    started_at: Instant,

    publishes: AtomicU64,
    publishes_rejected: AtomicU64,
    /// Sum of finished publish durations, in milliseconds
    stream_millis: AtomicU64,
    /// Start of the live publish as milliseconds after `started_at`, plus
    /// one; zero when nothing is live
    live_since: AtomicU64,

    plays: AtomicU64,
    plays_rejected: AtomicU64,
    viewers: AtomicU64,
    peak_viewers: AtomicU64,
    viewers_dropped: AtomicU64,

    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    packets_relayed: AtomicU64,

    chat_in: AtomicU64,
    chat_out: AtomicU64,
    chat_users: AtomicU64,
    peak_chat_users: AtomicU64,
}

/// Point-in-time copy of [`StreamStats`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub uptime: Duration,
    pub publishes: u64,
    pub publishes_rejected: u64,
    pub stream_duration: Duration,
    pub plays: u64,
    pub plays_rejected: u64,
    pub viewers: u64,
    pub peak_viewers: u64,
    pub viewers_dropped: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub packets_relayed: u64,
    pub chat_messages_in: u64,
    pub chat_messages_out: u64,
    pub chat_users: u64,
    pub peak_chat_users: u64,
}

impl StreamStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            publishes: AtomicU64::new(0),
            publishes_rejected: AtomicU64::new(0),
            stream_millis: AtomicU64::new(0),
            live_since: AtomicU64::new(0),
            plays: AtomicU64::new(0),
            plays_rejected: AtomicU64::new(0),
            viewers: AtomicU64::new(0),
            peak_viewers: AtomicU64::new(0),
            viewers_dropped: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            packets_relayed: AtomicU64::new(0),
            chat_in: AtomicU64::new(0),
            chat_out: AtomicU64::new(0),
            chat_users: AtomicU64::new(0),
            peak_chat_users: AtomicU64::new(0),
        }
    }

    pub fn record_publish_start(&self) {
        self.publishes.fetch_add(1, Ordering::Relaxed);
        self.live_since.store(self.elapsed_millis() + 1, Ordering::Relaxed);
    }

    pub fn record_publish_end(&self, duration: Duration) {
        self.live_since.store(0, Ordering::Relaxed);
        self.stream_millis
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    fn elapsed_millis(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Time the current publish has been live so far
    fn live_millis(&self) -> u64 {
        match self.live_since.load(Ordering::Relaxed) {
            0 => 0,
            since => self.elapsed_millis().saturating_sub(since - 1),
        }
    }

    pub fn record_publish_rejected(&self) {
        self.publishes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_viewer_join(&self) {
        self.plays.fetch_add(1, Ordering::Relaxed);
        let now = self.viewers.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_viewers.fetch_max(now, Ordering::Relaxed);
    }

    pub fn record_viewer_leave(&self) {
        // Saturating: a stray leave must not wrap the gauge
        let _ = self
            .viewers
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    pub fn record_viewer_rejected(&self) {
        self.plays_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Slow-consumer drop; the matching leave is recorded separately
    pub fn record_viewer_dropped(&self) {
        self.viewers_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Media bytes accepted from the publisher
    pub fn record_bytes_in(&self, n: u64) {
        self.bytes_in.fetch_add(n, Ordering::Relaxed);
        self.packets_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_out(&self, n: u64) {
        self.bytes_out.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_chat_in(&self) {
        self.chat_in.fetch_add(1, Ordering::Relaxed);
    }

    /// One event delivered to `n` clients
    pub fn record_chat_out(&self, n: u64) {
        self.chat_out.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_chat_users(&self, n: u64) {
        self.chat_users.store(n, Ordering::Relaxed);
        self.peak_chat_users.fetch_max(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        StatsSnapshot {
            uptime: self.started_at.elapsed(),
            publishes: load(&self.publishes),
            publishes_rejected: load(&self.publishes_rejected),
            stream_duration: Duration::from_millis(load(&self.stream_millis) + self.live_millis()),
            plays: load(&self.plays),
            plays_rejected: load(&self.plays_rejected),
            viewers: load(&self.viewers),
            peak_viewers: load(&self.peak_viewers),
            viewers_dropped: load(&self.viewers_dropped),
            bytes_in: load(&self.bytes_in),
            bytes_out: load(&self.bytes_out),
            packets_relayed: load(&self.packets_relayed),
            chat_messages_in: load(&self.chat_in),
            chat_messages_out: load(&self.chat_out),
            chat_users: load(&self.chat_users),
            peak_chat_users: load(&self.peak_chat_users),
        }
    }

    /// Human-readable summary, one counter per line
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        let mut out = String::new();

        let _ = writeln!(out, "Stream stats");
        let _ = writeln!(out, "  uptime:             {}", format_duration(s.uptime));
        let _ = writeln!(out, "  streamed for:       {}", format_duration(s.stream_duration));
        let _ = writeln!(
            out,
            "  publishes:          {} ({} rejected)",
            s.publishes, s.publishes_rejected
        );
        let _ = writeln!(
            out,
            "  plays:              {} ({} rejected, {} dropped as slow)",
            s.plays, s.plays_rejected, s.viewers_dropped
        );
        let _ = writeln!(
            out,
            "  viewers:            {} now, {} peak",
            s.viewers, s.peak_viewers
        );
        let _ = writeln!(
            out,
            "  media:              {} in, {} out, {} packets",
            format_bytes(s.bytes_in),
            format_bytes(s.bytes_out),
            s.packets_relayed
        );
        let _ = writeln!(
            out,
            "  chat:               {} received, {} delivered",
            s.chat_messages_in, s.chat_messages_out
        );
        let _ = write!(
            out,
            "  chat users:         {} now, {} peak",
            s.chat_users, s.peak_chat_users
        );

        out
    }

    /// Write the summary to stdout and the log
    pub fn print(&self) {
        let summary = self.summary();
        println!("{summary}");
        tracing::info!(stats = %summary, "Final stream stats");
    }
}

impl Default for StreamStats {
    fn default() -> Self {
        Self::new()
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}h{:02}m{:02}s", secs / 3600, (secs / 60) % 60, secs % 60)
}

fn format_bytes(n: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_new_is_zeroed() {
        let s = StreamStats::new().snapshot();
        assert_eq!(s.publishes, 0);
        assert_eq!(s.viewers, 0);
        assert_eq!(s.bytes_in, 0);
        assert_eq!(s.stream_duration, Duration::ZERO);
    }

    #[test]
    fn test_viewer_gauge_and_peak() {
        let stats = StreamStats::new();
        stats.record_viewer_join();
        stats.record_viewer_join();
        stats.record_viewer_join();
        stats.record_viewer_leave();
        stats.record_viewer_dropped();
        stats.record_viewer_leave();

        let s = stats.snapshot();
        assert_eq!(s.plays, 3);
        assert_eq!(s.viewers, 1);
        assert_eq!(s.peak_viewers, 3);
        assert_eq!(s.viewers_dropped, 1);
    }

    #[test]
    fn test_leave_never_underflows() {
        let stats = StreamStats::new();
        stats.record_viewer_leave();
        assert_eq!(stats.snapshot().viewers, 0);
    }

    #[test]
    fn test_publish_duration_accumulates() {
        let stats = StreamStats::new();
        stats.record_publish_start();
        stats.record_publish_end(Duration::from_millis(1500));
        stats.record_publish_start();
        stats.record_publish_end(Duration::from_millis(500));
        stats.record_publish_rejected();

        let s = stats.snapshot();
        assert_eq!(s.publishes, 2);
        assert_eq!(s.publishes_rejected, 1);
        assert_eq!(s.stream_duration, Duration::from_secs(2));
    }

    #[test]
    fn test_live_stream_counts_toward_duration() {
        let stats = StreamStats::new();
        stats.record_publish_start();
        std::thread::sleep(Duration::from_millis(60));

        let live = stats.snapshot().stream_duration;
        assert!(live >= Duration::from_millis(50), "{live:?}");

        // Once ended only the recorded duration remains
        stats.record_publish_end(Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(stats.snapshot().stream_duration, Duration::from_millis(10));
    }

    #[test]
    fn test_chat_counters() {
        let stats = StreamStats::new();
        stats.record_chat_users(4);
        stats.record_chat_users(2);
        stats.record_chat_in();
        stats.record_chat_out(2);

        let s = stats.snapshot();
        assert_eq!(s.chat_users, 2);
        assert_eq!(s.peak_chat_users, 4);
        assert_eq!(s.chat_messages_in, 1);
        assert_eq!(s.chat_messages_out, 2);
    }

    #[tokio::test]
    async fn test_concurrent_updates() {
        let stats = Arc::new(StreamStats::new());
        let mut tasks = Vec::new();

        for _ in 0..8 {
            let stats = Arc::clone(&stats);
            tasks.push(tokio::spawn(async move {
                for _ in 0..1000 {
                    stats.record_bytes_in(10);
                    stats.record_bytes_out(5);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let s = stats.snapshot();
        assert_eq!(s.bytes_in, 80_000);
        assert_eq!(s.bytes_out, 40_000);
        assert_eq!(s.packets_relayed, 8000);
    }

    #[test]
    fn test_summary_mentions_counters() {
        let stats = StreamStats::new();
        stats.record_publish_start();
        stats.record_bytes_in(2048);

        let summary = stats.summary();
        assert!(summary.starts_with("Stream stats"));
        assert!(summary.contains("publishes:          1 (0 rejected)"));
        assert!(summary.contains("2.0 KiB in"));
    }

    #[test]
    fn test_formatting_helpers() {
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h02m05s");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MiB");
    }
}
