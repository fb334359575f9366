//! Round timing utilities

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// How long round samples are kept
const HISTORY: Duration = Duration::from_secs(15);

/// Latency statistics for a time window, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LatencyWindow {
    pub avg: f32,
    pub min: f32,
    pub max: f32,
    pub samples: u32,
}

/// Rolling visibility-round latency statistics
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct RoundStats {
    pub last_ms: f32,
    pub five_sec: LatencyWindow,
    pub fifteen_sec: LatencyWindow,
    pub round_count: u64,
}

/// Tracks how long each visibility round took
#[derive(Debug)]
pub struct RoundTimer {
    last: Duration,
    round_count: u64,
    /// (finished at, round time in ms)
    history: VecDeque<(Instant, f32)>,
}

impl RoundTimer {
    pub fn new() -> Self {
        Self {
            last: Duration::ZERO,
            round_count: 0,
            history: VecDeque::new(),
        }
    }

    /// Record a round that finished now
    pub fn record(&mut self, elapsed: Duration) {
        self.record_at(Instant::now(), elapsed);
    }

    /// Record a round that finished at `now`
    pub fn record_at(&mut self, now: Instant, elapsed: Duration) {
        self.last = elapsed;
        self.round_count += 1;
        self.history.push_back((now, elapsed.as_secs_f32() * 1000.0));

        while let Some(&(timestamp, _)) = self.history.front() {
            if now.duration_since(timestamp) > HISTORY {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Duration of the most recent round
    pub fn last(&self) -> Duration {
        self.last
    }

    pub fn round_count(&self) -> u64 {
        self.round_count
    }

    pub fn stats(&self) -> RoundStats {
        self.stats_at(Instant::now())
    }

    pub fn stats_at(&self, now: Instant) -> RoundStats {
        RoundStats {
            last_ms: self.last.as_secs_f32() * 1000.0,
            five_sec: self.window(now, Duration::from_secs(5)),
            fifteen_sec: self.window(now, HISTORY),
            round_count: self.round_count,
        }
    }

    fn window(&self, now: Instant, window: Duration) -> LatencyWindow {
        let mut samples = 0u32;
        let mut total = 0.0f32;
        let mut min = f32::INFINITY;
        let mut max = 0.0f32;

        for &(timestamp, ms) in self.history.iter() {
            if now.saturating_duration_since(timestamp) <= window {
                samples += 1;
                total += ms;
                min = min.min(ms);
                max = max.max(ms);
            }
        }

        if samples == 0 {
            return LatencyWindow::default();
        }

        LatencyWindow {
            avg: total / samples as f32,
            min,
            max,
            samples,
        }
    }
}

impl Default for RoundTimer {
    fn default() -> Self {
        Self::new()
    }
}
