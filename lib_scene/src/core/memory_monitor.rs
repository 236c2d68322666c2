//! # Memory Pressure Monitor
//!
//! Classifies memory samples into [`PressureLevel`]s and decides which
//! [`CleanupAction`] the control loop should run.
//!
//! ## Signals
//!
//! - Periodic ticks from the control loop (unthrottled).
//! - `check_pressure` after mutating operations, throttled to one sample per
//!   check interval.
//! - OS push notifications: low memory and trim-memory levels.
//!
//! ## Hysteresis
//!
//! Cleanup fires only on the edge from `None` into `Warning`/`Critical`. While
//! the `warning_active` flag is set, further elevated samples are ignored; the
//! flag clears when a sample classifies as `None` again. Aggressive cleanup is
//! additionally gated by a cooldown; inside it, a critical edge downgrades to
//! a normal cleanup.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::clock::Clock;

const MB: f64 = 1024.0 * 1024.0;

/// A point-in-time memory snapshot. Byte counts throughout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySample {
    pub heap_used: u64,
    pub heap_total: u64,
    pub heap_max: u64,
    pub resident: u64,
    pub os_low_memory: bool,
    pub os_threshold: u64,
    pub os_available: u64,
}

impl MemorySample {
    /// `heap_used / heap_max`, or zero when the maximum is unknown.
    pub fn heap_used_ratio(&self) -> f64 {
        if self.heap_max == 0 {
            0.0
        } else {
            self.heap_used as f64 / self.heap_max as f64
        }
    }

    pub fn heap_used_mb(&self) -> f64 {
        self.heap_used as f64 / MB
    }

    pub fn heap_max_mb(&self) -> f64 {
        self.heap_max as f64 / MB
    }
}

/// Source of memory samples.
pub trait MemoryProbe: Send + Sync {
    fn sample(&self) -> MemorySample;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PressureLevel {
    None,
    Warning,
    Critical,
}

impl fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PressureLevel::None => "none",
            PressureLevel::Warning => "warning",
            PressureLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// OS trim-memory levels, numbered as the platform delivers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimLevel {
    RunningModerate,
    RunningLow,
    RunningCritical,
    UiHidden,
    Background,
    Moderate,
    Complete,
    Unknown(i32),
}

impl TrimLevel {
    pub fn from_code(code: i32) -> Self {
        match code {
            5 => TrimLevel::RunningModerate,
            10 => TrimLevel::RunningLow,
            15 => TrimLevel::RunningCritical,
            20 => TrimLevel::UiHidden,
            40 => TrimLevel::Background,
            60 => TrimLevel::Moderate,
            80 => TrimLevel::Complete,
            other => TrimLevel::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            TrimLevel::RunningModerate => 5,
            TrimLevel::RunningLow => 10,
            TrimLevel::RunningCritical => 15,
            TrimLevel::UiHidden => 20,
            TrimLevel::Background => 40,
            TrimLevel::Moderate => 60,
            TrimLevel::Complete => 80,
            TrimLevel::Unknown(code) => *code,
        }
    }

    /// Levels that warrant evicting reusable scenes.
    pub fn is_aggressive(&self) -> bool {
        matches!(
            self,
            TrimLevel::RunningLow
                | TrimLevel::RunningCritical
                | TrimLevel::Moderate
                | TrimLevel::Complete
        )
    }
}

/// What the control loop should do after a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupAction {
    None,
    /// Reap stale entries and hint the renderer to drop caches.
    Normal,
    /// Normal cleanup plus oldest-first eviction.
    Aggressive,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorSettings {
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub aggressive_cooldown_ms: u64,
    pub check_interval_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            warning_threshold: 0.80,
            critical_threshold: 0.90,
            aggressive_cooldown_ms: 30_000,
            check_interval_ms: 5_000,
        }
    }
}

pub struct MemoryPressureMonitor {
    probe: Box<dyn MemoryProbe>,
    clock: Arc<dyn Clock>,
    settings: MonitorSettings,
    warning_active: bool,
    last_aggressive_ms: Option<u64>,
    last_check_ms: Option<u64>,
    last_sample: Option<MemorySample>,
    last_level: PressureLevel,
}

impl MemoryPressureMonitor {
    pub fn new(probe: Box<dyn MemoryProbe>, clock: Arc<dyn Clock>, settings: MonitorSettings) -> Self {
        Self {
            probe,
            clock,
            settings,
            warning_active: false,
            last_aggressive_ms: None,
            last_check_ms: None,
            last_sample: None,
            last_level: PressureLevel::None,
        }
    }

    pub fn classify(&self, sample: &MemorySample) -> PressureLevel {
        let ratio = sample.heap_used_ratio();
        if sample.os_low_memory || ratio > self.settings.critical_threshold {
            PressureLevel::Critical
        } else if ratio > self.settings.warning_threshold {
            PressureLevel::Warning
        } else {
            PressureLevel::None
        }
    }

    /// Runs a sample through the classifier and the hysteresis gate.
    pub fn evaluate(&mut self, sample: MemorySample) -> CleanupAction {
        let level = self.classify(&sample);
        self.last_sample = Some(sample);
        self.last_level = level;

        match level {
            PressureLevel::None => {
                if self.warning_active {
                    log::info!("Memory pressure subsided");
                    self.warning_active = false;
                }
                CleanupAction::None
            }
            _ if self.warning_active => CleanupAction::None,
            PressureLevel::Warning => {
                log::warn!(
                    "Memory pressure warning: {:.1}% of heap used",
                    sample.heap_used_ratio() * 100.0
                );
                self.warning_active = true;
                CleanupAction::Normal
            }
            PressureLevel::Critical => {
                log::warn!(
                    "Critical memory pressure: {:.1}% of heap used, os low memory: {}",
                    sample.heap_used_ratio() * 100.0,
                    sample.os_low_memory
                );
                self.warning_active = true;
                self.aggressive_or_normal()
            }
        }
    }

    /// Throttled check, used after mutating operations.
    pub fn check_pressure(&mut self) -> CleanupAction {
        let now = self.clock.now_ms();
        if let Some(last) = self.last_check_ms {
            if now.saturating_sub(last) < self.settings.check_interval_ms {
                return CleanupAction::None;
            }
        }
        self.last_check_ms = Some(now);
        let sample = self.probe.sample();
        self.evaluate(sample)
    }

    /// Periodic sample from the control loop's timer.
    pub fn tick(&mut self) -> CleanupAction {
        self.last_check_ms = Some(self.clock.now_ms());
        let sample = self.probe.sample();
        self.evaluate(sample)
    }

    /// OS low-memory notification. Skips hysteresis but honours the
    /// aggressive cooldown.
    pub fn on_low_memory(&mut self) -> CleanupAction {
        log::warn!("Low memory warning received");
        self.record_push_sample();
        self.warning_active = true;
        self.last_level = PressureLevel::Critical;
        self.aggressive_or_normal()
    }

    pub fn on_trim_memory(&mut self, level: TrimLevel) -> CleanupAction {
        log::debug!("Trim memory requested: {:?} ({})", level, level.code());
        self.record_push_sample();
        if level.is_aggressive() {
            self.warning_active = true;
            self.aggressive_or_normal()
        } else {
            CleanupAction::Normal
        }
    }

    /// Records that an aggressive cleanup ran outside the pressure path.
    pub fn note_aggressive_cleanup(&mut self) {
        self.last_aggressive_ms = Some(self.clock.now_ms());
    }

    fn record_push_sample(&mut self) {
        let sample = self.probe.sample();
        self.last_sample = Some(sample);
    }

    fn aggressive_or_normal(&mut self) -> CleanupAction {
        let now = self.clock.now_ms();
        let cooling = self
            .last_aggressive_ms
            .is_some_and(|last| now.saturating_sub(last) < self.settings.aggressive_cooldown_ms);
        if cooling {
            log::debug!("Aggressive cleanup on cooldown, running normal cleanup");
            CleanupAction::Normal
        } else {
            self.last_aggressive_ms = Some(now);
            CleanupAction::Aggressive
        }
    }

    /// Fresh sample without touching hysteresis state.
    pub fn sample_now(&self) -> MemorySample {
        self.probe.sample()
    }

    pub fn last_sample(&self) -> Option<MemorySample> {
        self.last_sample
    }

    pub fn last_level(&self) -> PressureLevel {
        self.last_level
    }

    pub fn warning_active(&self) -> bool {
        self.warning_active
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays a fixed heap ratio that tests can change between calls.
    struct ScriptedProbe {
        state: Arc<Mutex<(u64, bool)>>,
    }

    impl MemoryProbe for ScriptedProbe {
        fn sample(&self) -> MemorySample {
            let (used, low) = *self.state.lock().unwrap();
            MemorySample {
                heap_used: used,
                heap_total: used,
                heap_max: 100,
                os_low_memory: low,
                ..Default::default()
            }
        }
    }

    fn monitor() -> (MemoryPressureMonitor, Arc<Mutex<(u64, bool)>>, Arc<ManualClock>) {
        let state = Arc::new(Mutex::new((10, false)));
        let clock = Arc::new(ManualClock::new(0));
        let monitor = MemoryPressureMonitor::new(
            Box::new(ScriptedProbe {
                state: state.clone(),
            }),
            clock.clone(),
            MonitorSettings::default(),
        );
        (monitor, state, clock)
    }

    fn sample(used: u64, low: bool) -> MemorySample {
        MemorySample {
            heap_used: used,
            heap_max: 100,
            os_low_memory: low,
            ..Default::default()
        }
    }

    #[test]
    fn test_classification_boundaries() {
        let (m, _, _) = monitor();
        assert_eq!(m.classify(&sample(80, false)), PressureLevel::None);
        assert_eq!(m.classify(&sample(81, false)), PressureLevel::Warning);
        assert_eq!(m.classify(&sample(90, false)), PressureLevel::Warning);
        assert_eq!(m.classify(&sample(91, false)), PressureLevel::Critical);
        assert_eq!(m.classify(&sample(1, true)), PressureLevel::Critical);
        let unknown_max = MemorySample {
            heap_used: 500,
            ..Default::default()
        };
        assert_eq!(m.classify(&unknown_max), PressureLevel::None);
    }

    #[test]
    fn test_warning_does_not_repeat_until_cleared() {
        let (mut m, state, _) = monitor();
        *state.lock().unwrap() = (85, false);
        assert_eq!(m.tick(), CleanupAction::Normal);
        assert_eq!(m.tick(), CleanupAction::None);
        assert_eq!(m.tick(), CleanupAction::None);
        assert!(m.warning_active());

        *state.lock().unwrap() = (50, false);
        assert_eq!(m.tick(), CleanupAction::None);
        assert!(!m.warning_active());

        *state.lock().unwrap() = (85, false);
        assert_eq!(m.tick(), CleanupAction::Normal);
    }

    #[test]
    fn test_critical_edge_respects_cooldown() {
        let (mut m, state, clock) = monitor();
        *state.lock().unwrap() = (95, false);
        assert_eq!(m.tick(), CleanupAction::Aggressive);

        *state.lock().unwrap() = (10, false);
        m.tick();
        clock.advance(Duration::from_secs(10));
        *state.lock().unwrap() = (95, false);
        assert_eq!(m.tick(), CleanupAction::Normal);

        *state.lock().unwrap() = (10, false);
        m.tick();
        clock.advance(Duration::from_secs(25));
        *state.lock().unwrap() = (95, false);
        assert_eq!(m.tick(), CleanupAction::Aggressive);
    }

    #[test]
    fn test_check_pressure_is_throttled() {
        let (mut m, state, clock) = monitor();
        *state.lock().unwrap() = (10, false);
        assert_eq!(m.check_pressure(), CleanupAction::None);

        *state.lock().unwrap() = (85, false);
        clock.advance(Duration::from_secs(1));
        assert_eq!(m.check_pressure(), CleanupAction::None);
        assert_eq!(m.last_level(), PressureLevel::None);

        clock.advance(Duration::from_secs(5));
        assert_eq!(m.check_pressure(), CleanupAction::Normal);
    }

    #[test]
    fn test_low_memory_bypasses_hysteresis() {
        let (mut m, state, clock) = monitor();
        *state.lock().unwrap() = (85, false);
        assert_eq!(m.tick(), CleanupAction::Normal);
        assert_eq!(m.on_low_memory(), CleanupAction::Aggressive);
        assert_eq!(m.on_low_memory(), CleanupAction::Normal);
        clock.advance(Duration::from_secs(31));
        assert_eq!(m.on_low_memory(), CleanupAction::Aggressive);
    }

    #[test]
    fn test_trim_levels() {
        let (mut m, _, _) = monitor();
        assert_eq!(TrimLevel::from_code(15), TrimLevel::RunningCritical);
        assert_eq!(TrimLevel::from_code(7), TrimLevel::Unknown(7));
        assert_eq!(TrimLevel::Complete.code(), 80);
        assert!(!TrimLevel::UiHidden.is_aggressive());

        assert_eq!(m.on_trim_memory(TrimLevel::UiHidden), CleanupAction::Normal);
        assert_eq!(m.on_trim_memory(TrimLevel::Complete), CleanupAction::Aggressive);
        assert_eq!(m.on_trim_memory(TrimLevel::RunningLow), CleanupAction::Normal);
    }
}
