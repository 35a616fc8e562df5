//! Phase Timeline
//!
//! Records when each phase of a metel run starts and ends. The summary
//! is appended to the run log's system logs so users can see where a
//! run spent its time, or where it stopped.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

/// The phases of a metel run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Download,
    Spec,
    Launch,
    Watch,
    Stage,
    Parse,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Spec => "spec",
            Self::Launch => "launch",
            Self::Watch => "watch",
            Self::Stage => "stage",
            Self::Parse => "parse",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Started,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub phase: Phase,
    pub event_type: EventType,
    /// Milliseconds since the timeline was created
    pub offset_ms: u128,
}

/// Outcome of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Completed(u128),
    Failed(u128),
    /// Started but never finished
    Unfinished,
}

#[derive(Debug, Clone)]
pub struct PhaseTimeline {
    events: Vec<TimelineEvent>,
    start: Instant,
}

impl PhaseTimeline {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start: Instant::now(),
        }
    }

    fn record(&mut self, phase: Phase, event_type: EventType) {
        self.events.push(TimelineEvent {
            phase,
            event_type,
            offset_ms: self.start.elapsed().as_millis(),
        });
    }

    pub fn start(&mut self, phase: Phase) {
        self.record(phase, EventType::Started);
    }

    pub fn complete(&mut self, phase: Phase) {
        self.record(phase, EventType::Completed);
    }

    pub fn fail(&mut self, phase: Phase) {
        self.record(phase, EventType::Failed);
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Outcome of every phase that was started.
    pub fn outcomes(&self) -> BTreeMap<Phase, PhaseOutcome> {
        let mut starts: BTreeMap<Phase, u128> = BTreeMap::new();
        let mut outcomes = BTreeMap::new();

        for event in &self.events {
            match event.event_type {
                EventType::Started => {
                    starts.insert(event.phase, event.offset_ms);
                    outcomes.insert(event.phase, PhaseOutcome::Unfinished);
                }
                EventType::Completed | EventType::Failed => {
                    let Some(started) = starts.get(&event.phase) else {
                        continue;
                    };
                    let elapsed = event.offset_ms.saturating_sub(*started);
                    let outcome = if event.event_type == EventType::Completed {
                        PhaseOutcome::Completed(elapsed)
                    } else {
                        PhaseOutcome::Failed(elapsed)
                    };
                    outcomes.insert(event.phase, outcome);
                }
            }
        }

        outcomes
    }

    /// One line per started phase plus the total, e.g.
    /// `phase download completed in 120 ms`.
    pub fn system_logs(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .outcomes()
            .into_iter()
            .map(|(phase, outcome)| match outcome {
                PhaseOutcome::Completed(ms) => format!("phase {} completed in {} ms", phase, ms),
                PhaseOutcome::Failed(ms) => format!("phase {} failed after {} ms", phase, ms),
                PhaseOutcome::Unfinished => format!("phase {} did not finish", phase),
            })
            .collect();
        lines.push(format!("metel total: {} ms", self.start.elapsed().as_millis()));
        lines
    }
}

impl Default for PhaseTimeline {
    fn default() -> Self {
        Self::new()
    }
}
