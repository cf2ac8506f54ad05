use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceFilter {
    pub include_instructions: bool,
    pub include_hooks: bool,
    pub include_faults: bool,
    /// Keep one event in `sample_rate`. Faults are never sampled out.
    pub sample_rate: u32,
}

impl Default for TraceFilter {
    fn default() -> Self {
        Self {
            include_instructions: false,
            include_hooks: true,
            include_faults: true,
            sample_rate: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TraceEvent {
    Instruction {
        addr: u32,
        cs: u16,
        ip: u16,
        bytes: Vec<u8>,
        text: String,
    },
    Hook {
        hook: String,
        label: String,
        trigger: String,
        access_addr: u32,
        verdict: String,
    },
    Fault {
        addr: u32,
        message: String,
    },
    Warning {
        message: String,
    },
}

/// Bounded ring of trace events; the oldest event is dropped when full.
#[derive(Debug)]
pub struct TraceBuffer {
    enabled: bool,
    filter: TraceFilter,
    sample_counter: u64,
    max_events: usize,
    dropped: u64,
    events: VecDeque<TraceEvent>,
}

impl Default for TraceBuffer {
    fn default() -> Self {
        Self::new(16 * 1024)
    }
}

impl TraceBuffer {
    pub fn new(max_events: usize) -> Self {
        Self {
            enabled: false,
            filter: TraceFilter::default(),
            sample_counter: 0,
            max_events: max_events.max(1),
            dropped: 0,
            events: VecDeque::new(),
        }
    }

    pub fn enable(&mut self, filter: TraceFilter) {
        self.enabled = true;
        self.filter = filter;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether instruction events would be kept; lets callers skip formatting disassembly.
    pub fn wants_instructions(&self) -> bool {
        self.enabled && self.filter.include_instructions
    }

    pub fn wants_hooks(&self) -> bool {
        self.enabled && self.filter.include_hooks
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.dropped = 0;
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events evicted because the ring was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn events(&self) -> impl Iterator<Item = &TraceEvent> + '_ {
        self.events.iter()
    }

    pub fn record(&mut self, event: TraceEvent) {
        if !self.enabled {
            return;
        }

        if !self.filter_allows(&event) {
            return;
        }

        if !matches!(event, TraceEvent::Fault { .. }) && !self.sample_allows() {
            return;
        }

        if self.events.len() == self.max_events {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self, max: usize) -> Vec<TraceEvent> {
        let max = max.min(self.events.len());
        self.events.drain(..max).collect()
    }

    pub fn export_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.events)
    }

    fn filter_allows(&self, event: &TraceEvent) -> bool {
        match event {
            TraceEvent::Instruction { .. } => self.filter.include_instructions,
            TraceEvent::Hook { .. } => self.filter.include_hooks,
            TraceEvent::Fault { .. } | TraceEvent::Warning { .. } => self.filter.include_faults,
        }
    }

    fn sample_allows(&mut self) -> bool {
        let rate = self.filter.sample_rate.max(1);
        if rate == 1 {
            return true;
        }

        self.sample_counter = self.sample_counter.wrapping_add(1);
        self.sample_counter % u64::from(rate) == 0
    }
}
