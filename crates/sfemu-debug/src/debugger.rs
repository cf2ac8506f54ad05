use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PauseReason {
    Manual,
    Breakpoint { addr: u32 },
    SingleStep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecDecision {
    Continue,
    Pause(PauseReason),
}

/// Breakpoints and run control, consulted by the machine around every instruction.
#[derive(Debug)]
pub struct Debugger {
    run_state: RunState,
    breakpoints: BTreeSet<u32>,
    remaining_steps: u32,
    last_pause: Option<PauseReason>,
    /// Set by `resume`/`request_steps` so the instruction sitting on a breakpoint can execute.
    skip_breakpoint_at: Option<u32>,
}

impl Debugger {
    pub fn new() -> Self {
        Self {
            run_state: RunState::Running,
            breakpoints: BTreeSet::new(),
            remaining_steps: 0,
            last_pause: None,
            skip_breakpoint_at: None,
        }
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn is_paused(&self) -> bool {
        self.run_state == RunState::Paused
    }

    /// Why execution last stopped, if it is currently stopped.
    pub fn pause_reason(&self) -> Option<PauseReason> {
        match self.run_state {
            RunState::Paused => self.last_pause,
            RunState::Running => None,
        }
    }

    pub fn pause(&mut self) {
        self.stop(PauseReason::Manual);
    }

    pub fn resume(&mut self) {
        self.release();
        self.remaining_steps = 0;
    }

    pub fn request_single_step(&mut self) {
        self.request_steps(1);
    }

    /// Run `n` more instructions, then pause with [`PauseReason::SingleStep`].
    pub fn request_steps(&mut self, n: u32) {
        self.release();
        self.remaining_steps = n;
    }

    pub fn set_breakpoint(&mut self, addr: u32) {
        self.breakpoints.insert(addr);
    }

    pub fn remove_breakpoint(&mut self, addr: u32) -> bool {
        self.breakpoints.remove(&addr)
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = u32> + '_ {
        self.breakpoints.iter().copied()
    }

    pub fn check_before_exec(&mut self, addr: u32) -> ExecDecision {
        match self.run_state {
            RunState::Paused => ExecDecision::Pause(self.last_pause.unwrap_or(PauseReason::Manual)),
            RunState::Running => {
                if self.skip_breakpoint_at.take() == Some(addr) {
                    return ExecDecision::Continue;
                }
                if self.breakpoints.contains(&addr) {
                    self.stop(PauseReason::Breakpoint { addr });
                    ExecDecision::Pause(PauseReason::Breakpoint { addr })
                } else {
                    ExecDecision::Continue
                }
            }
        }
    }

    pub fn check_after_exec(&mut self) -> ExecDecision {
        self.skip_breakpoint_at = None;
        if self.run_state == RunState::Paused {
            return ExecDecision::Pause(self.last_pause.unwrap_or(PauseReason::Manual));
        }

        if self.remaining_steps == 0 {
            return ExecDecision::Continue;
        }

        self.remaining_steps -= 1;
        if self.remaining_steps == 0 {
            self.stop(PauseReason::SingleStep);
            ExecDecision::Pause(PauseReason::SingleStep)
        } else {
            ExecDecision::Continue
        }
    }

    fn stop(&mut self, reason: PauseReason) {
        self.run_state = RunState::Paused;
        self.remaining_steps = 0;
        self.last_pause = Some(reason);
    }

    fn release(&mut self) {
        if let Some(PauseReason::Breakpoint { addr }) = self.pause_reason() {
            self.skip_breakpoint_at = Some(addr);
        }
        self.run_state = RunState::Running;
    }
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}
