//! Run/pause bookkeeping and the step-out heuristic.
//!
//! The engine has no "step out" command. Stepping out is emulated by sending
//! `next` and deciding, at every stop, whether control is still inside the
//! function being left.

use godot_wire::{Command, StackFrameInfo};
use serde::Serialize;

use crate::error::{DebugError, DebugResult};

/// Reason the engine gives in `debug_enter` for a plain breakpoint or step
/// stop. Anything else is an error message.
pub const BREAKPOINT_REASON: &str = "Breakpoint";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    pub id: u32,
    pub file: String,
    pub line: i64,
    pub function: String,
}

impl StackFrame {
    pub fn from_wire(id: u32, info: StackFrameInfo) -> Self {
        Self {
            id,
            file: info.file,
            line: info.line,
            function: info.function,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PauseReason {
    Breakpoint,
    Step,
    Pause,
    /// Script error; carries the engine's message.
    Exception(String),
}

impl PauseReason {
    /// The DAP `stopped` reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            PauseReason::Breakpoint => "breakpoint",
            PauseReason::Step => "step",
            PauseReason::Pause => "pause",
            PauseReason::Exception(_) => "exception",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused(PauseReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecAction {
    Continue,
    Next,
    Step,
    StepOut,
    Break,
}

impl ExecAction {
    pub fn command(self) -> Command {
        match self {
            ExecAction::Continue => Command::continue_execution(),
            ExecAction::Next | ExecAction::StepOut => Command::next(),
            ExecAction::Step => Command::step(),
            ExecAction::Break => Command::break_execution(),
        }
    }
}

/// What to do with a freshly received stack dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackDecision {
    /// Still inside the function being stepped out of; send `next` again.
    AutoContinue,
    /// Report a stop to the consumer.
    Stop(PauseReason),
}

#[derive(Debug)]
pub struct StepState {
    run: RunState,
    stepping_out: bool,
    exception: Option<String>,
    last_action: Option<ExecAction>,
    frames: Vec<StackFrame>,
}

impl Default for StepState {
    fn default() -> Self {
        Self {
            run: RunState::Running,
            stepping_out: false,
            exception: None,
            last_action: None,
            frames: Vec::new(),
        }
    }
}

impl StepState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_state(&self) -> &RunState {
        &self.run
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.run, RunState::Paused(_))
    }

    pub fn is_stepping_out(&self) -> bool {
        self.stepping_out
    }

    /// The pending exception message while stopped on a script error.
    pub fn exception(&self) -> Option<&str> {
        self.exception.as_deref()
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    pub fn on_debug_enter(&mut self, reason: &str) {
        if reason == BREAKPOINT_REASON {
            self.exception = None;
        } else {
            self.exception = Some(reason.to_string());
        }
        let reason = self.pause_reason();
        self.run = RunState::Paused(reason);
    }

    pub fn on_debug_exit(&mut self) {
        self.run = RunState::Running;
    }

    /// Rejects execution control while stopped on an exception.
    pub fn check_exec(&self) -> DebugResult<()> {
        if self.exception.is_some() && self.is_paused() {
            return Err(DebugError::ExceptionMode);
        }
        Ok(())
    }

    pub fn on_exec(&mut self, action: ExecAction) {
        self.stepping_out = action == ExecAction::StepOut;
        self.last_action = Some(action);
    }

    /// Records `frames` as the current stack and decides whether a step-out
    /// in progress should keep going. `at_breakpoint` tells whether the new
    /// top frame sits on a user breakpoint, which always stops.
    pub fn on_stack_dump(&mut self, frames: Vec<StackFrame>, at_breakpoint: bool) -> StackDecision {
        if frames.is_empty() {
            // Engine code with no script frames.
            self.frames.clear();
            self.stepping_out = false;
            let reason = self.pause_reason();
            self.run = RunState::Paused(reason.clone());
            return StackDecision::Stop(reason);
        }

        let keep_going = self.stepping_out
            && !at_breakpoint
            && still_stepping_out(&self.frames, &frames);
        self.frames = frames;
        if keep_going {
            return StackDecision::AutoContinue;
        }

        let cut_short = std::mem::take(&mut self.stepping_out) && at_breakpoint;
        let reason = match self.pause_reason() {
            PauseReason::Step if cut_short => PauseReason::Breakpoint,
            reason => reason,
        };
        self.run = RunState::Paused(reason.clone());
        StackDecision::Stop(reason)
    }

    fn pause_reason(&self) -> PauseReason {
        if let Some(message) = &self.exception {
            return PauseReason::Exception(message.clone());
        }
        match self.last_action {
            Some(ExecAction::Next | ExecAction::Step | ExecAction::StepOut) => PauseReason::Step,
            Some(ExecAction::Break) => PauseReason::Pause,
            Some(ExecAction::Continue) | None => PauseReason::Breakpoint,
        }
    }
}

/// With more than one frame at the previous stop, keep stepping while the
/// depth is unchanged. With a single frame there is no caller to return to,
/// so keep stepping while execution stays in the same function at the same or
/// a later line.
fn still_stepping_out(previous: &[StackFrame], current: &[StackFrame]) -> bool {
    let (Some(prev_top), Some(top)) = (previous.first(), current.first()) else {
        return false;
    };
    if previous.len() > 1 {
        return previous.len() == current.len();
    }
    top.file == prev_top.file && top.function == prev_top.function && top.line >= prev_top.line
}
