// conversion_relay/src/core/control.rs

//! Signals a step returns to steer its pipeline, and the overall result of a run.

/// Returned by each step handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineControl {
  /// Move on to the next handler or step.
  Continue,
  /// Halt the run here. Later handlers and steps are not executed.
  Stop,
}

/// Outcome of a full pipeline run that did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineResult {
  /// Every step that was not skipped ran to completion.
  Completed,
  /// A handler returned `PipelineControl::Stop`.
  Stopped,
}
