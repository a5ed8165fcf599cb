//! Goal detection over a container's log stream.
//!
//! A worker reports progress through tagged log lines. The scan ends at the
//! first error marker, at the final success marker, or when the stream ends
//! because the container exited.

use crate::error::RuntimeResult;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info};

pub const FINAL_GOAL_NOT_REACHED: &str = "final goal not reached";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalMarkers {
    pub success: String,
    pub error: String,
}

impl Default for GoalMarkers {
    fn default() -> Self {
        Self {
            success: "[SUCCESS 4]".to_string(),
            error: "[ERROR".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalOutcome {
    pub reached: bool,
    pub detail: String,
}

impl GoalOutcome {
    pub fn reached() -> Self {
        Self {
            reached: true,
            detail: String::new(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            reached: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineVerdict {
    Continue,
    Reached,
    Failed(String),
}

pub fn classify_line(line: &str, markers: &GoalMarkers) -> LineVerdict {
    if line.contains(&markers.error) {
        return LineVerdict::Failed(error_detail(line));
    }
    if line.contains(&markers.success) {
        return LineVerdict::Reached;
    }
    LineVerdict::Continue
}

/// Text following the first `]` of an error line.
fn error_detail(line: &str) -> String {
    match line.split_once(']') {
        Some((_, rest)) => rest.trim().to_string(),
        None => line.trim().to_string(),
    }
}

/// Blocking scan; intended to run on the execution bridge.
///
/// `abandoned` is set by the caller once it stopped waiting, which lets the
/// scan return at the next line instead of following the stream further.
pub fn scan<I>(lines: I, markers: &GoalMarkers, abandoned: &AtomicBool) -> GoalOutcome
where
    I: IntoIterator<Item = RuntimeResult<String>>,
{
    for line in lines {
        if abandoned.load(Ordering::Acquire) {
            return GoalOutcome::failed("goal scan abandoned");
        }

        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "Log stream failed during goal scan");
                return GoalOutcome::failed(format!("log stream failed: {e}"));
            }
        };
        debug!(line = %line.trim_end(), "Container log");

        match classify_line(&line, markers) {
            LineVerdict::Continue => {}
            LineVerdict::Reached => {
                info!("Final goal reached");
                return GoalOutcome::reached();
            }
            LineVerdict::Failed(detail) => {
                error!(detail = %detail, "Container reported an error");
                return GoalOutcome::failed(detail);
            }
        }
    }

    GoalOutcome::failed(FINAL_GOAL_NOT_REACHED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;

    fn lines(items: &[&str]) -> Vec<RuntimeResult<String>> {
        items.iter().map(|s| Ok(s.to_string())).collect()
    }

    fn run(items: Vec<RuntimeResult<String>>) -> GoalOutcome {
        scan(items, &GoalMarkers::default(), &AtomicBool::new(false))
    }

    #[test]
    fn test_success_marker_reaches_goal() {
        let outcome = run(lines(&["[SUCCESS 1] loaded", "[SUCCESS 4] ready"]));
        assert_eq!(outcome, GoalOutcome::reached());
    }

    #[test]
    fn test_error_marker_extracts_detail() {
        let outcome = run(lines(&["[SUCCESS 1] loaded", "[ERROR] bad weights"]));
        assert_eq!(outcome, GoalOutcome::failed("bad weights"));
    }

    #[test]
    fn test_error_marker_without_bracket_keeps_line() {
        assert_eq!(
            classify_line("[ERROR something odd", &GoalMarkers::default()),
            LineVerdict::Failed("[ERROR something odd".to_string())
        );
    }

    #[test]
    fn test_error_wins_over_success_on_same_line() {
        assert_eq!(
            classify_line("[ERROR] after [SUCCESS 4]", &GoalMarkers::default()),
            LineVerdict::Failed("after [SUCCESS 4]".to_string())
        );
    }

    #[test]
    fn test_intermediate_goals_do_not_finish() {
        assert_eq!(
            classify_line("[SUCCESS 3] connected", &GoalMarkers::default()),
            LineVerdict::Continue
        );
    }

    #[test]
    fn test_stream_exhaustion_fails() {
        let outcome = run(lines(&["booting", "[SUCCESS 2] weights"]));
        assert_eq!(outcome, GoalOutcome::failed(FINAL_GOAL_NOT_REACHED));
    }

    #[test]
    fn test_empty_stream_fails() {
        assert_eq!(run(Vec::new()), GoalOutcome::failed(FINAL_GOAL_NOT_REACHED));
    }

    #[test]
    fn test_stream_error_fails() {
        let outcome = run(vec![
            Ok("booting".to_string()),
            Err(RuntimeError::EngineUnavailable("socket closed".to_string())),
        ]);
        assert!(!outcome.reached);
        assert!(outcome.detail.contains("socket closed"));
    }

    #[test]
    fn test_abandoned_scan_stops() {
        let abandoned = AtomicBool::new(true);
        let outcome = scan(
            lines(&["[SUCCESS 4] ready"]),
            &GoalMarkers::default(),
            &abandoned,
        );
        assert!(!outcome.reached);
    }

    #[test]
    fn test_custom_markers() {
        let markers = GoalMarkers {
            success: "READY".to_string(),
            error: "FATAL".to_string(),
        };
        assert_eq!(classify_line("service READY", &markers), LineVerdict::Reached);
        assert_eq!(
            classify_line("[SUCCESS 4] ready", &markers),
            LineVerdict::Continue
        );
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn property_lines_without_markers_never_finish(
                noise in prop::collection::vec("[a-z0-9 ]{0,40}", 0..20)
            ) {
                let items = noise.into_iter().map(Ok).collect();
                prop_assert_eq!(run(items), GoalOutcome::failed(FINAL_GOAL_NOT_REACHED));
            }

            #[test]
            fn property_error_detail_is_trimmed_suffix(detail in "[a-z][a-z ]{0,30}[a-z]") {
                let line = format!("[ERROR]   {detail}  ");
                prop_assert_eq!(
                    classify_line(&line, &GoalMarkers::default()),
                    LineVerdict::Failed(detail)
                );
            }
        }
    }
}
