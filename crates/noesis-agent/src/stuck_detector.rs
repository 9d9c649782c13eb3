use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Verdict from `check()` (§4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StuckVerdict {
    pub is_stuck: bool,
    pub should_terminate: bool,
    pub message: Option<String>,
}

impl StuckVerdict {
    fn ok() -> Self {
        Self {
            is_stuck: false,
            should_terminate: false,
            message: None,
        }
    }

    fn warn(message: impl Into<String>) -> Self {
        Self {
            is_stuck: true,
            should_terminate: false,
            message: Some(message.into()),
        }
    }

    fn terminate(message: impl Into<String>) -> Self {
        Self {
            is_stuck: true,
            should_terminate: true,
            message: Some(message.into()),
        }
    }
}

const SAME_INPUT_THRESHOLD: usize = 3;
const SAME_TOOL_THRESHOLD: usize = 10;

#[derive(Debug, Clone)]
struct CallRecord {
    tool_name: String,
    fingerprint: u64,
}

/// Bounded append history of `(tool_name, input_fingerprint)` plus a monotonic
/// iteration counter (§4.3). Directly adapted from the teacher's
/// `loop_detection.rs::LoopDetector`, collapsed to the spec's simpler three-rule
/// policy and `{is_stuck, should_terminate, message}` verdict shape instead of the
/// teacher's richer Allow/Warn/Block enum.
pub struct StuckDetector {
    max_iterations: u64,
    history: Vec<CallRecord>,
    iteration: u64,
}

/// Stable hash of a tool call's argument string, used only for equality (Glossary
/// "Fingerprint").
pub fn fingerprint(input_str: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    input_str.hash(&mut hasher);
    hasher.finish()
}

impl StuckDetector {
    pub fn new(max_iterations: u64) -> Self {
        Self {
            max_iterations: max_iterations.clamp(1, 1000),
            history: Vec::new(),
            iteration: 0,
        }
    }

    /// Record one call and advance the iteration counter.
    pub fn record(&mut self, tool_name: &str, input_str: &str) {
        self.iteration += 1;
        self.history.push(CallRecord {
            tool_name: tool_name.to_string(),
            fingerprint: fingerprint(input_str),
        });
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Evaluate in order: max iterations, then same-input-3x, then same-tool-10x.
    pub fn check(&self) -> StuckVerdict {
        if self.iteration >= self.max_iterations {
            return StuckVerdict::terminate(format!(
                "reached max {} iterations",
                self.max_iterations
            ));
        }

        if self.history.len() >= SAME_INPUT_THRESHOLD {
            let tail = &self.history[self.history.len() - SAME_INPUT_THRESHOLD..];
            let first = &tail[0];
            if tail
                .iter()
                .all(|r| r.tool_name == first.tool_name && r.fingerprint == first.fingerprint)
            {
                return StuckVerdict::warn("same input 3x, change approach");
            }
        }

        if self.history.len() >= SAME_TOOL_THRESHOLD {
            let tail = &self.history[self.history.len() - SAME_TOOL_THRESHOLD..];
            let first_name = &tail[0].tool_name;
            if tail.iter().all(|r| &r.tool_name == first_name) {
                return StuckVerdict::warn(format!(
                    "used {first_name} {SAME_TOOL_THRESHOLD}x in a row, try another tool"
                ));
            }
        }

        StuckVerdict::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_iterations_clamped() {
        let d = StuckDetector::new(5000);
        assert_eq!(d.max_iterations, 1000);
        let d = StuckDetector::new(0);
        assert_eq!(d.max_iterations, 1);
    }

    #[test]
    fn test_ok_when_history_is_diverse() {
        let mut d = StuckDetector::new(100);
        d.record("shell", "ls");
        d.record("read", "a.txt");
        d.record("write", "b.txt");
        assert_eq!(d.check(), StuckVerdict::ok());
    }

    #[test]
    fn test_same_input_3x_warns_without_terminating() {
        let mut d = StuckDetector::new(100);
        for _ in 0..3 {
            d.record("shell", "ls");
        }
        let verdict = d.check();
        assert!(verdict.is_stuck);
        assert!(!verdict.should_terminate);
        assert!(verdict.message.unwrap().contains("same input"));
    }

    #[test]
    fn test_same_tool_10x_different_args_warns() {
        let mut d = StuckDetector::new(100);
        for i in 0..10 {
            d.record("shell", &format!("ls {i}"));
        }
        let verdict = d.check();
        assert!(verdict.is_stuck);
        assert!(!verdict.should_terminate);
        assert!(verdict.message.unwrap().contains("shell"));
    }

    #[test]
    fn test_max_iterations_terminates() {
        let mut d = StuckDetector::new(3);
        d.record("shell", "a");
        d.record("read", "b");
        d.record("write", "c");
        let verdict = d.check();
        assert!(verdict.should_terminate);
    }

    #[test]
    fn test_fingerprint_equality() {
        assert_eq!(fingerprint("same"), fingerprint("same"));
        assert_ne!(fingerprint("a"), fingerprint("b"));
    }
}
