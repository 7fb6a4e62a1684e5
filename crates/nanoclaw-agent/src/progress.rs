use std::time::{Duration, Instant};

const PROGRESS_SUMMARY_MAX_CHARS: usize = 100;

/// Phase label for one progress event.
pub fn classify_phase(tool_name: Option<&str>) -> String {
    match tool_name {
        Some(tool) if !tool.trim().is_empty() => format!("using {tool}"),
        _ => "thinking".to_string(),
    }
}

/// Collapses whitespace and caps the summary at 100 characters on a char
/// boundary.
pub fn summarize_for_progress(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= PROGRESS_SUMMARY_MAX_CHARS {
        return collapsed;
    }
    collapsed.chars().take(PROGRESS_SUMMARY_MAX_CHARS).collect()
}

/// One-per-interval emission gate. Missing a tick never fails the run;
/// progress is best-effort by design.
#[derive(Debug)]
pub struct ProgressThrottle {
    min_interval: Duration,
    last_emit: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_emit: None,
        }
    }

    pub fn should_emit(&mut self, now: Instant) -> bool {
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_classify_phase_names_the_tool_or_thinking() {
        assert_eq!(classify_phase(Some("bash")), "using bash");
        assert_eq!(classify_phase(Some("  ")), "thinking");
        assert_eq!(classify_phase(None), "thinking");
    }

    #[test]
    fn unit_summary_collapses_whitespace_and_caps_at_100_chars() {
        assert_eq!(
            summarize_for_progress("reading   the\nconfig file"),
            "reading the config file"
        );
        let long = "x".repeat(300);
        assert_eq!(summarize_for_progress(&long).chars().count(), 100);
    }

    #[test]
    fn functional_throttle_emits_once_per_interval() {
        let mut throttle = ProgressThrottle::new(Duration::from_secs(5));
        let start = Instant::now();
        assert!(throttle.should_emit(start));
        assert!(!throttle.should_emit(start + Duration::from_secs(2)));
        assert!(throttle.should_emit(start + Duration::from_secs(6)));
    }
}
