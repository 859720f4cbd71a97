use std::fmt;
use std::time::Duration;

use crate::discarders::Discarder;

/// Detailed evaluation report returned by
/// [`RuleSet::evaluate_detailed()`](super::ruleset::RuleSet::evaluate_detailed).
///
/// Lists the rules that matched, the rules skipped because a cached
/// discarder proved they could not match, the rules whose evaluation failed,
/// the discarders learned from this event and the wall-clock duration.
#[derive(Debug, Clone)]
#[must_use]
pub struct EvaluationReport {
    matched: Vec<String>,
    skipped: Vec<String>,
    failed: Vec<(String, String)>,
    discarders: Vec<Discarder>,
    duration: Duration,
}

impl EvaluationReport {
    pub(crate) fn new(
        matched: Vec<String>,
        skipped: Vec<String>,
        failed: Vec<(String, String)>,
        discarders: Vec<Discarder>,
        duration: Duration,
    ) -> Self {
        Self {
            matched,
            skipped,
            failed,
            discarders,
            duration,
        }
    }

    /// Same as the return value of [`RuleSet::evaluate()`](super::ruleset::RuleSet::evaluate).
    #[must_use]
    pub fn is_match(&self) -> bool {
        !self.matched.is_empty()
    }

    /// Ids of rules that matched, in evaluation order.
    #[must_use]
    pub fn matched(&self) -> &[String] {
        &self.matched
    }

    /// Ids of rules not evaluated because of a cached discarder.
    #[must_use]
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// Rule ids paired with the reason their evaluation failed.
    #[must_use]
    pub fn failed(&self) -> &[(String, String)] {
        &self.failed
    }

    /// Discarders found on this event.
    #[must_use]
    pub fn discarders(&self) -> &[Discarder] {
        &self.discarders
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "matched: [{}]", self.matched.join(", "))?;
        if !self.skipped.is_empty() {
            write!(f, ", skipped: [{}]", self.skipped.join(", "))?;
        }
        if !self.failed.is_empty() {
            let failed: Vec<&str> = self.failed.iter().map(|(id, _)| id.as_str()).collect();
            write!(f, ", failed: [{}]", failed.join(", "))?;
        }
        if !self.discarders.is_empty() {
            write!(f, ", discarders: {}", self.discarders.len())?;
        }
        write!(f, ", duration: {:?}", self.duration)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScalarValue;

    #[test]
    fn report_accessors() {
        let report = EvaluationReport::new(
            vec!["r1".into()],
            vec!["r2".into()],
            vec![("r3".into(), "field 'x' not found".into())],
            Vec::new(),
            Duration::from_nanos(500),
        );

        assert!(report.is_match());
        assert_eq!(report.matched(), &["r1"]);
        assert_eq!(report.skipped(), &["r2"]);
        assert_eq!(report.failed()[0].0, "r3");
        assert_eq!(report.duration(), Duration::from_nanos(500));
    }

    #[test]
    fn report_display() {
        let report = EvaluationReport::new(
            Vec::new(),
            Vec::new(),
            Vec::new(),
            vec![Discarder {
                event_type: "open".into(),
                field: "open.filename".into(),
                value: ScalarValue::String("/tmp/x".into()),
            }],
            Duration::from_nanos(100),
        );
        let s = report.to_string();
        assert!(!report.is_match());
        assert!(s.starts_with("matched: [], discarders: 1"));
    }
}
