/// Noise classification — the table of textual patterns that mark a thread
/// as belonging to the test harness, the runtime, or the detector itself.
///
/// Matching is purely textual, so the table tracks whatever wording the
/// dumper and the runtime happen to produce. When that wording changes the
/// table changes; the snapshot pipeline does not.
use serde::{Deserialize, Serialize};

/// Why a record was classified as noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseCategory {
    /// The test framework's own runner threads.
    TestRunner,
    /// Allocator / event-loop background threads that come and go on their own.
    Housekeeping,
    /// Signal-handling threads installed by libraries.
    SignalHandling,
    /// The harness loop that iterates over tests.
    HarnessIteration,
    /// The detector's own capture call.
    Detector,
}

impl NoiseCategory {
    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::TestRunner => "test runner",
            Self::Housekeeping => "housekeeping",
            Self::SignalHandling => "signal handling",
            Self::HarnessIteration => "harness iteration",
            Self::Detector => "detector",
        }
    }
}

/// How a pattern is matched against trimmed frame text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Matcher {
    #[default]
    Contains,
    Prefix,
}

/// One row of the noise table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoisePattern {
    pub category: NoiseCategory,
    pub needle: String,
    #[serde(default)]
    pub matcher: Matcher,
}

impl NoisePattern {
    pub fn contains(category: NoiseCategory, needle: impl Into<String>) -> Self {
        Self {
            category,
            needle: needle.into(),
            matcher: Matcher::Contains,
        }
    }

    pub fn prefix(category: NoiseCategory, needle: impl Into<String>) -> Self {
        Self {
            category,
            needle: needle.into(),
            matcher: Matcher::Prefix,
        }
    }

    /// Test the pattern against already-trimmed frame text.
    pub fn matches(&self, frames: &str) -> bool {
        match self.matcher {
            Matcher::Contains => frames.contains(self.needle.as_str()),
            Matcher::Prefix => frames.starts_with(self.needle.as_str()),
        }
    }
}

/// Outcome of classifying one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseVerdict {
    /// Not noise; the record belongs in the snapshot.
    Interesting,
    /// Frame text was empty after trimming.
    Empty,
    /// Matched a pattern in the table.
    Matched(NoiseCategory),
}

impl NoiseVerdict {
    pub fn is_noise(self) -> bool {
        !matches!(self, Self::Interesting)
    }
}

// Default patterns. Kept as data so new runtime wording only touches this table.
//
// Rows match the `name:` and `role:` lines written by the `/proc` dumper.
// Unguarded sibling tests are not recognised; extend the table with their
// thread names or run leak-guarded tests in their own binary.
const DEFAULT_PATTERNS: &[(NoiseCategory, Matcher, &str)] = &[
    (NoiseCategory::Detector, Matcher::Contains, "role: capturing"),
    (NoiseCategory::TestRunner, Matcher::Contains, "role: guarded-test"),
    (NoiseCategory::HarnessIteration, Matcher::Contains, "role: process-main"),
    (NoiseCategory::Housekeeping, Matcher::Contains, "name: jemalloc_bg_thd"),
    (NoiseCategory::Housekeeping, Matcher::Contains, "name: gmain"),
    (NoiseCategory::Housekeeping, Matcher::Contains, "name: gdbus"),
    (NoiseCategory::Housekeeping, Matcher::Contains, "name: dconf worker"),
    (NoiseCategory::SignalHandling, Matcher::Contains, "name: signal-hook"),
    (NoiseCategory::SignalHandling, Matcher::Contains, "name: ctrl-c"),
];

/// Ordered list of noise patterns. First match wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoiseTable {
    patterns: Vec<NoisePattern>,
}

impl Default for NoiseTable {
    fn default() -> Self {
        let patterns = DEFAULT_PATTERNS
            .iter()
            .map(|&(category, matcher, needle)| NoisePattern {
                category,
                needle: needle.to_owned(),
                matcher,
            })
            .collect();
        Self { patterns }
    }
}

impl NoiseTable {
    /// A table with no patterns. Only empty records are noise.
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    pub fn with_pattern(mut self, pattern: NoisePattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    pub fn extend(&mut self, patterns: impl IntoIterator<Item = NoisePattern>) {
        self.patterns.extend(patterns);
    }

    pub fn patterns(&self) -> &[NoisePattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Classify trimmed frame text.
    pub fn classify(&self, frames: &str) -> NoiseVerdict {
        if frames.is_empty() {
            return NoiseVerdict::Empty;
        }
        self.patterns
            .iter()
            .find(|p| p.matches(frames))
            .map_or(NoiseVerdict::Interesting, |p| NoiseVerdict::Matched(p.category))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_frames_are_noise() {
        assert_eq!(NoiseTable::empty().classify(""), NoiseVerdict::Empty);
        assert!(NoiseTable::default().classify("").is_noise());
    }

    #[test]
    fn test_default_table_covers_every_category() {
        let table = NoiseTable::default();
        for category in [
            NoiseCategory::TestRunner,
            NoiseCategory::Housekeeping,
            NoiseCategory::SignalHandling,
            NoiseCategory::HarnessIteration,
            NoiseCategory::Detector,
        ] {
            assert!(
                table.patterns().iter().any(|p| p.category == category),
                "no default pattern for {}",
                category.label()
            );
        }
    }

    #[test]
    fn test_prefix_matcher_only_matches_at_start() {
        let pattern = NoisePattern::prefix(NoiseCategory::TestRunner, "runner::");
        assert!(pattern.matches("runner::loop"));
        assert!(!pattern.matches("my::runner::loop"));
    }

    #[test]
    fn test_thread_name_rows_match() {
        let table = NoiseTable::default();
        assert_eq!(
            table.classify("name: gmain\nwchan: do_poll"),
            NoiseVerdict::Matched(NoiseCategory::Housekeeping)
        );
        assert_eq!(
            table.classify("name: signal-hook\nwchan: pipe_read"),
            NoiseVerdict::Matched(NoiseCategory::SignalHandling)
        );
        assert_eq!(
            table.classify("name: worker-3\nwchan: futex_wait_queue"),
            NoiseVerdict::Interesting
        );
    }

    #[test]
    fn test_role_rows_match() {
        let table = NoiseTable::default();
        assert_eq!(
            table.classify("name: leaksleuth-1234\nrole: process-main\nwchan: do_wait"),
            NoiseVerdict::Matched(NoiseCategory::HarnessIteration)
        );
        assert_eq!(
            table.classify("name: tests::spawn\nrole: guarded-test"),
            NoiseVerdict::Matched(NoiseCategory::TestRunner)
        );
        assert_eq!(
            table.classify("name: tests::spawn\nrole: capturing"),
            NoiseVerdict::Matched(NoiseCategory::Detector)
        );
    }

    #[test]
    fn test_with_pattern_extends_table() {
        let table = NoiseTable::empty()
            .with_pattern(NoisePattern::contains(NoiseCategory::Housekeeping, "name: pool-"));
        assert_eq!(table.len(), 1);
        assert!(table.classify("name: pool-7").is_noise());
        assert!(!table.classify("name: worker").is_noise());
    }

    #[test]
    fn test_table_deserialises_from_json() {
        let json = r#"[
            {"category": "housekeeping", "needle": "name: pool-"},
            {"category": "test_runner", "needle": "harness::", "matcher": "prefix"}
        ]"#;
        let table: NoiseTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.patterns()[0].matcher, Matcher::Contains);
        assert_eq!(table.patterns()[1].matcher, Matcher::Prefix);
    }
}
