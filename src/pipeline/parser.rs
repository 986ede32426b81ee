//! Extraction of the scene script and narration plan from a model completion.
//!
//! The model is asked for a fenced Python block followed by a
//! `# NARRATION_DATA` section, but nothing enforces that shape. Parsing is
//! therefore best-effort: it never fails, and [`ParsedResponse`] records which
//! fallback produced the code and how many narration records were unusable.

use std::{fmt, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const NARRATION_MARKER: &str = "# NARRATION_DATA";
pub const DEFAULT_SCENE_NAME: &str = "Scene";

const BEGIN_CODE_MARKER: &str = "BEGIN_MANIM_CODE";
const END_CODE_MARKER: &str = "END_MANIM_CODE";

const WORDS_PER_MINUTE: f64 = 180.0;
const CONTIGUITY_TOLERANCE: f64 = 0.05;
const DURATION_TOLERANCE: f64 = 0.5;

static PYTHON_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)^[ \t]*```(?:python|py)[ \t]*\r?\n(.*?)\r?\n[ \t]*```")
        .expect("python block pattern is valid")
});
static UNTAGGED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)^[ \t]*```[ \t]*\r?\n(.*?)\r?\n[ \t]*```")
        .expect("untagged block pattern is valid")
});
static TOTAL_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"TOTAL_DURATION:\s*(\d+(?:\.\d+)?)").expect("duration pattern is valid")
});
static SEGMENT_LIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)SEGMENTS:\s*\[(.*)\]").expect("segment list pattern is valid")
});
static SEGMENT_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\},?\s*\{").expect("boundary pattern is valid"));
static START_TIME_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""start_time"\s*:\s*(\d+(?:\.\d+)?)"#).expect("start_time pattern is valid")
});
static DURATION_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""duration"\s*:\s*(\d+(?:\.\d+)?)"#).expect("duration pattern is valid")
});
static TEXT_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""text"\s*:\s*"((?:[^"\\]|\\.)+)""#).expect("text pattern is valid")
});
static WORD_COUNT_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""word_count"\s*:\s*(\d+)"#).expect("word_count pattern is valid")
});
static SCENE_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"class\s+([A-Za-z_]\w*)\s*\(\s*(?:\w+\.)?\w*Scene\s*\)")
        .expect("scene class pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrationSegment {
    pub start_time: f64,
    pub duration: f64,
    pub text: String,
    pub word_count: u32,
}

impl NarrationSegment {
    /// Speaking time implied by the word count at 180 wpm, rounded to 0.5s.
    pub fn expected_duration(&self) -> f64 {
        let raw = f64::from(self.word_count) / WORDS_PER_MINUTE * 60.0;
        (raw * 2.0).round() / 2.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrationPlan {
    pub total_duration: f64,
    pub segments: Vec<NarrationSegment>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimingIssue {
    NonPositiveDuration {
        index: usize,
    },
    Discontiguous {
        index: usize,
        expected_start: f64,
        actual_start: f64,
    },
    DurationMismatch {
        index: usize,
        word_count: u32,
        expected: f64,
        actual: f64,
    },
    TotalMismatch {
        declared: f64,
        computed: f64,
    },
}

impl fmt::Display for TimingIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimingIssue::NonPositiveDuration { index } => {
                write!(f, "segment {index} has a non-positive duration")
            }
            TimingIssue::Discontiguous {
                index,
                expected_start,
                actual_start,
            } => write!(
                f,
                "segment {index} starts at {actual_start}s, previous segment ends at {expected_start}s"
            ),
            TimingIssue::DurationMismatch {
                index,
                word_count,
                expected,
                actual,
            } => write!(
                f,
                "segment {index} lasts {actual}s but {word_count} words take {expected}s"
            ),
            TimingIssue::TotalMismatch { declared, computed } => write!(
                f,
                "declared total {declared}s differs from segment sum {computed}s"
            ),
        }
    }
}

impl NarrationPlan {
    /// Check the plan against the timing contract the model was given.
    ///
    /// The plan itself is left untouched; callers decide what to do with the
    /// findings.
    pub fn timing_issues(&self) -> Vec<TimingIssue> {
        let mut issues = Vec::new();

        for (index, segment) in self.segments.iter().enumerate() {
            if segment.duration <= 0.0 {
                issues.push(TimingIssue::NonPositiveDuration { index });
            }

            if index > 0 {
                let previous = &self.segments[index - 1];
                let expected_start = previous.start_time + previous.duration;
                if (segment.start_time - expected_start).abs() > CONTIGUITY_TOLERANCE {
                    issues.push(TimingIssue::Discontiguous {
                        index,
                        expected_start,
                        actual_start: segment.start_time,
                    });
                }
            }

            if segment.word_count > 0 {
                let expected = segment.expected_duration();
                if (segment.duration - expected).abs() > DURATION_TOLERANCE {
                    issues.push(TimingIssue::DurationMismatch {
                        index,
                        word_count: segment.word_count,
                        expected,
                        actual: segment.duration,
                    });
                }
            }
        }

        if self.total_duration > 0.0 && !self.segments.is_empty() {
            let computed: f64 = self.segments.iter().map(|s| s.duration).sum();
            if (self.total_duration - computed).abs() > DURATION_TOLERANCE {
                issues.push(TimingIssue::TotalMismatch {
                    declared: self.total_duration,
                    computed,
                });
            }
        }

        issues
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedScript {
    pub code: String,
    pub scene_name: String,
}

impl ParsedScript {
    pub fn from_code(raw_code: &str) -> Self {
        let code = sanitize_code(raw_code);
        let scene_name = resolve_scene_name(&code);
        Self { code, scene_name }
    }
}

/// Where the code segment of a completion was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeSource {
    Fenced,
    Markers,
    BeforeNarration,
    /// The model ignored the output contract; everything was taken as code.
    WholeResponse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub script: ParsedScript,
    pub narration: Option<NarrationPlan>,
    pub code_source: CodeSource,
    pub dropped_segments: usize,
}

impl ParsedResponse {
    pub fn is_degraded(&self) -> bool {
        self.code_source == CodeSource::WholeResponse || self.dropped_segments > 0
    }
}

pub fn parse_completion(raw: &str) -> ParsedResponse {
    let (code, code_source) = extract_code(raw);
    let (narration, dropped_segments) = match raw.find(NARRATION_MARKER) {
        Some(index) => {
            let (plan, dropped) = parse_narration(&raw[index..]);
            (Some(plan), dropped)
        }
        None => (None, 0),
    };

    ParsedResponse {
        script: ParsedScript::from_code(code),
        narration,
        code_source,
        dropped_segments,
    }
}

fn extract_code(raw: &str) -> (&str, CodeSource) {
    // A python-tagged block wins over any untagged one, wherever it appears.
    for pattern in [&*PYTHON_BLOCK, &*UNTAGGED_BLOCK] {
        if let Some(body) = pattern.captures(raw).and_then(|c| c.get(1)) {
            return (body.as_str(), CodeSource::Fenced);
        }
    }

    if let Some(begin) = raw.find(BEGIN_CODE_MARKER) {
        let body_start = begin + BEGIN_CODE_MARKER.len();
        if let Some(length) = raw[body_start..].find(END_CODE_MARKER) {
            return (
                raw[body_start..body_start + length].trim(),
                CodeSource::Markers,
            );
        }
    }

    match raw.find(NARRATION_MARKER) {
        Some(index) => (raw[..index].trim(), CodeSource::BeforeNarration),
        None => (raw, CodeSource::WholeResponse),
    }
}

/// Parse the text that follows the narration marker.
///
/// Returns the plan and the number of segment records that were discarded
/// because one of the four fields could not be read.
fn parse_narration(section: &str) -> (NarrationPlan, usize) {
    let total_duration = TOTAL_DURATION
        .captures(section)
        .and_then(|c| c[1].parse::<f64>().ok())
        .unwrap_or(0.0);

    let mut segments = Vec::new();
    let mut dropped = 0;

    if let Some(list) = SEGMENT_LIST.captures(section).and_then(|c| c.get(1)) {
        for block in SEGMENT_BOUNDARY.split(list.as_str()) {
            let block = block
                .trim()
                .trim_start_matches('{')
                .trim_end_matches(',')
                .trim_end_matches('}')
                .trim();
            if block.is_empty() {
                continue;
            }
            match parse_segment(block) {
                Some(segment) => segments.push(segment),
                None => dropped += 1,
            }
        }
    }

    (
        NarrationPlan {
            total_duration,
            segments,
        },
        dropped,
    )
}

fn parse_segment(block: &str) -> Option<NarrationSegment> {
    let start_time = START_TIME_FIELD.captures(block)?[1].parse().ok()?;
    let duration = DURATION_FIELD.captures(block)?[1].parse().ok()?;
    let text = unescape(&TEXT_FIELD.captures(block)?[1]);
    let word_count = WORD_COUNT_FIELD.captures(block)?[1].parse().ok()?;

    if text.trim().is_empty() {
        return None;
    }

    Some(NarrationSegment {
        start_time,
        duration,
        text,
        word_count,
    })
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') | Some('t') => out.push(' '),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum LineKind {
    NarrationField,
    Bracket,
    Blank,
    Code,
}

fn classify(trimmed: &str) -> LineKind {
    if trimmed.is_empty() {
        return LineKind::Blank;
    }

    let is_field = trimmed.starts_with("TOTAL_DURATION:")
        || trimmed.starts_with("SEGMENTS:")
        || trimmed.starts_with("\"start_time\"")
        || trimmed.starts_with("\"duration\"")
        || trimmed.starts_with("\"text\"")
        || trimmed.starts_with("\"word_count\"")
        || (trimmed.starts_with('{') && trimmed.contains("start_time"));
    if is_field {
        return LineKind::NarrationField;
    }

    match trimmed {
        "[" | "]" | "{" | "}" | "}," | "]," => LineKind::Bracket,
        _ => LineKind::Code,
    }
}

/// Strip narration data out of a code segment so it can run on its own.
///
/// Everything from the narration marker onwards is cut first. Stray narration
/// fields that appear before the marker (or without one) are then removed
/// line by line; a bracket-only line is removed only while it continues such
/// a fragment, so closing brackets of ordinary code survive.
///
/// The line filter also runs when the marker was found. That keeps the result
/// stable under a second pass, at the cost of dropping genuine code lines
/// that happen to look like narration fields, such as a dict entry keyed
/// `"text"`.
pub fn sanitize_code(code: &str) -> String {
    let code = match code.find(NARRATION_MARKER) {
        Some(index) => &code[..index],
        None => code,
    };

    let mut kept = Vec::new();
    let mut in_fragment = false;

    for line in code.lines() {
        match classify(line.trim()) {
            LineKind::NarrationField => {
                in_fragment = true;
                continue;
            }
            LineKind::Bracket if in_fragment => continue,
            LineKind::Bracket | LineKind::Blank => {}
            LineKind::Code => in_fragment = false,
        }
        kept.push(line);
    }

    kept.join("\n").trim().to_string()
}

pub fn resolve_scene_name(code: &str) -> String {
    SCENE_CLASS
        .captures(code)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| DEFAULT_SCENE_NAME.to_string())
}
