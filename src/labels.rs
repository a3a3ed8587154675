//! HTS-style full-context and mono label sequences.
//!
//! Times are integer ticks of 100 ns, the unit used by HTS label files. A
//! label file holds one unit per line:
//!
//! ```text
//! 0 3000000 xx^xx-sil+k=a/A:xx...
//! 3000000 3450000 xx^sil-k+a=N/A:...
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::SvsError;

/// Ticks per second in HTS label files.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Default frame shift (5 ms) used until a model config says otherwise.
pub const DEFAULT_FRAME_SHIFT: i64 = 50_000;

/// One phoneme unit with its time range and context tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullContextLabel {
    pub start: i64,
    pub end: i64,
    pub context: String,
}

impl FullContextLabel {
    pub fn new(start: i64, end: i64, context: impl Into<String>) -> Self {
        Self {
            start,
            end,
            context: context.into(),
        }
    }

    pub fn duration_secs(&self) -> f64 {
        (self.end - self.start) as f64 / TICKS_PER_SECOND as f64
    }

    /// The current phoneme of the context tag (`p3` in `p1^p2-p3+p4=...`).
    ///
    /// Mono labels carry the bare phoneme, so a tag without the `-`/`+`
    /// delimiters is returned as-is.
    pub fn phoneme(&self) -> &str {
        if let Some(minus) = self.context.find('-') {
            let rest = &self.context[minus + 1..];
            if let Some(plus) = rest.find('+') {
                return &rest[..plus];
            }
        }
        &self.context
    }

    pub fn is_silence(&self) -> bool {
        matches!(self.phoneme(), "sil" | "pau")
    }
}

/// Ordered label units sharing one frame grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSequence {
    pub labels: Vec<FullContextLabel>,
    /// Ticks per frame.
    pub frame_shift: i64,
}

impl Default for LabelSequence {
    fn default() -> Self {
        Self::new(Vec::new(), DEFAULT_FRAME_SHIFT)
    }
}

impl LabelSequence {
    pub fn new(labels: Vec<FullContextLabel>, frame_shift: i64) -> Self {
        Self {
            labels,
            frame_shift,
        }
    }

    /// Read an HTS label file.
    pub fn load(path: &Path) -> Result<Self, SvsError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SvsError::io(format!("reading labels {}", path.display()), e))?;
        text.parse().map_err(|e| match e {
            SvsError::Validation(msg) => {
                SvsError::Validation(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    /// Write the sequence as an HTS label file. The write is complete when
    /// this returns.
    pub fn save(&self, path: &Path) -> Result<(), SvsError> {
        std::fs::write(path, self.to_string())
            .map_err(|e| SvsError::io(format!("writing labels {}", path.display()), e))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FullContextLabel> {
        self.labels.iter()
    }

    pub fn start_time(&self) -> i64 {
        self.labels.first().map(|l| l.start).unwrap_or(0)
    }

    pub fn end_time(&self) -> i64 {
        self.labels.last().map(|l| l.end).unwrap_or(0)
    }

    pub fn duration_secs(&self) -> f64 {
        (self.end_time() - self.start_time()) as f64 / TICKS_PER_SECOND as f64
    }

    /// Reduce every unit to its bare phoneme, keeping the times.
    pub fn to_mono(&self) -> Self {
        let labels = self
            .labels
            .iter()
            .map(|l| FullContextLabel::new(l.start, l.end, l.phoneme()))
            .collect();
        Self::new(labels, self.frame_shift)
    }

    /// Round every timestamp to the nearest multiple of the frame shift.
    pub fn quantize(&mut self) {
        if self.frame_shift <= 0 {
            return;
        }
        let shift = self.frame_shift;
        let snap = |t: i64| ((t as f64 / shift as f64).round() as i64) * shift;
        for label in &mut self.labels {
            label.start = snap(label.start);
            label.end = snap(label.end);
        }
    }

    /// Check that units are ordered and that inner boundaries meet.
    pub fn validate(&self) -> Result<(), SvsError> {
        for (i, label) in self.labels.iter().enumerate() {
            if label.end < label.start {
                return Err(SvsError::Validation(format!(
                    "unit {i} ends ({}) before it starts ({})",
                    label.end, label.start
                )));
            }
            if i > 0 && self.labels[i - 1].end != label.start {
                return Err(SvsError::Validation(format!(
                    "unit {i} starts at {} but unit {} ends at {}",
                    label.start,
                    i - 1,
                    self.labels[i - 1].end
                )));
            }
        }
        Ok(())
    }
}

impl FromStr for LabelSequence {
    type Err = SvsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut labels = Vec::new();
        for (lineno, line) in s.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [start, end, context] = fields.as_slice() else {
                return Err(SvsError::Validation(format!(
                    "line {}: expected '<start> <end> <context>', got {:?}",
                    lineno + 1,
                    line
                )));
            };
            let parse_time = |field: &str| {
                field.parse::<i64>().map_err(|e| {
                    SvsError::Validation(format!("line {}: bad time {field:?}: {e}", lineno + 1))
                })
            };
            labels.push(FullContextLabel::new(
                parse_time(*start)?,
                parse_time(*end)?,
                *context,
            ));
        }
        Ok(Self::new(labels, DEFAULT_FRAME_SHIFT))
    }
}

impl fmt::Display for LabelSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for label in &self.labels {
            writeln!(f, "{} {} {}", label.start, label.end, label.context)?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a LabelSequence {
    type Item = &'a FullContextLabel;
    type IntoIter = std::slice::Iter<'a, FullContextLabel>;

    fn into_iter(self) -> Self::IntoIter {
        self.labels.iter()
    }
}
