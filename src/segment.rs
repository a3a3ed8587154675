//! Splitting long scores at silences so each piece can be synthesized on
//! its own.
//!
//! A silence unit (`sil`/`pau`) at least `silence_threshold` long is a
//! candidate cut. The cut lands on the frame nearest the middle of the
//! silence, so both neighbouring segments keep some of it. A candidate is
//! taken when the segment so far and the rest of the score are both at
//! least `min_duration` long, or forced when skipping it would leave a
//! segment longer than `force_split_threshold`, even if that makes a
//! segment shorter than `min_duration`.

use serde::{Deserialize, Serialize};

use crate::labels::{FullContextLabel, LabelSequence, TICKS_PER_SECOND};

/// Segmentation constants, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationParams {
    pub silence_threshold: f64,
    pub min_duration: f64,
    pub force_split_threshold: f64,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            silence_threshold: 0.1,
            min_duration: 5.0,
            force_split_threshold: 5.0,
        }
    }
}

/// A contiguous piece of a score.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Position of this segment in the score.
    pub index: usize,
    pub labels: LabelSequence,
    /// True if a bounding cut was forced and this segment may be shorter
    /// than `min_duration`.
    pub forced: bool,
}

#[derive(Debug, Clone, Copy)]
struct Cut {
    label: usize,
    time: i64,
    forced: bool,
}

fn secs(ticks: i64) -> f64 {
    ticks as f64 / TICKS_PER_SECOND as f64
}

/// Split `seq` into segments that cover it exactly.
///
/// A score without an acceptable cut comes back as one segment equal to
/// the input.
pub fn segment_labels(seq: &LabelSequence, params: &SegmentationParams) -> Vec<Segment> {
    let end = seq.end_time();
    let candidates: Vec<Cut> = seq
        .iter()
        .enumerate()
        .filter(|(_, l)| l.is_silence() && l.duration_secs() >= params.silence_threshold)
        .map(|(i, l)| Cut {
            label: i,
            time: split_point(l, seq.frame_shift),
            forced: false,
        })
        .filter(|c| c.time < end)
        .collect();

    let mut cuts: Vec<Cut> = Vec::new();
    let mut seg_start = seq.start_time();
    for (k, candidate) in candidates.iter().enumerate() {
        let left = secs(candidate.time - seg_start);
        let right = secs(end - candidate.time);
        if left >= params.min_duration && right >= params.min_duration {
            cuts.push(*candidate);
            seg_start = candidate.time;
            continue;
        }
        let reach = candidates.get(k + 1).map(|c| c.time).unwrap_or(end);
        if secs(reach - seg_start) > params.force_split_threshold {
            log::debug!(
                "Forcing a cut at {:.3}s ({:.3}s segment, {:.3}s remaining)",
                secs(candidate.time),
                left,
                right
            );
            cuts.push(Cut {
                forced: true,
                ..*candidate
            });
            seg_start = candidate.time;
        }
    }

    if cuts.is_empty() {
        return vec![Segment {
            index: 0,
            labels: seq.clone(),
            forced: false,
        }];
    }

    let mut pieces: Vec<Vec<FullContextLabel>> = Vec::with_capacity(cuts.len() + 1);
    let mut current = Vec::new();
    let mut pending = cuts.iter().peekable();
    for (i, label) in seq.iter().enumerate() {
        match pending.next_if(|c| c.label == i) {
            Some(cut) if cut.time < label.end => {
                current.push(FullContextLabel::new(label.start, cut.time, &label.context));
                pieces.push(std::mem::take(&mut current));
                current.push(FullContextLabel::new(cut.time, label.end, &label.context));
            }
            Some(_) => {
                current.push(label.clone());
                pieces.push(std::mem::take(&mut current));
            }
            None => current.push(label.clone()),
        }
    }
    pieces.push(current);

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, labels)| {
            let forced_before = index > 0 && cuts[index - 1].forced;
            let forced_after = cuts.get(index).map(|c| c.forced).unwrap_or(false);
            Segment {
                index,
                labels: LabelSequence::new(labels, seq.frame_shift),
                forced: forced_before || forced_after,
            }
        })
        .collect()
}

/// Frame-aligned midpoint of a silence, or its end when it is too short to
/// halve on the frame grid.
fn split_point(label: &FullContextLabel, frame_shift: i64) -> i64 {
    let half = (label.end - label.start) / 2;
    let mid = if frame_shift > 0 {
        label.start + ((half as f64 / frame_shift as f64).round() as i64) * frame_shift
    } else {
        label.start + half
    };
    if mid > label.start && mid < label.end {
        mid
    } else {
        label.end
    }
}
