use serde::{Deserialize, Serialize};

/// Label given to a transcribed span that no diarization interval overlaps
pub const UNASSIGNED_LABEL: &str = "UNASSIGNED";

/// A transcribed span with its diarization-assigned speaker label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Start offset in milliseconds
    pub start_ms: u64,
    /// End offset in milliseconds
    pub end_ms: u64,
    /// Diarization tag (e.g. "SPEAKER_00"), never a human name
    pub speaker: String,
    /// Transcribed text
    pub text: String,
}

impl Segment {
    pub fn new(start_ms: u64, end_ms: u64, speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            start_ms,
            end_ms,
            speaker: speaker.into(),
            text: text.into(),
        }
    }

    /// Duration of this segment in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    /// Whether diarization assigned this segment to a speaker
    pub fn is_assigned(&self) -> bool {
        self.speaker != UNASSIGNED_LABEL
    }
}

/// One interval returned by the diarization service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiarizationTurn {
    pub label: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl DiarizationTurn {
    pub fn new(label: impl Into<String>, start_ms: u64, end_ms: u64) -> Self {
        Self {
            label: label.into(),
            start_ms,
            end_ms,
        }
    }

    /// Overlap in milliseconds with the half-open interval `[start_ms, end_ms)`
    pub fn overlap_ms(&self, start_ms: u64, end_ms: u64) -> u64 {
        let lo = self.start_ms.max(start_ms);
        let hi = self.end_ms.min(end_ms);
        hi.saturating_sub(lo)
    }
}

/// One span returned by the transcription service, without speaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscribedSpan {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

impl TranscribedSpan {
    pub fn new(start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        Self {
            start_ms,
            end_ms,
            text: text.into(),
        }
    }
}

/// Convert fractional seconds from a service response to milliseconds
pub fn seconds_to_ms(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_ms() {
        let turn = DiarizationTurn::new("SPEAKER_00", 1_000, 4_000);
        assert_eq!(turn.overlap_ms(0, 2_000), 1_000);
        assert_eq!(turn.overlap_ms(1_500, 2_500), 1_000);
        assert_eq!(turn.overlap_ms(3_500, 9_000), 500);
        assert_eq!(turn.overlap_ms(4_000, 5_000), 0);
        assert_eq!(turn.overlap_ms(5_000, 6_000), 0);
    }

    #[test]
    fn test_seconds_to_ms() {
        assert_eq!(seconds_to_ms(1.2345), 1_235);
        assert_eq!(seconds_to_ms(-3.0), 0);
        assert_eq!(seconds_to_ms(f64::NAN), 0);
    }
}
