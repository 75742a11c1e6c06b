//! Frame types for simulated radio traffic

use serde::{Deserialize, Serialize};

/// Position of a frame inside the flat frame sequence of one model.
pub type FrameIndex = usize;

/// One transmitted radio frame, as mirrored from the backend.
///
/// Frames are immutable once received. Chains are expressed through `next`,
/// an index into the owning [`FrameChains`](crate::chain::FrameChains) rather
/// than a pointer, so a snapshot can be cloned and shared freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct Frame {
    /// Frequency or sub-channel identifier used by the frame
    pub channel: i64,

    /// Logical group, e.g. the message a sub-frame was split from
    pub group: i64,

    /// Occupancy start in microseconds
    #[serde(rename = "usStart")]
    pub start_us: i64,

    /// Occupancy end in microseconds
    #[serde(rename = "usEnd")]
    pub end_us: i64,

    /// This fragment overlapped another frame in time and channel
    pub collision: bool,

    /// The whole logical message was lost (server-side verdict)
    pub lost: bool,

    /// Head of its chain
    pub first: bool,

    /// Following frame in the same chain
    pub next: Option<FrameIndex>,
}

impl Frame {
    /// Time the frame occupies the channel, in microseconds.
    pub fn duration_us(&self) -> i64 {
        self.end_us - self.start_us
    }

    /// Classify the frame by its collision and loss flags.
    ///
    /// `lost` is taken as reported; it is never re-derived from `collision`.
    pub fn outcome(&self) -> FrameOutcome {
        match (self.lost, self.collision) {
            (true, true) => FrameOutcome::LostCollided,
            (true, false) => FrameOutcome::LostClean,
            (false, true) => FrameOutcome::DeliveredCollided,
            (false, false) => FrameOutcome::DeliveredClean,
        }
    }
}

/// Display category of a frame, combining fragment and message outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum FrameOutcome {
    LostCollided,
    LostClean,
    DeliveredCollided,
    DeliveredClean,
}

/// Per-category frame counts for one model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct OutcomeCounts {
    pub lost_collided: usize,
    pub lost_clean: usize,
    pub delivered_collided: usize,
    pub delivered_clean: usize,
}

impl OutcomeCounts {
    pub fn record(&mut self, outcome: FrameOutcome) {
        match outcome {
            FrameOutcome::LostCollided => self.lost_collided += 1,
            FrameOutcome::LostClean => self.lost_clean += 1,
            FrameOutcome::DeliveredCollided => self.delivered_collided += 1,
            FrameOutcome::DeliveredClean => self.delivered_clean += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.lost_collided + self.lost_clean + self.delivered_collided + self.delivered_clean
    }
}

/// Frame as it appears in a backend payload.
///
/// The backend nests the following frame inline; an integer `next` referring to
/// a position in the top-level sequence is accepted as well.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireFrame {
    #[serde(default)]
    pub channel: i64,
    #[serde(default)]
    pub group: i64,
    #[serde(rename = "usStart", alias = "startTime")]
    pub start_us: i64,
    #[serde(rename = "usEnd", alias = "endTime")]
    pub end_us: i64,
    #[serde(default)]
    pub collision: bool,
    #[serde(default)]
    pub lost: bool,
    #[serde(default)]
    pub first: bool,
    #[serde(default)]
    pub next: Option<WireNext>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireNext {
    Index(FrameIndex),
    Inline(Box<WireFrame>),
}

impl WireFrame {
    pub(crate) fn to_frame(&self, next: Option<FrameIndex>) -> Frame {
        Frame {
            channel: self.channel,
            group: self.group,
            start_us: self.start_us,
            end_us: self.end_us,
            collision: self.collision,
            lost: self.lost,
            first: self.first,
            next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(lost: bool, collision: bool) -> Frame {
        Frame {
            channel: 1,
            group: 0,
            start_us: 100,
            end_us: 350,
            collision,
            lost,
            first: true,
            next: None,
        }
    }

    #[test]
    fn outcome_follows_reported_flags() {
        assert_eq!(frame(true, true).outcome(), FrameOutcome::LostCollided);
        assert_eq!(frame(true, false).outcome(), FrameOutcome::LostClean);
        assert_eq!(frame(false, true).outcome(), FrameOutcome::DeliveredCollided);
        assert_eq!(frame(false, false).outcome(), FrameOutcome::DeliveredClean);
    }

    #[test]
    fn counts_accumulate() {
        let mut counts = OutcomeCounts::default();
        counts.record(FrameOutcome::LostCollided);
        counts.record(FrameOutcome::DeliveredClean);
        counts.record(FrameOutcome::DeliveredClean);

        assert_eq!(counts.lost_collided, 1);
        assert_eq!(counts.delivered_clean, 2);
        assert_eq!(counts.total(), 3);
        assert_eq!(frame(false, false).duration_us(), 250);
    }

    #[test]
    fn wire_frame_accepts_nested_and_indexed_next() {
        let nested: WireFrame = serde_json::from_str(
            r#"{"channel":3,"group":1,"usStart":0,"usEnd":10,"collision":false,"lost":false,
                "first":true,"head":null,"next":{"channel":4,"group":1,"usStart":20,"usEnd":30,
                "collision":true,"lost":false,"first":false,"next":null}}"#,
        )
        .unwrap();
        assert!(matches!(nested.next, Some(WireNext::Inline(_))));

        let indexed: WireFrame =
            serde_json::from_str(r#"{"usStart":0,"usEnd":10,"first":true,"next":2}"#).unwrap();
        assert!(matches!(indexed.next, Some(WireNext::Index(2))));
    }
}
