//! Frame chains for one protocol model.
//!
//! The backend sends each model's frames as linked chains: a head frame flagged
//! `first`, followed by its sub-frames through `next`. [`FrameChains`] keeps them
//! as a flat arena where `next` is an index, and exposes read-only traversal:
//!
//! - [`FrameChains::heads`] yields every chain head lazily
//! - [`FrameChains::chain_of`] walks one chain, reporting cycles as
//!   [`SyncError::Integrity`] since the links come straight off the network
//!
//! There is no mutation API. A model's frames change only when the whole
//! snapshot is replaced.
//!
//! ```rust
//! use lpwan_sync::chain::FrameChains;
//! use lpwan_sync::Frame;
//!
//! let frame = |first, next| Frame {
//!     channel: 1, group: 0, start_us: 0, end_us: 10,
//!     collision: false, lost: false, first, next,
//! };
//! let chains = FrameChains::from_frames(vec![frame(true, Some(1)), frame(false, None)]).unwrap();
//!
//! let head = chains.heads().next().unwrap();
//! let len = chains.chain_of(head).collect::<Result<Vec<_>, _>>().unwrap().len();
//! assert_eq!(len, 2);
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

use crate::types::frame::{WireFrame, WireNext};
use crate::types::{Frame, FrameIndex, OutcomeCounts};
use crate::{Result, SyncError};

/// Flat, index-linked frame sequence of a single model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameChains {
    frames: Vec<Frame>,
}

impl FrameChains {
    /// Build from frames whose `next` fields already index into `frames`.
    ///
    /// Only dangling indices are rejected here; cycles are reported by traversal.
    pub fn from_frames(frames: Vec<Frame>) -> Result<Self> {
        let len = frames.len();
        if let Some((at, target)) = frames
            .iter()
            .enumerate()
            .find_map(|(i, f)| f.next.filter(|&n| n >= len).map(|n| (i, n)))
        {
            return Err(SyncError::integrity_error(format!(
                "frame {at} links to missing frame {target} (sequence has {len})"
            )));
        }
        Ok(Self { frames })
    }

    /// Flatten backend frames into one arena.
    ///
    /// The backend lists every fragment at the top level and also nests each
    /// fragment's successor under `next`. An inline `next` resolves to the
    /// frame with the same channel, group and timing. Only an inline frame with
    /// no such match gets a slot of its own, appended after the top level.
    pub(crate) fn from_wire(wire: Vec<WireFrame>) -> Result<Self> {
        let top_level = wire.len();
        let mut frames: Vec<Frame> = wire.iter().map(|w| w.to_frame(None)).collect();
        let mut slots: HashMap<FrameKey, FrameIndex> = HashMap::with_capacity(top_level);
        for (index, frame) in wire.iter().enumerate() {
            slots.entry(FrameKey::of(frame)).or_insert(index);
        }

        for (index, head) in wire.into_iter().enumerate() {
            let mut current = index;
            let mut link = head.next;

            while let Some(next) = link.take() {
                // A link set by an earlier walk already covers the rest of this chain
                if frames[current].next.is_some() {
                    break;
                }
                match next {
                    WireNext::Index(target) => {
                        if target >= top_level {
                            return Err(SyncError::integrity_error(format!(
                                "frame {current} links to missing frame {target} (sequence has {top_level})"
                            )));
                        }
                        frames[current].next = Some(target);
                    }
                    WireNext::Inline(body) => {
                        let body = *body;
                        let slot = *slots.entry(FrameKey::of(&body)).or_insert_with(|| {
                            frames.push(body.to_frame(None));
                            frames.len() - 1
                        });
                        frames[current].next = Some(slot);
                        current = slot;
                        link = body.next;
                    }
                }
            }
        }

        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// All frames in arena order.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn get(&self, index: FrameIndex) -> Option<&Frame> {
        self.frames.get(index)
    }

    /// Indices of every frame flagged as a chain head.
    pub fn heads(&self) -> impl Iterator<Item = FrameIndex> + '_ {
        self.frames.iter().enumerate().filter(|(_, f)| f.first).map(|(i, _)| i)
    }

    /// Walk the chain starting at `head` until `next` is absent.
    ///
    /// The iterator is cheap to clone, so a chain can be walked again from the
    /// start at any time. A revisited frame yields one `Integrity` error and
    /// ends the walk.
    pub fn chain_of(&self, head: FrameIndex) -> ChainIter<'_> {
        ChainIter { chains: self, cursor: Some(head), visited: Vec::new(), failed: false }
    }

    /// Number of frames reachable from `head`, head included.
    pub fn chain_len(&self, head: FrameIndex) -> Result<usize> {
        self.chain_of(head).try_fold(0, |count, frame| frame.map(|_| count + 1))
    }

    /// Check every chain: acyclic, exactly one `first` per chain, heads never linked to.
    pub fn validate(&self) -> Result<()> {
        for (index, frame) in self.frames.iter().enumerate() {
            if let Some(next) = frame.next {
                if self.frames[next].first {
                    return Err(SyncError::integrity_error(format!(
                        "frame {index} links to chain head {next}"
                    )));
                }
            }
        }

        for head in self.heads() {
            for (position, frame) in self.chain_of(head).enumerate() {
                let frame = frame?;
                if position > 0 && frame.first {
                    return Err(SyncError::integrity_error(format!(
                        "chain starting at {head} has a second head at position {position}"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Frame counts per display category over the whole arena.
    pub fn outcome_counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for frame in &self.frames {
            counts.record(frame.outcome());
        }
        counts
    }
}

/// Identity of a fragment on the air: where and when it was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FrameKey {
    channel: i64,
    group: i64,
    start_us: i64,
    end_us: i64,
}

impl FrameKey {
    fn of(frame: &WireFrame) -> Self {
        Self {
            channel: frame.channel,
            group: frame.group,
            start_us: frame.start_us,
            end_us: frame.end_us,
        }
    }
}

/// Lazy walk along one chain.
#[derive(Debug, Clone)]
pub struct ChainIter<'a> {
    chains: &'a FrameChains,
    cursor: Option<FrameIndex>,
    visited: Vec<bool>,
    failed: bool,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = Result<&'a Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let index = self.cursor?;

        let Some(frame) = self.chains.frames.get(index) else {
            self.failed = true;
            return Some(Err(SyncError::integrity_error(format!(
                "chain refers to missing frame {index}"
            ))));
        };

        if self.visited.is_empty() {
            self.visited = vec![false; self.chains.frames.len()];
        }
        if std::mem::replace(&mut self.visited[index], true) {
            self.failed = true;
            return Some(Err(SyncError::integrity_error(format!(
                "cycle detected: frame {index} reached twice"
            ))));
        }

        self.cursor = frame.next;
        Some(Ok(frame))
    }
}

impl Serialize for FrameChains {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.frames.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FrameChains {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire = Vec::<WireFrame>::deserialize(deserializer)?;
        FrameChains::from_wire(wire).map_err(serde::de::Error::custom)
    }
}
