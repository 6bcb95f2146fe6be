//! Fragment reassembly — per-sender accumulators keyed by remote address.
//!
//! Each sender has at most one message in flight. Bodies land in
//! index-addressed slots, so arrival order does not matter; the message is
//! complete when every slot is filled. Completed senders leave a short-lived
//! tombstone so late duplicates of the finished message are recognised and
//! dropped instead of opening a buffer that would never complete.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use lowpass_core::Fragment;

/// Upper bound on `total` accepted from the wire. At the default body size
/// this is roughly 3.9 GB per message.
pub const MAX_FRAGMENTS_PER_TRANSFER: u32 = 1 << 16;

/// A fully reassembled message.
#[derive(Debug, Clone)]
pub struct ReassembledMessage {
    pub sender: SocketAddr,
    pub payload: Bytes,
    pub param: Option<f32>,
    pub fragments: u32,
    /// Time from first fragment to completion.
    pub elapsed: Duration,
}

#[derive(Debug)]
pub enum Reassembly {
    /// More fragments are needed.
    Pending { received: u32, total: u32 },
    /// The message is complete and its buffer has been evicted.
    Complete(ReassembledMessage),
    /// The fragment belongs to a message that already completed.
    /// `dropped` counts strays matched against the same completed message.
    Stray { index: u32, total: u32, dropped: u32 },
}

/// A partial transfer removed by `evict_expired`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredTransfer {
    pub sender: SocketAddr,
    pub received: u32,
    pub expected: u32,
    pub idle: Duration,
}

struct ReassemblyBuffer {
    expected_total: u32,
    param: Option<f32>,
    slots: Vec<Option<Bytes>>,
    received: u32,
    started_at: Instant,
    last_seen: Instant,
}

impl ReassemblyBuffer {
    fn new(expected_total: u32, param: Option<f32>) -> Self {
        let now = Instant::now();
        Self {
            expected_total,
            param,
            slots: vec![None; expected_total as usize],
            received: 0,
            started_at: now,
            last_seen: now,
        }
    }

    fn check(&self, sender: SocketAddr, fragment: &Fragment) -> Result<(), ReassemblyError> {
        if fragment.total != self.expected_total {
            return Err(ReassemblyError::Inconsistent {
                sender,
                expected_total: self.expected_total,
                got_total: fragment.total,
            });
        }
        if !same_param(self.param, fragment.param) {
            return Err(ReassemblyError::ParamMismatch { sender });
        }
        Ok(())
    }

    /// Duplicates overwrite their slot without advancing the count.
    fn insert(&mut self, fragment: Fragment) {
        let slot = &mut self.slots[fragment.index as usize];
        if slot.is_none() {
            self.received += 1;
        }
        *slot = Some(fragment.body);
        self.last_seen = Instant::now();
    }

    fn is_complete(&self) -> bool {
        self.received == self.expected_total
    }

    fn into_message(self, sender: SocketAddr) -> ReassembledMessage {
        let len = self.slots.iter().flatten().map(Bytes::len).sum();
        let mut payload = BytesMut::with_capacity(len);
        for body in self.slots.iter().flatten() {
            payload.extend_from_slice(body);
        }
        ReassembledMessage {
            sender,
            payload: payload.freeze(),
            param: self.param,
            fragments: self.expected_total,
            elapsed: self.started_at.elapsed(),
        }
    }
}

struct Tombstone {
    total: u32,
    param: Option<f32>,
    completed_at: Instant,
    strays: u32,
}

/// Tracks messages being reassembled from incoming fragments.
///
/// Shared behind an `Arc`; both maps are sharded so unrelated senders do not
/// contend on one lock.
pub struct Reassembler {
    pending: DashMap<SocketAddr, ReassemblyBuffer>,
    completed: DashMap<SocketAddr, Tombstone>,
    stray_window: Duration,
}

impl Reassembler {
    pub fn new(stray_window: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            completed: DashMap::new(),
            stray_window,
        }
    }

    /// Feed one fragment from `sender`.
    pub fn ingest(&self, sender: SocketAddr, fragment: Fragment) -> Result<Reassembly, ReassemblyError> {
        if fragment.total > MAX_FRAGMENTS_PER_TRANSFER {
            return Err(ReassemblyError::TooManyFragments {
                sender,
                total: fragment.total,
            });
        }

        match self.pending.entry(sender) {
            Entry::Occupied(mut entry) => {
                let buffer = entry.get_mut();
                buffer.check(sender, &fragment)?;
                buffer.insert(fragment);
                if buffer.is_complete() {
                    let (_, buffer) = entry.remove_entry();
                    return Ok(Reassembly::Complete(self.complete(sender, buffer)));
                }
                Ok(Reassembly::Pending {
                    received: buffer.received,
                    total: buffer.expected_total,
                })
            }
            Entry::Vacant(entry) => {
                if let Some(dropped) = self.record_stray(sender, &fragment) {
                    // A reused source port sending a same-shaped message looks
                    // exactly like this; say so once per completed transfer.
                    if dropped == 1 {
                        tracing::warn!(
                            peer = %sender,
                            index = fragment.index,
                            total = fragment.total,
                            "fragment matches a just-completed transfer, dropping as stray"
                        );
                    } else {
                        tracing::debug!(
                            peer = %sender,
                            index = fragment.index,
                            total = fragment.total,
                            dropped,
                            "stray fragment for completed transfer, dropping"
                        );
                    }
                    return Ok(Reassembly::Stray {
                        index: fragment.index,
                        total: fragment.total,
                        dropped,
                    });
                }
                self.completed.remove(&sender);

                let mut buffer = ReassemblyBuffer::new(fragment.total, fragment.param);
                buffer.insert(fragment);
                if buffer.is_complete() {
                    return Ok(Reassembly::Complete(self.complete(sender, buffer)));
                }

                tracing::debug!(peer = %sender, total = buffer.expected_total, "transfer started");
                let progress = Reassembly::Pending {
                    received: buffer.received,
                    total: buffer.expected_total,
                };
                entry.insert(buffer);
                Ok(progress)
            }
        }
    }

    fn complete(&self, sender: SocketAddr, buffer: ReassemblyBuffer) -> ReassembledMessage {
        self.completed.insert(
            sender,
            Tombstone {
                total: buffer.expected_total,
                param: buffer.param,
                completed_at: Instant::now(),
                strays: 0,
            },
        );
        let message = buffer.into_message(sender);
        tracing::debug!(
            peer = %sender,
            fragments = message.fragments,
            bytes = message.payload.len(),
            elapsed_ms = message.elapsed.as_millis() as u64,
            "transfer reassembled"
        );
        message
    }

    /// Count `fragment` against the sender's tombstone if it matches.
    /// Returns the number of strays dropped for that tombstone so far.
    fn record_stray(&self, sender: SocketAddr, fragment: &Fragment) -> Option<u32> {
        let mut tombstone = self.completed.get_mut(&sender)?;
        let matches = tombstone.total == fragment.total
            && same_param(tombstone.param, fragment.param)
            && tombstone.completed_at.elapsed() < self.stray_window;
        if !matches {
            return None;
        }
        tombstone.strays += 1;
        Some(tombstone.strays)
    }

    /// Drop partial transfers idle for at least `ttl` and stale tombstones.
    pub fn evict_expired(&self, ttl: Duration) -> Vec<ExpiredTransfer> {
        let mut expired = Vec::new();
        self.pending.retain(|sender, buffer| {
            let idle = buffer.last_seen.elapsed();
            if idle < ttl {
                return true;
            }
            expired.push(ExpiredTransfer {
                sender: *sender,
                received: buffer.received,
                expected: buffer.expected_total,
                idle,
            });
            false
        });
        self.completed
            .retain(|_, t| t.completed_at.elapsed() < self.stray_window);

        for e in &expired {
            tracing::warn!(
                peer = %e.sender,
                received = e.received,
                expected = e.expected,
                idle_ms = e.idle.as_millis() as u64,
                "incomplete transfer timed out, evicting"
            );
        }
        expired
    }

    /// `(received, total)` for the sender's in-flight transfer.
    pub fn progress(&self, sender: &SocketAddr) -> Option<(u32, u32)> {
        self.pending
            .get(sender)
            .map(|b| (b.received, b.expected_total))
    }

    /// Senders with a transfer in flight.
    pub fn in_progress(&self) -> Vec<(SocketAddr, u32, u32)> {
        self.pending
            .iter()
            .map(|e| (*e.key(), e.received, e.expected_total))
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

fn same_param(a: Option<f32>, b: Option<f32>) -> bool {
    a.map(f32::to_bits) == b.map(f32::to_bits)
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// A fragment that contradicts the transfer it claims to belong to.
/// The fragment is dropped; the transfer keeps waiting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReassemblyError {
    #[error("fragment from {sender} declares total {got_total}, transfer expects {expected_total}")]
    Inconsistent {
        sender: SocketAddr,
        expected_total: u32,
        got_total: u32,
    },

    #[error("fragment from {sender} carries a different parameter than its transfer")]
    ParamMismatch { sender: SocketAddr },

    #[error("fragment from {sender} declares {total} fragments, above the per-transfer limit")]
    TooManyFragments { sender: SocketAddr, total: u32 },
}
