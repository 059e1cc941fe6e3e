//! QoS 1 and QoS 2 acknowledgment bookkeeping.
//!
//! Every outbound publish above QoS 0 gets a message id that stays reserved
//! until its handshake completes:
//!
//! ```text
//! QoS 1:  PUBLISH ─▶ AwaitingPubAck ─PUBACK─▶ done
//! QoS 2:  PUBLISH ─▶ AwaitingPubRec ─PUBREC─▶ (send PUBREL) AwaitingPubComp ─PUBCOMP─▶ done
//! ```
//!
//! Inbound QoS 2 ids are remembered between PUBREC and PUBREL so a
//! redelivered PUBLISH is not routed twice. Acknowledgments that match
//! nothing are reported as [`AckOutcome::Ignored`] and never disturb other
//! entries.
//!
//! ```rust
//! use mqtt_node::network::application::mqtt::{AckTracker, Phase, QoS};
//! use mqtt_node::network::application::mqtt::tracker::AckOutcome;
//!
//! let mut tracker: AckTracker<4, 64> = AckTracker::new();
//! let id = tracker.track(QoS::ExactlyOnce, b"23.5", 0).unwrap();
//! assert_eq!(tracker.phase(id), Some(Phase::AwaitingPubRec));
//! assert_eq!(tracker.on_pubrec(id), AckOutcome::Release(id));
//! assert_eq!(tracker.on_pubcomp(id), AckOutcome::Completed);
//! assert!(tracker.is_empty());
//! ```

use super::QoS;
use heapless::{FnvIndexMap, FnvIndexSet, Vec};

/// Where an outbound message is in its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// QoS 1 publish sent.
    AwaitingPubAck,
    /// QoS 2 publish sent.
    AwaitingPubRec,
    /// QoS 2 PUBREL sent.
    AwaitingPubComp,
}

/// An outbound message awaiting acknowledgment.
#[derive(Debug, Clone)]
pub struct InFlight<const P: usize> {
    /// Message id.
    pub id: u16,
    /// Level it was published at.
    pub qos: QoS,
    /// Current handshake phase.
    pub phase: Phase,
    /// Copy of the payload, held until the acknowledgment completes.
    pub payload: Vec<u8, P>,
    /// Clock reading when the publish was sent.
    pub created_ms: u64,
}

/// Why a message could not be tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TrackError {
    /// Every in-flight slot is taken.
    InFlightFull,
    /// The payload is larger than a slot can hold.
    PayloadTooLarge,
    /// QoS 0 messages are never tracked.
    NotAcknowledged,
}

/// What an acknowledgment did to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AckOutcome {
    /// The message's handshake is finished and its id released.
    Completed,
    /// A PUBREL must be sent for this id.
    Release(u16),
    /// The acknowledgment matched nothing; no state changed.
    Ignored,
}

/// Tracks up to `N` outbound and `N` inbound messages; payload copies are
/// bounded by `P` bytes. `N` must be a power of two.
#[derive(Debug)]
pub struct AckTracker<const N: usize, const P: usize> {
    outbound: FnvIndexMap<u16, InFlight<P>, N>,
    inbound: FnvIndexSet<u16, N>,
    next_id: u16,
}

impl<const N: usize, const P: usize> Default for AckTracker<N, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, const P: usize> AckTracker<N, P> {
    /// An empty tracker. The first id handed out is 1.
    pub fn new() -> Self {
        Self {
            outbound: FnvIndexMap::new(),
            inbound: FnvIndexSet::new(),
            next_id: 1,
        }
    }

    /// Reserve an id for an outbound QoS 1 or 2 publish.
    ///
    /// Ids count up from 1, wrap past 65535 and skip 0 and any id still in
    /// flight.
    pub fn track(&mut self, qos: QoS, payload: &[u8], now_ms: u64) -> Result<u16, TrackError> {
        let phase = match qos {
            QoS::AtMostOnce => return Err(TrackError::NotAcknowledged),
            QoS::AtLeastOnce => Phase::AwaitingPubAck,
            QoS::ExactlyOnce => Phase::AwaitingPubRec,
        };
        if self.outbound.len() == N {
            return Err(TrackError::InFlightFull);
        }
        let payload = Vec::from_slice(payload).map_err(|_| TrackError::PayloadTooLarge)?;

        let id = self.allocate_id();
        let entry = InFlight {
            id,
            qos,
            phase,
            payload,
            created_ms: now_ms,
        };
        self.outbound
            .insert(id, entry)
            .map_err(|_| TrackError::InFlightFull)?;
        Ok(id)
    }

    /// Id that the next [`track`](Self::track) would try first.
    pub fn peek_next_id(&self) -> u16 {
        self.next_id
    }

    fn allocate_id(&mut self) -> u16 {
        // At most N ids are taken, so this terminates within N + 1 steps.
        loop {
            let id = self.next_id;
            self.next_id = match self.next_id.wrapping_add(1) {
                0 => 1,
                next => next,
            };
            if id != 0 && !self.outbound.contains_key(&id) {
                return id;
            }
        }
    }

    /// PUBACK for a QoS 1 message.
    pub fn on_puback(&mut self, id: u16) -> AckOutcome {
        match self.outbound.get(&id).map(|m| m.phase) {
            Some(Phase::AwaitingPubAck) => {
                self.outbound.remove(&id);
                AckOutcome::Completed
            }
            _ => AckOutcome::Ignored,
        }
    }

    /// PUBREC for a QoS 2 message; the caller answers with PUBREL.
    ///
    /// A repeated PUBREC after the PUBREL has gone out changes nothing.
    pub fn on_pubrec(&mut self, id: u16) -> AckOutcome {
        match self.outbound.get_mut(&id) {
            Some(message) if message.phase == Phase::AwaitingPubRec => {
                message.phase = Phase::AwaitingPubComp;
                AckOutcome::Release(id)
            }
            _ => AckOutcome::Ignored,
        }
    }

    /// PUBCOMP for a QoS 2 message.
    pub fn on_pubcomp(&mut self, id: u16) -> AckOutcome {
        match self.outbound.get(&id).map(|m| m.phase) {
            Some(Phase::AwaitingPubComp) => {
                self.outbound.remove(&id);
                AckOutcome::Completed
            }
            _ => AckOutcome::Ignored,
        }
    }

    /// Record an inbound QoS 2 PUBLISH.
    ///
    /// Returns `true` the first time an id is seen, i.e. when the message
    /// should be routed. When the inbound table is full the message is still
    /// routed; it just cannot be deduplicated.
    pub fn on_inbound_qos2(&mut self, id: u16) -> bool {
        if self.inbound.contains(&id) {
            return false;
        }
        if self.inbound.insert(id).is_err() {
            warn!("inbound QoS 2 table full, id {} not deduplicated", id);
        }
        true
    }

    /// Inbound PUBREL; returns whether the id was known. PUBCOMP is owed
    /// either way.
    pub fn on_pubrel(&mut self, id: u16) -> bool {
        self.inbound.remove(&id)
    }

    /// Forget an outbound message that never made it onto the wire.
    pub fn abandon(&mut self, id: u16) -> bool {
        self.outbound.remove(&id).is_some()
    }

    /// Drop all state, returning how many outbound messages were abandoned.
    pub fn clear(&mut self) -> usize {
        let abandoned = self.outbound.len();
        self.outbound.clear();
        self.inbound.clear();
        abandoned
    }

    /// Outbound messages in flight.
    pub fn len(&self) -> usize {
        self.outbound.len()
    }

    /// `true` when nothing is in flight in either direction.
    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.inbound.is_empty()
    }

    /// `true` when no further outbound message can be tracked.
    pub fn is_full(&self) -> bool {
        self.outbound.len() == N
    }

    /// Whether `id` is an outbound message in flight.
    pub fn contains(&self, id: u16) -> bool {
        self.outbound.contains_key(&id)
    }

    /// Handshake phase of an outbound message.
    pub fn phase(&self, id: u16) -> Option<Phase> {
        self.outbound.get(&id).map(|m| m.phase)
    }

    /// The in-flight entry for `id`.
    pub fn get(&self, id: u16) -> Option<&InFlight<P>> {
        self.outbound.get(&id)
    }

    /// Number of inbound QoS 2 ids awaiting PUBREL.
    pub fn inbound_pending(&self) -> usize {
        self.inbound.len()
    }
}
