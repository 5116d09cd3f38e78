//! Client peer-connection orchestration contract.
//!
//! The server relays offers, answers and ICE candidates without looking at
//! them. Correct negotiation between N browsers depends on every client
//! following the same deterministic rules, captured here as a small state
//! machine per remote peer:
//!
//! - **Who offers.** Existing members never initiate toward a newcomer; the
//!   newcomer sends an offer to every participant listed in `room-joined`.
//! - **Glare.** If an offer arrives while this side is mid-offer, the peer with
//!   the lexicographically greater identity is *polite*: it rolls back its own
//!   offer and accepts the remote one. The impolite peer ignores the remote
//!   offer.
//! - **Early candidates.** ICE candidates that arrive before the remote
//!   description is applied are queued and drained in arrival order once it
//!   is. Candidates belonging to an ignored offer are dropped.
//!
//! None of these races are errors; they are logged at debug level only.

use crate::events::Participant;
use serde_json::Value;
use std::collections::VecDeque;
use tracing::debug;

/// Signaling state of one peer connection, mirroring the browser's
/// `RTCPeerConnection.signalingState` values that matter for glare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
}

/// What to do with an incoming offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDecision {
    /// Apply the remote offer. When `rollback` is set the local pending offer
    /// must be rolled back first.
    Accept { rollback: bool },
    /// Drop the remote offer (impolite side of a collision).
    Ignore,
}

/// What to do with an incoming ICE candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateDecision {
    /// Add the candidate to the peer connection now.
    Apply(Value),
    /// Held until the remote description is set.
    Queued,
    /// Belongs to an ignored offer.
    Dropped,
}

/// Per-remote-peer negotiation state.
#[derive(Debug)]
pub struct PeerNegotiator {
    local_id: String,
    remote_id: String,
    state: SignalingState,
    making_offer: bool,
    ignore_offer: bool,
    remote_description_set: bool,
    pending_candidates: VecDeque<Value>,
}

impl PeerNegotiator {
    /// Create negotiation state toward `remote_id`.
    #[must_use]
    pub fn new(local_id: impl Into<String>, remote_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            remote_id: remote_id.into(),
            state: SignalingState::Stable,
            making_offer: false,
            ignore_offer: false,
            remote_description_set: false,
            pending_candidates: VecDeque::new(),
        }
    }

    /// The polite side yields during glare. Decided by identity comparison so
    /// both ends agree without coordination.
    #[must_use]
    pub fn is_polite(&self) -> bool {
        self.local_id > self.remote_id
    }

    #[must_use]
    pub fn state(&self) -> SignalingState {
        self.state
    }

    #[must_use]
    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    /// Number of candidates waiting for a remote description.
    #[must_use]
    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Mark the start of local offer creation. Returns `false` if an offer
    /// cannot be started because negotiation is already in progress.
    pub fn begin_offer(&mut self) -> bool {
        if self.state != SignalingState::Stable || self.making_offer {
            debug!(
                target: "signaling.negotiation",
                remote_id = %self.remote_id,
                state = ?self.state,
                "Skipping offer, negotiation already in progress"
            );
            return false;
        }
        self.making_offer = true;
        self.state = SignalingState::HaveLocalOffer;
        true
    }

    /// The local offer has been sent.
    pub fn offer_sent(&mut self) {
        self.making_offer = false;
    }

    /// Decide how to handle a remote offer.
    pub fn on_remote_offer(&mut self) -> OfferDecision {
        let collision = self.making_offer || self.state != SignalingState::Stable;

        if collision && !self.is_polite() {
            self.ignore_offer = true;
            debug!(
                target: "signaling.negotiation",
                remote_id = %self.remote_id,
                "Ignoring colliding offer as impolite peer"
            );
            return OfferDecision::Ignore;
        }

        self.ignore_offer = false;
        self.making_offer = false;
        self.remote_description_set = false;
        self.state = SignalingState::HaveRemoteOffer;

        if collision {
            debug!(
                target: "signaling.negotiation",
                remote_id = %self.remote_id,
                "Rolling back local offer as polite peer"
            );
        }

        OfferDecision::Accept {
            rollback: collision,
        }
    }

    /// A remote answer arrived. Returns `false` for a stale answer that does
    /// not match a pending local offer.
    pub fn on_remote_answer(&mut self) -> bool {
        if self.state != SignalingState::HaveLocalOffer {
            debug!(
                target: "signaling.negotiation",
                remote_id = %self.remote_id,
                state = ?self.state,
                "Dropping answer without a pending offer"
            );
            return false;
        }
        self.making_offer = false;
        self.state = SignalingState::Stable;
        true
    }

    /// The remote description has been applied to the peer connection.
    /// Returns queued candidates in arrival order.
    pub fn remote_description_applied(&mut self) -> Vec<Value> {
        self.remote_description_set = true;
        self.pending_candidates.drain(..).collect()
    }

    /// The local answer has been sent; negotiation is complete.
    pub fn answer_sent(&mut self) {
        self.state = SignalingState::Stable;
    }

    /// Decide how to handle a remote ICE candidate.
    pub fn on_remote_candidate(&mut self, candidate: Value) -> CandidateDecision {
        if self.ignore_offer {
            debug!(
                target: "signaling.negotiation",
                remote_id = %self.remote_id,
                "Dropping candidate for ignored offer"
            );
            return CandidateDecision::Dropped;
        }
        if !self.remote_description_set {
            self.pending_candidates.push_back(candidate);
            return CandidateDecision::Queued;
        }
        CandidateDecision::Apply(candidate)
    }
}

/// Peers a newcomer should send offers to after `room-joined`.
///
/// Existing members never call this; they wait for the newcomer's offer.
#[must_use]
pub fn offer_targets(local_id: &str, participants: &[Participant]) -> Vec<String> {
    participants
        .iter()
        .filter(|p| p.user_id != local_id)
        .map(|p| p.user_id.clone())
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn participant(id: &str) -> Participant {
        Participant {
            user_id: id.to_string(),
            display_name: id.to_uppercase(),
            audio_enabled: true,
            video_enabled: true,
            is_host: false,
            is_screen_sharing: false,
            joined_at: 0,
            connection_quality: None,
        }
    }

    #[test]
    fn test_politeness_is_asymmetric() {
        let a = PeerNegotiator::new("alice", "bob");
        let b = PeerNegotiator::new("bob", "alice");
        assert!(!a.is_polite());
        assert!(b.is_polite());
    }

    #[test]
    fn test_glare_resolves_to_single_offer() {
        let mut alice = PeerNegotiator::new("alice", "bob");
        let mut bob = PeerNegotiator::new("bob", "alice");

        assert!(alice.begin_offer());
        assert!(bob.begin_offer());

        // Each side receives the other's offer while mid-offer.
        assert_eq!(alice.on_remote_offer(), OfferDecision::Ignore);
        assert_eq!(
            bob.on_remote_offer(),
            OfferDecision::Accept { rollback: true }
        );

        // Bob answers Alice's offer; Alice accepts the answer.
        bob.remote_description_applied();
        bob.answer_sent();
        assert!(alice.on_remote_answer());
        assert_eq!(alice.state(), SignalingState::Stable);
        assert_eq!(bob.state(), SignalingState::Stable);
    }

    #[test]
    fn test_candidates_queue_until_remote_description() {
        let mut peer = PeerNegotiator::new("bob", "alice");
        assert_eq!(
            peer.on_remote_offer(),
            OfferDecision::Accept { rollback: false }
        );

        assert_eq!(
            peer.on_remote_candidate(json!({"candidate": "c1"})),
            CandidateDecision::Queued
        );
        assert_eq!(
            peer.on_remote_candidate(json!({"candidate": "c2"})),
            CandidateDecision::Queued
        );
        assert_eq!(peer.pending_candidates(), 2);

        let drained = peer.remote_description_applied();
        assert_eq!(
            drained,
            vec![json!({"candidate": "c1"}), json!({"candidate": "c2"})]
        );

        assert_eq!(
            peer.on_remote_candidate(json!({"candidate": "c3"})),
            CandidateDecision::Apply(json!({"candidate": "c3"}))
        );
    }

    #[test]
    fn test_candidates_for_ignored_offer_are_dropped() {
        let mut alice = PeerNegotiator::new("alice", "bob");
        assert!(alice.begin_offer());
        assert_eq!(alice.on_remote_offer(), OfferDecision::Ignore);
        assert_eq!(
            alice.on_remote_candidate(json!({"candidate": "x"})),
            CandidateDecision::Dropped
        );
        assert_eq!(alice.pending_candidates(), 0);
    }

    #[test]
    fn test_stale_answer_is_dropped() {
        let mut peer = PeerNegotiator::new("alice", "bob");
        assert!(!peer.on_remote_answer());
    }

    #[test]
    fn test_begin_offer_refused_while_negotiating() {
        let mut peer = PeerNegotiator::new("alice", "bob");
        assert!(peer.begin_offer());
        assert!(!peer.begin_offer());
    }

    #[test]
    fn test_newcomer_offers_to_everyone_else() {
        let participants = vec![participant("a"), participant("b"), participant("me")];
        assert_eq!(offer_targets("me", &participants), vec!["a", "b"]);
    }
}
