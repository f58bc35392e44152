//! Network synchronization handshake: the wire types two peers exchange to
//! agree on which side owns a shared node and which direction(s) values
//! flow. Transport and framing are out of scope here — this module defines
//! the handshake payload shape and the resulting mode-pair interpretation,
//! leaving actual byte transmission to the caller.

use serde::{Deserialize, Serialize};

/// A peer's declared role for a synchronized node: whether it produces
/// values, only consumes them, or does neither/both via a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Only receives values; never originates one.
    Sink,
    /// Only originates values; never receives one.
    Source,
    /// Both receives and re-emits, e.g. a computed pass-through.
    Transform,
}

/// One side's handshake payload.
///
/// Field order is load-bearing: a peer decoding this off the wire expects
/// exactly `isOwner`, then (if owner) the 8-byte proof and 32-byte hash,
/// then the value-encoding descriptor, then the mode — in that order, with
/// no length-prefix ambiguity, since `proof`/`hash` are fixed-width and
/// `value_encoding`/`mode` are length-prefixed UTF-8 by the wire codec this
/// module's caller supplies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    /// Whether this peer considers itself the owner of the synchronized
    /// node (the side whose `proof`/`hash` are authoritative).
    pub is_owner: bool,
    /// Present only when `is_owner`: an 8-byte ownership proof, opaque to
    /// this module.
    pub proof: Option<[u8; 8]>,
    /// Present only when `is_owner`: a 32-byte hash binding the proof to a
    /// specific node state, opaque to this module.
    pub hash: Option<[u8; 32]>,
    /// The encoder descriptor (resolved via [`crate::registry::EncoderRegistry`])
    /// this peer will use to serialize values.
    pub value_encoding: String,
    /// This peer's declared role.
    pub mode: SyncMode,
}

impl HandshakeMessage {
    /// Builds the owner-side handshake: carries `proof`/`hash`.
    pub fn owner(proof: [u8; 8], hash: [u8; 32], value_encoding: impl Into<String>, mode: SyncMode) -> Self {
        Self {
            is_owner: true,
            proof: Some(proof),
            hash: Some(hash),
            value_encoding: value_encoding.into(),
            mode,
        }
    }

    /// Builds the non-owner-side handshake: omits `proof`/`hash`.
    pub fn guest(value_encoding: impl Into<String>, mode: SyncMode) -> Self {
        Self {
            is_owner: false,
            proof: None,
            hash: None,
            value_encoding: value_encoding.into(),
            mode,
        }
    }
}

/// What traffic actually flows once both sides' handshakes are known, as a
/// function of the two declared modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficDirection {
    /// `local` sends values to the remote peer, nothing flows back.
    LocalSendsOnly,
    /// `local` only receives values from the remote peer.
    LocalReceivesOnly,
    /// Both peers send and receive (both declared `Transform`).
    Bidirectional,
    /// Neither side can produce a value the other would accept (e.g. two
    /// sinks); no traffic flows.
    NoTraffic,
}

/// Resolves the traffic direction for a local peer declaring `local_mode`
/// against a remote peer declaring `remote_mode`, per the interpretation
/// table: a `Source` feeds any `Sink`/`Transform`; a `Sink` never sends; a
/// `Transform` on both sides is bidirectional; two `Sink`s (or a `Sink`
/// paired with nothing willing to send) yield no traffic.
pub fn resolve_traffic_direction(local_mode: SyncMode, remote_mode: SyncMode) -> TrafficDirection {
    use SyncMode::*;
    match (local_mode, remote_mode) {
        (Source, Sink) | (Source, Transform) => TrafficDirection::LocalSendsOnly,
        (Sink, Source) | (Transform, Source) => TrafficDirection::LocalReceivesOnly,
        (Transform, Transform) => TrafficDirection::Bidirectional,
        (Sink, Sink) => TrafficDirection::NoTraffic,
        (Source, Source) => TrafficDirection::NoTraffic,
        (Sink, Transform) => TrafficDirection::LocalReceivesOnly,
        (Transform, Sink) => TrafficDirection::LocalSendsOnly,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_and_sink_flow_one_direction() {
        assert_eq!(
            resolve_traffic_direction(SyncMode::Source, SyncMode::Sink),
            TrafficDirection::LocalSendsOnly
        );
        assert_eq!(
            resolve_traffic_direction(SyncMode::Sink, SyncMode::Source),
            TrafficDirection::LocalReceivesOnly
        );
    }

    #[test]
    fn two_transforms_are_bidirectional() {
        assert_eq!(
            resolve_traffic_direction(SyncMode::Transform, SyncMode::Transform),
            TrafficDirection::Bidirectional
        );
    }

    #[test]
    fn two_sources_or_two_sinks_produce_no_traffic() {
        assert_eq!(
            resolve_traffic_direction(SyncMode::Sink, SyncMode::Sink),
            TrafficDirection::NoTraffic
        );
        assert_eq!(
            resolve_traffic_direction(SyncMode::Source, SyncMode::Source),
            TrafficDirection::NoTraffic
        );
    }

    #[test]
    fn owner_handshake_carries_proof_and_hash() {
        let msg = HandshakeMessage::owner([1; 8], [2; 32], "utf8", SyncMode::Transform);
        assert!(msg.is_owner);
        assert_eq!(msg.proof, Some([1; 8]));
        assert_eq!(msg.hash, Some([2; 32]));
    }

    #[test]
    fn guest_handshake_omits_proof_and_hash() {
        let msg = HandshakeMessage::guest("utf8", SyncMode::Sink);
        assert!(!msg.is_owner);
        assert_eq!(msg.proof, None);
        assert_eq!(msg.hash, None);
    }
}
