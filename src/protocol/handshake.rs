//! Cookie handshake state machine.
//!
//! ```text
//! initiator                                   responder
//!   open: SYN(cookie 0, body {a})  ───────▶   accept: pending (I, b), outgoing = a
//!   pending (R, a), Requesting     ◀───────   SYN(cookie a, body {b})
//!   outgoing = b, flush, ACK(b)    ───────▶   promote (ACK or first PAYLOAD)
//! ```
//!
//! A peer can only address one of our connections by echoing the cookie that
//! connection chose, and that cookie is sent to nobody but the peer that asked
//! for it. ACK and PAYLOAD therefore prove the handshake completed even when
//! they overtake the SYN that should have preceded them.
//!
//! The functions here only classify an inbound packet; the endpoint applies
//! the resulting step.

use crate::core::packet::{Opcode, PacketHeader};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::types::Cookie;
use tracing::{debug, instrument};

/// Lifecycle of a connection. A closed connection is dropped, not kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    /// We sent the SYN and do not know the peer's cookie yet.
    Requesting,
    /// The peer sent the SYN; we replied and wait for proof it saw our cookie.
    Responding,
    Established,
}

/// What a pending connection does with an inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStep {
    /// The responder's SYN: adopt its cookie, ACK, flush the queue, promote.
    Confirm { offered: Cookie },
    /// ACK or PAYLOAD carrying our cookie: promote, delivering the body if any.
    Promote { deliver: bool },
}

/// What an established connection does with an inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstablishedStep {
    Deliver,
    /// A SYN that was overtaken by the ACK or PAYLOAD that promoted us.
    AdoptCookie { offered: Cookie },
}

/// Classify a packet addressed to a pending connection.
#[instrument(level = "debug", skip(header), fields(peer = %header.sender, opcode = ?header.opcode))]
pub fn pending_step(state: HandshakeState, header: &PacketHeader<'_>) -> Result<PendingStep> {
    let step = match (header.opcode, state) {
        (Opcode::Syn, HandshakeState::Requesting) => PendingStep::Confirm {
            offered: header.syn_offer()?,
        },
        (Opcode::Syn, _) => {
            return Err(ProtocolError::Anomaly {
                peer: header.sender,
                reason: constants::ERR_DUPLICATE_SYN,
            })
        }
        (Opcode::Ack, _) => PendingStep::Promote { deliver: false },
        (Opcode::Payload, _) => PendingStep::Promote { deliver: true },
    };
    debug!(?state, ?step, "Pending connection transition");
    Ok(step)
}

/// Classify a packet addressed to an established connection.
///
/// A repeated SYN or ACK is an anomaly unless the SYN brings the cookie we
/// never learned.
pub fn established_step(outgoing: Option<Cookie>, header: &PacketHeader<'_>) -> Result<EstablishedStep> {
    match header.opcode {
        Opcode::Payload => Ok(EstablishedStep::Deliver),
        Opcode::Syn if outgoing.is_none() => {
            let offered = header.syn_offer()?;
            debug!(peer = %header.sender, cookie = %offered, "Late SYN, adopting cookie");
            Ok(EstablishedStep::AdoptCookie { offered })
        }
        Opcode::Syn => Err(ProtocolError::Anomaly {
            peer: header.sender,
            reason: constants::ERR_DUPLICATE_SYN,
        }),
        Opcode::Ack => Err(ProtocolError::Anomaly {
            peer: header.sender,
            reason: constants::ERR_DUPLICATE_ACK,
        }),
    }
}
