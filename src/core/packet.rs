//! Packet envelope: `{ opcode sender cookie [body] }`.
//!
//! Outbound packets borrow their body, either as an object serialized in place
//! or as text that was already encoded. Inbound headers borrow the received
//! text and leave the body unparsed until a connection claims it.

use crate::core::wire::{Deserializable, ObjectParser, ObjectSerializer, Serializable};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::types::{Cookie, PeerId};

/// Widest possible encoding of the cookie field.
const MAX_COOKIE_WIDTH: usize = 20;

/// Handshake and data discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Opcode {
    Syn = 0,
    Ack = 1,
    Payload = 2,
}

impl TryFrom<i32> for Opcode {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Opcode::Syn),
            1 => Ok(Opcode::Ack),
            2 => Ok(Opcode::Payload),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}

/// A received packet with its body left as raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader<'a> {
    pub opcode: Opcode,
    pub sender: PeerId,
    /// Raw cookie field; 0 means the sender does not know our cookie yet.
    pub cookie: u64,
    /// Everything between the cookie and the closing brace.
    pub body: &'a str,
}

impl<'a> PacketHeader<'a> {
    /// Parses and validates the whole envelope.
    ///
    /// The body must consist of well-formed values, but is not interpreted.
    pub fn parse(text: &'a str) -> Result<Self> {
        let mut parser = ObjectParser::new(text);
        parser.open_object(true)?;

        let opcode = Opcode::try_from(parser.parse::<i32>()?)?;
        let sender = PeerId(parser.parse::<u64>()?);
        let cookie = parser.parse::<u64>()?;

        parser.eat_ws();
        let start = parser.position();
        while parser.have_data() {
            parser.skip_value()?;
        }
        let end = parser.position();
        parser.close_object()?;
        if parser.eat_ws() {
            return Err(ProtocolError::parse(parser.position(), constants::ERR_TRAILING_DATA));
        }

        Ok(Self {
            opcode,
            sender,
            cookie,
            body: text[start..end].trim_end(),
        })
    }

    pub fn cookie(&self) -> Option<Cookie> {
        Cookie::new(self.cookie)
    }

    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    /// A cursor over the body region.
    pub fn body_parser(&self) -> ObjectParser<'a> {
        ObjectParser::new(self.body)
    }

    /// Reads the cookie offered by a SYN.
    pub fn syn_offer(&self) -> Result<Cookie> {
        let mut parser = self.body_parser();
        Ok(parser.parse_required::<SynBody>()?.offered)
    }
}

/// Body of a packet under construction.
#[derive(Clone, Copy)]
pub enum PacketBody<'a> {
    Empty,
    Object(&'a dyn Serializable),
    /// Already-encoded text, emitted verbatim.
    Raw(&'a str),
}

impl std::fmt::Debug for PacketBody<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketBody::Empty => f.write_str("Empty"),
            PacketBody::Object(_) => f.write_str("Object(..)"),
            PacketBody::Raw(raw) => f.debug_tuple("Raw").field(raw).finish(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OutgoingPacket<'a> {
    pub opcode: Opcode,
    pub sender: PeerId,
    pub cookie: u64,
    pub body: PacketBody<'a>,
}

impl<'a> OutgoingPacket<'a> {
    pub fn new(opcode: Opcode, sender: PeerId, cookie: Option<Cookie>, body: PacketBody<'a>) -> Self {
        Self {
            opcode,
            sender,
            cookie: Cookie::to_wire(cookie),
            body,
        }
    }

    pub fn syn(sender: PeerId, cookie: Option<Cookie>, offer: &'a SynBody) -> Self {
        Self::new(Opcode::Syn, sender, cookie, PacketBody::Object(offer))
    }

    pub fn ack(sender: PeerId, cookie: Cookie) -> Self {
        Self::new(Opcode::Ack, sender, Some(cookie), PacketBody::Empty)
    }

    pub fn encode(&self) -> String {
        let mut ser = ObjectSerializer::with_capacity(128);
        ser.write_display(&(self.opcode as i32));
        ser.write(&self.sender.0);
        ser.write(&self.cookie);
        match self.body {
            PacketBody::Empty => {}
            PacketBody::Object(object) => ser.write_nested(object),
            PacketBody::Raw(raw) => ser.write_raw(raw),
        }
        ser.finish()
    }

    /// Encodes, failing if the result exceeds `limit` bytes.
    pub fn encode_checked(&self, limit: usize) -> Result<String> {
        let encoded = self.encode();
        check_size(encoded.len(), limit)?;
        Ok(encoded)
    }

    /// Upper bound on the encoded size whatever cookie ends up stamped on it.
    pub fn worst_case_len(&self) -> usize {
        let cookie_width = self.cookie.to_string().len();
        self.encode().len() - cookie_width + MAX_COOKIE_WIDTH
    }
}

pub(crate) fn check_size(size: usize, limit: usize) -> Result<()> {
    if size > limit {
        return Err(ProtocolError::OversizedPacket { size, limit });
    }
    Ok(())
}

/// SYN body: the cookie the sender wants to be addressed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynBody {
    pub offered: Cookie,
}

impl Serializable for SynBody {
    fn serialize(&self, ser: &mut ObjectSerializer) {
        ser.write(&self.offered.get());
    }
}

impl Deserializable for SynBody {
    fn deserialize(parser: &mut ObjectParser<'_>) -> Result<Self> {
        parser.eat_ws();
        let offset = parser.position();
        let raw = parser.parse::<u64>()?;
        let offered = Cookie::new(raw).ok_or_else(|| ProtocolError::InvalidField {
            offset,
            field: raw.to_string(),
            expected: "nonzero cookie",
        })?;
        Ok(Self { offered })
    }
}
