//! Application message registry.
//!
//! The session layer knows three packet kinds. Everything above it is an open
//! catalogue: a payload object whose first field names its kind, followed by
//! kind-specific fields. The registry maps kind names to decoders.

use crate::core::wire::{ObjectParser, ObjectSerializer, ObjectSlot, Serializable};
use crate::error::{constants, ProtocolError, Result};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type DecoderFn<M> = dyn Fn(&mut ObjectParser<'_>) -> Result<M> + Send + Sync + 'static;

/// An application message with a fixed kind name.
pub trait Command: Sized {
    const KIND: &'static str;

    fn write_fields(&self, ser: &mut ObjectSerializer);

    fn read_fields(parser: &mut ObjectParser<'_>) -> Result<Self>;

    /// Wraps the command so it serializes with its kind in front.
    fn envelope(&self) -> CommandEnvelope<'_, Self> {
        CommandEnvelope(self)
    }
}

/// Serializes a command as `{ kind fields... }`.
#[derive(Debug)]
pub struct CommandEnvelope<'a, C>(pub &'a C);

impl<C: Command> Serializable for CommandEnvelope<'_, C> {
    fn serialize(&self, ser: &mut ObjectSerializer) {
        ser.write_token(C::KIND);
        self.0.write_fields(ser);
    }
}

/// Kind-keyed decoder table. Clones share the same table.
pub struct MessageRegistry<M> {
    decoders: Arc<RwLock<HashMap<Cow<'static, str>, Box<DecoderFn<M>>>>>,
}

impl<M> Clone for MessageRegistry<M> {
    fn clone(&self) -> Self {
        Self {
            decoders: Arc::clone(&self.decoders),
        }
    }
}

impl<M> Default for MessageRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> std::fmt::Debug for MessageRegistry<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRegistry").field("kinds", &self.kinds()).finish()
    }
}

impl<M> MessageRegistry<M> {
    pub fn new() -> Self {
        Self {
            decoders: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register<F>(&self, kind: impl Into<Cow<'static, str>>, decoder: F) -> Result<()>
    where
        F: Fn(&mut ObjectParser<'_>) -> Result<M> + Send + Sync + 'static,
    {
        let kind = kind.into();
        let mut decoders = self.decoders.write().map_err(|_| ProtocolError::LockPoisoned)?;
        if decoders.contains_key(&kind) {
            return Err(ProtocolError::DuplicateMessageKind(kind.into_owned()));
        }
        decoders.insert(kind, Box::new(decoder));
        Ok(())
    }

    /// Registers a [`Command`] under its own kind, mapped into `M` by `wrap`.
    pub fn register_command<C, W>(&self, wrap: W) -> Result<()>
    where
        C: Command + 'static,
        W: Fn(C) -> M + Send + Sync + 'static,
    {
        self.register(C::KIND, move |parser: &mut ObjectParser<'_>| C::read_fields(parser).map(&wrap))
    }

    pub fn unregister(&self, kind: &str) -> bool {
        self.decoders
            .write()
            .map(|mut decoders| decoders.remove(kind).is_some())
            .unwrap_or(false)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.decoders
            .read()
            .map(|decoders| decoders.contains_key(kind))
            .unwrap_or(false)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .decoders
            .read()
            .map(|decoders| decoders.keys().map(|k| k.to_string()).collect())
            .unwrap_or_default();
        kinds.sort();
        kinds
    }

    /// Decodes a payload body.
    pub fn decode(&self, body: &str) -> Result<M> {
        self.decode_with_kind(body).map(|(_, message)| message)
    }

    /// Decodes a payload body, also returning its kind name.
    pub fn decode_with_kind(&self, body: &str) -> Result<(String, M)> {
        let mut parser = ObjectParser::new(body);
        match parser.open_object(true)? {
            ObjectSlot::Present(()) => {}
            ObjectSlot::Null | ObjectSlot::Absent => {
                return Err(ProtocolError::parse(parser.position(), constants::ERR_NULL_NOT_ALLOWED))
            }
        }
        let kind = parser.parse_string()?;

        let decoders = self.decoders.read().map_err(|_| ProtocolError::LockPoisoned)?;
        let decoder = decoders
            .get(kind.as_str())
            .ok_or_else(|| ProtocolError::UnknownMessageKind(kind.clone()))?;
        let message = decoder(&mut parser)?;
        parser.close_object()?;
        Ok((kind, message))
    }
}
