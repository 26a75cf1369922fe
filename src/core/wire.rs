//! # Wire Format
//!
//! Lossless, reflection-free text encoding for scalars and nested objects.
//!
//! ## Grammar
//! ```text
//! object := '{' value* '}' | 'N'
//! value  := field | object
//! field  := bare | '"' quoted '"'
//! ```
//! Values are separated by whitespace (space, tab, CR, LF). A bare field ends
//! at whitespace or a brace; inside it, space, braces, quotes and backslashes
//! are backslash-escaped. A quoted field ends at the closing quote. Both forms
//! understand `\n`, `\r` and `\t`; any other escaped character stands for itself.
//! An empty string is always written quoted so it stays distinguishable from an
//! absent field.
//!
//! There is no array syntax: a sequence is a nested object whose length is
//! discovered with [`ObjectParser::have_data`].
//!
//! ## Example
//! ```rust
//! use peerlink::core::wire::{self, Deserializable, ObjectParser, ObjectSerializer, Serializable};
//! use peerlink::error::Result;
//!
//! #[derive(Debug, PartialEq)]
//! struct Notice {
//!     text: String,
//!     ttl: u32,
//! }
//!
//! impl Serializable for Notice {
//!     fn serialize(&self, ser: &mut ObjectSerializer) {
//!         ser.write_str(&self.text);
//!         ser.write(&self.ttl);
//!     }
//! }
//!
//! impl Deserializable for Notice {
//!     fn deserialize(parser: &mut ObjectParser<'_>) -> Result<Self> {
//!         Ok(Notice { text: parser.parse_string()?, ttl: parser.parse()? })
//!     }
//! }
//!
//! let notice = Notice { text: "hello { world }".into(), ttl: 30 };
//! let text = wire::to_string(&notice);
//! assert_eq!(wire::from_str::<Notice>(&text).unwrap(), notice);
//! ```

use crate::error::{constants, ProtocolError, Result};
use std::fmt::{Display, Write as _};

/// A value that writes itself as the fields of an object.
pub trait Serializable {
    fn serialize(&self, ser: &mut ObjectSerializer);
}

impl<T: Serializable + ?Sized> Serializable for &T {
    fn serialize(&self, ser: &mut ObjectSerializer) {
        (**self).serialize(ser)
    }
}

impl<T: Serializable + ?Sized> Serializable for Box<T> {
    fn serialize(&self, ser: &mut ObjectSerializer) {
        (**self).serialize(ser)
    }
}

/// A value that reads itself from the fields of an already-opened object.
pub trait Deserializable: Sized {
    fn deserialize(parser: &mut ObjectParser<'_>) -> Result<Self>;
}

/// A single-field value.
pub trait WireScalar: Sized {
    /// Type name used in parse diagnostics.
    const NAME: &'static str;

    fn write_to(&self, ser: &mut ObjectSerializer);

    fn parse_from(field: &str) -> Option<Self>;
}

macro_rules! display_scalar {
    ($($ty:ty),*) => {
        $(
            impl WireScalar for $ty {
                const NAME: &'static str = stringify!($ty);

                fn write_to(&self, ser: &mut ObjectSerializer) {
                    ser.write_display(self);
                }

                fn parse_from(field: &str) -> Option<Self> {
                    field.parse().ok()
                }
            }
        )*
    };
}

display_scalar!(i32, u32, i64, u64, u16, f32, f64);

impl WireScalar for String {
    const NAME: &'static str = "string";

    fn write_to(&self, ser: &mut ObjectSerializer) {
        ser.write_str(self);
    }

    fn parse_from(field: &str) -> Option<Self> {
        Some(field.to_owned())
    }
}

impl WireScalar for bool {
    const NAME: &'static str = "bool";

    fn write_to(&self, ser: &mut ObjectSerializer) {
        ser.write_display(&u8::from(*self));
    }

    fn parse_from(field: &str) -> Option<Self> {
        match field {
            "1" => Some(true),
            "0" => Some(false),
            _ => None,
        }
    }
}

/// Presence of an object field: missing, the null token, or a value.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectSlot<T> {
    Absent,
    Null,
    Present(T),
}

impl<T> ObjectSlot<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, ObjectSlot::Absent)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ObjectSlot::Null)
    }

    pub fn is_present(&self) -> bool {
        matches!(self, ObjectSlot::Present(_))
    }

    /// Collapses absent and null into `None`.
    pub fn into_option(self) -> Option<T> {
        match self {
            ObjectSlot::Present(value) => Some(value),
            ObjectSlot::Absent | ObjectSlot::Null => None,
        }
    }
}

fn is_ws(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// Builds the text form of one root object.
#[derive(Debug, Clone)]
pub struct ObjectSerializer {
    out: String,
    depth: usize,
}

impl Default for ObjectSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectSerializer {
    /// Opens the root object.
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut out = String::with_capacity(capacity);
        out.push('{');
        Self { out, depth: 1 }
    }

    pub fn write<T: WireScalar>(&mut self, value: &T) {
        value.write_to(self);
    }

    /// Writes anything whose `Display` form is a bare token with no
    /// characters that need escaping (numbers, identifiers).
    pub fn write_display<D: Display + ?Sized>(&mut self, value: &D) {
        self.out.push(' ');
        // Writing into a String cannot fail.
        let _ = write!(self.out, "{value}");
    }

    /// Writes a quoted string field.
    pub fn write_str(&mut self, value: &str) {
        self.out.reserve(value.len() + 3);
        self.out.push_str(" \"");
        for c in value.chars() {
            match c {
                '"' => self.out.push_str("\\\""),
                '\\' => self.out.push_str("\\\\"),
                '\n' => self.out.push_str("\\n"),
                '\r' => self.out.push_str("\\r"),
                _ => self.out.push(c),
            }
        }
        self.out.push('"');
    }

    /// Writes a bare (unquoted) field, escaping separators.
    pub fn write_token(&mut self, value: &str) {
        if value.is_empty() {
            self.out.push_str(" \"\"");
            return;
        }
        self.out.reserve(value.len() + 1);
        self.out.push(' ');
        for c in value.chars() {
            match c {
                ' ' | '{' | '}' | '"' | '\\' => {
                    self.out.push('\\');
                    self.out.push(c);
                }
                '\n' => self.out.push_str("\\n"),
                '\r' => self.out.push_str("\\r"),
                '\t' => self.out.push_str("\\t"),
                _ => self.out.push(c),
            }
        }
    }

    /// Writes a nested object, or the null token for `None`.
    pub fn write_object<T: Serializable + ?Sized>(&mut self, value: Option<&T>) {
        match value {
            Some(value) => self.write_nested(value),
            None => self.out.push_str(" N"),
        }
    }

    pub fn write_nested<T: Serializable + ?Sized>(&mut self, value: &T) {
        self.begin_object();
        value.serialize(self);
        self.end_object();
    }

    /// Writes a sequence of scalars as a nested object.
    pub fn write_seq<T: WireScalar>(&mut self, values: &[T]) {
        self.begin_object();
        for value in values {
            value.write_to(self);
        }
        self.end_object();
    }

    /// Writes a sequence of objects as a nested object.
    pub fn write_object_seq<T: Serializable>(&mut self, values: &[T]) {
        self.begin_object();
        for value in values {
            self.write_nested(value);
        }
        self.end_object();
    }

    /// Appends an already-encoded region verbatim.
    pub fn write_raw(&mut self, raw: &str) {
        if !raw.is_empty() {
            self.out.push(' ');
            self.out.push_str(raw);
        }
    }

    pub fn begin_object(&mut self) {
        self.out.push('\n');
        for _ in 0..self.depth {
            self.out.push('\t');
        }
        self.out.push('{');
        self.depth += 1;
    }

    pub fn end_object(&mut self) {
        if self.depth > 0 {
            self.out.push_str(" }");
            self.depth -= 1;
        }
    }

    /// Current encoded length in bytes, root not yet closed.
    pub fn len(&self) -> usize {
        self.out.len()
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    /// Closes every open object, the root included.
    pub fn finish(mut self) -> String {
        while self.depth > 0 {
            self.end_object();
        }
        self.out
    }
}

/// Single-pass cursor over encoded text.
///
/// Field text is assembled in one reusable scratch buffer; everything else is
/// read in place from the source string.
#[derive(Debug)]
pub struct ObjectParser<'a> {
    src: &'a str,
    pos: usize,
    scratch: String,
}

impl<'a> ObjectParser<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            scratch: String::new(),
        }
    }

    /// Byte offset of the cursor.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The unparsed tail of the source.
    pub fn remaining(&self) -> &'a str {
        &self.src[self.pos..]
    }

    pub fn source(&self) -> &'a str {
        self.src
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn fail<T>(&self, reason: &'static str) -> Result<T> {
        Err(ProtocolError::parse(self.pos, reason))
    }

    /// Skips whitespace; false if the data ran out.
    pub fn eat_ws(&mut self) -> bool {
        while let Some(c) = self.peek() {
            if !is_ws(c) {
                return true;
            }
            self.pos += 1;
        }
        false
    }

    fn at_token_end(&self) -> bool {
        match self.peek() {
            None => true,
            Some(c) => is_ws(c) || c == '{' || c == '}',
        }
    }

    /// Enters the next object.
    ///
    /// A closing brace or the end of data means the object is absent, which
    /// is an error when `require` is set. The null token is consumed.
    pub fn open_object(&mut self, require: bool) -> Result<ObjectSlot<()>> {
        if self.eat_ws() {
            match self.peek() {
                Some('N') => {
                    self.pos += 1;
                    if !self.at_token_end() {
                        return self.fail(constants::ERR_BAD_NULL);
                    }
                    return Ok(ObjectSlot::Null);
                }
                Some('{') => {
                    self.pos += 1;
                    if self.peek().is_none() {
                        return self.fail(constants::ERR_END_IN_OBJECT);
                    }
                    return Ok(ObjectSlot::Present(()));
                }
                Some('}') => {}
                _ => return self.fail(constants::ERR_EXPECTED_OBJECT),
            }
        }

        if require {
            self.fail(constants::ERR_OBJECT_MISSING)
        } else {
            Ok(ObjectSlot::Absent)
        }
    }

    pub fn close_object(&mut self) -> Result<()> {
        if !self.eat_ws() {
            return self.fail(constants::ERR_END_SEEKING_CLOSE);
        }
        if self.peek() != Some('}') {
            return self.fail(constants::ERR_UNEXPECTED_SEEKING_CLOSE);
        }
        self.pos += 1;
        Ok(())
    }

    /// Whether the current object holds another value before its closing brace.
    pub fn have_data(&mut self) -> bool {
        self.eat_ws() && self.peek() != Some('}')
    }

    /// Reads one field into the scratch buffer and returns it unescaped.
    pub fn parse_field(&mut self) -> Result<&str> {
        if !self.eat_ws() {
            return self.fail(constants::ERR_END_EXPECTING_FIELD);
        }

        let quoted = match self.peek() {
            Some('{') | Some('}') => return self.fail(constants::ERR_EXPECTED_FIELD),
            Some('"') => {
                self.pos += 1;
                true
            }
            _ => false,
        };

        self.scratch.clear();
        loop {
            let Some(c) = self.peek() else {
                if quoted {
                    return self.fail(constants::ERR_END_IN_STRING);
                }
                break;
            };

            if !quoted {
                if is_ws(c) {
                    self.pos += 1;
                    break;
                }
                if c == '{' || c == '}' {
                    break;
                }
            }

            match c {
                '\\' => {
                    self.pos += 1;
                    let Some(escaped) = self.peek() else {
                        return self.fail(constants::ERR_END_IN_ESCAPE);
                    };
                    self.pos += escaped.len_utf8();
                    self.scratch.push(match escaped {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        other => other,
                    });
                }
                '"' => {
                    if !quoted {
                        return self.fail(constants::ERR_UNMATCHED_QUOTE);
                    }
                    self.pos += 1;
                    break;
                }
                _ => {
                    self.pos += c.len_utf8();
                    self.scratch.push(c);
                }
            }
        }

        Ok(&self.scratch)
    }

    pub fn parse<T: WireScalar>(&mut self) -> Result<T> {
        self.eat_ws();
        let offset = self.pos;
        let field = self.parse_field()?;
        match T::parse_from(field) {
            Some(value) => Ok(value),
            None => Err(ProtocolError::InvalidField {
                offset,
                field: field.to_owned(),
                expected: T::NAME,
            }),
        }
    }

    pub fn parse_string(&mut self) -> Result<String> {
        Ok(self.parse_field()?.to_owned())
    }

    /// Reads an object whose presence is optional, reporting which of the
    /// three states it was in.
    pub fn parse_object_slot<T: Deserializable>(&mut self) -> Result<ObjectSlot<T>> {
        match self.open_object(false)? {
            ObjectSlot::Absent => Ok(ObjectSlot::Absent),
            ObjectSlot::Null => Ok(ObjectSlot::Null),
            ObjectSlot::Present(()) => {
                let value = T::deserialize(self)?;
                self.close_object()?;
                Ok(ObjectSlot::Present(value))
            }
        }
    }

    /// Reads a required object; null yields the type's default.
    pub fn parse_object<T: Deserializable + Default>(&mut self) -> Result<T> {
        match self.open_object(true)? {
            ObjectSlot::Present(()) => {
                let value = T::deserialize(self)?;
                self.close_object()?;
                Ok(value)
            }
            ObjectSlot::Null | ObjectSlot::Absent => Ok(T::default()),
        }
    }

    /// Reads a required, non-null object.
    pub fn parse_required<T: Deserializable>(&mut self) -> Result<T> {
        match self.open_object(true)? {
            ObjectSlot::Present(()) => {
                let value = T::deserialize(self)?;
                self.close_object()?;
                Ok(value)
            }
            ObjectSlot::Null | ObjectSlot::Absent => self.fail(constants::ERR_NULL_NOT_ALLOWED),
        }
    }

    pub fn parse_optional<T: Deserializable>(&mut self) -> Result<Option<T>> {
        Ok(self.parse_object_slot()?.into_option())
    }

    /// Reads a nested object of scalars until its closing brace.
    pub fn parse_seq<T: WireScalar>(&mut self) -> Result<Vec<T>> {
        let mut values = Vec::new();
        if let ObjectSlot::Present(()) = self.open_object(true)? {
            while self.have_data() {
                values.push(self.parse()?);
            }
            self.close_object()?;
        }
        Ok(values)
    }

    /// Reads a nested object of objects until its closing brace.
    pub fn parse_object_seq<T: Deserializable>(&mut self) -> Result<Vec<T>> {
        let mut values = Vec::new();
        if let ObjectSlot::Present(()) = self.open_object(true)? {
            while self.have_data() {
                values.push(self.parse_required()?);
            }
            self.close_object()?;
        }
        Ok(values)
    }

    /// Steps over one field, null token or balanced object.
    ///
    /// Nesting is tracked with a counter, so depth costs no stack.
    pub fn skip_value(&mut self) -> Result<()> {
        let mut depth = 0usize;
        loop {
            if !self.eat_ws() {
                return if depth == 0 {
                    self.fail(constants::ERR_END_EXPECTING_FIELD)
                } else {
                    self.fail(constants::ERR_END_IN_OBJECT)
                };
            }
            match self.peek() {
                Some('{') => {
                    self.pos += 1;
                    depth += 1;
                    continue;
                }
                Some('}') if depth > 0 => {
                    self.pos += 1;
                    depth -= 1;
                }
                _ => self.skip_token()?,
            }
            if depth == 0 {
                return Ok(());
            }
        }
    }

    /// Steps over one field or null token.
    fn skip_token(&mut self) -> Result<()> {
        if self.peek() == Some('N') {
            let start = self.pos;
            self.pos += 1;
            if self.at_token_end() {
                return Ok(());
            }
            self.pos = start;
        }
        self.parse_field().map(|_| ())
    }
}

/// Encodes `value` as a root object.
pub fn to_string<T: Serializable + ?Sized>(value: &T) -> String {
    let mut ser = ObjectSerializer::new();
    value.serialize(&mut ser);
    ser.finish()
}

/// Decodes a root object.
pub fn from_str<T: Deserializable>(text: &str) -> Result<T> {
    let mut parser = ObjectParser::new(text);
    match parser.open_object(true)? {
        ObjectSlot::Present(()) => {
            let value = T::deserialize(&mut parser)?;
            parser.close_object()?;
            Ok(value)
        }
        ObjectSlot::Null | ObjectSlot::Absent => {
            Err(ProtocolError::parse(0, constants::ERR_NULL_NOT_ALLOWED))
        }
    }
}
