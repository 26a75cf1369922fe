//! Property-based tests for the wire format and packet envelope

#![allow(clippy::expect_used, clippy::unwrap_used)]

use peerlink::core::packet::{Opcode, OutgoingPacket, PacketBody, PacketHeader};
use peerlink::core::wire::{self, Deserializable, ObjectParser, ObjectSerializer, Serializable};
use peerlink::utils::cookies::CookieJar;
use peerlink::{Cookie, PeerId, Result};
use proptest::prelude::*;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
struct Record {
    name: String,
    count: i64,
    total: u64,
    ratio: f64,
    labels: Vec<String>,
}

impl Serializable for Record {
    fn serialize(&self, ser: &mut ObjectSerializer) {
        ser.write_str(&self.name);
        ser.write(&self.count);
        ser.write(&self.total);
        ser.write(&self.ratio);
        ser.write_seq(&self.labels);
    }
}

impl Deserializable for Record {
    fn deserialize(parser: &mut ObjectParser<'_>) -> Result<Self> {
        Ok(Self {
            name: parser.parse_string()?,
            count: parser.parse()?,
            total: parser.parse()?,
            ratio: parser.parse()?,
            labels: parser.parse_seq()?,
        })
    }
}

fn record() -> impl Strategy<Value = Record> {
    (
        any::<String>(),
        any::<i64>(),
        any::<u64>(),
        any::<f64>().prop_filter("finite", |f| f.is_finite()),
        prop::collection::vec(any::<String>(), 0..8),
    )
        .prop_map(|(name, count, total, ratio, labels)| Record {
            name,
            count,
            total,
            ratio,
            labels,
        })
}

proptest! {
    #[test]
    fn prop_string_roundtrip(text in any::<String>()) {
        let mut ser = ObjectSerializer::new();
        ser.write_str(&text);
        ser.write_token(&text);
        let encoded = ser.finish();

        let mut parser = ObjectParser::new(&encoded);
        parser.open_object(true).unwrap();
        prop_assert_eq!(parser.parse_string().unwrap(), text.clone());
        prop_assert_eq!(parser.parse_string().unwrap(), text);
        prop_assert!(parser.close_object().is_ok());
    }

    #[test]
    fn prop_record_roundtrip(value in record()) {
        let encoded = wire::to_string(&value);
        let decoded: Record = wire::from_str(&encoded).unwrap();
        prop_assert_eq!(decoded, value);
    }

    #[test]
    fn prop_skip_value_steps_over_records(values in prop::collection::vec(record(), 1..6)) {
        let mut ser = ObjectSerializer::new();
        ser.write_object_seq(&values);
        ser.write(&7u32);
        let encoded = ser.finish();

        let mut parser = ObjectParser::new(&encoded);
        parser.open_object(true).unwrap();
        parser.skip_value().unwrap();
        prop_assert_eq!(parser.parse::<u32>().unwrap(), 7);
        prop_assert!(parser.close_object().is_ok());
    }

    #[test]
    fn prop_packet_header_roundtrip(
        sender in any::<u64>(),
        cookie in 1..=u64::MAX,
        value in record(),
    ) {
        let cookie = Cookie::new(cookie).unwrap();
        let packet = OutgoingPacket::new(Opcode::Payload, PeerId(sender), Some(cookie), PacketBody::Object(&value));
        let encoded = packet.encode();
        prop_assert!(encoded.len() <= packet.worst_case_len());

        let header = PacketHeader::parse(&encoded).unwrap();
        prop_assert_eq!(header.opcode, Opcode::Payload);
        prop_assert_eq!(header.sender, PeerId(sender));
        prop_assert_eq!(header.cookie(), Some(cookie));
        prop_assert_eq!(wire::from_str::<Record>(header.body).unwrap(), value);
    }

    #[test]
    fn prop_parsers_never_panic(input in any::<String>()) {
        let _ = PacketHeader::parse(&input);
        let _ = wire::from_str::<Record>(&input);
        let mut parser = ObjectParser::new(&input);
        while parser.skip_value().is_ok() {}
    }

    #[test]
    fn prop_parsers_never_panic_on_braces(input in "[{} N\"\\\\a0-9\\n\\t]{0,64}") {
        let _ = PacketHeader::parse(&input);
        let mut parser = ObjectParser::new(&input);
        let _ = parser.open_object(false);
        while parser.have_data() {
            if parser.skip_value().is_err() {
                break;
            }
        }
    }

    #[test]
    fn prop_cookies_unique_and_nonzero(seed in any::<u64>(), count in 1usize..256) {
        let jar = CookieJar::with_seed(seed);
        let mut seen = HashSet::new();
        for _ in 0..count {
            let cookie = jar.allocate().unwrap();
            prop_assert!(cookie.get() != 0);
            prop_assert!(seen.insert(cookie));
        }
        prop_assert_eq!(jar.in_use(), count);
    }
}
