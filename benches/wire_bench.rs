use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use peerlink::core::packet::{Opcode, OutgoingPacket, PacketBody, PacketHeader};
use peerlink::core::wire::{self, Deserializable, ObjectParser, ObjectSerializer, Serializable};
use peerlink::{Cookie, PeerId, Result};

#[derive(Debug, Clone, PartialEq)]
struct Snapshot {
    frame: u64,
    names: Vec<String>,
    positions: Vec<f64>,
}

impl Serializable for Snapshot {
    fn serialize(&self, ser: &mut ObjectSerializer) {
        ser.write(&self.frame);
        ser.write_seq(&self.names);
        ser.write_seq(&self.positions);
    }
}

impl Deserializable for Snapshot {
    fn deserialize(parser: &mut ObjectParser<'_>) -> Result<Self> {
        Ok(Self {
            frame: parser.parse()?,
            names: parser.parse_seq()?,
            positions: parser.parse_seq()?,
        })
    }
}

fn snapshot(entries: usize) -> Snapshot {
    Snapshot {
        frame: 123_456,
        names: (0..entries).map(|i| format!("entity \"{i}\"")).collect(),
        positions: (0..entries * 3).map(|i| i as f64 * 0.125).collect(),
    }
}

#[allow(clippy::unwrap_used)]
fn bench_wire_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire_roundtrip");

    for &entries in &[1usize, 16, 128] {
        let value = snapshot(entries);
        let text = wire::to_string(&value);
        group.throughput(Throughput::Bytes(text.len() as u64));

        group.bench_function(format!("serialize_{entries}"), |b| {
            b.iter(|| wire::to_string(&value))
        });
        group.bench_function(format!("parse_{entries}"), |b| {
            b.iter(|| {
                let decoded: Snapshot = wire::from_str(&text).unwrap();
                assert_eq!(decoded.frame, 123_456);
            })
        });
        group.bench_function(format!("skip_{entries}"), |b| {
            b.iter(|| {
                let mut parser = ObjectParser::new(&text);
                parser.skip_value().unwrap();
            })
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_packet_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_envelope");
    let cookie = Cookie::new(0x0123_4567_89ab_cdef).unwrap();

    for &entries in &[1usize, 64] {
        let value = snapshot(entries);
        let encoded = OutgoingPacket::new(Opcode::Payload, PeerId(7), Some(cookie), PacketBody::Object(&value)).encode();
        group.throughput(Throughput::Bytes(encoded.len() as u64));

        group.bench_function(format!("encode_{entries}"), |b| {
            b.iter_batched(
                || snapshot(entries),
                |value| {
                    let packet = OutgoingPacket::new(Opcode::Payload, PeerId(7), Some(cookie), PacketBody::Object(&value));
                    packet.encode_checked(4096).unwrap()
                },
                BatchSize::SmallInput,
            )
        });
        group.bench_function(format!("header_{entries}"), |b| {
            b.iter(|| {
                let header = PacketHeader::parse(&encoded).unwrap();
                assert_eq!(header.cookie(), Some(cookie));
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_wire_roundtrip, bench_packet_envelope);
criterion_main!(benches);
