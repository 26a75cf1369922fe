#![no_main]

use libfuzzer_sys::fuzz_target;
use peerlink::core::packet::PacketHeader;

fuzz_target!(|data: &[u8]| {
    // Envelope parsing must reject, never panic or loop
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(header) = PacketHeader::parse(text) {
            let _ = header.syn_offer();
            let _ = header.body_parser().skip_value();
        }
    }
});
