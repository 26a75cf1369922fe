#![no_main]

use libfuzzer_sys::fuzz_target;
use peerlink::core::wire::{ObjectParser, ObjectSerializer};

fuzz_target!(|data: &str| {
    let mut parser = ObjectParser::new(data);
    let _ = parser.open_object(false);
    while parser.have_data() {
        if parser.skip_value().is_err() {
            break;
        }
    }

    // Any text survives a string field round trip
    let mut ser = ObjectSerializer::new();
    ser.write_str(data);
    ser.write_token(data);
    let encoded = ser.finish();
    let mut parser = ObjectParser::new(&encoded);
    assert!(parser.open_object(true).is_ok());
    assert_eq!(parser.parse_string().ok().as_deref(), Some(data));
    assert_eq!(parser.parse_string().ok().as_deref(), Some(data));
});
