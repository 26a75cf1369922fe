#![no_main]

use libfuzzer_sys::fuzz_target;
use peerlink::config::EndpointConfig;
use peerlink::transport::local::LocalNetwork;
use peerlink::utils::cookies::CookieJar;
use peerlink::{Endpoint, PeerId};

fuzz_target!(|packets: Vec<Vec<u8>>| {
    // Arbitrary inbound traffic is contained by handle_message
    let net = LocalNetwork::new();
    let (transport, _inbox) = net.attach(PeerId(1));
    let (_peer, _peer_inbox) = net.attach(PeerId(2));
    let Ok(mut endpoint) = Endpoint::new(&EndpointConfig::default(), transport, CookieJar::with_seed(0)) else {
        return;
    };
    for packet in &packets {
        endpoint.handle_message(packet);
    }
    assert!(endpoint.established_count() <= net.peers().len() + 1);
});
