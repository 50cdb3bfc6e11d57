#![no_main]

use libfuzzer_sys::fuzz_target;
use rift_protocol::{FabricConfig, ProtocolPacket};

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must never panic; a malformed packet is an error
    let config = FabricConfig::default();

    if let Ok(packet) = ProtocolPacket::decode(data, &config) {
        // Anything that decodes must encode again and decode to the same packet
        let encoded = packet.encode().expect("decoded packet re-encodes");
        let decoded = ProtocolPacket::decode(&encoded, &config).expect("re-encoded packet decodes");
        assert_eq!(decoded, packet);
    }
});
