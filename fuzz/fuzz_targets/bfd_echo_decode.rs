#![no_main]

use bfdd_core::echo::EchoPacket;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = EchoPacket::decode(data);
});
