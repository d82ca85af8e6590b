#![no_main]

use libfuzzer_sys::fuzz_target;

const MAX_INPUT_SIZE: usize = 256 * 1024;

fuzz_target!(|data: &[u8]| {
    // The goal is simply "never panic / never hang / never OOM" on engine-controlled input.
    let data = &data[..data.len().min(MAX_INPUT_SIZE)];
    let _ = godot_wire::decode_stream_bytes(data);
    let _ = godot_wire::decode_variant(data);
});
