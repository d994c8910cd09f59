#![no_main]

use bitstream::{ReadStream, Stream};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut stream = ReadStream::new(data);
    let mut idx = 0usize;

    // Input bytes pick a bounded sequence of operations.
    while idx < data.len() && idx < 1024 {
        let op = data[idx] % 8;
        idx += 1;

        match op {
            0 => {
                let mut value = false;
                stream.serialize_bool(&mut value);
            }
            1 => {
                let bits = u32::from(data[idx - 1] % 32) + 1;
                let mut value = 0u32;
                stream.serialize_bits(&mut value, bits);
            }
            2 => {
                let mut value = 0i32;
                stream.serialize_integer(&mut value, -100, 1000);
            }
            3 => stream.serialize_align(),
            4 => {
                let mut value = 0u64;
                stream.serialize_uint64(&mut value);
            }
            5 => {
                let mut value = String::new();
                stream.serialize_string(&mut value, 64);
            }
            6 => {
                let mut address = None;
                stream.serialize_address(&mut address);
            }
            _ => {
                let mut buf = [0u8; 16];
                stream.serialize_bytes(&mut buf);
            }
        }
    }

    // Once failed, the stream stays failed.
    if stream.error().is_some() {
        let mut value = 0u32;
        stream.serialize_uint32(&mut value);
        assert!(stream.result().is_err());
    }
});
