#![no_main]

use backend::SessionData;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(mut decoded) = SessionData::read(data) {
        if let Ok(bytes) = decoded.write() {
            let _ = SessionData::read(&bytes);
        }
    }
});
