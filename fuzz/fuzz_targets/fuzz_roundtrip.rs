#![no_main]

use libfuzzer_sys::fuzz_target;
use peforge::{Binary, Builder};

fuzz_target!(|data: &[u8]| {
    // Anything that parses must also serialize without panicking, and the
    // serialized bytes must parse again.
    if let Ok(binary) = Binary::parse(data) {
        if let Ok(bytes) = Builder::new().recompute_checksum(false).build(&binary) {
            let _ = Binary::parse(&bytes);
        }
    }
});
