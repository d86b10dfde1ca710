#![no_main]

use libfuzzer_sys::fuzz_target;
use peforge::Binary;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must only ever produce an error, never a panic.
    let _ = Binary::parse(data);
});
