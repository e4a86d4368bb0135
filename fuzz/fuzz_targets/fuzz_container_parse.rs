#![no_main]
use libfuzzer_sys::fuzz_target;

/// Arbitrary bytes into the VEIL decoder. Must return `Ok` or `Err`, never
/// panic, and anything it accepts must encode back to the same bytes.
fuzz_target!(|data: &[u8]| {
    if let Ok(container) = pdfveil::container::Container::decode(data) {
        let encoded = container.encode().expect("decoded container re-encodes");
        assert_eq!(encoded, data);
    }
});
