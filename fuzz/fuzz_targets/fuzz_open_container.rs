#![no_main]
use libfuzzer_sys::fuzz_target;
use pdfveil::pipeline::open_container;
use pdfveil::{KdfParams, PdfDocument};

/// Full decrypt path on hostile input. A low iteration count keeps each run
/// cheap; success is practically impossible, panics are bugs.
fuzz_target!(|data: &[u8]| {
    let kdf = KdfParams { iterations: 1 };
    let _ = open_container(&PdfDocument, data, "fuzz-password", &kdf);
});
