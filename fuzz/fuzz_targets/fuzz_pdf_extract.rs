#![no_main]
use libfuzzer_sys::fuzz_target;
use pdfveil::DocumentFormat;
use pdfveil::PdfDocument;

/// Extract then reassemble must reproduce any document it accepts.
fuzz_target!(|data: &[u8]| {
    if let Ok(ex) = PdfDocument.extract(data) {
        let back = PdfDocument
            .reassemble(&ex.body, &ex.metadata)
            .expect("extracted metadata reassembles");
        assert_eq!(back, data);
    }
});
