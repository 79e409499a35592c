#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The ingest payload parser must never panic: arbitrary bytes either
    // validate into an event or come back as a precise error message.
    match autoscale_server::ingest::parse_payload(data) {
        Ok(event) => {
            assert!(!event.scale_id.is_empty());
            assert!(!event.samples.is_empty());
            for s in &event.samples {
                assert!(s.kg.is_finite());
            }
        }
        Err(msg) => {
            assert!(!msg.is_empty());
        }
    }
});
