#![no_main]

use blockcarve::io::MemoryReader;
use blockcarve::telemetry::{ManualClock, NullDiagnostics};
use blockcarve::{BlocksizeCalibration, CarveConfig, CollectingSink, SearchSpace, SignatureRegistry};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let registry = SignatureRegistry::with_builtin_formats();
    let config = CarveConfig::default().with_read_chunk(4096);
    let size = data.len() as u64;
    let mut reader = MemoryReader::new(data.to_vec());
    let mut space = SearchSpace::whole(0..size);
    let mut sink = CollectingSink::default();

    let report = BlocksizeCalibration::new(&registry, &config)
        .with_clock(ManualClock::new(0))
        .run(&mut reader, &mut space, &mut sink, &mut NullDiagnostics)
        .expect("valid config");

    for file in &sink.files {
        assert!(file.length > 0);
        assert_eq!(file.length % 512, 0);
    }
    assert!(report.stats.candidates_opened <= config.probe_limit);
});
