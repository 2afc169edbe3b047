#![no_main]

use blockcarve::{Candidate, SignatureRegistry};
use libfuzzer_sys::fuzz_target;
use std::sync::OnceLock;

static REGISTRY: OnceLock<SignatureRegistry> = OnceLock::new();

fuzz_target!(|data: &[u8]| {
    let registry = REGISTRY.get_or_init(SignatureRegistry::with_builtin_formats);
    let idle = Candidate::idle(512);
    for position in (0..data.len()).step_by(512) {
        let _ = registry.lookup(data, position, position as u64, &idle);
    }
});
