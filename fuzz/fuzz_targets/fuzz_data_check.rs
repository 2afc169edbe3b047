#![no_main]

use blockcarve::{Candidate, SignatureRegistry};
use libfuzzer_sys::fuzz_target;
use std::sync::OnceLock;

const BLOCKSIZE: usize = 512;

static REGISTRY: OnceLock<SignatureRegistry> = OnceLock::new();

// Feeds the input as a stream of blocks to every built-in continuation
// check, starting with whatever header the input carries.
fuzz_target!(|data: &[u8]| {
    let registry = REGISTRY.get_or_init(SignatureRegistry::with_builtin_formats);
    let idle = Candidate::idle(BLOCKSIZE as u32);

    let mut stream = vec![0u8; BLOCKSIZE];
    stream.extend_from_slice(data);
    stream.resize(stream.len().next_multiple_of(BLOCKSIZE) + BLOCKSIZE, 0);

    let Some(tentative) = registry.classify(&stream, BLOCKSIZE, 0, &idle) else {
        return;
    };
    let mut candidate = idle;
    candidate.activate(tentative);

    for old in (0..stream.len() - BLOCKSIZE).step_by(BLOCKSIZE) {
        let pair = &stream[old..old + 2 * BLOCKSIZE];
        if candidate.step(registry, pair, 0).is_some() {
            break;
        }
    }
});
