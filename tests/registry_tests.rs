use blockcarve::formats::png::PNG_SIGNATURE;
use blockcarve::{Candidate, FileFormat, FormatDescriptor, Signature, SignatureRegistry};

struct Probe {
    descriptor: FormatDescriptor,
    signatures: Vec<Signature>,
}

impl FileFormat for Probe {
    fn descriptor(&self) -> &FormatDescriptor {
        &self.descriptor
    }

    fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    fn header_check(&self, _: &[u8], _: &Candidate, _: &mut Candidate) -> bool {
        true
    }
}

fn probe(ext: &'static str, max_filesize: u64, offset: usize, pattern: &'static [u8]) -> Box<Probe> {
    Box::new(Probe {
        descriptor: FormatDescriptor::new(ext, ext, max_filesize),
        signatures: vec![Signature::new(offset, pattern)],
    })
}

#[test]
fn test_classify_at_block_boundary() {
    let mut registry = SignatureRegistry::new();
    let id = registry.register(probe("tar", 0, 0, b"tar\0"));

    let mut window = vec![0u8; 2048];
    window[512..516].copy_from_slice(b"tar\0");

    let idle = Candidate::idle(512);
    assert!(registry.classify(&window, 0, 0, &idle).is_none());

    let found = registry.classify(&window, 512, 512, &idle).unwrap();
    assert_eq!(found.format(), Some(id));
    assert_eq!(found.start_offset(), 512);
    assert_eq!(registry.descriptor(id).extension, "tar");

    let mut candidate = Candidate::idle(512);
    assert!(candidate.activate(found).is_none());
    assert!(candidate.is_active());
    assert_eq!(candidate.start_offset(), 512);
    assert_eq!(candidate.accumulated_size(), 0);
}

#[test]
fn test_first_registered_wins_over_larger_max_filesize() {
    let mut registry = SignatureRegistry::new();
    let small = registry.register(probe("small", 1024, 0, b"MAGIC"));
    registry.register(probe("large", 1 << 30, 0, b"MAG"));

    let idle = Candidate::idle(512);
    let found = registry.classify(b"MAGIC and more", 0, 0, &idle).unwrap();
    assert_eq!(found.format(), Some(small));
}

#[test]
fn test_builtin_order() {
    let registry = SignatureRegistry::with_builtin_formats();
    let extensions: Vec<_> = registry.descriptors().map(|(_, d)| d.extension).collect();
    assert_eq!(extensions, vec!["tar", "png", "jpg"]);
    assert_eq!(registry.probes()[0].anchor_offset, 257);
    assert_eq!(registry.probes()[1].anchor_value(), Some(PNG_SIGNATURE[0]));
}

#[test]
fn test_builtin_rejects_bare_signatures() {
    let registry = SignatureRegistry::with_builtin_formats();
    let idle = Candidate::idle(512);

    let mut window = vec![0u8; 1024];
    window[..8].copy_from_slice(&PNG_SIGNATURE);
    assert!(registry.classify(&window, 0, 0, &idle).is_none());

    window[..3].copy_from_slice(&[0xFF, 0xD8, 0xFF]);
    window[3] = 0x00;
    assert!(registry.classify(&window, 0, 0, &idle).is_none());
}
