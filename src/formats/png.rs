use crate::candidate::{Candidate, DataCheck};
use crate::registry::FileFormat;
use crate::types::{FormatDescriptor, MB, Signature};

pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

pub const IEND_CHUNK_TYPE: &[u8; 4] = b"IEND";

const CHUNK_OVERHEAD: u64 = 12;
const MAX_CHUNK_LENGTH: u32 = 0x7FFF_FFFF;

const DESCRIPTOR: FormatDescriptor = FormatDescriptor::new("png", "Portable Network Graphics", 100 * MB);
const SIGNATURES: [Signature; 1] = [Signature::new(0, &PNG_SIGNATURE)];

/// Checks the IHDR chunk that must follow the signature
pub fn validate_png_header(data: &[u8]) -> bool {
    if data.len() < 33 || data[..8] != PNG_SIGNATURE {
        return false;
    }

    if &data[12..16] != b"IHDR" {
        return false;
    }

    let ihdr_len = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
    if ihdr_len != 13 {
        return false;
    }

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&data[12..29]);
    let calculated = hasher.finalize();
    let stored = u32::from_be_bytes([data[29], data[30], data[31], data[32]]);

    let width = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
    let height = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);

    calculated == stored && width > 0 && height > 0
}

pub struct Png;

impl FileFormat for Png {
    fn descriptor(&self) -> &FormatDescriptor {
        &DESCRIPTOR
    }

    fn signatures(&self) -> &[Signature] {
        &SIGNATURES
    }

    fn header_check(&self, header: &[u8], _active: &Candidate, candidate: &mut Candidate) -> bool {
        if !validate_png_header(header) {
            return false;
        }
        candidate.continuation.calculated_file_size = PNG_SIGNATURE.len() as u64;
        true
    }

    fn has_data_check(&self) -> bool {
        true
    }

    fn data_check(&self, window: &[u8], candidate: &mut Candidate) -> DataCheck {
        let mut calc = candidate.continuation.calculated_file_size;

        let verdict = loop {
            let Some(i) = candidate.window_index(calc) else {
                break DataCheck::Continue;
            };
            if i + 8 > window.len() {
                break DataCheck::Continue;
            }

            let length = u32::from_be_bytes([window[i], window[i + 1], window[i + 2], window[i + 3]]);
            let chunk_type = &window[i + 4..i + 8];
            if length > MAX_CHUNK_LENGTH || !chunk_type.iter().all(u8::is_ascii_alphabetic) {
                break DataCheck::Error;
            }

            calc += CHUNK_OVERHEAD + u64::from(length);
            if chunk_type == IEND_CHUNK_TYPE {
                break DataCheck::Stop;
            }
        };

        candidate.continuation.calculated_file_size = calc;
        verdict
    }
}
