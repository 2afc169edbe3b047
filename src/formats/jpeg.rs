use crate::candidate::{Candidate, DataCheck};
use crate::registry::FileFormat;
use crate::types::{FormatDescriptor, MB, Signature};

pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

const STAGE_SEGMENTS: u32 = 0;
const STAGE_SCAN: u32 = 1;

const DESCRIPTOR: FormatDescriptor = FormatDescriptor::new("jpg", "JPEG image", 50 * MB);
const SIGNATURES: [Signature; 1] = [Signature::new(0, &[0xFF, 0xD8, 0xFF])];

#[inline]
pub fn is_valid_marker(marker: u8) -> bool {
    matches!(
        marker,
        0xC0..=0xCF |
        0xD0..=0xD9 |
        0xDA |
        0xDB |
        0xDC..=0xDF |
        0xE0..=0xEF |
        0xFE
    )
}

pub struct Jpeg;

impl FileFormat for Jpeg {
    fn descriptor(&self) -> &FormatDescriptor {
        &DESCRIPTOR
    }

    fn signatures(&self) -> &[Signature] {
        &SIGNATURES
    }

    fn header_check(&self, header: &[u8], _active: &Candidate, candidate: &mut Candidate) -> bool {
        if header.len() < 6 || header[0..2] != JPEG_SOI || header[2] != 0xFF {
            return false;
        }
        let marker = header[3];
        if !is_valid_marker(marker) || matches!(marker, 0xD0..=0xD9) {
            return false;
        }
        let seg_len = u16::from_be_bytes([header[4], header[5]]);
        if seg_len < 2 {
            return false;
        }

        candidate.continuation.calculated_file_size = JPEG_SOI.len() as u64;
        candidate.continuation.stage = STAGE_SEGMENTS;
        true
    }

    fn has_data_check(&self) -> bool {
        true
    }

    fn data_check(&self, window: &[u8], candidate: &mut Candidate) -> DataCheck {
        let mut calc = candidate.continuation.calculated_file_size;
        let mut stage = candidate.continuation.stage;

        let verdict = loop {
            let Some(i) = candidate.window_index(calc) else {
                break DataCheck::Continue;
            };

            if stage == STAGE_SEGMENTS {
                if i + 4 > window.len() {
                    break DataCheck::Continue;
                }
                if window[i] != 0xFF {
                    break DataCheck::Error;
                }
                let marker = window[i + 1];
                match marker {
                    0xFF => calc += 1,
                    0xD8 | 0xD0..=0xD7 => calc += 2,
                    0xD9 => {
                        calc += 2;
                        break DataCheck::Stop;
                    }
                    m if is_valid_marker(m) => {
                        let seg_len = u16::from_be_bytes([window[i + 2], window[i + 3]]) as u64;
                        if seg_len < 2 {
                            break DataCheck::Error;
                        }
                        calc += 2 + seg_len;
                        if m == 0xDA {
                            stage = STAGE_SCAN;
                        }
                    }
                    _ => break DataCheck::Error,
                }
                continue;
            }

            match scan_entropy_coded(&window[i..]) {
                ScanOutcome::Eoi(pos) => {
                    calc += pos as u64 + 2;
                    break DataCheck::Stop;
                }
                ScanOutcome::Marker(pos) => {
                    calc += pos as u64;
                    stage = STAGE_SEGMENTS;
                }
                ScanOutcome::Corrupt => break DataCheck::Error,
                ScanOutcome::NeedMore(pos) => {
                    calc += pos as u64;
                    break DataCheck::Continue;
                }
            }
        };

        candidate.continuation.calculated_file_size = calc;
        candidate.continuation.stage = stage;
        verdict
    }
}

enum ScanOutcome {
    Eoi(usize),
    Marker(usize),
    Corrupt,
    NeedMore(usize),
}

fn scan_entropy_coded(data: &[u8]) -> ScanOutcome {
    let mut i = 0;
    while i + 1 < data.len() {
        if data[i] != 0xFF {
            i += 1;
            continue;
        }
        match data[i + 1] {
            0x00 | 0xD0..=0xD7 => i += 2,
            0xFF => i += 1,
            0xD9 => return ScanOutcome::Eoi(i),
            m if is_valid_marker(m) => return ScanOutcome::Marker(i),
            _ => return ScanOutcome::Corrupt,
        }
    }
    ScanOutcome::NeedMore(i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FormatId;

    fn minimal_jpeg() -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
        data.extend_from_slice(b"JFIF\x00\x01\x01\x00\x00\x01\x00\x01\x00\x00");
        data.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x08, 1, 1, 0, 0, 0x3F, 0]);
        data.extend_from_slice(&[0x12, 0x34, 0xFF, 0x00, 0x56, 0xFF, 0xD3, 0x78]);
        data.extend_from_slice(&JPEG_EOI);
        data
    }

    fn window_for(data: &[u8], blocksize: usize) -> Vec<u8> {
        let mut window = vec![0u8; blocksize];
        let mut block = data.to_vec();
        block.resize(blocksize, 0xAA);
        window.extend_from_slice(&block);
        window
    }

    #[test]
    fn test_header_check_accepts_jfif() {
        let data = minimal_jpeg();
        let idle = Candidate::idle(512);
        let mut candidate = Candidate::opened(FormatId(0), 0, 512, true);
        assert!(Jpeg.header_check(&data, &idle, &mut candidate));
        assert_eq!(candidate.continuation.calculated_file_size, 2);
    }

    #[test]
    fn test_header_check_rejects_bare_soi() {
        let idle = Candidate::idle(512);
        let mut candidate = Candidate::opened(FormatId(0), 0, 512, true);
        assert!(!Jpeg.header_check(&[0xFF, 0xD8, 0xFF, 0xD9, 0, 0], &idle, &mut candidate));
        assert!(!Jpeg.header_check(&[0xFF, 0xD8, 0xFF, 0x42, 0, 4], &idle, &mut candidate));
    }

    #[test]
    fn test_data_check_finds_eoi() {
        let data = minimal_jpeg();
        let window = window_for(&data, 512);
        let idle = Candidate::idle(512);
        let mut candidate = Candidate::opened(FormatId(0), 0, 512, true);
        assert!(Jpeg.header_check(&data, &idle, &mut candidate));

        assert_eq!(Jpeg.data_check(&window, &mut candidate), DataCheck::Stop);
        assert_eq!(
            candidate.continuation.calculated_file_size,
            data.len() as u64
        );
    }

    #[test]
    fn test_data_check_rejects_invalid_marker_in_scan() {
        let mut data = minimal_jpeg();
        let len = data.len();
        data[len - 1] = 0x01;
        data[len - 2] = 0xFF;
        let window = window_for(&data, 512);
        let idle = Candidate::idle(512);
        let mut candidate = Candidate::opened(FormatId(0), 0, 512, true);
        assert!(Jpeg.header_check(&data, &idle, &mut candidate));

        assert_eq!(Jpeg.data_check(&window, &mut candidate), DataCheck::Error);
    }

    #[test]
    fn test_data_check_continues_without_eoi() {
        let data = minimal_jpeg();
        let truncated = &data[..data.len() - 2];
        let mut window = vec![0u8; 512];
        let mut block = truncated.to_vec();
        block.resize(512, 0x11);
        window.extend_from_slice(&block);

        let idle = Candidate::idle(512);
        let mut candidate = Candidate::opened(FormatId(0), 0, 512, true);
        assert!(Jpeg.header_check(&data, &idle, &mut candidate));
        assert_eq!(Jpeg.data_check(&window, &mut candidate), DataCheck::Continue);
        assert_eq!(candidate.continuation.stage, STAGE_SCAN);
    }
}
