//! POSIX/GNU tar archives
//!
//! Tar is the container format of the built-in set: its members carry
//! arbitrary payload framed in 512-byte records, so a member that happens to
//! be a JPEG must not be carved as a file of its own.

use crate::candidate::{Candidate, DataCheck};
use crate::registry::FileFormat;
use crate::types::{FormatDescriptor, Signature};

pub const TAR_BLOCK: usize = 512;

const MAGIC_OFFSET: usize = 257;
const SIZE_FIELD: std::ops::Range<usize> = 124..136;
const CHECKSUM_FIELD: std::ops::Range<usize> = 148..156;

const DESCRIPTOR: FormatDescriptor = FormatDescriptor::new("tar", "tar archive", 0);
const SIGNATURES: [Signature; 1] = [Signature::new(MAGIC_OFFSET, b"ustar")];

fn parse_octal(field: &[u8]) -> Option<u64> {
    let mut value = 0u64;
    let mut seen_digit = false;
    for &b in field {
        match b {
            b'0'..=b'7' => {
                value = value.checked_mul(8)?.checked_add(u64::from(b - b'0'))?;
                seen_digit = true;
            }
            b' ' if !seen_digit => {}
            b' ' | 0 => break,
            _ => return None,
        }
    }
    seen_digit.then_some(value)
}

/// Entry size, in octal or GNU base-256
fn entry_size(header: &[u8]) -> Option<u64> {
    let field = &header[SIZE_FIELD];
    if field[0] & 0x80 != 0 {
        let mut value = u64::from(field[0] & 0x7F);
        for &b in &field[1..] {
            value = value.checked_mul(256)?.checked_add(u64::from(b))?;
        }
        return Some(value);
    }
    parse_octal(field)
}

/// File offset of the header following an entry of `size` bytes at `at`
fn next_entry(at: u64, size: u64) -> Option<u64> {
    let block = TAR_BLOCK as u64;
    let payload = size.div_ceil(block).checked_mul(block)?;
    at.checked_add(block)?.checked_add(payload)
}

/// A 512-byte record with the ustar magic and a matching checksum
pub fn is_valid_tar_header(header: &[u8]) -> bool {
    if header.len() < TAR_BLOCK || &header[MAGIC_OFFSET..MAGIC_OFFSET + 5] != b"ustar" {
        return false;
    }
    let Some(stored) = parse_octal(&header[CHECKSUM_FIELD]) else {
        return false;
    };
    let computed: u64 = header[..TAR_BLOCK]
        .iter()
        .enumerate()
        .map(|(idx, &b)| {
            if CHECKSUM_FIELD.contains(&idx) {
                u64::from(b' ')
            } else {
                u64::from(b)
            }
        })
        .sum();
    stored == computed
}

pub struct Tar;

impl FileFormat for Tar {
    fn descriptor(&self) -> &FormatDescriptor {
        &DESCRIPTOR
    }

    fn signatures(&self) -> &[Signature] {
        &SIGNATURES
    }

    fn header_check(&self, header: &[u8], active: &Candidate, candidate: &mut Candidate) -> bool {
        if !is_valid_tar_header(header) {
            return false;
        }
        // A member header inside the archive being recovered
        if active.format().is_some() && active.format() == candidate.format() {
            return false;
        }
        candidate.continuation.calculated_file_size = 0;
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
            if i + TAR_BLOCK > window.len() {
                break DataCheck::Continue;
            }

            let record = &window[i..i + TAR_BLOCK];
            if record.iter().all(|&b| b == 0) {
                if i + 2 * TAR_BLOCK > window.len() {
                    break DataCheck::Continue;
                }
                if window[i + TAR_BLOCK..i + 2 * TAR_BLOCK].iter().all(|&b| b == 0) {
                    let Some(end) = calc.checked_add(2 * TAR_BLOCK as u64) else {
                        break DataCheck::Error;
                    };
                    calc = end;
                    break DataCheck::Stop;
                }
                break DataCheck::Error;
            }

            if !is_valid_tar_header(record) {
                break DataCheck::Error;
            }
            let Some(next) = entry_size(record).and_then(|size| next_entry(calc, size)) else {
                break DataCheck::Error;
            };
            calc = next;
        };

        candidate.continuation.calculated_file_size = calc;
        verdict
    }

    fn suppresses_headers(&self, preceding: &[u8]) -> bool {
        preceding.len() >= TAR_BLOCK && is_valid_tar_header(&preceding[preceding.len() - TAR_BLOCK..])
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::FormatId;

    pub(crate) fn tar_header(name: &str, size: u64) -> Vec<u8> {
        let mut header = vec![0u8; TAR_BLOCK];
        header[..name.len()].copy_from_slice(name.as_bytes());
        header[100..108].copy_from_slice(b"0000644\0");
        let size_field = format!("{:011o}\0", size);
        header[SIZE_FIELD].copy_from_slice(size_field.as_bytes());
        header[156] = b'0';
        header[MAGIC_OFFSET..MAGIC_OFFSET + 6].copy_from_slice(b"ustar\0");
        header[263..265].copy_from_slice(b"00");

        header[CHECKSUM_FIELD].fill(b' ');
        let sum: u64 = header.iter().map(|&b| u64::from(b)).sum();
        let checksum = format!("{:06o}\0 ", sum);
        header[CHECKSUM_FIELD].copy_from_slice(checksum.as_bytes());
        header
    }

    pub(crate) fn archive(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, payload) in members {
            out.extend(tar_header(name, payload.len() as u64));
            out.extend_from_slice(payload);
            let padding = (TAR_BLOCK - payload.len() % TAR_BLOCK) % TAR_BLOCK;
            out.extend(std::iter::repeat_n(0u8, padding));
        }
        out.extend(std::iter::repeat_n(0u8, 2 * TAR_BLOCK));
        out
    }

    #[test]
    fn test_header_checksum() {
        let header = tar_header("hello.txt", 5);
        assert!(is_valid_tar_header(&header));

        let mut corrupt = header.clone();
        corrupt[0] = b'j';
        assert!(!is_valid_tar_header(&corrupt));
    }

    #[test]
    fn test_parse_octal() {
        assert_eq!(parse_octal(b"00000000012\0"), Some(10));
        assert_eq!(parse_octal(b"  777 \0"), Some(511));
        assert_eq!(parse_octal(b"\0\0\0"), None);
        assert_eq!(parse_octal(b"12x"), None);
    }

    #[test]
    fn test_member_header_not_a_new_archive() {
        let header = tar_header("member", 0);
        let mut active = Candidate::idle(512);
        active.activate(Candidate::opened(FormatId(0), 0, 512, true));
        let mut tentative = Candidate::opened(FormatId(0), 4096, 512, true);
        assert!(!Tar.header_check(&header, &active, &mut tentative));

        let idle = Candidate::idle(512);
        assert!(Tar.header_check(&header, &idle, &mut tentative));
    }

    #[test]
    fn test_data_check_stops_at_end_of_archive() {
        let data = archive(&[("a.txt", vec![b'a'; 10])]);
        assert_eq!(data.len(), 2048);

        let idle = Candidate::idle(1024);
        let mut candidate = Candidate::opened(FormatId(0), 0, 1024, true);
        assert!(Tar.header_check(&data, &idle, &mut candidate));

        let mut first = vec![0u8; 1024];
        first.extend_from_slice(&data[..1024]);
        assert_eq!(Tar.data_check(&first, &mut candidate), DataCheck::Continue);
        assert_eq!(candidate.continuation.calculated_file_size, 1024);

        let mut candidate = candidate.with_accumulated(1024);
        assert_eq!(Tar.data_check(&data, &mut candidate), DataCheck::Stop);
        assert_eq!(candidate.continuation.calculated_file_size, 2048);
    }

    #[test]
    fn test_data_check_rejects_garbage_at_entry_boundary() {
        let mut data = archive(&[("a.txt", vec![b'a'; 10])]);
        data[1024] = 0xEE;

        let idle = Candidate::idle(1024);
        let mut candidate = Candidate::opened(FormatId(0), 0, 1024, true);
        assert!(Tar.header_check(&data, &idle, &mut candidate));
        candidate.continuation.calculated_file_size = 1024;

        let mut candidate = candidate.with_accumulated(1024);
        assert_eq!(Tar.data_check(&data, &mut candidate), DataCheck::Error);
    }

    /// Checksum-valid header with a GNU base-256 size of `u64::MAX - 511`
    pub(crate) fn huge_entry_header() -> Vec<u8> {
        let mut header = tar_header("huge.bin", 0);
        header[SIZE_FIELD.start] = 0x80;
        header[SIZE_FIELD.start + 1..SIZE_FIELD.start + 4].fill(0);
        header[SIZE_FIELD.start + 4..SIZE_FIELD.end]
            .copy_from_slice(&(u64::MAX - 511).to_be_bytes());
        header[CHECKSUM_FIELD].fill(b' ');
        let sum: u64 = header.iter().map(|&b| u64::from(b)).sum();
        header[CHECKSUM_FIELD].copy_from_slice(format!("{:06o}\0 ", sum).as_bytes());
        header
    }

    #[test]
    fn test_entry_size_overflow_is_an_error() {
        let header = huge_entry_header();
        assert!(is_valid_tar_header(&header));
        assert_eq!(entry_size(&header), Some(u64::MAX - 511));

        let idle = Candidate::idle(512);
        let mut candidate = Candidate::opened(FormatId(0), 0, 512, true);
        assert!(Tar.header_check(&header, &idle, &mut candidate));

        let mut window = vec![0u8; 512];
        window.extend_from_slice(&header);
        assert_eq!(Tar.data_check(&window, &mut candidate), DataCheck::Error);
    }

    #[test]
    fn test_next_entry_rounds_up_and_checks_overflow() {
        assert_eq!(next_entry(0, 10), Some(1024));
        assert_eq!(next_entry(1024, 512), Some(2048));
        assert_eq!(next_entry(0, u64::MAX - 511), None);
        assert_eq!(next_entry(u64::MAX - 100, 0), None);
    }

    #[test]
    fn test_suppression_after_member_header() {
        let mut preceding = vec![0u8; 100];
        preceding.extend(tar_header("payload.jpg", 4096));
        assert!(Tar.suppresses_headers(&preceding));
        assert!(!Tar.suppresses_headers(&preceding[..300]));
        assert!(!Tar.suppresses_headers(&[0u8; 1024]));
    }
}
