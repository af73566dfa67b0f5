//! C11 — Segment File Set / globbing (§4.8, §6).
//!
//! Generalizes `find_files` (`ewf.rs`), which asks the `glob` crate for a
//! single `base??` wildcard and sorts lexically — that
//! accidentally works for `E01..E99` but gets `EAA` (segment 100) sorted
//! *before* `E02` under plain string ordering. This instead generates the
//! expected filename for each segment number in turn (§6's
//! `E01..E99, EAA..EZZ, FAA..ZZZ` progression) and probes for existence,
//! which is naturally numeric-ascending and matches testable property S5.

use std::path::{Path, PathBuf};

use crate::error::{EwfError, Result};
use crate::provider::BlockIoProvider;

pub const SIG_EWF: [u8; 8] = [0x45, 0x56, 0x46, 0x09, 0x0D, 0x0A, 0xFF, 0x00];
pub const SIG_EX01: [u8; 8] = [0x45, 0x56, 0x46, 0x32, 0x0D, 0x0A, 0x81, 0x00];
pub const SIG_LEF: [u8; 8] = [0x4C, 0x56, 0x46, 0x09, 0x0D, 0x0A, 0xFF, 0x00];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureFamily {
    Ewf,
    Ex01,
    Lef,
}

pub fn identify_signature(bytes: &[u8; 8]) -> Option<SignatureFamily> {
    match *bytes {
        SIG_EWF => Some(SignatureFamily::Ewf),
        SIG_EX01 => Some(SignatureFamily::Ex01),
        SIG_LEF => Some(SignatureFamily::Lef),
        _ => None,
    }
}

/// Build the 3-character segment extension (sans leading dot) for 1-based
/// segment number `n`: `E01..E99`, then `EAA..EZZ`, then `FAA..ZZZ`
/// (wrapping the leading letter every 676 letter-suffixed segments).
/// `leading` is the family letter (`'E'` for EWF/Ex01, `'L'` for LEF/L01,
/// `'s'` for the SMART `.s01` variant).
pub fn segment_extension(leading: char, n: u32) -> Result<String> {
    if n == 0 {
        return Err(EwfError::InvalidArgument("segment number must be >= 1".into()));
    }
    if n <= 99 {
        return Ok(format!("{}{:02}", leading, n));
    }

    let idx = n - 100;
    const BLOCK: u32 = 676; // 26 * 26
    let block = idx / BLOCK;
    let within = idx % BLOCK;
    let first_letter = leading as u8 + 1 + block as u8;
    if !first_letter.is_ascii_uppercase() && !first_letter.is_ascii_lowercase() {
        return Err(EwfError::InvalidArgument("segment number out of range".into()));
    }
    if (leading.is_ascii_uppercase() && first_letter > b'Z')
        || (leading.is_ascii_lowercase() && first_letter > b'z')
    {
        return Err(EwfError::InvalidArgument(
            "segment number exceeds maximum representable extension".into(),
        ));
    }

    let base = if leading.is_ascii_uppercase() { b'A' } else { b'a' };
    let l1 = base + (within / 26) as u8;
    let l2 = base + (within % 26) as u8;
    Ok(format!("{}{}{}", first_letter as char, l1 as char, l2 as char))
}

/// Parse `path`'s extension into `(leading char, segment number)`, the
/// inverse of [`segment_extension`] restricted to the purely-numeric
/// `E01..E99` form (the only form a caller is expected to hand in as the
/// entry-point filename).
fn parse_first_segment_extension(path: &Path) -> Result<(char, u32)> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| EwfError::InvalidArgument(format!("no extension on {}", path.display())))?;

    if ext.len() != 3 {
        return Err(EwfError::InvalidArgument(format!(
            "unexpected segment extension '{}'",
            ext
        )));
    }
    let mut chars = ext.chars();
    let leading = chars.next().unwrap();
    let digits: String = chars.collect();
    let n: u32 = digits
        .parse()
        .map_err(|_| EwfError::InvalidArgument(format!("unexpected segment extension '{}'", ext)))?;
    Ok((leading, n))
}

/// Enumerate every segment file belonging to the same image as `first_path`,
/// in ascending segment-number order.
pub fn enumerate_segments(provider: &dyn BlockIoProvider, first_path: &Path) -> Result<Vec<PathBuf>> {
    let (leading, start) = parse_first_segment_extension(first_path)?;
    let stem_path = first_path.with_extension("");

    let mut found = Vec::new();
    let mut n = start;
    loop {
        let ext = segment_extension(leading, n)?;
        let candidate = stem_path.with_extension(ext);
        if !provider.exists(&candidate) {
            break;
        }
        found.push(candidate);
        n += 1;
    }

    if found.is_empty() {
        return Err(EwfError::InvalidArgument(format!(
            "no segment files found starting at {}",
            first_path.display()
        )));
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_segment_numbers_are_two_digit() {
        assert_eq!(segment_extension('E', 1).unwrap(), "E01");
        assert_eq!(segment_extension('E', 99).unwrap(), "E99");
    }

    #[test]
    fn wraps_to_letters_at_100() {
        assert_eq!(segment_extension('E', 100).unwrap(), "EAA");
        assert_eq!(segment_extension('E', 101).unwrap(), "EAB");
    }

    #[test]
    fn wraps_leading_letter_after_ezz() {
        // E + 676 letter combos (AA..ZZ) = segments 100..775.
        assert_eq!(segment_extension('E', 775).unwrap(), "EZZ");
        assert_eq!(segment_extension('E', 776).unwrap(), "FAA");
    }

    #[test]
    fn rejects_zero() {
        assert!(segment_extension('E', 0).is_err());
    }
}
