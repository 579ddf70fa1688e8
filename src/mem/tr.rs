//! `tr SET1 SET2`: byte-wise character translation.

use std::io::{self, Read};

use crate::util::PipeReader;

/// Expand `a-z` style ranges. Descending ranges count down.
pub(super) fn expand(set: &str) -> Vec<u8> {
    let bytes = set.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if i + 2 < bytes.len() && bytes[i + 1] == b'-' {
            let (start, end) = (bytes[i], bytes[i + 2]);
            if start <= end {
                out.extend(start..=end);
            } else {
                out.extend((end..=start).rev());
            }
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}

/// Build the translation table. When SET2 is shorter than SET1 its last
/// byte repeats; an empty SET2 translates nothing.
pub(super) fn table(set1: &str, set2: &str) -> [u8; 256] {
    let mut table = [0u8; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = i as u8;
    }
    let from = expand(set1);
    let to = expand(set2);
    let Some(&last) = to.last() else {
        return table;
    };
    for (i, &b) in from.iter().enumerate() {
        table[b as usize] = to.get(i).copied().unwrap_or(last);
    }
    table
}

/// Translates everything read from the command's input.
pub(super) struct Translate {
    pub(super) src: PipeReader,
    pub(super) table: [u8; 256],
}

impl Read for Translate {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.src.read(buf)?;
        for b in &mut buf[..n] {
            *b = self.table[*b as usize];
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_ranges() {
        assert_eq!(expand("a-e"), b"abcde");
        assert_eq!(expand("e-a"), b"edcba");
        assert_eq!(expand("xa-c-"), b"xabc-");
        assert_eq!(expand(""), b"");
    }

    #[test]
    fn test_table_pads_with_last() {
        let t = table("abc", "x");
        assert_eq!(t[b'a' as usize], b'x');
        assert_eq!(t[b'c' as usize], b'x');
        assert_eq!(t[b'd' as usize], b'd');

        let t = table("abc", "");
        assert_eq!(t[b'a' as usize], b'a');
    }
}
