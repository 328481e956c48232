/*
    mbsrv
    MASSBUS disk and tape drive emulation server

    Copyright 2023-2025 the mbsrv contributors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    fiddler.rs

    The TM78 "bit fiddler": the codec between 8 bit tape frames and 18 bit
    MASSBUS halfwords, via an intermediate 36 bit word.

*/

//! The byte assembly codec.
//!
//! Two modes are implemented. "Industry compatible" packs four 8 bit bytes
//! into one 36 bit word with the low four bits zero; "core dump" packs five
//! bytes, keeping only the low nibble of the fifth. One preserves all the
//! bits in the tape record, the other preserves all the bits in the -10
//! word. Simple :-)
//!
//! Records may be read in either direction. The real formatter's fiddler is
//! designed so that reading a record in reverse produces the same sequence
//! of 18 bit halfwords, but in reverse order; combined with the channel's
//! own read reverse operation, the host ends up with the exact same 36 bit
//! words in memory. This does not mean the bytes are simply processed
//! backwards: they are taken in groups of 4 or 5, assembled into 36 bits
//! exactly as in forward mode, and then the two halfwords are emitted
//! swapped. The tape image always supplies bytes in forward order even for
//! a reverse read, so the reverse walk over the input happens here.

use crate::massbus::{lh36, mk36, rh36, TMAM_10_COMPATIBLE, TMAM_10_CORE_DUMP};

/// The byte assembly formats we implement. The TM78 defines several more
/// (PDP-11, PDP-15 and the high density modes); commands naming those are
/// rejected before the fiddler ever runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Format {
    /// Four tape frames per 36 bit word, low four bits zero.
    TenCompatible,
    /// Five tape frames per 36 bit word, low nibble of the fifth kept.
    TenCoreDump,
}

impl Format {
    /// Decode the TMTCR assembly format field.
    pub fn from_code(code: u8) -> Option<Format> {
        match code {
            TMAM_10_COMPATIBLE => Some(Format::TenCompatible),
            TMAM_10_CORE_DUMP => Some(Format::TenCoreDump),
            _ => None,
        }
    }

    /// Tape frames per 36 bit word.
    pub fn group_size(self) -> usize {
        match self {
            Format::TenCompatible => 4,
            Format::TenCoreDump => 5,
        }
    }
}

/// Assemble one group of bytes into a 36 bit word.
#[inline]
fn pack36(format: Format, group: &[u8]) -> u64 {
    let w36 = ((group[0] as u64) << 28)
        | ((group[1] as u64) << 20)
        | ((group[2] as u64) << 12)
        | ((group[3] as u64) << 4);
    match format {
        Format::TenCompatible => w36,
        Format::TenCoreDump => w36 | (group[4] & 0o17) as u64,
    }
}

/// Convert a block of 8 bit tape frames into 18 bit MASSBUS halfwords.
///
/// `count` is the record length in bytes; it is rounded up to the group
/// size, so `input` must provide at least that many bytes (the caller keeps
/// slack bytes after the record for exactly this purpose). The number of
/// halfwords written to `output` is returned.
///
/// In the forward direction groups are consumed in ascending order and each
/// word is emitted left halfword first. In reverse the walk starts at the
/// last group and the halfwords of each word are emitted swapped, which
/// gives the reversed-sequence contract described in the module comment.
pub fn fiddle_8_to_18(
    format: Format,
    input: &[u8],
    count: usize,
    output: &mut [u32],
    reverse: bool,
) -> usize {
    let group = format.group_size();
    let groups = count.div_ceil(group);
    assert!(input.len() >= groups * group);
    assert!(output.len() >= groups * 2);

    let mut emitted = 0;
    for i in 0..groups {
        let n = if reverse { (groups - 1 - i) * group } else { i * group };
        let w36 = pack36(format, &input[n..n + group]);
        if reverse {
            output[emitted] = rh36(w36);
            output[emitted + 1] = lh36(w36);
        } else {
            output[emitted] = lh36(w36);
            output[emitted + 1] = rh36(w36);
        }
        emitted += 2;
    }
    emitted
}

/// Convert 18 bit MASSBUS halfwords back into 8 bit tape frames.
///
/// This one is quite a bit easier because there's no reverse case to worry
/// about: the conversion is only used for writing, and there's no "write
/// reverse" function. The halfword count must be even - the MASSBUS simply
/// can't transfer an odd number of halfwords to the -10. The number of
/// bytes written to `output` is returned.
pub fn fiddle_18_to_8(format: Format, input: &[u32], output: &mut [u8]) -> usize {
    debug_assert!(input.len() % 2 == 0);
    let group = format.group_size();
    assert!(output.len() >= (input.len() / 2) * group);

    let mut produced = 0;
    for pair in input.chunks_exact(2) {
        let w36 = mk36(pair[0], pair[1]);
        output[produced] = ((w36 >> 28) & 0xFF) as u8;
        output[produced + 1] = ((w36 >> 20) & 0xFF) as u8;
        output[produced + 2] = ((w36 >> 12) & 0xFF) as u8;
        output[produced + 3] = ((w36 >> 4) & 0xFF) as u8;
        if format == Format::TenCoreDump {
            output[produced + 4] = (w36 & 0o17) as u8;
        }
        produced += group;
    }
    produced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::massbus::mk36;

    fn halfwords(format: Format, bytes: &[u8], reverse: bool) -> Vec<u32> {
        let group = format.group_size();
        let mut padded = bytes.to_vec();
        padded.resize(bytes.len().div_ceil(group) * group, 0);
        let mut out = vec![0u32; (padded.len() / group) * 2];
        let n = fiddle_8_to_18(format, &padded, bytes.len(), &mut out, reverse);
        out.truncate(n);
        out
    }

    #[test]
    fn compatible_mode_packs_four_bytes_per_word() {
        let out = halfwords(Format::TenCompatible, &[0x12, 0x34, 0x56, 0x78], false);
        let w36 = (0x12u64 << 28) | (0x34 << 20) | (0x56 << 12) | (0x78 << 4);
        assert_eq!(out, vec![super::lh36(w36), super::rh36(w36)]);
        // The low four bits of the word are always zero.
        assert_eq!(w36 & 0o17, 0);
    }

    #[test]
    fn core_dump_mode_keeps_the_low_nibble_of_the_fifth_byte() {
        let out = halfwords(Format::TenCoreDump, &[0x12, 0x34, 0x56, 0x78, 0xAF], false);
        let w36 = (0x12u64 << 28) | (0x34 << 20) | (0x56 << 12) | (0x78 << 4) | 0x0F;
        assert_eq!(out, vec![super::lh36(w36), super::rh36(w36)]);
    }

    #[test]
    fn compatible_round_trip_preserves_the_record() {
        let record: Vec<u8> = (0u32..96).map(|i| (i * 7 % 256) as u8).collect();
        let words = halfwords(Format::TenCompatible, &record, false);
        let mut back = vec![0u8; record.len()];
        let n = fiddle_18_to_8(Format::TenCompatible, &words, &mut back);
        assert_eq!(n, record.len());
        assert_eq!(back, record);
    }

    #[test]
    fn core_dump_round_trip_preserves_the_low_nibbles() {
        // Every fifth byte only keeps its low four bits across the trip.
        let record: Vec<u8> = (0u32..100)
            .map(|i| if i % 5 == 4 { (i % 16) as u8 } else { (i * 13 % 256) as u8 })
            .collect();
        let words = halfwords(Format::TenCoreDump, &record, false);
        let mut back = vec![0u8; record.len()];
        let n = fiddle_18_to_8(Format::TenCoreDump, &words, &mut back);
        assert_eq!(n, record.len());
        assert_eq!(back, record);
    }

    #[test]
    fn reverse_yields_the_same_words_in_reverse_order() {
        for format in [Format::TenCompatible, Format::TenCoreDump] {
            let len = format.group_size() * 5;
            let record: Vec<u8> = (0..len).map(|i| (i * 31 % 256) as u8).collect();

            let forward = halfwords(format, &record, false);
            let reverse = halfwords(format, &record, true);

            // Reassemble both streams into 36 bit words. The reverse stream
            // carries each word right halfword first.
            let fwd36: Vec<u64> =
                forward.chunks_exact(2).map(|p| mk36(p[0], p[1])).collect();
            let mut rev36: Vec<u64> =
                reverse.chunks_exact(2).map(|p| mk36(p[1], p[0])).collect();
            rev36.reverse();
            assert_eq!(fwd36, rev36);
        }
    }

    #[test]
    fn short_records_round_up_to_the_group_size() {
        // 5 bytes in compatible mode occupy two groups, so four halfwords.
        let out = halfwords(Format::TenCompatible, b"hello", false);
        assert_eq!(out.len(), 4);
        // 7 bytes likewise.
        let out = halfwords(Format::TenCompatible, b"world!!", false);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn format_codes_decode() {
        assert_eq!(Format::from_code(2), Some(Format::TenCompatible));
        assert_eq!(Format::from_code(3), Some(Format::TenCoreDump));
        assert_eq!(Format::from_code(0), None);
        assert_eq!(Format::from_code(5), None);
    }
}
