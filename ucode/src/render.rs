//! Text views of a finished control store. Nothing here writes to the table.

use std::io::Write;

use common::{hexfile::HexFile, ControlWord};

use crate::{ControlStore, UcodeError, SLOT_WORDS};

pub const ADDRESS_BITS: usize = 15;
pub const ADDRESS_GROUPS: [usize; 3] = [8, 3, 4];
pub const CONTROL_BITS: usize = 32;
pub const CONTROL_GROUPS: [usize; 8] = [4; 8];

const LOGISIM_WORDS_PER_LINE: usize = 8;

/// Zero padded binary of `value`, split into `groups` with `_`. Digits past
/// the last group form one more group.
pub fn format_binary(value: u32, width: usize, groups: &[usize]) -> String {
    let digits = format!("{:0width$b}", value, width = width);
    let mut out = String::with_capacity(digits.len() + groups.len());
    let mut rest = digits.as_str();

    for &group in groups {
        if rest.is_empty() {
            break;
        }
        let (head, tail) = rest.split_at(group.min(rest.len()));
        if !out.is_empty() {
            out.push('_');
        }
        out.push_str(head);
        rest = tail;
    }
    if !rest.is_empty() {
        if !out.is_empty() {
            out.push('_');
        }
        out.push_str(rest);
    }
    out
}

/// One line per non-zero entry: `<opcode_step_flags> : <eight nibbles>`.
pub fn write_listing<W: Write>(store: &ControlStore, w: &mut W, annotate: bool) -> Result<(), UcodeError> {
    writeln!(w, "Address (binary) : Control Bits (binary)")?;
    writeln!(w, "{}", "=".repeat(80))?;

    for (address, word) in store.non_zero() {
        let address = format_binary(address.index() as u32, ADDRESS_BITS, &ADDRESS_GROUPS);
        let control = format_binary(word, CONTROL_BITS, &CONTROL_GROUPS);
        if annotate {
            let decoded = ControlWord::from_bits(word)?;
            writeln!(w, "{} : {}  ; {}", address, control, decoded.mnemonics())?;
        } else {
            writeln!(w, "{} : {}", address, control)?;
        }
    }

    Ok(())
}

fn run_length(words: &[u32]) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < words.len() {
        let run = words[i..].iter().take_while(|w| **w == words[i]).count();
        tokens.push(if run == 1 {
            format!("{:x}", words[i])
        } else {
            format!("{}*{:x}", run, words[i])
        });
        i += run;
    }
    tokens
}

/// The whole table as a Logisim `v2.0 raw` image, one comment per defined opcode.
pub fn write_logisim<W: Write>(store: &ControlStore, w: &mut W) -> Result<(), UcodeError> {
    writeln!(w, "{}", HexFile::header())?;

    let mut blank = 0;
    for (opcode, block) in store.words().chunks(SLOT_WORDS).enumerate() {
        if block.iter().all(|word| *word == 0) {
            blank += block.len();
            continue;
        }

        if blank > 0 {
            writeln!(w, "{}*0", blank)?;
            blank = 0;
        }

        writeln!(w, "# opcode {:02x}", opcode)?;
        for line in run_length(block).chunks(LOGISIM_WORDS_PER_LINE) {
            writeln!(w, "{}", line.join(" "))?;
        }
    }

    if blank > 0 {
        writeln!(w, "{}*0", blank)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use common::*;

    use super::*;
    use crate::ucode;

    #[test]
    fn binary_groups() {
        assert_eq!("00001101_000_0000", format_binary(13 << 7, ADDRESS_BITS, &ADDRESS_GROUPS));
        assert_eq!(
            "0000_0000_1100_0001_0111_0000_0001_0000",
            format_binary(ControlWord::FETCH.bits(), CONTROL_BITS, &CONTROL_GROUPS));
        assert_eq!("10_1101", format_binary(0b101101, 6, &[2]));
        assert_eq!("1_01_101", format_binary(0b101101, 6, &[1, 2]));
        assert_eq!("101101", format_binary(0b101101, 6, &[]));
        assert_eq!("10_1101", format_binary(0b101101, 6, &[2, 8]));
    }

    fn listing(store: &ControlStore, annotate: bool) -> Vec<String> {
        let mut out = Vec::new();
        write_listing(store, &mut out, annotate).unwrap();
        String::from_utf8(out).unwrap().lines().map(|l| l.to_string()).collect()
    }

    #[test]
    fn listing_skips_zero_entries() {
        let mut store = ControlStore::new();
        let mov = ControlWord::new().out(DataBusOut::A).load(DataBusIn::B);
        store.encode(13, &[mov]).unwrap();

        let lines = listing(&store, false);
        assert_eq!("Address (binary) : Control Bits (binary)", lines[0]);
        assert_eq!(80, lines[1].len());
        assert_eq!(2 + 3 * 16, lines.len());
        assert_eq!("00001101_000_0000 : 0000_0000_1100_0001_0111_0000_0001_0000", lines[2]);
        assert_eq!("00001101_001_0101 : 0000_0000_0001_0000_0010_0000_0000_0000", lines[2 + 16 + 5]);
        assert_eq!("00001101_010_1111 : 0000_0000_0000_0000_0000_0000_0000_0001", lines[49]);
    }

    #[test]
    fn annotated_listing() {
        let mut store = ControlStore::new();
        store.encode(0, &[]).unwrap();
        let lines = listing(&store, true);
        assert!(lines[2].ends_with("; MIO|PCO|INI|PCE"));
        assert!(lines.last().unwrap().ends_with("; SSR"));
    }

    #[test]
    fn empty_store_lists_only_header() {
        assert_eq!(2, listing(&ControlStore::new(), false).len());
    }

    #[test]
    fn logisim_reads_back() {
        let store = ucode().unwrap();
        let mut out = Vec::new();
        write_logisim(&store, &mut out).unwrap();

        let hex = HexFile::read(out.as_slice()).unwrap();
        assert_eq!(store.words(), hex.words().as_slice());
    }

    #[test]
    fn run_length_tokens() {
        assert_eq!(vec!["c17010", "3*0", "1"], run_length(&[0xc17010, 0, 0, 0, 1]));
    }
}
