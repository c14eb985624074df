// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Range-based asymmetric numeral system coder with 12-bit probabilities.
//! Encoding walks the symbol sequence back-to-front and the decoder walks
//! front-to-back; the two are exact inverses given identical tables.

use crate::{
    bit_reader::BitReader,
    bit_writer::{read_varint, write_varint, BitWriter},
    error::{Error, Result},
};

pub const ANS_LOG_TAB_SIZE: u32 = 12;
pub const ANS_TAB_SIZE: u32 = 1 << ANS_LOG_TAB_SIZE;

/// Lower bound of the coder state; renormalization emits 16 bits at a time.
const STATE_LOW: u32 = 1 << 16;

#[derive(Clone, Copy, Debug, Default)]
struct SymbolInfo {
    freq: u32,
    cum: u32,
}

/// Decoding and encoding tables of one clustered histogram.
#[derive(Debug)]
pub struct AnsTable {
    info: Vec<SymbolInfo>,
    slot_to_symbol: Vec<u16>,
}

impl AnsTable {
    /// Builds a table from normalized counts summing to `ANS_TAB_SIZE`.
    /// An all-zero `counts` yields a table on which any read fails, for
    /// contexts that never code a symbol.
    pub fn new(counts: &[u32]) -> Result<AnsTable> {
        let total: u32 = counts.iter().sum();
        if total == 0 {
            return Ok(AnsTable {
                info: vec![],
                slot_to_symbol: vec![],
            });
        }
        if total != ANS_TAB_SIZE {
            return Err(Error::InvalidHistogram);
        }
        let mut info = Vec::with_capacity(counts.len());
        let mut slot_to_symbol = vec![0u16; ANS_TAB_SIZE as usize];
        let mut cum = 0u32;
        for (symbol, &freq) in counts.iter().enumerate() {
            info.push(SymbolInfo { freq, cum });
            for slot in cum..cum + freq {
                slot_to_symbol[slot as usize] = symbol as u16;
            }
            cum += freq;
        }
        Ok(AnsTable {
            info,
            slot_to_symbol,
        })
    }

    pub fn alphabet_size(&self) -> usize {
        self.info.len()
    }

    fn symbol_info(&self, symbol: usize) -> Result<SymbolInfo> {
        let info = *self
            .info
            .get(symbol)
            .ok_or(Error::SymbolOutOfRange(symbol, self.info.len()))?;
        if info.freq == 0 {
            return Err(Error::SymbolOutOfRange(symbol, self.info.len()));
        }
        Ok(info)
    }
}

/// Encodes symbols in reverse order; `finish` hands back the stream in the
/// order the decoder consumes it.
pub struct AnsEncoder {
    state: u32,
    words: Vec<u16>,
}

impl Default for AnsEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AnsEncoder {
    pub fn new() -> AnsEncoder {
        AnsEncoder {
            state: STATE_LOW,
            words: vec![],
        }
    }

    /// Pushes one symbol. Call in reverse stream order.
    pub fn put(&mut self, table: &AnsTable, symbol: usize) {
        let info = table.symbol_info(symbol).expect("symbol must be in table");
        let state_limit = (info.freq as u64) << (32 - ANS_LOG_TAB_SIZE);
        while self.state as u64 >= state_limit {
            self.words.push((self.state & 0xffff) as u16);
            self.state >>= 16;
        }
        self.state =
            (self.state / info.freq) * ANS_TAB_SIZE + (self.state % info.freq) + info.cum;
    }

    /// Writes the final state and the renormalization words, front-to-back
    /// for the decoder. Streams that never moved the state (empty, or all
    /// single-symbol contexts) cost one bit instead of a full state word.
    pub fn finish(self, writer: &mut BitWriter) {
        write_varint(writer, self.words.len() as u32);
        if self.state == STATE_LOW {
            writer.write(1, 0);
        } else {
            writer.write(1, 1);
            writer.write(32, self.state as u64);
        }
        for word in self.words.iter().rev() {
            writer.write(16, *word as u64);
        }
    }
}

/// Decodes a symbol stream produced by `AnsEncoder`. The words are buffered
/// up front so extra bits can be interleaved behind them in the bitstream.
#[derive(Debug)]
pub struct AnsDecoder {
    state: u32,
    words: Vec<u16>,
    pos: usize,
}

impl AnsDecoder {
    pub fn init(br: &mut BitReader) -> Result<AnsDecoder> {
        let num_words = read_varint(br)? as usize;
        if num_words * 16 > br.total_bits_available() {
            return Err(Error::OutOfBounds);
        }
        let state = if br.read(1)? == 1 {
            br.read(32)? as u32
        } else {
            STATE_LOW
        };
        let mut words = Vec::new();
        words.try_reserve_exact(num_words)?;
        for _ in 0..num_words {
            words.push(br.read(16)? as u16);
        }
        Ok(AnsDecoder {
            state,
            words,
            pos: 0,
        })
    }

    pub fn read_symbol(&mut self, table: &AnsTable) -> Result<usize> {
        if table.slot_to_symbol.is_empty() {
            // Empty histogram: reading from this context is a stream error.
            return Err(Error::SymbolOutOfRange(0, 0));
        }
        let slot = self.state & (ANS_TAB_SIZE - 1);
        let symbol = table.slot_to_symbol[slot as usize];
        let info = table.info[symbol as usize];
        self.state = info.freq * (self.state >> ANS_LOG_TAB_SIZE) + slot - info.cum;
        while self.state < STATE_LOW {
            let word = *self.words.get(self.pos).ok_or(Error::OutOfBounds)?;
            self.pos += 1;
            self.state = (self.state << 16) | word as u32;
        }
        Ok(symbol as usize)
    }

    /// After the last symbol the state must be back at the encoder's initial
    /// value and every word consumed.
    pub fn check_final_state(&self) -> Result<()> {
        if self.state == STATE_LOW && self.pos == self.words.len() {
            Ok(())
        } else {
            Err(Error::AnsStateMismatch)
        }
    }
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;

    fn uniform_table(alphabet: u32) -> AnsTable {
        let base = ANS_TAB_SIZE / alphabet;
        let mut counts = vec![base; alphabet as usize];
        counts[0] += ANS_TAB_SIZE - base * alphabet;
        AnsTable::new(&counts).unwrap()
    }

    fn roundtrip(table: &AnsTable, symbols: &[usize]) {
        let mut enc = AnsEncoder::new();
        for &s in symbols.iter().rev() {
            enc.put(table, s);
        }
        let mut writer = BitWriter::new();
        enc.finish(&mut writer);
        let bytes = writer.finalize();

        let mut br = BitReader::new(&bytes);
        let mut dec = AnsDecoder::init(&mut br).unwrap();
        for &s in symbols {
            assert_eq!(dec.read_symbol(table).unwrap(), s);
        }
        dec.check_final_state().unwrap();
    }

    #[test]
    fn empty_stream() {
        let table = uniform_table(4);
        roundtrip(&table, &[]);
    }

    #[test]
    fn uniform_roundtrip() {
        let table = uniform_table(7);
        let symbols: Vec<usize> = (0..1000).map(|i| (i * 5) % 7).collect();
        roundtrip(&table, &symbols);
    }

    #[test]
    fn skewed_roundtrip() {
        let mut counts = vec![0u32; 5];
        counts[0] = ANS_TAB_SIZE - 10;
        counts[1] = 4;
        counts[3] = 5;
        counts[4] = 1;
        let table = AnsTable::new(&counts).unwrap();
        let symbols = [0usize, 0, 0, 1, 0, 3, 0, 0, 4, 0, 0, 1, 3, 0, 0];
        roundtrip(&table, &symbols);
    }

    #[test]
    fn single_symbol_costs_no_words() {
        let mut counts = vec![0u32; 3];
        counts[2] = ANS_TAB_SIZE;
        let table = AnsTable::new(&counts).unwrap();
        let mut enc = AnsEncoder::new();
        for _ in 0..100 {
            enc.put(&table, 2);
        }
        assert!(enc.words.is_empty());
        roundtrip(&table, &[2; 100]);
    }

    #[test]
    fn arbitrary_symbols_roundtrip() {
        arbtest::arbtest(|u| {
            let alphabet = u.int_in_range(1u32..=300)?;
            let table = uniform_table(alphabet);
            let symbols: Vec<usize> = (0..u.int_in_range(0usize..=400)?)
                .map(|_| u.int_in_range(0..=(alphabet - 1) as usize))
                .collect::<arbtest::arbitrary::Result<_>>()?;
            roundtrip(&table, &symbols);
            Ok(())
        });
    }

    #[test]
    fn bad_counts_rejected() {
        assert!(AnsTable::new(&[1, 2, 3]).is_err());
    }

    #[test]
    fn truncated_words_detected() {
        let table = uniform_table(3);
        let mut enc = AnsEncoder::new();
        for _ in 0..100 {
            enc.put(&table, 1);
        }
        let mut writer = BitWriter::new();
        enc.finish(&mut writer);
        let mut bytes = writer.finalize();
        bytes.truncate(bytes.len() - 8);
        let mut br = BitReader::new(&bytes);
        let mut result = Ok(());
        match AnsDecoder::init(&mut br) {
            Err(_) => {}
            Ok(mut dec) => {
                for _ in 0..100 {
                    if let Err(e) = dec.read_symbol(&table) {
                        result = Err(e);
                        break;
                    }
                }
                result = result.and(dec.check_final_state());
                assert!(result.is_err());
            }
        }
    }
}
