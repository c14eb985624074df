// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::{
    bit_reader::BitReader,
    bit_writer::BitWriter,
    error::{Error, Result},
    util::bit_length,
};

use super::ans::{AnsTable, ANS_TAB_SIZE};

/// Widest alphabet any context uses (fused run/size symbols).
pub const MAX_ALPHABET_SIZE: usize = 256;

const SHAPE_EMPTY: u64 = 0;
const SHAPE_SINGLE: u64 = 1;
const SHAPE_COUNTS: u64 = 2;

/// Raw symbol counts of one context (or one cluster of contexts).
#[derive(Clone, Debug, Default)]
pub struct Histogram {
    counts: Vec<u32>,
    total: u64,
}

impl Histogram {
    pub fn new() -> Histogram {
        Histogram::default()
    }

    pub fn add(&mut self, symbol: usize) {
        if symbol >= self.counts.len() {
            self.counts.resize(symbol + 1, 0);
        }
        self.counts[symbol] += 1;
        self.total += 1;
    }

    pub fn add_histogram(&mut self, other: &Histogram) {
        if other.counts.len() > self.counts.len() {
            self.counts.resize(other.counts.len(), 0);
        }
        for (a, b) in self.counts.iter_mut().zip(other.counts.iter()) {
            *a += b;
        }
        self.total += other.total;
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Shannon cost of coding the histogram's own symbols with its own
    /// distribution, in bits. Used by the clusterer.
    pub fn entropy_bits(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let total = self.total as f64;
        let mut bits = 0.0;
        for &c in self.counts.iter() {
            if c > 0 {
                bits += c as f64 * (total / c as f64).log2();
            }
        }
        bits
    }

    /// Estimated size of the serialized table, in bits.
    pub fn table_cost_bits(&self) -> f64 {
        let present = self.counts.iter().filter(|&&c| c > 0).count();
        match present {
            0 => 2.0,
            1 => 12.0,
            _ => 12.0 + self.counts.len() as f64 + 12.0 * present as f64,
        }
    }

    /// Scales the counts so they sum to exactly `ANS_TAB_SIZE`, keeping
    /// every present symbol above zero.
    fn normalize(&self) -> Vec<u32> {
        let mut normalized = vec![0u32; self.counts.len()];
        if self.total == 0 {
            return normalized;
        }
        let mut assigned = 0u32;
        let mut remainders: Vec<(usize, f64)> = vec![];
        for (i, &c) in self.counts.iter().enumerate() {
            if c == 0 {
                continue;
            }
            let ideal = c as f64 * ANS_TAB_SIZE as f64 / self.total as f64;
            let floor = (ideal as u32).max(1);
            normalized[i] = floor;
            assigned += floor;
            remainders.push((i, ideal - floor as f64));
        }
        // Distribute (or reclaim) the difference by largest remainder,
        // never dropping a present symbol to zero.
        remainders.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));
        let mut diff = ANS_TAB_SIZE as i64 - assigned as i64;
        let mut idx = 0;
        while diff > 0 {
            let (i, _) = remainders[idx % remainders.len()];
            normalized[i] += 1;
            diff -= 1;
            idx += 1;
        }
        idx = remainders.len();
        while diff < 0 {
            idx -= 1;
            let (i, _) = remainders[idx % remainders.len()];
            if normalized[i] > 1 {
                let take = (normalized[i] - 1).min((-diff) as u32);
                normalized[i] -= take;
                diff += take as i64;
            }
            if idx == 0 {
                idx = remainders.len();
            }
        }
        normalized
    }

    /// Writes the normalized counts and returns the matching coding table.
    pub fn write(&self, writer: &mut BitWriter) -> Result<AnsTable> {
        let normalized = self.normalize();
        let present = normalized.iter().filter(|&&c| c > 0).count();
        match present {
            0 => {
                writer.write(2, SHAPE_EMPTY);
            }
            1 => {
                let symbol = normalized.iter().position(|&c| c > 0).unwrap();
                writer.write(2, SHAPE_SINGLE);
                writer.write(10, symbol as u64);
            }
            _ => {
                writer.write(2, SHAPE_COUNTS);
                writer.write(10, normalized.len() as u64);
                for &c in normalized.iter() {
                    if c == 0 {
                        writer.write(1, 0);
                        continue;
                    }
                    writer.write(1, 1);
                    let len = bit_length(c);
                    writer.write(4, (len - 1) as u64);
                    if len > 1 {
                        writer.write(len as usize - 1, (c & ((1 << (len - 1)) - 1)) as u64);
                    }
                }
            }
        }
        AnsTable::new(&normalized)
    }

    pub fn read(br: &mut BitReader) -> Result<AnsTable> {
        match br.read(2)? {
            SHAPE_EMPTY => AnsTable::new(&[]),
            SHAPE_SINGLE => {
                let symbol = br.read(10)? as usize;
                if symbol >= MAX_ALPHABET_SIZE {
                    return Err(Error::SymbolOutOfRange(symbol, MAX_ALPHABET_SIZE));
                }
                let mut counts = vec![0u32; symbol + 1];
                counts[symbol] = ANS_TAB_SIZE;
                AnsTable::new(&counts)
            }
            SHAPE_COUNTS => {
                let alphabet_size = br.read(10)? as usize;
                if alphabet_size == 0 || alphabet_size > MAX_ALPHABET_SIZE {
                    return Err(Error::SymbolOutOfRange(alphabet_size, MAX_ALPHABET_SIZE));
                }
                let mut counts = vec![0u32; alphabet_size];
                for c in counts.iter_mut() {
                    if br.read(1)? == 0 {
                        continue;
                    }
                    let len = br.read(4)? as u32 + 1;
                    let low = if len > 1 {
                        br.read(len as usize - 1)? as u32
                    } else {
                        0
                    };
                    *c = (1 << (len - 1)) | low;
                }
                // AnsTable::new validates that the counts sum to the table
                // size, which catches corrupt streams here.
                AnsTable::new(&counts)
            }
            _ => Err(Error::InvalidHistogram),
        }
    }
}
