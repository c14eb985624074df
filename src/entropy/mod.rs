// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Context-modeled tokenization of DC residuals and AC coefficients, and
//! the clustered-histogram ANS framework both travel through.

pub mod ans;
pub mod cluster;
pub mod histogram;

use crate::{
    bit_reader::BitReader,
    bit_writer::BitWriter,
    block_context::NUM_ORDER_CONTEXTS,
    coeff_order::CoeffOrders,
    error::{Error, Result},
    image::{Image, Image3},
    util::bit_length,
    BLOCK_SIZE,
};

use ans::{AnsDecoder, AnsEncoder, AnsTable};
use cluster::{cluster_histograms, read_context_map, write_context_map};
use histogram::Histogram;

/// Context budget of the DC side of the stream; the DC coder uses a
/// per-plane slice of it.
pub const NUM_DC_CONTEXTS: usize = 128;

const DC_CONTEXTS_PER_PLANE: usize = 17;

/// Nonzero-count contexts per order context.
pub const NUM_NZERO_CONTEXTS: usize = 32;

/// Zero-density contexts per order context: 8 nonzeros-remaining buckets
/// times 15 position buckets.
pub const NUM_ZERO_DENSITY_CONTEXTS: usize = 120;

pub const NUM_CONTEXTS: usize =
    NUM_DC_CONTEXTS + NUM_ORDER_CONTEXTS * (NUM_NZERO_CONTEXTS + NUM_ZERO_DENSITY_CONTEXTS);

/// Fused (run, size) alphabet, one nibble each, as in JPEG; 0xf0 skips a run
/// of 16 zeros without coding a value.
const ZRL_FUSED: u8 = 0xf0;

/// Reorders the fused symbols by decreasing population count (keeping the
/// first end-of-block symbol in place), so common symbols get low ids.
#[rustfmt::skip]
pub const INDEX_LUT: [u8; 256] = [
    0,   1,   2,   3,   5,   10,  17,  32,  68,  83,  84,  85,  86,  87,  88,
    89,  90,  4,   7,   12,  22,  31,  43,  60,  91,  92,  93,  94,  95,  96,
    97,  98,  99,  6,   14,  26,  36,  48,  66,  100, 101, 102, 103, 104, 105,
    106, 107, 108, 109, 8,   19,  34,  44,  57,  78,  110, 111, 112, 113, 114,
    115, 116, 117, 118, 119, 9,   27,  39,  52,  61,  79,  120, 121, 122, 123,
    124, 125, 126, 127, 128, 129, 11,  28,  41,  53,  64,  80,  130, 131, 132,
    133, 134, 135, 136, 137, 138, 139, 13,  33,  46,  63,  72,  140, 141, 142,
    143, 144, 145, 146, 147, 148, 149, 150, 15,  35,  47,  65,  69,  151, 152,
    153, 154, 155, 156, 157, 158, 159, 160, 161, 16,  37,  51,  62,  74,  162,
    163, 164, 165, 166, 167, 168, 169, 170, 171, 172, 18,  38,  50,  59,  75,
    173, 174, 175, 176, 177, 178, 179, 180, 181, 182, 183, 20,  40,  54,  76,
    82,  184, 185, 186, 187, 188, 189, 190, 191, 192, 193, 194, 23,  42,  55,
    77,  195, 196, 197, 198, 199, 200, 201, 202, 203, 204, 205, 206, 24,  45,
    56,  70,  207, 208, 209, 210, 211, 212, 213, 214, 215, 216, 217, 218, 25,
    49,  58,  71,  219, 220, 221, 222, 223, 224, 225, 226, 227, 228, 229, 230,
    29,  67,  81,  231, 232, 233, 234, 235, 236, 237, 238, 239, 240, 241, 242,
    21,  30,  73,  243, 244, 245, 246, 247, 248, 249, 250, 251, 252, 253, 254,
    255,
];

/// Inverse of `INDEX_LUT`: symbol id back to the fused (run, size) byte.
#[rustfmt::skip]
pub const SYMBOL_LUT: [u8; 256] = [
    0x00, 0x01, 0x02, 0x03, 0x11, 0x04, 0x21, 0x12, 0x31, 0x41, 0x05, 0x51,
    0x13, 0x61, 0x22, 0x71, 0x81, 0x06, 0x91, 0x32, 0xa1, 0xf0, 0x14, 0xb1,
    0xc1, 0xd1, 0x23, 0x42, 0x52, 0xe1, 0xf1, 0x15, 0x07, 0x62, 0x33, 0x72,
    0x24, 0x82, 0x92, 0x43, 0xa2, 0x53, 0xb2, 0x16, 0x34, 0xc2, 0x63, 0x73,
    0x25, 0xd2, 0x93, 0x83, 0x44, 0x54, 0xa3, 0xb3, 0xc3, 0x35, 0xd3, 0x94,
    0x17, 0x45, 0x84, 0x64, 0x55, 0x74, 0x26, 0xe2, 0x08, 0x75, 0xc4, 0xd4,
    0x65, 0xf2, 0x85, 0x95, 0xa4, 0xb4, 0x36, 0x46, 0x56, 0xe3, 0xa5, 0x09,
    0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f, 0x10, 0x18, 0x19, 0x1a, 0x1b, 0x1c,
    0x1d, 0x1e, 0x1f, 0x20, 0x27, 0x28, 0x29, 0x2a, 0x2b, 0x2c, 0x2d, 0x2e,
    0x2f, 0x30, 0x37, 0x38, 0x39, 0x3a, 0x3b, 0x3c, 0x3d, 0x3e, 0x3f, 0x40,
    0x47, 0x48, 0x49, 0x4a, 0x4b, 0x4c, 0x4d, 0x4e, 0x4f, 0x50, 0x57, 0x58,
    0x59, 0x5a, 0x5b, 0x5c, 0x5d, 0x5e, 0x5f, 0x60, 0x66, 0x67, 0x68, 0x69,
    0x6a, 0x6b, 0x6c, 0x6d, 0x6e, 0x6f, 0x70, 0x76, 0x77, 0x78, 0x79, 0x7a,
    0x7b, 0x7c, 0x7d, 0x7e, 0x7f, 0x80, 0x86, 0x87, 0x88, 0x89, 0x8a, 0x8b,
    0x8c, 0x8d, 0x8e, 0x8f, 0x90, 0x96, 0x97, 0x98, 0x99, 0x9a, 0x9b, 0x9c,
    0x9d, 0x9e, 0x9f, 0xa0, 0xa6, 0xa7, 0xa8, 0xa9, 0xaa, 0xab, 0xac, 0xad,
    0xae, 0xaf, 0xb0, 0xb5, 0xb6, 0xb7, 0xb8, 0xb9, 0xba, 0xbb, 0xbc, 0xbd,
    0xbe, 0xbf, 0xc0, 0xc5, 0xc6, 0xc7, 0xc8, 0xc9, 0xca, 0xcb, 0xcc, 0xcd,
    0xce, 0xcf, 0xd0, 0xd5, 0xd6, 0xd7, 0xd8, 0xd9, 0xda, 0xdb, 0xdc, 0xdd,
    0xde, 0xdf, 0xe0, 0xe4, 0xe5, 0xe6, 0xe7, 0xe8, 0xe9, 0xea, 0xeb, 0xec,
    0xed, 0xee, 0xef, 0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8, 0xf9, 0xfa, 0xfb,
    0xfc, 0xfd, 0xfe, 0xff,
];

/// Nonzeros-remaining bucket of the zero-density context.
#[rustfmt::skip]
const NZEROS_BUCKET: [u8; 64] = [
    0, 0, 1, 2, 3, 4, 4, 5, 5, 6, 6, 6, 6, 6, 6, 6, 6, 7, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
];

fn position_bucket(scan_index: usize) -> usize {
    debug_assert!((1..BLOCK_SIZE).contains(&scan_index));
    (scan_index - 1) * 15 / 63
}

fn zero_density_context(nzeros_remaining: usize, scan_index: usize) -> usize {
    NZEROS_BUCKET[nzeros_remaining.min(63)] as usize * 15 + position_bucket(scan_index)
}

fn nzeros_context(order_ctx: usize, predicted: usize) -> u32 {
    (NUM_DC_CONTEXTS + order_ctx * NUM_NZERO_CONTEXTS + predicted.min(NUM_NZERO_CONTEXTS - 1))
        as u32
}

fn ac_context(order_ctx: usize, zero_density: usize) -> u32 {
    (NUM_DC_CONTEXTS
        + NUM_ORDER_CONTEXTS * NUM_NZERO_CONTEXTS
        + order_ctx * NUM_ZERO_DENSITY_CONTEXTS
        + zero_density) as u32
}

fn dc_context(plane: usize, size_w: u32, size_n: u32) -> u32 {
    (plane * DC_CONTEXTS_PER_PLANE) as u32 + size_w.max(size_n).min(16)
}

/// (context, symbol, nbits, extra bits); symbols are entropy coded, the
/// extra bits travel verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Token {
    pub context: u32,
    pub symbol: u16,
    pub nbits: u8,
    pub bits: u16,
}

/// Splits a value into its bit-length category and sign-folded low bits.
fn value_category(v: i32) -> (u32, u16) {
    if v == 0 {
        return (0, 0);
    }
    let size = bit_length(v.unsigned_abs());
    let bits = if v > 0 {
        v as u32
    } else {
        (v + ((1i32 << size) - 1)) as u32
    };
    (size, (bits & ((1u32 << size) - 1)) as u16)
}

fn value_from_category(size: u32, bits: u32) -> i32 {
    if size == 0 {
        return 0;
    }
    if bits >> (size - 1) == 1 {
        bits as i32
    } else {
        bits as i32 - (1i32 << size) + 1
    }
}

// ---------------------------------------------------------------------------
// DC-style residual image coding (also used for the chroma-from-luma maps
// and the quantization field).

/// Tokenizes residual planes with causal neighbor-magnitude contexts.
/// `plane_offset` shifts the context band, so multiple sections can share a
/// context space without colliding.
pub fn tokenize_residual_planes(
    planes: &[&Image<i16>],
    plane_offset: usize,
    tokens: &mut Vec<Token>,
) {
    for (p, plane) in planes.iter().enumerate() {
        let (xsize, ysize) = plane.size();
        for y in 0..ysize {
            for x in 0..xsize {
                let size_w = if x > 0 {
                    bit_length(plane.row(y)[x - 1].unsigned_abs() as u32)
                } else {
                    0
                };
                let size_n = if y > 0 {
                    bit_length(plane.row(y - 1)[x].unsigned_abs() as u32)
                } else {
                    0
                };
                let (size, bits) = value_category(plane.row(y)[x] as i32);
                tokens.push(Token {
                    context: dc_context(p + plane_offset, size_w, size_n),
                    symbol: size as u16,
                    nbits: size as u8,
                    bits,
                });
            }
        }
    }
}

/// Inverse of `tokenize_residual_planes`.
pub fn decode_residual_planes(
    planes: &mut [&mut Image<i16>],
    plane_offset: usize,
    reader: &mut TokenReader,
    br: &mut BitReader,
) -> Result<()> {
    for (p, plane) in planes.iter_mut().enumerate() {
        let (xsize, ysize) = plane.size();
        for y in 0..ysize {
            for x in 0..xsize {
                let size_w = if x > 0 {
                    bit_length(plane.row(y)[x - 1].unsigned_abs() as u32)
                } else {
                    0
                };
                let size_n = if y > 0 {
                    bit_length(plane.row(y - 1)[x].unsigned_abs() as u32)
                } else {
                    0
                };
                let context = dc_context(p + plane_offset, size_w, size_n);
                let size = reader.read_symbol(br, context)? as u32;
                if size > 16 {
                    return Err(Error::SymbolOutOfRange(size as usize, 17));
                }
                let bits = reader.read_extra(br, size as usize)?;
                plane.row_mut(y)[x] = value_from_category(size, bits.into()) as i16;
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// AC coefficient coding.

/// Per-position magnitude totals per order context, input to
/// `compute_coeff_order`.
pub fn accumulate_order_stats(
    coeffs: &Image3<i16>,
    block_ctx: &Image3<u8>,
    stats: &mut [[u64; BLOCK_SIZE]; NUM_ORDER_CONTEXTS],
) {
    let block_ysize = coeffs.ysize();
    let block_xsize = coeffs.xsize() / BLOCK_SIZE;
    for c in 0..3 {
        for by in 0..block_ysize {
            let row = coeffs.row(c, by);
            let ctx_row = block_ctx.row(c, by);
            for bx in 0..block_xsize {
                let order_ctx = ctx_row[bx] as usize;
                let block = &row[bx * BLOCK_SIZE..(bx + 1) * BLOCK_SIZE];
                for (k, &v) in block.iter().enumerate().skip(1) {
                    stats[order_ctx][k] += v.unsigned_abs() as u64;
                }
            }
        }
    }
}

fn predicted_nzeros(nzeros_map: &Image3<i32>, c: usize, bx: usize, by: usize) -> usize {
    match (bx > 0, by > 0) {
        (true, true) => {
            ((nzeros_map.row(c, by)[bx - 1] + nzeros_map.row(c, by - 1)[bx] + 1) / 2) as usize
        }
        (true, false) => nzeros_map.row(c, by)[bx - 1] as usize,
        (false, true) => nzeros_map.row(c, by - 1)[bx] as usize,
        (false, false) => 0,
    }
}

/// Emits the token stream of the AC coefficients: per block and channel the
/// number of nonzeros, then fused (run, size) symbols in scan order. The DC
/// position of each block is ignored (coded separately).
pub fn tokenize_coefficients(
    coeffs: &Image3<i16>,
    block_ctx: &Image3<u8>,
    orders: &CoeffOrders,
    tokens: &mut Vec<Token>,
) -> Result<()> {
    let block_ysize = coeffs.ysize();
    let block_xsize = coeffs.xsize() / BLOCK_SIZE;
    let mut nzeros_map = Image3::<i32>::new((block_xsize.max(1), block_ysize.max(1)))?;
    for by in 0..block_ysize {
        for bx in 0..block_xsize {
            for c in 0..3 {
                let order_ctx = block_ctx.row(c, by)[bx] as usize;
                let order = &orders[order_ctx];
                let block = &coeffs.row(c, by)[bx * BLOCK_SIZE..(bx + 1) * BLOCK_SIZE];
                let nzeros = order[1..].iter().filter(|&&k| block[k] != 0).count();
                let predicted = predicted_nzeros(&nzeros_map, c, bx, by);
                tokens.push(Token {
                    context: nzeros_context(order_ctx, predicted),
                    symbol: nzeros as u16,
                    nbits: 0,
                    bits: 0,
                });
                nzeros_map.row_mut(c, by)[bx] = nzeros as i32;

                let mut remaining = nzeros;
                let mut i = 1;
                while remaining > 0 {
                    let mut run = 0usize;
                    while block[order[i + run]] == 0 {
                        run += 1;
                    }
                    while run >= 16 {
                        tokens.push(Token {
                            context: ac_context(
                                order_ctx,
                                zero_density_context(remaining, i),
                            ),
                            symbol: INDEX_LUT[ZRL_FUSED as usize] as u16,
                            nbits: 0,
                            bits: 0,
                        });
                        i += 16;
                        run -= 16;
                    }
                    let (size, bits) = value_category(block[order[i + run]] as i32);
                    debug_assert!(size >= 1 && size <= 15);
                    let fused = ((run as u32) << 4 | size) as usize;
                    tokens.push(Token {
                        context: ac_context(order_ctx, zero_density_context(remaining, i)),
                        symbol: INDEX_LUT[fused] as u16,
                        nbits: size as u8,
                        bits,
                    });
                    i += run + 1;
                    remaining -= 1;
                }
            }
        }
    }
    Ok(())
}

/// Inverse of `tokenize_coefficients`; fills the AC positions of `coeffs`
/// (the DC slot of every block is left at zero).
pub fn decode_coefficients(
    coeffs: &mut Image3<i16>,
    block_ctx: &Image3<u8>,
    orders: &CoeffOrders,
    reader: &mut TokenReader,
    br: &mut BitReader,
) -> Result<()> {
    let block_ysize = coeffs.ysize();
    let block_xsize = coeffs.xsize() / BLOCK_SIZE;
    let mut nzeros_map = Image3::<i32>::new((block_xsize.max(1), block_ysize.max(1)))?;
    for by in 0..block_ysize {
        for bx in 0..block_xsize {
            for c in 0..3 {
                let order_ctx = block_ctx.row(c, by)[bx] as usize;
                let order = &orders[order_ctx];
                let predicted = predicted_nzeros(&nzeros_map, c, bx, by);
                let nzeros =
                    reader.read_symbol(br, nzeros_context(order_ctx, predicted))? as usize;
                if nzeros >= BLOCK_SIZE {
                    return Err(Error::SymbolOutOfRange(nzeros, BLOCK_SIZE));
                }
                nzeros_map.row_mut(c, by)[bx] = nzeros as i32;

                let block = &mut coeffs.row_mut(c, by)[bx * BLOCK_SIZE..(bx + 1) * BLOCK_SIZE];
                let mut remaining = nzeros;
                let mut i = 1usize;
                while remaining > 0 {
                    if i >= BLOCK_SIZE {
                        return Err(Error::RunOutOfBlock);
                    }
                    let context = ac_context(order_ctx, zero_density_context(remaining, i));
                    let symbol = reader.read_symbol(br, context)?;
                    if symbol >= 256 {
                        return Err(Error::SymbolOutOfRange(symbol, 256));
                    }
                    let fused = SYMBOL_LUT[symbol];
                    let run = (fused >> 4) as usize;
                    let size = (fused & 0xf) as u32;
                    if size == 0 {
                        // Zero-run symbol: skip 16 positions. A coefficient
                        // must still follow inside the block.
                        if run != 15 || i + 16 >= BLOCK_SIZE {
                            return Err(Error::RunOutOfBlock);
                        }
                        i += 16;
                        continue;
                    }
                    i += run;
                    if i >= BLOCK_SIZE {
                        return Err(Error::RunOutOfBlock);
                    }
                    let bits = reader.read_extra(br, size as usize)?;
                    block[order[i]] = value_from_category(size, bits.into()) as i16;
                    i += 1;
                    remaining -= 1;
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Section framing: clustered histograms plus one or more token streams.

/// Builds histograms over every stream, clusters them, and writes the
/// context map and tables. Returns what `write_tokens` needs.
pub fn build_and_encode_histograms(
    num_contexts: usize,
    streams: &[&[Token]],
    writer: &mut BitWriter,
) -> Result<(Vec<AnsTable>, Vec<u8>)> {
    let mut histograms = vec![Histogram::new(); num_contexts];
    for stream in streams {
        for token in stream.iter() {
            histograms[token.context as usize].add(token.symbol as usize);
        }
    }
    let (clustered, context_map) = cluster_histograms(&histograms);
    write_context_map(&context_map, clustered.len(), writer);
    let mut tables = Vec::with_capacity(clustered.len());
    for hist in clustered.iter() {
        tables.push(hist.write(writer)?);
    }
    Ok((tables, context_map))
}

/// Fast-mode variant: skips clustering and codes every context with one
/// shared histogram. Larger streams, much less encode work.
pub fn build_and_encode_histograms_fast(
    num_contexts: usize,
    streams: &[&[Token]],
    writer: &mut BitWriter,
) -> Result<(Vec<AnsTable>, Vec<u8>)> {
    let mut merged = Histogram::new();
    for stream in streams {
        for token in stream.iter() {
            merged.add(token.symbol as usize);
        }
    }
    let context_map = vec![0u8; num_contexts];
    write_context_map(&context_map, 1, writer);
    let table = merged.write(writer)?;
    Ok((vec![table], context_map))
}

/// Writes one token stream: ANS-coded symbols (back-to-front), then the
/// extra bits in forward order.
pub fn write_tokens(
    tokens: &[Token],
    tables: &[AnsTable],
    context_map: &[u8],
    writer: &mut BitWriter,
) {
    let mut encoder = AnsEncoder::new();
    for token in tokens.iter().rev() {
        let cluster = context_map[token.context as usize] as usize;
        encoder.put(&tables[cluster], token.symbol as usize);
    }
    encoder.finish(writer);
    for token in tokens.iter() {
        writer.write(token.nbits as usize, token.bits as u64);
    }
}

/// Clustered tables plus context map, decoded from a section header.
pub struct SectionTables {
    pub tables: Vec<AnsTable>,
    pub context_map: Vec<u8>,
}

impl SectionTables {
    pub fn decode(num_contexts: usize, br: &mut BitReader) -> Result<SectionTables> {
        let (num_clusters, context_map) = read_context_map(num_contexts, br)?;
        let mut tables = Vec::with_capacity(num_clusters);
        for _ in 0..num_clusters {
            tables.push(Histogram::read(br)?);
        }
        Ok(SectionTables {
            tables,
            context_map,
        })
    }

    pub fn reader(&self, br: &mut BitReader) -> Result<TokenReader<'_>> {
        Ok(TokenReader {
            tables: &self.tables,
            context_map: &self.context_map,
            ans: AnsDecoder::init(br)?,
        })
    }
}

/// Front-to-back reader over one token stream.
pub struct TokenReader<'a> {
    tables: &'a [AnsTable],
    context_map: &'a [u8],
    ans: AnsDecoder,
}

impl<'a> TokenReader<'a> {
    pub fn read_symbol(&mut self, _br: &mut BitReader, context: u32) -> Result<usize> {
        let cluster = *self
            .context_map
            .get(context as usize)
            .ok_or(Error::ContextOutOfRange(context as usize, self.context_map.len()))?
            as usize;
        self.ans.read_symbol(&self.tables[cluster])
    }

    pub fn read_extra(&mut self, br: &mut BitReader, nbits: usize) -> Result<u16> {
        Ok(br.read(nbits)? as u16)
    }

    pub fn finish(self) -> Result<()> {
        self.ans.check_final_state()
    }
}

/// Encodes residual planes as a self-contained section (histograms followed
/// by one token stream), byte-aligned at the end.
pub fn encode_residual_section(planes: &[&Image<i16>], writer: &mut BitWriter) -> Result<()> {
    let mut tokens = vec![];
    tokenize_residual_planes(planes, 0, &mut tokens);
    let num_contexts = planes.len() * DC_CONTEXTS_PER_PLANE;
    let (tables, context_map) = build_and_encode_histograms(num_contexts, &[&tokens], writer)?;
    write_tokens(&tokens, &tables, &context_map, writer);
    writer.zero_pad_to_byte();
    Ok(())
}

pub fn decode_residual_section(
    planes: &mut [&mut Image<i16>],
    br: &mut BitReader,
) -> Result<()> {
    let num_contexts = planes.len() * DC_CONTEXTS_PER_PLANE;
    let tables = SectionTables::decode(num_contexts, br)?;
    let mut reader = tables.reader(br)?;
    decode_residual_planes(planes, 0, &mut reader, br)?;
    reader.finish()?;
    br.jump_to_byte_boundary()
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;
    use crate::coeff_order::natural_orders;

    #[test]
    fn luts_are_inverses() {
        for s in 0..256 {
            assert_eq!(INDEX_LUT[SYMBOL_LUT[s] as usize] as usize, s);
        }
    }

    #[test]
    fn value_category_roundtrip() {
        for v in -40000i32..=40000 {
            let (size, bits) = value_category(v);
            assert!(size <= 16);
            assert_eq!(value_from_category(size, bits as u32), v, "value {v}");
        }
    }

    #[test]
    fn residual_planes_roundtrip() -> Result<()> {
        use rand::SeedableRng;
        let mut rng = rand::rngs::SmallRng::seed_from_u64(99);
        let planes = Image3::<i16>::new_random((13, 7), &mut rng)?;
        let refs = [planes.plane(0), planes.plane(1), planes.plane(2)];
        let mut writer = BitWriter::new();
        encode_residual_section(&refs, &mut writer)?;
        let bytes = writer.finalize();

        let mut out = Image3::<i16>::new((13, 7))?;
        let mut br = BitReader::new(&bytes);
        let [p0, p1, p2] = out.planes_mut();
        decode_residual_section(&mut [p0, p1, p2], &mut br)?;
        for c in 0..3 {
            for y in 0..7 {
                assert_eq!(planes.row(c, y), out.row(c, y));
            }
        }
        Ok(())
    }

    #[test]
    fn coefficients_roundtrip() -> Result<()> {
        let block_xsize = 4;
        let block_ysize = 3;
        let mut coeffs = Image3::<i16>::new((block_xsize * BLOCK_SIZE, block_ysize))?;
        let mut block_ctx = Image3::<u8>::new((block_xsize, block_ysize))?;
        for c in 0..3 {
            for by in 0..block_ysize {
                for bx in 0..block_xsize {
                    block_ctx.row_mut(c, by)[bx] = ((bx + by + c) % NUM_ORDER_CONTEXTS) as u8;
                    let row = coeffs.row_mut(c, by);
                    let block = &mut row[bx * BLOCK_SIZE..(bx + 1) * BLOCK_SIZE];
                    // A few nonzeros scattered through the block, including
                    // long zero runs.
                    block[1] = 13;
                    block[5] = -2;
                    if bx % 2 == 0 {
                        block[40] = 1;
                        block[63] = -900;
                    }
                }
            }
        }
        let orders = natural_orders();
        let mut tokens = vec![];
        tokenize_coefficients(&coeffs, &block_ctx, &orders, &mut tokens)?;

        let mut writer = BitWriter::new();
        let (tables, context_map) =
            build_and_encode_histograms(NUM_CONTEXTS, &[&tokens], &mut writer)?;
        write_tokens(&tokens, &tables, &context_map, &mut writer);
        let bytes = writer.finalize();

        let mut br = BitReader::new(&bytes);
        let section = SectionTables::decode(NUM_CONTEXTS, &mut br)?;
        let mut reader = section.reader(&mut br)?;
        let mut decoded = Image3::<i16>::new((block_xsize * BLOCK_SIZE, block_ysize))?;
        decode_coefficients(&mut decoded, &block_ctx, &orders, &mut reader, &mut br)?;
        reader.finish()?;

        for c in 0..3 {
            for by in 0..block_ysize {
                assert_eq!(coeffs.row(c, by), decoded.row(c, by));
            }
        }
        Ok(())
    }

    #[test]
    fn zero_density_contexts_cover_the_declared_range() {
        let mut max_ctx = 0;
        for nz in 1..64 {
            for i in 1..64 {
                max_ctx = max_ctx.max(zero_density_context(nz, i));
            }
        }
        assert!(max_ctx < NUM_ZERO_DENSITY_CONTEXTS);
        assert_eq!(NUM_CONTEXTS, 128 + 6 * (32 + 120));
    }
}
