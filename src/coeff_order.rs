// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::{
    bit_reader::BitReader,
    bit_writer::BitWriter,
    block_context::NUM_ORDER_CONTEXTS,
    error::{Error, Result},
    util::CeilLog2,
    BLOCK_SIZE,
};

/// Zig-zag scan, position of the i-th coefficient in decreasing expected
/// magnitude for typical content.
#[rustfmt::skip]
pub const NATURAL_COEFF_ORDER: [usize; BLOCK_SIZE] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5, 12, 19, 26, 33, 40,
    48, 41, 34, 27, 20, 13, 6, 7, 14, 21, 28, 35, 42, 49, 56, 57, 50, 43, 36,
    29, 22, 15, 23, 30, 37, 44, 51, 58, 59, 52, 45, 38, 31, 39, 46, 53, 60, 61,
    54, 47, 55, 62, 63,
];

/// One coefficient scan order per order context.
pub type CoeffOrders = [[usize; BLOCK_SIZE]; NUM_ORDER_CONTEXTS];

pub fn natural_orders() -> CoeffOrders {
    [NATURAL_COEFF_ORDER; NUM_ORDER_CONTEXTS]
}

/// Derives a per-context scan from observed statistics: positions sorted by
/// decreasing total magnitude, DC kept in place, ties resolved toward the
/// natural order so near-uniform statistics reproduce it.
pub fn compute_coeff_order(stats: &[[u64; BLOCK_SIZE]; NUM_ORDER_CONTEXTS]) -> CoeffOrders {
    let mut natural_rank = [0usize; BLOCK_SIZE];
    for (rank, &pos) in NATURAL_COEFF_ORDER.iter().enumerate() {
        natural_rank[pos] = rank;
    }
    let mut orders = natural_orders();
    for (ctx, order) in orders.iter_mut().enumerate() {
        let mut positions: Vec<usize> = (1..BLOCK_SIZE).collect();
        positions
            .sort_by_key(|&pos| (std::cmp::Reverse(stats[ctx][pos]), natural_rank[pos]));
        order[0] = 0;
        order[1..].copy_from_slice(&positions);
    }
    orders
}

fn lehmer_bit_width(remaining: usize) -> usize {
    remaining.ceil_log2()
}

/// Writes one scan order; the identity case (natural order) costs one bit.
pub fn encode_coeff_order(order: &[usize; BLOCK_SIZE], writer: &mut BitWriter) {
    if *order == NATURAL_COEFF_ORDER {
        writer.write(1, 0);
        return;
    }
    writer.write(1, 1);
    // Lehmer code of the permutation, skipping the fixed DC slot.
    let mut pool: Vec<usize> = (1..BLOCK_SIZE).collect();
    for i in 1..BLOCK_SIZE {
        let idx = pool.iter().position(|&p| p == order[i]).unwrap();
        writer.write(lehmer_bit_width(pool.len()), idx as u64);
        pool.remove(idx);
    }
}

pub fn decode_coeff_order(br: &mut BitReader) -> Result<[usize; BLOCK_SIZE]> {
    if br.read(1)? == 0 {
        return Ok(NATURAL_COEFF_ORDER);
    }
    let mut order = [0usize; BLOCK_SIZE];
    let mut pool: Vec<usize> = (1..BLOCK_SIZE).collect();
    for i in 1..BLOCK_SIZE {
        let idx = br.read(lehmer_bit_width(pool.len()))? as usize;
        if idx >= pool.len() {
            return Err(Error::InvalidLehmerCode(idx as u32, i));
        }
        order[i] = pool.remove(idx);
    }
    Ok(order)
}

pub fn encode_coeff_orders(orders: &CoeffOrders, writer: &mut BitWriter) {
    for order in orders.iter() {
        encode_coeff_order(order, writer);
    }
}

pub fn decode_coeff_orders(br: &mut BitReader) -> Result<CoeffOrders> {
    let mut orders = natural_orders();
    for order in orders.iter_mut() {
        *order = decode_coeff_order(br)?;
    }
    Ok(orders)
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;

    #[test]
    fn natural_order_is_permutation() {
        let mut seen = [false; BLOCK_SIZE];
        for &pos in NATURAL_COEFF_ORDER.iter() {
            assert!(!seen[pos]);
            seen[pos] = true;
        }
    }

    #[test]
    fn natural_order_costs_one_bit() {
        let mut writer = BitWriter::new();
        encode_coeff_order(&NATURAL_COEFF_ORDER, &mut writer);
        assert_eq!(writer.total_bits_written(), 1);
    }

    #[test]
    fn custom_order_roundtrip() -> Result<()> {
        let mut order = NATURAL_COEFF_ORDER;
        order[1..].reverse();
        let mut writer = BitWriter::new();
        encode_coeff_order(&order, &mut writer);
        let bytes = writer.finalize();
        let decoded = decode_coeff_order(&mut BitReader::new(&bytes))?;
        assert_eq!(decoded, order);
        Ok(())
    }

    #[test]
    fn uniform_stats_reproduce_natural_order() {
        let stats = [[7u64; BLOCK_SIZE]; NUM_ORDER_CONTEXTS];
        let orders = compute_coeff_order(&stats);
        for order in orders.iter() {
            assert_eq!(*order, NATURAL_COEFF_ORDER);
        }
    }

    #[test]
    fn computed_order_sorts_by_magnitude() {
        let mut stats = [[0u64; BLOCK_SIZE]; NUM_ORDER_CONTEXTS];
        stats[2][63] = 100;
        stats[2][5] = 50;
        let orders = compute_coeff_order(&stats);
        assert_eq!(orders[2][0], 0);
        assert_eq!(orders[2][1], 63);
        assert_eq!(orders[2][2], 5);
    }
}
