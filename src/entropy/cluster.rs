// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::{
    bit_reader::BitReader,
    bit_writer::{read_varint, write_varint, BitWriter},
    error::{Error, Result},
};

use super::histogram::Histogram;

pub const MAX_CLUSTERS: usize = 64;

/// Merging two contexts is accepted while the joint coding cost grows by
/// less than this many bits; a merge also saves one serialized table.
const MERGE_COST_THRESHOLD_BITS: f64 = 56.0;

fn cost_bits(hist: &Histogram) -> f64 {
    hist.entropy_bits() + hist.table_cost_bits()
}

/// Greedily merges per-context histograms into at most `MAX_CLUSTERS`
/// clusters. Returns the clustered histograms and a byte per context
/// assigning it to its cluster.
pub fn cluster_histograms(histograms: &[Histogram]) -> (Vec<Histogram>, Vec<u8>) {
    let mut clusters: Vec<Histogram> = vec![];
    let mut cluster_costs: Vec<f64> = vec![];
    let mut context_map = vec![0u8; histograms.len()];
    let mut empty_cluster: Option<usize> = None;

    for (ctx, hist) in histograms.iter().enumerate() {
        if hist.is_empty() {
            // All unused contexts share one (possibly nonempty) cluster;
            // they never code a symbol, so any assignment decodes the same.
            let cluster = *empty_cluster.get_or_insert_with(|| {
                clusters.push(Histogram::new());
                cluster_costs.push(0.0);
                clusters.len() - 1
            });
            context_map[ctx] = cluster as u8;
            continue;
        }
        let own_cost = cost_bits(hist);
        let mut best: Option<(usize, f64)> = None;
        for (cluster, merged_into) in clusters.iter().enumerate() {
            let mut merged = merged_into.clone();
            merged.add_histogram(hist);
            let increase = cost_bits(&merged) - cluster_costs[cluster];
            if best.is_none_or(|(_, best_increase)| increase < best_increase) {
                best = Some((cluster, increase));
                // A merge this close to the context's own entropy cannot be
                // beaten meaningfully; stop scanning.
                if increase <= hist.entropy_bits() + 1.0 {
                    break;
                }
            }
        }
        match best {
            Some((cluster, increase))
                if increase < own_cost + MERGE_COST_THRESHOLD_BITS
                    || clusters.len() >= MAX_CLUSTERS =>
            {
                clusters[cluster].add_histogram(hist);
                cluster_costs[cluster] = cost_bits(&clusters[cluster]);
                context_map[ctx] = cluster as u8;
            }
            _ => {
                clusters.push(hist.clone());
                cluster_costs.push(own_cost);
                context_map[ctx] = (clusters.len() - 1) as u8;
            }
        }
    }
    if clusters.is_empty() {
        clusters.push(Histogram::new());
    }
    (clusters, context_map)
}

/// Run-length encoded context map: (cluster id, run length) pairs. A map
/// with a single cluster costs no bits beyond the cluster count.
pub fn write_context_map(context_map: &[u8], num_clusters: usize, writer: &mut BitWriter) {
    write_varint(writer, num_clusters as u32);
    if num_clusters <= 1 {
        return;
    }
    let mut i = 0;
    while i < context_map.len() {
        let id = context_map[i];
        let mut run = 1;
        while i + run < context_map.len() && context_map[i + run] == id {
            run += 1;
        }
        writer.write(6, id as u64);
        write_varint(writer, (run - 1) as u32);
        i += run;
    }
}

pub fn read_context_map(num_contexts: usize, br: &mut BitReader) -> Result<(usize, Vec<u8>)> {
    let num_clusters = read_varint(br)? as usize;
    if num_clusters == 0 || num_clusters > MAX_CLUSTERS {
        return Err(Error::InvalidContextMap(
            num_clusters as u32,
            MAX_CLUSTERS as u32,
        ));
    }
    if num_clusters == 1 {
        return Ok((1, vec![0u8; num_contexts]));
    }
    let mut context_map = Vec::new();
    context_map.try_reserve_exact(num_contexts)?;
    while context_map.len() < num_contexts {
        let id = br.read(6)? as u8;
        if id as usize >= num_clusters {
            return Err(Error::InvalidContextMap(id as u32, num_clusters as u32));
        }
        let run = read_varint(br)? as usize + 1;
        if context_map.len() + run > num_contexts {
            return Err(Error::InvalidContextMap(run as u32, num_clusters as u32));
        }
        context_map.extend(std::iter::repeat(id).take(run));
    }
    Ok((num_clusters, context_map))
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;

    fn histogram_of(symbols: &[usize]) -> Histogram {
        let mut hist = Histogram::new();
        for &s in symbols {
            hist.add(s);
        }
        hist
    }

    #[test]
    fn identical_contexts_merge() {
        let histograms: Vec<Histogram> =
            (0..10).map(|_| histogram_of(&[1, 1, 2, 3, 1])).collect();
        let (clusters, map) = cluster_histograms(&histograms);
        assert_eq!(clusters.len(), 1);
        assert!(map.iter().all(|&id| id == 0));
    }

    #[test]
    fn wildly_different_contexts_stay_apart() {
        let mut histograms = vec![Histogram::new(); 2];
        for _ in 0..2000 {
            histograms[0].add(0);
            histograms[1].add(200);
        }
        let (clusters, map) = cluster_histograms(&histograms);
        assert_eq!(clusters.len(), 2);
        assert_ne!(map[0], map[1]);
    }

    #[test]
    fn empty_contexts_share_a_cluster() {
        let mut histograms = vec![Histogram::new(); 100];
        histograms[50] = histogram_of(&[5, 5, 5]);
        let (clusters, map) = cluster_histograms(&histograms);
        assert!(clusters.len() <= 2);
        assert_eq!(map[0], map[99]);
    }

    #[test]
    fn cluster_count_is_bounded() {
        let mut histograms = vec![];
        for i in 0..200 {
            let mut hist = Histogram::new();
            for _ in 0..1000 {
                hist.add(i);
            }
            histograms.push(hist);
        }
        let (clusters, _) = cluster_histograms(&histograms);
        assert!(clusters.len() <= MAX_CLUSTERS);
    }

    #[test]
    fn context_map_roundtrip() {
        let map = vec![0u8, 0, 1, 1, 1, 2, 0, 0, 3, 3];
        let mut writer = BitWriter::new();
        write_context_map(&map, 4, &mut writer);
        let bytes = writer.finalize();
        let (num_clusters, decoded) =
            read_context_map(map.len(), &mut BitReader::new(&bytes)).unwrap();
        assert_eq!(num_clusters, 4);
        assert_eq!(decoded, map);
    }

    #[test]
    fn trivial_context_map_costs_nothing() {
        let map = vec![0u8; 1040];
        let mut writer = BitWriter::new();
        write_context_map(&map, 1, &mut writer);
        assert!(writer.total_bits_written() <= 6);
    }
}
