// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::sync::OnceLock;

use crate::{
    bit_reader::BitReader,
    bit_writer::BitWriter,
    error::{Error, Result},
    image::Image,
    BLOCK_DIM, BLOCK_SIZE,
};

pub const NUM_QUANT_TEMPLATES: u8 = 2;

/// Template for distances >= 1.0.
pub const QUANT_TEMPLATE_DEFAULT: u8 = 0;

/// Template for high-quality encodes (distance < 1.0): smaller base steps
/// and a flatter frequency ramp.
pub const QUANT_TEMPLATE_HQ: u8 = 1;

/// Base dequantization step of the lowest AC frequency per channel (X, Y, B)
/// at quant value 1.0, for each template.
const DEQUANT_BASE: [[f32; 3]; 2] = [[0.0065, 0.0145, 0.019], [0.0039, 0.0087, 0.0114]];

/// Per-template growth of the step with radial frequency kx + ky.
const DEQUANT_FREQ_RAMP: [[f32; 3]; 2] = [[0.42, 0.34, 0.38], [0.22, 0.18, 0.20]];

/// Step used for the DC coefficient per channel, before the DC quant scalar.
const DEQUANT_DC: [[f32; 3]; 2] = [[0.0042, 0.0094, 0.012], [0.0026, 0.0058, 0.0078]];

/// Largest admissible quant value; keeps every quantized coefficient
/// representable in the signed 16-bit coefficient planes even for the
/// smallest template steps.
pub const MAX_QUANT: f32 = 16.0;

const RAW_FIELD_MAX: i32 = 0xffff;

/// The global scale is stored as `code / 2^24` with an integer code, so the
/// same field always re-encodes to the bit-identical scale.
const SCALE_CODE_SHIFT: u32 = 24;
const SCALE_CODE_MAX: u32 = ((MAX_QUANT / RAW_FIELD_MAX as f32) * (1u32 << SCALE_CODE_SHIFT) as f32
    + 2.0) as u32;

/// The DC quant is stored as `code / 2^16`.
const DC_CODE_SHIFT: u32 = 16;
const DC_CODE_MAX: u32 = (MAX_QUANT as u32) << DC_CODE_SHIFT;

type DequantTables = [[[f32; BLOCK_SIZE]; 3]; NUM_QUANT_TEMPLATES as usize];

fn dequant_tables() -> &'static DequantTables {
    static TABLES: OnceLock<DequantTables> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut tables = [[[0.0; BLOCK_SIZE]; 3]; NUM_QUANT_TEMPLATES as usize];
        for (t, table) in tables.iter_mut().enumerate() {
            for (c, matrix) in table.iter_mut().enumerate() {
                for ky in 0..BLOCK_DIM {
                    for kx in 0..BLOCK_DIM {
                        let k = ky * BLOCK_DIM + kx;
                        matrix[k] = if k == 0 {
                            DEQUANT_DC[t][c]
                        } else {
                            DEQUANT_BASE[t][c] * (1.0 + DEQUANT_FREQ_RAMP[t][c] * (kx + ky) as f32)
                        };
                    }
                }
            }
        }
        tables
    })
}

/// Dequantization matrix of one channel of one template; entries are the
/// spatial-domain steps of quant value 1.0.
pub fn dequant_matrix(template: u8, c: usize) -> &'static [f32; BLOCK_SIZE] {
    &dequant_tables()[template as usize][c]
}

/// Holds the global DC scale and the per-block AC quant values. A quant value
/// is a precision multiplier: larger means finer steps and more bits.
pub struct Quantizer {
    template: u8,
    scale_code: u32,
    dc_code: u32,
    raw_quant_field: Image<i32>,
}

impl Quantizer {
    pub fn new(template: u8, block_xsize: usize, block_ysize: usize) -> Result<Quantizer> {
        if template >= NUM_QUANT_TEMPLATES {
            return Err(Error::InvalidQuantTemplate(template));
        }
        Ok(Quantizer {
            template,
            scale_code: 1,
            dc_code: 1 << DC_CODE_SHIFT,
            raw_quant_field: Image::new_constant((block_xsize, block_ysize), 1)?,
        })
    }

    pub fn template(&self) -> u8 {
        self.template
    }

    pub fn block_size(&self) -> (usize, usize) {
        self.raw_quant_field.size()
    }

    /// Applies a uniform quant value everywhere.
    pub fn set_quant(&mut self, quant: f32) -> Result<bool> {
        let field = Image::new_constant(self.raw_quant_field.size(), quant)?;
        Ok(self.set_quant_field(quant, &field))
    }

    /// Stores a new DC quant and AC quant field. Returns whether anything
    /// changed; the rate-control loop uses this to detect fixed points.
    pub fn set_quant_field(&mut self, quant_dc: f32, field: &Image<f32>) -> bool {
        assert_eq!(field.size(), self.raw_quant_field.size());
        let mut max_val = 0.0f32;
        for y in 0..field.ysize() {
            for &v in field.row(y) {
                max_val = max_val.max(v);
            }
        }
        let max_val = max_val.clamp(1e-4, MAX_QUANT);
        let scale_code = ((max_val as f64 / RAW_FIELD_MAX as f64)
            * (1u64 << SCALE_CODE_SHIFT) as f64)
            .round()
            .max(1.0) as u32;
        let scale_code = scale_code.min(SCALE_CODE_MAX);
        let global_scale = scale_code as f32 / (1u32 << SCALE_CODE_SHIFT) as f32;
        let dc_code = ((quant_dc.clamp(1e-4, MAX_QUANT) as f64
            * (1u64 << DC_CODE_SHIFT) as f64)
            .round()
            .max(1.0) as u32)
            .min(DC_CODE_MAX);
        let mut changed = scale_code != self.scale_code || dc_code != self.dc_code;
        for y in 0..field.ysize() {
            let row_in = field.row(y);
            let row_raw = self.raw_quant_field.row_mut(y);
            for x in 0..row_in.len() {
                let raw = (row_in[x] / global_scale).round() as i32;
                let raw = raw.clamp(1, RAW_FIELD_MAX);
                if raw != row_raw[x] {
                    row_raw[x] = raw;
                    changed = true;
                }
            }
        }
        self.scale_code = scale_code;
        self.dc_code = dc_code;
        changed
    }

    /// Reconstructs the float quant field currently stored.
    pub fn quant_field(&self) -> Result<(f32, Image<f32>)> {
        let (xsize, ysize) = self.raw_quant_field.size();
        let scale = self.scale();
        let mut field = Image::new((xsize, ysize))?;
        for y in 0..ysize {
            let row_raw = self.raw_quant_field.row(y);
            let row = field.row_mut(y);
            for x in 0..xsize {
                row[x] = row_raw[x] as f32 * scale;
            }
        }
        Ok((self.quant_dc(), field))
    }

    /// Global factor applied when the AC field is dequantized.
    pub fn scale(&self) -> f32 {
        self.scale_code as f32 / (1u32 << SCALE_CODE_SHIFT) as f32
    }

    fn quant_dc(&self) -> f32 {
        self.dc_code as f32 / (1u32 << DC_CODE_SHIFT) as f32
    }

    pub fn raw_quant_field(&self) -> &Image<i32> {
        &self.raw_quant_field
    }

    pub fn raw_quant(&self, bx: usize, by: usize) -> i32 {
        self.raw_quant_field.row(by)[bx]
    }

    /// Quant value of one block.
    pub fn block_quant(&self, bx: usize, by: usize) -> f32 {
        self.raw_quant_field.row(by)[bx] as f32 * self.scale()
    }

    /// Spatial-domain step of AC coefficient `k` in block (bx, by).
    pub fn ac_step(&self, c: usize, k: usize, bx: usize, by: usize) -> f32 {
        dequant_matrix(self.template, c)[k] / self.block_quant(bx, by)
    }

    /// Spatial-domain step of the DC coefficient.
    pub fn dc_step(&self, c: usize) -> f32 {
        dequant_matrix(self.template, c)[0] / self.quant_dc()
    }

    /// Writes the scalars; the raw field itself travels in its own
    /// entropy-coded section.
    pub fn write(&self, writer: &mut BitWriter) {
        writer.write(16, self.scale_code as u64);
        writer.write(24, self.dc_code as u64);
    }

    pub fn read_scalars(&mut self, br: &mut BitReader) -> Result<()> {
        let scale_code = br.read(16)? as u32;
        let dc_code = br.read(24)? as u32;
        if scale_code == 0 || scale_code > SCALE_CODE_MAX {
            return Err(Error::InvalidQuantValue(scale_code as i32));
        }
        if dc_code == 0 || dc_code > DC_CODE_MAX {
            return Err(Error::InvalidQuantValue(dc_code as i32));
        }
        self.scale_code = scale_code;
        self.dc_code = dc_code;
        Ok(())
    }

    /// Installs a raw field decoded from the bitstream.
    pub fn set_raw_quant_field(&mut self, field: Image<i32>) -> Result<()> {
        assert_eq!(field.size(), self.raw_quant_field.size());
        for y in 0..field.ysize() {
            for &v in field.row(y) {
                if !(1..=RAW_FIELD_MAX).contains(&v) {
                    return Err(Error::InvalidQuantValue(v));
                }
            }
        }
        self.raw_quant_field = field;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;

    #[test]
    fn dequant_entries_positive() {
        for t in 0..NUM_QUANT_TEMPLATES {
            for c in 0..3 {
                for &v in dequant_matrix(t, c).iter() {
                    assert!(v > 0.0);
                }
            }
        }
    }

    #[test]
    fn bad_template_rejected() {
        assert!(matches!(
            Quantizer::new(NUM_QUANT_TEMPLATES, 1, 1),
            Err(Error::InvalidQuantTemplate(_))
        ));
    }

    #[test]
    fn set_quant_field_idempotent() -> Result<()> {
        let mut quantizer = Quantizer::new(QUANT_TEMPLATE_DEFAULT, 4, 3)?;
        let mut field = Image::new((4, 3))?;
        for y in 0..3 {
            for x in 0..4 {
                field.row_mut(y)[x] = 0.5 + 0.25 * (x + y) as f32;
            }
        }
        assert!(quantizer.set_quant_field(1.25, &field));
        let (dc, stored) = quantizer.quant_field()?;
        assert!(!quantizer.set_quant_field(dc, &stored));
        let (dc2, stored2) = quantizer.quant_field()?;
        assert_eq!(dc.to_bits(), dc2.to_bits());
        for y in 0..3 {
            for x in 0..4 {
                assert_eq!(stored.row(y)[x].to_bits(), stored2.row(y)[x].to_bits());
            }
        }
        Ok(())
    }

    #[test]
    fn steps_follow_field() -> Result<()> {
        let mut quantizer = Quantizer::new(QUANT_TEMPLATE_DEFAULT, 2, 1)?;
        let mut field = Image::new((2, 1))?;
        field.row_mut(0)[0] = 1.0;
        field.row_mut(0)[1] = 2.0;
        quantizer.set_quant_field(1.0, &field);
        // Twice the quant value means half the step.
        let step0 = quantizer.ac_step(1, 9, 0, 0);
        let step1 = quantizer.ac_step(1, 9, 1, 0);
        assert!((step0 / step1 - 2.0).abs() < 0.01);
        Ok(())
    }
}
