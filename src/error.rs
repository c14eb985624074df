// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::collections::TryReserveError;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // InvalidArgument
    #[error("Invalid image size: {0}x{1}")]
    InvalidImageSize(usize, usize),
    #[error("Negative butteraugli distance without a size target")]
    NegativeDistance,
    #[error("Rect out of bounds: {0}x{1}+{2}+{3} rect in {4}x{5} view")]
    RectOutOfBounds(usize, usize, usize, usize, usize, usize),
    #[error("Copy of different size: {0}x{1} into {2}x{3}")]
    CopyOfDifferentSize(usize, usize, usize, usize),

    // InvalidBitstream
    #[error("Invalid signature {0:08x}")]
    InvalidSignature(u32),
    #[error("Unsupported bitstream version {0}")]
    UnsupportedVersion(u8),
    #[error("Unknown bitstream kind {0}")]
    UnknownBitstreamKind(u8),
    #[error("Invalid quant template {0}")]
    InvalidQuantTemplate(u8),
    #[error("Invalid quantization field value {0}")]
    InvalidQuantValue(i32),
    #[error("Non-zero padding bits")]
    NonZeroPadding,

    // Truncated
    #[error("Read out of bounds")]
    OutOfBounds,

    // SizeLimitExceeded
    #[error("Image size too large: {0}x{1}")]
    ImageSizeTooLarge(usize, usize),
    #[error("Pixel count {0} over caller limit {1}")]
    TooManyPixels(u64, u64),

    // DecodeConsistency
    #[error("Context id {0} out of range (max {1})")]
    ContextOutOfRange(usize, usize),
    #[error("Invalid context map: cluster id {0}, number of clusters {1}")]
    InvalidContextMap(u32, u32),
    #[error("Symbol {0} over alphabet size {1}")]
    SymbolOutOfRange(usize, usize),
    #[error("Histogram counts do not sum to the ANS table size")]
    InvalidHistogram,
    #[error("ANS stream left in an inconsistent final state")]
    AnsStateMismatch,
    #[error("Invalid Lehmer code value {0} at index {1}")]
    InvalidLehmerCode(u32, usize),
    #[error("Coefficient run crosses the end of a block")]
    RunOutOfBlock,

    // Unsupported
    #[error("Brunsli transcoded bitstreams are not supported")]
    BrunsliUnsupported,

    #[error("Out of memory: {0}")]
    OutOfMemory(#[from] TryReserveError),
    // Generic arithmetic overflow. Prefer using other errors if possible.
    #[error("Arithmetic overflow")]
    ArithmeticOverflow,
}

impl Error {
    /// Coarse category, matching the process exit codes of the reference
    /// command-line tools.
    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            InvalidImageSize(..) | NegativeDistance | RectOutOfBounds(..)
            | CopyOfDifferentSize(..) => ErrorKind::InvalidArgument,
            InvalidSignature(..) | UnsupportedVersion(..) | UnknownBitstreamKind(..)
            | InvalidQuantTemplate(..) | InvalidQuantValue(..) | NonZeroPadding => {
                ErrorKind::InvalidBitstream
            }
            OutOfBounds => ErrorKind::Truncated,
            ImageSizeTooLarge(..) | TooManyPixels(..) => ErrorKind::SizeLimitExceeded,
            ContextOutOfRange(..) | InvalidContextMap(..) | SymbolOutOfRange(..)
            | InvalidHistogram | AnsStateMismatch | InvalidLehmerCode(..) | RunOutOfBlock => {
                ErrorKind::DecodeConsistency
            }
            BrunsliUnsupported => ErrorKind::Unsupported,
            OutOfMemory(..) | ArithmeticOverflow => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    InvalidBitstream,
    Truncated,
    SizeLimitExceeded,
    DecodeConsistency,
    Unsupported,
    Internal,
}

pub type Result<T> = std::result::Result<T, Error>;
