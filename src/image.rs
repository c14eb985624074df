// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    error::{Error, Result},
    util::tracing_wrappers::*,
};

mod private {
    pub trait Sealed {}
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DataTypeTag {
    U8,
    U16,
    I16,
    I32,
    F32,
}

pub trait ImageDataType: private::Sealed + Copy + Default + 'static + Debug + PartialEq {
    /// ID of this data type. Different types *must* have different values.
    const DATA_TYPE_ID: DataTypeTag;

    fn from_f64(f: f64) -> Self;
    fn to_f64(self) -> f64;
    #[cfg(test)]
    fn random<R: rand::Rng>(rng: &mut R) -> Self;
}

macro_rules! impl_image_data_type {
    ($ty: ty, $id: ident) => {
        impl private::Sealed for $ty {}
        impl ImageDataType for $ty {
            const DATA_TYPE_ID: DataTypeTag = DataTypeTag::$id;
            fn from_f64(f: f64) -> $ty {
                f as $ty
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
            #[cfg(test)]
            fn random<R: rand::Rng>(rng: &mut R) -> Self {
                use rand::distributions::{Distribution, Uniform};
                Uniform::new(<$ty>::MIN, <$ty>::MAX).sample(rng)
            }
        }
    };
}

impl_image_data_type!(u8, U8);
impl_image_data_type!(u16, U16);
impl_image_data_type!(i16, I16);
impl_image_data_type!(i32, I32);
impl_image_data_type!(f32, F32);

/// Rows are padded to a multiple of this many bytes, so that vectorized row
/// loops may read a full vector at the end of a row.
const ROW_ALIGN_BYTES: usize = 64;

/// Consecutive allocations are shifted relative to each other by this many
/// bytes, so that the row starts of the planes of a 3-plane image do not
/// collide modulo 2 KiB.
const PLANE_SKEW_BYTES: usize = 2048 + 192;

// Process-wide rotating counter; has no semantic effect, the skew only
// avoids store-to-load aliasing stalls between planes.
static NEXT_PLANE_SKEW: AtomicUsize = AtomicUsize::new(0);

pub struct Image<T: ImageDataType> {
    size: (usize, usize),
    stride: usize,
    offset: usize,
    data: Vec<T>,
}

#[derive(Clone, Copy)]
pub struct ImageRect<'a, T: ImageDataType> {
    origin: (usize, usize),
    size: (usize, usize),
    image: &'a Image<T>,
}

pub struct ImageRectMut<'a, T: ImageDataType> {
    origin: (usize, usize),
    size: (usize, usize),
    image: &'a mut Image<T>,
}

impl<T: ImageDataType> Debug for Image<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} {}x{} (stride {})",
            T::DATA_TYPE_ID,
            self.size.0,
            self.size.1,
            self.stride
        )
    }
}

impl<'a, T: ImageDataType> Debug for ImageRect<'a, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} {}x{}+{}+{}",
            T::DATA_TYPE_ID,
            self.size.0,
            self.size.1,
            self.origin.0,
            self.origin.1
        )
    }
}

impl<T: ImageDataType> Image<T> {
    pub fn new(size: (usize, usize)) -> Result<Image<T>> {
        let (xsize, ysize) = size;
        // These limits let us not worry about overflows.
        if xsize as u64 >= i64::MAX as u64 / 4 || ysize as u64 >= i64::MAX as u64 / 4 {
            return Err(Error::ImageSizeTooLarge(xsize, ysize));
        }
        if xsize == 0 || ysize == 0 {
            return Err(Error::InvalidImageSize(xsize, ysize));
        }
        let elts_per_align = ROW_ALIGN_BYTES / std::mem::size_of::<T>();
        let stride = xsize
            .checked_add(elts_per_align * 2)
            .ok_or(Error::ImageSizeTooLarge(xsize, ysize))?
            / elts_per_align
            * elts_per_align;
        let skew = NEXT_PLANE_SKEW.fetch_add(1, Ordering::Relaxed) % 7;
        let offset = skew * PLANE_SKEW_BYTES / std::mem::size_of::<T>();
        let total_size = stride
            .checked_mul(ysize)
            .and_then(|x| x.checked_add(offset))
            .ok_or(Error::ImageSizeTooLarge(xsize, ysize))?;
        debug!("allocating {}x{} image, stride {}", xsize, ysize, stride);
        let mut data = vec![];
        data.try_reserve_exact(total_size)?;
        data.resize(total_size, T::default());
        Ok(Image {
            size: (xsize, ysize),
            stride,
            offset,
            data,
        })
    }

    pub fn new_constant(size: (usize, usize), value: T) -> Result<Image<T>> {
        let mut img = Self::new(size)?;
        img.data.iter_mut().for_each(|x| *x = value);
        Ok(img)
    }

    #[cfg(test)]
    pub fn new_random<R: rand::Rng>(size: (usize, usize), rng: &mut R) -> Result<Image<T>> {
        let mut img = Self::new(size)?;
        for y in 0..size.1 {
            img.row_mut(y).iter_mut().for_each(|x| *x = T::random(rng));
        }
        Ok(img)
    }

    pub fn size(&self) -> (usize, usize) {
        self.size
    }

    pub fn xsize(&self) -> usize {
        self.size.0
    }

    pub fn ysize(&self) -> usize {
        self.size.1
    }

    /// Reduces the viewed size of the image. May only shrink, never grow;
    /// the allocation is kept.
    pub fn shrink_to(&mut self, xsize: usize, ysize: usize) {
        assert!(xsize <= self.size.0 && ysize <= self.size.1);
        assert!(xsize > 0 && ysize > 0);
        self.size = (xsize, ysize);
    }

    pub fn row(&self, row: usize) -> &[T] {
        debug_assert!(row < self.size.1);
        let start = self.offset + row * self.stride;
        &self.data[start..start + self.size.0]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [T] {
        debug_assert!(row < self.size.1);
        let start = self.offset + row * self.stride;
        &mut self.data[start..start + self.size.0]
    }

    pub fn as_rect(&self) -> ImageRect<'_, T> {
        ImageRect {
            origin: (0, 0),
            size: self.size,
            image: self,
        }
    }

    pub fn as_rect_mut(&mut self) -> ImageRectMut<'_, T> {
        ImageRectMut {
            origin: (0, 0),
            size: self.size,
            image: self,
        }
    }

    pub fn try_clone(&self) -> Result<Image<T>> {
        let mut out = Self::new(self.size)?;
        for y in 0..self.size.1 {
            out.row_mut(y).copy_from_slice(self.row(y));
        }
        Ok(out)
    }
}

fn rect_size_check(
    origin: (usize, usize),
    size: (usize, usize),
    ssize: (usize, usize),
) -> Result<()> {
    if origin
        .0
        .checked_add(size.0)
        .ok_or(Error::ArithmeticOverflow)?
        > ssize.0
        || origin
            .1
            .checked_add(size.1)
            .ok_or(Error::ArithmeticOverflow)?
            > ssize.1
    {
        Err(Error::RectOutOfBounds(
            size.0, size.1, origin.0, origin.1, ssize.0, ssize.1,
        ))
    } else {
        Ok(())
    }
}

impl<'a, T: ImageDataType> ImageRect<'a, T> {
    pub fn rect(self, origin: (usize, usize), size: (usize, usize)) -> Result<ImageRect<'a, T>> {
        rect_size_check(origin, size, self.size)?;
        Ok(ImageRect {
            origin: (origin.0 + self.origin.0, origin.1 + self.origin.1),
            size,
            image: self.image,
        })
    }

    pub fn size(&self) -> (usize, usize) {
        self.size
    }

    pub fn xsize(&self) -> usize {
        self.size.0
    }

    pub fn ysize(&self) -> usize {
        self.size.1
    }

    pub fn origin(&self) -> (usize, usize) {
        self.origin
    }

    pub fn row(&self, row: usize) -> &'a [T] {
        debug_assert!(row < self.size.1);
        let start = self.image.offset + (row + self.origin.1) * self.image.stride + self.origin.0;
        &self.image.data[start..start + self.size.0]
    }

    pub fn to_image(&self) -> Result<Image<T>> {
        let mut out = Image::new(self.size)?;
        for y in 0..self.size.1 {
            out.row_mut(y).copy_from_slice(self.row(y));
        }
        Ok(out)
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.size.1).flat_map(|x| self.row(x).iter().cloned())
    }
}

impl<'a, T: ImageDataType> ImageRectMut<'a, T> {
    pub fn rect(
        &mut self,
        origin: (usize, usize),
        size: (usize, usize),
    ) -> Result<ImageRectMut<'_, T>> {
        rect_size_check(origin, size, self.size)?;
        Ok(ImageRectMut {
            origin: (origin.0 + self.origin.0, origin.1 + self.origin.1),
            size,
            image: self.image,
        })
    }

    pub fn size(&self) -> (usize, usize) {
        self.size
    }

    pub fn copy_from(&mut self, other: ImageRect<'_, T>) -> Result<()> {
        if other.size != self.size {
            return Err(Error::CopyOfDifferentSize(
                other.size.0,
                other.size.1,
                self.size.0,
                self.size.1,
            ));
        }
        for i in 0..self.size.1 {
            self.row(i).copy_from_slice(other.row(i));
        }
        Ok(())
    }

    pub fn row(&mut self, row: usize) -> &mut [T] {
        debug_assert!(row < self.size.1);
        let start = self.image.offset + (row + self.origin.1) * self.image.stride + self.origin.0;
        &mut self.image.data[start..start + self.size.0]
    }

    pub fn as_rect(&self) -> ImageRect<'_, T> {
        ImageRect {
            origin: self.origin,
            size: self.size,
            image: self.image,
        }
    }
}

/// Three same-sized planes. Plane 0 carries X, plane 1 Y, plane 2 B for
/// opsin-domain images; the codec also uses it for coefficient planes.
#[derive(Debug)]
pub struct Image3<T: ImageDataType> {
    planes: [Image<T>; 3],
}

impl<T: ImageDataType> Image3<T> {
    pub fn new(size: (usize, usize)) -> Result<Image3<T>> {
        Ok(Image3 {
            planes: [Image::new(size)?, Image::new(size)?, Image::new(size)?],
        })
    }

    #[cfg(test)]
    pub fn new_random<R: rand::Rng>(size: (usize, usize), rng: &mut R) -> Result<Image3<T>> {
        Ok(Image3 {
            planes: [
                Image::new_random(size, rng)?,
                Image::new_random(size, rng)?,
                Image::new_random(size, rng)?,
            ],
        })
    }

    pub fn from_planes(planes: [Image<T>; 3]) -> Image3<T> {
        assert_eq!(planes[0].size(), planes[1].size());
        assert_eq!(planes[0].size(), planes[2].size());
        Image3 { planes }
    }

    pub fn size(&self) -> (usize, usize) {
        self.planes[0].size()
    }

    pub fn xsize(&self) -> usize {
        self.planes[0].xsize()
    }

    pub fn ysize(&self) -> usize {
        self.planes[0].ysize()
    }

    pub fn plane(&self, c: usize) -> &Image<T> {
        &self.planes[c]
    }

    pub fn plane_mut(&mut self, c: usize) -> &mut Image<T> {
        &mut self.planes[c]
    }

    /// Disjoint mutable borrows of all three planes.
    pub fn planes_mut(&mut self) -> [&mut Image<T>; 3] {
        let [p0, p1, p2] = &mut self.planes;
        [p0, p1, p2]
    }

    pub fn row(&self, c: usize, y: usize) -> &[T] {
        self.planes[c].row(y)
    }

    pub fn row_mut(&mut self, c: usize, y: usize) -> &mut [T] {
        self.planes[c].row_mut(y)
    }

    /// Mutable rows of all three planes at once.
    pub fn rows_mut(&mut self, y: usize) -> [&mut [T]; 3] {
        let [p0, p1, p2] = &mut self.planes;
        [p0.row_mut(y), p1.row_mut(y), p2.row_mut(y)]
    }

    pub fn shrink_to(&mut self, xsize: usize, ysize: usize) {
        for plane in self.planes.iter_mut() {
            plane.shrink_to(xsize, ysize);
        }
    }

    pub fn try_clone(&self) -> Result<Image3<T>> {
        Ok(Image3 {
            planes: [
                self.planes[0].try_clone()?,
                self.planes[1].try_clone()?,
                self.planes[2].try_clone()?,
            ],
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn huge_image() {
        assert!(Image::<u8>::new((1 << 28, 1 << 28)).is_err());
    }

    #[test]
    fn rect_basic() -> Result<()> {
        let mut image = Image::<u8>::new((32, 42))?;
        assert_eq!(image.as_rect_mut().rect((31, 40), (1, 1))?.size(), (1, 1));
        assert_eq!(image.as_rect_mut().rect((0, 0), (1, 1))?.size(), (1, 1));
        assert!(image.as_rect_mut().rect((30, 30), (3, 3)).is_err());
        image.as_rect_mut().rect((30, 30), (1, 1))?.row(0)[0] = 1;
        assert_eq!(image.row(30)[30], 1);
        Ok(())
    }

    #[test]
    fn shrink_keeps_content() -> Result<()> {
        let mut image = Image::<i16>::new((16, 16))?;
        image.row_mut(3)[5] = -77;
        image.shrink_to(8, 8);
        assert_eq!(image.size(), (8, 8));
        assert_eq!(image.row(3)[5], -77);
        Ok(())
    }

    #[test]
    #[should_panic]
    fn shrink_cannot_grow() {
        let mut image = Image::<u8>::new((4, 4)).unwrap();
        image.shrink_to(8, 4);
    }

    #[test]
    fn plane_rows_padded() -> Result<()> {
        // Rows must accommodate a vector-width overrun, i.e. the stride is
        // strictly larger than the row length for non-aligned sizes.
        let image = Image::<f32>::new((17, 3))?;
        assert!(image.stride >= 17 + 16);
        Ok(())
    }

    #[test]
    fn three_planes_same_size() -> Result<()> {
        let img = Image3::<f32>::new((24, 10))?;
        assert_eq!(img.plane(0).size(), img.plane(2).size());
        Ok(())
    }
}
