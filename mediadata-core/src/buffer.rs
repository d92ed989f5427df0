//! # Sample Buffer
//!
//! Contiguous storage for plain-old-data samples (`u8` payloads, `f32` audio,
//! `u16` high bit depth planes). The backing allocation is made of 32-byte
//! aligned blocks so SIMD consumers can read it directly.
//!
//! Removing data from the front only moves a cursor, which is what makes audio
//! trimming and payload header stripping zero-copy. All growth goes through
//! `try_reserve` and reports [`MediaError::OutOfMemory`] instead of aborting.

use std::fmt;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ops::Deref;

use bytemuck::{Pod, Zeroable};

use crate::error::{MediaError, Result};

/// Alignment (in bytes) of every sample buffer allocation.
pub const BUFFER_ALIGNMENT: usize = 32;

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C, align(32))]
struct AlignedBlock([u8; BUFFER_ALIGNMENT]);

/// Aligned, growable buffer of `T` with a movable front cursor.
pub struct SampleBuffer<T> {
    blocks: Vec<AlignedBlock>,
    /// First live element
    start: usize,
    /// Number of live elements
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> SampleBuffer<T> {
    const ELEMENT_FITS: () = assert!(
        size_of::<T>() != 0
            && BUFFER_ALIGNMENT % size_of::<T>() == 0
            && align_of::<T>() <= BUFFER_ALIGNMENT,
        "element type does not tile an aligned block"
    );

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::ELEMENT_FITS;
        Self {
            blocks: Vec::new(),
            start: 0,
            len: 0,
            _marker: PhantomData,
        }
    }

    /// Zero-filled buffer of `len` elements.
    pub fn with_length(len: usize) -> Result<Self> {
        let mut buffer = Self::new();
        buffer.set_length(len)?;
        Ok(buffer)
    }

    pub fn from_slice(data: &[T]) -> Result<Self> {
        let mut buffer = Self::new();
        buffer.append(data)?;
        Ok(buffer)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Elements that fit in the current allocation.
    pub fn capacity(&self) -> usize {
        self.blocks.len() * BUFFER_ALIGNMENT / size_of::<T>()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.storage()[self.start..self.start + self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        let (start, end) = (self.start, self.start + self.len);
        &mut bytemuck::cast_slice_mut::<AlignedBlock, T>(&mut self.blocks)[start..end]
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.as_slice())
    }

    fn storage(&self) -> &[T] {
        bytemuck::cast_slice(&self.blocks)
    }

    /// Make room for `total` elements counted from the start of the allocation.
    fn grow_to(&mut self, total: usize) -> Result<()> {
        let bytes = total
            .checked_mul(size_of::<T>())
            .ok_or(MediaError::OutOfMemory { bytes: usize::MAX })?;
        let needed = bytes.div_ceil(BUFFER_ALIGNMENT);
        if needed <= self.blocks.len() {
            return Ok(());
        }
        self.blocks
            .try_reserve_exact(needed - self.blocks.len())
            .map_err(|_| MediaError::OutOfMemory { bytes })?;
        self.blocks.resize(needed, AlignedBlock::zeroed());
        Ok(())
    }

    pub fn append(&mut self, data: &[T]) -> Result<()> {
        let end = self.start + self.len;
        let new_end = end
            .checked_add(data.len())
            .ok_or(MediaError::OutOfMemory { bytes: usize::MAX })?;
        self.grow_to(new_end)?;
        bytemuck::cast_slice_mut::<AlignedBlock, T>(&mut self.blocks)[end..new_end]
            .copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    pub fn prepend(&mut self, data: &[T]) -> Result<()> {
        let n = data.len();
        if n <= self.start {
            self.start -= n;
            let start = self.start;
            bytemuck::cast_slice_mut::<AlignedBlock, T>(&mut self.blocks)[start..start + n]
                .copy_from_slice(data);
            self.len += n;
            return Ok(());
        }
        let total = n
            .checked_add(self.len)
            .ok_or(MediaError::OutOfMemory { bytes: usize::MAX })?;
        let mut fresh = Self::new();
        fresh.grow_to(total)?;
        fresh.append(data)?;
        fresh.append(self.as_slice())?;
        *self = fresh;
        Ok(())
    }

    /// Replace the whole content with `data`, reusing the allocation.
    pub fn replace(&mut self, data: &[T]) -> Result<()> {
        self.clear();
        self.append(data)
    }

    /// Resize to `len` elements; new elements are zeroed.
    pub fn set_length(&mut self, len: usize) -> Result<()> {
        if len > self.len {
            let end = self.start + self.len;
            let new_end = self
                .start
                .checked_add(len)
                .ok_or(MediaError::OutOfMemory { bytes: usize::MAX })?;
            self.grow_to(new_end)?;
            bytemuck::cast_slice_mut::<AlignedBlock, T>(&mut self.blocks)[end..new_end]
                .fill(T::zeroed());
        }
        self.len = len;
        Ok(())
    }

    /// Shorten to at most `len` elements; never reallocates.
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    /// Drop up to `n` elements from the front without moving data.
    pub fn pop_front(&mut self, n: usize) {
        let n = n.min(self.len);
        self.start += n;
        self.len -= n;
        if self.len == 0 {
            self.start = 0;
        }
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.len = 0;
    }

    pub fn try_clone(&self) -> Result<Self> {
        Self::from_slice(self.as_slice())
    }

    pub fn into_vec(self) -> Vec<T> {
        self.as_slice().to_vec()
    }

    /// Heap bytes held by the allocation.
    pub fn size_of_excluding_this(&self) -> usize {
        self.blocks.capacity() * BUFFER_ALIGNMENT
    }
}

impl<T: Pod> Default for SampleBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Pod> Deref for SampleBuffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T: Pod> fmt::Debug for SampleBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("len", &self.len)
            .field("start", &self.start)
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_is_aligned() {
        let buffer = SampleBuffer::<f32>::from_slice(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(buffer.as_slice().as_ptr() as usize % BUFFER_ALIGNMENT, 0);
        assert_eq!(buffer.capacity(), 8);
    }

    #[test]
    fn test_pop_front_is_zero_copy() {
        let mut buffer = SampleBuffer::<u8>::from_slice(&[1, 2, 3, 4, 5]).unwrap();
        let base = buffer.as_slice().as_ptr();
        buffer.pop_front(2);
        assert_eq!(buffer.as_slice(), &[3, 4, 5]);
        assert_eq!(buffer.as_slice().as_ptr(), base.wrapping_add(2));

        buffer.pop_front(10);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_prepend_reuses_popped_space() {
        let mut buffer = SampleBuffer::<u8>::from_slice(&[0, 0, 7, 8]).unwrap();
        buffer.pop_front(2);
        buffer.prepend(&[5, 6]).unwrap();
        assert_eq!(buffer.as_slice(), &[5, 6, 7, 8]);

        buffer.prepend(&[1, 2, 3, 4]).unwrap();
        assert_eq!(buffer.as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_set_length_zero_fills() {
        let mut buffer = SampleBuffer::<i16>::from_slice(&[9, 9, 9]).unwrap();
        buffer.set_length(1).unwrap();
        buffer.set_length(4).unwrap();
        assert_eq!(buffer.as_slice(), &[9, 0, 0, 0]);
    }

    #[test]
    fn test_replace_and_clone() {
        let mut buffer = SampleBuffer::<u8>::from_slice(b"header+payload").unwrap();
        buffer.replace(b"new").unwrap();
        let copy = buffer.try_clone().unwrap();
        buffer.as_mut_slice()[0] = b'N';
        assert_eq!(copy.as_slice(), b"new");
        assert_eq!(buffer.as_slice(), b"New");
    }

    #[test]
    fn test_huge_length_is_out_of_memory() {
        let err = SampleBuffer::<u8>::with_length(usize::MAX / 2).unwrap_err();
        assert_eq!(err, MediaError::OutOfMemory { bytes: usize::MAX / 2 });

        let mut buffer = SampleBuffer::<u8>::from_slice(b"keep").unwrap();
        assert!(matches!(buffer.set_length(usize::MAX / 2), Err(MediaError::OutOfMemory { .. })));
        assert_eq!(buffer.as_slice(), b"keep");
    }

    #[test]
    fn test_as_bytes() {
        let buffer = SampleBuffer::<u16>::from_slice(&[0x0102]).unwrap();
        assert_eq!(buffer.as_bytes(), &0x0102u16.to_ne_bytes());
    }
}
