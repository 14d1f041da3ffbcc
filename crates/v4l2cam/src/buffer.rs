// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::v4l2::Device;
use crate::Error;
use std::sync::atomic::{AtomicU64, Ordering};

/// Buffers requested from the driver when the caller does not say otherwise.
pub const DEFAULT_BUFFER_COUNT: u32 = 4;

/// Fewest buffers the engine can stream with.
pub const MIN_BUFFER_COUNT: u32 = 2;

// Shared by every pool so a checkout is never mistaken for one from an
// earlier stream or another device.
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// The slot held by the caller and the checkout it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Checkout {
    index: u32,
    generation: u64,
}

/// One driver buffer mapped into the process.
#[derive(Debug)]
pub struct MappedBuffer<M> {
    index: u32,
    region: M,
}

impl<M: AsRef<[u8]>> MappedBuffer<M> {
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Byte length of the mapping.
    pub fn capacity(&self) -> usize {
        self.region.as_ref().len()
    }
}

/// The fixed set of mapped buffers for one open device, and which one (if
/// any) is checked out to the caller.
///
/// Buffers are mapped once when the pool is built and unmapped together
/// when the pool is dropped.
#[derive(Debug)]
pub struct BufferPool<M> {
    buffers: Vec<MappedBuffer<M>>,
    checked_out: Option<Checkout>,
}

impl<M: AsRef<[u8]>> BufferPool<M> {
    /// Request `count` buffers from the driver and map every one of them.
    ///
    /// On failure every mapping made so far is released and the driver's
    /// buffers are freed before the error is returned.
    pub fn allocate<D>(device: &mut D, count: u32) -> Result<Self, Error>
    where
        D: Device<Mapping = M> + ?Sized,
    {
        let granted = device
            .request_buffers(count)
            .map_err(|source| Error::DeviceSet {
                request: "VIDIOC_REQBUFS",
                source,
            })?;
        log::debug!("requested {} buffers, driver granted {}", count, granted);

        if granted < MIN_BUFFER_COUNT {
            release_driver_buffers(device);
            return Err(Error::InsufficientBuffers {
                granted,
                minimum: MIN_BUFFER_COUNT,
            });
        }

        match Self::map_all(device, granted) {
            Ok(buffers) => Ok(BufferPool {
                buffers,
                checked_out: None,
            }),
            Err(err) => {
                release_driver_buffers(device);
                Err(err)
            }
        }
    }

    fn map_all<D>(device: &mut D, granted: u32) -> Result<Vec<MappedBuffer<M>>, Error>
    where
        D: Device<Mapping = M> + ?Sized,
    {
        let mut buffers = Vec::with_capacity(granted as usize);
        for index in 0..granted {
            let info = device
                .query_buffer(index)
                .map_err(|source| Error::DeviceQuery {
                    request: "VIDIOC_QUERYBUF",
                    source,
                })?;
            let region = device
                .map_buffer(&info)
                .map_err(|source| Error::MemoryMapFailed { index, source })?;
            log::trace!("mapped buffer {} ({} bytes)", index, info.length);
            buffers.push(MappedBuffer { index, region });
        }
        Ok(buffers)
    }

    /// Build a pool from regions that are already mapped.
    pub fn from_regions(regions: impl IntoIterator<Item = M>) -> Self {
        let buffers = regions
            .into_iter()
            .enumerate()
            .map(|(index, region)| MappedBuffer {
                index: index as u32,
                region,
            })
            .collect();
        BufferPool {
            buffers,
            checked_out: None,
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn buffers(&self) -> &[MappedBuffer<M>] {
        &self.buffers
    }

    /// Slot currently held by the caller.
    pub fn checked_out(&self) -> Option<u32> {
        self.checked_out.map(|c| c.index)
    }

    /// Fails while another slot is held.
    pub fn ensure_available(&self) -> Result<(), Error> {
        match self.checked_out {
            Some(Checkout { index, .. }) => Err(Error::FrameAlreadyCheckedOut { index }),
            None => Ok(()),
        }
    }

    /// Mark `index` as held by the caller.
    ///
    /// Returns the generation of this checkout; [`check_in`](Self::check_in)
    /// and [`view`](Self::view) accept only that generation.
    pub fn check_out(&mut self, index: u32) -> Result<u64, Error> {
        self.ensure_available()?;
        if index as usize >= self.buffers.len() {
            return Err(Error::CorruptBufferIndex {
                index,
                pool_size: self.buffers.len() as u32,
            });
        }
        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        self.checked_out = Some(Checkout { index, generation });
        Ok(generation)
    }

    /// True when `index` is checked out under `generation`.
    pub fn is_checked_out(&self, index: u32, generation: u64) -> bool {
        self.checked_out == Some(Checkout { index, generation })
    }

    /// Clear the hold on `index`; it must be the current checkout.
    pub fn check_in(&mut self, index: u32, generation: u64) -> Result<(), Error> {
        if !self.is_checked_out(index, generation) {
            return Err(Error::NoOutstandingFrame { index });
        }
        self.checked_out = None;
        Ok(())
    }

    /// Forget any hold, after the driver has reclaimed every buffer.
    pub fn reset(&mut self) {
        self.checked_out = None;
    }

    /// The first `bytes_used` bytes of the checked-out slot `index`.
    pub fn view(&self, index: u32, generation: u64, bytes_used: usize) -> Result<&[u8], Error> {
        if !self.is_checked_out(index, generation) {
            return Err(Error::NoOutstandingFrame { index });
        }
        let region = self.buffers[index as usize].region.as_ref();
        Ok(&region[..bytes_used.min(region.len())])
    }
}

fn release_driver_buffers<D: Device + ?Sized>(device: &mut D) {
    if let Err(err) = device.request_buffers(0) {
        log::warn!("failed to free driver buffers: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> BufferPool<Vec<u8>> {
        BufferPool::from_regions((0..4u8).map(|i| vec![i; 16]))
    }

    #[test]
    fn test_single_checkout() {
        let mut pool = pool();
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.checked_out(), None);

        let generation = pool.check_out(2).unwrap();
        assert_eq!(pool.checked_out(), Some(2));
        assert!(pool.is_checked_out(2, generation));

        match pool.check_out(1) {
            Err(Error::FrameAlreadyCheckedOut { index }) => assert_eq!(index, 2),
            other => panic!("expected FrameAlreadyCheckedOut, got {:?}", other),
        }

        pool.check_in(2, generation).unwrap();
        assert_eq!(pool.checked_out(), None);
    }

    #[test]
    fn test_check_in_requires_matching_slot() {
        let mut pool = pool();
        assert!(matches!(
            pool.check_in(0, 0),
            Err(Error::NoOutstandingFrame { index: 0 })
        ));

        let generation = pool.check_out(1).unwrap();
        assert!(matches!(
            pool.check_in(3, generation),
            Err(Error::NoOutstandingFrame { index: 3 })
        ));
        assert_eq!(pool.checked_out(), Some(1));
    }

    #[test]
    fn test_generation_outlives_reset() {
        let mut pool = pool();
        let old = pool.check_out(0).unwrap();
        pool.reset();

        let current = pool.check_out(0).unwrap();
        assert_ne!(old, current);
        assert!(pool.view(0, old, 4).is_err());
        assert!(matches!(
            pool.check_in(0, old),
            Err(Error::NoOutstandingFrame { index: 0 })
        ));
        assert_eq!(pool.checked_out(), Some(0));
        pool.check_in(0, current).unwrap();
    }

    #[test]
    fn test_generations_differ_between_pools() {
        let mut first = pool();
        let mut second = pool();
        let a = first.check_out(1).unwrap();
        let b = second.check_out(1).unwrap();
        assert_ne!(a, b);
        assert!(second.check_in(1, a).is_err());
        second.check_in(1, b).unwrap();
    }

    #[test]
    fn test_out_of_range_index() {
        let mut pool = pool();
        assert!(matches!(
            pool.check_out(4),
            Err(Error::CorruptBufferIndex {
                index: 4,
                pool_size: 4
            })
        ));
        assert_eq!(pool.checked_out(), None);
    }

    #[test]
    fn test_view_is_bounded() {
        let mut pool = pool();
        assert!(pool.view(3, 0, 8).is_err());

        let generation = pool.check_out(3).unwrap();
        assert_eq!(pool.view(3, generation, 8).unwrap(), &[3u8; 8][..]);
        assert_eq!(pool.view(3, generation, 1024).unwrap().len(), 16);
        assert_eq!(pool.buffers()[3].capacity(), 16);

        pool.reset();
        assert!(pool.view(3, generation, 8).is_err());
    }
}
