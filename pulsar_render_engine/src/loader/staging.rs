/// Staging arena - fixed ring of reusable host-visible upload buffers
///
/// Reservations carve contiguous sub-ranges out of the ring for pending
/// uploads; a range stays owned by its marking token until the worker
/// confirms that token complete and releases it. The allocation cursor
/// wraps only past ranges whose token has already completed, which is the
/// invariant that keeps the device from reading a range that is being
/// rewritten.
///
/// Single-writer: all mutation happens on the enqueue path under the
/// loader mutex. Release happens on the worker, under the same mutex.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::engine_bail;
use crate::error::Result;
use crate::device::{Buffer, BufferDesc, BufferUsage, MemoryUsage, RenderDevice};
use crate::loader::token::SyncToken;

/// Round `value` up to the next multiple of `alignment` (a power of two)
pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// One reserved sub-range of a staging buffer
///
/// The caller writes upload bytes through `buffer` at `offset` and records
/// a copy command sourcing from the same range.
pub(crate) struct StagingAllocation {
    pub buffer: Arc<dyn Buffer>,
    pub offset: u64,
    pub size: u64,
}

/// A live reservation, owned by its marking token until released
struct Segment {
    buffer_index: usize,
    offset: u64,
    size: u64,
    token: SyncToken,
}

impl Segment {
    fn overlaps(&self, buffer_index: usize, offset: u64, size: u64) -> bool {
        self.buffer_index == buffer_index
            && offset < self.offset + self.size
            && self.offset < offset + size
    }
}

/// Fixed-capacity ring of host-visible upload buffers
pub struct StagingArena {
    buffers: Vec<Arc<dyn Buffer>>,
    buffer_size: u64,
    alignment: u64,
    cursor_buffer: usize,
    cursor_offset: u64,
    /// Live reservations in allocation order
    live: VecDeque<Segment>,
}

impl StagingArena {
    /// Create the ring: `buffer_count` host-visible buffers of
    /// `buffer_size` bytes each
    pub(crate) fn new(
        device: &dyn RenderDevice,
        buffer_size: u64,
        buffer_count: u32,
    ) -> Result<Self> {
        if buffer_size == 0 || buffer_count == 0 {
            engine_bail!(Configuration, "pulsar::StagingArena",
                "staging budget must be non-zero ({} bytes x {} buffers)",
                buffer_size, buffer_count);
        }
        let mut buffers = Vec::with_capacity(buffer_count as usize);
        for _ in 0..buffer_count {
            buffers.push(device.create_buffer(BufferDesc {
                size: buffer_size,
                usage: BufferUsage::Staging,
                memory: MemoryUsage::CpuToGpu,
            })?);
        }
        Ok(Self {
            buffers,
            buffer_size,
            alignment: device.copy_offset_alignment().max(4),
            cursor_buffer: 0,
            cursor_offset: 0,
            live: VecDeque::new(),
        })
    }

    /// Size of one ring buffer in bytes; also the largest contiguous
    /// reservation the arena can ever satisfy
    pub fn buffer_size(&self) -> u64 {
        self.buffer_size
    }

    /// Total arena capacity in bytes
    pub fn capacity(&self) -> u64 {
        self.buffer_size * self.buffers.len() as u64
    }

    /// Bytes currently owned by incomplete tokens
    pub fn in_use_bytes(&self) -> u64 {
        self.live.iter().map(|segment| segment.size).sum()
    }

    /// Number of live reservations
    pub fn live_reservations(&self) -> usize {
        self.live.len()
    }

    /// Try to reserve `size` contiguous bytes, marking them with `token`
    ///
    /// Returns `Ok(None)` when the only candidate range is still owned by
    /// an incomplete token; the caller is expected to wait for worker
    /// progress and retry. Fails permanently when `size` can never fit in
    /// one ring buffer.
    pub(crate) fn try_reserve(
        &mut self,
        size: u64,
        token: SyncToken,
    ) -> Result<Option<StagingAllocation>> {
        if size == 0 {
            engine_bail!(InvalidResource, "pulsar::StagingArena",
                "zero-size staging reservation");
        }
        if size > self.buffer_size {
            engine_bail!(Configuration, "pulsar::StagingArena",
                "reservation of {} bytes exceeds the staging capacity of {} bytes; \
                 split the transfer into smaller requests",
                size, self.buffer_size);
        }

        let mut buffer_index = self.cursor_buffer;
        let mut offset = align_up(self.cursor_offset, self.alignment);
        if offset + size > self.buffer_size {
            // Tail of the current buffer is too small; wrap to the start of
            // the next ring buffer. The skipped tail is reclaimed with the
            // rest of the ring on release.
            buffer_index = (buffer_index + 1) % self.buffers.len();
            offset = 0;
        }

        let blocked = self
            .live
            .iter()
            .any(|segment| segment.overlaps(buffer_index, offset, size));
        if blocked {
            return Ok(None);
        }

        self.cursor_buffer = buffer_index;
        self.cursor_offset = offset + size;
        self.live.push_back(Segment {
            buffer_index,
            offset,
            size,
            token,
        });
        Ok(Some(StagingAllocation {
            buffer: self.buffers[buffer_index].clone(),
            offset,
            size,
        }))
    }

    /// Release every reservation marked with a token <= `token`
    ///
    /// Called by the worker once the device has confirmed the batch; the
    /// freed ranges become claimable by the cursor again.
    pub(crate) fn release_through(&mut self, token: SyncToken) {
        self.live.retain(|segment| segment.token > token);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "staging_tests.rs"]
mod tests;
