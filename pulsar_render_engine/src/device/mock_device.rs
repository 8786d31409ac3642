/// Mock RenderDevice for unit tests (no GPU required)
///
/// This mock device allows testing the resource loader and other components
/// without a real GPU. Copy submissions are executed eagerly against
/// host-memory storage, while fence signaling is either immediate or under
/// manual test control so completion timing can be scripted.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use rustc_hash::FxHashMap;

use crate::engine_bail;
use crate::error::Result;
use crate::device::{
    Buffer, BufferDesc, BufferUsage, CopyCommand, Fence, MemoryUsage,
    RenderDevice, Texture, TextureDesc, TextureInfo,
};

// ============================================================================
// Mock Buffer
// ============================================================================

pub struct MockBuffer {
    desc: BufferDesc,
    contents: Mutex<Vec<u8>>,
}

impl MockBuffer {
    /// Fresh buffers hold a garbage pattern, like uninitialized GPU memory
    pub const GARBAGE: u8 = 0xab;

    pub fn new(desc: BufferDesc) -> Self {
        let size = desc.size as usize;
        Self {
            desc,
            contents: Mutex::new(vec![Self::GARBAGE; size]),
        }
    }

    /// Snapshot of the buffer contents
    pub fn contents(&self) -> Vec<u8> {
        self.contents.lock().unwrap().clone()
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        if offset + data.len() as u64 > self.desc.size {
            engine_bail!(InvalidResource, "pulsar::mock",
                "write at offset {} with size {} exceeds buffer size {}",
                offset, data.len(), self.desc.size);
        }
        let mut contents = self.contents.lock().unwrap();
        contents[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        Ok(())
    }
}

impl Buffer for MockBuffer {
    fn size(&self) -> u64 {
        self.desc.size
    }

    fn usage(&self) -> BufferUsage {
        self.desc.usage
    }

    fn host_visible(&self) -> bool {
        self.desc.memory == MemoryUsage::CpuToGpu
    }

    fn update(&self, offset: u64, data: &[u8]) -> Result<()> {
        if !self.host_visible() {
            engine_bail!(InvalidResource, "pulsar::mock",
                "direct update of a device-local buffer");
        }
        self.write(offset, data)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Mock Texture
// ============================================================================

pub struct MockTexture {
    info: TextureInfo,
    /// Tightly packed rows per (array_layer, mip_level)
    subresources: Mutex<FxHashMap<(u32, u32), Vec<u8>>>,
}

impl MockTexture {
    pub fn new(desc: TextureDesc) -> Self {
        Self {
            info: TextureInfo {
                width: desc.width,
                height: desc.height,
                format: desc.format,
                usage: desc.usage,
                array_layers: desc.array_layers,
                mip_levels: desc.mip_levels,
            },
            subresources: Mutex::new(FxHashMap::default()),
        }
    }

    /// Snapshot of one subresource as tightly packed rows (zeros if never
    /// written)
    pub fn subresource(&self, array_layer: u32, mip_level: u32) -> Vec<u8> {
        let (w, h) = self.info.mip_extent(mip_level);
        let len = (w as u64 * h as u64 * self.info.format.bytes_per_pixel()) as usize;
        self.subresources
            .lock()
            .unwrap()
            .get(&(array_layer, mip_level))
            .cloned()
            .unwrap_or_else(|| vec![0; len])
    }

    fn write_rows(
        &self,
        array_layer: u32,
        mip_level: u32,
        row_start: u32,
        rows: &[&[u8]],
    ) -> Result<()> {
        let (w, h) = self.info.mip_extent(mip_level);
        let row_bytes = (w as u64 * self.info.format.bytes_per_pixel()) as usize;
        if array_layer >= self.info.array_layers || mip_level >= self.info.mip_levels {
            engine_bail!(InvalidResource, "pulsar::mock",
                "subresource ({}, {}) out of range", array_layer, mip_level);
        }
        if row_start as usize + rows.len() > h as usize {
            engine_bail!(InvalidResource, "pulsar::mock",
                "row range {}..{} out of range (height {})",
                row_start, row_start as usize + rows.len(), h);
        }
        let mut subresources = self.subresources.lock().unwrap();
        let storage = subresources
            .entry((array_layer, mip_level))
            .or_insert_with(|| vec![0; row_bytes * h as usize]);
        for (i, row) in rows.iter().enumerate() {
            let at = (row_start as usize + i) * row_bytes;
            storage[at..at + row_bytes].copy_from_slice(&row[..row_bytes]);
        }
        Ok(())
    }
}

impl Texture for MockTexture {
    fn info(&self) -> &TextureInfo {
        &self.info
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Mock Fence
// ============================================================================

pub struct MockFence {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl MockFence {
    fn new(signaled: bool) -> Arc<Self> {
        Arc::new(Self {
            signaled: Mutex::new(signaled),
            cond: Condvar::new(),
        })
    }

    pub fn signal(&self) {
        *self.signaled.lock().unwrap() = true;
        self.cond.notify_all();
    }
}

impl Fence for MockFence {
    fn poll(&self) -> Result<bool> {
        Ok(*self.signaled.lock().unwrap())
    }

    fn wait(&self) -> Result<()> {
        let mut signaled = self.signaled.lock().unwrap();
        while !*signaled {
            signaled = self.cond.wait(signaled).unwrap();
        }
        Ok(())
    }
}

// ============================================================================
// Mock Device
// ============================================================================

/// Fence signaling policy for submissions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceMode {
    /// Fences signal at submit time
    Immediate,
    /// Fences signal when the test calls `signal_next_fence`/`signal_all`
    Manual,
}

/// Mock RenderDevice that executes copies against host memory
pub struct MockDevice {
    fence_mode: FenceMode,
    /// Unsignaled fences in submission order (manual mode)
    pending_fences: Mutex<VecDeque<Arc<MockFence>>>,
    /// Command counts per submission, for introspection
    submissions: Mutex<Vec<usize>>,
    fail_next_submit: Mutex<bool>,
}

impl MockDevice {
    pub fn new(fence_mode: FenceMode) -> Arc<Self> {
        Arc::new(Self {
            fence_mode,
            pending_fences: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
            fail_next_submit: Mutex::new(false),
        })
    }

    /// Make the next `submit_copies` call fail
    pub fn fail_next_submit(&self) {
        *self.fail_next_submit.lock().unwrap() = true;
    }

    /// Signal the oldest unsignaled fence (manual mode)
    ///
    /// Returns false if no fence was pending.
    pub fn signal_next_fence(&self) -> bool {
        match self.pending_fences.lock().unwrap().pop_front() {
            Some(fence) => {
                fence.signal();
                true
            }
            None => false,
        }
    }

    /// Signal every pending fence in submission order (manual mode)
    pub fn signal_all_fences(&self) {
        let mut pending = self.pending_fences.lock().unwrap();
        while let Some(fence) = pending.pop_front() {
            fence.signal();
        }
    }

    /// Number of submissions accepted so far
    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    /// Command counts per submission
    pub fn submission_sizes(&self) -> Vec<usize> {
        self.submissions.lock().unwrap().clone()
    }

    fn execute(&self, command: &CopyCommand) -> Result<()> {
        match command {
            CopyCommand::CopyBuffer { src, src_offset, dst, dst_offset, size, .. } => {
                let src = src
                    .as_any()
                    .downcast_ref::<MockBuffer>()
                    .expect("foreign source buffer");
                let dst = dst
                    .as_any()
                    .downcast_ref::<MockBuffer>()
                    .expect("foreign destination buffer");
                let data = {
                    let contents = src.contents.lock().unwrap();
                    contents[*src_offset as usize..(*src_offset + *size) as usize].to_vec()
                };
                dst.write(*dst_offset, &data)
            }
            CopyCommand::CopyTexture { src, src_offset, src_row_pitch, dst, region, .. } => {
                let src = src
                    .as_any()
                    .downcast_ref::<MockBuffer>()
                    .expect("foreign source buffer");
                let dst = dst
                    .as_any()
                    .downcast_ref::<MockTexture>()
                    .expect("foreign destination texture");
                let (w, _) = dst.info.mip_extent(region.mip_level);
                let row_bytes = (w as u64 * dst.info.format.bytes_per_pixel()) as usize;
                let staged = src.contents.lock().unwrap();
                let rows: Vec<&[u8]> = (0..region.row_count as usize)
                    .map(|r| {
                        let at = (*src_offset + r as u64 * *src_row_pitch) as usize;
                        &staged[at..at + row_bytes]
                    })
                    .collect();
                dst.write_rows(region.array_layer, region.mip_level, region.row_start, &rows)
            }
        }
    }
}

impl RenderDevice for MockDevice {
    fn create_buffer(&self, desc: BufferDesc) -> Result<Arc<dyn Buffer>> {
        Ok(Arc::new(MockBuffer::new(desc)))
    }

    fn create_texture(&self, desc: TextureDesc) -> Result<Arc<dyn Texture>> {
        Ok(Arc::new(MockTexture::new(desc)))
    }

    fn submit_copies(&self, commands: Vec<CopyCommand>) -> Result<Arc<dyn Fence>> {
        if std::mem::take(&mut *self.fail_next_submit.lock().unwrap()) {
            engine_bail!(BackendError, "pulsar::mock", "submit rejected (scripted failure)");
        }
        for command in &commands {
            self.execute(command)?;
        }
        self.submissions.lock().unwrap().push(commands.len());
        let fence = match self.fence_mode {
            FenceMode::Immediate => MockFence::new(true),
            FenceMode::Manual => {
                let fence = MockFence::new(false);
                self.pending_fences.lock().unwrap().push_back(fence.clone());
                fence
            }
        };
        Ok(fence)
    }

    fn copy_offset_alignment(&self) -> u64 {
        4
    }

    fn copy_row_pitch_alignment(&self) -> u64 {
        256
    }

    fn wait_idle(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "mock_device_tests.rs"]
mod tests;
