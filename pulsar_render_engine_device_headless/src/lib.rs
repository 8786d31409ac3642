/*!
# Pulsar Headless Device

Host-memory reference backend for the Pulsar render engine.

Implements the engine's device surface (`RenderDevice`, `Buffer`,
`Texture`, `Fence`) against plain host memory: buffers are byte vectors,
textures are per-subresource byte vectors, and copy submissions execute
eagerly at submit time. Fences either signal immediately or stay pending
until the caller signals them, which makes device-completion timing fully
scriptable.

Intended for integration tests, CI machines without a GPU, and asset
tooling that needs loader semantics without a swapchain.
*/

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use rustc_hash::FxHashMap;

use pulsar_render_engine::engine_bail;
use pulsar_render_engine::error::Result;
use pulsar_render_engine::device::{
    Buffer, BufferDesc, BufferUsage, CopyCommand, Fence, MemoryUsage,
    RenderDevice, Texture, TextureDesc, TextureInfo,
};

// ============================================================================
// Headless Buffer
// ============================================================================

/// Buffer backed by a host byte vector
pub struct HeadlessBuffer {
    desc: BufferDesc,
    contents: Mutex<Vec<u8>>,
}

impl HeadlessBuffer {
    fn new(desc: BufferDesc) -> Self {
        let size = desc.size as usize;
        Self {
            desc,
            contents: Mutex::new(vec![0; size]),
        }
    }

    /// Snapshot of the buffer contents
    pub fn contents(&self) -> Vec<u8> {
        self.contents.lock().unwrap().clone()
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        if offset + data.len() as u64 > self.desc.size {
            engine_bail!(InvalidResource, "pulsar::headless",
                "write at offset {} with size {} exceeds buffer size {}",
                offset, data.len(), self.desc.size);
        }
        let mut contents = self.contents.lock().unwrap();
        contents[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, offset: u64, size: u64) -> Result<Vec<u8>> {
        if offset + size > self.desc.size {
            engine_bail!(InvalidResource, "pulsar::headless",
                "read at offset {} with size {} exceeds buffer size {}",
                offset, size, self.desc.size);
        }
        let contents = self.contents.lock().unwrap();
        Ok(contents[offset as usize..(offset + size) as usize].to_vec())
    }
}

impl Buffer for HeadlessBuffer {
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
            engine_bail!(InvalidResource, "pulsar::headless",
                "direct update of a device-local buffer; route it through the resource loader");
        }
        self.write(offset, data)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Headless Texture
// ============================================================================

/// Texture backed by per-subresource host byte vectors
pub struct HeadlessTexture {
    info: TextureInfo,
    /// Tightly packed rows per (array_layer, mip_level)
    subresources: Mutex<FxHashMap<(u32, u32), Vec<u8>>>,
}

impl HeadlessTexture {
    fn new(desc: TextureDesc) -> Self {
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
}

impl Texture for HeadlessTexture {
    fn info(&self) -> &TextureInfo {
        &self.info
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Headless Fence
// ============================================================================

/// Fence with host-side signaling
pub struct HeadlessFence {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl HeadlessFence {
    fn new(signaled: bool) -> Arc<Self> {
        Arc::new(Self {
            signaled: Mutex::new(signaled),
            cond: Condvar::new(),
        })
    }

    fn signal(&self) {
        *self.signaled.lock().unwrap() = true;
        self.cond.notify_all();
    }
}

impl Fence for HeadlessFence {
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
// Headless Device
// ============================================================================

/// When submission fences signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FencePolicy {
    /// Fences signal at submit time (copies execute eagerly anyway)
    Immediate,
    /// Fences stay pending until `signal_next_fence`/`signal_all_fences`
    Manual,
}

/// Host-memory RenderDevice implementation
pub struct HeadlessDevice {
    fence_policy: FencePolicy,
    /// Unsignaled fences in submission order (manual policy)
    pending_fences: Mutex<VecDeque<Arc<HeadlessFence>>>,
    submissions: Mutex<u64>,
}

impl HeadlessDevice {
    /// Device with immediately signaling fences
    pub fn new() -> Arc<Self> {
        Self::with_fence_policy(FencePolicy::Immediate)
    }

    /// Device with the given fence policy
    pub fn with_fence_policy(fence_policy: FencePolicy) -> Arc<Self> {
        Arc::new(Self {
            fence_policy,
            pending_fences: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(0),
        })
    }

    /// Signal the oldest pending fence (manual policy)
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

    /// Signal every pending fence in submission order (manual policy)
    pub fn signal_all_fences(&self) {
        let mut pending = self.pending_fences.lock().unwrap();
        while let Some(fence) = pending.pop_front() {
            fence.signal();
        }
    }

    /// Number of copy submissions accepted so far
    pub fn submission_count(&self) -> u64 {
        *self.submissions.lock().unwrap()
    }

    fn execute(&self, command: &CopyCommand) -> Result<()> {
        match command {
            CopyCommand::CopyBuffer { src, src_offset, dst, dst_offset, size, .. } => {
                let src = downcast_buffer(src.as_ref())?;
                let dst = downcast_buffer(dst.as_ref())?;
                let data = src.read(*src_offset, *size)?;
                dst.write(*dst_offset, &data)
            }
            CopyCommand::CopyTexture { src, src_offset, src_row_pitch, dst, region, .. } => {
                let src = downcast_buffer(src.as_ref())?;
                let dst = dst
                    .as_any()
                    .downcast_ref::<HeadlessTexture>()
                    .ok_or_else(|| pulsar_render_engine::engine_err!(
                        InvalidResource, "pulsar::headless", "foreign destination texture"))?;
                let info = dst.info().clone();
                if region.array_layer >= info.array_layers
                    || region.mip_level >= info.mip_levels
                {
                    engine_bail!(InvalidResource, "pulsar::headless",
                        "subresource ({}, {}) out of range",
                        region.array_layer, region.mip_level);
                }
                let (w, h) = info.mip_extent(region.mip_level);
                if region.row_start + region.row_count > h {
                    engine_bail!(InvalidResource, "pulsar::headless",
                        "row range {}..{} out of range (height {})",
                        region.row_start, region.row_start + region.row_count, h);
                }
                let row_bytes = (w as u64 * info.format.bytes_per_pixel()) as usize;
                let mut subresources = dst.subresources.lock().unwrap();
                let storage = subresources
                    .entry((region.array_layer, region.mip_level))
                    .or_insert_with(|| vec![0; row_bytes * h as usize]);
                for row in 0..region.row_count as u64 {
                    let staged = src.read(*src_offset + row * *src_row_pitch, row_bytes as u64)?;
                    let at = (region.row_start as u64 + row) as usize * row_bytes;
                    storage[at..at + row_bytes].copy_from_slice(&staged);
                }
                Ok(())
            }
        }
    }
}

fn downcast_buffer<'a>(buffer: &'a dyn Buffer) -> Result<&'a HeadlessBuffer> {
    buffer
        .as_any()
        .downcast_ref::<HeadlessBuffer>()
        .ok_or_else(|| pulsar_render_engine::engine_err!(
            InvalidResource, "pulsar::headless", "foreign buffer handle"))
}

impl RenderDevice for HeadlessDevice {
    fn create_buffer(&self, desc: BufferDesc) -> Result<Arc<dyn Buffer>> {
        Ok(Arc::new(HeadlessBuffer::new(desc)))
    }

    fn create_texture(&self, desc: TextureDesc) -> Result<Arc<dyn Texture>> {
        Ok(Arc::new(HeadlessTexture::new(desc)))
    }

    fn submit_copies(&self, commands: Vec<CopyCommand>) -> Result<Arc<dyn Fence>> {
        for command in &commands {
            self.execute(command)?;
        }
        *self.submissions.lock().unwrap() += 1;
        let fence = match self.fence_policy {
            FencePolicy::Immediate => HeadlessFence::new(true),
            FencePolicy::Manual => {
                let fence = HeadlessFence::new(false);
                self.pending_fences.lock().unwrap().push_back(fence.clone());
                fence
            }
        };
        Ok(fence)
    }

    fn copy_offset_alignment(&self) -> u64 {
        64
    }

    fn copy_row_pitch_alignment(&self) -> u64 {
        256
    }

    fn wait_idle(&self) -> Result<()> {
        // Copies execute at submit; only fences can be outstanding.
        Ok(())
    }
}
