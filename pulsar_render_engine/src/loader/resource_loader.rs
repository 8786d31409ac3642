/// ResourceLoader - asynchronous upload orchestration
///
/// Producers enqueue load/update requests from any thread; data is staged
/// into the arena on the enqueue path (blocking when the staging budget is
/// exhausted), requests accumulate in the pending batch, and a background
/// worker flushes batches to the device and retires them in issuance order
/// as their fences signal.
///
/// Batch lifecycle: PENDING (accumulating) -> SUBMITTED (commands handed
/// to the device, token issued) -> COMPLETED (fence confirmed, staging
/// released, temp buffers freed).

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::{engine_bail, engine_debug, engine_err, engine_error, engine_info};
use crate::error::{Error, Result};
use crate::device::{
    Buffer, BufferUsage, CopyCommand, Fence, RenderDevice, ResourceState, Texture,
    TextureCopyRegion, TextureDesc, TextureUsage,
};
use crate::loader::convert::{convert_subresource, gpu_format, staged_bytes_per_pixel};
use crate::loader::request::{
    BufferLoadDesc, BufferUpdateDesc, RawImageData, ResourceUpdateDesc, TextureLoadDesc,
    TextureUpdateDesc, UploadRequest,
};
use crate::loader::staging::{align_up, StagingAllocation, StagingArena};
use crate::loader::token::{CompletionTracker, SyncToken};

const SOURCE: &str = "pulsar::ResourceLoader";

/// Default staging buffer size in bytes
#[cfg(not(any(target_os = "ios", target_os = "android")))]
pub const DEFAULT_STAGING_BUFFER_SIZE: u64 = 80_000_000;
/// Default staging buffer size in bytes (constrained platforms)
#[cfg(any(target_os = "ios", target_os = "android"))]
pub const DEFAULT_STAGING_BUFFER_SIZE: u64 = 60_000_000;

/// Implicit flush once the pending batch holds this many requests
const MAX_BATCH_REQUESTS: usize = 64;

/// Chunk size for zero-fill writes
const ZERO_CHUNK: usize = 64 * 1024;

// ===== LOADER DESC =====

/// Resource loader configuration
#[derive(Debug, Clone)]
pub struct ResourceLoaderDesc {
    /// Size of one staging ring buffer in bytes; also the largest
    /// contiguous transfer the loader accepts without chunking
    pub staging_buffer_size: u64,
    /// Number of staging ring buffers
    pub staging_buffer_count: u32,
    /// How often the worker flushes accumulated requests absent an
    /// explicit flush, in milliseconds
    pub timeslice_ms: u64,
    /// Upper bound on how long an enqueue may block waiting for staging
    /// space; `None` blocks until the worker frees some
    pub reserve_timeout: Option<Duration>,
}

impl Default for ResourceLoaderDesc {
    fn default() -> Self {
        Self {
            staging_buffer_size: DEFAULT_STAGING_BUFFER_SIZE,
            staging_buffer_count: 1,
            timeslice_ms: 16,
            reserve_timeout: None,
        }
    }
}

// ===== BATCH BOOKKEEPING =====

/// The accumulating (PENDING) batch
struct PendingBatch {
    /// Token this batch will be issued as
    token: SyncToken,
    /// Copy commands in enqueue order
    commands: Vec<CopyCommand>,
    /// Conversion/source buffers owned by this batch, dropped at COMPLETED
    temp_buffers: Vec<Vec<u8>>,
    staged_bytes: u64,
    requests: usize,
}

impl PendingBatch {
    fn new(token: SyncToken) -> Self {
        Self {
            token,
            commands: Vec::new(),
            temp_buffers: Vec::new(),
            staged_bytes: 0,
            requests: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// A SUBMITTED batch, held only by the worker until its fence signals
struct InFlightBatch {
    token: SyncToken,
    fence: Arc<dyn Fence>,
    temp_buffers: Vec<Vec<u8>>,
}

/// Mutable loader state, guarded by the queue mutex
struct LoaderState {
    arena: StagingArena,
    pending: PendingBatch,
    flush_requested: bool,
    shutdown: bool,
    /// First device failure; poisons the loader
    error: Option<Error>,
    /// Destination resource -> last token targeting it, pruned lazily
    busy: FxHashMap<usize, SyncToken>,
}

impl LoaderState {
    fn take_pending(&mut self) -> PendingBatch {
        let next = SyncToken(self.pending.token.0 + 1);
        std::mem::replace(&mut self.pending, PendingBatch::new(next))
    }

    /// Token of the most recently issued batch
    fn last_issued(&self) -> SyncToken {
        SyncToken(self.pending.token.0 - 1)
    }
}

struct Shared {
    state: Mutex<LoaderState>,
    /// Wakes the worker: flush requested, shutdown
    worker_cv: Condvar,
    /// Wakes producers and waiters: batch completed, staging released,
    /// error recorded
    completion_cv: Condvar,
    completed: CompletionTracker,
}

// ===== RESOURCE LOADER =====

/// Asynchronous GPU resource loader
///
/// One instance per device; create with [`ResourceLoader::init`] and tear
/// down with [`ResourceLoader::remove`] or by dropping. Any number of
/// threads may submit requests concurrently.
pub struct ResourceLoader {
    device: Arc<dyn RenderDevice>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    byte_threshold: u64,
    reserve_timeout: Option<Duration>,
}

impl ResourceLoader {
    /// Create the loader: allocates the staging arena and starts the
    /// background worker thread
    ///
    /// # Arguments
    ///
    /// * `device` - Device surface executing the copies
    /// * `desc` - Staging budget and worker configuration
    pub fn init(device: Arc<dyn RenderDevice>, desc: ResourceLoaderDesc) -> Result<Self> {
        let arena = StagingArena::new(
            device.as_ref(),
            desc.staging_buffer_size,
            desc.staging_buffer_count,
        )?;
        let shared = Arc::new(Shared {
            state: Mutex::new(LoaderState {
                arena,
                pending: PendingBatch::new(SyncToken(1)),
                flush_requested: false,
                shutdown: false,
                error: None,
                busy: FxHashMap::default(),
            }),
            worker_cv: Condvar::new(),
            completion_cv: Condvar::new(),
            completed: CompletionTracker::new(),
        });

        let timeslice = Duration::from_millis(desc.timeslice_ms.max(1));
        let worker_device = device.clone();
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("pulsar-resource-loader".to_string())
            .spawn(move || worker_loop(worker_device, worker_shared, timeslice))
            .map_err(|e| {
                engine_err!(InitializationFailed, SOURCE, "failed to spawn worker thread: {}", e)
            })?;

        engine_info!(SOURCE,
            "resource loader initialized ({} staging buffers x {} bytes, {} ms timeslice)",
            desc.staging_buffer_count, desc.staging_buffer_size, desc.timeslice_ms);

        Ok(Self {
            device,
            shared,
            worker: Some(worker),
            byte_threshold: desc.staging_buffer_size / 2,
            reserve_timeout: desc.reserve_timeout,
        })
    }

    /// The device this loader submits to
    pub fn device(&self) -> &Arc<dyn RenderDevice> {
        &self.device
    }

    // ===== ADD RESOURCE =====

    /// Create a buffer and schedule the upload of its initial contents
    ///
    /// With `batch = false` the request is flushed to the worker
    /// immediately; observe completion with
    /// [`wait_batch_completed`](Self::wait_batch_completed). With
    /// `batch = true` it accumulates until an explicit flush, a threshold,
    /// or the worker timeslice.
    pub fn add_buffer(&self, desc: BufferLoadDesc, batch: bool) -> Result<Arc<dyn Buffer>> {
        let (buffer, _) = self.add_buffer_internal(desc, batch)?;
        Ok(buffer)
    }

    /// Token-tracked variant of [`add_buffer`](Self::add_buffer)
    pub fn add_buffer_with_token(
        &self,
        desc: BufferLoadDesc,
    ) -> Result<(Arc<dyn Buffer>, SyncToken)> {
        self.add_buffer_internal(desc, true)
    }

    fn add_buffer_internal(
        &self,
        desc: BufferLoadDesc,
        batch: bool,
    ) -> Result<(Arc<dyn Buffer>, SyncToken)> {
        if desc.desc.size == 0 {
            engine_bail!(InvalidResource, SOURCE, "zero-size buffer load");
        }
        if let Some(data) = &desc.data {
            if data.len() as u64 > desc.desc.size {
                engine_bail!(InvalidResource, SOURCE,
                    "buffer load data of {} bytes exceeds buffer size {}",
                    data.len(), desc.desc.size);
            }
        }
        let buffer = self.device.create_buffer(desc.desc.clone())?;

        // Host-visible destinations are written directly on the calling
        // thread; no staging round-trip, nothing to track.
        if buffer.host_visible() {
            if desc.force_reset {
                write_zeros_direct(buffer.as_ref(), buffer.size())?;
            } else if let Some(data) = &desc.data {
                if !data.is_empty() {
                    buffer.update(0, data)?;
                }
            }
            return Ok((buffer, SyncToken::COMPLETE));
        }

        let has_data = desc.data.as_ref().is_some_and(|data| !data.is_empty());
        if !has_data && !desc.force_reset {
            return Ok((buffer, SyncToken::COMPLETE));
        }
        let token = self.enqueue(
            UploadRequest::BufferLoad {
                buffer: buffer.clone(),
                data: if desc.force_reset { None } else { desc.data },
                force_reset: desc.force_reset,
            },
            batch,
        )?;
        Ok((buffer, token))
    }

    /// Create a texture and schedule the upload of its initial contents
    pub fn add_texture(&self, desc: TextureLoadDesc, batch: bool) -> Result<Arc<dyn Texture>> {
        let (texture, _) = self.add_texture_internal(desc, batch)?;
        Ok(texture)
    }

    /// Token-tracked variant of [`add_texture`](Self::add_texture)
    pub fn add_texture_with_token(
        &self,
        desc: TextureLoadDesc,
    ) -> Result<(Arc<dyn Texture>, SyncToken)> {
        self.add_texture_internal(desc, true)
    }

    fn add_texture_internal(
        &self,
        desc: TextureLoadDesc,
        batch: bool,
    ) -> Result<(Arc<dyn Texture>, SyncToken)> {
        let tex_desc = match (&desc.desc, &desc.raw) {
            (Some(explicit), raw) => {
                if let Some(raw) = raw {
                    validate_raw_geometry(raw, explicit)?;
                }
                explicit.clone()
            }
            (None, Some(raw)) => TextureDesc {
                width: raw.width,
                height: raw.height,
                format: gpu_format(raw.format, desc.srgb)?,
                usage: TextureUsage::Sampled,
                array_layers: raw.array_size,
                mip_levels: raw.mip_levels,
            },
            (None, None) => {
                engine_bail!(InvalidResource, SOURCE,
                    "texture load needs a descriptor or raw image data");
            }
        };
        let texture = self.device.create_texture(tex_desc)?;
        let token = match desc.raw {
            Some(raw) => {
                validate_raw_data(&raw)?;
                self.enqueue(
                    UploadRequest::TextureLoad { texture: texture.clone(), raw },
                    batch,
                )?
            }
            None => SyncToken::COMPLETE,
        };
        Ok((texture, token))
    }

    // ===== UPDATE RESOURCE =====

    /// Schedule an update of an existing buffer
    pub fn update_buffer(&self, desc: BufferUpdateDesc, batch: bool) -> Result<()> {
        self.update_buffer_internal(desc, batch).map(|_| ())
    }

    /// Token-tracked variant of [`update_buffer`](Self::update_buffer)
    pub fn update_buffer_with_token(&self, desc: BufferUpdateDesc) -> Result<SyncToken> {
        self.update_buffer_internal(desc, true)
    }

    fn update_buffer_internal(&self, desc: BufferUpdateDesc, batch: bool) -> Result<SyncToken> {
        let size = if desc.size == 0 {
            desc.buffer.size().saturating_sub(desc.dst_offset)
        } else {
            desc.size
        };
        if size == 0 {
            engine_bail!(InvalidResource, SOURCE, "zero-size buffer update");
        }
        if desc.dst_offset + size > desc.buffer.size() {
            engine_bail!(InvalidResource, SOURCE,
                "buffer update of {} bytes at offset {} exceeds buffer size {}",
                size, desc.dst_offset, desc.buffer.size());
        }
        if desc.src_offset + size > desc.data.len() as u64 {
            engine_bail!(InvalidResource, SOURCE,
                "buffer update source data too small: need {} bytes from offset {}, have {}",
                size, desc.src_offset, desc.data.len());
        }

        if desc.buffer.host_visible() {
            let src = desc.src_offset as usize;
            desc.buffer
                .update(desc.dst_offset, &desc.data[src..src + size as usize])?;
            return Ok(SyncToken::COMPLETE);
        }

        self.enqueue(
            UploadRequest::BufferUpdate {
                buffer: desc.buffer,
                data: desc.data,
                src_offset: desc.src_offset,
                dst_offset: desc.dst_offset,
                size,
            },
            batch,
        )
    }

    /// Schedule an update of an existing texture
    pub fn update_texture(&self, desc: TextureUpdateDesc, batch: bool) -> Result<()> {
        self.update_texture_internal(desc, batch).map(|_| ())
    }

    /// Token-tracked variant of [`update_texture`](Self::update_texture)
    pub fn update_texture_with_token(&self, desc: TextureUpdateDesc) -> Result<SyncToken> {
        self.update_texture_internal(desc, true)
    }

    fn update_texture_internal(&self, desc: TextureUpdateDesc, batch: bool) -> Result<SyncToken> {
        let info = desc.texture.info().clone();
        if desc.raw.width != info.width
            || desc.raw.height != info.height
            || desc.raw.array_size != info.array_layers
            || desc.raw.mip_levels != info.mip_levels
        {
            engine_bail!(InvalidResource, SOURCE,
                "texture update geometry {}x{} ({} layers, {} mips) does not match \
                 texture {}x{} ({} layers, {} mips)",
                desc.raw.width, desc.raw.height, desc.raw.array_size, desc.raw.mip_levels,
                info.width, info.height, info.array_layers, info.mip_levels);
        }
        if gpu_format(desc.raw.format, info.format.is_srgb())? != info.format {
            engine_bail!(InvalidResource, SOURCE,
                "raw image format {:?} is not uploadable to a {:?} texture",
                desc.raw.format, info.format);
        }
        validate_raw_data(&desc.raw)?;

        self.enqueue(
            UploadRequest::TextureUpdate {
                texture: desc.texture,
                raw: desc.raw,
            },
            batch,
        )
    }

    /// Schedule a batched group of buffer/texture updates
    ///
    /// Entries are applied to their destinations in slice order; a later
    /// entry targeting the same resource wins.
    pub fn update_resources(&self, descs: Vec<ResourceUpdateDesc>) -> Result<()> {
        self.update_resources_with_token(descs).map(|_| ())
    }

    /// Token-tracked variant of [`update_resources`](Self::update_resources)
    pub fn update_resources_with_token(
        &self,
        descs: Vec<ResourceUpdateDesc>,
    ) -> Result<SyncToken> {
        let mut token = SyncToken::COMPLETE;
        for desc in descs {
            let issued = match desc {
                ResourceUpdateDesc::Buffer(buffer) => self.update_buffer_internal(buffer, true)?,
                ResourceUpdateDesc::Texture(texture) => {
                    self.update_texture_internal(texture, true)?
                }
            };
            token = token.max(issued);
        }
        Ok(token)
    }

    // ===== COMPLETION =====

    /// Whether every enqueued request has completed
    pub fn is_batch_completed(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        state.pending.is_empty() && self.shared.completed.is_completed(state.last_issued())
    }

    /// Block until every enqueued request has completed
    ///
    /// Surfaces a recorded device failure as an error.
    pub fn wait_batch_completed(&self) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if state.pending.is_empty() && self.shared.completed.is_completed(state.last_issued())
            {
                return Ok(());
            }
            if let Some(err) = &state.error {
                return Err(err.clone());
            }
            state = self.shared.completion_cv.wait(state).unwrap();
        }
    }

    /// Non-blocking completion check for a token; never takes the queue
    /// mutex
    pub fn is_token_completed(&self, token: SyncToken) -> bool {
        self.shared.completed.is_completed(token)
    }

    /// Block until `token` completes
    ///
    /// If the token belongs to the still-accumulating batch a flush is
    /// requested, so the wait is bounded by worker progress.
    pub fn wait_token_completed(&self, token: SyncToken) -> Result<()> {
        if self.shared.completed.is_completed(token) {
            return Ok(());
        }
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if self.shared.completed.is_completed(token) {
                return Ok(());
            }
            if let Some(err) = &state.error {
                return Err(err.clone());
            }
            if token >= state.pending.token && !state.pending.is_empty() {
                state.flush_requested = true;
                self.shared.worker_cv.notify_one();
            }
            state = self.shared.completion_cv.wait(state).unwrap();
        }
    }

    // ===== FLUSH / FINISH =====

    /// Force the pending batch to the worker now
    ///
    /// Returns the token of the flushed batch, or the last issued token
    /// when there is nothing pending (idempotent).
    pub fn flush(&self) -> SyncToken {
        let mut state = self.shared.state.lock().unwrap();
        if state.pending.is_empty() {
            state.last_issued()
        } else {
            state.flush_requested = true;
            self.shared.worker_cv.notify_one();
            state.pending.token
        }
    }

    /// Full barrier: flush and block until every outstanding batch has
    /// completed
    pub fn finish(&self) -> Result<()> {
        self.flush();
        self.wait_batch_completed()
    }

    // ===== REMOVE RESOURCE =====

    /// Unregister a buffer scheduled for destruction
    ///
    /// Fails with `ResourceBusy` while an in-flight upload still targets
    /// the buffer. The GPU object itself is released when the last `Arc`
    /// drops.
    pub fn remove_buffer(&self, buffer: &Arc<dyn Buffer>) -> Result<()> {
        self.remove_resource(buffer_key(buffer), "buffer")
    }

    /// Unregister a texture scheduled for destruction
    ///
    /// Fails with `ResourceBusy` while an in-flight upload still targets
    /// the texture.
    pub fn remove_texture(&self, texture: &Arc<dyn Texture>) -> Result<()> {
        self.remove_resource(texture_key(texture), "texture")
    }

    fn remove_resource(&self, key: usize, kind: &str) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        if let Some(&token) = state.busy.get(&key) {
            if !self.shared.completed.is_completed(token) {
                engine_bail!(ResourceBusy, SOURCE,
                    "{} still targeted by an in-flight upload (token {})",
                    kind, token.value());
            }
            state.busy.remove(&key);
        }
        Ok(())
    }

    // ===== TEARDOWN =====

    /// Drain outstanding work, stop the worker, and tear the loader down
    ///
    /// Surfaces a device failure recorded during the drain.
    pub fn remove(mut self) -> Result<()> {
        self.shutdown_worker();
        let state = self.shared.state.lock().unwrap();
        match &state.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn shutdown_worker(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
        }
        self.shared.worker_cv.notify_all();
        let _ = worker.join();
        engine_info!(SOURCE, "resource loader shut down");
    }

    // ===== ENQUEUE PATH =====

    /// Stage a request into the pending batch and apply the flush policy
    fn enqueue(&self, request: UploadRequest, batch: bool) -> Result<SyncToken> {
        let key = destination_key(&request);
        let state = self.shared.state.lock().unwrap();
        if let Some(err) = &state.error {
            return Err(err.clone());
        }
        if state.shutdown {
            engine_bail!(InitializationFailed, SOURCE, "resource loader is shutting down");
        }

        let (mut state, token) = self.stage_request(state, request)?;
        state.pending.requests += 1;
        state.busy.insert(key, token);

        let implicit = state.pending.requests >= MAX_BATCH_REQUESTS
            || state.pending.staged_bytes >= self.byte_threshold;
        if !batch || implicit {
            state.flush_requested = true;
            self.shared.worker_cv.notify_one();
        }
        Ok(token)
    }

    /// Reduce a request to staged copy commands; exhaustive over the
    /// request variants
    fn stage_request<'a>(
        &self,
        state: MutexGuard<'a, LoaderState>,
        request: UploadRequest,
    ) -> Result<(MutexGuard<'a, LoaderState>, SyncToken)> {
        match request {
            UploadRequest::BufferLoad { buffer, data, force_reset } => {
                if force_reset {
                    let size = buffer.size();
                    self.stage_zero_fill(state, buffer, size)
                } else {
                    let data = data.unwrap_or_default();
                    self.stage_buffer_copy(state, buffer, data, 0, 0, u64::MAX)
                }
            }
            UploadRequest::BufferUpdate { buffer, data, src_offset, dst_offset, size } => {
                self.stage_buffer_copy(state, buffer, data, src_offset, dst_offset, size)
            }
            UploadRequest::TextureLoad { texture, raw }
            | UploadRequest::TextureUpdate { texture, raw } => {
                self.stage_texture(state, texture, raw)
            }
        }
    }

    /// Stage one contiguous buffer write: reserve, copy into staging,
    /// record the copy command, hand the source bytes to the batch
    fn stage_buffer_copy<'a>(
        &self,
        state: MutexGuard<'a, LoaderState>,
        buffer: Arc<dyn Buffer>,
        data: Vec<u8>,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    ) -> Result<(MutexGuard<'a, LoaderState>, SyncToken)> {
        let size = size.min(data.len() as u64 - src_offset);
        let (mut state, allocation) = self.reserve_blocking(state, size)?;
        let src = src_offset as usize;
        allocation
            .buffer
            .update(allocation.offset, &data[src..src + size as usize])?;

        let token = state.pending.token;
        let final_state = buffer_final_state(buffer.usage());
        state.pending.commands.push(CopyCommand::CopyBuffer {
            src: allocation.buffer,
            src_offset: allocation.offset,
            dst: buffer,
            dst_offset,
            size,
            dst_final_state: final_state,
        });
        state.pending.staged_bytes += size;
        state.pending.temp_buffers.push(data);
        Ok((state, token))
    }

    /// Stage a zero fill of `size` bytes at the start of `buffer`
    fn stage_zero_fill<'a>(
        &self,
        state: MutexGuard<'a, LoaderState>,
        buffer: Arc<dyn Buffer>,
        size: u64,
    ) -> Result<(MutexGuard<'a, LoaderState>, SyncToken)> {
        let (mut state, allocation) = self.reserve_blocking(state, size)?;
        let zeros = vec![0u8; ZERO_CHUNK.min(size as usize)];
        let mut written = 0u64;
        while written < size {
            let chunk = (size - written).min(zeros.len() as u64);
            allocation
                .buffer
                .update(allocation.offset + written, &zeros[..chunk as usize])?;
            written += chunk;
        }

        let token = state.pending.token;
        let final_state = buffer_final_state(buffer.usage());
        state.pending.commands.push(CopyCommand::CopyBuffer {
            src: allocation.buffer,
            src_offset: allocation.offset,
            dst: buffer,
            dst_offset: 0,
            size,
            dst_final_state: final_state,
        });
        state.pending.staged_bytes += size;
        Ok((state, token))
    }

    /// Convert and stage every subresource of a texture upload
    ///
    /// Subresources larger than one staging buffer are chunked into row
    /// ranges; chunks may land in different batches when staging space
    /// runs out in between, preserving enqueue order throughout. Returns
    /// the token of the batch that received the final chunk.
    fn stage_texture<'a>(
        &self,
        mut state: MutexGuard<'a, LoaderState>,
        texture: Arc<dyn Texture>,
        raw: RawImageData,
    ) -> Result<(MutexGuard<'a, LoaderState>, SyncToken)> {
        let pitch_alignment = self.device.copy_row_pitch_alignment().max(1);
        let mut token = state.pending.token;

        for layer in 0..raw.array_size {
            for mip in 0..raw.mip_levels {
                let width = (raw.width >> mip).max(1);
                let height = (raw.height >> mip).max(1);
                let row_pitch = align_up(
                    width as u64 * staged_bytes_per_pixel(raw.format),
                    pitch_alignment,
                );
                let max_rows = (state.arena.buffer_size() / row_pitch) as u32;
                if max_rows == 0 {
                    engine_bail!(Configuration, SOURCE,
                        "a single {}-byte texture row exceeds the staging capacity of {} bytes",
                        row_pitch, state.arena.buffer_size());
                }
                let staged = convert_subresource(&raw, layer, mip, row_pitch)?;

                let mut row = 0u32;
                while row < height {
                    let rows = max_rows.min(height - row);
                    let chunk = rows as u64 * row_pitch;
                    let (guard, allocation) = self.reserve_blocking(state, chunk)?;
                    state = guard;
                    let start = row as usize * row_pitch as usize;
                    allocation
                        .buffer
                        .update(allocation.offset, &staged[start..start + chunk as usize])?;

                    token = state.pending.token;
                    state.pending.commands.push(CopyCommand::CopyTexture {
                        src: allocation.buffer,
                        src_offset: allocation.offset,
                        src_row_pitch: row_pitch,
                        dst: texture.clone(),
                        region: TextureCopyRegion {
                            mip_level: mip,
                            array_layer: layer,
                            row_start: row,
                            row_count: rows,
                        },
                        dst_final_state: ResourceState::SHADER_RESOURCE,
                    });
                    state.pending.staged_bytes += chunk;
                    row += rows;
                }
                state.pending.temp_buffers.push(staged);
            }
        }
        Ok((state, token))
    }

    /// Reserve staging space, blocking while the candidate range is owned
    /// by an incomplete token
    ///
    /// Requests an implicit flush before waiting so the space being waited
    /// on is actually draining. Fails permanently for sizes that can never
    /// fit, and with `Configuration` when the configured reserve timeout
    /// elapses.
    fn reserve_blocking<'a>(
        &self,
        mut state: MutexGuard<'a, LoaderState>,
        size: u64,
    ) -> Result<(MutexGuard<'a, LoaderState>, StagingAllocation)> {
        let deadline = self.reserve_timeout.map(|timeout| Instant::now() + timeout);
        loop {
            if let Some(err) = &state.error {
                return Err(err.clone());
            }
            if state.shutdown {
                engine_bail!(InitializationFailed, SOURCE, "resource loader is shutting down");
            }
            let token = state.pending.token;
            if let Some(allocation) = state.arena.try_reserve(size, token)? {
                return Ok((state, allocation));
            }

            state.flush_requested = true;
            self.shared.worker_cv.notify_one();
            state = match deadline {
                None => self.shared.completion_cv.wait(state).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        engine_bail!(Configuration, SOURCE,
                            "timed out waiting for {} bytes of staging space", size);
                    }
                    let (guard, _) = self
                        .shared
                        .completion_cv
                        .wait_timeout(state, deadline - now)
                        .unwrap();
                    guard
                }
            };
        }
    }
}

impl Drop for ResourceLoader {
    fn drop(&mut self) {
        self.shutdown_worker();
    }
}

// ===== HELPERS =====

fn buffer_key(buffer: &Arc<dyn Buffer>) -> usize {
    Arc::as_ptr(buffer) as *const () as usize
}

fn texture_key(texture: &Arc<dyn Texture>) -> usize {
    Arc::as_ptr(texture) as *const () as usize
}

fn destination_key(request: &UploadRequest) -> usize {
    match request {
        UploadRequest::BufferLoad { buffer, .. }
        | UploadRequest::BufferUpdate { buffer, .. } => buffer_key(buffer),
        UploadRequest::TextureLoad { texture, .. }
        | UploadRequest::TextureUpdate { texture, .. } => texture_key(texture),
    }
}

/// State a buffer transitions to once its upload has executed
fn buffer_final_state(usage: BufferUsage) -> ResourceState {
    match usage {
        BufferUsage::Vertex | BufferUsage::Uniform => ResourceState::VERTEX_AND_UNIFORM_BUFFER,
        BufferUsage::Index => ResourceState::INDEX_BUFFER,
        BufferUsage::Storage => ResourceState::SHADER_RESOURCE,
        BufferUsage::Staging => ResourceState::COPY_DEST,
    }
}

fn write_zeros_direct(buffer: &dyn Buffer, size: u64) -> Result<()> {
    let zeros = vec![0u8; ZERO_CHUNK.min(size as usize)];
    let mut written = 0u64;
    while written < size {
        let chunk = (size - written).min(zeros.len() as u64);
        buffer.update(written, &zeros[..chunk as usize])?;
        written += chunk;
    }
    Ok(())
}

fn validate_raw_geometry(raw: &RawImageData, desc: &TextureDesc) -> Result<()> {
    if raw.width != desc.width
        || raw.height != desc.height
        || raw.array_size != desc.array_layers
        || raw.mip_levels != desc.mip_levels
    {
        engine_bail!(InvalidResource, SOURCE,
            "raw image geometry {}x{} ({} layers, {} mips) does not match \
             texture descriptor {}x{} ({} layers, {} mips)",
            raw.width, raw.height, raw.array_size, raw.mip_levels,
            desc.width, desc.height, desc.array_layers, desc.mip_levels);
    }
    if gpu_format(raw.format, desc.format.is_srgb())? != desc.format {
        engine_bail!(InvalidResource, SOURCE,
            "raw image format {:?} is not uploadable to a {:?} texture",
            raw.format, desc.format);
    }
    Ok(())
}

fn validate_raw_data(raw: &RawImageData) -> Result<()> {
    if raw.width == 0 || raw.height == 0 || raw.array_size == 0 || raw.mip_levels == 0 {
        engine_bail!(InvalidResource, SOURCE, "degenerate raw image geometry");
    }
    let expected = raw.expected_data_len();
    if (raw.data.len() as u64) < expected {
        engine_bail!(InvalidResource, SOURCE,
            "raw image data truncated: need {} bytes, have {}",
            expected, raw.data.len());
    }
    Ok(())
}

// ===== WORKER LOOP =====

/// The background consumer: flushes pending batches to the device and
/// retires submitted batches strictly in issuance order
fn worker_loop(device: Arc<dyn RenderDevice>, shared: Arc<Shared>, timeslice: Duration) {
    let mut in_flight: VecDeque<InFlightBatch> = VecDeque::new();
    let mut last_flush = Instant::now();

    loop {
        // Take the pending batch if a flush is due; otherwise sleep until
        // one of the wake conditions (flush signal, timeslice, shutdown).
        let taken = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if state.shutdown {
                    break;
                }
                if state.error.is_some() {
                    // Poisoned: nothing will be submitted or retired again.
                    // Drop anything in flight and sleep until teardown.
                    if !in_flight.is_empty() {
                        break;
                    }
                    let (guard, _) = shared.worker_cv.wait_timeout(state, timeslice).unwrap();
                    state = guard;
                    continue;
                }
                if state.flush_requested && !state.pending.is_empty() {
                    break;
                }
                let elapsed = last_flush.elapsed();
                if elapsed >= timeslice {
                    if state.pending.is_empty() {
                        state.flush_requested = false;
                        last_flush = Instant::now();
                        continue;
                    }
                    break;
                }
                if !in_flight.is_empty() {
                    // The fence wait below is the sleep.
                    break;
                }
                let (guard, _) = shared
                    .worker_cv
                    .wait_timeout(state, timeslice - elapsed)
                    .unwrap();
                state = guard;
            }

            let due = state.shutdown
                || (state.flush_requested && !state.pending.is_empty())
                || last_flush.elapsed() >= timeslice;
            if due && !state.pending.is_empty() && state.error.is_none() {
                state.flush_requested = false;
                Some(state.take_pending())
            } else {
                if state.pending.is_empty() {
                    state.flush_requested = false;
                }
                None
            }
        };

        if let Some(batch) = taken {
            last_flush = Instant::now();
            engine_debug!(SOURCE, "submitting batch {} ({} copies, {} bytes staged)",
                batch.token.value(), batch.commands.len(), batch.staged_bytes);
            match device.submit_copies(batch.commands) {
                Ok(fence) => in_flight.push_back(InFlightBatch {
                    token: batch.token,
                    fence,
                    temp_buffers: batch.temp_buffers,
                }),
                Err(err) => {
                    engine_error!(SOURCE, "device rejected batch {}: {}",
                        batch.token.value(), err);
                    let mut state = shared.state.lock().unwrap();
                    state.error.get_or_insert(Error::DeviceSubmission(format!(
                        "batch {} rejected: {}",
                        batch.token.value(),
                        err
                    )));
                    shared.completion_cv.notify_all();
                }
            }
        }

        // Retire the oldest submitted batch; the device completes FIFO, so
        // waiting on the front fence never waits out of order. After a
        // device error nothing will confirm: drop the in-flight list
        // instead of waiting on fences that may never signal.
        let poisoned = shared.state.lock().unwrap().error.is_some();
        if poisoned {
            in_flight.clear();
        } else if let Some(front) = in_flight.pop_front() {
            match front.fence.wait() {
                Ok(()) => {
                    let mut state = shared.state.lock().unwrap();
                    shared.completed.advance(front.token);
                    state.arena.release_through(front.token);
                    let completed = &shared.completed;
                    state.busy.retain(|_, token| !completed.is_completed(*token));
                    drop(front.temp_buffers);
                    shared.completion_cv.notify_all();
                }
                Err(err) => {
                    engine_error!(SOURCE, "fence wait for batch {} failed: {}",
                        front.token.value(), err);
                    let mut state = shared.state.lock().unwrap();
                    state.error.get_or_insert(Error::DeviceSubmission(format!(
                        "fence wait for batch {} failed: {}",
                        front.token.value(),
                        err
                    )));
                    shared.completion_cv.notify_all();
                }
            }
        }

        {
            let state = shared.state.lock().unwrap();
            if state.shutdown
                && in_flight.is_empty()
                && (state.pending.is_empty() || state.error.is_some())
            {
                shared.completion_cv.notify_all();
                break;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "resource_loader_tests.rs"]
mod tests;
