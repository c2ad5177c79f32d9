//! wgpu-based GPU compute backend (Metal / Vulkan / DX12).
//!
//! All work is submitted to a single queue; wgpu executes submissions in
//! order, which supplies the program-order dependency chain the stage
//! relies on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::buffer::DeviceBuffer;
use crate::consts::COMPLEX_WIDTH;
use crate::error::{Result, StageError};
use crate::shape::Shape;

use super::{
    check_page_copy, complex_extent, ComputeBackend, FftDirection, FftPlan, Kernel, KernelInner,
    PlanInner,
};

// ---------------------------------------------------------------------------
// WGSL source units resolvable through load_kernel
// ---------------------------------------------------------------------------

const FFT_UNIT_WGSL: &str = r"
struct SpreadParams { src_w: u32, src_h: u32, padded_w: u32, padded_h: u32 }
struct PackParams { dst_w: u32, dst_h: u32, padded_w: u32, scale: f32 }

@group(0) @binding(0) var<storage, read>       spread_src: array<f32>;
@group(0) @binding(1) var<storage, read_write> spread_dst: array<f32>;
@group(0) @binding(2) var<uniform>             spread_params: SpreadParams;

@group(0) @binding(3) var<storage, read>       pack_src: array<f32>;
@group(0) @binding(4) var<storage, read_write> pack_dst: array<f32>;
@group(0) @binding(5) var<uniform>             pack_params: PackParams;

@compute @workgroup_size(16, 16)
fn fft_spread(@builtin(global_invocation_id) gid: vec3<u32>) {
    let row = gid.y;
    let col = gid.x;
    if row >= spread_params.padded_h || col >= spread_params.padded_w { return; }
    let base = (row * spread_params.padded_w + col) * 2u;
    if row < spread_params.src_h && col < spread_params.src_w {
        spread_dst[base] = spread_src[row * spread_params.src_w + col];
    } else {
        spread_dst[base] = 0.0;
    }
    spread_dst[base + 1u] = 0.0;
}

@compute @workgroup_size(16, 16)
fn fft_pack(@builtin(global_invocation_id) gid: vec3<u32>) {
    let row = gid.y;
    let col = gid.x;
    if row >= pack_params.dst_h || col >= pack_params.dst_w { return; }
    pack_dst[row * pack_params.dst_w + col] =
        pack_src[(row * pack_params.padded_w + col) * 2u] * pack_params.scale;
}
";

const MULT_UNIT_WGSL: &str = r"
struct MultParams { count: u32 }
@group(0) @binding(0) var<storage, read>       a: array<f32>;
@group(0) @binding(1) var<storage, read_write> b: array<f32>;
@group(0) @binding(2) var<uniform>             params: MultParams;
@compute @workgroup_size(256)
fn mult(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= params.count { return; }
    let ar = a[i * 2u];
    let ai = a[i * 2u + 1u];
    let br = b[i * 2u];
    let bi = b[i * 2u + 1u];
    b[i * 2u]      = ar * br - ai * bi;
    b[i * 2u + 1u] = ar * bi + ai * br;
}
";

const FILLZERO_UNIT_WGSL: &str = r"
struct FillParams { count: u32 }
@group(0) @binding(0) var<storage, read_write> data: array<f32>;
@group(0) @binding(1) var<uniform>             params: FillParams;
@compute @workgroup_size(256)
fn fillzero(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x >= params.count { return; }
    data[gid.x] = 0.0;
}
";

// ---------------------------------------------------------------------------
// Internal shaders backing the FFT plan execution
// ---------------------------------------------------------------------------

/// One radix-2 Stockham stage over a batch of interleaved-complex rows.
/// `p` is 1 << stage; after log2(n) stages the rows hold the DFT in natural
/// order. Twiddles are conjugated via `direction` (+1 forward, -1 inverse);
/// neither direction normalizes.
const FFT_STOCKHAM_WGSL: &str = r"
struct FftStageParams { n: u32, p: u32, direction: f32, batch_count: u32 }
@group(0) @binding(0) var<storage, read>       src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<uniform>             params: FftStageParams;
@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let half = params.n / 2u;
    if gid.x >= half * params.batch_count { return; }
    let batch = gid.x / half;
    let i = gid.x % half;
    let p = params.p;
    let k = i % p;
    let j = ((i - k) << 1u) + k;
    let theta = -3.14159265358979 * params.direction * f32(k) / f32(p);
    let wr = cos(theta);
    let wi = sin(theta);
    let base = batch * params.n;
    let ia = (base + i) * 2u;
    let ib = (base + i + half) * 2u;
    let ar = src[ia];
    let ai = src[ia + 1u];
    let br = src[ib];
    let bi = src[ib + 1u];
    let tr = wr * br - wi * bi;
    let ti = wr * bi + wi * br;
    let oa = (base + j) * 2u;
    let ob = (base + j + p) * 2u;
    dst[oa] = ar + tr;
    dst[oa + 1u] = ai + ti;
    dst[ob] = ar - tr;
    dst[ob + 1u] = ai - ti;
}
";

const TRANSPOSE_COMPLEX_WGSL: &str = r"
struct TransposeParams { rows: u32, cols: u32 }
@group(0) @binding(0) var<storage, read>       input:  array<f32>;
@group(0) @binding(1) var<storage, read_write> output: array<f32>;
@group(0) @binding(2) var<uniform>             params: TransposeParams;
@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let row = gid.y;
    let col = gid.x;
    if row >= params.rows || col >= params.cols { return; }
    let i = (row * params.cols + col) * 2u;
    let o = (col * params.rows + row) * 2u;
    output[o] = input[i];
    output[o + 1u] = input[i + 1u];
}
";

// ---------------------------------------------------------------------------
// Uniform parameter structs (must match WGSL layouts exactly)
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SpreadParams {
    src_w: u32,
    src_h: u32,
    padded_w: u32,
    padded_h: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct PackParams {
    dst_w: u32,
    dst_h: u32,
    padded_w: u32,
    scale: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CountParams {
    count: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FftStageParams {
    n: u32,
    p: u32,
    direction: f32,
    batch_count: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct TransposeParams {
    rows: u32,
    cols: u32,
}

const fn div_ceil(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}

// ---------------------------------------------------------------------------
// Plan: per-stage uniforms baked at construction
// ---------------------------------------------------------------------------

pub(crate) struct WgpuPlan {
    rows_forward: Vec<wgpu::Buffer>,
    rows_inverse: Vec<wgpu::Buffer>,
    cols_forward: Vec<wgpu::Buffer>,
    cols_inverse: Vec<wgpu::Buffer>,
}

// ---------------------------------------------------------------------------
// WgpuBackend
// ---------------------------------------------------------------------------

pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_name: String,
    fft_stage_pipeline: wgpu::ComputePipeline,
    transpose_pipeline: wgpu::ComputePipeline,
    kernels: Mutex<HashMap<(String, String), Arc<wgpu::ComputePipeline>>>,
}

impl WgpuBackend {
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| StageError::ContextUnavailable(format!("no suitable GPU adapter: {e}")))?;

        let adapter_name = adapter.get_info().name.clone();
        tracing::info!("GPU adapter: {adapter_name}");

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("fftconv"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            },
        ))
        .map_err(|e| StageError::ContextUnavailable(format!("failed to create device: {e}")))?;

        let device: Arc<wgpu::Device> = Arc::new(device);
        let queue: Arc<wgpu::Queue> = Arc::new(queue);

        let fft_mod = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("fft_stockham"),
            source: wgpu::ShaderSource::Wgsl(FFT_STOCKHAM_WGSL.into()),
        });
        let tc_mod = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("transpose_complex"),
            source: wgpu::ShaderSource::Wgsl(TRANSPOSE_COMPLEX_WGSL.into()),
        });

        let pipe = |module: &wgpu::ShaderModule, entry: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: None,
                layout: None,
                module,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        Ok(Self {
            adapter_name,
            fft_stage_pipeline: pipe(&fft_mod, "main"),
            transpose_pipeline: pipe(&tc_mod, "main"),
            kernels: Mutex::new(HashMap::new()),
            device,
            queue,
        })
    }

    fn unit_source(unit: &str, entry: &str) -> Option<&'static str> {
        match (unit, entry) {
            ("fft.wgsl", "fft_spread" | "fft_pack") => Some(FFT_UNIT_WGSL),
            ("mult.wgsl", "mult") => Some(MULT_UNIT_WGSL),
            ("fillzero.wgsl", "fillzero") => Some(FILLZERO_UNIT_WGSL),
            _ => None,
        }
    }

    // --- Buffer helpers ---

    fn create_storage(&self, data: &[f32]) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: None,
                contents: bytemuck::cast_slice(data),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
            })
    }

    fn create_storage_uninit(&self, byte_size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: None,
            size: byte_size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn create_uniform<T: Pod>(&self, data: &T) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: None,
                contents: bytemuck::bytes_of(data),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            })
    }

    fn download_f32(&self, buffer: &wgpu::Buffer) -> Result<Vec<f32>> {
        let size = buffer.size();
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: None,
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut enc = self.device.create_command_encoder(&Default::default());
        enc.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(enc.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        slice.map_async(wgpu::MapMode::Read, move |r| {
            tx.send(r).ok();
        });
        self.device.poll(wgpu::PollType::wait_indefinitely()).ok();
        rx.recv()
            .map_err(|_| StageError::Dispatch("GPU readback channel closed".into()))?
            .map_err(|e| StageError::Dispatch(format!("buffer mapping failed: {e}")))?;

        let data = slice.get_mapped_range();
        let result: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging.unmap();
        Ok(result)
    }

    /// Dispatch a single compute pass with one bind group at group(0).
    fn dispatch(
        &self,
        pipeline: &wgpu::ComputePipeline,
        entries: &[wgpu::BindGroupEntry],
        workgroups: (u32, u32, u32),
    ) {
        let layout = pipeline.get_bind_group_layout(0);
        let bg = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &layout,
            entries,
        });
        let mut enc = self.device.create_command_encoder(&Default::default());
        {
            let mut pass = enc.begin_compute_pass(&Default::default());
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bg, &[]);
            pass.dispatch_workgroups(workgroups.0, workgroups.1, workgroups.2);
        }
        self.queue.submit(std::iter::once(enc.finish()));
    }

    // --- FFT internal helpers ---

    /// Run batched 1-D Stockham stages over rows of length `n`. Returns the
    /// buffer holding the result.
    fn fft_1d_batch(
        &self,
        input: &wgpu::Buffer,
        n: u32,
        batch_count: u32,
        stage_uniforms: &[wgpu::Buffer],
    ) -> wgpu::Buffer {
        let byte_size = (n as u64) * (batch_count as u64) * COMPLEX_WIDTH as u64 * 4;
        let buf_a = self.create_storage_uninit(byte_size);
        let buf_b = self.create_storage_uninit(byte_size);
        let num_stages = stage_uniforms.len();

        let layout = self.fft_stage_pipeline.get_bind_group_layout(0);
        let total_butterflies = (n / 2) * batch_count;
        let wg_x = div_ceil(total_butterflies.max(1), 256);

        let mut enc = self.device.create_command_encoder(&Default::default());
        enc.copy_buffer_to_buffer(input, 0, &buf_a, 0, byte_size);

        for (stage, uniform) in stage_uniforms.iter().enumerate() {
            let (src, dst) = if stage % 2 == 0 {
                (&buf_a, &buf_b)
            } else {
                (&buf_b, &buf_a)
            };

            let bg = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: None,
                layout: &layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: src.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: dst.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: uniform.as_entire_binding(),
                    },
                ],
            });

            {
                let mut pass = enc.begin_compute_pass(&Default::default());
                pass.set_pipeline(&self.fft_stage_pipeline);
                pass.set_bind_group(0, &bg, &[]);
                pass.dispatch_workgroups(wg_x, 1, 1);
            }
        }

        self.queue.submit(std::iter::once(enc.finish()));

        // Result lands in buf_a for an even stage count, buf_b for odd
        if num_stages % 2 == 0 {
            buf_a
        } else {
            buf_b
        }
    }

    /// Transpose a complex matrix from (rows, cols) to (cols, rows).
    fn transpose_complex(&self, input: &wgpu::Buffer, rows: u32, cols: u32) -> wgpu::Buffer {
        let byte_size = (rows as u64) * (cols as u64) * COMPLEX_WIDTH as u64 * 4;
        let output = self.create_storage_uninit(byte_size);
        let uniform = self.create_uniform(&TransposeParams { rows, cols });

        self.dispatch(
            &self.transpose_pipeline,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: input.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: output.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform.as_entire_binding(),
                },
            ],
            (div_ceil(cols, 16), div_ceil(rows, 16), 1),
        );
        output
    }

    fn stage_uniforms(&self, n: u32, batch_count: u32, direction: f32) -> Vec<wgpu::Buffer> {
        (0..n.trailing_zeros())
            .map(|s| {
                self.create_uniform(&FftStageParams {
                    n,
                    p: 1 << s,
                    direction,
                    batch_count,
                })
            })
            .collect()
    }

    fn pipeline_for(&self, unit: &str, entry: &str) -> Result<Arc<wgpu::ComputePipeline>> {
        let key = (unit.to_string(), entry.to_string());
        let mut cache = self
            .kernels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(pipeline) = cache.get(&key) {
            return Ok(Arc::clone(pipeline));
        }
        let source = Self::unit_source(unit, entry).ok_or_else(|| {
            StageError::ResourceAcquisition {
                unit: unit.into(),
                entry: entry.into(),
                reason: "no such source unit or entry point".into(),
            }
        })?;
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(unit),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        let pipeline = Arc::new(
            self.device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(entry),
                    layout: None,
                    module: &module,
                    entry_point: Some(entry),
                    compilation_options: Default::default(),
                    cache: None,
                }),
        );
        cache.insert(key, Arc::clone(&pipeline));
        Ok(pipeline)
    }
}

fn gpu_kernel(kernel: &Kernel) -> Result<&Arc<wgpu::ComputePipeline>> {
    match &kernel.inner {
        KernelInner::Wgpu(pipeline) => Ok(pipeline),
        _ => Err(StageError::Dispatch(
            "kernel does not belong to the GPU backend".into(),
        )),
    }
}

// ---------------------------------------------------------------------------
// ComputeBackend implementation
// ---------------------------------------------------------------------------

impl ComputeBackend for WgpuBackend {
    fn name(&self) -> &str {
        &self.adapter_name
    }

    fn is_gpu(&self) -> bool {
        true
    }

    fn load_kernel(&self, unit: &str, entry: &str) -> Result<Kernel> {
        let pipeline = self.pipeline_for(unit, entry)?;
        Ok(Kernel {
            inner: KernelInner::Wgpu(pipeline),
        })
    }

    fn alloc(&self, shape: &Shape) -> Result<DeviceBuffer> {
        if shape.is_empty() {
            return Err(StageError::InvalidInput(format!(
                "cannot allocate empty extent {shape}"
            )));
        }
        // wgpu zero-initializes fresh buffers
        let buffer = self.create_storage_uninit(shape.len() as u64 * 4);
        Ok(DeviceBuffer::from_wgpu(buffer, shape.clone()))
    }

    fn upload(&self, data: &[f32], shape: Shape) -> Result<DeviceBuffer> {
        if data.len() != shape.len() {
            return Err(StageError::InvalidInput(format!(
                "upload of {} samples into extent {shape}",
                data.len()
            )));
        }
        Ok(DeviceBuffer::from_wgpu(self.create_storage(data), shape))
    }

    fn download(&self, buf: &DeviceBuffer) -> Result<Vec<f32>> {
        let mut data = self.download_f32(buf.wgpu()?)?;
        data.truncate(buf.shape().len());
        Ok(data)
    }

    fn fill_zero(&self, kernel: &Kernel, buf: &mut DeviceBuffer) -> Result<()> {
        let pipeline = gpu_kernel(kernel)?;
        let count = buf.shape().len() as u32;
        let uniform = self.create_uniform(&CountParams { count });
        self.dispatch(
            pipeline,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buf.wgpu()?.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: uniform.as_entire_binding(),
                },
            ],
            (div_ceil(count, 256), 1, 1),
        );
        Ok(())
    }

    fn spread(&self, kernel: &Kernel, src: &DeviceBuffer, dst: &mut DeviceBuffer) -> Result<()> {
        let pipeline = gpu_kernel(kernel)?;
        let (src_w, src_h) = (src.shape().width(), src.shape().height());
        let (pw, ph) = complex_extent(dst.shape())?;
        if src_w > pw || src_h > ph {
            return Err(StageError::Dispatch(format!(
                "spread source {src_w}x{src_h} exceeds padded extent {pw}x{ph}"
            )));
        }
        let uniform = self.create_uniform(&SpreadParams {
            src_w: src_w as u32,
            src_h: src_h as u32,
            padded_w: pw as u32,
            padded_h: ph as u32,
        });
        self.dispatch(
            pipeline,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: src.wgpu()?.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: dst.wgpu()?.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform.as_entire_binding(),
                },
            ],
            (div_ceil(pw as u32, 16), div_ceil(ph as u32, 16), 1),
        );
        Ok(())
    }

    fn pack(
        &self,
        kernel: &Kernel,
        src: &DeviceBuffer,
        dst: &mut DeviceBuffer,
        scale: f32,
    ) -> Result<()> {
        let pipeline = gpu_kernel(kernel)?;
        let (pw, ph) = complex_extent(src.shape())?;
        let (dst_w, dst_h) = (dst.shape().width(), dst.shape().height());
        if dst_w > pw || dst_h > ph {
            return Err(StageError::Dispatch(format!(
                "pack destination {dst_w}x{dst_h} exceeds padded extent {pw}x{ph}"
            )));
        }
        let uniform = self.create_uniform(&PackParams {
            dst_w: dst_w as u32,
            dst_h: dst_h as u32,
            padded_w: pw as u32,
            scale,
        });
        self.dispatch(
            pipeline,
            &[
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: src.wgpu()?.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: dst.wgpu()?.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: uniform.as_entire_binding(),
                },
            ],
            (div_ceil(dst_w as u32, 16), div_ceil(dst_h as u32, 16), 1),
        );
        Ok(())
    }

    fn complex_mul(&self, kernel: &Kernel, a: &DeviceBuffer, b: &mut DeviceBuffer) -> Result<()> {
        let pipeline = gpu_kernel(kernel)?;
        if a.shape() != b.shape() {
            return Err(StageError::Dispatch(format!(
                "complex_mul extents differ: {} vs {}",
                a.shape(),
                b.shape()
            )));
        }
        let (pw, ph) = complex_extent(a.shape())?;
        let count = (pw * ph) as u32;
        let uniform = self.create_uniform(&CountParams { count });
        self.dispatch(
            pipeline,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: a.wgpu()?.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: b.wgpu()?.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform.as_entire_binding(),
                },
            ],
            (div_ceil(count, 256), 1, 1),
        );
        Ok(())
    }

    fn copy_page(&self, src: &DeviceBuffer, page: usize, dst: &mut DeviceBuffer) -> Result<()> {
        let stride = check_page_copy(src.shape(), dst.shape(), page, src.shape().batch())?;
        let byte_stride = stride as u64 * 4;
        let mut enc = self.device.create_command_encoder(&Default::default());
        enc.copy_buffer_to_buffer(
            src.wgpu()?,
            page as u64 * byte_stride,
            dst.wgpu()?,
            0,
            byte_stride,
        );
        self.queue.submit(std::iter::once(enc.finish()));
        Ok(())
    }

    fn paste_page(&self, src: &DeviceBuffer, dst: &mut DeviceBuffer, page: usize) -> Result<()> {
        let stride = check_page_copy(dst.shape(), src.shape(), page, dst.shape().batch())?;
        let byte_stride = stride as u64 * 4;
        let mut enc = self.device.create_command_encoder(&Default::default());
        enc.copy_buffer_to_buffer(
            src.wgpu()?,
            0,
            dst.wgpu()?,
            page as u64 * byte_stride,
            byte_stride,
        );
        self.queue.submit(std::iter::once(enc.finish()));
        Ok(())
    }

    fn plan_fft(&self, width: usize, height: usize) -> Result<FftPlan> {
        if width == 0 || height == 0 || !width.is_power_of_two() || !height.is_power_of_two() {
            return Err(StageError::UnsupportedExtent {
                width,
                height,
                reason: "radix-2 GPU transforms require power-of-two extents".into(),
            });
        }
        let plan = WgpuPlan {
            rows_forward: self.stage_uniforms(width as u32, height as u32, 1.0),
            rows_inverse: self.stage_uniforms(width as u32, height as u32, -1.0),
            cols_forward: self.stage_uniforms(height as u32, width as u32, 1.0),
            cols_inverse: self.stage_uniforms(height as u32, width as u32, -1.0),
        };
        Ok(FftPlan::new(PlanInner::Wgpu(plan), width, height))
    }

    fn fft(&self, plan: &FftPlan, buf: &mut DeviceBuffer, direction: FftDirection) -> Result<()> {
        let gpu_plan = match &plan.inner {
            PlanInner::Wgpu(p) => p,
            _ => {
                return Err(StageError::Dispatch(
                    "plan does not belong to the GPU backend".into(),
                ))
            }
        };
        if *buf.shape() != plan.spectral_shape() {
            return Err(StageError::Dispatch(format!(
                "transform buffer extent {} does not match plan extent {}",
                buf.shape(),
                plan.spectral_shape()
            )));
        }
        let (w, h) = (plan.width() as u32, plan.height() as u32);
        let (row_stages, col_stages) = match direction {
            FftDirection::Forward => (&gpu_plan.rows_forward, &gpu_plan.cols_forward),
            FftDirection::Inverse => (&gpu_plan.rows_inverse, &gpu_plan.cols_inverse),
        };

        let buffer = buf.wgpu()?;
        let after_rows = self.fft_1d_batch(buffer, w, h, row_stages);
        let transposed = self.transpose_complex(&after_rows, h, w);
        let after_cols = self.fft_1d_batch(&transposed, h, w, col_stages);
        let result = self.transpose_complex(&after_cols, w, h);

        // Write the result back so the transform is in place for the caller.
        let byte_size = (w as u64) * (h as u64) * COMPLEX_WIDTH as u64 * 4;
        let mut enc = self.device.create_command_encoder(&Default::default());
        enc.copy_buffer_to_buffer(&result, 0, buffer, 0, byte_size);
        self.queue.submit(std::iter::once(enc.finish()));
        Ok(())
    }
}
