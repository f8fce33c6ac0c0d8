//! wgpu device management and the GPU render backend.
//!
//! Buffer layout per submission slot: a storage buffer of packed cell words,
//! a storage output buffer the kernel writes, and a mappable readback buffer.
//! Two slots alternate so the host can upload and dispatch batch k+1 while
//! batch k is still in flight. The atlas buffer is uploaded once at
//! construction and referenced read-only by both slots' bind groups.

use std::sync::mpsc;

use anyhow::{anyhow, bail, Context, Result};
use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::atlas::GlyphAtlas;
use crate::error::{CodedError, DEVICE_UNAVAILABLE};
use crate::frame::FrameGeometry;
use crate::kernel::{RenderBackend, Submission};

const GLYPH_RENDER_WGSL: &str = include_str!("../shaders/wgsl/glyph_render.wgsl");

const WORKGROUP_SIZE: u32 = 8;
const SLOT_COUNT: usize = 2;

/// Matches `KernelParams` in glyph_render.wgsl. 32 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct KernelParams {
    cols: u32,
    rows: u32,
    char_width: u32,
    char_height: u32,
    ramp_len: u32,
    batch: u32,
    _pad0: u32,
    _pad1: u32,
}

pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_name: String,
}

impl GpuContext {
    pub async fn new() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| {
                anyhow::Error::new(CodedError::new(
                    DEVICE_UNAVAILABLE,
                    "no suitable GPU adapter found",
                ))
            })?;
        let adapter_name = adapter.get_info().name;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("glyphcast-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .context("failed to request wgpu device")?;

        Ok(Self {
            device,
            queue,
            adapter_name,
        })
    }
}

/// Completion event for one queue submission. Decouples the pipeline from
/// wgpu's polling model: blocking `wait` or non-blocking `is_signaled`.
pub struct Fence {
    receiver: mpsc::Receiver<()>,
    signaled: bool,
}

impl Fence {
    fn after_submit(queue: &wgpu::Queue) -> Self {
        let (sender, receiver) = mpsc::channel();
        queue.on_submitted_work_done(move || {
            let _ = sender.send(());
        });
        Self {
            receiver,
            signaled: false,
        }
    }

    pub fn wait(&mut self, device: &wgpu::Device) -> Result<()> {
        if self.signaled {
            return Ok(());
        }
        device.poll(wgpu::Maintain::Wait);
        self.receiver
            .recv()
            .map_err(|_| anyhow!("device completion channel closed"))?;
        self.signaled = true;
        Ok(())
    }

    pub fn is_signaled(&mut self, device: &wgpu::Device) -> bool {
        if self.signaled {
            return true;
        }
        device.poll(wgpu::Maintain::Poll);
        if self.receiver.try_recv().is_ok() {
            self.signaled = true;
        }
        self.signaled
    }
}

struct InFlight {
    batch: usize,
    fence: Fence,
}

struct Slot {
    cells: wgpu::Buffer,
    out: wgpu::Buffer,
    readback: wgpu::Buffer,
    params: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    in_flight: Option<InFlight>,
}

pub struct GpuBackend {
    context: GpuContext,
    pipeline: wgpu::ComputePipeline,
    slots: Vec<Slot>,
    next_slot: usize,
    geometry: FrameGeometry,
    ramp_len: u32,
    max_batch: usize,
    dispatches: u64,
}

impl GpuBackend {
    pub fn new(
        context: GpuContext,
        atlas: &GlyphAtlas,
        geometry: FrameGeometry,
        max_batch: usize,
    ) -> Result<Self> {
        let max_batch = max_batch.max(1);
        let out_bytes = (max_batch * geometry.out_bytes()) as u64;
        let binding_limit = context.device.limits().max_storage_buffer_binding_size as u64;
        if out_bytes > binding_limit {
            bail!(
                "batch of {max_batch} needs a {out_bytes} byte output buffer, device limit is {binding_limit}; lower --batch-size"
            );
        }

        let device = &context.device;
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("glyph-render"),
            source: wgpu::ShaderSource::Wgsl(GLYPH_RENDER_WGSL.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("glyph-render-bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("glyph-render-layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("glyph-render-pipeline"),
            layout: Some(&layout),
            module: &module,
            entry_point: "render_glyphs",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        // Write-once atlas upload; the bind groups keep it alive.
        let atlas_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("glyph-atlas"),
            contents: bytemuck::cast_slice(&atlas.packed_words()),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let cells_bytes = (max_batch * geometry.cell_count() * 4) as u64;
        let slots = (0..SLOT_COUNT)
            .map(|i| {
                let cells = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("glyph-cells-{i}")),
                    size: cells_bytes,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                let out = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("glyph-out-{i}")),
                    size: out_bytes,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                });
                let readback = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("glyph-readback-{i}")),
                    size: out_bytes,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("glyph-params-{i}")),
                    contents: bytemuck::bytes_of(&KernelParams::zeroed()),
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                });

                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&format!("glyph-render-bg-{i}")),
                    layout: &bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: params.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: cells.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: atlas_buffer.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: out.as_entire_binding(),
                        },
                    ],
                });

                Slot {
                    cells,
                    out,
                    readback,
                    params,
                    bind_group,
                    in_flight: None,
                }
            })
            .collect();

        Ok(Self {
            context,
            pipeline,
            slots,
            next_slot: 0,
            geometry,
            ramp_len: atlas.ramp_len(),
            max_batch,
            dispatches: 0,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.context.adapter_name
    }
}

impl RenderBackend for GpuBackend {
    fn dispatch(&mut self, cells: &[u32], batch: usize) -> Result<Submission> {
        let cell_count = self.geometry.cell_count();
        if batch == 0 || batch > self.max_batch {
            bail!("batch of {batch} outside 1..={}", self.max_batch);
        }
        if cells.len() < batch * cell_count {
            bail!(
                "bad batch: {} cells for batch of {batch} ({cell_count} cells/frame)",
                cells.len()
            );
        }

        let slot_index = self.next_slot;
        self.next_slot = (self.next_slot + 1) % self.slots.len();
        let slot = &mut self.slots[slot_index];
        if slot.in_flight.is_some() {
            bail!("submission slot {slot_index} still in flight; collect it first");
        }

        let params = KernelParams {
            cols: self.geometry.cols(),
            rows: self.geometry.rows(),
            char_width: self.geometry.char_width,
            char_height: self.geometry.char_height,
            ramp_len: self.ramp_len,
            batch: batch as u32,
            _pad0: 0,
            _pad1: 0,
        };
        let queue = &self.context.queue;
        queue.write_buffer(&slot.params, 0, bytemuck::bytes_of(&params));
        queue.write_buffer(
            &slot.cells,
            0,
            bytemuck::cast_slice(&cells[..batch * cell_count]),
        );

        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("glyph-render-encoder"),
                });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("glyph-render-pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &slot.bind_group, &[]);
            pass.dispatch_workgroups(
                self.geometry.out_width().div_ceil(WORKGROUP_SIZE),
                self.geometry.out_height().div_ceil(WORKGROUP_SIZE),
                batch as u32,
            );
        }
        let copy_bytes = (batch * self.geometry.out_bytes()) as u64;
        encoder.copy_buffer_to_buffer(&slot.out, 0, &slot.readback, 0, copy_bytes);

        queue.submit(Some(encoder.finish()));
        let fence = Fence::after_submit(queue);
        slot.in_flight = Some(InFlight { batch, fence });
        self.dispatches += 1;
        Ok(Submission(slot_index))
    }

    fn collect(&mut self, submission: Submission) -> Result<Vec<Vec<u8>>> {
        let slot = self
            .slots
            .get_mut(submission.0)
            .ok_or_else(|| anyhow!("unknown submission slot {}", submission.0))?;
        let InFlight { batch, mut fence } = slot
            .in_flight
            .take()
            .ok_or_else(|| anyhow!("collect of slot {} with nothing in flight", submission.0))?;

        let device = &self.context.device;
        fence.wait(device)?;

        let out_bytes = self.geometry.out_bytes();
        let slice = slot.readback.slice(0..(batch * out_bytes) as u64);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| anyhow!("readback map channel closed"))?
            .context("failed to map readback buffer")?;

        let frames = {
            let data = slice.get_mapped_range();
            data.chunks_exact(out_bytes).map(<[u8]>::to_vec).collect()
        };
        slot.readback.unmap();
        Ok(frames)
    }

    fn dispatch_count(&self) -> u64 {
        self.dispatches
    }
}
