//! Direct3D 11 staging readback backend
//!
//! Same rotation as the GL path: copy the backbuffer into one of N
//! staging textures per frame, map each one only after the others have
//! cycled through. Multisampled backbuffers are resolved first. The row
//! pitch comes from the first mapped texture, so the session format is
//! announced on the first delivered frame rather than at init.

use tracing::{debug, info, warn};

use windows::Win32::Graphics::Direct3D11::{
    D3D11_CPU_ACCESS_READ, D3D11_MAP_READ, D3D11_MAPPED_SUBRESOURCE, D3D11_TEXTURE2D_DESC,
    D3D11_USAGE_DEFAULT, D3D11_USAGE_STAGING, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
    DXGI_FORMAT_R10G10B10A2_UNORM, DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
    DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::IDXGISwapChain;

use pipe_protocol::{PixelFormat, VideoFormat};

use crate::{BackendKind, CaptureError, CaptureResult, CaptureSink, GraphicsBackend, NUM_FRAME_SLOTS};

pub struct D3d11Backend {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    swap_chain: IDXGISwapChain,
    staging: [Option<ID3D11Texture2D>; NUM_FRAME_SLOTS],
    resolve: Option<ID3D11Texture2D>,
    staged: [bool; NUM_FRAME_SLOTS],
    timestamps: [i64; NUM_FRAME_SLOTS],
    cur: usize,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    store_format: DXGI_FORMAT,
    initialized: bool,
    format_refused: bool,
    size_warned: bool,
    conv_warned: bool,
    divider_warned: bool,
}

/// SRGB backbuffers capture as their linear siblings; anything outside
/// the supported set refuses to start.
fn map_format(format: DXGI_FORMAT) -> (PixelFormat, DXGI_FORMAT) {
    match format {
        DXGI_FORMAT_B8G8R8A8_UNORM => (PixelFormat::Bgra8, format),
        DXGI_FORMAT_B8G8R8A8_UNORM_SRGB => (PixelFormat::Bgra8, DXGI_FORMAT_B8G8R8A8_UNORM),
        DXGI_FORMAT_R8G8B8A8_UNORM => (PixelFormat::Rgba8, format),
        DXGI_FORMAT_R8G8B8A8_UNORM_SRGB => (PixelFormat::Rgba8, DXGI_FORMAT_R8G8B8A8_UNORM),
        DXGI_FORMAT_R10G10B10A2_UNORM => (PixelFormat::Rgb10A2, format),
        _ => (PixelFormat::Unknown, format),
    }
}

impl D3d11Backend {
    pub fn new(
        device: ID3D11Device,
        context: ID3D11DeviceContext,
        swap_chain: IDXGISwapChain,
    ) -> Self {
        Self {
            device,
            context,
            swap_chain,
            staging: [const { None }; NUM_FRAME_SLOTS],
            resolve: None,
            staged: [false; NUM_FRAME_SLOTS],
            timestamps: [0; NUM_FRAME_SLOTS],
            cur: 0,
            width: 0,
            height: 0,
            pixel_format: PixelFormat::Unknown,
            store_format: DXGI_FORMAT::default(),
            initialized: false,
            format_refused: false,
            size_warned: false,
            conv_warned: false,
            divider_warned: false,
        }
    }

    fn backbuffer(&self) -> CaptureResult<ID3D11Texture2D> {
        unsafe { self.swap_chain.GetBuffer(0) }
            .map_err(|e| CaptureError::CaptureFailed(format!("get backbuffer: {e}")))
    }

    fn create_texture(&self, desc: &D3D11_TEXTURE2D_DESC) -> CaptureResult<ID3D11Texture2D> {
        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe { self.device.CreateTexture2D(desc, None, Some(&mut texture)) }
            .map_err(|e| CaptureError::InitFailed(format!("create texture: {e}")))?;
        texture.ok_or_else(|| CaptureError::InitFailed("texture creation returned nothing".into()))
    }

    fn try_init(&mut self) -> CaptureResult<bool> {
        let back = self.backbuffer()?;
        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { back.GetDesc(&mut desc) };

        if desc.Width == 0 || desc.Height == 0 {
            if !self.size_warned {
                self.size_warned = true;
                warn!("backbuffer is 0x0, waiting for a real size");
            }
            return Ok(false);
        }
        self.size_warned = false;

        let (pixel_format, store_format) = map_format(desc.Format);
        if pixel_format == PixelFormat::Unknown {
            if !self.format_refused {
                self.format_refused = true;
                warn!(format = ?desc.Format, "unsupported backbuffer format, not capturing");
            }
            return Ok(false);
        }
        if desc.Format != store_format {
            debug!(format = ?desc.Format, "srgb backbuffer, capturing linear");
        }

        // Staging copies must match the backbuffer size; the announced
        // frame crops to even dimensions instead
        self.width = desc.Width & !1;
        self.height = desc.Height & !1;
        self.pixel_format = pixel_format;
        self.store_format = store_format;

        let staging_desc = D3D11_TEXTURE2D_DESC {
            Width: desc.Width,
            Height: desc.Height,
            MipLevels: 1,
            ArraySize: 1,
            Format: store_format,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_STAGING,
            BindFlags: 0,
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            MiscFlags: 0,
        };
        for slot in 0..NUM_FRAME_SLOTS {
            self.staging[slot] = Some(self.create_texture(&staging_desc)?);
        }

        if desc.SampleDesc.Count > 1 {
            let resolve_desc = D3D11_TEXTURE2D_DESC {
                Usage: D3D11_USAGE_DEFAULT,
                CPUAccessFlags: 0,
                ..staging_desc
            };
            self.resolve = Some(self.create_texture(&resolve_desc)?);
            info!(samples = desc.SampleDesc.Count, "resolving multisampled backbuffer");
        }

        self.cur = NUM_FRAME_SLOTS - 1;
        self.staged = [false; NUM_FRAME_SLOTS];
        self.initialized = true;
        info!(
            width = self.width,
            height = self.height,
            pixel_format = ?self.pixel_format,
            "d3d11 capture initialized"
        );
        Ok(true)
    }

    fn capture_frame(&mut self, sink: &mut CaptureSink, timestamp: i64) -> CaptureResult<()> {
        self.cur = (self.cur + 1) % NUM_FRAME_SLOTS;

        let oldest = (self.cur + 1) % NUM_FRAME_SLOTS;
        if self.staged[oldest] {
            self.staged[oldest] = false;
            let staging = self.staging[oldest]
                .as_ref()
                .ok_or_else(|| CaptureError::CaptureFailed("staging slot missing".into()))?;

            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            unsafe { self.context.Map(staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped)) }
                .map_err(|e| CaptureError::CaptureFailed(format!("map staging: {e}")))?;

            if !sink.video_started() {
                sink.begin_video(VideoFormat {
                    width: self.width,
                    height: self.height,
                    pixel_format: self.pixel_format,
                    vflip: false,
                    pitch: mapped.RowPitch,
                })?;
            }

            let bytes = unsafe {
                std::slice::from_raw_parts(
                    mapped.pData as *const u8,
                    mapped.RowPitch as usize * self.height as usize,
                )
            };
            let result = sink.write_frame(self.timestamps[oldest], bytes);
            unsafe { self.context.Unmap(staging, 0) };
            result?;
        }

        let back = self.backbuffer()?;
        let staging = self.staging[self.cur]
            .as_ref()
            .ok_or_else(|| CaptureError::CaptureFailed("staging slot missing".into()))?;
        unsafe {
            match self.resolve.as_ref() {
                Some(resolve) => {
                    self.context
                        .ResolveSubresource(resolve, 0, &back, 0, self.store_format);
                    self.context.CopyResource(staging, resolve);
                }
                None => self.context.CopyResource(staging, &back),
            }
        }
        self.timestamps[self.cur] = timestamp;
        self.staged[self.cur] = true;
        Ok(())
    }
}

impl GraphicsBackend for D3d11Backend {
    fn kind(&self) -> BackendKind {
        BackendKind::D3d11
    }

    fn present(&mut self, sink: &mut CaptureSink) -> CaptureResult<()> {
        sink.state().saw_backend(BackendKind::D3d11);

        if !sink.state().ready() {
            if !sink.state().active() && self.initialized {
                self.free();
                sink.end_video();
            }
            return Ok(());
        }

        if !self.initialized && !self.try_init()? {
            return Ok(());
        }

        if !sink.video_started() {
            let settings = sink.state().settings();
            if settings.gpu_color_conv && !self.conv_warned {
                self.conv_warned = true;
                warn!("gpu color conversion not supported on d3d11, capturing packed");
            }
            if settings.size_divider > 1 && !self.divider_warned {
                self.divider_warned = true;
                warn!(
                    size_divider = settings.size_divider,
                    "downscale not supported on d3d11, capturing full size"
                );
            }
        }

        let timestamp = sink.state().frame_timestamp();
        self.capture_frame(sink, timestamp)
    }

    fn free(&mut self) {
        self.staging = [const { None }; NUM_FRAME_SLOTS];
        self.resolve = None;
        self.staged = [false; NUM_FRAME_SLOTS];
        self.width = 0;
        self.height = 0;
        self.initialized = false;
        debug!("d3d11 capture resources freed");
    }
}
