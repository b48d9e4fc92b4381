//! OpenGL readback backend
//!
//! Copies the backbuffer into a rotating set of textures via an FBO blit,
//! queues texture-to-PBO transfers, and maps each PBO only after the
//! other slots have cycled through, so the CPU never waits on an
//! in-flight GPU transfer. Entry points come from a host-supplied loader;
//! all host GL bindings touched here are saved and restored.

use std::ffi::c_void;

use tracing::{debug, info, warn};

use pipe_protocol::{PixelFormat, VideoFormat};

use crate::{BackendKind, CaptureError, CaptureResult, CaptureSink, GraphicsBackend, NUM_FRAME_SLOTS};

pub type GLenum = u32;
pub type GLboolean = u8;
pub type GLint = i32;
pub type GLuint = u32;
pub type GLsizei = i32;
pub type GLsizeiptr = isize;

pub const GL_NO_ERROR: GLenum = 0;
pub const GL_VIEWPORT: GLenum = 0x0BA2;
pub const GL_TEXTURE_2D: GLenum = 0x0DE1;
pub const GL_TEXTURE_BINDING_2D: GLenum = 0x8069;
pub const GL_RGBA: GLenum = 0x1908;
pub const GL_BGRA: GLenum = 0x80E1;
pub const GL_UNSIGNED_BYTE: GLenum = 0x1401;
pub const GL_READ_ONLY: GLenum = 0x88B8;
pub const GL_STREAM_READ: GLenum = 0x88E1;
pub const GL_PIXEL_PACK_BUFFER: GLenum = 0x88EB;
pub const GL_PIXEL_PACK_BUFFER_BINDING: GLenum = 0x88ED;
pub const GL_DRAW_FRAMEBUFFER: GLenum = 0x8CA9;
pub const GL_DRAW_FRAMEBUFFER_BINDING: GLenum = 0x8CA6;
pub const GL_COLOR_ATTACHMENT0: GLenum = 0x8CE0;
pub const GL_BACK: GLenum = 0x0405;
pub const GL_COLOR_BUFFER_BIT: GLenum = 0x0000_4000;
pub const GL_LINEAR: GLenum = 0x2601;

/// The GL entry points the backend needs, resolved through the host's
/// `GetProcAddress`-style loader.
pub struct GlFns {
    get_error: unsafe extern "system" fn() -> GLenum,
    get_integerv: unsafe extern "system" fn(GLenum, *mut GLint),
    gen_buffers: unsafe extern "system" fn(GLsizei, *mut GLuint),
    delete_buffers: unsafe extern "system" fn(GLsizei, *const GLuint),
    bind_buffer: unsafe extern "system" fn(GLenum, GLuint),
    buffer_data: unsafe extern "system" fn(GLenum, GLsizeiptr, *const c_void, GLenum),
    map_buffer: unsafe extern "system" fn(GLenum, GLenum) -> *mut c_void,
    unmap_buffer: unsafe extern "system" fn(GLenum) -> GLboolean,
    gen_textures: unsafe extern "system" fn(GLsizei, *mut GLuint),
    delete_textures: unsafe extern "system" fn(GLsizei, *const GLuint),
    bind_texture: unsafe extern "system" fn(GLenum, GLuint),
    tex_image_2d: unsafe extern "system" fn(
        GLenum,
        GLint,
        GLint,
        GLsizei,
        GLsizei,
        GLint,
        GLenum,
        GLenum,
        *const c_void,
    ),
    get_tex_image: unsafe extern "system" fn(GLenum, GLint, GLenum, GLenum, *mut c_void),
    gen_framebuffers: unsafe extern "system" fn(GLsizei, *mut GLuint),
    delete_framebuffers: unsafe extern "system" fn(GLsizei, *const GLuint),
    bind_framebuffer: unsafe extern "system" fn(GLenum, GLuint),
    framebuffer_texture_2d: unsafe extern "system" fn(GLenum, GLenum, GLenum, GLuint, GLint),
    read_buffer: unsafe extern "system" fn(GLenum),
    draw_buffer: unsafe extern "system" fn(GLenum),
    blit_framebuffer: unsafe extern "system" fn(
        GLint,
        GLint,
        GLint,
        GLint,
        GLint,
        GLint,
        GLint,
        GLint,
        GLenum,
        GLenum,
    ),
}

impl GlFns {
    /// Resolve every entry point through `loader`. Fails on the first
    /// symbol the loader cannot find.
    pub fn load_with<F>(mut loader: F) -> CaptureResult<Self>
    where
        F: FnMut(&str) -> *const c_void,
    {
        let mut get = |name: &'static str| -> CaptureResult<*const c_void> {
            let ptr = loader(name);
            if ptr.is_null() {
                Err(CaptureError::MissingGlFunction(name))
            } else {
                Ok(ptr)
            }
        };

        unsafe {
            Ok(Self {
                get_error: std::mem::transmute(get("glGetError")?),
                get_integerv: std::mem::transmute(get("glGetIntegerv")?),
                gen_buffers: std::mem::transmute(get("glGenBuffers")?),
                delete_buffers: std::mem::transmute(get("glDeleteBuffers")?),
                bind_buffer: std::mem::transmute(get("glBindBuffer")?),
                buffer_data: std::mem::transmute(get("glBufferData")?),
                map_buffer: std::mem::transmute(get("glMapBuffer")?),
                unmap_buffer: std::mem::transmute(get("glUnmapBuffer")?),
                gen_textures: std::mem::transmute(get("glGenTextures")?),
                delete_textures: std::mem::transmute(get("glDeleteTextures")?),
                bind_texture: std::mem::transmute(get("glBindTexture")?),
                tex_image_2d: std::mem::transmute(get("glTexImage2D")?),
                get_tex_image: std::mem::transmute(get("glGetTexImage")?),
                gen_framebuffers: std::mem::transmute(get("glGenFramebuffers")?),
                delete_framebuffers: std::mem::transmute(get("glDeleteFramebuffers")?),
                bind_framebuffer: std::mem::transmute(get("glBindFramebuffer")?),
                framebuffer_texture_2d: std::mem::transmute(get("glFramebufferTexture2D")?),
                read_buffer: std::mem::transmute(get("glReadBuffer")?),
                draw_buffer: std::mem::transmute(get("glDrawBuffer")?),
                blit_framebuffer: std::mem::transmute(get("glBlitFramebuffer")?),
            })
        }
    }
}

/// PBO readback backend for OpenGL hosts.
///
/// Construct with the context current, then call
/// [`CaptureHost::on_present`](crate::CaptureHost::on_present) right
/// before every buffer swap.
pub struct GlBackend {
    fns: GlFns,
    req_width: GLint,
    req_height: GLint,
    cx: GLsizei,
    cy: GLsizei,
    pitch: usize,
    fbo: GLuint,
    pbos: [GLuint; NUM_FRAME_SLOTS],
    textures: [GLuint; NUM_FRAME_SLOTS],
    staged: [bool; NUM_FRAME_SLOTS],
    timestamps: [i64; NUM_FRAME_SLOTS],
    cur: usize,
    initialized: bool,
    viewport_warned: bool,
    conv_warned: bool,
    divider_warned: bool,
}

impl GlBackend {
    pub fn new<F>(loader: F) -> CaptureResult<Self>
    where
        F: FnMut(&str) -> *const c_void,
    {
        Ok(Self {
            fns: GlFns::load_with(loader)?,
            req_width: 0,
            req_height: 0,
            cx: 0,
            cy: 0,
            pitch: 0,
            fbo: 0,
            pbos: [0; NUM_FRAME_SLOTS],
            textures: [0; NUM_FRAME_SLOTS],
            staged: [false; NUM_FRAME_SLOTS],
            timestamps: [0; NUM_FRAME_SLOTS],
            cur: 0,
            initialized: false,
            viewport_warned: false,
            conv_warned: false,
            divider_warned: false,
        })
    }

    /// Tell the backend the backbuffer size, when the host knows it.
    /// Otherwise the GL viewport is queried at session start.
    pub fn set_backbuffer_size(&mut self, width: u32, height: u32) {
        self.req_width = width as GLint;
        self.req_height = height as GLint;
    }

    fn check(&self, context: &'static str) -> CaptureResult<()> {
        let code = unsafe { (self.fns.get_error)() };
        if code == GL_NO_ERROR {
            Ok(())
        } else {
            Err(CaptureError::GlCall { context, code })
        }
    }

    /// Allocate the readback pipeline. Returns false while the viewport
    /// is still 0x0.
    fn try_init(&mut self) -> CaptureResult<bool> {
        let (mut width, mut height) = (self.req_width, self.req_height);
        if width == 0 || height == 0 {
            let mut viewport: [GLint; 4] = [0; 4];
            unsafe { (self.fns.get_integerv)(GL_VIEWPORT, viewport.as_mut_ptr()) };
            self.check("query viewport")?;
            if viewport[2] > 0 && viewport[3] > 0 {
                width = viewport[2];
                height = viewport[3];
            } else {
                if !self.viewport_warned {
                    self.viewport_warned = true;
                    warn!("0x0 viewport, waiting for a drawable surface");
                }
                return Ok(false);
            }
        }

        // YUV output needs even dimensions
        width += width % 2;
        height += height % 2;

        if let Err(e) = self.alloc_pipeline(width, height) {
            self.free();
            return Err(e);
        }

        self.cx = width;
        self.cy = height;
        self.pitch = width as usize * 4;
        self.cur = NUM_FRAME_SLOTS - 1;
        self.staged = [false; NUM_FRAME_SLOTS];
        self.initialized = true;
        info!(width, height, "gl capture initialized");
        Ok(true)
    }

    fn alloc_pipeline(&mut self, width: GLsizei, height: GLsizei) -> CaptureResult<()> {
        let fns = &self.fns;
        let size = width as isize * height as isize * 4;

        unsafe {
            (fns.gen_buffers)(NUM_FRAME_SLOTS as GLsizei, self.pbos.as_mut_ptr());
            self.check("generate pbos")?;
            (fns.gen_textures)(NUM_FRAME_SLOTS as GLsizei, self.textures.as_mut_ptr());
            self.check("generate textures")?;

            let mut last_pbo: GLint = 0;
            let mut last_tex: GLint = 0;
            (fns.get_integerv)(GL_PIXEL_PACK_BUFFER_BINDING, &mut last_pbo);
            (fns.get_integerv)(GL_TEXTURE_BINDING_2D, &mut last_tex);
            self.check("save bindings")?;

            for slot in 0..NUM_FRAME_SLOTS {
                (fns.bind_buffer)(GL_PIXEL_PACK_BUFFER, self.pbos[slot]);
                self.check("bind pbo")?;
                (fns.buffer_data)(
                    GL_PIXEL_PACK_BUFFER,
                    size,
                    std::ptr::null(),
                    GL_STREAM_READ,
                );
                self.check("allocate pbo")?;

                (fns.bind_texture)(GL_TEXTURE_2D, self.textures[slot]);
                self.check("bind texture")?;
                (fns.tex_image_2d)(
                    GL_TEXTURE_2D,
                    0,
                    GL_RGBA as GLint,
                    width,
                    height,
                    0,
                    GL_BGRA,
                    GL_UNSIGNED_BYTE,
                    std::ptr::null(),
                );
                self.check("allocate texture")?;
            }

            (fns.bind_buffer)(GL_PIXEL_PACK_BUFFER, last_pbo as GLuint);
            (fns.bind_texture)(GL_TEXTURE_2D, last_tex as GLuint);

            (fns.gen_framebuffers)(1, &mut self.fbo);
            self.check("generate fbo")?;
        }
        Ok(())
    }

    fn copy_backbuffer(&self, dst: GLuint) -> CaptureResult<()> {
        let fns = &self.fns;
        unsafe {
            (fns.bind_framebuffer)(GL_DRAW_FRAMEBUFFER, self.fbo);
            self.check("bind capture fbo")?;
            (fns.bind_texture)(GL_TEXTURE_2D, dst);
            self.check("bind copy target")?;
            (fns.framebuffer_texture_2d)(
                GL_DRAW_FRAMEBUFFER,
                GL_COLOR_ATTACHMENT0,
                GL_TEXTURE_2D,
                dst,
                0,
            );
            self.check("attach copy target")?;

            (fns.read_buffer)(GL_BACK);
            (fns.draw_buffer)(GL_COLOR_ATTACHMENT0);
            self.check("select buffers")?;

            (fns.blit_framebuffer)(
                0,
                0,
                self.cx,
                self.cy,
                0,
                0,
                self.cx,
                self.cy,
                GL_COLOR_BUFFER_BIT,
                GL_LINEAR,
            );
            self.check("blit backbuffer")?;
        }
        Ok(())
    }

    /// Queue the async texture-to-PBO transfer.
    fn stage(&self, dst_pbo: GLuint, src_tex: GLuint) -> CaptureResult<()> {
        let fns = &self.fns;
        unsafe {
            (fns.bind_texture)(GL_TEXTURE_2D, src_tex);
            self.check("bind staged texture")?;
            (fns.bind_buffer)(GL_PIXEL_PACK_BUFFER, dst_pbo);
            self.check("bind staging pbo")?;
            (fns.get_tex_image)(
                GL_TEXTURE_2D,
                0,
                GL_BGRA,
                GL_UNSIGNED_BYTE,
                std::ptr::null_mut(),
            );
            self.check("queue readback")?;
        }
        Ok(())
    }

    fn capture_frame(&mut self, sink: &mut CaptureSink, timestamp: i64) -> CaptureResult<()> {
        let mut last_fbo: GLint = 0;
        let mut last_tex: GLint = 0;
        let mut last_pbo: GLint = 0;
        unsafe {
            (self.fns.get_integerv)(GL_DRAW_FRAMEBUFFER_BINDING, &mut last_fbo);
            (self.fns.get_integerv)(GL_TEXTURE_BINDING_2D, &mut last_tex);
            (self.fns.get_integerv)(GL_PIXEL_PACK_BUFFER_BINDING, &mut last_pbo);
        }
        self.check("save bindings")?;

        self.cur = (self.cur + 1) % NUM_FRAME_SLOTS;

        // The slot reused next frame was staged N-1 frames ago; its
        // transfer has had the whole pipeline depth to finish, so mapping
        // it now does not stall.
        let oldest = (self.cur + 1) % NUM_FRAME_SLOTS;
        if self.staged[oldest] {
            self.staged[oldest] = false;
            unsafe {
                (self.fns.bind_buffer)(GL_PIXEL_PACK_BUFFER, self.pbos[oldest]);
                self.check("bind ready pbo")?;
                let ptr = (self.fns.map_buffer)(GL_PIXEL_PACK_BUFFER, GL_READ_ONLY);
                if ptr.is_null() {
                    warn!(slot = oldest, "failed to map staging buffer, frame lost");
                } else {
                    let bytes = std::slice::from_raw_parts(
                        ptr as *const u8,
                        self.cy as usize * self.pitch,
                    );
                    sink.write_frame(self.timestamps[oldest], bytes)?;
                    (self.fns.unmap_buffer)(GL_PIXEL_PACK_BUFFER);
                }
            }
        }

        self.timestamps[self.cur] = timestamp;
        self.copy_backbuffer(self.textures[self.cur])?;
        self.stage(self.pbos[self.cur], self.textures[self.cur])?;
        self.staged[self.cur] = true;

        unsafe {
            (self.fns.bind_texture)(GL_TEXTURE_2D, last_tex as GLuint);
            (self.fns.bind_framebuffer)(GL_DRAW_FRAMEBUFFER, last_fbo as GLuint);
            (self.fns.bind_buffer)(GL_PIXEL_PACK_BUFFER, last_pbo as GLuint);
        }
        Ok(())
    }
}

impl GraphicsBackend for GlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gl
    }

    fn present(&mut self, sink: &mut CaptureSink) -> CaptureResult<()> {
        sink.state().saw_backend(BackendKind::Gl);

        if !sink.state().ready() {
            if !sink.state().active() && self.initialized {
                self.free();
                sink.end_video();
            }
            return Ok(());
        }

        // Clear any error left over from the host's own GL calls
        unsafe { (self.fns.get_error)() };

        if !self.initialized && !self.try_init()? {
            return Ok(());
        }

        if !sink.video_started() {
            let settings = sink.state().settings();
            if settings.gpu_color_conv && !self.conv_warned {
                self.conv_warned = true;
                warn!("gpu color conversion not supported on gl, capturing bgra");
            }
            if settings.size_divider > 1 && !self.divider_warned {
                self.divider_warned = true;
                warn!(
                    size_divider = settings.size_divider,
                    "downscale not supported on gl, capturing full size"
                );
            }
            sink.begin_video(VideoFormat {
                width: self.cx as u32,
                height: self.cy as u32,
                pixel_format: PixelFormat::Bgra8,
                vflip: true,
                pitch: self.pitch as u32,
            })?;
        }

        let timestamp = sink.state().frame_timestamp();
        match self.capture_frame(sink, timestamp) {
            // A transient GL error loses one frame, not the session
            Err(e @ CaptureError::GlCall { .. }) => {
                warn!("{}", e);
                Ok(())
            }
            other => other,
        }
    }

    fn free(&mut self) {
        let fns = &self.fns;
        unsafe {
            if self.fbo != 0 {
                (fns.delete_framebuffers)(1, &self.fbo);
            }
            (fns.delete_buffers)(NUM_FRAME_SLOTS as GLsizei, self.pbos.as_ptr());
            (fns.delete_textures)(NUM_FRAME_SLOTS as GLsizei, self.textures.as_ptr());
        }
        self.fbo = 0;
        self.pbos = [0; NUM_FRAME_SLOTS];
        self.textures = [0; NUM_FRAME_SLOTS];
        self.staged = [false; NUM_FRAME_SLOTS];
        self.cx = 0;
        self.cy = 0;
        self.pitch = 0;
        self.initialized = false;
        debug!("gl capture resources freed");
    }
}
