// SPDX-License-Identifier: GPL-3.0-only

//! Headless OpenGL ES 2.0 context through EGL
//!
//! `libEGL` is loaded at runtime, so the binary starts on machines without
//! it and only fails when a GL context is actually requested. The display
//! surface is a pbuffer of the requested size.

use crate::errors::{GpuError, GpuResult};
use khronos_egl as egl;
use std::ffi::c_void;
use tracing::{debug, info, warn};

fn creation_error(step: &str, detail: impl std::fmt::Display) -> GpuError {
    GpuError::ContextCreation(format!("{step}: {detail}"))
}

/// An EGL display, pbuffer surface and ES 2.0 context, current on the
/// thread that created it
pub struct HeadlessEgl {
    egl: egl::DynamicInstance<egl::EGL1_4>,
    display: egl::Display,
    surface: egl::Surface,
    context: egl::Context,
    size: (u32, u32),
}

impl std::fmt::Debug for HeadlessEgl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessEgl")
            .field("size", &self.size)
            .finish()
    }
}

impl HeadlessEgl {
    /// Create the context and make it current on the calling thread
    pub fn new(width: u32, height: u32) -> GpuResult<Self> {
        let egl = unsafe { egl::DynamicInstance::<egl::EGL1_4>::load_required() }
            .map_err(|e| creation_error("loading libEGL", format!("{e:?}")))?;

        let display = unsafe { egl.get_display(egl::DEFAULT_DISPLAY) }
            .ok_or_else(|| creation_error("eglGetDisplay", "no default display"))?;
        let (major, minor) = egl
            .initialize(display)
            .map_err(|e| creation_error("eglInitialize", e))?;
        debug!(major, minor, "EGL initialized");

        match Self::create_on(&egl, display, width, height) {
            Ok((surface, context)) => {
                info!(width, height, "Headless GL context ready");
                Ok(Self {
                    egl,
                    display,
                    surface,
                    context,
                    size: (width, height),
                })
            }
            Err(e) => {
                let _ = egl.terminate(display);
                Err(e)
            }
        }
    }

    fn create_on(
        egl: &egl::DynamicInstance<egl::EGL1_4>,
        display: egl::Display,
        width: u32,
        height: u32,
    ) -> GpuResult<(egl::Surface, egl::Context)> {
        egl.bind_api(egl::OPENGL_ES_API)
            .map_err(|e| creation_error("eglBindAPI", e))?;

        let config_attribs = [
            egl::SURFACE_TYPE,
            egl::PBUFFER_BIT,
            egl::RENDERABLE_TYPE,
            egl::OPENGL_ES2_BIT,
            egl::RED_SIZE,
            8,
            egl::GREEN_SIZE,
            8,
            egl::BLUE_SIZE,
            8,
            egl::ALPHA_SIZE,
            8,
            egl::DEPTH_SIZE,
            16,
            egl::NONE,
        ];
        let config = egl
            .choose_first_config(display, &config_attribs)
            .map_err(|e| creation_error("eglChooseConfig", e))?
            .ok_or_else(|| creation_error("eglChooseConfig", "no RGBA8 ES 2.0 pbuffer config"))?;

        let surface_attribs = [
            egl::WIDTH,
            width.max(1) as egl::Int,
            egl::HEIGHT,
            height.max(1) as egl::Int,
            egl::NONE,
        ];
        let surface = egl
            .create_pbuffer_surface(display, config, &surface_attribs)
            .map_err(|e| creation_error("eglCreatePbufferSurface", e))?;

        let context_attribs = [egl::CONTEXT_CLIENT_VERSION, 2, egl::NONE];
        let context = match egl.create_context(display, config, None, &context_attribs) {
            Ok(context) => context,
            Err(e) => {
                let _ = egl.destroy_surface(display, surface);
                return Err(creation_error("eglCreateContext", e));
            }
        };

        if let Err(e) = egl.make_current(display, Some(surface), Some(surface), Some(context)) {
            let _ = egl.destroy_context(display, context);
            let _ = egl.destroy_surface(display, surface);
            return Err(creation_error("eglMakeCurrent", e));
        }
        Ok((surface, context))
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Entry point lookup for [`glow::Context::from_loader_function`]
    pub fn proc_address(&self, name: &str) -> *const c_void {
        self.egl
            .get_proc_address(name)
            .map_or(std::ptr::null(), |f| f as *const c_void)
    }
}

impl Drop for HeadlessEgl {
    fn drop(&mut self) {
        if let Err(e) = self.egl.make_current(self.display, None, None, None) {
            warn!(error = %e, "Failed to release EGL context");
        }
        let _ = self.egl.destroy_context(self.display, self.context);
        let _ = self.egl.destroy_surface(self.display, self.surface);
        let _ = self.egl.terminate(self.display);
        debug!("Headless GL context destroyed");
    }
}
