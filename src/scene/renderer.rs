// SPDX-License-Identifier: GPL-3.0-only

//! The drawable list and its per-frame draw protocol

use super::Drawable;
use super::mesh::{Color, Mesh};
use super::program::ShaderProgram;
use crate::errors::GpuResult;
use crate::gpu::GpuContext;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Identifier returned by [`SceneHandle::add`]
pub type DrawableId = u64;

/// An entry in the drawable list
#[derive(Debug)]
pub enum SceneItem {
    Mesh(Mesh),
    /// Sets `u_Color` for the items that follow
    Fill(Color),
}

impl Drawable for SceneItem {
    fn draw(&mut self, gl: &dyn GpuContext, program: &ShaderProgram) -> GpuResult<()> {
        match self {
            SceneItem::Mesh(mesh) => mesh.draw(gl, program),
            SceneItem::Fill(color) => color.apply(gl, program),
        }
    }

    fn cleanup(&mut self, gl: &dyn GpuContext, program: &ShaderProgram) -> GpuResult<()> {
        match self {
            SceneItem::Mesh(mesh) => mesh.cleanup(gl, program),
            SceneItem::Fill(_) => Ok(()),
        }
    }
}

impl SceneItem {
    pub fn dispose(&mut self, gl: &dyn GpuContext) {
        if let SceneItem::Mesh(mesh) = self {
            mesh.dispose(gl);
        }
    }
}

#[derive(Default)]
struct SceneList {
    items: Vec<(DrawableId, SceneItem)>,
    /// Removed items waiting for the render thread to free them
    retired: Vec<SceneItem>,
}

impl SceneList {
    fn dispose_retired(&mut self, gl: &dyn GpuContext) -> usize {
        let count = self.retired.len();
        for mut item in self.retired.drain(..) {
            item.dispose(gl);
        }
        count
    }
}

struct SceneShared {
    list: Mutex<SceneList>,
    next_id: AtomicU64,
    disposing: AtomicBool,
}

/// Thread-safe access to a renderer's drawable list
///
/// Mutations take the same lock as the render pass, so an item is never
/// added or removed in the middle of a frame. Items never leave the
/// renderer: removed ones are freed by it on the render thread.
#[derive(Clone)]
pub struct SceneHandle {
    shared: Arc<SceneShared>,
}

impl std::fmt::Debug for SceneHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneHandle")
            .field("len", &self.len())
            .field("disposing", &self.is_disposing())
            .finish()
    }
}

impl SceneHandle {
    fn new() -> Self {
        Self {
            shared: Arc::new(SceneShared {
                list: Mutex::new(SceneList::default()),
                next_id: AtomicU64::new(1),
                disposing: AtomicBool::new(false),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SceneList> {
        // A panic mid-frame leaves the list itself consistent
        self.shared
            .list
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an item; once disposal started the item is handed back
    pub fn add(&self, item: SceneItem) -> Result<DrawableId, SceneItem> {
        let mut list = self.lock();
        if self.is_disposing() {
            return Err(item);
        }
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        list.items.push((id, item));
        Ok(id)
    }

    /// Stop drawing an item; the renderer frees it before its next frame
    ///
    /// Returns whether `id` was in the list.
    pub fn remove(&self, id: DrawableId) -> bool {
        let mut list = self.lock();
        let Some(index) = list.items.iter().position(|(item_id, _)| *item_id == id) else {
            return false;
        };
        let (_, item) = list.items.remove(index);
        list.retired.push(item);
        true
    }

    /// Run `f` on an item under the list lock
    pub fn with_item<R>(&self, id: DrawableId, f: impl FnOnce(&mut SceneItem) -> R) -> Option<R> {
        let mut list = self.lock();
        list.items
            .iter_mut()
            .find(|(item_id, _)| *item_id == id)
            .map(|(_, item)| f(item))
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Removed items not yet freed
    pub fn retired(&self) -> usize {
        self.lock().retired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ask the renderer to stop drawing; it disposes on its next dispose call
    pub fn begin_dispose(&self) {
        self.shared.disposing.store(true, Ordering::Relaxed);
    }

    pub fn is_disposing(&self) -> bool {
        self.shared.disposing.load(Ordering::Relaxed)
    }
}

/// Owns the base program and draws the scene each frame
///
/// Lives on the render thread. Lifecycle: created, then
/// [`SceneRenderer::on_context_created`] compiles the program, then
/// [`SceneRenderer::on_draw_frame`] per frame until
/// [`SceneRenderer::dispose`].
#[derive(Debug)]
pub struct SceneRenderer {
    scene: SceneHandle,
    sources: Vec<String>,
    program: Option<ShaderProgram>,
    viewport: (u32, u32),
    disposed: bool,
}

impl SceneRenderer {
    pub fn new(sources: &[&str]) -> Self {
        Self {
            scene: SceneHandle::new(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
            program: None,
            viewport: (0, 0),
            disposed: false,
        }
    }

    /// Handle for mutating the drawable list from other threads
    pub fn handle(&self) -> SceneHandle {
        self.scene.clone()
    }

    pub fn program(&self) -> Option<&ShaderProgram> {
        self.program.as_ref()
    }

    pub fn program_mut(&mut self) -> Option<&mut ShaderProgram> {
        self.program.as_mut()
    }

    pub fn is_ready(&self) -> bool {
        self.program.is_some() && !self.disposed
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    /// Compile the base program
    pub fn on_context_created(&mut self, gl: &dyn GpuContext) -> GpuResult<()> {
        if self.disposed || self.program.is_some() {
            return Ok(());
        }
        let sources: Vec<&str> = self.sources.iter().map(String::as_str).collect();
        self.program = Some(ShaderProgram::new(gl, &sources)?);
        info!(
            glsl = %gl.shading_language_version(),
            max_texture_size = gl.max_texture_size(),
            "Scene renderer ready"
        );
        Ok(())
    }

    pub fn on_surface_changed(&mut self, gl: &dyn GpuContext, width: u32, height: u32) {
        self.viewport = (width, height);
        gl.viewport(0, 0, width, height);
    }

    /// Free removed items, then draw every item and clean every item up,
    /// under the list lock
    pub fn on_draw_frame(&mut self, gl: &dyn GpuContext) -> GpuResult<()> {
        if self.scene.is_disposing() || self.disposed {
            return Ok(());
        }
        let mut list = self.scene.lock();
        let retired = list.dispose_retired(gl);
        if retired > 0 {
            debug!(items = retired, "Freed removed scene items");
        }
        let Some(program) = self.program.as_mut() else {
            return Ok(());
        };
        program.bind(gl);
        let (width, height) = self.viewport;
        let result = program
            .set_texels(gl, width, height)
            .and_then(|_| Self::draw_items(gl, program, &mut list.items));
        program.unbind(gl);
        result
    }

    fn draw_items(
        gl: &dyn GpuContext,
        program: &ShaderProgram,
        items: &mut [(DrawableId, SceneItem)],
    ) -> GpuResult<()> {
        for (_, item) in items.iter_mut() {
            item.draw(gl, program)?;
        }
        for (_, item) in items.iter_mut() {
            item.cleanup(gl, program)?;
        }
        Ok(())
    }

    /// Stop drawing and free the program and every item
    ///
    /// Safe to call repeatedly; only the first call deletes anything.
    pub fn dispose(&mut self, gl: &dyn GpuContext) {
        self.scene.begin_dispose();
        if self.disposed {
            return;
        }
        if let Some(mut program) = self.program.take() {
            program.dispose(gl);
        }
        let mut list = self.scene.lock();
        let mut count = list.dispose_retired(gl);
        for (_, mut item) in list.items.drain(..) {
            item.dispose(gl);
            count += 1;
        }
        drop(list);
        self.disposed = true;
        debug!(items = count, "Scene renderer disposed");
    }
}

impl Drop for SceneRenderer {
    fn drop(&mut self) {
        if !self.disposed && self.program.is_some() {
            warn!("Scene renderer dropped without dispose, GPU objects leaked");
        }
    }
}
