// SPDX-License-Identifier: GPL-3.0-only

//! Software implementation of [`GpuContext`]
//!
//! A CPU rasterizer with GL ES 2.0 object and state semantics. Shaders are
//! checked for structure and their `uniform`/`attribute` declarations are
//! parsed to assign locations; fragment shading is done by the kernel
//! registered for the program's fragment source (see [`super::kernels`]).
//! A program whose fragment source has no kernel fails to link.
//!
//! Vertex positions are taken as clip-space coordinates from `a_Position`.
//! Triangles are rasterized at pixel centers with row 0 at the bottom, the
//! same orientation GL uses for textures and `read_pixels`.

use super::kernels::{self, Fragment, FragmentKernel, Sampler, UniformValue};
use super::{
    ClearMask, FramebufferStatus, GpuContext, Handle, Location, Primitive, SamplerFilter,
    ShaderKind, TextureTarget, WrapMode,
};
use crate::constants::shader_names;
use crate::errors::GlError;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, trace};

const MAX_VERTEX_ATTRIBS: usize = 8;
const MAX_TEXTURE_UNITS: usize = 8;
const MAX_TEXTURE_SIZE: u32 = 4096;

/// Call counters shared with observers on other threads
#[derive(Debug, Default)]
pub struct GpuStats {
    use_program: AtomicUsize,
    bind_texture: AtomicUsize,
    bind_framebuffer: AtomicUsize,
    draw_arrays: AtomicUsize,
    read_pixels: AtomicUsize,
    deletes: AtomicUsize,
    invalid_deletes: AtomicUsize,
}

/// Point-in-time copy of [`GpuStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub use_program: usize,
    pub bind_texture: usize,
    pub bind_framebuffer: usize,
    pub draw_arrays: usize,
    pub read_pixels: usize,
    /// Successful object deletions
    pub deletes: usize,
    /// Deletions of names that were not live objects
    pub invalid_deletes: usize,
}

impl GpuStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            use_program: self.use_program.load(Ordering::Relaxed),
            bind_texture: self.bind_texture.load(Ordering::Relaxed),
            bind_framebuffer: self.bind_framebuffer.load(Ordering::Relaxed),
            draw_arrays: self.draw_arrays.load(Ordering::Relaxed),
            read_pixels: self.read_pixels.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            invalid_deletes: self.invalid_deletes.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct ShaderObject {
    kind: ShaderKind,
    source: String,
    compiled: bool,
    log: String,
    /// (type, name)
    uniforms: Vec<(String, String)>,
    attributes: Vec<String>,
}

struct ProgramObject {
    shaders: Vec<Handle>,
    linked: bool,
    log: String,
    uniforms: Vec<UniformValue>,
    attributes: Vec<String>,
    kernel: Option<FragmentKernel>,
    external_sampler: bool,
}

#[derive(Default)]
struct TextureObject {
    target: Option<TextureTarget>,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

struct RenderbufferObject {
    width: u32,
    height: u32,
}

#[derive(Default)]
struct FramebufferObject {
    color: Handle,
    depth: Handle,
}

enum Object {
    Shader(ShaderObject),
    Program(ProgramObject),
    Texture(TextureObject),
    Framebuffer(FramebufferObject),
    Renderbuffer(RenderbufferObject),
}

#[derive(Default, Clone)]
struct AttribArray {
    components: usize,
    data: Vec<f32>,
    enabled: bool,
}

struct State {
    next_handle: Handle,
    objects: HashMap<Handle, Object>,
    current_program: Handle,
    active_unit: usize,
    /// Per unit: [2D, External]
    units: [[Handle; 2]; MAX_TEXTURE_UNITS],
    framebuffer: Handle,
    renderbuffer: Handle,
    attribs: Vec<AttribArray>,
    viewport: (i32, i32, u32, u32),
    clear_color: [f32; 4],
    display: TextureObject,
    errors: VecDeque<GlError>,
}

fn target_slot(target: TextureTarget) -> usize {
    match target {
        TextureTarget::Texture2D => 0,
        TextureTarget::External => 1,
    }
}

fn to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

impl State {
    fn error(&mut self, error: GlError) {
        trace!(error = %error, "Latched GPU error");
        self.errors.push_back(error);
    }

    fn program(&self, handle: Handle) -> Option<&ProgramObject> {
        match self.objects.get(&handle) {
            Some(Object::Program(p)) => Some(p),
            _ => None,
        }
    }

    fn texture_mut(&mut self, handle: Handle) -> Option<&mut TextureObject> {
        match self.objects.get_mut(&handle) {
            Some(Object::Texture(t)) => Some(t),
            _ => None,
        }
    }

    fn framebuffer_status(&self, handle: Handle) -> FramebufferStatus {
        if handle == 0 {
            return FramebufferStatus::Complete;
        }
        let Some(Object::Framebuffer(fb)) = self.objects.get(&handle) else {
            return FramebufferStatus::MissingAttachment;
        };
        if fb.color == 0 && fb.depth == 0 {
            return FramebufferStatus::MissingAttachment;
        }
        let mut color_size = None;
        if fb.color != 0 {
            match self.objects.get(&fb.color) {
                Some(Object::Texture(t)) if t.target == Some(TextureTarget::External) => {
                    return FramebufferStatus::Unsupported;
                }
                Some(Object::Texture(t)) if t.width > 0 && t.height > 0 => {
                    color_size = Some((t.width, t.height));
                }
                _ => return FramebufferStatus::IncompleteAttachment,
            }
        }
        let mut depth_size = None;
        if fb.depth != 0 {
            match self.objects.get(&fb.depth) {
                Some(Object::Renderbuffer(rb)) if rb.width > 0 && rb.height > 0 => {
                    depth_size = Some((rb.width, rb.height));
                }
                _ => return FramebufferStatus::IncompleteAttachment,
            }
        }
        match (color_size, depth_size) {
            (Some(c), Some(d)) if c != d => FramebufferStatus::IncompleteDimensions,
            _ => FramebufferStatus::Complete,
        }
    }

    /// Handle of the texture that receives color writes, `0` for the display
    fn color_target(&mut self) -> Option<Handle> {
        if self.framebuffer == 0 {
            return Some(0);
        }
        if self.framebuffer_status(self.framebuffer) != FramebufferStatus::Complete {
            self.error(GlError::InvalidFramebufferOperation);
            return None;
        }
        match self.objects.get(&self.framebuffer) {
            Some(Object::Framebuffer(fb)) if fb.color != 0 => Some(fb.color),
            // depth-only framebuffer, nothing to write color into
            _ => None,
        }
    }

    fn take_target(&mut self, handle: Handle) -> (u32, u32, Vec<u8>) {
        let t = if handle == 0 {
            &mut self.display
        } else {
            match self.objects.get_mut(&handle) {
                Some(Object::Texture(t)) => t,
                _ => return (0, 0, Vec::new()),
            }
        };
        (t.width, t.height, std::mem::take(&mut t.pixels))
    }

    fn restore_target(&mut self, handle: Handle, pixels: Vec<u8>) {
        if handle == 0 {
            self.display.pixels = pixels;
        } else if let Some(t) = self.texture_mut(handle) {
            t.pixels = pixels;
        }
    }
}

/// CPU-backed GPU context
pub struct SoftwareGpu {
    state: RefCell<State>,
    kernels: HashMap<String, FragmentKernel>,
    stats: Arc<GpuStats>,
    object_limit: Option<usize>,
}

impl SoftwareGpu {
    /// Create a context whose display surface is `width` x `height`
    pub fn new(width: u32, height: u32) -> Self {
        let kernels = kernels::builtin()
            .into_iter()
            .map(|(source, kernel)| (source.to_string(), kernel))
            .collect();
        Self {
            state: RefCell::new(State {
                next_handle: 1,
                objects: HashMap::new(),
                current_program: 0,
                active_unit: 0,
                units: [[0; 2]; MAX_TEXTURE_UNITS],
                framebuffer: 0,
                renderbuffer: 0,
                attribs: vec![AttribArray::default(); MAX_VERTEX_ATTRIBS],
                viewport: (0, 0, width, height),
                clear_color: [0.0, 0.0, 0.0, 0.0],
                display: TextureObject {
                    target: Some(TextureTarget::Texture2D),
                    width,
                    height,
                    pixels: vec![0; (width * height * 4) as usize],
                },
                errors: VecDeque::new(),
            }),
            kernels,
            stats: Arc::new(GpuStats::default()),
            object_limit: None,
        }
    }

    /// Register a kernel for programs linked with `fragment_source`
    pub fn with_kernel(mut self, fragment_source: &str, kernel: FragmentKernel) -> Self {
        self.kernels.insert(fragment_source.to_string(), kernel);
        self
    }

    /// Make object creation return `0` once `limit` objects are live
    pub fn with_object_limit(mut self, limit: usize) -> Self {
        self.object_limit = Some(limit);
        self
    }

    /// Counters that stay readable after the context moves to another thread
    pub fn stats_handle(&self) -> Arc<GpuStats> {
        Arc::clone(&self.stats)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of objects not yet deleted
    pub fn live_objects(&self) -> usize {
        self.state.borrow().objects.len()
    }

    /// Resize the display surface; contents are cleared
    pub fn set_display_size(&self, width: u32, height: u32) {
        let mut st = self.state.borrow_mut();
        st.display.width = width;
        st.display.height = height;
        st.display.pixels = vec![0; (width * height * 4) as usize];
    }

    pub fn display_size(&self) -> (u32, u32) {
        let st = self.state.borrow();
        (st.display.width, st.display.height)
    }

    /// Copy of the display surface, RGBA8 bottom row first
    pub fn display_pixels(&self) -> Vec<u8> {
        self.state.borrow().display.pixels.clone()
    }

    /// Copy of a texture's storage, RGBA8 bottom row first
    pub fn texture_pixels(&self, texture: Handle) -> Option<Vec<u8>> {
        match self.state.borrow().objects.get(&texture) {
            Some(Object::Texture(t)) => Some(t.pixels.clone()),
            _ => None,
        }
    }

    fn alloc(&self, object: Object) -> Handle {
        let mut st = self.state.borrow_mut();
        if let Some(limit) = self.object_limit.filter(|limit| st.objects.len() >= *limit) {
            debug!(limit, "Software GPU object limit reached");
            return 0;
        }
        let handle = st.next_handle;
        st.next_handle += 1;
        st.objects.insert(handle, object);
        handle
    }

    fn delete(&self, handle: Handle, matches: fn(&Object) -> bool) {
        if handle == 0 {
            return;
        }
        let mut st = self.state.borrow_mut();
        if !st.objects.get(&handle).is_some_and(matches) {
            GpuStats::bump(&self.stats.invalid_deletes);
            return;
        }
        st.objects.remove(&handle);
        GpuStats::bump(&self.stats.deletes);
        // Unbind everything that referenced the name
        if st.current_program == handle {
            st.current_program = 0;
        }
        if st.framebuffer == handle {
            st.framebuffer = 0;
        }
        if st.renderbuffer == handle {
            st.renderbuffer = 0;
        }
        for unit in st.units.iter_mut() {
            for bound in unit.iter_mut() {
                if *bound == handle {
                    *bound = 0;
                }
            }
        }
        for object in st.objects.values_mut() {
            if let Object::Framebuffer(fb) = object {
                if fb.color == handle {
                    fb.color = 0;
                }
                if fb.depth == handle {
                    fb.depth = 0;
                }
            }
        }
    }

    fn set_uniform(&self, location: Location, components: usize, value: [f32; 4]) {
        if location < 0 {
            return;
        }
        let mut st = self.state.borrow_mut();
        let current = st.current_program;
        let Some(Object::Program(program)) = st.objects.get_mut(&current) else {
            st.error(GlError::InvalidOperation);
            return;
        };
        let written = match program.uniforms.get_mut(location as usize) {
            Some(uniform) if uniform.components == components => {
                uniform.value = value;
                true
            }
            _ => false,
        };
        if !written {
            st.error(GlError::InvalidOperation);
        }
    }
}

/// Parse `uniform`/`attribute` declarations as (qualifier, type, name)
fn declarations(source: &str) -> Vec<(String, String, String)> {
    source
        .lines()
        .map(|line| line.split("//").next().unwrap_or_default())
        .flat_map(|line| line.split(';'))
        .filter_map(|statement| {
            let tokens: Vec<&str> = statement.split_whitespace().collect();
            match tokens.as_slice() {
                [qualifier, .., ty, name]
                    if *qualifier == "uniform" || *qualifier == "attribute" =>
                {
                    Some((qualifier.to_string(), ty.to_string(), name.to_string()))
                }
                _ => None,
            }
        })
        .collect()
}

fn components_of(ty: &str) -> usize {
    match ty {
        "vec2" => 2,
        "vec3" => 3,
        "vec4" => 4,
        _ => 1,
    }
}

fn structure_error(source: &str) -> Option<&'static str> {
    if !source.contains("void main") {
        return Some("'main' : function not defined");
    }
    let mut depth = 0i64;
    for c in source.chars() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return Some("'}' : syntax error");
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Some("unexpected end of file");
    }
    None
}

impl GpuContext for SoftwareGpu {
    fn create_shader(&self, kind: ShaderKind) -> Handle {
        self.alloc(Object::Shader(ShaderObject {
            kind,
            source: String::new(),
            compiled: false,
            log: String::new(),
            uniforms: Vec::new(),
            attributes: Vec::new(),
        }))
    }

    fn shader_source(&self, shader: Handle, source: &str) {
        let mut st = self.state.borrow_mut();
        match st.objects.get_mut(&shader) {
            Some(Object::Shader(s)) => s.source = source.to_string(),
            _ => st.error(GlError::InvalidValue),
        }
    }

    fn compile_shader(&self, shader: Handle) {
        let mut st = self.state.borrow_mut();
        let Some(Object::Shader(s)) = st.objects.get_mut(&shader) else {
            st.error(GlError::InvalidValue);
            return;
        };
        match structure_error(&s.source) {
            Some(message) => {
                s.compiled = false;
                s.log = format!("ERROR: 0:1: {}", message);
            }
            None => {
                s.compiled = true;
                s.log.clear();
                s.uniforms.clear();
                s.attributes.clear();
                for (qualifier, ty, name) in declarations(&s.source) {
                    if qualifier == "uniform" {
                        s.uniforms.push((ty, name));
                    } else {
                        s.attributes.push(name);
                    }
                }
            }
        }
    }

    fn shader_compile_status(&self, shader: Handle) -> bool {
        matches!(
            self.state.borrow().objects.get(&shader),
            Some(Object::Shader(s)) if s.compiled
        )
    }

    fn shader_info_log(&self, shader: Handle) -> String {
        match self.state.borrow().objects.get(&shader) {
            Some(Object::Shader(s)) => s.log.clone(),
            _ => String::new(),
        }
    }

    fn delete_shader(&self, shader: Handle) {
        self.delete(shader, |o| matches!(o, Object::Shader(_)));
    }

    fn create_program(&self) -> Handle {
        self.alloc(Object::Program(ProgramObject {
            shaders: Vec::new(),
            linked: false,
            log: String::new(),
            uniforms: Vec::new(),
            attributes: Vec::new(),
            kernel: None,
            external_sampler: false,
        }))
    }

    fn attach_shader(&self, program: Handle, shader: Handle) {
        let mut st = self.state.borrow_mut();
        if !matches!(st.objects.get(&shader), Some(Object::Shader(_))) {
            st.error(GlError::InvalidValue);
            return;
        }
        match st.objects.get_mut(&program) {
            Some(Object::Program(p)) if !p.shaders.contains(&shader) => p.shaders.push(shader),
            Some(Object::Program(_)) => st.error(GlError::InvalidOperation),
            _ => st.error(GlError::InvalidValue),
        }
    }

    fn link_program(&self, program: Handle) {
        let mut st = self.state.borrow_mut();
        let Some(Object::Program(p)) = st.objects.get(&program) else {
            st.error(GlError::InvalidValue);
            return;
        };
        let shaders: Vec<&ShaderObject> = p
            .shaders
            .iter()
            .filter_map(|h| match st.objects.get(h) {
                Some(Object::Shader(s)) => Some(s),
                _ => None,
            })
            .collect();

        let vertex: Vec<_> = shaders.iter().filter(|s| s.kind == ShaderKind::Vertex).collect();
        let fragment: Vec<_> = shaders
            .iter()
            .filter(|s| s.kind == ShaderKind::Fragment)
            .collect();

        let outcome = if vertex.len() != 1 || fragment.len() != 1 {
            Err(format!(
                "link requires one vertex and one fragment shader, got {} and {}",
                vertex.len(),
                fragment.len()
            ))
        } else if !vertex[0].compiled || !fragment[0].compiled {
            Err("attached shaders are not compiled".to_string())
        } else {
            let mut uniforms: Vec<UniformValue> = Vec::new();
            let mut external_sampler = false;
            for (ty, name) in vertex[0].uniforms.iter().chain(fragment[0].uniforms.iter()) {
                external_sampler |= ty == "samplerExternalOES";
                if !uniforms.iter().any(|u| &u.name == name) {
                    uniforms.push(UniformValue {
                        name: name.clone(),
                        components: components_of(ty),
                        value: [0.0; 4],
                    });
                }
            }
            match self.kernels.get(fragment[0].source.as_str()) {
                Some(kernel) => Ok((
                    uniforms,
                    vertex[0].attributes.clone(),
                    Arc::clone(kernel),
                    external_sampler,
                )),
                None => Err(
                    "fragment shader has no registered kernel; the software context \
                     only runs sources added with SoftwareGpu::with_kernel"
                        .to_string(),
                ),
            }
        };

        let Some(Object::Program(p)) = st.objects.get_mut(&program) else {
            return;
        };
        match outcome {
            Ok((uniforms, attributes, kernel, external_sampler)) => {
                p.linked = true;
                p.log.clear();
                p.uniforms = uniforms;
                p.attributes = attributes;
                p.kernel = Some(kernel);
                p.external_sampler = external_sampler;
            }
            Err(log) => {
                p.linked = false;
                p.log = log;
            }
        }
    }

    fn program_link_status(&self, program: Handle) -> bool {
        self.state
            .borrow()
            .program(program)
            .is_some_and(|p| p.linked)
    }

    fn program_info_log(&self, program: Handle) -> String {
        self.state
            .borrow()
            .program(program)
            .map(|p| p.log.clone())
            .unwrap_or_default()
    }

    fn use_program(&self, program: Handle) {
        GpuStats::bump(&self.stats.use_program);
        let mut st = self.state.borrow_mut();
        if program != 0 && !st.program(program).is_some_and(|p| p.linked) {
            st.error(GlError::InvalidOperation);
            return;
        }
        st.current_program = program;
    }

    fn delete_program(&self, program: Handle) {
        self.delete(program, |o| matches!(o, Object::Program(_)));
    }

    fn uniform_location(&self, program: Handle, name: &str) -> Location {
        self.state
            .borrow()
            .program(program)
            .filter(|p| p.linked)
            .and_then(|p| p.uniforms.iter().position(|u| u.name == name))
            .map(|i| i as Location)
            .unwrap_or(-1)
    }

    fn attrib_location(&self, program: Handle, name: &str) -> Location {
        self.state
            .borrow()
            .program(program)
            .filter(|p| p.linked)
            .and_then(|p| p.attributes.iter().position(|a| a == name))
            .map(|i| i as Location)
            .unwrap_or(-1)
    }

    fn uniform_1f(&self, location: Location, value: f32) {
        self.set_uniform(location, 1, [value, 0.0, 0.0, 0.0]);
    }

    fn uniform_4f(&self, location: Location, value: [f32; 4]) {
        self.set_uniform(location, 4, value);
    }

    fn get_uniform(&self, program: Handle, location: Location, out: &mut [f32]) -> usize {
        let mut st = self.state.borrow_mut();
        let value = st
            .program(program)
            .filter(|p| p.linked && location >= 0)
            .and_then(|p| p.uniforms.get(location as usize))
            .map(|u| (u.components, u.value));
        match value {
            Some((components, value)) => {
                let n = components.min(out.len());
                out[..n].copy_from_slice(&value[..n]);
                n
            }
            None => {
                st.error(GlError::InvalidOperation);
                0
            }
        }
    }

    fn vertex_attrib_pointer(&self, index: u32, components: usize, data: &[f32]) {
        let mut st = self.state.borrow_mut();
        if !(1..=4).contains(&components) {
            st.error(GlError::InvalidValue);
            return;
        }
        match st.attribs.get_mut(index as usize) {
            Some(attrib) => {
                attrib.components = components;
                attrib.data = data.to_vec();
            }
            None => st.error(GlError::InvalidValue),
        }
    }

    fn enable_vertex_attrib_array(&self, index: u32) {
        let mut st = self.state.borrow_mut();
        match st.attribs.get_mut(index as usize) {
            Some(attrib) => attrib.enabled = true,
            None => st.error(GlError::InvalidValue),
        }
    }

    fn disable_vertex_attrib_array(&self, index: u32) {
        let mut st = self.state.borrow_mut();
        match st.attribs.get_mut(index as usize) {
            Some(attrib) => attrib.enabled = false,
            None => st.error(GlError::InvalidValue),
        }
    }

    fn draw_arrays(&self, mode: Primitive, first: usize, count: usize) {
        GpuStats::bump(&self.stats.draw_arrays);
        let mut guard = self.state.borrow_mut();
        let st = &mut *guard;

        let Some(program) = st.program(st.current_program) else {
            st.error(GlError::InvalidOperation);
            return;
        };
        let uniforms = program.uniforms.clone();
        let kernel = program.kernel.clone();
        let external = program.external_sampler;
        let position_index = program
            .attributes
            .iter()
            .position(|a| a == shader_names::POSITION)
            .or(if program.attributes.is_empty() { None } else { Some(0) });
        let tex_index = program
            .attributes
            .iter()
            .position(|a| a == shader_names::TEX_COORD);
        let (Some(position_index), Some(kernel)) = (position_index, kernel) else {
            st.error(GlError::InvalidOperation);
            return;
        };

        let Some(positions) = st.attribs.get(position_index).filter(|a| a.enabled) else {
            return;
        };
        let tex = tex_index
            .and_then(|i| st.attribs.get(i))
            .filter(|a| a.enabled && a.components >= 2);

        let mut vertices = Vec::with_capacity(count);
        for i in first..first + count {
            let p = positions.components;
            let Some(pos) = positions.data.get(i * p..i * p + p) else {
                st.error(GlError::InvalidOperation);
                return;
            };
            let uv = tex
                .and_then(|t| t.data.get(i * t.components..i * t.components + 2))
                .map(|uv| [uv[0], uv[1]])
                .unwrap_or([0.0, 0.0]);
            let y = if p > 1 { pos[1] } else { 0.0 };
            vertices.push(([pos[0], y], uv));
        }

        let triangles: Vec<[usize; 3]> = match mode {
            Primitive::TriangleFan => (1..vertices.len().saturating_sub(1))
                .map(|i| [0, i, i + 1])
                .collect(),
            Primitive::Triangles => (0..vertices.len() / 3)
                .map(|i| [3 * i, 3 * i + 1, 3 * i + 2])
                .collect(),
        };
        if triangles.is_empty() {
            return;
        }

        let Some(target) = st.color_target() else {
            return;
        };

        // Clip space to window coordinates
        let (vx, vy, vw, vh) = st.viewport;
        let window: Vec<[f32; 2]> = vertices
            .iter()
            .map(|(p, _)| {
                [
                    vx as f32 + (p[0] + 1.0) * 0.5 * vw as f32,
                    vy as f32 + (p[1] + 1.0) * 0.5 * vh as f32,
                ]
            })
            .collect();

        let (width, height, mut pixels) = st.take_target(target);
        let sampler_handle = st.units[0][target_slot(if external {
            TextureTarget::External
        } else {
            TextureTarget::Texture2D
        })];
        let sampler = match st.objects.get(&sampler_handle) {
            Some(Object::Texture(t)) if sampler_handle != target => Some(Sampler {
                width: t.width,
                height: t.height,
                pixels: &t.pixels,
            }),
            _ => None,
        };

        let x0 = vx.max(0) as u32;
        let y0 = vy.max(0) as u32;
        let x1 = ((vx + vw as i32).max(0) as u32).min(width);
        let y1 = ((vy + vh as i32).max(0) as u32).min(height);

        for py in y0..y1 {
            for px in x0..x1 {
                let c = [px as f32 + 0.5, py as f32 + 0.5];
                for tri in &triangles {
                    let (a, b, d) = (window[tri[0]], window[tri[1]], window[tri[2]]);
                    let area = (b[0] - a[0]) * (d[1] - a[1]) - (b[1] - a[1]) * (d[0] - a[0]);
                    if area.abs() < f32::EPSILON {
                        continue;
                    }
                    let w0 = ((b[0] - c[0]) * (d[1] - c[1]) - (b[1] - c[1]) * (d[0] - c[0])) / area;
                    let w1 = ((d[0] - c[0]) * (a[1] - c[1]) - (d[1] - c[1]) * (a[0] - c[0])) / area;
                    let w2 = 1.0 - w0 - w1;
                    let eps = -1e-5;
                    if w0 < eps || w1 < eps || w2 < eps {
                        continue;
                    }
                    let (ta, tb, td) = (vertices[tri[0]].1, vertices[tri[1]].1, vertices[tri[2]].1);
                    let fragment = Fragment {
                        tex_coord: [
                            w0 * ta[0] + w1 * tb[0] + w2 * td[0],
                            w0 * ta[1] + w1 * tb[1] + w2 * td[1],
                        ],
                        sampler,
                        uniforms: &uniforms,
                    };
                    let out = kernel(&fragment);
                    let i = ((py * width + px) * 4) as usize;
                    if let Some(dst) = pixels.get_mut(i..i + 4) {
                        dst.copy_from_slice(&[
                            to_byte(out[0]),
                            to_byte(out[1]),
                            to_byte(out[2]),
                            to_byte(out[3]),
                        ]);
                    }
                    break;
                }
            }
        }

        st.restore_target(target, pixels);
    }

    fn gen_texture(&self) -> Handle {
        self.alloc(Object::Texture(TextureObject::default()))
    }

    fn active_texture(&self, unit: u32) {
        let mut st = self.state.borrow_mut();
        if (unit as usize) < MAX_TEXTURE_UNITS {
            st.active_unit = unit as usize;
        } else {
            st.error(GlError::InvalidEnum);
        }
    }

    fn bind_texture(&self, target: TextureTarget, texture: Handle) {
        GpuStats::bump(&self.stats.bind_texture);
        let mut st = self.state.borrow_mut();
        if texture != 0 {
            match st.texture_mut(texture) {
                Some(t) if t.target.is_none() || t.target == Some(target) => {
                    t.target = Some(target)
                }
                _ => {
                    st.error(GlError::InvalidOperation);
                    return;
                }
            }
        }
        let unit = st.active_unit;
        st.units[unit][target_slot(target)] = texture;
    }

    fn tex_image_2d(&self, target: TextureTarget, width: u32, height: u32, pixels: Option<&[u8]>) {
        let mut st = self.state.borrow_mut();
        if width > MAX_TEXTURE_SIZE || height > MAX_TEXTURE_SIZE {
            st.error(GlError::InvalidValue);
            return;
        }
        let len = (width * height * 4) as usize;
        if pixels.is_some_and(|p| p.len() < len) {
            st.error(GlError::InvalidValue);
            return;
        }
        let bound = st.units[st.active_unit][target_slot(target)];
        let Some(t) = st.texture_mut(bound) else {
            st.error(GlError::InvalidOperation);
            return;
        };
        t.width = width;
        t.height = height;
        t.pixels = match pixels {
            Some(p) => p[..len].to_vec(),
            None => vec![0; len],
        };
    }

    fn tex_parameters(&self, target: TextureTarget, _filter: SamplerFilter, _wrap: WrapMode) {
        // Sampling is always nearest with clamp; only validate the binding
        let mut st = self.state.borrow_mut();
        if st.units[st.active_unit][target_slot(target)] == 0 {
            st.error(GlError::InvalidOperation);
        }
    }

    fn delete_texture(&self, texture: Handle) {
        self.delete(texture, |o| matches!(o, Object::Texture(_)));
    }

    fn gen_framebuffer(&self) -> Handle {
        self.alloc(Object::Framebuffer(FramebufferObject::default()))
    }

    fn bind_framebuffer(&self, framebuffer: Handle) {
        GpuStats::bump(&self.stats.bind_framebuffer);
        let mut st = self.state.borrow_mut();
        if framebuffer != 0 && !matches!(st.objects.get(&framebuffer), Some(Object::Framebuffer(_)))
        {
            st.error(GlError::InvalidOperation);
            return;
        }
        st.framebuffer = framebuffer;
    }

    fn framebuffer_texture_2d(&self, texture: Handle) {
        let mut st = self.state.borrow_mut();
        let current = st.framebuffer;
        if texture != 0 && !matches!(st.objects.get(&texture), Some(Object::Texture(_))) {
            st.error(GlError::InvalidOperation);
            return;
        }
        match st.objects.get_mut(&current) {
            Some(Object::Framebuffer(fb)) => fb.color = texture,
            _ => st.error(GlError::InvalidOperation),
        }
    }

    fn framebuffer_renderbuffer(&self, renderbuffer: Handle) {
        let mut st = self.state.borrow_mut();
        let current = st.framebuffer;
        if renderbuffer != 0
            && !matches!(st.objects.get(&renderbuffer), Some(Object::Renderbuffer(_)))
        {
            st.error(GlError::InvalidOperation);
            return;
        }
        match st.objects.get_mut(&current) {
            Some(Object::Framebuffer(fb)) => fb.depth = renderbuffer,
            _ => st.error(GlError::InvalidOperation),
        }
    }

    fn check_framebuffer_status(&self) -> FramebufferStatus {
        let st = self.state.borrow();
        st.framebuffer_status(st.framebuffer)
    }

    fn delete_framebuffer(&self, framebuffer: Handle) {
        self.delete(framebuffer, |o| matches!(o, Object::Framebuffer(_)));
    }

    fn gen_renderbuffer(&self) -> Handle {
        self.alloc(Object::Renderbuffer(RenderbufferObject {
            width: 0,
            height: 0,
        }))
    }

    fn bind_renderbuffer(&self, renderbuffer: Handle) {
        let mut st = self.state.borrow_mut();
        if renderbuffer != 0
            && !matches!(st.objects.get(&renderbuffer), Some(Object::Renderbuffer(_)))
        {
            st.error(GlError::InvalidOperation);
            return;
        }
        st.renderbuffer = renderbuffer;
    }

    fn renderbuffer_storage(&self, width: u32, height: u32) {
        let mut st = self.state.borrow_mut();
        if width > MAX_TEXTURE_SIZE || height > MAX_TEXTURE_SIZE {
            st.error(GlError::InvalidValue);
            return;
        }
        let current = st.renderbuffer;
        match st.objects.get_mut(&current) {
            Some(Object::Renderbuffer(rb)) => {
                rb.width = width;
                rb.height = height;
            }
            _ => st.error(GlError::InvalidOperation),
        }
    }

    fn delete_renderbuffer(&self, renderbuffer: Handle) {
        self.delete(renderbuffer, |o| matches!(o, Object::Renderbuffer(_)));
    }

    fn viewport(&self, x: i32, y: i32, width: u32, height: u32) {
        self.state.borrow_mut().viewport = (x, y, width, height);
    }

    fn clear_color(&self, rgba: [f32; 4]) {
        self.state.borrow_mut().clear_color = rgba;
    }

    fn clear(&self, mask: ClearMask) {
        let mut st = self.state.borrow_mut();
        if st.framebuffer != 0
            && st.framebuffer_status(st.framebuffer) != FramebufferStatus::Complete
        {
            st.error(GlError::InvalidFramebufferOperation);
            return;
        }
        // Depth testing is not modelled, so only color is written
        if !mask.color {
            return;
        }
        let Some(target) = st.color_target() else {
            return;
        };
        let c = st.clear_color;
        let rgba = [to_byte(c[0]), to_byte(c[1]), to_byte(c[2]), to_byte(c[3])];
        let (_, _, mut pixels) = st.take_target(target);
        for px in pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        st.restore_target(target, pixels);
    }

    fn read_pixels(&self, x: i32, y: i32, width: u32, height: u32, out: &mut [u8]) {
        GpuStats::bump(&self.stats.read_pixels);
        let mut st = self.state.borrow_mut();
        if out.len() < (width * height * 4) as usize {
            st.error(GlError::InvalidValue);
            return;
        }
        let Some(target) = st.color_target() else {
            return;
        };
        let source = if target == 0 {
            &st.display
        } else {
            match st.objects.get(&target) {
                Some(Object::Texture(t)) => t,
                _ => return,
            }
        };
        for row in 0..height {
            for col in 0..width {
                let (sx, sy) = (x + col as i32, y + row as i32);
                let dst = ((row * width + col) * 4) as usize;
                if sx < 0 || sy < 0 || sx as u32 >= source.width || sy as u32 >= source.height {
                    out[dst..dst + 4].fill(0);
                    continue;
                }
                let src = ((sy as u32 * source.width + sx as u32) * 4) as usize;
                out[dst..dst + 4].copy_from_slice(&source.pixels[src..src + 4]);
            }
        }
    }

    fn get_error(&self) -> Option<GlError> {
        self.state.borrow_mut().errors.pop_front()
    }

    fn shading_language_version(&self) -> String {
        "OpenGL ES GLSL ES 1.00 (software)".to_string()
    }

    fn max_texture_size(&self) -> u32 {
        MAX_TEXTURE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::geometry::{DEFAULT_COORDS, DEFAULT_TEX_COORDS};
    use crate::shaders;

    fn program(gl: &SoftwareGpu, vertex: &str, fragment: &str) -> Handle {
        let vs = gl.create_shader(ShaderKind::Vertex);
        gl.shader_source(vs, vertex);
        gl.compile_shader(vs);
        let fs = gl.create_shader(ShaderKind::Fragment);
        gl.shader_source(fs, fragment);
        gl.compile_shader(fs);
        let p = gl.create_program();
        gl.attach_shader(p, vs);
        gl.attach_shader(p, fs);
        gl.link_program(p);
        p
    }

    #[test]
    fn declarations_assign_locations() {
        let gl = SoftwareGpu::new(4, 4);
        let p = program(&gl, shaders::VERTEX_TEXTURE, shaders::FRAGMENT_BLUR);
        assert!(gl.program_link_status(p));
        assert_eq!(gl.attrib_location(p, "a_Position"), 0);
        assert_eq!(gl.attrib_location(p, "a_TexCoord"), 1);
        assert!(gl.uniform_location(p, "u_TexelWidth") >= 0);
        assert_eq!(gl.uniform_location(p, "u_Missing"), -1);
    }

    #[test]
    fn malformed_shader_fails_to_compile() {
        let gl = SoftwareGpu::new(4, 4);
        let s = gl.create_shader(ShaderKind::Fragment);
        gl.shader_source(s, "void main() { gl_FragColor = vec4(1.0);");
        gl.compile_shader(s);
        assert!(!gl.shader_compile_status(s));
        assert!(!gl.shader_info_log(s).is_empty());
    }

    #[test]
    fn link_needs_both_stages() {
        let gl = SoftwareGpu::new(4, 4);
        let vs = gl.create_shader(ShaderKind::Vertex);
        gl.shader_source(vs, shaders::VERTEX);
        gl.compile_shader(vs);
        let p = gl.create_program();
        gl.attach_shader(p, vs);
        gl.link_program(p);
        assert!(!gl.program_link_status(p));
        assert!(gl.program_info_log(p).contains("fragment"));
    }

    const GREY: &str = "precision mediump float;\nvoid main() { gl_FragColor = vec4(0.5); }\n";

    #[test]
    fn unknown_fragment_source_fails_to_link() {
        let gl = SoftwareGpu::new(4, 4);
        let p = program(&gl, shaders::VERTEX, GREY);
        assert!(!gl.program_link_status(p));
        assert!(gl.program_info_log(p).contains("kernel"));

        let gl = SoftwareGpu::new(4, 4).with_kernel(GREY, Arc::new(|_: &Fragment<'_>| [0.5; 4]));
        let p = program(&gl, shaders::VERTEX, GREY);
        assert!(gl.program_link_status(p));
    }

    #[test]
    fn full_screen_quad_fills_display() {
        let gl = SoftwareGpu::new(3, 2);
        let p = program(&gl, shaders::VERTEX, shaders::FRAGMENT_COLOR);
        gl.use_program(p);
        gl.uniform_4f(gl.uniform_location(p, "u_Color"), [1.0, 0.0, 1.0, 1.0]);
        gl.vertex_attrib_pointer(0, 3, &DEFAULT_COORDS);
        gl.enable_vertex_attrib_array(0);
        gl.draw_arrays(Primitive::TriangleFan, 0, 4);
        assert!(gl.get_error().is_none());
        let pixels = gl.display_pixels();
        assert!(pixels.chunks_exact(4).all(|p| p == [255, 0, 255, 255]));
    }

    #[test]
    fn textured_quad_copies_texture() {
        let gl = SoftwareGpu::new(2, 2);
        let source: Vec<u8> = (0..16).map(|i| (i * 10) as u8).collect();
        let t = gl.gen_texture();
        gl.bind_texture(TextureTarget::Texture2D, t);
        gl.tex_image_2d(TextureTarget::Texture2D, 2, 2, Some(&source));
        let p = program(&gl, shaders::VERTEX_TEXTURE, shaders::FRAGMENT_TEXTURE);
        gl.use_program(p);
        gl.vertex_attrib_pointer(0, 3, &DEFAULT_COORDS);
        gl.enable_vertex_attrib_array(0);
        gl.vertex_attrib_pointer(1, 2, &DEFAULT_TEX_COORDS);
        gl.enable_vertex_attrib_array(1);
        gl.draw_arrays(Primitive::TriangleFan, 0, 4);
        assert_eq!(gl.display_pixels(), source);
    }

    #[test]
    fn mismatched_depth_is_incomplete() {
        let gl = SoftwareGpu::new(4, 4);
        let fb = gl.gen_framebuffer();
        gl.bind_framebuffer(fb);
        let t = gl.gen_texture();
        gl.bind_texture(TextureTarget::Texture2D, t);
        gl.tex_image_2d(TextureTarget::Texture2D, 4, 4, None);
        gl.framebuffer_texture_2d(t);
        assert_eq!(gl.check_framebuffer_status(), FramebufferStatus::Complete);
        let rb = gl.gen_renderbuffer();
        gl.bind_renderbuffer(rb);
        gl.renderbuffer_storage(8, 4);
        gl.framebuffer_renderbuffer(rb);
        assert_eq!(
            gl.check_framebuffer_status(),
            FramebufferStatus::IncompleteDimensions
        );
    }

    #[test]
    fn deleting_twice_is_counted() {
        let gl = SoftwareGpu::new(1, 1);
        let t = gl.gen_texture();
        gl.delete_texture(t);
        gl.delete_texture(t);
        let stats = gl.stats();
        assert_eq!(stats.deletes, 1);
        assert_eq!(stats.invalid_deletes, 1);
        assert_eq!(gl.live_objects(), 0);
    }

    #[test]
    fn object_limit_yields_null_handles() {
        let gl = SoftwareGpu::new(1, 1).with_object_limit(1);
        assert_ne!(gl.gen_texture(), 0);
        assert_eq!(gl.gen_texture(), 0);
    }
}
