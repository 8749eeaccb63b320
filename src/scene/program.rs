// SPDX-License-Identifier: GPL-3.0-only

//! Shader compilation and linked programs

use crate::constants::shader_names;
use crate::errors::{GpuError, GpuResult};
use crate::gpu::{self, GpuContext, Handle, Location, Primitive, ShaderKind};
use tracing::{debug, error};

/// A compiled shader object
#[derive(Debug)]
pub struct Shader {
    handle: Handle,
    kind: ShaderKind,
    declares_texels: bool,
}

impl Shader {
    /// Infer the stage of `source` from the built-in output it writes
    pub fn kind_of(source: &str) -> GpuResult<ShaderKind> {
        if source.contains(shader_names::VERTEX_OUTPUT) {
            Ok(ShaderKind::Vertex)
        } else if source.contains(shader_names::FRAGMENT_OUTPUT) {
            Ok(ShaderKind::Fragment)
        } else {
            Err(GpuError::UnknownShaderKind)
        }
    }

    /// Compile `source`, deleting the shader object again on failure
    pub fn compile(gl: &dyn GpuContext, source: &str) -> GpuResult<Self> {
        let kind = Self::kind_of(source)?;
        let handle = gl.create_shader(kind);
        if handle == 0 {
            return Err(GpuError::HandleAllocation("shader"));
        }

        gl.shader_source(handle, source);
        gl.compile_shader(handle);

        if !gl.shader_compile_status(handle) {
            let log = gl.shader_info_log(handle);
            error!(kind = kind.name(), log = %log, "Shader compilation failed");
            gl.delete_shader(handle);
            return Err(GpuError::Compile {
                name: kind.name().to_string(),
                log,
            });
        }

        Ok(Self {
            handle,
            kind,
            declares_texels: source.contains(shader_names::TEXEL_WIDTH)
                && source.contains(shader_names::TEXEL_HEIGHT),
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn kind(&self) -> ShaderKind {
        self.kind
    }
}

/// A linked vertex + fragment program
///
/// Owns its shaders. Uniform and attribute access requires the program to be
/// bound; names starting with `u` resolve as uniforms, everything else as
/// attributes.
#[derive(Debug)]
pub struct ShaderProgram {
    handle: Handle,
    shaders: Vec<Shader>,
    has_texel_uniforms: bool,
    bound: bool,
    disposed: bool,
}

impl ShaderProgram {
    /// Compile every source and link them into one program
    pub fn new(gl: &dyn GpuContext, sources: &[&str]) -> GpuResult<Self> {
        let mut shaders = Vec::with_capacity(sources.len());
        for source in sources {
            match Shader::compile(gl, source) {
                Ok(shader) => shaders.push(shader),
                Err(e) => {
                    for shader in &shaders {
                        gl.delete_shader(shader.handle);
                    }
                    return Err(e);
                }
            }
        }

        let handle = gl.create_program();
        if handle == 0 {
            for shader in &shaders {
                gl.delete_shader(shader.handle);
            }
            return Err(GpuError::HandleAllocation("program"));
        }

        for shader in &shaders {
            gl.attach_shader(handle, shader.handle);
        }
        gl.link_program(handle);

        let mut program = Self {
            handle,
            has_texel_uniforms: shaders.iter().any(|s| s.declares_texels),
            shaders,
            bound: false,
            disposed: false,
        };

        if !gl.program_link_status(handle) {
            let log = gl.program_info_log(handle);
            error!(log = %log, "Program link failed");
            program.dispose(gl);
            return Err(GpuError::Link { log });
        }
        if let Err(e) = gpu::check_error(gl, "link program") {
            program.dispose(gl);
            return Err(e);
        }

        debug!(
            handle,
            shaders = program.shaders.len(),
            texels = program.has_texel_uniforms,
            "Linked shader program"
        );
        Ok(program)
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Whether the shaders declared both texel-size uniforms
    pub fn has_texel_uniforms(&self) -> bool {
        self.has_texel_uniforms
    }

    pub fn bind(&mut self, gl: &dyn GpuContext) {
        if !self.bound {
            gl.use_program(self.handle);
            self.bound = true;
        }
    }

    pub fn unbind(&mut self, gl: &dyn GpuContext) {
        if self.bound {
            gl.use_program(0);
            self.bound = false;
        }
    }

    fn ensure_bound(&self, name: &str) -> GpuResult<()> {
        if self.bound {
            Ok(())
        } else {
            Err(GpuError::ProgramNotBound(name.to_string()))
        }
    }

    /// Resolve `name` by its prefix, `-1` when not present
    pub fn location(&self, gl: &dyn GpuContext, name: &str) -> Location {
        if name.starts_with(shader_names::UNIFORM_PREFIX) {
            gl.uniform_location(self.handle, name)
        } else {
            gl.attrib_location(self.handle, name)
        }
    }

    fn attribute_index(&self, gl: &dyn GpuContext, name: &str) -> GpuResult<u32> {
        match self.location(gl, name) {
            l if l >= 0 => Ok(l as u32),
            _ => Err(GpuError::UnknownLocation(name.to_string())),
        }
    }

    /// Set a float uniform; names the program lacks are ignored
    pub fn set_float(&self, gl: &dyn GpuContext, name: &str, value: f32) -> GpuResult<()> {
        self.ensure_bound(name)?;
        gl.uniform_1f(self.location(gl, name), value);
        Ok(())
    }

    /// Set a vec4 uniform; names the program lacks are ignored
    pub fn set_vec4(&self, gl: &dyn GpuContext, name: &str, value: [f32; 4]) -> GpuResult<()> {
        self.ensure_bound(name)?;
        gl.uniform_4f(self.location(gl, name), value);
        Ok(())
    }

    /// Point an attribute at `data` and enable it
    pub fn set_attribute(
        &self,
        gl: &dyn GpuContext,
        name: &str,
        components: usize,
        data: &[f32],
    ) -> GpuResult<u32> {
        self.ensure_bound(name)?;
        let index = self.attribute_index(gl, name)?;
        gl.vertex_attrib_pointer(index, components, data);
        gl.enable_vertex_attrib_array(index);
        Ok(index)
    }

    /// Disable an attribute array; names the program lacks are ignored
    pub fn disable_attribute(&self, gl: &dyn GpuContext, name: &str) -> GpuResult<()> {
        self.ensure_bound(name)?;
        if let Ok(index) = self.attribute_index(gl, name) {
            gl.disable_vertex_attrib_array(index);
        }
        Ok(())
    }

    /// Set `name` as the position attribute and draw a triangle fan
    pub fn draw_arrays(
        &self,
        gl: &dyn GpuContext,
        name: &str,
        components: usize,
        vertices: &[f32],
        count: usize,
    ) -> GpuResult<()> {
        self.set_attribute(gl, name, components, vertices)?;
        gl.draw_arrays(Primitive::TriangleFan, 0, count);
        Ok(())
    }

    fn read_uniform(&self, gl: &dyn GpuContext, name: &str, out: &mut [f32]) -> GpuResult<usize> {
        self.ensure_bound(name)?;
        let location = self.location(gl, name);
        if location < 0 {
            return Err(GpuError::UnknownLocation(name.to_string()));
        }
        Ok(gl.get_uniform(self.handle, location, out))
    }

    pub fn get_float(&self, gl: &dyn GpuContext, name: &str) -> GpuResult<f32> {
        let mut out = [0.0f32; 1];
        self.read_uniform(gl, name, &mut out)?;
        Ok(out[0])
    }

    pub fn get_vec4(&self, gl: &dyn GpuContext, name: &str) -> GpuResult<[f32; 4]> {
        let mut out = [0.0f32; 4];
        self.read_uniform(gl, name, &mut out)?;
        Ok(out)
    }

    /// Write reciprocal texel size if the shaders asked for it
    pub fn set_texels(&self, gl: &dyn GpuContext, width: u32, height: u32) -> GpuResult<()> {
        if self.has_texel_uniforms && width > 0 && height > 0 {
            self.set_float(gl, shader_names::TEXEL_WIDTH, 1.0 / width as f32)?;
            self.set_float(gl, shader_names::TEXEL_HEIGHT, 1.0 / height as f32)?;
        }
        Ok(())
    }

    /// Delete the shaders and then the program; later calls do nothing
    pub fn dispose(&mut self, gl: &dyn GpuContext) {
        if self.disposed {
            return;
        }
        self.unbind(gl);
        for shader in self.shaders.drain(..) {
            gl.delete_shader(shader.handle);
        }
        gl.delete_program(self.handle);
        self.disposed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::SoftwareGpu;
    use crate::shaders;

    #[test]
    fn shader_kind_from_builtin_output() {
        assert_eq!(Shader::kind_of(shaders::VERTEX).unwrap(), ShaderKind::Vertex);
        assert_eq!(
            Shader::kind_of(shaders::FRAGMENT_COLOR).unwrap(),
            ShaderKind::Fragment
        );
        assert!(matches!(
            Shader::kind_of("void main() {}"),
            Err(GpuError::UnknownShaderKind)
        ));
    }

    #[test]
    fn compile_error_carries_log_and_frees_shaders() {
        let gl = SoftwareGpu::new(1, 1);
        let broken = "void main() { gl_FragColor = vec4(1.0);";
        let err = ShaderProgram::new(&gl, &[shaders::VERTEX, broken]).unwrap_err();
        match err {
            GpuError::Compile { name, log } => {
                assert_eq!(name, "fragment");
                assert!(!log.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(gl.live_objects(), 0);
    }

    #[test]
    fn link_error_is_fatal() {
        let gl = SoftwareGpu::new(1, 1);
        let err = ShaderProgram::new(&gl, &[shaders::VERTEX]).unwrap_err();
        assert!(matches!(err, GpuError::Link { .. }));
        assert_eq!(gl.live_objects(), 0);
    }

    #[test]
    fn zero_program_handle_is_fatal() {
        let gl = SoftwareGpu::new(1, 1).with_object_limit(2);
        let err = ShaderProgram::new(&gl, &[shaders::VERTEX, shaders::FRAGMENT_COLOR]).unwrap_err();
        assert!(matches!(err, GpuError::HandleAllocation("program")));
        assert_eq!(gl.live_objects(), 0);
    }

    #[test]
    fn bind_and_unbind_are_idempotent() {
        let gl = SoftwareGpu::new(1, 1);
        let mut program = ShaderProgram::new(&gl, &[shaders::VERTEX, shaders::FRAGMENT_COLOR]).unwrap();
        let before = gl.stats().use_program;
        program.bind(&gl);
        program.bind(&gl);
        assert_eq!(gl.stats().use_program, before + 1);
        program.unbind(&gl);
        program.unbind(&gl);
        assert_eq!(gl.stats().use_program, before + 2);
    }

    #[test]
    fn access_while_unbound_is_an_error() {
        let gl = SoftwareGpu::new(1, 1);
        let program = ShaderProgram::new(&gl, &[shaders::VERTEX, shaders::FRAGMENT_COLOR]).unwrap();
        assert!(matches!(
            program.set_vec4(&gl, "u_Color", [1.0; 4]),
            Err(GpuError::ProgramNotBound(_))
        ));
        assert!(matches!(
            program.get_vec4(&gl, "u_Color"),
            Err(GpuError::ProgramNotBound(_))
        ));
    }

    #[test]
    fn uniform_round_trip_when_bound() {
        let gl = SoftwareGpu::new(1, 1);
        let mut program = ShaderProgram::new(&gl, &[shaders::VERTEX, shaders::FRAGMENT_COLOR]).unwrap();
        program.bind(&gl);
        program.set_vec4(&gl, "u_Color", [0.1, 0.2, 0.3, 0.4]).unwrap();
        assert_eq!(program.get_vec4(&gl, "u_Color").unwrap(), [0.1, 0.2, 0.3, 0.4]);
        assert!(program.location(&gl, "a_Position") >= 0);
    }

    #[test]
    fn texels_only_for_programs_that_declare_them() {
        let gl = SoftwareGpu::new(1, 1);
        let mut plain =
            ShaderProgram::new(&gl, &[shaders::VERTEX_TEXTURE, shaders::FRAGMENT_TEXTURE]).unwrap();
        assert!(!plain.has_texel_uniforms());
        plain.bind(&gl);
        plain.set_texels(&gl, 64, 32).unwrap();

        let mut blur =
            ShaderProgram::new(&gl, &[shaders::VERTEX_TEXTURE, shaders::FRAGMENT_BLUR]).unwrap();
        assert!(blur.has_texel_uniforms());
        blur.bind(&gl);
        blur.set_texels(&gl, 64, 32).unwrap();
        assert_eq!(blur.get_float(&gl, "u_TexelWidth").unwrap(), 1.0 / 64.0);
        assert_eq!(blur.get_float(&gl, "u_TexelHeight").unwrap(), 1.0 / 32.0);
    }

    #[test]
    fn dispose_deletes_everything_once() {
        let gl = SoftwareGpu::new(1, 1);
        let mut program = ShaderProgram::new(&gl, &[shaders::VERTEX, shaders::FRAGMENT_COLOR]).unwrap();
        program.dispose(&gl);
        program.dispose(&gl);
        let stats = gl.stats();
        assert_eq!(stats.deletes, 3);
        assert_eq!(stats.invalid_deletes, 0);
        assert_eq!(gl.live_objects(), 0);
    }
}
