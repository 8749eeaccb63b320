// SPDX-License-Identifier: MPL-2.0

//! Error types for the camera pipeline

use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Result type for GPU resource operations
pub type GpuResult<T> = Result<T, GpuError>;

/// Result type for camera device and session operations
pub type CameraResult<T> = Result<T, CameraError>;

/// Result type for frame capture persistence
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Main application error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// GPU resource errors
    Gpu(GpuError),
    /// Camera-related errors
    Camera(CameraError),
    /// Frame capture errors
    Capture(CaptureError),
    /// Configuration errors
    Config(ConfigError),
    /// Generic error with message
    Other(String),
}

/// A pending error reported by the GPU context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlError {
    InvalidEnum,
    InvalidValue,
    InvalidOperation,
    InvalidFramebufferOperation,
    OutOfMemory,
}

/// GPU resource construction and usage errors
///
/// Construction errors (compile, link, framebuffer completeness, texture
/// dimensions, handle allocation) are fatal for the resource being built.
/// `ProgramNotBound` is a usage precondition violation.
#[derive(Debug, Clone)]
pub enum GpuError {
    /// Shader source writes neither `gl_Position` nor `gl_FragColor`
    UnknownShaderKind,
    /// Shader failed to compile
    Compile { name: String, log: String },
    /// Program failed to link
    Link { log: String },
    /// The context returned a zero handle
    HandleAllocation(&'static str),
    /// Framebuffer attachments failed the completeness check
    FramebufferIncomplete(&'static str),
    /// Image uploads require square power-of-two dimensions
    NotPowerOfTwo { width: u32, height: u32 },
    /// Uniform or attribute accessed while the program was not bound
    ProgramNotBound(String),
    /// Uniform or attribute name not present in the linked program
    UnknownLocation(String),
    /// The context reported an error after an operation
    Gl { op: &'static str, error: GlError },
    /// The render thread could not create its context
    ContextCreation(String),
}

/// Camera-specific errors
#[derive(Debug, Clone)]
pub enum CameraError {
    /// No camera devices found
    NoCameraFound,
    /// Index outside `0..count`
    InvalidIndex { index: i32, count: usize },
    /// Camera is busy or in use
    Busy,
    /// Device failed to open
    OpenFailed(String),
    /// Preview surface could not be attached
    PreviewTexture(String),
    /// Parameters were rejected by the device
    Parameters(String),
    /// Face detection is unsupported or failed to start
    FaceDetection(String),
    /// Operation issued after the session was disposed
    Disposed,
    /// Backend error
    BackendError(String),
}

/// Frame capture persistence errors
#[derive(Debug, Clone)]
pub enum CaptureError {
    /// Folder, filename, or dimensions were empty
    InvalidRequest(String),
    /// Pixel data could not be converted or encoded
    EncodingFailed(String),
    /// Save failed
    SaveFailed(String),
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// No configuration directory could be determined
    NoConfigDir,
    /// File could not be read or written
    Io(String),
    /// File contents are not valid configuration
    Parse(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Gpu(e) => write!(f, "GPU error: {}", e),
            AppError::Camera(e) => write!(f, "Camera error: {}", e),
            AppError::Capture(e) => write!(f, "Capture error: {}", e),
            AppError::Config(e) => write!(f, "Configuration error: {}", e),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl GlError {
    /// Human readable description of the error code
    pub fn description(&self) -> &'static str {
        match self {
            GlError::InvalidEnum => "invalid enum",
            GlError::InvalidValue => "invalid value",
            GlError::InvalidOperation => "invalid operation",
            GlError::InvalidFramebufferOperation => "invalid framebuffer operation",
            GlError::OutOfMemory => "out of memory",
        }
    }
}

impl fmt::Display for GlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::UnknownShaderKind => {
                write!(f, "Shader source writes neither gl_Position nor gl_FragColor")
            }
            GpuError::Compile { name, log } => {
                write!(f, "Could not compile {} shader: {}", name, log)
            }
            GpuError::Link { log } => write!(f, "Could not link program: {}", log),
            GpuError::HandleAllocation(what) => write!(f, "Could not create {}", what),
            GpuError::FramebufferIncomplete(reason) => {
                write!(f, "Framebuffer incomplete: {}", reason)
            }
            GpuError::NotPowerOfTwo { width, height } => write!(
                f,
                "Texture must be square with power-of-two size, got {}x{}",
                width, height
            ),
            GpuError::ProgramNotBound(name) => {
                write!(f, "Program must be bound to access {}", name)
            }
            GpuError::UnknownLocation(name) => write!(f, "No uniform or attribute named {}", name),
            GpuError::Gl { op, error } => write!(f, "{}: {}", op, error),
            GpuError::ContextCreation(msg) => write!(f, "Context creation failed: {}", msg),
        }
    }
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::NoCameraFound => write!(f, "No camera devices found"),
            CameraError::InvalidIndex { index, count } => {
                write!(f, "Camera index {} out of range ({} cameras)", index, count)
            }
            CameraError::Busy => write!(f, "Camera is busy"),
            CameraError::OpenFailed(msg) => write!(f, "Open failed: {}", msg),
            CameraError::PreviewTexture(msg) => write!(f, "Preview texture failed: {}", msg),
            CameraError::Parameters(msg) => write!(f, "Invalid parameters: {}", msg),
            CameraError::FaceDetection(msg) => write!(f, "Face detection failed: {}", msg),
            CameraError::Disposed => write!(f, "Camera session disposed"),
            CameraError::BackendError(msg) => write!(f, "Backend error: {}", msg),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::InvalidRequest(msg) => write!(f, "Invalid capture request: {}", msg),
            CaptureError::EncodingFailed(msg) => write!(f, "Encoding failed: {}", msg),
            CaptureError::SaveFailed(msg) => write!(f, "Save failed: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoConfigDir => write!(f, "No configuration directory available"),
            ConfigError::Io(msg) => write!(f, "I/O error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for GpuError {}
impl std::error::Error for CameraError {}
impl std::error::Error for CaptureError {}
impl std::error::Error for ConfigError {}

// Conversions from sub-errors to AppError
impl From<GpuError> for AppError {
    fn from(err: GpuError) -> Self {
        AppError::Gpu(err)
    }
}

impl From<CameraError> for AppError {
    fn from(err: CameraError) -> Self {
        AppError::Camera(err)
    }
}

impl From<CaptureError> for AppError {
    fn from(err: CaptureError) -> Self {
        AppError::Capture(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

// Conversions for I/O and encoder errors
impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::SaveFailed(err.to_string())
    }
}

impl From<image::ImageError> for CaptureError {
    fn from(err: image::ImageError) -> Self {
        CaptureError::EncodingFailed(err.to_string())
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
