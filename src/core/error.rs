//! 错误处理模块
//!
//! 定义了引擎中使用的统一错误类型，使用 `thiserror` 提供友好的错误消息。
//!
//! # 错误分类
//!
//! - 初始化期间的致命错误（无可用适配器、设备/交换链创建失败、
//!   常量布局不匹配）会被记录并返回给 `main`，进程以非零码退出
//! - 运行期可恢复的情况（窗口最小化、对象容量增长）不走错误路径
//! - 描述符堆耗尽是调用方的逻辑错误，以 `DescriptorHeapExhausted` 报告

use std::path::PathBuf;

use thiserror::Error;

/// 引擎统一的 Result 类型
pub type Result<T> = std::result::Result<T, EngineError>;

/// 引擎顶层错误
#[derive(Debug, Error)]
pub enum EngineError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// 图形 API 错误
    #[error("Graphics error: {0}")]
    Graphics(#[from] GraphicsError),

    /// 场景加载 / 保存错误
    #[error("Scene error: {0}")]
    Scene(#[from] SceneError),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 初始化错误
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// 运行时错误（渲染线程断开等）
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// 配置相关的错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置文件未找到
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    /// 配置文件解析失败
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// 配置值无效
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug, Error)]
pub enum GraphicsError {
    /// 没有满足要求的适配器
    #[error("No suitable adapter supports feature level {required}")]
    NoSuitableAdapter { required: String },

    /// 设备创建失败
    #[error("Device creation failed: {0}")]
    DeviceCreation(String),

    /// 交换链错误
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// 着色器编译失败
    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// 资源创建失败
    #[error("Resource creation failed: {0}")]
    ResourceCreation(String),

    /// 渲染命令执行失败
    #[error("Command execution failed: {0}")]
    CommandExecution(String),

    /// 描述符堆剩余空间不足
    #[error("Descriptor heap '{heap}' exhausted: requested {requested}, {available} available")]
    DescriptorHeapExhausted {
        heap: String,
        requested: u32,
        available: u32,
    },

    /// CPU 侧常量结构与着色器 cbuffer 大小不一致
    #[error("Constant layout '{name}' is {cpu_size} bytes on the CPU but {shader_size} bytes in the shader")]
    ConstantLayoutMismatch {
        name: &'static str,
        cpu_size: usize,
        shader_size: usize,
    },

    /// 驱动层规则被违反（headless 设备模拟调试层时报告）
    #[error("Driver validation failed: {0}")]
    Validation(String),
}

/// 场景文件相关的错误
#[derive(Debug, Error)]
pub enum SceneError {
    /// 场景文件未找到
    #[error("Scene file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// JSON 语法错误
    #[error("Malformed scene JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// 结构不符合场景格式
    #[error("Invalid scene data in '{context}': {reason}")]
    Invalid { context: String, reason: String },

    #[error("Scene I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SceneError {
    pub(crate) fn invalid(context: impl Into<String>, reason: impl Into<String>) -> Self {
        SceneError::Invalid {
            context: context.into(),
            reason: reason.into(),
        }
    }
}
