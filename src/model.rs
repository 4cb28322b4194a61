// 该文件是 Kanjian （看见） 项目的一部分。
// src/model.rs - 推理服务接口与检测结果
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{fmt, future::Future, sync::Arc};

use crate::frame::Frame;

/// 推理服务（外部协作者）
///
/// `load` 加载并预热模型，得到只读的模型句柄；`detect` 在给定图像上执行一次推理，
/// 返回未经校验的原始输出，由 [`parse_payload`] 在边界处转换为 [`DetectResult`]。
pub trait InferenceService: Send + Sync + 'static {
  type Handle: Send + Sync + 'static;
  type Error: std::error::Error + Send + Sync + 'static;

  fn load(&self) -> impl Future<Output = Result<Self::Handle, Self::Error>> + Send;

  fn detect(
    &self,
    handle: &Self::Handle,
    frame: &Frame,
  ) -> impl Future<Output = Result<serde_json::Value, Self::Error>> + Send;
}

/// 图像像素坐标下的检测框（左上角 + 宽高）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl BoundingBox {
  pub fn scaled(&self, sx: f32, sy: f32) -> Self {
    Self {
      x: self.x * sx,
      y: self.y * sy,
      width: self.width * sx,
      height: self.height * sy,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub class_label: String,
  pub confidence: f32,
  pub bbox: BoundingBox,
}

impl Detection {
  /// 四舍五入后的置信度百分比
  pub fn confidence_percent(&self) -> u32 {
    (self.confidence * 100.0).round() as u32
  }
}

/// 一次推理的完整结果，按推理服务返回的顺序排列，创建后不可修改
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Arc<[Detection]>,
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into(),
    }
  }
}

/// 模型生命周期状态（不含句柄）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
  Uninitialized,
  Loading,
  Ready,
  Failed,
}

/// 显式持有的模型资源，生命周期为 未初始化 → 加载中 → 就绪 / 失败
pub enum ModelSlot<H> {
  Uninitialized,
  Loading,
  Ready(Arc<H>),
  Failed(String),
}

impl<H> Default for ModelSlot<H> {
  fn default() -> Self {
    ModelSlot::Uninitialized
  }
}

impl<H> fmt::Debug for ModelSlot<H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ModelSlot::Failed(reason) => write!(f, "Failed({})", reason),
      other => write!(f, "{:?}", other.status()),
    }
  }
}

impl<H> ModelSlot<H> {
  pub fn status(&self) -> ModelStatus {
    match self {
      ModelSlot::Uninitialized => ModelStatus::Uninitialized,
      ModelSlot::Loading => ModelStatus::Loading,
      ModelSlot::Ready(_) => ModelStatus::Ready,
      ModelSlot::Failed(_) => ModelStatus::Failed,
    }
  }

  pub fn handle(&self) -> Option<Arc<H>> {
    match self {
      ModelSlot::Ready(handle) => Some(handle.clone()),
      _ => None,
    }
  }

  /// 进入加载状态；返回 true 表示调用方需要真正发起一次加载。
  /// 加载中或已就绪时不会重复加载，失败状态仅在 `retry_failed` 时重新加载。
  pub fn begin_load(&mut self, retry_failed: bool) -> bool {
    match self {
      ModelSlot::Uninitialized => {
        *self = ModelSlot::Loading;
        true
      }
      ModelSlot::Failed(_) if retry_failed => {
        *self = ModelSlot::Loading;
        true
      }
      _ => false,
    }
  }

  pub fn finish(&mut self, result: Result<Arc<H>, String>) {
    *self = match result {
      Ok(handle) => ModelSlot::Ready(handle),
      Err(reason) => ModelSlot::Failed(reason),
    };
  }
}

mod payload;
pub use self::payload::{PayloadError, parse_payload};

mod replay;
pub use self::replay::{ReplayHandle, ReplayInference, ReplayInferenceError};

mod process;
pub use self::process::{ProcessHandle, ProcessInference, ProcessInferenceError};
