// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/replay.rs - 回放推理服务（读取录制的推理输出）
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

use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{InferenceService, PayloadError, parse_payload},
};

#[derive(Error, Debug)]
pub enum ReplayInferenceError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("录制的推理输出无效: {0}")]
  InvalidPayload(#[from] PayloadError),
}

/// 从 JSON 文件回放一次录制好的推理输出，任何输入图像都得到同样的结果
pub struct ReplayInference {
  path: PathBuf,
}

pub struct ReplayHandle {
  payload: Value,
}

impl FromUrlWithScheme for ReplayInference {
  const SCHEME: &'static str = "json";
}

impl FromUrl for ReplayInference {
  type Error = ReplayInferenceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayInferenceError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    Ok(ReplayInference::new(url.path()))
  }
}

impl ReplayInference {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }
}

impl InferenceService for ReplayInference {
  type Handle = ReplayHandle;
  type Error = ReplayInferenceError;

  async fn load(&self) -> Result<Self::Handle, Self::Error> {
    info!("加载录制的推理输出: {}", self.path.display());
    let data = tokio::fs::read(&self.path).await?;
    let payload: Value = serde_json::from_slice(&data)?;

    // 加载时先校验一次，格式错误的文件在加载阶段失败
    let result = parse_payload(payload.clone())?;
    info!("录制的推理输出包含 {} 个检测结果", result.len());

    Ok(ReplayHandle { payload })
  }

  async fn detect(&self, handle: &Self::Handle, frame: &Frame) -> Result<Value, Self::Error> {
    debug!("回放推理输出，输入图像 {}x{}", frame.width(), frame.height());
    Ok(handle.payload.clone())
  }
}
