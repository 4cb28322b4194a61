// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/payload.rs - 推理输出校验
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

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::model::{BoundingBox, DetectResult, Detection};

#[derive(Error, Debug)]
pub enum PayloadError {
  #[error("推理输出不是数组: {0}")]
  NotAnArray(String),
  #[error("第 {index} 个检测结果格式错误: {source}")]
  Malformed {
    index: usize,
    source: serde_json::Error,
  },
  #[error("第 {index} 个检测结果置信度越界: {score}")]
  ScoreOutOfRange { index: usize, score: f64 },
  #[error("第 {index} 个检测框无效: {bbox:?}")]
  InvalidBox { index: usize, bbox: [f64; 4] },
}

/// 推理服务输出的单个检测结果: `{class, score, bbox: [x, y, w, h]}`
#[derive(Deserialize, Debug)]
struct RawDetection {
  class: String,
  score: f64,
  bbox: [f64; 4],
}

fn kind_of(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "bool",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

/// 将推理服务的原始输出转换为严格类型的检测结果，任一条目不合法则整体失败
pub fn parse_payload(value: Value) -> Result<DetectResult, PayloadError> {
  let entries = match value {
    Value::Array(entries) => entries,
    other => return Err(PayloadError::NotAnArray(kind_of(&other).to_string())),
  };

  let mut items = Vec::with_capacity(entries.len());
  for (index, entry) in entries.into_iter().enumerate() {
    let raw: RawDetection =
      serde_json::from_value(entry).map_err(|source| PayloadError::Malformed { index, source })?;

    if !raw.score.is_finite() || !(0.0..=1.0).contains(&raw.score) {
      return Err(PayloadError::ScoreOutOfRange {
        index,
        score: raw.score,
      });
    }

    let [x, y, width, height] = raw.bbox;
    if raw.bbox.iter().any(|v| !v.is_finite()) || width < 0.0 || height < 0.0 {
      return Err(PayloadError::InvalidBox {
        index,
        bbox: raw.bbox,
      });
    }

    items.push(Detection {
      class_label: raw.class,
      confidence: raw.score as f32,
      bbox: BoundingBox {
        x: x as f32,
        y: y as f32,
        width: width as f32,
        height: height as f32,
      },
    });
  }

  debug!("推理输出校验通过，共 {} 个检测结果", items.len());
  Ok(DetectResult::from(items))
}
