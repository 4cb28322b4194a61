// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/save_image_file.rs - 保存标注后的图像文件
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::DetectResult,
  output::{Overlay, Render},
};

/// 将标注层叠加到图像上并保存，`?record` 时同时写出同名 `.txt` 检测记录
pub struct SaveImageFileOutput {
  path: PathBuf,
  record: bool,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput {
      path: PathBuf::from(uri.path()),
      record: uri.query_pairs().any(|(k, _)| k == "record"),
    })
  }
}

/// 每个检测一行：`标签, 置信度, x, y, 宽, 高`
pub fn record_lines(result: &DetectResult) -> Vec<String> {
  result
    .iter()
    .map(|item| {
      format!(
        "{}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}",
        item.class_label,
        item.confidence,
        item.bbox.x,
        item.bbox.y,
        item.bbox.width,
        item.bbox.height
      )
    })
    .collect()
}

impl SaveImageFileOutput {
  pub fn path(&self) -> &Path {
    &self.path
  }

  fn save_image(&self, image: image::RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    info!("保存图像到文件: {}", self.path.display());

    Ok(())
  }

  fn save_record(&self, result: &DetectResult) -> Result<(), SaveImageFileError> {
    let path = self.path.with_extension("txt");
    std::fs::write(&path, record_lines(result).join("\n"))?;
    info!("保存检测记录到文件: {}", path.display());
    Ok(())
  }
}

impl Render<Frame, Overlay> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &Frame, overlay: &Overlay) -> Result<(), Self::Error> {
    self.save_image(overlay.composite(frame))?;
    if self.record {
      self.save_record(&overlay.result)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    frame::FrameOrigin,
    model::{BoundingBox, Detection},
    output::OverlayRenderer,
  };
  use image::RgbImage;

  fn sample() -> (Frame, Overlay) {
    let frame = Frame::new(RgbImage::new(64, 48), FrameOrigin::Upload);
    let result: DetectResult = vec![Detection {
      class_label: "person".to_string(),
      confidence: 0.9,
      bbox: BoundingBox {
        x: 4.0,
        y: 30.0,
        width: 20.0,
        height: 10.0,
      },
    }]
    .into();
    let overlay = OverlayRenderer::default().render(&frame, &result, frame.natural_size());
    (frame, overlay)
  }

  #[test]
  fn rejects_other_scheme() {
    let url = Url::parse("folder:///tmp/out").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn saves_composited_image_and_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("out.png");
    let url = Url::parse(&format!("image://{}?record", path.display())).unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();

    let (frame, overlay) = sample();
    output.render_result(&frame, &overlay).unwrap();

    let saved = image::open(&path).unwrap();
    assert_eq!((saved.width(), saved.height()), (64, 48));

    let record = std::fs::read_to_string(path.with_extension("txt")).unwrap();
    assert_eq!(record, "person, 0.9000, 4.0000, 30.0000, 20.0000, 10.0000");
  }

  #[test]
  fn no_record_without_query() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.png");
    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();

    let (frame, overlay) = sample();
    output.render_result(&frame, &overlay).unwrap();
    assert!(path.exists());
    assert!(!path.with_extension("txt").exists());
  }
}
