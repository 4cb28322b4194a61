// 该文件是 Kanjian （看见） 项目的一部分。
// src/frame.rs - 解码后的图像帧定义
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

use image::RgbImage;

/// 图像来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOrigin {
  /// 上传的图像文件
  Upload,
  /// 摄像头单帧采集
  Camera,
}

/// 像素尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplaySize {
  pub width: u32,
  pub height: u32,
}

impl DisplaySize {
  pub fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }

  /// 按指定宽度等比缩放 `natural`，高度至少为 1
  pub fn fit_width(natural: DisplaySize, width: u32) -> Self {
    if natural.width == 0 {
      return Self::new(width, natural.height);
    }
    let height = (natural.height as f64 * width as f64 / natural.width as f64).round() as u32;
    Self::new(width, height.max(1))
  }

  /// 从 `natural` 坐标系映射到当前尺寸的缩放系数 (sx, sy)
  pub fn scale_from(&self, natural: DisplaySize) -> (f32, f32) {
    let sx = if natural.width == 0 {
      1.0
    } else {
      self.width as f32 / natural.width as f32
    };
    let sy = if natural.height == 0 {
      1.0
    } else {
      self.height as f32 / natural.height as f32
    };
    (sx, sy)
  }
}

/// 解码后的 RGB 图像帧，尺寸为图像的原始（natural）像素尺寸
#[derive(Debug, Clone)]
pub struct Frame {
  image: RgbImage,
  origin: FrameOrigin,
}

impl Frame {
  pub fn new(image: RgbImage, origin: FrameOrigin) -> Self {
    Self { image, origin }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn natural_size(&self) -> DisplaySize {
    DisplaySize::new(self.width(), self.height())
  }

  pub fn origin(&self) -> FrameOrigin {
    self.origin
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fit_width_keeps_aspect_ratio() {
    let natural = DisplaySize::new(1280, 720);
    assert_eq!(DisplaySize::fit_width(natural, 640), DisplaySize::new(640, 360));
    assert_eq!(DisplaySize::fit_width(natural, 1), DisplaySize::new(1, 1));
  }

  #[test]
  fn scale_from_natural_space() {
    let display = DisplaySize::new(320, 240);
    let (sx, sy) = display.scale_from(DisplaySize::new(640, 480));
    assert_eq!((sx, sy), (0.5, 0.5));
  }

  #[test]
  fn frame_reports_natural_size() {
    let frame = Frame::new(RgbImage::new(4, 3), FrameOrigin::Upload);
    assert_eq!(frame.natural_size(), DisplaySize::new(4, 3));
    assert_eq!(frame.origin(), FrameOrigin::Upload);
  }
}
