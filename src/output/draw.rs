// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/draw.rs - 检测结果标注层绘制
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

use std::{fmt, path::Path};

use ab_glyph::{FontArc, PxScale};
use image::{DynamicImage, RgbImage, Rgba, RgbaImage, imageops};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::{DisplaySize, Frame},
  model::{BoundingBox, DetectResult, Detection},
};

// 标注样式常量
const BOX_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]); // 红色边框
const BOX_LINE_WIDTH: i32 = 2;
const LABEL_BACKGROUND: Rgba<u8> = Rgba([255, 0, 0, 179]); // 70% 不透明
const LABEL_TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_HEIGHT: u32 = 20;
const LABEL_HORIZONTAL_PADDING: u32 = 10;
const LABEL_TEXT_INSET: i32 = 5;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 没有字体时按字符数粗略估计
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 标签字体
#[derive(Clone)]
pub struct LabelFont(FontArc);

impl LabelFont {
  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    Self::from_bytes(data)
  }

  pub fn from_bytes(data: Vec<u8>) -> Result<Self, DrawError> {
    Ok(Self(FontArc::try_from_vec(data)?))
  }
}

/// 文字摘要中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryEntry {
  pub class_label: String,
  pub confidence_percent: u32,
}

impl fmt::Display for SummaryEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} ({}%)", self.class_label, self.confidence_percent)
  }
}

/// 单个检测结果在标注层上绘制的内容（显示坐标）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
  pub bbox: Rect,
  pub backdrop: Rect,
  pub text: String,
  pub text_origin: (i32, i32),
}

/// 一次绘制的产物：与显示尺寸一致的透明标注层，以及文字摘要
#[derive(Debug, Clone)]
pub struct Overlay {
  pub display: DisplaySize,
  pub surface: RgbaImage,
  pub annotations: Vec<Annotation>,
  pub summary: Vec<SummaryEntry>,
  /// 绘制所依据的检测结果（原始像素坐标）
  pub result: DetectResult,
}

impl Overlay {
  /// 将标注层叠加到按显示尺寸缩放后的图像上
  pub fn composite(&self, frame: &Frame) -> RgbImage {
    let base = if frame.natural_size() == self.display {
      frame.image().clone()
    } else {
      imageops::resize(
        frame.image(),
        self.display.width,
        self.display.height,
        imageops::FilterType::Triangle,
      )
    };

    let mut base = DynamicImage::ImageRgb8(base).to_rgba8();
    imageops::overlay(&mut base, &self.surface, 0, 0);
    DynamicImage::ImageRgba8(base).to_rgb8()
  }
}

pub fn label_text(detection: &Detection) -> String {
  format!(
    "{} {}%",
    detection.class_label,
    detection.confidence_percent()
  )
}

/// 按结果顺序生成文字摘要
pub fn summarize(result: &DetectResult) -> Vec<SummaryEntry> {
  result
    .iter()
    .map(|detection| SummaryEntry {
      class_label: detection.class_label.clone(),
      confidence_percent: detection.confidence_percent(),
    })
    .collect()
}

/// 标注层绘制器，除了可复用的绘图表面外不保存任何状态
pub struct OverlayRenderer {
  surface: RgbaImage,
  font: Option<LabelFont>,
}

impl Default for OverlayRenderer {
  fn default() -> Self {
    Self {
      surface: RgbaImage::new(0, 0),
      font: None,
    }
  }
}

impl OverlayRenderer {
  pub fn with_font(font: LabelFont) -> Self {
    Self {
      font: Some(font),
      ..Self::default()
    }
  }

  /// 绘制检测结果。检测框位于图像原始像素坐标，按显示尺寸与原始尺寸之比缩放，
  /// 超出显示区域的部分被裁剪，完全在区域外的检测框只出现在摘要中。
  pub fn render(&mut self, frame: &Frame, result: &DetectResult, display: DisplaySize) -> Overlay {
    self.resync(display);

    let (sx, sy) = display.scale_from(frame.natural_size());
    let DisplaySize { width, height } = display;
    debug!(
      "绘制 {} 个检测结果，显示尺寸 {}x{}，缩放 ({:.3}, {:.3})",
      result.len(),
      width,
      height,
      sx,
      sy
    );

    let annotations = if width == 0 || height == 0 {
      Vec::new()
    } else {
      result
        .iter()
        .filter_map(|detection| self.draw_detection(detection, sx, sy))
        .collect()
    };

    Overlay {
      display,
      surface: self.surface.clone(),
      annotations,
      summary: summarize(result),
      result: result.clone(),
    }
  }

  /// 清空标注层
  pub fn clear(&mut self) {
    self
      .surface
      .pixels_mut()
      .for_each(|pixel| *pixel = TRANSPARENT);
  }

  // 绘图表面尺寸与显示尺寸保持一致，并清除上一次的标注
  fn resync(&mut self, display: DisplaySize) {
    if self.surface.dimensions() != (display.width, display.height) {
      self.surface = RgbaImage::new(display.width, display.height);
    } else {
      self.clear();
    }
  }

  fn measure(&self, text: &str) -> u32 {
    match &self.font {
      Some(LabelFont(font)) => text_size(PxScale::from(LABEL_FONT_SIZE), font, text).0,
      None => (text.chars().count() as f32 * LABEL_CHAR_WIDTH).ceil() as u32,
    }
  }

  // 将显示坐标下的检测框裁剪到绘图表面内，完全位于表面之外时返回 None
  fn clip_to_surface(&self, bbox: BoundingBox) -> Option<Rect> {
    let (surface_width, surface_height) = self.surface.dimensions();
    let (sw, sh) = (surface_width as f32, surface_height as f32);

    let left = bbox.x.max(0.0);
    let top = bbox.y.max(0.0);
    let right = (bbox.x + bbox.width).min(sw);
    let bottom = (bbox.y + bbox.height).min(sh);

    // NaN 在比较中为假，一并排除
    if !(left < sw && top < sh && right >= left && bottom >= top) {
      return None;
    }

    let left = left.floor() as u32;
    let top = top.floor() as u32;
    let right = (right.round() as u32).clamp(left + 1, surface_width);
    let bottom = (bottom.round() as u32).clamp(top + 1, surface_height);

    Some(Rect::at(left as i32, top as i32).of_size(right - left, bottom - top))
  }

  fn draw_detection(&mut self, detection: &Detection, sx: f32, sy: f32) -> Option<Annotation> {
    let Some(rect) = self.clip_to_surface(detection.bbox.scaled(sx, sy)) else {
      debug!("检测框位于显示区域之外，跳过: {:?}", detection.bbox);
      return None;
    };
    let (x, y) = (rect.left(), rect.top());
    let (width, height) = (rect.width(), rect.height());

    // 边框（2 像素）
    for inset in 0..BOX_LINE_WIDTH {
      let inset_u = inset as u32 * 2;
      if width <= inset_u || height <= inset_u {
        break;
      }
      let inner = Rect::at(x + inset, y + inset).of_size(width - inset_u, height - inset_u);
      draw_hollow_rect_mut(&mut self.surface, inner, BOX_COLOR);
    }

    // 标签背景位于边框上方，贴近图像顶部时移入图像内
    let text = label_text(detection);
    let backdrop_width = self.measure(&text) + LABEL_HORIZONTAL_PADDING;
    let backdrop_y = (y - LABEL_HEIGHT as i32).max(0);
    let backdrop = Rect::at(x, backdrop_y).of_size(backdrop_width, LABEL_HEIGHT);
    draw_filled_rect_mut(&mut self.surface, backdrop, LABEL_BACKGROUND);

    let text_origin = (x + LABEL_TEXT_INSET, backdrop_y + LABEL_TEXT_VERTICAL_PADDING);
    if let Some(LabelFont(font)) = &self.font {
      draw_text_mut(
        &mut self.surface,
        LABEL_TEXT_COLOR,
        text_origin.0,
        text_origin.1,
        PxScale::from(LABEL_FONT_SIZE),
        font,
        &text,
      );
    }

    Some(Annotation {
      bbox: rect,
      backdrop,
      text,
      text_origin,
    })
  }
}
