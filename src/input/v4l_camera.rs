// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/v4l_camera.rs - V4L2 摄像头
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

use std::io;

use image::{ImageFormat, RgbImage};
use tracing::{debug, info};
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use crate::input::{AcquireError, Camera, CameraStream};

const MMAP_BUFFER_COUNT: u32 = 4;

/// V4L2 摄像头，每次 `open` 独占打开设备，保持设备当前（原生）分辨率
pub struct V4lCamera {
  device_path: String,
}

impl V4lCamera {
  pub fn new(device_path: &str) -> Self {
    Self {
      device_path: device_path.to_string(),
    }
  }
}

fn open_error(device_path: &str, err: io::Error) -> AcquireError {
  match err.kind() {
    io::ErrorKind::PermissionDenied => AcquireError::CameraDenied,
    _ => AcquireError::CameraUnavailable(format!("{}: {}", device_path, err)),
  }
}

fn capture_error(err: io::Error) -> AcquireError {
  AcquireError::CaptureFailed(err.to_string())
}

fn fourcc_name(fourcc: &FourCC) -> String {
  fourcc.str().unwrap_or("????").to_string()
}

impl Camera for V4lCamera {
  fn open(&self) -> Result<Box<dyn CameraStream>, AcquireError> {
    let device =
      Device::with_path(&self.device_path).map_err(|e| open_error(&self.device_path, e))?;

    // 只修改像素格式，分辨率保持设备当前设置
    let mut format = device.format().map_err(capture_error)?;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format).map_err(capture_error)?;

    info!(
      "摄像头已打开: {} {}x{} {}",
      self.device_path,
      format.width,
      format.height,
      fourcc_name(&format.fourcc)
    );

    Ok(Box::new(V4lStream {
      device: Some(device),
      width: format.width,
      height: format.height,
      fourcc: format.fourcc,
    }))
  }
}

struct V4lStream {
  device: Option<Device>,
  width: u32,
  height: u32,
  fourcc: FourCC,
}

impl CameraStream for V4lStream {
  fn capture(&mut self) -> Result<RgbImage, AcquireError> {
    let device = self
      .device
      .as_mut()
      .ok_or_else(|| AcquireError::CaptureFailed("视频流已停止".to_string()))?;

    // 流对象离开作用域时关闭 V4L2 流并释放缓冲区
    let mut stream = MmapStream::with_buffers(device, Type::VideoCapture, MMAP_BUFFER_COUNT)
      .map_err(capture_error)?;
    let (buffer, meta) = stream.next().map_err(capture_error)?;
    debug!("采集到帧: {} 字节, 序号 {}", buffer.len(), meta.sequence);

    decode_buffer(buffer, self.width, self.height, &self.fourcc)
  }

  fn stop(&mut self) {
    if self.device.take().is_some() {
      debug!("V4L2 设备已释放");
    }
  }
}

fn decode_buffer(
  buffer: &[u8],
  width: u32,
  height: u32,
  fourcc: &FourCC,
) -> Result<RgbImage, AcquireError> {
  let raw = match &fourcc.repr {
    b"YUYV" => yuyv_to_rgb(buffer, width, height),
    b"RGB3" => buffer.to_vec(),
    b"MJPG" => {
      return Ok(image::load_from_memory_with_format(buffer, ImageFormat::Jpeg)?.to_rgb8());
    }
    _ => {
      return Err(AcquireError::CaptureFailed(format!(
        "不支持的像素格式: {}",
        fourcc_name(fourcc)
      )));
    }
  };

  RgbImage::from_raw(width, height, raw)
    .ok_or_else(|| AcquireError::CaptureFailed("帧数据长度与分辨率不匹配".to_string()))
}

/// 将 YUYV 格式转换为 RGB
fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
  let mut rgb = Vec::with_capacity((width * height * 3) as usize);

  for chunk in yuyv.chunks_exact(4) {
    let y0 = chunk[0] as f32;
    let u = chunk[1] as f32 - 128.0;
    let y1 = chunk[2] as f32;
    let v = chunk[3] as f32 - 128.0;

    for y in [y0, y1] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yuyv_grey_maps_to_grey() {
    let rgb = yuyv_to_rgb(&[128, 128, 64, 128], 2, 1);
    assert_eq!(rgb, vec![128, 128, 128, 64, 64, 64]);
  }

  #[test]
  fn decode_rejects_short_buffer() {
    let err = decode_buffer(&[0u8; 4], 4, 4, &FourCC::new(b"YUYV")).unwrap_err();
    assert!(matches!(err, AcquireError::CaptureFailed(_)));
  }

  #[test]
  fn decode_rejects_unknown_format() {
    let err = decode_buffer(&[0u8; 12], 2, 2, &FourCC::new(b"NV12")).unwrap_err();
    assert!(matches!(err, AcquireError::CaptureFailed(_)));
  }

  #[test]
  fn permission_denied_maps_to_denied() {
    let err = open_error("/dev/video0", io::Error::from(io::ErrorKind::PermissionDenied));
    assert!(matches!(err, AcquireError::CameraDenied));
    let err = open_error("/dev/video9", io::Error::from(io::ErrorKind::NotFound));
    assert!(matches!(err, AcquireError::CameraUnavailable(_)));
  }
}
