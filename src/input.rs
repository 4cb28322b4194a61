// 该文件是 Kanjian （看见） 项目的一部分。
// src/input.rs - 图像输入（文件上传 / 摄像头采集）
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

use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::{FromUrl, frame::Frame, notification::Notification};

mod upload;
pub use self::upload::{UploadFile, UploadProgress, from_upload};

mod camera;
pub use self::camera::{Camera, CameraStream, StreamGuard, capture_single_frame, from_camera};

#[cfg(feature = "v4l_camera")]
mod v4l_camera;
#[cfg(feature = "v4l_camera")]
pub use self::v4l_camera::V4lCamera;

#[derive(Error, Debug)]
pub enum AcquireError {
  #[error("不支持的文件类型: {0}")]
  InvalidInputType(String),
  #[error("摄像头不可用: {0}")]
  CameraUnavailable(String),
  #[error("摄像头访问被拒绝")]
  CameraDenied,
  #[error("摄像头采集失败: {0}")]
  CaptureFailed(String),
  #[error("图像解码错误: {0}")]
  Decode(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

impl AcquireError {
  /// 获取失败对应的用户通知
  pub fn notification(&self) -> Notification {
    match self {
      AcquireError::InvalidInputType(_) => Notification::validation(
        "Invalid file type",
        "Please upload an image file (JPEG, PNG, etc.)",
      ),
      AcquireError::CameraUnavailable(_) => Notification::operational(
        "Camera not supported",
        "Your device doesn't support camera access",
      ),
      AcquireError::CameraDenied => Notification::operational(
        "Camera error",
        "Camera access was denied",
      ),
      AcquireError::CaptureFailed(_) => {
        Notification::operational("Camera error", "Could not access the camera")
      }
      AcquireError::Decode(_) | AcquireError::Io(_) => Notification::operational(
        "Image load failed",
        "The selected file could not be read as an image",
      ),
    }
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("摄像头支持未启用")]
  CameraDisabled,
}

/// 一次图像获取请求
#[derive(Clone)]
pub enum ImageInput {
  Upload(UploadFile),
  Camera(Arc<dyn Camera>),
}

impl std::fmt::Debug for ImageInput {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ImageInput::Upload(file) => f.debug_tuple("Upload").field(file).finish(),
      ImageInput::Camera(_) => f.write_str("Camera"),
    }
  }
}

const UPLOAD_SCHEME: &str = "image";
const CAMERA_SCHEME: &str = "camera";
const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";

impl FromUrl for ImageInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      UPLOAD_SCHEME => Ok(ImageInput::Upload(UploadFile::from_path(url.path()))),
      CAMERA_SCHEME => {
        let device = if url.path().is_empty() || url.path() == "/" {
          DEFAULT_CAMERA_DEVICE
        } else {
          url.path()
        };
        camera_input(device)
      }
      other => Err(InputError::SchemeMismatch(other.to_string())),
    }
  }
}

#[cfg(feature = "v4l_camera")]
fn camera_input(device: &str) -> Result<ImageInput, InputError> {
  Ok(ImageInput::Camera(Arc::new(V4lCamera::new(device))))
}

#[cfg(not(feature = "v4l_camera"))]
fn camera_input(_device: &str) -> Result<ImageInput, InputError> {
  Err(InputError::CameraDisabled)
}

impl ImageInput {
  /// 获取一帧图像，上传文件时通过 `progress` 报告读取进度
  pub async fn acquire(self, progress: Option<&UploadProgress>) -> Result<Frame, AcquireError> {
    match self {
      ImageInput::Upload(file) => from_upload(file, progress).await,
      ImageInput::Camera(camera) => from_camera(camera).await,
    }
  }
}
