// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/camera.rs - 摄像头单帧采集
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

use std::{
  ops::{Deref, DerefMut},
  sync::Arc,
};

use image::RgbImage;
use tracing::{debug, info};

use crate::{
  frame::{Frame, FrameOrigin},
  input::AcquireError,
};

/// 视频采集设备
pub trait Camera: Send + Sync {
  /// 申请独占访问并打开视频流
  fn open(&self) -> Result<Box<dyn CameraStream>, AcquireError>;
}

/// 已打开的视频流
pub trait CameraStream: Send {
  /// 以设备原生分辨率采集一帧
  fn capture(&mut self) -> Result<RgbImage, AcquireError>;

  /// 停止所有轨道并释放设备，可重复调用
  fn stop(&mut self);
}

/// 视频流守卫，离开作用域时必定停止视频流
pub struct StreamGuard {
  stream: Box<dyn CameraStream>,
}

impl StreamGuard {
  pub fn new(stream: Box<dyn CameraStream>) -> Self {
    Self { stream }
  }
}

impl Deref for StreamGuard {
  type Target = dyn CameraStream;

  fn deref(&self) -> &Self::Target {
    self.stream.as_ref()
  }
}

impl DerefMut for StreamGuard {
  fn deref_mut(&mut self) -> &mut Self::Target {
    self.stream.as_mut()
  }
}

impl Drop for StreamGuard {
  fn drop(&mut self) {
    debug!("停止摄像头视频流");
    self.stream.stop();
  }
}

/// 打开摄像头、采集一帧并释放设备（阻塞调用）
pub fn capture_single_frame(camera: &dyn Camera) -> Result<Frame, AcquireError> {
  let mut stream = StreamGuard::new(camera.open()?);
  let image = stream.capture()?;
  info!("摄像头采集完成: {}x{}", image.width(), image.height());
  Ok(Frame::new(image, FrameOrigin::Camera))
}

/// 在阻塞线程池中完成一次摄像头单帧采集
pub async fn from_camera(camera: Arc<dyn Camera>) -> Result<Frame, AcquireError> {
  tokio::task::spawn_blocking(move || capture_single_frame(camera.as_ref()))
    .await
    .map_err(|e| AcquireError::CaptureFailed(e.to_string()))?
}
