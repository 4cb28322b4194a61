// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/upload.rs - 图像文件上传输入
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
  path::{Path, PathBuf},
  sync::Arc,
};

use image::ImageFormat;
use tokio::{io::AsyncReadExt, sync::watch};
use tracing::{debug, info, warn};

use crate::{
  frame::{Frame, FrameOrigin},
  input::AcquireError,
};

const READ_CHUNK_SIZE: usize = 64 * 1024;
const UNKNOWN_MEDIA_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone)]
enum UploadSource {
  Path(PathBuf),
  Bytes(Arc<[u8]>),
}

/// 待上传的文件，携带声明的媒体类型
#[derive(Debug, Clone)]
pub struct UploadFile {
  name: String,
  media_type: String,
  source: UploadSource,
}

impl UploadFile {
  /// 从本地路径创建，媒体类型按扩展名推断
  pub fn from_path(path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    let media_type = ImageFormat::from_path(&path)
      .map(|format| format.to_mime_type().to_string())
      .unwrap_or_else(|_| UNKNOWN_MEDIA_TYPE.to_string());
    let name = path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();

    Self {
      name,
      media_type,
      source: UploadSource::Path(path),
    }
  }

  pub fn from_bytes(name: &str, media_type: &str, bytes: impl Into<Arc<[u8]>>) -> Self {
    Self {
      name: name.to_string(),
      media_type: media_type.to_string(),
      source: UploadSource::Bytes(bytes.into()),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn media_type(&self) -> &str {
    &self.media_type
  }

  pub fn is_image(&self) -> bool {
    self.media_type.starts_with("image/")
  }
}

/// 读取进度（0 到 100，单调递增），仅用于界面反馈
#[derive(Debug)]
pub struct UploadProgress {
  tx: watch::Sender<u8>,
}

impl UploadProgress {
  pub fn new() -> (Self, watch::Receiver<u8>) {
    let (tx, rx) = watch::channel(0);
    (Self { tx }, rx)
  }

  pub fn report(&self, percent: u8) {
    let percent = percent.min(100);
    self.tx.send_if_modified(|current| {
      if percent > *current {
        *current = percent;
        true
      } else {
        false
      }
    });
  }

  pub fn current(&self) -> u8 {
    *self.tx.borrow()
  }
}

fn report(progress: Option<&UploadProgress>, percent: u8) {
  if let Some(progress) = progress {
    progress.report(percent);
  }
}

async fn read_with_progress(
  path: &Path,
  progress: Option<&UploadProgress>,
) -> Result<Vec<u8>, AcquireError> {
  let mut file = tokio::fs::File::open(path).await?;
  let total = file.metadata().await?.len();
  let mut data = Vec::with_capacity(total as usize);
  let mut chunk = vec![0u8; READ_CHUNK_SIZE];

  loop {
    let n = file.read(&mut chunk).await?;
    if n == 0 {
      break;
    }
    data.extend_from_slice(&chunk[..n]);
    // 解码完成前最多报告 99%
    if total > 0 {
      let percent = (data.len() as u64 * 99 / total).min(99) as u8;
      report(progress, percent);
    }
  }

  Ok(data)
}

/// 读取并解码上传的图像文件，仅接受 `image/*` 媒体类型
pub async fn from_upload(
  file: UploadFile,
  progress: Option<&UploadProgress>,
) -> Result<Frame, AcquireError> {
  if !file.is_image() {
    warn!("拒绝非图像文件: {} ({})", file.name, file.media_type);
    return Err(AcquireError::InvalidInputType(file.media_type));
  }

  info!("读取上传文件: {} ({})", file.name, file.media_type);
  report(progress, 0);

  let bytes: Arc<[u8]> = match file.source {
    UploadSource::Path(path) => read_with_progress(&path, progress).await?.into(),
    UploadSource::Bytes(bytes) => bytes,
  };
  debug!("文件读取完成，共 {} 字节", bytes.len());

  let image = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
    .await
    .map_err(|e| AcquireError::Io(std::io::Error::other(e)))??
    .to_rgb8();

  report(progress, 100);
  info!("图像解码完成: {}x{}", image.width(), image.height());

  Ok(Frame::new(image, FrameOrigin::Upload))
}
