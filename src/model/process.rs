// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/process.rs - 外部进程推理服务
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

use std::{io::Cursor, path::PathBuf, process::Stdio};

use image::ImageFormat;
use serde_json::Value;
use thiserror::Error;
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{debug, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, model::InferenceService};

#[derive(Error, Debug)]
pub enum ProcessInferenceError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("推理程序不可用: {0}")]
  ProgramUnavailable(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像编码错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("推理程序退出异常: {status}, stderr: {stderr}")]
  ExitFailure { status: String, stderr: String },
  #[error("推理程序输出不是 JSON: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 外部推理程序：图像以 PNG 写入子进程标准输入，子进程在标准输出打印 JSON 检测结果
///
/// URL 形如 `exec:///usr/local/bin/detector?arg=--threshold&arg=0.5`
pub struct ProcessInference {
  program: PathBuf,
  args: Vec<String>,
}

pub struct ProcessHandle {
  program: PathBuf,
}

impl FromUrlWithScheme for ProcessInference {
  const SCHEME: &'static str = "exec";
}

impl FromUrl for ProcessInference {
  type Error = ProcessInferenceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ProcessInferenceError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let args = url
      .query_pairs()
      .filter(|(k, _)| k == "arg")
      .map(|(_, v)| v.into_owned())
      .collect();

    Ok(ProcessInference {
      program: PathBuf::from(url.path()),
      args,
    })
  }
}

impl ProcessInference {
  pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
    Self {
      program: program.into(),
      args,
    }
  }
}

fn encode_png(frame: &Frame) -> Result<Vec<u8>, image::ImageError> {
  let mut buffer = Cursor::new(Vec::new());
  frame.image().write_to(&mut buffer, ImageFormat::Png)?;
  Ok(buffer.into_inner())
}

impl InferenceService for ProcessInference {
  type Handle = ProcessHandle;
  type Error = ProcessInferenceError;

  async fn load(&self) -> Result<Self::Handle, Self::Error> {
    info!("检查推理程序: {}", self.program.display());
    let metadata = tokio::fs::metadata(&self.program).await.map_err(|e| {
      ProcessInferenceError::ProgramUnavailable(format!("{}: {}", self.program.display(), e))
    })?;

    if !metadata.is_file() {
      return Err(ProcessInferenceError::ProgramUnavailable(format!(
        "{} 不是文件",
        self.program.display()
      )));
    }

    Ok(ProcessHandle {
      program: self.program.clone(),
    })
  }

  async fn detect(&self, handle: &Self::Handle, frame: &Frame) -> Result<Value, Self::Error> {
    let png = encode_png(frame)?;
    debug!(
      "启动推理程序 {}，输入 PNG {} 字节",
      handle.program.display(),
      png.len()
    );

    let mut child = Command::new(&handle.program)
      .args(&self.args)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()?;

    // 单独写入标准输入，避免子进程输出填满管道时互相等待
    let writer = child.stdin.take().map(|mut stdin| {
      tokio::spawn(async move {
        let written = stdin.write_all(&png).await;
        drop(stdin);
        written
      })
    });

    let output = child.wait_with_output().await?;
    if let Some(writer) = writer {
      match writer.await {
        Ok(Err(e)) => warn!("写入推理程序标准输入失败: {}", e),
        Err(e) => warn!("写入任务异常: {}", e),
        Ok(Ok(())) => {}
      }
    }

    if !output.status.success() {
      return Err(ProcessInferenceError::ExitFailure {
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }

    Ok(serde_json::from_slice(&output.stdout)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn from_url_collects_args() {
    let url = Url::parse("exec:///usr/bin/detector?arg=--fast&arg=0.5&other=x").unwrap();
    let service = ProcessInference::from_url(&url).unwrap();
    assert_eq!(service.program, PathBuf::from("/usr/bin/detector"));
    assert_eq!(service.args, vec!["--fast".to_string(), "0.5".to_string()]);
  }

  #[tokio::test]
  async fn missing_program_fails_to_load() {
    let service = ProcessInference::new("/nonexistent/kanjian-detector", Vec::new());
    let err = service.load().await.err().unwrap();
    assert!(matches!(err, ProcessInferenceError::ProgramUnavailable(_)));
  }

  #[cfg(unix)]
  fn shell(script: &str) -> ProcessInference {
    ProcessInference::new("/bin/sh", vec!["-c".to_string(), script.to_string()])
  }

  #[cfg(unix)]
  fn sample_frame() -> Frame {
    Frame::new(image::RgbImage::new(8, 6), crate::frame::FrameOrigin::Upload)
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn frame_goes_in_as_png_and_json_comes_out() {
    // 子进程读取 PNG 签名中的 "PNG" 三个字节并作为类别名返回
    let service = shell(
      r#"magic=$(head -c 4 | tail -c 3); cat >/dev/null; echo "[{\"class\": \"$magic\", \"score\": 0.5, \"bbox\": [1, 2, 3, 4]}]""#,
    );
    let handle = service.load().await.unwrap();
    let payload = service.detect(&handle, &sample_frame()).await.unwrap();

    let result = crate::model::parse_payload(payload).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.items[0].class_label, "PNG");
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn non_zero_exit_is_reported() {
    let service = shell("cat >/dev/null; echo 'model crashed' >&2; exit 3");
    let handle = service.load().await.unwrap();
    let err = service.detect(&handle, &sample_frame()).await.unwrap_err();

    match err {
      ProcessInferenceError::ExitFailure { status, stderr } => {
        assert!(status.contains('3'), "status: {}", status);
        assert_eq!(stderr, "model crashed");
      }
      other => panic!("unexpected error: {:?}", other),
    }
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn non_json_output_is_rejected() {
    let service = shell("cat >/dev/null; echo 'not json'");
    let handle = service.load().await.unwrap();
    let err = service.detect(&handle, &sample_frame()).await.unwrap_err();
    assert!(matches!(err, ProcessInferenceError::JsonError(_)));
  }
}
