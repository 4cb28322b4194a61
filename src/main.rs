// 该文件是 Kanjian （看见） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kanjian::{
  FromUrl, FromUrlWithScheme,
  controller::{self, ControllerConfig},
  input::{ImageInput, UploadProgress},
  model::{InferenceService, ProcessInference, ReplayInference},
  output::{LabelFont, OutputWrapper, OverlayRenderer, Render},
  pipeline::PipelineState,
};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();

  info!("推理服务: {}", args.model);
  info!("图像来源: {}", args.input);
  if let Some(output) = &args.output {
    info!("输出路径: {}", output);
  }

  match args.model.scheme() {
    ReplayInference::SCHEME => run_session(ReplayInference::from_url(&args.model)?, &args).await,
    ProcessInference::SCHEME => run_session(ProcessInference::from_url(&args.model)?, &args).await,
    other => bail!("不支持的推理服务: {}", other),
  }
}

async fn run_session<S: InferenceService>(service: S, args: &args::Args) -> Result<()> {
  let input = ImageInput::from_url(&args.input)
    .with_context(|| format!("无法识别的图像来源: {}", args.input))?;
  let output = args
    .output
    .as_ref()
    .map(OutputWrapper::from_url)
    .transpose()
    .context("无法创建输出")?;

  let renderer = match &args.font {
    Some(path) => OverlayRenderer::with_font(
      LabelFont::from_path(path)
        .with_context(|| format!("无法加载字体: {}", path.display()))?,
    ),
    None => {
      warn!("未指定字体，标签只绘制背景");
      OverlayRenderer::default()
    }
  };

  let config = ControllerConfig {
    display_width: args.display_width,
    prewarm: !args.no_prewarm,
  };
  let (handle, mut notifications, join) = controller::spawn(service, renderer, config);

  let notifier = tokio::spawn(async move {
    while let Some(notification) = notifications.recv().await {
      if notification.is_error() {
        error!("[{}] {}", notification.title, notification.description);
      } else {
        info!("[{}] {}", notification.title, notification.description);
      }
    }
  });

  let (progress, mut progress_rx) = UploadProgress::new();
  tokio::spawn(async move {
    while progress_rx.changed().await.is_ok() {
      let percent = *progress_rx.borrow_and_update();
      info!("读取进度: {}%", percent);
    }
  });

  let now = std::time::Instant::now();
  let state = handle.acquire_with_progress(input, progress).await?;
  if state != PipelineState::AwaitingImage {
    drop(handle);
    join.await?;
    notifier.await?;
    bail!("图像获取失败");
  }

  handle.detect().await?;
  let snapshot = handle.settled().await?;
  info!("检测结束，耗时: {:.2?}", now.elapsed());

  match &snapshot.state {
    PipelineState::Detected => {
      if let Some(overlay) = &snapshot.overlay {
        for entry in &overlay.summary {
          println!("{}", entry);
        }
        if let (Some(output), Some(frame)) = (&output, &snapshot.frame) {
          output
            .render_result(frame.as_ref(), overlay.as_ref())
            .context("保存结果失败")?;
        }
      }
    }
    PipelineState::Failed(reason) => warn!("检测失败: {}", reason),
    other => warn!("意外的结束状态: {:?}", other),
  }

  drop(handle);
  join.await?;
  notifier.await?;

  Ok(())
}
