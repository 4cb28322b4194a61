// 该文件是 Kanjian （看见） 项目的一部分。
// src/controller.rs - 会话控制器（异步驱动状态机）
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

//! 控制器独占 [`Pipeline`]，在单个任务中依次处理用户命令与异步完成消息。
//! 模型加载、推理与图像获取在独立任务中运行，结果以消息形式回到控制器，
//! 因此状态只会在一个地方被修改。

use std::sync::Arc;

use thiserror::Error;
use tokio::{
  sync::{mpsc, oneshot, watch},
  task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
  frame::{DisplaySize, Frame},
  input::{AcquireError, ImageInput, UploadProgress},
  model::{DetectResult, InferenceService, ModelStatus, parse_payload},
  notification::Notification,
  output::{Overlay, OverlayRenderer},
  pipeline::{Effect, Event, Pipeline, PipelineState, RequestId, Transition},
};

const COMMAND_QUEUE_SIZE: usize = 32;

#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
  /// 显示宽度，`None` 时按图像原始尺寸显示
  pub display_width: Option<u32>,
  /// 启动时预加载模型
  pub prewarm: bool,
}

#[derive(Error, Debug)]
pub enum ControllerError {
  #[error("控制器已关闭")]
  Closed,
}

/// 对外可见的会话状态
#[derive(Debug, Clone)]
pub struct Snapshot {
  pub state: PipelineState,
  pub model: ModelStatus,
  pub frame: Option<Arc<Frame>>,
  pub results: Option<DetectResult>,
  pub overlay: Option<Arc<Overlay>>,
  pub display: Option<DisplaySize>,
  /// 已丢弃的过期推理结果数量
  pub stale_responses: u64,
}

impl Default for Snapshot {
  fn default() -> Self {
    Self {
      state: PipelineState::Idle,
      model: ModelStatus::Uninitialized,
      frame: None,
      results: None,
      overlay: None,
      display: None,
      stale_responses: 0,
    }
  }
}

type Reply = oneshot::Sender<PipelineState>;

enum Command {
  Acquire {
    input: ImageInput,
    progress: Option<UploadProgress>,
    reply: Reply,
  },
  Detect(Reply),
  Reset(Reply),
  Prewarm(Reply),
  ResizeDisplay {
    width: Option<u32>,
    reply: Reply,
  },
}

enum Completion<H> {
  Acquired {
    generation: u64,
    result: Result<Frame, AcquireError>,
    reply: Reply,
  },
  ModelLoadFinished(Result<H, String>),
  InferenceFinished {
    request: RequestId,
    result: Result<DetectResult, String>,
  },
}

/// 控制器句柄，可在多个任务间克隆
#[derive(Clone)]
pub struct ControllerHandle {
  commands: mpsc::Sender<Command>,
  snapshot: watch::Receiver<Snapshot>,
}

impl ControllerHandle {
  async fn request(
    &self,
    command: impl FnOnce(Reply) -> Command,
  ) -> Result<PipelineState, ControllerError> {
    let (reply, rx) = oneshot::channel();
    self
      .commands
      .send(command(reply))
      .await
      .map_err(|_| ControllerError::Closed)?;
    rx.await.map_err(|_| ControllerError::Closed)
  }

  /// 获取新图像，返回获取结果处理完后的状态
  pub async fn acquire(&self, input: ImageInput) -> Result<PipelineState, ControllerError> {
    self
      .request(|reply| Command::Acquire {
        input,
        progress: None,
        reply,
      })
      .await
  }

  pub async fn acquire_with_progress(
    &self,
    input: ImageInput,
    progress: UploadProgress,
  ) -> Result<PipelineState, ControllerError> {
    self
      .request(|reply| Command::Acquire {
        input,
        progress: Some(progress),
        reply,
      })
      .await
  }

  /// 请求检测，立即返回请求被接受后的状态，不等待推理完成
  pub async fn detect(&self) -> Result<PipelineState, ControllerError> {
    self.request(Command::Detect).await
  }

  pub async fn reset(&self) -> Result<PipelineState, ControllerError> {
    self.request(Command::Reset).await
  }

  pub async fn prewarm(&self) -> Result<PipelineState, ControllerError> {
    self.request(Command::Prewarm).await
  }

  pub async fn resize_display(&self, width: Option<u32>) -> Result<PipelineState, ControllerError> {
    self
      .request(|reply| Command::ResizeDisplay { width, reply })
      .await
  }

  pub fn snapshot(&self) -> Snapshot {
    self.snapshot.borrow().clone()
  }

  /// 等待满足条件的状态
  pub async fn wait_for(
    &self,
    predicate: impl FnMut(&Snapshot) -> bool,
  ) -> Result<Snapshot, ControllerError> {
    let mut rx = self.snapshot.clone();
    let snapshot = rx
      .wait_for(predicate)
      .await
      .map_err(|_| ControllerError::Closed)?;
    Ok(snapshot.clone())
  }

  /// 等待当前的加载与推理结束
  pub async fn settled(&self) -> Result<Snapshot, ControllerError> {
    self.wait_for(|snapshot| !snapshot.state.is_busy()).await
  }
}

struct Controller<S: InferenceService> {
  service: Arc<S>,
  pipeline: Pipeline<S::Handle>,
  renderer: OverlayRenderer,
  frame: Option<Arc<Frame>>,
  overlay: Option<Arc<Overlay>>,
  display_width: Option<u32>,
  acquisition: u64,
  stale_responses: u64,
  snapshot: watch::Sender<Snapshot>,
  notifications: mpsc::UnboundedSender<Notification>,
  completions: mpsc::UnboundedSender<Completion<S::Handle>>,
}

/// 启动控制器任务
pub fn spawn<S: InferenceService>(
  service: S,
  renderer: OverlayRenderer,
  config: ControllerConfig,
) -> (
  ControllerHandle,
  mpsc::UnboundedReceiver<Notification>,
  JoinHandle<()>,
) {
  let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
  let (completions_tx, completions_rx) = mpsc::unbounded_channel();
  let (notifications_tx, notifications_rx) = mpsc::unbounded_channel();
  let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());

  let mut controller = Controller {
    service: Arc::new(service),
    pipeline: Pipeline::new(),
    renderer,
    frame: None,
    overlay: None,
    display_width: config.display_width,
    acquisition: 0,
    stale_responses: 0,
    snapshot: snapshot_tx,
    notifications: notifications_tx,
    completions: completions_tx,
  };

  if config.prewarm {
    controller.dispatch(Event::PrewarmRequested);
    controller.publish();
  }

  let join = tokio::spawn(controller.run(commands_rx, completions_rx));
  let handle = ControllerHandle {
    commands: commands_tx,
    snapshot: snapshot_rx,
  };

  (handle, notifications_rx, join)
}

impl<S: InferenceService> Controller<S> {
  async fn run(
    mut self,
    mut commands: mpsc::Receiver<Command>,
    mut completions: mpsc::UnboundedReceiver<Completion<S::Handle>>,
  ) {
    info!("控制器已启动");
    loop {
      tokio::select! {
        biased;
        Some(completion) = completions.recv() => self.on_completion(completion),
        command = commands.recv() => match command {
          Some(command) => self.on_command(command),
          None => break,
        },
      }
      self.publish();
    }
    info!("控制器已退出");
  }

  fn on_command(&mut self, command: Command) {
    match command {
      Command::Acquire {
        input,
        progress,
        reply,
      } => {
        // 新的获取请求使尚未完成的旧请求失效
        self.acquisition += 1;
        let generation = self.acquisition;
        let completions = self.completions.clone();
        debug!("开始获取图像 (第 {} 次): {:?}", generation, input);
        tokio::spawn(async move {
          let result = input.acquire(progress.as_ref()).await;
          let _ = completions.send(Completion::Acquired {
            generation,
            result,
            reply,
          });
        });
      }
      Command::Detect(reply) => {
        self.dispatch(Event::DetectRequested);
        self.reply(reply);
      }
      Command::Reset(reply) => {
        self.acquisition += 1;
        self.frame = None;
        self.dispatch(Event::ImageCleared);
        self.reply(reply);
      }
      Command::Prewarm(reply) => {
        self.dispatch(Event::PrewarmRequested);
        self.reply(reply);
      }
      Command::ResizeDisplay { width, reply } => {
        self.display_width = width;
        self.dispatch(Event::DisplayResized);
        self.reply(reply);
      }
    }
  }

  fn on_completion(&mut self, completion: Completion<S::Handle>) {
    match completion {
      Completion::Acquired {
        generation,
        result,
        reply,
      } => {
        if generation != self.acquisition {
          debug!("丢弃已被取代的图像获取结果 (第 {} 次)", generation);
        } else {
          match result {
            Ok(frame) => {
              info!("图像已获取: {}x{}", frame.width(), frame.height());
              self.frame = Some(Arc::new(frame));
              self.dispatch(Event::ImageAcquired);
            }
            Err(err) => self.dispatch(Event::AcquisitionFailed(err)),
          }
        }
        self.reply(reply);
      }
      Completion::ModelLoadFinished(Ok(handle)) => {
        self.dispatch(Event::ModelLoaded(Arc::new(handle)));
      }
      Completion::ModelLoadFinished(Err(reason)) => {
        self.dispatch(Event::ModelLoadFailed(reason));
      }
      Completion::InferenceFinished {
        request,
        result: Ok(result),
      } => self.dispatch(Event::InferenceSucceeded { request, result }),
      Completion::InferenceFinished {
        request,
        result: Err(reason),
      } => self.dispatch(Event::InferenceFailed { request, reason }),
    }
  }

  fn dispatch(&mut self, event: Event<S::Handle>) {
    let Transition {
      effects,
      notifications,
      stale,
    } = self.pipeline.apply(event);

    if stale {
      self.stale_responses += 1;
    }

    for notification in notifications {
      if notification.is_error() {
        warn!("通知: {}", notification);
      } else {
        info!("通知: {}", notification);
      }
      let _ = self.notifications.send(notification);
    }

    for effect in effects {
      self.execute(effect);
    }
  }

  fn execute(&mut self, effect: Effect) {
    match effect {
      Effect::StartModelLoad => self.start_model_load(),
      Effect::RunInference(request) => self.run_inference(request),
      Effect::Render => self.render(),
      Effect::ClearOverlay => {
        self.overlay = None;
        self.renderer.clear();
      }
    }
  }

  fn start_model_load(&self) {
    let service = self.service.clone();
    let completions = self.completions.clone();
    tokio::spawn(async move {
      let result = service.load().await.map_err(|e| e.to_string());
      let _ = completions.send(Completion::ModelLoadFinished(result));
    });
  }

  fn run_inference(&self, request: RequestId) {
    let completions = self.completions.clone();
    let (Some(handle), Some(frame)) = (self.pipeline.model_handle(), self.frame.clone()) else {
      error!("推理请求 {} 缺少模型或图像", request);
      let _ = completions.send(Completion::InferenceFinished {
        request,
        result: Err("模型或图像不可用".to_string()),
      });
      return;
    };

    let service = self.service.clone();
    tokio::spawn(async move {
      let result = match service.detect(&handle, &frame).await {
        Ok(payload) => parse_payload(payload).map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
      };
      let _ = completions.send(Completion::InferenceFinished { request, result });
    });
  }

  fn display_size(&self, frame: &Frame) -> DisplaySize {
    match self.display_width {
      Some(width) => DisplaySize::fit_width(frame.natural_size(), width),
      None => frame.natural_size(),
    }
  }

  fn render(&mut self) {
    let (Some(frame), Some(results)) = (self.frame.clone(), self.pipeline.results().cloned())
    else {
      return;
    };
    let display = self.display_size(&frame);
    let overlay = self.renderer.render(&frame, &results, display);
    self.overlay = Some(Arc::new(overlay));
  }

  // 先发布快照，调用方收到回复时快照已是最新
  fn reply(&self, reply: Reply) {
    self.publish();
    let _ = reply.send(self.pipeline.state().clone());
  }

  fn publish(&self) {
    let display = self.frame.as_deref().map(|frame| self.display_size(frame));
    self.snapshot.send_replace(Snapshot {
      state: self.pipeline.state().clone(),
      model: self.pipeline.model_status(),
      frame: self.frame.clone(),
      results: self.pipeline.results().cloned(),
      overlay: self.overlay.clone(),
      display,
      stale_responses: self.stale_responses,
    });
  }
}
