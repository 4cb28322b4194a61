// 该文件是 Kanjian （看见） 项目的一部分。
// src/pipeline.rs - 采集-检测状态机
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

//! 纯状态转移函数：输入事件，输出待执行的副作用与用户通知。
//! 所有状态变化都经过 [`Pipeline::apply`]，异步执行由 `controller` 负责。

use std::{fmt, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
  input::AcquireError,
  model::{DetectResult, ModelSlot, ModelStatus},
  notification::Notification,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
  ModelLoadError(String),
  InferenceError(String),
}

impl fmt::Display for FailureReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FailureReason::ModelLoadError(reason) => write!(f, "模型加载失败: {}", reason),
      FailureReason::InferenceError(reason) => write!(f, "推理失败: {}", reason),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PipelineState {
  #[default]
  Idle,
  AwaitingImage,
  ModelLoading,
  Detecting,
  Detected,
  Failed(FailureReason),
}

impl PipelineState {
  /// 是否有操作正在进行（模型加载或推理）
  pub fn is_busy(&self) -> bool {
    matches!(self, PipelineState::ModelLoading | PipelineState::Detecting)
  }
}

/// 推理请求编号，用于识别过期的推理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl fmt::Display for RequestId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

pub enum Event<H> {
  /// 新图像已获取（替换旧图像）
  ImageAcquired,
  /// 图像获取失败
  AcquisitionFailed(AcquireError),
  /// 清除图像，回到初始状态
  ImageCleared,
  /// 用户请求检测
  DetectRequested,
  /// 预先加载模型
  PrewarmRequested,
  ModelLoaded(Arc<H>),
  ModelLoadFailed(String),
  InferenceSucceeded {
    request: RequestId,
    result: DetectResult,
  },
  InferenceFailed {
    request: RequestId,
    reason: String,
  },
  /// 显示尺寸变化，需要重新绘制
  DisplayResized,
}

impl<H> fmt::Debug for Event<H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Event::ImageAcquired => f.write_str("ImageAcquired"),
      Event::AcquisitionFailed(err) => write!(f, "AcquisitionFailed({})", err),
      Event::ImageCleared => f.write_str("ImageCleared"),
      Event::DetectRequested => f.write_str("DetectRequested"),
      Event::PrewarmRequested => f.write_str("PrewarmRequested"),
      Event::ModelLoaded(_) => f.write_str("ModelLoaded"),
      Event::ModelLoadFailed(reason) => write!(f, "ModelLoadFailed({})", reason),
      Event::InferenceSucceeded { request, result } => {
        write!(f, "InferenceSucceeded({}, {} items)", request, result.len())
      }
      Event::InferenceFailed { request, reason } => {
        write!(f, "InferenceFailed({}, {})", request, reason)
      }
      Event::DisplayResized => f.write_str("DisplayResized"),
    }
  }
}

/// 状态转移产生的副作用，由异步驱动执行
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
  StartModelLoad,
  RunInference(RequestId),
  Render,
  ClearOverlay,
}

#[derive(Debug, Default, PartialEq)]
pub struct Transition {
  pub effects: Vec<Effect>,
  pub notifications: Vec<Notification>,
  /// 本次事件是否为被丢弃的过期推理结果
  pub stale: bool,
}

impl Transition {
  fn effect(mut self, effect: Effect) -> Self {
    self.effects.push(effect);
    self
  }

  fn notify(mut self, notification: Notification) -> Self {
    self.notifications.push(notification);
    self
  }
}

/// 采集-检测状态机，每个会话一个
pub struct Pipeline<H> {
  state: PipelineState,
  model: ModelSlot<H>,
  results: Option<DetectResult>,
  has_image: bool,
  pending_detect: bool,
  in_flight: Option<RequestId>,
  next_request: u64,
}

impl<H> Default for Pipeline<H> {
  fn default() -> Self {
    Self {
      state: PipelineState::Idle,
      model: ModelSlot::default(),
      results: None,
      has_image: false,
      pending_detect: false,
      in_flight: None,
      next_request: 0,
    }
  }
}

impl<H> Pipeline<H> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn state(&self) -> &PipelineState {
    &self.state
  }

  pub fn results(&self) -> Option<&DetectResult> {
    self.results.as_ref()
  }

  pub fn model_status(&self) -> ModelStatus {
    self.model.status()
  }

  pub fn model_handle(&self) -> Option<Arc<H>> {
    self.model.handle()
  }

  pub fn in_flight(&self) -> Option<RequestId> {
    self.in_flight
  }

  fn set_state(&mut self, state: PipelineState) {
    if self.state != state {
      debug!("状态转移: {:?} -> {:?}", self.state, state);
      self.state = state;
    }
  }

  fn issue_request(&mut self) -> RequestId {
    self.next_request += 1;
    let request = RequestId(self.next_request);
    self.in_flight = Some(request);
    self.pending_detect = false;
    self.set_state(PipelineState::Detecting);
    request
  }

  /// 唯一的状态转移入口
  pub fn apply(&mut self, event: Event<H>) -> Transition {
    debug!("处理事件: {:?} (当前状态 {:?})", event, self.state);

    match event {
      Event::ImageAcquired => self.on_image_acquired(),
      Event::AcquisitionFailed(err) => {
        warn!("图像获取失败: {}", err);
        Transition::default().notify(err.notification())
      }
      Event::ImageCleared => self.on_image_cleared(),
      Event::DetectRequested => self.on_detect_requested(),
      Event::PrewarmRequested => self.on_prewarm(),
      Event::ModelLoaded(handle) => self.on_model_loaded(handle),
      Event::ModelLoadFailed(reason) => self.on_model_load_failed(reason),
      Event::InferenceSucceeded { request, result } => self.on_inference_succeeded(request, result),
      Event::InferenceFailed { request, reason } => self.on_inference_failed(request, reason),
      Event::DisplayResized => {
        if self.state == PipelineState::Detected {
          Transition::default().effect(Effect::Render)
        } else {
          Transition::default()
        }
      }
    }
  }

  fn on_image_acquired(&mut self) -> Transition {
    // 新图像使旧结果与进行中的推理全部失效，加载中的模型不受影响
    if let Some(request) = self.in_flight.take() {
      info!("新图像到达，推理请求 {} 的结果将被丢弃", request);
    }
    self.has_image = true;
    self.pending_detect = false;
    self.results = None;
    self.set_state(PipelineState::AwaitingImage);
    Transition::default().effect(Effect::ClearOverlay)
  }

  fn on_image_cleared(&mut self) -> Transition {
    self.in_flight = None;
    self.has_image = false;
    self.pending_detect = false;
    self.results = None;
    self.set_state(PipelineState::Idle);
    Transition::default().effect(Effect::ClearOverlay)
  }

  fn on_detect_requested(&mut self) -> Transition {
    match self.state {
      PipelineState::AwaitingImage | PipelineState::Detected => {}
      PipelineState::ModelLoading if !self.pending_detect => {
        // 预加载期间收到检测请求，加载完成后执行
        self.pending_detect = true;
        return Transition::default();
      }
      PipelineState::ModelLoading | PipelineState::Detecting => {
        debug!("已有检测请求在进行，忽略");
        return Transition::default();
      }
      PipelineState::Idle | PipelineState::Failed(_) => {
        debug!("当前状态 {:?} 不接受检测请求", self.state);
        return Transition::default();
      }
    }

    if !self.has_image {
      return Transition::default();
    }

    match self.model.status() {
      ModelStatus::Ready => {
        let request = self.issue_request();
        info!("发起推理请求 {}", request);
        Transition::default().effect(Effect::RunInference(request))
      }
      ModelStatus::Loading => {
        self.pending_detect = true;
        self.set_state(PipelineState::ModelLoading);
        Transition::default()
      }
      ModelStatus::Uninitialized | ModelStatus::Failed => {
        self.model.begin_load(true);
        self.pending_detect = true;
        self.set_state(PipelineState::ModelLoading);
        info!("模型未就绪，开始加载");
        Transition::default().effect(Effect::StartModelLoad)
      }
    }
  }

  fn on_prewarm(&mut self) -> Transition {
    if !self.model.begin_load(false) {
      return Transition::default();
    }
    info!("预加载模型");
    if self.state == PipelineState::AwaitingImage {
      self.set_state(PipelineState::ModelLoading);
    }
    Transition::default().effect(Effect::StartModelLoad)
  }

  fn on_model_loaded(&mut self, handle: Arc<H>) -> Transition {
    self.model.finish(Ok(handle));
    info!("模型加载完成");

    if self.state != PipelineState::ModelLoading {
      return Transition::default();
    }

    if self.pending_detect && self.has_image {
      // 检测加载完成时的当前图像
      let request = self.issue_request();
      info!("发起推理请求 {}", request);
      Transition::default().effect(Effect::RunInference(request))
    } else {
      self.pending_detect = false;
      self.set_state(PipelineState::AwaitingImage);
      Transition::default()
    }
  }

  fn on_model_load_failed(&mut self, reason: String) -> Transition {
    warn!("模型加载失败: {}", reason);
    self.model.finish(Err(reason.clone()));

    if self.state == PipelineState::ModelLoading {
      self.pending_detect = false;
      self.set_state(PipelineState::Failed(FailureReason::ModelLoadError(reason)));
    }

    Transition::default().notify(Notification::operational(
      "Model loading failed",
      "Could not load the object detection model",
    ))
  }

  fn is_current(&self, request: RequestId) -> bool {
    self.state == PipelineState::Detecting && self.in_flight == Some(request)
  }

  fn on_inference_succeeded(&mut self, request: RequestId, result: DetectResult) -> Transition {
    if !self.is_current(request) {
      info!("丢弃过期的推理结果 {}", request);
      return Transition {
        stale: true,
        ..Transition::default()
      };
    }

    self.in_flight = None;
    let empty = result.is_empty();
    info!("推理请求 {} 完成，检测到 {} 个物体", request, result.len());
    self.results = Some(result);
    self.set_state(PipelineState::Detected);

    let transition = Transition::default().effect(Effect::Render);
    if empty {
      transition.notify(Notification::info(
        "No objects detected",
        "Try another image or a different angle",
      ))
    } else {
      transition
    }
  }

  fn on_inference_failed(&mut self, request: RequestId, reason: String) -> Transition {
    if !self.is_current(request) {
      info!("丢弃过期的推理错误 {}: {}", request, reason);
      return Transition {
        stale: true,
        ..Transition::default()
      };
    }

    warn!("推理请求 {} 失败: {}", request, reason);
    self.in_flight = None;
    self.set_state(PipelineState::Failed(FailureReason::InferenceError(reason)));
    Transition::default().notify(Notification::operational(
      "Detection failed",
      "An error occurred during object detection",
    ))
  }
}
