// 该文件是 Kanjian （看见） 项目的一部分。
// tests/controller.rs - 控制器集成测试
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

use std::sync::{
  Arc,
  atomic::{AtomicUsize, Ordering},
};

use image::{ImageFormat, RgbImage};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};

use kanjian::{
  controller::{self, ControllerConfig, ControllerHandle},
  frame::Frame,
  input::{AcquireError, Camera, CameraStream, ImageInput, UploadFile},
  model::{InferenceService, ModelStatus},
  notification::{Notification, NotificationKind},
  output::OverlayRenderer,
  pipeline::{FailureReason, PipelineState},
};

#[derive(Debug, thiserror::Error)]
#[error("stub: {0}")]
struct StubError(String);

type Answer = oneshot::Sender<Result<Value, StubError>>;

/// 推理请求由测试逐个应答
struct GatedService {
  loads: Arc<AtomicUsize>,
  detects: Arc<AtomicUsize>,
  fail_load: bool,
  requests: mpsc::UnboundedSender<Answer>,
}

impl InferenceService for GatedService {
  type Handle = ();
  type Error = StubError;

  async fn load(&self) -> Result<(), StubError> {
    self.loads.fetch_add(1, Ordering::SeqCst);
    if self.fail_load {
      Err(StubError("weights missing".to_string()))
    } else {
      Ok(())
    }
  }

  async fn detect(&self, _handle: &(), _frame: &Frame) -> Result<Value, StubError> {
    self.detects.fetch_add(1, Ordering::SeqCst);
    let (tx, rx) = oneshot::channel();
    self
      .requests
      .send(tx)
      .map_err(|_| StubError("test dropped".to_string()))?;
    rx.await
      .map_err(|_| StubError("answer dropped".to_string()))?
  }
}

struct Session {
  handle: ControllerHandle,
  notifications: mpsc::UnboundedReceiver<Notification>,
  requests: mpsc::UnboundedReceiver<Answer>,
  loads: Arc<AtomicUsize>,
  detects: Arc<AtomicUsize>,
}

impl Session {
  fn start(fail_load: bool, config: ControllerConfig) -> Self {
    let (requests_tx, requests) = mpsc::unbounded_channel();
    let loads = Arc::new(AtomicUsize::new(0));
    let detects = Arc::new(AtomicUsize::new(0));
    let service = GatedService {
      loads: loads.clone(),
      detects: detects.clone(),
      fail_load,
      requests: requests_tx,
    };
    let (handle, notifications, _join) =
      controller::spawn(service, OverlayRenderer::default(), config);
    Self {
      handle,
      notifications,
      requests,
      loads,
      detects,
    }
  }

  fn drain(&mut self) -> Vec<Notification> {
    let mut drained = Vec::new();
    while let Ok(notification) = self.notifications.try_recv() {
      drained.push(notification);
    }
    drained
  }

  async fn next_request(&mut self) -> Answer {
    self.requests.recv().await.unwrap()
  }
}

fn png_upload(width: u32, height: u32) -> ImageInput {
  let mut buffer = std::io::Cursor::new(Vec::new());
  RgbImage::new(width, height)
    .write_to(&mut buffer, ImageFormat::Png)
    .unwrap();
  ImageInput::Upload(UploadFile::from_bytes(
    "photo.png",
    "image/png",
    buffer.into_inner(),
  ))
}

fn payload(scores: &[f64]) -> Value {
  Value::Array(
    scores
      .iter()
      .enumerate()
      .map(|(i, score)| {
        json!({
          "class": "person",
          "score": score,
          "bbox": [10.0 + 60.0 * i as f64, 30.0, 40.0, 40.0]
        })
      })
      .collect(),
  )
}

#[tokio::test]
async fn detect_is_single_flight() {
  let mut session = Session::start(false, ControllerConfig::default());

  let state = session.handle.acquire(png_upload(320, 120)).await.unwrap();
  assert_eq!(state, PipelineState::AwaitingImage);

  let state = session.handle.detect().await.unwrap();
  assert_eq!(state, PipelineState::ModelLoading);

  let answer = session.next_request().await;
  assert_eq!(session.handle.snapshot().state, PipelineState::Detecting);
  assert_eq!(
    session.handle.detect().await.unwrap(),
    PipelineState::Detecting
  );

  answer.send(Ok(payload(&[0.95, 0.80, 0.41]))).unwrap();
  let snapshot = session.handle.settled().await.unwrap();

  assert_eq!(snapshot.state, PipelineState::Detected);
  assert_eq!(session.detects.load(Ordering::SeqCst), 1);
  assert_eq!(session.loads.load(Ordering::SeqCst), 1);
  assert_eq!(snapshot.results.unwrap().len(), 3);

  let overlay = snapshot.overlay.unwrap();
  assert_eq!(overlay.annotations.len(), 3);
  let percents: Vec<_> = overlay
    .summary
    .iter()
    .map(|entry| entry.confidence_percent)
    .collect();
  assert_eq!(percents, vec![95, 80, 41]);
  assert!(session.drain().is_empty());
}

#[tokio::test]
async fn response_for_replaced_image_is_discarded() {
  let mut session = Session::start(false, ControllerConfig::default());

  session.handle.acquire(png_upload(64, 64)).await.unwrap();
  session.handle.detect().await.unwrap();
  let stale = session.next_request().await;

  let state = session.handle.acquire(png_upload(32, 32)).await.unwrap();
  assert_eq!(state, PipelineState::AwaitingImage);

  stale.send(Ok(payload(&[0.9]))).unwrap();
  let snapshot = session
    .handle
    .wait_for(|snapshot| snapshot.stale_responses == 1)
    .await
    .unwrap();
  assert_eq!(snapshot.state, PipelineState::AwaitingImage);
  assert!(snapshot.results.is_none());
  assert!(snapshot.overlay.is_none());
  assert_eq!(snapshot.frame.unwrap().width(), 32);

  session.handle.detect().await.unwrap();
  session.next_request().await.send(Ok(json!([]))).unwrap();
  let snapshot = session.handle.settled().await.unwrap();
  assert_eq!(snapshot.state, PipelineState::Detected);
  assert!(snapshot.results.unwrap().is_empty());

  let notifications = session.drain();
  assert_eq!(notifications.len(), 1);
  assert_eq!(notifications[0].kind, NotificationKind::Info);
  assert_eq!(notifications[0].title, "No objects detected");
}

#[tokio::test]
async fn model_load_failure_never_runs_inference() {
  let mut session = Session::start(true, ControllerConfig::default());

  session.handle.acquire(png_upload(16, 16)).await.unwrap();
  session.handle.detect().await.unwrap();
  let snapshot = session.handle.settled().await.unwrap();

  assert!(matches!(
    snapshot.state,
    PipelineState::Failed(FailureReason::ModelLoadError(_))
  ));
  assert_eq!(snapshot.model, ModelStatus::Failed);
  assert_eq!(session.detects.load(Ordering::SeqCst), 0);

  let notifications = session.drain();
  assert_eq!(notifications.len(), 1);
  assert_eq!(notifications[0].title, "Model loading failed");

  // 失败后可以重新选择图像并再次尝试
  let state = session.handle.acquire(png_upload(16, 16)).await.unwrap();
  assert_eq!(state, PipelineState::AwaitingImage);
  session.handle.detect().await.unwrap();
  session.handle.settled().await.unwrap();
  assert_eq!(session.loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn inference_error_is_reported() {
  let mut session = Session::start(false, ControllerConfig::default());

  session.handle.acquire(png_upload(16, 16)).await.unwrap();
  session.handle.detect().await.unwrap();
  session
    .next_request()
    .await
    .send(Err(StubError("device lost".to_string())))
    .unwrap();

  let snapshot = session.handle.settled().await.unwrap();
  assert!(matches!(
    snapshot.state,
    PipelineState::Failed(FailureReason::InferenceError(_))
  ));
  let notifications = session.drain();
  assert_eq!(notifications.len(), 1);
  assert_eq!(notifications[0].title, "Detection failed");
}

#[tokio::test]
async fn malformed_payload_is_an_inference_error() {
  let mut session = Session::start(false, ControllerConfig::default());

  session.handle.acquire(png_upload(16, 16)).await.unwrap();
  session.handle.detect().await.unwrap();
  session
    .next_request()
    .await
    .send(Ok(json!({"boxes": []})))
    .unwrap();

  let snapshot = session.handle.settled().await.unwrap();
  assert!(matches!(
    snapshot.state,
    PipelineState::Failed(FailureReason::InferenceError(_))
  ));
}

#[tokio::test]
async fn non_image_upload_is_rejected() {
  let mut session = Session::start(false, ControllerConfig::default());

  let input = ImageInput::Upload(UploadFile::from_bytes(
    "notes.txt",
    "text/plain",
    b"hello".to_vec(),
  ));
  let state = session.handle.acquire(input).await.unwrap();

  assert_eq!(state, PipelineState::Idle);
  assert!(session.handle.snapshot().frame.is_none());
  let notifications = session.drain();
  assert_eq!(notifications.len(), 1);
  assert_eq!(notifications[0].kind, NotificationKind::Validation);
  assert_eq!(notifications[0].title, "Invalid file type");
}

#[tokio::test]
async fn new_image_clears_previous_results() {
  let mut session = Session::start(false, ControllerConfig::default());

  session.handle.acquire(png_upload(64, 64)).await.unwrap();
  session.handle.detect().await.unwrap();
  session
    .next_request()
    .await
    .send(Ok(payload(&[0.7])))
    .unwrap();
  assert_eq!(
    session.handle.settled().await.unwrap().state,
    PipelineState::Detected
  );

  session.handle.acquire(png_upload(48, 48)).await.unwrap();
  let snapshot = session.handle.snapshot();
  assert_eq!(snapshot.state, PipelineState::AwaitingImage);
  assert!(snapshot.results.is_none());
  assert!(snapshot.overlay.is_none());

  let state = session.handle.reset().await.unwrap();
  assert_eq!(state, PipelineState::Idle);
  assert!(session.handle.snapshot().frame.is_none());
}

#[tokio::test]
async fn prewarm_loads_model_before_detect() {
  let mut session = Session::start(
    false,
    ControllerConfig {
      display_width: None,
      prewarm: true,
    },
  );

  session
    .handle
    .wait_for(|snapshot| snapshot.model == ModelStatus::Ready)
    .await
    .unwrap();
  assert_eq!(session.handle.snapshot().state, PipelineState::Idle);

  session.handle.acquire(png_upload(16, 16)).await.unwrap();
  let state = session.handle.detect().await.unwrap();
  assert_eq!(state, PipelineState::Detecting);
  session.next_request().await.send(Ok(json!([]))).unwrap();
  session.handle.settled().await.unwrap();
  assert_eq!(session.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn overlay_follows_display_width() {
  let mut session = Session::start(
    false,
    ControllerConfig {
      display_width: Some(160),
      prewarm: false,
    },
  );

  session.handle.acquire(png_upload(320, 120)).await.unwrap();
  session.handle.detect().await.unwrap();
  session
    .next_request()
    .await
    .send(Ok(payload(&[0.5])))
    .unwrap();
  let snapshot = session.handle.settled().await.unwrap();
  let overlay = snapshot.overlay.unwrap();
  assert_eq!(overlay.surface.dimensions(), (160, 60));
  assert_eq!(overlay.annotations[0].bbox.left(), 5);

  session.handle.resize_display(None).await.unwrap();
  let overlay = session.handle.snapshot().overlay.unwrap();
  assert_eq!(overlay.surface.dimensions(), (320, 120));
  assert_eq!(overlay.annotations[0].bbox.left(), 10);
}

struct DeniedCamera;

impl Camera for DeniedCamera {
  fn open(&self) -> Result<Box<dyn CameraStream>, AcquireError> {
    Err(AcquireError::CameraDenied)
  }
}

#[tokio::test]
async fn camera_denied_keeps_current_image() {
  let mut session = Session::start(false, ControllerConfig::default());

  session.handle.acquire(png_upload(16, 16)).await.unwrap();
  let state = session
    .handle
    .acquire(ImageInput::Camera(Arc::new(DeniedCamera)))
    .await
    .unwrap();

  assert_eq!(state, PipelineState::AwaitingImage);
  assert_eq!(session.handle.snapshot().frame.unwrap().width(), 16);
  let notifications = session.drain();
  assert_eq!(notifications.len(), 1);
  assert_eq!(notifications[0].title, "Camera error");
}

#[tokio::test]
async fn off_image_boxes_do_not_end_session() {
  let mut session = Session::start(false, ControllerConfig::default());

  session.handle.acquire(png_upload(64, 48)).await.unwrap();
  session.handle.detect().await.unwrap();
  session
    .next_request()
    .await
    .send(Ok(json!([
      {"class": "far", "score": 0.9, "bbox": [1e10, 10.0, 40.0, 40.0]},
      {"class": "above", "score": 0.8, "bbox": [10.0, -1e10, 40.0, 40.0]},
      {"class": "edge", "score": 0.7, "bbox": [50.0, 30.0, 40.0, 40.0]}
    ])))
    .unwrap();

  let snapshot = session.handle.settled().await.unwrap();
  assert_eq!(snapshot.state, PipelineState::Detected);
  assert_eq!(snapshot.results.unwrap().len(), 3);
  let overlay = snapshot.overlay.unwrap();
  assert_eq!(overlay.summary.len(), 3);
  assert_eq!(overlay.annotations.len(), 1);
  assert_eq!(overlay.annotations[0].text, "edge 70%");
  assert_eq!(overlay.annotations[0].bbox.right(), 63);

  // 会话仍可继续使用
  assert_eq!(session.handle.reset().await.unwrap(), PipelineState::Idle);
}

#[tokio::test]
async fn prewarm_on_request_keeps_state() {
  let session = Session::start(false, ControllerConfig::default());

  assert_eq!(session.handle.prewarm().await.unwrap(), PipelineState::Idle);
  session
    .handle
    .wait_for(|snapshot| snapshot.model == ModelStatus::Ready)
    .await
    .unwrap();
  assert_eq!(session.handle.prewarm().await.unwrap(), PipelineState::Idle);
  assert_eq!(session.loads.load(Ordering::SeqCst), 1);
}
