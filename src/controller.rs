// 该文件是 Platecam （车牌相机） 项目的一部分。
// src/controller.rs - 推流控制器
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

//! # 推流控制器
//!
//! 状态机：`Idle`（未获取摄像头）→ `Ready`（已获取，未推流）→ `Streaming`。
//!
//! 控制器独占会话状态、覆盖层与视频源，所有修改都发生在运行 [`Controller::run`] 的线程上。
//! 定时周期、检测结果与外部控制都通过同一个事件队列驱动。

use std::{
  sync::{
    Arc,
    mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
  },
  time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};

use crate::{
  capture::{CaptureConfig, CaptureLoop, ControlEvent, LoopEvent, TickReport, apply_detection},
  detection::DetectClient,
  input::{CameraConstraints, CameraError, IDEAL_HEIGHT, IDEAL_WIDTH, MediaDevices, VideoSource},
  overlay::{Overlay, draw::Draw},
  session::{
    STATUS_CAMERA_NOT_INITIALIZED, STATUS_CAMERA_READY, STATUS_CAMERA_UNSUPPORTED,
    STATUS_STOPPED, STATUS_STREAMING, StreamSession,
  },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
  Idle,
  Ready,
  Streaming,
}

enum Step {
  Ticked(TickReport),
  Idle,
  Closed,
}

pub struct Controller {
  devices: Option<Box<dyn MediaDevices>>,
  video: Option<Box<dyn VideoSource>>,
  session: StreamSession,
  overlay: Overlay,
  capture: CaptureLoop,
  sender: Sender<LoopEvent>,
  events: Receiver<LoopEvent>,
  next_tick: Option<Instant>,
  display_size: Option<(u32, u32)>,
  resize_listener: bool,
  shutdown: bool,
}

impl Controller {
  /// `devices` 为 `None` 表示平台不支持摄像头
  pub fn new(
    devices: Option<Box<dyn MediaDevices>>,
    client: Arc<dyn DetectClient>,
    config: CaptureConfig,
    draw: Draw,
  ) -> Self {
    let (sender, events) = mpsc::channel();
    Self {
      devices,
      video: None,
      session: StreamSession::default(),
      overlay: Overlay::new(draw),
      capture: CaptureLoop::new(client, config, sender.clone()),
      sender,
      events,
      next_tick: None,
      display_size: None,
      resize_listener: false,
      shutdown: false,
    }
  }

  /// 事件队列的发送端，供信号处理与输入线程使用
  pub fn sender(&self) -> Sender<LoopEvent> {
    self.sender.clone()
  }

  pub fn state(&self) -> PageState {
    match (&self.video, self.session.streaming) {
      (None, _) => PageState::Idle,
      (Some(_), false) => PageState::Ready,
      (Some(_), true) => PageState::Streaming,
    }
  }

  pub fn session(&self) -> &StreamSession {
    &self.session
  }

  pub fn overlay(&self) -> &Overlay {
    &self.overlay
  }

  pub fn is_shutdown(&self) -> bool {
    self.shutdown
  }

  /// 显示尺寸覆盖，`None` 时使用视频尺寸
  pub fn set_display_size(&mut self, size: Option<(u32, u32)>) {
    self.display_size = size;
    self.sync_overlay_size();
  }

  /// 获取摄像头并准备覆盖层，之后开始接收尺寸变化
  pub fn setup(&mut self) -> Result<(), CameraError> {
    self.init_camera()?;
    self.raise_resolution();
    self.sync_overlay_size();
    self.resize_listener = true;
    Ok(())
  }

  fn init_camera(&mut self) -> Result<(), CameraError> {
    let Some(devices) = self.devices.as_ref() else {
      error!("{}", STATUS_CAMERA_UNSUPPORTED);
      self.session.set_status(STATUS_CAMERA_UNSUPPORTED);
      return Err(CameraError::Unsupported);
    };

    let acquired = devices.acquire(&CameraConstraints::strict()).or_else(|e| {
      warn!("后置摄像头获取失败: {}，改用宽松约束重试", e);
      devices.acquire(&CameraConstraints::relaxed())
    });

    match acquired {
      Ok(video) => {
        info!("摄像头已就绪: {:?}", video.video_size());
        self.video = Some(video);
        self.session.set_status(STATUS_CAMERA_READY);
        Ok(())
      }
      Err(e) => {
        error!("访问摄像头出错: {}", e);
        self.session.set_status(format!("访问摄像头出错: {}", e));
        Err(e)
      }
    }
  }

  /// 尝试把分辨率提升到设备上限（不超过理想值），失败时保持协商结果
  fn raise_resolution(&mut self) {
    let Some(video) = self.video.as_mut() else {
      return;
    };
    let Some(caps) = video.capabilities() else {
      debug!("设备未报告能力上限");
      return;
    };
    let (Some(max_w), Some(max_h)) = (caps.max_width, caps.max_height) else {
      return;
    };

    let target = (max_w.min(IDEAL_WIDTH), max_h.min(IDEAL_HEIGHT));
    if target.0 == 0 || target.1 == 0 || video.video_size() == Some(target) {
      return;
    }
    match video.apply_constraints(target.0, target.1) {
      Ok(()) => info!("摄像头分辨率提升到 {}x{}", target.0, target.1),
      Err(e) => debug!("无法提升分辨率，保持协商结果: {}", e),
    }
  }

  /// 让覆盖层与显示尺寸一致，尺寸变化时覆盖层被清空
  fn sync_overlay_size(&mut self) -> bool {
    let size = self
      .display_size
      .or_else(|| self.video.as_ref().and_then(|v| v.video_size()));
    match size {
      Some((w, h)) => self.overlay.sync_size(w, h),
      None => false,
    }
  }

  pub fn on_display_resize(&mut self, width: u32, height: u32) {
    if !self.resize_listener {
      debug!("尺寸监听未注册，忽略 {}x{}", width, height);
      return;
    }
    self.set_display_size(Some((width, height)));
  }

  /// 切换推流，无论方向都会重置检测统计
  pub fn toggle_streaming(&mut self) {
    self.session.reset_counters();
    if self.session.streaming {
      self.stop_streaming();
    } else {
      self.start_streaming();
    }
  }

  pub fn start_streaming(&mut self) {
    if self.video.is_none() {
      warn!("{}", STATUS_CAMERA_NOT_INITIALIZED);
      self.session.set_status(STATUS_CAMERA_NOT_INITIALIZED);
      return;
    }

    self.session.streaming = true;
    self.session.generation = self.session.generation.wrapping_add(1);
    self.session.frame_counter = 0;
    self.session.set_status(STATUS_STREAMING);
    self.next_tick = Some(Instant::now() + self.capture.config().interval);
    info!(
      "开始推流: 周期 {:?}, 每 {} 帧检测一次",
      self.capture.config().interval,
      self.capture.config().detect_every_nth
    );
  }

  pub fn stop_streaming(&mut self) {
    self.session.streaming = false;
    self.next_tick = None;
    self.session.set_status(STATUS_STOPPED);
    self.overlay.clear();
    info!("推流已停止");
  }

  /// 释放摄像头，回到 `Idle`
  pub fn stop_camera(&mut self) {
    if let Some(mut video) = self.video.take() {
      video.stop();
      info!("摄像头已关闭");
    }
  }

  /// 执行一个采集周期，没有视频源时什么也不做
  pub fn tick(&mut self) -> TickReport {
    self.sync_overlay_size();
    match self.video.as_mut() {
      Some(video) => self
        .capture
        .tick(&mut self.session, video.as_mut(), &self.overlay),
      None => TickReport::default(),
    }
  }

  pub fn handle_event(&mut self, event: LoopEvent) {
    match event {
      LoopEvent::Detected { generation, result } => {
        apply_detection(&mut self.session, &mut self.overlay, generation, result);
      }
      LoopEvent::Control(ControlEvent::Toggle) => self.toggle_streaming(),
      LoopEvent::Control(ControlEvent::Resize { width, height }) => {
        self.on_display_resize(width, height)
      }
      LoopEvent::Control(ControlEvent::Shutdown) => {
        info!("收到退出请求");
        self.shutdown = true;
      }
    }
  }

  /// 事件循环的一步：先处理队列里已有的事件，再执行到期的周期，
  /// 否则等待下一个周期或 `deadline`
  fn step(&mut self, deadline: Option<Instant>) -> Step {
    loop {
      match self.events.try_recv() {
        Ok(event) => {
          self.handle_event(event);
          if self.shutdown {
            return Step::Idle;
          }
        }
        Err(TryRecvError::Empty) => break,
        Err(TryRecvError::Disconnected) => return Step::Closed,
      }
    }

    let now = Instant::now();
    if let Some(next) = self.next_tick
      && next <= now
    {
      let report = self.tick();
      if self.session.streaming {
        // 周期耗时超过间隔时合并错过的周期
        let interval = self.capture.config().interval;
        self.next_tick = Some((next + interval).max(Instant::now()));
      }
      return Step::Ticked(report);
    }

    let wait_until = match (self.next_tick, deadline) {
      (Some(next), Some(deadline)) => Some(next.min(deadline)),
      (next, deadline) => next.or(deadline),
    };
    let received = match wait_until {
      Some(until) => match self.events.recv_timeout(until.saturating_duration_since(now)) {
        Ok(event) => Some(event),
        Err(RecvTimeoutError::Timeout) => None,
        Err(RecvTimeoutError::Disconnected) => return Step::Closed,
      },
      None => match self.events.recv() {
        Ok(event) => Some(event),
        Err(_) => return Step::Closed,
      },
    };
    if let Some(event) = received {
      self.handle_event(event);
    }
    Step::Idle
  }

  /// 处理到期的周期与队列中的事件，最多等待 `timeout`
  ///
  /// 返回本次调用中执行过的周期报告。
  pub fn process_pending(&mut self, timeout: Duration) -> Vec<TickReport> {
    let deadline = Instant::now() + timeout;
    let mut reports = Vec::new();

    while !self.shutdown && Instant::now() < deadline {
      match self.step(Some(deadline)) {
        Step::Ticked(report) => reports.push(report),
        Step::Idle => {}
        Step::Closed => break,
      }
    }

    reports
  }

  /// 运行事件循环直到收到退出请求
  pub fn run(&mut self) {
    info!("事件循环开始");
    while !self.shutdown {
      if let Step::Closed = self.step(None) {
        break;
      }
    }
    info!("事件循环结束");
  }

  /// 停止推流、释放摄像头并注销尺寸监听
  pub fn teardown(&mut self) {
    if self.session.streaming {
      self.stop_streaming();
    }
    self.stop_camera();
    self.resize_listener = false;
  }
}

impl Drop for Controller {
  fn drop(&mut self) {
    self.teardown();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    detection::{DetectError, DetectionResult, PlateBox, PlateDetection},
    input::{Capabilities, FacingMode, ReadyState},
  };
  use image::{Rgb, RgbImage};
  use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
  };

  struct FixedClient;

  impl DetectClient for FixedClient {
    fn send_frame(&self, _jpeg: Vec<u8>, stream_id: &str) -> Result<DetectionResult, DetectError> {
      Ok(DetectionResult {
        stream_id: stream_id.to_string(),
        image_w: 640.0,
        image_h: 360.0,
        focus_plate: Some("AB123".to_string()),
        plates: vec![PlateDetection {
          plate_text: "AB123".to_string(),
          detection_conf: 0.9,
          ocr_conf: 0.8,
          is_focus: true,
          bbox: PlateBox {
            nx1: 0.25,
            ny1: 0.5,
            nx2: 0.5,
            ny2: 0.75,
            ..PlateBox::default()
          },
        }],
        vehicles: vec![],
      })
    }

    fn send_preview_frame(&self, _jpeg: Vec<u8>, _stream_id: &str) -> Result<bool, DetectError> {
      Ok(true)
    }
  }

  struct FakeCamera {
    size: (u32, u32),
    max: (u32, u32),
    stopped: Arc<AtomicBool>,
  }

  impl VideoSource for FakeCamera {
    fn ready_state(&self) -> ReadyState {
      ReadyState::HaveEnoughData
    }

    fn video_size(&self) -> Option<(u32, u32)> {
      Some(self.size)
    }

    fn capabilities(&self) -> Option<Capabilities> {
      Some(Capabilities {
        max_width: Some(self.max.0),
        max_height: Some(self.max.1),
      })
    }

    fn apply_constraints(&mut self, width: u32, height: u32) -> Result<(), CameraError> {
      if width > self.max.0 || height > self.max.1 {
        return Err(CameraError::Constraints {
          width,
          height,
          reason: "超出能力".to_string(),
        });
      }
      self.size = (width, height);
      Ok(())
    }

    fn current_frame(&mut self) -> Option<RgbImage> {
      Some(RgbImage::from_pixel(self.size.0, self.size.1, Rgb([1, 2, 3])))
    }

    fn stop(&mut self) {
      self.stopped.store(true, Ordering::SeqCst);
    }
  }

  struct FakeDevices {
    strict_ok: bool,
    relaxed_ok: bool,
    attempts: Arc<Mutex<Vec<FacingMode>>>,
    stopped: Arc<AtomicBool>,
  }

  impl FakeDevices {
    fn new(strict_ok: bool, relaxed_ok: bool) -> Self {
      Self {
        strict_ok,
        relaxed_ok,
        attempts: Arc::default(),
        stopped: Arc::default(),
      }
    }
  }

  impl MediaDevices for FakeDevices {
    fn acquire(&self, constraints: &CameraConstraints) -> Result<Box<dyn VideoSource>, CameraError> {
      if let Ok(mut attempts) = self.attempts.lock() {
        attempts.push(constraints.facing);
      }
      let ok = match constraints.facing {
        FacingMode::Exact(_) => self.strict_ok,
        FacingMode::Ideal(_) => self.relaxed_ok,
      };
      if !ok {
        return Err(CameraError::NotFound("rear".to_string()));
      }
      Ok(Box::new(FakeCamera {
        size: (1280, 720),
        max: (3840, 2160),
        stopped: Arc::clone(&self.stopped),
      }))
    }
  }

  fn controller(devices: Option<FakeDevices>) -> Controller {
    let config = CaptureConfig {
      interval: Duration::from_millis(20),
      ..CaptureConfig::default()
    };
    Controller::new(
      devices.map(|d| Box::new(d) as Box<dyn MediaDevices>),
      Arc::new(FixedClient),
      config,
      Draw::default(),
    )
  }

  #[test]
  fn missing_camera_api_stays_idle() {
    let mut ctl = controller(None);
    assert!(matches!(ctl.setup(), Err(CameraError::Unsupported)));
    assert_eq!(ctl.state(), PageState::Idle);
    assert_eq!(ctl.session().status, STATUS_CAMERA_UNSUPPORTED);

    ctl.start_streaming();
    assert_eq!(ctl.state(), PageState::Idle);
    assert_eq!(ctl.session().status, STATUS_CAMERA_NOT_INITIALIZED);
  }

  #[test]
  fn strict_failure_falls_back_to_relaxed() {
    let devices = FakeDevices::new(false, true);
    let attempts = Arc::clone(&devices.attempts);
    let mut ctl = controller(Some(devices));
    assert!(ctl.setup().is_ok());
    assert_eq!(ctl.state(), PageState::Ready);
    assert_eq!(ctl.session().status, STATUS_CAMERA_READY);

    let attempts = attempts.lock().unwrap().clone();
    assert_eq!(attempts.len(), 2);
    assert!(matches!(attempts[0], FacingMode::Exact(_)));
    assert!(matches!(attempts[1], FacingMode::Ideal(_)));
    // 能力上限 4K，截到 1920x1080
    assert_eq!(ctl.overlay().size(), (1920, 1080));
  }

  #[test]
  fn both_constraints_failing_reports_error() {
    let mut ctl = controller(Some(FakeDevices::new(false, false)));
    assert!(ctl.setup().is_err());
    assert_eq!(ctl.state(), PageState::Idle);
    assert!(ctl.session().status.starts_with("访问摄像头出错: "));
  }

  #[test]
  fn toggle_resets_counters_both_ways() {
    let mut ctl = controller(Some(FakeDevices::new(true, true)));
    ctl.setup().unwrap();

    ctl.session.last_focus_plate = Some("OLD".to_string());
    ctl.session.last_detection_count = Some(4);
    ctl.toggle_streaming();
    assert_eq!(ctl.state(), PageState::Streaming);
    assert_eq!(ctl.session().last_focus_plate, None);
    assert_eq!(ctl.session().last_detection_count, Some(0));

    ctl.session.last_focus_plate = Some("NEW".to_string());
    ctl.session.last_detection_count = Some(2);
    ctl.toggle_streaming();
    assert_eq!(ctl.state(), PageState::Ready);
    assert_eq!(ctl.session().last_focus_plate, None);
    assert_eq!(ctl.session().last_detection_count, Some(0));
    assert_eq!(ctl.session().status, STATUS_STOPPED);
  }

  #[test]
  fn detection_is_drawn_then_cleared_on_stop() {
    let mut ctl = controller(Some(FakeDevices::new(true, true)));
    ctl.setup().unwrap();
    ctl.set_display_size(Some((640, 360)));
    ctl.start_streaming();

    let mut drawn = false;
    for _ in 0..20 {
      ctl.process_pending(Duration::from_millis(50));
      if ctl.overlay().last_result().is_some() {
        drawn = true;
        break;
      }
    }
    assert!(drawn);
    assert!(!ctl.overlay().is_blank());
    assert_eq!(ctl.session().last_focus_plate.as_deref(), Some("AB123"));

    ctl.stop_streaming();
    assert!(ctl.overlay().is_blank());
    assert!(ctl.process_pending(Duration::from_millis(60)).is_empty());
  }

  #[test]
  fn resize_only_after_setup() {
    let mut ctl = controller(Some(FakeDevices::new(true, true)));
    ctl.on_display_resize(300, 200);
    assert_eq!(ctl.overlay().size(), (0, 0));

    ctl.setup().unwrap();
    ctl.handle_event(LoopEvent::Control(ControlEvent::Resize {
      width: 300,
      height: 200,
    }));
    assert_eq!(ctl.overlay().size(), (300, 200));
  }

  #[test]
  fn teardown_releases_camera() {
    let devices = FakeDevices::new(true, true);
    let stopped = Arc::clone(&devices.stopped);
    let mut ctl = controller(Some(devices));
    ctl.setup().unwrap();
    ctl.start_streaming();

    ctl.teardown();
    assert_eq!(ctl.state(), PageState::Idle);
    assert!(stopped.load(Ordering::SeqCst));
    assert!(ctl.process_pending(Duration::from_millis(40)).is_empty());

    ctl.on_display_resize(10, 10);
    assert_ne!(ctl.overlay().size(), (10, 10));
  }

  #[test]
  fn shutdown_event_ends_processing() {
    let mut ctl = controller(Some(FakeDevices::new(true, true)));
    ctl.setup().unwrap();
    ctl
      .sender()
      .send(LoopEvent::Control(ControlEvent::Shutdown))
      .unwrap();
    ctl.start_streaming();
    ctl.process_pending(Duration::from_millis(100));
    assert!(ctl.is_shutdown());
  }

  /// 每取一帧都比采集周期慢
  struct SlowCamera;

  impl VideoSource for SlowCamera {
    fn ready_state(&self) -> ReadyState {
      ReadyState::HaveEnoughData
    }

    fn video_size(&self) -> Option<(u32, u32)> {
      Some((640, 360))
    }

    fn capabilities(&self) -> Option<Capabilities> {
      None
    }

    fn apply_constraints(&mut self, width: u32, height: u32) -> Result<(), CameraError> {
      Err(CameraError::Constraints {
        width,
        height,
        reason: "fixed".to_string(),
      })
    }

    fn current_frame(&mut self) -> Option<RgbImage> {
      std::thread::sleep(Duration::from_millis(10));
      Some(RgbImage::from_pixel(640, 360, Rgb([7, 7, 7])))
    }

    fn stop(&mut self) {}
  }

  struct SlowDevices;

  impl MediaDevices for SlowDevices {
    fn acquire(&self, _constraints: &CameraConstraints) -> Result<Box<dyn VideoSource>, CameraError> {
      Ok(Box::new(SlowCamera))
    }
  }

  fn slow_controller() -> Controller {
    let config = CaptureConfig {
      interval: Duration::from_millis(1),
      ..CaptureConfig::default()
    };
    let mut ctl = Controller::new(
      Some(Box::new(SlowDevices)),
      Arc::new(FixedClient),
      config,
      Draw::default(),
    );
    ctl.setup().unwrap();
    ctl.start_streaming();
    ctl
  }

  #[test]
  fn slow_ticks_still_handle_shutdown() {
    let mut ctl = slow_controller();
    let sender = ctl.sender();
    let signal = std::thread::spawn(move || {
      std::thread::sleep(Duration::from_millis(100));
      sender.send(LoopEvent::Control(ControlEvent::Shutdown))
    });

    let started = Instant::now();
    ctl.process_pending(Duration::from_secs(5));
    assert!(ctl.is_shutdown());
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(signal.join().unwrap().is_ok());
  }

  #[test]
  fn slow_ticks_respect_deadline_and_apply_results() {
    let mut ctl = slow_controller();

    let mut applied = false;
    for _ in 0..20 {
      let started = Instant::now();
      let reports = ctl.process_pending(Duration::from_millis(100));
      assert!(started.elapsed() < Duration::from_secs(3));
      assert!(!reports.is_empty());
      if ctl.session().last_focus_plate.is_some() {
        applied = true;
        break;
      }
    }
    assert!(applied);
    assert_eq!(ctl.session().last_detection_count, Some(1));
  }
}
