// 该文件是 Platecam （车牌相机） 项目的一部分。
// tests/stream_controller.rs - 推流控制器集成测试
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
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
    mpsc::{self, Receiver, Sender},
  },
  time::Duration,
};

use image::{Rgb, RgbImage};

use platecam::{
  capture::CaptureConfig,
  controller::{Controller, PageState},
  detection::{DetectClient, DetectError, DetectionResult, PlateBox, PlateDetection},
  input::{CameraConstraints, CameraError, Capabilities, MediaDevices, ReadyState, VideoSource},
  overlay::draw::Draw,
};

/// 检测请求阻塞在闸门上，直到测试放行
struct GatedClient {
  gate: Mutex<Receiver<()>>,
  detect_calls: AtomicUsize,
  preview_calls: AtomicUsize,
}

impl GatedClient {
  fn new() -> (Arc<Self>, Sender<()>) {
    let (tx, rx) = mpsc::channel();
    let client = Arc::new(Self {
      gate: Mutex::new(rx),
      detect_calls: AtomicUsize::new(0),
      preview_calls: AtomicUsize::new(0),
    });
    (client, tx)
  }
}

impl DetectClient for GatedClient {
  fn send_frame(&self, _jpeg: Vec<u8>, stream_id: &str) -> Result<DetectionResult, DetectError> {
    self.detect_calls.fetch_add(1, Ordering::SeqCst);
    if let Ok(gate) = self.gate.lock() {
      let _ = gate.recv_timeout(Duration::from_secs(10));
    }
    Ok(DetectionResult {
      stream_id: stream_id.to_string(),
      image_w: 640.0,
      image_h: 360.0,
      focus_plate: Some("GATE42".to_string()),
      plates: vec![PlateDetection {
        plate_text: "GATE42".to_string(),
        detection_conf: 1.0,
        ocr_conf: 0.7,
        is_focus: true,
        bbox: PlateBox {
          x1: 100.0,
          y1: 200.0,
          x2: 220.0,
          y2: 240.0,
          ..PlateBox::default()
        },
      }],
      vehicles: vec![],
    })
  }

  fn send_preview_frame(&self, _jpeg: Vec<u8>, _stream_id: &str) -> Result<bool, DetectError> {
    self.preview_calls.fetch_add(1, Ordering::SeqCst);
    Ok(true)
  }
}

struct StaticCamera;

impl VideoSource for StaticCamera {
  fn ready_state(&self) -> ReadyState {
    ReadyState::HaveEnoughData
  }

  fn video_size(&self) -> Option<(u32, u32)> {
    Some((1280, 720))
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
    Some(RgbImage::from_pixel(1280, 720, Rgb([90, 90, 90])))
  }

  fn stop(&mut self) {}
}

struct StaticDevices;

impl MediaDevices for StaticDevices {
  fn acquire(&self, _constraints: &CameraConstraints) -> Result<Box<dyn VideoSource>, CameraError> {
    Ok(Box::new(StaticCamera))
  }
}

/// 周期设得很长，测试手动驱动每个周期
fn streaming_controller(client: Arc<GatedClient>) -> Controller {
  let config = CaptureConfig {
    interval: Duration::from_secs(3600),
    detect_every_nth: 2,
    ..CaptureConfig::default()
  };
  let mut controller = Controller::new(Some(Box::new(StaticDevices)), client, config, Draw::default());
  controller.setup().unwrap();
  controller.start_streaming();
  assert_eq!(controller.state(), PageState::Streaming);
  controller
}

fn wait_until_settled(controller: &mut Controller) {
  for _ in 0..100 {
    if !controller.session().request_in_flight {
      return;
    }
    controller.process_pending(Duration::from_millis(20));
  }
  panic!("detect request never settled");
}

fn wait_for(counter: &AtomicUsize, expected: usize) {
  for _ in 0..250 {
    if counter.load(Ordering::SeqCst) >= expected {
      return;
    }
    std::thread::sleep(Duration::from_millis(20));
  }
}

#[test]
fn five_ticks_with_slow_detector() {
  let (client, gate) = GatedClient::new();
  let mut controller = streaming_controller(Arc::clone(&client));

  let mut detects = Vec::new();
  let mut previews = Vec::new();
  for index in 0..5u64 {
    // 检测请求在途约 2.5 个周期，在第 2 与第 3 个周期之间完成
    if index == 3 {
      gate.send(()).unwrap();
      wait_until_settled(&mut controller);
    }
    let report = controller.tick();
    if report.detect_submitted {
      detects.push(index);
    }
    if report.preview_submitted {
      previews.push(index);
    }
  }

  assert_eq!(detects, vec![0, 4]);
  assert_eq!(previews, vec![0, 1, 2, 3, 4]);
  assert_eq!(controller.session().frame_counter, 5);

  wait_for(&client.preview_calls, 5);
  assert_eq!(client.preview_calls.load(Ordering::SeqCst), 5);
  wait_for(&client.detect_calls, 2);
  assert_eq!(client.detect_calls.load(Ordering::SeqCst), 2);

  gate.send(()).unwrap();
  wait_until_settled(&mut controller);
  let session = controller.session();
  assert_eq!(session.last_focus_plate.as_deref(), Some("GATE42"));
  assert_eq!(session.last_detection_count, Some(1));
  assert!(!controller.overlay().is_blank());
}

#[test]
fn result_arriving_after_stop_is_discarded() {
  let (client, gate) = GatedClient::new();
  let mut controller = streaming_controller(client);

  assert!(controller.tick().detect_submitted);
  controller.toggle_streaming();
  assert_eq!(controller.state(), PageState::Ready);

  gate.send(()).unwrap();
  wait_until_settled(&mut controller);

  let session = controller.session();
  assert!(!session.request_in_flight);
  assert_eq!(session.last_focus_plate, None);
  assert_eq!(session.last_detection_count, Some(0));
  assert!(controller.overlay().last_result().is_none());
  assert!(controller.overlay().is_blank());

  // 停止后不再产生周期
  assert!(controller.process_pending(Duration::from_millis(50)).is_empty());
}

#[test]
fn restart_discards_previous_generation() {
  let (client, gate) = GatedClient::new();
  let mut controller = streaming_controller(client);

  assert!(controller.tick().detect_submitted);
  controller.toggle_streaming();
  controller.toggle_streaming();
  assert_eq!(controller.state(), PageState::Streaming);

  gate.send(()).unwrap();
  wait_until_settled(&mut controller);
  assert_eq!(controller.session().last_focus_plate, None);
  assert!(controller.overlay().last_result().is_none());
}
