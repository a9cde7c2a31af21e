// 该文件是 Platecam （车牌相机） 项目的一部分。
// src/capture.rs - 定时采集与上传
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

//! # 采集循环
//!
//! 每个周期从视频源取一帧：
//!
//! 1. 缩放到目标宽度得到原始帧
//! 2. 叠加覆盖层得到预览帧，每个周期都上传，结果忽略
//! 3. 每 N 个周期且没有检测请求在途时上传原始帧做检测
//!
//! 网络请求在工作线程中执行，检测结果以 [`LoopEvent::Detected`] 发回控制器的事件队列，
//! 由控制器在自己的线程里调用 [`apply_detection`]。

use std::{
  str::FromStr,
  sync::{Arc, mpsc::Sender},
  thread,
  time::Duration,
};

use tracing::{debug, error, info, warn};

use crate::{
  detection::{DetectClient, DetectError, DetectionResult},
  frame::{DEFAULT_JPEG_QUALITY, DEFAULT_TARGET_WIDTH, RasterBuffer},
  input::{ReadyState, VideoSource},
  overlay::Overlay,
  session::StreamSession,
};

pub const DEFAULT_CAPTURE_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_DETECT_EVERY_NTH: u64 = 2;
pub const DEFAULT_STREAM_ID: &str = "mobile-1";

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
  pub interval: Duration,
  /// 每 N 个周期做一次检测，0 按 1 处理
  pub detect_every_nth: u64,
  pub target_width: u32,
  pub jpeg_quality: u8,
  pub stream_id: String,
}

impl Default for CaptureConfig {
  fn default() -> Self {
    Self {
      interval: DEFAULT_CAPTURE_INTERVAL,
      detect_every_nth: DEFAULT_DETECT_EVERY_NTH,
      target_width: DEFAULT_TARGET_WIDTH,
      jpeg_quality: DEFAULT_JPEG_QUALITY,
      stream_id: DEFAULT_STREAM_ID.to_string(),
    }
  }
}

/// 外部控制事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
  Toggle,
  Resize { width: u32, height: u32 },
  Shutdown,
}

impl FromStr for ControlEvent {
  type Err = String;

  /// 标准输入命令：`s` 切换推流，`r WxH` 调整显示尺寸，`q` 退出
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut parts = s.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
      (Some("s"), None, None) => Ok(ControlEvent::Toggle),
      (Some("q"), None, None) => Ok(ControlEvent::Shutdown),
      (Some("r"), Some(size), None) => {
        let (w, h) = size
          .split_once(['x', 'X'])
          .ok_or_else(|| format!("尺寸格式应为 WxH: {}", size))?;
        let width = w.parse::<u32>().map_err(|e| format!("宽度无效 {}: {}", w, e))?;
        let height = h.parse::<u32>().map_err(|e| format!("高度无效 {}: {}", h, e))?;
        Ok(ControlEvent::Resize { width, height })
      }
      _ => Err(format!("未知命令: {}", s.trim())),
    }
  }
}

/// 控制器事件队列中的消息
#[derive(Debug)]
pub enum LoopEvent {
  Detected {
    generation: u64,
    result: Result<DetectionResult, DetectError>,
  },
  Control(ControlEvent),
}

/// 单个周期做了什么
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
  pub captured: bool,
  pub preview_submitted: bool,
  pub detect_submitted: bool,
  pub detect_skipped_in_flight: bool,
}

pub struct CaptureLoop {
  client: Arc<dyn DetectClient>,
  config: CaptureConfig,
  events: Sender<LoopEvent>,
}

impl CaptureLoop {
  pub fn new(client: Arc<dyn DetectClient>, config: CaptureConfig, events: Sender<LoopEvent>) -> Self {
    Self {
      client,
      config,
      events,
    }
  }

  pub fn config(&self) -> &CaptureConfig {
    &self.config
  }

  /// 执行一个采集周期
  ///
  /// 视频源未就绪时直接跳过，这样的周期不计数。
  pub fn tick(
    &self,
    session: &mut StreamSession,
    video: &mut dyn VideoSource,
    overlay: &Overlay,
  ) -> TickReport {
    let mut report = TickReport::default();
    if !session.streaming {
      return report;
    }
    if video.ready_state() < ReadyState::HaveEnoughData {
      debug!("视频源未就绪，跳过本周期");
      return report;
    }
    match video.video_size() {
      Some((w, h)) if w > 0 && h > 0 => {}
      _ => return report,
    }
    let Some(frame) = video.current_frame() else {
      debug!("暂无可用帧，跳过本周期");
      return report;
    };

    self.process_frame(&mut report, session, &frame, overlay);
    session.frame_counter = session.frame_counter.wrapping_add(1);
    report
  }

  fn process_frame(
    &self,
    report: &mut TickReport,
    session: &mut StreamSession,
    frame: &image::RgbImage,
    overlay: &Overlay,
  ) {
    let raw = match RasterBuffer::capture(frame, self.config.target_width) {
      Ok(raw) => raw,
      Err(e) => {
        warn!("帧缩放失败: {}", e);
        return;
      }
    };
    report.captured = true;

    let preview = RasterBuffer::composite(&raw, overlay.canvas());
    match preview.encode_jpeg(self.config.jpeg_quality) {
      Ok(jpeg) => report.preview_submitted = self.submit_preview(jpeg),
      Err(e) => warn!("预览帧编码失败: {}", e),
    }

    let nth = self.config.detect_every_nth.max(1);
    if session.frame_counter % nth != 0 {
      return;
    }
    if !session.try_begin_request() {
      debug!("第 {} 帧: 检测请求仍在途，跳过", session.frame_counter);
      report.detect_skipped_in_flight = true;
      return;
    }

    let submitted = match raw.encode_jpeg(self.config.jpeg_quality) {
      Ok(jpeg) => self.submit_detect(jpeg, session.generation),
      Err(e) => {
        warn!("检测帧编码失败: {}", e);
        false
      }
    };
    if !submitted {
      session.finish_request();
    }
    report.detect_submitted = submitted;
  }

  fn submit_preview(&self, jpeg: Vec<u8>) -> bool {
    let client = Arc::clone(&self.client);
    let stream_id = self.config.stream_id.clone();
    let spawned = thread::Builder::new()
      .name("platecam-preview".to_string())
      .spawn(move || match client.send_preview_frame(jpeg, &stream_id) {
        Ok(true) => {}
        Ok(false) => debug!("预览帧未被服务端接受"),
        Err(e) => debug!("预览帧上传失败: {}", e),
      });
    match spawned {
      Ok(_) => true,
      Err(e) => {
        warn!("无法启动预览上传线程: {}", e);
        false
      }
    }
  }

  fn submit_detect(&self, jpeg: Vec<u8>, generation: u64) -> bool {
    let client = Arc::clone(&self.client);
    let events = self.events.clone();
    let stream_id = self.config.stream_id.clone();
    let spawned = thread::Builder::new()
      .name("platecam-detect".to_string())
      .spawn(move || {
        let result = client.send_frame(jpeg, &stream_id);
        if events
          .send(LoopEvent::Detected { generation, result })
          .is_err()
        {
          debug!("事件队列已关闭，丢弃检测结果");
        }
      });
    match spawned {
      Ok(_) => true,
      Err(e) => {
        error!("无法启动检测线程: {}", e);
        false
      }
    }
  }
}

/// 在控制器线程上处理检测结果
///
/// 在途标志总是先清除；推流已停止或结果属于更早的推流时丢弃结果。
/// 返回结果是否被采用。
pub fn apply_detection(
  session: &mut StreamSession,
  overlay: &mut Overlay,
  generation: u64,
  result: Result<DetectionResult, DetectError>,
) -> bool {
  session.finish_request();

  if !session.streaming || generation != session.generation {
    debug!("推流已停止，丢弃检测结果");
    return false;
  }

  match result {
    Ok(result) => {
      let count = result.detection_count();
      info!(
        "检测完成: {} 个车牌, {} 辆车, 焦点车牌 {:?}",
        count,
        result.vehicles.len(),
        result.focus_plate
      );
      session.last_focus_plate = result.focus_plate.clone();
      session.last_detection_count = Some(count);
      session.set_status(format!("推流中… 检测数: {}", count));
      overlay.set_result(result);
      true
    }
    Err(e) => {
      warn!("发送帧失败: {}", e);
      session.set_status(format!("发送帧失败: {}", e));
      false
    }
  }
}
