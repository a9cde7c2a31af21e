// 该文件是 Platecam （车牌相机） 项目的一部分。
// src/session.rs - 推流会话状态
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

pub const STATUS_CAMERA_NOT_STARTED: &str = "摄像头未启动";
pub const STATUS_CAMERA_UNSUPPORTED: &str = "不支持摄像头接口";
pub const STATUS_CAMERA_READY: &str = "点击按钮开始。";
pub const STATUS_CAMERA_NOT_INITIALIZED: &str = "摄像头未初始化";
pub const STATUS_STREAMING: &str = "正在向服务器推送画面…";
pub const STATUS_STOPPED: &str = "推流已停止。";

/// 推流会话状态，由控制器独占，按引用交给采集循环
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSession {
  pub streaming: bool,
  pub frame_counter: u64,
  pub request_in_flight: bool,
  pub status: String,
  pub last_focus_plate: Option<String>,
  pub last_detection_count: Option<usize>,
  /// 每次开始推流加一，用于识别停止之前发出的请求
  pub generation: u64,
}

impl Default for StreamSession {
  fn default() -> Self {
    Self {
      streaming: false,
      frame_counter: 0,
      request_in_flight: false,
      status: STATUS_CAMERA_NOT_STARTED.to_string(),
      last_focus_plate: None,
      last_detection_count: None,
      generation: 0,
    }
  }
}

impl StreamSession {
  pub fn set_status<S: Into<String>>(&mut self, status: S) {
    self.status = status.into();
  }

  pub fn reset_counters(&mut self) {
    self.last_detection_count = Some(0);
    self.last_focus_plate = None;
  }

  /// 检查并置位在途标志，已有请求在途时返回 false
  pub fn try_begin_request(&mut self) -> bool {
    if self.request_in_flight {
      return false;
    }
    self.request_in_flight = true;
    true
  }

  pub fn finish_request(&mut self) {
    self.request_in_flight = false;
  }
}
