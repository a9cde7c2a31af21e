// 该文件是 Platecam （车牌相机） 项目的一部分。
// src/detection.rs - 检测结果模型与检测服务客户端
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

use serde::Serialize;
use thiserror::Error;

mod http_client;
mod schema;
mod vehicle_client;

pub use self::http_client::HttpDetectClient;
pub use self::schema::{parse_detect_response, parse_vehicle_response};
pub use self::vehicle_client::{VehicleDetectClient, VehicleDetectResponse};

/// 车牌边框
///
/// 同时携带像素坐标与归一化坐标。归一化坐标全为 0 表示服务端没有提供，
/// 此时需要借助像素坐标与原图尺寸换算。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlateBox {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
  pub width: f32,
  pub height: f32,
  pub cx: f32,
  pub cy: f32,
  pub nx1: f32,
  pub ny1: f32,
  pub nx2: f32,
  pub ny2: f32,
}

impl PlateBox {
  /// 是否携带了归一化坐标（至少一个分量非 0）
  pub fn has_normalized(&self) -> bool {
    self.nx1 != 0.0 || self.ny1 != 0.0 || self.nx2 != 0.0 || self.ny2 != 0.0
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlateDetection {
  pub plate_text: String,
  pub detection_conf: f32,
  pub ocr_conf: f32,
  pub is_focus: bool,
  #[serde(rename = "box")]
  pub bbox: PlateBox,
}

/// 车辆边框，归一化部分为左上角加宽高
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VehicleBox {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
  pub width: f32,
  pub height: f32,
  pub cx: f32,
  pub cy: f32,
  pub nx: f32,
  pub ny: f32,
  pub nwidth: f32,
  pub nheight: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleDetection {
  pub bbox: VehicleBox,
  pub confidence: f32,
  pub class_id: i32,
  pub class_name: String,
}

/// 单帧的归一化检测结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionResult {
  pub stream_id: String,
  pub image_w: f32,
  pub image_h: f32,
  pub focus_plate: Option<String>,
  pub plates: Vec<PlateDetection>,
  pub vehicles: Vec<VehicleDetection>,
}

impl DetectionResult {
  /// 检测数量按车牌计
  pub fn detection_count(&self) -> usize {
    self.plates.len()
  }
}

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("网络请求失败: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("服务端返回错误状态 {status}: {body}")]
  Status { status: u16, body: String },
  #[error("响应解析失败: {0}")]
  Decode(#[from] serde_json::Error),
  #[error("接口地址错误: {0}")]
  Url(#[from] url::ParseError),
}

/// 检测服务客户端
///
/// 两个调用都是阻塞的，由采集循环放到工作线程里执行。
pub trait DetectClient: Send + Sync {
  /// 上传原始帧，返回归一化后的检测结果
  fn send_frame(&self, jpeg: Vec<u8>, stream_id: &str) -> Result<DetectionResult, DetectError>;

  /// 上传叠加后的预览帧，返回服务端的 `success` 字段
  fn send_preview_frame(&self, jpeg: Vec<u8>, stream_id: &str) -> Result<bool, DetectError>;
}
