// 该文件是 Platecam （车牌相机） 项目的一部分。
// src/detection/vehicle_client.rs - 车辆专用检测服务客户端
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

use std::time::Duration;

use reqwest::blocking::{Client, multipart::Form};
use serde::Serialize;
use url::Url;

use super::{
  DetectError, DetectionResult, VehicleDetection,
  http_client::{DETECT_FILE_NAME, DETECT_UPLOAD_FIELD, build_client, endpoint, jpeg_part, post_form},
  parse_vehicle_response,
};

/// 车辆检测服务的响应
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleDetectResponse {
  pub success: bool,
  pub num_vehicles: usize,
  pub vehicles: Vec<VehicleDetection>,
  pub inference_time_ms: f32,
  pub image_width: f32,
  pub image_height: f32,
  pub model: String,
}

impl VehicleDetectResponse {
  /// 转换为通用检测结果，便于复用覆盖层绘制
  pub fn to_detection_result(&self, stream_id: &str) -> DetectionResult {
    DetectionResult {
      stream_id: stream_id.to_string(),
      image_w: self.image_width,
      image_h: self.image_height,
      focus_plate: None,
      plates: Vec::new(),
      vehicles: self.vehicles.clone(),
    }
  }
}

/// 车辆专用检测服务客户端（第二个可选服务地址）
pub struct VehicleDetectClient {
  client: Client,
  detect_url: Url,
}

impl VehicleDetectClient {
  pub fn new(base: &Url, timeout: Option<Duration>) -> Result<Self, DetectError> {
    Ok(Self {
      client: build_client(timeout)?,
      detect_url: endpoint(base, "detect")?,
    })
  }

  pub fn send_vehicle_frame(&self, jpeg: Vec<u8>) -> Result<VehicleDetectResponse, DetectError> {
    let form = Form::new().part(DETECT_UPLOAD_FIELD, jpeg_part(jpeg, DETECT_FILE_NAME)?);
    let body = post_form(&self.client, self.detect_url.clone(), form)?;
    Ok(parse_vehicle_response(&body)?)
  }
}
