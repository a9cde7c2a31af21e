// 该文件是 Platecam （车牌相机） 项目的一部分。
// src/detection/schema.rs - 上游响应格式与归一化
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

//! 检测服务存在两种响应格式：
//!
//! - 组合格式：顶层 `plates[]`、`vehicles[]`、`image_width`、`image_height`
//! - 车牌格式：`data.detections[]`、`data.vehicles[]`、`data.image_w`、`data.image_h`
//!
//! 两者先解析成全部字段可缺省的中间结构，再按固定规则补齐默认值：
//! 数值缺省为 0，数组缺省为空，`class_id` 缺省为 -1，`class_name` 缺省为
//! `"vehicle"`，缺少检测置信度的车牌记为 1.0。

use serde::Deserialize;

use super::{
  DetectionResult, PlateBox, PlateDetection, VehicleBox, VehicleDetection, VehicleDetectResponse,
};

const DEFAULT_CLASS_ID: i32 = -1;
const DEFAULT_CLASS_NAME: &str = "vehicle";
const DEFAULT_DETECTION_CONF: f32 = 1.0;

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum UpstreamResponse {
  PlateOnly { data: PlateOnlyPayload },
  Combined(CombinedPayload),
}

#[derive(Deserialize, Debug, Default)]
struct CombinedPayload {
  image_width: Option<f32>,
  image_height: Option<f32>,
  plates: Option<Vec<RawCombinedPlate>>,
  vehicles: Option<Vec<RawVehicle>>,
}

#[derive(Deserialize, Debug, Default)]
struct PlateOnlyPayload {
  image_w: Option<f32>,
  image_h: Option<f32>,
  detections: Option<Vec<RawPlate>>,
  vehicles: Option<Vec<RawVehicle>>,
}

#[derive(Deserialize, Debug, Default)]
struct RawBox {
  x1: Option<f32>,
  y1: Option<f32>,
  x2: Option<f32>,
  y2: Option<f32>,
  width: Option<f32>,
  height: Option<f32>,
  cx: Option<f32>,
  cy: Option<f32>,
  nx1: Option<f32>,
  ny1: Option<f32>,
  nx2: Option<f32>,
  ny2: Option<f32>,
  nx: Option<f32>,
  ny: Option<f32>,
  nwidth: Option<f32>,
  nheight: Option<f32>,
}

#[derive(Deserialize, Debug, Default)]
struct RawOcr {
  text: Option<String>,
  confidence: Option<f32>,
}

#[derive(Deserialize, Debug, Default)]
struct RawCombinedPlate {
  bbox: Option<RawBox>,
  ocr: Option<RawOcr>,
  confidence: Option<f32>,
  detection_conf: Option<f32>,
  is_focus: Option<bool>,
}

#[derive(Deserialize, Debug, Default)]
struct RawPlate {
  plate_text: Option<String>,
  detection_conf: Option<f32>,
  ocr_conf: Option<f32>,
  is_focus: Option<bool>,
  #[serde(rename = "box")]
  bbox: Option<RawBox>,
}

#[derive(Deserialize, Debug, Default)]
struct RawVehicle {
  bbox: Option<RawBox>,
  confidence: Option<f32>,
  class_id: Option<i32>,
  class_name: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct RawVehicleResponse {
  success: Option<bool>,
  num_vehicles: Option<usize>,
  vehicles: Option<Vec<RawVehicle>>,
  inference_time_ms: Option<f32>,
  image_width: Option<f32>,
  image_height: Option<f32>,
  model: Option<String>,
}

impl RawBox {
  // 宽高与中心点未给出时由角点推导
  fn corners(&self) -> (f32, f32, f32, f32, f32, f32, f32, f32) {
    let x1 = self.x1.unwrap_or(0.0);
    let y1 = self.y1.unwrap_or(0.0);
    let x2 = self.x2.unwrap_or(0.0);
    let y2 = self.y2.unwrap_or(0.0);
    let width = self.width.unwrap_or(x2 - x1);
    let height = self.height.unwrap_or(y2 - y1);
    let cx = self.cx.unwrap_or(x1 + width / 2.0);
    let cy = self.cy.unwrap_or(y1 + height / 2.0);
    (x1, y1, x2, y2, width, height, cx, cy)
  }

  fn to_plate_box(&self) -> PlateBox {
    let (x1, y1, x2, y2, width, height, cx, cy) = self.corners();
    PlateBox {
      x1,
      y1,
      x2,
      y2,
      width,
      height,
      cx,
      cy,
      nx1: self.nx1.unwrap_or(0.0),
      ny1: self.ny1.unwrap_or(0.0),
      nx2: self.nx2.unwrap_or(0.0),
      ny2: self.ny2.unwrap_or(0.0),
    }
  }

  fn to_vehicle_box(&self) -> VehicleBox {
    let (x1, y1, x2, y2, width, height, cx, cy) = self.corners();
    VehicleBox {
      x1,
      y1,
      x2,
      y2,
      width,
      height,
      cx,
      cy,
      nx: self.nx.unwrap_or(0.0),
      ny: self.ny.unwrap_or(0.0),
      nwidth: self.nwidth.unwrap_or(0.0),
      nheight: self.nheight.unwrap_or(0.0),
    }
  }
}

fn plate_box(bbox: Option<&RawBox>) -> PlateBox {
  bbox.map(RawBox::to_plate_box).unwrap_or_else(|| RawBox::default().to_plate_box())
}

fn vehicle_box(bbox: Option<&RawBox>) -> VehicleBox {
  bbox
    .map(RawBox::to_vehicle_box)
    .unwrap_or_else(|| RawBox::default().to_vehicle_box())
}

impl From<RawCombinedPlate> for PlateDetection {
  fn from(raw: RawCombinedPlate) -> Self {
    let ocr = raw.ocr.unwrap_or_default();
    PlateDetection {
      plate_text: ocr.text.unwrap_or_default(),
      detection_conf: raw
        .detection_conf
        .or(raw.confidence)
        .unwrap_or(DEFAULT_DETECTION_CONF),
      ocr_conf: ocr.confidence.unwrap_or(0.0),
      // 组合格式不区分焦点车牌，全部视为焦点
      is_focus: raw.is_focus.unwrap_or(true),
      bbox: plate_box(raw.bbox.as_ref()),
    }
  }
}

impl From<RawPlate> for PlateDetection {
  fn from(raw: RawPlate) -> Self {
    PlateDetection {
      plate_text: raw.plate_text.unwrap_or_default(),
      detection_conf: raw.detection_conf.unwrap_or(DEFAULT_DETECTION_CONF),
      ocr_conf: raw.ocr_conf.unwrap_or(0.0),
      is_focus: raw.is_focus.unwrap_or(false),
      bbox: plate_box(raw.bbox.as_ref()),
    }
  }
}

impl From<RawVehicle> for VehicleDetection {
  fn from(raw: RawVehicle) -> Self {
    VehicleDetection {
      bbox: vehicle_box(raw.bbox.as_ref()),
      confidence: raw.confidence.unwrap_or(0.0),
      class_id: raw.class_id.unwrap_or(DEFAULT_CLASS_ID),
      class_name: raw
        .class_name
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_CLASS_NAME.to_string()),
    }
  }
}

fn collect<R, T: From<R>>(raw: Option<Vec<R>>) -> Vec<T> {
  raw
    .unwrap_or_default()
    .into_iter()
    .map(T::from)
    .collect()
}

/// 解析 `/detect` 的响应体
pub fn parse_detect_response(
  body: &[u8],
  stream_id: &str,
) -> Result<DetectionResult, serde_json::Error> {
  let (image_w, image_h, plates, vehicles): (
    Option<f32>,
    Option<f32>,
    Vec<PlateDetection>,
    Vec<VehicleDetection>,
  ) =
    match serde_json::from_slice::<UpstreamResponse>(body)? {
      UpstreamResponse::PlateOnly { data } => (
        data.image_w,
        data.image_h,
        collect(data.detections),
        collect(data.vehicles),
      ),
      UpstreamResponse::Combined(payload) => (
        payload.image_width,
        payload.image_height,
        collect(payload.plates),
        collect(payload.vehicles),
      ),
    };

  Ok(DetectionResult {
    stream_id: stream_id.to_string(),
    image_w: image_w.unwrap_or(0.0),
    image_h: image_h.unwrap_or(0.0),
    focus_plate: plates.first().map(|plate| plate.plate_text.clone()),
    plates,
    vehicles,
  })
}

/// 解析车辆专用服务的响应体
pub fn parse_vehicle_response(body: &[u8]) -> Result<VehicleDetectResponse, serde_json::Error> {
  let raw: RawVehicleResponse = serde_json::from_slice(body)?;
  let vehicles: Vec<VehicleDetection> = collect(raw.vehicles);

  Ok(VehicleDetectResponse {
    success: raw.success.unwrap_or(false),
    num_vehicles: raw.num_vehicles.unwrap_or(vehicles.len()),
    vehicles,
    inference_time_ms: raw.inference_time_ms.unwrap_or(0.0),
    image_width: raw.image_width.unwrap_or(0.0),
    image_height: raw.image_height.unwrap_or(0.0),
    model: raw.model.unwrap_or_default(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn combined_schema_fills_defaults() {
    let body = br#"{
      "image_width": 1280,
      "image_height": 720,
      "plates": [
        { "bbox": { "x1": 100, "y1": 200, "x2": 180, "y2": 230 }, "ocr": { "text": "ABC123" } }
      ],
      "vehicles": [
        { "bbox": { "nx": 0.1, "ny": 0.2, "nwidth": 0.3, "nheight": 0.4 }, "confidence": 0.87 }
      ]
    }"#;

    let result = parse_detect_response(body, "mobile-1").unwrap();
    assert_eq!(result.stream_id, "mobile-1");
    assert_eq!((result.image_w, result.image_h), (1280.0, 720.0));
    assert_eq!(result.focus_plate.as_deref(), Some("ABC123"));

    let plate = &result.plates[0];
    assert_eq!(plate.detection_conf, 1.0);
    assert_eq!(plate.ocr_conf, 0.0);
    assert!(plate.is_focus);
    assert_eq!((plate.bbox.width, plate.bbox.height), (80.0, 30.0));
    assert_eq!((plate.bbox.cx, plate.bbox.cy), (140.0, 215.0));
    assert!(!plate.bbox.has_normalized());

    let vehicle = &result.vehicles[0];
    assert_eq!(vehicle.class_id, -1);
    assert_eq!(vehicle.class_name, "vehicle");
    assert_eq!(vehicle.bbox.nwidth, 0.3);
  }

  #[test]
  fn plate_only_schema_is_accepted() {
    let body = br#"{
      "data": {
        "stream_id": "ignored",
        "image_w": 640,
        "image_h": 480,
        "detections": [
          {
            "plate_text": "XYZ9",
            "detection_conf": 0.91,
            "ocr_conf": 0.8,
            "is_focus": false,
            "box": { "x1": 10, "y1": 20, "x2": 50, "y2": 40, "width": 40, "height": 20,
                     "cx": 30, "cy": 30, "nx1": 0.1, "ny1": 0.2, "nx2": 0.3, "ny2": 0.4 }
          },
          { "plate_text": "SECOND" }
        ],
        "vehicles": [ { "class_id": 2, "class_name": "car", "confidence": 0.5 } ]
      }
    }"#;

    let result = parse_detect_response(body, "mobile-1").unwrap();
    assert_eq!(result.stream_id, "mobile-1");
    assert_eq!((result.image_w, result.image_h), (640.0, 480.0));
    assert_eq!(result.detection_count(), 2);
    assert_eq!(result.focus_plate.as_deref(), Some("XYZ9"));
    assert_eq!(result.plates[0].detection_conf, 0.91);
    assert!(result.plates[0].bbox.has_normalized());
    assert_eq!(result.plates[1].detection_conf, 1.0);
    assert_eq!(result.vehicles[0].class_id, 2);
    assert_eq!(result.vehicles[0].class_name, "car");
  }

  #[test]
  fn empty_and_null_fields_fall_back() {
    let result = parse_detect_response(br#"{ "plates": null, "vehicles": [] }"#, "s").unwrap();
    assert!(result.plates.is_empty());
    assert!(result.vehicles.is_empty());
    assert_eq!(result.focus_plate, None);
    assert_eq!((result.image_w, result.image_h), (0.0, 0.0));

    let result = parse_detect_response(
      br#"{ "vehicles": [ { "class_name": "", "class_id": null, "bbox": null } ] }"#,
      "s",
    )
    .unwrap();
    assert_eq!(result.vehicles[0].class_name, "vehicle");
    assert_eq!(result.vehicles[0].class_id, -1);
    assert_eq!(result.vehicles[0].bbox, VehicleBox::default());
  }

  #[test]
  fn explicit_plate_score_is_kept() {
    let body = br#"{ "plates": [ { "confidence": 0.4, "ocr": { "text": "", "confidence": 0.6 } } ] }"#;
    let result = parse_detect_response(body, "s").unwrap();
    assert_eq!(result.plates[0].detection_conf, 0.4);
    assert_eq!(result.plates[0].ocr_conf, 0.6);
    assert_eq!(result.focus_plate.as_deref(), Some(""));
  }

  #[test]
  fn malformed_body_is_a_decode_error() {
    assert!(parse_detect_response(b"not json", "s").is_err());
    assert!(parse_detect_response(b"[1, 2]", "s").is_err());
  }

  #[test]
  fn vehicle_response_counts_when_missing() {
    let body = br#"{ "success": true, "vehicles": [ {}, { "class_name": "truck" } ], "model": "yolo" }"#;
    let response = parse_vehicle_response(body).unwrap();
    assert!(response.success);
    assert_eq!(response.num_vehicles, 2);
    assert_eq!(response.vehicles[1].class_name, "truck");
    assert_eq!(response.model, "yolo");
  }
}
