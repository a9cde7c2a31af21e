// 该文件是 Platecam （车牌相机） 项目的一部分。
// src/overlay.rs - 检测结果覆盖层
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

use image::{Rgba, RgbaImage};
use tracing::debug;

use crate::detection::{DetectionResult, PlateBox, VehicleBox};

pub mod draw;

use self::draw::{Draw, FOCUS_PLATE_COLOR, PLATE_COLOR, VEHICLE_COLOR};

const DEFAULT_PLATE_LABEL: &str = "Plate";

/// 画布坐标系下的矩形
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasRect {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

impl CanvasRect {
  pub fn left(&self) -> f32 {
    self.x1.min(self.x2)
  }

  pub fn top(&self) -> f32 {
    self.y1.min(self.y2)
  }

  pub fn width(&self) -> f32 {
    (self.x2 - self.x1).abs()
  }

  pub fn height(&self) -> f32 {
    (self.y2 - self.y1).abs()
  }

  /// 裁剪到画布四周外扩 `margin` 的范围内
  ///
  /// 坐标不是有限值或裁剪后宽高不足 1 像素时返回 `None`。
  pub fn clamp_to(&self, canvas: (u32, u32), margin: f32) -> Option<CanvasRect> {
    if [self.x1, self.y1, self.x2, self.y2]
      .iter()
      .any(|v| !v.is_finite())
    {
      return None;
    }

    let max_x = canvas.0 as f32 + margin;
    let max_y = canvas.1 as f32 + margin;
    let clamped = CanvasRect {
      x1: self.x1.min(self.x2).clamp(-margin, max_x),
      y1: self.y1.min(self.y2).clamp(-margin, max_y),
      x2: self.x1.max(self.x2).clamp(-margin, max_x),
      y2: self.y1.max(self.y2).clamp(-margin, max_y),
    };
    if clamped.width() < 1.0 || clamped.height() < 1.0 {
      return None;
    }
    Some(clamped)
  }
}

/// 车牌框换算到画布坐标
///
/// 有归一化坐标时直接按画布尺寸缩放；否则按画布与原图尺寸之比缩放像素坐标。
/// 原图尺寸为 0 时按 1 处理。
pub fn resolve_plate_box(bbox: &PlateBox, canvas: (u32, u32), image: (f32, f32)) -> CanvasRect {
  let (canvas_w, canvas_h) = (canvas.0 as f32, canvas.1 as f32);

  if bbox.has_normalized() {
    return CanvasRect {
      x1: bbox.nx1 * canvas_w,
      y1: bbox.ny1 * canvas_h,
      x2: bbox.nx2 * canvas_w,
      y2: bbox.ny2 * canvas_h,
    };
  }

  let image_w = if image.0 != 0.0 { image.0 } else { 1.0 };
  let image_h = if image.1 != 0.0 { image.1 } else { 1.0 };
  CanvasRect {
    x1: bbox.x1 / image_w * canvas_w,
    y1: bbox.y1 / image_h * canvas_h,
    x2: bbox.x2 / image_w * canvas_w,
    y2: bbox.y2 / image_h * canvas_h,
  }
}

/// 车辆框只使用归一化的左上角与宽高
pub fn resolve_vehicle_box(bbox: &VehicleBox, canvas: (u32, u32)) -> CanvasRect {
  let (canvas_w, canvas_h) = (canvas.0 as f32, canvas.1 as f32);
  let x1 = bbox.nx * canvas_w;
  let y1 = bbox.ny * canvas_h;
  CanvasRect {
    x1,
    y1,
    x2: x1 + bbox.nwidth * canvas_w,
    y2: y1 + bbox.nheight * canvas_h,
  }
}

/// 覆盖层画布，只保留最近一次检测结果
pub struct Overlay {
  canvas: RgbaImage,
  last_result: Option<DetectionResult>,
  draw: Draw,
}

impl Overlay {
  pub fn new(draw: Draw) -> Self {
    Self {
      canvas: RgbaImage::new(0, 0),
      last_result: None,
      draw,
    }
  }

  pub fn size(&self) -> (u32, u32) {
    self.canvas.dimensions()
  }

  pub fn canvas(&self) -> &RgbaImage {
    &self.canvas
  }

  pub fn last_result(&self) -> Option<&DetectionResult> {
    self.last_result.as_ref()
  }

  /// 调整画布尺寸，调整后画布被清空
  pub fn resize(&mut self, width: u32, height: u32) {
    debug!("覆盖层尺寸调整为 {}x{}", width, height);
    self.canvas = RgbaImage::new(width, height);
    self.clear();
  }

  /// 尺寸不同才调整，返回是否调整过
  pub fn sync_size(&mut self, width: u32, height: u32) -> bool {
    if self.size() == (width, height) {
      return false;
    }
    self.resize(width, height);
    true
  }

  /// 清空画布并丢弃最近的检测结果
  pub fn clear(&mut self) {
    self.wipe();
    self.last_result = None;
  }

  pub fn set_result(&mut self, result: DetectionResult) {
    self.last_result = Some(result);
    self.redraw();
  }

  /// 用最近的检测结果重绘整个画布，没有结果时不做任何事
  pub fn redraw(&mut self) {
    let Some(result) = self.last_result.as_ref() else {
      return;
    };

    self.canvas.pixels_mut().for_each(|p| *p = Rgba([0, 0, 0, 0]));

    let size = self.canvas.dimensions();
    let image = (result.image_w, result.image_h);

    for plate in result.plates.iter() {
      let rect = resolve_plate_box(&plate.bbox, size, image);
      let color = if plate.is_focus {
        FOCUS_PLATE_COLOR
      } else {
        PLATE_COLOR
      };
      let label = if plate.plate_text.is_empty() {
        DEFAULT_PLATE_LABEL
      } else {
        plate.plate_text.as_str()
      };
      self.draw.labeled_box(&mut self.canvas, &rect, color, label);
    }

    for vehicle in result.vehicles.iter() {
      let rect = resolve_vehicle_box(&vehicle.bbox, size);
      let label = format!("{} {:.1}%", vehicle.class_name, vehicle.confidence * 100.0);
      self.draw.labeled_box(&mut self.canvas, &rect, VEHICLE_COLOR, &label);
    }
  }

  fn wipe(&mut self) {
    self.canvas.pixels_mut().for_each(|p| *p = Rgba([0, 0, 0, 0]));
  }

  /// 画布上是否有任何非透明像素
  pub fn is_blank(&self) -> bool {
    self.canvas.pixels().all(|p| p[3] == 0)
  }
}
