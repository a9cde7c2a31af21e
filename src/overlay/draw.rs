// 该文件是 Platecam （车牌相机） 项目的一部分。
// src/overlay/draw.rs - 边框与标签绘制
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::CanvasRect;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 14.0;
const LABEL_CHAR_WIDTH: f32 = 7.0; // 没有字体时按字符数估算宽度
const LABEL_PADDING: i32 = 4;
const LABEL_BOX_HEIGHT: u32 = 18;
const LABEL_OFFSET: f32 = 20.0;
const LABEL_TEXT_TOP: i32 = 2;
const STROKE_WIDTH: i32 = 3;
// 框坐标来自服务端，绘制前裁剪到画布外扩这么多像素的范围
const CLAMP_MARGIN: f32 = 8.0;

pub const FOCUS_PLATE_COLOR: Rgba<u8> = Rgba([0x00, 0xff, 0x00, 0xff]);
pub const PLATE_COLOR: Rgba<u8> = Rgba([0xff, 0xcc, 0x00, 0xff]);
pub const VEHICLE_COLOR: Rgba<u8> = Rgba([0x00, 0xe5, 0xff, 0xff]);
pub const LABEL_BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 178]); // 70% 不透明
pub const LABEL_TEXT_COLOR: Rgba<u8> = Rgba([0xff, 0xff, 0xff, 0xff]);

pub const DEFAULT_FONT_PATH: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  label_char_width: f32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_char_width: LABEL_CHAR_WIDTH,
    }
  }
}

impl Draw {
  pub fn with_font_file<P: AsRef<Path>>(path: P) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data)?;
    Ok(Self {
      font: Some(font),
      ..Self::default()
    })
  }

  /// 加载指定字体，失败时退回系统默认字体，再失败则只画标签底色
  pub fn load(font_path: Option<&Path>) -> Self {
    let path = font_path.unwrap_or_else(|| Path::new(DEFAULT_FONT_PATH));
    match Self::with_font_file(path) {
      Ok(draw) => {
        info!("已加载标签字体: {}", path.display());
        draw
      }
      Err(e) => {
        warn!("无法加载字体 {}: {}，标签将不显示文字", path.display(), e);
        Self::default()
      }
    }
  }

  /// 绘制 3 像素宽的矩形边框，线宽以路径为中心
  pub fn stroke_rect(&self, canvas: &mut RgbaImage, rect: &CanvasRect, color: Rgba<u8>) {
    let Some(rect) = rect.clamp_to(canvas.dimensions(), CLAMP_MARGIN) else {
      return;
    };
    let x = rect.left().round() as i32;
    let y = rect.top().round() as i32;
    let w = rect.width().round() as i32;
    let h = rect.height().round() as i32;

    let half = STROKE_WIDTH / 2;
    for offset in -half..=half {
      let (rw, rh) = (w + 2 * offset, h + 2 * offset);
      if rw < 1 || rh < 1 {
        continue;
      }
      let outline = Rect::at(x - offset, y - offset).of_size(rw as u32, rh as u32);
      draw_hollow_rect_mut(canvas, outline, color);
    }
  }

  fn label_width(&self, text: &str) -> u32 {
    match &self.font {
      Some(font) => text_size(PxScale::from(self.font_size), font, text).0,
      None => (text.chars().count() as f32 * self.label_char_width) as u32,
    }
  }

  /// 在 (x, y) 处绘制半透明底色与白色文字
  pub fn label(&self, canvas: &mut RgbaImage, x: i32, y: i32, text: &str) {
    let width = self.label_width(text).saturating_add(2 * LABEL_PADDING as u32);
    let background = Rect::at(x, y).of_size(width, LABEL_BOX_HEIGHT);
    draw_filled_rect_mut(canvas, background, LABEL_BACKGROUND);

    if let Some(font) = &self.font {
      draw_text_mut(
        canvas,
        LABEL_TEXT_COLOR,
        x + LABEL_PADDING,
        y + LABEL_TEXT_TOP,
        PxScale::from(self.font_size),
        font,
        text,
      );
    }
  }

  /// 边框加框上方的标签，标签不超出画布顶部
  pub fn labeled_box(&self, canvas: &mut RgbaImage, rect: &CanvasRect, color: Rgba<u8>, text: &str) {
    let Some(rect) = rect.clamp_to(canvas.dimensions(), CLAMP_MARGIN) else {
      debug!("框超出画布或无效，跳过: {:?}", rect);
      return;
    };
    let rect = &rect;
    self.stroke_rect(canvas, rect, color);
    let label_x = rect.left().round() as i32;
    let label_y = (rect.top() - LABEL_OFFSET).max(0.0).round() as i32;
    self.label(canvas, label_x, label_y, text);
  }
}
