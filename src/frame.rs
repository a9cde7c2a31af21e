// 该文件是 Platecam （车牌相机） 项目的一部分。
// src/frame.rs - 采集帧缓冲
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

use image::{
  DynamicImage, RgbImage, RgbaImage,
  codecs::jpeg::JpegEncoder,
  imageops::{self, FilterType},
};
use thiserror::Error;

pub const DEFAULT_TARGET_WIDTH: u32 = 640;
pub const DEFAULT_JPEG_QUALITY: u8 = 70;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("图像编码错误: {0}")]
  EncodeError(#[from] image::ImageError),
  #[error("帧尺寸无效: {0}x{1}")]
  InvalidSize(u32, u32),
}

/// 按目标宽度等比缩放后的尺寸
pub fn target_size(width: u32, height: u32, target_width: u32) -> (u32, u32) {
  let scale = target_width as f32 / width as f32;
  let target_height = (height as f32 * scale).round() as u32;
  (target_width, target_height.max(1))
}

/// 每个采集周期重建的像素缓冲
#[derive(Debug, Clone)]
pub struct RasterBuffer {
  image: RgbImage,
}

impl RasterBuffer {
  /// 将视频帧缩放到目标宽度
  pub fn capture(frame: &RgbImage, target_width: u32) -> Result<Self, FrameError> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 || target_width == 0 {
      return Err(FrameError::InvalidSize(width, height));
    }

    let (w, h) = target_size(width, height, target_width);
    Ok(Self {
      image: imageops::resize(frame, w, h, FilterType::Triangle),
    })
  }

  /// 在原始帧上叠加覆盖层，覆盖层缩放到同一尺寸
  pub fn composite(raw: &RasterBuffer, overlay: &RgbaImage) -> Self {
    let (width, height) = raw.image.dimensions();
    let mut base = DynamicImage::ImageRgb8(raw.image.clone()).to_rgba8();

    if overlay.width() > 0 && overlay.height() > 0 {
      let scaled = if overlay.dimensions() == (width, height) {
        overlay.clone()
      } else {
        imageops::resize(overlay, width, height, FilterType::Triangle)
      };
      imageops::overlay(&mut base, &scaled, 0, 0);
    }

    Self {
      image: DynamicImage::ImageRgba8(base).to_rgb8(),
    }
  }

  pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality).encode_image(&self.image)?;
    Ok(bytes)
  }

  pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), FrameError> {
    self.image.save(path)?;
    Ok(())
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn as_image(&self) -> &RgbImage {
    &self.image
  }
}
