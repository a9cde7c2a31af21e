// 该文件是 Platecam （车牌相机） 项目的一部分。
// src/input/still_image.rs - 静态图像输入
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use super::{
  CameraConstraints, CameraError, Capabilities, Facing, FacingMode, MediaDevices, ReadyState,
  VideoSource,
};
use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum StillImageError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("图像路径为空")]
  EmptyPath,
}

/// 把一张图片当作始终就绪的后置摄像头
pub struct StillImageDevices {
  path: String,
}

impl FromUrlWithScheme for StillImageDevices {
  const SCHEME: &'static str = "image";
}

impl FromUrl for StillImageDevices {
  type Error = StillImageError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(StillImageError::SchemeMismatch);
    }

    let path = url.path();
    if path.is_empty() || path == "/" {
      return Err(StillImageError::EmptyPath);
    }

    Ok(StillImageDevices {
      path: path.to_string(),
    })
  }
}

impl MediaDevices for StillImageDevices {
  fn acquire(&self, constraints: &CameraConstraints) -> Result<Box<dyn VideoSource>, CameraError> {
    if constraints.facing == FacingMode::Exact(Facing::User) {
      return Err(CameraError::NotFound("静态图像只作为后置摄像头".to_string()));
    }

    let image = ImageReader::open(&self.path)
      .map_err(|e| CameraError::Acquire(format!("{}: {}", self.path, e)))?
      .decode()?
      .to_rgb8();
    info!(
      "已加载静态图像 {}: {}x{}",
      self.path,
      image.width(),
      image.height()
    );

    Ok(Box::new(StillImageSource::new(image)))
  }
}

pub struct StillImageSource {
  image: Option<RgbImage>,
}

impl StillImageSource {
  pub fn new(image: RgbImage) -> Self {
    Self { image: Some(image) }
  }
}

impl VideoSource for StillImageSource {
  fn ready_state(&self) -> ReadyState {
    match &self.image {
      Some(_) => ReadyState::HaveEnoughData,
      None => ReadyState::HaveNothing,
    }
  }

  fn video_size(&self) -> Option<(u32, u32)> {
    self.image.as_ref().map(RgbImage::dimensions)
  }

  fn capabilities(&self) -> Option<Capabilities> {
    None
  }

  fn apply_constraints(&mut self, width: u32, height: u32) -> Result<(), CameraError> {
    Err(CameraError::Constraints {
      width,
      height,
      reason: "静态图像尺寸固定".to_string(),
    })
  }

  fn current_frame(&mut self) -> Option<RgbImage> {
    self.image.clone()
  }

  fn stop(&mut self) {
    self.image = None;
  }
}
