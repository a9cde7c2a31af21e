// 该文件是 Platecam （车牌相机） 项目的一部分。
// src/input.rs - 摄像头输入
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

use image::RgbImage;
use thiserror::Error;

use crate::FromUrl;

#[cfg(feature = "read_image_file")]
mod still_image;
#[cfg(feature = "read_image_file")]
pub use self::still_image::{StillImageDevices, StillImageError, StillImageSource};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_camera;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_camera::{GStreamerCamera, GStreamerCameraError, GStreamerVideoSource};

pub const IDEAL_WIDTH: u32 = 1920;
pub const IDEAL_HEIGHT: u32 = 1080;

/// 视频源就绪程度，只有 `HaveEnoughData` 时才采集
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
  HaveNothing,
  HaveMetadata,
  HaveEnoughData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
  /// 后置摄像头
  Environment,
  /// 前置摄像头
  User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
  Exact(Facing),
  Ideal(Facing),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraConstraints {
  pub facing: FacingMode,
  pub ideal_width: u32,
  pub ideal_height: u32,
}

impl CameraConstraints {
  /// 严格约束：必须是后置摄像头
  pub fn strict() -> Self {
    Self {
      facing: FacingMode::Exact(Facing::Environment),
      ideal_width: IDEAL_WIDTH,
      ideal_height: IDEAL_HEIGHT,
    }
  }

  /// 宽松约束：优先后置摄像头
  pub fn relaxed() -> Self {
    Self {
      facing: FacingMode::Ideal(Facing::Environment),
      ..Self::strict()
    }
  }
}

/// 设备能力上限，未知的维度为 `None`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
  pub max_width: Option<u32>,
  pub max_height: Option<u32>,
}

#[derive(Error, Debug)]
pub enum CameraError {
  #[error("不支持摄像头接口")]
  Unsupported,
  #[error("没有满足约束的摄像头: {0}")]
  NotFound(String),
  #[error("无法打开摄像头: {0}")]
  Acquire(String),
  #[error("无法应用约束 {width}x{height}: {reason}")]
  Constraints {
    width: u32,
    height: u32,
    reason: String,
  },
  #[cfg(feature = "read_image_file")]
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gstreamer::glib::Error),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 状态切换错误: {0}")]
  StateChangeError(#[from] gstreamer::StateChangeError),
}

/// 已获取的视频流
pub trait VideoSource {
  fn ready_state(&self) -> ReadyState;

  /// 当前协商出的视频尺寸
  fn video_size(&self) -> Option<(u32, u32)>;

  fn capabilities(&self) -> Option<Capabilities>;

  fn apply_constraints(&mut self, width: u32, height: u32) -> Result<(), CameraError>;

  /// 最新一帧，没有可用帧时返回 `None`
  fn current_frame(&mut self) -> Option<RgbImage>;

  /// 释放底层摄像头
  fn stop(&mut self);
}

/// 摄像头获取入口
pub trait MediaDevices {
  fn acquire(&self, constraints: &CameraConstraints) -> Result<Box<dyn VideoSource>, CameraError>;
}

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerCameraError),
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  StillImageError(#[from] StillImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

#[cfg(not(any(feature = "gstreamer_input", feature = "read_image_file")))]
compile_error!("至少需要启用一种摄像头来源: gstreamer_input 或 read_image_file");

pub enum MediaDevicesWrapper {
  #[cfg(feature = "gstreamer_input")]
  GStreamer(GStreamerCamera),
  #[cfg(feature = "read_image_file")]
  StillImage(StillImageDevices),
}

impl FromUrl for MediaDevicesWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "gstreamer_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == GStreamerCamera::SCHEME {
        return Ok(MediaDevicesWrapper::GStreamer(GStreamerCamera::from_url(url)?));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == StillImageDevices::SCHEME {
        return Ok(MediaDevicesWrapper::StillImage(StillImageDevices::from_url(url)?));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl MediaDevices for MediaDevicesWrapper {
  fn acquire(&self, constraints: &CameraConstraints) -> Result<Box<dyn VideoSource>, CameraError> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      MediaDevicesWrapper::GStreamer(devices) => devices.acquire(constraints),
      #[cfg(feature = "read_image_file")]
      MediaDevicesWrapper::StillImage(devices) => devices.acquire(constraints),
    }
  }
}
