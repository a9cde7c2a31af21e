// 该文件是 Platecam （车牌相机） 项目的一部分。
// src/config.rs - 命令行参数配置
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

use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::Args;
use thiserror::Error;
use url::Url;

use crate::capture::CaptureConfig;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
  #[error("尺寸格式应为 WxH: {0}")]
  InvalidSize(String),
  #[error("尺寸不能为 0: {0}")]
  ZeroSize(String),
}

/// 显示尺寸，格式 `WxH`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplaySize {
  pub width: u32,
  pub height: u32,
}

impl FromStr for DisplaySize {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (w, h) = s
      .trim()
      .split_once(['x', 'X'])
      .ok_or_else(|| ConfigError::InvalidSize(s.to_string()))?;
    let width = w
      .parse::<u32>()
      .map_err(|_| ConfigError::InvalidSize(s.to_string()))?;
    let height = h
      .parse::<u32>()
      .map_err(|_| ConfigError::InvalidSize(s.to_string()))?;
    if width == 0 || height == 0 {
      return Err(ConfigError::ZeroSize(s.to_string()));
    }
    Ok(Self { width, height })
  }
}

/// 检测服务与推流参数，由各个可执行文件展开使用
#[derive(Args, Debug, Clone)]
pub struct StreamArgs {
  /// 检测服务地址，例如 http://192.168.1.10:8000
  #[arg(long, value_name = "URL")]
  pub api_base: Url,

  /// 推流标识，随预览帧一起上传
  #[arg(long, default_value = "mobile-1", value_name = "ID")]
  pub stream_id: String,

  /// 采集周期（毫秒）
  #[arg(long, default_value_t = 1000, value_name = "MS",
        value_parser = clap::value_parser!(u64).range(1..))]
  pub capture_interval_ms: u64,

  /// 每 N 帧做一次检测
  #[arg(long, default_value_t = 2, value_name = "N",
        value_parser = clap::value_parser!(u64).range(1..))]
  pub detect_every_nth: u64,

  /// 上传帧的目标宽度，高度按比例缩放
  #[arg(long, default_value_t = 640, value_name = "PIXELS")]
  pub target_width: u32,

  /// JPEG 质量 (1 - 100)
  #[arg(long, default_value_t = 70, value_name = "QUALITY",
        value_parser = clap::value_parser!(u8).range(1..=100))]
  pub jpeg_quality: u8,

  /// 请求超时（毫秒，0 表示不限制）
  #[arg(long, default_value_t = 10_000, value_name = "MS")]
  pub request_timeout_ms: u64,

  /// 覆盖层显示尺寸，默认与视频尺寸一致
  #[arg(long, value_name = "WxH")]
  pub display_size: Option<DisplaySize>,

  /// 标签字体文件，默认使用系统 DejaVu Sans
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
}

impl StreamArgs {
  pub fn capture_config(&self) -> CaptureConfig {
    CaptureConfig {
      interval: Duration::from_millis(self.capture_interval_ms),
      detect_every_nth: self.detect_every_nth,
      target_width: self.target_width,
      jpeg_quality: self.jpeg_quality,
      stream_id: self.stream_id.clone(),
    }
  }

  pub fn request_timeout(&self) -> Option<Duration> {
    match self.request_timeout_ms {
      0 => None,
      ms => Some(Duration::from_millis(ms)),
    }
  }
}
