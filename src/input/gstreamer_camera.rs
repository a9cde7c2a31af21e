// 该文件是 Platecam （车牌相机） 项目的一部分。
// src/input/gstreamer_camera.rs - GStreamer 摄像头
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

//! # GStreamer 摄像头
//!
//! 通过 GStreamer 管道获取摄像头画面：
//!
//! ```text
//! <source> ! capsfilter name=size ! videoconvert [! videoflip] ! video/x-raw,format=RGB ! appsink
//! ```
//!
//! 地址格式为 `gst://camera/dev/video0?io-mode=2&rotate=90`，其中路径是后置摄像头设备。
//!
//! - 严格约束（`FacingMode::Exact`）只接受该设备
//! - 宽松约束（`FacingMode::Ideal`）优先该设备，设备不存在时退回 `autovideosrc`
//!
//! 两种约束都不固定分辨率，获取后由 [`VideoSource::apply_constraints`] 提升。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::collections::HashMap;
use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use super::{
  CameraConstraints, CameraError, Capabilities, Facing, FacingMode, MediaDevices, ReadyState,
  VideoSource,
};
use crate::{FromUrl, FromUrlWithScheme};

const FALLBACK_SOURCE: &str = "autovideosrc name=src";
const PREROLL_TIMEOUT_SECS: u64 = 5;
const CONSTRAINT_TIMEOUT_SECS: u64 = 3;

#[derive(Error, Debug)]
pub enum GStreamerCameraError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("不支持的 GStreamer 摄像头地址: {0}")]
  UnsupportedHost(String),
}

/// 后置摄像头的 GStreamer 描述
pub struct GStreamerCamera {
  device: String,
  io_mode: Option<u32>,
  rotate: Option<u32>,
}

impl FromUrlWithScheme for GStreamerCamera {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerCamera {
  type Error = GStreamerCameraError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerCameraError::SchemeMismatch);
    }

    match url.host_str() {
      Some("camera") => {}
      other => {
        return Err(GStreamerCameraError::UnsupportedHost(
          other.unwrap_or_default().to_string(),
        ));
      }
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    Ok(GStreamerCamera {
      device: url.path().to_string(),
      io_mode: query.get("io-mode").and_then(|v| v.parse::<u32>().ok()),
      rotate: query.get("rotate").and_then(|v| v.parse::<u32>().ok()),
    })
  }
}

impl GStreamerCamera {
  fn device_source(&self) -> String {
    let io_mode = self
      .io_mode
      .map(|mode| format!(" io-mode={}", mode))
      .unwrap_or_default();
    format!("v4l2src name=src device={}{}", self.device, io_mode)
  }

  fn video_flip(&self) -> Option<String> {
    let (method, direction) = match self.rotate? {
      90 => (1, 1),
      180 => (2, 2),
      270 => (3, 3),
      _ => return None,
    };
    Some(format!(
      "videoflip method={} video-direction={}",
      method, direction
    ))
  }

  fn pipeline_description(&self, constraints: &CameraConstraints) -> Result<String, CameraError> {
    let device_present = Path::new(&self.device).exists();

    // 理想分辨率只是期望值，由控制器获取后再按设备能力提升
    let source = match constraints.facing {
      FacingMode::Exact(Facing::Environment) => {
        if !device_present {
          return Err(CameraError::NotFound(self.device.clone()));
        }
        self.device_source()
      }
      FacingMode::Exact(Facing::User) => {
        return Err(CameraError::NotFound("没有配置前置摄像头".to_string()));
      }
      FacingMode::Ideal(_) => {
        if device_present {
          self.device_source()
        } else {
          warn!("设备 {} 不存在，改用 {}", self.device, FALLBACK_SOURCE);
          FALLBACK_SOURCE.to_string()
        }
      }
    };

    let mut items = vec![
      source,
      "capsfilter name=size caps=video/x-raw".to_string(),
      "videoconvert".to_string(),
    ];
    if let Some(flip) = self.video_flip() {
      items.push(flip);
    }
    items.push("video/x-raw,format=RGB".to_string());
    items.push("appsink name=sink max-buffers=1 drop=true sync=false".to_string());

    Ok(items.join(" ! "))
  }
}

impl MediaDevices for GStreamerCamera {
  fn acquire(&self, constraints: &CameraConstraints) -> Result<Box<dyn VideoSource>, CameraError> {
    gst::init()?;

    let description = self.pipeline_description(constraints)?;
    info!("GStreamer pipeline description: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| CameraError::Acquire("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or_else(|| CameraError::Acquire("Failed to get appsink element".to_string()))?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| CameraError::Acquire("Failed to convert element to appsink".to_string()))?;
    let capsfilter = pipeline
      .by_name("size")
      .ok_or_else(|| CameraError::Acquire("Failed to get capsfilter element".to_string()))?;
    let source = pipeline
      .by_name("src")
      .ok_or_else(|| CameraError::Acquire("Failed to get source element".to_string()))?;

    pipeline.set_state(gst::State::Playing)?;
    let (result, _, _) = pipeline.state(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_SECS));
    if let Err(e) = result {
      let _ = pipeline.set_state(gst::State::Null);
      return Err(e.into());
    }

    Ok(Box::new(GStreamerVideoSource {
      pipeline,
      appsink,
      capsfilter,
      source,
      last_frame: None,
      stopped: false,
    }))
  }
}

/// 运行中的 GStreamer 摄像头
pub struct GStreamerVideoSource {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  capsfilter: gst::Element,
  source: gst::Element,
  last_frame: Option<RgbImage>,
  stopped: bool,
}

impl Drop for GStreamerVideoSource {
  fn drop(&mut self) {
    self.stop();
  }
}

impl GStreamerVideoSource {
  fn negotiated_size(&self) -> Option<(u32, u32)> {
    let caps = self.appsink.static_pad("sink")?.current_caps()?;
    let info = gst_video::VideoInfo::from_caps(&caps).ok()?;
    Some((info.width(), info.height()))
  }

  fn store_sample(&mut self, sample: &gst::Sample) -> bool {
    match convert_sample_to_rgb(sample) {
      Ok(image) => {
        self.last_frame = Some(image);
        true
      }
      Err(e) => {
        error!("Failed to fetch sample: {}", e);
        false
      }
    }
  }
}

fn max_dimension(structure: &gst::StructureRef, field: &str) -> Option<u32> {
  structure.value(field).ok().and_then(|value| value_max(value))
}

/// caps 字段的最大值，支持固定值、范围与离散列表
fn value_max(value: &gst::glib::Value) -> Option<u32> {
  if let Ok(fixed) = value.get::<i32>() {
    return Some(fixed.max(0) as u32);
  }
  if let Ok(range) = value.get::<gst::IntRange<i32>>() {
    return Some(range.max().max(0) as u32);
  }
  if let Ok(list) = value.get::<gst::List>() {
    return list.iter().filter_map(|entry| value_max(entry)).max();
  }
  None
}

impl VideoSource for GStreamerVideoSource {
  fn ready_state(&self) -> ReadyState {
    if self.stopped {
      return ReadyState::HaveNothing;
    }
    match self.negotiated_size() {
      Some(_) if self.pipeline.current_state() == gst::State::Playing => ReadyState::HaveEnoughData,
      Some(_) => ReadyState::HaveMetadata,
      None => ReadyState::HaveNothing,
    }
  }

  fn video_size(&self) -> Option<(u32, u32)> {
    self.negotiated_size()
  }

  fn capabilities(&self) -> Option<Capabilities> {
    let caps = self.source.static_pad("src")?.query_caps(None);
    let mut capabilities = Capabilities::default();
    for structure in caps.iter() {
      capabilities.max_width = capabilities.max_width.max(max_dimension(structure, "width"));
      capabilities.max_height = capabilities.max_height.max(max_dimension(structure, "height"));
    }
    Some(capabilities)
  }

  fn apply_constraints(&mut self, width: u32, height: u32) -> Result<(), CameraError> {
    let previous = self.capsfilter.property::<gst::Caps>("caps");
    let caps = gst::Caps::builder("video/x-raw")
      .field("width", width as i32)
      .field("height", height as i32)
      .build();
    self.capsfilter.set_property("caps", &caps);

    // 新约束下能拉到正确尺寸的帧才算成功，否则恢复原约束
    let sample = self
      .appsink
      .try_pull_sample(gst::ClockTime::from_seconds(CONSTRAINT_TIMEOUT_SECS));
    if let Some(sample) = sample
      && self.store_sample(&sample)
      && self.negotiated_size() == Some((width, height))
    {
      return Ok(());
    }

    self.capsfilter.set_property("caps", &previous);
    Err(CameraError::Constraints {
      width,
      height,
      reason: "摄像头未能在新分辨率下输出画面".to_string(),
    })
  }

  fn current_frame(&mut self) -> Option<RgbImage> {
    if self.stopped {
      return None;
    }
    if let Some(sample) = self.appsink.try_pull_sample(gst::ClockTime::ZERO) {
      self.store_sample(&sample);
    }
    self.last_frame.clone()
  }

  fn stop(&mut self) {
    if self.stopped {
      return;
    }
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
    self.last_frame = None;
    self.stopped = true;
    info!("摄像头已释放");
  }
}

fn convert_sample_to_rgb(sample: &gst::Sample) -> Result<RgbImage, CameraError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| CameraError::Acquire("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| CameraError::Acquire("No caps in sample".to_string()))?;

  let video_info = gst_video::VideoInfo::from_caps(caps)
    .map_err(|_| CameraError::Acquire("Failed to get video info from caps".to_string()))?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer
    .map_readable()
    .map_err(|e| CameraError::Acquire(format!("Failed to map buffer for reading: {}", e)))?;
  let data = map.as_slice();

  let row_bytes = width * 3;
  if stride < row_bytes || data.len() < stride * (height.saturating_sub(1)) + row_bytes {
    return Err(CameraError::Acquire(format!(
      "Buffer size mismatch: {} bytes for {}x{} stride {}",
      data.len(),
      width,
      height,
      stride
    )));
  }

  let mut pixels = Vec::with_capacity(row_bytes * height);
  for row in 0..height {
    let line = &data[row * stride..row * stride + row_bytes];
    match video_info.format() {
      gst_video::VideoFormat::Rgb => pixels.extend_from_slice(line),
      gst_video::VideoFormat::Bgr => {
        for px in line.chunks_exact(3) {
          pixels.extend_from_slice(&[px[2], px[1], px[0]]);
        }
      }
      _ => return Err(CameraError::Acquire("Unsupported video format".to_string())),
    }
  }

  RgbImage::from_raw(width as u32, height as u32, pixels)
    .ok_or_else(|| CameraError::Acquire("无法创建 RGB 图像".to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn camera(url: &str) -> GStreamerCamera {
    GStreamerCamera::from_url(&Url::parse(url).unwrap()).unwrap()
  }

  #[test]
  fn url_selects_device_and_options() {
    let cam = camera("gst://camera/dev/video2?io-mode=2&rotate=90");
    assert_eq!(cam.device, "/dev/video2");
    assert_eq!(cam.io_mode, Some(2));
    assert_eq!(cam.rotate, Some(90));
    assert_eq!(cam.device_source(), "v4l2src name=src device=/dev/video2 io-mode=2");
    assert_eq!(
      cam.video_flip().as_deref(),
      Some("videoflip method=1 video-direction=1")
    );
  }

  #[test]
  fn other_hosts_are_rejected() {
    let url = Url::parse("gst://file/tmp/video.mp4").unwrap();
    assert!(matches!(
      GStreamerCamera::from_url(&url),
      Err(GStreamerCameraError::UnsupportedHost(_))
    ));
  }

  #[test]
  fn strict_requires_rear_device() {
    let cam = camera("gst://camera/dev/platecam-missing");
    assert!(matches!(
      cam.pipeline_description(&CameraConstraints::strict()),
      Err(CameraError::NotFound(_))
    ));
  }

  #[test]
  fn relaxed_falls_back_to_auto_source() {
    let cam = camera("gst://camera/dev/platecam-missing");
    let description = cam.pipeline_description(&CameraConstraints::relaxed()).unwrap();
    assert!(description.starts_with("autovideosrc name=src ! capsfilter name=size"));
    assert!(description.ends_with("appsink name=sink max-buffers=1 drop=true sync=false"));
  }

  #[test]
  fn strict_pins_device_but_not_size() {
    let cam = camera("gst://camera/dev/null");
    let description = cam.pipeline_description(&CameraConstraints::strict()).unwrap();
    assert!(description.starts_with("v4l2src name=src device=/dev/null ! capsfilter name=size caps=video/x-raw !"));
    assert!(!description.contains("width="));
  }

  #[test]
  fn capability_maxima_from_lists_and_ranges() {
    gst::init().unwrap();
    let structure = gst::Structure::builder("video/x-raw")
      .field("width", gst::List::new([640i32, 1920, 1280]))
      .field("height", gst::IntRange::new(240i32, 1080))
      .field("framerate", gst::Fraction::new(30, 1))
      .build();

    assert_eq!(max_dimension(&structure, "width"), Some(1920));
    assert_eq!(max_dimension(&structure, "height"), Some(1080));
    assert_eq!(max_dimension(&structure, "framerate"), None);
    assert_eq!(max_dimension(&structure, "depth"), None);
  }
}
