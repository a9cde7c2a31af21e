// 该文件是 Platecam （车牌相机） 项目的一部分。
// src/bin/detect_oneshot.rs - 单张图片检测
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

use std::{path::PathBuf, time::Instant};

use anyhow::Result;
use clap::Parser;
use image::ImageReader;
use tracing::info;
use url::Url;

use platecam::{
  config::StreamArgs,
  detection::{DetectClient, HttpDetectClient, VehicleDetectClient},
  frame::RasterBuffer,
  overlay::{Overlay, draw::Draw},
};

/// 单张图片检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图片路径
  #[arg(long, value_name = "FILE")]
  pub input: PathBuf,

  #[command(flatten)]
  pub stream: StreamArgs,

  /// 车辆检测服务地址，默认与 --api-base 相同
  #[arg(long, value_name = "URL")]
  pub vehicle_api_base: Option<Url>,

  /// 只调用车辆检测服务
  #[arg(long)]
  pub vehicle_only: bool,

  /// 叠加检测结果后的图片输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入图片: {}", args.input.display());
  info!("检测服务地址: {}", args.stream.api_base);

  let image = ImageReader::open(&args.input)?.decode()?.to_rgb8();
  let raw = RasterBuffer::capture(&image, args.stream.target_width)?;
  let jpeg = raw.encode_jpeg(args.stream.jpeg_quality)?;
  info!("上传帧尺寸: {}x{}, {} 字节", raw.width(), raw.height(), jpeg.len());

  let now = Instant::now();
  let result = if args.vehicle_only {
    let base = args
      .vehicle_api_base
      .as_ref()
      .unwrap_or(&args.stream.api_base);
    let client = VehicleDetectClient::new(base, args.stream.request_timeout())?;
    let response = client.send_vehicle_frame(jpeg)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    response.to_detection_result(&args.stream.stream_id)
  } else {
    let client = HttpDetectClient::new(&args.stream.api_base, args.stream.request_timeout())?;
    let result = client.send_frame(jpeg, &args.stream.stream_id)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    result
  };
  info!(
    "检测完成，耗时: {:.2?}，车牌 {} 个，车辆 {} 辆",
    now.elapsed(),
    result.detection_count(),
    result.vehicles.len()
  );

  if let Some(output) = args.output.as_ref() {
    let mut overlay = Overlay::new(Draw::load(args.stream.font.as_deref()));
    overlay.resize(raw.width(), raw.height());
    overlay.set_result(result);
    RasterBuffer::composite(&raw, overlay.canvas()).save(output)?;
    info!("结果图片已保存: {}", output.display());
  }

  Ok(())
}
