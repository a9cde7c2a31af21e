// 该文件是 Platecam （车牌相机） 项目的一部分。
// src/bin/stream_camera.rs - 摄像头推流与车牌检测
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

use std::{
  io::{self, BufRead},
  sync::Arc,
  thread,
  time::Duration,
};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use platecam::{
  FromUrl,
  capture::{ControlEvent, LoopEvent},
  config::StreamArgs,
  controller::Controller,
  detection::HttpDetectClient,
  input::MediaDevicesWrapper,
  overlay::draw::Draw,
};

/// 摄像头推流参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 摄像头来源
  /// 支持格式:
  /// - GStreamer: gst://camera/dev/video0?io-mode=2&rotate=90
  /// - 静态图片: image:///path/to/frame.jpg
  #[arg(long, value_name = "SOURCE", default_value = "gst://camera/dev/video0")]
  pub camera: Url,

  #[command(flatten)]
  pub stream: StreamArgs,

  /// 启动后不立即推流，等待 `s` 命令
  #[arg(long)]
  pub paused: bool,
}

fn spawn_stdin_listener(events: std::sync::mpsc::Sender<LoopEvent>) -> Result<()> {
  thread::Builder::new()
    .name("platecam-stdin".to_string())
    .spawn(move || {
      for line in io::stdin().lock().lines() {
        let Ok(line) = line else {
          break;
        };
        if line.trim().is_empty() {
          continue;
        }
        match line.parse::<ControlEvent>() {
          Ok(event) => {
            if events.send(LoopEvent::Control(event)).is_err() {
              break;
            }
          }
          Err(e) => warn!("{}（可用命令: s / r WxH / q）", e),
        }
      }
    })?;
  Ok(())
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("摄像头来源: {}", args.camera);
  info!("检测服务地址: {}", args.stream.api_base);
  info!("推流标识: {}", args.stream.stream_id);

  let devices = MediaDevicesWrapper::from_url(&args.camera)?;
  let client = HttpDetectClient::new(&args.stream.api_base, args.stream.request_timeout())?;
  let draw = Draw::load(args.stream.font.as_deref());

  let mut controller = Controller::new(
    Some(Box::new(devices)),
    Arc::new(client),
    args.stream.capture_config(),
    draw,
  );
  if let Some(size) = args.stream.display_size {
    controller.set_display_size(Some((size.width, size.height)));
  }

  controller.setup()?;
  info!("{}", controller.session().status);

  let interrupt = controller.sender();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = interrupt.send(LoopEvent::Control(ControlEvent::Shutdown));
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;
  spawn_stdin_listener(controller.sender())?;

  if !args.paused {
    controller.toggle_streaming();
  }

  controller.run();
  controller.teardown();

  let session = controller.session();
  info!(
    "已退出: {}，最近焦点车牌 {:?}，检测数 {:?}",
    session.status, session.last_focus_plate, session.last_detection_count
  );

  Ok(())
}
