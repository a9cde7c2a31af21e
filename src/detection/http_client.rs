// 该文件是 Platecam （车牌相机） 项目的一部分。
// src/detection/http_client.rs - 基于 HTTP 的检测服务客户端
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

use std::time::Duration;

use reqwest::blocking::{
  Client,
  multipart::{Form, Part},
};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{DetectClient, DetectError, DetectionResult, parse_detect_response};

const DETECT_PATH: &str = "detect";
const PREVIEW_PATH: &str = "stream-frame";

// 服务端（FastAPI）约定的上传字段
pub(super) const DETECT_UPLOAD_FIELD: &str = "file";
pub(super) const DETECT_FILE_NAME: &str = "frame.jpg";
const PREVIEW_UPLOAD_FIELD: &str = "frame";
const PREVIEW_FILE_NAME: &str = "stream.jpg";
const STREAM_ID_FIELD: &str = "stream_id";

#[derive(Deserialize, Debug, Default)]
struct PreviewAck {
  success: Option<bool>,
}

/// 拼接 `{base}/{path}`，保留 base 中已有的路径前缀
pub(super) fn endpoint(base: &Url, path: &str) -> Result<Url, DetectError> {
  let joined = format!("{}/{}", base.as_str().trim_end_matches('/'), path);
  Ok(Url::parse(&joined)?)
}

pub(super) fn build_client(timeout: Option<Duration>) -> Result<Client, DetectError> {
  let mut builder = Client::builder();
  if let Some(timeout) = timeout {
    builder = builder.timeout(timeout);
  }
  Ok(builder.build()?)
}

pub(super) fn jpeg_part(jpeg: Vec<u8>, file_name: &'static str) -> Result<Part, DetectError> {
  Ok(Part::bytes(jpeg).file_name(file_name).mime_str("image/jpeg")?)
}

/// 发送表单，非 2xx 状态转为 [`DetectError::Status`]
pub(super) fn post_form(client: &Client, url: Url, form: Form) -> Result<Vec<u8>, DetectError> {
  debug!("POST {}", url);
  let response = client.post(url).multipart(form).send()?;
  let status = response.status();
  if !status.is_success() {
    return Err(DetectError::Status {
      status: status.as_u16(),
      body: response.text().unwrap_or_default(),
    });
  }
  Ok(response.bytes()?.to_vec())
}

/// 组合检测服务客户端（车辆 + 车牌）
pub struct HttpDetectClient {
  client: Client,
  detect_url: Url,
  preview_url: Url,
}

impl HttpDetectClient {
  /// `timeout` 为 `None` 时请求不设超时
  pub fn new(base: &Url, timeout: Option<Duration>) -> Result<Self, DetectError> {
    Ok(Self {
      client: build_client(timeout)?,
      detect_url: endpoint(base, DETECT_PATH)?,
      preview_url: endpoint(base, PREVIEW_PATH)?,
    })
  }
}

impl DetectClient for HttpDetectClient {
  fn send_frame(&self, jpeg: Vec<u8>, stream_id: &str) -> Result<DetectionResult, DetectError> {
    let form = Form::new().part(DETECT_UPLOAD_FIELD, jpeg_part(jpeg, DETECT_FILE_NAME)?);
    let body = post_form(&self.client, self.detect_url.clone(), form)?;
    Ok(parse_detect_response(&body, stream_id)?)
  }

  fn send_preview_frame(&self, jpeg: Vec<u8>, stream_id: &str) -> Result<bool, DetectError> {
    let form = Form::new()
      .part(PREVIEW_UPLOAD_FIELD, jpeg_part(jpeg, PREVIEW_FILE_NAME)?)
      .text(STREAM_ID_FIELD, stream_id.to_string());
    let body = post_form(&self.client, self.preview_url.clone(), form)?;
    let ack: PreviewAck = serde_json::from_slice(&body)?;
    Ok(ack.success.unwrap_or(false))
  }
}
