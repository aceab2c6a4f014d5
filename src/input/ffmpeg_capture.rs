// 该文件是 Guanlan （观澜） 项目的一部分。
// src/input/ffmpeg_capture.rs - 基于 ffmpeg 命令行的视频解码
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 视频输入模块
//!
//! 先用 `ffprobe` 读取视频流的宽高与帧率，再让 `ffmpeg` 把解码后的
//! RGB24 原始帧写到管道中，每次读取一帧大小的数据。
//!
//! # URL 格式
//!
//! - `video:///path/to/input.mp4`
//!
//! # 依赖
//!
//! 此模块需要系统安装 ffmpeg 与 ffprobe 命令行工具。

use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use image::RgbImage;
use serde::Deserialize;
use tracing::{debug, error, info};
use url::Url;

use super::{DecodeError, VideoCapture};
use crate::{FromUrl, FromUrlWithScheme, frame::RGB_CHANNELS, process::StderrDrain};

#[derive(Debug, Deserialize)]
struct ProbeOutput {
  #[serde(default)]
  streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
  width: u32,
  height: u32,
  #[serde(default)]
  avg_frame_rate: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct StreamInfo {
  width: u32,
  height: u32,
  fps: Option<f64>,
}

/// 解析 "30000/1001" 形式的帧率
fn parse_rate(rate: &str) -> Option<f64> {
  let (num, den) = rate.split_once('/')?;
  let num: f64 = num.trim().parse().ok()?;
  let den: f64 = den.trim().parse().ok()?;
  if den > 0.0 && num > 0.0 {
    Some(num / den)
  } else {
    None
  }
}

fn parse_probe(json: &[u8]) -> Result<StreamInfo, DecodeError> {
  let output: ProbeOutput = serde_json::from_slice(json)
    .map_err(|e| DecodeError::Open(format!("ffprobe 输出无法解析: {}", e)))?;
  let stream = output
    .streams
    .into_iter()
    .next()
    .ok_or_else(|| DecodeError::Open("找不到视频流".to_string()))?;

  if stream.width == 0 || stream.height == 0 {
    return Err(DecodeError::Open(format!(
      "视频尺寸无效: {}x{}",
      stream.width, stream.height
    )));
  }

  Ok(StreamInfo {
    width: stream.width,
    height: stream.height,
    fps: stream.avg_frame_rate.as_deref().and_then(parse_rate),
  })
}

fn probe(path: &Path) -> Result<StreamInfo, DecodeError> {
  let output = Command::new("ffprobe")
    .args(["-v", "error", "-select_streams", "v:0"])
    .args(["-show_entries", "stream=width,height,avg_frame_rate"])
    .args(["-of", "json"])
    .arg(path)
    .output()
    .map_err(|e| DecodeError::Open(format!("无法执行 ffprobe (请确保已安装): {}", e)))?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    error!("ffprobe 错误: {}", stderr);
    return Err(DecodeError::Open(format!(
      "{}: {}",
      path.display(),
      stderr.trim()
    )));
  }

  parse_probe(&output.stdout)
}

/// ffmpeg 解码命令
///
/// 关闭自动旋转，输出帧保持 ffprobe 报告的编码尺寸。
fn decode_command(path: &Path) -> Command {
  let mut command = Command::new("ffmpeg");
  command
    .args(["-v", "error", "-nostdin", "-noautorotate", "-i"])
    .arg(path)
    .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"]);
  command
}

/// ffmpeg 解码管道
pub struct FfmpegCapture {
  path: PathBuf,
  child: Child,
  stdout: BufReader<ChildStdout>,
  stderr: StderrDrain,
  info: StreamInfo,
}

impl FromUrlWithScheme for FfmpegCapture {
  const SCHEME: &'static str = "video";
}

impl FromUrl for FfmpegCapture {
  type Error = DecodeError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DecodeError::SchemeMismatch);
    }
    Self::open(url.path())
  }
}

impl FfmpegCapture {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, DecodeError> {
    let path = path.as_ref();
    if !path.is_file() {
      return Err(DecodeError::Open(format!("文件不存在: {}", path.display())));
    }

    let info = probe(path)?;
    info!(
      "视频已打开: {} ({}x{}, {:?} fps)",
      path.display(),
      info.width,
      info.height,
      info.fps
    );

    Self::spawn(path, info, decode_command(path))
  }

  fn spawn(path: &Path, info: StreamInfo, mut command: Command) -> Result<Self, DecodeError> {
    let mut child = command
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| DecodeError::Open(format!("无法执行 ffmpeg (请确保已安装): {}", e)))?;

    let stderr = StderrDrain::spawn(child.stderr.take());
    let stdout = child
      .stdout
      .take()
      .ok_or_else(|| DecodeError::Open("无法获取 ffmpeg 输出管道".to_string()))?;

    Ok(Self {
      path: path.to_path_buf(),
      child,
      stdout: BufReader::new(stdout),
      stderr,
      info,
    })
  }

  fn frame_size(&self) -> usize {
    self.info.width as usize * self.info.height as usize * RGB_CHANNELS
  }

  /// 管道关闭后检查解码进程是否正常退出
  fn end_of_stream(&mut self) -> Result<Option<RgbImage>, DecodeError> {
    let status = self.child.wait()?;
    if status.success() {
      return Ok(None);
    }

    let stderr = self.stderr.collect();
    error!("ffmpeg 解码失败 ({}): {}", status, stderr);
    Err(DecodeError::Read(format!(
      "{}: ffmpeg 异常退出 ({}): {}",
      self.path.display(),
      status,
      stderr
    )))
  }
}

impl VideoCapture for FfmpegCapture {
  fn read(&mut self) -> Result<Option<RgbImage>, DecodeError> {
    let mut buffer = vec![0u8; self.frame_size()];
    match self.stdout.read_exact(&mut buffer) {
      Ok(()) => RgbImage::from_raw(self.info.width, self.info.height, buffer)
        .map(Some)
        .ok_or_else(|| DecodeError::Read("无法创建 RGB 图像".to_string())),
      // 不完整的尾帧丢弃，是否出错由进程退出状态决定
      Err(e) if e.kind() == ErrorKind::UnexpectedEof => self.end_of_stream(),
      Err(e) => Err(e.into()),
    }
  }

  fn fps(&self) -> Option<f64> {
    self.info.fps
  }
}

impl Drop for FfmpegCapture {
  fn drop(&mut self) {
    // 提前结束时 ffmpeg 可能仍在写入
    let _ = self.child.kill();
    let _ = self.child.wait();
    self.stderr.collect();
    debug!("解码进程已回收: {}", self.path.display());
  }
}
