// 该文件是 Guanlan （观澜） 项目的一部分。
// src/output/save_video_file.rs - 保存视频文件
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 视频文件输出模块
//!
//! 已标注的帧以 RGB24 原始数据写入 `ffmpeg` 的标准输入，由 ffmpeg 封装为视频文件。
//! 默认编码为 `rawvideo`（不压缩）。
//!
//! # URL 格式
//!
//! - `video:///path/to/output.avi` - 帧率跟随输入视频
//! - `video:///path/to/output.avi?fps=1` - 指定帧率
//! - `video:///path/to/output.mp4?codec=libx264` - 指定编码器
//!
//! # 依赖
//!
//! 此模块需要系统安装 ffmpeg 命令行工具来编码视频。

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use image::RgbImage;
use tracing::{error, info, warn};
use url::Url;

use super::{AssembleError, FrameSink};
use crate::{FromUrl, FromUrlWithScheme, process::StderrDrain};

const DEFAULT_CODEC: &str = "rawvideo";
const MIN_FPS: f64 = 0.1;
const MAX_FPS: f64 = 240.0;

fn validate_fps(fps: f64) -> Result<f64, AssembleError> {
  if !(MIN_FPS..=MAX_FPS).contains(&fps) {
    return Err(AssembleError::ValidationError(format!(
      "FPS {} 超出有效范围 [{}, {}]",
      fps, MIN_FPS, MAX_FPS
    )));
  }
  Ok(fps)
}

/// 视频文件输出配置
#[derive(Debug, Clone, PartialEq)]
pub struct SaveVideoFileOutput {
  path: PathBuf,
  fps: Option<f64>,
  codec: String,
}

impl FromUrlWithScheme for SaveVideoFileOutput {
  const SCHEME: &'static str = "video";
}

impl FromUrl for SaveVideoFileOutput {
  type Error = AssembleError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(AssembleError::SchemeMismatch);
    }

    // 从 URL 查询参数中获取 FPS（如果有的话）
    let fps = match uri.query_pairs().find(|(k, _)| k == "fps") {
      Some((_, v)) => Some(validate_fps(v.parse::<f64>().map_err(|_| {
        AssembleError::ValidationError(format!("FPS 不是数字: {}", v))
      })?)?),
      None => None,
    };

    let codec = uri
      .query_pairs()
      .find(|(k, _)| k == "codec")
      .map(|(_, v)| v.to_string())
      .unwrap_or_else(|| DEFAULT_CODEC.to_string());

    Ok(SaveVideoFileOutput {
      path: PathBuf::from(uri.path()),
      fps,
      codec,
    })
  }
}

impl SaveVideoFileOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      fps: None,
      codec: DEFAULT_CODEC.to_string(),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn fps(&self) -> Option<f64> {
    self.fps
  }

  pub fn codec(&self) -> &str {
    &self.codec
  }

  fn command(&self, width: u32, height: u32, fps: f64) -> Command {
    let mut command = Command::new("ffmpeg");
    command
      .arg("-y") // 覆盖已存在的文件
      .args(["-loglevel", "error"])
      .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
      .arg("-s")
      .arg(format!("{}x{}", width, height))
      .arg("-framerate")
      .arg(fps.to_string())
      .args(["-i", "pipe:0"])
      .arg("-c:v")
      .arg(&self.codec);
    if self.codec == "libx264" {
      command.args(["-pix_fmt", "yuv420p"]);
    }
    command.arg(&self.path);
    command
  }

  /// 启动编码进程
  pub fn open(&self, width: u32, height: u32, fps: f64) -> Result<VideoFileSink, AssembleError> {
    let fps = validate_fps(fps)?;
    if width == 0 || height == 0 {
      return Err(AssembleError::ValidationError(format!(
        "视频尺寸无效: {}x{}",
        width, height
      )));
    }

    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let sink = VideoFileSink::spawn(self.path.clone(), self.command(width, height, fps))?;
    info!(
      "开始编码视频: {}x{} @ {} fps ({}) -> {}",
      width,
      height,
      fps,
      self.codec,
      self.path.display()
    );
    Ok(sink)
  }
}

/// 正在运行的 ffmpeg 编码进程
pub struct VideoFileSink {
  path: PathBuf,
  stdin: Option<ChildStdin>,
  child: Option<Child>,
  stderr: StderrDrain,
}

impl FrameSink for VideoFileSink {
  fn write_frame(&mut self, index: u64, image: &RgbImage) -> Result<(), AssembleError> {
    let stdin = self
      .stdin
      .as_mut()
      .ok_or_else(|| AssembleError::EncodingError("编码进程已关闭".to_string()))?;
    stdin.write_all(image.as_raw()).map_err(|e| {
      AssembleError::EncodingError(format!("写入第 {} 帧失败: {}", index, e))
    })
  }

  fn finish(&mut self) -> Result<(), AssembleError> {
    // 关闭输入管道，ffmpeg 随后写入文件尾并退出
    drop(self.stdin.take());

    let Some(mut child) = self.child.take() else {
      return Ok(());
    };
    let status = child.wait()?;
    let stderr = self.stderr.collect();
    if status.success() {
      info!("视频编码成功: {}", self.path.display());
      return Ok(());
    }

    error!("ffmpeg 错误 ({}): {}", status, stderr);
    // 编码失败的文件不保留
    if let Err(e) = self.remove_output() {
      warn!("无法删除未完成的视频: {}", e);
    }
    Err(AssembleError::EncodingError(format!(
      "ffmpeg 失败 ({}): {}",
      status, stderr
    )))
  }

  fn abort(&mut self) -> Result<(), AssembleError> {
    self.kill();
    self.remove_output()
  }
}

impl VideoFileSink {
  fn spawn(path: PathBuf, mut command: Command) -> Result<Self, AssembleError> {
    let mut child = command
      .stdin(Stdio::piped())
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| {
        error!("无法执行 ffmpeg: {}", e);
        AssembleError::EncodingError(format!("无法执行 ffmpeg (请确保已安装): {}", e))
      })?;

    let stderr = StderrDrain::spawn(child.stderr.take());
    let Some(stdin) = child.stdin.take() else {
      let _ = child.kill();
      let _ = child.wait();
      return Err(AssembleError::EncodingError(
        "无法获取 ffmpeg 输入管道".to_string(),
      ));
    };

    Ok(Self {
      path,
      stdin: Some(stdin),
      child: Some(child),
      stderr,
    })
  }

  fn kill(&mut self) {
    drop(self.stdin.take());
    if let Some(mut child) = self.child.take() {
      let _ = child.kill();
      let _ = child.wait();
    }
    self.stderr.collect();
  }

  fn remove_output(&self) -> Result<(), AssembleError> {
    match std::fs::remove_file(&self.path) {
      Ok(()) => {
        warn!("已删除未完成的视频: {}", self.path.display());
        Ok(())
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }
}

impl Drop for VideoFileSink {
  fn drop(&mut self) {
    if self.child.is_some() {
      warn!("编码进程未正常结束，终止: {}", self.path.display());
      self.kill();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_fps_and_codec_from_url() {
    let url = Url::parse("video:///out/video.mp4?fps=30&codec=libx264").unwrap();

    let output = SaveVideoFileOutput::from_url(&url).unwrap();

    assert_eq!(output.path(), Path::new("/out/video.mp4"));
    assert_eq!(output.fps(), Some(30.0));
    assert_eq!(output.codec(), "libx264");
  }

  #[test]
  fn defaults_to_uncompressed_without_fps() {
    let url = Url::parse("video:///out/video.avi").unwrap();

    let output = SaveVideoFileOutput::from_url(&url).unwrap();

    assert_eq!(output.fps(), None);
    assert_eq!(output.codec(), DEFAULT_CODEC);
  }

  #[test]
  fn rejects_out_of_range_fps() {
    for query in ["fps=0", "fps=1000", "fps=fast"] {
      let url = Url::parse(&format!("video:///out.avi?{}", query)).unwrap();
      assert!(matches!(
        SaveVideoFileOutput::from_url(&url),
        Err(AssembleError::ValidationError(_))
      ));
    }
  }

  #[test]
  fn x264_output_uses_yuv420p() {
    let output = SaveVideoFileOutput {
      codec: "libx264".to_string(),
      ..SaveVideoFileOutput::new("/tmp/out.mp4")
    };

    let command = output.command(64, 48, 25.0);
    let args: Vec<_> = command
      .get_args()
      .map(|a| a.to_string_lossy().into_owned())
      .collect();

    assert!(args.windows(2).any(|w| w == ["-s", "64x48"]));
    assert!(args.windows(2).any(|w| w == ["-pix_fmt", "yuv420p"]));
    assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));
  }

  fn scripted(path: PathBuf, script: &str) -> VideoFileSink {
    let mut command = Command::new("sh");
    command.args(["-c", script]);
    VideoFileSink::spawn(path, command).unwrap()
  }

  #[test]
  fn failed_encode_removes_partial_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.avi");
    std::fs::write(&path, b"partial").unwrap();
    let mut sink = scripted(
      path.clone(),
      "cat > /dev/null; echo 'encoder broke' >&2; exit 1",
    );
    sink.write_frame(0, &RgbImage::new(4, 2)).unwrap();

    match sink.finish() {
      Err(AssembleError::EncodingError(msg)) => assert!(msg.contains("encoder broke"), "{}", msg),
      other => panic!("期望编码错误, 实际 {:?}", other),
    }
    assert!(!path.exists());
  }

  #[test]
  fn successful_encode_keeps_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.avi");
    std::fs::write(&path, b"video").unwrap();
    let mut sink = scripted(path.clone(), "cat > /dev/null");
    sink.write_frame(0, &RgbImage::new(4, 2)).unwrap();

    sink.finish().unwrap();

    assert!(path.is_file());
  }

  #[test]
  fn chatty_encoder_does_not_block_writes() {
    let dir = tempfile::tempdir().unwrap();
    // 远超管道缓冲的错误输出
    let mut sink = scripted(
      dir.path().join("out.avi"),
      "head -c 1000000 /dev/zero >&2; cat > /dev/null",
    );

    for i in 0..8 {
      sink.write_frame(i, &RgbImage::new(64, 64)).unwrap();
    }
    sink.finish().unwrap();
  }
}
