// 该文件是 Guanlan （观澜） 项目的一部分。
// src/input/image_sequence.rs - 图像序列输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::{debug, info};
use url::Url;

use super::{DecodeError, VideoCapture};
use crate::{FromUrl, FromUrlWithScheme};

const FRAME_PREFIX: &str = "frame";
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// 从 `frame<N>.jpg` 文件名中解析帧号
fn frame_number(path: &Path) -> Option<u64> {
  let ext = path.extension()?.to_str()?.to_lowercase();
  if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
    return None;
  }
  path
    .file_stem()?
    .to_str()?
    .strip_prefix(FRAME_PREFIX)?
    .trim_start_matches('_')
    .parse()
    .ok()
}

/// 按帧号排序的图像目录，作为逐帧视频源
pub struct ImageSequence {
  pending: VecDeque<PathBuf>,
  fps: Option<f64>,
}

impl FromUrlWithScheme for ImageSequence {
  const SCHEME: &'static str = "frames";
}

impl FromUrl for ImageSequence {
  type Error = DecodeError;

  /// `frames:///path/to/dir?fps=25`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DecodeError::SchemeMismatch);
    }
    let fps = url
      .query_pairs()
      .find(|(k, _)| k == "fps")
      .and_then(|(_, v)| v.parse::<f64>().ok());

    Ok(Self::open(url.path())?.with_fps(fps))
  }
}

impl ImageSequence {
  pub fn open(directory: impl AsRef<Path>) -> Result<Self, DecodeError> {
    let directory = directory.as_ref();
    if !directory.is_dir() {
      return Err(DecodeError::Open(format!(
        "目录不存在: {}",
        directory.display()
      )));
    }

    let mut frames = Vec::new();
    for entry in std::fs::read_dir(directory)? {
      let path = entry?.path();
      if let Some(n) = frame_number(&path) {
        frames.push((n, path));
      }
    }
    frames.sort_by_key(|(n, _)| *n);

    info!(
      "图像序列已打开: {} ({} 帧)",
      directory.display(),
      frames.len()
    );
    Ok(Self {
      pending: frames.into_iter().map(|(_, path)| path).collect(),
      fps: None,
    })
  }

  pub fn with_fps(mut self, fps: Option<f64>) -> Self {
    self.fps = fps;
    self
  }
}

impl VideoCapture for ImageSequence {
  fn read(&mut self) -> Result<Option<RgbImage>, DecodeError> {
    let Some(path) = self.pending.pop_front() else {
      return Ok(None);
    };
    debug!("读取帧图像: {}", path.display());
    Ok(Some(image::open(&path)?.to_rgb8()))
  }

  fn fps(&self) -> Option<f64> {
    self.fps
  }
}
