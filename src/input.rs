// 该文件是 Guanlan （观澜） 项目的一部分。
// src/input.rs - 视频帧提取
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

use std::path::Path;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

mod ffmpeg_capture;
mod image_sequence;

pub use self::ffmpeg_capture::FfmpegCapture;
pub use self::image_sequence::ImageSequence;

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("无法打开视频: {0}")]
  Open(String),
  #[error("读取帧失败: {0}")]
  Read(String),
  #[error("帧尺寸不一致: 期望 {expected:?}, 实际 {actual:?}")]
  Dimension {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 逐单元读取的视频源
pub trait VideoCapture {
  /// 读取下一帧
  ///
  /// `Ok(None)` 表示流结束，`Err` 表示读取失败；两者都结束提取。
  fn read(&mut self) -> Result<Option<RgbImage>, DecodeError>;

  /// 源帧率（如果已知）
  fn fps(&self) -> Option<f64> {
    None
  }
}

impl<C: VideoCapture + ?Sized> VideoCapture for Box<C> {
  fn read(&mut self) -> Result<Option<RgbImage>, DecodeError> {
    (**self).read()
  }

  fn fps(&self) -> Option<f64> {
    (**self).fps()
  }
}

/// 惰性、有限、不可重启的帧序列
///
/// 帧索引从 0 开始且没有空洞；读取失败时直接结束，不会产生额外的帧。
pub struct FrameExtractor<C> {
  capture: C,
  next_index: u64,
  dimensions: Option<(u32, u32)>,
  finished: bool,
  last_error: Option<DecodeError>,
}

impl<C: VideoCapture> FrameExtractor<C> {
  pub fn new(capture: C) -> Self {
    Self {
      capture,
      next_index: 0,
      dimensions: None,
      finished: false,
      last_error: None,
    }
  }

  pub fn fps(&self) -> Option<f64> {
    self.capture.fps()
  }

  /// 第一帧确定的尺寸
  pub fn dimensions(&self) -> Option<(u32, u32)> {
    self.dimensions
  }

  /// 导致提取结束的读取错误（如有）
  pub fn last_error(&self) -> Option<&DecodeError> {
    self.last_error.as_ref()
  }

  fn finish(&mut self, error: Option<DecodeError>) {
    self.finished = true;
    if let Some(e) = error {
      warn!("第 {} 帧读取失败，结束提取: {}", self.next_index, e);
      self.last_error = Some(e);
    } else {
      debug!("视频流结束，共 {} 帧", self.next_index);
    }
  }
}

impl<C: VideoCapture> Iterator for FrameExtractor<C> {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    let image = match self.capture.read() {
      Ok(Some(image)) => image,
      Ok(None) => {
        self.finish(None);
        return None;
      }
      Err(e) => {
        self.finish(Some(e));
        return None;
      }
    };

    let actual = image.dimensions();
    match self.dimensions {
      None => self.dimensions = Some(actual),
      Some(expected) if expected != actual => {
        self.finish(Some(DecodeError::Dimension { expected, actual }));
        return None;
      }
      Some(_) => {}
    }

    let frame = Frame::new(self.next_index, image);
    self.next_index += 1;
    Some(frame)
  }
}

impl<C: VideoCapture> std::iter::FusedIterator for FrameExtractor<C> {}

/// 打开视频文件并返回其帧序列
pub fn extract(path: impl AsRef<Path>) -> Result<FrameExtractor<FfmpegCapture>, DecodeError> {
  Ok(FrameExtractor::new(FfmpegCapture::open(path)?))
}

pub enum InputWrapper {
  Video(FfmpegCapture),
  Frames(ImageSequence),
}

impl FromUrl for InputWrapper {
  type Error = DecodeError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      FfmpegCapture::SCHEME => Ok(InputWrapper::Video(FfmpegCapture::from_url(url)?)),
      ImageSequence::SCHEME => Ok(InputWrapper::Frames(ImageSequence::from_url(url)?)),
      _ => Err(DecodeError::SchemeMismatch),
    }
  }
}

impl VideoCapture for InputWrapper {
  fn read(&mut self) -> Result<Option<RgbImage>, DecodeError> {
    match self {
      InputWrapper::Video(capture) => capture.read(),
      InputWrapper::Frames(capture) => capture.read(),
    }
  }

  fn fps(&self) -> Option<f64> {
    match self {
      InputWrapper::Video(capture) => capture.fps(),
      InputWrapper::Frames(capture) => capture.fps(),
    }
  }
}
