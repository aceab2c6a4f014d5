// 该文件是 Guanlan （观澜） 项目的一部分。
// src/output.rs - 输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::RgbImage;
use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

pub mod assembler;
pub mod draw;

mod save_video_file;
pub use self::save_video_file::{SaveVideoFileOutput, VideoFileSink};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::DirectoryRecordOutput;

pub use self::assembler::VideoAssembler;
pub use self::draw::{Annotator, ColorMap, ColorRule};

#[derive(Error, Debug)]
pub enum AssembleError {
  #[error("帧尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  DimensionMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("帧顺序错误: 第 {index} 帧在第 {previous} 帧之后追加")]
  OutOfOrder { previous: u64, index: u64 },
  #[error("输出已完成，不能继续追加")]
  Finalized,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("视频编码错误: {0}")]
  EncodingError(String),
  #[error("参数验证错误: {0}")]
  ValidationError(String),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 按帧序接收已标注帧的写入端
pub trait FrameSink {
  fn write_frame(&mut self, index: u64, image: &RgbImage) -> Result<(), AssembleError>;

  /// 刷新并释放底层资源，只会被调用一次
  fn finish(&mut self) -> Result<(), AssembleError>;

  /// 放弃已写入的内容并释放底层资源，与 `finish` 二者只调用其一
  fn abort(&mut self) -> Result<(), AssembleError> {
    self.finish()
  }
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
  fn write_frame(&mut self, index: u64, image: &RgbImage) -> Result<(), AssembleError> {
    (**self).write_frame(index, image)
  }

  fn finish(&mut self) -> Result<(), AssembleError> {
    (**self).finish()
  }

  fn abort(&mut self) -> Result<(), AssembleError> {
    (**self).abort()
  }
}

/// 由 URL 选择的输出目标，尺寸确定后再打开
pub enum OutputWrapper {
  SaveVideoFile(SaveVideoFileOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecord(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = AssembleError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      SaveVideoFileOutput::SCHEME => Ok(OutputWrapper::SaveVideoFile(
        SaveVideoFileOutput::from_url(url)?,
      )),
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => Ok(OutputWrapper::DirectoryRecord(
        DirectoryRecordOutput::from_url(url)?,
      )),
      _ => Err(AssembleError::SchemeMismatch),
    }
  }
}

/// 在第一帧确定尺寸后打开的输出
pub trait OpenOutput {
  type Sink: FrameSink;

  /// 输出端显式指定的帧率
  fn fps(&self) -> Option<f64>;

  fn open(self, width: u32, height: u32, fps: f64) -> Result<Self::Sink, AssembleError>;
}

impl OutputWrapper {
  pub fn location(&self) -> String {
    match self {
      OutputWrapper::SaveVideoFile(output) => output.path().display().to_string(),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecord(output) => output.directory().display().to_string(),
    }
  }
}

impl OpenOutput for OutputWrapper {
  type Sink = Box<dyn FrameSink>;

  fn fps(&self) -> Option<f64> {
    match self {
      OutputWrapper::SaveVideoFile(output) => output.fps(),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecord(_) => None,
    }
  }

  fn open(self, width: u32, height: u32, fps: f64) -> Result<Self::Sink, AssembleError> {
    match self {
      OutputWrapper::SaveVideoFile(output) => Ok(Box::new(output.open(width, height, fps)?)),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecord(output) => Ok(Box::new(output)),
    }
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn selects_output_by_scheme() {
    let url = Url::parse("video:///tmp/out.avi?fps=2").unwrap();
    let output = OutputWrapper::from_url(&url).unwrap();
    assert_eq!(output.fps(), Some(2.0));
    assert_eq!(output.location(), "/tmp/out.avi");

    let url = Url::parse("rtsp://host/stream").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Err(AssembleError::SchemeMismatch)
    ));
  }

  #[cfg(feature = "directory_record")]
  #[test]
  fn folder_output_has_no_frame_rate() {
    let url = Url::parse("folder:///tmp/frames").unwrap();
    let output = OutputWrapper::from_url(&url).unwrap();
    assert_eq!(output.fps(), None);
    assert_eq!(output.location(), "/tmp/frames");
  }
}
