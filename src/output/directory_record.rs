// 该文件是 Guanlan （观澜） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::{debug, info, warn};

use super::{AssembleError, FrameSink};
use crate::{FromUrl, FromUrlWithScheme};

/// 每帧保存为一张 PNG，文件名按帧号排列
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  written: Vec<PathBuf>,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = AssembleError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(AssembleError::SchemeMismatch);
    }
    Ok(Self::new(uri.path()))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      written: Vec::new(),
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn frame_path(&self, index: u64) -> PathBuf {
    self.directory.join(format!("frame_{:06}.png", index))
  }
}

impl FrameSink for DirectoryRecordOutput {
  fn write_frame(&mut self, index: u64, image: &RgbImage) -> Result<(), AssembleError> {
    if self.written.is_empty() {
      std::fs::create_dir_all(&self.directory)?;
    }
    let path = self.frame_path(index);
    image.save(&path)?;
    debug!("保存帧: {}", path.display());
    self.written.push(path);
    Ok(())
  }

  fn finish(&mut self) -> Result<(), AssembleError> {
    info!(
      "已保存 {} 帧到目录: {}",
      self.written.len(),
      self.directory.display()
    );
    Ok(())
  }

  fn abort(&mut self) -> Result<(), AssembleError> {
    warn!("删除已保存的 {} 帧: {}", self.written.len(), self.directory.display());
    for path in self.written.drain(..) {
      std::fs::remove_file(path)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use image::Rgb;

  use super::*;
  use crate::{frame::Frame, output::VideoAssembler};

  #[test]
  fn frames_are_saved_by_index() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("annotated");
    let mut assembler = VideoAssembler::with_sink(DirectoryRecordOutput::new(&target), 1.0, 3, 2);

    for i in 0..2u8 {
      let image = RgbImage::from_pixel(3, 2, Rgb([i * 100, 0, 0]));
      assembler.append(&Frame::new(i as u64, image)).unwrap();
    }
    assembler.finalize().unwrap();

    let second = image::open(target.join("frame_000001.png")).unwrap().to_rgb8();
    assert_eq!(*second.get_pixel(0, 0), Rgb([100, 0, 0]));
    assert!(target.join("frame_000000.png").is_file());
    assert!(!target.join("frame_000002.png").exists());
  }

  #[test]
  fn abort_removes_saved_frames() {
    let dir = tempfile::tempdir().unwrap();
    let mut output = DirectoryRecordOutput::new(dir.path());
    output.write_frame(0, &RgbImage::new(2, 2)).unwrap();
    assert!(output.frame_path(0).is_file());

    output.abort().unwrap();

    assert!(!output.frame_path(0).exists());
  }
}
