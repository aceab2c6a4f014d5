// 该文件是 Guanlan （观澜） 项目的一部分。
// src/output/assembler.rs - 视频帧按序组装
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use tracing::{debug, error, info, warn};

use super::{AssembleError, FrameSink, SaveVideoFileOutput, VideoFileSink};
use crate::frame::Frame;

/// 把已标注帧按序写入输出，尺寸由打开时确定
///
/// `finalize` 可重复调用；未显式调用时在 `Drop` 中完成。
pub struct VideoAssembler<S: FrameSink> {
  sink: Option<S>,
  width: u32,
  height: u32,
  fps: f64,
  last_index: Option<u64>,
  appended: u64,
}

impl VideoAssembler<VideoFileSink> {
  /// 打开视频文件输出
  pub fn open(
    output_path: impl AsRef<Path>,
    fps: f64,
    width: u32,
    height: u32,
  ) -> Result<Self, AssembleError> {
    let sink = SaveVideoFileOutput::new(output_path.as_ref()).open(width, height, fps)?;
    Ok(Self::with_sink(sink, fps, width, height))
  }
}

impl<S: FrameSink> VideoAssembler<S> {
  pub fn with_sink(sink: S, fps: f64, width: u32, height: u32) -> Self {
    debug!("打开输出: {}x{} @ {} fps", width, height, fps);
    Self {
      sink: Some(sink),
      width,
      height,
      fps,
      last_index: None,
      appended: 0,
    }
  }

  pub fn dimensions(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  pub fn fps(&self) -> f64 {
    self.fps
  }

  pub fn appended(&self) -> u64 {
    self.appended
  }

  pub fn is_finalized(&self) -> bool {
    self.sink.is_none()
  }

  /// 追加一帧，帧号必须严格递增且尺寸一致
  pub fn append(&mut self, frame: &Frame) -> Result<(), AssembleError> {
    let sink = self.sink.as_mut().ok_or(AssembleError::Finalized)?;

    if frame.dimensions() != (self.width, self.height) {
      return Err(AssembleError::DimensionMismatch {
        expected: (self.width, self.height),
        actual: frame.dimensions(),
      });
    }

    if let Some(previous) = self.last_index
      && frame.index() <= previous
    {
      return Err(AssembleError::OutOfOrder {
        previous,
        index: frame.index(),
      });
    }

    sink.write_frame(frame.index(), frame.image())?;
    self.last_index = Some(frame.index());
    self.appended += 1;
    Ok(())
  }

  /// 刷新并释放写入端，再次调用不做任何事
  pub fn finalize(&mut self) -> Result<(), AssembleError> {
    match self.sink.take() {
      Some(mut sink) => {
        info!("完成输出: 共 {} 帧", self.appended);
        sink.finish()
      }
      None => Ok(()),
    }
  }

  /// 放弃输出并释放写入端，之后的 `finalize` 不做任何事
  pub fn abort(&mut self) -> Result<(), AssembleError> {
    match self.sink.take() {
      Some(mut sink) => {
        warn!("放弃输出: 已写入 {} 帧", self.appended);
        sink.abort()
      }
      None => Ok(()),
    }
  }
}

impl<S: FrameSink> Drop for VideoAssembler<S> {
  fn drop(&mut self) {
    if let Err(e) = self.finalize() {
      error!("完成输出时出错: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use image::RgbImage;

  use super::*;
  use crate::output::testing::MemorySink;

  fn frame(index: u64, width: u32, height: u32) -> Frame {
    Frame::new(index, RgbImage::new(width, height))
  }

  #[test]
  fn appends_in_order() {
    let sink = MemorySink::default();
    let recorded = sink.recorded.clone();
    let mut assembler = VideoAssembler::with_sink(sink, 1.0, 4, 4);

    for i in 0..3 {
      assembler.append(&frame(i, 4, 4)).unwrap();
    }
    assembler.finalize().unwrap();

    let indices: Vec<_> = recorded.borrow().frames.iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, [0, 1, 2]);
    assert_eq!(assembler.appended(), 3);
  }

  #[test]
  fn rejects_wrong_dimensions() {
    let mut assembler = VideoAssembler::with_sink(MemorySink::default(), 1.0, 4, 4);

    let err = assembler.append(&frame(0, 4, 5));

    assert!(matches!(
      err,
      Err(AssembleError::DimensionMismatch {
        expected: (4, 4),
        actual: (4, 5)
      })
    ));
    assert_eq!(assembler.appended(), 0);
  }

  #[test]
  fn rejects_repeated_or_decreasing_index() {
    let mut assembler = VideoAssembler::with_sink(MemorySink::default(), 1.0, 2, 2);
    assembler.append(&frame(1, 2, 2)).unwrap();

    assert!(matches!(
      assembler.append(&frame(1, 2, 2)),
      Err(AssembleError::OutOfOrder {
        previous: 1,
        index: 1
      })
    ));
    assert!(matches!(
      assembler.append(&frame(0, 2, 2)),
      Err(AssembleError::OutOfOrder { .. })
    ));
  }

  #[test]
  fn finalize_is_idempotent() {
    let sink = MemorySink::default();
    let recorded = sink.recorded.clone();
    let mut assembler = VideoAssembler::with_sink(sink, 1.0, 2, 2);
    assembler.append(&frame(0, 2, 2)).unwrap();

    assembler.finalize().unwrap();
    assembler.finalize().unwrap();
    drop(assembler);

    assert_eq!(recorded.borrow().finish_calls, 1);
    assert_eq!(recorded.borrow().frames.len(), 1);
  }

  #[test]
  fn append_after_finalize_fails() {
    let mut assembler = VideoAssembler::with_sink(MemorySink::default(), 1.0, 2, 2);
    assembler.finalize().unwrap();

    assert!(matches!(
      assembler.append(&frame(0, 2, 2)),
      Err(AssembleError::Finalized)
    ));
    assert!(assembler.is_finalized());
  }

  #[test]
  fn abort_discards_and_skips_finish() {
    let sink = MemorySink::default();
    let recorded = sink.recorded.clone();
    let mut assembler = VideoAssembler::with_sink(sink, 1.0, 2, 2);
    assembler.append(&frame(0, 2, 2)).unwrap();

    assembler.abort().unwrap();
    assembler.finalize().unwrap();
    drop(assembler);

    let recorded = recorded.borrow();
    assert_eq!(recorded.abort_calls, 1);
    assert_eq!(recorded.finish_calls, 0);
    assert!(recorded.frames.is_empty());
  }

  #[test]
  fn dropping_finalizes_after_failed_write() {
    let sink = MemorySink {
      fail_at: Some(1),
      ..MemorySink::default()
    };
    let recorded = sink.recorded.clone();

    {
      let mut assembler = VideoAssembler::with_sink(sink, 1.0, 2, 2);
      assembler.append(&frame(0, 2, 2)).unwrap();
      assert!(assembler.append(&frame(1, 2, 2)).is_err());
    }

    assert_eq!(recorded.borrow().finish_calls, 1);
  }

  #[test]
  fn open_rejects_invalid_geometry_before_starting_encoder() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("video").join("out.avi");

    for (fps, width, height) in [(1.0, 0, 0), (0.0, 4, 4), (1000.0, 4, 4)] {
      assert!(matches!(
        VideoAssembler::open(&target, fps, width, height),
        Err(AssembleError::ValidationError(_))
      ));
    }
    // 校验先于创建目录与启动 ffmpeg
    assert!(!target.parent().unwrap().exists());
  }
}
