// 该文件是 Guanlan （观澜） 项目的一部分。
// src/task.rs - 视频标注任务
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

use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  detector::{DetectParams, detect, filter_detections},
  frame::Frame,
  input::{DecodeError, FrameExtractor, VideoCapture},
  model::{EngineError, InferenceEngine, Metadata},
  output::{AssembleError, FrameSink, OpenOutput, VideoAssembler, draw::Annotator, draw::DrawError},
};

pub const DEFAULT_FPS: f64 = 25.0;

pub trait Task<I, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, output: O) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("解码错误: {0}")]
  DecodeError(#[from] DecodeError),
  #[error("推理引擎错误: {0}")]
  InferenceEngineError(#[from] EngineError),
  #[error("输出错误: {0}")]
  AssembleError(#[from] AssembleError),
  #[error("绘制错误: {0}")]
  DrawError(#[from] DrawError),
  #[error("没有提取到任何帧")]
  EmptyInputError,
  #[error("任务已在 {0:?} 状态，不能重新运行")]
  NotIdle(PipelineState),
}

/// 任务状态
///
/// `Idle → Extracting → (Detecting → Filtering → Annotating → Appending)* → Finalizing → Done`，
/// 任何失败直接进入 `Failed`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
  Idle,
  Extracting,
  Detecting(u64),
  Filtering(u64),
  Annotating(u64),
  Appending(u64),
  Finalizing,
  Done,
  Failed,
}

impl PipelineState {
  pub fn is_terminal(self) -> bool {
    matches!(self, PipelineState::Done | PipelineState::Failed)
  }

  /// 状态机允许的转移
  pub fn can_transition(self, next: PipelineState) -> bool {
    use PipelineState::*;
    match (self, next) {
      (Done | Failed, _) => false,
      (_, Failed) => true,
      (Idle, Extracting) => true,
      (Extracting, Detecting(0)) => true,
      (Extracting, Finalizing) => true,
      (Detecting(a), Filtering(b)) | (Filtering(a), Annotating(b)) | (Annotating(a), Appending(b)) => {
        a == b
      }
      (Appending(a), Detecting(b)) => b > a,
      (Appending(_), Finalizing) => true,
      (Finalizing, Done) => true,
      _ => false,
    }
  }
}

/// 处理结果统计
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
  pub frames: u64,
  pub detections: usize,
  pub width: u32,
  pub height: u32,
  pub fps: f64,
}

/// 单线程顺序流水线：提取全部帧，再逐帧检测、过滤、绘制、追加
pub struct Pipeline<'a, E> {
  engine: &'a E,
  metadata: &'a Metadata,
  params: DetectParams,
  annotator: Annotator,
  default_fps: f64,
  state: PipelineState,
}

impl<'a, E: InferenceEngine> Pipeline<'a, E> {
  pub fn new(engine: &'a E, metadata: &'a Metadata) -> Self {
    Self {
      engine,
      metadata,
      params: DetectParams::default(),
      annotator: Annotator::default(),
      default_fps: DEFAULT_FPS,
      state: PipelineState::Idle,
    }
  }

  pub fn with_params(mut self, params: DetectParams) -> Self {
    self.params = params;
    self
  }

  pub fn with_annotator(mut self, annotator: Annotator) -> Self {
    self.annotator = annotator;
    self
  }

  /// 输入与输出都没有帧率时使用
  pub fn with_default_fps(mut self, fps: f64) -> Self {
    self.default_fps = fps;
    self
  }

  pub fn state(&self) -> PipelineState {
    self.state
  }

  fn transition(&mut self, next: PipelineState) {
    debug_assert!(
      self.state.can_transition(next),
      "非法状态转移: {:?} -> {:?}",
      self.state,
      next
    );
    debug!("状态转移: {:?} -> {:?}", self.state, next);
    self.state = next;
  }

  pub fn run<C, O>(
    &mut self,
    input: FrameExtractor<C>,
    output: O,
  ) -> Result<Summary, PipelineError>
  where
    C: VideoCapture,
    O: OpenOutput,
  {
    if self.state != PipelineState::Idle {
      return Err(PipelineError::NotIdle(self.state));
    }

    match self.execute(input, output) {
      Ok(summary) => {
        self.transition(PipelineState::Done);
        Ok(summary)
      }
      Err(e) => {
        error!("任务失败于 {:?}: {}", self.state, e);
        self.transition(PipelineState::Failed);
        Err(e)
      }
    }
  }

  fn execute<C, O>(
    &mut self,
    mut input: FrameExtractor<C>,
    output: O,
  ) -> Result<Summary, PipelineError>
  where
    C: VideoCapture,
    O: OpenOutput,
  {
    self.transition(PipelineState::Extracting);
    let now = Instant::now();
    let frames: Vec<Frame> = input.by_ref().collect();
    if let Some(e) = input.last_error() {
      warn!("提取在 {} 帧后结束: {}", frames.len(), e);
    }
    info!("提取完成: {} 帧，耗时 {:.2?}", frames.len(), now.elapsed());

    let (width, height) = frames
      .first()
      .map(Frame::dimensions)
      .ok_or(PipelineError::EmptyInputError)?;
    let fps = output
      .fps()
      .or(input.fps())
      .filter(|fps| *fps > 0.0)
      .unwrap_or(self.default_fps);

    let mut assembler = VideoAssembler::with_sink(output.open(width, height, fps)?, fps, width, height);

    let total = match self.process(frames, &mut assembler) {
      Ok(total) => total,
      Err(e) => {
        // 不提交部分输出
        if let Err(abort) = assembler.abort() {
          warn!("放弃输出时出错: {}", abort);
        }
        return Err(e);
      }
    };

    self.transition(PipelineState::Finalizing);
    assembler.finalize()?;

    Ok(Summary {
      frames: assembler.appended(),
      detections: total,
      width,
      height,
      fps,
    })
  }

  /// 逐帧检测、过滤、绘制并追加，返回检测总数
  fn process<S: FrameSink>(
    &mut self,
    frames: Vec<Frame>,
    assembler: &mut VideoAssembler<S>,
  ) -> Result<usize, PipelineError> {
    let mut total = 0;
    for mut frame in frames {
      let index = frame.index();
      let now = Instant::now();

      self.transition(PipelineState::Detecting(index));
      let detections = detect(self.engine, self.metadata, &frame, &self.params)?;

      self.transition(PipelineState::Filtering(index));
      let detections = filter_detections(detections, self.params.threshold);

      self.transition(PipelineState::Annotating(index));
      self.annotator.annotate(&mut frame, &detections)?;

      self.transition(PipelineState::Appending(index));
      assembler.append(&frame)?;

      total += detections.len();
      info!(
        "帧 {}: {} 个对象，耗时 {:.2?}",
        index,
        detections.len(),
        now.elapsed()
      );
      for det in &detections {
        debug!(
          "  - {}: {:.2}% at ({:.0}, {:.0}, {:.0}x{:.0})",
          det.label,
          det.confidence * 100.0,
          det.bbox.cx,
          det.bbox.cy,
          det.bbox.width,
          det.bbox.height
        );
      }
    }
    Ok(total)
  }
}

impl<'a, E, C, O> Task<FrameExtractor<C>, O> for Pipeline<'a, E>
where
  E: InferenceEngine,
  C: VideoCapture,
  O: OpenOutput,
{
  type Output = Summary;
  type Error = PipelineError;

  fn run_task(mut self, input: FrameExtractor<C>, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let summary = self.run(input, output)?;
    info!(
      "任务完成: {} 帧, {} 个检测, {}x{} @ {} fps",
      summary.frames, summary.detections, summary.width, summary.height, summary.fps
    );
    Ok(summary)
  }
}
