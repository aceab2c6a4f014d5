// 该文件是 Guanlan （观澜） 项目的一部分。
// src/model/testing.rs - 测试用推理引擎桩
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::cell::Cell;
use std::rc::Rc;

use image::RgbImage;

use super::{CenterBox, EngineError, InferenceEngine, Metadata, RawDetections};

pub const STUB_CLASSES: [&str; 5] = ["person", "bicycle", "car", "truck", "traffic light"];

pub fn stub_metadata() -> Metadata {
  Metadata::new(STUB_CLASSES.iter().map(|s| s.to_string()).collect())
}

/// 构造只在 `label` 所属类别上有概率的原始检测
pub fn raw(label: &str, confidence: f32, bbox: (f32, f32, f32, f32)) -> (CenterBox, Vec<f32>) {
  let mut probs = vec![0.0; STUB_CLASSES.len()];
  let class_id = STUB_CLASSES
    .iter()
    .position(|c| *c == label)
    .unwrap_or_else(|| panic!("未知类别: {}", label));
  probs[class_id] = confidence;
  (CenterBox::new(bbox.0, bbox.1, bbox.2, bbox.3), probs)
}

#[derive(Debug, Default)]
pub struct Counters {
  pub submitted: Cell<usize>,
  pub predicted: Cell<usize>,
  pub suppressed: Cell<usize>,
  pub images_released: Cell<usize>,
  pub boxes_released: Cell<usize>,
}

fn bump(cell: &Cell<usize>) {
  cell.set(cell.get() + 1);
}

pub struct StubImage {
  frame: usize,
  counters: Rc<Counters>,
}

impl Drop for StubImage {
  fn drop(&mut self) {
    bump(&self.counters.images_released);
  }
}

pub struct StubBoxes {
  entries: Vec<(CenterBox, Vec<f32>)>,
  counters: Rc<Counters>,
}

impl RawDetections for StubBoxes {
  fn len(&self) -> usize {
    self.entries.len()
  }

  fn bbox(&self, index: usize) -> CenterBox {
    self.entries[index].0
  }

  fn probabilities(&self, index: usize) -> &[f32] {
    &self.entries[index].1
  }
}

impl Drop for StubBoxes {
  fn drop(&mut self) {
    bump(&self.counters.boxes_released);
  }
}

/// 按提交顺序回放预设检测结果的引擎
pub struct StubEngine {
  script: Vec<Vec<(CenterBox, Vec<f32>)>>,
  scores: Vec<f32>,
  fail_boxes_at: Option<usize>,
  pub counters: Rc<Counters>,
}

impl StubEngine {
  pub fn new(script: Vec<Vec<(CenterBox, Vec<f32>)>>) -> Self {
    Self {
      script,
      scores: vec![0.0; STUB_CLASSES.len()],
      fail_boxes_at: None,
      counters: Rc::default(),
    }
  }

  pub fn with_scores(mut self, scores: Vec<f32>) -> Self {
    self.scores = scores;
    self
  }

  pub fn failing_boxes_at(mut self, frame: usize) -> Self {
    self.fail_boxes_at = Some(frame);
    self
  }
}

impl InferenceEngine for StubEngine {
  type Image = StubImage;
  type Boxes = StubBoxes;

  fn submit(&self, _image: &RgbImage) -> Result<Self::Image, EngineError> {
    let frame = self.counters.submitted.get();
    bump(&self.counters.submitted);
    Ok(StubImage {
      frame,
      counters: self.counters.clone(),
    })
  }

  fn predict(&self, _image: &Self::Image, classes: usize) -> Result<Vec<f32>, EngineError> {
    bump(&self.counters.predicted);
    Ok(self.scores.iter().copied().take(classes).collect())
  }

  fn network_boxes(
    &self,
    image: &Self::Image,
    threshold: f32,
    _hier_threshold: f32,
  ) -> Result<Self::Boxes, EngineError> {
    if self.fail_boxes_at == Some(image.frame) {
      return Err(EngineError::NullHandle("get_network_boxes"));
    }

    // 与原生引擎一致：低于阈值的概率被置零
    let entries = self
      .script
      .get(image.frame)
      .cloned()
      .unwrap_or_default()
      .into_iter()
      .map(|(bbox, probs)| {
        let probs = probs
          .into_iter()
          .map(|p| if p > threshold { p } else { 0.0 })
          .collect();
        (bbox, probs)
      })
      .collect();

    Ok(StubBoxes {
      entries,
      counters: self.counters.clone(),
    })
  }

  fn suppress(
    &self,
    _boxes: &mut Self::Boxes,
    _classes: usize,
    _nms_threshold: f32,
  ) -> Result<(), EngineError> {
    bump(&self.counters.suppressed);
    Ok(())
  }
}
