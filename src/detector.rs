// 该文件是 Guanlan （观澜） 项目的一部分。
// src/detector.rs - 检测请求、过滤与排序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use tracing::debug;

use crate::{
  frame::Frame,
  model::{Detection, EngineError, InferenceEngine, Metadata, RawDetections},
};

pub const DEFAULT_THRESHOLD: f32 = 0.5;
pub const DEFAULT_HIER_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.45;

/// 检测阈值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
  pub threshold: f32,
  pub hier_threshold: f32,
  /// 为 0 时跳过非极大值抑制
  pub nms_threshold: f32,
}

impl Default for DetectParams {
  fn default() -> Self {
    Self {
      threshold: DEFAULT_THRESHOLD,
      hier_threshold: DEFAULT_HIER_THRESHOLD,
      nms_threshold: DEFAULT_NMS_THRESHOLD,
    }
  }
}

/// 按置信度降序稳定排序，相同置信度保持原有顺序
pub fn sort_by_confidence(detections: &mut [Detection]) {
  detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
}

/// 保留置信度不低于阈值的检测，顺序不变
pub fn filter_detections(mut detections: Vec<Detection>, threshold: f32) -> Vec<Detection> {
  detections.retain(|det| det.confidence >= threshold);
  detections
}

/// 对单帧执行检测
///
/// 引擎图像与检测数组都是守卫类型，无论从哪条路径返回都恰好释放一次。
pub fn detect<E: InferenceEngine>(
  engine: &E,
  metadata: &Metadata,
  frame: &Frame,
  params: &DetectParams,
) -> Result<Vec<Detection>, EngineError> {
  let image = engine.submit(frame.image())?;
  engine.predict(&image, metadata.classes())?;

  let mut boxes = engine.network_boxes(&image, params.threshold, params.hier_threshold)?;
  if params.nms_threshold > 0.0 {
    engine.suppress(&mut boxes, metadata.classes(), params.nms_threshold)?;
  }

  let mut detections = Vec::new();
  for j in 0..boxes.len() {
    let bbox = boxes.bbox(j);
    for (class_id, &prob) in boxes
      .probabilities(j)
      .iter()
      .enumerate()
      .take(metadata.classes())
    {
      if prob > 0.0 {
        let label = metadata.name(class_id).unwrap_or("unknown").to_string();
        detections.push(Detection {
          label,
          confidence: prob,
          bbox,
          frame_index: frame.index(),
        });
      }
    }
  }

  sort_by_confidence(&mut detections);
  debug!(
    "帧 {}: {} 个候选框, {} 个检测",
    frame.index(),
    boxes.len(),
    detections.len()
  );
  Ok(detections)
}

/// 整图分类，返回按分数降序排列的 (类别, 分数)
pub fn classify<E: InferenceEngine>(
  engine: &E,
  metadata: &Metadata,
  frame: &Frame,
) -> Result<Vec<(String, f32)>, EngineError> {
  let image = engine.submit(frame.image())?;
  let scores = engine.predict(&image, metadata.classes())?;

  let mut result: Vec<(String, f32)> = metadata
    .names()
    .iter()
    .cloned()
    .zip(scores)
    .collect();
  result.sort_by(|a, b| b.1.total_cmp(&a.1));
  Ok(result)
}

/// 绑定引擎、元数据与阈值的检测客户端
pub struct DetectionClient<'a, E> {
  engine: &'a E,
  metadata: &'a Metadata,
  params: DetectParams,
}

impl<'a, E: InferenceEngine> DetectionClient<'a, E> {
  pub fn new(engine: &'a E, metadata: &'a Metadata) -> Self {
    Self {
      engine,
      metadata,
      params: DetectParams::default(),
    }
  }

  pub fn with_params(mut self, params: DetectParams) -> Self {
    self.params = params;
    self
  }

  /// 检测并按阈值过滤，结果按置信度降序
  pub fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, EngineError> {
    let detections = detect(self.engine, self.metadata, frame, &self.params)?;
    Ok(filter_detections(detections, self.params.threshold))
  }

  pub fn classify(&self, frame: &Frame) -> Result<Vec<(String, f32)>, EngineError> {
    classify(self.engine, self.metadata, frame)
  }
}

#[cfg(test)]
mod tests {
  use image::RgbImage;

  use super::*;
  use crate::model::{
    CenterBox,
    testing::{StubEngine, raw, stub_metadata},
  };

  fn frame(index: u64) -> Frame {
    Frame::new(index, RgbImage::new(64, 64))
  }

  fn det(label: &str, confidence: f32) -> Detection {
    Detection {
      label: label.to_string(),
      confidence,
      bbox: CenterBox::default(),
      frame_index: 0,
    }
  }

  #[test]
  fn detections_are_sorted_by_descending_confidence() {
    let engine = StubEngine::new(vec![vec![
      raw("person", 0.6, (10.0, 10.0, 5.0, 5.0)),
      raw("car", 0.8, (30.0, 30.0, 10.0, 10.0)),
      raw("truck", 0.95, (40.0, 40.0, 8.0, 8.0)),
      raw("bicycle", 0.7, (20.0, 20.0, 4.0, 4.0)),
    ]]);
    let meta = stub_metadata();

    let result = detect(&engine, &meta, &frame(0), &DetectParams::default()).unwrap();

    let labels: Vec<_> = result.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, ["truck", "car", "bicycle", "person"]);
    assert!(
      result
        .windows(2)
        .all(|w| w[0].confidence >= w[1].confidence)
    );
  }

  #[test]
  fn equal_confidences_keep_engine_order() {
    let engine = StubEngine::new(vec![vec![
      raw("person", 0.7, (1.0, 1.0, 1.0, 1.0)),
      raw("car", 0.9, (2.0, 2.0, 2.0, 2.0)),
      raw("truck", 0.7, (3.0, 3.0, 3.0, 3.0)),
      raw("bicycle", 0.7, (4.0, 4.0, 4.0, 4.0)),
    ]]);

    let result = detect(&engine, &stub_metadata(), &frame(0), &DetectParams::default()).unwrap();

    let labels: Vec<_> = result.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, ["car", "person", "truck", "bicycle"]);
  }

  #[test]
  fn one_detection_per_positive_class_probability() {
    let (bbox, mut probs) = raw("car", 0.9, (50.0, 50.0, 20.0, 20.0));
    probs[3] = 0.55; // truck
    let engine = StubEngine::new(vec![vec![(bbox, probs)]]);

    let result = detect(&engine, &stub_metadata(), &frame(3), &DetectParams::default()).unwrap();

    assert_eq!(result.len(), 2);
    assert_eq!(result[0].label, "car");
    assert_eq!(result[1].label, "truck");
    assert!(result.iter().all(|d| d.bbox == bbox && d.frame_index == 3));
  }

  #[test]
  fn zero_nms_threshold_skips_suppression() {
    let engine = StubEngine::new(vec![vec![raw("car", 0.9, (1.0, 1.0, 1.0, 1.0))]; 3]);
    let meta = stub_metadata();
    let params = DetectParams {
      nms_threshold: 0.0,
      ..DetectParams::default()
    };

    for i in 0..3 {
      detect(&engine, &meta, &frame(i), &params).unwrap();
    }

    assert_eq!(engine.counters.suppressed.get(), 0);
  }

  #[test]
  fn positive_nms_threshold_suppresses_once_per_frame() {
    let engine = StubEngine::new(vec![vec![raw("car", 0.9, (1.0, 1.0, 1.0, 1.0))]; 3]);
    let meta = stub_metadata();

    for i in 0..3 {
      detect(&engine, &meta, &frame(i), &DetectParams::default()).unwrap();
      assert_eq!(engine.counters.suppressed.get(), i as usize + 1);
    }
  }

  #[test]
  fn native_allocations_released_once_on_success() {
    let engine = StubEngine::new(vec![vec![raw("car", 0.9, (1.0, 1.0, 1.0, 1.0))], vec![]]);
    let meta = stub_metadata();

    detect(&engine, &meta, &frame(0), &DetectParams::default()).unwrap();
    detect(&engine, &meta, &frame(1), &DetectParams::default()).unwrap();

    assert_eq!(engine.counters.images_released.get(), 2);
    assert_eq!(engine.counters.boxes_released.get(), 2);
  }

  #[test]
  fn image_released_when_box_extraction_fails() {
    let engine = StubEngine::new(vec![vec![]]).failing_boxes_at(0);

    let err = detect(&engine, &stub_metadata(), &frame(0), &DetectParams::default());

    assert!(matches!(err, Err(EngineError::NullHandle("get_network_boxes"))));
    assert_eq!(engine.counters.images_released.get(), 1);
    assert_eq!(engine.counters.boxes_released.get(), 0);
  }

  #[test]
  fn filter_keeps_order_and_enforces_threshold() {
    let input = vec![det("a", 0.9), det("b", 0.5), det("c", 0.49), det("d", 0.2)];

    let kept = filter_detections(input, 0.5);

    let labels: Vec<_> = kept.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, ["a", "b"]);
  }

  #[test]
  fn client_filters_below_threshold() {
    let engine = StubEngine::new(vec![vec![
      raw("car", 0.9, (1.0, 1.0, 1.0, 1.0)),
      raw("person", 0.4, (2.0, 2.0, 2.0, 2.0)),
    ]]);
    let meta = stub_metadata();
    let client = DetectionClient::new(&engine, &meta).with_params(DetectParams {
      threshold: 0.3,
      ..DetectParams::default()
    });

    let result = client.detect(&frame(0)).unwrap();

    assert_eq!(result.len(), 2);
    assert_eq!(result[0].label, "car");
  }

  #[test]
  fn classify_sorts_scores_descending() {
    let engine = StubEngine::new(vec![]).with_scores(vec![0.1, 0.7, 0.05, 0.7, 0.15]);

    let result = classify(&engine, &stub_metadata(), &frame(0)).unwrap();

    let labels: Vec<_> = result.iter().map(|(l, _)| l.as_str()).collect();
    assert_eq!(labels, ["bicycle", "truck", "traffic light", "person", "car"]);
    assert_eq!(engine.counters.images_released.get(), 1);
  }
}
