// 该文件是 Guanlan （观澜） 项目的一部分。
// src/model.rs - 检测数据模型与推理引擎接口
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::RgbImage;
use thiserror::Error;

/// 中心形式的边界框，单位为像素
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CenterBox {
  pub cx: f32,
  pub cy: f32,
  pub width: f32,
  pub height: f32,
}

impl CenterBox {
  pub fn new(cx: f32, cy: f32, width: f32, height: f32) -> Self {
    Self {
      cx,
      cy,
      width,
      height,
    }
  }
}

/// 单个检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub label: String,
  pub confidence: f32,
  pub bbox: CenterBox,
  pub frame_index: u64,
}

/// 类别元数据：类别数量与类别名称表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
  names: Vec<String>,
}

impl Metadata {
  pub fn new(names: Vec<String>) -> Self {
    Self { names }
  }

  pub fn classes(&self) -> usize {
    self.names.len()
  }

  pub fn name(&self, class_id: usize) -> Option<&str> {
    self.names.get(class_id).map(String::as_str)
  }

  pub fn names(&self) -> &[String] {
    &self.names
  }
}

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("推理引擎返回空句柄: {0}")]
  NullHandle(&'static str),
  #[error("网络加载失败: {0}")]
  LoadNetwork(String),
  #[error("元数据加载失败: {0}")]
  LoadMetadata(String),
  #[error("路径包含非法字符: {0}")]
  InvalidPath(String),
  #[error("图像尺寸无效: {width}x{height}")]
  InvalidImage { width: u32, height: u32 },
  #[error("推理调用失败: {0}")]
  CallFailed(String),
}

/// 推理引擎返回的原始检测数组
///
/// 实现者拥有底层分配，并在 `Drop` 时释放一次。
pub trait RawDetections {
  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn bbox(&self, index: usize) -> CenterBox;

  /// 第 `index` 个检测在各类别上的概率
  fn probabilities(&self, index: usize) -> &[f32];
}

/// 外部推理引擎接口
///
/// `Image` 与 `Boxes` 为引擎侧分配的守卫类型，离开作用域即释放。
pub trait InferenceEngine {
  type Image;
  type Boxes: RawDetections;

  /// 提交帧像素数据，得到引擎图像
  fn submit(&self, image: &RgbImage) -> Result<Self::Image, EngineError>;

  /// 前向推理，返回前 `classes` 个类别的原始分数
  fn predict(&self, image: &Self::Image, classes: usize) -> Result<Vec<f32>, EngineError>;

  /// 获取上一次推理的检测框
  fn network_boxes(
    &self,
    image: &Self::Image,
    threshold: f32,
    hier_threshold: f32,
  ) -> Result<Self::Boxes, EngineError>;

  /// 按类别做非极大值抑制，原地修改检测数组
  fn suppress(
    &self,
    boxes: &mut Self::Boxes,
    classes: usize,
    nms_threshold: f32,
  ) -> Result<(), EngineError>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for &E {
  type Image = E::Image;
  type Boxes = E::Boxes;

  fn submit(&self, image: &RgbImage) -> Result<Self::Image, EngineError> {
    (**self).submit(image)
  }

  fn predict(&self, image: &Self::Image, classes: usize) -> Result<Vec<f32>, EngineError> {
    (**self).predict(image, classes)
  }

  fn network_boxes(
    &self,
    image: &Self::Image,
    threshold: f32,
    hier_threshold: f32,
  ) -> Result<Self::Boxes, EngineError> {
    (**self).network_boxes(image, threshold, hier_threshold)
  }

  fn suppress(
    &self,
    boxes: &mut Self::Boxes,
    classes: usize,
    nms_threshold: f32,
  ) -> Result<(), EngineError> {
    (**self).suppress(boxes, classes, nms_threshold)
  }
}

#[cfg(feature = "darknet")]
mod darknet;
#[cfg(feature = "darknet")]
mod ffi;
#[cfg(feature = "darknet")]
pub use self::darknet::{Darknet, DarknetBoxes, DarknetBuilder, DarknetImage};

#[cfg(test)]
pub(crate) mod testing;
