// 该文件是 Guanlan （观澜） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  frame::Frame,
  model::{CenterBox, Detection},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 14.0;
const DEFAULT_COLOR: [u8; 3] = [0, 0, 0];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("颜色配置解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("字体加载错误: {0}")]
  FontLoadError(String),
  #[error("检测属于第 {detection} 帧, 不能绘制到第 {frame} 帧")]
  FrameMismatch { frame: u64, detection: u64 },
}

/// 类别子串到颜色的规则
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ColorRule {
  pub pattern: String,
  pub color: [u8; 3],
}

impl ColorRule {
  pub fn new(pattern: impl Into<String>, color: [u8; 3]) -> Self {
    Self {
      pattern: pattern.into(),
      color,
    }
  }
}

fn default_color() -> [u8; 3] {
  DEFAULT_COLOR
}

/// 有序颜色规则表
///
/// 按规则顺序匹配，第一个子串出现在类别名中的规则生效；都不匹配时使用默认颜色。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ColorMap {
  rules: Vec<ColorRule>,
  #[serde(default = "default_color")]
  default: [u8; 3],
}

impl Default for ColorMap {
  fn default() -> Self {
    Self::new(
      vec![
        ColorRule::new("truck", [0, 255, 0]),
        ColorRule::new("traffic light", [255, 255, 0]),
        ColorRule::new("bicycle", [255, 0, 0]),
        ColorRule::new("car", [0, 0, 255]),
        ColorRule::new("person", [0, 165, 255]),
      ],
      DEFAULT_COLOR,
    )
  }
}

impl ColorMap {
  pub fn new(rules: Vec<ColorRule>, default: [u8; 3]) -> Self {
    Self { rules, default }
  }

  /// 从 JSON 文件加载，格式为 `{"rules": [{"pattern": "car", "color": [0, 0, 255]}], "default": [0, 0, 0]}`
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let data = std::fs::read(path.as_ref())?;
    let map: ColorMap = serde_json::from_slice(&data)?;
    info!(
      "颜色规则已加载: {} ({} 条)",
      path.as_ref().display(),
      map.rules.len()
    );
    Ok(map)
  }

  pub fn rules(&self) -> &[ColorRule] {
    &self.rules
  }

  pub fn resolve(&self, label: &str) -> Rgb<u8> {
    let color = self
      .rules
      .iter()
      .find(|rule| label.contains(rule.pattern.as_str()))
      .map_or(self.default, |rule| rule.color);
    Rgb(color)
  }
}

/// 由中心形式边界框得到的两个角点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Corners {
  pub upper_left: (i32, i32),
  pub lower_right: (i32, i32),
}

impl Corners {
  /// 左上角 = (cx - w/2, cy + h/2)，右下角 = (cx + w/2, cy - h/2)
  ///
  /// 中心与宽高先截断为整数。纵向两项与横向不对称，保持原样。
  pub fn from_center(bbox: &CenterBox) -> Self {
    let (cx, cy) = (bbox.cx as i32 as f32, bbox.cy as i32 as f32);
    let half_w = (bbox.width as i32) as f32 / 2.0;
    let half_h = (bbox.height as i32) as f32 / 2.0;

    Self {
      upper_left: ((cx - half_w) as i32, (cy + half_h) as i32),
      lower_right: ((cx + half_w) as i32, (cy - half_h) as i32),
    }
  }

  /// 两角点之间的矩形，包含两端
  pub fn to_rect(self) -> Rect {
    let (x0, y0) = self.upper_left;
    let (x1, y1) = self.lower_right;
    let width = x0.abs_diff(x1) + 1;
    let height = y0.abs_diff(y1) + 1;
    Rect::at(x0.min(x1), y0.min(y1)).of_size(width, height)
  }
}

/// 去掉类别名开头的类别标记字符
pub fn display_text(label: &str) -> &str {
  match label.chars().next() {
    Some(c) if !c.is_alphanumeric() => &label[c.len_utf8()..],
    _ => label,
  }
}

pub fn load_font(path: impl AsRef<Path>) -> Result<FontArc, DrawError> {
  let data = std::fs::read(path.as_ref())?;
  FontArc::try_from_vec(data)
    .map_err(|e| DrawError::FontLoadError(format!("{}: {}", path.as_ref().display(), e)))
}

/// 在帧上绘制检测框与类别名
pub struct Annotator {
  colors: ColorMap,
  font: Option<FontArc>,
  font_scale: PxScale,
}

impl Default for Annotator {
  fn default() -> Self {
    Self::new(ColorMap::default())
  }
}

impl Annotator {
  pub fn new(colors: ColorMap) -> Self {
    Self {
      colors,
      font: None,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
    }
  }

  /// 没有字体时只绘制边框
  pub fn with_font(mut self, font: Option<FontArc>) -> Self {
    self.font = font;
    self
  }

  /// 按顺序把检测结果画到帧上
  pub fn annotate(&self, frame: &mut Frame, detections: &[Detection]) -> Result<(), DrawError> {
    if let Some(det) = detections.iter().find(|d| d.frame_index != frame.index()) {
      return Err(DrawError::FrameMismatch {
        frame: frame.index(),
        detection: det.frame_index,
      });
    }

    let image = frame.image_mut();
    for det in detections {
      self.draw_detection(image, det);
    }

    if !detections.is_empty() {
      debug!("帧 {}: 绘制 {} 个检测框", frame.index(), detections.len());
    }
    Ok(())
  }

  fn draw_detection(&self, image: &mut RgbImage, det: &Detection) {
    let color = self.colors.resolve(&det.label);
    let corners = Corners::from_center(&det.bbox);
    draw_hollow_rect_mut(image, corners.to_rect(), color);

    if let Some(font) = &self.font {
      // 文本基线落在框中心
      let x = det.bbox.cx as i32;
      let y = det.bbox.cy as i32 - self.font_scale.y as i32;
      draw_text_mut(
        image,
        color,
        x,
        y,
        self.font_scale,
        font,
        display_text(&det.label),
      );
    }
  }
}
