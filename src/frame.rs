// 该文件是 Guanlan （观澜） 项目的一部分。
// src/frame.rs - 视频帧定义
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

use image::RgbImage;

pub const RGB_CHANNELS: usize = 3;

/// 一帧图像
///
/// `index` 从 0 开始连续递增，由 [`crate::input::FrameExtractor`] 分配。
/// 像素数据为交错排列的 RGB8（NHWC）。
#[derive(Debug, Clone)]
pub struct Frame {
  index: u64,
  image: RgbImage,
}

impl Frame {
  pub fn new(index: u64, image: RgbImage) -> Self {
    Self { index, image }
  }

  pub fn index(&self) -> u64 {
    self.index
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn dimensions(&self) -> (u32, u32) {
    self.image.dimensions()
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn image_mut(&mut self) -> &mut RgbImage {
    &mut self.image
  }
}

/// 平面布局中 (x, y) 像素在单个通道内的偏移
pub fn planar_offset(width: u32, x: u32, y: u32) -> usize {
  y as usize * width as usize + x as usize
}

/// 交错 RGB8 -> 平面 float [0, 1]
///
/// `out` 至少为 `w * h * 3` 个元素。
pub fn write_planar(image: &RgbImage, out: &mut [f32]) {
  let plane = image.width() as usize * image.height() as usize;
  for (x, y, pixel) in image.enumerate_pixels() {
    let idx = planar_offset(image.width(), x, y);
    for c in 0..RGB_CHANNELS {
      out[c * plane + idx] = pixel[c] as f32 / 255.0;
    }
  }
}

impl AsRef<[u8]> for Frame {
  fn as_ref(&self) -> &[u8] {
    self.image.as_raw()
  }
}
