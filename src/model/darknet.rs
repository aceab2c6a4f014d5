// 该文件是 Guanlan （观澜） 项目的一部分。
// src/model/darknet.rs - darknet 推理引擎适配
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::ffi::{CStr, CString};
use std::os::raw::{c_int, c_void};
use std::path::Path;
use std::ptr::{self, NonNull};

use image::RgbImage;
use tracing::{debug, error, info};
use url::Url;

use super::ffi;
use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{RGB_CHANNELS, write_planar},
  model::{CenterBox, EngineError, InferenceEngine, Metadata, RawDetections},
};

fn to_cstring(path: &Path) -> Result<CString, EngineError> {
  let text = path.to_string_lossy();
  CString::new(text.as_bytes()).map_err(|_| EngineError::InvalidPath(text.to_string()))
}

/// darknet 网络句柄
///
/// 所有裸指针操作都集中在本类型及其守卫中。
pub struct Darknet {
  net: NonNull<c_void>,
}

pub struct DarknetBuilder {
  config: String,
  weights: String,
  gpu: i32,
}

impl FromUrlWithScheme for DarknetBuilder {
  const SCHEME: &'static str = "darknet";
}

impl FromUrl for DarknetBuilder {
  type Error = EngineError;

  /// `darknet:///path/yolov3.cfg?weights=/path/yolov3.weights&gpu=0`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(EngineError::LoadNetwork(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let weights = url
      .query_pairs()
      .find(|(k, _)| k == "weights")
      .map(|(_, v)| v.to_string())
      .ok_or_else(|| EngineError::LoadNetwork("缺少 weights 参数".to_string()))?;
    let gpu = url
      .query_pairs()
      .find(|(k, _)| k == "gpu")
      .and_then(|(_, v)| v.parse::<i32>().ok())
      .unwrap_or(0);

    Ok(DarknetBuilder {
      config: url.path().to_string(),
      weights,
      gpu,
    })
  }
}

impl DarknetBuilder {
  pub fn new(config: impl Into<String>, weights: impl Into<String>) -> Self {
    Self {
      config: config.into(),
      weights: weights.into(),
      gpu: 0,
    }
  }

  pub fn gpu(mut self, gpu: i32) -> Self {
    self.gpu = gpu;
    self
  }

  pub fn build(self) -> Result<Darknet, EngineError> {
    info!("加载网络: {} / {}", self.config, self.weights);
    let config = to_cstring(Path::new(&self.config))?;
    let weights = to_cstring(Path::new(&self.weights))?;

    // SAFETY: 参数均为有效的 NUL 结尾字符串，在调用期间保持存活
    let raw = unsafe {
      ffi::cuda_set_device(self.gpu as c_int);
      ffi::load_network(config.as_ptr(), weights.as_ptr(), 0)
    };

    match NonNull::new(raw) {
      Some(net) => {
        info!("网络加载完成");
        Ok(Darknet { net })
      }
      None => {
        error!("load_network 返回空指针: {}", self.config);
        Err(EngineError::NullHandle("load_network"))
      }
    }
  }
}

impl Darknet {
  pub fn builder(config: impl Into<String>, weights: impl Into<String>) -> DarknetBuilder {
    DarknetBuilder::new(config, weights)
  }

  /// 读取 `.data` 文件对应的类别元数据
  pub fn load_metadata(path: impl AsRef<Path>) -> Result<Metadata, EngineError> {
    let path = path.as_ref();
    let data = to_cstring(path)?;

    // SAFETY: data 在调用期间有效；返回的结构体由 darknet 持有，只读取不释放
    let raw = unsafe { ffi::get_metadata(data.as_ptr()) };
    if raw.names.is_null() || raw.classes <= 0 {
      return Err(EngineError::LoadMetadata(path.display().to_string()));
    }

    let mut names = Vec::with_capacity(raw.classes as usize);
    for i in 0..raw.classes as usize {
      // SAFETY: names 指向 classes 个元素的数组
      let name = unsafe { *raw.names.add(i) };
      if name.is_null() {
        return Err(EngineError::LoadMetadata(format!(
          "{}: 第 {} 个类别名为空",
          path.display(),
          i
        )));
      }
      // SAFETY: 非空且为 NUL 结尾的 C 字符串
      let name = unsafe { CStr::from_ptr(name) };
      names.push(name.to_string_lossy().into_owned());
    }

    debug!("元数据加载完成: {} 个类别", names.len());
    Ok(Metadata::new(names))
  }
}

impl Drop for Darknet {
  fn drop(&mut self) {
    debug!("释放网络句柄");
    // SAFETY: net 来自 load_network，且只在此处释放一次
    unsafe { ffi::free_network(self.net.as_ptr()) };
  }
}

/// darknet 图像守卫，离开作用域时调用 `free_image`
pub struct DarknetImage {
  raw: ffi::RawImage,
}

impl Drop for DarknetImage {
  fn drop(&mut self) {
    // SAFETY: raw 来自 make_image，且只在此处释放一次
    unsafe { ffi::free_image(self.raw) };
  }
}

/// darknet 检测数组守卫，离开作用域时调用 `free_detections`
pub struct DarknetBoxes {
  dets: *mut ffi::RawDetection,
  count: c_int,
}

impl DarknetBoxes {
  fn entry(&self, index: usize) -> &ffi::RawDetection {
    assert!(index < self.len(), "检测索引越界: {}", index);
    // SAFETY: dets 指向 count 个元素，index 已检查
    unsafe { &*self.dets.add(index) }
  }
}

impl RawDetections for DarknetBoxes {
  fn len(&self) -> usize {
    if self.dets.is_null() {
      0
    } else {
      self.count.max(0) as usize
    }
  }

  fn bbox(&self, index: usize) -> CenterBox {
    let b = self.entry(index).bbox;
    CenterBox::new(b.x, b.y, b.w, b.h)
  }

  fn probabilities(&self, index: usize) -> &[f32] {
    let det = self.entry(index);
    if det.prob.is_null() || det.classes <= 0 {
      return &[];
    }
    // SAFETY: prob 指向 classes 个 float，生命周期与本数组相同
    unsafe { std::slice::from_raw_parts(det.prob, det.classes as usize) }
  }
}

impl Drop for DarknetBoxes {
  fn drop(&mut self) {
    if !self.dets.is_null() {
      // SAFETY: dets 来自 get_network_boxes，且只在此处释放一次
      unsafe { ffi::free_detections(self.dets, self.count) };
    }
  }
}

impl InferenceEngine for Darknet {
  type Image = DarknetImage;
  type Boxes = DarknetBoxes;

  fn submit(&self, image: &RgbImage) -> Result<Self::Image, EngineError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || width > i32::MAX as u32 || height > i32::MAX as u32 {
      return Err(EngineError::InvalidImage { width, height });
    }

    // SAFETY: 尺寸已校验为正数
    let raw = unsafe { ffi::make_image(width as c_int, height as c_int, RGB_CHANNELS as c_int) };
    // 先交给守卫，保证后续任何出错路径都会释放
    let guard = DarknetImage { raw };
    if guard.raw.data.is_null() {
      return Err(EngineError::NullHandle("make_image"));
    }

    let len = width as usize * height as usize * RGB_CHANNELS;
    // SAFETY: make_image 分配了 w * h * c 个 float
    let data = unsafe { std::slice::from_raw_parts_mut(guard.raw.data, len) };
    write_planar(image, data);

    Ok(guard)
  }

  fn predict(&self, image: &Self::Image, classes: usize) -> Result<Vec<f32>, EngineError> {
    // SAFETY: net 与 image 均有效；返回缓冲区归网络所有，不需要释放
    let out = unsafe { ffi::network_predict_image(self.net.as_ptr(), image.raw) };
    if out.is_null() {
      return Err(EngineError::NullHandle("network_predict_image"));
    }
    // SAFETY: 输出层至少包含 classes 个分数
    let scores = unsafe { std::slice::from_raw_parts(out, classes) };
    Ok(scores.to_vec())
  }

  fn network_boxes(
    &self,
    image: &Self::Image,
    threshold: f32,
    hier_threshold: f32,
  ) -> Result<Self::Boxes, EngineError> {
    let mut num: c_int = 0;
    // SAFETY: net 有效，num 为本地变量
    let dets = unsafe {
      ffi::get_network_boxes(
        self.net.as_ptr(),
        image.raw.w,
        image.raw.h,
        threshold,
        hier_threshold,
        ptr::null_mut(),
        0,
        &mut num,
      )
    };

    let boxes = DarknetBoxes { dets, count: num };
    if dets.is_null() && num > 0 {
      return Err(EngineError::NullHandle("get_network_boxes"));
    }
    debug!("get_network_boxes: {} 个候选", num);
    Ok(boxes)
  }

  fn suppress(
    &self,
    boxes: &mut Self::Boxes,
    classes: usize,
    nms_threshold: f32,
  ) -> Result<(), EngineError> {
    if boxes.dets.is_null() {
      return Ok(());
    }
    let classes = c_int::try_from(classes)
      .map_err(|_| EngineError::CallFailed(format!("类别数过大: {}", classes)))?;
    // SAFETY: dets 指向 count 个元素
    unsafe { ffi::do_nms_obj(boxes.dets, boxes.count, classes, nms_threshold) };
    Ok(())
  }
}
