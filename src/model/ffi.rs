// 该文件是 Guanlan （观澜） 项目的一部分。
// src/model/ffi.rs - libdarknet 原始接口声明
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 与 `darknet.h` 中结构体布局一一对应，字段顺序不可调整。

use std::os::raw::{c_char, c_float, c_int, c_void};

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBox {
  pub x: c_float,
  pub y: c_float,
  pub w: c_float,
  pub h: c_float,
}

#[repr(C)]
#[derive(Debug)]
pub struct RawDetection {
  pub bbox: RawBox,
  pub classes: c_int,
  pub prob: *mut c_float,
  pub mask: *mut c_float,
  pub objectness: c_float,
  pub sort_class: c_int,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawImage {
  pub w: c_int,
  pub h: c_int,
  pub c: c_int,
  pub data: *mut c_float,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawMetadata {
  pub classes: c_int,
  pub names: *mut *mut c_char,
}

#[link(name = "darknet")]
unsafe extern "C" {
  pub fn cuda_set_device(n: c_int);

  pub fn load_network(cfg: *const c_char, weights: *const c_char, clear: c_int) -> *mut c_void;
  pub fn free_network(net: *mut c_void);

  pub fn get_metadata(file: *const c_char) -> RawMetadata;

  pub fn make_image(w: c_int, h: c_int, c: c_int) -> RawImage;
  pub fn free_image(m: RawImage);

  pub fn network_predict_image(net: *mut c_void, im: RawImage) -> *mut c_float;

  pub fn get_network_boxes(
    net: *mut c_void,
    w: c_int,
    h: c_int,
    thresh: c_float,
    hier: c_float,
    map: *mut c_int,
    relative: c_int,
    num: *mut c_int,
  ) -> *mut RawDetection;

  pub fn do_nms_obj(dets: *mut RawDetection, total: c_int, classes: c_int, thresh: c_float);

  pub fn free_detections(dets: *mut RawDetection, n: c_int);
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::mem::{align_of, size_of};

  #[test]
  fn struct_layouts_match_native_headers() {
    assert_eq!(size_of::<RawBox>(), 4 * size_of::<c_float>());
    assert_eq!(size_of::<RawImage>() % align_of::<*mut c_float>(), 0);
    assert_eq!(std::mem::offset_of!(RawDetection, bbox), 0);
    assert_eq!(std::mem::offset_of!(RawDetection, classes), size_of::<RawBox>());
    assert_eq!(std::mem::offset_of!(RawImage, data) % align_of::<*mut c_float>(), 0);
    assert_eq!(std::mem::offset_of!(RawMetadata, classes), 0);
  }
}
