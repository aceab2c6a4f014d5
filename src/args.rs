// 该文件是 Guanlan （观澜） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use guanlan::detector::{DEFAULT_HIER_THRESHOLD, DEFAULT_NMS_THRESHOLD, DEFAULT_THRESHOLD};
use guanlan::task::DEFAULT_FPS;

/// Guanlan 项目参数配置
///
/// 所有参数都有默认值，不带参数运行即处理部署环境中的固定路径。
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源
  /// 支持格式:
  /// - 视频: video:///path/to/test.mp4
  /// - 帧目录: frames:///path/to/dir?fps=25
  #[arg(long, value_name = "SOURCE", default_value = "video:///usr/src/app/video/test.mp4")]
  pub input: Url,

  /// 输出路径
  /// 支持格式:
  /// - 视频: video:///path/to/video.avi?fps=1&codec=rawvideo
  /// - 帧目录: folder:///path/to/dir
  #[arg(
    long,
    value_name = "OUTPUT",
    default_value = "video:///usr/src/app/video/video.avi?fps=1"
  )]
  pub output: Url,

  /// 网络配置文件
  #[arg(long, value_name = "FILE", default_value = "/usr/src/app/cfg/yolov3.cfg")]
  pub config: String,

  /// 网络权重文件
  #[arg(long, value_name = "FILE", default_value = "/usr/src/app/yolov3.weights")]
  pub weights: String,

  /// 类别元数据文件
  #[arg(long, value_name = "FILE", default_value = "/usr/src/app/cfg/coco.data")]
  pub data: PathBuf,

  /// GPU 编号
  #[arg(long, default_value_t = 0)]
  pub gpu: i32,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_THRESHOLD, value_name = "THRESHOLD")]
  pub threshold: f32,

  /// 分层阈值
  #[arg(long, default_value_t = DEFAULT_HIER_THRESHOLD, value_name = "THRESHOLD")]
  pub hier_threshold: f32,

  /// NMS 阈值，0 表示不做抑制
  #[arg(long, default_value_t = DEFAULT_NMS_THRESHOLD, value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 输入与输出都没有帧率时使用的帧率
  #[arg(long, default_value_t = DEFAULT_FPS)]
  pub fps: f64,

  /// 颜色规则 JSON 文件
  #[arg(long, value_name = "FILE")]
  pub colors: Option<PathBuf>,

  /// 标签字体
  #[arg(
    long,
    value_name = "FILE",
    default_value = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf"
  )]
  pub font: PathBuf,
}
