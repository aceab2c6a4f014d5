// 该文件是 Guanlan （观澜） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use guanlan::{
  FromUrl,
  detector::DetectParams,
  input::{FrameExtractor, InputWrapper},
  model::Darknet,
  output::{Annotator, ColorMap, OutputWrapper, draw::load_font},
  task::{Pipeline, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("Guanlan 视频标注");
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);
  info!("网络: {} / {}", args.config, args.weights);
  info!(
    "阈值: {} / {} / NMS {}",
    args.threshold, args.hier_threshold, args.nms_threshold
  );

  let colors = match &args.colors {
    Some(path) => ColorMap::from_json_file(path)?,
    None => ColorMap::default(),
  };
  let font = match load_font(&args.font) {
    Ok(font) => Some(font),
    Err(e) => {
      warn!("无法加载字体，只绘制边框: {}", e);
      None
    }
  };
  let annotator = Annotator::new(colors).with_font(font);

  info!("正在加载模型...");
  let engine = Darknet::builder(&args.config, &args.weights)
    .gpu(args.gpu)
    .build()?;
  let metadata = Darknet::load_metadata(&args.data)?;
  info!("模型加载完成: {} 个类别", metadata.classes());

  let input = FrameExtractor::new(InputWrapper::from_url(&args.input)?);
  let output = OutputWrapper::from_url(&args.output)?;
  let location = output.location();

  let params = DetectParams {
    threshold: args.threshold,
    hier_threshold: args.hier_threshold,
    nms_threshold: args.nms_threshold,
  };
  let summary = Pipeline::new(&engine, &metadata)
    .with_params(params)
    .with_annotator(annotator)
    .with_default_fps(args.fps)
    .run_task(input, output)?;

  info!("处理完成!");
  info!("总帧数: {}", summary.frames);
  info!("总检测数: {}", summary.detections);
  info!("输出: {} ({}x{} @ {} fps)", location, summary.width, summary.height, summary.fps);

  Ok(())
}
