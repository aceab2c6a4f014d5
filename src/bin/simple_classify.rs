// 该文件是 Guanlan （观澜） 项目的一部分。
// src/bin/simple_classify.rs - 整图分类
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use guanlan::{FromUrl, detector::DetectionClient, frame::Frame, model::DarknetBuilder};

/// 对单张图片做整图分类
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型路径: darknet:///path/net.cfg?weights=/path/net.weights&gpu=0
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 类别元数据文件
  #[arg(long, value_name = "FILE")]
  pub data: PathBuf,
  /// 输入图片
  #[arg(long, value_name = "IMAGE")]
  pub input: PathBuf,
  /// 输出前几个结果
  #[arg(long, default_value_t = 5)]
  pub top: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型路径: {}", args.model);
  info!("输入图片: {}", args.input.display());

  let engine = DarknetBuilder::from_url(&args.model)?.build()?;
  let metadata = guanlan::model::Darknet::load_metadata(&args.data)?;
  let client = DetectionClient::new(&engine, &metadata);

  let frame = Frame::new(0, image::open(&args.input)?.to_rgb8());

  info!("开始推理...");
  let now = std::time::Instant::now();
  let scores = client.classify(&frame)?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  for (label, score) in scores.iter().take(args.top) {
    println!("{}: {:.2}%", label, score * 100.0);
  }

  Ok(())
}
