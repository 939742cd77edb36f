// 该文件是 Linzhi （林芝） 项目的一部分。
// src/bin/annotate_images.rs - 只标注测试图片
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

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use linzhi::{
  config::{DrawArgs, ImageBatchArgs, ModelArgs},
  detector::Detector,
  input::ImageBatch,
  label::CategoryIndex,
  model::SsdEngineBuilder,
  output::SaveImageFileOutput,
  task::{BatchTask, Task},
};

/// 对一批图片做目标检测并保存标注结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
  #[command(flatten)]
  model: ModelArgs,

  #[command(flatten)]
  draw: DrawArgs,

  #[command(flatten)]
  images: ImageBatchArgs,

  /// 直接指定图片路径，指定后忽略 --image-dir 与 --image-count
  #[arg(value_name = "IMAGE")]
  paths: Vec<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  args.model.validate()?;
  args.draw.validate()?;

  let images = if args.paths.is_empty() {
    args.images.validate()?;
    ImageBatch::from_pattern(&args.images.image_dir, args.images.image_count)
  } else {
    ImageBatch::from_paths(args.paths)
  };
  info!("待处理图片: {} 张", images.len());

  let engine = SsdEngineBuilder::new(&args.model.model)
    .intra_threads(args.model.intra_threads)
    .build()
    .context("模型加载失败")?;
  let categories = CategoryIndex::load(&args.model.labels, args.model.num_classes)?;
  let options = args.draw.options();
  let detector = Detector::new(&engine, &categories, options);

  let mut output = SaveImageFileOutput::new(&args.images.image_output_dir)?;
  if args.images.record {
    output = output.with_record(categories.clone(), options);
  }

  let report = BatchTask.run_task(images, &detector, &output)?;
  for (path, reason) in &report.skipped {
    info!("未处理: {} ({})", path.display(), reason);
  }
  Ok(())
}
