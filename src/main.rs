// 该文件是 Linzhi （林芝） 项目的一部分。
// src/main.rs - 项目主程序：先标注测试图片，再标注视频片段
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

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use linzhi::{
  config::PipelineConfig,
  detector::Detector,
  input::{ImageBatch, VideoFileInput},
  label::CategoryIndex,
  model::SsdEngineBuilder,
  output::{SaveImageFileOutput, VideoFileOutput},
  task::{BatchTask, StreamTask, Task},
};

/// Linzhi 目标检测标注流水线
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
  #[command(flatten)]
  config: PipelineConfig,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let Args { config } = Args::parse();
  config.validate()?;

  info!("模型文件路径: {}", config.model.model.display());
  info!("标签映射文件: {}", config.model.labels.display());
  info!("图片目录: {}", config.images.image_dir.display());
  info!(
    "视频: {} [{}s, {}s) -> {}",
    config.video.video.display(),
    config.video.start,
    config.video.end,
    config.video.output.display()
  );

  let engine = SsdEngineBuilder::new(&config.model.model)
    .intra_threads(config.model.intra_threads)
    .build()
    .context("模型加载失败")?;
  let categories = CategoryIndex::load(&config.model.labels, config.model.num_classes)
    .context("标签映射加载失败")?;
  let options = config.draw.options();
  let detector = Detector::new(&engine, &categories, options);

  // 测试图片
  let images = ImageBatch::from_pattern(&config.images.image_dir, config.images.image_count);
  let mut image_output = SaveImageFileOutput::new(&config.images.image_output_dir)?;
  if config.images.record {
    image_output = image_output.with_record(categories.clone(), options);
  }
  let report = BatchTask.run_task(images, &detector, &image_output)?;
  if report.processed.is_empty() {
    warn!("没有成功处理任何图片");
  }

  // 视频片段
  let subrange = config.video.subrange()?;
  let video = VideoFileInput::open(&config.video.video, subrange)
    .with_context(|| format!("无法打开视频 {}", config.video.video.display()))?;
  let stream = *video.info();
  let video_output =
    VideoFileOutput::create(&config.video.output, stream.width, stream.height, stream.fps)?;
  let report = StreamTask.run_task(video, &detector, &video_output)?;

  info!(
    "处理完成: 视频 {} 帧 -> {}",
    report.frames,
    config.video.output.display()
  );
  Ok(())
}
