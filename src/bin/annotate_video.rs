// 该文件是 Linzhi （林芝） 项目的一部分。
// src/bin/annotate_video.rs - 只标注视频片段
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
use tracing::info;

use linzhi::{
  config::{DrawArgs, ModelArgs, VideoArgs},
  detector::Detector,
  input::VideoFileInput,
  label::CategoryIndex,
  model::SsdEngineBuilder,
  output::VideoFileOutput,
  task::{StreamTask, Task},
};

/// 对视频片段逐帧做目标检测，输出不含音轨的标注视频
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
  #[command(flatten)]
  model: ModelArgs,

  #[command(flatten)]
  draw: DrawArgs,

  #[command(flatten)]
  video: VideoArgs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  args.model.validate()?;
  args.draw.validate()?;
  let subrange = args.video.subrange()?;

  let engine = SsdEngineBuilder::new(&args.model.model)
    .intra_threads(args.model.intra_threads)
    .build()
    .context("模型加载失败")?;
  let categories = CategoryIndex::load(&args.model.labels, args.model.num_classes)?;
  let detector = Detector::new(&engine, &categories, args.draw.options());

  let input = VideoFileInput::open(&args.video.video, subrange)
    .with_context(|| format!("无法打开视频 {}", args.video.video.display()))?;
  let stream = *input.info();
  info!(
    "预计处理帧数: {}",
    subrange.expected_frames(stream.fps.0 as u32, stream.fps.1 as u32)
  );

  let output = VideoFileOutput::create(&args.video.output, stream.width, stream.height, stream.fps)?;
  let report = StreamTask.run_task(input, &detector, &output)?;

  info!(
    "完成: {} 帧, {} 个检测 -> {}",
    report.frames,
    report.detections,
    args.video.output.display()
  );
  Ok(())
}
