// 该文件是 Linzhi （林芝） 项目的一部分。
// src/task.rs - 图像批处理与视频处理任务
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
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{error, info, warn};

use crate::{
  detector::Detector,
  input::{ImageFileInputError, ImageFrame, VideoFrame},
  model::{DetectionSet, Model},
  output::Render,
};

pub trait Task<I, D, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, detector: D, output: O) -> Result<Self::Output, Self::Error>;
}

/// 图像批处理结果
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchReport {
  /// 按处理顺序排列的成功图像
  pub processed: Vec<PathBuf>,
  /// 被跳过的图像及原因
  pub skipped: Vec<(PathBuf, String)>,
}

impl BatchReport {
  fn skip(&mut self, path: PathBuf, reason: impl std::fmt::Display) {
    warn!("跳过图像 {}: {}", path.display(), reason);
    self.skipped.push((path, reason.to_string()));
  }
}

/// 按顺序处理一批图像，单张图像失败只跳过该图像
pub struct BatchTask;

impl<'d, 'a, M, O, I> Task<I, &'d Detector<'a, M>, O> for BatchTask
where
  M: Model<Input = RgbImage, Output = DetectionSet>,
  M::Error: std::error::Error + Sync + Send + 'static,
  O: Render<ImageFrame, DetectionSet>,
  O::Error: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<ImageFrame, ImageFileInputError>>,
{
  type Output = BatchReport;
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: I,
    detector: &'d Detector<'a, M>,
    output: O,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始图像批处理任务...");
    let mut report = BatchReport::default();

    for item in input {
      let mut frame = match item {
        Ok(frame) => frame,
        Err(e) => {
          report.skip(e.path().to_path_buf(), &e);
          continue;
        }
      };

      let now = Instant::now();
      let result = match detector.annotate(&mut frame.image) {
        Ok(result) => result,
        Err(e) => {
          report.skip(frame.path, &e);
          continue;
        }
      };
      info!(
        "({}) {} 推理完成，耗时: {:.2?}, 检测数量: {}",
        frame.index,
        frame.path.display(),
        now.elapsed(),
        result.num_detections()
      );

      if let Err(e) = output.render_result(&frame, &result) {
        report.skip(frame.path, &e);
        continue;
      }
      report.processed.push(frame.path);
    }

    output.finish()?;
    info!(
      "图像批处理完成: 成功 {} 张, 跳过 {} 张",
      report.processed.len(),
      report.skipped.len()
    );
    Ok(report)
  }
}

/// 视频处理结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamReport {
  pub frames: u64,
  pub detections: usize,
}

fn average_frame_time(total: Duration, frames: u64) -> Option<Duration> {
  (frames > 0).then(|| total.div_f64(frames as f64))
}

/// 逐帧处理视频片段，任一帧失败即终止并丢弃未完成的输出
pub struct StreamTask;

impl StreamTask {
  fn process<'a, M, O, I, IE>(
    input: I,
    detector: &Detector<'a, M>,
    output: &O,
  ) -> anyhow::Result<StreamReport>
  where
    M: Model<Input = RgbImage, Output = DetectionSet>,
    M::Error: std::error::Error + Sync + Send + 'static,
    O: Render<VideoFrame, DetectionSet>,
    O::Error: std::error::Error + Sync + Send + 'static,
    I: Iterator<Item = Result<VideoFrame, IE>>,
    IE: std::error::Error + Sync + Send + 'static,
  {
    let mut report = StreamReport::default();
    let mut total = Duration::ZERO;

    for item in input {
      let mut frame = item?;
      let now = Instant::now();
      let result = detector.annotate(&mut frame.image)?;
      let elapsed_a = now.elapsed();
      output.render_result(&frame, &result)?;
      let elapsed_b = now.elapsed();
      total += elapsed_b;

      info!(
        "处理第 {} 帧 ({} ms)，耗时: {:.2?} / {:.2?}",
        frame.index,
        frame.timestamp_ns / 1_000_000,
        elapsed_a,
        elapsed_b
      );
      report.frames += 1;
      report.detections += result.num_detections();
    }

    output.finish()?;
    match average_frame_time(total, report.frames) {
      Some(average) => info!("平均每帧耗时: {:.2?}", average),
      None => warn!("片段内没有任何帧"),
    }
    Ok(report)
  }
}

impl<'d, 'a, M, O, I, IE> Task<I, &'d Detector<'a, M>, O> for StreamTask
where
  M: Model<Input = RgbImage, Output = DetectionSet>,
  M::Error: std::error::Error + Sync + Send + 'static,
  O: Render<VideoFrame, DetectionSet>,
  O::Error: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<VideoFrame, IE>>,
  IE: std::error::Error + Sync + Send + 'static,
{
  type Output = StreamReport;
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: I,
    detector: &'d Detector<'a, M>,
    output: O,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始视频处理任务...");
    match Self::process(input, detector, &output) {
      Ok(report) => {
        info!(
          "视频处理完成: 共 {} 帧, {} 个检测",
          report.frames, report.detections
        );
        Ok(report)
      }
      Err(e) => {
        error!("视频处理失败: {:#}", e);
        output.abort();
        Err(e)
      }
    }
  }
}
