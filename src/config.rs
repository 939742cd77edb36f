// 该文件是 Linzhi （林芝） 项目的一部分。
// src/config.rs - 项目参数配置
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

use clap::Args;
use thiserror::Error;

use crate::output::DrawOptions;

/// 默认模型名称
pub const DEFAULT_MODEL_NAME: &str = "ssd_mobilenet_v1_coco_11_06_2017";
/// COCO 标签映射中的类别数量
pub const DEFAULT_NUM_CLASSES: u32 = 90;

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("视频片段起止时间无效: 起始 {start}s, 结束 {end}s")]
  InvalidSubrange { start: f64, end: f64 },
  #[error("图片数量必须大于 0")]
  EmptyImageBatch,
  #[error("类别数量必须大于 0")]
  NoClasses,
  #[error("置信度阈值必须位于 [0, 1] 区间, 实际为 {0}")]
  InvalidScoreThreshold(f32),
  #[error("边框线宽必须大于 0")]
  InvalidLineThickness,
}

/// 视频片段 [start, end)，单位为秒
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Subrange {
  start: f64,
  end: f64,
}

impl Subrange {
  pub fn new(start: f64, end: f64) -> Result<Self, ConfigError> {
    if !start.is_finite() || !end.is_finite() || start < 0.0 || end <= start {
      return Err(ConfigError::InvalidSubrange { start, end });
    }
    Ok(Self { start, end })
  }

  pub fn start_secs(&self) -> f64 {
    self.start
  }

  pub fn end_secs(&self) -> f64 {
    self.end
  }

  pub fn start_ns(&self) -> u64 {
    (self.start * NANOS_PER_SECOND).round() as u64
  }

  pub fn end_ns(&self) -> u64 {
    (self.end * NANOS_PER_SECOND).round() as u64
  }

  /// 单帧的取舍：片段前跳过，片段内保留，到达 `end` 即停止
  pub fn gate(&self, pts_ns: u64) -> FrameGate {
    if pts_ns >= self.end_ns() {
      FrameGate::Stop
    } else if pts_ns < self.start_ns() {
      FrameGate::Skip
    } else {
      FrameGate::Take
    }
  }

  /// 以 `fps_num / fps_den` 帧率从 0 开始等间隔采样时，落在片段内的帧数
  pub fn expected_frames(&self, fps_num: u32, fps_den: u32) -> u64 {
    if fps_num == 0 || fps_den == 0 {
      return 0;
    }
    // 第 k 帧时间戳为 k * den / num 秒，统计满足 t < bound 的 k 的个数
    let frames_before = |bound_ns: u64| -> u64 {
      let numerator = bound_ns as u128 * fps_num as u128;
      let denominator = fps_den as u128 * NANOS_PER_SECOND as u128;
      numerator.div_ceil(denominator) as u64
    };
    frames_before(self.end_ns()) - frames_before(self.start_ns())
  }
}

/// 解码帧相对片段的取舍
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameGate {
  Skip,
  Take,
  Stop,
}

/// 按解码顺序逐帧判断，缺少时间戳的帧沿用上一帧的时间戳
#[derive(Debug, Clone, Copy)]
pub struct SubrangeGate {
  subrange: Subrange,
  last_ns: u64,
}

impl SubrangeGate {
  pub fn new(subrange: Subrange) -> Self {
    Self {
      subrange,
      last_ns: subrange.start_ns(),
    }
  }

  /// 返回取舍结果与该帧实际采用的时间戳
  pub fn admit(&mut self, pts_ns: Option<u64>) -> (FrameGate, u64) {
    let pts_ns = pts_ns.unwrap_or(self.last_ns);
    let gate = self.subrange.gate(pts_ns);
    if gate == FrameGate::Take {
      self.last_ns = pts_ns;
    }
    (gate, pts_ns)
  }
}

/// 模型与标签参数
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
  /// ONNX 模型文件路径（由冻结计算图转换而来）
  #[arg(
    long,
    value_name = "FILE",
    default_value = "object_detection/ssd_mobilenet_v1_coco_11_06_2017/frozen_inference_graph.onnx"
  )]
  pub model: PathBuf,

  /// 标签映射文件路径（protobuf 文本格式）
  #[arg(
    long,
    value_name = "FILE",
    default_value = "object_detection/data/mscoco_label_map.pbtxt"
  )]
  pub labels: PathBuf,

  /// 最大类别数量，超出的标签条目会被忽略
  #[arg(long, default_value_t = DEFAULT_NUM_CLASSES, value_name = "COUNT")]
  pub num_classes: u32,

  /// 推理线程数（默认由 ONNX Runtime 决定）
  #[arg(long, value_name = "THREADS")]
  pub intra_threads: Option<usize>,
}

impl ModelArgs {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.num_classes == 0 {
      return Err(ConfigError::NoClasses);
    }
    Ok(())
  }
}

/// 检测框绘制参数
#[derive(Args, Debug, Clone)]
pub struct DrawArgs {
  /// 绘制检测框的最低置信度 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.5, value_name = "THRESHOLD")]
  pub min_score: f32,

  /// 每张图片最多绘制的检测框数量
  #[arg(long, default_value_t = 20, value_name = "COUNT")]
  pub max_boxes: usize,

  /// 检测框线宽（像素）
  #[arg(long, default_value_t = 8, value_name = "PIXELS")]
  pub line_thickness: u32,
}

impl DrawArgs {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&self.min_score) {
      return Err(ConfigError::InvalidScoreThreshold(self.min_score));
    }
    if self.line_thickness == 0 {
      return Err(ConfigError::InvalidLineThickness);
    }
    Ok(())
  }

  pub fn options(&self) -> DrawOptions {
    DrawOptions {
      min_score: self.min_score,
      max_boxes: self.max_boxes,
      line_thickness: self.line_thickness,
    }
  }
}

/// 静态图片批处理参数
#[derive(Args, Debug, Clone)]
pub struct ImageBatchArgs {
  /// 测试图片目录，图片按 image1.jpg, image2.jpg, ... 命名
  #[arg(long, default_value = "object_detection/test_images", value_name = "DIR")]
  pub image_dir: PathBuf,

  /// 测试图片数量
  #[arg(long, default_value_t = 2, value_name = "COUNT")]
  pub image_count: usize,

  /// 标注后图片的输出目录
  #[arg(long, default_value = "output_images", value_name = "DIR")]
  pub image_output_dir: PathBuf,

  /// 同时为每张图片写出 JSON 检测记录
  #[arg(long)]
  pub record: bool,
}

impl ImageBatchArgs {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.image_count == 0 {
      return Err(ConfigError::EmptyImageBatch);
    }
    Ok(())
  }
}

/// 视频处理参数
#[derive(Args, Debug, Clone)]
pub struct VideoArgs {
  /// 输入视频路径
  #[arg(long, default_value = "input.mp4", value_name = "FILE")]
  pub video: PathBuf,

  /// 片段起始时间（秒）
  #[arg(long, default_value_t = 0.0, value_name = "SECONDS")]
  pub start: f64,

  /// 片段结束时间（秒）
  #[arg(long, default_value_t = 15.0, value_name = "SECONDS")]
  pub end: f64,

  /// 输出视频路径（不含音轨）
  #[arg(long, default_value = "output.mp4", value_name = "FILE")]
  pub output: PathBuf,
}

impl VideoArgs {
  pub fn subrange(&self) -> Result<Subrange, ConfigError> {
    Subrange::new(self.start, self.end)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    self.subrange().map(|_| ())
  }
}

/// 完整流水线配置：模型、图片批处理与视频处理
#[derive(Args, Debug, Clone)]
pub struct PipelineConfig {
  #[command(flatten)]
  pub model: ModelArgs,

  #[command(flatten)]
  pub draw: DrawArgs,

  #[command(flatten)]
  pub images: ImageBatchArgs,

  #[command(flatten)]
  pub video: VideoArgs,
}

impl PipelineConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    self.model.validate()?;
    self.draw.validate()?;
    self.images.validate()?;
    self.video.validate()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser, Debug)]
  struct Cli {
    #[command(flatten)]
    config: PipelineConfig,
  }

  #[test]
  fn defaults_match_notebook_constants() {
    let cli = Cli::parse_from(["linzhi"]);
    let config = cli.config;
    assert!(config.validate().is_ok());
    assert_eq!(config.model.num_classes, 90);
    assert!(
      config
        .model
        .model
        .to_string_lossy()
        .contains(DEFAULT_MODEL_NAME)
    );
    assert_eq!(config.images.image_count, 2);
    assert_eq!(config.video.start, 0.0);
    assert_eq!(config.video.end, 15.0);
    assert_eq!(config.video.output, PathBuf::from("output.mp4"));
    assert_eq!(config.draw.line_thickness, 8);
  }

  #[test]
  fn rejects_reversed_subrange() {
    let cli = Cli::parse_from(["linzhi", "--start", "10", "--end", "5"]);
    assert_eq!(
      cli.config.validate(),
      Err(ConfigError::InvalidSubrange {
        start: 10.0,
        end: 5.0
      })
    );
  }

  #[test]
  fn rejects_out_of_range_score() {
    let cli = Cli::parse_from(["linzhi", "--min-score", "1.5"]);
    assert_eq!(
      cli.config.validate(),
      Err(ConfigError::InvalidScoreThreshold(1.5))
    );
  }

  #[test]
  fn rejects_empty_batch() {
    let cli = Cli::parse_from(["linzhi", "--image-count", "0"]);
    assert_eq!(cli.config.validate(), Err(ConfigError::EmptyImageBatch));
  }

  #[test]
  fn gate_boundaries() {
    let range = Subrange::new(1.0, 2.0).unwrap();
    assert_eq!(range.gate(0), FrameGate::Skip);
    assert_eq!(range.gate(999_999_999), FrameGate::Skip);
    assert_eq!(range.gate(1_000_000_000), FrameGate::Take);
    assert_eq!(range.gate(1_999_999_999), FrameGate::Take);
    assert_eq!(range.gate(2_000_000_000), FrameGate::Stop);
    assert_eq!(range.gate(u64::MAX), FrameGate::Stop);
  }

  #[test]
  fn missing_timestamp_reuses_previous_frame() {
    let mut gate = SubrangeGate::new(Subrange::new(1.0, 2.0).unwrap());
    // 第一帧就没有时间戳时按片段起点处理
    assert_eq!(gate.admit(None), (FrameGate::Take, 1_000_000_000));
    assert_eq!(gate.admit(Some(1_500_000_000)), (FrameGate::Take, 1_500_000_000));
    assert_eq!(gate.admit(None), (FrameGate::Take, 1_500_000_000));
    // 被跳过的帧不更新时间戳
    assert_eq!(gate.admit(Some(500_000_000)), (FrameGate::Skip, 500_000_000));
    assert_eq!(gate.admit(None), (FrameGate::Take, 1_500_000_000));
    assert_eq!(gate.admit(Some(2_000_000_000)), (FrameGate::Stop, 2_000_000_000));
  }

  #[test]
  fn gate_takes_every_frame_of_fifteen_seconds() {
    let range = Subrange::new(0.0, 15.0).unwrap();
    let mut gate = SubrangeGate::new(range);
    let mut taken = 0u64;
    // 解码器给出的时间戳为 k / 30 秒向下取整到纳秒
    for k in 0u64.. {
      match gate.admit(Some(k * 1_000_000_000 / 30)).0 {
        FrameGate::Take => taken += 1,
        FrameGate::Skip => {}
        FrameGate::Stop => break,
      }
    }
    assert_eq!(taken, 450);
    assert_eq!(taken, range.expected_frames(30, 1));
  }

  #[test]
  fn gate_skips_frames_before_offset_start() {
    let range = Subrange::new(2.0, 3.0).unwrap();
    let mut gate = SubrangeGate::new(range);
    let verdicts: Vec<_> = (0..40u64)
      .map(|k| gate.admit(Some(k * 100_000_000)).0)
      .collect();
    assert_eq!(verdicts.iter().filter(|v| **v == FrameGate::Skip).count(), 20);
    assert_eq!(verdicts.iter().filter(|v| **v == FrameGate::Take).count(), 10);
    assert_eq!(verdicts[30], FrameGate::Stop);
  }

  #[test]
  fn expected_frames_for_fifteen_seconds() {
    let range = Subrange::new(0.0, 15.0).unwrap();
    assert_eq!(range.expected_frames(30, 1), 450);
    assert_eq!(range.expected_frames(25, 1), 375);
    // 29.97 fps: 最后一帧位于 449 * 1001 / 30000 ≈ 14.985s
    assert_eq!(range.expected_frames(30000, 1001), 450);
    assert_eq!(range.expected_frames(0, 1), 0);
  }

  #[test]
  fn expected_frames_with_offset_start() {
    let range = Subrange::new(2.0, 3.0).unwrap();
    assert_eq!(range.expected_frames(10, 1), 10);
    let range = Subrange::new(0.05, 0.25).unwrap();
    // 帧时间戳 0.1, 0.2
    assert_eq!(range.expected_frames(10, 1), 2);
  }
}
