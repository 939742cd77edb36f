// 该文件是 Linzhi （林芝） 项目的一部分。
// src/output/image_file.rs - 保存标注后的图像文件
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

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  input::ImageFrame,
  label::CategoryIndex,
  model::DetectionSet,
  output::{DrawOptions, Render},
};

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("记录序列化错误: {0}")]
  RecordError(#[from] serde_json::Error),
  #[error("无效的图像文件名: {0}")]
  InvalidFileName(PathBuf),
}

/// 单个检测的记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRecord {
  pub class_id: u32,
  pub label: String,
  pub score: f32,
  pub bbox: [f32; 4],
}

/// 单张图像的检测记录，与标注图像一同写入输出目录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRecord {
  pub source: PathBuf,
  pub width: u32,
  pub height: u32,
  pub num_detections: usize,
  pub detections: Vec<DetectionRecord>,
}

impl ImageRecord {
  /// 只记录会被绘制的检测（同样的置信度阈值与数量上限）
  pub fn new(
    frame: &ImageFrame,
    result: &DetectionSet,
    categories: &CategoryIndex,
    options: &DrawOptions,
  ) -> Self {
    let detections = result
      .items()
      .take(options.max_boxes)
      .filter(|item| item.score > options.min_score)
      .map(|item| DetectionRecord {
        class_id: item.class_id,
        label: categories.display_name(item.class_id).to_string(),
        score: item.score,
        bbox: item.bbox,
      })
      .collect();

    Self {
      source: frame.path.clone(),
      width: frame.image.width(),
      height: frame.image.height(),
      num_detections: result.num_detections(),
      detections,
    }
  }
}

struct RecordSettings {
  categories: CategoryIndex,
  options: DrawOptions,
}

/// 将标注图像以原文件名保存到输出目录
pub struct SaveImageFileOutput {
  directory: PathBuf,
  record: Option<RecordSettings>,
}

impl SaveImageFileOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Result<Self, SaveImageFileError> {
    let directory = directory.into();
    std::fs::create_dir_all(&directory)?;
    info!("图像输出目录: {}", directory.display());
    Ok(Self {
      directory,
      record: None,
    })
  }

  /// 同时为每张图像写入 JSON 检测记录
  pub fn with_record(mut self, categories: CategoryIndex, options: DrawOptions) -> Self {
    self.record = Some(RecordSettings {
      categories,
      options,
    });
    self
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn image_path(&self, frame: &ImageFrame) -> Result<PathBuf, SaveImageFileError> {
    let file_name = frame
      .path
      .file_name()
      .ok_or_else(|| SaveImageFileError::InvalidFileName(frame.path.clone()))?;
    Ok(self.directory.join(file_name))
  }

  fn save_record(&self, image_path: &Path, record: &ImageRecord) -> Result<(), SaveImageFileError> {
    let record_path = image_path.with_extension("json");
    let writer = BufWriter::new(File::create(&record_path)?);
    serde_json::to_writer_pretty(writer, record)?;
    info!("保存检测记录到文件: {}", record_path.display());
    Ok(())
  }
}

impl Render<ImageFrame, DetectionSet> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &ImageFrame, result: &DetectionSet) -> Result<(), Self::Error> {
    let path = self.image_path(frame)?;
    frame.image.save(&path)?;
    warn!("保存图像到文件: {}", path.display());

    if let Some(settings) = &self.record {
      let record = ImageRecord::new(frame, result, &settings.categories, &settings.options);
      self.save_record(&path, &record)?;
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  fn frame(name: &str) -> ImageFrame {
    ImageFrame {
      index: 0,
      path: PathBuf::from("images").join(name),
      image: RgbImage::new(8, 6),
    }
  }

  #[test]
  fn record_uses_draw_filters() {
    let set = DetectionSet::new(
      vec![[0.0, 0.0, 0.5, 0.5], [0.5, 0.5, 1.0, 1.0], [0.1, 0.1, 0.2, 0.2]],
      vec![0.95, 0.4, 0.7],
      vec![1, 2, 99],
      3,
    )
    .unwrap();
    let options = DrawOptions {
      min_score: 0.5,
      max_boxes: 20,
      line_thickness: 8,
    };
    let record = ImageRecord::new(&frame("a.jpg"), &set, &CategoryIndex::default(), &options);

    assert_eq!(record.num_detections, 3);
    assert_eq!(record.detections.len(), 2);
    assert_eq!(record.detections[1].class_id, 99);
    assert_eq!(record.detections[1].label, "unknown");
    assert_eq!((record.width, record.height), (8, 6));
  }

  #[test]
  fn image_path_keeps_file_name() {
    let dir = tempfile::tempdir().unwrap();
    let output = SaveImageFileOutput::new(dir.path().join("out")).unwrap();
    let path = output.image_path(&frame("image1.jpg")).unwrap();
    assert_eq!(path, dir.path().join("out").join("image1.jpg"));
    assert!(output.directory().is_dir());
  }

  #[test]
  fn writes_image_and_record() {
    let dir = tempfile::tempdir().unwrap();
    let output = SaveImageFileOutput::new(dir.path())
      .unwrap()
      .with_record(CategoryIndex::default(), DrawOptions::default());
    let set = DetectionSet::new(vec![[0.0, 0.0, 1.0, 1.0]], vec![0.8], vec![3], 1).unwrap();

    output.render_result(&frame("image2.png"), &set).unwrap();

    assert!(dir.path().join("image2.png").is_file());
    let text = std::fs::read_to_string(dir.path().join("image2.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["detections"][0]["class_id"], 3);
    assert_eq!(value["num_detections"], 1);
  }
}
