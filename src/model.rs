// 该文件是 Linzhi （林芝） 项目的一部分。
// src/model.rs - 模型
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

use serde::Serialize;
use thiserror::Error;

pub trait Model {
  type Input: ?Sized;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

impl<M: Model + ?Sized> Model for &M {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    (**self).infer(input)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，归一化坐标
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DetectionSetError {
  #[error("检测序列长度不一致: boxes {boxes}, scores {scores}, classes {classes}")]
  LengthMismatch {
    boxes: usize,
    scores: usize,
    classes: usize,
  },
  #[error("有效检测数量 {count} 超过序列长度 {len}")]
  CountOverflow { count: usize, len: usize },
}

/// 一次推理得到的检测集合
///
/// `boxes`、`scores`、`classes` 三个序列长度一致（每个候选检测一项），
/// 只有前 `num_detections` 项有效。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionSet {
  boxes: Box<[[f32; 4]]>,
  scores: Box<[f32]>,
  classes: Box<[u32]>,
  num_detections: usize,
}

impl DetectionSet {
  pub fn new(
    boxes: Vec<[f32; 4]>,
    scores: Vec<f32>,
    classes: Vec<u32>,
    num_detections: usize,
  ) -> Result<Self, DetectionSetError> {
    if boxes.len() != scores.len() || boxes.len() != classes.len() {
      return Err(DetectionSetError::LengthMismatch {
        boxes: boxes.len(),
        scores: scores.len(),
        classes: classes.len(),
      });
    }
    if num_detections > boxes.len() {
      return Err(DetectionSetError::CountOverflow {
        count: num_detections,
        len: boxes.len(),
      });
    }

    Ok(Self {
      boxes: boxes.into_boxed_slice(),
      scores: scores.into_boxed_slice(),
      classes: classes.into_boxed_slice(),
      num_detections,
    })
  }

  pub fn empty() -> Self {
    Self::default()
  }

  pub fn boxes(&self) -> &[[f32; 4]] {
    &self.boxes
  }

  pub fn scores(&self) -> &[f32] {
    &self.scores
  }

  pub fn classes(&self) -> &[u32] {
    &self.classes
  }

  pub fn num_detections(&self) -> usize {
    self.num_detections
  }

  /// 候选检测总数（含无效项）
  pub fn len(&self) -> usize {
    self.boxes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.num_detections == 0
  }

  /// 有效检测项
  pub fn items(&self) -> impl Iterator<Item = DetectItem> + '_ {
    self
      .boxes
      .iter()
      .zip(self.scores.iter())
      .zip(self.classes.iter())
      .take(self.num_detections)
      .map(|((bbox, score), class_id)| DetectItem {
        class_id: *class_id,
        score: *score,
        bbox: *bbox,
      })
  }
}

mod ssd;
pub use self::ssd::{EngineError, SsdEngine, SsdEngineBuilder, TensorNames, decode_detections};
