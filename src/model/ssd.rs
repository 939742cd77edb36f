// 该文件是 Linzhi （林芝） 项目的一部分。
// src/model/ssd.rs - SSD 检测模型推理引擎
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

//! 基于 ONNX Runtime 的 SSD 检测引擎
//!
//! 模型为冻结计算图转换得到的 ONNX 文件，输入为 `[1, H, W, 3]` 的 u8 张量，
//! 输出检测框、置信度、类别以及有效检测数量四个张量。

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::RgbImage;
use ort::session::Session;
use ort::value::Tensor;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  frame::{AsNhwcFrame, RGB_CHANNELS},
  model::{DetectionSet, DetectionSetError, Model},
};

const INPUT_CANDIDATES: [&str; 2] = ["image_tensor:0", "image_tensor"];
const BOXES_CANDIDATES: [&str; 2] = ["detection_boxes:0", "detection_boxes"];
const SCORES_CANDIDATES: [&str; 2] = ["detection_scores:0", "detection_scores"];
const CLASSES_CANDIDATES: [&str; 2] = ["detection_classes:0", "detection_classes"];
const NUM_DETECTIONS_CANDIDATES: [&str; 2] = ["num_detections:0", "num_detections"];

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("推理会话创建失败: {0}")]
  SessionBuildError(String),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("输入形状不匹配: {0:?}, 期望 [1, H, W, 3]")]
  InputShapeMismatch([usize; 4]),
  #[error("模型缺少输出: {0}")]
  MissingOutput(&'static str),
  #[error("输出形状不匹配: {0}")]
  OutputShapeMismatch(String),
  #[error("推理会话不可用")]
  SessionPoisoned,
  #[error("检测结果无效: {0}")]
  InvalidDetectionSet(#[from] DetectionSetError),
}

/// 模型输入输出张量名称
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorNames {
  pub input: &'static str,
  pub boxes: &'static str,
  pub scores: &'static str,
  pub classes: &'static str,
  pub num_detections: Option<&'static str>,
}

impl TensorNames {
  fn resolve(inputs: &[&str], outputs: &[&str]) -> Result<Self, EngineError> {
    let find = |available: &[&str], candidates: [&'static str; 2]| -> Option<&'static str> {
      candidates
        .into_iter()
        .find(|candidate| available.contains(candidate))
    };
    let require = |available: &[&str],
                   candidates: [&'static str; 2]|
     -> Result<&'static str, EngineError> {
      find(available, candidates)
        .ok_or_else(|| EngineError::ModelInvalid(format!("缺少张量 {}", candidates[0])))
    };

    Ok(Self {
      input: require(inputs, INPUT_CANDIDATES)?,
      boxes: require(outputs, BOXES_CANDIDATES)?,
      scores: require(outputs, SCORES_CANDIDATES)?,
      classes: require(outputs, CLASSES_CANDIDATES)?,
      num_detections: find(outputs, NUM_DETECTIONS_CANDIDATES),
    })
  }
}

pub struct SsdEngineBuilder {
  model_path: PathBuf,
  intra_threads: Option<usize>,
}

impl SsdEngineBuilder {
  pub fn new(model_path: impl AsRef<Path>) -> Self {
    Self {
      model_path: model_path.as_ref().to_path_buf(),
      intra_threads: None,
    }
  }

  pub fn intra_threads(mut self, threads: Option<usize>) -> Self {
    self.intra_threads = threads;
    self
  }

  pub fn build(self) -> Result<SsdEngine, EngineError> {
    info!("加载模型文件: {}", self.model_path.display());
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 ONNX Runtime 推理会话");
    let mut builder =
      Session::builder().map_err(|e| EngineError::SessionBuildError(e.to_string()))?;
    if let Some(threads) = self.intra_threads {
      debug!("推理线程数: {}", threads);
      builder = builder
        .with_intra_threads(threads)
        .map_err(|e| EngineError::SessionBuildError(e.to_string()))?;
    }
    let session = builder
      .commit_from_memory(&model_data)
      .map_err(|e| EngineError::SessionBuildError(e.to_string()))?;

    let names = {
      let inputs: Vec<&str> = session.inputs.iter().map(|i| i.name.as_str()).collect();
      let outputs: Vec<&str> = session.outputs.iter().map(|o| o.name.as_str()).collect();
      debug!("模型输入: {:?}", inputs);
      debug!("模型输出: {:?}", outputs);
      TensorNames::resolve(&inputs, &outputs)?
    };

    if names.num_detections.is_none() {
      warn!("模型没有 num_detections 输出，全部候选检测均视为有效");
    }
    info!("模型加载完成");

    Ok(SsdEngine {
      session: Mutex::new(session),
      names,
    })
  }
}

/// 推理引擎句柄：加载完成的模型与其执行上下文
///
/// 创建一次、以引用方式供每次推理使用，析构时释放。
pub struct SsdEngine {
  session: Mutex<Session>,
  names: TensorNames,
}

impl SsdEngine {
  fn run<F: AsNhwcFrame + ?Sized>(&self, input: &F) -> Result<DetectionSet, EngineError> {
    let shape = input.batch_shape();
    if shape[1] == 0 || shape[2] == 0 || shape[3] != RGB_CHANNELS {
      return Err(EngineError::InputShapeMismatch(shape));
    }

    debug!("设置模型输入: {:?}", shape);
    let tensor = Tensor::from_array((shape, input.as_nhwc().to_vec().into_boxed_slice()))?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| EngineError::SessionPoisoned)?;

    debug!("执行模型推理");
    let outputs = session.run(ort::inputs![self.names.input => tensor])?;

    let extract = |name: &'static str| -> Result<Vec<f32>, EngineError> {
      let value = outputs.get(name).ok_or(EngineError::MissingOutput(name))?;
      let (_shape, data) = value.try_extract_tensor::<f32>()?;
      Ok(data.to_vec())
    };

    let boxes = extract(self.names.boxes)?;
    let scores = extract(self.names.scores)?;
    let classes = extract(self.names.classes)?;
    let num_detections = match self.names.num_detections {
      Some(name) => extract(name)?.first().copied(),
      None => None,
    };

    decode_detections(&boxes, &scores, &classes, num_detections)
  }
}

impl Model for SsdEngine {
  type Input = RgbImage;
  type Output = DetectionSet;
  type Error = EngineError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let now = std::time::Instant::now();
    let result = self.run(input)?;
    debug!(
      "推理完成，耗时: {:.2?}，有效检测 {} 个",
      now.elapsed(),
      result.num_detections()
    );
    Ok(result)
  }
}

/// 将模型原始输出整理为检测集合
///
/// `boxes` 为展平的 `[N, 4]`，每项顺序为 `[y_min, x_min, y_max, x_max]`，
/// 输出统一转换为 `[x_min, y_min, x_max, y_max]` 并截断到 `[0, 1]`。
pub fn decode_detections(
  boxes: &[f32],
  scores: &[f32],
  classes: &[f32],
  num_detections: Option<f32>,
) -> Result<DetectionSet, EngineError> {
  if boxes.len() % 4 != 0 {
    return Err(EngineError::OutputShapeMismatch(format!(
      "检测框数据长度 {} 不是 4 的倍数",
      boxes.len()
    )));
  }
  let len = boxes.len() / 4;
  if scores.len() != len || classes.len() != len {
    return Err(EngineError::OutputShapeMismatch(format!(
      "检测框 {} 个, 置信度 {} 个, 类别 {} 个",
      len,
      scores.len(),
      classes.len()
    )));
  }

  let count = match num_detections {
    Some(value) if value.is_finite() && value > 0.0 => {
      let count = value.round() as usize;
      if count > len {
        warn!("模型报告的检测数量 {} 超过候选数量 {}，已截断", count, len);
      }
      count.min(len)
    }
    Some(_) => 0,
    None => len,
  };

  let boxes = boxes
    .chunks_exact(4)
    .map(|b| {
      [
        b[1].clamp(0.0, 1.0),
        b[0].clamp(0.0, 1.0),
        b[3].clamp(0.0, 1.0),
        b[2].clamp(0.0, 1.0),
      ]
    })
    .collect();
  let scores = scores.iter().map(|s| s.clamp(0.0, 1.0)).collect();
  let classes = classes
    .iter()
    .map(|c| if c.is_finite() && *c > 0.0 { c.round() as u32 } else { 0 })
    .collect();

  Ok(DetectionSet::new(boxes, scores, classes, count)?)
}
