// 该文件是 Linzhi （林芝） 项目的一部分。
// src/detector.rs - 单帧检测与标注
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

use image::RgbImage;
use tracing::debug;

use crate::{
  label::CategoryIndex,
  model::{DetectionSet, Model},
  output::{Draw, DrawOptions},
};

/// 检测器：对一帧图像推理，并把结果绘制到同一帧上
///
/// 引擎与类别索引只借用，同一个检测器可以处理任意多帧。
pub struct Detector<'a, M> {
  engine: &'a M,
  categories: &'a CategoryIndex,
  draw: Draw,
}

impl<'a, M> Detector<'a, M>
where
  M: Model<Input = RgbImage, Output = DetectionSet>,
{
  pub fn new(engine: &'a M, categories: &'a CategoryIndex, options: DrawOptions) -> Self {
    Self {
      engine,
      categories,
      draw: Draw::new(options),
    }
  }

  /// 只推理，不绘制
  pub fn detect(&self, image: &RgbImage) -> Result<DetectionSet, M::Error> {
    self.engine.infer(image)
  }

  /// 推理并在原图上绘制检测框，图像尺寸保持不变
  pub fn annotate(&self, image: &mut RgbImage) -> Result<DetectionSet, M::Error> {
    let result = self.detect(image)?;
    let drawn = self.draw.draw_detections(image, &result, self.categories);
    debug!(
      "检测数量: {}, 绘制数量: {}",
      result.num_detections(),
      drawn
    );
    Ok(result)
  }

  pub fn annotate_owned(&self, mut image: RgbImage) -> Result<RgbImage, M::Error> {
    self.annotate(&mut image)?;
    Ok(image)
  }
}
