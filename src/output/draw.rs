// 该文件是 Linzhi （林芝） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::{
  label::CategoryIndex,
  model::{DetectItem, DetectionSet},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_MARGIN: i32 = 2;
const LABEL_TEXT_COLOR: [u8; 3] = [0, 0, 0];
const PALETTE_SIZE: usize = 90;

/// 绘制参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawOptions {
  /// 低于（或等于）该置信度的检测框不绘制
  pub min_score: f32,
  /// 最多绘制的检测框数量
  pub max_boxes: usize,
  /// 边框线宽（像素）
  pub line_thickness: u32,
}

impl Default for DrawOptions {
  fn default() -> Self {
    Self {
      min_score: 0.5,
      max_boxes: 20,
      line_thickness: 8,
    }
  }
}

/// 可视化工具
pub struct Draw {
  font: FontArc,
  font_scale: PxScale,
  colors: Vec<Rgb<u8>>,
  options: DrawOptions,
}

impl Default for Draw {
  fn default() -> Self {
    Self::new(DrawOptions::default())
  }
}

impl Draw {
  pub fn new(options: DrawOptions) -> Self {
    let font_data = include_bytes!("../../assets/DejaVuSans.ttf");
    let font = FontArc::try_from_slice(font_data).expect("无法加载嵌入的字体文件");

    // 每个类别一种颜色
    let colors = (0..PALETTE_SIZE)
      .map(|i| {
        let hue = (i as f32 / PALETTE_SIZE as f32) * 360.0;
        hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();

    Self {
      font,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      colors,
      options,
    }
  }

  pub fn color_for(&self, class_id: u32) -> Rgb<u8> {
    self.colors[class_id as usize % self.colors.len()]
  }

  /// 需要绘制的检测项：取前 `max_boxes` 个有效检测，再按置信度过滤
  pub fn visible_items<'r>(
    &self,
    result: &'r DetectionSet,
  ) -> impl Iterator<Item = DetectItem> + 'r {
    let DrawOptions {
      min_score,
      max_boxes,
      ..
    } = self.options;
    result
      .items()
      .take(max_boxes)
      .filter(move |item| item.score > min_score)
  }

  /// 在图像上绘制检测结果，返回实际绘制的检测框数量
  pub fn draw_detections(
    &self,
    image: &mut RgbImage,
    result: &DetectionSet,
    categories: &CategoryIndex,
  ) -> usize {
    let mut drawn = 0;
    for item in self.visible_items(result) {
      let label = format!(
        "{}: {}%",
        categories.display_name(item.class_id),
        (item.score * 100.0) as u32
      );
      if self.draw_bbox_with_label(image, &item.bbox, &label, self.color_for(item.class_id)) {
        drawn += 1;
      }
    }
    drawn
  }

  // bbox 为归一化坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label(
    &self,
    image: &mut RgbImage,
    bbox: &[f32; 4],
    label: &str,
    color: Rgb<u8>,
  ) -> bool {
    let (w, h) = (image.width() as f32, image.height() as f32);
    if image.width() == 0 || image.height() == 0 {
      return false;
    }

    let x_min = (bbox[0] * w).floor() as i32;
    let y_min = (bbox[1] * h).floor() as i32;
    let x_max = (bbox[2] * w).ceil() as i32;
    let y_max = (bbox[3] * h).ceil() as i32;

    if x_min >= x_max || y_min >= y_max {
      return false;
    }

    // 线宽以边框为中心向两侧展开，越界部分由 imageproc 裁剪
    let thickness = self.options.line_thickness as i32;
    let half = thickness / 2;
    for t in 0..thickness {
      let offset = t - half;
      let width = (x_max - x_min) - 2 * offset;
      let height = (y_max - y_min) - 2 * offset;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + offset, y_min + offset).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let (text_width, text_height) = text_size(self.font_scale, &self.font, label);
    let label_width = text_width as i32 + 2 * LABEL_MARGIN;
    let label_height = text_height as i32 + 2 * LABEL_MARGIN;

    // 边框上方放得下时绘制在上方，否则绘制在边框内侧顶部
    let label_y = if y_min - half - label_height >= 0 {
      y_min - half - label_height
    } else {
      (y_min + half).max(0)
    };
    let label_x = (x_min - half).max(0);

    if label_width > 0 && label_height > 0 && label_x < image.width() as i32 {
      let rect = Rect::at(label_x, label_y).of_size(label_width as u32, label_height as u32);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        Rgb(LABEL_TEXT_COLOR),
        label_x + LABEL_MARGIN,
        label_y + LABEL_MARGIN,
        self.font_scale,
        &self.font,
        label,
      );
    }

    true
  }
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}
