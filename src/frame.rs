// 该文件是 Linzhi （林芝） 项目的一部分。
// src/frame.rs - NHWC 帧定义
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
use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("通道数不匹配: 期望 3, 实际 {0}")]
  ChannelMismatch(usize),
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("图像尺寸无效: {width}x{height}")]
  EmptyShape { width: usize, height: usize },
}

/// 以 NHWC（批大小为 1）布局提供像素数据的帧
pub trait AsNhwcFrame {
  fn width(&self) -> usize;
  fn height(&self) -> usize;
  fn as_nhwc(&self) -> &[u8];

  fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// 扩展为单元素批次后的张量形状 `[1, H, W, C]`
  fn batch_shape(&self) -> [usize; 4] {
    [1, self.height(), self.width(), self.channels()]
  }
}

impl AsNhwcFrame for RgbImage {
  fn width(&self) -> usize {
    self.width() as usize
  }

  fn height(&self) -> usize {
    self.height() as usize
  }

  fn as_nhwc(&self) -> &[u8] {
    self.as_raw()
  }
}

fn check_shape(height: usize, width: usize) -> Result<(), FrameError> {
  if height == 0 || width == 0 || height > u32::MAX as usize || width > u32::MAX as usize {
    return Err(FrameError::EmptyShape { width, height });
  }
  Ok(())
}

/// 由 H x W x C 的原始数组构造 RGB 图像，通道数必须为 3
pub fn rgb_image_from_raw(
  height: usize,
  width: usize,
  channels: usize,
  data: Vec<u8>,
) -> Result<RgbImage, FrameError> {
  if channels != RGB_CHANNELS {
    return Err(FrameError::ChannelMismatch(channels));
  }
  check_shape(height, width)?;

  let expected = height * width * RGB_CHANNELS;
  if data.len() != expected {
    return Err(FrameError::LengthMismatch {
      expected,
      actual: data.len(),
    });
  }

  RgbImage::from_raw(width as u32, height as u32, data).ok_or(FrameError::LengthMismatch {
    expected,
    actual: 0,
  })
}

/// 由带行对齐（stride）的 RGB 数据构造紧凑排列的 RGB 图像
pub fn rgb_image_from_strided(
  width: usize,
  height: usize,
  stride: usize,
  data: &[u8],
) -> Result<RgbImage, FrameError> {
  check_shape(height, width)?;

  let row_bytes = width * RGB_CHANNELS;
  let expected = stride.max(row_bytes) * (height - 1) + row_bytes;
  if stride < row_bytes || data.len() < expected {
    return Err(FrameError::LengthMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut image_data = Vec::with_capacity(row_bytes * height);
  for y in 0..height {
    let row_start = y * stride;
    image_data.extend_from_slice(&data[row_start..row_start + row_bytes]);
  }

  rgb_image_from_raw(height, width, RGB_CHANNELS, image_data)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn batch_shape_is_nhwc() {
    let image = RgbImage::new(4, 3);
    assert_eq!(image.batch_shape(), [1, 3, 4, 3]);
    assert_eq!(image.as_nhwc().len(), 36);
  }

  #[test]
  fn raw_rejects_non_rgb_channels() {
    let err = rgb_image_from_raw(2, 2, 4, vec![0; 16]).unwrap_err();
    assert_eq!(err, FrameError::ChannelMismatch(4));
    let err = rgb_image_from_raw(2, 2, 1, vec![0; 4]).unwrap_err();
    assert_eq!(err, FrameError::ChannelMismatch(1));
  }

  #[test]
  fn raw_rejects_length_mismatch() {
    let err = rgb_image_from_raw(2, 2, 3, vec![0; 11]).unwrap_err();
    assert_eq!(
      err,
      FrameError::LengthMismatch {
        expected: 12,
        actual: 11
      }
    );
  }

  #[test]
  fn raw_keeps_hwc_order() {
    let data: Vec<u8> = (0..18).collect();
    let image = rgb_image_from_raw(2, 3, 3, data).unwrap();
    assert_eq!(image.dimensions(), (3, 2));
    assert_eq!(image.get_pixel(0, 0).0, [0, 1, 2]);
    assert_eq!(image.get_pixel(2, 1).0, [15, 16, 17]);
  }

  #[test]
  fn strided_drops_padding() {
    // 2x2 图像，每行 6 字节数据 + 2 字节填充
    let data = [1, 2, 3, 4, 5, 6, 0, 0, 7, 8, 9, 10, 11, 12, 0, 0];
    let image = rgb_image_from_strided(2, 2, 8, &data).unwrap();
    assert_eq!(image.as_raw(), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
  }

  #[test]
  fn strided_accepts_unpadded_last_row() {
    let data = [1, 2, 3, 0, 4, 5, 6];
    let image = rgb_image_from_strided(1, 2, 4, &data).unwrap();
    assert_eq!(image.as_raw(), &[1, 2, 3, 4, 5, 6]);
  }

  #[test]
  fn empty_shape_is_rejected() {
    let err = rgb_image_from_raw(0, 2, 3, vec![]).unwrap_err();
    assert_eq!(err, FrameError::EmptyShape { width: 2, height: 0 });
  }
}
