// 该文件是 Linzhi （林芝） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use image::RgbImage;

/// 批处理中的一张图像
#[derive(Debug, Clone)]
pub struct ImageFrame {
  /// 在批次中的位置，从 0 开始
  pub index: usize,
  pub path: PathBuf,
  pub image: RgbImage,
}

/// 视频中的一帧
#[derive(Debug, Clone)]
pub struct VideoFrame {
  /// 子区间内的帧序号，从 0 开始
  pub index: u64,
  /// 源视频中的流时间（纳秒），由缓冲区时间戳按 segment 换算而来
  pub timestamp_ns: u64,
  pub image: RgbImage,
}

mod image_batch;
pub use self::image_batch::{ImageBatch, ImageFileInputError, read_image};

#[cfg(feature = "gstreamer_input")]
mod video_file;
#[cfg(feature = "gstreamer_input")]
pub use self::video_file::{StreamInfo, VideoFileInput, VideoFileInputError};
