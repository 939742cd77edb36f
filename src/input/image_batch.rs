// 该文件是 Linzhi （林芝） 项目的一部分。
// src/input/image_batch.rs - 按顺序读取一批图像文件
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

use std::path::{Path, PathBuf};

use image::ImageReader;
use thiserror::Error;
use tracing::{error, info};

use crate::input::ImageFrame;

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("无法打开图像 {path}: {source}")]
  IoError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("无法解码图像 {path}: {source}")]
  ImageLoadError {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
}

impl ImageFileInputError {
  pub fn path(&self) -> &Path {
    match self {
      ImageFileInputError::IoError { path, .. } => path,
      ImageFileInputError::ImageLoadError { path, .. } => path,
    }
  }
}

/// 固定顺序的图像列表，迭代时逐个读取并解码为 RGB
///
/// 单张图像读取失败不会中断迭代，错误随对应项返回。
#[derive(Debug, Clone)]
pub struct ImageBatch {
  paths: Vec<PathBuf>,
  cursor: usize,
}

impl ImageBatch {
  /// `dir/image1.jpg` 到 `dir/image{count}.jpg`
  pub fn from_pattern(dir: impl AsRef<Path>, count: usize) -> Self {
    let dir = dir.as_ref();
    let paths = (1..=count)
      .map(|i| dir.join(format!("image{}.jpg", i)))
      .collect();
    Self::from_paths(paths)
  }

  pub fn from_paths(paths: Vec<PathBuf>) -> Self {
    Self { paths, cursor: 0 }
  }

  pub fn paths(&self) -> &[PathBuf] {
    &self.paths
  }

  pub fn len(&self) -> usize {
    self.paths.len()
  }

  pub fn is_empty(&self) -> bool {
    self.paths.is_empty()
  }
}

/// 读取单张图像并转换为 RGB（灰度或带透明通道的图像也会被转换）
pub fn read_image(path: &Path) -> Result<image::RgbImage, ImageFileInputError> {
  let reader = ImageReader::open(path)
    .map_err(|source| ImageFileInputError::IoError {
      path: path.to_path_buf(),
      source,
    })?
    .with_guessed_format()
    .map_err(|source| ImageFileInputError::IoError {
      path: path.to_path_buf(),
      source,
    })?;
  let image = reader
    .decode()
    .map_err(|source| ImageFileInputError::ImageLoadError {
      path: path.to_path_buf(),
      source,
    })?;
  Ok(image.into_rgb8())
}

impl Iterator for ImageBatch {
  type Item = Result<ImageFrame, ImageFileInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let index = self.cursor;
    let path = self.paths.get(index)?.clone();
    self.cursor += 1;

    let item = read_image(&path).map(|image| {
      info!(
        "读取图像 {}: {}x{}",
        path.display(),
        image.width(),
        image.height()
      );
      ImageFrame { index, path, image }
    });
    if let Err(e) = &item {
      error!("读取图像失败: {}", e);
    }
    Some(item)
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    let remaining = self.paths.len() - self.cursor;
    (remaining, Some(remaining))
  }
}

impl ExactSizeIterator for ImageBatch {}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{GrayImage, Luma, Rgb, RgbImage};

  #[test]
  fn pattern_is_one_based() {
    let batch = ImageBatch::from_pattern("object_detection/test_images", 2);
    assert_eq!(
      batch.paths(),
      &[
        PathBuf::from("object_detection/test_images/image1.jpg"),
        PathBuf::from("object_detection/test_images/image2.jpg"),
      ]
    );
  }

  #[test]
  fn missing_file_yields_error_and_continues() {
    let dir = tempfile::tempdir().unwrap();
    let present = dir.path().join("b.png");
    RgbImage::from_pixel(3, 2, Rgb([9, 8, 7]))
      .save(&present)
      .unwrap();

    let mut batch = ImageBatch::from_paths(vec![dir.path().join("a.png"), present.clone()]);
    assert_eq!(batch.len(), 2);

    let first = batch.next().unwrap().unwrap_err();
    assert_eq!(first.path(), dir.path().join("a.png"));

    let second = batch.next().unwrap().unwrap();
    assert_eq!(second.index, 1);
    assert_eq!(second.path, present);
    assert_eq!(second.image.dimensions(), (3, 2));
    assert!(batch.next().is_none());
  }

  #[test]
  fn grayscale_is_converted_to_rgb() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gray.png");
    GrayImage::from_pixel(2, 2, Luma([100])).save(&path).unwrap();

    let image = read_image(&path).unwrap();
    assert_eq!(image.get_pixel(1, 1).0, [100, 100, 100]);
  }

  #[test]
  fn undecodable_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.jpg");
    std::fs::write(&path, b"not an image").unwrap();

    let err = read_image(&path).unwrap_err();
    assert!(matches!(err, ImageFileInputError::ImageLoadError { .. }));
  }
}
