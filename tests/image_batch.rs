// 该文件是 Linzhi （林芝） 项目的一部分。
// tests/image_batch.rs - 图片批处理流程测试
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

use std::path::Path;

use image::{Rgb, RgbImage};
use linzhi::{
  detector::Detector,
  input::ImageBatch,
  label::CategoryIndex,
  model::{DetectionSet, Model},
  output::{DrawOptions, SaveImageFileOutput},
  task::{BatchTask, Task},
};

/// 每张图片都在中间检测到一个“人”
struct CenterPerson;

impl Model for CenterPerson {
  type Input = RgbImage;
  type Output = DetectionSet;
  type Error = std::convert::Infallible;

  fn infer(&self, _input: &RgbImage) -> Result<DetectionSet, Self::Error> {
    Ok(
      DetectionSet::new(
        vec![[0.25, 0.25, 0.75, 0.75], [0.0, 0.0, 0.1, 0.1]],
        vec![0.87, 0.1],
        vec![1, 1],
        2,
      )
      .unwrap(),
    )
  }
}

fn label_map() -> CategoryIndex {
  CategoryIndex::load(
    Path::new(env!("CARGO_MANIFEST_DIR")).join("data/mscoco_label_map.pbtxt"),
    90,
  )
  .unwrap()
}

fn write_image(path: &Path, width: u32, height: u32) {
  RgbImage::from_pixel(width, height, Rgb([120, 130, 140]))
    .save(path)
    .unwrap();
}

#[test]
fn batch_keeps_order_and_skips_missing_images() {
  let input_dir = tempfile::tempdir().unwrap();
  let output_dir = tempfile::tempdir().unwrap();
  write_image(&input_dir.path().join("image1.jpg"), 64, 48);
  write_image(&input_dir.path().join("image3.jpg"), 32, 32);

  let categories = label_map();
  let detector = Detector::new(&CenterPerson, &categories, DrawOptions::default());
  let output = SaveImageFileOutput::new(output_dir.path())
    .unwrap()
    .with_record(categories.clone(), DrawOptions::default());

  let report = BatchTask
    .run_task(
      ImageBatch::from_pattern(input_dir.path(), 3),
      &detector,
      &output,
    )
    .unwrap();

  assert_eq!(
    report.processed,
    vec![
      input_dir.path().join("image1.jpg"),
      input_dir.path().join("image3.jpg"),
    ]
  );
  assert_eq!(report.skipped.len(), 1);
  assert_eq!(report.skipped[0].0, input_dir.path().join("image2.jpg"));

  let annotated = image::open(output_dir.path().join("image1.jpg"))
    .unwrap()
    .into_rgb8();
  assert_eq!(annotated.dimensions(), (64, 48));
  assert!(!output_dir.path().join("image2.jpg").exists());

  let record: serde_json::Value = serde_json::from_str(
    &std::fs::read_to_string(output_dir.path().join("image3.json")).unwrap(),
  )
  .unwrap();
  assert_eq!(record["detections"].as_array().unwrap().len(), 1);
  assert_eq!(record["detections"][0]["label"], "person");
  assert_eq!(record["num_detections"], 2);
}

#[test]
fn annotation_does_not_depend_on_previous_frames() {
  let categories = label_map();
  let detector = Detector::new(&CenterPerson, &categories, DrawOptions::default());
  let source = RgbImage::from_pixel(50, 40, Rgb([0, 0, 0]));

  let first = detector.annotate_owned(source.clone()).unwrap();
  let _ = detector.annotate_owned(RgbImage::new(10, 10)).unwrap();
  let again = detector.annotate_owned(source).unwrap();
  assert_eq!(first, again);
}

#[test]
fn coco_label_map_resolves_display_names() {
  let categories = label_map();
  assert_eq!(categories.len(), 80);
  assert_eq!(categories.display_name(1), "person");
  assert_eq!(categories.display_name(12), "unknown");
  assert_eq!(categories.display_name(90), "toothbrush");
}
