// 该文件是 Linzhi （林芝） 项目的一部分。
// src/output.rs - 输出定义
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

/// 标注结果的输出端
///
/// `render_result` 收到的帧已经绘制好检测框。
pub trait Render<Frame, Output> {
  type Error;

  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;

  /// 所有帧输出完毕后调用一次
  fn finish(&self) -> Result<(), Self::Error> {
    Ok(())
  }

  /// 处理失败时调用，丢弃未完成的输出
  fn abort(&self) {}
}

impl<F, D, R: Render<F, D> + ?Sized> Render<F, D> for &R {
  type Error = R::Error;

  fn render_result(&self, frame: &F, result: &D) -> Result<(), Self::Error> {
    (**self).render_result(frame, result)
  }

  fn finish(&self) -> Result<(), Self::Error> {
    (**self).finish()
  }

  fn abort(&self) {
    (**self).abort()
  }
}

mod draw;
pub use self::draw::{Draw, DrawOptions};

mod image_file;
pub use self::image_file::{DetectionRecord, ImageRecord, SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "gstreamer_output")]
mod video_file;
#[cfg(feature = "gstreamer_output")]
pub use self::video_file::{VideoFileOutput, VideoFileOutputError};
