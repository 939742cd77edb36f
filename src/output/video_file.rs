// 该文件是 Linzhi （林芝） 项目的一部分。
// src/output/video_file.rs - GStreamer 视频文件输出
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

//! # GStreamer 视频文件输出
//!
//! 将标注后的 RGB 帧按源视频帧率编码为 H.264，封装为 MP4 文件。
//! 输出只有视频轨道，不写入音频。
//!
//! ## 系统依赖
//!
//! 需要 `x264enc`（gst-plugins-ugly）、`h264parse` 与 `mp4mux`（gst-plugins-good/bad）。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{input::VideoFrame, model::DetectionSet, output::Render};

const APPSRC_NAME: &str = "src";
const FILESINK_NAME: &str = "sink";

/// 编码管道：appsrc -> I420 -> H.264 -> MP4，没有音频分支
pub const PIPELINE_DESCRIPTION: &str = "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! mp4mux ! filesink name=sink";

#[derive(Error, Debug)]
pub enum VideoFileOutputError {
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作错误: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("无法获取 appsrc 元素")]
  AppSrcNotFound,
  #[error("无法获取 filesink 元素")]
  FileSinkNotFound,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("状态改变错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("数据流错误: {0:?}")]
  FlowError(gst::FlowError),
  #[error("输出路径无效: {0}")]
  InvalidPath(PathBuf),
  #[error("帧率无效: {0}/{1}")]
  InvalidFramerate(i32, i32),
  #[error("帧尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  FrameSizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("视频输出已结束")]
  AlreadyFinished,
}

/// 写入 MP4 文件的视频输出
///
/// 帧的时间戳按帧序号和帧率生成，与源视频保持相同的节奏。
/// 必须调用 [`Render::finish`] 才能得到完整的文件。
pub struct VideoFileOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  path: PathBuf,
  width: u32,
  height: u32,
  fps: (i32, i32),
  frame_count: AtomicU64,
  finished: AtomicBool,
}

impl VideoFileOutput {
  pub fn create(
    path: impl AsRef<Path>,
    width: u32,
    height: u32,
    fps: (i32, i32),
  ) -> Result<Self, VideoFileOutputError> {
    let path = path.as_ref().to_path_buf();
    let location = path
      .to_str()
      .ok_or_else(|| VideoFileOutputError::InvalidPath(path.clone()))?
      .to_string();
    if fps.0 <= 0 || fps.1 <= 0 {
      return Err(VideoFileOutputError::InvalidFramerate(fps.0, fps.1));
    }

    gst::init()?;

    info!("创建视频输出管道: {}", PIPELINE_DESCRIPTION);
    let pipeline = gst::parse::launch(PIPELINE_DESCRIPTION)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| VideoFileOutputError::PipelineError("无法创建管道".to_string()))?;

    let filesink = pipeline
      .by_name(FILESINK_NAME)
      .ok_or(VideoFileOutputError::FileSinkNotFound)?;
    filesink.set_property("location", location.as_str());

    let appsrc = pipeline
      .by_name(APPSRC_NAME)
      .ok_or(VideoFileOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| VideoFileOutputError::AppSrcNotFound)?;

    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", width as i32)
      .field("height", height as i32)
      .field("framerate", gst::Fraction::new(fps.0, fps.1))
      .build();
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    info!(
      "视频输出初始化完成: {}x{} @ {}/{} fps -> {}",
      width,
      height,
      fps.0,
      fps.1,
      path.display()
    );

    Ok(Self {
      pipeline,
      appsrc,
      path,
      width,
      height,
      fps,
      frame_count: AtomicU64::new(0),
      finished: AtomicBool::new(false),
    })
  }

  pub fn frame_count(&self) -> u64 {
    self.frame_count.load(Ordering::Relaxed)
  }

  // 第 index 帧的显示时间（纳秒）
  fn frame_time_ns(&self, index: u64) -> u64 {
    let (num, den) = (self.fps.0 as u128, self.fps.1 as u128);
    (index as u128 * 1_000_000_000 * den / num) as u64
  }

  fn push_frame(&self, data: &[u8]) -> Result<(), VideoFileOutputError> {
    if self.finished.load(Ordering::Acquire) {
      return Err(VideoFileOutputError::AlreadyFinished);
    }

    let index = self.frame_count.fetch_add(1, Ordering::Relaxed);
    let pts = self.frame_time_ns(index);
    let duration = self.frame_time_ns(index + 1) - pts;

    let mut buffer = gst::Buffer::from_mut_slice(data.to_vec());
    {
      let buffer_ref = buffer.make_mut();
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(pts));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(duration));
    }

    self
      .appsrc
      .push_buffer(buffer)
      .map_err(VideoFileOutputError::FlowError)?;
    debug!("写入第 {} 帧, pts: {} ns", index, pts);
    Ok(())
  }

  fn stop(&self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止视频输出管道失败: {}", e);
    }
  }
}

impl Drop for VideoFileOutput {
  fn drop(&mut self) {
    if !self.finished.load(Ordering::Acquire) {
      warn!("视频输出未正常结束: {}", self.path.display());
    }
    self.stop();
  }
}

impl Render<VideoFrame, DetectionSet> for VideoFileOutput {
  type Error = VideoFileOutputError;

  fn render_result(&self, frame: &VideoFrame, _result: &DetectionSet) -> Result<(), Self::Error> {
    let actual = frame.image.dimensions();
    if actual != (self.width, self.height) {
      return Err(VideoFileOutputError::FrameSizeMismatch {
        expected: (self.width, self.height),
        actual,
      });
    }
    self.push_frame(frame.image.as_raw())
  }

  /// 发送 EOS 并等待编码器把文件写完
  fn finish(&self) -> Result<(), Self::Error> {
    if self.finished.swap(true, Ordering::AcqRel) {
      return Err(VideoFileOutputError::AlreadyFinished);
    }

    self
      .appsrc
      .end_of_stream()
      .map_err(VideoFileOutputError::FlowError)?;

    let bus = self
      .pipeline
      .bus()
      .ok_or_else(|| VideoFileOutputError::PipelineError("管道没有消息总线".to_string()))?;
    let message = bus.timed_pop_filtered(
      gst::ClockTime::NONE,
      &[gst::MessageType::Eos, gst::MessageType::Error],
    );

    let result = match message.as_ref().map(|m| m.view()) {
      Some(gst::MessageView::Eos(..)) => Ok(()),
      Some(gst::MessageView::Error(err)) => {
        error!("视频编码失败: {} ({:?})", err.error(), err.debug());
        Err(VideoFileOutputError::PipelineError(err.error().to_string()))
      }
      _ => Err(VideoFileOutputError::PipelineError(
        "等待 EOS 时总线关闭".to_string(),
      )),
    };
    self.stop();

    result?;
    info!(
      "视频输出完成, 共写入 {} 帧: {}",
      self.frame_count(),
      self.path.display()
    );
    Ok(())
  }

  /// 停止管道并删除不完整的输出文件
  fn abort(&self) {
    self.finished.store(true, Ordering::Release);
    self.stop();
    match std::fs::remove_file(&self.path) {
      Ok(()) => warn!("已删除不完整的视频文件: {}", self.path.display()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(e) => error!("删除视频文件失败: {}: {}", self.path.display(), e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pipeline_has_no_audio_branch() {
    for element in ["audio", "faac", "avenc_aac", "voaacenc", "lamemp3enc"] {
      assert!(!PIPELINE_DESCRIPTION.contains(element), "{element}");
    }
    assert!(PIPELINE_DESCRIPTION.starts_with("appsrc name=src"));
    assert!(PIPELINE_DESCRIPTION.ends_with("filesink name=sink"));
  }
}
