// 该文件是 Linzhi （林芝） 项目的一部分。
// src/input/video_file.rs - GStreamer 视频文件输入
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

//! # GStreamer 视频文件输入
//!
//! 解码视频文件，按显示顺序输出 `[start, end)` 片段内的每一帧 RGB 图像。
//! 只读取视频流，音频流被忽略。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::path::{Path, PathBuf};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::{FrameGate, Subrange, SubrangeGate},
  frame::{FrameError, rgb_image_from_strided},
  input::VideoFrame,
};

const FILESRC_NAME: &str = "src";
const APPSINK_NAME: &str = "sink";
/// 帧率未知（可变帧率）时使用的默认值
const FALLBACK_FPS: (i32, i32) = (30, 1);

/// 解码管道，appsink 不丢帧且不按时钟同步
pub const PIPELINE_DESCRIPTION: &str = "filesrc name=src ! decodebin ! videoconvert ! video/x-raw,format=RGB ! appsink name=sink sync=false max-buffers=4 drop=false";

#[derive(Error, Debug)]
pub enum VideoFileInputError {
  #[error("视频文件不存在: {0}")]
  NotFound(PathBuf),
  #[error("输入路径无效: {0}")]
  InvalidPath(PathBuf),
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作错误: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("无法获取 appsink 元素")]
  AppSinkNotFound,
  #[error("无法获取 filesrc 元素")]
  FileSrcNotFound,
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("状态改变错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("帧数据错误: {0}")]
  FrameError(#[from] FrameError),
}

/// 视频流参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
  pub width: u32,
  pub height: u32,
  /// 帧率分数（分子, 分母）
  pub fps: (i32, i32),
  pub duration_ns: Option<u64>,
}

/// 视频文件输入
///
/// 打开时先预卷（PAUSED）以获得分辨率与帧率，再定位到片段起点开始播放。
pub struct VideoFileInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  subrange: Subrange,
  gate: SubrangeGate,
  info: StreamInfo,
  index: u64,
  done: bool,
}

impl Drop for VideoFileInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止视频输入管道失败: {}", e);
    }
  }
}

impl VideoFileInput {
  pub fn open(path: impl AsRef<Path>, subrange: Subrange) -> Result<Self, VideoFileInputError> {
    let path = path.as_ref();
    if !path.is_file() {
      return Err(VideoFileInputError::NotFound(path.to_path_buf()));
    }
    let location = path
      .to_str()
      .ok_or_else(|| VideoFileInputError::InvalidPath(path.to_path_buf()))?;

    gst::init()?;

    info!("GStreamer 管道描述: {}", PIPELINE_DESCRIPTION);
    let pipeline = gst::parse::launch(PIPELINE_DESCRIPTION)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| VideoFileInputError::PipelineError("无法创建管道".to_string()))?;

    pipeline
      .by_name(FILESRC_NAME)
      .ok_or(VideoFileInputError::FileSrcNotFound)?
      .set_property("location", location);

    let appsink = pipeline
      .by_name(APPSINK_NAME)
      .ok_or(VideoFileInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| VideoFileInputError::AppSinkNotFound)?;

    let mut input = Self {
      pipeline,
      appsink,
      subrange,
      info: StreamInfo {
        width: 0,
        height: 0,
        fps: FALLBACK_FPS,
        duration_ns: None,
      },
      gate: SubrangeGate::new(subrange),
      index: 0,
      done: false,
    };

    input.preroll()?;
    input.info = input.query_stream_info()?;
    info!(
      "打开视频 {}: {}x{} @ {}/{} fps, 时长: {:?} ns",
      path.display(),
      input.info.width,
      input.info.height,
      input.info.fps.0,
      input.info.fps.1,
      input.info.duration_ns
    );

    if let Some(duration) = input.info.duration_ns
      && duration < subrange.end_ns()
    {
      warn!(
        "视频时长 {:.2}s 短于片段结束时间 {:.2}s",
        duration as f64 / 1e9,
        subrange.end_secs()
      );
    }

    input.seek_to_start();
    input.pipeline.set_state(gst::State::Playing)?;
    Ok(input)
  }

  pub fn info(&self) -> &StreamInfo {
    &self.info
  }

  fn preroll(&self) -> Result<(), VideoFileInputError> {
    self.pipeline.set_state(gst::State::Paused)?;
    let (result, _, _) = self.pipeline.state(gst::ClockTime::NONE);
    if let Err(e) = result {
      return Err(self.bus_error().unwrap_or(VideoFileInputError::StateChangeError(e)));
    }
    Ok(())
  }

  fn query_stream_info(&self) -> Result<StreamInfo, VideoFileInputError> {
    let caps = self
      .appsink
      .static_pad("sink")
      .and_then(|pad| pad.current_caps())
      .ok_or(VideoFileInputError::VideoInfoError)?;
    let video_info =
      gst_video::VideoInfo::from_caps(&caps).map_err(|_| VideoFileInputError::VideoInfoError)?;

    let fraction = video_info.fps();
    let fps = if fraction.numer() > 0 && fraction.denom() > 0 {
      (fraction.numer(), fraction.denom())
    } else {
      warn!("视频帧率未知, 使用默认帧率 {}/{}", FALLBACK_FPS.0, FALLBACK_FPS.1);
      FALLBACK_FPS
    };

    let duration_ns = self
      .pipeline
      .query_duration::<gst::ClockTime>()
      .map(|d| d.nseconds());

    Ok(StreamInfo {
      width: video_info.width(),
      height: video_info.height(),
      fps,
      duration_ns,
    })
  }

  // 定位失败时仍可依靠时间戳过滤得到正确的片段
  fn seek_to_start(&self) {
    let start = self.subrange.start_ns();
    if start == 0 {
      return;
    }
    let flags = gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE;
    match self
      .pipeline
      .seek_simple(flags, gst::ClockTime::from_nseconds(start))
    {
      Ok(()) => debug!("定位到 {} ns", start),
      Err(e) => warn!("定位失败, 从头解码: {}", e),
    }
  }

  fn bus_error(&self) -> Option<VideoFileInputError> {
    let bus = self.pipeline.bus()?;
    let message = bus.pop_filtered(&[gst::MessageType::Error])?;
    match message.view() {
      gst::MessageView::Error(err) => {
        error!("视频解码失败: {} ({:?})", err.error(), err.debug());
        Some(VideoFileInputError::PipelineError(err.error().to_string()))
      }
      _ => None,
    }
  }

  fn convert_sample(&self, sample: &gst::Sample) -> Result<image::RgbImage, VideoFileInputError> {
    let buffer = sample
      .buffer()
      .ok_or_else(|| VideoFileInputError::PipelineError("样本中没有缓冲区".to_string()))?;
    let caps = sample
      .caps()
      .ok_or_else(|| VideoFileInputError::PipelineError("样本中没有 caps".to_string()))?;
    let video_info =
      gst_video::VideoInfo::from_caps(caps).map_err(|_| VideoFileInputError::VideoInfoError)?;

    let map = buffer
      .map_readable()
      .map_err(|e| VideoFileInputError::PipelineError(format!("无法读取缓冲区: {}", e)))?;
    let stride = video_info.stride()[0] as usize;

    Ok(rgb_image_from_strided(
      video_info.width() as usize,
      video_info.height() as usize,
      stride,
      map.as_slice(),
    )?)
  }
}

/// 样本的流时间（纳秒）
///
/// 缓冲区时间戳按所在 segment 换算为流时间，与片段边界处于同一时间轴。
/// 没有 segment 或无法换算时退回原始时间戳。
fn stream_time_ns(sample: &gst::Sample) -> Option<u64> {
  let pts = sample.buffer()?.pts()?;
  let segment = sample
    .segment()
    .and_then(|segment| segment.downcast_ref::<gst::ClockTime>());
  Some(segment_stream_time(segment, pts).nseconds())
}

fn segment_stream_time(
  segment: Option<&gst::FormattedSegment<gst::ClockTime>>,
  pts: gst::ClockTime,
) -> gst::ClockTime {
  segment
    .and_then(|segment| segment.to_stream_time(pts))
    .unwrap_or(pts)
}

impl Iterator for VideoFileInput {
  type Item = Result<VideoFrame, VideoFileInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    while !self.done {
      let Some(sample) = self.appsink.try_pull_sample(gst::ClockTime::NONE) else {
        self.done = true;
        if let Some(err) = self.bus_error() {
          return Some(Err(err));
        }
        info!("视频结束, 共读取 {} 帧", self.index);
        return None;
      };

      let (gate, pts) = self.gate.admit(stream_time_ns(&sample));
      match gate {
        FrameGate::Skip => continue,
        FrameGate::Stop => {
          info!("到达片段结束时间, 共读取 {} 帧", self.index);
          self.done = true;
          return None;
        }
        FrameGate::Take => {}
      }

      let index = self.index;
      self.index += 1;
      return Some(self.convert_sample(&sample).map(|image| VideoFrame {
        index,
        timestamp_ns: pts,
        image,
      }));
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pipeline_never_drops_frames() {
    assert!(PIPELINE_DESCRIPTION.contains("drop=false"));
    assert!(PIPELINE_DESCRIPTION.contains("format=RGB"));
  }

  #[test]
  fn pts_is_converted_to_stream_time() {
    gst::init().unwrap();
    // 时间戳从 10s 开始而流时间从 0 开始的片段，如 MPEG-TS
    let mut segment = gst::FormattedSegment::<gst::ClockTime>::new();
    segment.set_start(gst::ClockTime::from_seconds(10));
    segment.set_time(gst::ClockTime::ZERO);

    let pts = gst::ClockTime::from_mseconds(10_500);
    assert_eq!(
      segment_stream_time(Some(&segment), pts),
      gst::ClockTime::from_mseconds(500)
    );
    assert_eq!(segment_stream_time(None, pts), pts);

    let range = Subrange::new(0.0, 1.0).unwrap();
    let stream_ns = segment_stream_time(Some(&segment), pts).nseconds();
    assert_eq!(range.gate(stream_ns), FrameGate::Take);
    assert_eq!(range.gate(pts.nseconds()), FrameGate::Stop);
  }

  #[test]
  fn edit_list_offset_keeps_full_window() {
    gst::init().unwrap();
    // 带 B 帧的 MP4：首帧时间戳约为 2/30 秒，segment 从该处开始
    let offset = 66_666_666u64;
    let mut segment = gst::FormattedSegment::<gst::ClockTime>::new();
    segment.set_start(gst::ClockTime::from_nseconds(offset));
    segment.set_time(gst::ClockTime::ZERO);

    let mut gate = SubrangeGate::new(Subrange::new(0.0, 15.0).unwrap());
    let mut taken = 0u64;
    for k in 0u64.. {
      let pts = gst::ClockTime::from_nseconds(offset + k * 1_000_000_000 / 30);
      let stream_ns = segment_stream_time(Some(&segment), pts).nseconds();
      match gate.admit(Some(stream_ns)).0 {
        FrameGate::Take => taken += 1,
        FrameGate::Skip => {}
        FrameGate::Stop => break,
      }
    }
    assert_eq!(taken, 450);
  }

  #[test]
  fn pts_before_segment_start_keeps_raw_timestamp() {
    gst::init().unwrap();
    let mut segment = gst::FormattedSegment::<gst::ClockTime>::new();
    segment.set_start(gst::ClockTime::from_seconds(10));
    let pts = gst::ClockTime::from_seconds(3);
    assert_eq!(segment_stream_time(Some(&segment), pts), pts);
  }

  #[test]
  fn missing_file_is_reported_before_gstreamer() {
    let subrange = Subrange::new(0.0, 1.0).unwrap();
    let err = VideoFileInput::open("/nonexistent/input.mp4", subrange).err().unwrap();
    assert!(matches!(err, VideoFileInputError::NotFound(_)));
  }
}
