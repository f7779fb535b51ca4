// 该文件是 Kouqu （抠图取物） 项目的一部分。
// src/task.rs - 抠图流水线与命令行任务
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

use std::time::{Duration, Instant};

use image::RgbaImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  input::SourceImage,
  model::{DetectItem, DetectQuery, DetectResult, Model, SegmentMask, SegmentQuery},
  output::{OutputError, Render, compose_cutout},
};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("提示词为空")]
  EmptyPrompt,
  #[error("检测失败: {0}")]
  Detect(#[source] BoxError),
  #[error("分割失败: {0}")]
  Segment(#[source] BoxError),
  #[error("输出错误: {0}")]
  Output(#[from] OutputError),
}

/// 一次抠图的完整结果
#[derive(Debug, Clone)]
pub struct CutoutOutcome {
  pub detection: DetectItem,
  pub mask: SegmentMask,
  pub cutout: RgbaImage,
}

/// 检测 -> 选框 -> 分割 -> 合成；返回 `None` 表示提示词没有匹配到目标
pub trait CutoutPipeline: Send + Sync {
  fn run(&self, image: &SourceImage, prompt: &str) -> Result<Option<CutoutOutcome>, TaskError>;
}

pub struct Segmenter<D, S> {
  detector: D,
  segmenter: S,
}

impl<D, S> Segmenter<D, S> {
  pub fn new(detector: D, segmenter: S) -> Self {
    Segmenter {
      detector,
      segmenter,
    }
  }
}

impl<D, S, DE, SE> CutoutPipeline for Segmenter<D, S>
where
  D: Model<Input = DetectQuery, Output = DetectResult, Error = DE> + Send + Sync,
  S: Model<Input = SegmentQuery, Output = SegmentMask, Error = SE> + Send + Sync,
  DE: std::error::Error + Send + Sync + 'static,
  SE: std::error::Error + Send + Sync + 'static,
{
  fn run(&self, image: &SourceImage, prompt: &str) -> Result<Option<CutoutOutcome>, TaskError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
      return Err(TaskError::EmptyPrompt);
    }

    let now = Instant::now();
    let detections = self
      .detector
      .infer(&DetectQuery {
        image: image.clone(),
        prompt: prompt.to_string(),
      })
      .map_err(|e| TaskError::Detect(Box::new(e)))?;
    debug!("检测完成，{} 个候选，耗时: {:.2?}", detections.len(), now.elapsed());

    let Some(best) = detections.best().cloned() else {
      info!("提示词 \"{}\" 没有匹配到目标", prompt);
      return Ok(None);
    };
    info!(
      "选中目标 \"{}\" 得分 {:.3} 框 {:?}",
      best.phrase, best.score, best.bbox
    );

    let now = Instant::now();
    let mask = self
      .segmenter
      .infer(&SegmentQuery {
        image: image.clone(),
        bbox: best.bbox,
      })
      .map_err(|e| TaskError::Segment(Box::new(e)))?;
    debug!(
      "分割完成，覆盖 {} 像素，iou {:.3}，耗时: {:.2?}",
      mask.coverage(),
      mask.iou,
      now.elapsed()
    );

    let cutout = compose_cutout(image.as_rgb(), &mask.mask)?;
    Ok(Some(CutoutOutcome {
      detection: best,
      mask,
      cutout,
    }))
  }
}

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

pub struct OneShotTask {
  prompt: String,
}

impl OneShotTask {
  pub fn new(prompt: impl Into<String>) -> Self {
    OneShotTask {
      prompt: prompt.into(),
    }
  }
}

impl<I, M, O, RE> Task<I, M, O> for OneShotTask
where
  I: Iterator<Item = SourceImage>,
  M: CutoutPipeline,
  O: Render<SourceImage, CutoutOutcome, Error = RE>,
  RE: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!("输入图像 {}x{}，开始推理...", frame.width(), frame.height());
    let now = Instant::now();
    let outcome = model
      .run(&frame, &self.prompt)?
      .ok_or_else(|| anyhow::anyhow!("没有检测到与 \"{}\" 匹配的目标", self.prompt))?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    output.render_result(&frame, &outcome)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

pub struct RepeatShotTask {
  prompt: String,
  repeat: usize,
}

impl RepeatShotTask {
  pub const DEFAULT_REPEAT: usize = 100;
  const WARMUP: usize = 2;

  pub fn new(prompt: impl Into<String>, repeat: usize) -> Self {
    RepeatShotTask {
      prompt: prompt.into(),
      repeat: repeat.max(1),
    }
  }
}

/// 去掉前两次预热后的平均耗时；次数不足时取全部
pub(crate) fn mean_after_warmup(times: &[Duration], warmup: usize) -> Option<Duration> {
  let measured = if times.len() > warmup {
    &times[warmup..]
  } else {
    times
  };
  if measured.is_empty() {
    return None;
  }
  Some(measured.iter().sum::<Duration>() / measured.len() as u32)
}

impl<I, M, O, RE> Task<I, M, O> for RepeatShotTask
where
  I: Iterator<Item = SourceImage>,
  M: CutoutPipeline,
  O: Render<SourceImage, CutoutOutcome, Error = RE>,
  RE: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!("输入图像获取成功，重复推理 {} 次...", self.repeat);
    let mut times = Vec::with_capacity(self.repeat);
    for i in 0..self.repeat {
      let now = Instant::now();
      let outcome = model.run(&frame, &self.prompt)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      match outcome {
        Some(outcome) => output.render_result(&frame, &outcome)?,
        None => warn!("({})没有检测到目标", i),
      }
      times.push(elapsed);
    }

    if let Some(mean) = mean_after_warmup(&times, Self::WARMUP) {
      warn!("平均推理时间: {:.2?}", mean);
    }

    Ok(())
  }
}
