// 该文件是 Kouqu （抠图取物） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 重复推理计时
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use kouqu::{
  FromUrl,
  input::ImageFileInput,
  model::{GroundingDinoBuilder, MobileSamBuilder},
  output::OutputWrapper,
  task::{RepeatShotTask, Segmenter, Task},
};
use tracing::info;

/// 重复运行抠图流水线并统计平均耗时
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// Grounding DINO 模型
  #[arg(long, value_name = "MODEL")]
  pub detector: Url,
  /// MobileSAM 编码器模型
  #[arg(long, value_name = "MODEL")]
  pub segmenter: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径（image:// 或 folder://）
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 文本提示词
  #[arg(long)]
  pub prompt: String,
  /// 重复次数
  #[arg(long, default_value_t = RepeatShotTask::DEFAULT_REPEAT)]
  pub repeat: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("检测模型: {}", args.detector);
  info!("分割模型: {}", args.segmenter);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input_image = ImageFileInput::from_url(&args.input)?;
  let detector = GroundingDinoBuilder::from_url(&args.detector)?.build()?;
  let segmenter = MobileSamBuilder::from_url(&args.segmenter)?.build()?;
  let output = OutputWrapper::from_url(&args.output)?;

  RepeatShotTask::new(args.prompt, args.repeat).run_task(
    input_image,
    Segmenter::new(detector, segmenter),
    output,
  )?;

  Ok(())
}
