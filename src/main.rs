// 该文件是 Kouqu （抠图取物） 项目的一部分。
// src/main.rs - 抠图服务主程序
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

mod args;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use kouqu::{
  FromUrl,
  model::{GroundingDino, GroundingDinoBuilder, MobileSam, MobileSamBuilder},
  output::{DEFAULT_URL_PREFIX, ResultStore},
  server::{self, AppContext, ModelStatus, ServerConfig},
  task::{CutoutPipeline, Segmenter},
};

fn load_detector(url: &Url) -> Option<GroundingDino> {
  info!("加载 Grounding DINO: {}", url);
  match GroundingDinoBuilder::from_url(url).and_then(|b| b.build()) {
    Ok(model) => Some(model),
    Err(e) => {
      warn!("Grounding DINO 加载失败，服务将以降级模式运行: {}", e);
      None
    }
  }
}

fn load_segmenter(url: &Url) -> Option<MobileSam> {
  info!("加载 MobileSAM: {}", url);
  match MobileSamBuilder::from_url(url).and_then(|b| b.build()) {
    Ok(model) => Some(model),
    Err(e) => {
      warn!("MobileSAM 加载失败，服务将以降级模式运行: {}", e);
      None
    }
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();
  info!("Kouqu 抠图服务");
  info!("检测模型: {}", args.detector);
  info!("分割模型: {}", args.segmenter);
  info!("静态目录: {}", args.static_dir.display());

  // 模型在运行时启动前同步加载，下载使用阻塞 HTTP 客户端
  let detector = load_detector(&args.detector);
  let segmenter = load_segmenter(&args.segmenter);
  let models = ModelStatus {
    grounding_dino: detector.is_some(),
    mobile_sam: segmenter.is_some(),
  };
  let pipeline: Option<Arc<dyn CutoutPipeline>> = match (detector, segmenter) {
    (Some(detector), Some(segmenter)) => Some(Arc::new(Segmenter::new(detector, segmenter))),
    _ => {
      warn!("模型未全部加载，/segment 将返回 503");
      None
    }
  };

  let store = ResultStore::new(args.static_dir.join("images"), DEFAULT_URL_PREFIX)
    .context("无法创建结果目录")?;
  let ctx = AppContext::new(pipeline, models, Arc::new(store)).with_max_image_side(args.max_image_side);

  let addr: SocketAddr = format!("{}:{}", args.host, args.port)
    .parse()
    .context("监听地址无效")?;
  let config = ServerConfig {
    addr,
    static_dir: args.static_dir,
    max_upload_bytes: args.max_upload_bytes,
    retention: Duration::from_secs(args.retention_secs),
  };

  let runtime = tokio::runtime::Runtime::new()?;
  runtime.block_on(server::serve(ctx, config))
}
