// 该文件是 Kouqu （抠图取物） 项目的一部分。
// src/server.rs - HTTP 服务
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

use std::{
  net::SocketAddr,
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use axum::{
  Router,
  extract::DefaultBodyLimit,
  routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::signal;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info};

use crate::{input::DEFAULT_MAX_IMAGE_SIDE, output::ResultStore, task::CutoutPipeline};

mod error;
mod routes;

pub use self::error::ServerError;
pub use self::routes::{HealthResponse, SegmentResponse};

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
pub const MAX_PROMPT_CHARS: usize = 256;

/// 各模型是否加载成功
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModelStatus {
  pub grounding_dino: bool,
  pub mobile_sam: bool,
}

impl ModelStatus {
  pub fn ready(&self) -> bool {
    self.grounding_dino && self.mobile_sam
  }
}

/// 请求处理共享的上下文
#[derive(Clone)]
pub struct AppContext {
  /// 模型加载失败时为 None，/segment 返回 503
  pub pipeline: Option<Arc<dyn CutoutPipeline>>,
  pub models: ModelStatus,
  pub store: Arc<ResultStore>,
  pub max_image_side: u32,
  pub started_at: DateTime<Utc>,
}

impl AppContext {
  pub fn new(
    pipeline: Option<Arc<dyn CutoutPipeline>>,
    models: ModelStatus,
    store: Arc<ResultStore>,
  ) -> Self {
    AppContext {
      pipeline,
      models,
      store,
      max_image_side: DEFAULT_MAX_IMAGE_SIDE,
      started_at: Utc::now(),
    }
  }

  pub fn with_max_image_side(mut self, max_image_side: u32) -> Self {
    self.max_image_side = max_image_side;
    self
  }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
  pub addr: SocketAddr,
  pub static_dir: PathBuf,
  pub max_upload_bytes: usize,
  /// 为零时不清理结果文件
  pub retention: Duration,
}

pub fn create_router(ctx: AppContext, static_dir: &Path, max_upload_bytes: usize) -> Router {
  Router::new()
    .route("/", get(routes::index))
    .route("/segment", post(routes::segment))
    .route("/health", get(routes::health))
    .nest_service("/static", ServeDir::new(static_dir))
    .layer(DefaultBodyLimit::max(max_upload_bytes))
    .layer(TraceLayer::new_for_http())
    .with_state(ctx)
}

/// 定期删除过期的结果文件
pub fn start_sweep_task(store: Arc<ResultStore>, retention: Duration) -> tokio::task::JoinHandle<()> {
  let period = (retention / 2).clamp(Duration::from_secs(1), Duration::from_secs(600));
  info!("结果保留 {:?}，每 {:?} 清理一次", retention, period);

  tokio::spawn(async move {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
      interval.tick().await;
      let store = store.clone();
      if let Err(e) = tokio::task::spawn_blocking(move || store.sweep(retention)).await {
        error!("清理任务异常: {}", e);
      }
    }
  })
}

pub async fn serve(ctx: AppContext, config: ServerConfig) -> anyhow::Result<()> {
  let sweeper = (!config.retention.is_zero())
    .then(|| start_sweep_task(ctx.store.clone(), config.retention));

  let app = create_router(ctx, &config.static_dir, config.max_upload_bytes);

  info!("服务启动，监听 {}", config.addr);
  let listener = tokio::net::TcpListener::bind(config.addr).await?;
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  if let Some(sweeper) = sweeper {
    sweeper.abort();
  }
  info!("服务已关闭");
  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = signal::ctrl_c().await {
      error!("无法监听 Ctrl+C: {}", e);
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
      Ok(mut sig) => {
        sig.recv().await;
      }
      Err(e) => {
        error!("无法监听 SIGTERM: {}", e);
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {},
    _ = terminate => {},
  }

  info!("收到退出信号，等待进行中的请求完成...");
}
