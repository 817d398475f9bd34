/// RTSP 监看器 (RTSP Watch)
///
/// 主线程: macroquad 事件循环 + 定时tick
/// 解码线程: FFmpeg 拉流 + 断线重连
/// 检测: 主线程内联或后台线程 (detection_mode)
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use macroquad::prelude::*;
use macroquad::window::Conf;
use mimalloc::MiMalloc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rtsp_watch::config::{AppConfig, DetectionMode};
use rtsp_watch::detection::OnnxEnsemble;
use rtsp_watch::input::{RtspSource, StreamOptions};
use rtsp_watch::overlay::Overlay;
use rtsp_watch::pipeline::Pipeline;
use rtsp_watch::viewer::Viewer;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about = "RTSP 实时监看 + 目标检测", long_about = None)]
struct Args {
    /// JSON配置文件 (不存在时写入默认值)
    #[arg(short, long, default_value = "rtsp_watch.json")]
    config: String,

    /// RTSP流地址
    #[arg(short = 'u', long)]
    url: Option<String>,

    /// 每N帧推理一次
    #[arg(short = 'n', long)]
    every: Option<u32>,

    /// 后台线程推理
    #[arg(long)]
    background: bool,

    /// 关闭检测,只显示视频
    #[arg(long)]
    no_detect: bool,

    /// general_object 模型路径
    #[arg(long)]
    model: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(url) = &self.url {
            config.source_url = url.clone();
        }
        if let Some(every) = self.every {
            config.detect_every_n_ticks = every;
        }
        if self.background {
            config.detection_mode = DetectionMode::Background;
        }
        if self.no_detect {
            config.detection_enabled = false;
        }
        if let Some(model) = &self.model {
            config.model_path_general_object = Some(model.clone());
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = AppConfig::load(&args.config)
        .with_context(|| format!("loading config {}", args.config))?;
    args.apply(&mut config);
    config.validate().context("invalid command-line override")?;
    config.print_summary();

    let conf = Conf {
        window_title: config.window.title.clone(),
        window_width: config.window.width as i32,
        window_height: config.window.height as i32,
        high_dpi: true,
        ..Default::default()
    };

    // thread spawn failure is reported before the window opens
    let source = RtspSource::spawn(StreamOptions::from(&config))?;

    macroquad::Window::from_config(conf, run(config, source));
    info!("bye");
    Ok(())
}

async fn run(config: AppConfig, source: RtspSource) {
    let detector = if config.detection_enabled {
        match OnnxEnsemble::load(&config) {
            Ok(ensemble) => {
                let roles: Vec<_> = ensemble.roles().iter().map(|r| r.name()).collect();
                info!("detectors ready: {}", roles.join(", "));
                Some(ensemble)
            }
            Err(e) => {
                // keep showing video without boxes
                error!("{}; detection disabled", e);
                None
            }
        }
    } else {
        None
    };

    let overlay = Overlay::load(config.font_path.as_deref(), config.show_confidence);
    if !overlay.has_font() {
        warn!("labels disabled, drawing rectangles only");
    }

    let mut pipeline = Pipeline::new(&config, source, detector, overlay);
    let surface = pipeline.surface();
    let mut viewer = Viewer::new();
    pipeline.start(Instant::now());

    loop {
        pipeline.poll(Instant::now());

        viewer.update(&surface);
        viewer.draw();
        let action = viewer.draw_ui(&pipeline.stats());

        if action.toggle_pause {
            pipeline.toggle_pause(Instant::now());
        }
        if action.exit {
            break;
        }

        next_frame().await;
    }

    let stats = pipeline.stats();
    info!(
        "exiting after {} ticks, {} frames, {} inferences",
        stats.ticks, stats.frames, stats.inferences
    );
}
