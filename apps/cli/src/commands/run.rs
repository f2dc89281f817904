//! run 命令
//!
//! 运行标准拓扑：合成检测帧 → 追球策略 → 指令编码 → 传输扇出。
//! Ctrl-C 或到达 `--duration` 后停止，并输出各 Pipeline 的统计。

use anyhow::{Context, Result, bail};
use clap::Args;
use fieldlink_sdk::prelude::*;
use fieldlink_sdk::topology::register_transports;
use fieldlink_sdk::transport::MockSender;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::transports::load_config;

/// 接近到该距离（mm）内视为持球
const BALL_CONTACT_DISTANCE: f32 = 90.0;
/// 追球最大速度（mm/s）
const MAX_CHASE_SPEED: f32 = 1500.0;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// 运行命令参数
#[derive(Args, Debug)]
pub struct RunCommand {
    /// 配置文件（默认读取当前目录的 fieldlink.toml）
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 运行时长（秒），缺省时运行到 Ctrl-C
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// 合成检测帧频率（Hz）
    #[arg(long, default_value_t = 60)]
    pub rate: u32,

    /// 受控机器人数量
    #[arg(long, default_value_t = 6)]
    pub robots: u8,

    /// 使用 Mock 发送器（不访问真实介质）
    #[arg(long)]
    pub mock: bool,
}

impl RunCommand {
    pub fn execute(&self) -> Result<()> {
        if self.rate == 0 {
            bail!("--rate 必须大于 0");
        }
        let duration = match self.duration {
            Some(secs) if !(secs.is_finite() && secs > 0.0) => bail!("--duration 必须是正数"),
            Some(secs) => Some(Duration::from_secs_f64(secs)),
            None => None,
        };

        let config = load_config(self.config.as_deref())?.unwrap_or_default();

        // 传输
        let transports = Arc::new(TransportRegistry::new());
        let mock = if self.mock || config.transports.is_empty() {
            if !self.mock {
                warn!("No transports configured, falling back to a mock sender");
            }
            let mock = Arc::new(MockSender::new("mock-udp"));
            transports.register(SendMethod::Udp, mock.clone());
            Some(mock)
        } else {
            register_transports(&transports, &config).context("打开传输失败")?;
            None
        };

        // 装配：在建立 Pipeline 之前声明 Translator，由注册表自动接入
        let registry = Arc::new(Registry::new());
        let halted = Arc::new(AtomicBool::new(true));
        declare_stages(&registry, Arc::clone(&halted), self.robots);

        let topology =
            StandardTopology::build(&registry, &config.pipeline, Arc::clone(&transports))?;
        let drivers = topology.spawn_drivers()?;

        let running = Arc::new(AtomicBool::new(true));
        let handler_flag = Arc::clone(&running);
        ctrlc::set_handler(move || handler_flag.store(false, Ordering::Release))
            .context("设置 Ctrl-C 处理失败")?;

        start_producer(
            &registry,
            Arc::new(producer_fn("referee-box", || {
                Ok(Packet::new(RefereeState {
                    command: RefereeCommand::NormalStart,
                    command_counter: 1,
                    ..Default::default()
                }))
            })),
            ProductionMode::Single,
        )?;
        start_producer(
            &registry,
            Arc::new(producer_fn("field-geometry", || Ok(Packet::new(GeometryFrame::default())))),
            ProductionMode::Single,
        )?;

        let period = Duration::from_secs_f64(1.0 / f64::from(self.rate));
        let detection = start_producer(
            &registry,
            Arc::new(SyntheticDetection::new(self.robots)),
            ProductionMode::Scheduled(period),
        )?;

        println!(
            "▶️  运行中（{} Hz，{} 个机器人），Ctrl-C 停止",
            self.rate, self.robots
        );
        let started = Instant::now();
        while running.load(Ordering::Acquire) {
            if let Some(limit) = duration
                && started.elapsed() >= limit
            {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        info!("Stopping after {:?}", started.elapsed());

        // 停止顺序：源头 → Pipeline → 驱动线程 → 传输
        detection.stop();
        let production = detection.join(SHUTDOWN_TIMEOUT)?;
        topology.close();
        for driver in drivers {
            driver.stop();
            driver.join(SHUTDOWN_TIMEOUT)?;
        }
        transports.unregister_all();

        println!();
        println!("📊 运行统计（{:.1} 秒）:", started.elapsed().as_secs_f64());
        println!(
            "  检测帧:  产生 {}，发布 {}，失败 {}，跳过节拍 {}",
            production.invocations,
            production.published,
            production.failures,
            production.skipped_ticks
        );
        for info in registry.pipeline_infos() {
            println!("  {:<10} 剩余 {} 个数据包", info.name, info.queued);
        }
        print_metrics("detection", topology.detection.metrics());
        print_metrics("strategy", topology.strategy.metrics());
        print_metrics("radio", topology.radio.metrics());
        let sent = transports.metrics();
        println!(
            "  传输:    分发 {}，发送失败 {}，缺少发送器 {}",
            sent.dispatched, sent.sender_failures, sent.missing_handlers
        );
        if let Some(mock) = mock {
            println!("  Mock:    {} 次发送，{} 帧", mock.send_count(), mock.frame_count());
        }
        Ok(())
    }
}

fn print_metrics(name: &str, metrics: fieldlink_sdk::driver::PipelineMetricsSnapshot) {
    println!(
        "  {:<8} 处理 {}，成功 {}，失败 {}，丢弃 {}，超时 {}",
        name,
        metrics.processed,
        metrics.succeeded,
        metrics.failed,
        metrics.dropped_oldest,
        metrics.stage_timeouts
    );
}

/// 声明策略链上的各阶段
fn declare_stages(registry: &Arc<Registry>, halted: Arc<AtomicBool>, robots: u8) {
    let referee_halt = Arc::clone(&halted);
    registry.declare_consumer::<RefereeState>(Arc::new(consumer_fn(
        "referee-watch",
        move |p: &Packet<RefereeState>| {
            let halt = p.read().command.requires_halt();
            referee_halt.store(halt, Ordering::Release);
            info!("Referee: {:?}", p.read().command);
            true
        },
    )));

    registry.declare_consumer::<DetectionFrame>(Arc::new(Translator::new(
        "chase-ball",
        registry,
        move |p: &Packet<DetectionFrame>| {
            let strategy = chase_ball(p.read(), robots);
            let strategy = if halted.load(Ordering::Acquire) {
                strategy.halted()
            } else {
                strategy
            };
            Ok(Packet::new(strategy))
        },
    )));

    registry.declare_consumer::<StrategyFrame>(Arc::new(Translator::new(
        "encode-commands",
        registry,
        |p: &Packet<StrategyFrame>| Ok(Packet::new(RadioPacket::new(p.read().to_radio_message()))),
    )));
}

/// 每个己方机器人都朝球移动，接触到球时盘带并平射
fn chase_ball(frame: &DetectionFrame, robots: u8) -> StrategyFrame {
    let Some(ball) = frame.best_ball() else {
        return StrategyFrame::default();
    };

    frame
        .robots_blue
        .iter()
        .filter(|r| r.robot_id < robots)
        .fold(StrategyFrame::default(), |strategy, robot| {
            let dx = ball.x - robot.x;
            let dy = ball.y - robot.y;
            let distance = dx.hypot(dy);
            if distance < BALL_CONTACT_DISTANCE {
                return strategy.with_target(
                    robot.robot_id,
                    VelocityCommand::default().with_dribbler(1.0).with_flat_kick(0.5),
                );
            }

            let speed = distance.min(MAX_CHASE_SPEED);
            strategy.with_target(
                robot.robot_id,
                VelocityCommand::new(dx / distance * speed, dy / distance * speed, 0.0),
            )
        })
}

/// 合成检测帧：球沿圆周运动，机器人保持固定阵型
struct SyntheticDetection {
    robots: u8,
    frame_number: AtomicU32,
}

impl SyntheticDetection {
    fn new(robots: u8) -> Self {
        Self {
            robots,
            frame_number: AtomicU32::new(0),
        }
    }
}

impl Producer<DetectionFrame> for SyntheticDetection {
    fn produce(&self) -> Result<Packet<DetectionFrame>, StageError> {
        let frame_number = self.frame_number.fetch_add(1, Ordering::Relaxed);
        let phase = frame_number as f32 * 0.02;

        let robots_blue = (0..self.robots)
            .map(|id| DetectionRobot {
                robot_id: id,
                x: -3000.0 + f32::from(id) * 500.0,
                y: if id % 2 == 0 { -1000.0 } else { 1000.0 },
                orientation: 0.0,
                confidence: 1.0,
            })
            .collect();

        Ok(Packet::new(DetectionFrame {
            camera_id: 0,
            frame_number,
            t_capture: f64::from(frame_number) / 60.0,
            balls: vec![DetectionBall {
                x: 2000.0 * phase.cos(),
                y: 1500.0 * phase.sin(),
                confidence: 0.95,
            }],
            robots_blue,
            robots_yellow: Vec::new(),
        }))
    }

    fn name(&self) -> &str {
        "synthetic-detection"
    }
}
