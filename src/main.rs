//! Replays a simulated walk through a tracking session: outdoors on GNSS,
//! into a venue with four UWB anchors, then standing still.

use clap::Parser;
use position_fusion::algorithms::LocalFrame;
use position_fusion::api::{SessionOutputs, TrackingSession};
use position_fusion::core::{Anchor, GeoPosition, GnssFix, RangingReading, SensorSample, Vec3, STANDARD_GRAVITY};
use position_fusion::utils::{init_logging, FusionConfig, LogLevel};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "fusion-demo", about = "Multi-source position fusion demo")]
struct Args {
    /// JSON fusion configuration; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Simulated duration in seconds
    #[arg(long, default_value = "30")]
    seconds: u64,
    /// Seed for the simulated sensor noise
    #[arg(long, default_value = "7")]
    seed: u64,
    /// Log level (RUST_LOG overrides)
    #[arg(long, default_value = "info")]
    log_level: LogLevel,
}

const SAMPLE_PERIOD_MS: u64 = 20;
const WALK_SPEED_MPS: f64 = 1.2;
const CADENCE_HZ: f64 = 1.8;
/// Furthest the agent walks into the venue (meters east of the door)
const INDOOR_DEPTH_M: f64 = 12.0;

fn door() -> Vec3 {
    Vec3::new(0.0, 10.0, 0.0)
}

/// Round to centimeters for log output
fn cm(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Outdoor,
    Indoor,
    Standing,
}

struct Walk {
    entry_s: f64,
    stop_s: f64,
}

impl Walk {
    fn new(seconds: f64) -> Self {
        Self {
            entry_s: 0.3 * seconds,
            stop_s: 0.6 * seconds,
        }
    }

    fn truth(&self, t: f64) -> (Vec3, Phase) {
        if t < self.entry_s {
            let east = -WALK_SPEED_MPS * (self.entry_s - t);
            (door() + Vec3::new(east, 0.0, 0.0), Phase::Outdoor)
        } else {
            let east = (WALK_SPEED_MPS * (t - self.entry_s)).min(INDOOR_DEPTH_M);
            let phase = if t < self.stop_s { Phase::Indoor } else { Phase::Standing };
            (door() + Vec3::new(east, 0.0, 0.0), phase)
        }
    }
}

fn venue() -> Vec<Anchor> {
    vec![
        Anchor::new("uwb-sw", Vec3::new(0.0, 0.0, 2.5)),
        Anchor::new("uwb-se", Vec3::new(20.0, 0.0, 2.5)),
        Anchor::new("uwb-nw", Vec3::new(0.0, 20.0, 3.0)),
        Anchor::new("uwb-ne", Vec3::new(20.0, 20.0, 2.0)),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.log_level);

    let config = match &args.config {
        Some(path) => FusionConfig::from_json_file(path)?,
        None => FusionConfig::default(),
    };

    let origin = GeoPosition::new(57.7089, 11.9746, 12.0);
    let frame = LocalFrame::new(origin);
    let anchors = venue();
    let (session, outputs) = TrackingSession::spawn(config, anchors.clone(), Some(origin))?;
    let SessionOutputs {
        mut positions,
        mut transitions,
        mut events,
    } = outputs;

    let walk = Walk::new(args.seconds as f64);
    info!(seconds = args.seconds, seed = args.seed, "replaying simulated walk");

    let position_log = tokio::spawn(async move {
        let mut last = None;
        while let Some(fused) = positions.recv().await {
            info!(
                east = cm(fused.position.x),
                north = cm(fused.position.y),
                accuracy_m = cm(fused.accuracy_m),
                confidence = cm(fused.confidence),
                indoor = fused.indoor,
                locked = fused.stationary_locked,
                sources = fused.sources.len(),
                "fused position"
            );
            last = Some(fused);
        }
        last
    });
    let motion_log = tokio::spawn(async move {
        while let Some(transition) = transitions.recv().await {
            info!(from = %transition.from, to = %transition.to, confidence = transition.confidence, "motion");
        }
    });
    let event_log = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(?event, "fusion event");
        }
    });

    let mut rng = StdRng::seed_from_u64(args.seed);
    let accel_noise = Normal::new(0.0, 0.15)?;
    let rest_noise = Normal::new(0.0, 0.01)?;
    let gyro_noise = Normal::new(0.0, 0.005)?;
    let range_noise = Normal::new(0.0, 0.1)?;
    let unit = Normal::new(0.0, 1.0)?;

    let end_ms = args.seconds * 1000;
    let mut ticker = tokio::time::interval(Duration::from_millis(SAMPLE_PERIOD_MS));
    for now_ms in (0..=end_ms).step_by(SAMPLE_PERIOD_MS as usize) {
        ticker.tick().await;
        let t = now_ms as f64 / 1000.0;
        let (truth, phase) = walk.truth(t);

        let moving = phase != Phase::Standing;
        let (bounce, noise) = if moving {
            (1.8 * (2.0 * PI * CADENCE_HZ * t).sin(), &accel_noise)
        } else {
            (0.0, &rest_noise)
        };
        let acceleration = Vec3::new(
            noise.sample(&mut rng),
            noise.sample(&mut rng),
            STANDARD_GRAVITY + bounce + noise.sample(&mut rng),
        );
        let angular_velocity = Vec3::new(
            gyro_noise.sample(&mut rng),
            gyro_noise.sample(&mut rng),
            gyro_noise.sample(&mut rng),
        );
        session.push(SensorSample::Accelerometer { acceleration, timestamp_ms: now_ms })?;
        session.push(SensorSample::Gyroscope { angular_velocity, timestamp_ms: now_ms })?;

        if now_ms % 1000 == 0 {
            session.push(SensorSample::Magnetometer {
                field: Vec3::new(0.5, 18.0, -45.0),
                timestamp_ms: now_ms,
            })?;

            // Satellites fade a few seconds after the agent walks in
            let gnss_accuracy = match phase {
                Phase::Outdoor => Some(4.0),
                _ if t < walk.entry_s + 4.0 => Some(40.0),
                _ => None,
            };
            if let Some(accuracy_m) = gnss_accuracy {
                let offset = Vec3::new(unit.sample(&mut rng), unit.sample(&mut rng), 0.0) * (accuracy_m / 3.0);
                let geo = frame.to_geodetic(&(truth + offset));
                session.push(SensorSample::Gnss(GnssFix {
                    latitude: geo.latitude,
                    longitude: geo.longitude,
                    altitude: geo.altitude,
                    accuracy_m,
                    speed_mps: moving.then_some(WALK_SPEED_MPS),
                    heading_deg: moving.then_some(90.0),
                    timestamp_ms: now_ms,
                }))?;
            }
        }

        // UWB coverage starts just outside the door
        if now_ms % 200 == 0 && t >= walk.entry_s - 3.0 {
            for anchor in &anchors {
                let distance_m = (truth - anchor.position).norm() + range_noise.sample(&mut rng);
                session.push(SensorSample::Ranging(RangingReading {
                    anchor_id: anchor.id.clone(),
                    distance_m: distance_m.max(0.0),
                    quality: 0.1,
                    timestamp_ms: now_ms,
                }))?;
            }
        }
    }

    // Let the final tick land before stopping
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let stats = session.stop().await?;
    let last = position_log.await?;
    let _ = motion_log.await;
    let _ = event_log.await;

    let (truth, _) = walk.truth(end_ms as f64 / 1000.0);
    match last {
        Some(fused) => info!(
            error_m = cm((fused.position - truth).norm()),
            accuracy_m = cm(fused.accuracy_m),
            "final fused position"
        ),
        None => warn!("no fused position was produced"),
    }
    info!(availability = cm(stats.availability()), "session finished");
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
