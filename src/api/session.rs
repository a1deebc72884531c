//! Asynchronous tracking session
//!
//! A single tokio task owns the `TrackingPipeline`. Producers push samples
//! into a bounded broadcast queue that overwrites the oldest entries when the
//! task falls behind; a timer drives the fusion ticks. Fused positions, motion
//! transitions and fusion events come back on bounded channels.

use crate::core::{Anchor, FusedPosition, GeoPosition, SensorSample, TimestampMs};
use crate::fusion::coordinator::FusionEvent;
use crate::fusion::pipeline::TrackingPipeline;
use crate::processing::motion::MotionTransition;
use crate::utils::config::FusionConfig;
use crate::utils::monitor::FusionStats;
use crate::validation::{FusionError, FusionResult};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

enum SessionCommand {
    Stats(oneshot::Sender<FusionStats>),
    Stop(oneshot::Sender<FusionStats>),
}

/// Cloneable producer side of the sample queue
#[derive(Clone)]
pub struct SampleSender {
    tx: broadcast::Sender<SensorSample>,
}

impl SampleSender {
    /// Queue a sample; never waits. When the queue is full the oldest sample is lost.
    pub fn push(&self, sample: SensorSample) -> FusionResult<()> {
        self.tx.send(sample).map(|_| ()).map_err(|_| FusionError::SessionClosed)
    }
}

/// Consumer side of a session
pub struct SessionOutputs {
    pub positions: mpsc::Receiver<FusedPosition>,
    pub transitions: mpsc::Receiver<MotionTransition>,
    pub events: mpsc::Receiver<FusionEvent>,
}

pub struct SessionHandle {
    samples: SampleSender,
    control: mpsc::Sender<SessionCommand>,
    task: JoinHandle<FusionStats>,
}

impl SessionHandle {
    pub fn push(&self, sample: SensorSample) -> FusionResult<()> {
        self.samples.push(sample)
    }

    pub fn sample_sender(&self) -> SampleSender {
        self.samples.clone()
    }

    /// Counters so far
    pub async fn stats(&self) -> FusionResult<FusionStats> {
        let (reply, response) = oneshot::channel();
        self.control
            .send(SessionCommand::Stats(reply))
            .await
            .map_err(|_| FusionError::SessionClosed)?;
        response.await.map_err(|_| FusionError::SessionClosed)
    }

    /// Stop tracking, discard all filter state and return the final counters
    pub async fn stop(self) -> FusionResult<FusionStats> {
        let (reply, response) = oneshot::channel();
        if self.control.send(SessionCommand::Stop(reply)).await.is_err() {
            return self.task.await.map_err(|_| FusionError::SessionClosed);
        }
        let stats = response.await.map_err(|_| FusionError::SessionClosed)?;
        let _ = self.task.await;
        Ok(stats)
    }
}

/// Maps the caller's sample clock onto the runtime clock
struct SessionClock {
    base_ms: TimestampMs,
    base: Instant,
}

impl SessionClock {
    fn new() -> Self {
        Self {
            base_ms: 0,
            base: Instant::now(),
        }
    }

    fn now_ms(&self) -> TimestampMs {
        self.base_ms + self.base.elapsed().as_millis() as u64
    }

    /// Samples ahead of the projected clock move it forward
    fn observe(&mut self, timestamp_ms: TimestampMs) {
        if timestamp_ms > self.now_ms() {
            self.base_ms = timestamp_ms;
            self.base = Instant::now();
        }
    }
}

fn tick_interval(period_ms: u64) -> Interval {
    let mut ticker = interval(Duration::from_millis(period_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

pub struct TrackingSession;

impl TrackingSession {
    /// Validate the configuration and start the session task. Must be called
    /// from within a tokio runtime.
    pub fn spawn(
        config: FusionConfig,
        anchors: Vec<Anchor>,
        origin: Option<GeoPosition>,
    ) -> FusionResult<(SessionHandle, SessionOutputs)> {
        for warning in config.validate()? {
            warn!("{}", warning);
        }

        let (sample_tx, sample_rx) = broadcast::channel(config.sample_queue_capacity);
        let (control_tx, control_rx) = mpsc::channel(8);
        let (position_tx, position_rx) = mpsc::channel(config.output_queue_capacity);
        let (transition_tx, transition_rx) = mpsc::channel(config.output_queue_capacity);
        let (event_tx, event_rx) = mpsc::channel(config.output_queue_capacity);

        let actor = SessionActor {
            pipeline: TrackingPipeline::new(config, anchors, origin),
            samples: sample_rx,
            control: control_rx,
            positions: position_tx,
            transitions: transition_tx,
            events: event_tx,
            clock: SessionClock::new(),
            burst_remaining: 0,
        };
        let task = tokio::spawn(actor.run());

        let handle = SessionHandle {
            samples: SampleSender { tx: sample_tx },
            control: control_tx,
            task,
        };
        let outputs = SessionOutputs {
            positions: position_rx,
            transitions: transition_rx,
            events: event_rx,
        };
        Ok((handle, outputs))
    }
}

struct SessionActor {
    pipeline: TrackingPipeline,
    samples: broadcast::Receiver<SensorSample>,
    control: mpsc::Receiver<SessionCommand>,
    positions: mpsc::Sender<FusedPosition>,
    transitions: mpsc::Sender<MotionTransition>,
    events: mpsc::Sender<FusionEvent>,
    clock: SessionClock,
    burst_remaining: u32,
}

impl SessionActor {
    async fn run(mut self) -> FusionStats {
        info!("tracking session started");
        let mut ticker = tick_interval(self.pipeline.config().fusion_tick_interval_ms);

        loop {
            tokio::select! {
                biased;

                sample = self.samples.recv() => match sample {
                    Ok(sample) => {
                        if self.on_sample(sample) {
                            ticker = tick_interval(self.pipeline.config().burst_tick_interval_ms);
                        }
                    }
                    Err(RecvError::Lagged(count)) => {
                        warn!(count, "sample queue overflowed; oldest samples dropped");
                        self.pipeline.record_dropped(count);
                    }
                    Err(RecvError::Closed) => {
                        info!("sample queue closed");
                        break;
                    }
                },

                command = self.control.recv() => match command {
                    Some(SessionCommand::Stats(reply)) => {
                        let _ = reply.send(self.pipeline.stats().clone());
                    }
                    Some(SessionCommand::Stop(reply)) => {
                        let stats = self.shutdown();
                        let _ = reply.send(stats.clone());
                        return stats;
                    }
                    None => {
                        info!("all session handles dropped");
                        break;
                    }
                },

                _ = ticker.tick() => {
                    if self.on_tick() {
                        ticker = tick_interval(self.pipeline.config().fusion_tick_interval_ms);
                        ticker.reset();
                    }
                }
            }
        }

        self.shutdown()
    }

    /// Returns true when a burst of fast ticks should start
    fn on_sample(&mut self, sample: SensorSample) -> bool {
        self.clock.observe(sample.timestamp_ms());
        if let Err(e) = self.pipeline.push_sample(&sample) {
            if e.is_reading_rejection() {
                debug!(kind = sample.kind_name(), "sample rejected: {}", e);
            } else {
                warn!(kind = sample.kind_name(), "sample not applied: {}", e);
            }
        }

        let mut burst = false;
        for transition in self.pipeline.drain_transitions() {
            if transition.to.is_moving() && !transition.from.is_moving() {
                let burst_ticks = self.pipeline.config().burst_ticks;
                if burst_ticks > 0 {
                    debug!(burst_ticks, "agent started moving; fast ticks");
                    self.burst_remaining = burst_ticks;
                    burst = true;
                }
            }
            if self.transitions.try_send(transition).is_err() {
                warn!("motion transition dropped; consumer is not keeping up");
            }
        }
        burst
    }

    /// Returns true when a burst just ended
    fn on_tick(&mut self) -> bool {
        let now_ms = self.clock.now_ms();
        if let Some(position) = self.pipeline.tick(now_ms) {
            if self.positions.try_send(position).is_err() {
                warn!("fused position dropped; consumer is not keeping up");
            }
        }
        for event in self.pipeline.drain_events() {
            if self.events.try_send(event).is_err() {
                warn!("fusion event dropped; consumer is not keeping up");
            }
        }

        if self.burst_remaining == 0 {
            return false;
        }
        self.burst_remaining -= 1;
        self.burst_remaining == 0
    }

    /// Flush all filter state; stale state would bias the next session
    fn shutdown(&mut self) -> FusionStats {
        let stats = self.pipeline.stats().clone();
        self.pipeline.reset();
        info!(
            ticks = stats.ticks,
            fused = stats.fused_positions,
            dropped = stats.dropped_samples,
            "tracking session stopped"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RangingReading, SourceKind, Vec3, STANDARD_GRAVITY};
    use crate::processing::motion::MotionState;

    fn venue() -> Vec<Anchor> {
        vec![
            Anchor::new("a1", Vec3::new(0.0, 0.0, 0.0)),
            Anchor::new("a2", Vec3::new(20.0, 0.0, 0.0)),
            Anchor::new("a3", Vec3::new(0.0, 20.0, 0.0)),
            Anchor::new("a4", Vec3::new(20.0, 20.0, 0.0)),
        ]
    }

    fn ranges(truth: Vec3, timestamp_ms: TimestampMs) -> Vec<SensorSample> {
        venue()
            .into_iter()
            .map(|anchor| {
                SensorSample::Ranging(RangingReading {
                    distance_m: (truth - anchor.position).norm(),
                    anchor_id: anchor.id,
                    quality: 0.1,
                    timestamp_ms,
                })
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_emits_fused_positions() {
        let (handle, mut outputs) = TrackingSession::spawn(FusionConfig::default(), venue(), None).unwrap();
        let truth = Vec3::new(5.0, 12.0, 0.0);
        for sample in ranges(truth, 0) {
            handle.push(sample).unwrap();
        }

        let fused = outputs.positions.recv().await.unwrap();
        assert_eq!(fused.primary_source(), Some(SourceKind::Trilateration));
        assert!((fused.position - truth).norm() < 1e-3);

        let stats = handle.stop().await.unwrap();
        assert_eq!(stats.fused_positions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_drops_oldest() {
        let config = FusionConfig {
            sample_queue_capacity: 4,
            ..FusionConfig::default()
        };
        let (handle, _outputs) = TrackingSession::spawn(config, venue(), None).unwrap();

        let truth = Vec3::new(5.0, 12.0, 0.0);
        for i in 0..10u64 {
            let sample = ranges(truth, i * 10).swap_remove(0);
            handle.push(sample).unwrap();
        }

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.dropped_samples, 6);
        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_closes_session() {
        let (handle, mut outputs) = TrackingSession::spawn(FusionConfig::default(), venue(), None).unwrap();
        let sender = handle.sample_sender();
        for sample in ranges(Vec3::new(5.0, 12.0, 0.0), 0) {
            sender.push(sample).unwrap();
        }
        let _ = outputs.positions.recv().await;

        let stats = handle.stop().await.unwrap();
        assert!(stats.ticks >= 1);
        assert_eq!(
            sender.push(ranges(Vec3::zeros(), 10).swap_remove(0)),
            Err(FusionError::SessionClosed)
        );
        assert!(outputs.positions.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_actor() {
        let (handle, mut outputs) = TrackingSession::spawn(FusionConfig::default(), venue(), None).unwrap();
        drop(handle);
        assert!(outputs.positions.recv().await.is_none());
        assert!(outputs.transitions.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_walking_starts_burst_ticks() {
        let (handle, mut outputs) = TrackingSession::spawn(FusionConfig::default(), venue(), None).unwrap();
        for sample in ranges(Vec3::new(5.0, 12.0, 0.0), 0) {
            handle.push(sample).unwrap();
        }
        for i in 0..30u64 {
            let t = i as f64 * 0.02;
            let z = STANDARD_GRAVITY + 1.8 * (2.0 * std::f64::consts::PI * 2.0 * t).sin();
            handle
                .push(SensorSample::Accelerometer {
                    acceleration: Vec3::new(0.0, 0.0, z),
                    timestamp_ms: i * 20,
                })
                .unwrap();
        }

        let transition = outputs.transitions.recv().await.unwrap();
        assert_eq!(transition.to, MotionState::Walking);

        tokio::time::sleep(Duration::from_millis(900)).await;
        let mut positions = 0;
        while outputs.positions.try_recv().is_ok() {
            positions += 1;
        }
        assert!(positions >= 4, "expected burst ticks, got {}", positions);
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = FusionConfig {
            fusion_tick_interval_ms: 0,
            ..FusionConfig::default()
        };
        assert!(matches!(
            TrackingSession::spawn(config, venue(), None),
            Err(FusionError::Config(_))
        ));
    }
}
