//! coordinator.rs
//! Glue between the operator surface and the background workers.
//!
//! Owns:
//! - the active [`CommandLink`] (absent in telemetry-only mode)
//! - the [`TelemetryIngestor`] and its freshest-frame buffer
//! - the [`RefreshLoop`] that keeps the selected motor commanded
//! - at most one [`AsyncLogger`]
//!
//! Every method takes `&self` so the coordinator can be shared behind an `Arc`
//! between the console thread and the frame pump.

use parking_lot::Mutex;
use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};
use log::{debug, info, warn};

use crate::command::{
    CommandLink, DatagramLink, LinkSnapshot, PWM_MAX, PWM_NEUTRAL, RefreshLoop, SharedThrottle,
    ThrottleState, VerifiedLink, link::{CHANNEL_COUNT, channel_index}, open_serial,
};
use crate::config::{Settings, TransportKind};
use crate::error::BenchError;
use crate::telemetry::{FreshnessBuffer, IngestStats, TelemetryFrame, TelemetryIngestor};
use crate::utils::logger::{AsyncLogger, LogRecord};

/// Maps a throttle percentage onto the PWM range, clamping to 0..=100 first.
pub fn percent_to_pwm(pct: f32) -> u16 {
    let pct = if pct.is_nan() { 0.0 } else { pct.clamp(0.0, 100.0) };
    let span = f32::from(PWM_MAX - PWM_NEUTRAL);
    PWM_NEUTRAL + (pct / 100.0 * span).round() as u16
}

pub fn pwm_to_percent(pwm: u16) -> f32 {
    let span = f32::from(PWM_MAX - PWM_NEUTRAL);
    f32::from(pwm.saturating_sub(PWM_NEUTRAL)) / span * 100.0
}

pub struct Coordinator {
    settings: Settings,
    link: Option<Arc<dyn CommandLink>>,
    refresh: Option<RefreshLoop>,
    throttle: SharedThrottle,
    frames: Arc<FreshnessBuffer<TelemetryFrame>>,
    ingestor: TelemetryIngestor,
    logger: Mutex<Option<AsyncLogger>>,
    shut_down: AtomicBool,
}

impl Coordinator {
    /// Builds the configured command link, then starts telemetry.
    /// A failed verified handshake is returned as [`BenchError::Link`].
    pub fn new(settings: Settings) -> Result<Self, BenchError> {
        let link: Arc<dyn CommandLink> = match settings.transport {
            TransportKind::Verified => {
                let port = open_serial(
                    &settings.com_port,
                    settings.baud,
                    settings.link.timeouts.serial_read(),
                )?;
                Arc::new(VerifiedLink::connect(port, &settings.link)?)
            }
            TransportKind::Datagram => Arc::new(DatagramLink::new(settings.command_target()?)?),
        };
        Self::build(settings, Some(link))
    }

    /// Telemetry and recording only; motor commands are cached but not sent.
    pub fn telemetry_only(settings: Settings) -> Result<Self, BenchError> {
        warn!("[Coordinator] running without a command link");
        Self::build(settings, None)
    }

    pub fn with_link(settings: Settings, link: Arc<dyn CommandLink>) -> Result<Self, BenchError> {
        Self::build(settings, Some(link))
    }

    fn build(settings: Settings, link: Option<Arc<dyn CommandLink>>) -> Result<Self, BenchError> {
        let frames = Arc::new(FreshnessBuffer::new());
        let ingestor = TelemetryIngestor::bind(settings.telemetry_addr()?, settings.schema, frames.clone())?;
        ingestor.start()?;

        let throttle: SharedThrottle = Arc::new(Mutex::new(ThrottleState::default()));
        let refresh = match &link {
            Some(link) => Some(RefreshLoop::spawn(
                settings.refresh_interval(),
                link.clone(),
                throttle.clone(),
            )?),
            None => None,
        };

        info!("[Coordinator] ready");
        Ok(Self {
            settings,
            link,
            refresh,
            throttle,
            frames,
            ingestor,
            logger: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        })
    }

    fn dispatch(&self, channel: u8, pwm: u16) -> Result<(), BenchError> {
        match &self.link {
            Some(link) => link.set_channel(channel, pwm).map_err(BenchError::from),
            None => {
                debug!("[Coordinator] no link, ch{} = {} not sent", channel, pwm);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Motor API
    // ------------------------------------------------------------------

    /// Makes `idx` the active motor and commands it to neutral.
    pub fn select_channel(&self, idx: u8) -> Result<(), BenchError> {
        channel_index(idx).map_err(|_| BenchError::InvalidChannel(idx))?;
        *self.throttle.lock() = ThrottleState { channel: idx, pwm: PWM_NEUTRAL };
        self.dispatch(idx, PWM_NEUTRAL)
    }

    /// Caches and sends the throttle for the active motor; returns the PWM sent.
    pub fn set_throttle_percent(&self, pct: f32) -> Result<u16, BenchError> {
        let pwm = percent_to_pwm(pct);
        let channel = {
            let mut t = self.throttle.lock();
            t.pwm = pwm;
            t.channel
        };
        self.dispatch(channel, pwm)?;
        Ok(pwm)
    }

    /// Blocking: runs `pct` for `duration`, then drops back to 0 %.
    pub fn pulse(&self, pct: f32, duration: Duration) -> Result<(), BenchError> {
        self.set_throttle_percent(pct)?;
        thread::sleep(duration);
        self.set_throttle_percent(0.0)?;
        Ok(())
    }

    /// Arms and keeps re-sending the cached throttle until `stop_all`.
    pub fn start_continuous(&self) -> Result<(), BenchError> {
        let Some(link) = &self.link else {
            warn!("[Coordinator] continuous mode needs a command link");
            return Ok(());
        };
        if let Some(refresh) = &self.refresh {
            refresh.set_continuous(true);
        }
        if !link.arm(true) {
            warn!("[Coordinator] arming not confirmed");
        }
        let ThrottleState { channel, pwm } = *self.throttle.lock();
        self.dispatch(channel, pwm)
    }

    /// Ends continuous mode, disarms and drives every motor to neutral.
    /// Each step runs even if an earlier one failed; the first error is returned.
    pub fn stop_all(&self) -> Result<(), BenchError> {
        if let Some(refresh) = &self.refresh {
            refresh.set_continuous(false);
        }
        self.throttle.lock().pwm = PWM_NEUTRAL;

        let Some(link) = &self.link else {
            return Ok(());
        };
        if !link.arm(false) {
            warn!("[Coordinator] disarm not confirmed");
        }

        let mut first_error = None;
        for ch in 1..=CHANNEL_COUNT as u8 {
            if let Err(e) = link.set_channel(ch, PWM_NEUTRAL) {
                warn!("[Coordinator] neutral ch{} failed: {}", ch, e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Telemetry API
    // ------------------------------------------------------------------

    /// Freshest frame since the last pull, recorded if logging is active.
    pub fn latest_frame(&self) -> Option<TelemetryFrame> {
        let frame = self.frames.try_take()?;
        if let Some(logger) = self.logger.lock().as_ref() {
            let pwm = self.commanded_pwm();
            logger.enqueue(LogRecord::new(frame.clone(), Some(pwm)));
        }
        Some(frame)
    }

    pub fn telemetry_addr(&self) -> std::io::Result<SocketAddr> {
        self.ingestor.local_addr()
    }

    pub fn ingest_stats(&self) -> IngestStats {
        self.ingestor.stats()
    }

    pub fn is_ingesting(&self) -> bool {
        self.ingestor.is_running()
    }

    // ------------------------------------------------------------------
    // Logging API
    // ------------------------------------------------------------------

    /// Starts recording; no-op if a logger is already active.
    pub fn start_logging(&self, prefix: &str) -> Result<(), BenchError> {
        let mut slot = self.logger.lock();
        if slot.is_some() {
            debug!("[Coordinator] already recording");
            return Ok(());
        }
        *slot = Some(AsyncLogger::start(
            &self.settings.log_dir,
            prefix,
            self.settings.schema,
            true,
        )?);
        Ok(())
    }

    /// Stops recording and returns the saved file, if one was active.
    pub fn stop_logging(&self) -> Result<Option<PathBuf>, BenchError> {
        let logger = self.logger.lock().take();
        match logger {
            Some(logger) => Ok(Some(logger.stop()?)),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    pub fn selected_channel(&self) -> u8 {
        self.throttle.lock().channel
    }

    pub fn commanded_pwm(&self) -> u16 {
        self.throttle.lock().pwm
    }

    pub fn throttle_percent(&self) -> f32 {
        pwm_to_percent(self.commanded_pwm())
    }

    pub fn is_continuous(&self) -> bool {
        self.refresh.as_ref().is_some_and(|r| r.is_continuous())
    }

    pub fn is_recording(&self) -> bool {
        self.logger.lock().is_some()
    }

    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    pub fn link_snapshot(&self) -> Option<LinkSnapshot> {
        self.link.as_ref().map(|l| l.snapshot())
    }

    pub fn is_link_connected(&self) -> bool {
        self.link.as_ref().is_some_and(|l| l.is_connected())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // ------------------------------------------------------------------
    // Cleanup
    // ------------------------------------------------------------------

    /// Stops logging, then ingestion, then every motor. Runs once.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("[Coordinator] shutting down");

        match self.stop_logging() {
            Ok(Some(path)) => info!("[Coordinator] log saved to {}", path.display()),
            Ok(None) => {}
            Err(e) => warn!("[Coordinator] stop logging: {}", e),
        }
        self.ingestor.stop();
        if let Err(e) = self.stop_all() {
            warn!("[Coordinator] stop all: {}", e);
        }

        if let Some(refresh) = &self.refresh {
            refresh.stop();
        }
        if let Some(link) = &self.link {
            link.close();
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
