//! The kiosk control loop and the feed it publishes to the display page.

use super::display::{compose_display, DisplayFrame, DisplaySettings, Overlay};
use super::{KioskBackend, Mailbox, SessionController, SessionState};
use crate::config::KioskConfig;
use crate::frame_source::FrameSource;
use crate::server::mjpeg::{encode_rgb_jpeg, MjpegBroadcaster, MjpegFrame};
use crate::timing::StopSignal;
use crate::types::CaptureKind;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

const STREAM_QUALITY: u8 = 80;

/// What the kiosk shows, shared with the HTTP handlers serving the display.
pub struct KioskFeed {
    pub video: MjpegBroadcaster,
    overlay: watch::Sender<Overlay>,
    mailbox: Arc<Mailbox>,
}

impl KioskFeed {
    pub fn new(mailbox: Arc<Mailbox>) -> Arc<Self> {
        let (overlay, _) = watch::channel(Overlay {
            state: SessionState::Idle,
            headline: None,
            banner: None,
        });
        Arc::new(Self {
            video: MjpegBroadcaster::default(),
            overlay,
            mailbox,
        })
    }

    pub fn overlay(&self) -> Overlay {
        self.overlay.borrow().clone()
    }

    pub fn subscribe_overlay(&self) -> watch::Receiver<Overlay> {
        self.overlay.subscribe()
    }

    /// Queue a trigger from the display page.
    pub fn trigger(&self, kind: CaptureKind) {
        self.mailbox.post(kind);
    }

    fn publish(&self, display: DisplayFrame, frame_number: u64) {
        self.overlay.send_if_modified(|current| {
            let changed = *current != display.overlay;
            if changed {
                *current = display.overlay;
            }
            changed
        });

        if self.video.subscriber_count() == 0 {
            return;
        }
        if let Some(jpeg_data) = encode_rgb_jpeg(&display.image, STREAM_QUALITY) {
            self.video.publish(MjpegFrame {
                jpeg_data,
                frame_number,
            });
        }
    }
}

pub struct KioskApp<B> {
    controller: SessionController<B>,
    source: Arc<FrameSource>,
    feed: Arc<KioskFeed>,
    settings: DisplaySettings,
    tick: Duration,
}

impl<B: KioskBackend> KioskApp<B> {
    pub fn new(
        controller: SessionController<B>,
        source: Arc<FrameSource>,
        feed: Arc<KioskFeed>,
        config: &KioskConfig,
    ) -> Self {
        let settings = DisplaySettings {
            width: config.screen_size[0],
            height: config.screen_size[1],
            countdown: controller.timings().countdown,
        };
        Self {
            controller,
            source,
            feed,
            settings,
            tick: Duration::from_millis(config.tick_ms),
        }
    }

    pub fn controller(&self) -> &SessionController<B> {
        &self.controller
    }

    /// Render, publish, advance. Returns the state after the tick.
    pub fn step(&mut self, now: Instant, frame_number: u64) -> SessionState {
        let live = self.source.get_latest_frame();
        let display = compose_display(self.controller.session(), live.as_ref(), &self.settings, now);
        self.feed.publish(display, frame_number);
        self.controller.tick(now);
        self.controller.state()
    }

    /// Run until `stop` fires.
    pub fn run(&mut self, stop: &StopSignal) {
        log::info!(
            "Kiosk running at {}x{}, tick {:?}",
            self.settings.width,
            self.settings.height,
            self.tick
        );
        let mut frame_number = 0u64;
        loop {
            self.step(Instant::now(), frame_number);
            frame_number += 1;
            if stop.sleep(self.tick) {
                break;
            }
        }
        log::info!("Kiosk loop stopped in {:?}", self.controller.state());
    }
}
