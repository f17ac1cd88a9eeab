//! Session manager: event loop, effect runner, and the public async API
//!
//! A single task owns the reducer state and drains one ordered event queue
//! (the message-passing boundary between the audio callbacks, the channel
//! task, and callers). Effects that involve I/O are spawned; resources they
//! create are registered in a shared map keyed by session generation, so
//! teardown for generation N can never reap generation N+1's resources and an
//! abandoned open attempt cleans up after itself.
//!
//! Ordering guarantee: inbound audio and interruption cues flow through the
//! same queue in arrival order, so an interruption preempts exactly the chunks
//! scheduled before it and never audio that arrives after.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use super::channel::LiveChannel;
use super::machine::{reduce, Effect, Event, State};
use super::protocol::ServerMessage;
use super::{ConnectionState, SessionError};
use crate::audio::{
    decode_pcm16, from_base64, spectrum, start_capture, CaptureLevel, PlaybackScheduler,
    PlaybackStream, SpectrumFeed, SpectrumTap, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE,
};
use crate::config::Config;
use crate::voice::VoiceConfig;

/// Event queue depth. Inbound audio dominates; at ~10 chunks/s a backlog this
/// deep means seconds of unprocessed audio and something is already wrong.
const EVENT_QUEUE_DEPTH: usize = 256;

/// Outbound capture blocks buffered between the audio thread and the channel
/// task before the capture callback starts dropping.
const OUTBOUND_QUEUE_DEPTH: usize = 32;

enum Outbound {
    Audio(Vec<u8>),
    Text(String),
    Close,
}

/// Resources owned by one session generation.
struct SessionResources {
    scheduler: Option<PlaybackScheduler>,
    playback: Option<PlaybackStream>,
    capture: Option<crate::audio::CaptureHandle>,
    outbound_tx: Option<mpsc::Sender<Outbound>>,
    channel_task: Option<tokio::task::JoinHandle<()>>,
    pump_task: Option<tokio::task::JoinHandle<()>>,
}

impl SessionResources {
    fn empty() -> Self {
        Self {
            scheduler: None,
            playback: None,
            capture: None,
            outbound_tx: None,
            channel_task: None,
            pump_task: None,
        }
    }
}

type ResourceMap = Arc<Mutex<HashMap<Uuid, SessionResources>>>;

/// Public handle to the session loop.
///
/// Cheap to clone. All methods funnel through the event queue; `connect` and
/// `disconnect` additionally await the corresponding state transition.
#[derive(Clone)]
pub struct SessionManager {
    event_tx: mpsc::Sender<Event>,
    state_rx: watch::Receiver<ConnectionState>,
    meter: CaptureLevel,
    feed: SpectrumFeed,
    feed_stop: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl SessionManager {
    /// Spawn the session loop and the visualization feed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let meter = CaptureLevel::default();
        let tap = SpectrumTap::new();

        let (feed_tx, feed) = spectrum::feed_channel();
        let (feed_stop_tx, feed_stop_rx) = oneshot::channel();
        tokio::spawn(spectrum::run_spectrum_feed(tap.clone(), feed_tx, feed_stop_rx));

        let loop_ctx = LoopContext {
            event_tx: event_tx.clone(),
            state_tx,
            resources: Arc::new(Mutex::new(HashMap::new())),
            meter: meter.clone(),
            tap,
        };
        tokio::spawn(run_session_loop(event_rx, loop_ctx));

        Self {
            event_tx,
            state_rx,
            meter,
            feed,
            feed_stop: Arc::new(Mutex::new(Some(feed_stop_tx))),
        }
    }

    /// Open a session with these voice parameters.
    ///
    /// Resolves once the session is Connected, or with the error that left it
    /// in the Error state. Fails immediately when a session is already active;
    /// the caller must disconnect first.
    pub async fn connect(&self, config: VoiceConfig) -> Result<(), SessionError> {
        let mut state_rx = self.state_rx.clone();
        // The reducer ignores Connect while a session exists; fail fast here
        // instead of waiting for a transition that will never come
        match &*state_rx.borrow_and_update() {
            ConnectionState::Connecting | ConnectionState::Connected => {
                return Err(SessionError::ConfigurationError(
                    "a session is already active".to_string(),
                ));
            }
            _ => {}
        }

        self.send_event(Event::Connect { config }).await?;

        loop {
            state_rx.changed().await.map_err(|_| {
                SessionError::ChannelRuntimeError("session loop terminated".to_string())
            })?;
            match &*state_rx.borrow_and_update() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Error(message) => {
                    return Err(SessionError::ChannelOpenFailure(message.clone()))
                }
                ConnectionState::Disconnected => {
                    // A racing disconnect won; report it as an aborted open
                    return Err(SessionError::ChannelOpenFailure(
                        "connection aborted".to_string(),
                    ));
                }
                ConnectionState::Connecting => continue,
            }
        }
    }

    /// Tear the session down. Idempotent; resolves once Disconnected.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let mut state_rx = self.state_rx.clone();
        if matches!(*state_rx.borrow_and_update(), ConnectionState::Disconnected) {
            return Ok(());
        }

        self.send_event(Event::Disconnect).await?;

        while !matches!(
            *state_rx.borrow_and_update(),
            ConnectionState::Disconnected
        ) {
            state_rx.changed().await.map_err(|_| {
                SessionError::ChannelRuntimeError("session loop terminated".to_string())
            })?;
        }
        Ok(())
    }

    /// Replace the voice parameters. No-op unless Connected, where it sends an
    /// advisory in-band control message.
    pub async fn update_voice_params(&self, config: VoiceConfig) -> Result<(), SessionError> {
        self.send_event(Event::UpdateVoiceParams { config }).await
    }

    /// Observable connection state.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Microphone level meter; reads 0.0 while no capture is active.
    pub fn capture_level(&self) -> CaptureLevel {
        self.meter.clone()
    }

    /// Live spectrum feed over the rendered output; zeroed bins while idle.
    pub fn spectrum(&self) -> SpectrumFeed {
        self.feed.clone()
    }

    /// Stop the visualization feed and let the session loop wind down once
    /// every handle is dropped.
    pub fn shutdown(&self) {
        if let Some(stop) = self.feed_stop.lock().unwrap().take() {
            let _ = stop.send(());
        }
    }

    async fn send_event(&self, event: Event) -> Result<(), SessionError> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| SessionError::ChannelRuntimeError("session loop terminated".to_string()))
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

struct LoopContext {
    event_tx: mpsc::Sender<Event>,
    state_tx: watch::Sender<ConnectionState>,
    resources: ResourceMap,
    meter: CaptureLevel,
    tap: SpectrumTap,
}

fn public_state(state: &State) -> ConnectionState {
    match state {
        State::Disconnected => ConnectionState::Disconnected,
        State::Connecting { .. } => ConnectionState::Connecting,
        State::Connected { .. } => ConnectionState::Connected,
        State::Error { message } => ConnectionState::Error(message.clone()),
    }
}

/// Single-writer loop: drain events, reduce, publish state, run effects.
async fn run_session_loop(mut event_rx: mpsc::Receiver<Event>, ctx: LoopContext) {
    let mut state = State::default();
    log::info!("Session loop started");

    while let Some(event) = event_rx.recv().await {
        let (next_state, effects) = reduce(&state, event);
        state = next_state;
        // Send even when the variant is unchanged; watch dedups on PartialEq
        let _ = ctx.state_tx.send_if_modified(|current| {
            let next = public_state(&state);
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });

        for effect in effects {
            run_effect(effect, &ctx);
        }
    }
    log::info!("Session loop exiting");
}

fn run_effect(effect: Effect, ctx: &LoopContext) {
    match effect {
        Effect::OpenSession { id, config } => {
            // Register the slot before spawning so a Disconnect processed
            // later in this loop always finds something to tear down
            ctx.resources
                .lock()
                .unwrap()
                .insert(id, SessionResources::empty());

            let event_tx = ctx.event_tx.clone();
            let resources = ctx.resources.clone();
            let tap = ctx.tap.clone();
            tokio::spawn(async move {
                match open_session(id, config, resources, tap, event_tx.clone()).await {
                    Ok(()) => {
                        let _ = event_tx.send(Event::ChannelOpened { id }).await;
                    }
                    Err(e) => {
                        log::warn!("Session {} open failed: {}", id, e);
                        let _ = event_tx
                            .send(Event::OpenFailed {
                                id,
                                err: e.to_string(),
                            })
                            .await;
                    }
                }
            });
        }

        Effect::StartStreaming { id } => {
            if let Err(e) = start_streaming(id, ctx) {
                log::warn!("Session {} streaming failed: {}", id, e);
                let event_tx = ctx.event_tx.clone();
                tokio::spawn(async move {
                    let _ = event_tx
                        .send(Event::SessionFault {
                            id,
                            err: e.to_string(),
                        })
                        .await;
                });
            }
        }

        Effect::EnqueueAudio {
            id,
            audio,
            sample_rate,
        } => {
            // Decode failures are logged and dropped; the session stays alive
            let chunk = from_base64(&audio).and_then(|bytes| decode_pcm16(&bytes, sample_rate, 1));
            match chunk {
                Ok(chunk) => {
                    let map = ctx.resources.lock().unwrap();
                    if let Some(scheduler) =
                        map.get(&id).and_then(|res| res.scheduler.as_ref())
                    {
                        scheduler.enqueue(chunk);
                    }
                }
                Err(e) => log::warn!("Dropping malformed audio chunk: {}", e),
            }
        }

        Effect::InterruptPlayback { id } => {
            let map = ctx.resources.lock().unwrap();
            if let Some(scheduler) = map.get(&id).and_then(|res| res.scheduler.as_ref()) {
                scheduler.interrupt();
            }
        }

        Effect::SendControl { id, text } => {
            let outbound = {
                let map = ctx.resources.lock().unwrap();
                map.get(&id).and_then(|res| res.outbound_tx.clone())
            };
            if let Some(tx) = outbound {
                // Advisory, best-effort
                if tx.try_send(Outbound::Text(text)).is_err() {
                    log::warn!("Voice parameter update dropped: outbound queue full");
                }
            }
        }

        Effect::Teardown { id } => {
            let resources = ctx.resources.clone();
            let meter = ctx.meter.clone();
            let tap = ctx.tap.clone();
            // Joining audio threads blocks; keep it off the event loop
            tokio::task::spawn_blocking(move || {
                let taken = resources.lock().unwrap().remove(&id);
                if let Some(res) = taken {
                    teardown_resources(id, res);
                }
                meter.set(0.0);
                tap.clear();
            });
        }
    }
}

/// Open playback and the duplex channel for generation `id`, registering
/// resources as they come up so an interleaved teardown reaps them.
async fn open_session(
    id: Uuid,
    config: VoiceConfig,
    resources: ResourceMap,
    tap: SpectrumTap,
    event_tx: mpsc::Sender<Event>,
) -> Result<(), SessionError> {
    let conn = Config::from_env()?;

    // Output side first: playback must be ready before the first audio delta
    let scheduler = PlaybackScheduler::new(PLAYBACK_SAMPLE_RATE);
    let playback = tokio::task::block_in_place(|| PlaybackStream::open(&scheduler, tap))?;

    if !register(&resources, id, |res| {
        res.scheduler = Some(scheduler);
        res.playback = Some(playback);
    }) {
        // Torn down while we were opening the device
        return Err(SessionError::ChannelOpenFailure(
            "session cancelled".to_string(),
        ));
    }

    let channel = LiveChannel::open(&conn, &config).await?;

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
    let channel_task = tokio::spawn(run_channel_task(id, channel, outbound_rx, event_tx));

    if !register(&resources, id, |res| {
        res.outbound_tx = Some(outbound_tx.clone());
        res.channel_task = Some(channel_task);
    }) {
        // Torn down mid-open: ask the channel task to close cleanly
        let _ = outbound_tx.try_send(Outbound::Close);
        return Err(SessionError::ChannelOpenFailure(
            "session cancelled".to_string(),
        ));
    }

    Ok(())
}

/// Apply `f` to generation `id`'s resource slot. Returns false when the slot
/// is gone (teardown already ran).
fn register(
    resources: &ResourceMap,
    id: Uuid,
    f: impl FnOnce(&mut SessionResources),
) -> bool {
    let mut map = resources.lock().unwrap();
    match map.get_mut(&id) {
        Some(res) => {
            f(res);
            true
        }
        None => false,
    }
}

/// Start the microphone and the pump forwarding capture blocks outbound.
fn start_streaming(id: Uuid, ctx: &LoopContext) -> Result<(), SessionError> {
    let (block_tx, mut block_rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_QUEUE_DEPTH);
    let capture = start_capture(block_tx, ctx.meter.clone())?;

    let mut map = ctx.resources.lock().unwrap();
    let res = match map.get_mut(&id) {
        Some(res) => res,
        None => {
            drop(map);
            capture.stop();
            return Err(SessionError::ChannelOpenFailure(
                "session cancelled".to_string(),
            ));
        }
    };

    let outbound_tx = res.outbound_tx.clone().ok_or_else(|| {
        SessionError::ChannelRuntimeError("channel writer missing".to_string())
    })?;

    let pump = tokio::spawn(async move {
        while let Some(pcm) = block_rx.recv().await {
            // try_send mirrors the capture callback: drop under backpressure
            if outbound_tx.try_send(Outbound::Audio(pcm)).is_err() {
                log::debug!("Outbound pump: channel writer busy, block dropped");
            }
        }
        log::debug!("Outbound pump exiting");
    });

    res.capture = Some(capture);
    res.pump_task = Some(pump);
    log::info!("Session {}: streaming microphone audio", id);
    Ok(())
}

/// Owns the LiveChannel for one generation: writes outbound commands and
/// forwards inbound envelopes into the event queue, preserving arrival order.
async fn run_channel_task(
    id: Uuid,
    mut channel: LiveChannel,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    event_tx: mpsc::Sender<Event>,
) {
    // Taken out of the channel so inbound and outbound can be polled together
    let mut incoming_rx = match channel.take_incoming_receiver() {
        Some(rx) => rx,
        None => return,
    };

    loop {
        tokio::select! {
            cmd = outbound_rx.recv() => match cmd {
                Some(Outbound::Audio(pcm)) => {
                    if let Err(e) = channel.send_audio(&pcm, CAPTURE_SAMPLE_RATE).await {
                        let _ = event_tx.send(Event::SessionFault { id, err: e.to_string() }).await;
                        break;
                    }
                }
                Some(Outbound::Text(text)) => {
                    if let Err(e) = channel.send_text(&text).await {
                        log::warn!("Control message send failed: {}", e);
                    }
                }
                Some(Outbound::Close) | None => {
                    channel.close().await;
                    return;
                }
            },
            msg = incoming_rx.recv() => {
                let event = match msg {
                    Some(ServerMessage::AudioDelta { audio, sample_rate }) => {
                        Event::InboundAudio { id, audio, sample_rate }
                    }
                    Some(ServerMessage::Interrupted) => Event::InboundInterrupted { id },
                    Some(ServerMessage::TurnComplete) => Event::InboundTurnComplete { id },
                    Some(ServerMessage::Error { error }) => {
                        Event::SessionFault { id, err: error.message }
                    }
                    Some(ServerMessage::Closed) | None => Event::ChannelClosed { id },
                    Some(ServerMessage::Opened { .. }) | Some(ServerMessage::Unknown) => continue,
                };
                let fatal = matches!(event, Event::SessionFault { .. } | Event::ChannelClosed { .. });
                if event_tx.send(event).await.is_err() || fatal {
                    break;
                }
            }
        }
    }
    log::debug!("Channel task for session {} exiting", id);
}

/// Best-effort release of everything a generation created, in reverse
/// dependency order. Secondary failures are logged, never propagated.
fn teardown_resources(id: Uuid, res: SessionResources) {
    log::info!("Tearing down session {}", id);

    if let Some(capture) = res.capture {
        capture.stop();
    }
    if let Some(pump) = res.pump_task {
        pump.abort();
    }
    if let Some(tx) = res.outbound_tx {
        // Wakes the channel task so it sends the close frame
        let _ = tx.try_send(Outbound::Close);
    }
    if let Some(playback) = res.playback {
        playback.stop();
    }
    if let Some(task) = res.channel_task {
        // Give the close frame a moment, then reap
        std::thread::sleep(std::time::Duration::from_millis(100));
        task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_state_mapping() {
        assert_eq!(
            public_state(&State::Disconnected),
            ConnectionState::Disconnected
        );
        assert_eq!(
            public_state(&State::Error {
                message: "boom".to_string()
            }),
            ConnectionState::Error("boom".to_string())
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_disconnect_before_connect_is_a_no_op() {
        let manager = SessionManager::new();
        manager.disconnect().await.expect("disconnect");
        assert_eq!(
            *manager.state().borrow(),
            ConnectionState::Disconnected
        );
        manager.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_voice_params_while_disconnected_keeps_state() {
        let manager = SessionManager::new();
        manager
            .update_voice_params(VoiceConfig::new("aria"))
            .await
            .expect("update");

        // The event is consumed without any transition
        manager.disconnect().await.expect("disconnect");
        assert_eq!(
            *manager.state().borrow(),
            ConnectionState::Disconnected
        );
        manager.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_meter_reads_zero_while_idle() {
        let manager = SessionManager::new();
        assert_eq!(manager.capture_level().get(), 0.0);
        manager.shutdown();
    }
}
