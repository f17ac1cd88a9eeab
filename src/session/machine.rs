//! Session state machine
//!
//! All lifecycle transitions go through the `reduce()` function, which returns
//! a new state and a list of effects to execute. The reducer is pure; the
//! manager loop is the single writer and executes effects asynchronously.
//!
//! Each connect attempt gets a fresh generation `Uuid`. Events carry the
//! generation they belong to and the reducer ignores events whose generation
//! does not match the current one, so a torn-down session's stragglers
//! (late inbound audio, a delayed open result) can never touch its successor.

use uuid::Uuid;

use crate::voice::VoiceConfig;

/// Internal state of the session lifecycle.
/// This is the authoritative state - all transitions go through the reducer.
#[derive(Debug, Clone)]
pub enum State {
    Disconnected,
    Connecting {
        session_id: Uuid,
        config: VoiceConfig,
    },
    Connected {
        session_id: Uuid,
        config: VoiceConfig,
    },
    Error {
        message: String,
    },
}

impl Default for State {
    fn default() -> Self {
        State::Disconnected
    }
}

/// Events that can trigger state transitions.
/// Sent by the public API, the channel task, and the capture pipeline.
#[derive(Debug, Clone)]
pub enum Event {
    /// Caller requested a connection with these voice parameters
    Connect { config: VoiceConfig },
    /// Caller requested disconnect (idempotent)
    Disconnect,
    /// Caller replaced the voice parameters
    UpdateVoiceParams { config: VoiceConfig },

    // Channel lifecycle events
    ChannelOpened { id: Uuid },
    OpenFailed { id: Uuid, err: String },
    ChannelClosed { id: Uuid },
    /// Fatal mid-session failure (transport error, device failure)
    SessionFault { id: Uuid, err: String },

    // Inbound envelopes while connected
    InboundAudio {
        id: Uuid,
        /// Base64 PCM16 payload, decoded by the effect runner
        audio: String,
        sample_rate: u32,
    },
    InboundInterrupted { id: Uuid },
    InboundTurnComplete { id: Uuid },
}

/// Effects to be executed after a state transition.
/// The manager loop handles these asynchronously.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Open playback, the duplex channel, and the handshake
    OpenSession { id: Uuid, config: VoiceConfig },
    /// Start the capture pipeline and the outbound pump.
    /// Only issued on ChannelOpened - microphone audio never flows earlier.
    StartStreaming { id: Uuid },
    /// Decode an inbound chunk and commit it to the playback timeline
    EnqueueAudio {
        id: Uuid,
        audio: String,
        sample_rate: u32,
    },
    /// Flush everything queued for playback
    InterruptPlayback { id: Uuid },
    /// Send advisory text on the channel (live parameter update)
    SendControl { id: Uuid, text: String },
    /// Release every resource belonging to this generation
    Teardown { id: Uuid },
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Key rules:
/// - Never mutate state directly
/// - Ignore events with stale session generations
/// - Teardown on every path that leaves Connecting or Connected
pub fn reduce(state: &State, event: Event) -> (State, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use State::*;

    let current_id: Option<Uuid> = match state {
        Disconnected | Error { .. } => None,
        Connecting { session_id, .. } | Connected { session_id, .. } => Some(*session_id),
    };

    let is_stale = |eid: Uuid| Some(eid) != current_id;

    match (state, event) {
        // -----------------
        // Disconnected / Error: only Connect does anything
        // -----------------
        (Disconnected | Error { .. }, Connect { config }) => {
            let id = Uuid::new_v4();
            (
                Connecting {
                    session_id: id,
                    config: config.clone(),
                },
                vec![OpenSession { id, config }],
            )
        }
        (Disconnected, Disconnect) => (Disconnected, vec![]),
        (Error { .. }, Disconnect) => (Disconnected, vec![]),

        // -----------------
        // Connecting
        // -----------------
        (Connecting { session_id, config }, ChannelOpened { id }) if *session_id == id => (
            Connected {
                session_id: id,
                config: config.clone(),
            },
            vec![StartStreaming { id }],
        ),
        (Connecting { session_id, .. }, OpenFailed { id, err }) if *session_id == id => (
            Error { message: err },
            vec![Teardown { id }],
        ),
        (Connecting { session_id, .. }, Disconnect) => {
            // Unconditional: the open attempt may still succeed in flight,
            // teardown reaps whatever it managed to create
            (Disconnected, vec![Teardown { id: *session_id }])
        }

        // -----------------
        // Connected
        // -----------------
        (Connected { session_id, .. }, Disconnect) => {
            (Disconnected, vec![Teardown { id: *session_id }])
        }
        (Connected { session_id, .. }, ChannelClosed { id }) if *session_id == id => {
            (Disconnected, vec![Teardown { id }])
        }
        (Connected { session_id, .. }, SessionFault { id, err }) if *session_id == id => (
            Error { message: err },
            vec![Teardown { id }],
        ),
        (
            Connected { session_id, .. },
            InboundAudio {
                id,
                audio,
                sample_rate,
            },
        ) if *session_id == id => (
            state.clone(),
            vec![EnqueueAudio {
                id,
                audio,
                sample_rate,
            }],
        ),
        (Connected { session_id, .. }, InboundInterrupted { id }) if *session_id == id => {
            (state.clone(), vec![InterruptPlayback { id }])
        }
        (Connected { session_id, .. }, InboundTurnComplete { id }) if *session_id == id => {
            (state.clone(), vec![])
        }
        (Connected { session_id, .. }, UpdateVoiceParams { config }) => (
            Connected {
                session_id: *session_id,
                config: config.clone(),
            },
            vec![SendControl {
                id: *session_id,
                text: config.control_message(),
            }],
        ),

        // A second Connect while a session exists is ignored; the caller must
        // disconnect first
        (Connecting { .. } | Connected { .. }, Connect { .. }) => {
            log::warn!("Connect ignored: a session is already active");
            (state.clone(), vec![])
        }

        // UpdateVoiceParams anywhere else is a no-op; the new config simply
        // rides the next Connect
        (_, UpdateVoiceParams { .. }) => (state.clone(), vec![]),

        // Stale or out-of-place generation-tagged events
        (
            _,
            ChannelOpened { id }
            | OpenFailed { id, .. }
            | ChannelClosed { id }
            | SessionFault { id, .. }
            | InboundAudio { id, .. }
            | InboundInterrupted { id }
            | InboundTurnComplete { id },
        ) => {
            if is_stale(id) {
                log::debug!("Ignoring stale event for session {}", id);
            }
            (state.clone(), vec![])
        }
    }
}
