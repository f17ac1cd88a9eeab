//! Voice parameters and system-instruction composition
//!
//! `VoiceConfig` is the single value describing how the remote voice should
//! sound: identity, speed, tone, a free-text base instruction, and an optional
//! cloned-style directive. It is replaced as a whole, never patched field by
//! field. While disconnected a new config simply takes effect on the next
//! connect; while connected an explicit apply sends an advisory in-band
//! control message (the remote service offers no parameter-update frame, so
//! the update rides as instruction text, best-effort).

use serde::{Deserialize, Serialize};

/// Speaking-speed bounds accepted by the service.
pub const MIN_SPEED: f32 = 0.5;
pub const MAX_SPEED: f32 = 2.0;

/// Delivery tone of the synthesized voice. Closed set; the wire value is the
/// lowercase label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Neutral,
    Warm,
    Energetic,
    Calm,
    Formal,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Neutral => "neutral",
            Tone::Warm => "warm",
            Tone::Energetic => "energetic",
            Tone::Calm => "calm",
            Tone::Formal => "formal",
        }
    }
}

impl Default for Tone {
    fn default() -> Self {
        Tone::Neutral
    }
}

/// Complete voice parameter set for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Named voice identity offered by the service.
    pub voice: String,
    /// Speaking speed multiplier, clamped to [0.5, 2.0] on construction.
    pub speed: f32,
    pub tone: Tone,
    /// Base system instruction (free text).
    pub base_instruction: String,
    /// Style directive of the active cloned voice profile, passed through
    /// verbatim when present.
    pub style_instruction: Option<String>,
}

impl VoiceConfig {
    pub fn new(voice: impl Into<String>) -> Self {
        Self {
            voice: voice.into(),
            speed: 1.0,
            tone: Tone::default(),
            base_instruction: String::new(),
            style_instruction: None,
        }
    }

    /// Set the speaking speed, clamping out-of-range values.
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed.clamp(MIN_SPEED, MAX_SPEED);
        self
    }

    pub fn with_tone(mut self, tone: Tone) -> Self {
        self.tone = tone;
        self
    }

    pub fn with_base_instruction(mut self, text: impl Into<String>) -> Self {
        self.base_instruction = text.into();
        self
    }

    pub fn with_style(mut self, style: Option<String>) -> Self {
        self.style_instruction = style;
        self
    }

    /// Full system instruction sent in the session setup envelope.
    ///
    /// Base instruction, then tone and pacing hints, then the cloned-style
    /// directive verbatim.
    pub fn compose_system_instruction(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if !self.base_instruction.is_empty() {
            parts.push(self.base_instruction.clone());
        }
        parts.push(format!("Speak in a {} tone.", self.tone.as_str()));
        parts.push(pacing_sentence(self.speed).to_string());
        if let Some(style) = &self.style_instruction {
            parts.push(style.clone());
        }
        parts.join(" ")
    }

    /// Advisory control message for a live parameter update.
    pub fn control_message(&self) -> String {
        let mut msg = format!(
            "From now on, speak in a {} tone. {}",
            self.tone.as_str(),
            pacing_sentence(self.speed)
        );
        if let Some(style) = &self.style_instruction {
            msg.push(' ');
            msg.push_str(style);
        }
        msg
    }
}

/// Qualitative pacing label for a speed multiplier.
pub fn speed_qualifier(speed: f32) -> &'static str {
    if speed > 1.2 {
        "faster"
    } else if speed < 0.8 {
        "slower"
    } else {
        "normal"
    }
}

fn pacing_sentence(speed: f32) -> &'static str {
    match speed_qualifier(speed) {
        "faster" => "Speak noticeably faster than usual.",
        "slower" => "Speak noticeably slower than usual.",
        _ => "Speak at a natural pace.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_is_clamped() {
        assert_eq!(VoiceConfig::new("aria").with_speed(3.0).speed, MAX_SPEED);
        assert_eq!(VoiceConfig::new("aria").with_speed(0.1).speed, MIN_SPEED);
        assert_eq!(VoiceConfig::new("aria").with_speed(1.3).speed, 1.3);
    }

    #[test]
    fn test_speed_qualifier_thresholds() {
        assert_eq!(speed_qualifier(1.21), "faster");
        assert_eq!(speed_qualifier(1.2), "normal");
        assert_eq!(speed_qualifier(0.8), "normal");
        assert_eq!(speed_qualifier(0.79), "slower");
        assert_eq!(speed_qualifier(1.0), "normal");
    }

    #[test]
    fn test_compose_includes_base_tone_and_style() {
        let config = VoiceConfig::new("aria")
            .with_tone(Tone::Warm)
            .with_speed(1.5)
            .with_base_instruction("You are a helpful concierge.")
            .with_style(Some("Roll your r's slightly.".to_string()));

        let instruction = config.compose_system_instruction();
        assert!(instruction.starts_with("You are a helpful concierge."));
        assert!(instruction.contains("warm tone"));
        assert!(instruction.contains("noticeably faster"));
        assert!(instruction.ends_with("Roll your r's slightly."));
    }

    #[test]
    fn test_compose_without_base_or_style() {
        let instruction = VoiceConfig::new("aria").compose_system_instruction();
        assert!(instruction.contains("neutral tone"));
        assert!(instruction.contains("natural pace"));
        assert!(!instruction.starts_with(' '));
    }

    #[test]
    fn test_control_message_carries_style_verbatim() {
        let config = VoiceConfig::new("aria")
            .with_tone(Tone::Calm)
            .with_speed(0.6)
            .with_style(Some("Whisper occasionally.".to_string()));

        let msg = config.control_message();
        assert!(msg.contains("calm tone"));
        assert!(msg.contains("noticeably slower"));
        assert!(msg.ends_with("Whisper occasionally."));
    }

    #[test]
    fn test_tone_wire_label() {
        assert_eq!(
            serde_json::to_string(&Tone::Energetic).unwrap(),
            "\"energetic\""
        );
        let tone: Tone = serde_json::from_str("\"formal\"").unwrap();
        assert_eq!(tone, Tone::Formal);
    }
}
