use serde::{Deserialize, Serialize};
use std::fmt;

/// Which of the two encoding pipelines a channel drives
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    /// Native capture rate, general-purpose codec
    Wide,
    /// Resampled 16 kHz mono, speech codec
    Voice,
}

impl Band {
    pub const ALL: [Band; 2] = [Band::Wide, Band::Voice];

    /// Bit used for this band in the completion gate
    pub(crate) fn mask(self) -> u8 {
        match self {
            Band::Wide => 0b01,
            Band::Voice => 0b10,
        }
    }

    /// Command that tears the process down when it is not reused
    pub fn teardown_command(self) -> EncoderCommand {
        match self {
            Band::Wide => EncoderCommand::Close,
            Band::Voice => EncoderCommand::Destroy,
        }
    }

    /// Event a worker of this band sends once `init` has been applied
    pub fn ready_event(self) -> EncoderEvent {
        match self {
            Band::Wide => EncoderEvent::Ready,
            Band::Voice => EncoderEvent::InitAck,
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Band::Wide => f.write_str("wide-band"),
            Band::Voice => f.write_str("voice-band"),
        }
    }
}

/// Parameters carried by `init`
///
/// `sample_rate` is the rate of the samples the channel actually receives:
/// the capture rate for the wide band and the resampled target rate for the
/// voice band. The voice band also sets `original_sample_rate` to the capture
/// rate, so an encoder that expects the capture rate in `init` can read it
/// from there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderInit {
    /// Rate of the samples the channel will receive
    pub sample_rate: u32,
    /// Output bit depth
    pub bit_rate: u16,
    /// Capture rate, when it differs from `sample_rate`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoder_application: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoder_frame_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_frames_per_page: Option<u32>,
}

impl EncoderInit {
    pub fn new(sample_rate: u32, bit_rate: u16) -> Self {
        Self {
            sample_rate,
            bit_rate,
            original_sample_rate: None,
            encoder_application: None,
            encoder_frame_size: None,
            max_frames_per_page: None,
        }
    }
}

/// Commands sent from the session to an encoder process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum EncoderCommand {
    Init { config: EncoderInit },
    Encode { buf: Vec<f32> },
    /// Wide-band only
    GetHeaderPages,
    /// Streaming mode only
    Flush,
    Finish,
    /// Wide-band teardown
    Close,
    /// Voice-band teardown
    Destroy,
}

impl EncoderCommand {
    pub fn name(&self) -> &'static str {
        match self {
            EncoderCommand::Init { .. } => "init",
            EncoderCommand::Encode { .. } => "encode",
            EncoderCommand::GetHeaderPages => "getHeaderPages",
            EncoderCommand::Flush => "flush",
            EncoderCommand::Finish => "finish",
            EncoderCommand::Close => "close",
            EncoderCommand::Destroy => "destroy",
        }
    }
}

/// Events sent from an encoder process back to the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum EncoderEvent {
    /// Wide-band init acknowledgement
    Ready,
    /// Voice-band init acknowledgement
    #[serde(rename = "init")]
    InitAck,
    /// Incremental output
    Process {
        #[serde(with = "base64_bytes")]
        buf: Vec<u8>,
    },
    /// Final output; terminal for the session
    End {
        #[serde(with = "base64_bytes")]
        buf: Vec<u8>,
    },
    Flushed,
    /// Teardown acknowledgement
    #[serde(rename = "destroy")]
    Destroyed,
}

impl EncoderEvent {
    pub fn is_ready(&self) -> bool {
        matches!(self, EncoderEvent::Ready | EncoderEvent::InitAck)
    }
}

/// One JSON object per line, as spoken by stdio encoder workers
pub fn to_line<T: Serialize>(message: &T) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

pub fn from_line<'a, T: Deserialize<'a>>(line: &'a str) -> serde_json::Result<T> {
    serde_json::from_str(line.trim_end())
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_command_wire_shape() {
        let json = serde_json::to_string(&EncoderCommand::Init {
            config: EncoderInit::new(48000, 16),
        })
        .unwrap();
        assert_eq!(json, r#"{"cmd":"init","config":{"sampleRate":48000,"bitRate":16}}"#);
    }

    #[test]
    fn test_unit_commands_are_tag_only() {
        assert_eq!(
            serde_json::to_string(&EncoderCommand::GetHeaderPages).unwrap(),
            r#"{"cmd":"getHeaderPages"}"#
        );
        assert_eq!(
            serde_json::to_string(&EncoderCommand::Finish).unwrap(),
            r#"{"cmd":"finish"}"#
        );
    }

    #[test]
    fn test_voice_ack_uses_init_tag() {
        let event: EncoderEvent = serde_json::from_str(r#"{"cmd":"init"}"#).unwrap();
        assert_eq!(event, EncoderEvent::InitAck);
        assert!(event.is_ready());
        assert_eq!(Band::Voice.ready_event(), EncoderEvent::InitAck);
        assert_eq!(Band::Wide.ready_event(), EncoderEvent::Ready);
    }

    #[test]
    fn test_end_buffer_travels_as_base64() {
        let line = to_line(&EncoderEvent::End {
            buf: vec![0, 1, 2, 255],
        })
        .unwrap();
        assert_eq!(line, "{\"cmd\":\"end\",\"buf\":\"AAEC/w==\"}\n");
        let event: EncoderEvent = from_line(&line).unwrap();
        assert_eq!(
            event,
            EncoderEvent::End {
                buf: vec![0, 1, 2, 255]
            }
        );
    }

    #[test]
    fn test_teardown_command_per_band() {
        assert_eq!(Band::Wide.teardown_command(), EncoderCommand::Close);
        assert_eq!(Band::Voice.teardown_command(), EncoderCommand::Destroy);
    }
}
