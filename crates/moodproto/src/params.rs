//! Generation request and response wire types.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::ClientError;

/// Action tag carried by every generation request.
pub const GENERATE_ACTION: &str = "generate-midi";

/// Parameters for one generation call. Field names are the wire names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiParams {
    pub seed: i32,
    pub gen_events: u32,
    pub max_len: u32,
    pub bpm: u32,
    pub time_sig: String,
    pub key_sig: String,
    pub instruments: Vec<String>,
    pub drum_kit: String,
    pub allow_cc: bool,

    // Sampling controls
    pub temp: f32,
    pub top_p: f32,
    pub top_k: u32,

    // Decoding constraints
    #[serde(default)]
    pub disable_patch_change: bool,
    #[serde(default)]
    pub disable_control_change: bool,
    #[serde(default)]
    pub disable_channels: Vec<u8>,

    // Tokenization / MIDI pre-processing
    #[serde(default)]
    pub optimise_midi: bool,
    #[serde(default)]
    pub cc_eps: u32,
    #[serde(default)]
    pub tempo_eps: u32,
    #[serde(default)]
    pub remap_track_channel: bool,

    /// Gameplay-derived intensity in [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<f32>,
    /// Marker for specialized generation ("death", "victory").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub music_type: Option<String>,
}

impl Default for MidiParams {
    fn default() -> Self {
        Self {
            seed: 1001,
            gen_events: 256,
            max_len: 256,
            bpm: 80,
            time_sig: "4/4".to_string(),
            key_sig: "auto".to_string(),
            instruments: vec!["Acoustic Grand".to_string()],
            drum_kit: "None".to_string(),
            allow_cc: true,
            temp: 0.85,
            top_p: 0.95,
            top_k: 50,
            disable_patch_change: false,
            disable_control_change: false,
            disable_channels: Vec::new(),
            optimise_midi: false,
            cc_eps: 0,
            tempo_eps: 0,
            remap_track_channel: false,
            intensity: None,
            music_type: None,
        }
    }
}

/// Request envelope: `{"action":"generate-midi","params":{...}}`.
#[derive(Debug, Serialize)]
pub struct GenerateRequest<'a> {
    pub action: &'static str,
    pub params: &'a MidiParams,
}

impl<'a> GenerateRequest<'a> {
    pub fn new(params: &'a MidiParams) -> Self {
        Self {
            action: GENERATE_ACTION,
            params,
        }
    }

    pub fn to_json(&self) -> Result<String, ClientError> {
        serde_json::to_string(self).map_err(|e| ClientError::Encode(e.to_string()))
    }
}

/// Server reply. Both `midi_base64` and the older `midi_b64` carry the payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub midi_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub midi_b64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl GenerateResponse {
    pub fn parse(bytes: &[u8]) -> Result<Self, ClientError> {
        serde_json::from_slice(bytes).map_err(|e| ClientError::Malformed(e.to_string()))
    }

    /// Successful reply carrying `midi`, as the server would send it.
    pub fn ok(midi: &[u8]) -> Self {
        Self {
            status: Some("ok".to_string()),
            midi_b64: Some(STANDARD.encode(midi)),
            ..Default::default()
        }
    }

    /// Failed reply, as the server would send it.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some("error".to_string()),
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Decode the MIDI payload. A non-empty `error` wins over everything else.
    pub fn into_midi(self) -> Result<Vec<u8>, ClientError> {
        if let Some(error) = self.error.filter(|e| !e.is_empty()) {
            return Err(ClientError::Server(error));
        }
        if self.status.as_deref() == Some("error") {
            return Err(ClientError::Server("server reported error status".to_string()));
        }

        let encoded = self
            .midi_base64
            .or(self.midi_b64)
            .ok_or_else(|| ClientError::Malformed("response carried no MIDI field".to_string()))?;
        if encoded.trim().is_empty() {
            return Err(ClientError::EmptyPayload);
        }

        let midi = STANDARD
            .decode(encoded.trim())
            .map_err(|e| ClientError::Malformed(format!("invalid base64: {}", e)))?;
        if midi.is_empty() {
            return Err(ClientError::EmptyPayload);
        }
        Ok(midi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_envelope_shape() {
        let params = MidiParams {
            intensity: Some(0.5),
            music_type: Some("death".to_string()),
            ..Default::default()
        };
        let json: serde_json::Value =
            serde_json::from_str(&GenerateRequest::new(&params).to_json().unwrap()).unwrap();

        assert_eq!(json["action"], "generate-midi");
        assert_eq!(json["params"]["seed"], 1001);
        assert_eq!(json["params"]["gen_events"], 256);
        assert_eq!(json["params"]["max_len"], 256);
        assert_eq!(json["params"]["time_sig"], "4/4");
        assert_eq!(json["params"]["instruments"][0], "Acoustic Grand");
        assert_eq!(json["params"]["top_k"], 50);
        assert_eq!(json["params"]["music_type"], "death");
        assert!(json["params"]["intensity"].is_number());
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let json = serde_json::to_value(MidiParams::default()).unwrap();
        assert!(json.get("intensity").is_none());
        assert!(json.get("music_type").is_none());
    }

    #[test]
    fn test_accepts_both_payload_names() {
        let current = br#"{"status":"ok","midi_base64":"TVRoZA=="}"#;
        let legacy = br#"{"status":"ok","midi_b64":"TVRoZA=="}"#;

        assert_eq!(GenerateResponse::parse(current).unwrap().into_midi().unwrap(), b"MThd");
        assert_eq!(GenerateResponse::parse(legacy).unwrap().into_midi().unwrap(), b"MThd");
    }

    #[test]
    fn test_error_field_wins() {
        let resp = br#"{"status":"ok","midi_b64":"TVRoZA==","error":"GPU on fire"}"#;
        let err = GenerateResponse::parse(resp).unwrap().into_midi().unwrap_err();
        assert!(matches!(err, ClientError::Server(ref m) if m == "GPU on fire"));
    }

    #[test]
    fn test_error_status_without_message() {
        let err = GenerateResponse::parse(br#"{"status":"error"}"#)
            .unwrap()
            .into_midi()
            .unwrap_err();
        assert!(matches!(err, ClientError::Server(_)));
    }

    #[test]
    fn test_empty_and_malformed_payloads() {
        let empty = GenerateResponse::parse(br#"{"midi_b64":""}"#).unwrap().into_midi();
        assert!(matches!(empty, Err(ClientError::EmptyPayload)));

        let missing = GenerateResponse::parse(br#"{"status":"ok"}"#).unwrap().into_midi();
        assert!(matches!(missing, Err(ClientError::Malformed(_))));

        let garbage = GenerateResponse::parse(br#"{"midi_b64":"!!!"}"#).unwrap().into_midi();
        assert!(matches!(garbage, Err(ClientError::Malformed(_))));

        assert!(matches!(GenerateResponse::parse(b"not json"), Err(ClientError::Malformed(_))));
    }

    #[test]
    fn test_ok_helper_roundtrips() {
        let midi = vec![0x4d, 0x54, 0x68, 0x64, 0, 0, 0, 6];
        assert_eq!(GenerateResponse::ok(&midi).into_midi().unwrap(), midi);
        assert!(GenerateResponse::failed("nope").into_midi().is_err());
    }
}
