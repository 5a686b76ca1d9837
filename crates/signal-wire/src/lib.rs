//! Wire codec for the rendezvous mailbox.
//!
//! Every message travels as a JSON object with two string fields,
//! `MessageType` and `Data`. The mailbox is line-oriented, so newlines inside
//! `Data` are escaped as the two characters `\` `n`. ICE candidates pack their
//! three fields into `Data` joined by [`ICE_SEPARATOR`].

use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Reserved separator between the candidate, m-line index and mid of an ICE message.
pub const ICE_SEPARATOR: char = '|';

const ESCAPED_NEWLINE: &str = "\\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    pub fn as_str(self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local or remote session description as handed to/from the media engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: String,
    pub mline_index: u32,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>, sdp_mid: impl Into<String>, mline_index: u32) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: sdp_mid.into(),
            mline_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    Ice(IceCandidate),
}

impl SignalMessage {
    /// Lowercase wire tag, also used as a log field.
    pub fn label(&self) -> &'static str {
        match self {
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::Ice(_) => "ice",
        }
    }

    pub fn into_description(self) -> Option<SessionDescription> {
        match self {
            SignalMessage::Offer { sdp } => Some(SessionDescription::offer(sdp)),
            SignalMessage::Answer { sdp } => Some(SessionDescription::answer(sdp)),
            SignalMessage::Ice(_) => None,
        }
    }
}

impl From<SessionDescription> for SignalMessage {
    fn from(description: SessionDescription) -> Self {
        match description.sdp_type {
            SdpType::Offer => SignalMessage::Offer {
                sdp: description.sdp,
            },
            SdpType::Answer => SignalMessage::Answer {
                sdp: description.sdp,
            },
        }
    }
}

impl From<IceCandidate> for SignalMessage {
    fn from(candidate: IceCandidate) -> Self {
        SignalMessage::Ice(candidate)
    }
}

/// Result of decoding one mailbox entry.
///
/// Unrecognized tags are not an error: the session logs and skips them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Message(SignalMessage),
    Unknown { message_type: String },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid wire json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed {message_type} payload: {reason}")]
    Malformed {
        message_type: &'static str,
        reason: String,
    },
    #[error("{message_type} message carries an empty payload")]
    EmptyPayload { message_type: &'static str },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("ice {field} contains the reserved separator '{ICE_SEPARATOR}'")]
    ReservedSeparator { field: &'static str },
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(rename = "MessageType")]
    message_type: String,
    #[serde(rename = "Data")]
    data: String,
}

/// Fails only for ICE fields that would not split back apart on decode.
pub fn encode(message: &SignalMessage) -> Result<String, EncodeError> {
    let data = match message {
        SignalMessage::Offer { sdp } | SignalMessage::Answer { sdp } => escape(sdp),
        SignalMessage::Ice(candidate) => {
            if candidate.candidate.contains(ICE_SEPARATOR) {
                return Err(EncodeError::ReservedSeparator { field: "candidate" });
            }
            if candidate.sdp_mid.contains(ICE_SEPARATOR) {
                return Err(EncodeError::ReservedSeparator { field: "mid" });
            }
            escape(&format!(
                "{}{sep}{}{sep}{}",
                candidate.candidate,
                candidate.mline_index,
                candidate.sdp_mid,
                sep = ICE_SEPARATOR
            ))
        }
    };
    Ok(serde_json::json!({
        "MessageType": message.label(),
        "Data": data,
    })
    .to_string())
}

pub fn decode(text: &str) -> Result<Decoded, DecodeError> {
    let wire: WireMessage = serde_json::from_str(text)?;
    let data = unescape(&wire.data);
    let message = match wire.message_type.to_ascii_lowercase().as_str() {
        "offer" => SignalMessage::Offer {
            sdp: non_empty_sdp("offer", data)?,
        },
        "answer" => SignalMessage::Answer {
            sdp: non_empty_sdp("answer", data)?,
        },
        "ice" => SignalMessage::Ice(parse_ice(&data)?),
        _ => {
            return Ok(Decoded::Unknown {
                message_type: wire.message_type,
            });
        }
    };
    Ok(Decoded::Message(message))
}

fn non_empty_sdp(message_type: &'static str, sdp: String) -> Result<String, DecodeError> {
    if sdp.trim().is_empty() {
        return Err(DecodeError::EmptyPayload { message_type });
    }
    Ok(sdp)
}

fn parse_ice(data: &str) -> Result<IceCandidate, DecodeError> {
    let malformed = |reason: String| DecodeError::Malformed {
        message_type: "ice",
        reason,
    };
    let parts: Vec<&str> = data.split(ICE_SEPARATOR).collect();
    let [candidate, mline_index, sdp_mid] = parts.as_slice() else {
        return Err(malformed(format!(
            "expected 3 fields separated by '{ICE_SEPARATOR}', found {}",
            parts.len()
        )));
    };
    if candidate.is_empty() || mline_index.is_empty() || sdp_mid.is_empty() {
        return Err(malformed("empty field".into()));
    }
    let mline_index = mline_index
        .trim()
        .parse::<u32>()
        .map_err(|err| malformed(format!("invalid m-line index '{mline_index}': {err}")))?;
    Ok(IceCandidate {
        candidate: (*candidate).to_string(),
        sdp_mid: (*sdp_mid).to_string(),
        mline_index,
    })
}

fn escape(data: &str) -> String {
    data.replace('\n', ESCAPED_NEWLINE)
}

fn unescape(data: &str) -> String {
    data.replace(ESCAPED_NEWLINE, "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDP: &str = "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

    fn decoded(text: &str) -> SignalMessage {
        match decode(text).expect("decode") {
            Decoded::Message(message) => message,
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn every_variant_survives_the_wire() {
        let messages = [
            SignalMessage::Offer { sdp: SDP.into() },
            SignalMessage::Answer { sdp: SDP.into() },
            SignalMessage::Ice(IceCandidate::new(
                "candidate:842163049 1 udp 1677729535 10.0.0.4 50470 typ srflx",
                "0",
                0,
            )),
        ];
        for message in messages {
            assert_eq!(decoded(&encode(&message).expect("encode")), message);
        }
    }

    #[test]
    fn newlines_are_escaped_inside_data() {
        let wire = encode(&SignalMessage::Offer { sdp: SDP.into() }).expect("encode");
        let value: serde_json::Value = serde_json::from_str(&wire).expect("json");
        let data = value["Data"].as_str().expect("data");
        assert!(!data.contains('\n'));
        assert!(data.contains("\\n"));
        assert_eq!(value["MessageType"], "offer");
    }

    #[test]
    fn ice_fields_are_packed_in_fixed_order() {
        let candidate = IceCandidate::new("candidate:1", "video", 1);
        let wire = encode(&SignalMessage::Ice(candidate)).expect("encode");
        let value: serde_json::Value = serde_json::from_str(&wire).expect("json");
        assert_eq!(value["MessageType"], "ice");
        assert_eq!(value["Data"], "candidate:1|1|video");
    }

    #[test]
    fn separator_inside_ice_fields_is_refused() {
        let candidate = IceCandidate::new("candidate:1|extra", "0", 0);
        assert_eq!(
            encode(&SignalMessage::Ice(candidate)),
            Err(EncodeError::ReservedSeparator { field: "candidate" })
        );
        let mid = IceCandidate::new("candidate:1", "a|b", 0);
        assert_eq!(
            encode(&SignalMessage::Ice(mid)),
            Err(EncodeError::ReservedSeparator { field: "mid" })
        );
        let sdp = SignalMessage::Offer {
            sdp: "a=fingerprint|x".into(),
        };
        assert!(encode(&sdp).is_ok());
    }

    #[test]
    fn message_type_is_case_insensitive() {
        let message = decoded(r#"{"MessageType":"ANSWER","Data":"v=0\\nm=application 9"}"#);
        assert_eq!(
            message,
            SignalMessage::Answer {
                sdp: "v=0\nm=application 9".into()
            }
        );
    }

    #[test]
    fn unknown_tags_are_reported_not_rejected() {
        let decoded = decode(r#"{"MessageType":"renegotiate","Data":""}"#).expect("decode");
        assert_eq!(
            decoded,
            Decoded::Unknown {
                message_type: "renegotiate".into()
            }
        );
    }

    #[test]
    fn ice_with_wrong_field_count_is_malformed() {
        for data in ["candidate:1|0", "candidate:1|0|audio|extra", "candidate:1"] {
            let text = serde_json::json!({"MessageType": "ice", "Data": data}).to_string();
            let err = decode(&text).expect_err("should reject");
            assert!(matches!(err, DecodeError::Malformed { .. }), "{data}: {err}");
        }
    }

    #[test]
    fn ice_with_empty_or_negative_fields_is_malformed() {
        for data in ["|0|audio", "candidate:1||audio", "candidate:1|0|", "candidate:1|-1|audio"] {
            let text = serde_json::json!({"MessageType": "ice", "Data": data}).to_string();
            assert!(
                matches!(decode(&text), Err(DecodeError::Malformed { .. })),
                "{data}"
            );
        }
    }

    #[test]
    fn empty_sdp_is_rejected() {
        let err = decode(r#"{"MessageType":"offer","Data":""}"#).expect_err("empty");
        assert!(matches!(
            err,
            DecodeError::EmptyPayload {
                message_type: "offer"
            }
        ));
    }

    #[test]
    fn garbage_is_a_json_error() {
        assert!(matches!(decode("not json"), Err(DecodeError::Json(_))));
        assert!(matches!(
            decode(r#"{"MessageType":"offer"}"#),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn descriptions_convert_to_messages() {
        let message = SignalMessage::from(SessionDescription::answer("v=0"));
        assert_eq!(message.label(), "answer");
        assert_eq!(
            message.into_description(),
            Some(SessionDescription::answer("v=0"))
        );
    }
}
