//! Payload fixtures for signaling tests.
//!
//! Shapes follow what a browser WebRTC client library sends; the signaling
//! core treats them as opaque JSON.

use serde_json::{json, Value};

/// DTLS parameters for `connectTransport`.
#[must_use]
pub fn dtls_parameters() -> Value {
    json!({
        "role": "client",
        "fingerprints": [{
            "algorithm": "sha-256",
            "value": "AF:34:9C:11:E0:7B:52:6D:88:03:AA:19:C4:5E:F2:67:90:1D:3B:CC:04:A8:75:E9:DB:42:6F:10:8E:97:5A:21"
        }]
    })
}

/// RTP parameters for an Opus audio producer.
#[must_use]
pub fn audio_rtp_parameters() -> Value {
    json!({
        "codecs": [{
            "mimeType": "audio/opus",
            "payloadType": 111,
            "clockRate": 48000,
            "channels": 2,
            "parameters": { "useinbandfec": 1 }
        }],
        "encodings": [{ "ssrc": 11_111_111 }],
        "rtcp": { "cname": "test-audio" }
    })
}

/// RTP parameters for a VP8 video producer.
#[must_use]
pub fn video_rtp_parameters() -> Value {
    json!({
        "codecs": [{
            "mimeType": "video/VP8",
            "payloadType": 96,
            "clockRate": 90000
        }],
        "encodings": [{ "ssrc": 22_222_222 }],
        "rtcp": { "cname": "test-video" }
    })
}

/// RTP parameters for `kind` ("audio" or anything else for video).
#[must_use]
pub fn rtp_parameters(kind: &str) -> Value {
    if kind == "audio" {
        audio_rtp_parameters()
    } else {
        video_rtp_parameters()
    }
}

/// Receive capabilities for `consume`.
#[must_use]
pub fn rtp_capabilities() -> Value {
    json!({
        "codecs": [
            { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 },
            { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 }
        ],
        "headerExtensions": []
    })
}
