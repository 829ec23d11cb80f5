//! Frame decoding vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use hostsync_core::ids::PlayerId;
use hostsync_core::protocol::{decode_frame, Frame, FrameKind, Hello};

use vector_loader::load;

#[test]
fn frame_vectors() {
    let files = [
        "value_theme.json",
        "init_req.json",
        "hello.json",
        "bad_version.json",
        "unknown_field.json",
        "unknown_kind.json",
        "empty_channel.json",
    ];

    for f in files {
        let v = load(f);
        let res = decode_frame(&v.wire_bytes());

        if let Some(err) = v.expect_error {
            let e = res.expect_err("expected error");
            assert_eq!(e.code().as_str(), err.code, "vector={}", v.description);
            continue;
        }

        let frame = res.expect("expected ok frame");
        let ex = v.expect.expect("missing expect block");

        assert_eq!(frame.ch, ex["ch"].as_str().unwrap(), "vector={}", v.description);
        assert_eq!(frame.kind.as_str(), ex["type"].as_str().unwrap(), "vector={}", v.description);
        assert_eq!(frame.version, ex["version"].as_u64(), "vector={}", v.description);

        match &frame.data {
            Some(raw) => {
                let got: serde_json::Value = serde_json::from_str(raw.get()).unwrap();
                assert_eq!(got, ex["data"], "vector={}", v.description);
            }
            None => assert!(ex["data"].is_null(), "vector={}", v.description),
        }
    }
}

#[test]
fn typed_payload_survives_encode() {
    let frame = Frame::new("theme", FrameKind::Value)
        .with_version(7)
        .with_data("Vintage")
        .unwrap();

    let decoded = decode_frame(&frame.encode().unwrap()).unwrap();
    assert_eq!(decoded.kind, FrameKind::Value);
    assert_eq!(decoded.version, Some(7));
    assert_eq!(decoded.data_as::<String>().unwrap(), "Vintage");
}

#[test]
fn hello_carries_player_id() {
    let frame = Frame::hello(PlayerId::from("p-1")).unwrap();
    let decoded = decode_frame(&frame.encode().unwrap()).unwrap();
    let hello: Hello = decoded.data_as().unwrap();
    assert_eq!(hello.player_id.as_str(), "p-1");
}

#[test]
fn missing_payload_is_bad_request() {
    let frame = Frame::new("ready", FrameKind::Propose);
    let err = frame.data_as::<bool>().unwrap_err();
    assert_eq!(err.code().as_str(), "BAD_REQUEST");
}
