// railsync_protocol: wire protocol for train-sync multiplayer sessions.
//
// This crate defines the message set, its text encoding, and the stream
// framing used between a session's server node and its client nodes. It is
// shared by both roles and has no dependency on the sim or transport crates.
//
// Module overview:
// - `types.rs`:    Value types: `TrainNumber`, `PeerId`, `Kinematics`,
//                  `CarDescriptor`, `SwitchKey`, `SwitchSnapshot`, the signal
//                  table values, and the small closed vocabularies (events,
//                  text levels, headings, signal aspects and requests).
// - `message.rs`:  `Message` enum with per-verb encoders/decoders and the
//                  token→decoder dispatch table.
// - `framing.rs`:  `FrameDecoder` (push bytes, pop units) for the legacy
//                  `<N>: ` text prefix and a 4-byte length header.
// - `error.rs`:    `FramingError` (fatal to a connection) and `DecodeError`.
//
// Design decisions:
// - **Text payloads.** Every message is human-readable positional text so
//   sessions can interoperate with legacy peers and be inspected in a
//   packet dump.
// - **Closed enum.** Adding a verb means adding a variant, and every `match`
//   over `Message` in the session layer fails to compile until handled.
// - **No async runtime.** Framing works on byte slices and `std::io::Write`,
//   compatible with blocking TCP streams driven by reader threads.

pub mod error;
pub mod framing;
pub mod message;
pub mod types;

pub use error::{DecodeError, FramingError};
pub use framing::{FrameDecoder, MAX_MESSAGE_SIZE, WireFormat, encode_frame, write_frame};
pub use message::{
    ALL_PLAYERS, ControlEvent, CoupleRecord, JoinRecord, Message, MoveSample, QuitNotice,
    SignalChange, SwitchChange, TextMessage, TrainRecord, UncoupleRecord,
};
pub use types::{
    CarDescriptor, EventKind, Heading, Kinematics, MoveSource, PeerId, PlayerSide, SignalAspect,
    SignalKey, SignalRequest, SignalSnapshot, SignalState, SwitchKey, SwitchSnapshot, TextLevel,
    TrackPosition, TrainNumber,
};

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode a message, frame it, feed the frame through a decoder one byte
    /// at a time, and decode it back.
    fn wire_roundtrip(format: WireFormat, msg: &Message) -> Message {
        let frame = encode_frame(format, msg.encode().as_bytes()).unwrap();
        let mut decoder = FrameDecoder::new(format);
        let mut units = Vec::new();
        for byte in frame {
            decoder.push(&[byte]);
            while let Some(unit) = decoder.pop().unwrap() {
                units.push(unit);
            }
        }
        assert_eq!(units.len(), 1);
        Message::decode_bytes(&units[0]).unwrap()
    }

    fn sample_join() -> Message {
        Message::Join(JoinRecord {
            user: "Alice".into(),
            credential: "token".into(),
            train: TrainNumber(5),
            kinematics: Kinematics {
                travelled: 100.0,
                ..Kinematics::default()
            },
            clock_seconds: 36_000.0,
            season: 1,
            weather: 0,
            route: "Marias Pass".into(),
            lead_car_id: "Alice - 0".into(),
            consist: "freight.con".into(),
            path: "east.pat".into(),
            cars: vec![CarDescriptor {
                file: "Loco\\sd40.eng".into(),
                id: "Alice - 0".into(),
                flipped: false,
            }],
        })
    }

    #[test]
    fn legacy_text_full_pipeline() {
        let msg = sample_join();
        assert_eq!(wire_roundtrip(WireFormat::LegacyText, &msg), msg);
    }

    #[test]
    fn length_header_full_pipeline() {
        let msg = sample_join();
        assert_eq!(wire_roundtrip(WireFormat::LengthHeader, &msg), msg);
    }

    #[test]
    fn legacy_prefix_counts_bytes_after_separator() {
        let msg = Message::Quit(QuitNotice {
            user: "Zoë".into(),
            server: false,
        });
        let frame = encode_frame(WireFormat::LegacyText, msg.encode().as_bytes()).unwrap();
        // "QUIT Zoë" is 9 bytes: the ë is two.
        assert!(frame.starts_with(b"9: QUIT "));
    }
}
