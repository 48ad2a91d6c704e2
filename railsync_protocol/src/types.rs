// Value types shared by the wire protocol and the sync layers above it.
//
// These are plain data: train numbers, tile-relative track positions,
// kinematic samples, car descriptors, switch and signal keys, and the small
// closed vocabularies (heading, control events, text levels, signal
// aspects). `message.rs` owns their text encodings; the sim and net crates
// use them directly as their domain types so no conversion layer is needed.

use std::fmt;

use serde::{Deserialize, Serialize};

/// First number of the provisional range a client draws from when it creates
/// a train locally (e.g. by uncoupling) before the server has numbered it.
pub const PROVISIONAL_BASE: u32 = 1_000_000;

/// Size of the provisional range.
pub const PROVISIONAL_SPAN: u32 = 1_000_000;

/// Reserved identity carried by a quit notice when the server itself leaves.
pub const SERVER_QUIT_SENTINEL: &str = "ServerHasToQuit";

/// Session-unique train identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrainNumber(pub u32);

impl TrainNumber {
    /// Whether this number lies in the client-side placeholder range.
    pub fn is_provisional(self) -> bool {
        (PROVISIONAL_BASE..PROVISIONAL_BASE + PROVISIONAL_SPAN).contains(&self.0)
    }
}

impl fmt::Display for TrainNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport-assigned connection ID (compact u32, never sent on the wire).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Direction of travel relative to the train's car order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Heading {
    #[default]
    Forward,
    Backward,
}

/// Tile-relative position on the track network. `track_node` is the index of
/// the track segment the position lies on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackPosition {
    pub tile_x: i32,
    pub tile_z: i32,
    pub x: f32,
    pub z: f32,
    pub track_node: u32,
}

impl TrackPosition {
    /// Whether two positions lie on different track segments.
    pub fn changes_segment(&self, other: &TrackPosition) -> bool {
        self.track_node != other.track_node
    }
}

/// One kinematic sample of a train: where it is, which way it faces, how far
/// it has travelled in total and how fast it is going.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Kinematics {
    pub position: TrackPosition,
    pub heading: Heading,
    /// Cumulative distance travelled in metres.
    pub travelled: f32,
    /// Signed speed in metres per second.
    pub speed: f32,
}

/// One car of a train as it appears on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarDescriptor {
    /// Rolling-stock file reference, relative to the trainset root.
    pub file: String,
    /// Per-car identifier, unique within the session.
    pub id: String,
    /// Whether the car is coupled facing backward.
    pub flipped: bool,
}

/// Composite switch identity. Field order is the session-wide sort order:
/// tile X, then tile Z, then in-world ID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SwitchKey {
    pub tile_x: i32,
    pub tile_z: i32,
    pub world_id: u32,
}

impl fmt::Display for SwitchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})#{}", self.tile_x, self.tile_z, self.world_id)
    }
}

/// Positionally-encoded route indices of every switch, one ASCII digit per
/// switch in `SwitchKey` order. Construction guarantees digits only.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchSnapshot(String);

impl SwitchSnapshot {
    /// Largest route index a single digit can carry.
    pub const MAX_ROUTE: u8 = 9;

    /// Build a snapshot from route indices in key order. Returns the position
    /// of the first index that does not fit in one digit.
    pub fn from_routes(routes: impl IntoIterator<Item = u8>) -> Result<Self, usize> {
        let mut text = String::new();
        for (i, route) in routes.into_iter().enumerate() {
            if route > Self::MAX_ROUTE {
                return Err(i);
            }
            text.push(char::from(b'0' + route));
        }
        Ok(Self(text))
    }

    /// Validate a received digit string.
    pub fn parse(text: &str) -> Option<Self> {
        text.bytes()
            .all(|b| b.is_ascii_digit())
            .then(|| Self(text.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Route indices in key order.
    pub fn routes(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.bytes().map(|b| b - b'0')
    }
}

/// Signal head identity: the track node the head stands on and its item
/// index there. Field order is the session-wide sort order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalKey {
    pub track_node: u32,
    pub item: u32,
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "signal {}/{}", self.track_node, self.item)
    }
}

/// Aspect shown by a signal head, most restrictive first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAspect {
    #[default]
    Stop,
    StopAndProceed,
    Restricting,
    Approach1,
    Approach2,
    Approach3,
    Clear1,
    Clear2,
    Unknown,
}

impl SignalAspect {
    pub const ALL: [SignalAspect; 9] = [
        SignalAspect::Stop,
        SignalAspect::StopAndProceed,
        SignalAspect::Restricting,
        SignalAspect::Approach1,
        SignalAspect::Approach2,
        SignalAspect::Approach3,
        SignalAspect::Clear1,
        SignalAspect::Clear2,
        SignalAspect::Unknown,
    ];

    /// Wire index: position in `ALL`.
    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }
}

/// What one signal head displays: its aspect and the shape-specific draw
/// state the renderer picks lamps by.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalState {
    pub aspect: SignalAspect,
    pub draw_state: u8,
}

/// State of every signal head in `SignalKey` order. Like `SwitchSnapshot`
/// it carries no keys; position is identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSnapshot(Vec<SignalState>);

impl SignalSnapshot {
    pub fn new(states: Vec<SignalState>) -> Self {
        Self(states)
    }

    pub fn states(&self) -> &[SignalState] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A player's request to the signalling engine for one signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalRequest {
    /// Drop any hold and let the signal clear normally.
    ReleaseHold,
    MostRestrictive,
    Approach,
    LeastRestrictive,
    CallOn,
}

impl SignalRequest {
    pub const ALL: [SignalRequest; 5] = [
        SignalRequest::ReleaseHold,
        SignalRequest::MostRestrictive,
        SignalRequest::Approach,
        SignalRequest::LeastRestrictive,
        SignalRequest::CallOn,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }
}

/// Discrete cab controls replayed on remote trains.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Horn,
    Bell,
    Wiper,
    Headlight,
    Pantograph1,
    Pantograph2,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Horn,
        EventKind::Bell,
        EventKind::Wiper,
        EventKind::Headlight,
        EventKind::Pantograph1,
        EventKind::Pantograph2,
    ];

    pub fn token(self) -> &'static str {
        match self {
            EventKind::Horn => "HORN",
            EventKind::Bell => "BELL",
            EventKind::Wiper => "WIPER",
            EventKind::Headlight => "HEADLIGHT",
            EventKind::Pantograph1 => "PANTO1",
            EventKind::Pantograph2 => "PANTO2",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.token() == token)
    }
}

/// Severity of a directed text message. `Error` addressed to a node ends
/// that node's session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextLevel {
    Info,
    Warning,
    Error,
}

impl TextLevel {
    pub fn token(self) -> &'static str {
        match self {
            TextLevel::Info => "Info",
            TextLevel::Warning => "Warning",
            TextLevel::Error => "Error",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "Info" => Some(TextLevel::Info),
            "Warning" => Some(TextLevel::Warning),
            "Error" => Some(TextLevel::Error),
            _ => None,
        }
    }

    pub fn is_fatal(self) -> bool {
        self == TextLevel::Error
    }
}

/// After an uncouple, which half carries the player's lead locomotive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerSide {
    Front,
    Rear,
    Neither,
}

impl PlayerSide {
    pub fn token(self) -> &'static str {
        match self {
            PlayerSide::Front => "front",
            PlayerSide::Rear => "rear",
            PlayerSide::Neither => "none",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "front" => Some(PlayerSide::Front),
            "rear" => Some(PlayerSide::Rear),
            "none" => Some(PlayerSide::Neither),
            _ => None,
        }
    }
}

/// Who a move sample is about: a player's current train, a background train
/// computed by the server, or a train a player split off by uncoupling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveSource {
    Player(String),
    Background(TrainNumber),
    Uncoupled(TrainNumber),
}

const BACKGROUND_PREFIX: &str = "0xAI";
const UNCOUPLED_PREFIX: &str = "0xUC";

/// Player names may not start with this, so they never collide with the
/// background/uncoupled source encodings.
pub const RESERVED_NAME_PREFIX: &str = "0x";

impl MoveSource {
    pub fn parse(token: &str) -> Self {
        let numbered = |prefix: &str| {
            token
                .strip_prefix(prefix)
                .and_then(|rest| rest.parse().ok())
                .map(TrainNumber)
        };
        if let Some(number) = numbered(BACKGROUND_PREFIX) {
            MoveSource::Background(number)
        } else if let Some(number) = numbered(UNCOUPLED_PREFIX) {
            MoveSource::Uncoupled(number)
        } else {
            MoveSource::Player(token.to_owned())
        }
    }
}

impl fmt::Display for MoveSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveSource::Player(name) => f.write_str(name),
            MoveSource::Background(n) => write!(f, "{BACKGROUND_PREFIX}{n}"),
            MoveSource::Uncoupled(n) => write!(f, "{UNCOUPLED_PREFIX}{n}"),
        }
    }
}

/// Whether `name` is usable as a player identity on the wire.
pub fn is_valid_player_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(RESERVED_NAME_PREFIX)
        && name != SERVER_QUIT_SENTINEL
        && !name.chars().any(char::is_whitespace)
}
