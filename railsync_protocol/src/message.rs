// Protocol messages and their text encodings.
//
// `Message` is the closed set of verbs exchanged between nodes. Each payload
// is `VERB body`, where the body uses single spaces between scalar fields,
// `\r` between sections that may contain spaces (file paths, route names,
// credentials), and `\t` between list entries (cars) or free-text sections.
//
// Encoding is infallible for well-formed values (names without whitespace,
// strings without `\r`/`\t`); `decode` is its strict inverse and rejects
// trailing or missing fields. Dispatch goes through a fixed token table so an
// unknown verb is detected before any parsing and reported as
// `DecodeError::UnknownVerb`, which callers treat as fatal to the connection.
//
// Recurring field groups:
// - kinematics: `tile_x tile_z x z track_node heading travelled speed`
// - car:        `"<file>" <id>\n<flipped>`
// - signal:     `<aspect index> <draw state>`, positional like switch digits
//
// See also: `framing.rs` for how payloads are delimited on the stream,
// `types.rs` for the value types carried here.

use std::fmt::Write as _;
use std::str::{FromStr, SplitAsciiWhitespace};

use crate::error::DecodeError;
use crate::types::{
    CarDescriptor, EventKind, Heading, Kinematics, MoveSource, PlayerSide, SERVER_QUIT_SENTINEL,
    SignalAspect, SignalRequest, SignalSnapshot, SignalState, SwitchKey, SwitchSnapshot,
    TextLevel, TrackPosition, TrainNumber,
};

// ---------------------------------------------------------------------------
// Payload structs
// ---------------------------------------------------------------------------

/// A player entering the session with its train.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinRecord {
    pub user: String,
    pub credential: String,
    pub train: TrainNumber,
    pub kinematics: Kinematics,
    /// Simulated clock, seconds since midnight.
    pub clock_seconds: f64,
    pub season: u8,
    pub weather: u8,
    pub route: String,
    pub lead_car_id: String,
    pub consist: String,
    pub path: String,
    pub cars: Vec<CarDescriptor>,
}

/// One authoritative kinematic sample inside a move batch.
#[derive(Clone, Debug, PartialEq)]
pub struct MoveSample {
    pub source: MoveSource,
    pub number: TrainNumber,
    pub car_count: u32,
    pub kinematics: Kinematics,
}

/// A manual switch throw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchChange {
    pub user: String,
    pub key: SwitchKey,
    pub route: u8,
    pub hand_thrown: bool,
}

/// A background train with everything needed to build a replica.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainRecord {
    pub number: TrainNumber,
    pub kinematics: Kinematics,
    pub cars: Vec<CarDescriptor>,
}

/// A train split into front and rear halves behind `car_id`.
#[derive(Clone, Debug, PartialEq)]
pub struct UncoupleRecord {
    pub user: String,
    pub car_id: String,
    pub front: Kinematics,
    pub front_number: TrainNumber,
    pub rear: Kinematics,
    /// Provisional when sent by a client, permanent once echoed by the server.
    pub rear_number: TrainNumber,
    pub front_first_car: String,
    pub rear_first_car: String,
    pub player_side: PlayerSide,
}

/// Two trains joined into one. `absorbed` is gone afterwards; `number`
/// carries the whole consist.
#[derive(Clone, Debug, PartialEq)]
pub struct CoupleRecord {
    pub number: TrainNumber,
    pub absorbed: TrainNumber,
    pub kinematics: Kinematics,
    /// Player that drives the coupled train; `None` for a background train.
    pub owner: Option<String>,
    /// The coupled consist front to back, with flips as they ended up.
    pub cars: Vec<CarDescriptor>,
}

/// A player asking the signalling engine to change one signal. `index` is
/// the signal's position in the session-wide signal order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignalChange {
    pub user: String,
    pub index: u32,
    pub request: SignalRequest,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlEvent {
    pub user: String,
    pub kind: EventKind,
    pub state: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextMessage {
    /// Player name, or `ALL_PLAYERS` for a broadcast.
    pub addressee: String,
    pub level: TextLevel,
    pub text: String,
}

/// Addressee meaning every node in the session.
pub const ALL_PLAYERS: &str = "All";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuitNotice {
    pub user: String,
    /// Set when the server itself is leaving the session.
    pub server: bool,
}

/// Every message a node can send or receive.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Join(JoinRecord),
    Move(Vec<MoveSample>),
    SwitchChange(SwitchChange),
    SwitchSnapshot(SwitchSnapshot),
    TrainAdd(TrainRecord),
    TrainRemove(Vec<TrainNumber>),
    Uncouple(UncoupleRecord),
    Couple(CoupleRecord),
    SignalSnapshot(SignalSnapshot),
    SignalChange(SignalChange),
    Event(ControlEvent),
    Text(TextMessage),
    Quit(QuitNotice),
    Alive { user: String },
    GetTrain { user: String, number: TrainNumber },
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

type Decoder = fn(&str) -> Result<Message, DecodeError>;

const PLAYER: &str = "PLAYER";
const MOVE: &str = "MOVE";
const SWITCH: &str = "SWITCH";
const SWITCHSTATES: &str = "SWITCHSTATES";
const TRAIN: &str = "TRAIN";
const REMOVETRAIN: &str = "REMOVETRAIN";
const UNCOUPLE: &str = "UNCOUPLE";
const COUPLE: &str = "COUPLE";
const SIGNALSTATES: &str = "SIGNALSTATES";
const SIGNALCHANGE: &str = "SIGNALCHANGE";
const EVENT: &str = "EVENT";
const MESSAGE: &str = "MESSAGE";
const QUIT: &str = "QUIT";
const ALIVE: &str = "ALIVE";
const GETTRAIN: &str = "GETTRAIN";

const DECODERS: &[(&str, Decoder)] = &[
    (PLAYER, decode_join),
    (MOVE, decode_move),
    (SWITCH, decode_switch_change),
    (SWITCHSTATES, decode_switch_snapshot),
    (TRAIN, decode_train_add),
    (REMOVETRAIN, decode_train_remove),
    (UNCOUPLE, decode_uncouple),
    (COUPLE, decode_couple),
    (SIGNALSTATES, decode_signal_snapshot),
    (SIGNALCHANGE, decode_signal_change),
    (EVENT, decode_event),
    (MESSAGE, decode_text),
    (QUIT, decode_quit),
    (ALIVE, decode_alive),
    (GETTRAIN, decode_get_train),
];

impl Message {
    /// The wire token for this message.
    pub fn verb(&self) -> &'static str {
        match self {
            Message::Join(_) => PLAYER,
            Message::Move(_) => MOVE,
            Message::SwitchChange(_) => SWITCH,
            Message::SwitchSnapshot(_) => SWITCHSTATES,
            Message::TrainAdd(_) => TRAIN,
            Message::TrainRemove(_) => REMOVETRAIN,
            Message::Uncouple(_) => UNCOUPLE,
            Message::Couple(_) => COUPLE,
            Message::SignalSnapshot(_) => SIGNALSTATES,
            Message::SignalChange(_) => SIGNALCHANGE,
            Message::Event(_) => EVENT,
            Message::Text(_) => MESSAGE,
            Message::Quit(_) => QUIT,
            Message::Alive { .. } => ALIVE,
            Message::GetTrain { .. } => GETTRAIN,
        }
    }

    /// Decode a payload (without its frame prefix).
    pub fn decode(payload: &str) -> Result<Message, DecodeError> {
        let (verb, body) = payload.split_once(' ').unwrap_or((payload, ""));
        let decoder = DECODERS
            .iter()
            .find_map(|(token, decoder)| (*token == verb).then_some(decoder))
            .ok_or_else(|| DecodeError::UnknownVerb(verb.to_owned()))?;
        decoder(body)
    }

    /// Decode a raw frame payload, rejecting invalid UTF-8.
    pub fn decode_bytes(payload: &[u8]) -> Result<Message, DecodeError> {
        let text = std::str::from_utf8(payload).map_err(|_| DecodeError::InvalidUtf8)?;
        Message::decode(text)
    }

    /// Encode to payload text (without frame prefix).
    pub fn encode(&self) -> String {
        let mut out = String::from(self.verb());
        out.push(' ');
        match self {
            Message::Join(join) => encode_join(&mut out, join),
            Message::Move(samples) => {
                let items: Vec<String> = samples.iter().map(encode_move_sample).collect();
                out.push_str(&items.join(" "));
            }
            Message::SwitchChange(c) => {
                let _ = write!(
                    out,
                    "{} {} {} {} {} {}",
                    c.user,
                    c.key.tile_x,
                    c.key.tile_z,
                    c.key.world_id,
                    c.route,
                    flag(c.hand_thrown)
                );
            }
            Message::SwitchSnapshot(snapshot) => out.push_str(snapshot.as_str()),
            Message::TrainAdd(train) => {
                let _ = write!(out, "{} ", train.number);
                push_kinematics(&mut out, &train.kinematics);
                out.push('\r');
                push_cars(&mut out, &train.cars);
            }
            Message::TrainRemove(numbers) => {
                let items: Vec<String> = numbers.iter().map(ToString::to_string).collect();
                out.push_str(&items.join(" "));
            }
            Message::Uncouple(u) => encode_uncouple(&mut out, u),
            Message::Couple(c) => {
                let _ = write!(out, "{} {} ", c.number, c.absorbed);
                push_kinematics(&mut out, &c.kinematics);
                let _ = write!(out, "\r{}\r", c.owner.as_deref().unwrap_or_default());
                push_cars(&mut out, &c.cars);
            }
            Message::SignalSnapshot(snapshot) => {
                let items: Vec<String> = snapshot
                    .states()
                    .iter()
                    .map(|state| format!("{} {}", state.aspect.index(), state.draw_state))
                    .collect();
                out.push_str(&items.join(" "));
            }
            Message::SignalChange(c) => {
                let _ = write!(out, "{} {} {}", c.user, c.index, c.request.index());
            }
            Message::Event(e) => {
                let _ = write!(out, "{} {} {}", e.user, e.kind.token(), e.state);
            }
            Message::Text(t) => {
                let _ = write!(out, "{}\t{}\t{}", t.addressee, t.level.token(), t.text);
            }
            Message::Quit(q) => {
                if q.server {
                    let _ = write!(out, "{SERVER_QUIT_SENTINEL}\t{}", q.user);
                } else {
                    out.push_str(&q.user);
                }
            }
            Message::Alive { user } => out.push_str(user),
            Message::GetTrain { user, number } => {
                let _ = write!(out, "{user} {number}");
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn flag(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

fn heading_token(heading: Heading) -> &'static str {
    match heading {
        Heading::Forward => "1",
        Heading::Backward => "0",
    }
}

fn push_kinematics(out: &mut String, k: &Kinematics) {
    let p = &k.position;
    let _ = write!(
        out,
        "{} {} {} {} {} {} {} {}",
        p.tile_x,
        p.tile_z,
        p.x,
        p.z,
        p.track_node,
        heading_token(k.heading),
        k.travelled,
        k.speed
    );
}

fn push_cars(out: &mut String, cars: &[CarDescriptor]) {
    for (i, car) in cars.iter().enumerate() {
        if i > 0 {
            out.push('\t');
        }
        let _ = write!(out, "\"{}\" {}\n{}", car.file, car.id, flag(car.flipped));
    }
}

/// Cursor over the space-separated scalar fields of one section.
struct Fields<'a> {
    verb: &'static str,
    iter: SplitAsciiWhitespace<'a>,
}

impl<'a> Fields<'a> {
    fn new(verb: &'static str, text: &'a str) -> Self {
        Self {
            verb,
            iter: text.split_ascii_whitespace(),
        }
    }

    fn text(&mut self, what: &str) -> Result<&'a str, DecodeError> {
        self.iter
            .next()
            .ok_or_else(|| DecodeError::malformed(self.verb, format!("missing {what}")))
    }

    fn parse<T: FromStr>(&mut self, what: &str) -> Result<T, DecodeError> {
        let raw = self.text(what)?;
        raw.parse()
            .map_err(|_| DecodeError::malformed(self.verb, format!("bad {what} {raw:?}")))
    }

    fn flag(&mut self, what: &str) -> Result<bool, DecodeError> {
        match self.text(what)? {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(DecodeError::malformed(
                self.verb,
                format!("bad {what} {other:?}"),
            )),
        }
    }

    fn heading(&mut self) -> Result<Heading, DecodeError> {
        Ok(if self.flag("heading")? {
            Heading::Forward
        } else {
            Heading::Backward
        })
    }

    fn kinematics(&mut self) -> Result<Kinematics, DecodeError> {
        let position = TrackPosition {
            tile_x: self.parse("tile x")?,
            tile_z: self.parse("tile z")?,
            x: self.parse("x offset")?,
            z: self.parse("z offset")?,
            track_node: self.parse("track node")?,
        };
        Ok(Kinematics {
            position,
            heading: self.heading()?,
            travelled: self.parse("distance travelled")?,
            speed: self.parse("speed")?,
        })
    }

    fn is_exhausted(&self) -> bool {
        self.iter.clone().next().is_none()
    }

    fn finish(self) -> Result<(), DecodeError> {
        if self.is_exhausted() {
            Ok(())
        } else {
            Err(DecodeError::malformed(self.verb, "trailing fields"))
        }
    }
}

/// Split `body` on `sep` into exactly `N` sections.
fn sections<'a, const N: usize>(
    verb: &'static str,
    body: &'a str,
    sep: char,
) -> Result<[&'a str; N], DecodeError> {
    let parts: Vec<&str> = body.splitn(N, sep).collect();
    parts
        .try_into()
        .map_err(|parts: Vec<&str>| {
            DecodeError::malformed(verb, format!("expected {N} sections, got {}", parts.len()))
        })
}

fn decode_cars(verb: &'static str, section: &str) -> Result<Vec<CarDescriptor>, DecodeError> {
    if section.is_empty() {
        return Ok(Vec::new());
    }
    section
        .split('\t')
        .map(|entry| decode_car(verb, entry))
        .collect()
}

fn decode_car(verb: &'static str, entry: &str) -> Result<CarDescriptor, DecodeError> {
    let bad = |reason: &str| DecodeError::malformed(verb, format!("{reason} in car {entry:?}"));
    let rest = entry.strip_prefix('"').ok_or_else(|| bad("missing file quote"))?;
    let (file, rest) = rest.split_once('"').ok_or_else(|| bad("unterminated file"))?;
    let rest = rest.strip_prefix(' ').ok_or_else(|| bad("missing id"))?;
    let (id, flipped) = rest.split_once('\n').ok_or_else(|| bad("missing flip flag"))?;
    let flipped = match flipped {
        "1" => true,
        "0" => false,
        _ => return Err(bad("bad flip flag")),
    };
    Ok(CarDescriptor {
        file: file.to_owned(),
        id: id.to_owned(),
        flipped,
    })
}

// ---------------------------------------------------------------------------
// Per-verb codecs
// ---------------------------------------------------------------------------

fn encode_join(out: &mut String, j: &JoinRecord) {
    let _ = write!(out, "{} {} ", j.user, j.train);
    push_kinematics(out, &j.kinematics);
    let _ = write!(
        out,
        " {} {} {}\r{}\r{}\r{}\r{}\r{}\r",
        j.clock_seconds, j.season, j.weather, j.credential, j.route, j.lead_car_id, j.consist, j.path
    );
    push_cars(out, &j.cars);
}

fn decode_join(body: &str) -> Result<Message, DecodeError> {
    let [header, credential, route, lead, consist, path, cars] =
        sections::<7>(PLAYER, body, '\r')?;
    let mut f = Fields::new(PLAYER, header);
    let user = f.text("user")?.to_owned();
    let train = TrainNumber(f.parse("train number")?);
    let kinematics = f.kinematics()?;
    let clock_seconds = f.parse("clock")?;
    let season = f.parse("season")?;
    let weather = f.parse("weather")?;
    f.finish()?;
    Ok(Message::Join(JoinRecord {
        user,
        credential: credential.to_owned(),
        train,
        kinematics,
        clock_seconds,
        season,
        weather,
        route: route.to_owned(),
        lead_car_id: lead.to_owned(),
        consist: consist.to_owned(),
        path: path.to_owned(),
        cars: decode_cars(PLAYER, cars)?,
    }))
}

fn encode_move_sample(s: &MoveSample) -> String {
    let k = &s.kinematics;
    let p = &k.position;
    format!(
        "{} {} {} {} {} {} {} {} {} {} {}",
        s.source,
        k.speed,
        k.travelled,
        s.number,
        p.tile_x,
        p.tile_z,
        p.x,
        p.z,
        p.track_node,
        heading_token(k.heading),
        s.car_count
    )
}

fn decode_move(body: &str) -> Result<Message, DecodeError> {
    let mut f = Fields::new(MOVE, body);
    let mut samples = Vec::new();
    while !f.is_exhausted() {
        let source = MoveSource::parse(f.text("source")?);
        let speed = f.parse("speed")?;
        let travelled = f.parse("distance travelled")?;
        let number = TrainNumber(f.parse("train number")?);
        let position = TrackPosition {
            tile_x: f.parse("tile x")?,
            tile_z: f.parse("tile z")?,
            x: f.parse("x offset")?,
            z: f.parse("z offset")?,
            track_node: f.parse("track node")?,
        };
        let heading = f.heading()?;
        let car_count = f.parse("car count")?;
        samples.push(MoveSample {
            source,
            number,
            car_count,
            kinematics: Kinematics {
                position,
                heading,
                travelled,
                speed,
            },
        });
    }
    Ok(Message::Move(samples))
}

fn decode_switch_change(body: &str) -> Result<Message, DecodeError> {
    let mut f = Fields::new(SWITCH, body);
    let user = f.text("user")?.to_owned();
    let key = SwitchKey {
        tile_x: f.parse("tile x")?,
        tile_z: f.parse("tile z")?,
        world_id: f.parse("world id")?,
    };
    let route = f.parse("route")?;
    let hand_thrown = f.flag("hand thrown")?;
    f.finish()?;
    Ok(Message::SwitchChange(SwitchChange {
        user,
        key,
        route,
        hand_thrown,
    }))
}

fn decode_switch_snapshot(body: &str) -> Result<Message, DecodeError> {
    SwitchSnapshot::parse(body)
        .map(Message::SwitchSnapshot)
        .ok_or_else(|| DecodeError::malformed(SWITCHSTATES, "non-digit route index"))
}

fn decode_train_add(body: &str) -> Result<Message, DecodeError> {
    let [header, cars] = sections::<2>(TRAIN, body, '\r')?;
    let mut f = Fields::new(TRAIN, header);
    let number = TrainNumber(f.parse("train number")?);
    let kinematics = f.kinematics()?;
    f.finish()?;
    Ok(Message::TrainAdd(TrainRecord {
        number,
        kinematics,
        cars: decode_cars(TRAIN, cars)?,
    }))
}

fn decode_train_remove(body: &str) -> Result<Message, DecodeError> {
    let mut f = Fields::new(REMOVETRAIN, body);
    let mut numbers = Vec::new();
    while !f.is_exhausted() {
        numbers.push(TrainNumber(f.parse("train number")?));
    }
    Ok(Message::TrainRemove(numbers))
}

fn encode_uncouple(out: &mut String, u: &UncoupleRecord) {
    let _ = write!(out, "{}\t{} ", u.car_id, u.user);
    push_kinematics(out, &u.front);
    let _ = write!(out, " {}\t", u.front_number);
    push_kinematics(out, &u.rear);
    let _ = write!(
        out,
        " {}\t{}\t{}\t{}",
        u.rear_number,
        u.front_first_car,
        u.rear_first_car,
        u.player_side.token()
    );
}

fn decode_uncouple(body: &str) -> Result<Message, DecodeError> {
    let [car_id, front, rear, front_first, rear_first, side] =
        sections::<6>(UNCOUPLE, body, '\t')?;

    let mut f = Fields::new(UNCOUPLE, front);
    let user = f.text("user")?.to_owned();
    let front_kin = f.kinematics()?;
    let front_number = TrainNumber(f.parse("front train number")?);
    f.finish()?;

    let mut f = Fields::new(UNCOUPLE, rear);
    let rear_kin = f.kinematics()?;
    let rear_number = TrainNumber(f.parse("rear train number")?);
    f.finish()?;

    let player_side = PlayerSide::from_token(side)
        .ok_or_else(|| DecodeError::malformed(UNCOUPLE, format!("bad player side {side:?}")))?;

    Ok(Message::Uncouple(UncoupleRecord {
        user,
        car_id: car_id.to_owned(),
        front: front_kin,
        front_number,
        rear: rear_kin,
        rear_number,
        front_first_car: front_first.to_owned(),
        rear_first_car: rear_first.to_owned(),
        player_side,
    }))
}

fn decode_couple(body: &str) -> Result<Message, DecodeError> {
    let [header, owner, cars] = sections::<3>(COUPLE, body, '\r')?;
    let mut f = Fields::new(COUPLE, header);
    let number = TrainNumber(f.parse("train number")?);
    let absorbed = TrainNumber(f.parse("absorbed train number")?);
    let kinematics = f.kinematics()?;
    f.finish()?;
    Ok(Message::Couple(CoupleRecord {
        number,
        absorbed,
        kinematics,
        owner: (!owner.is_empty()).then(|| owner.to_owned()),
        cars: decode_cars(COUPLE, cars)?,
    }))
}

fn decode_signal_snapshot(body: &str) -> Result<Message, DecodeError> {
    let mut f = Fields::new(SIGNALSTATES, body);
    let mut states = Vec::new();
    while !f.is_exhausted() {
        let index = f.parse("aspect")?;
        let aspect = SignalAspect::from_index(index).ok_or_else(|| {
            DecodeError::malformed(SIGNALSTATES, format!("bad aspect {index}"))
        })?;
        let draw_state = f.parse("draw state")?;
        states.push(SignalState { aspect, draw_state });
    }
    Ok(Message::SignalSnapshot(SignalSnapshot::new(states)))
}

fn decode_signal_change(body: &str) -> Result<Message, DecodeError> {
    let mut f = Fields::new(SIGNALCHANGE, body);
    let user = f.text("user")?.to_owned();
    let index = f.parse("signal index")?;
    let raw = f.parse("request")?;
    let request = SignalRequest::from_index(raw).ok_or_else(|| {
        DecodeError::malformed(SIGNALCHANGE, format!("bad request {raw}"))
    })?;
    f.finish()?;
    Ok(Message::SignalChange(SignalChange {
        user,
        index,
        request,
    }))
}

fn decode_event(body: &str) -> Result<Message, DecodeError> {
    let mut f = Fields::new(EVENT, body);
    let user = f.text("user")?.to_owned();
    let name = f.text("event name")?;
    let kind = EventKind::from_token(name)
        .ok_or_else(|| DecodeError::malformed(EVENT, format!("unknown event {name:?}")))?;
    let state = f.parse("state")?;
    f.finish()?;
    Ok(Message::Event(ControlEvent { user, kind, state }))
}

fn decode_text(body: &str) -> Result<Message, DecodeError> {
    let [addressee, level, text] = sections::<3>(MESSAGE, body, '\t')?;
    let level = TextLevel::from_token(level)
        .ok_or_else(|| DecodeError::malformed(MESSAGE, format!("bad level {level:?}")))?;
    Ok(Message::Text(TextMessage {
        addressee: addressee.to_owned(),
        level,
        text: text.to_owned(),
    }))
}

fn decode_quit(body: &str) -> Result<Message, DecodeError> {
    let (user, server) = match body.split_once('\t') {
        Some((SERVER_QUIT_SENTINEL, user)) => (user, true),
        Some(_) => return Err(DecodeError::malformed(QUIT, "unexpected section")),
        None => (body, false),
    };
    if user.is_empty() {
        return Err(DecodeError::malformed(QUIT, "missing user"));
    }
    Ok(Message::Quit(QuitNotice {
        user: user.to_owned(),
        server,
    }))
}

fn decode_alive(body: &str) -> Result<Message, DecodeError> {
    let mut f = Fields::new(ALIVE, body);
    let user = f.text("user")?.to_owned();
    f.finish()?;
    Ok(Message::Alive { user })
}

fn decode_get_train(body: &str) -> Result<Message, DecodeError> {
    let mut f = Fields::new(GETTRAIN, body);
    let user = f.text("user")?.to_owned();
    let number = TrainNumber(f.parse("train number")?);
    f.finish()?;
    Ok(Message::GetTrain { user, number })
}
