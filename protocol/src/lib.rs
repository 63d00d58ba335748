//! The over-the-air text protocol spoken between two JS8Chess stations.
//! Parsing and formatting live here so that the controller, the bridge and
//! the tests all agree on one grammar.
//!
//! All OTA text is UPPERCASE on the wire; coordinate moves are stored
//! lowercase internally. The payload shapes after the `JS8CHESS` tag are:
//!
//! * NEW proposal:   `REMOTECALL LOCALCALL JS8CHESS NEW W/B`
//! * Acceptance:     `LOCALCALL REMOTECALL JS8CHESS YYYYMMDDHHMM W/B`
//! * Move:           `REMOTECALL LOCALCALL JS8CHESS <MOVENUM><MOVE>`
//! * Ack:            `REMOTECALL LOCALCALL JS8CHESS >`
//! * Error:          `REMOTECALL LOCALCALL JS8CHESS ERR0X >`
//! * Resync request: `REMOTECALL LOCALCALL JS8CHESS RS YYYYMMDDHHMM MN=N`
//! * Resync OK:      `LOCALCALL REMOTECALL JS8CHESS OK RS YYYYMMDDHHMM MN=N`
//!
//! Move numbers are a plain 1-based ply count: White's first move is 1,
//! Black's reply is 2, White's second move is 3, and so on.

/// The side a station plays, as written on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireColor {
    White,
    Black,
}

impl WireColor {
    /// The single-character wire spelling.
    pub fn as_char(self) -> char {
        match self {
            WireColor::White => 'W',
            WireColor::Black => 'B',
        }
    }

    pub fn from_char(c: char) -> Option<WireColor> {
        match c.to_ascii_uppercase() {
            'W' => Some(WireColor::White),
            'B' => Some(WireColor::Black),
            _ => None,
        }
    }

    pub fn opposite(self) -> WireColor {
        match self {
            WireColor::White => WireColor::Black,
            WireColor::Black => WireColor::White,
        }
    }
}

/// The fixed error vocabulary a station may transmit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    IllegalMove,
    UnexpectedMoveNumber,
    NotInSession,
    Parse,
    Desync,
}

impl ErrorCode {
    /// The wire spelling, e.g. `ERR01`.
    pub fn code(self) -> &'static str {
        match self {
            ErrorCode::IllegalMove => "ERR01",
            ErrorCode::UnexpectedMoveNumber => "ERR02",
            ErrorCode::NotInSession => "ERR03",
            ErrorCode::Parse => "ERR04",
            ErrorCode::Desync => "ERR05",
        }
    }

    /// Human readable description, used for operator-facing info lines.
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::IllegalMove => "Illegal move",
            ErrorCode::UnexpectedMoveNumber => "Unexpected move number",
            ErrorCode::NotInSession => "Not in active session",
            ErrorCode::Parse => "Protocol parse error",
            ErrorCode::Desync => "State desync detected",
        }
    }

    pub fn from_code(code: &str) -> Option<ErrorCode> {
        match code {
            "ERR01" => Some(ErrorCode::IllegalMove),
            "ERR02" => Some(ErrorCode::UnexpectedMoveNumber),
            "ERR03" => Some(ErrorCode::NotInSession),
            "ERR04" => Some(ErrorCode::Parse),
            "ERR05" => Some(ErrorCode::Desync),
            _ => None,
        }
    }
}

/// What a decoded frame means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// The proposer offers a game and names the color they want to play.
    NewProposal { color: WireColor },
    /// The acceptor mints the canonical game id and names their own color.
    Acceptance { timestamp: String, color: WireColor },
    /// A half-move with its 1-based ply number, move stored lowercase.
    Move { move_num: u32, uci: String },
    /// Bare keep-alive / acknowledgement.
    Ack,
    Error { code: ErrorCode },
    /// The peer asks us to rewind; `move_num` is their NEXT expected ply.
    ResyncRequest { timestamp: String, move_num: u32 },
    /// Confirms restoration to the given point.
    ResyncOk { timestamp: String, move_num: u32 },
    /// Prefix matched but the payload did not; tolerated for version drift.
    Unknown,
}

/// A decoded frame together with the callsigns it travelled between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaMessage {
    pub from_call: String,
    pub to_call: String,
    pub kind: MessageKind,
}

/// Parses a raw text string into an [`OtaMessage`].
///
/// Returns `None` when the message is not a JS8Chess frame involving us:
/// frames to us carry `<remote> <local>` (or a bare `<local>` when the API
/// stripped the sender), while acceptance and resync-ok frames we originated
/// carry `<local> <remote>`. `from_call` is the FROM field from the JS8Call
/// API when the transport provides one; a mismatch against the expected
/// sender rejects the frame even when the text prefix would match.
pub fn parse_message(
    raw_text: &str,
    local_call: &str,
    remote_call: &str,
    from_call: &str,
) -> Option<OtaMessage> {
    let text = raw_text.trim().to_uppercase();
    let local = local_call.to_uppercase();
    let remote = remote_call.to_uppercase();

    let inbound_prefix = format!("{remote} {local} JS8CHESS");
    // Some API modes strip the leading FROM callsign; the bare form imputes
    // the remote.
    let bare_prefix = format!("{local} JS8CHESS");
    // Frames we originated carry the callsigns the other way round.
    let echo_prefix = format!("{local} {remote} JS8CHESS");

    let (payload, inbound) = if let Some(rest) = text.strip_prefix(&inbound_prefix) {
        (rest.trim(), true)
    } else if let Some(rest) = text.strip_prefix(&bare_prefix) {
        (rest.trim(), true)
    } else if let Some(rest) = text.strip_prefix(&echo_prefix) {
        (rest.trim(), false)
    } else {
        return None;
    };

    let expected_from = if inbound { &remote } else { &local };
    if !from_call.is_empty() && from_call.to_uppercase() != *expected_from {
        tracing::debug!(from_call, "ignoring frame from unexpected callsign");
        return None;
    }

    let kind = parse_payload(payload);
    if inbound {
        Some(OtaMessage {
            from_call: remote,
            to_call: local,
            kind,
        })
    } else {
        // Only the kinds we originate are valid in echo orientation.
        match kind {
            MessageKind::Acceptance { .. } | MessageKind::ResyncOk { .. } => Some(OtaMessage {
                from_call: local,
                to_call: remote,
                kind,
            }),
            _ => None,
        }
    }
}

fn parse_payload(payload: &str) -> MessageKind {
    if payload.is_empty() || payload == ">" {
        return MessageKind::Ack;
    }

    if let Some(rest) = payload.strip_prefix("NEW ")
        && let Some(color) = single_color(rest)
    {
        return MessageKind::NewProposal { color };
    }

    if let Some((ts, rest)) = payload.split_once(' ')
        && is_timestamp(ts)
        && let Some(color) = single_color(rest)
    {
        return MessageKind::Acceptance {
            timestamp: ts.to_string(),
            color,
        };
    }

    if let Some(code) = parse_error(payload) {
        return MessageKind::Error { code };
    }

    if let Some((timestamp, move_num)) = parse_resync(payload, "RS ") {
        return MessageKind::ResyncRequest { timestamp, move_num };
    }

    if let Some((timestamp, move_num)) = parse_resync(payload, "OK RS ") {
        return MessageKind::ResyncOk { timestamp, move_num };
    }

    if let Some((move_num, uci)) = parse_move(payload) {
        return MessageKind::Move { move_num, uci };
    }

    tracing::warn!(payload, "unrecognised JS8Chess payload");
    MessageKind::Unknown
}

/// The canonical game timestamp: exactly twelve decimal digits.
fn is_timestamp(s: &str) -> bool {
    s.len() == 12 && s.bytes().all(|b| b.is_ascii_digit())
}

fn single_color(s: &str) -> Option<WireColor> {
    let s = s.trim();
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => WireColor::from_char(c),
        _ => None,
    }
}

/// `ERR0X`, optionally followed by whitespace and the `>` marker.
fn parse_error(payload: &str) -> Option<ErrorCode> {
    let code = ErrorCode::from_code(payload.get(..5)?)?;
    let rest = payload[5..].trim_start();
    (rest.is_empty() || rest == ">").then_some(code)
}

fn parse_resync(payload: &str, tag: &str) -> Option<(String, u32)> {
    let rest = payload.strip_prefix(tag)?;
    let (ts, mn) = rest.split_once(' ')?;
    if !is_timestamp(ts) {
        return None;
    }
    let digits = mn.strip_prefix("MN=")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((ts.to_string(), digits.parse().ok()?))
}

/// `<MOVENUM><MOVE>` with no separator, e.g. `1E2E4` or `15E7E8Q`.
fn parse_move(payload: &str) -> Option<(u32, String)> {
    let digits_end = payload
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(payload.len());
    if digits_end == 0 {
        return None;
    }
    let (num, mv) = payload.split_at(digits_end);
    if !is_coordinate_move(mv) {
        return None;
    }
    Some((num.parse().ok()?, mv.to_lowercase()))
}

fn is_coordinate_move(s: &str) -> bool {
    let b = s.as_bytes();
    let square = |file: u8, rank: u8| (b'A'..=b'H').contains(&file) && (b'1'..=b'8').contains(&rank);
    match b.len() {
        4 => square(b[0], b[1]) && square(b[2], b[3]),
        5 => {
            square(b[0], b[1])
                && square(b[2], b[3])
                && matches!(b[4], b'Q' | b'R' | b'B' | b'N')
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Formatters - produce UPPERCASE OTA lines
// ---------------------------------------------------------------------------

/// `REMOTE LOCAL JS8CHESS NEW W/B`
pub fn fmt_new_proposal(local: &str, remote: &str, color: WireColor) -> String {
    format!(
        "{} {} JS8CHESS NEW {}",
        remote.to_uppercase(),
        local.to_uppercase(),
        color.as_char()
    )
}

/// `LOCAL REMOTE JS8CHESS YYYYMMDDHHMM W/B`
pub fn fmt_acceptance(local: &str, remote: &str, timestamp: &str, color: WireColor) -> String {
    format!(
        "{} {} JS8CHESS {timestamp} {}",
        local.to_uppercase(),
        remote.to_uppercase(),
        color.as_char()
    )
}

/// `REMOTE LOCAL JS8CHESS <MOVENUM><MOVE>`
pub fn fmt_move(local: &str, remote: &str, move_num: u32, uci: &str) -> String {
    format!(
        "{} {} JS8CHESS {move_num}{}",
        remote.to_uppercase(),
        local.to_uppercase(),
        uci.to_uppercase()
    )
}

/// `REMOTE LOCAL JS8CHESS ERR0X >`
pub fn fmt_error(local: &str, remote: &str, code: ErrorCode) -> String {
    format!(
        "{} {} JS8CHESS {} >",
        remote.to_uppercase(),
        local.to_uppercase(),
        code.code()
    )
}

/// `REMOTE LOCAL JS8CHESS RS YYYYMMDDHHMM MN=N`
pub fn fmt_resync_request(local: &str, remote: &str, timestamp: &str, move_num: u32) -> String {
    format!(
        "{} {} JS8CHESS RS {timestamp} MN={move_num}",
        remote.to_uppercase(),
        local.to_uppercase()
    )
}

/// `LOCAL REMOTE JS8CHESS OK RS YYYYMMDDHHMM MN=N`
pub fn fmt_resync_ok(local: &str, remote: &str, timestamp: &str, move_num: u32) -> String {
    format!(
        "{} {} JS8CHESS OK RS {timestamp} MN={move_num}",
        local.to_uppercase(),
        remote.to_uppercase()
    )
}

/// Current local wall-clock time as the 12-digit game id. The codec touches
/// the clock through this one function only.
pub fn now_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d%H%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LOCAL: &str = "CALLSIGN";
    const REMOTE: &str = "SWL";

    fn parse(text: &str) -> Option<OtaMessage> {
        parse_message(text, LOCAL, REMOTE, "")
    }

    fn kind(text: &str) -> MessageKind {
        parse(text).expect("frame should be for us").kind
    }

    #[test]
    fn new_proposal_white() {
        let msg = parse("SWL CALLSIGN JS8CHESS NEW W").unwrap();
        assert_eq!(
            msg.kind,
            MessageKind::NewProposal {
                color: WireColor::White
            }
        );
        assert_eq!(msg.from_call, REMOTE);
        assert_eq!(msg.to_call, LOCAL);
    }

    #[test]
    fn new_proposal_black() {
        assert_eq!(
            kind("SWL CALLSIGN JS8CHESS NEW B"),
            MessageKind::NewProposal {
                color: WireColor::Black
            }
        );
    }

    #[test]
    fn lowercase_input_normalised() {
        assert_eq!(
            kind("swl callsign js8chess new w"),
            MessageKind::NewProposal {
                color: WireColor::White
            }
        );
    }

    #[test]
    fn wrong_callsign_returns_none() {
        assert_eq!(parse("G0ABC CALLSIGN JS8CHESS NEW W"), None);
    }

    #[test]
    fn bare_prefix_imputes_remote() {
        let msg = parse_message("CALLSIGN JS8CHESS NEW W", LOCAL, REMOTE, "").unwrap();
        assert_eq!(msg.from_call, REMOTE);
        assert_eq!(
            msg.kind,
            MessageKind::NewProposal {
                color: WireColor::White
            }
        );
    }

    #[test]
    fn from_call_mismatch_returns_none() {
        assert_eq!(
            parse_message("SWL CALLSIGN JS8CHESS NEW W", LOCAL, REMOTE, "G0ABC"),
            None
        );
    }

    #[test]
    fn from_call_match_accepted() {
        assert!(parse_message("SWL CALLSIGN JS8CHESS NEW W", LOCAL, REMOTE, "SWL").is_some());
    }

    #[test]
    fn acceptance() {
        assert_eq!(
            kind("SWL CALLSIGN JS8CHESS 202506011430 W"),
            MessageKind::Acceptance {
                timestamp: "202506011430".into(),
                color: WireColor::White
            }
        );
    }

    #[test]
    fn acceptance_black() {
        assert_eq!(
            kind("SWL CALLSIGN JS8CHESS 202506011430 B"),
            MessageKind::Acceptance {
                timestamp: "202506011430".into(),
                color: WireColor::Black
            }
        );
    }

    #[test]
    fn eleven_digit_timestamp_is_not_acceptance() {
        let k = kind("SWL CALLSIGN JS8CHESS 20250601143 W");
        assert!(!matches!(k, MessageKind::Acceptance { .. }));
    }

    #[test]
    fn thirteen_digit_timestamp_is_not_acceptance() {
        let k = kind("SWL CALLSIGN JS8CHESS 2025060114300 W");
        assert!(!matches!(k, MessageKind::Acceptance { .. }));
    }

    #[test]
    fn move_1_e2e4() {
        assert_eq!(
            kind("SWL CALLSIGN JS8CHESS 1E2E4"),
            MessageKind::Move {
                move_num: 1,
                uci: "e2e4".into()
            }
        );
    }

    #[test]
    fn move_promotion() {
        assert_eq!(
            kind("SWL CALLSIGN JS8CHESS 15E7E8Q"),
            MessageKind::Move {
                move_num: 15,
                uci: "e7e8q".into()
            }
        );
    }

    #[test]
    fn multi_digit_move_num() {
        assert_eq!(
            kind("SWL CALLSIGN JS8CHESS 42A1A8"),
            MessageKind::Move {
                move_num: 42,
                uci: "a1a8".into()
            }
        );
    }

    #[test]
    fn ack() {
        assert_eq!(kind("SWL CALLSIGN JS8CHESS >"), MessageKind::Ack);
    }

    #[test]
    fn empty_payload_is_ack() {
        assert_eq!(kind("SWL CALLSIGN JS8CHESS"), MessageKind::Ack);
    }

    #[test]
    fn error_codes() {
        for (text, code) in [
            ("ERR01", ErrorCode::IllegalMove),
            ("ERR02", ErrorCode::UnexpectedMoveNumber),
            ("ERR03", ErrorCode::NotInSession),
            ("ERR04", ErrorCode::Parse),
            ("ERR05", ErrorCode::Desync),
        ] {
            assert_eq!(
                kind(&format!("SWL CALLSIGN JS8CHESS {text} >")),
                MessageKind::Error { code }
            );
        }
    }

    #[test]
    fn error_without_ack_marker() {
        assert_eq!(
            kind("SWL CALLSIGN JS8CHESS ERR01"),
            MessageKind::Error {
                code: ErrorCode::IllegalMove
            }
        );
    }

    #[test]
    fn resync_request() {
        assert_eq!(
            kind("SWL CALLSIGN JS8CHESS RS 202506011430 MN=17"),
            MessageKind::ResyncRequest {
                timestamp: "202506011430".into(),
                move_num: 17
            }
        );
    }

    #[test]
    fn resync_ok() {
        assert_eq!(
            kind("SWL CALLSIGN JS8CHESS OK RS 202506011430 MN=17"),
            MessageKind::ResyncOk {
                timestamp: "202506011430".into(),
                move_num: 17
            }
        );
    }

    #[test]
    fn unrelated_traffic_returns_none() {
        assert_eq!(parse("CQ CQ DE SWL"), None);
        assert_eq!(parse(""), None);
        assert_eq!(parse("SWL CALLSIGN HELLO THERE"), None);
    }

    #[test]
    fn matched_prefix_with_garbage_payload_is_unknown() {
        assert_eq!(kind("SWL CALLSIGN JS8CHESS FROBNICATE 12"), MessageKind::Unknown);
    }

    // -----------------------------------------------------------------
    // Formatters
    // -----------------------------------------------------------------

    #[test]
    fn fmt_new_proposal_white() {
        assert_eq!(
            fmt_new_proposal(LOCAL, REMOTE, WireColor::White),
            "SWL CALLSIGN JS8CHESS NEW W"
        );
    }

    #[test]
    fn fmt_acceptance_exact() {
        assert_eq!(
            fmt_acceptance(LOCAL, REMOTE, "202506011430", WireColor::Black),
            "CALLSIGN SWL JS8CHESS 202506011430 B"
        );
    }

    #[test]
    fn fmt_move_uppercases() {
        assert_eq!(
            fmt_move(LOCAL, REMOTE, 1, "e2e4"),
            "SWL CALLSIGN JS8CHESS 1E2E4"
        );
        assert_eq!(
            fmt_move(LOCAL, REMOTE, 15, "e7e8q"),
            "SWL CALLSIGN JS8CHESS 15E7E8Q"
        );
    }

    #[test]
    fn fmt_error_exact() {
        assert_eq!(
            fmt_error(LOCAL, REMOTE, ErrorCode::IllegalMove),
            "SWL CALLSIGN JS8CHESS ERR01 >"
        );
    }

    #[test]
    fn fmt_resync_request_exact() {
        assert_eq!(
            fmt_resync_request(LOCAL, REMOTE, "202506011430", 17),
            "SWL CALLSIGN JS8CHESS RS 202506011430 MN=17"
        );
    }

    #[test]
    fn fmt_resync_ok_exact() {
        assert_eq!(
            fmt_resync_ok(LOCAL, REMOTE, "202506011430", 17),
            "CALLSIGN SWL JS8CHESS OK RS 202506011430 MN=17"
        );
    }

    // -----------------------------------------------------------------
    // Round trips
    // -----------------------------------------------------------------

    #[test]
    fn move_round_trips() {
        for num in [1u32, 2, 42] {
            for mv in ["e2e4", "a1a8", "e7e8q"] {
                let text = fmt_move(LOCAL, REMOTE, num, mv);
                assert_eq!(
                    kind(&text),
                    MessageKind::Move {
                        move_num: num,
                        uci: mv.into()
                    },
                    "round trip failed for {num}{mv}"
                );
            }
        }
    }

    #[test]
    fn acceptance_round_trips() {
        for color in [WireColor::White, WireColor::Black] {
            let text = fmt_acceptance(LOCAL, REMOTE, "202506011430", color);
            assert_eq!(
                kind(&text),
                MessageKind::Acceptance {
                    timestamp: "202506011430".into(),
                    color
                }
            );
        }
    }

    #[test]
    fn acceptance_from_peer_parses() {
        // An acceptance the peer formatted arrives with the callsigns in
        // inbound order.
        let text = fmt_acceptance(REMOTE, LOCAL, "202506011430", WireColor::White);
        assert_eq!(
            kind(&text),
            MessageKind::Acceptance {
                timestamp: "202506011430".into(),
                color: WireColor::White
            }
        );
    }

    #[test]
    fn resync_ok_round_trips() {
        let text = fmt_resync_ok(LOCAL, REMOTE, "202506011430", 3);
        assert_eq!(
            kind(&text),
            MessageKind::ResyncOk {
                timestamp: "202506011430".into(),
                move_num: 3
            }
        );
    }

    #[test]
    fn echo_orientation_rejects_inbound_kinds() {
        // A move frame never legitimately carries our callsign first.
        assert_eq!(parse("CALLSIGN SWL JS8CHESS 1E2E4"), None);
    }
}
