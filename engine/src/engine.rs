//! The controller: UCI dialogue on one side, radio negotiation on the other,
//! with the authoritative game state in between.
//!
//! Concurrency layout (all tokio tasks): the UCI reader drives
//! [`Engine::handle_command`], the bridge dispatcher drives
//! [`Engine::handle_radio_text`], and each `go` spawns one worker task that
//! owns the inbound queue until it has emitted its `bestmove`. The state
//! triple (engine state, session, position cache) lives under one mutex
//! whose guard never crosses an await point.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use js8_bridge::Transmitter;
use protocol::{ErrorCode, MessageKind, OtaMessage, WireColor};
use shakmaty::{Color, Outcome};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;

use crate::config::Config;
use crate::game::{GameSession, result_string};

/// Interval at which a waiting `go` worker re-checks the stop flag while
/// accumulating towards the retry timeout.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Where the engine stands in the radio negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NoGame,
    /// We sent NEW and are awaiting the acceptance.
    ProposalSent,
    /// An inbound proposal is being considered.
    AwaitingProposal,
    GameActive,
    GameOver,
}

/// UCI output seam: stdout in the binary, a recorder in tests. Lines written
/// here belong to the front-end; logging goes elsewhere.
pub trait UciSink: Send + Sync {
    fn emit(&self, line: &str);
}

/// Writes UCI lines to stdout.
pub struct StdoutSink;

impl UciSink for StdoutSink {
    fn emit(&self, line: &str) {
        println!("{line}");
    }
}

/// Items travelling from the radio dispatcher to the waiting `go` worker.
enum QueueItem {
    Message(OtaMessage),
    /// Wakes a waiter so it can observe the stop flag.
    Stop,
}

/// The state triple guarded by the state mutex.
struct Core {
    state: EngineState,
    game: Option<GameSession>,
    /// The move list of the front-end's last `position` command, lowercase.
    position_moves: Vec<String>,
}

/// The engine core. Shared between the UCI reader, the bridge dispatcher and
/// the `go` worker via `Arc`.
pub struct Engine {
    cfg: Config,
    pgn_dir: PathBuf,
    core: Mutex<Core>,
    queue_tx: UnboundedSender<QueueItem>,
    /// The worker holds this lock for its lifetime, so at most one consumes.
    queue_rx: tokio::sync::Mutex<UnboundedReceiver<QueueItem>>,
    go_stop: AtomicBool,
    radio: Arc<dyn Transmitter>,
    uci: Arc<dyn UciSink>,
}

impl Engine {
    pub fn new(
        cfg: Config,
        pgn_dir: PathBuf,
        radio: Arc<dyn Transmitter>,
        uci: Arc<dyn UciSink>,
    ) -> Engine {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Engine {
            cfg,
            pgn_dir,
            core: Mutex::new(Core {
                state: EngineState::NoGame,
                game: None,
                position_moves: Vec::new(),
            }),
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(queue_rx),
            go_stop: AtomicBool::new(false),
            radio,
            uci,
        }
    }

    pub fn state(&self) -> EngineState {
        self.lock_core().state
    }

    /// Snapshot of the active game: id, local color, applied plies.
    pub fn game_status(&self) -> Option<(String, Color, usize)> {
        let core = self.lock_core();
        core.game
            .as_ref()
            .map(|game| (game.game_id.clone(), game.local_color, game.ply_count()))
    }

    fn lock_core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().expect("state lock poisoned")
    }

    fn stopped(&self) -> bool {
        self.go_stop.load(Ordering::SeqCst)
    }

    fn uci_out(&self, line: &str) {
        self.uci.emit(line);
        tracing::debug!(line, "UCI out");
    }

    async fn transmit(&self, text: &str) {
        if !self.radio.transmit(&self.cfg.remote_callsign, text).await {
            tracing::warn!(%text, "transmission failed");
        }
    }

    // ------------------------------------------------------------------
    // UCI dialogue
    // ------------------------------------------------------------------

    /// Handles one UCI line. Returns false once the front-end asked to quit.
    pub fn handle_command(self: &Arc<Engine>, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return true;
        }
        tracing::debug!(line, "UCI in");
        let mut tokens = line.split_whitespace();
        match tokens.next().unwrap_or_default() {
            "uci" => {
                self.uci_out("id name JS8Chess");
                self.uci_out("id author JS8Chess Project");
                self.uci_out("uciok");
            }
            "isready" => self.uci_out("readyok"),
            "ucinewgame" => {
                let mut core = self.lock_core();
                core.game = None;
                core.state = EngineState::NoGame;
                core.position_moves.clear();
                drop(core);
                tracing::info!("ucinewgame received, session cleared");
            }
            "position" => self.handle_position(tokens),
            "go" => self.handle_go(),
            "stop" => self.signal_stop(),
            "quit" => {
                self.signal_stop();
                return false;
            }
            _ => tracing::debug!(line, "unknown UCI command"),
        }
        true
    }

    /// Records the move list of a `position [startpos] moves ...` command.
    fn handle_position<'a>(&self, tokens: impl Iterator<Item = &'a str>) {
        let mut moves = Vec::new();
        let mut seen_moves = false;
        for token in tokens {
            if seen_moves {
                moves.push(token.to_lowercase());
            } else if token == "moves" {
                seen_moves = true;
            }
        }
        tracing::debug!(?moves, "position moves");
        self.lock_core().position_moves = moves;
    }

    /// Spawns the worker that answers this `go`.
    fn handle_go(self: &Arc<Engine>) {
        self.go_stop.store(false, Ordering::SeqCst);
        let engine = Arc::clone(self);
        drop(tokio::spawn(async move { engine.go_worker().await }));
    }

    fn signal_stop(&self) {
        self.go_stop.store(true, Ordering::SeqCst);
        let _ = self.queue_tx.send(QueueItem::Stop);
    }

    // ------------------------------------------------------------------
    // go worker
    // ------------------------------------------------------------------

    async fn go_worker(self: Arc<Engine>) {
        let mut queue = self.queue_rx.lock().await;

        // If radio negotiation has not produced a game yet, wait for one.
        // Once a game appears we report "no move" so the front-end refreshes
        // its position and issues a new go.
        let mut announced = false;
        loop {
            if self.stopped() {
                self.uci_out("bestmove 0000");
                return;
            }
            match self.lock_core().state {
                EngineState::GameActive if announced => {
                    self.uci_out("info string Game is now active");
                    self.uci_out("bestmove 0000");
                    return;
                }
                EngineState::GameActive => break,
                state => {
                    if !announced {
                        tracing::info!(?state, "go received without an active game");
                        self.uci_out(
                            "info string Waiting for JS8Chess game to be established via radio",
                        );
                        announced = true;
                    }
                }
            }
            match timeout(POLL_INTERVAL, queue.recv()).await {
                Err(_) => {}
                Ok(None) => {
                    self.uci_out("bestmove 0000");
                    return;
                }
                Ok(Some(QueueItem::Stop)) => {} // flag is checked at the top
                Ok(Some(QueueItem::Message(msg))) => {
                    tracing::debug!(kind = ?msg.kind, "queued message while awaiting a game")
                }
            }
        }

        // Whatever the front-end's list holds beyond our stack was just
        // played locally.
        let pending: Vec<String> = {
            let core = self.lock_core();
            let Some(game) = core.game.as_ref() else {
                self.uci_out("info string No active JS8Chess game");
                self.uci_out("bestmove 0000");
                return;
            };
            let played = game.ply_count();
            if core.position_moves.len() > played {
                core.position_moves[played..].to_vec()
            } else {
                if game.is_local_turn() {
                    tracing::warn!("go received but no new local move and it is the local turn");
                }
                Vec::new()
            }
        };

        for coord in &pending {
            match self.apply_and_transmit_local_move(coord).await {
                LocalMove::Applied => {}
                LocalMove::Finished | LocalMove::Rejected => {
                    self.uci_out("bestmove 0000");
                    return;
                }
            }
        }

        self.uci_out("info string Waiting for remote move via radio");
        match self.await_remote_move(&mut queue).await {
            Some(coord) => self.uci_out(&format!("bestmove {coord}")),
            None => self.uci_out("bestmove 0000"),
        }
    }

    /// Validates, applies and transmits one local move. The session is
    /// extended strictly before the remote reply is awaited.
    async fn apply_and_transmit_local_move(&self, coord: &str) -> LocalMove {
        let (ota_text, finished) = {
            let mut core = self.lock_core();
            let Some(game) = core.game.as_mut() else {
                return LocalMove::Rejected;
            };
            if !game.validate_move(coord) {
                drop(core);
                tracing::error!(coord, "invalid local move from GUI");
                self.uci_out(&format!("info string ERROR: invalid local move {coord}"));
                return LocalMove::Rejected;
            }
            let move_num = game.expected_move_num();
            if !game.apply_move(coord) {
                return LocalMove::Rejected;
            }
            let outcome = game.outcome();
            let text = protocol::fmt_move(
                &self.cfg.local_callsign,
                &self.cfg.remote_callsign,
                move_num,
                coord,
            );
            let finished = outcome.map(|outcome| Self::finish_game(&mut core, outcome));
            (text, finished)
        };

        self.uci_out(&format!("info string TX: {ota_text}"));
        tracing::info!(%ota_text, "transmitting local move");
        self.transmit(&ota_text).await;

        match finished {
            Some(result) => {
                self.uci_out(&format!("info string Game over: {result}"));
                LocalMove::Finished
            }
            None => LocalMove::Applied,
        }
    }

    /// Blocks until a validated remote move arrives, stop is signalled, or
    /// all retries are used up. Each timeout of a full wait cycle
    /// retransmits the last local move.
    async fn await_remote_move(
        &self,
        queue: &mut UnboundedReceiver<QueueItem>,
    ) -> Option<String> {
        let full_wait = Duration::from_secs(self.cfg.move_response_wait_seconds.max(1));
        let mut remaining = full_wait;
        let mut retries_left = self.cfg.max_retries;

        loop {
            if self.stopped() {
                return None;
            }
            let poll = remaining.min(POLL_INTERVAL);
            match timeout(poll, queue.recv()).await {
                Err(_) => {
                    if self.stopped() {
                        return None;
                    }
                    remaining = remaining.saturating_sub(poll);
                    if remaining.is_zero() {
                        if retries_left > 0 {
                            retries_left -= 1;
                            self.retransmit_last_local_move().await;
                            remaining = full_wait;
                        } else {
                            self.uci_out("info string ERROR: no response after max retries");
                            return None;
                        }
                    }
                }
                Ok(None) => return None,
                Ok(Some(QueueItem::Stop)) => {} // flag is checked at the top
                Ok(Some(QueueItem::Message(msg))) => {
                    if let Some(coord) = self.process_radio_item(msg).await {
                        return Some(coord);
                    }
                }
            }
        }
    }

    /// Processes one queued OTA message. Returns the remote move once one is
    /// validated and applied; anything else keeps the worker waiting.
    async fn process_radio_item(&self, msg: OtaMessage) -> Option<String> {
        match msg.kind {
            MessageKind::Ack => {
                tracing::debug!("ACK received");
                None
            }
            MessageKind::Move { move_num, uci } => self.process_remote_move(move_num, &uci).await,
            MessageKind::Error { code } => {
                self.uci_out(&format!("info string Remote sent error: {}", code.code()));
                tracing::error!(code = code.code(), "remote error received");
                None
            }
            MessageKind::ResyncRequest {
                timestamp,
                move_num,
            } => {
                self.handle_resync_request(&timestamp, move_num).await;
                None // keep waiting after resync
            }
            MessageKind::ResyncOk {
                timestamp,
                move_num,
            } => {
                tracing::info!(%timestamp, move_num, "resync OK received");
                None
            }
            other => {
                tracing::debug!(kind = ?other, "unhandled message while awaiting move");
                None
            }
        }
    }

    async fn process_remote_move(&self, move_num: u32, uci: &str) -> Option<String> {
        #[derive(Clone, Copy)]
        enum Verdict {
            NoSession,
            BadMoveNum(u32),
            Illegal,
            Applied(Option<Outcome>),
        }

        let (verdict, finished) = {
            let mut core = self.lock_core();
            let verdict = match core.game.as_mut() {
                None => Verdict::NoSession,
                Some(game) => {
                    if move_num != game.expected_move_num() {
                        Verdict::BadMoveNum(game.expected_move_num())
                    } else if !game.apply_move(uci) {
                        Verdict::Illegal
                    } else {
                        Verdict::Applied(game.outcome())
                    }
                }
            };
            let finished = match verdict {
                Verdict::Applied(Some(outcome)) => Some(Self::finish_game(&mut core, outcome)),
                _ => None,
            };
            (verdict, finished)
        };

        match verdict {
            Verdict::NoSession => {
                self.send_error(ErrorCode::NotInSession).await;
                None
            }
            Verdict::BadMoveNum(expected) => {
                tracing::warn!(expected, got = move_num, "move number mismatch");
                self.send_error(ErrorCode::UnexpectedMoveNumber).await;
                None
            }
            Verdict::Illegal => {
                tracing::warn!(uci, "illegal remote move");
                self.send_error(ErrorCode::IllegalMove).await;
                None
            }
            Verdict::Applied(_) => {
                self.uci_out(&format!("info string RX move: {move_num}{}", uci.to_uppercase()));
                tracing::info!(uci, ply = move_num, "remote move applied");
                if let Some(result) = finished {
                    self.uci_out(&format!("info string Game over: {result}"));
                }
                Some(uci.to_lowercase())
            }
        }
    }

    /// Retransmits the last local move (called when a wait cycle times out).
    async fn retransmit_last_local_move(&self) {
        let ota_text = {
            let core = self.lock_core();
            let Some(game) = core.game.as_ref() else {
                return;
            };
            let moves = game.move_list();
            let Some(last) = moves.last() else {
                return;
            };
            protocol::fmt_move(
                &self.cfg.local_callsign,
                &self.cfg.remote_callsign,
                moves.len() as u32,
                last,
            )
        };
        self.uci_out(&format!("info string RETRY TX: {ota_text}"));
        tracing::info!(%ota_text, "retransmitting");
        self.transmit(&ota_text).await;
    }

    async fn send_error(&self, code: ErrorCode) {
        let text = protocol::fmt_error(&self.cfg.local_callsign, &self.cfg.remote_callsign, code);
        self.uci_out(&format!(
            "info string TX error {}: {}",
            code.code(),
            code.description()
        ));
        tracing::info!(code = code.code(), "sending error");
        self.transmit(&text).await;
    }

    /// Writes the result of a finished game and leaves the active state.
    fn finish_game(core: &mut Core, outcome: Outcome) -> &'static str {
        let result = result_string(outcome);
        if let Some(game) = core.game.as_mut() {
            game.set_result(result);
        }
        core.state = EngineState::GameOver;
        tracing::info!(result, "game over");
        result
    }

    // ------------------------------------------------------------------
    // Radio inbound hook
    // ------------------------------------------------------------------

    /// Called by the dispatcher for every directed message from the bridge.
    pub async fn handle_radio_text(&self, from: &str, _to: &str, text: &str) {
        let Some(msg) = protocol::parse_message(
            text,
            &self.cfg.local_callsign,
            &self.cfg.remote_callsign,
            from,
        ) else {
            return; // not a JS8Chess frame for us
        };
        tracing::info!(kind = ?msg.kind, from, "radio RX");

        let state = self.lock_core().state;
        match msg.kind {
            MessageKind::NewProposal { color } => self.handle_new_proposal(color).await,
            MessageKind::Acceptance { timestamp, color } => {
                self.handle_acceptance(&timestamp, color).await;
            }
            kind if state == EngineState::GameActive => {
                // Deliver to the go worker via the queue.
                let _ = self.queue_tx.send(QueueItem::Message(OtaMessage {
                    from_call: msg.from_call,
                    to_call: msg.to_call,
                    kind,
                }));
            }
            MessageKind::ResyncRequest {
                timestamp,
                move_num,
            } => self.handle_resync_request(&timestamp, move_num).await,
            kind => tracing::debug!(?state, ?kind, "ignoring message in current state"),
        }
    }

    // ------------------------------------------------------------------
    // Game negotiation
    // ------------------------------------------------------------------

    /// The remote proposed a new game, naming the color they want.
    async fn handle_new_proposal(&self, remote_color: WireColor) {
        {
            let mut core = self.lock_core();
            if core.state == EngineState::GameActive {
                tracing::warn!("NEW proposal ignored: game already active");
                return;
            }
            core.state = EngineState::AwaitingProposal;
        }
        tracing::info!(color = ?remote_color, "NEW proposal received");

        if !self.cfg.auto_accept {
            self.uci_out(&format!(
                "info string Game proposal from {} ignored (auto_accept is false in config)",
                self.cfg.remote_callsign
            ));
            tracing::info!("proposal ignored: auto_accept disabled");
            self.lock_core().state = EngineState::NoGame;
            return;
        }

        // The acceptance timestamp becomes the canonical game id; our color
        // is the opposite of what the proposer chose.
        let timestamp = protocol::now_timestamp();
        let local_color = remote_color.opposite();

        let acceptance = protocol::fmt_acceptance(
            &self.cfg.local_callsign,
            &self.cfg.remote_callsign,
            &timestamp,
            local_color,
        );
        self.uci_out(&format!("info string TX acceptance: {acceptance}"));
        tracing::info!(%acceptance, "sending acceptance");
        self.transmit(&acceptance).await;

        let installed = {
            let mut core = self.lock_core();
            let installed = self.install_game(&mut core, &timestamp, local_color);
            if installed.is_err() {
                core.state = EngineState::NoGame;
            }
            installed
        };
        match installed {
            Ok(()) => self.uci_out(&format!(
                "info string Game started - ID: {timestamp}, local: {}, remote: {}",
                local_color.as_char(),
                remote_color.as_char()
            )),
            Err(err) => {
                tracing::error!(?err, "could not create game session");
                self.uci_out(&format!("info string ERROR: could not start game: {err}"));
            }
        }
    }

    /// The remote accepted our NEW proposal; their timestamp is the game id.
    async fn handle_acceptance(&self, timestamp: &str, remote_color: WireColor) {
        let local_color = remote_color.opposite();
        let installed = {
            let mut core = self.lock_core();
            if core.state != EngineState::ProposalSent {
                tracing::debug!(state = ?core.state, "acceptance ignored: no proposal outstanding");
                return;
            }
            let installed = self.install_game(&mut core, timestamp, local_color);
            if installed.is_err() {
                core.state = EngineState::NoGame;
            }
            installed
        };
        match installed {
            Ok(()) => self.uci_out(&format!(
                "info string Game accepted - ID: {timestamp}, local: {}, remote: {}",
                local_color.as_char(),
                remote_color.as_char()
            )),
            Err(err) => {
                tracing::error!(?err, "could not create game session");
                self.uci_out(&format!("info string ERROR: could not start game: {err}"));
            }
        }
    }

    /// Creates the session and flips to GameActive; callers hold the lock so
    /// check and mutation stay one critical section.
    fn install_game(
        &self,
        core: &mut Core,
        game_id: &str,
        local_color: WireColor,
    ) -> anyhow::Result<()> {
        let color = board_color(local_color);
        let game = GameSession::new(
            game_id,
            &self.cfg.local_callsign,
            &self.cfg.remote_callsign,
            color,
            &self.pgn_dir,
        )?;
        core.game = Some(game);
        core.state = EngineState::GameActive;
        core.position_moves.clear();
        tracing::info!(game_id, ?color, "game active");
        Ok(())
    }

    /// Transmits a NEW game proposal; refused while a game is active.
    pub async fn send_new_proposal(&self, color: WireColor) {
        {
            let mut core = self.lock_core();
            if core.state == EngineState::GameActive {
                tracing::warn!("cannot send NEW: game already active");
                return;
            }
            core.state = EngineState::ProposalSent;
        }
        let text = protocol::fmt_new_proposal(
            &self.cfg.local_callsign,
            &self.cfg.remote_callsign,
            color,
        );
        self.uci_out(&format!("info string TX new proposal: {text}"));
        tracing::info!(%text, "sending NEW proposal");
        self.transmit(&text).await;
    }

    // ------------------------------------------------------------------
    // Resync
    // ------------------------------------------------------------------

    /// The peer asked to restore the game to just before their `move_num`-th
    /// expected ply.
    async fn handle_resync_request(&self, timestamp: &str, move_num: u32) {
        #[derive(Clone, Copy)]
        enum Verdict {
            Restored,
            NoSession,
            Desync,
        }

        let verdict = {
            let mut core = self.lock_core();
            match core.game.as_mut() {
                None => {
                    tracing::warn!("resync requested but no active game");
                    Verdict::NoSession
                }
                Some(game) if game.game_id != timestamp => {
                    tracing::warn!(got = timestamp, expected = %game.game_id, "resync timestamp mismatch");
                    Verdict::Desync
                }
                Some(game) => {
                    if move_num >= 1 && game.restore_to_ply(move_num as usize - 1) {
                        Verdict::Restored
                    } else {
                        Verdict::Desync
                    }
                }
            }
        };

        match verdict {
            Verdict::NoSession => self.send_error(ErrorCode::NotInSession).await,
            Verdict::Desync => self.send_error(ErrorCode::Desync).await,
            Verdict::Restored => {
                let response = protocol::fmt_resync_ok(
                    &self.cfg.local_callsign,
                    &self.cfg.remote_callsign,
                    timestamp,
                    move_num,
                );
                self.uci_out(&format!("info string TX resync OK: {response}"));
                tracing::info!(%response, "sending resync OK");
                self.transmit(&response).await;
            }
        }
    }
}

/// Outcome of handling one freshly played local move.
enum LocalMove {
    Applied,
    /// The move ended the game; nothing left to await.
    Finished,
    Rejected,
}

fn board_color(color: WireColor) -> Color {
    match color {
        WireColor::White => Color::White,
        WireColor::Black => Color::Black,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingRadio {
        sent: StdMutex<Vec<(String, String)>>,
    }

    #[async_trait::async_trait]
    impl Transmitter for RecordingRadio {
        async fn transmit(&self, to: &str, text: &str) -> bool {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), text.to_string()));
            true
        }
    }

    struct RecordingSink {
        lines: StdMutex<Vec<String>>,
    }

    impl UciSink for RecordingSink {
        fn emit(&self, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
        }
    }

    struct Harness {
        engine: Arc<Engine>,
        radio: Arc<RecordingRadio>,
        sink: Arc<RecordingSink>,
        _dir: tempfile::TempDir,
    }

    fn harness(auto_accept: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            auto_accept,
            move_response_wait_seconds: 1,
            max_retries: 1,
            ..Config::default()
        };
        let radio = Arc::new(RecordingRadio {
            sent: StdMutex::new(Vec::new()),
        });
        let sink = Arc::new(RecordingSink {
            lines: StdMutex::new(Vec::new()),
        });
        let engine = Arc::new(Engine::new(
            cfg,
            dir.path().to_path_buf(),
            radio.clone(),
            sink.clone(),
        ));
        Harness {
            engine,
            radio,
            sink,
            _dir: dir,
        }
    }

    impl Harness {
        fn sent(&self) -> Vec<String> {
            self.radio
                .sent
                .lock()
                .unwrap()
                .iter()
                .map(|(_, text)| text.clone())
                .collect()
        }

        fn uci_lines(&self) -> Vec<String> {
            self.sink.lines.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn uci_handshake() {
        let h = harness(true);
        assert!(h.engine.handle_command("uci"));
        assert!(h.engine.handle_command("isready"));
        assert_eq!(
            h.uci_lines(),
            ["id name JS8Chess", "id author JS8Chess Project", "uciok", "readyok"]
        );
    }

    #[tokio::test]
    async fn quit_returns_false() {
        let h = harness(true);
        assert!(!h.engine.handle_command("quit"));
    }

    #[tokio::test]
    async fn position_records_lowercased_moves() {
        let h = harness(true);
        h.engine
            .handle_command("position startpos moves E2E4 e7e5");
        assert_eq!(
            h.engine.lock_core().position_moves,
            ["e2e4", "e7e5"]
        );
    }

    #[tokio::test]
    async fn send_proposal_moves_to_proposal_sent() {
        let h = harness(true);
        h.engine.send_new_proposal(WireColor::White).await;
        assert_eq!(h.engine.state(), EngineState::ProposalSent);
        assert_eq!(h.sent(), ["SWL CALLSIGN JS8CHESS NEW W"]);
    }

    #[tokio::test]
    async fn acceptance_without_proposal_is_ignored() {
        let h = harness(true);
        h.engine
            .handle_radio_text("SWL", "CALLSIGN", "SWL CALLSIGN JS8CHESS 202506011430 B")
            .await;
        assert_eq!(h.engine.state(), EngineState::NoGame);
    }

    #[tokio::test]
    async fn acceptance_activates_proposed_game() {
        let h = harness(true);
        h.engine.send_new_proposal(WireColor::White).await;
        h.engine
            .handle_radio_text("SWL", "CALLSIGN", "SWL CALLSIGN JS8CHESS 202506011430 B")
            .await;
        assert_eq!(h.engine.state(), EngineState::GameActive);
        let (game_id, local_color, plies) = h.engine.game_status().unwrap();
        assert_eq!(game_id, "202506011430");
        assert_eq!(local_color, Color::White);
        assert_eq!(plies, 0);
    }

    #[tokio::test]
    async fn proposal_not_auto_accepted_returns_to_no_game() {
        let h = harness(false);
        h.engine
            .handle_radio_text("SWL", "CALLSIGN", "SWL CALLSIGN JS8CHESS NEW W")
            .await;
        assert_eq!(h.engine.state(), EngineState::NoGame);
        assert!(h.sent().is_empty());
        assert!(
            h.uci_lines()
                .iter()
                .any(|line| line.contains("auto_accept"))
        );
    }

    #[tokio::test]
    async fn proposal_while_active_is_ignored() {
        let h = harness(true);
        h.engine
            .handle_radio_text("SWL", "CALLSIGN", "SWL CALLSIGN JS8CHESS NEW W")
            .await;
        assert_eq!(h.engine.state(), EngineState::GameActive);
        let before = h.engine.game_status().unwrap().0;
        h.engine
            .handle_radio_text("SWL", "CALLSIGN", "SWL CALLSIGN JS8CHESS NEW B")
            .await;
        assert_eq!(h.engine.game_status().unwrap().0, before);
    }

    #[tokio::test]
    async fn ucinewgame_clears_session() {
        let h = harness(true);
        h.engine
            .handle_radio_text("SWL", "CALLSIGN", "SWL CALLSIGN JS8CHESS NEW W")
            .await;
        assert_eq!(h.engine.state(), EngineState::GameActive);
        h.engine.handle_command("ucinewgame");
        assert_eq!(h.engine.state(), EngineState::NoGame);
        assert!(h.engine.game_status().is_none());
    }

    #[tokio::test]
    async fn resync_outside_active_game_reports_no_session() {
        let h = harness(true);
        h.engine
            .handle_radio_text(
                "SWL",
                "CALLSIGN",
                "SWL CALLSIGN JS8CHESS RS 202506011430 MN=3",
            )
            .await;
        assert_eq!(h.sent(), ["SWL CALLSIGN JS8CHESS ERR03 >"]);
    }
}
