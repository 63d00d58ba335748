//! Game state management: board, move history, PGN persistence, and resync.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use shakmaty::san::SanPlus;
use shakmaty::{Chess, Color, File, Move, Outcome, Position, Role, Square};

/// One applied half-move, kept in both notations: coordinate for the wire,
/// SAN for the PGN document.
#[derive(Debug, Clone)]
struct PlayedMove {
    coord: String,
    san: String,
}

/// Maintains authoritative game state for one radio game.
///
/// Move numbering is a plain sequential ply count starting at 1: White's
/// first move is 1, Black's reply is 2, White's second move is 3, and so on.
/// This numbering goes on the wire and is not conventional chess numbering.
pub struct GameSession {
    /// Canonical 12-digit timestamp minted at acceptance.
    pub game_id: String,
    pub local_callsign: String,
    pub remote_callsign: String,
    pub local_color: Color,
    board: Chess,
    moves: Vec<PlayedMove>,
    result: String,
    pgn_path: PathBuf,
}

impl GameSession {
    pub fn new(
        game_id: &str,
        local_callsign: &str,
        remote_callsign: &str,
        local_color: Color,
        pgn_dir: &Path,
    ) -> anyhow::Result<GameSession> {
        fs::create_dir_all(pgn_dir)
            .with_context(|| format!("could not create {}", pgn_dir.display()))?;
        let remote = remote_callsign.to_uppercase();
        let pgn_path = pgn_dir.join(format!("{remote}-{game_id}.pgn"));
        Ok(GameSession {
            game_id: game_id.to_string(),
            local_callsign: local_callsign.to_uppercase(),
            remote_callsign: remote,
            local_color,
            board: Chess::default(),
            moves: Vec::new(),
            result: "*".into(),
            pgn_path,
        })
    }

    pub fn remote_color(&self) -> Color {
        self.local_color.other()
    }

    /// Next expected OTA move number (1-based sequential ply count).
    pub fn expected_move_num(&self) -> u32 {
        self.moves.len() as u32 + 1
    }

    pub fn ply_count(&self) -> usize {
        self.moves.len()
    }

    pub fn is_local_turn(&self) -> bool {
        self.board.turn() == self.local_color
    }

    pub fn is_remote_turn(&self) -> bool {
        self.board.turn() == self.remote_color()
    }

    /// All played moves as lowercase coordinate strings, in order.
    pub fn move_list(&self) -> Vec<String> {
        self.moves.iter().map(|m| m.coord.clone()).collect()
    }

    pub fn pgn_path(&self) -> &Path {
        &self.pgn_path
    }

    /// Board outcome once the game has ended.
    pub fn outcome(&self) -> Option<Outcome> {
        self.board.outcome()
    }

    /// True if the string parses as coordinate notation and is legal in the
    /// current position.
    pub fn validate_move(&self, coord: &str) -> bool {
        find_coordinate_move(&self.board, coord).is_some()
    }

    /// Applies a move to the board and the PGN document, flushing the
    /// document to disk. Returns false when the move is unparsable or
    /// illegal; a failed apply leaves all state untouched.
    pub fn apply_move(&mut self, coord: &str) -> bool {
        let Some(m) = find_coordinate_move(&self.board, coord) else {
            tracing::warn!(coord, "illegal move rejected");
            return false;
        };
        let coord = coordinate(&m);
        let san = SanPlus::from_move_and_play_unchecked(&mut self.board, &m);
        self.moves.push(PlayedMove {
            coord: coord.clone(),
            san: san.to_string(),
        });
        self.save_pgn();
        tracing::info!(%coord, ply = self.moves.len(), "move applied");
        true
    }

    /// Records the game result (`*`, `1-0`, `0-1`, `1/2-1/2`) and flushes.
    pub fn set_result(&mut self, result: &str) {
        self.result = result.to_string();
        self.save_pgn();
    }

    /// Reloads the PGN from disk and restores the board to the state after
    /// exactly `target_ply` plies. Returns false, leaving state unchanged,
    /// when the file is missing, malformed, or holds fewer plies.
    pub fn restore_to_ply(&mut self, target_ply: usize) -> bool {
        let raw = match fs::read_to_string(&self.pgn_path) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::error!(path = %self.pgn_path.display(), ?err, "PGN not readable for resync");
                return false;
            }
        };

        let mut board = Chess::default();
        let mut moves = Vec::new();
        for token in movetext_tokens(&raw) {
            if moves.len() >= target_ply {
                break;
            }
            let Ok(san) = token.parse::<SanPlus>() else {
                tracing::error!(token, "unparsable SAN in PGN");
                return false;
            };
            let Ok(m) = san.san.to_move(&board) else {
                tracing::error!(token, "SAN not playable during replay");
                return false;
            };
            let coord = coordinate(&m);
            let san = SanPlus::from_move_and_play_unchecked(&mut board, &m);
            moves.push(PlayedMove {
                coord,
                san: san.to_string(),
            });
        }
        if moves.len() < target_ply {
            tracing::error!(
                have = moves.len(),
                want = target_ply,
                "PGN holds fewer plies than requested"
            );
            return false;
        }

        self.board = board;
        self.moves = moves;
        tracing::info!(ply = target_ply, "resync restore complete");
        true
    }

    fn save_pgn(&self) {
        if let Err(err) = fs::write(&self.pgn_path, self.render_pgn()) {
            tracing::error!(path = %self.pgn_path.display(), ?err, "PGN save failed");
        }
    }

    fn render_pgn(&self) -> String {
        let (white, black) = match self.local_color {
            Color::White => (&self.local_callsign, &self.remote_callsign),
            Color::Black => (&self.remote_callsign, &self.local_callsign),
        };
        let date = if self.game_id.len() >= 8 {
            format!(
                "{}.{}.{}",
                &self.game_id[..4],
                &self.game_id[4..6],
                &self.game_id[6..8]
            )
        } else {
            "????.??.??".into()
        };

        let mut out = String::new();
        out.push_str("[Event \"JS8Chess Radio Game\"]\n");
        out.push_str(&format!("[Date \"{date}\"]\n"));
        out.push_str(&format!("[White \"{white}\"]\n"));
        out.push_str(&format!("[Black \"{black}\"]\n"));
        out.push_str(&format!("[Result \"{}\"]\n", self.result));
        out.push('\n');

        let mut line = String::new();
        for (index, m) in self.moves.iter().enumerate() {
            if index % 2 == 0 {
                line.push_str(&format!("{}. ", index / 2 + 1));
            }
            line.push_str(&m.san);
            line.push(' ');
        }
        line.push_str(&self.result);
        out.push_str(line.trim_end());
        out.push('\n');
        out
    }
}

/// The movetext of a PGN document: every token that is neither a header
/// line, a move number, nor a result marker.
fn movetext_tokens(raw: &str) -> impl Iterator<Item = &str> {
    raw.lines()
        .filter(|line| !line.trim_start().starts_with('['))
        .flat_map(str::split_whitespace)
        .filter(|token| {
            !token.ends_with('.') && !matches!(*token, "*" | "1-0" | "0-1" | "1/2-1/2")
        })
}

/// Finds the legal move matching lowercase coordinate notation, covering
/// castling (`e1g1`), en passant and promotions.
fn find_coordinate_move(board: &Chess, coord: &str) -> Option<Move> {
    let coord = coord.to_lowercase();
    let bytes = coord.as_bytes();
    if bytes.len() < 4 || bytes.len() > 5 {
        return None;
    }
    let from = Square::from_ascii(&bytes[..2]).ok()?;
    let to = Square::from_ascii(&bytes[2..4]).ok()?;
    let promotion = if bytes.len() == 5 {
        Some(match bytes[4] {
            b'q' => Role::Queen,
            b'r' => Role::Rook,
            b'b' => Role::Bishop,
            b'n' => Role::Knight,
            _ => return None,
        })
    } else {
        None
    };

    board.legal_moves().into_iter().find(|m| match m {
        Move::Castle { king, rook } => {
            promotion.is_none() && *king == from && castle_target(*king, *rook) == to
        }
        _ => m.from() == Some(from) && m.to() == to && m.promotion() == promotion,
    })
}

/// Destination square of the king, as coordinate notation writes castling.
fn castle_target(king: Square, rook: Square) -> Square {
    let file = if rook.file() > king.file() {
        File::G
    } else {
        File::C
    };
    Square::from_coords(file, king.rank())
}

/// Renders a move in lowercase coordinate notation.
fn coordinate(m: &Move) -> String {
    match m {
        Move::Castle { king, rook } => format!("{}{}", king, castle_target(*king, *rook)),
        _ => {
            let mut out = String::new();
            if let Some(from) = m.from() {
                out.push_str(&from.to_string());
            }
            out.push_str(&m.to().to_string());
            if let Some(role) = m.promotion() {
                out.push(role.char());
            }
            out
        }
    }
}

/// The PGN result token for a finished game.
pub fn result_string(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Decisive {
            winner: Color::White,
        } => "1-0",
        Outcome::Decisive {
            winner: Color::Black,
        } => "0-1",
        Outcome::Draw => "1/2-1/2",
    }
}
