//! Request routing and game-control handlers.
//!
//! The router is the only place that reads wire messages and produces wire
//! replies. Each handler consults the registries, mutates state under their
//! locks, and sends replies only after every lock is released. Failures
//! either map to a domain reply (`REGISTER_FAIL`, `MOVE_INVALID`, …) inside
//! the handler or bubble up as a [`RequestError`], which the dispatcher turns
//! into the uniform `ERROR {reason}` message.

use crate::matches::{ColorAssignment, Participant, RecentMatch};
use crate::protocol::{self, Envelope, RequestError};
use crate::rules;
use crate::server::Server;
use crate::sessions;
use crate::types::{Color, PieceKind, SessionState, Square, Verdict};
use crate::users::{self, RegisterError};
use serde_json::{Value, json};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Parses one request line and runs the matching handler. All error paths
/// end in a reply to the sender; the connection stays up.
pub async fn handle_message(server: &Arc<Server>, slot: usize, line: &str) {
    let (action, data) = match protocol::parse_line(line) {
        Ok(parsed) => parsed,
        Err(e) => {
            let _ = server.sessions.send(slot, &Envelope::error(&e.to_string())).await;
            return;
        }
    };

    log::debug!("[slot {slot}] action: {action}");

    if let Err(e) = dispatch(server, slot, &action, &data).await {
        let _ = server.sessions.send(slot, &Envelope::error(&e.to_string())).await;
    }
}

async fn dispatch(
    server: &Arc<Server>,
    slot: usize,
    action: &str,
    data: &Value,
) -> Result<(), RequestError> {
    // Everything except registration, login, and heartbeat requires a login
    // bound to this session.
    if !matches!(action, "REGISTER" | "LOGIN" | "PING")
        && server.sessions.username_of(slot).is_none()
    {
        return Err(RequestError::NotLoggedIn);
    }

    match action {
        "REGISTER" => handle_register(server, slot, data).await,
        "LOGIN" => handle_login(server, slot, data).await,
        "REQUEST_PLAYER_LIST" => handle_player_list(server, slot).await,
        "GET_PROFILE" => handle_get_profile(server, slot, data).await,
        "CHALLENGE" => handle_challenge(server, slot, data).await,
        "ACCEPT" => handle_accept(server, slot, data).await,
        "DECLINE" => handle_decline(server, slot, data).await,
        "MOVE" => handle_move(server, slot, data).await,
        "GET_VALID_MOVES" => handle_get_valid_moves(server, slot, data).await,
        "FIND_MATCH" => handle_find_match(server, slot).await,
        "CANCEL_FIND_MATCH" => handle_cancel_find_match(server, slot).await,
        "OFFER_ABORT" => handle_offer_abort(server, slot, data).await,
        "ACCEPT_ABORT" | "DECLINE_ABORT" => Err(RequestError::AbortNegotiation),
        "OFFER_DRAW" => handle_offer_draw(server, slot, data).await,
        "ACCEPT_DRAW" => handle_accept_draw(server, slot, data).await,
        "DECLINE_DRAW" => handle_decline_draw(server, slot, data).await,
        "OFFER_REMATCH" => handle_offer_rematch(server, slot, data).await,
        "ACCEPT_REMATCH" => handle_accept_rematch(server, slot, data).await,
        "DECLINE_REMATCH" => handle_decline_rematch(server, slot, data).await,
        "GET_MATCH_HISTORY" => handle_get_match_history(server, slot, data).await,
        "GET_MATCH_REPLAY" => handle_get_match_replay(server, slot, data).await,
        "PING" => {
            server
                .sessions
                .send(slot, &Envelope::new("PONG", json!({})))
                .await
                .ok();
            Ok(())
        }
        _ => Err(RequestError::UnknownAction),
    }
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

async fn handle_register(
    server: &Arc<Server>,
    slot: usize,
    data: &Value,
) -> Result<(), RequestError> {
    let creds: protocol::Credentials = protocol::payload(data, "username or password")?;

    let reply = match server.users.register(&creds.username, &creds.password) {
        Ok(()) => Envelope::new("REGISTER_SUCCESS", json!({ "message": "Account created" })),
        Err(e @ (RegisterError::UsernameTaken | RegisterError::InvalidUsername)) => {
            Envelope::new("REGISTER_FAIL", json!({ "reason": e.to_string() }))
        }
        Err(RegisterError::CapacityFull) => return Err(RequestError::ServerFull),
        Err(RegisterError::Io(e)) => {
            log::error!("Failed to persist new user: {e}");
            return Err(RequestError::Storage);
        }
    };

    server.sessions.send(slot, &reply).await.ok();
    Ok(())
}

async fn handle_login(
    server: &Arc<Server>,
    slot: usize,
    data: &Value,
) -> Result<(), RequestError> {
    let creds: protocol::Credentials = protocol::payload(data, "username or password")?;

    // One login per connection; the account-level check runs in the store.
    if server.sessions.username_of(slot).is_some() {
        let reply = Envelope::new("LOGIN_FAIL", json!({ "reason": "Already logged in" }));
        server.sessions.send(slot, &reply).await.ok();
        return Ok(());
    }

    let reply = match server.users.login(&creds.username, &creds.password) {
        Ok(snapshot) => {
            let session_id = sessions::generate_session_id();
            server.sessions.bind_login(slot, &creds.username, &session_id);
            Envelope::new(
                "LOGIN_SUCCESS",
                json!({
                    "sessionId": session_id,
                    "username": snapshot.username,
                    "elo": snapshot.elo,
                    "wins": snapshot.wins,
                    "losses": snapshot.losses,
                    "draws": snapshot.draws,
                }),
            )
        }
        Err(e) => Envelope::new("LOGIN_FAIL", json!({ "reason": e.to_string() })),
    };

    server.sessions.send(slot, &reply).await.ok();
    Ok(())
}

// ---------------------------------------------------------------------------
// Read-only queries
// ---------------------------------------------------------------------------

async fn handle_player_list(server: &Arc<Server>, slot: usize) -> Result<(), RequestError> {
    let players: Vec<Value> = server
        .sessions
        .logged_in_players(slot)
        .into_iter()
        .map(|p| {
            let (wins, losses) = server
                .users
                .find(&p.username)
                .map_or((0, 0), |u| (u.wins, u.losses));
            json!({
                "username": p.username,
                "status": p.state.as_str(),
                "wins": wins,
                "losses": losses,
            })
        })
        .collect();

    let reply = Envelope::new("PLAYER_LIST", json!({ "players": players }));
    server.sessions.send(slot, &reply).await.ok();
    Ok(())
}

async fn handle_get_profile(
    server: &Arc<Server>,
    slot: usize,
    data: &Value,
) -> Result<(), RequestError> {
    let req: protocol::ProfileRequest = protocol::payload(data, "username field")?;

    let reply = match server.users.find(&req.username) {
        Some(u) => Envelope::new(
            "PROFILE_INFO",
            json!({
                "username": u.username,
                "elo": u.elo,
                "wins": u.wins,
                "losses": u.losses,
                "draws": u.draws,
                "online": u.online,
            }),
        ),
        None => Envelope::new("PROFILE_ERROR", json!({ "reason": "User not found" })),
    };

    server.sessions.send(slot, &reply).await.ok();
    Ok(())
}

async fn handle_get_match_history(
    server: &Arc<Server>,
    slot: usize,
    data: &Value,
) -> Result<(), RequestError> {
    // An absent payload or username means the requester's own history.
    let req: protocol::HistoryRequest = if data.is_null() {
        protocol::HistoryRequest::default()
    } else {
        protocol::payload(data, "username field")?
    };
    let target = match req.username {
        Some(name) => name,
        None => server
            .sessions
            .username_of(slot)
            .ok_or(RequestError::NotLoggedIn)?,
    };

    let matches = server.recorder.history_for(&target);
    let reply = Envelope::new(
        "MATCH_HISTORY",
        json!({ "username": target, "matches": matches }),
    );
    server.sessions.send(slot, &reply).await.ok();
    Ok(())
}

async fn handle_get_match_replay(
    server: &Arc<Server>,
    slot: usize,
    data: &Value,
) -> Result<(), RequestError> {
    let req: protocol::MatchRef = protocol::payload(data, "matchId")?;
    let record = server
        .recorder
        .load_replay(&req.match_id)
        .ok_or(RequestError::MatchNotFound)?;

    let reply = Envelope::new("MATCH_REPLAY", record);
    server.sessions.send(slot, &reply).await.ok();
    Ok(())
}

// ---------------------------------------------------------------------------
// Challenges
// ---------------------------------------------------------------------------

async fn handle_challenge(
    server: &Arc<Server>,
    slot: usize,
    data: &Value,
) -> Result<(), RequestError> {
    let req: protocol::ChallengeRef = protocol::payload(data, "from or to field")?;

    let me = server
        .sessions
        .username_of(slot)
        .ok_or(RequestError::NotLoggedIn)?;
    if me != req.from {
        return Err(RequestError::UsernameMismatch);
    }

    let opponent_slot = server
        .sessions
        .find_by_username(&req.to)
        .ok_or(RequestError::OpponentOffline)?;
    if server.sessions.state_of(opponent_slot) != Some(SessionState::Online) {
        return Err(RequestError::OpponentBusy);
    }

    let challenge = Envelope::new("INCOMING_CHALLENGE", json!({ "from": req.from }));
    server.sessions.send(opponent_slot, &challenge).await.ok();
    log::info!("{} challenged {}", me, req.to);
    Ok(())
}

async fn handle_accept(
    server: &Arc<Server>,
    slot: usize,
    data: &Value,
) -> Result<(), RequestError> {
    let req: protocol::ChallengeRef = protocol::payload(data, "from or to field")?;

    let me = server
        .sessions
        .username_of(slot)
        .ok_or(RequestError::NotLoggedIn)?;
    let challenger_slot = server
        .sessions
        .find_by_username(&req.to)
        .ok_or(RequestError::ChallengerNotFound)?;

    log::info!("{} accepted challenge from {}", me, req.to);
    start_match(
        server,
        Participant {
            slot: challenger_slot,
            username: req.to,
        },
        Participant {
            slot,
            username: me,
        },
        ColorAssignment::Coin,
    )
    .await?;
    Ok(())
}

async fn handle_decline(
    server: &Arc<Server>,
    _slot: usize,
    data: &Value,
) -> Result<(), RequestError> {
    let req: protocol::ChallengeRef = protocol::payload(data, "from or to field")?;

    if let Some(challenger_slot) = server.sessions.find_by_username(&req.to) {
        let decline = Envelope::new("CHALLENGE_DECLINED", json!({ "from": req.from }));
        server.sessions.send(challenger_slot, &decline).await.ok();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Match creation
// ---------------------------------------------------------------------------

/// Creates a match between two sessions and runs the start sequence: record,
/// mark both sessions in-match, announce `START_GAME` to both.
///
/// With [`ColorAssignment::Fixed`] participant `a` plays White and the game
/// is announced as a rematch.
pub async fn start_match(
    server: &Arc<Server>,
    a: Participant,
    b: Participant,
    assignment: ColorAssignment,
) -> Result<usize, RequestError> {
    let (idx, m) = server
        .matches
        .create(a, b, assignment)
        .ok_or(RequestError::NoMatchSlot)?;

    // A player entering a match leaves the matchmaking pool.
    server.queue.dequeue(m.white_slot);
    server.queue.dequeue(m.black_slot);

    server.recorder.start(&m.match_id);
    server.sessions.set_state(m.white_slot, SessionState::InMatch);
    server.sessions.set_state(m.black_slot, SessionState::InMatch);

    let mut data = json!({
        "matchId": m.match_id,
        "white": m.white,
        "black": m.black,
        "board": m.position.board.to_wire_string(),
    });
    if assignment == ColorAssignment::Fixed {
        data["isRematch"] = json!(true);
    }
    let start = Envelope::new("START_GAME", data);
    server.sessions.send(m.white_slot, &start).await.ok();
    server.sessions.send(m.black_slot, &start).await.ok();

    Ok(idx)
}

// ---------------------------------------------------------------------------
// Moves
// ---------------------------------------------------------------------------

/// What the first locked phase of move handling decided.
enum MoveOutcome {
    /// Rejected with a `MOVE_INVALID` reason.
    Rejected(&'static str),
    /// Applied; carries the opponent's slot for the notification.
    Applied { opponent_slot: usize },
}

async fn handle_move(server: &Arc<Server>, slot: usize, data: &Value) -> Result<(), RequestError> {
    let req: protocol::MoveRequest = protocol::payload(data, "matchId, from, or to field")?;

    let idx = server
        .matches
        .find_by_id(&req.match_id)
        .ok_or(RequestError::MatchNotFound)?;

    // Unrecognized promotion letters fall back to the queen default.
    let promotion: Option<PieceKind> = req
        .promotion
        .as_deref()
        .and_then(|p| p.chars().next())
        .and_then(PieceKind::from_promotion_letter);

    // Phase one, under the match lock: validate, apply, advance the turn.
    let outcome = server
        .matches
        .with_match(idx, |m| {
            let Some(color) = m.color_of_slot(slot) else {
                return Err(RequestError::NotInMatch);
            };
            if m.position.side_to_move != color {
                return Ok(MoveOutcome::Rejected("Not your turn"));
            }

            let (from, to) = match (
                Square::from_notation(&req.from),
                Square::from_notation(&req.to),
            ) {
                (Some(from), Some(to)) => (from, to),
                _ => return Ok(MoveOutcome::Rejected("Invalid notation")),
            };

            if !rules::is_legal_move(&m.position, from, to, color) {
                return Ok(MoveOutcome::Rejected("Illegal move"));
            }

            let applied = rules::apply_move(&mut m.position, from, to, promotion);
            if applied.was_pawn_move || applied.was_capture {
                m.position.halfmove_clock = 0;
            } else {
                m.position.halfmove_clock += 1;
            }
            m.position.side_to_move = color.opponent();
            if m.position.side_to_move == Color::White {
                m.position.fullmove_number += 1;
            }

            Ok(MoveOutcome::Applied {
                opponent_slot: m.opponent_slot(slot).unwrap_or(slot),
            })
        })
        .ok_or(RequestError::MatchNotFound)??;

    let opponent_slot = match outcome {
        MoveOutcome::Rejected(reason) => {
            let invalid = Envelope::new("MOVE_INVALID", json!({ "reason": reason }));
            server.sessions.send(slot, &invalid).await.ok();
            return Ok(());
        }
        MoveOutcome::Applied { opponent_slot } => opponent_slot,
    };

    server.recorder.record_move(&req.match_id, &req.from, &req.to);

    let payload = json!({ "from": req.from, "to": req.to });
    let move_ok = Envelope::new("MOVE_OK", payload.clone());
    server.sessions.send(slot, &move_ok).await.ok();
    let opp_move = Envelope::new("OPPONENT_MOVE", payload);
    server.sessions.send(opponent_slot, &opp_move).await.ok();

    log::info!("Move in match {}: {} -> {}", req.match_id, req.from, req.to);

    // Phase two: re-acquire the match and look for a terminal state.
    let ended = server
        .matches
        .with_match(idx, |m| {
            let verdict = rules::check_game_end(&m.position);
            (verdict, m.white.clone(), m.black.clone())
        });
    if let Some((verdict, white, black)) = ended {
        match verdict {
            Verdict::Checkmate { winner } => {
                let winner_name = match winner {
                    Color::White => white,
                    Color::Black => black,
                };
                terminal_flow(server, idx, &winner_name, "Checkmate").await;
            }
            Verdict::Stalemate => {
                terminal_flow(server, idx, users::WINNER_DRAW, "Stalemate").await;
            }
            Verdict::InsufficientMaterial => {
                terminal_flow(server, idx, users::WINNER_DRAW, "Insufficient material").await;
            }
            Verdict::Ongoing => {}
        }
    }

    Ok(())
}

async fn handle_get_valid_moves(
    server: &Arc<Server>,
    slot: usize,
    data: &Value,
) -> Result<(), RequestError> {
    let req: protocol::ValidMovesRequest = protocol::payload(data, "matchId or position")?;

    let idx = server
        .matches
        .find_by_id(&req.match_id)
        .ok_or(RequestError::MatchNotFound)?;

    let moves = server
        .matches
        .with_match(idx, |m| {
            let color = m.color_of_slot(slot).ok_or(RequestError::NotInMatch)?;
            let from =
                Square::from_notation(&req.position).ok_or(RequestError::InvalidPosition)?;

            match m.position.board.get(from) {
                // An empty square yields an empty list, not an error.
                None => Ok(Vec::new()),
                Some(p) if p.color != color => Err(RequestError::NotYourPiece),
                // Computed regardless of whose turn it is.
                Some(_) => Ok(rules::valid_moves_from(&m.position, from, color)),
            }
        })
        .ok_or(RequestError::MatchNotFound)??;

    let moves: Vec<String> = moves
        .into_iter()
        .map(|sq| sq.to_notation().to_lowercase())
        .collect();
    let reply = Envelope::new(
        "VALID_MOVES",
        json!({ "position": req.position, "moves": moves }),
    );
    server.sessions.send(slot, &reply).await.ok();
    Ok(())
}

// ---------------------------------------------------------------------------
// Terminal flow
// ---------------------------------------------------------------------------

/// Transitions a live match to finished: removes it from the registry, frees
/// both players, announces `GAME_RESULT`, persists or discards the recording,
/// and applies ratings. `winner` is a username, `"DRAW"`, or `"ABORT"` (which
/// skips persistence, the rating update, and the rematch window).
pub async fn terminal_flow(server: &Arc<Server>, match_idx: usize, winner: &str, reason: &str) {
    let aborted = winner == users::WINNER_ABORT;
    let Some(finished) = server.matches.finish(match_idx, !aborted) else {
        return;
    };

    server
        .sessions
        .set_state(finished.white_slot, SessionState::Online);
    server
        .sessions
        .set_state(finished.black_slot, SessionState::Online);

    let result = Envelope::new(
        "GAME_RESULT",
        json!({
            "winner": winner,
            "reason": reason,
            "matchId": finished.match_id,
        }),
    );
    server.sessions.send(finished.white_slot, &result).await.ok();
    server.sessions.send(finished.black_slot, &result).await.ok();

    if aborted {
        server.recorder.discard(&finished.match_id);
    } else if let Err(e) = server.recorder.finalize(
        &finished.match_id,
        &finished.white,
        &finished.black,
        winner,
        reason,
        &finished.position.board.to_wire_string(),
    ) {
        log::error!("Failed to save history for {}: {e}", finished.match_id);
    }

    if let Err(e) = server
        .users
        .apply_result(&finished.white, &finished.black, winner)
    {
        log::error!("Failed to persist rating update: {e}");
    }

    log::info!(
        "Match {} ended. Winner: {winner} ({reason})",
        finished.match_id
    );
}

// ---------------------------------------------------------------------------
// Resignation & draws
// ---------------------------------------------------------------------------

/// Resolves a game-control request to (match index, own color, opponent
/// slot), verifying the sender participates in the match.
fn locate_participant(
    server: &Arc<Server>,
    slot: usize,
    match_id: &str,
) -> Result<(usize, Color, usize), RequestError> {
    let idx = server
        .matches
        .find_by_id(match_id)
        .ok_or(RequestError::MatchNotFound)?;
    server
        .matches
        .with_match(idx, |m| {
            let color = m.color_of_slot(slot).ok_or(RequestError::NotInMatch)?;
            Ok((idx, color, m.opponent_slot(slot).unwrap_or(slot)))
        })
        .ok_or(RequestError::MatchNotFound)?
}

async fn handle_offer_abort(
    server: &Arc<Server>,
    slot: usize,
    data: &Value,
) -> Result<(), RequestError> {
    let req: protocol::MatchRef = protocol::payload(data, "matchId")?;
    let (idx, color, _) = locate_participant(server, slot, &req.match_id)?;

    // Resignation is immediate: the opponent wins on the spot.
    let winner = server
        .matches
        .with_match(idx, |m| m.player_of(color.opponent()).to_string())
        .ok_or(RequestError::MatchNotFound)?;

    terminal_flow(server, idx, &winner, "Opponent resigned").await;
    Ok(())
}

async fn handle_offer_draw(
    server: &Arc<Server>,
    slot: usize,
    data: &Value,
) -> Result<(), RequestError> {
    let req: protocol::MatchRef = protocol::payload(data, "matchId")?;
    let (idx, color, opponent_slot) = locate_participant(server, slot, &req.match_id)?;

    let from = server
        .matches
        .with_match(idx, |m| m.player_of(color).to_string())
        .ok_or(RequestError::MatchNotFound)?;

    // Offers are transient: nothing is stored, a repeat offer re-notifies.
    let offer = Envelope::new(
        "DRAW_OFFERED",
        json!({ "matchId": req.match_id, "from": from }),
    );
    server.sessions.send(opponent_slot, &offer).await.ok();
    Ok(())
}

async fn handle_accept_draw(
    server: &Arc<Server>,
    slot: usize,
    data: &Value,
) -> Result<(), RequestError> {
    let req: protocol::MatchRef = protocol::payload(data, "matchId")?;
    let (idx, _, _) = locate_participant(server, slot, &req.match_id)?;

    terminal_flow(server, idx, users::WINNER_DRAW, "Draw by agreement").await;
    Ok(())
}

async fn handle_decline_draw(
    server: &Arc<Server>,
    slot: usize,
    data: &Value,
) -> Result<(), RequestError> {
    let req: protocol::MatchRef = protocol::payload(data, "matchId")?;
    let (_, _, opponent_slot) = locate_participant(server, slot, &req.match_id)?;

    let decline = Envelope::new("DRAW_DECLINED", json!({ "matchId": req.match_id }));
    server.sessions.send(opponent_slot, &decline).await.ok();
    Ok(())
}

// ---------------------------------------------------------------------------
// Rematch
// ---------------------------------------------------------------------------

/// The sender's view of a rematch-window entry: the other party's recorded
/// name and slot.
fn rematch_counterpart(entry: &RecentMatch, me: &str) -> Option<(String, usize)> {
    if entry.white == me {
        Some((entry.black.clone(), entry.black_slot))
    } else if entry.black == me {
        Some((entry.white.clone(), entry.white_slot))
    } else {
        None
    }
}

async fn handle_offer_rematch(
    server: &Arc<Server>,
    slot: usize,
    data: &Value,
) -> Result<(), RequestError> {
    let req: protocol::MatchRef = protocol::payload(data, "matchId")?;
    let me = server
        .sessions
        .username_of(slot)
        .ok_or(RequestError::NotLoggedIn)?;

    let idx = server
        .matches
        .recent_find(&req.match_id)
        .ok_or(RequestError::RematchUnavailable)?;

    let counterpart = server
        .matches
        .with_recent(idx, |r| {
            let counterpart = rematch_counterpart(r, &me)?;
            r.rematch_offered_by = Some(slot);
            Some(counterpart)
        })
        .ok_or(RequestError::RematchUnavailable)?
        .ok_or(RequestError::NotInMatch)?;

    let (other_name, other_slot) = counterpart;
    if !server.sessions.is_live(other_slot, &other_name) {
        return Err(RequestError::RematchOpponentGone);
    }

    let offer = Envelope::new(
        "REMATCH_OFFERED",
        json!({ "matchId": req.match_id, "from": me }),
    );
    server.sessions.send(other_slot, &offer).await.ok();
    Ok(())
}

async fn handle_accept_rematch(
    server: &Arc<Server>,
    slot: usize,
    data: &Value,
) -> Result<(), RequestError> {
    let req: protocol::MatchRef = protocol::payload(data, "matchId")?;
    let me = server
        .sessions
        .username_of(slot)
        .ok_or(RequestError::NotLoggedIn)?;

    let idx = server
        .matches
        .recent_find(&req.match_id)
        .ok_or(RequestError::RematchUnavailable)?;

    let entry = server
        .matches
        .with_recent(idx, |r| r.clone())
        .ok_or(RequestError::RematchUnavailable)?;
    if rematch_counterpart(&entry, &me).is_none() {
        return Err(RequestError::NotInMatch);
    }

    // Answered either way: the window entry is spent.
    server.matches.recent_invalidate(idx);

    // Both players must still be connected under the recorded slots, logged
    // in as the recorded users, and free.
    let both_ready = [
        (entry.white_slot, entry.white.as_str()),
        (entry.black_slot, entry.black.as_str()),
    ]
    .iter()
    .all(|&(s, name)| {
        server.sessions.is_live(s, name)
            && server.sessions.state_of(s) == Some(SessionState::Online)
    });
    if !both_ready {
        return Err(RequestError::RematchOpponentGone);
    }

    // Colors swap: last game's Black takes White.
    start_match(
        server,
        Participant {
            slot: entry.black_slot,
            username: entry.black,
        },
        Participant {
            slot: entry.white_slot,
            username: entry.white,
        },
        ColorAssignment::Fixed,
    )
    .await?;
    Ok(())
}

async fn handle_decline_rematch(
    server: &Arc<Server>,
    slot: usize,
    data: &Value,
) -> Result<(), RequestError> {
    let req: protocol::MatchRef = protocol::payload(data, "matchId")?;
    let me = server
        .sessions
        .username_of(slot)
        .ok_or(RequestError::NotLoggedIn)?;

    let idx = server
        .matches
        .recent_find(&req.match_id)
        .ok_or(RequestError::RematchUnavailable)?;

    let entry = server
        .matches
        .with_recent(idx, |r| r.clone())
        .ok_or(RequestError::RematchUnavailable)?;
    let (other_name, other_slot) =
        rematch_counterpart(&entry, &me).ok_or(RequestError::NotInMatch)?;

    server.matches.recent_invalidate(idx);

    if server.sessions.is_live(other_slot, &other_name) {
        let decline = Envelope::new("REMATCH_DECLINED", json!({ "matchId": req.match_id }));
        server.sessions.send(other_slot, &decline).await.ok();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Matchmaking entry points
// ---------------------------------------------------------------------------

async fn handle_find_match(server: &Arc<Server>, slot: usize) -> Result<(), RequestError> {
    let me = server
        .sessions
        .username_of(slot)
        .ok_or(RequestError::NotLoggedIn)?;
    if server.sessions.state_of(slot) == Some(SessionState::InMatch) {
        return Err(RequestError::AlreadyInMatch);
    }

    let elo = server.users.elo_of(&me);
    server.queue.enqueue(slot, elo).map_err(|e| match e {
        crate::matchmaking::EnqueueError::AlreadyQueued => RequestError::AlreadyQueued,
        crate::matchmaking::EnqueueError::Full => RequestError::QueueFull,
    })?;

    let status = Envelope::new("MATCHMAKING_STATUS", json!({ "status": "SEARCHING" }));
    server.sessions.send(slot, &status).await.ok();
    Ok(())
}

async fn handle_cancel_find_match(server: &Arc<Server>, slot: usize) -> Result<(), RequestError> {
    if !server.queue.dequeue(slot) {
        return Err(RequestError::NotQueued);
    }

    let status = Envelope::new("MATCHMAKING_STATUS", json!({ "status": "CANCELLED" }));
    server.sessions.send(slot, &status).await.ok();
    Ok(())
}
