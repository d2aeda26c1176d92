//! Per-session game rules: player records, the phase state machine and
//! shot resolution.
//!
//! A `GameSession` is plain data. It never touches sockets; every call
//! returns the messages to deliver, and the caller is responsible for
//! running one call at a time per session.

use log::{debug, info};
use shared::{
    classify, ClientUpdate, GameUpdate, Grid, PhaseView, PlacementStatus, Position, ServerMessage,
    SessionId, ShotOutcome, Slot, HEADS_TO_WIN, PLANES_PER_PLAYER,
};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Waiting,
    Placement,
    Playing,
    Finished,
}

impl Phase {
    pub fn view(self) -> PhaseView {
        match self {
            Phase::Waiting | Phase::Placement => PhaseView::Placement,
            Phase::Playing | Phase::Finished => PhaseView::Playing,
        }
    }

    fn accepts_placement(self) -> bool {
        matches!(self, Phase::Waiting | Phase::Placement)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session {0} is full")]
    Full(SessionId),
    #[error("slot {1} is not seated in session {0}")]
    UnknownSlot(SessionId, Slot),
    #[error("session {0} is closed")]
    Closed(SessionId),
}

/// One participant's record within a session.
#[derive(Debug, Clone, Default)]
pub struct PlayerState {
    grid: Option<Grid>,
    head_positions: Vec<Position>,
    shots: Vec<Position>,
    shot_results: HashMap<Position, ShotOutcome>,
    heads_hit: u8,
}

impl PlayerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a plane head. No-op once the cap is reached or when the
    /// head is already recorded.
    pub fn record_placement(&mut self, head: Position) -> bool {
        if self.is_placement_complete() || self.head_positions.contains(&head) {
            return false;
        }
        self.head_positions.push(head);
        true
    }

    /// Appends a shot unless it was already fired. Returns true for a new shot.
    pub fn record_shot(&mut self, pos: Position) -> bool {
        if self.has_fired(pos) {
            return false;
        }
        self.shots.push(pos);
        true
    }

    pub fn is_placement_complete(&self) -> bool {
        self.head_positions.len() == PLANES_PER_PLAYER
    }

    /// Replaces the occupancy snapshot. Frozen once placement is complete.
    pub fn store_grid(&mut self, grid: Grid) {
        if !self.is_placement_complete() {
            self.grid = Some(grid);
        }
    }

    pub fn is_occupied(&self, pos: Position) -> bool {
        self.grid.is_some_and(|grid| grid.is_set(pos))
    }

    /// What a shot at `target` strikes on this player's board.
    pub fn incoming(&self, target: Position) -> ShotOutcome {
        classify(target, &self.head_positions, |pos| self.is_occupied(pos))
    }

    pub fn has_fired(&self, pos: Position) -> bool {
        self.shots.contains(&pos)
    }

    pub fn head_positions(&self) -> &[Position] {
        &self.head_positions
    }

    pub fn shots(&self) -> &[Position] {
        &self.shots
    }

    pub fn heads_hit(&self) -> u8 {
        self.heads_hit
    }

    pub fn result_of(&self, pos: Position) -> Option<ShotOutcome> {
        self.shot_results.get(&pos).copied()
    }

    fn resolve_shot(&mut self, target: Position, outcome: ShotOutcome) {
        self.shot_results.insert(target, outcome);
        if outcome == ShotOutcome::Head {
            self.heads_hit += 1;
        }
    }

    fn shot_results_by_key(&self) -> BTreeMap<String, ShotOutcome> {
        self.shot_results
            .iter()
            .map(|(pos, outcome)| (pos.key(), *outcome))
            .collect()
    }
}

/// Messages produced by one `apply_update` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub to_caller: Vec<ServerMessage>,
    pub to_peer: Vec<ServerMessage>,
    /// The game ended during this call and the session should be torn down.
    pub finished: bool,
}

/// An isolated two-player match.
#[derive(Debug, Clone)]
pub struct GameSession {
    id: SessionId,
    players: BTreeMap<Slot, PlayerState>,
    phase: Phase,
    turn: Slot,
    winner: Option<Slot>,
    abandoned: bool,
}

impl GameSession {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            players: BTreeMap::new(),
            phase: Phase::Waiting,
            turn: Slot::One,
            winner: None,
            abandoned: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn turn(&self) -> Slot {
        self.turn
    }

    pub fn winner(&self) -> Option<Slot> {
        self.winner
    }

    pub fn player(&self, slot: Slot) -> Option<&PlayerState> {
        self.players.get(&slot)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Open sessions accept a new participant.
    pub fn is_open(&self) -> bool {
        !self.abandoned && self.phase == Phase::Waiting && self.players.len() < 2
    }

    pub fn next_free_slot(&self) -> Option<Slot> {
        Slot::ALL
            .into_iter()
            .find(|slot| !self.players.contains_key(slot))
    }

    pub fn join(&mut self, slot: Slot) -> Result<(), SessionError> {
        if !self.is_open() || self.players.contains_key(&slot) {
            return Err(SessionError::Full(self.id));
        }

        self.players.insert(slot, PlayerState::new());
        info!("Player {} joined session {}", slot, self.id);

        if self.players.len() == 2 {
            self.phase = Phase::Placement;
            info!("Session {} entering placement", self.id);
        }
        Ok(())
    }

    /// Removes `slot` and marks the session for teardown. Returns the slot
    /// still seated, if any, so it can be told the match is over.
    pub fn leave(&mut self, slot: Slot) -> Option<Slot> {
        self.abandoned = true;
        if self.players.remove(&slot).is_some() {
            info!("Player {} left session {}", slot, self.id);
        }
        self.players.keys().next().copied()
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    /// Applies one inbound message from `slot`.
    ///
    /// Placement data is recorded while the game has not started. During
    /// play only the player holding the turn may fire, and at most one new
    /// shot (the first unfired marked cell in row-major order) is accepted
    /// per call. Anything else is ignored and the reply reflects the
    /// unchanged state.
    pub fn apply_update(
        &mut self,
        slot: Slot,
        update: &ClientUpdate,
    ) -> Result<UpdateOutcome, SessionError> {
        if self.abandoned || self.phase == Phase::Finished {
            return Err(SessionError::Closed(self.id));
        }
        if !self.players.contains_key(&slot) {
            return Err(SessionError::UnknownSlot(self.id, slot));
        }

        if self.phase.accepts_placement() {
            self.apply_placement(slot, update);
        }

        if self.phase == Phase::Placement && self.all_placed() {
            self.phase = Phase::Playing;
            self.turn = Slot::One;
            info!("Session {} placement complete, game starting", self.id);

            return Ok(UpdateOutcome {
                to_caller: vec![self.update_for(slot)],
                to_peer: vec![self.update_for(slot.opponent())],
                finished: false,
            });
        }

        if self.phase == Phase::Playing {
            if slot != self.turn {
                debug!("Session {}: player {} polled out of turn", self.id, slot);
            } else if let Some(shots) = &update.shots {
                self.fire(slot, shots);
            }
        }

        if let Some(winner) = self.winner {
            let peer = slot.opponent();
            return Ok(UpdateOutcome {
                to_caller: vec![self.update_for(slot), ServerMessage::game_over(winner)],
                to_peer: vec![self.update_for(peer), ServerMessage::game_over(winner)],
                finished: true,
            });
        }

        Ok(UpdateOutcome {
            to_caller: vec![self.update_for(slot)],
            ..UpdateOutcome::default()
        })
    }

    fn apply_placement(&mut self, slot: Slot, update: &ClientUpdate) {
        let Some(player) = self.players.get_mut(&slot) else {
            return;
        };

        if let Some(grid) = update.grid {
            player.store_grid(grid);
        }
        if let Some(heads) = &update.head_positions {
            for head in heads {
                player.record_placement(*head);
            }
        }
    }

    fn all_placed(&self) -> bool {
        self.players.len() == 2 && self.players.values().all(PlayerState::is_placement_complete)
    }

    fn fire(&mut self, slot: Slot, shots: &Grid) {
        let opponent = slot.opponent();
        let (target, outcome) = {
            let (Some(shooter), Some(target_player)) =
                (self.players.get(&slot), self.players.get(&opponent))
            else {
                return;
            };
            let Some(target) = shots.marked().find(|pos| !shooter.has_fired(*pos)) else {
                return;
            };
            (target, target_player.incoming(target))
        };

        let Some(shooter) = self.players.get_mut(&slot) else {
            return;
        };
        shooter.record_shot(target);
        shooter.resolve_shot(target, outcome);
        let heads_hit = shooter.heads_hit();

        match outcome {
            ShotOutcome::Miss => debug!("Session {}: player {} missed at {}", self.id, slot, target),
            _ => info!(
                "Session {}: player {} scored a {:?} at {}",
                self.id, slot, outcome, target
            ),
        }

        self.turn = opponent;

        if heads_hit >= HEADS_TO_WIN {
            self.phase = Phase::Finished;
            self.winner = Some(slot);
            info!("Session {}: player {} wins", self.id, slot);
        }
    }

    /// The state as seen by `slot`.
    pub fn update_for(&self, slot: Slot) -> ServerMessage {
        let empty = PlayerState::default();
        let me = self.players.get(&slot).unwrap_or(&empty);
        let opponent = self.players.get(&slot.opponent()).unwrap_or(&empty);

        ServerMessage::Update(GameUpdate {
            opponent_ready: self.players.len() == 2,
            your_turn: self.phase == Phase::Playing && self.turn == slot,
            phase: self.phase.view(),
            opponent_shots: opponent.shots().to_vec(),
            heads_hit: me.heads_hit(),
            opponent_heads_hit: opponent.heads_hit(),
            shot_results: me.shot_results_by_key(),
            placement_status: PlacementStatus {
                your_planes: me.head_positions().len(),
                opponent_planes: opponent.head_positions().len(),
            },
        })
    }
}
