//! Performance benchmarks for critical game systems

use server::game::{GameSession, Phase};
use shared::airplane::{self, Airplane, Orientation};
use shared::{classify, ClientUpdate, Grid, Position, ServerMessage, SessionId, Slot};
use std::time::Instant;

fn pos(row: usize, col: usize) -> Position {
    Position::new(row, col).unwrap()
}

fn fleet(heads: [(usize, usize); 3]) -> ClientUpdate {
    let mut grid = Grid::new();
    let heads: Vec<Position> = heads.iter().map(|&(r, c)| pos(r, c)).collect();
    for head in &heads {
        airplane::place(&mut grid, &Airplane::new(*head, Orientation::Up));
    }
    ClientUpdate {
        grid: Some(grid),
        head_positions: Some(heads),
        shots: None,
    }
}

/// Benchmarks shot classification
#[test]
fn benchmark_shot_classification() {
    let heads = [pos(0, 2), pos(0, 7), pos(5, 2)];
    let mut grid = Grid::new();
    for head in heads {
        airplane::place(&mut grid, &Airplane::new(head, Orientation::Up));
    }

    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let target = pos(i % 10, (i / 10) % 10);
        let _ = classify(target, &heads, |p| grid.is_set(p));
    }

    let duration = start.elapsed();
    println!(
        "Shot classification: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Generous bound for debug builds
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks complete games played directly against the session state machine
#[test]
fn benchmark_full_game_sessions() {
    let games = 500;
    let start = Instant::now();

    for id in 0..games {
        let mut session = GameSession::new(SessionId(id));
        session.join(Slot::One).unwrap();
        session.join(Slot::Two).unwrap();
        session.apply_update(Slot::One, &fleet([(0, 2), (0, 7), (5, 2)])).unwrap();
        session.apply_update(Slot::Two, &fleet([(0, 2), (0, 7), (5, 2)])).unwrap();
        assert_eq!(session.phase(), Phase::Playing);

        let mut shots_one = Grid::new();
        let mut shots_two = Grid::new();
        let mut cells = Position::all();
        while session.winner().is_none() {
            let Some(next) = cells.next() else { break };
            shots_one.set(next);
            let update = ClientUpdate {
                shots: Some(shots_one),
                ..ClientUpdate::default()
            };
            session.apply_update(Slot::One, &update).unwrap();
            if session.winner().is_some() {
                break;
            }

            let fired = shots_two.count();
            shots_two.set(pos(9 - fired / 10, fired % 10));
            let update = ClientUpdate {
                shots: Some(shots_two),
                ..ClientUpdate::default()
            };
            session.apply_update(Slot::Two, &update).unwrap();
        }
        assert_eq!(session.winner(), Some(Slot::One));
    }

    let duration = start.elapsed();
    println!(
        "Full games: {} games in {:?} ({:.2} μs/game)",
        games,
        duration,
        duration.as_micros() as f64 / games as f64
    );

    assert!(duration.as_secs() < 5);
}

/// Benchmarks encoding server messages and decoding client updates
#[test]
fn benchmark_message_serialization() {
    let mut session = GameSession::new(SessionId(1));
    session.join(Slot::One).unwrap();
    session.join(Slot::Two).unwrap();
    let message = session.update_for(Slot::One);
    let client_json = fleet([(0, 2), (0, 7), (5, 2)]).to_json().unwrap();

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let text = message.to_json().unwrap();
        let _ = ServerMessage::from_json(&text).unwrap();
        let _ = ClientUpdate::decode(&client_json);
    }

    let duration = start.elapsed();
    println!(
        "Message serialization: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 5);
}
