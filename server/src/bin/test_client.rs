//! Headless bot that plays one full game against the server.
//!
//! Places three random airplanes, then polls on a fixed interval and fires at
//! a random untried cell whenever it is its turn. Two bots started side by
//! side will play each other to completion.

use clap::Parser;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use shared::airplane::{self, Airplane, Orientation};
use shared::{ClientUpdate, Grid, Position, ServerMessage, GRID_SIZE, PLANES_PER_PLAYER};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// WebSocket URL of the server
    #[clap(short, long, default_value = "ws://127.0.0.1:8000")]
    server: String,
    /// Milliseconds between polls
    #[clap(long, default_value = "200")]
    poll_ms: u64,
}

/// Random non-overlapping fleet. Returns the occupancy grid and head cells.
fn random_fleet<R: Rng>(rng: &mut R) -> (Grid, Vec<Position>) {
    loop {
        let mut grid = Grid::new();
        let mut heads = Vec::with_capacity(PLANES_PER_PLAYER);

        for _ in 0..200 {
            if heads.len() == PLANES_PER_PLAYER {
                break;
            }
            let Some(head) = Position::new(rng.gen_range(0..GRID_SIZE), rng.gen_range(0..GRID_SIZE))
            else {
                continue;
            };
            let orientation = Orientation::ALL[rng.gen_range(0..Orientation::ALL.len())];
            if airplane::place(&mut grid, &Airplane::new(head, orientation)) {
                heads.push(head);
            }
        }

        if heads.len() == PLANES_PER_PLAYER {
            return (grid, heads);
        }
    }
}

fn next_target<R: Rng>(rng: &mut R, shots: &Grid) -> Option<Position> {
    let untried: Vec<Position> = Position::all().filter(|pos| !shots.is_set(*pos)).collect();
    untried.choose(rng).copied()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let (ws, _) = connect_async(args.server.as_str()).await?;
    info!("Connected to {}", args.server);
    let (mut sink, mut source) = ws.split();

    let mut rng = rand::thread_rng();
    let (grid, heads) = random_fleet(&mut rng);
    let mut shots = Grid::new();
    let mut my_turn = false;

    let placement = ClientUpdate {
        grid: Some(grid),
        head_positions: Some(heads.clone()),
        shots: None,
    };
    sink.send(Message::Text(placement.to_json()?)).await?;
    info!("Placed airplanes with heads at {:?}", heads);

    let mut ticker = interval(Duration::from_millis(args.poll_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let update = if my_turn {
                    match next_target(&mut rng, &shots) {
                        Some(target) => {
                            shots.set(target);
                            info!("Firing at {}", target);
                            ClientUpdate { shots: Some(shots), ..ClientUpdate::default() }
                        }
                        None => ClientUpdate::default(),
                    }
                } else {
                    ClientUpdate::default()
                };
                // Wait for the server's answer before firing again.
                my_turn = false;
                sink.send(Message::Text(update.to_json()?)).await?;
            }
            frame = source.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Server closed the connection");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                };

                match ServerMessage::from_json(&text) {
                    Ok(ServerMessage::Init { slot, session_id }) => {
                        info!("Joined session {} as player {}", session_id, slot);
                    }
                    Ok(ServerMessage::Update(update)) => {
                        debug!("Update: {:?}", update);
                        my_turn = update.your_turn;
                        for (cell, outcome) in &update.shot_results {
                            debug!("  {} -> {:?}", cell, outcome);
                        }
                    }
                    Ok(ServerMessage::GameOver { winner, .. }) => {
                        info!("Game over, player {} wins", winner);
                        break;
                    }
                    Ok(ServerMessage::OpponentDisconnected { .. }) => {
                        info!("Opponent disconnected");
                        break;
                    }
                    Err(e) => warn!("Unrecognised message from server: {}", e),
                }
            }
        }
    }

    let _ = sink.close().await;
    Ok(())
}
