// Terminal watch-party client.
//
// Joins a group on the relay with a `SimulatedPlayer` standing in for the
// video element. Lines on stdin act as the user clicking the player:
//
//   play | pause | seek <seconds> | say <text> | status | quit
//
// Host events are printed to stdout as one JSON object per line; logs go to
// stderr (filter with RUST_LOG, default `info`).
//
// Usage:
//   watch --group <ID> --username <NAME> [OPTIONS]
//     --url <URL>              Relay URL (env WEBSOCKET_URL, default ws://localhost:8765)
//     --chat <TEXT>            Send one chat line once joined
//     --action <ACTION>        Perform play/pause/seek once joined
//     --seek-time <SECONDS>    Target of --action seek
//     --duration <SECONDS>     Length of the simulated media (default 600)

use std::io::{self, BufRead};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use together_apart_client::{
    ClientConfig, HostInstructions, MediaPlayer, OutgoingChat, SimulatedPlayer, SyncSettings,
    WatchClient,
};
use together_apart_protocol::ActionKind;

/// How often the main loop checks the player and drains events.
const TICK: Duration = Duration::from_millis(20);

#[derive(Parser, Debug)]
#[command(name = "watch")]
#[command(about = "Join a watch party and keep a simulated player in sync")]
struct Args {
    /// Relay WebSocket URL
    #[arg(long, env = "WEBSOCKET_URL", default_value = "ws://localhost:8765")]
    url: String,

    /// Group to join
    #[arg(short, long, env = "WATCH_GROUP")]
    group: String,

    /// Display name, also used as the sender id
    #[arg(short, long, env = "WATCH_USERNAME")]
    username: String,

    /// Chat line to send once after joining
    #[arg(long)]
    chat: Option<String>,

    /// Playback action to perform once after joining (play, pause, seek)
    #[arg(long)]
    action: Option<ActionKind>,

    /// Seek target in seconds, for `--action seek`
    #[arg(long)]
    seek_time: Option<f64>,

    /// Length of the simulated media in seconds
    #[arg(long, default_value_t = 600.0)]
    duration: f64,

    /// How long a remote action suppresses local notifications
    #[arg(long, default_value_t = 100)]
    guard_timeout_ms: u64,

    /// Remote seeks closer than this many seconds are skipped
    #[arg(long, default_value_t = 0.5)]
    seek_tolerance: f64,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(&self.url, &self.group, &self.username);
        config.sync = SyncSettings {
            guard_timeout: Duration::from_millis(self.guard_timeout_ms),
            seek_tolerance: self.seek_tolerance,
        };
        config.instructions = HostInstructions {
            outgoing_chat: self.chat.clone().map(|text| OutgoingChat { text, time: None }),
            playback_action: self.action,
            seek_time: self.seek_time,
        };
        config
    }
}

/// One line of user input.
#[derive(Debug, PartialEq)]
enum Command {
    Play,
    Pause,
    Seek(f64),
    Say(String),
    Status,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match word.to_ascii_lowercase().as_str() {
        "play" => Some(Command::Play),
        "pause" => Some(Command::Pause),
        "seek" => rest
            .parse::<f64>()
            .ok()
            .filter(|time| time.is_finite() && *time >= 0.0)
            .map(Command::Seek),
        "say" if !rest.is_empty() => Some(Command::Say(rest.to_owned())),
        "status" => Some(Command::Status),
        "quit" | "exit" => Some(Command::Quit),
        _ => None,
    }
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn run_command(client: &WatchClient, player: &SimulatedPlayer, command: Command) {
    let result = match command {
        Command::Play => player.play(),
        Command::Pause => player.pause(),
        Command::Seek(time) => player.seek(time),
        Command::Say(text) => {
            // Failures are reported as host events.
            let _ = client.send_chat(&text);
            Ok(())
        }
        Command::Status => {
            eprintln!(
                "{} at {:.1}s / {:.1}s, connection {}",
                if player.is_playing() { "playing" } else { "paused" },
                player.current_time(),
                player.duration(),
                client.connection_state().as_str(),
            );
            Ok(())
        }
        Command::Quit => Ok(()),
    };
    if let Err(err) = result {
        warn!(error = %err, "player command failed");
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let (player, player_events) = SimulatedPlayer::new(args.duration);
    let player = Arc::new(player);
    let (client, host_events) = match WatchClient::new(args.client_config(), player.clone()) {
        Ok(result) => result,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let commands = spawn_stdin_reader();
    client.start();

    loop {
        match commands.recv_timeout(TICK) {
            Ok(line) => match parse_command(&line) {
                Some(Command::Quit) => break,
                Some(command) => run_command(&client, &player, command),
                None => eprintln!("commands: play | pause | seek <seconds> | say <text> | status | quit"),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        player.tick();
        for event in player_events.try_iter() {
            client.on_player_event(event);
        }
        for event in host_events.try_iter() {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!(error = %err, "could not serialize host event"),
            }
        }
    }

    client.stop();
    ExitCode::SUCCESS
}
