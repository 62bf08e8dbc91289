// CLI entry point for a MIDI-DE listening worker.
//
// Connects to a pool server, then for each round plays the borrowed melodies
// one by one. Type `+` or `-` and Enter while a melody plays to vote on it.
//
// Usage:
//   mididermi-worker [OPTIONS]
//     --server <HOST:PORT>   pool server (default: 127.0.0.1:1099)
//     --rounds <N>           tasks to complete before exiting (default: 1)
//     --settle-ms <MS>       pause after each melody (default: 500)
//     --player <COMMAND>     external MIDI player, e.g. "timidity -Os"
//     --silent               keep time without playing anything
//     --seed <N>             RNG seed for mutation

use std::io::{self, BufReader};
use std::time::Duration;

use clap::Parser;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mididermi_music::evaluation::{Evaluator, ListeningEvaluator, Player};
use mididermi_music::midi::MidiRenderer;
use mididermi_music::{Feedback, ScaledDifference};
use mididermi_protocol::DEFAULT_PORT;
use mididermi_server::WorkerClient;
use mididermi_worker::keyboard::spawn_keyboard;
use mididermi_worker::{CommandPlayer, ConsoleMeter, SilentPlayer, run_rounds};

const DEFAULT_PLAYER: &str = "timidity -Os";

#[derive(Parser, Debug)]
#[command(author, version, about = "Interactive distributed melody evolution: listening worker")]
struct Args {
    /// Pool server address
    #[arg(long, default_value_t = format!("127.0.0.1:{DEFAULT_PORT}"))]
    server: String,

    /// Tasks to complete before exiting
    #[arg(long, default_value_t = 1)]
    rounds: u32,

    /// Pause after each melody, in milliseconds
    #[arg(long, default_value_t = 500)]
    settle_ms: u64,

    /// External MIDI player command line
    #[arg(long, default_value = DEFAULT_PLAYER)]
    player: String,

    /// Keep time without playing anything
    #[arg(long)]
    silent: bool,

    /// RNG seed for mutation (random if omitted)
    #[arg(long)]
    seed: Option<u64>,
}

fn listening_evaluator<P: Player + 'static>(player: P, settle: Duration) -> Box<dyn Evaluator> {
    Box::new(
        ListeningEvaluator::new(MidiRenderer, player)
            .with_settle(settle)
            .with_visualizer(Box::new(ConsoleMeter::new(io::stdout()))),
    )
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let settle = Duration::from_millis(args.settle_ms);
    let mut evaluator = if args.silent {
        listening_evaluator(SilentPlayer, settle)
    } else {
        match CommandPlayer::from_command_line(&args.player) {
            Some(player) => listening_evaluator(player, settle),
            None => {
                error!("--player must name a program");
                std::process::exit(1);
            }
        }
    };

    let name = format!("worker-{}", std::process::id());
    let client = match WorkerClient::connect(args.server.as_str(), &name) {
        Ok(client) => client,
        Err(e) => {
            error!("failed to connect to {}: {e}", args.server);
            std::process::exit(1);
        }
    };
    info!("connected to {} as worker {}", args.server, client.worker_id().0);
    info!("type + or - and Enter while a melody plays to vote");

    let feedback = Feedback::new();
    // Detached: a blocked stdin read can't be interrupted.
    let _keyboard = spawn_keyboard(BufReader::new(io::stdin()), feedback.clone());

    let mut rng = StdRng::seed_from_u64(args.seed.unwrap_or_else(rand::random));
    let result = run_rounds(
        &client,
        args.rounds,
        &ScaledDifference::default(),
        evaluator.as_mut(),
        &mut rng,
        &feedback,
    );
    match result {
        Ok(summaries) => info!("finished {} rounds", summaries.len()),
        Err(e) => {
            error!("session ended: {e}");
            std::process::exit(1);
        }
    }
    if let Err(e) = client.close() {
        error!("failed to say goodbye: {e}");
    }
}
