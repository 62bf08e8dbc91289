// mididermi_server — the melody reservoir and its network front end.
//
// The server owns the authoritative pool of every melody discovered so far.
// Workers borrow random subsets as `Task`s, evolve them under a human
// listener, and hand them back; the pool merges results with structural
// deduplication and score accumulation, then persists itself.
//
// Module overview:
// - `config.rs`:      `ServerConfig` (TOML, all keys optional) + validation.
// - `pool.rs`:        `MelodyPool` — subset sampling, merge, persistence
//                     trigger, all under one lock.
// - `store.rs`:       SQLite snapshot store and the matching melody source.
// - `producer.rs`:    MIDI file-set output.
// - `coordinator.rs`: `Coordinator` (the `Distribution` implementation) and
//                     the config-driven wiring of sources and persistence.
// - `server.rs`:      TCP listener, one thread per worker connection.
// - `client.rs`:      `WorkerClient`, the TCP `Distribution` used by workers.
//
// The server can run as a standalone binary (`main.rs`) or be embedded via
// `start_server`, which is how the integration tests drive it.

pub mod client;
pub mod config;
pub mod coordinator;
pub mod pool;
pub mod producer;
pub mod server;
pub mod store;

pub use client::WorkerClient;
pub use config::{ConfigError, ServerConfig};
pub use coordinator::{Coordinator, build_coordinator};
pub use pool::{MelodyPool, MergeOutcome};
pub use server::{ServerHandle, start_server};
