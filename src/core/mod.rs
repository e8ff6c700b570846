// ─── Provisioner Core ───
// Backend for installing and repairing a TABG dedicated server.
//
// Architecture:
//   core/
//     whitelist/    — Rules file + two-pass destructive reset
//     downloader/   — GitHub release lookup + streaming downloads
//     loaders/      — Zip extraction, doorstop bootstrap, plugin deploy
//     launch/       — Supervised first run, stale processes, editor wait
//     config/       — Base settings upsert + generated config repair
//     orchestrator  — Phase sequence and exit codes
//     state/        — Persisted settings

pub mod cancel;
pub mod config;
pub mod downloader;
pub mod error;
pub mod http;
pub mod launch;
pub mod loaders;
pub mod orchestrator;
pub mod state;
pub mod whitelist;
