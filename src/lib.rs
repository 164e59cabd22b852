//! # SciTutor
//!
//! A retrieval-augmented science tutor. Textbook PDFs are chunked, embedded
//! and stored in a SQLite index; questions are answered by a language model
//! conditioned on the most similar passages and the recent conversation.
//! Per-user transcripts and progress counters live in one JSON file per user.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────┐
//! │ pdf_dir  │──▶│ Chunk+Embed │──▶│  SQLite   │
//! └──────────┘   └─────────────┘   └────┬─────┘
//!                                       │ top-k
//!                ┌──────────┐      ┌────▼─────┐      ┌───────────┐
//!                │ HTTP/CLI │─────▶│  Chain   │─────▶│ ChatModel │
//!                └────┬─────┘      └──────────┘      └───────────┘
//!                     ▼
//!               user_data/*.json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF text extraction |
//! | [`connector_fs`] | PDF discovery |
//! | [`ingest`] | Concurrent PDF loading |
//! | [`chunk`] | Text chunking |
//! | [`provider`] | Shared HTTP plumbing for remote models |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`index`] | Vector index and retrieval |
//! | [`llm`] | Chat-completion clients |
//! | [`chain`] | History-aware retrieval chain |
//! | [`users`] | Per-user transcript and progress store |
//! | [`server`] | HTTP API |
//! | [`console`] | Interactive terminal tutor |

pub mod chain;
pub mod chunk;
pub mod config;
pub mod connector_fs;
pub mod console;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod provider;
pub mod server;
pub mod users;
