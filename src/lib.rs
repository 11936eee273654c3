//! # SDG Discovery
//!
//! Harvests sustainability reports from organizational websites and turns
//! them into structured challenges and budget-bounded technology pathways.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Endpoints   │──▶│  Discovery   │──▶│   Ingest     │
//! │ sitemap/RSS  │   │ crawl+filter │   │ hash+extract │
//! └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                              │ text
//!                    ┌──────────────┐   ┌──────▼───────┐
//!                    │   Pathways   │◀──│  Challenges  │
//!                    │ (LLM agent)  │   │ (LLM agent)  │
//!                    └──────────────┘   └──────────────┘
//!                           │ SQLite │
//!                  ┌────────┴────────┴────────┐
//!                  ▼                          ▼
//!             ┌──────────┐              ┌──────────┐
//!             │   CLI    │              │ HTTP API │
//!             │  (sdg)   │              │  (axum)  │
//!             └──────────┘              └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sdg init                          # create database
//! sdg seed                          # load sources + prompt registry
//! sdg discover source 1             # crawl a source's endpoints
//! sdg documents fetch-pending       # download and extract text
//! sdg challenges extract --document 12
//! sdg pathways discover 3 --budget 15000
//! sdg serve                         # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`models`] | Row types and stored enums |
//! | [`urls`] | Link extraction and URL normalization |
//! | [`filter`] | Path include/exclude filtering |
//! | [`crawler`] | Bounded sitemap/RSS traversal |
//! | [`discovery`] | Endpoint discovery into `documents` |
//! | [`extract`] | HTML/PDF text extraction |
//! | [`ingest`] | Download, hash and extract documents |
//! | [`prompts`] | Versioned prompt registry |
//! | [`llm`] | Chat-completion client |
//! | [`agents`] | Challenge extraction, technology discovery, URL suggestions |
//! | [`challenges`] / [`pathways`] | Agent runs persisted with provenance |
//! | [`sources`] / [`documents`] | Source management and document access |
//! | [`auth`] | Shared-password sessions |
//! | [`server`] | HTTP API |

pub mod agents;
pub mod auth;
pub mod challenges;
pub mod config;
pub mod crawler;
pub mod db;
pub mod discovery;
pub mod documents;
pub mod error;
pub mod extract;
pub mod filter;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod pathways;
pub mod prompts;
pub mod server;
pub mod sources;
pub mod urls;
