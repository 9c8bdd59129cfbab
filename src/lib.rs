//! # Phaply
//!
//! Question answering over a corpus of Vietnamese legal documents.
//!
//! The retrieval and composition logic lives in [`phaply_core`]; this
//! crate wires it to SQLite, OpenAI-compatible model endpoints, a CLI and
//! an HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌─────────────────┐
//! │  import   │──▶│    SQLite    │──▶│    rebuild      │
//! │  (JSONL)  │   │ legal_docs   │   │ parents+BM25    │
//! └───────────┘   └──────┬───────┘   └───────┬─────────┘
//!                        │ child_vectors      │ artifacts.bin
//!                        ▼                    ▼
//!                 ┌──────────────────────────────────┐
//!                 │ QueryService (cache, limiter,    │
//!                 │ hybrid retrieval, LLM, citations)│
//!                 └──────────┬───────────────┬───────┘
//!                            ▼               ▼
//!                      ┌──────────┐    ┌──────────┐
//!                      │   CLI    │    │   HTTP   │
//!                      └──────────┘    └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! phaply init
//! phaply import ./corpus.jsonl
//! phaply rebuild
//! phaply ask "Thời gian thử việc tối đa là bao lâu?"
//! phaply serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`document_store`] | SQLite document store and JSONL import |
//! | [`tokenizer`] | Token counting for chunk budgets |
//! | [`rebuild`] | Artifact build, cache file and rebuild lock |
//! | [`openai`] | OpenAI-compatible HTTP client with retry |
//! | [`embedding`] | Embedding backends |
//! | [`vector_store`] | SQLite vector index |
//! | [`embed_cmd`] | Embedding backfill |
//! | [`llm`] | Language-model backends and timeout |
//! | [`cache`] | Response cache |
//! | [`rate_limit`] | Token-bucket limiter |
//! | [`query`] | Query service with fallbacks |
//! | [`retrieve`] | `retrieve` and `ask` commands |
//! | [`server`] | HTTP API |
//! | [`stats`] | Index statistics |

pub mod cache;
pub mod config;
pub mod db;
pub mod document_store;
pub mod embed_cmd;
pub mod embedding;
pub mod llm;
pub mod migrate;
pub mod openai;
pub mod query;
pub mod rate_limit;
pub mod rebuild;
pub mod retrieve;
pub mod server;
pub mod stats;
pub mod tokenizer;
pub mod vector_store;
