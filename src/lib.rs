//! # task-mill
//!
//! A batch parse pipeline that turns long, unstructured therapy-skill
//! write-ups into discrete, schema-valid draft task records.
//!
//! One submitted document becomes one **job**. The orchestrator asks an
//! external planner how the document splits into candidate task
//! segments, then processes every segment concurrently: assemble a
//! prompt payload (segment text + planner-flagged context blocks),
//! extract a structured task through an unreliable external model with a
//! bounded corrective retry loop, remap every entity id to a fresh
//! globally-unique id, and persist the result as an unpublished draft.
//! Progress streams into an append-only event log that clients poll with
//! a cursor.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────┐   ┌─────────────────────────────┐
//! │  Document  │──▶│ Segmenter │──▶│ per segment (concurrent):    │
//! │ (raw text) │   │ + planner │   │ context → parse → normalize │
//! └────────────┘   └───────────┘   │         → persist           │
//!                                  └──────────────┬──────────────┘
//!                                                 │
//!                        ┌────────────────────────┤
//!                        ▼                        ▼
//!                  ┌───────────┐           ┌────────────┐
//!                  │ Job store │◀─ poll ── │   SQLite    │
//!                  │ event log │           │ draft tasks │
//!                  └───────────┘           └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`segment`] | Line numbering, planner plan resolution, heading fallback |
//! | [`context`] | Context-block resolution and prompt assembly |
//! | [`parser`] | Schema validation and the retry-correction loop |
//! | [`normalize`] | Globally-unique id remapping |
//! | [`persist`] | Draft task persistence |
//! | [`store`] | Job summary row + append-only event log |
//! | [`orchestrate`] | Job state machine and concurrent fan-out |
//! | [`llm`] | External planner/extractor seams and providers |
//! | [`status`] | CLI status polling |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema bootstrap |

pub mod config;
pub mod context;
pub mod db;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod orchestrate;
pub mod parser;
pub mod persist;
pub mod segment;
pub mod status;
pub mod store;
