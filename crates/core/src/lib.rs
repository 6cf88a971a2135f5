//! # Prism Core
//!
//! Multi-topology LLM orchestration: one prompt, run across one or more
//! providers in a chosen shape.
//!
//! ## Architecture
//!
//! - `gateway/` - uniform provider calls (Gemini, OpenAI, Anthropic, OpenRouter)
//! - `credentials/` - per-provider key resolution over an injected store
//! - `topology/` - Standalone, Chain, Arena, Refine and Swarm executors
//! - `hive/` - phase state machine behind the Swarm flows
//! - `parser` - structured payloads out of free-form model text
//! - `session` - the single active run, exposed to the UI
//!
//! ## Usage
//!
//! ```rust,ignore
//! use prism_core::{Engine, EngineConfig, ExecutionRequest, Session, TopologyConfig};
//!
//! let engine = Engine::from_config(EngineConfig::load_default()?)?;
//! let session = Session::new(std::sync::Arc::new(engine));
//! let request = ExecutionRequest::new("Explain TCP", TopologyConfig::Chain(Default::default()))?;
//! let snapshot = session.start_run(request).await?;
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod gateway;
pub mod hive;
pub mod models;
pub mod parser;
pub mod prompts;
pub mod session;
pub mod topology;

pub use config::EngineConfig;
pub use error::EngineError;
pub use events::{RunEvent, RunEventKind};
pub use models::{ModelConfig, Provider};
pub use session::{Engine, Session, SessionSnapshot};
pub use topology::{ExecutionRequest, RunResult, Topology, TopologyConfig};
