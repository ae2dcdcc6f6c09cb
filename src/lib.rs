pub mod api;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;
pub mod store;

pub use broadcast::{Broadcaster, Envelope, LiveUpdate, NewsItem, SubscriptionFilter, UpdateType};
pub use config::{Config, EngineConfig};
pub use db::{init_db, Repository};
pub use domain::{
    AccountId, AccountProfile, Event, EventPayload, InfluenceMetrics, PersonaType,
    PoliticalAlignment, ReactionKind, TimeMs, Timeframe, Topic, TopicCategory,
};
pub use error::AppError;
pub use orchestration::{Accepted, Engine, EngineError, Rejected};
pub use store::{EngineStore, MemoryStore, StoreError};
