//! # Data Model
//!
//! Core entities of the four-tier cascade: turns (L1), facts (L2),
//! episodes (L3), and knowledge documents (L4), plus the query builders and
//! the assembled [`ContextBlock`] handed to agents.

mod context;
mod episode;
mod fact;
mod knowledge;
mod query;
mod turn;

pub use context::ContextBlock;
pub use episode::{EntityRef, Episode, MentionEdge};
pub use fact::{Fact, FactCategory, FactType, MAX_FACT_CONTENT_LEN};
pub use knowledge::{KnowledgeDocument, KnowledgeType};
pub use query::{EpisodeQuery, FactQuery, KnowledgeQuery, TurnQuery};
pub use turn::{Role, Turn};
