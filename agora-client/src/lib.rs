mod cache;
pub use cache::ReplyTreeCache;

mod cascade;
pub use cascade::CascadeDeleteResolver;

mod compose;
pub use compose::CompositionController;

mod controller;
pub use controller::DiscussionController;

mod error;
pub use error::{Error, ValidationError};

mod expansion;
pub use expansion::{ExpandStep, Expansion, ExpansionTracker};

mod optimistic;
pub use optimistic::{OptimisticMutator, Toggle, ToggleTarget};

mod view;
pub use view::{visible_tree, VisibleReply};

mod scenarios;

pub mod api {
    pub use agora_api::*;
}
