// HTTP routes
pub mod drafts;
pub mod health;
pub mod leads;
pub mod queues;

pub use drafts::*;
pub use health::*;
pub use leads::*;
pub use queues::*;
