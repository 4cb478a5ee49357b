pub mod backfill;
pub mod live;

pub use backfill::{Backfill, BackfillError, CancelFlag};
pub use live::LiveSession;
