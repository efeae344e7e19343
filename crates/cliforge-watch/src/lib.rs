// crates/cliforge-watch/src/lib.rs
pub mod coordinator;
pub mod event;
pub mod progress;
pub mod stream;
pub mod testing;

pub use coordinator::{ExitCondition, WatchCoordinator, WatchOptions, WatchOutcome};
pub use event::Event;
pub use progress::{ProgressData, ProgressIndicator, ProgressManager};
pub use stream::{ReconnectPolicy, StreamClient};
