pub mod clock;
pub mod ids;
pub mod retry;

pub use clock::{Clock, FixedClock, SystemClock};
pub use ids::{FixedIdGenerator, IdGenerator, SequentialIdGenerator, UuidGenerator};
pub use retry::{retry_on_transient, IsTransient, RetryConfig};
