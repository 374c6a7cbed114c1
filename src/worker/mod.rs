pub mod dispatch;
pub mod intake;
pub mod limiter;
pub mod messages;

pub use dispatch::{Disposition, Dispatcher};
pub use intake::run_intake;
pub use limiter::{HandlerLimiter, HandlerPermit};
pub use messages::Message;
