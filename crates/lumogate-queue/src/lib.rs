pub mod queue;

pub use queue::{QueueError, QueueTicket, SingleFlightQueue};
