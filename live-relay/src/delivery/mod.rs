//! Outbound delivery: per-platform queues and the network senders behind them.

pub mod scheduler;
pub mod sender;

pub use scheduler::DeliveryScheduler;
pub use sender::{HttpSender, OutboundSender, SenderEndpoint};
