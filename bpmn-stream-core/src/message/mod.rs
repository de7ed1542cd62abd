//! Message events
//!
//! Waiting elements open a subscription per message name and correlation
//! key. A published message is correlated to the subscriptions open at that
//! moment and is not kept for later ones.

mod processors;

pub use processors::MessagePublishProcessor;
