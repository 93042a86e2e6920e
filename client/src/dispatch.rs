//! Type-keyed dispatch of inbound messages to processors.

use shared::connection::Connection;
use shared::logger;
use shared::message::{Message, MessageType};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

/// Handles one message type. Any `Fn(&Message, &Connection)` closure is a processor.
pub trait MessageProcessor: Send + Sync {
    fn process(&self, message: &Message, connection: &Connection);
}

impl<F> MessageProcessor for F
where
    F: Fn(&Message, &Connection) + Send + Sync,
{
    fn process(&self, message: &Message, connection: &Connection) {
        self(message, connection)
    }
}

/// At most one processor per message type, looked up by exact type.
#[derive(Default)]
pub struct DispatchRegistry {
    processors: RwLock<HashMap<MessageType, Arc<dyn MessageProcessor>>>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `processor` for `msg_type`, replacing any earlier one.
    pub fn register<P>(&self, msg_type: MessageType, processor: P)
    where
        P: MessageProcessor + 'static,
    {
        self.processors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(msg_type, Arc::new(processor));
    }

    pub fn unregister(&self, msg_type: MessageType) -> bool {
        self.processors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&msg_type)
            .is_some()
    }

    pub fn has_processor(&self, msg_type: MessageType) -> bool {
        self.processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&msg_type)
    }

    /// Runs the processor registered for the message's type. Returns `false` when the
    /// message was dropped, either because nothing handles its type or because the
    /// processor panicked. Never propagates a failure to the caller.
    pub fn dispatch(&self, message: &Message, connection: &Connection) -> bool {
        let msg_type = message.msg_type();
        // Cloned out so a processor may register or unregister without deadlocking.
        let processor = self
            .processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&msg_type)
            .cloned();

        let Some(processor) = processor else {
            logger::log_warning(&format!(
                "No processor for {} from {}, message dropped",
                msg_type,
                message.sender()
            ));
            return false;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| processor.process(message, connection))) {
            Ok(()) => true,
            Err(_) => {
                logger::log_error(&format!(
                    "Processor for {} failed on message from {}",
                    msg_type,
                    message.sender()
                ));
                false
            }
        }
    }
}
