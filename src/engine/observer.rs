use super::stream::{ConsumerId, Stream};
use crate::core::Packet;
use crate::error::{GraphError, GraphResult};
use anyhow::Result;
use std::sync::Arc;

/// Receives every packet emitted on an observed stream, in stream order.
///
/// Returning an error aborts the run exactly like a failing node.
pub trait Observer: Send {
    fn on_packet(&mut self, packet: &Packet) -> Result<()>;
}

impl<F> Observer for F
where
    F: FnMut(&Packet) -> Result<()> + Send,
{
    fn on_packet(&mut self, packet: &Packet) -> Result<()> {
        self(packet)
    }
}

struct ObserverSlot {
    stream: Arc<Stream>,
    consumer: ConsumerId,
    observer: Box<dyn Observer>,
}

/// Observers attached to graph streams. Delivery happens on the scheduler
/// task, which owns the registry while the graph runs.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    slots: Vec<ObserverSlot>,
}

impl ObserverRegistry {
    pub fn register(&mut self, stream: Arc<Stream>, observer: Box<dyn Observer>) {
        let consumer = stream.add_consumer();
        self.slots.push(ObserverSlot {
            stream,
            consumer,
            observer,
        });
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Hands every queued packet to its observer.
    pub fn deliver(&mut self) -> GraphResult<usize> {
        let mut delivered = 0;
        for slot in &mut self.slots {
            for packet in slot.stream.drain(slot.consumer) {
                slot.observer
                    .on_packet(&packet)
                    .map_err(|e| GraphError::Observer {
                        stream: slot.stream.name().to_string(),
                        timestamp: packet.timestamp(),
                        message: format!("{:#}", e),
                    })?;
                delivered += 1;
            }
        }
        Ok(delivered)
    }
}
