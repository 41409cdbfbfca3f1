use super::Timestamp;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("packet is empty")]
    Empty,
    #[error("packet holds `{actual}`, not `{expected}`")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

/// Immutable, shared payload plus its timestamp.
///
/// Cloning a packet only bumps a reference count; every holder sees the same
/// payload and none may mutate it. The payload is dropped with the last clone.
#[derive(Clone)]
pub struct Packet {
    payload: Option<Arc<dyn Any + Send + Sync>>,
    type_name: &'static str,
    timestamp: Timestamp,
}

impl Packet {
    /// Moves `value` into a new packet with an unset timestamp.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            payload: Some(Arc::new(value)),
            type_name: std::any::type_name::<T>(),
            timestamp: Timestamp::UNSET,
        }
    }

    /// Placeholder handed to a port with no packet at the firing timestamp.
    pub fn empty() -> Self {
        Self {
            payload: None,
            type_name: "<empty>",
            timestamp: Timestamp::UNSET,
        }
    }

    /// Same payload, stamped with `timestamp`.
    pub fn at(mut self, timestamp: impl Into<Timestamp>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_none()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn payload_type_id(&self) -> Option<TypeId> {
        self.payload.as_ref().map(|p| p.as_ref().type_id())
    }

    pub fn get<T: Any>(&self) -> Result<&T, PacketError> {
        let payload = self.payload.as_ref().ok_or(PacketError::Empty)?;
        payload
            .downcast_ref::<T>()
            .ok_or(PacketError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                actual: self.type_name,
            })
    }

    /// Number of live holders of the payload; zero for an empty packet.
    pub fn holders(&self) -> usize {
        self.payload.as_ref().map(Arc::strong_count).unwrap_or(0)
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("type", &self.type_name)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_checks_type() {
        let packet = Packet::new(2.5f64).at(3);
        assert_eq!(*packet.get::<f64>().unwrap(), 2.5);
        assert_eq!(packet.timestamp(), Timestamp::new(3));
        assert!(matches!(
            packet.get::<String>(),
            Err(PacketError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_packet() {
        let packet = Packet::empty();
        assert!(packet.is_empty());
        assert_eq!(packet.get::<f64>(), Err(PacketError::Empty));
        assert_eq!(packet.holders(), 0);
    }

    #[test]
    fn test_restamp_shares_payload() {
        let first = Packet::new(String::from("goblin")).at(1);
        let second = first.clone().at(2);
        assert_eq!(first.holders(), 2);
        assert_eq!(second.get::<String>().unwrap(), "goblin");
        assert_eq!(first.timestamp(), Timestamp::new(1));
        drop(first);
        assert_eq!(second.holders(), 1);
    }
}
