pub mod calculator;
pub mod contract;
pub mod packet;
pub mod side_packet;
pub mod timestamp;

pub use calculator::{Calculator, InputSet, OpenContext, Outcome, OutputPort, OutputSet, ProcessContext};
pub use contract::{Contract, InputPolicy, PacketType, PortLayout, PortRef, PortSet, PortSpec};
pub use packet::{Packet, PacketError};
pub use side_packet::{SidePacketStore, SidePackets};
pub use timestamp::Timestamp;
