//! Frame transfer protocol core
//!
//! Pure protocol logic with no I/O: the 32-byte packet header codec,
//! frame fragmentation, single-frame reassembly, ACK/NACK feedback, the
//! sender's retransmission history, the connection mode state machine and
//! transfer statistics.

pub mod ack;
pub mod connection;
pub mod fragment;
pub mod history;
pub mod packet;
pub mod reassembly;
pub mod stats;

pub use ack::{ack_packet, nack_packet, Feedback};
pub use connection::{
    ConnectionError, ConnectionMode, ConnectionState, ConnectionStateMachine, LinkEvent,
    Transition,
};
pub use fragment::{
    total_packets, FragmentError, FragmentedFrame, Fragmenter, FrameIdGenerator, FrameLimits,
};
pub use history::{HistoryError, SendHistory};
pub use packet::{
    checksum, Packet, PacketError, PacketHeader, PacketType, HEADER_SIZE, MAGIC,
    MAX_DATAGRAM_SIZE, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION,
};
pub use reassembly::{
    CompletedFrame, FrameReassembly, IngestOutcome, Reassembler, ReassemblyError,
    ReassemblyStats,
};
pub use stats::{FpsMeter, StatsSnapshot, TransferStats};
