//! Data plane of a Selective Forwarding Unit worker.
//!
//! Remote peers publish RTP streams ([`producer::Producer`]) into a [`router::Router`]; other
//! peers subscribe to those streams via consumers ([`consumer::Consumer`] implementations such as
//! [`simple_consumer::SimpleConsumer`]) over their own transports. The worker does not
//! transcode: it rewrites RTP headers, manages RTCP feedback and enforces synchronization so
//! each receiver sees a coherent stream that begins on a key frame.
//!
//! Transport setup (ICE/DTLS/SRTP), socket handling and the control channel framing live
//! outside this crate; they drive the router synchronously and pass the current time into every
//! time-dependent call.

pub mod codecs;
pub mod data_structures;
mod macros;
pub mod messages;
pub mod router;
pub mod rtp_packet;
pub mod rtp_parameters;
pub mod rtp_stream;
pub mod rtp_stream_recv;
pub mod rtp_stream_send;
pub mod seq_manager;

pub use router::consumer;
pub use router::producer;
pub use router::simple_consumer;
