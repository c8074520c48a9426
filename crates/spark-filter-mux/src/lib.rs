#![doc = "spark-filter-mux: a concrete channel multiplexer filter for spark-core endpoints."]
#![doc = ""]
#![doc = "Wire framing: `u8 frame_type | u32 channel_id | u32 len | payload`; frame types"]
#![doc = "OPEN/DATA/CLOSE/OOB. Feeds NEW_CHANNEL events and the port-forwarding flow above it."]

mod channel;
mod frame;
mod mux;
mod state;

pub use channel::MuxChannel;
pub use frame::{encode_frame, try_decode_frame, FrameType, CONTROL_CHANNEL_ID, HEADER_LEN};
pub use mux::{MuxEndpoint, MuxFilterFactory};
