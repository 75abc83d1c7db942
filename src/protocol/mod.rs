//! Wire protocol: frames, commands, and the message payload format.
//!
//! The broker speaks a simple length-prefixed binary framing:
//!
//! ```text
//! ┌──────────┬────────────┬─────────────────┐
//! │ Size     │ Frame type │ Payload         │
//! │ 4 bytes  │ 4 bytes    │ size - 4 bytes  │
//! │ u32 BE   │ u32 BE     │                 │
//! └──────────┴────────────┴─────────────────┘
//! ```
//!
//! Commands travel in the other direction as ASCII verbs terminated by
//! `\n`; PUB and IDENTIFY additionally carry a 4-byte length-prefixed
//! body.

mod command;
mod frame;
mod message;
mod reader;

pub use command::{Command, IdentifyBody, MAGIC_V2};
pub use frame::{Frame, FrameType, ProtocolResponse, FRAME_HEADER_SIZE, HEARTBEAT};
pub use message::{Message, MessageId, MESSAGE_ID_LENGTH, MESSAGE_HEADER_LENGTH};
pub use reader::read_frame;
