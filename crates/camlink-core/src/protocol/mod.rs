//! Protocol module containing message types, the binary codec, frame
//! reassembly, and sequence numbering.

pub mod assembler;
pub mod codec;
pub mod messages;
pub mod sequence;

pub use assembler::FrameAssembler;
pub use codec::{
    checksum, decode_frame, decode_frames, decode_parameters, encode_command, encode_frame,
    encode_message, encode_parameters, parse_frame, DecodeOutcome, ProtocolError,
};
pub use messages::*;
pub use sequence::SequenceCounter;
