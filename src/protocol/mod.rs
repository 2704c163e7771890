//! WebSocket wire protocol core (RFC 6455).

pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;
pub mod parser;
pub mod utf8;

pub use frame::{
    format_close_payload, format_message, is_valid_close_code, parse_close_payload, ClosePayload,
    CLOSE_CODE_ABNORMAL, CLOSE_CODE_NORMAL, MAX_CLOSE_REASON, MAX_CONTROL_PAYLOAD, MAX_HEADER,
};
pub use handshake::{build_upgrade_response, compute_accept_key, WS_GUID};
pub use mask::{apply_mask, apply_mask_fast, apply_mask_offset};
pub use opcode::OpCode;
pub use parser::FrameParser;
pub use utf8::is_valid_utf8;
