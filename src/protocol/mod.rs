//! Protocol module for parsing frames and building commands.
//!
//! This module contains the implementations for:
//! - Notification frame decoding
//! - The stream start command

pub mod command;
pub mod frame;

pub use command::START_STREAM_COMMAND;
pub use frame::{
    decode, decode_at, BatteryLevel, DecodedReading, FrameField, FrameFlags, FrameRejection,
    FRAME_LEN,
};
