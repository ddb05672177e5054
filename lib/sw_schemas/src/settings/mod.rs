//! The client settings packet: a fixed 428-byte little-endian payload whose
//! byte layout is shared with the legacy game client, plus the machinery to
//! address, override and merge individual (possibly bit-packed) fields.

pub mod identifier;
pub mod overrides;
pub mod packet;
pub mod prizes;
