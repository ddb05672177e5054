//! Contract of the wire transport. The UDP reliable layer lives elsewhere;
//! the core only needs to hand it finished packet bytes for a player.

use bitflags::bitflags;
use sw_schemas::PlayerId;

bitflags! {
    /// Delivery options for an outgoing packet.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct SendFlags: u8 {
        /// Deliver through the reliable stream.
        const RELIABLE = 1 << 0;
    }
}

/// Implemented by the transport module and published through the broker.
/// Sends may silently fail at the network layer; callers do not retry.
pub trait NetworkLink: Send + Sync + 'static {
    /// Queues a finished packet for one player.
    fn send_to_player(&self, player: PlayerId, bytes: &[u8], flags: SendFlags);
}

/// A transport stub that records what would have been sent; used by the
/// dedicated server until a real transport registers, and by tests.
#[derive(Default)]
pub struct RecordingLink {
    sent: std::sync::Mutex<Vec<(PlayerId, Vec<u8>, SendFlags)>>,
}

impl RecordingLink {
    /// Takes everything recorded so far.
    pub fn drain(&self) -> Vec<(PlayerId, Vec<u8>, SendFlags)> {
        std::mem::take(&mut self.sent.lock().unwrap())
    }
}

impl NetworkLink for RecordingLink {
    fn send_to_player(&self, player: PlayerId, bytes: &[u8], flags: SendFlags) {
        self.sent.lock().unwrap().push((player, bytes.to_vec(), flags));
    }
}
