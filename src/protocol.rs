//! SmartHome wire protocol
//! Fixed framing: 4-byte value requests, 3-byte-prefix replies

/// Wire constants for one device under test.
///
/// All ids, ports and command codes travel together as one immutable value,
/// so no component depends on module-level globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// UDP port the device listens and replies on.
    pub port: u16,
    /// Device id of the target under test.
    pub target_device_id: u8,
    /// Sub-addressable unit inside the target.
    pub target_subdevice_id: u8,
    /// Command code of a value request.
    pub request_command: u8,
    /// Command code of a value reply.
    pub reply_command: u8,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            port: 8888,
            target_device_id: 2,
            target_subdevice_id: 1,
            request_command: 5,
            reply_command: 6,
        }
    }
}

impl ProtocolConfig {
    /// Build a value-request datagram originating from `device_id`.
    pub fn request(&self, device_id: u8) -> [u8; 4] {
        [
            device_id,
            self.target_device_id,
            self.request_command,
            self.target_subdevice_id,
        ]
    }

    /// Whether `datagram` is a reply matching a request sent as `device_id`.
    ///
    /// Only the first three bytes are inspected: sender, receiver and command.
    /// Datagrams shorter than three bytes never match. Our own broadcast
    /// requests loop back onto the run socket and are rejected here because
    /// their sender byte is never the target's id.
    pub fn is_reply(&self, datagram: &[u8], device_id: u8) -> bool {
        if datagram.len() < 3 {
            return false;
        }
        datagram[0] == self.target_device_id
            && datagram[1] == device_id
            && datagram[2] == self.reply_command
    }

    /// The reply a well-behaved device would send for `device_id`.
    pub fn reply(&self, device_id: u8) -> [u8; 3] {
        [self.target_device_id, device_id, self.reply_command]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_layout() {
        let protocol = ProtocolConfig::default();
        assert_eq!(protocol.request(254), [254, 2, 5, 1]);
        assert_eq!(protocol.request(100), [100, 2, 5, 1]);
    }

    #[test]
    fn reply_matches_exactly() {
        let protocol = ProtocolConfig::default();
        assert!(protocol.is_reply(&[2, 254, 6], 254));
        // Replies may carry trailing payload bytes.
        assert!(protocol.is_reply(&[2, 254, 6, 42, 43], 254));
    }

    #[test]
    fn reply_filter_rejects_mismatches() {
        let protocol = ProtocolConfig::default();
        // Wrong sender.
        assert!(!protocol.is_reply(&[3, 254, 6], 254));
        // Wrong receiver.
        assert!(!protocol.is_reply(&[2, 253, 6], 254));
        // Wrong command.
        assert!(!protocol.is_reply(&[2, 254, 5], 254));
        // Too short.
        assert!(!protocol.is_reply(&[2, 254], 254));
        assert!(!protocol.is_reply(&[], 254));
    }

    #[test]
    fn own_request_does_not_count_as_reply() {
        let protocol = ProtocolConfig::default();
        let request = protocol.request(200);
        assert!(!protocol.is_reply(&request, 200));
    }

    #[test]
    fn reply_builder_round_trips_through_filter() {
        let protocol = ProtocolConfig::default();
        assert!(protocol.is_reply(&protocol.reply(150), 150));
        assert!(!protocol.is_reply(&protocol.reply(150), 151));
    }
}
