//! Channel names: `<base>:<hex room id>`.

use texhub_core::types::{HEX_ID_LEN, ProjectId};

/// Channel carrying the events of `room_id`.
pub fn channel_name(base: &str, room_id: ProjectId) -> String {
    format!("{base}:{}", room_id.to_hex())
}

/// Recover the room id from a channel name produced by [`channel_name`].
///
/// Names of the wrong length, with a different base, or with a malformed
/// id yield `None`.
pub fn room_id(base: &str, channel: &str) -> Option<ProjectId> {
    if channel.len() != base.len() + 1 + HEX_ID_LEN {
        return None;
    }
    let hex = channel.strip_prefix(base)?.strip_prefix(':')?;
    ProjectId::from_hex(hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let id = ProjectId::new();
        let name = channel_name("editor-events", id);
        assert_eq!(name.len(), "editor-events".len() + 33);
        assert_eq!(room_id("editor-events", &name), Some(id));
    }

    #[test]
    fn test_malformed_names_ignored() {
        let id = ProjectId::new();
        let good = channel_name("editor-events", id);
        assert_eq!(room_id("other-events!", &good), None);
        assert_eq!(room_id("editor-events", &good[..good.len() - 1]), None);
        assert_eq!(room_id("editor-events", &format!("{good}0")), None);
        assert_eq!(
            room_id("editor-events", &format!("editor-events:{}", "z".repeat(32))),
            None
        );
        assert_eq!(
            room_id("editor-events", &format!("editor-events;{}", id.to_hex())),
            None
        );
        // Multi-byte characters at the split point must not panic.
        assert_eq!(
            room_id("editor-events", &format!("editor-event\u{e9}{}", id.to_hex())),
            None
        );
    }
}
