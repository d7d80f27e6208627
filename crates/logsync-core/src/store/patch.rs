//! Partial updates for the two write paths of the store.
//!
//! A [`SourcePatch`] can only reach message-connection fields, and a
//! [`SnapshotPatch`] can only reach project snapshot fields. The push channel
//! writes the former, the poll channel the latter, so neither writer can
//! overwrite what the other owns.

use crate::model::{
    Cursor, LayoutState, Message, MessageConnection, ProcessInfo, ProjectConfig, ProjectSettings,
    ProjectSnapshot, UserSettings,
};

/// Fields of a source's message connection, each replaced only when `Some`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePatch {
    pub count: Option<usize>,
    pub unread_count: Option<usize>,
    pub nodes: Option<Vec<Message>>,
    pub last_read_cursor: Option<Cursor>,
}

impl SourcePatch {
    /// Store paths this patch type may write.
    pub const FIELDS: [&'static str; 4] = [
        "messages.count",
        "messages.unread_count",
        "messages.nodes",
        "messages.last_read_cursor",
    ];

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count.is_none()
            && self.unread_count.is_none()
            && self.nodes.is_none()
            && self.last_read_cursor.is_none()
    }

    /// Merge the set fields into `target`, leaving the rest intact.
    pub fn apply_to(self, target: &mut MessageConnection) {
        if let Some(count) = self.count {
            target.count = count;
        }
        if let Some(unread) = self.unread_count {
            target.unread_count = unread;
        }
        if let Some(nodes) = self.nodes {
            target.nodes = nodes;
        }
        if let Some(cursor) = self.last_read_cursor {
            target.last_read_cursor = Some(cursor);
        }
    }
}

/// Project snapshot fields, each replaced only when `Some`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotPatch {
    pub manifest_url: Option<String>,
    pub settings: Option<ProjectSettings>,
    pub config: Option<ProjectConfig>,
    pub user_settings: Option<UserSettings>,
    pub layout: Option<LayoutState>,
    pub process_info: Option<ProcessInfo>,
}

impl SnapshotPatch {
    /// Store paths this patch type may write.
    pub const FIELDS: [&'static str; 6] = [
        "snapshot.manifest_url",
        "snapshot.settings",
        "snapshot.config",
        "snapshot.user_settings",
        "snapshot.layout",
        "snapshot.process_info",
    ];

    pub fn apply_to(self, target: &mut ProjectSnapshot) {
        if let Some(url) = self.manifest_url {
            target.manifest_url = Some(url);
        }
        if let Some(settings) = self.settings {
            target.settings = settings;
        }
        if let Some(config) = self.config {
            target.config = config;
        }
        if let Some(user_settings) = self.user_settings {
            target.user_settings = user_settings;
        }
        if let Some(layout) = self.layout {
            target.layout = layout;
        }
        if let Some(info) = self.process_info {
            target.process_info = info;
        }
    }
}

impl From<ProjectSnapshot> for SnapshotPatch {
    fn from(snapshot: ProjectSnapshot) -> Self {
        Self {
            manifest_url: snapshot.manifest_url,
            settings: Some(snapshot.settings),
            config: Some(snapshot.config),
            user_settings: Some(snapshot.user_settings),
            layout: Some(snapshot.layout),
            process_info: Some(snapshot.process_info),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HostType, SourceId};
    use std::collections::HashSet;

    #[test]
    fn field_sets_are_disjoint() {
        let source: HashSet<_> = SourcePatch::FIELDS.iter().collect();
        let snapshot: HashSet<_> = SnapshotPatch::FIELDS.iter().collect();
        assert!(source.is_disjoint(&snapshot));
        assert!(SourcePatch::FIELDS.iter().all(|f| f.starts_with("messages.")));
        assert!(SnapshotPatch::FIELDS.iter().all(|f| f.starts_with("snapshot.")));
    }

    #[test]
    fn source_patch_leaves_unset_fields() {
        let mut conn = MessageConnection {
            count: 0,
            unread_count: 3,
            nodes: Vec::new(),
            last_read_cursor: Some(Cursor::new("c9")),
        };
        SourcePatch {
            count: Some(0),
            ..SourcePatch::default()
        }
        .apply_to(&mut conn);
        assert_eq!(conn.unread_count, 3);
        assert_eq!(conn.last_read_cursor, Some(Cursor::new("c9")));
    }

    #[test]
    fn snapshot_patch_merges_partial_update() {
        let mut snapshot = ProjectSnapshot::default();
        snapshot.layout.sources = vec![SourceId::new("p1")];
        SnapshotPatch {
            settings: Some(ProjectSettings {
                host_type: HostType::Tunnel,
            }),
            ..SnapshotPatch::default()
        }
        .apply_to(&mut snapshot);
        assert_eq!(snapshot.settings.host_type, HostType::Tunnel);
        assert_eq!(snapshot.layout.sources, vec![SourceId::new("p1")]);
    }

    #[test]
    fn empty_patch_is_empty() {
        assert!(SourcePatch::default().is_empty());
        assert!(
            !SourcePatch {
                unread_count: Some(1),
                ..SourcePatch::default()
            }
            .is_empty()
        );
    }
}
