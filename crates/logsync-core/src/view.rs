//! Which sources are on screen, and the derived window title.

use std::collections::BTreeSet;

use crate::model::{LayoutState, SourceId, SourceKind};
use crate::store::{EntityStore, SourceSummary};

/// The set of source ids currently visible to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectView {
    ids: BTreeSet<SourceId>,
}

impl ProjectView {
    #[must_use]
    pub fn contains(&self, id: &SourceId) -> bool {
        self.ids.contains(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceId> {
        self.ids.iter()
    }
}

impl FromIterator<SourceId> for ProjectView {
    fn from_iter<I: IntoIterator<Item = SourceId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// Result of section selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sections {
    /// Sources shown as panes, in layout order.
    pub sections: Vec<SourceSummary>,
    /// Every listable source, in server order.
    pub sources: Vec<SourceSummary>,
}

/// Pick the visible sections from the layout.
///
/// An `Issues` source with no messages is not listed at all. Layout ids that
/// no longer name a listed source are skipped. When nothing in the layout
/// survives, the first non-`Issues` source is shown on its own.
#[must_use]
pub fn select_sections(sources: &[SourceSummary], layout: &LayoutState) -> Sections {
    let listed: Vec<SourceSummary> = sources
        .iter()
        .filter(|s| !(s.kind == SourceKind::Issues && s.count == 0))
        .cloned()
        .collect();

    let mut sections: Vec<SourceSummary> = layout
        .sources
        .iter()
        .filter_map(|id| listed.iter().find(|s| &s.id == id).cloned())
        .collect();

    if sections.is_empty() {
        sections.extend(
            listed
                .iter()
                .find(|s| s.kind != SourceKind::Issues)
                .cloned(),
        );
    }

    Sections {
        sections,
        sources: listed,
    }
}

/// The current view as derived from the store's layout and sources.
#[must_use]
pub fn project_view(store: &EntityStore) -> ProjectView {
    let selected = select_sections(&store.summaries(), &store.layout());
    selected.sections.into_iter().map(|s| s.id).collect()
}

#[must_use]
pub fn total_unread(sources: &[SourceSummary]) -> usize {
    sources.iter().map(|s| s.unread_count).sum()
}

/// `"(N) name on suffix"` when there is anything unread, else `"name on suffix"`.
#[must_use]
pub fn window_title(name: &str, unread: usize, suffix: &str) -> String {
    if unread > 0 {
        format!("({unread}) {name} on {suffix}")
    } else {
        format!("{name} on {suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_summary(id: &str, kind: SourceKind, count: usize, unread: usize) -> SourceSummary {
        SourceSummary {
            id: SourceId::new(id),
            kind,
            name: id.to_string(),
            count,
            unread_count: unread,
            last_read_cursor: None,
        }
    }

    fn layout_of(ids: &[&str]) -> LayoutState {
        LayoutState {
            selected: None,
            sources: ids.iter().map(|id| SourceId::new(*id)).collect(),
        }
    }

    #[test]
    fn empty_issues_source_is_not_listed() {
        let sources = [
            make_summary("issues", SourceKind::Issues, 0, 0),
            make_summary("p1", SourceKind::Process, 2, 0),
        ];
        let selected = select_sections(&sources, &layout_of(&["issues", "p1"]));
        assert_eq!(selected.sources.len(), 1);
        assert_eq!(selected.sections.len(), 1);
        assert_eq!(selected.sections[0].id.as_str(), "p1");
    }

    #[test]
    fn issues_with_messages_can_be_a_section() {
        let sources = [
            make_summary("issues", SourceKind::Issues, 1, 1),
            make_summary("p1", SourceKind::Process, 0, 0),
        ];
        let selected = select_sections(&sources, &layout_of(&["issues"]));
        assert_eq!(selected.sections[0].kind, SourceKind::Issues);
    }

    #[test]
    fn falls_back_to_first_non_issues_source() {
        let sources = [
            make_summary("issues", SourceKind::Issues, 3, 0),
            make_summary("d1", SourceKind::Device, 0, 0),
            make_summary("p1", SourceKind::Process, 0, 0),
        ];
        let selected = select_sections(&sources, &layout_of(&["gone"]));
        assert_eq!(selected.sections.len(), 1);
        assert_eq!(selected.sections[0].id.as_str(), "d1");
    }

    #[test]
    fn no_fallback_when_only_issues() {
        let sources = [make_summary("issues", SourceKind::Issues, 3, 0)];
        let selected = select_sections(&sources, &LayoutState::default());
        assert!(selected.sections.is_empty());
    }

    #[test]
    fn sections_follow_layout_order() {
        let sources = [
            make_summary("p1", SourceKind::Process, 0, 0),
            make_summary("d1", SourceKind::Device, 0, 0),
        ];
        let selected = select_sections(&sources, &layout_of(&["d1", "p1"]));
        let ids: Vec<_> = selected.sections.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["d1", "p1"]);
    }

    #[test]
    fn title_includes_unread_only_when_positive() {
        assert_eq!(
            window_title("demo", 3, "Developer Tools"),
            "(3) demo on Developer Tools"
        );
        assert_eq!(window_title("demo", 0, "Developer Tools"), "demo on Developer Tools");
    }

    #[test]
    fn total_unread_sums_sources() {
        let sources = [
            make_summary("p1", SourceKind::Process, 5, 2),
            make_summary("d1", SourceKind::Device, 5, 3),
        ];
        assert_eq!(total_unread(&sources), 5);
    }
}
