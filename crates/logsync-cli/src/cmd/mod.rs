pub mod completions;
pub mod config;
pub mod follow;
pub mod replay;
pub mod sim;

use logsync_core::EntityStore;
use logsync_core::view;

/// Window title for the store's current view.
pub fn current_title(store: &EntityStore, suffix: &str) -> String {
    let selected = view::select_sections(&store.summaries(), &store.layout());
    let name = store
        .read_snapshot()
        .found()
        .map(|snapshot| snapshot.config.name)
        .unwrap_or_default();
    view::window_title(&name, view::total_unread(&selected.sources), suffix)
}
