//! Minimal context-menu contract used by collaboration UIs.
//!
//! Only the state machine lives here: a menu is opened at a screen
//! position with a list of items, and activating an item fires its
//! callback at most once before closing. Layout and input wiring belong to
//! the front end.

use std::fmt;
use std::sync::Arc;

/// Callback fired when an item is activated.
pub type MenuAction = Arc<dyn Fn() + Send + Sync>;

/// One entry of a context menu.
#[derive(Clone, Default)]
pub struct MenuItem {
    pub id: String,
    pub label: String,
    pub icon: Option<String>,
    pub shortcut: Option<String>,
    pub disabled: bool,
    /// Rendered as destructive
    pub danger: bool,
    pub on_click: Option<MenuAction>,
}

impl MenuItem {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn on_click(mut self, action: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_click = Some(Arc::new(action));
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn danger(mut self) -> Self {
        self.danger = true;
        self
    }
}

impl fmt::Debug for MenuItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MenuItem")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("icon", &self.icon)
            .field("shortcut", &self.shortcut)
            .field("disabled", &self.disabled)
            .field("danger", &self.danger)
            .field("on_click", &self.on_click.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct OpenMenu {
    x: f32,
    y: f32,
    items: Vec<MenuItem>,
}

/// A context menu that is either closed or open at one screen position.
#[derive(Debug, Default)]
pub struct ContextMenu {
    open: Option<OpenMenu>,
}

impl ContextMenu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open at `(x, y)`, replacing whatever was open.
    pub fn open(&mut self, x: f32, y: f32, items: Vec<MenuItem>) {
        self.open = Some(OpenMenu { x, y, items });
    }

    pub fn close(&mut self) {
        self.open = None;
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn position(&self) -> Option<(f32, f32)> {
        self.open.as_ref().map(|menu| (menu.x, menu.y))
    }

    pub fn items(&self) -> &[MenuItem] {
        match &self.open {
            Some(menu) => &menu.items,
            None => &[],
        }
    }

    /// Activate the item with `id`.
    ///
    /// Fires its callback and closes the menu. Disabled or unknown items
    /// leave the menu open and return `false`.
    pub fn activate(&mut self, id: &str) -> bool {
        let Some(menu) = &self.open else {
            return false;
        };
        let Some(item) = menu.items.iter().find(|item| item.id == id && !item.disabled) else {
            return false;
        };
        let action = item.on_click.clone();
        self.open = None;
        if let Some(action) = action {
            action();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_item(id: &str, hits: &Arc<AtomicUsize>) -> MenuItem {
        let hits = hits.clone();
        MenuItem::new(id, id.to_uppercase()).on_click(move || {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_activate_fires_once_and_closes() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut menu = ContextMenu::new();
        menu.open(10.0, 20.0, vec![counter_item("copy", &hits)]);

        assert!(menu.activate("copy"));
        assert!(!menu.is_open());
        // Closed: a second activation cannot fire again.
        assert!(!menu.activate("copy"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disabled_item_does_nothing() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut menu = ContextMenu::new();
        menu.open(0.0, 0.0, vec![counter_item("delete", &hits).disabled().danger()]);

        assert!(!menu.activate("delete"));
        assert!(menu.is_open());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_open_replaces_previous() {
        let mut menu = ContextMenu::new();
        menu.open(1.0, 2.0, vec![MenuItem::new("a", "A")]);
        menu.open(3.0, 4.0, vec![MenuItem::new("b", "B"), MenuItem::new("c", "C")]);

        assert_eq!(menu.position(), Some((3.0, 4.0)));
        assert_eq!(menu.items().len(), 2);

        menu.close();
        assert!(menu.items().is_empty());
        assert_eq!(menu.position(), None);
    }

    #[test]
    fn test_item_without_action_still_closes() {
        let mut menu = ContextMenu::new();
        menu.open(0.0, 0.0, vec![MenuItem::new("noop", "Nothing")]);
        assert!(menu.activate("noop"));
        assert!(!menu.is_open());
    }
}
