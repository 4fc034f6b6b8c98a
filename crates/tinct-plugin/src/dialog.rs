//! Host-side proxies for plug-in dialogs.
//!
//! Plug-ins build their UI remotely over the `DIALOG` sub-protocol; the host
//! keeps a shadow tree per dialog so it can render items, route value
//! changes back, and reclaim everything when the owning channel dies.

use std::collections::HashMap;

use tinct_protocol::{ChannelId, DialogHandle, ItemHandle, ItemKind, ItemValue};

/// One proxied dialog item.
#[derive(Debug)]
pub struct DialogItem {
    pub handle: ItemHandle,
    pub kind: ItemKind,
    pub label: String,
    pub value: ItemValue,
    pub visible: bool,
    pub parent: Option<ItemHandle>,
    pub children: Vec<ItemHandle>,
}

/// Shadow tree for one plug-in dialog.
#[derive(Debug)]
pub struct Dialog {
    pub handle: DialogHandle,
    pub title: String,
    pub visible: bool,
    items: HashMap<ItemHandle, DialogItem>,
    /// Item roots, in creation order.
    roots: Vec<ItemHandle>,
    next_item: u32,
}

impl Dialog {
    fn new(handle: DialogHandle, title: String) -> Self {
        Dialog {
            handle,
            title,
            visible: false,
            items: HashMap::new(),
            roots: Vec::new(),
            next_item: 1,
        }
    }

    pub fn item(&self, handle: ItemHandle) -> Option<&DialogItem> {
        self.items.get(&handle)
    }

    pub fn item_mut(&mut self, handle: ItemHandle) -> Option<&mut DialogItem> {
        self.items.get_mut(&handle)
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn roots(&self) -> &[ItemHandle] {
        &self.roots
    }

    /// Create an item under `parent` (or at the root). Returns `None` when
    /// the parent handle does not exist; handles are never reused, so a
    /// stale parent cannot silently attach to a newer item.
    pub fn new_item(
        &mut self,
        parent: Option<ItemHandle>,
        kind: ItemKind,
        label: String,
        value: ItemValue,
    ) -> Option<ItemHandle> {
        if let Some(p) = parent {
            if !self.items.contains_key(&p) {
                return None;
            }
        }
        let handle = ItemHandle(self.next_item);
        self.next_item += 1;
        self.items.insert(
            handle,
            DialogItem {
                handle,
                kind,
                label,
                value,
                visible: true,
                parent,
                children: Vec::new(),
            },
        );
        match parent {
            Some(p) => self
                .items
                .get_mut(&p)
                .map(|item| item.children.push(handle))
                .unwrap_or_default(),
            None => self.roots.push(handle),
        }
        Some(handle)
    }

    /// Delete an item and its whole subtree, children first.
    pub fn delete_item(&mut self, handle: ItemHandle) -> bool {
        let Some(item) = self.items.get(&handle) else {
            return false;
        };
        let parent = item.parent;
        let children = item.children.clone();
        for child in children {
            self.delete_item(child);
        }
        self.items.remove(&handle);
        match parent {
            Some(p) => {
                if let Some(parent_item) = self.items.get_mut(&p) {
                    parent_item.children.retain(|c| *c != handle);
                }
            }
            None => self.roots.retain(|r| *r != handle),
        }
        true
    }
}

/// All live dialogs, keyed by handle, with channel ownership for reclaim.
#[derive(Debug, Default)]
pub struct DialogRegistry {
    dialogs: HashMap<DialogHandle, Dialog>,
    owner: HashMap<DialogHandle, ChannelId>,
    next: u32,
}

impl DialogRegistry {
    pub fn new() -> Self {
        DialogRegistry {
            dialogs: HashMap::new(),
            owner: HashMap::new(),
            next: 1,
        }
    }

    pub fn dialog_count(&self) -> usize {
        self.dialogs.len()
    }

    pub fn create(&mut self, channel: ChannelId, title: String) -> DialogHandle {
        let handle = DialogHandle(self.next);
        self.next += 1;
        self.dialogs.insert(handle, Dialog::new(handle, title));
        self.owner.insert(handle, channel);
        handle
    }

    pub fn get(&self, handle: DialogHandle) -> Option<&Dialog> {
        self.dialogs.get(&handle)
    }

    pub fn get_mut(&mut self, handle: DialogHandle) -> Option<&mut Dialog> {
        self.dialogs.get_mut(&handle)
    }

    pub fn owner(&self, handle: DialogHandle) -> Option<ChannelId> {
        self.owner.get(&handle).copied()
    }

    pub fn close(&mut self, handle: DialogHandle) -> bool {
        self.owner.remove(&handle);
        self.dialogs.remove(&handle).is_some()
    }

    /// Reclaim every dialog the channel owns. Returns the closed handles.
    pub fn close_all_for(&mut self, channel: ChannelId) -> Vec<DialogHandle> {
        let handles: Vec<DialogHandle> = self
            .owner
            .iter()
            .filter(|(_, owner)| **owner == channel)
            .map(|(handle, _)| *handle)
            .collect();
        for handle in &handles {
            self.close(*handle);
        }
        handles
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
