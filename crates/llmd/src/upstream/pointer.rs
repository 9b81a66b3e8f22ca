// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use arc_swap::ArcSwapOption;

/// Lock-free, single-writer/many-reader holder of the current child's base
/// URL. Empty (`None`) means "no model selected; reject inference".
#[derive(Default)]
pub struct UpstreamPointer(ArcSwapOption<str>);

impl UpstreamPointer {
    pub fn new() -> Self {
        Self(ArcSwapOption::from(None))
    }

    /// Current base URL, or `None` if no model is selected.
    pub fn get(&self) -> Option<Arc<str>> {
        self.0.load_full()
    }

    /// Replace the base URL. Pass `None` to clear it.
    pub fn set(&self, url: Option<Arc<str>>) {
        self.0.store(url);
    }

    pub fn clear(&self) {
        self.set(None);
    }
}
