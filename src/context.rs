// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Request-scoped propagation values.
//!
//! A [`Context`] travels with every hook, middleware and router invocation
//! on a channel. It is an immutable persistent map: `with_value` returns a
//! new `Context` sharing structure with its parent, so cloning is a single
//! `Arc` bump and a value attached inside an `OnChannel` hook stays visible
//! to every later pipeline run on that channel.

use std::{
    any::{Any, TypeId},
    fmt,
    sync::Arc,
};

#[derive(Clone, Default)]
pub struct Context {
    head: Option<Arc<Node>>,
}

struct Node {
    key: TypeId,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<Node>>,
}

impl Context {
    pub fn new() -> Self {
        Self { head: None }
    }

    /// Returns a child context carrying `value`, keyed by its type. A later
    /// `with_value` of the same type shadows the earlier one.
    pub fn with_value<T: Any + Send + Sync>(&self, value: T) -> Self {
        Self {
            head: Some(Arc::new(Node {
                key: TypeId::of::<T>(),
                value: Arc::new(value),
                parent: self.head.clone(),
            })),
        }
    }

    /// Looks up the innermost value of type `T`.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let mut cursor = self.head.as_ref();
        while let Some(node) = cursor {
            if node.key == TypeId::of::<T>() {
                return Arc::clone(&node.value).downcast::<T>().ok();
            }
            cursor = node.parent.as_ref();
        }
        None
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.get::<T>().is_some()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut depth = 0usize;
        let mut cursor = self.head.as_ref();
        while let Some(node) = cursor {
            depth += 1;
            cursor = node.parent.as_ref();
        }
        f.debug_struct("Context").field("depth", &depth).finish()
    }
}
