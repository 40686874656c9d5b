// ABOUTME: Cooperative cancellation tokens forming a session -> request -> call tree
// ABOUTME: Cancelling a parent cancels every descendant
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Cancellation
//!
//! Explicit cancellation tokens instead of ambient task aborts. Tokens form a
//! tree: each session owns a root token, each request derives a child, each
//! upstream call derives a grandchild. Cancelling a session cancels all of
//! its requests; cancelling a request cancels its in-flight upstream calls.
//! Waiting is cooperative via [`CancellationToken::cancelled`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Notify;

struct Shared {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<Shared>>>,
}

impl Shared {
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();
        let children = match self.children.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => Vec::new(),
        };
        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancel();
            }
        }
    }
}

/// A node in the cancellation tree
#[derive(Clone)]
pub struct CancellationToken {
    shared: Arc<Shared>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// A fresh root token
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Derive a child that is cancelled when this token is cancelled.
    /// An already-cancelled parent yields an already-cancelled child.
    #[must_use]
    pub fn child(&self) -> Self {
        let child = Self::new();
        if self.is_cancelled() {
            child.cancel();
            return child;
        }
        if let Ok(mut children) = self.shared.children.lock() {
            children.push(Arc::downgrade(&child.shared));
        }
        // Close the race: the parent may have cancelled between the check
        // and the registration
        if self.is_cancelled() {
            child.cancel();
        }
        child
    }

    /// Cancel this token and every descendant
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Whether cancellation has been requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancelled
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.shared.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_propagates_to_descendants() {
        let session = CancellationToken::new();
        let request = session.child();
        let upstream = request.child();

        session.cancel();
        assert!(request.is_cancelled());
        assert!(upstream.is_cancelled());
    }

    #[tokio::test]
    async fn cancelling_a_request_spares_its_siblings() {
        let session = CancellationToken::new();
        let request_a = session.child();
        let request_b = session.child();

        request_a.cancel();
        assert!(request_a.is_cancelled());
        assert!(!request_b.is_cancelled());
        assert!(!session.is_cancelled());
    }

    #[tokio::test]
    async fn child_of_cancelled_parent_is_born_cancelled() {
        let parent = CancellationToken::new();
        parent.cancel();
        assert!(parent.child().is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_wait_wakes_promptly() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        let woke = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(woke);
    }
}
