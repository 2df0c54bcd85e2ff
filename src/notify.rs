// src/notify.rs
//! Toast notifications for the view layer.
//!
//! The view owns one [`Notifier`] and passes it wherever an outcome needs reporting.
//! Toasts expire after a fixed time to live; when the queue is full the oldest is dropped.
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Default,
    Destructive,
}

#[derive(Debug, Clone)]
pub struct Toast {
    pub id: u64,
    pub title: String,
    pub description: Option<String>,
    pub variant: Variant,
    expires_at: Instant,
}

pub struct Notifier {
    queue: VecDeque<Toast>,
    capacity: usize,
    ttl: Duration,
    next_id: u64,
}

impl Notifier {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Notifier {
            queue: VecDeque::new(),
            capacity: capacity.max(1),
            ttl,
            next_id: 0,
        }
    }

    pub fn push_at(
        &mut self,
        now: Instant,
        title: impl Into<String>,
        description: Option<String>,
        variant: Variant,
    ) -> u64 {
        self.next_id += 1;
        let toast = Toast {
            id: self.next_id,
            title: title.into(),
            description,
            variant,
            expires_at: now + self.ttl,
        };
        match variant {
            Variant::Default => log::info!("Notify: {} {}", toast.title, toast.description.as_deref().unwrap_or("")),
            Variant::Destructive => log::warn!("Notify: {} {}", toast.title, toast.description.as_deref().unwrap_or("")),
        }
        self.queue.push_back(toast);
        while self.queue.len() > self.capacity {
            self.queue.pop_front();
        }
        self.next_id
    }

    pub fn info(&mut self, title: impl Into<String>, description: impl Into<String>) -> u64 {
        self.push_at(Instant::now(), title, Some(description.into()), Variant::Default)
    }

    pub fn error(&mut self, title: impl Into<String>, description: impl Into<String>) -> u64 {
        self.push_at(Instant::now(), title, Some(description.into()), Variant::Destructive)
    }

    /// Drops every toast whose time to live has run out by `now`.
    pub fn expire(&mut self, now: Instant) {
        self.queue.retain(|t| t.expires_at > now);
    }

    /// Active toasts, oldest first.
    pub fn active(&self) -> impl Iterator<Item = &Toast> {
        self.queue.iter()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
