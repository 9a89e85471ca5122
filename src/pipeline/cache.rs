use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::{
    model::TaskType,
    pipeline::{GenerationMetrics, GenerationParameters},
};

#[derive(Debug, Clone, PartialEq)]
pub struct CachedGeneration {
    pub text: String,
    pub metrics: GenerationMetrics,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CachedGeneration>,
    order: VecDeque<String>,
}

/// Bounded FIFO cache for greedy generations. Sampled output is never cached.
pub struct ResponseCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// `None` when the call is not cacheable.
    pub fn key(
        &self,
        task: TaskType,
        prompt: &str,
        params: &GenerationParameters,
    ) -> Option<String> {
        if self.capacity == 0 || params.do_sample {
            return None;
        }
        Some(format!(
            "{task}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{prompt}",
            params.max_new_tokens, params.top_p, params.top_k, params.repetition_penalty
        ))
    }

    pub fn get(&self, key: &str) -> Option<CachedGeneration> {
        self.state.lock().entries.get(key).cloned()
    }

    pub fn insert(&self, key: String, value: CachedGeneration) {
        if self.capacity == 0 {
            return;
        }
        let mut state = self.state.lock();
        if state.entries.insert(key.clone(), value).is_none() {
            state.order.push_back(key);
        }
        while state.order.len() > self.capacity {
            if let Some(oldest) = state.order.pop_front() {
                state.entries.remove(&oldest);
            }
        }
    }

    /// Empties the cache and returns how many entries were dropped.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.entries.len();
        state.entries.clear();
        state.order.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
