// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Process shutdown hooks.
//!
//! Components register a cleanup closure here instead of installing their own
//! exit handlers. The binary runs the registry once on Ctrl-C or SIGTERM.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub struct ShutdownHooks {
    hooks: Mutex<Vec<(String, Hook)>>,
}

impl ShutdownHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: impl Into<String>, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut hooks = self.hooks.lock().unwrap_or_else(|e| e.into_inner());
        hooks.push((name.into(), Box::new(hook)));
    }

    /// Runs every registered hook in reverse registration order.
    ///
    /// Hooks are consumed, so a second call is a no-op. A panicking hook is
    /// logged and does not stop the remaining ones.
    pub fn run_all(&self) {
        let hooks = {
            let mut hooks = self.hooks.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *hooks)
        };

        for (name, hook) in hooks.into_iter().rev() {
            tracing::debug!("Running shutdown hook '{name}'");
            if panic::catch_unwind(AssertUnwindSafe(hook)).is_err() {
                tracing::error!("Shutdown hook '{name}' panicked");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.hooks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
