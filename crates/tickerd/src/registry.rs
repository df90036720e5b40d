/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! # Handler Registry
//!
//! Maps function names to the code that runs them. Tickers only reference a
//! function by name; the dispatcher polls only for names registered here, so
//! nodes with different handler sets can share one store.
//!
//! ```rust,ignore
//! use tickerd::registry::{HandlerRegistry, TickerContext};
//!
//! let registry = HandlerRegistry::new();
//! registry.register_fn("send_email", |ctx: TickerContext| async move {
//!     let body: Email = ctx.request_json()?;
//!     mailer.send(body).await.map_err(HandlerError::retryable)
//! });
//! ```

use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::HandlerError;
use crate::models::{DueTicker, TickerKind};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Everything a handler is told about the attempt it is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerContext {
    pub kind: TickerKind,
    pub ticker_id: UniversalUuid,
    pub cron_ticker_id: Option<UniversalUuid>,
    pub parent_id: Option<UniversalUuid>,
    pub function: String,
    /// Opaque payload stored with the ticker
    pub request: Vec<u8>,
    /// Retries already spent before this attempt
    pub retry_count: i32,
    pub execution_time: UniversalTimestamp,
}

impl TickerContext {
    /// Decodes the request payload as JSON. A payload that does not decode
    /// will never decode, so the error is terminal.
    pub fn request_json<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        serde_json::from_slice(&self.request)
            .map_err(|e| HandlerError::terminal(format!("invalid request payload: {}", e)))
    }

    pub fn request_str(&self) -> Result<&str, HandlerError> {
        std::str::from_utf8(&self.request)
            .map_err(|e| HandlerError::terminal(format!("request is not UTF-8: {}", e)))
    }
}

impl From<&DueTicker> for TickerContext {
    fn from(due: &DueTicker) -> Self {
        Self {
            kind: due.kind,
            ticker_id: due.id,
            cron_ticker_id: due.cron_ticker_id,
            parent_id: due.parent_id,
            function: due.function.clone(),
            request: due.request.clone(),
            retry_count: due.retry_count,
            execution_time: due.execution_time,
        }
    }
}

/// A job body.
#[async_trait]
pub trait TickerHandler: Send + Sync {
    async fn call(&self, ctx: TickerContext) -> Result<(), HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TickerHandler for FnHandler<F>
where
    F: Fn(TickerContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn call(&self, ctx: TickerContext) -> Result<(), HandlerError> {
        (self.0)(ctx).await
    }
}

/// Shared, cloneable name-to-handler map.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn TickerHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, replacing any previous handler.
    pub fn register(&self, name: impl Into<String>, handler: impl TickerHandler + 'static) {
        let name = name.into();
        self.handlers.write().insert(name.clone(), Arc::new(handler));
        tracing::debug!("Registered handler: {}", name);
    }

    /// Registers an async closure.
    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(TickerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register(name, FnHandler(f));
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.handlers.write().remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TickerHandler>> {
        self.handlers.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}
