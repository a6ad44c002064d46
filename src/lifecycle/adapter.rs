//! Calls into the live network adapter.
//!
//! Adapter methods block, so every call moves the adapter onto the blocking
//! pool and takes it back when the call returns. A bounded call that
//! expires leaves the adapter with its still-running task; the slot stays
//! empty and the orchestrator obtains a fresh adapter.

use std::time::Duration;

use anyhow::Context;
use tokio::task::{JoinError, spawn_blocking};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{Inner, Shared};
use crate::engine::LiveNetwork;
use crate::error::{Result, TopologyError};

type Outcome<T> = (Box<dyn LiveNetwork>, anyhow::Result<T>);

fn take(inner: &mut Inner, what: &str) -> Result<Box<dyn LiveNetwork>> {
    inner
        .engine
        .take()
        .ok_or_else(|| TopologyError::Engine(format!("{what}: no live network adapter")))
}

fn settle<T>(
    inner: &mut Inner,
    what: &str,
    joined: std::result::Result<Outcome<T>, JoinError>,
) -> Result<T> {
    match joined {
        Ok((engine, res)) => {
            inner.engine = Some(engine);
            res.map_err(|e| TopologyError::engine(what, e))
        }
        Err(err) => {
            // the adapter went down with its task
            inner.stale = true;
            Err(TopologyError::Engine(format!("{what}: adapter task failed: {err}")))
        }
    }
}

/// Run `f` against the adapter on the blocking pool.
pub(super) async fn call<T, F>(inner: &mut Inner, what: &str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut dyn LiveNetwork) -> anyhow::Result<T> + Send + 'static,
{
    let mut engine = take(inner, what)?;
    let joined = spawn_blocking(move || {
        let res = f(engine.as_mut());
        (engine, res)
    })
    .await;
    settle(inner, what, joined)
}

/// Like [`call`], but gives up after `limit`.
pub(super) async fn call_bounded<T, F>(
    inner: &mut Inner,
    what: &str,
    limit: Duration,
    f: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut dyn LiveNetwork) -> anyhow::Result<T> + Send + 'static,
{
    let mut engine = take(inner, what)?;
    let task = spawn_blocking(move || {
        let res = f(engine.as_mut());
        (engine, res)
    });
    match timeout(limit, task).await {
        Ok(joined) => settle(inner, what, joined),
        Err(_) => {
            inner.stale = true;
            warn!(what, ?limit, "adapter call timed out, abandoning adapter");
            Err(TopologyError::Timeout(format!("{what} after {limit:?}")))
        }
    }
}

impl Shared {
    /// Discard the adapter, obtain a fresh one and replay the store into
    /// it: controllers, switches, host-like nodes, then links.
    pub(super) async fn rebuild(&self, inner: &mut Inner) -> Result<()> {
        inner.engine = None;
        inner.stale = true;

        let engine = self
            .factory
            .create()
            .map_err(|e| TopologyError::engine("create adapter", e))?;
        inner.engine = Some(engine);

        let nodes = inner.store.nodes();
        let links = inner.store.links();
        let (node_count, link_count) = (nodes.len(), links.len());
        call(inner, "rebuild", move |net| {
            for node in &nodes {
                net.add_node(node)
                    .with_context(|| format!("declare node '{}'", node.id()))?;
            }
            for link in &links {
                net.add_link(link)
                    .with_context(|| format!("declare link {}", link.key))?;
            }
            Ok(())
        })
        .await?;

        inner.stale = false;
        debug!(nodes = node_count, links = link_count, "adapter rebuilt");
        Ok(())
    }

    /// Stop everything under the stop timeout and drop the adapter. Never
    /// fails; problems are logged.
    pub(super) async fn teardown(&self, inner: &mut Inner) {
        if inner.engine.is_some() {
            let limit = self.timeouts.stop;
            match call_bounded(inner, "stop", limit, |net| net.stop_all()).await {
                Ok(()) => debug!("adapter torn down"),
                Err(TopologyError::Timeout(msg)) => {
                    warn!(%msg, "teardown did not finish, continuing without it")
                }
                Err(err) => warn!(error = %err, "teardown failed, continuing"),
            }
        }
        inner.engine = None;
        inner.stale = true;
    }
}
