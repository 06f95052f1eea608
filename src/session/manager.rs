//! Process-wide owner of the observer state and the single network link.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::warn;

use super::connection::{Session, SessionConfig, SessionContext};
use super::negotiation::NegotiationPolicy;
use crate::error::{Result, SpanwireError};
use crate::observe::{ErrorQueue, ProgressList};
use crate::pipeline::EntityStore;
use crate::transport;

/// Marks the link as taken until dropped.
pub(crate) struct LinkGuard(Arc<AtomicBool>);

impl Drop for LinkGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Construct once and pass by reference to whatever opens connections or
/// displays their state.
#[derive(Debug, Default)]
pub struct SessionManager {
    errors: Arc<ErrorQueue>,
    progress: Arc<ProgressList>,
    policy: RwLock<NegotiationPolicy>,
    link: Arc<AtomicBool>,
}

impl SessionManager {
    pub fn new(policy: NegotiationPolicy) -> Self {
        Self {
            policy: RwLock::new(policy),
            ..Self::default()
        }
    }

    pub fn errors(&self) -> &Arc<ErrorQueue> {
        &self.errors
    }

    pub fn progress(&self) -> &Arc<ProgressList> {
        &self.progress
    }

    pub fn policy(&self) -> NegotiationPolicy {
        *self.policy.read()
    }

    /// Replace the policy. Applies to the next connection.
    pub fn set_policy(&self, policy: NegotiationPolicy) {
        *self.policy.write() = policy;
    }

    /// Whether a link is currently open.
    pub fn is_connected(&self) -> bool {
        self.link.load(Ordering::Acquire)
    }

    /// Open a TCP connection to `config.endpoint` and start a session.
    ///
    /// # Errors
    ///
    /// `AlreadyConnected` while another session is live, or the connect
    /// failure. Both are also pushed to the error queue.
    pub async fn connect(
        &self,
        config: &SessionConfig,
        store: Box<dyn EntityStore>,
    ) -> Result<Session> {
        let link = self.claim_link()?;
        let stream = match transport::connect(&config.endpoint).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(endpoint = %config.endpoint, "connect failed: {}", e);
                self.errors.push_error(&e);
                return Err(e);
            }
        };
        Ok(self.start(stream, config, store, link))
    }

    /// Start a session over an already connected stream.
    pub fn attach<S>(
        &self,
        stream: S,
        config: &SessionConfig,
        store: Box<dyn EntityStore>,
    ) -> Result<Session>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let link = self.claim_link()?;
        Ok(self.start(stream, config, store, link))
    }

    fn start<S>(
        &self,
        stream: S,
        config: &SessionConfig,
        store: Box<dyn EntityStore>,
        link: LinkGuard,
    ) -> Session
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let ctx = SessionContext {
            errors: self.errors.clone(),
            progress: self.progress.clone(),
            policy: self.policy(),
            link,
        };
        Session::start(stream, config, ctx, store)
    }

    fn claim_link(&self) -> Result<LinkGuard> {
        if self.link.swap(true, Ordering::AcqRel) {
            let err = SpanwireError::AlreadyConnected;
            warn!("{}", err);
            self.errors.push_error(&err);
            return Err(err);
        }
        Ok(LinkGuard(self.link.clone()))
    }
}
