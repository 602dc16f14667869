//! Engine session: one connector and the transport of its current lifetime.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::DebugResult;
use crate::protocol::EngineEvent;
use crate::signal::Subscription;
use crate::transport::{Connector, Transport};

/// The channel source a controller needs before it can start.
pub struct DebugSession {
    connector: Mutex<Box<dyn Connector>>,
    transport: Mutex<Option<Transport>>,
    request_timeout: Option<Duration>,
}

impl fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugSession")
            .field("connected", &self.is_connected())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl DebugSession {
    #[must_use]
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self {
            connector: Mutex::new(Box::new(connector)),
            transport: Mutex::new(None),
            request_timeout: None,
        }
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Open a fresh transport, disposing the previous one if any.
    pub fn connect(&self) -> DebugResult<(Transport, Subscription<EngineEvent>)> {
        let channel = self.connector.lock().connect()?;
        let (transport, events) = Transport::open(channel, self.request_timeout);
        if let Some(previous) = self.transport.lock().replace(transport.clone()) {
            debug!("replacing previous engine transport");
            previous.dispose();
        }
        Ok((transport, events))
    }

    #[must_use]
    pub fn transport(&self) -> Option<Transport> {
        self.transport.lock().clone()
    }

    pub fn disconnect(&self) {
        if let Some(transport) = self.transport.lock().take() {
            transport.dispose();
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport
            .lock()
            .as_ref()
            .is_some_and(Transport::is_open)
    }
}

#[cfg(test)]
mod tests {
    use super::DebugSession;
    use crate::error::{DebugError, DebugResult};
    use crate::transport::{Channel, Connector};

    struct PairConnector {
        engines: Vec<Channel>,
    }

    impl Connector for PairConnector {
        fn connect(&mut self) -> DebugResult<Channel> {
            let (client, engine) = Channel::pair();
            self.engines.push(engine);
            Ok(client)
        }
    }

    struct FailingConnector;

    impl Connector for FailingConnector {
        fn connect(&mut self) -> DebugResult<Channel> {
            Err(DebugError::configuration("engine unavailable"))
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn reconnect_disposes_previous_transport() {
        let session = DebugSession::new(PairConnector {
            engines: Vec::new(),
        });
        let (first, _events) = session.connect().unwrap();
        let (second, _events) = session.connect().unwrap();

        assert!(!first.is_open());
        assert!(second.is_open());
        assert!(session.is_connected());

        session.disconnect();
        assert!(!session.is_connected());
        assert!(session.transport().is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn connector_errors_are_returned() {
        let session = DebugSession::new(FailingConnector);
        assert!(matches!(
            session.connect(),
            Err(DebugError::Configuration(_))
        ));
        assert!(!session.is_connected());
    }
}
