//! Read-only view of connector state
//!
//! The connector actor publishes a [`StatusSnapshot`] after every input it
//! applies. Readers only ever look at the latest value, so a query never waits
//! on the actor or the network.

use crate::connector::ConnectionState;
use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub state: ConnectionState,
    pub retry_attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
}

impl StatusSnapshot {
    pub fn idle(max_attempts: u32) -> Self {
        StatusSnapshot {
            state: ConnectionState::Idle,
            retry_attempts: 0,
            max_attempts,
            last_error: None,
        }
    }

    pub fn connected(&self) -> bool {
        self.state.is_connected()
    }
}

/// `QueryStatus` response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStatusResponse {
    pub connected: bool,
    pub retry_attempts: u32,
}

impl From<&StatusSnapshot> for QueryStatusResponse {
    fn from(snapshot: &StatusSnapshot) -> Self {
        QueryStatusResponse {
            connected: snapshot.connected(),
            retry_attempts: snapshot.retry_attempts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusReporter {
    rx: watch::Receiver<StatusSnapshot>,
}

impl StatusReporter {
    pub fn new(rx: watch::Receiver<StatusSnapshot>) -> Self {
        StatusReporter { rx }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.rx.borrow().clone()
    }

    pub fn query(&self) -> QueryStatusResponse {
        QueryStatusResponse::from(&*self.rx.borrow())
    }

    /// Resolves once a snapshot satisfies `predicate`, or the connector is gone
    pub async fn wait_for<F>(&self, mut predicate: F) -> Option<StatusSnapshot>
    where
        F: FnMut(&StatusSnapshot) -> bool,
    {
        let mut rx = self.rx.clone();
        let snapshot = match rx.wait_for(|s| predicate(s)).await {
            Ok(snapshot) => Some((*snapshot).clone()),
            Err(_) => None,
        };
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_reflects_latest_snapshot() {
        let (tx, rx) = watch::channel(StatusSnapshot::idle(10));
        let reporter = StatusReporter::new(rx);
        assert_eq!(
            reporter.query(),
            QueryStatusResponse {
                connected: false,
                retry_attempts: 0
            }
        );

        tx.send_replace(StatusSnapshot {
            state: ConnectionState::Reconnecting,
            retry_attempts: 3,
            max_attempts: 10,
            last_error: Some("stream closed by upstream".to_string()),
        });
        assert_eq!(reporter.query().retry_attempts, 3);
        assert!(!reporter.query().connected);
        assert_eq!(reporter.snapshot().state, ConnectionState::Reconnecting);
    }

    #[test]
    fn test_wire_form() {
        let response = QueryStatusResponse {
            connected: true,
            retry_attempts: 0,
        };
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"connected":true,"retryAttempts":0}"#
        );
    }

    #[tokio::test]
    async fn test_wait_for_state() {
        let (tx, rx) = watch::channel(StatusSnapshot::idle(10));
        let reporter = StatusReporter::new(rx);
        let waiter = tokio::spawn({
            let reporter = reporter.clone();
            async move { reporter.wait_for(|s| s.connected()).await }
        });

        let mut open = StatusSnapshot::idle(10);
        open.state = ConnectionState::Open;
        tx.send_replace(open.clone());
        assert_eq!(waiter.await.unwrap(), Some(open));
    }
}
