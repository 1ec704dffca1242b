//! Mock network stack for testing

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::sync::Mutex;

use crate::backend::NetworkStack;
use crate::core::error::{ApplyError, NetworkError, NetworkResult};
use crate::core::types::{ConnectivityStatus, Credentials};

/// Internal state for the mock network stack
#[derive(Debug, Default)]
struct MockState {
    active_network: Option<String>,
    should_fail_activate: bool,
    supports_rollback: bool,
    /// Scripted answers consumed by `query_connectivity` before the default
    scripted_queries: VecDeque<ConnectivityStatus>,
    /// When set, queries never report association
    never_associate: bool,
    activate_delay: Duration,
    query_delay: Duration,
    activations: Vec<String>,
    rollbacks: Vec<String>,
    query_count: u32,
    calls: Vec<NetworkCall>,
}

/// A call made against the mock, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
enum NetworkCall {
    Activate(String),
    Query(String),
}

/// Mock network stack for testing
///
/// Activations succeed immediately and report association with the activated
/// network unless configured otherwise. Every activation and connectivity
/// query is logged so tests can check that attempts never overlap.
#[derive(Debug, Clone, Default)]
pub struct MockNetworkStack {
    inner: Arc<Mutex<MockState>>,
}

impl MockNetworkStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure mock to reject every activation
    pub async fn set_activate_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_activate = should_fail;
    }

    /// Configure mock to support rollback
    pub async fn set_rollback_support(&self, supported: bool) {
        self.inner.lock().await.supports_rollback = supported;
    }

    /// Configure mock to never report an association
    pub async fn set_never_associate(&self, never: bool) {
        self.inner.lock().await.never_associate = never;
    }

    /// Queue connectivity answers returned before the default behaviour
    pub async fn script_queries(&self, answers: Vec<ConnectivityStatus>) {
        self.inner.lock().await.scripted_queries.extend(answers);
    }

    /// Make each activation take `delay`
    pub async fn set_activate_delay(&self, delay: Duration) {
        self.inner.lock().await.activate_delay = delay;
    }

    /// Make each connectivity query take `delay`
    pub async fn set_query_delay(&self, delay: Duration) {
        self.inner.lock().await.query_delay = delay;
    }

    /// Network names passed to `activate`, in call order
    pub async fn activations(&self) -> Vec<String> {
        self.inner.lock().await.activations.clone()
    }

    /// Network names passed to `rollback`, in call order
    pub async fn rollbacks(&self) -> Vec<String> {
        self.inner.lock().await.rollbacks.clone()
    }

    pub async fn query_count(&self) -> u32 {
        self.inner.lock().await.query_count
    }

    /// Highest number of attempts that were ever in progress at once
    ///
    /// An attempt spans from its `activate` call to the last connectivity
    /// query for the same network before that network is activated again.
    pub async fn max_concurrent_attempts(&self) -> usize {
        let state = self.inner.lock().await;

        let mut spans: Vec<(usize, usize)> = Vec::new();
        let mut latest: HashMap<&str, usize> = HashMap::new();
        for (i, call) in state.calls.iter().enumerate() {
            match call {
                NetworkCall::Activate(name) => {
                    latest.insert(name.as_str(), spans.len());
                    spans.push((i, i));
                }
                NetworkCall::Query(name) => {
                    if let Some(&span) = latest.get(name.as_str()) {
                        spans[span].1 = i;
                    }
                }
            }
        }

        (0..state.calls.len())
            .map(|i| spans.iter().filter(|(start, end)| *start <= i && i <= *end).count())
            .max()
            .unwrap_or(0)
    }
}

impl NetworkStack for MockNetworkStack {
    async fn activate(&self, credentials: &Credentials) -> Result<(), ApplyError> {
        let delay = {
            let mut state = self.inner.lock().await;
            let name = credentials.network_name().to_string();
            state.calls.push(NetworkCall::Activate(name.clone()));
            state.activations.push(name);
            state.activate_delay
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.inner.lock().await;
        if state.should_fail_activate {
            return Err(ApplyError::Rejected("Mock activate failure".into()));
        }
        state.active_network = Some(credentials.network_name().to_string());
        Ok(())
    }

    async fn query_connectivity(&self, network_name: &str) -> NetworkResult<ConnectivityStatus> {
        let delay = {
            let mut state = self.inner.lock().await;
            state.calls.push(NetworkCall::Query(network_name.to_string()));
            state.query_delay
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.inner.lock().await;
        state.query_count += 1;

        if let Some(answer) = state.scripted_queries.pop_front() {
            return Ok(answer);
        }
        if state.never_associate {
            return Ok(ConnectivityStatus::Associating {
                network_name: state.active_network.clone(),
            });
        }

        Ok(match &state.active_network {
            Some(name) => ConnectivityStatus::Associated {
                network_name: name.clone(),
                ip_address: Some("192.168.1.100".into()),
            },
            None => ConnectivityStatus::Disconnected,
        })
    }

    async fn rollback(&self, previous: &Credentials) -> NetworkResult<()> {
        let mut state = self.inner.lock().await;
        if !state.supports_rollback {
            return Err(NetworkError::RollbackUnsupported);
        }
        state.rollbacks.push(previous.network_name().to_string());
        state.active_network = Some(previous.network_name().to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{PeerId, Secret};
    use pretty_assertions::assert_eq;
    use std::time::SystemTime;

    fn creds(name: &str) -> Credentials {
        Credentials::new(
            name,
            Secret::new("s3cret123"),
            false,
            PeerId::from("peer"),
            SystemTime::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_activate_is_idempotent() {
        let stack = MockNetworkStack::new();
        let c = creds("HomeNet");

        stack.activate(&c).await.unwrap();
        let first = stack.query_connectivity("HomeNet").await.unwrap();
        stack.activate(&c).await.unwrap();
        let second = stack.query_connectivity("HomeNet").await.unwrap();

        assert_eq!(first, second);
        assert!(second.is_associated_with("HomeNet"));
    }

    #[tokio::test]
    async fn test_activate_failure() {
        let stack = MockNetworkStack::new();
        stack.set_activate_failure(true).await;

        assert!(stack.activate(&creds("HomeNet")).await.is_err());
        assert_eq!(
            stack.query_connectivity("HomeNet").await.unwrap(),
            ConnectivityStatus::Disconnected
        );
    }

    #[tokio::test]
    async fn test_scripted_queries_come_first() {
        let stack = MockNetworkStack::new();
        stack.activate(&creds("HomeNet")).await.unwrap();
        stack
            .script_queries(vec![ConnectivityStatus::Associating { network_name: None }])
            .await;

        assert!(!stack.query_connectivity("HomeNet").await.unwrap().is_associated_with("HomeNet"));
        assert!(stack.query_connectivity("HomeNet").await.unwrap().is_associated_with("HomeNet"));
        assert_eq!(stack.query_count().await, 2);
    }

    #[tokio::test]
    async fn test_rollback_support() {
        let stack = MockNetworkStack::new();
        assert_eq!(
            stack.rollback(&creds("Old")).await,
            Err(NetworkError::RollbackUnsupported)
        );

        stack.set_rollback_support(true).await;
        stack.rollback(&creds("Old")).await.unwrap();
        assert_eq!(stack.rollbacks().await, vec!["Old".to_string()]);
    }

    #[tokio::test]
    async fn test_overlapping_attempts_are_counted() {
        let stack = MockNetworkStack::new();

        stack.activate(&creds("First")).await.unwrap();
        stack.query_connectivity("First").await.unwrap();
        stack.activate(&creds("Second")).await.unwrap();
        stack.query_connectivity("Second").await.unwrap();
        assert_eq!(stack.max_concurrent_attempts().await, 1);

        // verification of Second still running when Third is applied
        stack.activate(&creds("Third")).await.unwrap();
        stack.query_connectivity("Second").await.unwrap();
        assert_eq!(stack.max_concurrent_attempts().await, 2);
    }
}
