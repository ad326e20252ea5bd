//! Environment candidates derived from addresses found in a specification.

use std::collections::BTreeMap;

use crate::types::{Environment, IntegrationSystem, Protocol, SystemKind};

const IMPORTED_SOURCE: &str = "IMPORTED";

/// Trim and strip trailing slashes, keeping a bare `/`.
///
/// Applying it twice yields the same result as applying it once.
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    let stripped = trimmed.trim_end_matches('/');
    if stripped.is_empty() && !trimmed.is_empty() {
        return "/".to_string();
    }
    stripped.to_string()
}

/// Connection properties attached to a new environment for `protocol`.
pub fn default_properties(protocol: Protocol, timeout_ms: u64) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    let timeout = timeout_ms.to_string();
    match protocol {
        Protocol::Kafka => {
            properties.insert("securityProtocol".into(), "PLAINTEXT".into());
            properties.insert("saslMechanism".into(), "PLAIN".into());
            properties.insert("saslJaasConfig".into(), String::new());
            properties.insert("sslEndpointIdentificationAlgorithm".into(), String::new());
            properties.insert("requestTimeoutMs".into(), timeout);
        }
        Protocol::Amqp => {
            properties.insert("routingKey".into(), String::new());
            properties.insert("acknowledgeMode".into(), "AUTO".into());
            properties.insert("connectionTimeout".into(), timeout);
        }
        Protocol::Http | Protocol::Soap | Protocol::Graphql | Protocol::Grpc => {
            properties.insert("connectTimeout".into(), timeout.clone());
            properties.insert("readTimeout".into(), timeout);
        }
        Protocol::Async | Protocol::Mqtt | Protocol::Redis | Protocol::Nats => {
            properties.insert("connectionTimeout".into(), timeout);
        }
    }
    properties
}

/// Display name for an address: its host, without scheme, credentials or path.
pub fn environment_name(address: &str) -> String {
    let without_scheme = address.split_once("://").map_or(address, |(_, rest)| rest);
    let authority = without_scheme.split('/').next().unwrap_or("");
    let host = authority.rsplit('@').next().unwrap_or(authority);
    if host.is_empty() {
        "Environment".to_string()
    } else {
        host.to_string()
    }
}

/// Apply address candidates to a system's environments.
///
/// External systems get one environment per distinct normalized address; the
/// first one created becomes active when none is. Other kinds only consider
/// the first candidate: it creates the sole environment, or fills in an
/// environment that has no address yet. Returns how many environments changed.
pub fn apply_candidates(
    system: &mut IntegrationSystem,
    addresses: &[String],
    protocol: Protocol,
    timeout_ms: u64,
) -> usize {
    let candidates: Vec<String> = addresses
        .iter()
        .map(|address| normalize_address(address))
        .filter(|address| !address.is_empty())
        .collect();

    match system.kind {
        SystemKind::External => {
            let mut created = 0;
            for address in candidates {
                let known = system
                    .environments
                    .iter()
                    .any(|env| normalize_address(&env.address) == address);
                if known {
                    tracing::debug!(%address, "environment already exists");
                    continue;
                }
                let mut environment = new_environment(&address, protocol, timeout_ms);
                if system.active_environment().is_none() {
                    environment.is_active = true;
                }
                system.environments.push(environment);
                created += 1;
            }
            created
        }
        SystemKind::Internal | SystemKind::Implemented => {
            let Some(address) = candidates.into_iter().next() else {
                return 0;
            };
            if system.environments.is_empty() {
                let mut environment = new_environment(&address, protocol, timeout_ms);
                environment.is_active = true;
                system.environments.push(environment);
                return 1;
            }
            match system
                .environments
                .iter_mut()
                .find(|env| env.address.trim().is_empty())
            {
                Some(environment) => {
                    tracing::debug!(%address, environment = %environment.id, "backfilling address");
                    environment.address = address;
                    if environment.properties.is_empty() {
                        environment.properties = default_properties(protocol, timeout_ms);
                    }
                    1
                }
                None => 0,
            }
        }
    }
}

fn new_environment(address: &str, protocol: Protocol, timeout_ms: u64) -> Environment {
    let mut environment = Environment::new(environment_name(address), address);
    environment.source_type = IMPORTED_SOURCE.to_string();
    environment.properties = default_properties(protocol, timeout_ms);
    environment
}
