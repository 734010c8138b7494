//! Service → DNS record projection
//!
//! Projection is pure: the same service and domain always yield the same
//! record name and payload.

use crate::traits::{DnsRecord, Service};

/// Build the absolute record name for a service
///
/// The result is `"<service>.<namespace>.<domain>."`; the trailing dot marks it
/// as a fully-qualified name.
pub fn record_name(service: &str, namespace: &str, domain: &str) -> String {
    format!("{}.{}.{}.", service, namespace, domain)
}

/// Project a service into its record name and DNS record
///
/// Returns `None` for headless services. Such a service neither creates nor
/// modifies a record; an earlier record under the same name is only removed by
/// an explicit delete.
pub fn project(service: &Service, domain: &str) -> Option<(String, DnsRecord)> {
    let cluster_ip = service.cluster_ip?;
    let name = record_name(&service.name, &service.namespace, domain);
    Some((name, DnsRecord::new(cluster_ip.to_string(), service.port)))
}
