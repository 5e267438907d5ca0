/// Remote Service Clients
///
/// Thin HTTP clients for the services the tools forward to:
/// - gcp_auth.rs: service account token source (gcloud-sdk)
/// - compute.rs: Compute Engine instances API
/// - boomi.rs: Boomi workflow endpoint used by the `add` tool

pub mod boomi;
pub mod compute;
pub mod gcp_auth;

#[cfg(test)]
pub(crate) mod test_support;
