//! Named backend services and their base URLs.

/// Service name of the live-session backend.
pub const LIVES_SERVICE: &str = "lives";
/// Production base URL of the live-session backend.
pub const LIVES_SERVICE_URL: &str = "https://lives.mykey.org";

const SERVICES: &[(&str, &str)] = &[(LIVES_SERVICE, LIVES_SERVICE_URL)];

/// Resolves a service name to its base URL.
pub fn service_url(name: &str) -> Option<&'static str> {
    SERVICES
        .iter()
        .find_map(|(service, url)| (*service == name).then_some(*url))
}
