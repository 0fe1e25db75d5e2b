//! Test helpers for the API layer.

#[cfg(test)]
pub fn test_client(url: &str) -> super::Client {
    let config = crate::config::ClusterConfig::new(
        url,
        crate::config::Credentials::token("test@pam!test=secret"),
    )
    .unwrap()
    .insecure(true);
    super::Client::new(&config).unwrap()
}

#[cfg(test)]
pub fn test_client_password(url: &str) -> super::Client {
    let config = crate::config::ClusterConfig::new(
        url,
        crate::config::Credentials::password("root", "pam", "hunter2"),
    )
    .unwrap()
    .insecure(true);
    super::Client::new(&config).unwrap()
}
