//! Network infrastructure: implements `NetworkProbe` with tokio sockets.

use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpStream;

use crate::application::ports::NetworkProbe;

/// Production implementation that performs real network checks.
pub struct TokioNetworkProbe;

impl NetworkProbe for TokioNetworkProbe {
    async fn check_tcp_connectivity(&self, host: &str, port: u16, timeout: Duration) -> Result<bool> {
        let connect = TcpStream::connect((host, port));
        Ok(matches!(tokio::time::timeout(timeout, connect).await, Ok(Ok(_))))
    }

    async fn check_dns_resolution(&self, hostname: &str) -> Result<bool> {
        Ok(tokio::net::lookup_host((hostname, 0))
            .await
            .is_ok_and(|mut addrs| addrs.next().is_some()))
    }
}
