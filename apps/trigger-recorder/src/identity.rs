use std::net::UdpSocket;
use sysinfo::System;

/// Host name and address stamped on trigger rows for Linux system installs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostIdentity {
    pub sensor_name: Option<String>,
    pub ip: Option<String>,
}

impl HostIdentity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Explicit overrides win; otherwise the host name comes from the OS and the
    /// address from the interface that routes to the outside world.
    pub fn resolve(sensor_name: Option<String>, ip: Option<String>) -> Self {
        let sensor_name = sensor_name.or_else(System::host_name);
        let ip = ip.or_else(|| match outbound_ip() {
            Ok(addr) => Some(addr),
            Err(err) => {
                tracing::warn!(error = %err, "failed to resolve node IP; rows will omit it");
                None
            }
        });
        Self { sensor_name, ip }
    }
}

/// Connecting a UDP socket sends nothing; it only selects the route and local address.
fn outbound_ip() -> std::io::Result<String> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    Ok(socket.local_addr()?.ip().to_string())
}
