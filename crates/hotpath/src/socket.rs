//! IPv4 socket bootstrap for TCP/UDP endpoints.
//!
//! [`create_socket`] turns a [`SocketConfig`] into a ready socket: address
//! resolution (optionally from an interface name), blocking mode, connect or
//! bind/listen, TTL and receive timestamps. Each failing step is logged and
//! reported as a [`SocketError`] naming the step.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};

use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

/// Backlog for listening TCP sockets.
pub const MAX_TCP_SERVER_BACKLOG: i32 = 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Tcp,
    Udp,
}

/// Socket parameters. Missing fields take their defaults when deserialised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Host or dotted IPv4 address. Empty means "the IPv4 address of `iface`".
    pub ip: String,
    pub iface: String,
    pub port: u16,
    pub transport: Transport,
    pub blocking: bool,
    pub listening: bool,
    /// 0 keeps the OS default. Multicast destinations get the multicast TTL.
    pub ttl: u32,
    /// Enable `SO_TIMESTAMP` on received packets.
    pub so_timestamp: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            ip: String::new(),
            iface: "lo".to_string(),
            port: 0,
            transport: Transport::Tcp,
            blocking: false,
            listening: false,
            ttl: 0,
            so_timestamp: false,
        }
    }
}

/// The OS call that failed while setting up a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketStep {
    Create,
    NonBlocking,
    NoDelay,
    Connect,
    ReuseAddr,
    Bind,
    Listen,
    MulticastTtl,
    Ttl,
    Timestamp,
    JoinMulticast,
}

impl fmt::Display for SocketStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SocketStep::Create => "socket()",
            SocketStep::NonBlocking => "set non-blocking",
            SocketStep::NoDelay => "setsockopt(TCP_NODELAY)",
            SocketStep::Connect => "connect()",
            SocketStep::ReuseAddr => "setsockopt(SO_REUSEADDR)",
            SocketStep::Bind => "bind()",
            SocketStep::Listen => "listen()",
            SocketStep::MulticastTtl => "setsockopt(IP_MULTICAST_TTL)",
            SocketStep::Ttl => "setsockopt(IP_TTL)",
            SocketStep::Timestamp => "setsockopt(SO_TIMESTAMP)",
            SocketStep::JoinMulticast => "setsockopt(IP_ADD_MEMBERSHIP)",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("interface '{0}' has no IPv4 address")]
    NoInterfaceAddress(String),

    #[error("failed to resolve '{host}': {reason}")]
    Resolve { host: String, reason: String },

    #[error("{step} failed: {source}")]
    Os {
        step: SocketStep,
        #[source]
        source: io::Error,
    },
}

impl SocketError {
    pub fn step(&self) -> Option<SocketStep> {
        match self {
            SocketError::Os { step, .. } => Some(*step),
            _ => None,
        }
    }
}

fn os_error(step: SocketStep) -> impl FnOnce(io::Error) -> SocketError {
    move |source| {
        tracing::error!(%step, error = %source, "Socket setup failed");
        SocketError::Os { step, source }
    }
}

/// True for the errors a non-blocking socket reports when an operation is
/// merely in progress.
pub fn would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || in_progress(err)
}

#[cfg(unix)]
fn in_progress(err: &io::Error) -> bool {
    err.raw_os_error() == Some(nix::errno::Errno::EINPROGRESS as i32)
}

#[cfg(not(unix))]
fn in_progress(_err: &io::Error) -> bool {
    false
}

/// First IPv4 address assigned to `iface`.
#[cfg(unix)]
pub fn interface_ipv4(iface: &str) -> Option<Ipv4Addr> {
    let addrs = match nix::ifaddrs::getifaddrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::warn!(iface, error = %e, "getifaddrs() failed");
            return None;
        }
    };

    addrs
        .filter(|ifa| ifa.interface_name == iface)
        .find_map(|ifa| ifa.address?.as_sockaddr_in().map(|sin| sin.ip()))
}

#[cfg(not(unix))]
pub fn interface_ipv4(_iface: &str) -> Option<Ipv4Addr> {
    None
}

/// Enable `SO_TIMESTAMP` so received packets carry a kernel timestamp.
#[cfg(unix)]
pub fn set_so_timestamp(socket: &Socket) -> io::Result<()> {
    use nix::sys::socket::{setsockopt, sockopt};
    setsockopt(socket, sockopt::ReceiveTimestamp, &true).map_err(io::Error::from)
}

#[cfg(not(unix))]
pub fn set_so_timestamp(_socket: &Socket) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "SO_TIMESTAMP is not supported on this platform",
    ))
}

/// Set the TTL that applies to traffic towards `dest`: the multicast TTL for
/// multicast groups, the unicast TTL otherwise.
pub fn apply_ttl(socket: &Socket, dest: Ipv4Addr, ttl: u32) -> Result<(), SocketError> {
    if dest.is_multicast() {
        socket
            .set_multicast_ttl_v4(ttl)
            .map_err(os_error(SocketStep::MulticastTtl))
    } else {
        socket.set_ttl(ttl).map_err(os_error(SocketStep::Ttl))
    }
}

/// Join multicast `group` on the interface named `iface`.
pub fn join_multicast(socket: &Socket, group: Ipv4Addr, iface: &str) -> Result<(), SocketError> {
    let local =
        interface_ipv4(iface).ok_or_else(|| SocketError::NoInterfaceAddress(iface.to_string()))?;
    tracing::debug!(%group, iface, %local, "Joining multicast group");
    socket
        .join_multicast_v4(&group, &local)
        .map_err(os_error(SocketStep::JoinMulticast))
}

fn resolve(config: &SocketConfig) -> Result<Ipv4Addr, SocketError> {
    if config.ip.is_empty() {
        return interface_ipv4(&config.iface)
            .ok_or_else(|| SocketError::NoInterfaceAddress(config.iface.clone()));
    }

    if let Ok(ip) = config.ip.parse::<Ipv4Addr>() {
        return Ok(ip);
    }

    let resolve_err = |reason: String| SocketError::Resolve {
        host: config.ip.clone(),
        reason,
    };
    (config.ip.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| resolve_err(e.to_string()))?
        .find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(*v4.ip()),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| resolve_err("no IPv4 address".to_string()))
}

/// Create and configure a socket as described by `config`.
///
/// Non-listening sockets are connected to `ip:port`; a non-blocking connect
/// that is still in progress counts as success. Listening sockets are bound
/// to `ip:port` with `SO_REUSEADDR`, and TCP listeners also `listen()`.
pub fn create_socket(config: &SocketConfig) -> Result<Socket, SocketError> {
    let ip = resolve(config)?;
    let tcp = config.transport == Transport::Tcp;

    tracing::info!(
        %ip,
        iface = %config.iface,
        port = config.port,
        transport = ?config.transport,
        blocking = config.blocking,
        listening = config.listening,
        ttl = config.ttl,
        so_timestamp = config.so_timestamp,
        "Creating socket"
    );

    let (ty, protocol) = if tcp {
        (Type::STREAM, Protocol::TCP)
    } else {
        (Type::DGRAM, Protocol::UDP)
    };
    let socket =
        Socket::new(Domain::IPV4, ty, Some(protocol)).map_err(os_error(SocketStep::Create))?;
    let addr = SockAddr::from(SocketAddrV4::new(ip, config.port));

    if !config.blocking {
        socket
            .set_nonblocking(true)
            .map_err(os_error(SocketStep::NonBlocking))?;
        if tcp {
            socket
                .set_nodelay(true)
                .map_err(os_error(SocketStep::NoDelay))?;
        }
    }

    if config.listening {
        socket
            .set_reuse_address(true)
            .map_err(os_error(SocketStep::ReuseAddr))?;
        socket.bind(&addr).map_err(os_error(SocketStep::Bind))?;
        if tcp {
            socket
                .listen(MAX_TCP_SERVER_BACKLOG)
                .map_err(os_error(SocketStep::Listen))?;
        }
    } else if let Err(e) = socket.connect(&addr)
        && !would_block(&e)
    {
        return Err(os_error(SocketStep::Connect)(e));
    }

    if config.ttl > 0 {
        apply_ttl(&socket, ip, config.ttl)?;
    }

    if config.so_timestamp {
        set_so_timestamp(&socket).map_err(os_error(SocketStep::Timestamp))?;
    }

    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback(transport: Transport) -> SocketConfig {
        SocketConfig {
            ip: "127.0.0.1".to_string(),
            transport,
            ..SocketConfig::default()
        }
    }

    fn local_port(socket: &Socket) -> u16 {
        socket
            .local_addr()
            .unwrap()
            .as_socket_ipv4()
            .unwrap()
            .port()
    }

    #[test]
    fn default_config_snapshot() {
        insta::assert_json_snapshot!(SocketConfig::default(), @r#"
        {
          "ip": "",
          "iface": "lo",
          "port": 0,
          "transport": "tcp",
          "blocking": false,
          "listening": false,
          "ttl": 0,
          "so_timestamp": false
        }
        "#);
    }

    #[test]
    fn partial_config_uses_defaults() {
        let config: SocketConfig =
            serde_json::from_str(r#"{"ip": "239.1.1.1", "port": 9000, "transport": "udp"}"#)
                .unwrap();
        assert_eq!(config.ip, "239.1.1.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.transport, Transport::Udp);
        assert_eq!(config.iface, "lo");
        assert!(!config.listening);
    }

    #[test]
    fn would_block_recognises_in_progress() {
        assert!(would_block(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!would_block(&io::Error::from(io::ErrorKind::ConnectionRefused)));
        #[cfg(unix)]
        assert!(would_block(&io::Error::from_raw_os_error(
            nix::errno::Errno::EINPROGRESS as i32
        )));
    }

    #[test]
    fn step_display() {
        assert_eq!(SocketStep::Bind.to_string(), "bind()");
        assert_eq!(SocketStep::Timestamp.to_string(), "setsockopt(SO_TIMESTAMP)");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn loopback_interface_has_ipv4() {
        assert_eq!(interface_ipv4("lo"), Some(Ipv4Addr::LOCALHOST));
        assert_eq!(interface_ipv4("no-such-iface0"), None);
    }

    #[test]
    fn unknown_interface_is_reported() {
        let config = SocketConfig {
            iface: "no-such-iface0".to_string(),
            ..SocketConfig::default()
        };
        let err = create_socket(&config).unwrap_err();
        assert!(matches!(err, SocketError::NoInterfaceAddress(ref i) if i == "no-such-iface0"));
        assert_eq!(err.step(), None);
    }

    #[test]
    fn tcp_listener_and_blocking_client() {
        let listener = create_socket(&SocketConfig {
            listening: true,
            ..loopback(Transport::Tcp)
        })
        .unwrap();
        assert!(listener.reuse_address().unwrap());
        assert!(listener.nodelay().unwrap());
        let port = local_port(&listener);
        assert_ne!(port, 0);

        let client = create_socket(&SocketConfig {
            port,
            blocking: true,
            ..loopback(Transport::Tcp)
        })
        .unwrap();
        assert_eq!(
            client.peer_addr().unwrap().as_socket_ipv4().unwrap().port(),
            port
        );

        let (_conn, _peer) = listener.accept().unwrap();
    }

    #[test]
    fn non_blocking_connect_in_progress_is_ok() {
        let listener = create_socket(&SocketConfig {
            listening: true,
            blocking: true,
            ..loopback(Transport::Tcp)
        })
        .unwrap();
        let port = local_port(&listener);

        let client = create_socket(&SocketConfig {
            port,
            ..loopback(Transport::Tcp)
        });
        assert!(client.is_ok());
    }

    #[test]
    fn refused_connect_names_step() {
        // Grab a free port, then close it so nothing is listening there.
        let port = {
            let probe = create_socket(&SocketConfig {
                listening: true,
                blocking: true,
                ..loopback(Transport::Tcp)
            })
            .unwrap();
            local_port(&probe)
        };

        let err = create_socket(&SocketConfig {
            port,
            blocking: true,
            ..loopback(Transport::Tcp)
        })
        .unwrap_err();
        assert_eq!(err.step(), Some(SocketStep::Connect));
    }

    #[cfg(unix)]
    #[test]
    fn udp_listener_with_ttl_and_timestamps() {
        use nix::sys::socket::{getsockopt, sockopt};

        let socket = create_socket(&SocketConfig {
            listening: true,
            ttl: 5,
            so_timestamp: true,
            ..loopback(Transport::Udp)
        })
        .unwrap();
        assert_eq!(socket.ttl().unwrap(), 5);
        assert!(getsockopt(&socket, sockopt::ReceiveTimestamp).unwrap());
    }

    #[test]
    fn multicast_destination_sets_multicast_ttl() {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap();
        apply_ttl(&socket, Ipv4Addr::new(239, 1, 1, 1), 3).unwrap();
        assert_eq!(socket.multicast_ttl_v4().unwrap(), 3);

        apply_ttl(&socket, Ipv4Addr::LOCALHOST, 7).unwrap();
        assert_eq!(socket.ttl().unwrap(), 7);
        assert_eq!(socket.multicast_ttl_v4().unwrap(), 3);
    }

    #[test]
    fn join_multicast_needs_interface_address() {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap();
        let err = join_multicast(&socket, Ipv4Addr::new(239, 1, 2, 3), "no-such-iface0").unwrap_err();
        assert!(matches!(err, SocketError::NoInterfaceAddress(ref i) if i == "no-such-iface0"));
        assert_eq!(err.step(), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn join_multicast_on_loopback() {
        let socket = create_socket(&SocketConfig {
            ip: "0.0.0.0".to_string(),
            listening: true,
            ..loopback(Transport::Udp)
        })
        .unwrap();
        join_multicast(&socket, Ipv4Addr::new(239, 1, 2, 3), "lo").unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn join_multicast_rejects_unicast_group() {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap();
        let err = join_multicast(&socket, Ipv4Addr::LOCALHOST, "lo").unwrap_err();
        assert_eq!(err.step(), Some(SocketStep::JoinMulticast));
    }
}
