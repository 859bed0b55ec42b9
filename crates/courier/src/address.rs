use std::{
    fmt, io,
    net::{SocketAddr, ToSocketAddrs},
    vec,
};

/// Peer endpoint. Structural equality; used as the key of the server's
/// connection map.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::new("127.0.0.1", 48_575)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl ToSocketAddrs for Address {
    type Iter = vec::IntoIter<SocketAddr>;

    fn to_socket_addrs(&self) -> io::Result<Self::Iter> {
        (self.host.as_str(), self.port).to_socket_addrs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_equality() {
        assert_eq!(Address::new("127.0.0.1", 8000), Address::new("127.0.0.1", 8000));
        assert_ne!(Address::new("127.0.0.1", 8000), Address::new("127.0.0.1", 8001));
    }

    #[test]
    fn default_is_loopback() {
        let addr = Address::default();
        assert_eq!(addr.host, "127.0.0.1");
        assert_eq!(addr.port, 48_575);
    }

    #[test]
    fn resolves_loopback() {
        let addrs: Vec<_> = Address::new("127.0.0.1", 4000).to_socket_addrs().unwrap().collect();
        assert_eq!(addrs, [SocketAddr::from(([127, 0, 0, 1], 4000))]);
    }

    #[test]
    fn empty_host_does_not_resolve() {
        assert!(Address::new("", 0).to_socket_addrs().is_err());
    }
}
